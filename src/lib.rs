pub mod cache;
pub mod catalog;
pub mod config;
pub mod errors;
pub mod finder;
pub mod pipeline;
pub mod search;
pub mod types;
