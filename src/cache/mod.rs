//! Entity cache with lazy TTL expiry and single-flight fetches.
//!
//! Each category key moves through `Empty → Fetching → Ready`, becomes
//! `Stale` on expiry or invalidation, and falls back to `Empty` when a fetch
//! fails so that the next caller retries.

mod entity_cache;
mod flight;

pub use entity_cache::{EntityCache, DEFAULT_TTL};
