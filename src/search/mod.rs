//! Query normalization and similarity ranking.
//!
//! Both stages are pure and CPU-bound: they never touch the network or the
//! cache, so they can run on any caller thread.

mod normalize;
mod ranker;

pub use normalize::normalize;
pub use ranker::{similarity, SimilarityRanker, DEFAULT_MIN_SCORE, PARTIAL_MATCH_WEIGHT};
