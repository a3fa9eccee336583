use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::errors::FinderError;
use crate::search::normalize;

/// A single catalog record (a character, planet, starship, ...).
///
/// Built once from a server response and never mutated afterwards.
/// Identity is the `(category, id)` pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub category: String,
    pub name: String,
    pub attributes: BTreeMap<String, String>,
    /// UNIX timestamp (seconds) of the response this entity came from.
    pub fetched_at: u64,
}

impl Entity {
    /// Returns the `(category, id)` identity of this entity.
    pub fn key(&self) -> (&str, &str) {
        (&self.category, &self.id)
    }

    /// Looks up a single attribute value.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }
}

/// A user request, kept only for the duration of one resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub raw: String,
    pub normalized: String,
    pub category: Option<String>,
}

impl Query {
    pub fn new(raw: &str, category: Option<&str>) -> Self {
        Self {
            raw: raw.to_string(),
            normalized: normalize(raw),
            category: category.map(str::to_string),
        }
    }

    /// An empty normalized query means no match is attempted.
    pub fn is_empty(&self) -> bool {
        self.normalized.is_empty()
    }
}

/// A ranked candidate pairing an entity with its similarity score in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub entity: Entity,
    pub score: f64,
}

impl MatchResult {
    /// Total order used for result lists: descending score, then name
    /// (case-insensitive), then id, then category.
    pub fn ranking_cmp(&self, other: &Self) -> Ordering {
        other
            .score
            .total_cmp(&self.score)
            .then_with(|| {
                self.entity
                    .name
                    .to_lowercase()
                    .cmp(&other.entity.name.to_lowercase())
            })
            .then_with(|| self.entity.id.cmp(&other.entity.id))
            .then_with(|| self.entity.category.cmp(&other.entity.category))
    }
}

/// A category that could not be fetched during an all-categories resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct CategoryFailure {
    pub category: String,
    pub error: FinderError,
}

/// Outcome of one `resolve` call.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub query: Query,
    pub matches: Vec<MatchResult>,
    /// Categories omitted from `matches` because their fetch failed.
    /// Always empty for single-category requests, which fail instead.
    pub failures: Vec<CategoryFailure>,
}

impl Resolution {
    pub fn empty(query: Query) -> Self {
        Self {
            query,
            matches: Vec::new(),
            failures: Vec::new(),
        }
    }

    /// True when every requested category was fetched successfully.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Lifecycle state of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CacheState {
    Empty,
    Fetching,
    Ready,
    Stale,
}

impl CacheState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheState::Empty => "empty",
            CacheState::Fetching => "fetching",
            CacheState::Ready => "ready",
            CacheState::Stale => "stale",
        }
    }
}

/// Counters describing how the cache has been used.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub fetches: u64,
    pub failures: u64,
}

/// Returns the current UNIX timestamp in seconds.
pub fn current_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
