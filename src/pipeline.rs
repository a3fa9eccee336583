//! Query resolution: normalize, make sure the relevant categories are
//! cached, rank, truncate.
//!
//! Each `resolve` call is independent; the only state shared between calls
//! is the injected [`EntityCache`].

use std::thread;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::cache::EntityCache;
use crate::config::FinderConfig;
use crate::errors::{FinderError, Result};
use crate::search::SimilarityRanker;
use crate::types::{CategoryFailure, Entity, Query, Resolution};

/// Per-call progress of a resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    Normalizing,
    Fetching,
    Ranking,
    Done,
    Failed,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Idle => "idle",
            Stage::Normalizing => "normalizing",
            Stage::Fetching => "fetching",
            Stage::Ranking => "ranking",
            Stage::Done => "done",
            Stage::Failed => "failed",
        }
    }
}

/// Logs stage transitions of one call.
struct StageTracker {
    stage: Stage,
}

impl StageTracker {
    fn new() -> Self {
        Self { stage: Stage::Idle }
    }

    fn advance(&mut self, next: Stage) {
        debug!(from = self.stage.as_str(), to = next.as_str(), "resolve stage");
        self.stage = next;
    }
}

/// Orchestrates normalization, cache lookups and ranking.
pub struct ResolutionPipeline {
    cache: EntityCache,
    ranker: SimilarityRanker,
    categories: Vec<String>,
    default_limit: Option<usize>,
}

impl ResolutionPipeline {
    /// Creates a pipeline searching `categories` when no category is given.
    pub fn new(cache: EntityCache, ranker: SimilarityRanker, categories: Vec<String>) -> Self {
        Self {
            cache,
            ranker,
            categories,
            default_limit: None,
        }
    }

    /// Creates a pipeline using the ranking options of `config`.
    pub fn from_config(cache: EntityCache, config: &FinderConfig) -> Self {
        Self::new(
            cache,
            SimilarityRanker::new(config.min_score),
            config.categories.clone(),
        )
        .with_default_limit(config.result_limit)
    }

    /// Cap applied when a call does not pass its own limit.
    pub fn with_default_limit(mut self, limit: Option<usize>) -> Self {
        self.default_limit = limit;
        self
    }

    pub fn categories(&self) -> &[String] {
        &self.categories
    }

    pub fn cache(&self) -> &EntityCache {
        &self.cache
    }

    /// Resolves `raw_query` to a ranked list of entities.
    ///
    /// With a `category`, only that category is searched and a failed fetch
    /// fails the call with `FetchFailure`. Without one, every configured
    /// category is searched; categories that fail are listed in
    /// [`Resolution::failures`] and the others are still ranked. A blank
    /// query returns an empty resolution without touching the network.
    pub fn resolve(
        &self,
        raw_query: &str,
        category: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Resolution> {
        self.resolve_cancellable(raw_query, category, limit, &CancellationToken::new())
    }

    /// Same as [`resolve`](Self::resolve), but returns
    /// `FinderError::Cancelled` instead of a result once `cancel` fires.
    ///
    /// The token is checked before fetching, while waiting on the cache and
    /// before the ranked result is handed back; ranking itself is not
    /// interrupted.
    pub fn resolve_cancellable(
        &self,
        raw_query: &str,
        category: Option<&str>,
        limit: Option<usize>,
        cancel: &CancellationToken,
    ) -> Result<Resolution> {
        let mut tracker = StageTracker::new();

        tracker.advance(Stage::Normalizing);
        let query = Query::new(raw_query, category);
        if query.is_empty() {
            tracker.advance(Stage::Done);
            return Ok(Resolution::empty(query));
        }
        if cancel.is_cancelled() {
            return Err(FinderError::Cancelled);
        }

        tracker.advance(Stage::Fetching);
        let (mut matches, failures) = match category {
            Some(category) => {
                let entities = match self.cache.get_or_fetch_cancellable(category, cancel) {
                    Ok(entities) => entities,
                    Err(FinderError::Cancelled) => return Err(FinderError::Cancelled),
                    Err(e) => {
                        tracker.advance(Stage::Failed);
                        return Err(into_fetch_failure(category, e));
                    }
                };
                tracker.advance(Stage::Ranking);
                (self.ranker.rank(&query.normalized, &entities), Vec::new())
            }
            None => {
                let (entities, failures) = self.fetch_all(cancel)?;
                tracker.advance(Stage::Ranking);
                (self.ranker.rank(&query.normalized, &entities), failures)
            }
        };

        if let Some(limit) = limit.or(self.default_limit) {
            matches.truncate(limit);
        }

        if cancel.is_cancelled() {
            debug!(query = %query.raw, "resolution superseded, dropping result");
            return Err(FinderError::Cancelled);
        }
        tracker.advance(Stage::Done);
        Ok(Resolution {
            query,
            matches,
            failures,
        })
    }

    /// Returns every entity of `category`, in server order.
    pub fn list(&self, category: &str) -> Result<Vec<Entity>> {
        self.cache
            .get_or_fetch(category)
            .map(|entities| entities.as_ref().clone())
            .map_err(|e| into_fetch_failure(category, e))
    }

    /// Fetches every configured category concurrently, concatenating the
    /// successful ones in configured order.
    fn fetch_all(&self, cancel: &CancellationToken) -> Result<(Vec<Entity>, Vec<CategoryFailure>)> {
        let cache = &self.cache;
        let outcomes: Vec<(&String, Result<_>)> = thread::scope(|scope| {
            let handles: Vec<_> = self
                .categories
                .iter()
                .map(|category| {
                    let handle =
                        scope.spawn(move || cache.get_or_fetch_cancellable(category, cancel));
                    (category, handle)
                })
                .collect();

            handles
                .into_iter()
                .map(|(category, handle)| {
                    let outcome = handle.join().unwrap_or_else(|_| {
                        Err(FinderError::FetchFailure {
                            category: category.clone(),
                            attempts: 1,
                            message: "fetch thread panicked".to_string(),
                        })
                    });
                    (category, outcome)
                })
                .collect()
        });

        let mut entities = Vec::new();
        let mut failures = Vec::new();
        for (category, outcome) in outcomes {
            match outcome {
                Ok(fetched) => entities.extend(fetched.iter().cloned()),
                Err(FinderError::Cancelled) => return Err(FinderError::Cancelled),
                Err(e) => {
                    warn!(category = %category, "omitting category from results: {e}");
                    failures.push(CategoryFailure {
                        category: category.clone(),
                        error: into_fetch_failure(category, e),
                    });
                }
            }
        }
        Ok((entities, failures))
    }
}

/// Surfaces any fetch error as a `FetchFailure` naming `category`.
fn into_fetch_failure(category: &str, error: FinderError) -> FinderError {
    match error {
        FinderError::FetchFailure { .. } | FinderError::Cancelled => error,
        other => FinderError::FetchFailure {
            category: category.to_string(),
            attempts: 1,
            message: other.to_string(),
        },
    }
}
