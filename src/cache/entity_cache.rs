use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::flight::{lock, Entities, Flight};
use crate::catalog::CatalogSource;
use crate::errors::{FinderError, Result};
use crate::types::{CacheState, CacheStats, Entity};

/// Default time-to-live of a fetched category.
pub const DEFAULT_TTL: Duration = Duration::from_secs(600);

/// Per-category cache entry. Never handed out; callers get `Arc` views of
/// the entity list.
struct Slot {
    state: CacheState,
    entities: Entities,
    /// `None` while `Ready` means the entry never expires.
    expires_at: Option<Instant>,
    flight: Option<Arc<Flight>>,
    /// Bumped by `invalidate`; a fetch that started under an older
    /// generation stores its result as `Stale`.
    generation: u64,
}

impl Slot {
    fn empty() -> Self {
        Self {
            state: CacheState::Empty,
            entities: Arc::new(Vec::new()),
            expires_at: None,
            flight: None,
            generation: 0,
        }
    }

    fn is_fresh(&self, now: Instant) -> bool {
        self.state == CacheState::Ready && self.expires_at.map_or(true, |t| now < t)
    }
}

struct CacheInner {
    source: Arc<dyn CatalogSource>,
    ttl: Duration,
    slots: Mutex<HashMap<String, Slot>>,
    hits: AtomicU64,
    misses: AtomicU64,
    fetches: AtomicU64,
    failures: AtomicU64,
}

/// In-memory, TTL-based store of fetched categories with single-flight
/// request coalescing.
///
/// At most one fetch per category is in flight at any time; every caller
/// that arrives while it runs waits for the same outcome. Different
/// categories are fetched independently. Expiry is evaluated lazily on
/// access. Cloning yields another handle to the same cache.
#[derive(Clone)]
pub struct EntityCache {
    inner: Arc<CacheInner>,
}

impl EntityCache {
    pub fn new(source: Arc<dyn CatalogSource>, ttl: Duration) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                source,
                ttl,
                slots: Mutex::new(HashMap::new()),
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
                fetches: AtomicU64::new(0),
                failures: AtomicU64::new(0),
            }),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.inner.ttl
    }

    /// Returns the entities of `category`, fetching them if the entry is not
    /// `Ready` or has expired.
    pub fn get_or_fetch(&self, category: &str) -> Result<Arc<Vec<Entity>>> {
        self.get_or_fetch_inner(category, None)
    }

    /// Like [`get_or_fetch`](Self::get_or_fetch), but gives up waiting with
    /// `FinderError::Cancelled` once `cancel` fires. The fetch itself keeps
    /// running for the other waiters and still fills the cache.
    pub fn get_or_fetch_cancellable(
        &self,
        category: &str,
        cancel: &CancellationToken,
    ) -> Result<Arc<Vec<Entity>>> {
        if cancel.is_cancelled() {
            return Err(FinderError::Cancelled);
        }
        self.get_or_fetch_inner(category, Some(cancel))
    }

    fn get_or_fetch_inner(
        &self,
        category: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<Entities> {
        let mut started = None;
        let flight = {
            let mut slots = lock(&self.inner.slots);
            let slot = slots
                .entry(category.to_string())
                .or_insert_with(Slot::empty);

            if slot.is_fresh(Instant::now()) {
                self.inner.hits.fetch_add(1, Ordering::Relaxed);
                debug!(category, "cache hit");
                return Ok(Arc::clone(&slot.entities));
            }
            self.inner.misses.fetch_add(1, Ordering::Relaxed);

            if slot.state == CacheState::Ready {
                debug!(category, "cache entry expired");
                slot.state = CacheState::Stale;
            }

            match &slot.flight {
                Some(flight) => {
                    debug!(category, "joining in-flight fetch");
                    Arc::clone(flight)
                }
                None => {
                    let flight = Arc::new(Flight::new());
                    slot.state = CacheState::Fetching;
                    slot.flight = Some(Arc::clone(&flight));
                    started = Some(slot.generation);
                    flight
                }
            }
        };

        if let Some(generation) = started {
            self.spawn_fetch(category, Arc::clone(&flight), generation);
        }
        flight.wait(cancel)
    }

    /// Runs the fetch on its own thread so that no single caller owns it:
    /// any waiter may give up without cancelling the fetch for the others.
    fn spawn_fetch(&self, category: &str, flight: Arc<Flight>, generation: u64) {
        let job = FetchJob {
            inner: Arc::clone(&self.inner),
            category: category.to_string(),
            flight,
            generation,
            finished: false,
        };
        let spawned = thread::Builder::new()
            .name(format!("fetch-{category}"))
            .spawn(move || job.run());
        if let Err(e) = spawned {
            // The job was dropped with the closure and resolved the flight as failed.
            warn!(category, "failed to spawn fetch worker: {e}");
        }
    }

    /// Returns the cached entities if the entry is fresh, without fetching
    /// and without touching the hit/miss counters.
    pub fn peek(&self, category: &str) -> Option<Arc<Vec<Entity>>> {
        let slots = lock(&self.inner.slots);
        slots
            .get(category)
            .filter(|slot| slot.is_fresh(Instant::now()))
            .map(|slot| Arc::clone(&slot.entities))
    }

    /// Forces the entry to `Stale` regardless of its TTL. A fetch already in
    /// flight stores its result as `Stale` too.
    pub fn invalidate(&self, category: &str) {
        let mut slots = lock(&self.inner.slots);
        if let Some(slot) = slots.get_mut(category) {
            slot.generation += 1;
            if slot.state == CacheState::Ready {
                slot.state = CacheState::Stale;
            }
            debug!(category, state = slot.state.as_str(), "invalidated");
        }
    }

    /// Current state of a category's entry. An expired `Ready` entry is
    /// reported as `Stale` without being modified.
    pub fn state(&self, category: &str) -> CacheState {
        let slots = lock(&self.inner.slots);
        match slots.get(category) {
            None => CacheState::Empty,
            Some(slot) if slot.state == CacheState::Ready && !slot.is_fresh(Instant::now()) => {
                CacheState::Stale
            }
            Some(slot) => slot.state,
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.inner.hits.load(Ordering::Relaxed),
            misses: self.inner.misses.load(Ordering::Relaxed),
            fetches: self.inner.fetches.load(Ordering::Relaxed),
            failures: self.inner.failures.load(Ordering::Relaxed),
        }
    }

    /// Drops every cached entity list. A category with a fetch in flight
    /// keeps its flight, so later callers join it instead of starting a
    /// second fetch; its result is stored as `Stale`.
    pub fn clear(&self) {
        let mut slots = lock(&self.inner.slots);
        let before = slots.len();
        slots.retain(|_, slot| slot.flight.is_some());
        for slot in slots.values_mut() {
            slot.generation += 1;
            slot.entities = Arc::new(Vec::new());
            slot.expires_at = None;
        }
        info!(
            dropped = before - slots.len(),
            in_flight = slots.len(),
            "cache cleared"
        );
    }
}

/// One fetch of one category. Resolves its flight exactly once, including
/// when the worker panics or never starts.
struct FetchJob {
    inner: Arc<CacheInner>,
    category: String,
    flight: Arc<Flight>,
    generation: u64,
    finished: bool,
}

impl FetchJob {
    fn run(mut self) {
        self.inner.fetches.fetch_add(1, Ordering::Relaxed);
        let outcome = self
            .inner
            .source
            .fetch_category(&self.category)
            .map(|entities| Arc::new(dedup(&self.category, entities)));
        self.finish(outcome);
    }

    fn finish(&mut self, outcome: Result<Entities>) {
        self.finished = true;
        {
            let mut slots = lock(&self.inner.slots);
            let owned = slots.get_mut(&self.category).filter(|slot| {
                slot.flight
                    .as_ref()
                    .is_some_and(|current| Arc::ptr_eq(current, &self.flight))
            });
            if let Some(slot) = owned {
                slot.flight = None;
                match &outcome {
                    Ok(entities) => {
                        slot.entities = Arc::clone(entities);
                        slot.expires_at = Instant::now().checked_add(self.inner.ttl);
                        slot.state = if slot.generation == self.generation {
                            CacheState::Ready
                        } else {
                            CacheState::Stale
                        };
                    }
                    Err(_) => {
                        slot.entities = Arc::new(Vec::new());
                        slot.expires_at = None;
                        slot.state = CacheState::Empty;
                    }
                }
            }
        }

        match &outcome {
            Ok(entities) => debug!(
                category = %self.category,
                entities = entities.len(),
                "cache filled"
            ),
            Err(e) => {
                self.inner.failures.fetch_add(1, Ordering::Relaxed);
                warn!(category = %self.category, "fetch failed: {e}");
            }
        }
        self.flight.complete(outcome);
    }
}

impl Drop for FetchJob {
    fn drop(&mut self) {
        if !self.finished {
            let category = self.category.clone();
            self.finish(Err(FinderError::FetchFailure {
                category,
                attempts: 1,
                message: "fetch worker stopped without a result".to_string(),
            }));
        }
    }
}

/// Drops repeated ids, keeping the first occurrence.
fn dedup(category: &str, entities: Vec<Entity>) -> Vec<Entity> {
    let before = entities.len();
    let mut seen = HashSet::with_capacity(before);
    let unique: Vec<Entity> = entities
        .into_iter()
        .filter(|e| seen.insert(e.id.clone()))
        .collect();
    if unique.len() != before {
        warn!(
            category,
            dropped = before - unique.len(),
            "dropped duplicate entity ids"
        );
    }
    unique
}
