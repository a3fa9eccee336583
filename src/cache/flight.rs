use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::errors::{FinderError, Result};
use crate::types::Entity;

/// How often a cancellable waiter re-checks its token.
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(20);

pub(crate) type Entities = Arc<Vec<Entity>>;

/// A single-resolution completion signal shared by every caller waiting on
/// the same in-flight fetch.
pub(crate) struct Flight {
    outcome: Mutex<Option<Result<Entities>>>,
    done: Condvar,
}

impl Flight {
    pub(crate) fn new() -> Self {
        Self {
            outcome: Mutex::new(None),
            done: Condvar::new(),
        }
    }

    /// Resolves the flight. Only the first outcome is kept.
    pub(crate) fn complete(&self, outcome: Result<Entities>) {
        let mut slot = lock(&self.outcome);
        if slot.is_none() {
            *slot = Some(outcome);
        }
        self.done.notify_all();
    }

    /// Blocks until the flight resolves, or until `cancel` fires.
    pub(crate) fn wait(&self, cancel: Option<&CancellationToken>) -> Result<Entities> {
        let mut outcome = lock(&self.outcome);
        loop {
            if let Some(result) = outcome.as_ref() {
                return result.clone();
            }
            outcome = match cancel {
                Some(token) => {
                    if token.is_cancelled() {
                        return Err(FinderError::Cancelled);
                    }
                    self.done
                        .wait_timeout(outcome, CANCEL_POLL_INTERVAL)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
                None => self
                    .done
                    .wait(outcome)
                    .unwrap_or_else(PoisonError::into_inner),
            };
        }
    }
}

/// Locks a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
