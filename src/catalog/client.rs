use std::collections::HashSet;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, info, warn};

use super::page::{entities_from_page, parse_page, parse_record};
use super::transport::{HttpTransport, UreqTransport};
use crate::config::FinderConfig;
use crate::errors::{FinderError, Result};
use crate::types::{current_timestamp, Entity};

/// Anything that can produce the full entity list of a category.
///
/// `EntityCache` only depends on this trait, which keeps the network client
/// swappable (and countable in tests).
pub trait CatalogSource: Send + Sync {
    fn fetch_category(&self, category: &str) -> Result<Vec<Entity>>;
}

/// Retry and backoff parameters for a single HTTP request.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
    pub max_retry_after: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &FinderConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_backoff: config.initial_backoff(),
            max_backoff: config.max_backoff(),
            multiplier: config.backoff_multiplier,
            max_retry_after: config.max_retry_after(),
        }
    }

    /// Un-jittered delay before retry number `retry` (1-based).
    pub fn backoff_delay(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(30) as i32;
        let scaled_ms = self.initial_backoff.as_millis() as f64 * self.multiplier.powi(exponent);
        if !scaled_ms.is_finite() || scaled_ms >= self.max_backoff.as_millis() as f64 {
            return self.max_backoff;
        }
        Duration::from_millis(scaled_ms.round() as u64)
    }

    /// Backoff delay with equal jitter: half of the delay is fixed, the other
    /// half is drawn uniformly at random.
    pub fn jittered_delay(&self, retry: u32) -> Duration {
        let delay_ms = self.backoff_delay(retry).as_millis() as u64;
        let half = delay_ms / 2;
        let jitter = rand::rng().random_range(0..=delay_ms - half);
        Duration::from_millis(half + jitter)
    }
}

/// How a single HTTP attempt ended, from the retry loop's point of view.
enum Attempt {
    Done(String),
    Retry { reason: String, hint: Option<Duration> },
}

/// Client for a paginated JSON catalog API (SWAPI layout).
///
/// Owns retry/backoff; never touches shared state. Results are handed back
/// to the caller, normally `EntityCache`.
pub struct CatalogClient {
    transport: Box<dyn HttpTransport>,
    base_url: String,
    retry: RetryPolicy,
    max_pages: u32,
}

impl CatalogClient {
    /// Creates a client using the `ureq` transport configured from `config`.
    pub fn new(config: &FinderConfig) -> Self {
        let transport = UreqTransport::new(config.request_timeout(), &config.user_agent);
        Self::with_transport(config, Box::new(transport))
    }

    /// Creates a client over an arbitrary transport.
    pub fn with_transport(config: &FinderConfig, transport: Box<dyn HttpTransport>) -> Self {
        Self {
            transport,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            retry: RetryPolicy::from_config(config),
            max_pages: config.max_pages,
        }
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// URL of the first page of a category collection.
    pub fn category_url(&self, category: &str) -> String {
        format!("{}/{}/", self.base_url, category)
    }

    /// URL of a single record.
    pub fn entity_url(&self, category: &str, id: &str) -> String {
        format!("{}/{}/{}/", self.base_url, category, id)
    }

    /// Fetches every page of `category` and concatenates the entities in
    /// page order.
    pub fn fetch_category(&self, category: &str) -> Result<Vec<Entity>> {
        let fetched_at = current_timestamp();
        let mut entities = Vec::new();
        let mut seen = HashSet::new();
        let mut next = Some(self.category_url(category));
        let mut pages = 0u32;

        while let Some(url) = next.take() {
            if !seen.insert(url.clone()) {
                return Err(FinderError::Decode {
                    message: "pagination cursor points back to an earlier page".to_string(),
                    url,
                });
            }
            if pages == self.max_pages {
                return Err(FinderError::Decode {
                    message: format!("more than {} pages", self.max_pages),
                    url,
                });
            }

            let body = self.get_with_retry(category, &url)?;
            let page = parse_page(&body, &url)?;
            pages += 1;
            debug!(
                category,
                page = pages,
                records = page.results.len(),
                total = ?page.count,
                "fetched page"
            );

            entities.extend(entities_from_page(&page, category, fetched_at));
            next = page.next.filter(|n| !n.is_empty());
        }

        info!(category, pages, entities = entities.len(), "fetched category");
        Ok(entities)
    }

    /// Looks up one record by id.
    pub fn fetch_entity(&self, category: &str, id: &str) -> Result<Entity> {
        let url = self.entity_url(category, id);
        let body = self.get_with_retry(category, &url)?;
        parse_record(&body, category, &url, current_timestamp())
    }

    /// GETs `url`, retrying transient failures with exponential backoff.
    ///
    /// Transport errors, timeouts (408), 5xx and 429 are retried; any other
    /// non-2xx status is returned at once as `RemoteRejection`. Running out
    /// of retries yields `FetchFailure` for `category`.
    fn get_with_retry(&self, category: &str, url: &str) -> Result<String> {
        let max_attempts = self.retry.max_retries.saturating_add(1);
        let mut attempt = 1u32;

        loop {
            let (reason, hint) = match self.attempt(url)? {
                Attempt::Done(body) => return Ok(body),
                Attempt::Retry { reason, hint } => (reason, hint),
            };

            if attempt >= max_attempts {
                warn!(category, url, attempts = attempt, %reason, "giving up");
                return Err(FinderError::FetchFailure {
                    category: category.to_string(),
                    attempts: attempt,
                    message: reason,
                });
            }

            let delay = match hint {
                Some(hint) => hint.min(self.retry.max_retry_after),
                None => self.retry.jittered_delay(attempt),
            };
            warn!(
                category,
                url,
                attempt,
                %reason,
                "request failed, retrying in {:?}",
                delay
            );
            std::thread::sleep(delay);
            attempt += 1;
        }
    }

    fn attempt(&self, url: &str) -> Result<Attempt> {
        let response = match self.transport.get(url) {
            Ok(response) => response,
            Err(e) if e.is_retriable() => {
                return Ok(Attempt::Retry {
                    reason: e.to_string(),
                    hint: None,
                })
            }
            Err(e) => return Err(e),
        };

        match response.status {
            200..=299 => Ok(Attempt::Done(response.body)),
            429 => Ok(Attempt::Retry {
                reason: "HTTP 429 (rate limited)".to_string(),
                hint: response.retry_after.as_deref().and_then(parse_retry_after),
            }),
            408 | 500..=599 => Ok(Attempt::Retry {
                reason: format!("HTTP {}", response.status),
                hint: None,
            }),
            status => Err(FinderError::RemoteRejection {
                status,
                url: url.to_string(),
            }),
        }
    }
}

impl CatalogSource for CatalogClient {
    fn fetch_category(&self, category: &str) -> Result<Vec<Entity>> {
        CatalogClient::fetch_category(self, category)
    }
}

/// Parses a delta-seconds `Retry-After` value. HTTP-date values are ignored
/// and fall back to the regular backoff.
fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}
