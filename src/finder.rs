use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::cache::EntityCache;
use crate::catalog::{CatalogClient, CatalogSource, HttpTransport};
use crate::config::FinderConfig;
use crate::errors::Result;
use crate::pipeline::ResolutionPipeline;
use crate::types::*;

/// One client session: owns the configuration, the catalog client, the
/// entity cache and the resolution pipeline built on top of them.
///
/// The cache lives exactly as long as the session; dropping the `Finder`
/// (or calling [`Finder::close`]) discards every cached category.
pub struct Finder {
    config: FinderConfig,
    client: Arc<CatalogClient>,
    pipeline: ResolutionPipeline,
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

impl Finder {
    /// Opens a session against the configured catalog over HTTP.
    pub fn new(config: FinderConfig) -> Result<Self> {
        config.validate()?;
        let client = CatalogClient::new(&config);
        Ok(Self::assemble(config, client))
    }

    /// Opens a session over a custom transport.
    pub fn with_transport(config: FinderConfig, transport: Box<dyn HttpTransport>) -> Result<Self> {
        config.validate()?;
        let client = CatalogClient::with_transport(&config, transport);
        Ok(Self::assemble(config, client))
    }

    fn assemble(config: FinderConfig, client: CatalogClient) -> Self {
        let client = Arc::new(client);
        let source: Arc<dyn CatalogSource> = client.clone();
        let cache = EntityCache::new(source, config.cache_ttl());
        let pipeline = ResolutionPipeline::from_config(cache, &config);
        debug!(base_url = %config.base_url, categories = ?config.categories, "finder session opened");
        Self {
            config,
            client,
            pipeline,
        }
    }

    /// Ends the session, logging cache usage. Equivalent to dropping it.
    pub fn close(self) {
        let stats = self.cache_stats();
        info!(
            hits = stats.hits,
            misses = stats.misses,
            fetches = stats.fetches,
            failures = stats.failures,
            "finder session closed"
        );
    }
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

impl Finder {
    /// Resolves a raw query; see [`ResolutionPipeline::resolve`].
    pub fn resolve(
        &self,
        raw_query: &str,
        category: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Resolution> {
        self.pipeline.resolve(raw_query, category, limit)
    }

    /// Resolves a raw query that a newer one may supersede.
    pub fn resolve_cancellable(
        &self,
        raw_query: &str,
        category: Option<&str>,
        limit: Option<usize>,
        cancel: &CancellationToken,
    ) -> Result<Resolution> {
        self.pipeline
            .resolve_cancellable(raw_query, category, limit, cancel)
    }

    /// Looks up one entity by id, answering from the cache when the category
    /// is already fresh there.
    pub fn lookup(&self, category: &str, id: &str) -> Result<Entity> {
        if let Some(entities) = self.pipeline.cache().peek(category) {
            if let Some(entity) = entities.iter().find(|e| e.id == id) {
                debug!(category, id, "lookup served from cache");
                return Ok(entity.clone());
            }
        }
        self.client.fetch_entity(category, id)
    }

    /// Lists every entity of a category.
    pub fn list(&self, category: &str) -> Result<Vec<Entity>> {
        self.pipeline.list(category)
    }

    /// Categories searched when a query names none.
    pub fn categories(&self) -> &[String] {
        self.pipeline.categories()
    }

    /// Forces a category to be re-fetched on next access.
    pub fn invalidate(&self, category: &str) {
        self.pipeline.cache().invalidate(category);
    }

    pub fn cache_state(&self, category: &str) -> CacheState {
        self.pipeline.cache().state(category)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.pipeline.cache().stats()
    }

    pub fn config(&self) -> &FinderConfig {
        &self.config
    }
}
