use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use holofind::cache::EntityCache;
use holofind::catalog::CatalogSource;
use holofind::errors::{FinderError, Result};
use holofind::pipeline::ResolutionPipeline;
use holofind::search::{SimilarityRanker, DEFAULT_MIN_SCORE};
use holofind::types::Entity;
use tokio_util::sync::CancellationToken;

fn entity(category: &str, id: &str, name: &str) -> Entity {
    Entity {
        id: id.to_string(),
        category: category.to_string(),
        name: name.to_string(),
        attributes: BTreeMap::new(),
        fetched_at: 0,
    }
}

/// In-memory catalog. Categories not listed fail like an exhausted client.
struct FakeCatalog {
    data: HashMap<String, Vec<Entity>>,
    rejected: HashMap<String, u16>,
    calls: AtomicUsize,
}

impl FakeCatalog {
    fn new() -> Self {
        let mut data = HashMap::new();
        data.insert(
            "people".to_string(),
            vec![
                entity("people", "1", "Luke Skywalker"),
                entity("people", "2", "C-3PO"),
                entity("people", "3", "R2-D2"),
                entity("people", "4", "Darth Vader"),
                entity("people", "5", "Leia Organa"),
                entity("people", "6", "Owen Lars"),
                entity("people", "10", "Obi-Wan Kenobi"),
                entity("people", "11", "Anakin Skywalker"),
            ],
        );
        data.insert(
            "planets".to_string(),
            vec![
                entity("planets", "1", "Tatooine"),
                entity("planets", "2", "Alderaan"),
                entity("planets", "8", "Naboo"),
            ],
        );
        Self {
            data,
            rejected: HashMap::new(),
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl CatalogSource for FakeCatalog {
    fn fetch_category(&self, category: &str) -> Result<Vec<Entity>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(status) = self.rejected.get(category) {
            return Err(FinderError::RemoteRejection {
                status: *status,
                url: format!("http://catalog.test/api/{category}/"),
            });
        }
        self.data
            .get(category)
            .cloned()
            .ok_or_else(|| FinderError::FetchFailure {
                category: category.to_string(),
                attempts: 4,
                message: "HTTP 500".to_string(),
            })
    }
}

fn categories() -> Vec<String> {
    vec![
        "people".to_string(),
        "planets".to_string(),
        "starships".to_string(),
    ]
}

fn pipeline_over(catalog: &Arc<FakeCatalog>) -> ResolutionPipeline {
    let source: Arc<dyn CatalogSource> = catalog.clone();
    let cache = EntityCache::new(source, Duration::from_secs(600));
    ResolutionPipeline::new(cache, SimilarityRanker::default(), categories())
}

#[test]
fn test_misspelled_query_resolves_to_best_match() {
    let catalog = Arc::new(FakeCatalog::new());
    let pipeline = pipeline_over(&catalog);

    let resolution = pipeline
        .resolve("Luke Skwalker", Some("people"), None)
        .unwrap();

    assert_eq!(resolution.query.normalized, "luke skwalker");
    let top = &resolution.matches[0];
    assert_eq!(top.entity.name, "Luke Skywalker");
    assert!(top.score >= DEFAULT_MIN_SCORE);
    assert!(resolution.is_complete());
}

#[test]
fn test_blank_query_skips_the_network() {
    let catalog = Arc::new(FakeCatalog::new());
    let pipeline = pipeline_over(&catalog);

    let resolution = pipeline.resolve("   ", None, None).unwrap();

    assert!(resolution.matches.is_empty());
    assert!(resolution.failures.is_empty());
    assert_eq!(catalog.calls(), 0);
}

#[test]
fn test_single_category_failure_fails_the_call() {
    let catalog = Arc::new(FakeCatalog::new());
    let pipeline = pipeline_over(&catalog);

    let err = pipeline
        .resolve("millennium falcon", Some("starships"), None)
        .unwrap_err();

    assert_eq!(err.category(), Some("starships"));
    assert!(matches!(err, FinderError::FetchFailure { attempts: 4, .. }));
}

#[test]
fn test_all_categories_tolerate_partial_failure() {
    let catalog = Arc::new(FakeCatalog::new());
    let pipeline = pipeline_over(&catalog);

    let resolution = pipeline.resolve("tatooine", None, None).unwrap();

    assert_eq!(resolution.matches[0].entity.name, "Tatooine");
    assert_eq!(resolution.matches[0].entity.category, "planets");
    assert!(!resolution.is_complete());
    assert_eq!(resolution.failures.len(), 1);
    assert_eq!(resolution.failures[0].category, "starships");
    assert_eq!(resolution.failures[0].error.category(), Some("starships"));
}

#[test]
fn test_rejection_is_reported_as_fetch_failure() {
    let mut catalog = FakeCatalog::new();
    catalog.rejected.insert("vehicles".to_string(), 404);
    let catalog = Arc::new(catalog);
    let pipeline = pipeline_over(&catalog);

    let err = pipeline.resolve("speeder", Some("vehicles"), None).unwrap_err();

    match err {
        FinderError::FetchFailure {
            category, message, ..
        } => {
            assert_eq!(category, "vehicles");
            assert!(message.contains("404"));
        }
        other => panic!("expected FetchFailure, got {:?}", other),
    }
}

#[test]
fn test_results_are_sorted_and_stable() {
    let catalog = Arc::new(FakeCatalog::new());
    let pipeline = pipeline_over(&catalog);

    let first = pipeline.resolve("skywalker", None, None).unwrap();
    let second = pipeline.resolve("skywalker", None, None).unwrap();

    assert_eq!(first.matches, second.matches);
    for pair in first.matches.windows(2) {
        assert!(pair[0].ranking_cmp(&pair[1]).is_le());
    }
    // people and planets are cached after the first call; the failed
    // starships fetch is attempted again.
    assert_eq!(catalog.calls(), 3 + 1);
}

#[test]
fn test_limit_truncates_results() {
    let catalog = Arc::new(FakeCatalog::new());
    let source: Arc<dyn CatalogSource> = catalog.clone();
    let cache = EntityCache::new(source, Duration::from_secs(600));
    let pipeline = ResolutionPipeline::new(cache, SimilarityRanker::new(0.0), categories());

    let all = pipeline.resolve("a", Some("people"), None).unwrap();
    let limited = pipeline.resolve("a", Some("people"), Some(2)).unwrap();

    assert!(all.matches.len() > 2);
    assert_eq!(limited.matches.len(), 2);
    assert_eq!(limited.matches[..], all.matches[..2]);
}

#[test]
fn test_default_limit_applies_without_explicit_limit() {
    let catalog = Arc::new(FakeCatalog::new());
    let source: Arc<dyn CatalogSource> = catalog.clone();
    let cache = EntityCache::new(source, Duration::from_secs(600));
    let pipeline = ResolutionPipeline::new(cache, SimilarityRanker::new(0.0), categories())
        .with_default_limit(Some(1));

    assert_eq!(
        pipeline.resolve("a", Some("people"), None).unwrap().matches.len(),
        1
    );
    assert_eq!(
        pipeline.resolve("a", Some("people"), Some(3)).unwrap().matches.len(),
        3
    );
}

#[test]
fn test_cancelled_resolution_returns_no_result() {
    let catalog = Arc::new(FakeCatalog::new());
    let pipeline = pipeline_over(&catalog);
    let token = CancellationToken::new();
    token.cancel();

    let single = pipeline.resolve_cancellable("luke", Some("people"), None, &token);
    let all = pipeline.resolve_cancellable("luke", None, None, &token);

    assert_eq!(single, Err(FinderError::Cancelled));
    assert_eq!(all, Err(FinderError::Cancelled));
    assert_eq!(catalog.calls(), 0);
}

#[test]
fn test_list_keeps_server_order() {
    let catalog = Arc::new(FakeCatalog::new());
    let pipeline = pipeline_over(&catalog);

    let planets = pipeline.list("planets").unwrap();
    let names: Vec<&str> = planets.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["Tatooine", "Alderaan", "Naboo"]);

    assert!(matches!(
        pipeline.list("starships"),
        Err(FinderError::FetchFailure { .. })
    ));
}
