//! Wire format of catalog pages and conversion into [`Entity`] values.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::warn;

use crate::errors::{FinderError, Result};
use crate::types::Entity;

/// One page of a paginated collection.
#[derive(Debug, Clone, Deserialize)]
pub struct Page {
    #[serde(default)]
    pub count: Option<u64>,
    /// Absolute URL of the next page, `null` on the last one.
    #[serde(default)]
    pub next: Option<String>,
    #[serde(default)]
    pub results: Vec<Map<String, Value>>,
}

/// Parses a collection page body.
pub fn parse_page(body: &str, url: &str) -> Result<Page> {
    serde_json::from_str(body).map_err(|e| FinderError::Decode {
        message: format!("invalid page: {e}"),
        url: url.to_string(),
    })
}

/// Parses a single-record body into an entity.
pub fn parse_record(body: &str, category: &str, url: &str, fetched_at: u64) -> Result<Entity> {
    let record: Map<String, Value> = serde_json::from_str(body).map_err(|e| FinderError::Decode {
        message: format!("invalid record: {e}"),
        url: url.to_string(),
    })?;
    // Some mirrors wrap single records as `{ "result": { "properties": {...} } }`.
    let properties = match record.get("result").and_then(|r| r.get("properties")) {
        Some(Value::Object(props)) => Some(props.clone()),
        _ => None,
    };
    let record = properties.unwrap_or(record);
    entity_from_record(&record, category, fetched_at)
        .or_else(|| {
            // Fall back to the id in the requested URL when the body has none.
            let id = id_from_url(url)?;
            let mut record = record.clone();
            record.insert("id".to_string(), Value::String(id));
            entity_from_record(&record, category, fetched_at)
        })
        .ok_or_else(|| FinderError::Decode {
            message: "record has no usable name".to_string(),
            url: url.to_string(),
        })
}

/// Converts every usable record of a page, skipping (and logging) the rest.
pub fn entities_from_page(page: &Page, category: &str, fetched_at: u64) -> Vec<Entity> {
    page.results
        .iter()
        .filter_map(|record| {
            let entity = entity_from_record(record, category, fetched_at);
            if entity.is_none() {
                warn!(category, "skipping record without id or name");
            }
            entity
        })
        .collect()
}

/// Builds an entity from a raw JSON record.
///
/// The id is the last path segment of `url`, falling back to `uid` and `id`;
/// the name falls back to `title`. Returns `None` when either is missing.
pub fn entity_from_record(
    record: &Map<String, Value>,
    category: &str,
    fetched_at: u64,
) -> Option<Entity> {
    let id = record
        .get("url")
        .and_then(Value::as_str)
        .and_then(id_from_url)
        .or_else(|| record.get("uid").and_then(scalar_to_string))
        .or_else(|| record.get("id").and_then(scalar_to_string))?;

    let name = record
        .get("name")
        .or_else(|| record.get("title"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|n| !n.is_empty())?
        .to_string();

    let mut attributes = BTreeMap::new();
    for (key, value) in record {
        if key == "name" {
            continue;
        }
        if let Some(text) = attribute_text(value) {
            attributes.insert(key.clone(), text);
        }
    }

    Some(Entity {
        id,
        category: category.to_string(),
        name,
        attributes,
        fetched_at,
    })
}

/// Extracts the trailing path segment of a resource URL
/// (`https://swapi.dev/api/people/1/` → `1`).
pub fn id_from_url(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty() && !segment.contains(':'))
        .map(str::to_string)
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn attribute_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(attribute_text)
                .collect::<Vec<_>>()
                .join(", "),
        ),
        Value::Object(_) => Some(value.to_string()),
    }
}
