use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use holofind::catalog::{HttpResponse, HttpTransport};
use holofind::config::FinderConfig;
use holofind::errors::{FinderError, Result};
use holofind::finder::Finder;
use holofind::types::CacheState;
use serde_json::json;
use tokio_util::sync::CancellationToken;

fn people_page(base: &str, next: Option<String>, people: &[(&str, &str)]) -> String {
    let results: Vec<_> = people
        .iter()
        .map(|(id, name)| {
            json!({
                "name": name,
                "height": "172",
                "films": [format!("{base}/films/1/"), format!("{base}/films/2/")],
                "url": format!("{base}/people/{id}/"),
            })
        })
        .collect();
    json!({ "count": people.len(), "next": next, "results": results }).to_string()
}

fn planets_page(base: &str) -> String {
    json!({
        "count": 2,
        "next": null,
        "results": [
            { "name": "Tatooine", "climate": "arid", "url": format!("{base}/planets/1/") },
            { "name": "Alderaan", "climate": "temperate", "url": format!("{base}/planets/2/") },
        ],
    })
    .to_string()
}

/// Counts requests and answers from a fixed table; unknown URLs get 500.
struct TableTransport {
    base: String,
    requests: Arc<AtomicUsize>,
}

impl HttpTransport for TableTransport {
    fn get(&self, url: &str) -> Result<HttpResponse> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let base = &self.base;
        let response = if url == format!("{base}/people/") {
            HttpResponse::ok(people_page(
                base,
                None,
                &[("1", "Luke Skywalker"), ("4", "Darth Vader")],
            ))
        } else if url == format!("{base}/planets/") {
            HttpResponse::ok(planets_page(base))
        } else {
            HttpResponse::status(500)
        };
        Ok(response)
    }
}

fn table_finder() -> (Finder, Arc<AtomicUsize>) {
    let base = "http://catalog.test/api".to_string();
    let requests = Arc::new(AtomicUsize::new(0));
    let config = FinderConfig {
        base_url: base.clone(),
        initial_backoff_ms: 0,
        max_backoff_ms: 0,
        ..FinderConfig::default()
    };
    let transport = TableTransport {
        base,
        requests: Arc::clone(&requests),
    };
    let finder = Finder::with_transport(config, Box::new(transport)).unwrap();
    (finder, requests)
}

#[test]
fn test_invalid_config_is_rejected() {
    let config = FinderConfig {
        min_score: -1.0,
        ..FinderConfig::default()
    };
    assert!(matches!(
        Finder::new(config),
        Err(FinderError::Config { .. })
    ));
}

#[test]
fn test_search_reports_failed_category() {
    let (finder, requests) = table_finder();

    let resolution = finder.resolve("darth vadr", None, None).unwrap();

    assert_eq!(resolution.matches[0].entity.name, "Darth Vader");
    assert_eq!(resolution.failures.len(), 1);
    assert_eq!(resolution.failures[0].category, "starships");
    // people + planets + four starships attempts
    assert_eq!(requests.load(Ordering::SeqCst), 6);
    assert_eq!(finder.cache_state("people"), CacheState::Ready);
    assert_eq!(finder.cache_state("starships"), CacheState::Empty);
}

#[test]
fn test_single_category_search_fails_outright() {
    let (finder, _) = table_finder();
    let err = finder
        .resolve("millennium falcon", Some("starships"), None)
        .unwrap_err();
    assert_eq!(err.category(), Some("starships"));
}

#[test]
fn test_lookup_uses_cached_category() {
    let (finder, requests) = table_finder();

    assert_eq!(finder.list("people").unwrap().len(), 2);
    let before = requests.load(Ordering::SeqCst);

    let luke = finder.lookup("people", "1").unwrap();
    assert_eq!(luke.name, "Luke Skywalker");
    assert_eq!(luke.attribute("height"), Some("172"));
    assert_eq!(requests.load(Ordering::SeqCst), before);

    finder.invalidate("people");
    assert_eq!(finder.cache_state("people"), CacheState::Stale);
}

#[test]
fn test_repeated_search_hits_cache() {
    let (finder, requests) = table_finder();

    finder.resolve("luke", Some("people"), None).unwrap();
    finder.resolve("leia", Some("people"), None).unwrap();

    assert_eq!(requests.load(Ordering::SeqCst), 1);
    let stats = finder.cache_stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.fetches, 1);
    finder.close();
}

#[test]
fn test_superseded_search_is_cancelled() {
    let (finder, _) = table_finder();
    let token = CancellationToken::new();
    token.cancel();
    assert_eq!(
        finder.resolve_cancellable("luke", None, None, &token),
        Err(FinderError::Cancelled)
    );
}

/// Minimal HTTP/1.1 server answering one request per connection.
fn spawn_server<F>(listener: TcpListener, handler: F)
where
    F: Fn(&str) -> (u16, String) + Send + 'static,
{
    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { continue };
            let Ok(reader_stream) = stream.try_clone() else {
                continue;
            };
            let mut reader = BufReader::new(reader_stream);
            let mut request_line = String::new();
            if reader.read_line(&mut request_line).is_err() {
                continue;
            }
            loop {
                let mut header = String::new();
                match reader.read_line(&mut header) {
                    Ok(0) | Err(_) => break,
                    Ok(_) if header == "\r\n" => break,
                    Ok(_) => {}
                }
            }

            let path = request_line
                .split_whitespace()
                .nth(1)
                .unwrap_or("/")
                .to_string();
            let (status, body) = handler(&path);
            let reason = match status {
                200 => "OK",
                404 => "Not Found",
                503 => "Service Unavailable",
                _ => "Internal Server Error",
            };
            let response = format!(
                "HTTP/1.1 {status} {reason}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            let _ = stream.write_all(response.as_bytes());
            let _ = stream.flush();
        }
    });
}

#[test]
fn test_fetches_over_http() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let base = format!("http://{}/api", listener.local_addr().unwrap());
    let hits: Arc<Mutex<HashMap<String, usize>>> = Arc::default();

    {
        let base = base.clone();
        let hits = Arc::clone(&hits);
        spawn_server(listener, move |path| {
            let count = {
                let mut hits = hits.lock().unwrap();
                let count = hits.entry(path.to_string()).or_insert(0);
                *count += 1;
                *count
            };
            match path {
                "/api/people/" => (
                    200,
                    people_page(
                        &base,
                        Some(format!("{base}/people/?page=2")),
                        &[("1", "Luke Skywalker")],
                    ),
                ),
                "/api/people/?page=2" => {
                    (200, people_page(&base, None, &[("5", "Leia Organa")]))
                }
                // The first planets request hits a busy server.
                "/api/planets/" if count == 1 => (503, String::new()),
                "/api/planets/" => (200, planets_page(&base)),
                "/api/people/5/" => (
                    200,
                    json!({ "name": "Leia Organa", "url": format!("{base}/people/5/") })
                        .to_string(),
                ),
                _ => (404, json!({ "detail": "Not found" }).to_string()),
            }
        });
    }

    let config = FinderConfig {
        base_url: format!("{base}/"),
        initial_backoff_ms: 0,
        max_backoff_ms: 0,
        categories: vec!["people".to_string(), "planets".to_string()],
        ..FinderConfig::default()
    };
    let finder = Finder::new(config).unwrap();

    let resolution = finder.resolve("leia organa", None, None).unwrap();
    assert!(resolution.is_complete());
    assert_eq!(resolution.matches[0].entity.id, "5");
    assert_eq!(
        resolution.matches[0].entity.attribute("films"),
        Some(format!("{base}/films/1/, {base}/films/2/").as_str())
    );

    let tatooine = finder.resolve("tatooine", Some("planets"), None).unwrap();
    assert_eq!(tatooine.matches[0].entity.name, "Tatooine");
    assert_eq!(hits.lock().unwrap()["/api/planets/"], 2);

    finder.invalidate("people");
    let leia = finder.lookup("people", "5").unwrap();
    assert_eq!(leia.name, "Leia Organa");
    assert_eq!(hits.lock().unwrap()["/api/people/5/"], 1);

    let err = finder.lookup("people", "9999").unwrap_err();
    assert!(matches!(err, FinderError::RemoteRejection { status: 404, .. }));
}
