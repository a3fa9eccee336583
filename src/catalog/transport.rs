//! HTTP transport used by the catalog client.
//!
//! The client only needs "GET this URL and tell me the status, the
//! `Retry-After` hint and the body", so the transport is a narrow trait.
//! Status codes are never turned into errors here; retry classification
//! lives in the client.

use std::time::Duration;

use ureq::Agent;

use crate::errors::{FinderError, Result};

/// A fully-read HTTP response.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    /// Raw value of the `Retry-After` header, when present.
    pub retry_after: Option<String>,
    pub body: String,
}

impl HttpResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            retry_after: None,
            body: body.into(),
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            retry_after: None,
            body: String::new(),
        }
    }
}

/// Performs blocking GET requests.
///
/// Implementations return `FinderError::NetworkFailure` for transport-level
/// failures (timeouts, refused connections) and an `HttpResponse` for
/// anything the server actually answered, whatever the status.
pub trait HttpTransport: Send + Sync {
    fn get(&self, url: &str) -> Result<HttpResponse>;
}

/// Production transport backed by a `ureq` agent.
pub struct UreqTransport {
    agent: Agent,
}

impl UreqTransport {
    /// Creates a transport whose requests time out after `timeout` and carry `user_agent`.
    pub fn new(timeout: Duration, user_agent: &str) -> Self {
        let config = Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .user_agent(user_agent)
            .build();
        Self {
            agent: Agent::new_with_config(config),
        }
    }
}

impl HttpTransport for UreqTransport {
    fn get(&self, url: &str) -> Result<HttpResponse> {
        let network_failure = |e: ureq::Error| FinderError::NetworkFailure {
            message: e.to_string(),
            url: url.to_string(),
        };

        let mut response = self
            .agent
            .get(url)
            .header("Accept", "application/json")
            .call()
            .map_err(network_failure)?;

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim().to_string());
        let body = response
            .body_mut()
            .read_to_string()
            .map_err(network_failure)?;

        Ok(HttpResponse {
            status,
            retry_after,
            body,
        })
    }
}
