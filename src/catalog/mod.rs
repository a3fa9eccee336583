//! Remote catalog access.
//!
//! Fetches paginated collections and single records over HTTP, retrying
//! transient failures with exponential backoff and jitter.

/// Paginated client and retry policy.
pub mod client;

/// Page and record decoding.
pub mod page;

/// Blocking HTTP transport abstraction.
pub mod transport;

pub use client::{CatalogClient, CatalogSource, RetryPolicy};
pub use transport::{HttpResponse, HttpTransport, UreqTransport};
