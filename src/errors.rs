use thiserror::Error;

/// Errors that can occur while resolving catalog entities.
///
/// The type is `Clone` so that a single coalesced fetch can hand the same
/// failure to every caller that was waiting on it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FinderError {
    /// Transient transport failure (timeout, reset, refused connection).
    #[error("network error: {message} (url: {url})")]
    NetworkFailure { message: String, url: String },

    /// The catalog answered with a client error that retrying will not fix.
    #[error("request rejected with HTTP {status} (url: {url})")]
    RemoteRejection { status: u16, url: String },

    /// Terminal failure for a category after the retry budget was spent.
    #[error("failed to fetch '{category}' after {attempts} attempt(s): {message}")]
    FetchFailure {
        category: String,
        attempts: u32,
        message: String,
    },

    #[error("decode error: {message} (url: {url})")]
    Decode { message: String, url: String },

    #[error("config error: {message}")]
    Config { message: String },

    /// The caller abandoned the request because a newer one superseded it.
    #[error("resolution cancelled")]
    Cancelled,
}

impl FinderError {
    /// Returns the category a fetch failure refers to, if any.
    pub fn category(&self) -> Option<&str> {
        match self {
            FinderError::FetchFailure { category, .. } => Some(category.as_str()),
            _ => None,
        }
    }

    /// Whether the retry loop should try the request again.
    pub fn is_retriable(&self) -> bool {
        matches!(self, FinderError::NetworkFailure { .. })
    }
}

/// Convenience alias for results using `FinderError`.
pub type Result<T> = std::result::Result<T, FinderError>;
