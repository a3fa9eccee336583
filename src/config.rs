use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{FinderError, Result};

/// Name of the configuration file inside the holofind config directory.
pub const CONFIG_FILENAME: &str = "config.toml";

/// Name of the directory (under the platform config dir) holding holofind files.
pub const HOLOFIND_DIR: &str = "holofind";

/// Public SWAPI mirror used when nothing else is configured.
pub const DEFAULT_BASE_URL: &str = "https://swapi.dev/api/";

/// Configuration for a finder session.
///
/// Every option has a default, so a partial (or missing) file is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FinderConfig {
    /// Root of the catalog API; categories are resolved relative to it.
    pub base_url: String,
    /// Timeout applied to every single HTTP request.
    pub request_timeout_secs: u64,
    /// Retries after the first attempt of a request.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_backoff_ms: u64,
    /// Upper bound for the exponential backoff delay.
    pub max_backoff_ms: u64,
    /// Growth factor of the backoff delay between retries.
    pub backoff_multiplier: f64,
    /// Upper bound for a server-provided `Retry-After` hint.
    pub max_retry_after_secs: u64,
    /// Maximum number of pages followed for one category.
    pub max_pages: u32,
    /// User agent sent with every request.
    pub user_agent: String,
    /// How long a fetched category stays fresh.
    pub cache_ttl_secs: u64,
    /// Minimum similarity score for a candidate to be returned.
    pub min_score: f64,
    /// Default cap on returned matches; `None` means unbounded.
    pub result_limit: Option<usize>,
    /// Categories searched when a query does not name one.
    pub categories: Vec<String>,
}

impl Default for FinderConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout_secs: 10,
            max_retries: 3,
            initial_backoff_ms: 250,
            max_backoff_ms: 8_000,
            backoff_multiplier: 2.0,
            max_retry_after_secs: 60,
            max_pages: 100,
            user_agent: format!("holofind/{}", env!("CARGO_PKG_VERSION")),
            cache_ttl_secs: 600,
            min_score: 0.3,
            result_limit: None,
            categories: vec![
                "people".to_string(),
                "planets".to_string(),
                "starships".to_string(),
            ],
        }
    }
}

impl FinderConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn max_retry_after(&self) -> Duration {
        Duration::from_secs(self.max_retry_after_secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Checks option values that serde alone cannot reject.
    pub fn validate(&self) -> Result<()> {
        let invalid = |message: &str| {
            Err(FinderError::Config {
                message: message.to_string(),
            })
        };

        if self.base_url.trim().is_empty() {
            return invalid("base_url must not be empty");
        }
        if self.categories.is_empty() {
            return invalid("at least one category must be configured");
        }
        if self.categories.iter().any(|c| c.trim().is_empty()) {
            return invalid("category names must not be blank");
        }
        if !(0.0..=1.0).contains(&self.min_score) {
            return invalid("min_score must be within [0, 1]");
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return invalid("backoff_multiplier must be at least 1.0");
        }
        if self.request_timeout_secs == 0 {
            return invalid("request_timeout_secs must be greater than zero");
        }
        if self.max_pages == 0 {
            return invalid("max_pages must be greater than zero");
        }
        Ok(())
    }
}

/// Returns the holofind directory under the platform configuration directory.
pub fn get_holofind_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(HOLOFIND_DIR))
}

/// Returns the default configuration file path, if the platform has a config directory.
pub fn default_config_path() -> Option<PathBuf> {
    get_holofind_dir().map(|dir| dir.join(CONFIG_FILENAME))
}

/// Loads the configuration from `config_path`.
///
/// A missing file yields the default configuration. The loaded value is
/// validated before being returned.
pub fn load_config(config_path: &Path) -> Result<FinderConfig> {
    if !config_path.exists() {
        return Ok(FinderConfig::default());
    }

    let contents = fs::read_to_string(config_path).map_err(|e| FinderError::Config {
        message: format!(
            "failed to read config file '{}': {}",
            config_path.display(),
            e
        ),
    })?;

    let config: FinderConfig = toml::from_str(&contents).map_err(|e| FinderError::Config {
        message: format!(
            "failed to parse config file '{}': {}",
            config_path.display(),
            e
        ),
    })?;

    config.validate()?;
    Ok(config)
}

/// Saves the configuration using an atomic write.
///
/// Writes to a temporary file next to the target and renames it into place,
/// so a partial write never corrupts an existing configuration.
pub fn save_config(config_path: &Path, config: &FinderConfig) -> Result<()> {
    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent).map_err(|e| FinderError::Config {
            message: format!(
                "failed to create config directory '{}': {}",
                parent.display(),
                e
            ),
        })?;
    }

    let tmp_path = config_path.with_extension("tmp");

    let text = toml::to_string_pretty(config).map_err(|e| FinderError::Config {
        message: format!("failed to serialize config: {}", e),
    })?;

    fs::write(&tmp_path, &text).map_err(|e| FinderError::Config {
        message: format!(
            "failed to write temporary config file '{}': {}",
            tmp_path.display(),
            e
        ),
    })?;

    fs::rename(&tmp_path, config_path).map_err(|e| FinderError::Config {
        message: format!(
            "failed to rename temporary config file '{}' to '{}': {}",
            tmp_path.display(),
            config_path.display(),
            e
        ),
    })?;

    Ok(())
}
