//! Scraper configuration.
//!
//! [`ScraperConfig`] can be built in code or deserialized from JSON; every
//! field has a default, so `{}` is a valid config file.
//!
//! ```
//! use scrapelib::ScraperConfig;
//!
//! let config = ScraperConfig::from_json_str(r#"{"requests_per_minute": 30, "retry_attempts": 2}"#)
//!     .unwrap();
//! assert_eq!(config.requests_per_minute, 30.0);
//! assert_eq!(config.retry_policy().max_tries(), 3);
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::pipeline::{DEFAULT_REQUESTS_PER_MINUTE, RetryPolicy};
use crate::user_agent::default_user_agent;

/// Default base wait between retries, in seconds.
pub const DEFAULT_RETRY_WAIT_SECONDS: f64 = 5.0;

/// Errors loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Settings for a [`Scraper`](crate::Scraper).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScraperConfig {
    /// Value of the `User-Agent` header, also used for robots.txt matching.
    pub user_agent: String,
    /// Headers sent with every request.
    pub headers: HashMap<String, String>,
    /// Throttle rate; `0` disables throttling.
    pub requests_per_minute: f64,
    /// Check robots.txt before every http/https request.
    pub follow_robots: bool,
    /// Turn final statuses of 400 and above into errors.
    pub raise_errors: bool,
    /// Per-try timeout in seconds; `None` or `0` means no timeout.
    pub timeout_secs: Option<f64>,
    /// Retries after the first try. Negative values count as zero.
    pub retry_attempts: i32,
    /// Backoff base in seconds (doubles after each retry).
    pub retry_wait_seconds: f64,
    /// Write responses to the cache but never read them back.
    pub cache_write_only: bool,
    /// Ask servers for uncompressed bodies (`Accept-Encoding: text/*`).
    pub disable_compression: bool,
    /// Follow HTTP redirects in the default transport.
    pub follow_redirects: bool,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            headers: HashMap::new(),
            requests_per_minute: DEFAULT_REQUESTS_PER_MINUTE,
            follow_robots: true,
            raise_errors: true,
            timeout_secs: None,
            retry_attempts: 0,
            retry_wait_seconds: DEFAULT_RETRY_WAIT_SECONDS,
            cache_write_only: false,
            disable_compression: false,
            follow_redirects: true,
        }
    }
}

impl ScraperConfig {
    /// Parses and validates a JSON config.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Parse` for malformed JSON and
    /// `ConfigError::Invalid` for out-of-range values.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON config file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Io` if the file cannot be read, otherwise as
    /// [`ScraperConfig::from_json_str`].
    #[instrument(skip(path), fields(path = %path.as_ref().display()))]
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        let config = Self::from_json_str(&json)?;
        debug!("loaded scraper config");
        Ok(config)
    }

    /// Rejects negative or non-finite rates, waits and timeouts.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` naming the first bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.requests_per_minute.is_finite() || self.requests_per_minute < 0.0 {
            return Err(ConfigError::invalid(
                "requests_per_minute",
                format!("must be a non-negative number, got {}", self.requests_per_minute),
            ));
        }
        if !self.retry_wait_seconds.is_finite() || self.retry_wait_seconds < 0.0 {
            return Err(ConfigError::invalid(
                "retry_wait_seconds",
                format!("must be a non-negative number, got {}", self.retry_wait_seconds),
            ));
        }
        if let Some(timeout) = self.timeout_secs
            && (!timeout.is_finite() || timeout < 0.0)
        {
            return Err(ConfigError::invalid(
                "timeout_secs",
                format!("must be a non-negative number, got {timeout}"),
            ));
        }
        Ok(())
    }

    /// Per-try timeout, `None` when unset, zero or too large for a `Duration`.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs
            .filter(|secs| *secs > 0.0)
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
    }

    /// Retry attempts clamped to zero or more.
    #[must_use]
    pub fn retry_attempts(&self) -> u32 {
        u32::try_from(self.retry_attempts.max(0)).unwrap_or_default()
    }

    /// Backoff base; invalid values fall back to zero.
    #[must_use]
    pub fn retry_wait(&self) -> Duration {
        Duration::try_from_secs_f64(self.retry_wait_seconds).unwrap_or_default()
    }

    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_attempts(), self.retry_wait())
    }
}
