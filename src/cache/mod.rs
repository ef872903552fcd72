//! Response caching with pluggable storage backends.
//!
//! # Architecture
//!
//! - [`CacheStore`] - Async trait every backend implements (`get` / `set`)
//! - [`MemoryCache`] - In-process map, lifetime bound to the owner
//! - [`FileCache`] - One file per key in a directory
//! - [`SqliteCache`] - One row per key in an SQLite database
//! - [`cache_key`] - Deterministic key derivation (GET only)
//!
//! Backends report "not found" as `Ok(None)`, including for corrupt or stale
//! entries. `Err` is reserved for storage failures, which the request pipeline
//! logs and treats as a miss.

mod file;
mod memory;
mod sqlite;

use std::fmt::Debug;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use reqwest::header::{HeaderValue, LAST_MODIFIED, USER_AGENT};
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::response::Response;
use crate::transport::{Transport, TransportRequest};
use crate::user_agent::default_user_agent;

pub use file::{FileCache, clean_key};
pub use memory::MemoryCache;
pub use sqlite::SqliteCache;

/// Key→response storage.
#[async_trait]
pub trait CacheStore: Send + Sync + Debug {
    /// Returns the cached response for `key`, or `None` when absent, corrupt
    /// or stale.
    async fn get(&self, key: &str) -> Result<Option<Response>, CacheError>;

    /// Stores a copy of `response` under `key`, replacing any previous entry.
    async fn set(&self, key: &str, response: &Response) -> Result<(), CacheError>;
}

/// Storage failures from a cache backend.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Filesystem error in the file cache.
    #[error("cache I/O error at {path}: {source}")]
    Io {
        /// Path of the cache file or directory.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// SQLite error in the database cache.
    #[error("cache database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Header serialization failure in the database cache.
    #[error("cache entry serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CacheError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Derives the cache key for a request.
///
/// Only GET requests are cacheable; every other method yields `None`. The key
/// is the URL with its query parameters sorted by (name, value), so two
/// requests differing only in parameter order share an entry.
///
/// ```
/// use reqwest::Method;
/// use scrapelib::cache::cache_key;
/// use url::Url;
///
/// let a = Url::parse("http://example.com/a?y=2&x=1").unwrap();
/// let b = Url::parse("http://example.com/a?x=1&y=2").unwrap();
/// assert_eq!(cache_key(&Method::GET, &a), cache_key(&Method::GET, &b));
/// assert_eq!(cache_key(&Method::POST, &a), None);
/// ```
#[must_use]
pub fn cache_key(method: &Method, url: &Url) -> Option<String> {
    (*method == Method::GET).then(|| normalize_url(url).to_string())
}

/// Rewrites a URL with its query parameters in lexicographic order and
/// without a fragment.
#[must_use]
pub fn normalize_url(url: &Url) -> Url {
    let mut normalized = url.clone();
    normalized.set_fragment(None);

    let mut pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
    if pairs.is_empty() {
        normalized.set_query(None);
        return normalized;
    }
    pairs.sort();
    normalized
        .query_pairs_mut()
        .clear()
        .extend_pairs(pairs.iter());
    normalized
}

/// Whether a response may be written to the cache.
#[must_use]
pub fn should_cache_response(response: &Response) -> bool {
    response.status() == 200
}

/// Default timeout for the `Last-Modified` validation request.
pub const DEFAULT_VALIDATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Revalidates cache hits with a HEAD request, comparing the server's
/// `Last-Modified` header with the cached value.
#[derive(Debug, Clone)]
pub struct LastModifiedCheck {
    transport: Arc<dyn Transport>,
    user_agent: String,
    timeout: Option<Duration>,
}

impl LastModifiedCheck {
    /// Uses the default user agent and [`DEFAULT_VALIDATION_TIMEOUT`].
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            user_agent: default_user_agent(),
            timeout: Some(DEFAULT_VALIDATION_TIMEOUT),
        }
    }

    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// `None` leaves the transport's own default in place.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Any failure, or a missing header on either side, counts as stale.
    pub(crate) async fn is_fresh(&self, url: &str, cached: Option<&str>) -> bool {
        let Some(cached) = cached else {
            debug!(url, "cached entry has no last-modified, treating as stale");
            return false;
        };
        let mut request = TransportRequest::new(Method::HEAD, url);
        request.timeout = self.timeout;
        match HeaderValue::from_str(&self.user_agent) {
            Ok(value) => {
                request.headers.insert(USER_AGENT, value);
            }
            Err(_) => debug!(user_agent = %self.user_agent, "invalid user agent, sending none"),
        }
        match self.transport.send(&request).await {
            Ok(head) => {
                let current = head.headers().get(LAST_MODIFIED).and_then(|v| v.to_str().ok());
                let fresh = current == Some(cached);
                if !fresh {
                    debug!(url, ?current, cached, "last-modified changed, treating as stale");
                }
                fresh
            }
            Err(e) => {
                debug!(url, error = %e, "last-modified check failed, treating as stale");
                false
            }
        }
    }
}
