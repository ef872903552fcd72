//! High-level scraping client.
//!
//! [`Scraper`] owns a [`ScraperConfig`] and a [`RequestPipeline`] built from
//! it, and exposes the usual verbs (`get`, `post`, `head`, `request`) plus
//! [`Scraper::retrieve`] for saving a body to disk.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use reqwest::Method;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::cache::CacheStore;
use crate::config::{ConfigError, ScraperConfig};
use crate::headers::{HeaderLayers, HeaderSource, header_map_from_pairs};
use crate::pipeline::{RequestOptions, RequestPipeline, ScrapeError, parse_method};
use crate::response::Response;
use crate::stats::{ScraperStats, StatsSnapshot};
use crate::transport::{FtpFetcher, HttpTransport, Transport};

/// Prefix of temporary files created by [`Scraper::retrieve`].
const TEMPFILE_PREFIX: &str = "scrapelib-";

/// Errors constructing a [`Scraper`].
#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Builder for [`Scraper`].
#[derive(Debug, Default)]
pub struct ScraperBuilder {
    config: ScraperConfig,
    transport: Option<Arc<dyn Transport>>,
    ftp: Option<Arc<dyn FtpFetcher>>,
    cache: Option<Arc<dyn CacheStore>>,
    header_source: Option<HeaderSource>,
}

impl ScraperBuilder {
    /// Replaces every config field at once.
    #[must_use]
    pub fn config(mut self, config: ScraperConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.headers.insert(name.into(), value.into());
        self
    }

    /// Adds a per-URL header layer, applied above the static headers and
    /// below per-call headers.
    #[must_use]
    pub fn header_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) -> HeaderMap + Send + Sync + 'static,
    {
        self.header_source = Some(HeaderSource::function(f));
        self
    }

    #[must_use]
    pub fn requests_per_minute(mut self, rpm: f64) -> Self {
        self.config.requests_per_minute = rpm;
        self
    }

    #[must_use]
    pub fn follow_robots(mut self, follow: bool) -> Self {
        self.config.follow_robots = follow;
        self
    }

    #[must_use]
    pub fn raise_errors(mut self, raise: bool) -> Self {
        self.config.raise_errors = raise;
        self
    }

    /// Per-try timeout in seconds; `0` disables.
    #[must_use]
    pub fn timeout_secs(mut self, secs: f64) -> Self {
        self.config.timeout_secs = Some(secs);
        self
    }

    #[must_use]
    pub fn retry(mut self, attempts: i32, wait_seconds: f64) -> Self {
        self.config.retry_attempts = attempts;
        self.config.retry_wait_seconds = wait_seconds;
        self
    }

    #[must_use]
    pub fn cache(mut self, cache: Arc<dyn CacheStore>) -> Self {
        self.cache = Some(cache);
        self
    }

    #[must_use]
    pub fn cache_write_only(mut self, write_only: bool) -> Self {
        self.config.cache_write_only = write_only;
        self
    }

    #[must_use]
    pub fn disable_compression(mut self, disable: bool) -> Self {
        self.config.disable_compression = disable;
        self
    }

    /// Only applies to the default HTTP transport.
    #[must_use]
    pub fn follow_redirects(mut self, follow: bool) -> Self {
        self.config.follow_redirects = follow;
        self
    }

    /// Replaces the default `reqwest` transport.
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Replaces the default passive FTP client.
    #[must_use]
    pub fn ftp_fetcher(mut self, ftp: Arc<dyn FtpFetcher>) -> Self {
        self.ftp = Some(ftp);
        self
    }

    /// Validates the config and assembles the pipeline.
    ///
    /// # Errors
    ///
    /// Returns `BuildError::Config` for invalid settings and
    /// `BuildError::Client` if the default HTTP client cannot be created.
    pub fn build(self) -> Result<Scraper, BuildError> {
        let config = self.config;
        config.validate()?;

        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::with_options(config.follow_redirects, None)?),
        };

        let mut headers = HeaderLayers::new(config.user_agent.clone())
            .with_defaults(header_map_from_pairs(&config.headers))
            .with_disable_compression(config.disable_compression);
        if let Some(source) = self.header_source {
            headers = headers.with_source(source);
        }

        let stats = Arc::new(ScraperStats::new());
        let mut pipeline = RequestPipeline::builder(transport)
            .headers(headers)
            .requests_per_minute(config.requests_per_minute)
            .retry_policy(config.retry_policy())
            .follow_robots(config.follow_robots)
            .raise_errors(config.raise_errors)
            .cache_write_only(config.cache_write_only)
            .timeout(config.timeout())
            .stats(Arc::clone(&stats));
        if let Some(ftp) = self.ftp {
            pipeline = pipeline.ftp_fetcher(ftp);
        }
        if let Some(cache) = self.cache {
            pipeline = pipeline.cache(cache);
        }

        debug!(
            user_agent = %config.user_agent,
            rpm = config.requests_per_minute,
            retries = config.retry_attempts(),
            "scraper ready"
        );
        Ok(Scraper {
            config,
            pipeline: pipeline.build(),
            stats,
        })
    }
}

/// A polite, caching, retrying HTTP/FTP client.
///
/// # Example
///
/// ```no_run
/// use scrapelib::Scraper;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let scraper = Scraper::builder()
///     .requests_per_minute(30.0)
///     .retry(3, 2.0)
///     .build()?;
/// let page = scraper.get("https://example.com/").await?;
/// println!("{} bytes from {}", page.bytes().len(), page.url());
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Scraper {
    config: ScraperConfig,
    pipeline: RequestPipeline,
    stats: Arc<ScraperStats>,
}

impl Scraper {
    #[must_use]
    pub fn builder() -> ScraperBuilder {
        ScraperBuilder::default()
    }

    /// Creates a scraper with default settings.
    ///
    /// # Errors
    ///
    /// Returns `BuildError::Client` if the HTTP client cannot be created.
    pub fn new() -> Result<Self, BuildError> {
        Self::builder().build()
    }

    /// Creates a scraper from a config value.
    ///
    /// # Errors
    ///
    /// As [`ScraperBuilder::build`].
    pub fn from_config(config: ScraperConfig) -> Result<Self, BuildError> {
        Self::builder().config(config).build()
    }

    #[must_use]
    pub fn config(&self) -> &ScraperConfig {
        &self.config
    }

    #[must_use]
    pub fn user_agent(&self) -> &str {
        &self.config.user_agent
    }

    #[must_use]
    pub fn pipeline(&self) -> &RequestPipeline {
        &self.pipeline
    }

    /// Current request counters.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Issues a request with a method given by name (case-insensitive).
    ///
    /// # Errors
    ///
    /// `ScrapeError::InvalidMethod` for a malformed method name, otherwise as
    /// [`RequestPipeline::execute`].
    pub async fn request(
        &self,
        method: &str,
        url: &str,
        options: RequestOptions,
    ) -> Result<Response, ScrapeError> {
        let method = parse_method(method)?;
        self.pipeline.execute(method, url, options).await
    }

    /// # Errors
    ///
    /// As [`RequestPipeline::execute`].
    pub async fn get(&self, url: &str) -> Result<Response, ScrapeError> {
        self.get_with(url, RequestOptions::new()).await
    }

    /// # Errors
    ///
    /// As [`RequestPipeline::execute`].
    pub async fn get_with(
        &self,
        url: &str,
        options: RequestOptions,
    ) -> Result<Response, ScrapeError> {
        self.pipeline.execute(Method::GET, url, options).await
    }

    /// # Errors
    ///
    /// As [`RequestPipeline::execute`].
    pub async fn head(&self, url: &str) -> Result<Response, ScrapeError> {
        self.pipeline
            .execute(Method::HEAD, url, RequestOptions::new())
            .await
    }

    /// POSTs a raw body.
    ///
    /// # Errors
    ///
    /// As [`RequestPipeline::execute`].
    pub async fn post(
        &self,
        url: &str,
        body: impl Into<Vec<u8>>,
    ) -> Result<Response, ScrapeError> {
        self.pipeline
            .execute(Method::POST, url, RequestOptions::new().with_body(body))
            .await
    }

    /// POSTs `application/x-www-form-urlencoded` fields.
    ///
    /// # Errors
    ///
    /// As [`RequestPipeline::execute`].
    pub async fn post_form(
        &self,
        url: &str,
        fields: &[(&str, &str)],
    ) -> Result<Response, ScrapeError> {
        let body = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(fields)
            .finish();
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/x-www-form-urlencoded"),
        );
        let options = RequestOptions::new().with_headers(headers).with_body(body);
        self.pipeline.execute(Method::POST, url, options).await
    }

    /// Fetches `url` with GET and writes the body to `destination`, or to a
    /// new temporary file (inside `dir` when given) that is kept on disk.
    /// Returns the path written and the response.
    ///
    /// # Errors
    ///
    /// `ScrapeError::Io` if the file cannot be created or written, otherwise
    /// as [`RequestPipeline::execute`].
    #[instrument(skip(self))]
    pub async fn retrieve(
        &self,
        url: &str,
        destination: Option<&Path>,
        dir: Option<&Path>,
    ) -> Result<(PathBuf, Response), ScrapeError> {
        let response = self.get(url).await?;

        let path = match destination {
            Some(path) => path.to_path_buf(),
            None => {
                let dir = dir.map_or_else(std::env::temp_dir, Path::to_path_buf);
                tempfile::Builder::new()
                    .prefix(TEMPFILE_PREFIX)
                    .tempfile_in(&dir)
                    .map_err(|e| ScrapeError::io(&dir, e))?
                    .into_temp_path()
                    .keep()
                    .map_err(|e| ScrapeError::io(&dir, e.error))?
            }
        };

        tokio::fs::write(&path, response.bytes())
            .await
            .map_err(|e| ScrapeError::io(&path, e))?;
        debug!(path = %path.display(), bytes = response.bytes().len(), "saved response body");
        Ok((path, response))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;

    #[test]
    fn test_builder_applies_config() {
        let scraper = Scraper::builder()
            .user_agent("tester/2.0")
            .requests_per_minute(0.0)
            .retry(-4, 1.0)
            .raise_errors(false)
            .build()
            .unwrap();

        assert_eq!(scraper.user_agent(), "tester/2.0");
        assert!(scraper.pipeline().throttle().is_disabled());
        assert_eq!(scraper.pipeline().retry_policy().max_tries(), 1);
        assert!(!scraper.pipeline().settings().raise_errors);
    }

    #[test]
    fn test_builder_rejects_invalid_config() {
        let err = Scraper::builder().requests_per_minute(-1.0).build().unwrap_err();
        assert!(matches!(err, BuildError::Config(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_builder_accepts_extreme_valid_config() {
        let config = ScraperConfig {
            timeout_secs: Some(1e30),
            requests_per_minute: 1e-300,
            ..ScraperConfig::default()
        };
        let scraper = Scraper::from_config(config).unwrap();
        assert_eq!(scraper.pipeline().settings().timeout, None);
        assert_eq!(
            scraper.pipeline().throttle().interval(),
            Some(std::time::Duration::MAX)
        );
    }

    #[test]
    fn test_cache_is_wired_into_pipeline() {
        let scraper = Scraper::builder()
            .cache(Arc::new(MemoryCache::new()))
            .build()
            .unwrap();
        assert!(scraper.pipeline().cache().is_some());
    }

    #[tokio::test]
    async fn test_invalid_method_name() {
        let scraper = Scraper::new().unwrap();
        let err = scraper
            .request("NOT A METHOD", "http://dummy/", RequestOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ScrapeError::InvalidMethod(_)));
    }

    #[tokio::test]
    async fn test_empty_url_rejected() {
        let scraper = Scraper::new().unwrap();
        let err = scraper.get("").await.unwrap_err();
        assert!(matches!(err, ScrapeError::InvalidUrl { .. }));
        assert_eq!(scraper.stats().total_requests, 0);
    }
}
