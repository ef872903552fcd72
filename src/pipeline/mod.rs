//! The request pipeline: one logical request through every politeness and
//! resilience policy.
//!
//! # Order
//!
//! Each [`RequestPipeline::execute`] call runs, in this order:
//!
//! 1. **Robots gate** - `http`/`https` URLs are checked against the origin's
//!    robots.txt; a denial ends the call before any other step.
//! 2. **Cache lookup** - GET requests with a cache configured; a hit is
//!    returned immediately.
//! 3. **Throttle** - once per call, before the first network try.
//! 4. **Dispatch with retry** - HTTP transport or FTP fetcher, retried with
//!    exponential backoff.
//! 5. **Cache write** - once, after the retry loop, for 200 responses.
//! 6. **Error wrapping** - final statuses of 400 and above become
//!    [`ScrapeError::HttpStatus`] when `raise_errors` is on.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use reqwest::Method;
//! use scrapelib::pipeline::{RequestOptions, RequestPipeline};
//! use scrapelib::transport::HttpTransport;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let pipeline = RequestPipeline::builder(Arc::new(HttpTransport::new()?))
//!     .requests_per_minute(30.0)
//!     .build();
//! let response = pipeline
//!     .execute(Method::GET, "example.com", RequestOptions::default())
//!     .await?;
//! println!("{}", response.text());
//! # Ok(())
//! # }
//! ```

mod error;
mod retry;
mod robots;
mod throttle;

use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Method;
use reqwest::header::{HeaderMap, USER_AGENT};
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::cache::{CacheStore, cache_key, should_cache_response};
use crate::headers::HeaderLayers;
use crate::response::Response;
use crate::stats::ScraperStats;
use crate::transport::{FtpFetcher, PassiveFtpClient, Transport, TransportRequest};
use crate::user_agent::default_user_agent;

pub use error::ScrapeError;
pub use retry::{FailureType, RetryDecision, RetryPolicy, classify_error};
pub use robots::{RobotsChecker, RobotsError, RobotsGroup, RobotsRuleSet};
pub use throttle::ThrottleGate;

/// Default throttle rate.
pub const DEFAULT_REQUESTS_PER_MINUTE: f64 = 60.0;

/// Per-call options for [`RequestPipeline::execute`].
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Highest-precedence headers for this call.
    pub headers: HeaderMap,
    /// Request body (e.g. form-encoded POST data).
    pub body: Option<Vec<u8>>,
    /// Per-try timeout overriding the pipeline default.
    pub timeout: Option<Duration>,
    /// Treat a 404 as retryable instead of final.
    pub retry_on_404: bool,
    /// Skip both cache lookup and cache write.
    pub bypass_cache: bool,
}

impl RequestOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn retry_on_404(mut self, retry: bool) -> Self {
        self.retry_on_404 = retry;
        self
    }

    #[must_use]
    pub fn bypass_cache(mut self, bypass: bool) -> Self {
        self.bypass_cache = bypass;
        self
    }
}

/// Switches controlling which pipeline steps run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineSettings {
    pub follow_robots: bool,
    pub raise_errors: bool,
    /// Write to the cache but never read from it.
    pub cache_write_only: bool,
    /// Default per-try timeout.
    pub timeout: Option<Duration>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            follow_robots: true,
            raise_errors: true,
            cache_write_only: false,
            timeout: None,
        }
    }
}

/// Builder for [`RequestPipeline`].
#[derive(Debug)]
pub struct PipelineBuilder {
    transport: Arc<dyn Transport>,
    ftp: Option<Arc<dyn FtpFetcher>>,
    cache: Option<Arc<dyn CacheStore>>,
    headers: HeaderLayers,
    requests_per_minute: f64,
    retry: RetryPolicy,
    settings: PipelineSettings,
    stats: Option<Arc<ScraperStats>>,
}

impl PipelineBuilder {
    #[must_use]
    pub fn ftp_fetcher(mut self, ftp: Arc<dyn FtpFetcher>) -> Self {
        self.ftp = Some(ftp);
        self
    }

    #[must_use]
    pub fn cache(mut self, cache: Arc<dyn CacheStore>) -> Self {
        self.cache = Some(cache);
        self
    }

    #[must_use]
    pub fn headers(mut self, headers: HeaderLayers) -> Self {
        self.headers = headers;
        self
    }

    /// Zero (or negative) disables throttling.
    #[must_use]
    pub fn requests_per_minute(mut self, rpm: f64) -> Self {
        self.requests_per_minute = rpm;
        self
    }

    #[must_use]
    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn settings(mut self, settings: PipelineSettings) -> Self {
        self.settings = settings;
        self
    }

    #[must_use]
    pub fn follow_robots(mut self, follow: bool) -> Self {
        self.settings.follow_robots = follow;
        self
    }

    #[must_use]
    pub fn raise_errors(mut self, raise: bool) -> Self {
        self.settings.raise_errors = raise;
        self
    }

    #[must_use]
    pub fn cache_write_only(mut self, write_only: bool) -> Self {
        self.settings.cache_write_only = write_only;
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.settings.timeout = timeout;
        self
    }

    /// Shares an existing counter set instead of creating a fresh one.
    #[must_use]
    pub fn stats(mut self, stats: Arc<ScraperStats>) -> Self {
        self.stats = Some(stats);
        self
    }

    #[must_use]
    pub fn build(self) -> RequestPipeline {
        let robots = RobotsChecker::new(Arc::clone(&self.transport), self.settings.timeout);
        RequestPipeline {
            ftp: self
                .ftp
                .unwrap_or_else(|| Arc::new(PassiveFtpClient::new())),
            cache: self.cache,
            robots,
            throttle: ThrottleGate::new(self.requests_per_minute),
            retry: self.retry,
            headers: self.headers,
            settings: self.settings,
            stats: self.stats.unwrap_or_default(),
            transport: self.transport,
        }
    }
}

/// Runs requests through robots, cache, throttle, retry and error policies.
///
/// `Send + Sync`; share it through an `Arc` to issue concurrent requests that
/// respect one throttle and one robots memo.
#[derive(Debug)]
pub struct RequestPipeline {
    transport: Arc<dyn Transport>,
    ftp: Arc<dyn FtpFetcher>,
    cache: Option<Arc<dyn CacheStore>>,
    robots: RobotsChecker,
    throttle: ThrottleGate,
    retry: RetryPolicy,
    headers: HeaderLayers,
    settings: PipelineSettings,
    stats: Arc<ScraperStats>,
}

impl RequestPipeline {
    /// Starts a builder with the default user agent, 60 requests per minute,
    /// robots checking and error raising on, no retries and no cache.
    #[must_use]
    pub fn builder(transport: Arc<dyn Transport>) -> PipelineBuilder {
        PipelineBuilder {
            transport,
            ftp: None,
            cache: None,
            headers: HeaderLayers::new(default_user_agent()),
            requests_per_minute: DEFAULT_REQUESTS_PER_MINUTE,
            retry: RetryPolicy::default(),
            settings: PipelineSettings::default(),
            stats: None,
        }
    }

    #[must_use]
    pub fn stats(&self) -> &Arc<ScraperStats> {
        &self.stats
    }

    #[must_use]
    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderLayers {
        &self.headers
    }

    #[must_use]
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    #[must_use]
    pub fn throttle(&self) -> &ThrottleGate {
        &self.throttle
    }

    #[must_use]
    pub fn robots(&self) -> &RobotsChecker {
        &self.robots
    }

    #[must_use]
    pub fn cache(&self) -> Option<&Arc<dyn CacheStore>> {
        self.cache.as_ref()
    }

    /// Performs one logical request.
    ///
    /// # Errors
    ///
    /// - `InvalidUrl` for an empty or unparseable URL
    /// - `RobotExclusion` / `RobotsUnavailable` from the robots gate
    /// - `MethodUnavailable` for non-GET `ftp://` requests
    /// - `Transport` / `Ftp` when every try failed (or a TLS failure occurred)
    /// - `HttpStatus` for a final status of 400 or above with `raise_errors`
    #[instrument(skip(self, options), fields(method = %method, url = %url))]
    pub async fn execute(
        &self,
        method: Method,
        url: &str,
        options: RequestOptions,
    ) -> Result<Response, ScrapeError> {
        let method = normalize_method(method);
        let url = prepare_url(url)?;
        let headers = self.headers.resolve(url.as_str(), &options.headers);

        if self.settings.follow_robots && matches!(url.scheme(), "http" | "https") {
            let user_agent = headers
                .get(USER_AGENT)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_else(|| self.headers.user_agent())
                .to_string();
            if !self.robots.allowed(&user_agent, &url).await? {
                self.stats.record_robots_denied();
                info!(user_agent = %user_agent, "blocked by robots.txt");
                return Err(ScrapeError::robot_exclusion(url.as_str(), user_agent));
            }
        }

        let key = if options.bypass_cache || self.cache.is_none() {
            None
        } else {
            cache_key(&method, &url)
        };

        if let (Some(cache), Some(key)) = (&self.cache, &key)
            && !self.settings.cache_write_only
        {
            match cache.get(key).await {
                Ok(Some(mut response)) => {
                    debug!("cache hit");
                    self.stats.record_cache_hit();
                    response.set_from_cache(true);
                    response.set_requested_url(url.as_str());
                    return self.wrap_status(response);
                }
                Ok(None) => debug!("cache miss"),
                Err(e) => warn!(error = %e, "cache lookup failed, treating as miss"),
            }
        }

        self.throttle.wait().await;

        let request = TransportRequest {
            method,
            url: url.to_string(),
            headers,
            body: options.body,
            timeout: options.timeout.or(self.settings.timeout),
        };
        let mut response = self
            .dispatch_with_retry(&request, &url, options.retry_on_404)
            .await?;
        response.set_requested_url(url.as_str());
        response.set_from_cache(false);

        if let (Some(cache), Some(key)) = (&self.cache, &key)
            && should_cache_response(&response)
        {
            if let Err(e) = cache.set(key, &response).await {
                warn!(error = %e, "cache write failed");
            } else {
                debug!("response cached");
            }
        }

        self.wrap_status(response)
    }

    async fn dispatch_with_retry(
        &self,
        request: &TransportRequest,
        url: &Url,
        retry_on_404: bool,
    ) -> Result<Response, ScrapeError> {
        let mut attempt = 1;
        loop {
            let outcome = self.dispatch(request, url).await;
            let decision = match &outcome {
                Ok(response) => self
                    .retry
                    .decide_status(attempt, response.status(), retry_on_404),
                Err(e) => self.retry.decide_failure(attempt, classify_error(e)),
            };

            match decision {
                RetryDecision::Accept => return outcome,
                RetryDecision::DoNotRetry { reason } => {
                    if attempt > 1 || outcome.is_err() {
                        debug!(attempt, reason = %reason, "not retrying");
                    }
                    return outcome;
                }
                RetryDecision::Retry {
                    delay,
                    attempt: next,
                } => {
                    match &outcome {
                        Ok(response) => info!(
                            attempt,
                            status = response.status(),
                            delay_secs = delay.as_secs_f64(),
                            "bad status, sleeping before retry"
                        ),
                        Err(e) => info!(
                            attempt,
                            error = %e,
                            delay_secs = delay.as_secs_f64(),
                            "request failed, sleeping before retry"
                        ),
                    }
                    tokio::time::sleep(delay).await;
                    self.stats.record_retry();
                    attempt = next;
                }
            }
        }
    }

    async fn dispatch(
        &self,
        request: &TransportRequest,
        url: &Url,
    ) -> Result<Response, ScrapeError> {
        if url.scheme() == "ftp" {
            if request.method != Method::GET {
                return Err(ScrapeError::method_unavailable(
                    request.method.clone(),
                    url.as_str(),
                ));
            }
            self.stats.record_request();
            let body = self
                .ftp
                .retrieve(url, request.timeout)
                .await
                .map_err(|e| ScrapeError::ftp(url.as_str(), e))?;
            return Ok(Response::new(200, url.as_str()).with_body(body));
        }

        self.stats.record_request();
        Ok(self.transport.send(request).await?)
    }

    fn wrap_status(&self, response: Response) -> Result<Response, ScrapeError> {
        if self.settings.raise_errors && response.status() >= 400 {
            return Err(ScrapeError::http_status(response));
        }
        Ok(response)
    }
}

/// Upper-cases extension methods so `"get"` and `"GET"` are the same method.
#[must_use]
pub fn normalize_method(method: Method) -> Method {
    let upper = method.as_str().to_ascii_uppercase();
    if upper == method.as_str() {
        return method;
    }
    Method::from_bytes(upper.as_bytes()).unwrap_or(method)
}

/// Parses a method name case-insensitively.
///
/// # Errors
///
/// Returns `ScrapeError::InvalidMethod` when the name is not a valid HTTP
/// token.
pub fn parse_method(name: &str) -> Result<Method, ScrapeError> {
    Method::from_bytes(name.trim().to_ascii_uppercase().as_bytes())
        .map_err(|_| ScrapeError::InvalidMethod(name.to_string()))
}

/// Validates a caller URL, prepending `http://` when it has no scheme.
///
/// ```
/// use scrapelib::pipeline::prepare_url;
///
/// assert_eq!(prepare_url("example.com/a").unwrap().as_str(), "http://example.com/a");
/// assert!(prepare_url("").is_err());
/// ```
///
/// # Errors
///
/// Returns `ScrapeError::InvalidUrl` for empty or unparseable URLs.
pub fn prepare_url(raw: &str) -> Result<Url, ScrapeError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ScrapeError::invalid_url(raw, "URL is empty"));
    }
    let candidate = if trimmed.contains("://") {
        Cow::Borrowed(trimmed)
    } else {
        Cow::Owned(format!("http://{trimmed}"))
    };
    Url::parse(&candidate).map_err(|e| ScrapeError::invalid_url(raw, e.to_string()))
}
