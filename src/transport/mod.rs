//! Network boundary of the request pipeline.
//!
//! The pipeline never talks to sockets itself. HTTP(S) requests go through a
//! [`Transport`] (by default [`HttpTransport`], a `reqwest` wrapper) and
//! `ftp://` URLs go through an [`FtpFetcher`] (by default
//! [`PassiveFtpClient`]). Both are traits so tests and callers can substitute
//! their own implementations.

mod ftp;
mod http;

use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use reqwest::header::HeaderMap;
use thiserror::Error;

use crate::response::Response;

pub use ftp::{FtpError, FtpFetcher, PassiveFtpClient};
pub use http::HttpTransport;

/// Boxed error type used as the source of generic network failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A single request handed to a [`Transport`].
///
/// Built once per pipeline call and borrowed immutably by every attempt.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
    /// Per-attempt timeout; `None` uses the transport's default.
    pub timeout: Option<Duration>,
}

impl TransportRequest {
    #[must_use]
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
            timeout: None,
        }
    }
}

/// Sends a request and returns the fully-read response.
///
/// Any status code (including 4xx/5xx) is a successful send; only
/// transport-level failures are errors.
#[async_trait]
pub trait Transport: Send + Sync + Debug {
    async fn send(&self, request: &TransportRequest) -> Result<Response, TransportError>;
}

/// Transport-level failures (no HTTP response was obtained).
#[derive(Debug, Error)]
pub enum TransportError {
    /// The request did not complete within its timeout.
    #[error("timeout requesting {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// TLS handshake or certificate validation failure. Never retried.
    #[error("TLS failure requesting {url}: {message}")]
    Tls {
        /// The URL whose TLS setup failed.
        url: String,
        /// Description of the failure.
        message: String,
    },

    /// Any other network failure (DNS, connection refused, reset, ...).
    #[error("network error requesting {url}: {source}")]
    Network {
        /// The URL that failed.
        url: String,
        /// The underlying error.
        #[source]
        source: BoxError,
    },
}

impl TransportError {
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    pub fn tls(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Tls {
            url: url.into(),
            message: message.into(),
        }
    }

    pub fn network(url: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Network {
            url: url.into(),
            source: source.into(),
        }
    }

    /// Whether this failure must never be retried.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Tls { .. })
    }

    /// The URL the failed request targeted.
    #[must_use]
    pub fn url(&self) -> &str {
        match self {
            Self::Timeout { url } | Self::Tls { url, .. } | Self::Network { url, .. } => url,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_tls_is_fatal() {
        assert!(TransportError::tls("https://e/", "bad cert").is_fatal());
        assert!(!TransportError::timeout("https://e/").is_fatal());
        assert!(!TransportError::network("https://e/", "connection refused").is_fatal());
    }

    #[test]
    fn test_error_display_contains_url() {
        let err = TransportError::network("http://example.com/x", "connection reset");
        let msg = err.to_string();
        assert!(msg.contains("http://example.com/x"), "Expected URL in: {msg}");
        assert!(msg.contains("connection reset"), "Expected source in: {msg}");
        assert_eq!(err.url(), "http://example.com/x");
    }

    #[test]
    fn test_transport_request_defaults() {
        let req = TransportRequest::new(Method::GET, "http://example.com/");
        assert_eq!(req.method, Method::GET);
        assert!(req.headers.is_empty());
        assert!(req.body.is_none());
        assert!(req.timeout.is_none());
    }
}
