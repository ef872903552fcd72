//! Error types surfaced by the request pipeline.

use std::path::PathBuf;

use reqwest::Method;
use thiserror::Error;

use super::robots::RobotsError;
use crate::response::Response;
use crate::transport::{FtpError, TransportError};

/// Failure of a single logical request.
///
/// Every variant carries enough context (URL, and for HTTP status errors the
/// full response) for the caller to act on it without re-issuing the request.
#[derive(Debug, Error)]
pub enum ScrapeError {
    /// The URL was empty or could not be parsed.
    #[error("invalid URL {url:?}: {reason}")]
    InvalidUrl {
        /// The URL as supplied by the caller.
        url: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The method name is not a valid HTTP token.
    #[error("invalid HTTP method {0:?}")]
    InvalidMethod(String),

    /// robots.txt forbids this user agent from fetching the URL.
    #[error("User-Agent '{user_agent}' not allowed at '{url}'")]
    RobotExclusion {
        /// The denied URL.
        url: String,
        /// The User-Agent the rules were evaluated for.
        user_agent: String,
    },

    /// robots.txt could not be fetched, so the URL's policy is unknown.
    #[error("robots.txt unavailable: {0}")]
    RobotsUnavailable(#[from] RobotsError),

    /// The scheme does not support the method (only GET for `ftp://`).
    #[error("{method} is not supported for {url}")]
    MethodUnavailable {
        /// The rejected method.
        method: Method,
        /// The requested URL.
        url: String,
    },

    /// The HTTP transport failed on every attempt (or fatally on one).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The final response had a status of 400 or above.
    #[error("{} while retrieving {}", .response.status(), .response.url())]
    HttpStatus {
        /// The complete final response, body included.
        response: Box<Response>,
    },

    /// The FTP retrieval failed on every attempt.
    #[error("FTP error for {url}: {source}")]
    Ftp {
        /// The requested URL.
        url: String,
        /// The underlying FTP error.
        #[source]
        source: FtpError,
    },

    /// Writing a retrieved body to disk failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// The destination path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

impl ScrapeError {
    pub fn invalid_url(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            url: url.into(),
            reason: reason.into(),
        }
    }

    pub fn robot_exclusion(url: impl Into<String>, user_agent: impl Into<String>) -> Self {
        Self::RobotExclusion {
            url: url.into(),
            user_agent: user_agent.into(),
        }
    }

    pub fn method_unavailable(method: Method, url: impl Into<String>) -> Self {
        Self::MethodUnavailable {
            method,
            url: url.into(),
        }
    }

    pub fn http_status(response: Response) -> Self {
        Self::HttpStatus {
            response: Box::new(response),
        }
    }

    pub fn ftp(url: impl Into<String>, source: FtpError) -> Self {
        Self::Ftp {
            url: url.into(),
            source,
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// The response behind an HTTP status error.
    #[must_use]
    pub fn response(&self) -> Option<&Response> {
        match self {
            Self::HttpStatus { response } => Some(response),
            _ => None,
        }
    }

    /// Takes ownership of the response behind an HTTP status error.
    #[must_use]
    pub fn into_response(self) -> Option<Response> {
        match self {
            Self::HttpStatus { response } => Some(*response),
            _ => None,
        }
    }

    /// HTTP status of the final response, for status errors.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        self.response().map(Response::status)
    }

    /// The URL the failure relates to, when known.
    #[must_use]
    pub fn url(&self) -> Option<&str> {
        match self {
            Self::InvalidUrl { url, .. }
            | Self::RobotExclusion { url, .. }
            | Self::MethodUnavailable { url, .. }
            | Self::Ftp { url, .. } => Some(url),
            Self::HttpStatus { response } => Some(response.url()),
            Self::Transport(e) => Some(e.url()),
            Self::InvalidMethod(_) | Self::RobotsUnavailable(_) | Self::Io { .. } => None,
        }
    }
}
