//! Retry decisions with exponential backoff.
//!
//! After each attempt the pipeline asks the [`RetryPolicy`] what to do next:
//!
//! - a response with status below 400 (or a 404 when 404s are not retried) is
//!   accepted;
//! - any other response, and any [`FailureType::Transient`] error, is retried
//!   after `base_wait * 2^(attempt - 1)` until `retry_attempts + 1` tries
//!   have been made;
//! - a [`FailureType::Fatal`] error is never retried.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use scrapelib::pipeline::{RetryDecision, RetryPolicy};
//!
//! let policy = RetryPolicy::new(2, Duration::from_secs(5));
//! assert_eq!(policy.decide_status(1, 200, false), RetryDecision::Accept);
//! assert_eq!(
//!     policy.decide_status(1, 503, false),
//!     RetryDecision::Retry { delay: Duration::from_secs(5), attempt: 2 }
//! );
//! ```

use std::time::Duration;

use tracing::{debug, instrument};

use super::ScrapeError;

/// Classification of a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// May succeed on another try (timeouts, resets, FTP failures).
    Transient,

    /// Will not succeed on another try (TLS/certificate failures, unsupported
    /// methods).
    Fatal,
}

/// What to do after an attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// The response is final.
    Accept,

    /// Try again after `delay`.
    Retry {
        /// How long to wait before the next try.
        delay: Duration,
        /// Number of the next try (1-indexed, so the first retry is 2).
        attempt: u32,
    },

    /// Stop and surface the last outcome.
    DoNotRetry {
        /// Human-readable reason.
        reason: String,
    },
}

/// Attempt budget and backoff base for one pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    retry_attempts: u32,
    base_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retry_attempts: 0,
            base_wait: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Creates a policy making at most `retry_attempts + 1` tries.
    #[must_use]
    pub fn new(retry_attempts: u32, base_wait: Duration) -> Self {
        Self {
            retry_attempts,
            base_wait,
        }
    }

    #[must_use]
    pub fn retry_attempts(&self) -> u32 {
        self.retry_attempts
    }

    #[must_use]
    pub fn base_wait(&self) -> Duration {
        self.base_wait
    }

    /// Total tries allowed, including the first.
    #[must_use]
    pub fn max_tries(&self) -> u32 {
        self.retry_attempts.saturating_add(1)
    }

    /// Decides on a response received on try `attempt` (1-indexed).
    #[instrument(skip(self), fields(max_tries = self.max_tries()))]
    pub fn decide_status(&self, attempt: u32, status: u16, retry_on_404: bool) -> RetryDecision {
        if status < 400 || (status == 404 && !retry_on_404) {
            return RetryDecision::Accept;
        }
        self.next_try(attempt)
    }

    /// Decides on an error raised by try `attempt` (1-indexed).
    #[instrument(skip(self), fields(max_tries = self.max_tries()))]
    pub fn decide_failure(&self, attempt: u32, failure_type: FailureType) -> RetryDecision {
        match failure_type {
            FailureType::Fatal => RetryDecision::DoNotRetry {
                reason: "fatal failure - retry would not help".to_string(),
            },
            FailureType::Transient => self.next_try(attempt),
        }
    }

    /// Backoff before the try following `attempt`: `base_wait * 2^(attempt-1)`.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.base_wait.saturating_mul(factor)
    }

    fn next_try(&self, attempt: u32) -> RetryDecision {
        if attempt >= self.max_tries() {
            debug!(attempt, max = self.max_tries(), "max tries reached");
            return RetryDecision::DoNotRetry {
                reason: format!("max tries ({}) exhausted", self.max_tries()),
            };
        }
        let delay = self.backoff(attempt);
        debug!(
            attempt,
            next_attempt = attempt + 1,
            delay_ms = delay.as_millis(),
            "will retry"
        );
        RetryDecision::Retry {
            delay,
            attempt: attempt + 1,
        }
    }
}

/// Classifies an attempt error for retry decisions.
///
/// | Error | Type |
/// |-------|------|
/// | Transport timeout / network | Transient |
/// | Transport TLS | Fatal |
/// | FTP (any) | Transient |
/// | Method unavailable | Fatal |
/// | Anything else | Fatal |
#[must_use]
pub fn classify_error(error: &ScrapeError) -> FailureType {
    match error {
        ScrapeError::Transport(e) if e.is_fatal() => FailureType::Fatal,
        ScrapeError::Transport(_) | ScrapeError::Ftp { .. } => FailureType::Transient,
        ScrapeError::InvalidUrl { .. }
        | ScrapeError::InvalidMethod(_)
        | ScrapeError::RobotExclusion { .. }
        | ScrapeError::RobotsUnavailable(_)
        | ScrapeError::MethodUnavailable { .. }
        | ScrapeError::HttpStatus { .. }
        | ScrapeError::Io { .. } => FailureType::Fatal,
    }
}

#[cfg(test)]
mod tests {
    use reqwest::Method;

    use super::*;
    use crate::transport::{FtpError, TransportError};

    const WAIT: Duration = Duration::from_secs(5);

    #[test]
    fn test_default_policy_makes_one_try() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_tries(), 1);
        assert!(matches!(
            policy.decide_status(1, 500, false),
            RetryDecision::DoNotRetry { .. }
        ));
    }

    #[test]
    fn test_success_statuses_accepted() {
        let policy = RetryPolicy::new(3, WAIT);
        for status in [200, 201, 204, 301, 302, 399] {
            assert_eq!(policy.decide_status(1, status, false), RetryDecision::Accept);
        }
    }

    #[test]
    fn test_404_accepted_unless_retry_on_404() {
        let policy = RetryPolicy::new(3, WAIT);
        assert_eq!(policy.decide_status(1, 404, false), RetryDecision::Accept);
        assert_eq!(
            policy.decide_status(1, 404, true),
            RetryDecision::Retry {
                delay: WAIT,
                attempt: 2
            }
        );
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy::new(3, WAIT);
        assert_eq!(policy.backoff(1), WAIT);
        assert_eq!(policy.backoff(2), WAIT * 2);
        assert_eq!(policy.backoff(3), WAIT * 4);
    }

    #[test]
    fn test_backoff_saturates() {
        let policy = RetryPolicy::new(u32::MAX, Duration::from_secs(u64::MAX / 2));
        assert_eq!(policy.backoff(40), Duration::MAX);
        assert_eq!(policy.max_tries(), u32::MAX);
    }

    #[test]
    fn test_retry_sequence_and_exhaustion() {
        let policy = RetryPolicy::new(3, WAIT);
        let delays: Vec<_> = (1..=4)
            .map(|attempt| policy.decide_status(attempt, 500, false))
            .collect();
        assert_eq!(
            delays[..3],
            [
                RetryDecision::Retry {
                    delay: WAIT,
                    attempt: 2
                },
                RetryDecision::Retry {
                    delay: WAIT * 2,
                    attempt: 3
                },
                RetryDecision::Retry {
                    delay: WAIT * 4,
                    attempt: 4
                },
            ]
        );
        assert!(matches!(delays[3], RetryDecision::DoNotRetry { .. }));
    }

    #[test]
    fn test_fatal_failure_never_retried() {
        let policy = RetryPolicy::new(5, WAIT);
        assert!(matches!(
            policy.decide_failure(1, FailureType::Fatal),
            RetryDecision::DoNotRetry { .. }
        ));
        assert!(matches!(
            policy.decide_failure(1, FailureType::Transient),
            RetryDecision::Retry { .. }
        ));
    }

    #[test]
    fn test_classify_error() {
        let tls = ScrapeError::from(TransportError::tls("https://x/", "bad certificate"));
        let timeout = ScrapeError::from(TransportError::timeout("https://x/"));
        let ftp = ScrapeError::ftp("ftp://x/", FtpError::Timeout);
        let method = ScrapeError::method_unavailable(Method::POST, "ftp://x/");

        assert_eq!(classify_error(&tls), FailureType::Fatal);
        assert_eq!(classify_error(&timeout), FailureType::Transient);
        assert_eq!(classify_error(&ftp), FailureType::Transient);
        assert_eq!(classify_error(&method), FailureType::Fatal);
    }
}
