//! Request counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters updated by the request pipeline.
#[derive(Debug, Default)]
pub struct ScraperStats {
    total_requests: AtomicU64,
    cache_hits: AtomicU64,
    retries: AtomicU64,
    robots_denied: AtomicU64,
}

/// Point-in-time copy of [`ScraperStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Requests dispatched to a transport or FTP fetcher (each try counts).
    pub total_requests: u64,
    /// Requests answered from the cache.
    pub cache_hits: u64,
    /// Tries beyond the first.
    pub retries: u64,
    /// Requests refused by robots.txt.
    pub robots_denied: u64,
}

impl ScraperStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_request(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_robots_denied(&self) {
        self.robots_denied.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            robots_denied: self.robots_denied.load(Ordering::Relaxed),
        }
    }
}
