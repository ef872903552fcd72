//! Polite, resilient HTTP/FTP fetching for scrapers.
//!
//! Every request goes through one fixed pipeline: robots.txt gate, cache
//! lookup, throttle, dispatch with retry, cache write, then HTTP error
//! wrapping.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`scraper`] - High-level [`Scraper`] client (`get`, `post`, `retrieve`, ...)
//! - [`pipeline`] - Ordered request pipeline, robots, throttle and retry policies
//! - [`cache`] - Response caching (memory, file and SQLite backends)
//! - [`transport`] - HTTP (`reqwest`) and passive FTP network boundary
//! - [`config`] - Serde-backed [`ScraperConfig`]
//! - [`headers`] - Header layering and per-URL header functions
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use scrapelib::Scraper;
//! use scrapelib::cache::FileCache;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let scraper = Scraper::builder()
//!     .requests_per_minute(60.0)
//!     .retry(2, 5.0)
//!     .cache(Arc::new(FileCache::new("cache")?))
//!     .build()?;
//!
//! let response = scraper.get("https://example.com/").await?;
//! assert!(response.status() < 400);
//! # Ok(())
//! # }
//! ```

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cache;
pub mod config;
pub mod headers;
pub mod pipeline;
pub mod response;
pub mod scraper;
pub mod stats;
pub mod transport;
mod user_agent;

// Re-export commonly used types
pub use cache::{CacheError, CacheStore, FileCache, MemoryCache, SqliteCache};
pub use config::{ConfigError, ScraperConfig};
pub use headers::HeaderSource;
pub use pipeline::{RequestOptions, RequestPipeline, ScrapeError};
pub use response::Response;
pub use scraper::{BuildError, Scraper, ScraperBuilder};
pub use stats::StatsSnapshot;
pub use transport::{FtpError, HttpTransport, Transport, TransportError, TransportRequest};
pub use user_agent::default_user_agent;
