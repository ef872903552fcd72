//! SQLite cache backend.
//!
//! One row per key in a `cache` table:
//!
//! | column   | type    | contents                                  |
//! |----------|---------|-------------------------------------------|
//! | key      | TEXT    | cache key (unique)                        |
//! | status   | INTEGER | HTTP status code                          |
//! | modified | TEXT    | `Last-Modified` of the response, if any   |
//! | encoding | TEXT    | text encoding, if known                   |
//! | data     | BLOB    | raw body                                  |
//! | headers  | TEXT    | JSON object of response headers           |

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, LAST_MODIFIED};
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use tracing::{debug, instrument};

use super::{CacheError, CacheStore, LastModifiedCheck};
use crate::response::Response;
use crate::transport::Transport;

/// SQLite allows one writer; a small pool is enough for concurrent readers.
const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Connections wait this long before returning `SQLITE_BUSY`.
const BUSY_TIMEOUT_MS: u32 = 5000;

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS cache (
    key TEXT UNIQUE,
    status INTEGER,
    modified TEXT,
    encoding TEXT,
    data BLOB,
    headers TEXT
)";

/// Cache storing responses in an SQLite database.
#[derive(Debug, Clone)]
pub struct SqliteCache {
    pool: SqlitePool,
    validator: Option<LastModifiedCheck>,
}

impl SqliteCache {
    /// Opens (creating if needed) the database at `path`.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Database` if the connection or schema setup fails.
    #[instrument(skip(path), fields(path = %path.as_ref().display()))]
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, CacheError> {
        let db_url = format!("sqlite:{}?mode=rwc", path.as_ref().display());
        let pool = SqlitePoolOptions::new()
            .max_connections(DEFAULT_MAX_CONNECTIONS)
            .connect(&db_url)
            .await?;

        sqlx::query(&format!("PRAGMA busy_timeout={BUSY_TIMEOUT_MS}"))
            .execute(&pool)
            .await?;

        Self::from_pool(pool).await
    }

    /// Creates a database that lives only as long as this cache.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Database` if the connection fails.
    #[instrument]
    pub async fn in_memory() -> Result<Self, CacheError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::from_pool(pool).await
    }

    async fn from_pool(pool: SqlitePool) -> Result<Self, CacheError> {
        sqlx::query(CREATE_TABLE).execute(&pool).await?;
        Ok(Self {
            pool,
            validator: None,
        })
    }

    /// Validates every hit with a HEAD request through `transport`, treating
    /// a changed or missing `Last-Modified` as a miss.
    #[must_use]
    pub fn with_last_modified_check(self, transport: Arc<dyn Transport>) -> Self {
        self.with_validator(LastModifiedCheck::new(transport))
    }

    /// Like [`Self::with_last_modified_check`] with a configured user agent
    /// and timeout.
    #[must_use]
    pub fn with_validator(mut self, check: LastModifiedCheck) -> Self {
        self.validator = Some(check);
        self
    }

    /// Deletes every row and returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Database` if the delete fails.
    #[instrument(skip(self))]
    pub async fn clear(&self) -> Result<u64, CacheError> {
        let result = sqlx::query("DELETE FROM cache").execute(&self.pool).await?;
        debug!(removed = result.rows_affected(), "cleared sqlite cache");
        Ok(result.rows_affected())
    }

    /// Closes every pooled connection.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl CacheStore for SqliteCache {
    #[instrument(skip(self))]
    async fn get(&self, key: &str) -> Result<Option<Response>, CacheError> {
        let row = sqlx::query(
            "SELECT status, modified, encoding, data, headers FROM cache WHERE key = ?",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };

        let modified: Option<String> = row.try_get("modified")?;
        if let Some(check) = &self.validator
            && !check.is_fresh(key, modified.as_deref()).await
        {
            return Ok(None);
        }

        let status: i64 = row.try_get("status")?;
        let Ok(status) = u16::try_from(status) else {
            debug!(status, "invalid status in cache row, treating as miss");
            return Ok(None);
        };
        let encoding: Option<String> = row.try_get("encoding")?;
        let data: Option<Vec<u8>> = row.try_get("data")?;
        let headers_json: Option<String> = row.try_get("headers")?;

        let headers = match headers_json {
            Some(json) => headers_from_json(&json)?,
            None => HeaderMap::new(),
        };

        Ok(Some(
            Response::new(status, key)
                .with_encoding(encoding)
                .with_headers(headers)
                .with_body(data.unwrap_or_default()),
        ))
    }

    #[instrument(skip(self, response), fields(status = response.status()))]
    async fn set(&self, key: &str, response: &Response) -> Result<(), CacheError> {
        let headers = headers_to_json(response.headers())?;
        let modified = response.header(LAST_MODIFIED.as_str());

        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM cache WHERE key = ?")
            .bind(key)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "INSERT INTO cache (key, status, modified, encoding, data, headers) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(key)
        .bind(i64::from(response.status()))
        .bind(modified)
        .bind(response.encoding())
        .bind(response.bytes())
        .bind(headers)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }
}

/// Repeated header names are joined with `, ` into one JSON value.
fn headers_to_json(headers: &HeaderMap) -> Result<String, CacheError> {
    let mut map: BTreeMap<&str, String> = BTreeMap::new();
    for (name, value) in headers {
        let value = String::from_utf8_lossy(value.as_bytes());
        map.entry(name.as_str())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert_with(|| value.into_owned());
    }
    Ok(serde_json::to_string(&map)?)
}

fn headers_from_json(json: &str) -> Result<HeaderMap, CacheError> {
    let map: BTreeMap<String, String> = serde_json::from_str(json)?;
    let mut headers = HeaderMap::new();
    for (name, value) in map {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            headers.append(name, value);
        }
    }
    Ok(headers)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::transport::HttpTransport;

    fn sample_response() -> Response {
        Response::new(200, "http://dummy/")
            .with_header("x-num", "one")
            .with_header("Content-Type", "text/plain; charset=utf-8")
            .with_body(b"here's unicode: \xe2\x98\x83".to_vec())
    }

    #[tokio::test]
    async fn test_unknown_key_returns_none() {
        let cache = SqliteCache::in_memory().await.unwrap();
        assert!(cache.get("one").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_round_trip() {
        let cache = SqliteCache::in_memory().await.unwrap();
        let resp = sample_response().with_header("Last-Modified", "Wed, 21 Oct 2015 07:28:00 GMT");
        cache.set("one", &resp).await.unwrap();

        let cached = cache.get("one").await.unwrap().unwrap();
        assert_eq!(cached.status(), 200);
        assert_eq!(cached.encoding(), Some("utf-8"));
        assert_eq!(cached.headers(), resp.headers());
        assert_eq!(cached.bytes(), resp.bytes());
        assert_eq!(cached.url(), "one");
    }

    #[tokio::test]
    async fn test_set_replaces_existing_row() {
        let cache = SqliteCache::in_memory().await.unwrap();
        cache
            .set("k", &Response::new(200, "http://a/").with_body(b"first".to_vec()))
            .await
            .unwrap();
        cache
            .set("k", &Response::new(200, "http://a/").with_body(b"second".to_vec()))
            .await
            .unwrap();

        let cached = cache.get("k").await.unwrap().unwrap();
        assert_eq!(cached.bytes(), b"second");

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM cache")
            .fetch_one(&cache.pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_clear() {
        let cache = SqliteCache::in_memory().await.unwrap();
        cache.set("one", &sample_response()).await.unwrap();
        cache.set("two", &sample_response()).await.unwrap();
        assert_eq!(cache.clear().await.unwrap(), 2);
        assert!(cache.get("one").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_persists_across_connections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");
        {
            let cache = SqliteCache::open(&path).await.unwrap();
            cache.set("one", &sample_response()).await.unwrap();
            cache.close().await;
        }
        let cache = SqliteCache::open(&path).await.unwrap();
        let cached = cache.get("one").await.unwrap().unwrap();
        assert_eq!(cached.header("x-num"), Some("one"));
    }

    #[test]
    fn test_repeated_headers_are_joined() {
        let mut headers = HeaderMap::new();
        headers.append("x-multi", HeaderValue::from_static("a"));
        headers.append("x-multi", HeaderValue::from_static("b"));
        let json = headers_to_json(&headers).unwrap();
        assert_eq!(json, r#"{"x-multi":"a, b"}"#);
    }

    #[tokio::test]
    async fn test_last_modified_check() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Last-Modified", "Wed, 21 Oct 2015 07:28:00 GMT"),
            )
            .mount(&server)
            .await;

        let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new().unwrap());
        let cache = SqliteCache::in_memory()
            .await
            .unwrap()
            .with_last_modified_check(transport);
        let key = format!("{}/page", server.uri());

        let fresh = Response::new(200, key.clone())
            .with_header("last-modified", "Wed, 21 Oct 2015 07:28:00 GMT");
        cache.set(&key, &fresh).await.unwrap();
        assert!(cache.get(&key).await.unwrap().is_some());

        let stale = Response::new(200, key.clone())
            .with_header("last-modified", "Tue, 20 Oct 2015 07:28:00 GMT");
        cache.set(&key, &stale).await.unwrap();
        assert!(cache.get(&key).await.unwrap().is_none());

        cache.set(&key, &Response::new(200, key.clone())).await.unwrap();
        assert!(cache.get(&key).await.unwrap().is_none());
    }
}
