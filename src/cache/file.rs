//! File-per-key cache backend.
//!
//! # On-disk format
//!
//! ```text
//! status: 200
//! encoding: utf-8
//! content-type: text/html; charset=utf-8
//!
//! <raw body bytes>
//! ```
//!
//! File names are `<readable-prefix>,<md5 of key>`; the prefix is the key
//! without its scheme, with `?`, `/`, `:` and `|` runs replaced by `,` and cut
//! to 200 characters.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::LazyLock;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use regex::Regex;
use reqwest::header::{CONTENT_LOCATION, HeaderMap, HeaderName, HeaderValue, LAST_MODIFIED};
use tracing::{debug, instrument};

use super::{CacheError, CacheStore, LastModifiedCheck};
use crate::response::Response;
use crate::transport::Transport;

/// Maximum length (in characters) of the readable part of a file name.
const MAX_PREFIX_LEN: usize = 200;

/// Written in place of a missing encoding.
const NO_ENCODING: &str = "None";

#[allow(clippy::expect_used)]
static SCHEME_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\w+://").expect("valid scheme regex"));

#[allow(clippy::expect_used)]
static ILLEGAL_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[?/:|]+").expect("valid illegal-char regex"));

#[allow(clippy::expect_used)]
static HEADER_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([-\w]+): (.*)$").expect("valid header regex"));

#[allow(clippy::expect_used)]
static CACHE_FILE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",[0-9a-f]{32}$").expect("valid cache file regex"));

/// Cache storing one file per key under a directory.
#[derive(Debug)]
pub struct FileCache {
    cache_dir: PathBuf,
    validator: Option<LastModifiedCheck>,
    temp_counter: AtomicU64,
}

impl FileCache {
    /// Opens (creating if needed) a cache directory.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Io` if the directory cannot be created.
    pub fn new(cache_dir: impl AsRef<Path>) -> Result<Self, CacheError> {
        let cache_dir = std::path::absolute(cache_dir.as_ref())
            .map_err(|e| CacheError::io(cache_dir.as_ref(), e))?;
        std::fs::create_dir_all(&cache_dir).map_err(|e| CacheError::io(&cache_dir, e))?;
        Ok(Self {
            cache_dir,
            validator: None,
            temp_counter: AtomicU64::new(0),
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

    #[must_use]
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Full path of the file holding `key`.
    #[must_use]
    pub fn path_for_key(&self, key: &str) -> PathBuf {
        self.cache_dir.join(clean_key(key))
    }

    /// Removes every cache file in the directory and returns how many were
    /// deleted. Only names ending in `,` plus 32 hex digits are touched.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Io` if the directory cannot be listed or a file
    /// cannot be removed.
    #[instrument(skip(self), fields(dir = %self.cache_dir.display()))]
    pub async fn clear(&self) -> Result<usize, CacheError> {
        let mut entries = tokio::fs::read_dir(&self.cache_dir)
            .await
            .map_err(|e| CacheError::io(&self.cache_dir, e))?;
        let mut removed = 0;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| CacheError::io(&self.cache_dir, e))?
        {
            let name = entry.file_name();
            if name.to_str().is_some_and(|n| CACHE_FILE_NAME.is_match(n)) {
                let path = entry.path();
                tokio::fs::remove_file(&path)
                    .await
                    .map_err(|e| CacheError::io(&path, e))?;
                removed += 1;
            }
        }
        debug!(removed, "cleared file cache");
        Ok(removed)
    }

    fn temp_path(&self) -> PathBuf {
        let n = self.temp_counter.fetch_add(1, Ordering::Relaxed);
        self.cache_dir
            .join(format!(".scrapelib-{}-{n}.tmp", std::process::id()))
    }
}

#[async_trait]
impl CacheStore for FileCache {
    #[instrument(skip(self))]
    async fn get(&self, key: &str) -> Result<Option<Response>, CacheError> {
        let path = self.path_for_key(key);
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CacheError::io(path, e)),
        };

        let Some(response) = decode_entry(key, &raw) else {
            debug!(path = %path.display(), "corrupt cache file, treating as miss");
            return Ok(None);
        };

        if let Some(check) = &self.validator {
            let cached = response.header(LAST_MODIFIED.as_str());
            if !check.is_fresh(key, cached).await {
                return Ok(None);
            }
        }
        Ok(Some(response))
    }

    #[instrument(skip(self, response), fields(status = response.status()))]
    async fn set(&self, key: &str, response: &Response) -> Result<(), CacheError> {
        let path = self.path_for_key(key);
        let temp = self.temp_path();
        tokio::fs::write(&temp, encode_entry(response))
            .await
            .map_err(|e| CacheError::io(&temp, e))?;
        if let Err(e) = tokio::fs::rename(&temp, &path).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(CacheError::io(path, e));
        }
        Ok(())
    }
}

/// Maps a cache key to its file name.
///
/// ```
/// use scrapelib::cache::clean_key;
///
/// let name = clean_key("http://example.com/a?b=c");
/// assert!(name.starts_with("example.com,a,b=c,"));
/// assert_eq!(name.len(), "example.com,a,b=c,".len() + 32);
/// ```
#[must_use]
pub fn clean_key(key: &str) -> String {
    let digest = format!("{:x}", md5::compute(key.as_bytes()));
    let stripped = SCHEME_PREFIX.replace(key, "");
    let readable = ILLEGAL_CHARS.replace_all(&stripped, ",");
    let prefix: String = readable.chars().take(MAX_PREFIX_LEN).collect();
    format!("{prefix},{digest}")
}

fn encode_entry(response: &Response) -> Vec<u8> {
    let mut out = Vec::with_capacity(response.bytes().len() + 256);
    out.extend_from_slice(format!("status: {}\n", response.status()).as_bytes());
    out.extend_from_slice(
        format!("encoding: {}\n", response.encoding().unwrap_or(NO_ENCODING)).as_bytes(),
    );
    for (name, value) in response.headers() {
        out.extend_from_slice(name.as_str().as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.push(b'\n');
    }
    out.push(b'\n');
    out.extend_from_slice(response.bytes());
    out
}

fn decode_entry(key: &str, raw: &[u8]) -> Option<Response> {
    let mut status = None;
    let mut encoding = None;
    let mut headers = HeaderMap::new();
    let mut rest = raw;

    loop {
        let (line, remainder) = match rest.iter().position(|&b| b == b'\n') {
            Some(end) => (&rest[..end], &rest[end + 1..]),
            None => (rest, &rest[rest.len()..]),
        };
        let text = String::from_utf8_lossy(line);
        let text = text.trim_end_matches('\r');
        let Some(captures) = HEADER_LINE.captures(text) else {
            rest = remainder;
            break;
        };
        rest = remainder;
        let (name, value) = (&captures[1], &captures[2]);

        if status.is_none() && name.eq_ignore_ascii_case("status") {
            status = value.split(' ').next().and_then(|code| code.parse::<u16>().ok());
            status?;
        } else if encoding.is_none() && name.eq_ignore_ascii_case("encoding") {
            encoding = Some(value.to_string());
        } else if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            headers.append(name, value);
        }
        if rest.is_empty() {
            break;
        }
    }

    let status = status?;
    let encoding = encoding.filter(|e| e != NO_ENCODING);
    let url = headers
        .get(CONTENT_LOCATION)
        .and_then(|v| v.to_str().ok())
        .map_or_else(|| key.to_string(), ToString::to_string);

    Some(
        Response::new(status, url)
            .with_encoding(encoding)
            .with_headers(headers)
            .with_body(rest.to_vec()),
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tempfile::TempDir;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::transport::HttpTransport;

    fn sample_response() -> Response {
        Response::new(200, "http://dummy/")
            .with_header("x-num", "one")
            .with_header("Content-Type", "text/plain; charset=utf-8")
            .with_body(b"here's unicode: \xe2\x98\x83\n\nwith blank lines".to_vec())
    }

    #[test]
    fn test_clean_key_strips_scheme_and_illegal_chars() {
        let name = clean_key("http://example.com/a?b=c|d");
        let digest = format!("{:x}", md5::compute(b"http://example.com/a?b=c|d"));
        assert_eq!(name, format!("example.com,a,b=c,d,{digest}"));
    }

    #[test]
    fn test_clean_key_truncates_long_prefix() {
        let key = format!("http://example.com/{}", "x".repeat(500));
        let name = clean_key(&key);
        let (prefix, digest) = name.rsplit_once(',').unwrap();
        assert_eq!(prefix.chars().count(), MAX_PREFIX_LEN);
        assert_eq!(digest.len(), 32);
    }

    #[test]
    fn test_clean_key_distinguishes_keys_with_same_prefix() {
        let base = format!("http://example.com/{}", "x".repeat(300));
        assert_ne!(clean_key(&format!("{base}1")), clean_key(&format!("{base}2")));
    }

    #[tokio::test]
    async fn test_unknown_key_returns_none() {
        let dir = TempDir::new().unwrap();
        let cache = FileCache::new(dir.path()).unwrap();
        assert!(cache.get("one").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_round_trip_preserves_status_encoding_headers_body() {
        let dir = TempDir::new().unwrap();
        let cache = FileCache::new(dir.path()).unwrap();
        let resp = sample_response();
        cache.set("one", &resp).await.unwrap();

        let cached = cache.get("one").await.unwrap().unwrap();
        assert_eq!(cached.status(), 200);
        assert_eq!(cached.encoding(), Some("utf-8"));
        assert_eq!(cached.headers(), resp.headers());
        assert_eq!(cached.bytes(), resp.bytes());
        assert_eq!(cached.url(), "one");
    }

    #[tokio::test]
    async fn test_on_disk_layout() {
        let dir = TempDir::new().unwrap();
        let cache = FileCache::new(dir.path()).unwrap();
        let resp = Response::new(404, "http://dummy/")
            .with_header("x-num", "one")
            .with_body(b"body".to_vec());
        cache.set("http://dummy/", &resp).await.unwrap();

        let raw = std::fs::read(cache.path_for_key("http://dummy/")).unwrap();
        assert_eq!(raw, b"status: 404\nencoding: None\nx-num: one\n\nbody");
    }

    #[tokio::test]
    async fn test_reads_files_with_reason_phrase_in_status() {
        let dir = TempDir::new().unwrap();
        let cache = FileCache::new(dir.path()).unwrap();
        std::fs::write(
            cache.path_for_key("k"),
            b"status: 200 OK\nencoding: latin1\ncontent-location: http://real/\n\ncaf\xe9",
        )
        .unwrap();

        let cached = cache.get("k").await.unwrap().unwrap();
        assert_eq!(cached.status(), 200);
        assert_eq!(cached.url(), "http://real/");
        assert_eq!(cached.text(), "caf\u{e9}");
    }

    #[tokio::test]
    async fn test_corrupt_file_is_a_miss() {
        let dir = TempDir::new().unwrap();
        let cache = FileCache::new(dir.path()).unwrap();
        std::fs::write(cache.path_for_key("k"), b"garbage without headers").unwrap();
        assert!(cache.get("k").await.unwrap().is_none());

        std::fs::write(cache.path_for_key("k"), b"status: abc\n\nbody").unwrap();
        assert!(cache.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_set_overwrites_existing_entry() {
        let dir = TempDir::new().unwrap();
        let cache = FileCache::new(dir.path()).unwrap();
        cache
            .set("k", &Response::new(200, "http://a/").with_body(b"first".to_vec()))
            .await
            .unwrap();
        cache
            .set("k", &Response::new(200, "http://a/").with_body(b"second".to_vec()))
            .await
            .unwrap();
        assert_eq!(cache.get("k").await.unwrap().unwrap().bytes(), b"second");
    }

    #[tokio::test]
    async fn test_clear_only_removes_cache_files() {
        let dir = TempDir::new().unwrap();
        let cache = FileCache::new(dir.path()).unwrap();
        cache.set("one", &sample_response()).await.unwrap();
        cache.set("two", &sample_response()).await.unwrap();
        std::fs::write(dir.path().join("keep-me.txt"), b"not a cache file").unwrap();

        assert_eq!(cache.clear().await.unwrap(), 2);
        assert!(cache.get("one").await.unwrap().is_none());
        assert!(dir.path().join("keep-me.txt").exists());
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

        let dir = TempDir::new().unwrap();
        let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new().unwrap());
        let cache = FileCache::new(dir.path())
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

        let unknown = Response::new(200, key.clone());
        cache.set(&key, &unknown).await.unwrap();
        assert!(cache.get(&key).await.unwrap().is_none());
    }
}
