//! Response type returned by the request pipeline and stored by cache backends.

use std::borrow::Cow;

use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};

/// A fully-read HTTP (or FTP) response.
///
/// Responses are plain owned values: cache backends store their own copies and
/// hand out clones, so callers can never alias a cached entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    status: u16,
    url: String,
    requested_url: String,
    headers: HeaderMap,
    body: Vec<u8>,
    encoding: Option<String>,
    from_cache: bool,
}

impl Response {
    /// Creates an empty response with the given status and effective URL.
    #[must_use]
    pub fn new(status: u16, url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            status,
            requested_url: url.clone(),
            url,
            headers: HeaderMap::new(),
            body: Vec::new(),
            encoding: None,
            from_cache: false,
        }
    }

    /// Replaces the header map. The encoding is re-derived from `Content-Type`
    /// unless one was set explicitly.
    #[must_use]
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        if self.encoding.is_none() {
            self.encoding = charset_from_headers(&self.headers);
        }
        self
    }

    /// Adds a single header. Invalid names or values are ignored.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.insert(name, value);
        }
        if self.encoding.is_none() {
            self.encoding = charset_from_headers(&self.headers);
        }
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    #[must_use]
    pub fn with_encoding(mut self, encoding: Option<String>) -> Self {
        self.encoding = encoding;
        self
    }

    /// HTTP status code (FTP successes are reported as 200).
    #[must_use]
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Effective URL after redirects.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// URL the caller originally asked for.
    #[must_use]
    pub fn requested_url(&self) -> &str {
        &self.requested_url
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Returns a header value as a string, if present and valid UTF-8.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Raw body bytes.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.body
    }

    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.body
    }

    /// Declared character encoding, if any.
    #[must_use]
    pub fn encoding(&self) -> Option<&str> {
        self.encoding.as_deref()
    }

    /// Body decoded with the declared encoding, falling back to UTF-8.
    #[must_use]
    pub fn text(&self) -> Cow<'_, str> {
        decode_body(&self.body, self.encoding.as_deref())
    }

    /// Whether this response was served from the cache.
    #[must_use]
    pub fn from_cache(&self) -> bool {
        self.from_cache
    }

    /// Whether the status is a 4xx or 5xx.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.status >= 400
    }

    pub(crate) fn set_requested_url(&mut self, url: impl Into<String>) {
        self.requested_url = url.into();
    }

    pub(crate) fn set_from_cache(&mut self, from_cache: bool) {
        self.from_cache = from_cache;
    }
}

/// Extracts the `charset` parameter from a `Content-Type` header.
fn charset_from_headers(headers: &HeaderMap) -> Option<String> {
    let content_type = headers.get(CONTENT_TYPE)?.to_str().ok()?;
    content_type.split(';').skip(1).find_map(|param| {
        let (name, value) = param.split_once('=')?;
        name.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim().trim_matches('"').to_string())
            .filter(|v| !v.is_empty())
    })
}

fn decode_body<'a>(body: &'a [u8], encoding: Option<&str>) -> Cow<'a, str> {
    let encoding = encoding.map(str::to_ascii_lowercase);
    match encoding.as_deref() {
        Some("iso-8859-1" | "latin-1" | "latin1" | "l1") => {
            Cow::Owned(body.iter().map(|&b| char::from(b)).collect())
        }
        // ASCII is a subset of UTF-8; anything outside it is lossily replaced.
        _ => String::from_utf8_lossy(body),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_response_defaults() {
        let resp = Response::new(200, "http://example.com/");
        assert_eq!(resp.status(), 200);
        assert_eq!(resp.url(), "http://example.com/");
        assert_eq!(resp.requested_url(), "http://example.com/");
        assert!(!resp.from_cache());
        assert!(resp.bytes().is_empty());
        assert!(resp.encoding().is_none());
    }

    #[test]
    fn test_charset_derived_from_content_type() {
        let resp = Response::new(200, "http://example.com/")
            .with_header("Content-Type", "text/html; charset=\"ISO-8859-1\"");
        assert_eq!(resp.encoding(), Some("ISO-8859-1"));
    }

    #[test]
    fn test_explicit_encoding_wins_over_header() {
        let resp = Response::new(200, "http://example.com/")
            .with_encoding(Some("utf-8".to_string()))
            .with_header("Content-Type", "text/html; charset=latin1");
        assert_eq!(resp.encoding(), Some("utf-8"));
    }

    #[test]
    fn test_text_decodes_utf8_by_default() {
        let resp = Response::new(200, "http://example.com/")
            .with_body(b"here's unicode: \xe2\x98\x83".to_vec());
        assert_eq!(resp.text(), "here's unicode: \u{2603}");
    }

    #[test]
    fn test_text_decodes_latin1() {
        let resp = Response::new(200, "http://example.com/")
            .with_encoding(Some("ISO-8859-1".to_string()))
            .with_body(vec![0x63, 0x61, 0x66, 0xe9]);
        assert_eq!(resp.text(), "caf\u{e9}");
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let resp = Response::new(200, "http://example.com/").with_header("X-Num", "one");
        assert_eq!(resp.header("x-num"), Some("one"));
        assert_eq!(resp.header("X-NUM"), Some("one"));
    }

    #[test]
    fn test_is_error() {
        assert!(!Response::new(302, "http://e/").is_error());
        assert!(Response::new(404, "http://e/").is_error());
        assert!(Response::new(500, "http://e/").is_error());
    }
}
