//! Request header layering.
//!
//! Headers for a request are assembled once, before the robots gate, from
//! these layers (later layers override earlier ones by header name):
//!
//! 1. `User-Agent` from the configured user agent
//! 2. static instance headers ([`HeaderSource::Static`])
//! 3. `Accept-Encoding: text/*` when compression is disabled
//! 4. per-URL generated headers ([`HeaderSource::Function`])
//! 5. per-call headers

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use reqwest::header::{ACCEPT_ENCODING, HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use tracing::warn;

/// Generates headers for a URL.
pub type HeaderFn = Arc<dyn Fn(&str) -> HeaderMap + Send + Sync>;

/// Instance-level headers: either a fixed map or a function of the URL.
#[derive(Clone)]
pub enum HeaderSource {
    Static(HeaderMap),
    Function(HeaderFn),
}

impl fmt::Debug for HeaderSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(map) => f.debug_tuple("Static").field(map).finish(),
            Self::Function(_) => f.write_str("Function(..)"),
        }
    }
}

impl HeaderSource {
    /// Wraps a closure producing headers for each URL.
    pub fn function<F>(f: F) -> Self
    where
        F: Fn(&str) -> HeaderMap + Send + Sync + 'static,
    {
        Self::Function(Arc::new(f))
    }

    /// Headers this source contributes for `url`.
    #[must_use]
    pub fn resolve(&self, url: &str) -> HeaderMap {
        match self {
            Self::Static(map) => map.clone(),
            Self::Function(f) => f(url),
        }
    }
}

/// Every header layer of a pipeline except the per-call one.
#[derive(Debug, Clone)]
pub struct HeaderLayers {
    user_agent: String,
    defaults: HeaderMap,
    disable_compression: bool,
    generated: Option<HeaderSource>,
}

impl HeaderLayers {
    #[must_use]
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
            defaults: HeaderMap::new(),
            disable_compression: false,
            generated: None,
        }
    }

    #[must_use]
    pub fn with_defaults(mut self, defaults: HeaderMap) -> Self {
        self.defaults = defaults;
        self
    }

    #[must_use]
    pub fn with_disable_compression(mut self, disable: bool) -> Self {
        self.disable_compression = disable;
        self
    }

    /// Sets the per-URL layer. A `Static` source here behaves like extra
    /// defaults that override `Accept-Encoding`.
    #[must_use]
    pub fn with_source(mut self, source: HeaderSource) -> Self {
        self.generated = Some(source);
        self
    }

    #[must_use]
    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    #[must_use]
    pub fn disable_compression(&self) -> bool {
        self.disable_compression
    }

    /// Builds the final header map for a request to `url`.
    #[must_use]
    pub fn resolve(&self, url: &str, per_call: &HeaderMap) -> HeaderMap {
        let mut headers = HeaderMap::new();
        match HeaderValue::from_str(&self.user_agent) {
            Ok(value) => {
                headers.insert(USER_AGENT, value);
            }
            Err(_) => {
                warn!(user_agent = %self.user_agent, "user agent is not a valid header value");
            }
        }
        overlay(&mut headers, &self.defaults);
        if self.disable_compression {
            headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("text/*"));
        }
        if let Some(source) = &self.generated {
            overlay(&mut headers, &source.resolve(url));
        }
        overlay(&mut headers, per_call);
        headers
    }
}

/// Copies every header of `top` into `base`, replacing all existing values of
/// each name `top` carries.
pub fn overlay(base: &mut HeaderMap, top: &HeaderMap) {
    for name in top.keys() {
        base.remove(name);
        for value in top.get_all(name) {
            base.append(name.clone(), value.clone());
        }
    }
}

/// Converts a string map (as found in config files) to a header map, skipping
/// invalid names and values.
#[must_use]
pub fn header_map_from_pairs(pairs: &HashMap<String, String>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in pairs {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => warn!(header = %name, "skipping invalid header"),
        }
    }
    headers
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn map(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            headers.insert(*name, HeaderValue::from_static(*value));
        }
        headers
    }

    #[test]
    fn test_user_agent_only() {
        let headers = HeaderLayers::new("ua/1").resolve("http://x/", &HeaderMap::new());
        assert_eq!(headers.get(USER_AGENT).unwrap(), "ua/1");
        assert_eq!(headers.len(), 1);
    }

    #[test]
    fn test_precedence() {
        let layers = HeaderLayers::new("ua/1")
            .with_defaults(map(&[
                ("user-agent", "defaults"),
                ("x-a", "defaults"),
                ("x-b", "defaults"),
                ("x-c", "defaults"),
            ]))
            .with_disable_compression(true)
            .with_source(HeaderSource::function(|_| {
                map(&[("x-b", "function"), ("x-c", "function"), ("accept-encoding", "gzip")])
            }));

        let headers = layers.resolve("http://x/", &map(&[("x-c", "call")]));
        assert_eq!(headers.get(USER_AGENT).unwrap(), "defaults");
        assert_eq!(headers.get("x-a").unwrap(), "defaults");
        assert_eq!(headers.get("x-b").unwrap(), "function");
        assert_eq!(headers.get("x-c").unwrap(), "call");
        assert_eq!(headers.get(ACCEPT_ENCODING).unwrap(), "gzip");
    }

    #[test]
    fn test_disable_compression_overrides_defaults() {
        let layers = HeaderLayers::new("ua/1")
            .with_defaults(map(&[("accept-encoding", "gzip")]))
            .with_disable_compression(true);
        let headers = layers.resolve("http://x/", &HeaderMap::new());
        assert_eq!(headers.get(ACCEPT_ENCODING).unwrap(), "text/*");

        let headers = layers.resolve("http://x/", &map(&[("accept-encoding", "br")]));
        assert_eq!(headers.get(ACCEPT_ENCODING).unwrap(), "br");
    }

    #[test]
    fn test_function_receives_url() {
        let layers = HeaderLayers::new("ua/1").with_source(HeaderSource::function(|url| {
            let mut headers = HeaderMap::new();
            headers.insert("x-url", HeaderValue::from_str(url).unwrap());
            headers
        }));
        let headers = layers.resolve("http://example.com/a", &HeaderMap::new());
        assert_eq!(headers.get("x-url").unwrap(), "http://example.com/a");
    }

    #[test]
    fn test_overlay_replaces_all_values_of_a_name() {
        let mut base = HeaderMap::new();
        base.append("x-multi", HeaderValue::from_static("a"));
        base.append("x-multi", HeaderValue::from_static("b"));
        overlay(&mut base, &map(&[("x-multi", "c")]));
        let values: Vec<_> = base.get_all("x-multi").iter().collect();
        assert_eq!(values, ["c"]);
    }

    #[test]
    fn test_header_map_from_pairs_skips_invalid() {
        let mut pairs = HashMap::new();
        pairs.insert("X-Ok".to_string(), "yes".to_string());
        pairs.insert("bad header".to_string(), "no".to_string());
        let headers = header_map_from_pairs(&pairs);
        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get("x-ok").unwrap(), "yes");
    }

    #[test]
    fn test_static_source_debug() {
        let source = HeaderSource::Static(HeaderMap::new());
        assert_eq!(format!("{source:?}"), "Static({})");
        assert_eq!(
            format!("{:?}", HeaderSource::function(|_| HeaderMap::new())),
            "Function(..)"
        );
    }
}
