//! robots.txt fetching, parsing and per-origin memoization.
//!
//! Rules are fetched once per `scheme://host[:port]/robots.txt` and kept for
//! the lifetime of the checker. Group selection follows the usual crawler
//! convention: the first group whose agent token appears in the caller's
//! product token, otherwise the `*` group.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use regex::Regex;
use reqwest::Method;
use reqwest::header::{HeaderValue, USER_AGENT};
use tokio::sync::OnceCell;
use tracing::{debug, instrument};
use url::Url;

use crate::transport::{Transport, TransportError, TransportRequest};
use crate::user_agent::product_token;

/// Errors fetching robots.txt. Nothing is memoized when one occurs.
#[derive(Debug, thiserror::Error)]
pub enum RobotsError {
    #[error("failed to fetch {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: TransportError,
    },

    #[error("{url} returned status {status}")]
    Status { url: String, status: u16 },

    #[error("cannot derive robots.txt location from {0}")]
    InvalidUrl(String),
}

/// A single `Allow` / `Disallow` line.
#[derive(Debug, Clone)]
struct Rule {
    pattern: String,
    matcher: Regex,
    allow: bool,
}

impl Rule {
    fn new(pattern: &str, allow: bool) -> Option<Self> {
        let (body, anchored) = match pattern.strip_suffix('$') {
            Some(body) => (body, true),
            None => (pattern, false),
        };
        let mut source = String::from("^");
        source.push_str(
            &body
                .split('*')
                .map(regex::escape)
                .collect::<Vec<_>>()
                .join(".*"),
        );
        if anchored {
            source.push('$');
        }
        Some(Self {
            pattern: pattern.to_string(),
            matcher: Regex::new(&source).ok()?,
            allow,
        })
    }
}

/// One `User-agent` group and its rules.
#[derive(Debug, Clone, Default)]
pub struct RobotsGroup {
    agents: Vec<String>,
    rules: Vec<Rule>,
}

/// Parsed robots.txt policy for one origin.
#[derive(Debug, Clone)]
pub enum RobotsRuleSet {
    /// Every path is allowed (missing robots.txt).
    AllowAll,
    /// Every path is denied (robots.txt behind 401/403).
    DenyAll,
    /// Rules parsed from a robots.txt body.
    Parsed(Vec<RobotsGroup>),
}

impl RobotsRuleSet {
    /// Parses a robots.txt body.
    #[must_use]
    pub fn parse(body: &str) -> Self {
        let mut groups: Vec<RobotsGroup> = Vec::new();
        let mut current: Option<RobotsGroup> = None;
        let mut seen_rule = false;

        for raw in body.lines() {
            let line = raw.split('#').next().unwrap_or_default().trim();
            if line.is_empty() {
                if seen_rule && let Some(group) = current.take() {
                    groups.push(group);
                    seen_rule = false;
                }
                continue;
            }
            let Some((field, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();

            match field.trim().to_ascii_lowercase().as_str() {
                "user-agent" => {
                    if seen_rule && let Some(group) = current.take() {
                        groups.push(group);
                    }
                    seen_rule = false;
                    current
                        .get_or_insert_with(RobotsGroup::default)
                        .agents
                        .push(value.to_lowercase());
                }
                directive @ ("allow" | "disallow") => {
                    let Some(group) = current.as_mut() else {
                        continue;
                    };
                    seen_rule = true;
                    if value.is_empty() {
                        continue;
                    }
                    if let Some(rule) = Rule::new(value, directive == "allow") {
                        group.rules.push(rule);
                    }
                }
                _ => {}
            }
        }
        if let Some(group) = current {
            groups.push(group);
        }
        Self::Parsed(groups)
    }

    /// Whether `user_agent` may fetch `url`.
    #[must_use]
    pub fn is_allowed(&self, user_agent: &str, url: &Url) -> bool {
        let groups = match self {
            Self::AllowAll => return true,
            Self::DenyAll => return false,
            Self::Parsed(groups) => groups,
        };

        let token = product_token(user_agent);
        let group = groups
            .iter()
            .find(|g| {
                g.agents
                    .iter()
                    .any(|a| a != "*" && !a.is_empty() && token.contains(a.as_str()))
            })
            .or_else(|| groups.iter().find(|g| g.agents.iter().any(|a| a == "*")));
        let Some(group) = group else {
            return true;
        };

        let target = match url.query() {
            Some(query) => format!("{}?{query}", url.path()),
            None => url.path().to_string(),
        };

        group
            .rules
            .iter()
            .filter(|rule| rule.matcher.is_match(&target))
            .max_by(|a, b| {
                a.pattern
                    .len()
                    .cmp(&b.pattern.len())
                    .then(a.allow.cmp(&b.allow))
            })
            .is_none_or(|rule| rule.allow)
    }
}

/// Fetches and memoizes robots.txt rules per origin.
#[derive(Debug)]
pub struct RobotsChecker {
    transport: Arc<dyn Transport>,
    timeout: Option<Duration>,
    rules: DashMap<String, Arc<OnceCell<Arc<RobotsRuleSet>>>>,
}

impl RobotsChecker {
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, timeout: Option<Duration>) -> Self {
        Self {
            transport,
            timeout,
            rules: DashMap::new(),
        }
    }

    /// Whether `user_agent` may fetch `url`.
    ///
    /// The first query for an origin fetches its robots.txt; concurrent first
    /// queries share a single fetch.
    ///
    /// # Errors
    ///
    /// Returns `RobotsError` when robots.txt cannot be fetched or the server
    /// answers with a 5xx status. A later call retries the fetch.
    #[instrument(skip(self, url), fields(url = %url))]
    pub async fn allowed(&self, user_agent: &str, url: &Url) -> Result<bool, RobotsError> {
        let robots_url = robots_url(url)?;

        // Clone the Arc so no DashMap shard lock is held across the await.
        let cell = self
            .rules
            .entry(robots_url.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let rules = cell
            .get_or_try_init(|| self.fetch(&robots_url, user_agent))
            .await?;

        let allowed = rules.is_allowed(user_agent, url);
        if !allowed {
            debug!(user_agent, "robots.txt disallows url");
        }
        Ok(allowed)
    }

    /// Number of origins with memoized rules.
    #[must_use]
    pub fn memoized_origins(&self) -> usize {
        self.rules.iter().filter(|e| e.value().initialized()).count()
    }

    async fn fetch(
        &self,
        robots_url: &str,
        user_agent: &str,
    ) -> Result<Arc<RobotsRuleSet>, RobotsError> {
        debug!(robots_url, "fetching robots.txt");
        let mut request = TransportRequest::new(Method::GET, robots_url);
        request.timeout = self.timeout;
        if let Ok(value) = HeaderValue::from_str(user_agent) {
            request.headers.insert(USER_AGENT, value);
        }

        let response = self
            .transport
            .send(&request)
            .await
            .map_err(|source| RobotsError::Fetch {
                url: robots_url.to_string(),
                source,
            })?;

        let rules = match response.status() {
            200..=299 => RobotsRuleSet::parse(&response.text()),
            401 | 403 => RobotsRuleSet::DenyAll,
            400..=499 => RobotsRuleSet::AllowAll,
            status => {
                return Err(RobotsError::Status {
                    url: robots_url.to_string(),
                    status,
                });
            }
        };
        Ok(Arc::new(rules))
    }
}

/// Location of the robots.txt governing `url`.
fn robots_url(url: &Url) -> Result<String, RobotsError> {
    if url.host_str().is_none() {
        return Err(RobotsError::InvalidUrl(url.to_string()));
    }
    url.join("/robots.txt")
        .map(String::from)
        .map_err(|_| RobotsError::InvalidUrl(url.to_string()))
}
