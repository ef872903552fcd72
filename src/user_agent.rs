//! Default User-Agent string for scraper traffic.
//!
//! Single source for the UA format so robots.txt checks and outgoing requests
//! identify the same agent.

/// Project URL for User-Agent identification (good citizenship; RFC 9308).
const PROJECT_UA_URL: &str = "https://github.com/jamesturk/scrapelib";

/// Default User-Agent for scraper requests (identifies the tool).
#[must_use]
pub fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("scrapelib/{version} (+{PROJECT_UA_URL})")
}

/// Returns the product token of a User-Agent (the text before the first `/`),
/// lowercased, as used for robots.txt group matching.
#[must_use]
pub(crate) fn product_token(user_agent: &str) -> String {
    user_agent
        .split('/')
        .next()
        .unwrap_or_default()
        .trim()
        .to_lowercase()
}
