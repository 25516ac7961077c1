//! Shared User-Agent strings for API and download HTTP clients.
//!
//! Single source for the UA format so API traffic stays identifiable and
//! carries the operator contact email (good citizenship; RFC 9308).

/// Project URL for User-Agent identification (good citizenship; RFC 9308).
const PROJECT_UA_URL: &str = "https://github.com/fierce/scholarpipe";

/// Browser-class User-Agent used for PDF retrieval from bot-sensitive hosts.
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// Default User-Agent for scholarly API requests, including the contact email.
#[must_use]
pub fn api_user_agent(contact_email: &str) -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!(
        "scholarpipe/{version} (literature-curation; mailto:{contact_email}; +{PROJECT_UA_URL})"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_ua_contains_email_and_version() {
        let ua = api_user_agent("curator@example.org");
        assert!(ua.contains("mailto:curator@example.org"));
        assert!(ua.contains(PROJECT_UA_URL));
        assert!(
            ua.strip_prefix("scholarpipe/")
                .and_then(|s| s.split(' ').next())
                .is_some_and(|v| v == env!("CARGO_PKG_VERSION")),
            "UA must carry the crate version: {ua}"
        );
    }

    #[test]
    fn test_browser_ua_is_chrome_class() {
        assert!(BROWSER_USER_AGENT.contains("Chrome/"));
        assert!(BROWSER_USER_AGENT.starts_with("Mozilla/5.0"));
    }
}
