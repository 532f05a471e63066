//! HTTP header constants and the forwarding whitelist
//!
//! Both backends must see exactly the same header set or the comparison
//! is meaningless, so every outbound call goes through [`HeaderFilter`].

use http::{HeaderMap, HeaderName};
use std::collections::HashSet;

/// Header name for request ID used for tracing and correlation
pub const X_REQUEST_ID: &str = "x-request-id";

/// Headers that describe a single connection and are never relayed
pub const HOP_BY_HOP: [&str; 4] = ["connection", "keep-alive", "transfer-encoding", "upgrade"];

/// Well-known paths served by the proxy itself
pub mod paths {
    /// Health check endpoint path
    pub const HEALTH: &str = "/health";

    /// Metrics snapshot endpoint path
    pub const METRICS: &str = "/metrics";
}

/// Retains only whitelisted headers; names match case-insensitively
#[derive(Clone, Debug)]
pub struct HeaderFilter {
    allowed: HashSet<HeaderName>,
}

impl HeaderFilter {
    /// `HeaderName` is normalised to lowercase, which gives case-insensitive matching.
    pub fn new(allowed: impl IntoIterator<Item = HeaderName>) -> Self {
        Self {
            allowed: allowed.into_iter().collect(),
        }
    }

    pub fn allows(&self, name: &HeaderName) -> bool {
        self.allowed.contains(name)
    }

    /// Copy of `headers` reduced to the whitelist, values and repeats untouched
    pub fn sanitize(&self, headers: &HeaderMap) -> HeaderMap {
        let mut sanitized = HeaderMap::with_capacity(self.allowed.len());
        for (name, value) in headers {
            if self.allows(name) {
                sanitized.append(name.clone(), value.clone());
            }
        }
        sanitized
    }
}

/// Drop connection-scoped headers before relaying a backend response
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn filter() -> HeaderFilter {
        HeaderFilter::new([
            HeaderName::from_static("authorization"),
            HeaderName::from_static("accept"),
        ])
    }

    #[test]
    fn test_sanitize_keeps_only_whitelisted() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer abc"));
        headers.insert("accept", HeaderValue::from_static("application/json"));
        headers.insert("cookie", HeaderValue::from_static("session=1"));
        headers.insert("x-forwarded-for", HeaderValue::from_static("10.0.0.1"));

        let sanitized = filter().sanitize(&headers);

        assert_eq!(sanitized.len(), 2);
        assert_eq!(sanitized["authorization"], "Bearer abc");
        assert_eq!(sanitized["accept"], "application/json");
        assert!(!sanitized.contains_key("cookie"));
    }

    #[test]
    fn test_whitelist_is_case_insensitive() {
        let name = HeaderName::from_bytes(b"Authorization").unwrap();
        let filter = HeaderFilter::new([name]);

        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_bytes(b"AUTHORIZATION").unwrap(),
            HeaderValue::from_static("Bearer xyz"),
        );

        let sanitized = filter.sanitize(&headers);
        assert_eq!(sanitized["authorization"], "Bearer xyz");
    }

    #[test]
    fn test_sanitize_preserves_repeated_values() {
        let mut headers = HeaderMap::new();
        headers.append("accept", HeaderValue::from_static("text/html"));
        headers.append("accept", HeaderValue::from_static("application/json"));

        let sanitized = filter().sanitize(&headers);
        let values: Vec<_> = sanitized.get_all("accept").iter().collect();
        assert_eq!(values, vec!["text/html", "application/json"]);
    }

    #[test]
    fn test_sanitize_is_deterministic_for_both_backends() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer abc"));
        headers.insert("host", HeaderValue::from_static("legacy.internal"));

        let filter = filter();
        assert_eq!(filter.sanitize(&headers), filter.sanitize(&headers));
    }

    #[test]
    fn test_strip_hop_by_hop() {
        let mut headers = HeaderMap::new();
        headers.insert("connection", HeaderValue::from_static("keep-alive"));
        headers.insert("transfer-encoding", HeaderValue::from_static("chunked"));
        headers.insert("content-type", HeaderValue::from_static("application/json"));

        strip_hop_by_hop(&mut headers);

        assert_eq!(headers.len(), 1);
        assert!(headers.contains_key("content-type"));
    }

    #[test]
    fn test_header_constants() {
        assert!(X_REQUEST_ID.starts_with("x-"));
        assert!(paths::HEALTH.starts_with('/'));
        assert!(paths::METRICS.starts_with('/'));
    }
}
