//! Target URL resolution and query handling for backend calls

use crate::proxy::types::*;
use hyper::Uri;

/// Strategy for composing backend URIs from a base URL and a request snapshot
pub struct UrlResolver;

impl UrlResolver {
    /// Resolve the outbound URI: base URL, then the request path, then the
    /// raw query untouched.
    pub fn resolve_target_uri(
        base_url: &TargetUrl,
        path: &str,
        query: Option<&str>,
    ) -> ProxyResult<Uri> {
        let query = query.unwrap_or_default();
        let mut uri = String::with_capacity(base_url.as_ref().len() + path.len() + query.len() + 1);
        uri.push_str(base_url.as_ref().trim_end_matches('/'));

        if !path.starts_with('/') {
            uri.push('/');
        }
        uri.push_str(path);

        if !query.is_empty() {
            uri.push('?');
            uri.push_str(query);
        }

        uri.parse()
            .map_err(|_| ProxyError::InvalidTargetUrl(uri.clone()))
    }

    /// Decode a raw query string into ordered pairs; `+` is a space
    pub fn parse_query(raw: &str) -> Vec<(String, String)> {
        raw.split('&')
            .filter(|pair| !pair.is_empty())
            .map(|pair| {
                let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
                (Self::decode_component(key), Self::decode_component(value))
            })
            .collect()
    }

    pub fn encode_query(query: &[(String, String)]) -> String {
        query
            .iter()
            .map(|(key, value)| {
                format!(
                    "{}={}",
                    urlencoding::encode(key),
                    urlencoding::encode(value)
                )
            })
            .collect::<Vec<_>>()
            .join("&")
    }

    fn decode_component(component: &str) -> String {
        let spaced = component.replace('+', " ");
        urlencoding::decode(&spaced)
            .map(|decoded| decoded.into_owned())
            .unwrap_or(spaced)
    }
}
