//! Type definitions for the proxy module

use crate::proxy::url_resolver::UrlResolver;
use bytes::Bytes;
use http::{HeaderMap, HeaderName, Method, StatusCode};
use nutype::nutype;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

// ========== Size and Capacity Types ==========

/// Maximum size for inbound request bodies in bytes
#[nutype(
    derive(Clone, Copy, Debug, Display, PartialEq, Deserialize, Serialize, TryFrom, AsRef),
    validate(predicate = |size: &usize| *size > 0)
)]
pub struct RequestSizeLimit(usize);

/// Maximum size for backend response bodies in bytes
#[nutype(
    derive(Clone, Copy, Debug, Display, PartialEq, Deserialize, Serialize, TryFrom, AsRef),
    validate(predicate = |size: &usize| *size > 0)
)]
pub struct ResponseSizeLimit(usize);

/// Upper bound on concurrently running candidate calls
#[nutype(
    derive(Clone, Copy, Debug, Display, PartialEq, Deserialize, Serialize, TryFrom, AsRef),
    validate(predicate = |count: &usize| *count > 0)
)]
pub struct MaxInFlightShadows(usize);

// ========== Sampling Types ==========

/// Fraction of eligible requests that are shadowed (0.0 to 1.0)
#[nutype(
    validate(finite, greater_or_equal = 0.0, less_or_equal = 1.0),
    derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)
)]
pub struct SampleRate(f64);

impl SampleRate {
    /// Never shadow
    pub fn never() -> Self {
        Self::try_new(0.0).expect("0.0 is a valid sample rate")
    }

    /// Shadow every eligible request
    pub fn always() -> Self {
        Self::try_new(1.0).expect("1.0 is a valid sample rate")
    }
}

// ========== Identity Types ==========

/// Request ID for correlating the authoritative call with its shadow
#[nutype(derive(
    Clone,
    Copy,
    Debug,
    Display,
    PartialEq,
    Eq,
    Hash,
    Deserialize,
    Serialize,
    From,
    AsRef
))]
pub struct RequestId(Uuid);

impl RequestId {
    /// Fresh v7 RequestId; `RequestId::new(uuid)` wraps an existing one
    pub fn generate() -> Self {
        Self::new(Uuid::now_v7())
    }

    /// Parse a request ID propagated by an upstream hop
    pub fn parse(value: &str) -> Option<Self> {
        Uuid::parse_str(value).ok().map(Self::from)
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::generate()
    }
}

/// Base URL of a backend (authoritative or candidate)
#[nutype(
    derive(Clone, Debug, Display, PartialEq, Deserialize, Serialize, TryFrom, AsRef),
    validate(predicate = |s: &str| s.starts_with("http://") || s.starts_with("https://"))
)]
pub struct TargetUrl(String);

// ========== Request / Outcome Types ==========

/// Immutable snapshot of one inbound request
///
/// Both the authoritative call and the shadow branch read the same snapshot;
/// headers have already been reduced by the header filter when the
/// orchestrator shares it.
#[derive(Clone, Debug)]
pub struct ShadowRequest {
    pub request_id: RequestId,
    pub method: Method,
    pub path: String,
    /// Raw query string exactly as the client sent it, without the `?`
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ShadowRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            request_id: RequestId::generate(),
            method,
            path: path.into(),
            query: None,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn with_request_id(mut self, request_id: RequestId) -> Self {
        self.request_id = request_id;
        self
    }

    /// Raw query, forwarded to both backends byte for byte
    pub fn with_query(mut self, raw: impl Into<String>) -> Self {
        self.query = Some(raw.into()).filter(|raw| !raw.is_empty());
        self
    }

    /// Query built from ordered pairs, percent-encoded
    pub fn with_query_pairs(self, pairs: &[(String, String)]) -> Self {
        self.with_query(UrlResolver::encode_query(pairs))
    }

    /// Decoded view of the raw query; keys may repeat
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        self.query
            .as_deref()
            .map(UrlResolver::parse_query)
            .unwrap_or_default()
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Key used to group measurements, e.g. `GET /api/documents`
    pub fn endpoint(&self) -> String {
        format!("{} {}", self.method, self.path)
    }
}

/// Successful response from a backend
#[derive(Clone, Debug)]
pub struct BackendResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub elapsed: Duration,
}

/// Coarse classification of a failed backend call
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    Timeout,
    ConnectionError,
    ProtocolError,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::ConnectionError => "connection-error",
            Self::ProtocolError => "protocol-error",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failed backend call
#[derive(Clone, Debug, Error)]
#[error("{kind}: {message}")]
pub struct BackendFailure {
    pub kind: FailureKind,
    pub message: String,
    pub elapsed: Duration,
}

impl BackendFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            kind,
            message: message.into(),
            elapsed,
        }
    }

    pub fn timeout(limit: Duration, elapsed: Duration) -> Self {
        Self::new(
            FailureKind::Timeout,
            format!("no response within {limit:?}"),
            elapsed,
        )
    }
}

/// Result of one backend call; never an `Err` past the client boundary
#[derive(Clone, Debug)]
pub enum BackendOutcome {
    Response(BackendResponse),
    Failure(BackendFailure),
}

impl BackendOutcome {
    pub fn elapsed(&self) -> Duration {
        match self {
            Self::Response(response) => response.elapsed,
            Self::Failure(failure) => failure.elapsed,
        }
    }

    pub fn is_response(&self) -> bool {
        matches!(self, Self::Response(_))
    }

    pub fn into_result(self) -> Result<BackendResponse, BackendFailure> {
        match self {
            Self::Response(response) => Ok(response),
            Self::Failure(failure) => Err(failure),
        }
    }
}

// ========== Configuration ==========

/// Default methods that are never shadowed because they mutate state
pub const DEFAULT_EXCLUDED_METHODS: [&str; 4] = ["POST", "PUT", "PATCH", "DELETE"];

/// Default header names forwarded to both backends
pub const DEFAULT_HEADER_WHITELIST: [&str; 6] = [
    "authorization",
    "content-type",
    "accept",
    "user-agent",
    "accept-language",
    "x-request-id",
];

/// Immutable shadowing configuration, built once at startup
#[derive(Clone, Debug)]
pub struct ShadowConfig {
    pub authoritative_url: TargetUrl,
    pub candidate_url: TargetUrl,
    pub sample_rate: SampleRate,
    /// Hard bound on every candidate call
    pub candidate_timeout: Duration,
    /// Deadline for the authoritative call, owned by the caller
    pub request_timeout: Duration,
    pub excluded_methods: HashSet<Method>,
    pub header_whitelist: HashSet<HeaderName>,
    pub max_in_flight_shadows: MaxInFlightShadows,
    pub max_request_size: RequestSizeLimit,
    pub max_response_size: ResponseSizeLimit,
}

impl ShadowConfig {
    pub fn new(authoritative_url: TargetUrl, candidate_url: TargetUrl) -> Self {
        Self {
            authoritative_url,
            candidate_url,
            sample_rate: SampleRate::try_new(0.1).expect("0.1 is a valid sample rate"),
            candidate_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
            excluded_methods: DEFAULT_EXCLUDED_METHODS
                .iter()
                .map(|m| Method::from_bytes(m.as_bytes()).expect("standard method is valid"))
                .collect(),
            header_whitelist: DEFAULT_HEADER_WHITELIST
                .iter()
                .copied()
                .map(HeaderName::from_static)
                .collect(),
            max_in_flight_shadows: MaxInFlightShadows::try_new(64).expect("64 is valid"),
            max_request_size: RequestSizeLimit::try_new(10 * 1024 * 1024).expect("10MB is valid"),
            max_response_size: ResponseSizeLimit::try_new(10 * 1024 * 1024)
                .expect("10MB is valid"),
        }
    }

    pub fn with_sample_rate(mut self, sample_rate: SampleRate) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    pub fn with_candidate_timeout(mut self, timeout: Duration) -> Self {
        self.candidate_timeout = timeout;
        self
    }

    pub fn with_max_in_flight_shadows(mut self, max: MaxInFlightShadows) -> Self {
        self.max_in_flight_shadows = max;
        self
    }
}

// ========== Errors ==========

/// Errors that reach the client-facing path
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("Request too large (max: {max_size} bytes)")]
    RequestTooLarge { max_size: RequestSizeLimit },

    #[error("Authoritative backend failed: {0}")]
    Authoritative(#[from] BackendFailure),

    #[error("Invalid target URL: {0}")]
    InvalidTargetUrl(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for proxy operations
pub type ProxyResult<T> = Result<T, ProxyError>;
