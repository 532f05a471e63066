//! Outbound calls to the authoritative and candidate backends
//!
//! Every failure is folded into [`BackendOutcome::Failure`]; nothing is
//! returned as an error past this boundary.

use crate::proxy::types::*;
use crate::proxy::url_resolver::UrlResolver;
use async_trait::async_trait;
use axum::body::Body;
use bytes::Bytes;
use http_body_util::BodyExt;
use hyper::Request;
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;
use std::time::{Duration, Instant};
use tracing::debug;

/// Capability to issue one call against a backend
#[async_trait]
pub trait BackendClient: Send + Sync {
    /// Reproduce `request` against `base_url`, giving up after `timeout`
    async fn call(
        &self,
        base_url: &TargetUrl,
        request: &ShadowRequest,
        timeout: Duration,
    ) -> BackendOutcome;
}

/// hyper-based client shared by both backends
#[derive(Clone)]
pub struct HyperBackendClient {
    client: Client<HttpConnector, Body>,
    max_response_size: ResponseSizeLimit,
}

impl HyperBackendClient {
    pub fn new(max_response_size: ResponseSizeLimit) -> Self {
        let client = Client::builder(TokioExecutor::new())
            .http1_title_case_headers(true)
            .http1_preserve_header_case(true)
            .build_http();

        Self {
            client,
            max_response_size,
        }
    }

    fn build_request(
        &self,
        base_url: &TargetUrl,
        request: &ShadowRequest,
    ) -> ProxyResult<Request<Body>> {
        let uri =
            UrlResolver::resolve_target_uri(base_url, &request.path, request.query.as_deref())?;

        let mut outgoing = Request::new(Body::from(request.body.clone()));
        *outgoing.method_mut() = request.method.clone();
        *outgoing.uri_mut() = uri;
        *outgoing.headers_mut() = request.headers.clone();
        Ok(outgoing)
    }

    async fn send(
        &self,
        outgoing: Request<Body>,
    ) -> Result<(http::response::Parts, Bytes), (FailureKind, String)> {
        let response = self.client.request(outgoing).await.map_err(|e| {
            let kind = if e.is_connect() {
                FailureKind::ConnectionError
            } else {
                FailureKind::ProtocolError
            };
            let prefix = match kind {
                FailureKind::ConnectionError => "Connection error",
                _ => "Protocol error",
            };
            (kind, format!("{prefix}: {e}"))
        })?;

        let (parts, body) = response.into_parts();
        let limit = *self.max_response_size.as_ref();
        let collected = http_body_util::Limited::new(body, limit)
            .collect()
            .await
            .map_err(|e| {
                if e.is::<http_body_util::LengthLimitError>() {
                    (
                        FailureKind::ProtocolError,
                        format!("Response body exceeds {limit} bytes"),
                    )
                } else {
                    (
                        FailureKind::ProtocolError,
                        format!("Body collection error: {e}"),
                    )
                }
            })?;

        Ok((parts, collected.to_bytes()))
    }
}

#[async_trait]
impl BackendClient for HyperBackendClient {
    async fn call(
        &self,
        base_url: &TargetUrl,
        request: &ShadowRequest,
        timeout: Duration,
    ) -> BackendOutcome {
        let start = Instant::now();

        let outgoing = match self.build_request(base_url, request) {
            Ok(outgoing) => outgoing,
            Err(e) => {
                return BackendOutcome::Failure(BackendFailure::new(
                    FailureKind::ProtocolError,
                    e.to_string(),
                    start.elapsed(),
                ))
            }
        };

        let outcome = match tokio::time::timeout(timeout, self.send(outgoing)).await {
            Ok(Ok((parts, body))) => BackendOutcome::Response(BackendResponse {
                status: parts.status,
                headers: parts.headers,
                body,
                elapsed: start.elapsed(),
            }),
            Ok(Err((kind, message))) => {
                BackendOutcome::Failure(BackendFailure::new(kind, message, start.elapsed()))
            }
            Err(_) => BackendOutcome::Failure(BackendFailure::timeout(timeout, start.elapsed())),
        };

        debug!(
            request_id = %request.request_id,
            backend = %base_url,
            elapsed_ms = outcome.elapsed().as_millis() as u64,
            ok = outcome.is_response(),
            "Backend call finished"
        );

        outcome
    }
}
