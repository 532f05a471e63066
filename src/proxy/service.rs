//! Client-facing proxy service
//!
//! `ShadowProxyService` turns inbound HTTP requests into [`ShadowRequest`]s,
//! hands them to the orchestrator and relays the authoritative response.
//!
//! ## Service Lifecycle
//!
//! ```rust,ignore
//! use shadow_proxy::proxy::{ShadowProxyService, ShadowConfig};
//!
//! let service = ShadowProxyService::new(config);
//! let router = service.into_router();
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//! axum::serve(listener, router).await?;
//! ```

use crate::infrastructure::metrics_sink::{InMemoryMetricsSink, MetricsSink};
use crate::proxy::backend_client::{BackendClient, HyperBackendClient};
use crate::proxy::error_response::{extract_request_id, ErrorResponseExt};
use crate::proxy::headers::{paths, strip_hop_by_hop, X_REQUEST_ID};
use crate::proxy::middleware_stack::ProxyMiddlewareStack;
use crate::proxy::orchestrator::ShadowOrchestrator;
use crate::proxy::types::*;
use axum::{
    body::Body,
    extract::{Request, State},
    response::{IntoResponse, Response},
    Json,
};
use http_body_util::BodyExt;
use std::sync::Arc;

/// Shadowing proxy: orchestrator plus the metrics it feeds
pub struct ShadowProxyService {
    orchestrator: ShadowOrchestrator,
    metrics: Arc<dyn MetricsSink>,
}

impl ShadowProxyService {
    /// Service backed by the hyper client and an in-memory metrics sink
    pub fn new(config: ShadowConfig) -> Self {
        let client = Arc::new(HyperBackendClient::new(config.max_response_size));
        let metrics: Arc<dyn MetricsSink> = Arc::new(InMemoryMetricsSink::new());
        Self::with_components(config, client, metrics)
    }

    pub fn with_components(
        config: ShadowConfig,
        client: Arc<dyn BackendClient>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        let orchestrator = ShadowOrchestrator::new(config, client, Arc::clone(&metrics));
        Self {
            orchestrator,
            metrics,
        }
    }

    pub fn orchestrator(&self) -> &ShadowOrchestrator {
        &self.orchestrator
    }

    pub fn metrics(&self) -> Arc<dyn MetricsSink> {
        Arc::clone(&self.metrics)
    }

    /// Create an Axum router for the proxy service with middleware
    pub fn into_router(self) -> axum::Router {
        let max_request_size = self.orchestrator.config().max_request_size;

        let router = axum::Router::new()
            .route(paths::HEALTH, axum::routing::get(health_handler))
            .route(paths::METRICS, axum::routing::get(metrics_handler))
            .fallback(shadow_handler)
            .with_state(Arc::new(self));

        ProxyMiddlewareStack::new(max_request_size).apply_to_router(router)
    }
}

/// Axum handler for every proxied request
async fn shadow_handler(
    State(service): State<Arc<ShadowProxyService>>,
    request: Request<Body>,
) -> Response {
    let request_id = extract_request_id(request.headers());

    match proxy(&service, request).await {
        Ok(response) => response,
        Err(e) => {
            let status = e.status_code();
            let mut body = e.to_error_response();
            if let Some(request_id) = request_id {
                body = body.with_request_id(request_id);
            }
            body.into_response_with_status(status)
        }
    }
}

async fn proxy(service: &ShadowProxyService, request: Request<Body>) -> ProxyResult<Response> {
    let max_request_size = service.orchestrator.config().max_request_size;
    let shadow_request = into_shadow_request(request, max_request_size).await?;

    // The shadow handle is dropped here; the branch keeps running detached
    let outcome = service.orchestrator.handle(shadow_request).await;

    let response = outcome.authoritative.into_result()?;
    Ok(relay(response))
}

async fn into_shadow_request(
    request: Request<Body>,
    max_request_size: RequestSizeLimit,
) -> ProxyResult<ShadowRequest> {
    let (parts, body) = request.into_parts();

    let body = http_body_util::Limited::new(body, *max_request_size.as_ref())
        .collect()
        .await
        .map_err(|e| {
            if e.is::<http_body_util::LengthLimitError>() {
                ProxyError::RequestTooLarge {
                    max_size: max_request_size,
                }
            } else {
                ProxyError::Internal(format!("Body collection error: {e}"))
            }
        })?
        .to_bytes();

    let request_id = parts
        .headers
        .get(X_REQUEST_ID)
        .and_then(|h| h.to_str().ok())
        .and_then(RequestId::parse)
        .unwrap_or_default();
    let mut shadow_request = ShadowRequest::new(parts.method, parts.uri.path())
        .with_request_id(request_id)
        .with_headers(parts.headers)
        .with_body(body);
    if let Some(query) = parts.uri.query() {
        shadow_request = shadow_request.with_query(query);
    }
    Ok(shadow_request)
}

fn relay(response: BackendResponse) -> Response {
    let mut headers = response.headers;
    strip_hop_by_hop(&mut headers);

    let mut relayed = Response::new(Body::from(response.body));
    *relayed.status_mut() = response.status;
    *relayed.headers_mut() = headers;
    relayed
}

/// Health check handler
async fn health_handler() -> &'static str {
    "OK"
}

/// Current shadow comparison aggregates
async fn metrics_handler(State(service): State<Arc<ShadowProxyService>>) -> impl IntoResponse {
    Json(service.metrics.snapshot())
}
