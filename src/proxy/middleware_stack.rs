//! Middleware stack builder for clean composition

use crate::proxy::middleware::*;
use crate::proxy::types::RequestSizeLimit;
use axum::{middleware::from_fn, Router};
use tower_http::limit::RequestBodyLimitLayer;

/// Builder for composing the proxy middleware stack
pub struct ProxyMiddlewareStack {
    max_request_size: RequestSizeLimit,
}

impl ProxyMiddlewareStack {
    pub fn new(max_request_size: RequestSizeLimit) -> Self {
        Self { max_request_size }
    }

    /// Apply the complete middleware stack to a router
    ///
    /// Outer to inner:
    /// 1. Request ID generation/propagation
    /// 2. Logging (with request ID)
    /// 3. Error handling
    /// 4. Request body limit
    pub fn apply_to_router<S>(self, router: Router<S>) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        router
            .layer(RequestBodyLimitLayer::new(*self.max_request_size.as_ref()))
            .layer(from_fn(error_handling_middleware))
            .layer(from_fn(logging_middleware))
            .layer(from_fn(request_id_middleware))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::headers::X_REQUEST_ID;
    use axum::{body::Body, extract::Request, http::StatusCode};
    use tower::ServiceExt;

    fn router() -> Router {
        let base = Router::new().fallback(|body: axum::body::Bytes| async move {
            (StatusCode::OK, format!("{} bytes", body.len()))
        });
        ProxyMiddlewareStack::new(RequestSizeLimit::try_new(16).unwrap()).apply_to_router(base)
    }

    #[tokio::test]
    async fn test_stack_adds_request_id() {
        let response = router()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key(X_REQUEST_ID));
    }

    #[tokio::test]
    async fn test_stack_rejects_oversized_body() {
        let response = router()
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/")
                    .body(Body::from("x".repeat(64)))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert!(response.headers().contains_key(X_REQUEST_ID));
    }
}
