//! Test utilities for proxy module testing
//!
//! Real axum backends on ephemeral ports, plus helpers for waiting on the
//! detached shadow branch.

pub mod test_helpers {
    use crate::infrastructure::metrics_sink::{MetricsSink, MetricsSnapshot};
    use crate::proxy::types::*;
    use axum::{extract::Request, http::StatusCode};
    use http::{header::CONTENT_TYPE, HeaderMap};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};
    use tokio::net::TcpListener;

    /// A running mock backend and what it has observed
    pub struct MockBackend {
        pub url: TargetUrl,
        hits: Arc<AtomicUsize>,
        seen_headers: Arc<Mutex<Vec<HeaderMap>>>,
        seen_queries: Arc<Mutex<Vec<Option<String>>>>,
    }

    impl MockBackend {
        pub fn hits(&self) -> usize {
            self.hits.load(Ordering::SeqCst)
        }

        pub fn seen_headers(&self) -> Vec<HeaderMap> {
            self.seen_headers.lock().clone()
        }

        /// Raw query of every request received, in arrival order
        pub fn seen_queries(&self) -> Vec<Option<String>> {
            self.seen_queries.lock().clone()
        }
    }

    /// Backend answering every request with `status` and a JSON `body` after `delay`
    pub async fn spawn_backend(
        status: StatusCode,
        body: &'static str,
        delay: Duration,
    ) -> MockBackend {
        let hits = Arc::new(AtomicUsize::new(0));
        let seen_headers = Arc::new(Mutex::new(Vec::new()));
        let seen_queries = Arc::new(Mutex::new(Vec::new()));

        let app = {
            let hits = Arc::clone(&hits);
            let seen_headers = Arc::clone(&seen_headers);
            let seen_queries = Arc::clone(&seen_queries);
            axum::Router::new().fallback(move |request: Request| {
                let hits = Arc::clone(&hits);
                let seen_headers = Arc::clone(&seen_headers);
                let seen_queries = Arc::clone(&seen_queries);
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    seen_headers.lock().push(request.headers().clone());
                    seen_queries
                        .lock()
                        .push(request.uri().query().map(str::to_string));
                    tokio::time::sleep(delay).await;
                    (status, [(CONTENT_TYPE, "application/json")], body)
                }
            })
        };

        let url = serve(app).await;
        MockBackend {
            url,
            hits,
            seen_headers,
            seen_queries,
        }
    }

    /// Backend that accepts connections and never answers
    pub async fn spawn_hung_backend() -> TargetUrl {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test listener");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });
        TargetUrl::try_new(format!("http://{addr}")).expect("valid url")
    }

    /// URL of a port nothing listens on
    pub async fn unreachable_url() -> TargetUrl {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test listener");
        let addr = listener.local_addr().expect("local addr");
        drop(listener);
        TargetUrl::try_new(format!("http://{addr}")).expect("valid url")
    }

    async fn serve(app: axum::Router) -> TargetUrl {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test listener");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("mock backend");
        });
        TargetUrl::try_new(format!("http://{addr}")).expect("valid url")
    }

    /// Shadow config with a short candidate timeout and every GET sampled
    pub fn test_shadow_config(authoritative: &TargetUrl, candidate: &TargetUrl) -> ShadowConfig {
        ShadowConfig::new(authoritative.clone(), candidate.clone())
            .with_sample_rate(SampleRate::always())
            .with_candidate_timeout(Duration::from_millis(500))
    }

    /// Poll the sink until `predicate` holds or `limit` elapses
    pub async fn wait_for_metrics(
        metrics: &dyn MetricsSink,
        limit: Duration,
        predicate: impl Fn(&MetricsSnapshot) -> bool,
    ) -> MetricsSnapshot {
        let start = Instant::now();
        loop {
            let snapshot = metrics.snapshot();
            if predicate(&snapshot) || start.elapsed() > limit {
                return snapshot;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}
