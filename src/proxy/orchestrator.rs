//! Shadow orchestration: authoritative call on the request path, candidate
//! call, diff and recording on a detached task.
//!
//! ```text
//! Received -> AuthoritativeInFlight -> Responded            (client sees this)
//!          \-> NotSampled | ShadowInFlight -> Compared -> Recorded
//! ```
//!
//! The caller only ever waits for the authoritative call. The shadow branch
//! runs on its own task, holds one permit from a bounded semaphore, and
//! contains every failure it meets: candidate errors become mismatching
//! results, metrics errors and panics become log events.

use crate::domain::comparison::ResponseDiffer;
use crate::domain::shadow_result::ShadowTestResult;
use crate::infrastructure::metrics_sink::{InMemoryMetricsSink, MetricsSink};
use crate::proxy::backend_client::BackendClient;
use crate::proxy::headers::HeaderFilter;
use crate::proxy::sampler::{Sampler, SamplingDecision};
use crate::proxy::types::*;
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Log target for comparison events
pub const SHADOW_LOG_TARGET: &str = "shadow_proxy::shadow";

/// What happened to the shadow branch of a request
#[derive(Debug)]
pub enum ShadowDisposition {
    NotSampled(SamplingDecision),
    /// Nothing to compare against
    SkippedAuthoritativeFailed,
    /// Sampled, but no shadow slot was free
    Dropped,
    Dispatched(ShadowHandle),
}

impl ShadowDisposition {
    pub fn is_dispatched(&self) -> bool {
        matches!(self, Self::Dispatched(_))
    }

    pub fn into_handle(self) -> Option<ShadowHandle> {
        match self {
            Self::Dispatched(handle) => Some(handle),
            _ => None,
        }
    }
}

/// Handle to a detached shadow task
///
/// Dropping it does not cancel the task.
#[derive(Debug)]
pub struct ShadowHandle(JoinHandle<Option<ShadowTestResult>>);

impl ShadowHandle {
    /// Wait for the shadow branch; `None` if the task was cancelled or
    /// panicked after its result was recorded
    pub async fn completion(self) -> Option<ShadowTestResult> {
        self.0.await.ok().flatten()
    }
}

/// Authoritative outcome plus the fate of the shadow branch
#[derive(Debug)]
pub struct ShadowOutcome {
    pub authoritative: BackendOutcome,
    pub disposition: ShadowDisposition,
}

pub struct ShadowOrchestrator {
    config: Arc<ShadowConfig>,
    sampler: Sampler,
    header_filter: HeaderFilter,
    client: Arc<dyn BackendClient>,
    metrics: Arc<dyn MetricsSink>,
    shadow_slots: Arc<Semaphore>,
}

impl ShadowOrchestrator {
    pub fn new(
        config: ShadowConfig,
        client: Arc<dyn BackendClient>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        let sampler = Sampler::new(config.sample_rate, config.excluded_methods.clone());
        let header_filter = HeaderFilter::new(config.header_whitelist.iter().cloned());
        let shadow_slots = Arc::new(Semaphore::new(*config.max_in_flight_shadows.as_ref()));

        Self {
            config: Arc::new(config),
            sampler,
            header_filter,
            client,
            metrics,
            shadow_slots,
        }
    }

    /// Orchestrator with an in-memory sink, returned alongside for querying
    pub fn with_in_memory_metrics(
        config: ShadowConfig,
        client: Arc<dyn BackendClient>,
    ) -> (Self, Arc<InMemoryMetricsSink>) {
        let metrics = Arc::new(InMemoryMetricsSink::new());
        let orchestrator = Self::new(config, client, metrics.clone());
        (orchestrator, metrics)
    }

    pub fn config(&self) -> &ShadowConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<dyn MetricsSink> {
        &self.metrics
    }

    /// Shadow slots currently free
    pub fn available_shadow_slots(&self) -> usize {
        self.shadow_slots.available_permits()
    }

    /// Serve `request` from the authoritative backend and, when sampled,
    /// dispatch the candidate comparison without waiting for it.
    pub async fn handle(&self, request: ShadowRequest) -> ShadowOutcome {
        let decision = self.sampler.decide(&request.method);

        let mut request = request;
        request.headers = self.header_filter.sanitize(&request.headers);
        let request = Arc::new(request);

        let authoritative = self
            .client
            .call(
                &self.config.authoritative_url,
                &request,
                self.config.request_timeout,
            )
            .await;

        let disposition = match (&authoritative, decision) {
            (_, decision) if !decision.is_selected() => ShadowDisposition::NotSampled(decision),
            (BackendOutcome::Failure(failure), _) => {
                debug!(
                    request_id = %request.request_id,
                    error = %failure,
                    "Authoritative call failed; shadow skipped"
                );
                ShadowDisposition::SkippedAuthoritativeFailed
            }
            (BackendOutcome::Response(response), _) => {
                self.dispatch_shadow(Arc::clone(&request), response.clone())
            }
        };

        ShadowOutcome {
            authoritative,
            disposition,
        }
    }

    fn dispatch_shadow(
        &self,
        request: Arc<ShadowRequest>,
        authoritative: BackendResponse,
    ) -> ShadowDisposition {
        let Ok(permit) = Arc::clone(&self.shadow_slots).try_acquire_owned() else {
            let endpoint = request.endpoint();
            debug!(
                request_id = %request.request_id,
                endpoint = %endpoint,
                "No shadow slot available; shadow dropped"
            );
            self.metrics.record_dropped(&endpoint);
            return ShadowDisposition::Dropped;
        };

        let recorded = Arc::new(AtomicBool::new(false));
        let branch = ShadowBranch {
            config: Arc::clone(&self.config),
            client: Arc::clone(&self.client),
            metrics: Arc::clone(&self.metrics),
            recorded: Arc::clone(&recorded),
        };
        let metrics = Arc::clone(&self.metrics);

        let handle = tokio::spawn(async move {
            let start = Instant::now();
            let outcome =
                AssertUnwindSafe(branch.run(Arc::clone(&request), authoritative.clone(), permit))
                    .catch_unwind()
                    .await;
            match outcome {
                Ok(result) => Some(result),
                Err(_) if recorded.load(Ordering::Acquire) => {
                    error!(
                        request_id = %request.request_id,
                        "Shadow branch panicked after recording"
                    );
                    None
                }
                Err(_) => {
                    error!(
                        request_id = %request.request_id,
                        "Shadow branch panicked; recorded as candidate failure"
                    );
                    let failure = BackendFailure::new(
                        FailureKind::ProtocolError,
                        "shadow branch panicked",
                        start.elapsed(),
                    );
                    let result = ShadowTestResult::candidate_failed(
                        request.request_id,
                        request.method.to_string(),
                        request.path.clone(),
                        &authoritative,
                        &failure,
                    );
                    record(metrics.as_ref(), &result);
                    log_result(&result);
                    Some(result)
                }
            }
        });

        ShadowDisposition::Dispatched(ShadowHandle(handle))
    }
}

/// Everything the detached task needs, detached from the orchestrator
struct ShadowBranch {
    config: Arc<ShadowConfig>,
    client: Arc<dyn BackendClient>,
    metrics: Arc<dyn MetricsSink>,
    /// Set once the result reached the sink
    recorded: Arc<AtomicBool>,
}

impl ShadowBranch {
    async fn run(
        self,
        request: Arc<ShadowRequest>,
        authoritative: BackendResponse,
        _permit: OwnedSemaphorePermit,
    ) -> ShadowTestResult {
        let timeout = self.config.candidate_timeout;

        // The client is expected to honour the timeout; this guards clients that don't
        let candidate = match tokio::time::timeout(
            timeout,
            self.client.call(&self.config.candidate_url, &request, timeout),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => BackendOutcome::Failure(BackendFailure::timeout(timeout, timeout)),
        };

        let method = request.method.to_string();
        let result = match &candidate {
            BackendOutcome::Response(candidate) => ShadowTestResult::compared(
                request.request_id,
                method,
                request.path.clone(),
                &authoritative,
                candidate,
                ResponseDiffer::compare_responses(&authoritative, candidate),
            ),
            BackendOutcome::Failure(failure) => ShadowTestResult::candidate_failed(
                request.request_id,
                method,
                request.path.clone(),
                &authoritative,
                failure,
            ),
        };

        record(self.metrics.as_ref(), &result);
        self.recorded.store(true, Ordering::Release);
        log_result(&result);

        result
    }
}

fn record(metrics: &dyn MetricsSink, result: &ShadowTestResult) {
    if let Err(e) = metrics.record(result) {
        warn!(request_id = %result.request_id, error = %e, "Failed to record shadow result");
    }
}

fn log_result(result: &ShadowTestResult) {
    let differences = result.difference_descriptions();
    let authoritative_ms = result.authoritative_duration.as_secs_f64() * 1000.0;
    let candidate_ms = result.candidate_duration.as_secs_f64() * 1000.0;

    if result.is_full_match() {
        info!(
            target: SHADOW_LOG_TARGET,
            request_id = %result.request_id,
            method = %result.method,
            endpoint = %result.endpoint,
            authoritative_ms,
            candidate_ms,
            authoritative_status = result.authoritative_status,
            candidate_status = ?result.candidate_status,
            status_match = result.status_match,
            response_match = result.response_match,
            created_at = %result.created_at,
            "Shadow comparison matched"
        );
    } else {
        warn!(
            target: SHADOW_LOG_TARGET,
            request_id = %result.request_id,
            method = %result.method,
            endpoint = %result.endpoint,
            authoritative_ms,
            candidate_ms,
            authoritative_status = result.authoritative_status,
            candidate_status = ?result.candidate_status,
            status_match = result.status_match,
            response_match = result.response_match,
            candidate_failure = ?result.candidate_failure,
            difference_count = differences.len(),
            differences = ?differences,
            created_at = %result.created_at,
            "Shadow comparison mismatched"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::comparison::DifferenceKind;
    use crate::infrastructure::metrics_sink::{MetricsError, MetricsSnapshot};
    use async_trait::async_trait;
    use bytes::Bytes;
    use http::{HeaderMap, HeaderValue, Method, StatusCode};
    use parking_lot::Mutex;
    use std::time::{Duration, Instant};

    const AUTHORITATIVE: &str = "http://authoritative.test";
    const CANDIDATE: &str = "http://candidate.test";

    #[derive(Clone)]
    enum Scripted {
        Respond {
            status: StatusCode,
            body: &'static str,
            delay: Duration,
        },
        Fail(FailureKind),
        Hang,
        Panic,
    }

    /// Scripted backends keyed by base URL; remembers every request it saw
    struct ScriptedClient {
        authoritative: Scripted,
        candidate: Scripted,
        seen: Mutex<Vec<(String, HeaderMap)>>,
    }

    impl ScriptedClient {
        fn new(authoritative: Scripted, candidate: Scripted) -> Arc<Self> {
            Arc::new(Self {
                authoritative,
                candidate,
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl BackendClient for ScriptedClient {
        async fn call(
            &self,
            base_url: &TargetUrl,
            request: &ShadowRequest,
            _timeout: Duration,
        ) -> BackendOutcome {
            self.seen
                .lock()
                .push((base_url.to_string(), request.headers.clone()));
            let script = if base_url.as_ref() == AUTHORITATIVE {
                self.authoritative.clone()
            } else {
                self.candidate.clone()
            };

            let start = Instant::now();
            match script {
                Scripted::Respond {
                    status,
                    body,
                    delay,
                } => {
                    tokio::time::sleep(delay).await;
                    BackendOutcome::Response(BackendResponse {
                        status,
                        headers: HeaderMap::new(),
                        body: Bytes::from_static(body.as_bytes()),
                        elapsed: start.elapsed(),
                    })
                }
                Scripted::Fail(kind) => {
                    BackendOutcome::Failure(BackendFailure::new(kind, "scripted", start.elapsed()))
                }
                Scripted::Hang => std::future::pending().await,
                Scripted::Panic => panic!("scripted panic"),
            }
        }
    }

    struct FailingSink;

    impl MetricsSink for FailingSink {
        fn record(&self, _result: &ShadowTestResult) -> Result<(), MetricsError> {
            Err(MetricsError::Unavailable("disk full".to_string()))
        }

        fn record_dropped(&self, _endpoint: &str) {}

        fn snapshot(&self) -> MetricsSnapshot {
            MetricsSnapshot::default()
        }
    }

    fn ok(body: &'static str, millis: u64) -> Scripted {
        Scripted::Respond {
            status: StatusCode::OK,
            body,
            delay: Duration::from_millis(millis),
        }
    }

    fn config(rate: SampleRate) -> ShadowConfig {
        ShadowConfig::new(
            TargetUrl::try_new(AUTHORITATIVE).unwrap(),
            TargetUrl::try_new(CANDIDATE).unwrap(),
        )
        .with_sample_rate(rate)
        .with_candidate_timeout(Duration::from_millis(200))
    }

    fn get(path: &str) -> ShadowRequest {
        ShadowRequest::new(Method::GET, path)
    }

    #[tokio::test]
    async fn test_matching_responses_record_full_match() {
        let client = ScriptedClient::new(
            ok(r#"{"id":"1","name":"Doc"}"#, 5),
            ok(r#"{"id":"1","name":"Doc"}"#, 10),
        );
        let (orchestrator, metrics) =
            ShadowOrchestrator::with_in_memory_metrics(config(SampleRate::always()), client);

        let outcome = orchestrator.handle(get("/api/documents/1")).await;
        assert!(outcome.authoritative.is_response());

        let result = outcome
            .disposition
            .into_handle()
            .unwrap()
            .completion()
            .await
            .unwrap();
        assert!(result.status_match);
        assert!(result.response_match);
        assert!(result.differences.is_empty());
        assert_eq!(result.endpoint, "/api/documents/1");
        assert_eq!(metrics.snapshot().totals.shadowed, 1);
    }

    #[tokio::test]
    async fn test_not_sampled_does_no_shadow_work() {
        let client = ScriptedClient::new(ok("{}", 0), ok("{}", 0));
        let (orchestrator, metrics) = ShadowOrchestrator::with_in_memory_metrics(
            config(SampleRate::never()),
            client.clone(),
        );

        let outcome = orchestrator.handle(get("/api/documents")).await;

        assert!(matches!(
            outcome.disposition,
            ShadowDisposition::NotSampled(SamplingDecision::NotSelected)
        ));
        assert_eq!(client.seen.lock().len(), 1);
        assert_eq!(metrics.snapshot().totals.shadowed, 0);
    }

    #[tokio::test]
    async fn test_mutating_method_is_never_shadowed() {
        let client = ScriptedClient::new(ok("{}", 0), ok("{}", 0));
        let (orchestrator, _metrics) = ShadowOrchestrator::with_in_memory_metrics(
            config(SampleRate::always()),
            client.clone(),
        );

        let outcome = orchestrator
            .handle(ShadowRequest::new(Method::POST, "/api/documents").with_body("{}"))
            .await;

        assert!(outcome.authoritative.is_response());
        assert!(matches!(
            outcome.disposition,
            ShadowDisposition::NotSampled(SamplingDecision::ExcludedMethod)
        ));
        let seen = client.seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, AUTHORITATIVE);
    }

    #[tokio::test]
    async fn test_authoritative_failure_propagates_and_skips_shadow() {
        let client = ScriptedClient::new(Scripted::Fail(FailureKind::ConnectionError), ok("{}", 0));
        let (orchestrator, metrics) = ShadowOrchestrator::with_in_memory_metrics(
            config(SampleRate::always()),
            client.clone(),
        );

        let outcome = orchestrator.handle(get("/api/documents")).await;

        let failure = outcome.authoritative.into_result().unwrap_err();
        assert_eq!(failure.kind, FailureKind::ConnectionError);
        assert!(matches!(
            outcome.disposition,
            ShadowDisposition::SkippedAuthoritativeFailed
        ));
        assert_eq!(client.seen.lock().len(), 1);
        assert_eq!(metrics.snapshot().totals.shadowed, 0);
    }

    #[tokio::test]
    async fn test_candidate_timeout_recorded_as_single_failure_difference() {
        let client = ScriptedClient::new(ok(r#"{"id":"1"}"#, 5), Scripted::Hang);
        let (orchestrator, metrics) =
            ShadowOrchestrator::with_in_memory_metrics(config(SampleRate::always()), client);

        let start = Instant::now();
        let outcome = orchestrator.handle(get("/api/documents/1")).await;
        let client_latency = start.elapsed();

        assert!(outcome.authoritative.is_response());
        assert!(
            client_latency < Duration::from_millis(150),
            "client waited {client_latency:?}"
        );

        let result = outcome
            .disposition
            .into_handle()
            .unwrap()
            .completion()
            .await
            .unwrap();
        assert!(!result.status_match);
        assert!(!result.response_match);
        assert_eq!(result.differences.len(), 1);
        assert!(matches!(
            result.differences[0].kind,
            DifferenceKind::CandidateFailure {
                failure: FailureKind::Timeout,
                ..
            }
        ));
        assert_eq!(metrics.snapshot().totals.candidate_failures, 1);
    }

    #[tokio::test]
    async fn test_client_does_not_wait_for_slow_candidate() {
        let client = ScriptedClient::new(ok("{}", 10), ok("{}", 150));
        let (orchestrator, _metrics) =
            ShadowOrchestrator::with_in_memory_metrics(config(SampleRate::always()), client);

        let start = Instant::now();
        let outcome = orchestrator.handle(get("/slow")).await;
        let client_latency = start.elapsed();

        assert!(outcome.disposition.is_dispatched());
        assert!(
            client_latency < Duration::from_millis(100),
            "client waited {client_latency:?}"
        );
    }

    #[tokio::test]
    async fn test_status_and_body_divergence() {
        let client = ScriptedClient::new(
            ok(r#"{"id":"1"}"#, 0),
            Scripted::Respond {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                body: r#"{"error":"x"}"#,
                delay: Duration::ZERO,
            },
        );
        let (orchestrator, _metrics) =
            ShadowOrchestrator::with_in_memory_metrics(config(SampleRate::always()), client);

        let result = orchestrator
            .handle(get("/api/documents/1"))
            .await
            .disposition
            .into_handle()
            .unwrap()
            .completion()
            .await
            .unwrap();

        assert!(!result.status_match);
        assert!(!result.response_match);
        assert_eq!(result.authoritative_status, 200);
        assert_eq!(result.candidate_status, Some(500));
        assert!(!result.differences.is_empty());
    }

    #[tokio::test]
    async fn test_both_backends_see_same_sanitized_headers() {
        let client = ScriptedClient::new(ok("{}", 0), ok("{}", 0));
        let (orchestrator, _metrics) = ShadowOrchestrator::with_in_memory_metrics(
            config(SampleRate::always()),
            client.clone(),
        );

        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer t"));
        headers.insert("cookie", HeaderValue::from_static("secret=1"));
        let request = get("/api/documents").with_headers(headers);

        orchestrator
            .handle(request)
            .await
            .disposition
            .into_handle()
            .unwrap()
            .completion()
            .await
            .unwrap();

        let seen = client.seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].1, seen[1].1);
        assert!(seen[0].1.contains_key("authorization"));
        assert!(!seen[0].1.contains_key("cookie"));
    }

    #[tokio::test]
    async fn test_backpressure_drops_and_counts() {
        let client = ScriptedClient::new(ok("{}", 0), ok("{}", 200));
        let config = config(SampleRate::always())
            .with_candidate_timeout(Duration::from_secs(1))
            .with_max_in_flight_shadows(MaxInFlightShadows::try_new(1).unwrap());
        let (orchestrator, metrics) = ShadowOrchestrator::with_in_memory_metrics(config, client);

        let first = orchestrator.handle(get("/busy")).await;
        let second = orchestrator.handle(get("/busy")).await;

        assert!(first.disposition.is_dispatched());
        assert!(matches!(second.disposition, ShadowDisposition::Dropped));
        assert_eq!(metrics.snapshot().totals.dropped, 1);

        first.disposition.into_handle().unwrap().completion().await;
        assert_eq!(orchestrator.available_shadow_slots(), 1);
        assert_eq!(metrics.snapshot().totals.shadowed, 1);
    }

    #[tokio::test]
    async fn test_metrics_error_is_contained() {
        let client = ScriptedClient::new(ok("{}", 0), ok("{}", 0));
        let orchestrator =
            ShadowOrchestrator::new(config(SampleRate::always()), client, Arc::new(FailingSink));

        let outcome = orchestrator.handle(get("/x")).await;
        assert!(outcome.authoritative.is_response());

        let result = outcome.disposition.into_handle().unwrap().completion().await;
        assert!(result.is_some());
    }

    #[tokio::test]
    async fn test_candidate_panic_is_contained() {
        let client = ScriptedClient::new(ok("{}", 0), Scripted::Panic);
        let (orchestrator, metrics) =
            ShadowOrchestrator::with_in_memory_metrics(config(SampleRate::always()), client);

        let outcome = orchestrator.handle(get("/x")).await;
        assert!(outcome.authoritative.is_response());

        let result = outcome
            .disposition
            .into_handle()
            .unwrap()
            .completion()
            .await
            .unwrap();
        assert_eq!(result.candidate_failure, Some(FailureKind::ProtocolError));
        assert!(!result.status_match);
        assert!(!result.response_match);

        let totals = metrics.snapshot().totals;
        assert_eq!(totals.shadowed, 1);
        assert_eq!(totals.candidate_failures, 1);
        assert_eq!(orchestrator.available_shadow_slots(), 64);
    }

    #[tokio::test]
    async fn test_concurrent_requests_record_exactly_once_each() {
        const N: usize = 50;
        let client = ScriptedClient::new(ok(r#"{"v":1}"#, 1), ok(r#"{"v":1}"#, 20));
        let (orchestrator, metrics) =
            ShadowOrchestrator::with_in_memory_metrics(config(SampleRate::always()), client);
        let orchestrator = Arc::new(orchestrator);

        let outcomes = futures_util::future::join_all((0..N).map(|i| {
            let orchestrator = Arc::clone(&orchestrator);
            async move { orchestrator.handle(get(&format!("/doc/{}", i % 5))).await }
        }))
        .await;

        let handles: Vec<_> = outcomes
            .into_iter()
            .filter_map(|o| o.disposition.into_handle())
            .collect();
        assert_eq!(handles.len(), N);
        for handle in handles {
            handle.completion().await.unwrap();
        }

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.totals.shadowed, N as u64);
        assert_eq!(snapshot.totals.body_matches, N as u64);
        let per_endpoint: u64 = snapshot.endpoints.values().map(|s| s.shadowed).sum();
        assert_eq!(per_endpoint, N as u64);
    }
}
