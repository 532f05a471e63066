//! Aggregation of shadow comparison outcomes
//!
//! The sink is constructed once at startup and injected into the
//! orchestrator. Global totals are lock-free counters; per-endpoint
//! statistics live behind a short-lived `parking_lot` mutex. At most
//! [`MAX_ENDPOINT_KEYS`] distinct endpoints are tracked; later ones are
//! folded into [`OVERFLOW_ENDPOINT`].

use crate::domain::shadow_result::ShadowTestResult;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;

/// Upper bound on distinct per-endpoint entries
pub const MAX_ENDPOINT_KEYS: usize = 1024;

/// Bucket for endpoints seen after the map is full
pub const OVERFLOW_ENDPOINT: &str = "<other>";

/// Failure to record a result; logged and dropped by callers
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("Metrics sink unavailable: {0}")]
    Unavailable(String),
}

/// Destination for completed comparisons
pub trait MetricsSink: Send + Sync {
    fn record(&self, result: &ShadowTestResult) -> Result<(), MetricsError>;

    /// Count a sampled request whose shadow was refused for lack of capacity
    fn record_dropped(&self, endpoint: &str);

    fn snapshot(&self) -> MetricsSnapshot;
}

/// Running latency statistics in microseconds
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct LatencyStats {
    pub count: u64,
    pub sum_micros: u64,
    pub min_micros: Option<u64>,
    pub max_micros: Option<u64>,
    pub mean_micros: Option<f64>,
}

impl LatencyStats {
    pub fn observe(&mut self, duration: Duration) {
        let micros = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);
        self.count += 1;
        self.sum_micros = self.sum_micros.saturating_add(micros);
        self.min_micros = Some(self.min_micros.map_or(micros, |min| min.min(micros)));
        self.max_micros = Some(self.max_micros.map_or(micros, |max| max.max(micros)));
        self.mean_micros = Some(self.sum_micros as f64 / self.count as f64);
    }
}

/// Counters and timings for one endpoint
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct EndpointStats {
    pub shadowed: u64,
    pub status_matches: u64,
    pub body_matches: u64,
    pub candidate_failures: u64,
    pub dropped: u64,
    pub authoritative_latency: LatencyStats,
    pub candidate_latency: LatencyStats,
}

impl EndpointStats {
    fn observe(&mut self, result: &ShadowTestResult) {
        self.shadowed += 1;
        if result.status_match {
            self.status_matches += 1;
        }
        if result.response_match {
            self.body_matches += 1;
        }
        if result.is_candidate_failure() {
            self.candidate_failures += 1;
        }
        self.authoritative_latency.observe(result.authoritative_duration);
        self.candidate_latency.observe(result.candidate_duration);
    }
}

/// Global totals
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Totals {
    pub shadowed: u64,
    pub status_matches: u64,
    pub body_matches: u64,
    pub candidate_failures: u64,
    pub dropped: u64,
}

/// Point-in-time view of the aggregates
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub totals: Totals,
    /// Keyed by `METHOD path`
    pub endpoints: BTreeMap<String, EndpointStats>,
}

impl MetricsSnapshot {
    pub fn endpoint(&self, key: &str) -> Option<&EndpointStats> {
        self.endpoints.get(key)
    }
}

#[derive(Debug, Default)]
struct Counter(AtomicU64);

impl Counter {
    fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    fn load(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Process-local sink backing the `/metrics` endpoint
#[derive(Debug, Default)]
pub struct InMemoryMetricsSink {
    shadowed: Counter,
    status_matches: Counter,
    body_matches: Counter,
    candidate_failures: Counter,
    dropped: Counter,
    endpoints: Mutex<HashMap<String, EndpointStats>>,
}

impl InMemoryMetricsSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn endpoint_key(method: &str, path: &str) -> String {
        format!("{method} {path}")
    }

    fn with_endpoint(&self, key: String, update: impl FnOnce(&mut EndpointStats)) {
        let mut endpoints = self.endpoints.lock();
        let key = if endpoints.len() >= MAX_ENDPOINT_KEYS && !endpoints.contains_key(&key) {
            OVERFLOW_ENDPOINT.to_string()
        } else {
            key
        };
        update(endpoints.entry(key).or_default());
    }
}

impl MetricsSink for InMemoryMetricsSink {
    fn record(&self, result: &ShadowTestResult) -> Result<(), MetricsError> {
        self.shadowed.inc();
        if result.status_match {
            self.status_matches.inc();
        }
        if result.response_match {
            self.body_matches.inc();
        }
        if result.is_candidate_failure() {
            self.candidate_failures.inc();
        }

        let key = Self::endpoint_key(&result.method, &result.endpoint);
        self.with_endpoint(key, |stats| stats.observe(result));
        Ok(())
    }

    fn record_dropped(&self, endpoint: &str) {
        self.dropped.inc();
        self.with_endpoint(endpoint.to_string(), |stats| stats.dropped += 1);
    }

    fn snapshot(&self) -> MetricsSnapshot {
        let endpoints = self
            .endpoints
            .lock()
            .iter()
            .map(|(key, stats)| (key.clone(), *stats))
            .collect();

        MetricsSnapshot {
            totals: Totals {
                shadowed: self.shadowed.load(),
                status_matches: self.status_matches.load(),
                body_matches: self.body_matches.load(),
                candidate_failures: self.candidate_failures.load(),
                dropped: self.dropped.load(),
            },
            endpoints,
        }
    }
}
