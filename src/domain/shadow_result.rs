//! Outcome of one completed shadow comparison

use crate::domain::comparison::{Difference, ResponseComparison};
use crate::proxy::types::{BackendFailure, BackendResponse, FailureKind, RequestId};
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::time::Duration;

/// Immutable record of one authoritative/candidate pair
///
/// Built only after both outcomes and the diff are known, then handed to
/// the metrics sink and the log. Never mutated afterwards.
#[derive(Clone, Debug, Serialize)]
pub struct ShadowTestResult {
    pub request_id: RequestId,
    pub method: String,
    pub endpoint: String,
    #[serde(rename = "authoritative_duration_ms", serialize_with = "as_millis")]
    pub authoritative_duration: Duration,
    #[serde(rename = "candidate_duration_ms", serialize_with = "as_millis")]
    pub candidate_duration: Duration,
    pub authoritative_status: u16,
    /// `None` when the candidate call failed before producing a status
    pub candidate_status: Option<u16>,
    pub status_match: bool,
    pub response_match: bool,
    pub candidate_failure: Option<FailureKind>,
    pub differences: Vec<Difference>,
    pub created_at: DateTime<Utc>,
}

impl ShadowTestResult {
    /// Result for a candidate that answered; verdicts come from the differ
    pub fn compared(
        request_id: RequestId,
        method: impl Into<String>,
        endpoint: impl Into<String>,
        authoritative: &BackendResponse,
        candidate: &BackendResponse,
        comparison: ResponseComparison,
    ) -> Self {
        let response_match = comparison.response_match();
        Self {
            request_id,
            method: method.into(),
            endpoint: endpoint.into(),
            authoritative_duration: authoritative.elapsed,
            candidate_duration: candidate.elapsed,
            authoritative_status: authoritative.status.as_u16(),
            candidate_status: Some(candidate.status.as_u16()),
            status_match: comparison.status_match,
            response_match,
            candidate_failure: None,
            differences: comparison.body.differences,
            created_at: Utc::now(),
        }
    }

    /// Result for a candidate that failed; recorded as a full mismatch
    pub fn candidate_failed(
        request_id: RequestId,
        method: impl Into<String>,
        endpoint: impl Into<String>,
        authoritative: &BackendResponse,
        failure: &BackendFailure,
    ) -> Self {
        Self {
            request_id,
            method: method.into(),
            endpoint: endpoint.into(),
            authoritative_duration: authoritative.elapsed,
            candidate_duration: failure.elapsed,
            authoritative_status: authoritative.status.as_u16(),
            candidate_status: None,
            status_match: false,
            response_match: false,
            candidate_failure: Some(failure.kind),
            differences: vec![Difference::candidate_failure(
                failure.kind,
                failure.message.clone(),
            )],
            created_at: Utc::now(),
        }
    }

    pub fn is_full_match(&self) -> bool {
        self.status_match && self.response_match
    }

    pub fn is_candidate_failure(&self) -> bool {
        self.candidate_failure.is_some()
    }

    pub fn difference_descriptions(&self) -> Vec<String> {
        self.differences.iter().map(ToString::to_string).collect()
    }
}

fn as_millis<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64() * 1000.0)
}
