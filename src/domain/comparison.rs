//! Structural comparison of authoritative and candidate responses
//!
//! Bodies are compared as a tagged value tree: JSON values when the body
//! parses, opaque bytes otherwise. The walk is order-sensitive for arrays,
//! key-set-sensitive for objects, and records every divergence it finds
//! rather than stopping at the first one.

use crate::proxy::types::{BackendResponse, FailureKind};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;

/// Nesting depth beyond which subtrees are compared as a whole
pub const MAX_DIFF_DEPTH: usize = 128;

/// Longest rendering of a value kept in a difference entry
const MAX_RENDERED_LEN: usize = 256;

/// Which side of the comparison a difference refers to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Authoritative,
    Candidate,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Authoritative => f.write_str("authoritative"),
            Self::Candidate => f.write_str("candidate"),
        }
    }
}

/// Nature of a single divergence
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DifferenceKind {
    TypeMismatch {
        authoritative: String,
        candidate: String,
    },
    ValueMismatch {
        authoritative: String,
        candidate: String,
    },
    LengthMismatch {
        authoritative: usize,
        candidate: usize,
    },
    MissingKey {
        missing_on: Side,
    },
    CandidateFailure {
        failure: FailureKind,
        message: String,
    },
}

/// One path-qualified divergence
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Difference {
    /// Dot/bracket path from the body root, empty for the root itself
    pub path: String,
    #[serde(flatten)]
    pub kind: DifferenceKind,
}

impl Difference {
    pub fn new(path: impl Into<String>, kind: DifferenceKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }

    pub fn candidate_failure(failure: FailureKind, message: impl Into<String>) -> Self {
        Self::new(
            "",
            DifferenceKind::CandidateFailure {
                failure,
                message: message.into(),
            },
        )
    }

    fn display_path(&self) -> &str {
        if self.path.is_empty() {
            "<root>"
        } else {
            &self.path
        }
    }
}

impl fmt::Display for Difference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let path = self.display_path();
        match &self.kind {
            DifferenceKind::TypeMismatch {
                authoritative,
                candidate,
            } => write!(
                f,
                "type mismatch at {path}: authoritative {authoritative}, candidate {candidate}"
            ),
            DifferenceKind::ValueMismatch {
                authoritative,
                candidate,
            } => write!(
                f,
                "value mismatch at {path}: authoritative {authoritative}, candidate {candidate}"
            ),
            DifferenceKind::LengthMismatch {
                authoritative,
                candidate,
            } => write!(
                f,
                "length mismatch at {path}: authoritative {authoritative}, candidate {candidate}"
            ),
            DifferenceKind::MissingKey { missing_on } => {
                write!(f, "missing key at {path}: absent on {missing_on}")
            }
            DifferenceKind::CandidateFailure { failure, message } => {
                write!(f, "candidate failure ({failure}): {message}")
            }
        }
    }
}

/// Response body in comparable form
#[derive(Clone, Debug, PartialEq)]
pub enum ComparableBody {
    Json(Value),
    /// Anything that is not JSON, compared by byte equality
    Opaque(Bytes),
}

impl ComparableBody {
    pub fn from_bytes(body: &Bytes) -> Self {
        if body.is_empty() {
            return Self::Opaque(body.clone());
        }
        serde_json::from_slice(body)
            .map(Self::Json)
            .unwrap_or_else(|_| Self::Opaque(body.clone()))
    }
}

/// Verdict for a body comparison
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DiffReport {
    pub differences: Vec<Difference>,
}

impl DiffReport {
    pub fn is_match(&self) -> bool {
        self.differences.is_empty()
    }

    pub fn descriptions(&self) -> Vec<String> {
        self.differences.iter().map(ToString::to_string).collect()
    }
}

/// Verdict for a full response comparison
#[derive(Clone, Debug, PartialEq)]
pub struct ResponseComparison {
    pub status_match: bool,
    pub body: DiffReport,
}

impl ResponseComparison {
    pub fn response_match(&self) -> bool {
        self.body.is_match()
    }
}

/// Stateless structural comparator
#[derive(Clone, Copy, Debug, Default)]
pub struct ResponseDiffer;

impl ResponseDiffer {
    /// Compare status codes and bodies of two successful responses
    pub fn compare_responses(
        authoritative: &BackendResponse,
        candidate: &BackendResponse,
    ) -> ResponseComparison {
        ResponseComparison {
            status_match: authoritative.status == candidate.status,
            body: Self::compare_bodies(
                &ComparableBody::from_bytes(&authoritative.body),
                &ComparableBody::from_bytes(&candidate.body),
            ),
        }
    }

    pub fn compare_bodies(
        authoritative: &ComparableBody,
        candidate: &ComparableBody,
    ) -> DiffReport {
        match (authoritative, candidate) {
            (ComparableBody::Json(a), ComparableBody::Json(c)) => Self::compare(a, c),
            (ComparableBody::Opaque(a), ComparableBody::Opaque(c)) => {
                let mut report = DiffReport::default();
                if a != c {
                    report.differences.push(Difference::new(
                        "",
                        DifferenceKind::ValueMismatch {
                            authoritative: render_bytes(a),
                            candidate: render_bytes(c),
                        },
                    ));
                }
                report
            }
            (a, c) => DiffReport {
                differences: vec![Difference::new(
                    "",
                    DifferenceKind::TypeMismatch {
                        authoritative: body_type_name(a).to_string(),
                        candidate: body_type_name(c).to_string(),
                    },
                )],
            },
        }
    }

    /// Structural diff of two JSON values
    pub fn compare(authoritative: &Value, candidate: &Value) -> DiffReport {
        let mut differences = Vec::new();
        walk(
            Some(authoritative),
            Some(candidate),
            String::new(),
            0,
            &mut differences,
        );
        DiffReport { differences }
    }
}

fn walk(
    authoritative: Option<&Value>,
    candidate: Option<&Value>,
    path: String,
    depth: usize,
    out: &mut Vec<Difference>,
) {
    let (a, c) = match (authoritative, candidate) {
        (Some(a), Some(c)) => (a, c),
        (None, None) => return,
        (a, c) => {
            out.push(Difference::new(
                path,
                DifferenceKind::TypeMismatch {
                    authoritative: type_name(a).to_string(),
                    candidate: type_name(c).to_string(),
                },
            ));
            return;
        }
    };

    if type_name(Some(a)) != type_name(Some(c)) {
        out.push(Difference::new(
            path,
            DifferenceKind::TypeMismatch {
                authoritative: type_name(Some(a)).to_string(),
                candidate: type_name(Some(c)).to_string(),
            },
        ));
        return;
    }

    if depth >= MAX_DIFF_DEPTH {
        if a != c {
            out.push(value_mismatch(path, a, c));
        }
        return;
    }

    match (a, c) {
        (Value::Array(a_items), Value::Array(c_items)) => {
            if a_items.len() != c_items.len() {
                out.push(Difference::new(
                    path.clone(),
                    DifferenceKind::LengthMismatch {
                        authoritative: a_items.len(),
                        candidate: c_items.len(),
                    },
                ));
            }
            for index in 0..a_items.len().max(c_items.len()) {
                walk(
                    a_items.get(index),
                    c_items.get(index),
                    format!("{path}[{index}]"),
                    depth + 1,
                    out,
                );
            }
        }
        (Value::Object(a_map), Value::Object(c_map)) => {
            let keys: BTreeSet<&String> = a_map.keys().chain(c_map.keys()).collect();
            for key in keys {
                let child = child_path(&path, key);
                match (a_map.get(key), c_map.get(key)) {
                    (Some(a_child), Some(c_child)) => {
                        walk(Some(a_child), Some(c_child), child, depth + 1, out)
                    }
                    (Some(_), None) => out.push(Difference::new(
                        child,
                        DifferenceKind::MissingKey {
                            missing_on: Side::Candidate,
                        },
                    )),
                    (None, Some(_)) => out.push(Difference::new(
                        child,
                        DifferenceKind::MissingKey {
                            missing_on: Side::Authoritative,
                        },
                    )),
                    (None, None) => {}
                }
            }
        }
        (Value::Number(a_num), Value::Number(c_num)) => {
            if !numbers_equal(a_num, c_num) {
                out.push(value_mismatch(path, a, c));
            }
        }
        _ => {
            if a != c {
                out.push(value_mismatch(path, a, c));
            }
        }
    }
}

fn child_path(parent: &str, key: &str) -> String {
    if parent.is_empty() {
        key.to_string()
    } else {
        format!("{parent}.{key}")
    }
}

fn numbers_equal(a: &serde_json::Number, c: &serde_json::Number) -> bool {
    if a == c {
        return true;
    }
    // Two integers are exact; only a float on either side widens to f64
    if (a.is_i64() || a.is_u64()) && (c.is_i64() || c.is_u64()) {
        return false;
    }
    match (a.as_f64(), c.as_f64()) {
        (Some(a), Some(c)) => a == c,
        _ => false,
    }
}

fn value_mismatch(path: String, a: &Value, c: &Value) -> Difference {
    Difference::new(
        path,
        DifferenceKind::ValueMismatch {
            authoritative: render(a),
            candidate: render(c),
        },
    )
}

fn type_name(value: Option<&Value>) -> &'static str {
    match value {
        None => "undefined",
        Some(Value::Null) => "null",
        Some(Value::Bool(_)) => "boolean",
        Some(Value::Number(_)) => "number",
        Some(Value::String(_)) => "string",
        Some(Value::Array(_)) => "array",
        Some(Value::Object(_)) => "object",
    }
}

fn body_type_name(body: &ComparableBody) -> &'static str {
    match body {
        ComparableBody::Json(value) => type_name(Some(value)),
        ComparableBody::Opaque(_) => "opaque",
    }
}

fn render(value: &Value) -> String {
    truncate(value.to_string())
}

fn render_bytes(bytes: &Bytes) -> String {
    truncate(format!("<{} bytes> {}", bytes.len(), String::from_utf8_lossy(bytes)))
}

fn truncate(mut rendered: String) -> String {
    if rendered.len() > MAX_RENDERED_LEN {
        let mut cut = MAX_RENDERED_LEN;
        while !rendered.is_char_boundary(cut) {
            cut -= 1;
        }
        rendered.truncate(cut);
        rendered.push_str("...");
    }
    rendered
}
