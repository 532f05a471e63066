//! Infrastructure layer
//!
//! Implementations of the sinks the shadow branch reports into.

pub mod metrics_sink;

pub use metrics_sink::{InMemoryMetricsSink, MetricsError, MetricsSink, MetricsSnapshot};
