//! Alerting engine
//!
//! Evaluates operator-configured rules against each ingested trace, using
//! rolling-window statistics from the trace store, and emits deduplicated
//! alerts to the event store and the `alerts` topic.

pub mod dedup;
pub mod evaluator;
pub mod window;

use shared_types::PortError;

pub use dedup::DedupCache;
pub use evaluator::{AlertEvaluator, EvaluationOutcome, RuleDisposition, SkipReason};
pub use window::{nearest_rank_percentile, MetricWindow};

/// Alerting errors
#[derive(Debug, thiserror::Error)]
pub enum AlertingError {
    #[error("Window query failed: {0}")]
    WindowQuery(#[source] PortError),

    #[error("Rule source unavailable: {0}")]
    RuleSource(#[source] PortError),

    #[error("Metric {metric} resolved to a non-finite value: {value}")]
    NonFiniteMetric { metric: String, value: f64 },
}
