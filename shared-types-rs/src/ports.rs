//! Collaborator ports
//!
//! The engines never talk to a database, socket server or rule store
//! directly. Every external collaborator sits behind one of these traits;
//! the `memory` module provides in-process adapters.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::alert::{Alert, AlertRule};
use crate::compliance::ComplianceEvent;
use crate::model::{AgentCategory, Trace};

#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Collaborator unavailable: {0}")]
    Unavailable(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Persistence failed: {0}")]
    Persistence(String),

    #[error("Broadcast failed: {0}")]
    Broadcast(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Per-trace value series a window query can return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TraceSeries {
    LatencyMs,
    /// 1.0 for errored traces, 0.0 otherwise.
    ErrorIndicator,
    CostUsd,
    /// 1.0 for escalated or flagged decisions, 0.0 otherwise.
    EscalationIndicator,
}

impl TraceSeries {
    /// Project one trace onto this series.
    pub fn value_of(&self, trace: &Trace) -> f64 {
        match self {
            Self::LatencyMs => trace.total_latency_ms as f64,
            Self::ErrorIndicator => indicator(trace.status == crate::model::ExecutionStatus::Error),
            Self::CostUsd => trace.total_cost_usd,
            Self::EscalationIndicator => indicator(
                trace
                    .effective_decision()
                    .map(|d| d.is_escalation())
                    .unwrap_or(false),
            ),
        }
    }
}

fn indicator(flag: bool) -> f64 {
    if flag {
        1.0
    } else {
        0.0
    }
}

/// Read side of the recent-trace store.
#[async_trait]
pub trait TraceWindow: Send + Sync {
    /// Values of `series` for traces recorded with `start <= recorded_at <= end`,
    /// optionally restricted to one agent category. Order is unspecified.
    async fn query(
        &self,
        series: TraceSeries,
        scope: Option<AgentCategory>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<f64>, PortError>;
}

/// Write side of the recent-trace store.
#[async_trait]
pub trait TraceRecorder: Send + Sync {
    async fn record(&self, trace: &Trace) -> Result<(), PortError>;
}

/// Persistence for the write-once facts the engines produce.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn save_alert(&self, alert: &Alert) -> Result<(), PortError>;

    /// Returns the stored event id.
    async fn save_compliance_event(&self, event: &ComplianceEvent) -> Result<String, PortError>;
}

/// Publish/subscribe topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Alerts,
    ComplianceUpdate,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Alerts => "alerts",
            Self::ComplianceUpdate => "compliance_update",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fire-and-forget fan-out to live subscribers.
pub trait Broadcaster: Send + Sync {
    fn publish(&self, topic: Topic, payload: Value) -> Result<(), PortError>;
}

/// Source of operator-configured alert rules.
#[async_trait]
pub trait RuleSource: Send + Sync {
    async fn enabled_rules(&self) -> Result<Vec<AlertRule>, PortError>;
}
