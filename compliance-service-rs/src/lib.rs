//! Compliance engine
//!
//! Scans each decision trace for PII leakage, validates it against the
//! regulatory policy table, and produces an immutable audit record. Bias
//! analysis and dashboard aggregation run over batches.

pub mod audit;
pub mod bias;
pub mod orchestrator;
pub mod overview;
pub mod pii;
pub mod policy_engine;

use shared_types::PortError;

pub use audit::{build_audit_record, build_audit_record_at, AUDIT_VERSION};
pub use bias::{BiasAnalyzer, BiasDimension, BiasReport, FullBiasReport, GroupStats};
pub use orchestrator::{ComplianceOrchestrator, ComplianceReport};
pub use overview::{compliance_overview, policy_rule_stats, ComplianceOverview, PolicyRuleStat, TimeRange};
pub use pii::{redact, scan_text, scan_trace};
pub use policy_engine::{default_rules, CheckVerdict, PolicyCheckError, PolicyRule, PolicyValidator};

/// Compliance pass errors
#[derive(Debug, thiserror::Error)]
pub enum ComplianceError {
    #[error("Failed to persist compliance event: {0}")]
    Persistence(#[source] PortError),

    #[error("Failed to broadcast compliance update: {0}")]
    Broadcast(#[source] PortError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
