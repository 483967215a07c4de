//! Shared types for the InsureOps monitoring engine.
//!
//! Everything the alerting and compliance engines exchange lives here: the
//! trace model, alert and compliance event types, the ports through which the
//! engines reach external collaborators, in-memory adapters for those ports,
//! and the configuration loader.

pub mod alert;
pub mod compliance;
pub mod config;
pub mod memory;
pub mod model;
pub mod ports;

pub use alert::{
    Alert, AlertMetadata, AlertMetric, AlertRule, AlertSeverity, ComparisonOperator,
    DEFAULT_COOLDOWN_MINUTES,
};
pub use compliance::{
    AuditDecision, AuditRecord, ComplianceEvent, ComplianceUpdate, GuardrailResult, OverallStatus,
    PiiFinding, PiiScanResult, PiiSeverity, PiiSummary, PolicyComplianceSummary, PolicyRuleId,
    PolicyRuleResult, PolicyValidation, RedactedInputSummary, RiskLevel,
};
pub use config::{BiasThresholds, ConfigError, MonitorConfig};
pub use memory::{ChannelBroadcaster, InMemoryEventStore, InMemoryTraceWindow, StaticRuleSource};
pub use model::{
    AgentCategory, ClaimDetails, ClauseAttribution, Confidence, Decision, DecisionDetails, DecisionInput, DecisionOutput,
    ExecutionStatus, FraudDetails, GuardrailCheck, GuardrailKind, LlmCall, ModelError, RawTrace,
    SupportDetails, ToolCall, Trace, UnderwritingDetails,
};
pub use ports::{Broadcaster, EventStore, PortError, RuleSource, Topic, TraceRecorder, TraceSeries, TraceWindow};
