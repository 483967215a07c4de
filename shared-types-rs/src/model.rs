//! Trace data model
//!
//! Traces arrive from the agent collector as loosely-typed JSON ([`RawTrace`])
//! and are converted exactly once into the typed [`Trace`] that the alerting
//! and compliance engines read. Confidence values and decision payloads are
//! normalized during that conversion; nothing downstream re-interprets them.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use tracing::warn;
use uuid::Uuid;

/// Errors raised while converting raw agent output into the typed model.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("Unknown agent category: {0}")]
    UnknownAgent(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("Malformed trace payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Category of the decision agent that produced a trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentCategory {
    Claims,
    Underwriting,
    Fraud,
    Support,
}

impl AgentCategory {
    pub const ALL: [AgentCategory; 4] = [
        AgentCategory::Claims,
        AgentCategory::Underwriting,
        AgentCategory::Fraud,
        AgentCategory::Support,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Claims => "claims",
            Self::Underwriting => "underwriting",
            Self::Fraud => "fraud",
            Self::Support => "support",
        }
    }
}

impl fmt::Display for AgentCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentCategory {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "claims" => Ok(Self::Claims),
            "underwriting" => Ok(Self::Underwriting),
            "fraud" => Ok(Self::Fraud),
            "support" => Ok(Self::Support),
            _ => Err(ModelError::UnknownAgent(s.to_string())),
        }
    }
}

/// Outcome of an agent decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Approved,
    Rejected,
    Escalated,
    Flagged,
    Cleared,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Escalated => "escalated",
            Self::Flagged => "flagged",
            Self::Cleared => "cleared",
        }
    }

    /// Parse a decision label; anything unrecognised yields `None`.
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "escalated" => Some(Self::Escalated),
            "flagged" => Some(Self::Flagged),
            "cleared" => Some(Self::Cleared),
            _ => None,
        }
    }

    /// Escalated and flagged decisions both hand the case to a human.
    pub fn is_escalation(&self) -> bool {
        matches!(self, Self::Escalated | Self::Flagged)
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Execution status reported by the agent runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    #[default]
    Success,
    Error,
    Pending,
}

/// Decision confidence, stored canonically as a fraction in `0.0..=1.0`.
///
/// Agents report confidence either as a fraction or as a percentage. Values
/// at or below 1 are taken as fractions, anything larger as a percentage
/// (clamped to 100). Because the canonical form is always a fraction,
/// re-reading a serialized value is a no-op.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Confidence(f64);

impl Confidence {
    pub fn from_raw(raw: f64) -> Result<Self, ModelError> {
        if !raw.is_finite() || raw < 0.0 {
            return Err(ModelError::InvalidValue {
                field: "confidence",
                reason: format!("{raw} is not a non-negative finite number"),
            });
        }
        let fraction = if raw <= 1.0 { raw } else { (raw / 100.0).min(1.0) };
        Ok(Self(fraction))
    }

    pub fn fraction(&self) -> f64 {
        self.0
    }

    pub fn percent(&self) -> f64 {
        self.0 * 100.0
    }
}

impl Serialize for Confidence {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.0)
    }
}

impl<'de> Deserialize<'de> for Confidence {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = f64::deserialize(deserializer)?;
        Confidence::from_raw(raw).map_err(serde::de::Error::custom)
    }
}

/// One LLM invocation inside an agent execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmCall {
    pub model: Option<String>,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub latency_ms: u64,
    #[serde(deserialize_with = "lenient::f64_or_zero")]
    pub cost_usd: f64,
    pub status: Option<String>,
    pub prompt_text: Option<String>,
    pub response_text: Option<String>,
}

/// One tool invocation inside an agent execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(alias = "name")]
    pub tool_name: String,
    #[serde(default)]
    pub parameters: Value,
    #[serde(default)]
    pub result_summary: Option<String>,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default = "default_true")]
    pub success: bool,
}

impl ToolCall {
    pub fn new(tool_name: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            parameters: Value::Null,
            result_summary: None,
            duration_ms: 0,
            success: true,
        }
    }
}

/// Kind of guardrail gate recorded on a trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GuardrailKind {
    Pii,
    Bias,
    Safety,
    Compliance,
    #[serde(other)]
    Other,
}

/// Pass/fail result of a guardrail gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardrailCheck {
    pub check_type: GuardrailKind,
    #[serde(default = "default_true")]
    pub passed: bool,
    #[serde(default)]
    pub details: Option<String>,
}

impl GuardrailCheck {
    pub fn passed(check_type: GuardrailKind) -> Self {
        Self { check_type, passed: true, details: None }
    }

    pub fn failed(check_type: GuardrailKind, details: impl Into<String>) -> Self {
        Self { check_type, passed: false, details: Some(details.into()) }
    }
}

/// Structured input handed to the agent (claim, application, ticket).
///
/// Known fields are typed; everything else is preserved in `extra` so the
/// payload still serializes in full for leakage scanning.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecisionInput {
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient::loose_f64")]
    pub amount: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient::loose_f64")]
    pub claim_amount: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient::loose_string")]
    pub policy_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient::loose_string")]
    pub insurance_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient::loose_string")]
    pub claim_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient::loose_string")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient::loose_string")]
    pub state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient::loose_string")]
    pub region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient::loose_f64")]
    pub age: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient::loose_f64")]
    pub applicant_age: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient::loose_string")]
    pub gender: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
    /// Set when the trace carried an input payload, even an empty one.
    #[serde(skip)]
    pub reported: bool,
}

impl DecisionInput {
    /// Build the typed view of an input payload. Known fields with
    /// unexpected types read as absent and keep their raw value in `extra`.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Null => Self::default(),
            Value::Object(map) => {
                let mut input: Self = match serde_json::from_value(Value::Object(map.clone())) {
                    Ok(input) => input,
                    Err(e) => {
                        warn!(error = %e, "Input payload could not be typed; keeping it untyped");
                        Self { extra: map.clone(), ..Self::default() }
                    }
                };
                let untyped = unparsed_entries(&map, &input);
                input.extra.extend(untyped);
                input.reported = true;
                input
            }
            other => {
                let mut extra = Map::new();
                extra.insert("value".to_string(), other);
                Self { extra, reported: true, ..Self::default() }
            }
        }
    }

    /// True when the trace carried no input payload at all.
    pub fn is_absent(&self) -> bool {
        !self.reported && *self == Self::default()
    }

    /// Claimed amount: `amount`, falling back to `claim_amount`, else 0.
    pub fn claimed_amount(&self) -> f64 {
        first_nonzero(&[self.amount, self.claim_amount]).unwrap_or(0.0)
    }

    /// Amount as reported, without the zero default.
    pub fn reported_amount(&self) -> Option<f64> {
        first_nonzero(&[self.amount, self.claim_amount])
    }

    pub fn geography(&self) -> Option<&str> {
        first_non_empty(&[&self.location, &self.state, &self.region])
    }

    pub fn claim_category(&self) -> Option<&str> {
        first_non_empty(&[&self.claim_type, &self.insurance_type])
    }

    /// Applicant age in years; 0 when not reported.
    pub fn age_years(&self) -> f64 {
        first_nonzero(&[self.age, self.applicant_age]).unwrap_or(0.0)
    }

    pub fn is_health_insurance(&self) -> bool {
        self.insurance_type
            .as_deref()
            .map(|t| t.eq_ignore_ascii_case("health"))
            .unwrap_or(false)
    }
}

/// Clause attribution attached to a claims decision.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClauseAttribution {
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient::loose_bool")]
    pub exclusion_triggered: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient::loose_f64")]
    pub coverage_limit: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClaimDetails {
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient::loose_f64")]
    pub payout_amount: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient::loose_f64")]
    pub coverage_limit: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient::loose")]
    pub clause_attribution: Option<ClauseAttribution>,
    #[serde(skip_serializing_if = "Vec::is_empty", deserialize_with = "lenient::loose_or_default")]
    pub tools_used: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient::loose_string")]
    pub coverage_status: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnderwritingDetails {
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient::loose_f64")]
    pub risk_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient::loose_f64")]
    pub monthly_premium: Option<f64>,
    #[serde(skip_serializing_if = "Vec::is_empty", deserialize_with = "lenient::loose_or_default")]
    pub tools_used: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FraudDetails {
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient::loose_f64")]
    pub fraud_probability: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient::loose")]
    pub flags_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient::loose_string")]
    pub investigation_priority: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", deserialize_with = "lenient::loose_or_default")]
    pub tools_used: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupportDetails {
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient::loose_string")]
    pub intent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient::loose_bool")]
    pub resolved: Option<bool>,
    #[serde(skip_serializing_if = "Vec::is_empty", deserialize_with = "lenient::loose_or_default")]
    pub tools_used: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Category-specific detail object nested in an agent's output.
///
/// `Unknown` keeps detail values that are not objects, or that cannot be read
/// as the shape expected for the trace's agent category, so newer agents never
/// fail ingestion.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DecisionDetails {
    Claims(ClaimDetails),
    Underwriting(UnderwritingDetails),
    Fraud(FraudDetails),
    Support(SupportDetails),
    Unknown(Value),
}

impl DecisionDetails {
    pub fn parse(agent: AgentCategory, value: Value) -> Self {
        let mut map = match value {
            Value::Object(map) => map,
            other => return Self::Unknown(other),
        };
        // Some agents report tools in camelCase.
        if !map.contains_key("tools_used") {
            if let Some(tools) = map.remove("toolsUsed") {
                map.insert("tools_used".to_string(), tools);
            }
        }

        let object = Value::Object(map.clone());
        let parsed = match agent {
            AgentCategory::Claims => serde_json::from_value(object).map(Self::Claims),
            AgentCategory::Underwriting => serde_json::from_value(object).map(Self::Underwriting),
            AgentCategory::Fraud => serde_json::from_value(object).map(Self::Fraud),
            AgentCategory::Support => serde_json::from_value(object).map(Self::Support),
        };
        let mut details = match parsed {
            Ok(details) => details,
            Err(_) => return Self::Unknown(Value::Object(map)),
        };
        let untyped = unparsed_entries(&map, &details);
        if let Some(extra) = details.extra_mut() {
            extra.extend(untyped);
        }
        details
    }

    pub fn tools_used(&self) -> &[String] {
        match self {
            Self::Claims(d) => &d.tools_used,
            Self::Underwriting(d) => &d.tools_used,
            Self::Fraud(d) => &d.tools_used,
            Self::Support(d) => &d.tools_used,
            Self::Unknown(_) => &[],
        }
    }

    fn extra_mut(&mut self) -> Option<&mut Map<String, Value>> {
        match self {
            Self::Claims(d) => Some(&mut d.extra),
            Self::Underwriting(d) => Some(&mut d.extra),
            Self::Fraud(d) => Some(&mut d.extra),
            Self::Support(d) => Some(&mut d.extra),
            Self::Unknown(_) => None,
        }
    }

    fn claims(&self) -> Option<&ClaimDetails> {
        match self {
            Self::Claims(d) => Some(d),
            _ => None,
        }
    }
}

/// Structured decision output produced by an agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DecisionOutput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<Decision>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<Confidence>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payout_amount: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clause_attribution: Option<ClauseAttribution>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deterministic_overrides: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_passed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub human_override: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<DecisionDetails>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
    /// Set when the trace carried an output payload, even an empty one.
    #[serde(skip)]
    pub reported: bool,
}

#[derive(Deserialize)]
struct OutputEnvelope {
    #[serde(default, deserialize_with = "lenient::loose_string")]
    decision: Option<String>,
    #[serde(default, deserialize_with = "lenient::loose_f64")]
    confidence: Option<f64>,
    #[serde(default, deserialize_with = "lenient::loose_string")]
    reasoning: Option<String>,
    #[serde(default, deserialize_with = "lenient::loose_f64")]
    payout_amount: Option<f64>,
    #[serde(default, deserialize_with = "lenient::loose")]
    clause_attribution: Option<ClauseAttribution>,
    #[serde(default, deserialize_with = "lenient::loose")]
    deterministic_overrides: Option<Vec<Value>>,
    #[serde(default, deserialize_with = "lenient::loose_bool")]
    validation_passed: Option<bool>,
    #[serde(default)]
    human_override: Option<Value>,
    #[serde(default)]
    details: Option<Value>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl DecisionOutput {
    /// Build the typed view of an output payload for the given agent. Known
    /// fields with unexpected types read as absent and keep their raw value
    /// in `extra`.
    pub fn from_value(agent: AgentCategory, value: Value) -> Self {
        let map = match value {
            Value::Null => return Self::default(),
            Value::Object(map) => map,
            other => {
                let mut extra = Map::new();
                extra.insert("value".to_string(), other);
                return Self { extra, reported: true, ..Self::default() };
            }
        };

        let envelope: OutputEnvelope = match serde_json::from_value(Value::Object(map.clone())) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, agent = %agent, "Output payload could not be typed; keeping it untyped");
                return Self { extra: map, reported: true, ..Self::default() };
            }
        };

        let mut output = Self {
            decision: envelope.decision.as_deref().and_then(Decision::parse),
            confidence: envelope.confidence.and_then(|c| Confidence::from_raw(c).ok()),
            reasoning: envelope.reasoning,
            payout_amount: envelope.payout_amount,
            clause_attribution: envelope.clause_attribution,
            deterministic_overrides: envelope.deterministic_overrides,
            validation_passed: envelope.validation_passed,
            human_override: envelope.human_override,
            details: envelope
                .details
                .filter(|d| !d.is_null())
                .map(|d| DecisionDetails::parse(agent, d)),
            extra: envelope.extra,
            reported: true,
        };
        let untyped = unparsed_entries(&map, &output);
        output.extra.extend(untyped);
        output
    }

    /// True when the trace carried no output payload at all.
    pub fn is_absent(&self) -> bool {
        !self.reported && *self == Self::default()
    }

    /// Payout: the claims detail figure, else the top-level one, else 0.
    pub fn payout(&self) -> f64 {
        let detail = self.details.as_ref().and_then(DecisionDetails::claims).and_then(|d| d.payout_amount);
        first_nonzero(&[detail, self.payout_amount]).unwrap_or(0.0)
    }

    pub fn coverage_limit(&self) -> Option<f64> {
        let detail = self.details.as_ref().and_then(DecisionDetails::claims).and_then(|d| d.coverage_limit);
        let attributed = self.clause_attribution.as_ref().and_then(|c| c.coverage_limit);
        first_nonzero(&[detail, attributed])
    }

    pub fn exclusion_triggered(&self) -> bool {
        let top = self
            .clause_attribution
            .as_ref()
            .and_then(|c| c.exclusion_triggered)
            .unwrap_or(false);
        let nested = self
            .details
            .as_ref()
            .and_then(DecisionDetails::claims)
            .and_then(|d| d.clause_attribution.as_ref())
            .and_then(|c| c.exclusion_triggered)
            .unwrap_or(false);
        top || nested
    }

    /// Guardrail clearance: deterministic overrides reported and empty, or
    /// validation explicitly passed.
    pub fn has_guardrail_clearance(&self) -> bool {
        let no_overrides = self
            .deterministic_overrides
            .as_ref()
            .map(Vec::is_empty)
            .unwrap_or(false);
        no_overrides || self.validation_passed == Some(true)
    }

    /// Confidence percentage; an unreported confidence counts as 0.
    pub fn confidence_percent(&self) -> f64 {
        self.confidence.map(|c| c.percent()).unwrap_or(0.0)
    }

    pub fn tools_used(&self) -> &[String] {
        self.details.as_ref().map(DecisionDetails::tools_used).unwrap_or(&[])
    }
}

/// One finalized agent execution. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawTrace")]
pub struct Trace {
    pub id: String,
    #[serde(rename = "agent_type")]
    pub agent: AgentCategory,
    pub timestamp: DateTime<Utc>,
    pub total_latency_ms: u64,
    pub total_cost_usd: f64,
    #[serde(rename = "decision_type")]
    pub decision: Option<Decision>,
    pub confidence: Option<Confidence>,
    pub reasoning: Option<String>,
    pub status: ExecutionStatus,
    #[serde(rename = "input_data", skip_serializing_if = "DecisionInput::is_absent")]
    pub input: DecisionInput,
    #[serde(rename = "output_data", skip_serializing_if = "DecisionOutput::is_absent")]
    pub output: DecisionOutput,
    pub llm_calls: Vec<LlmCall>,
    pub tool_calls: Vec<ToolCall>,
    pub guardrail_checks: Vec<GuardrailCheck>,
}

/// Trace as emitted by the agent collector, before normalization.
#[derive(Debug, Clone, Deserialize)]
pub struct RawTrace {
    #[serde(default, alias = "trace_id")]
    pub id: Option<String>,
    #[serde(alias = "agent")]
    pub agent_type: String,
    #[serde(default, alias = "created_at")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, alias = "total_latency", deserialize_with = "lenient::opt_f64")]
    pub total_latency_ms: Option<f64>,
    #[serde(default, alias = "total_cost", deserialize_with = "lenient::opt_f64")]
    pub total_cost_usd: Option<f64>,
    #[serde(default)]
    pub decision_type: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub reasoning: Option<String>,
    #[serde(default)]
    pub status: Option<ExecutionStatus>,
    #[serde(default)]
    pub input_data: Option<Value>,
    #[serde(default)]
    pub output_data: Option<Value>,
    #[serde(default)]
    pub llm_calls: Vec<LlmCall>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, alias = "guardrails")]
    pub guardrail_checks: Vec<GuardrailCheck>,
}

impl TryFrom<RawTrace> for Trace {
    type Error = ModelError;

    fn try_from(raw: RawTrace) -> Result<Self, Self::Error> {
        let agent: AgentCategory = raw.agent_type.parse()?;

        let latency = raw.total_latency_ms.unwrap_or(0.0);
        if !latency.is_finite() || latency < 0.0 {
            return Err(ModelError::InvalidValue {
                field: "total_latency_ms",
                reason: format!("{latency} is not a non-negative duration"),
            });
        }

        let cost = raw.total_cost_usd.unwrap_or(0.0);
        if !cost.is_finite() {
            return Err(ModelError::InvalidValue {
                field: "total_cost_usd",
                reason: format!("{cost} is not a finite amount"),
            });
        }

        let output = DecisionOutput::from_value(agent, raw.output_data.unwrap_or(Value::Null));
        let confidence = match raw.confidence {
            Some(c) => Some(Confidence::from_raw(c)?),
            None => output.confidence,
        };
        let decision = raw
            .decision_type
            .as_deref()
            .and_then(Decision::parse)
            .or(output.decision);

        Ok(Self {
            id: raw.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            agent,
            timestamp: raw.timestamp.unwrap_or_else(Utc::now),
            total_latency_ms: latency.round() as u64,
            total_cost_usd: cost,
            decision,
            confidence,
            reasoning: raw.reasoning,
            status: raw.status.unwrap_or_default(),
            input: DecisionInput::from_value(raw.input_data.unwrap_or(Value::Null)),
            output,
            llm_calls: raw.llm_calls,
            tool_calls: raw.tool_calls,
            guardrail_checks: raw.guardrail_checks,
        })
    }
}

impl Trace {
    /// Start an empty successful trace for `agent`, stamped now.
    pub fn new(agent: AgentCategory) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            agent,
            timestamp: Utc::now(),
            total_latency_ms: 0,
            total_cost_usd: 0.0,
            decision: None,
            confidence: None,
            reasoning: None,
            status: ExecutionStatus::Success,
            input: DecisionInput::default(),
            output: DecisionOutput::default(),
            llm_calls: Vec::new(),
            tool_calls: Vec::new(),
            guardrail_checks: Vec::new(),
        }
    }

    pub fn from_json(json: &str) -> Result<Self, ModelError> {
        let raw: RawTrace = serde_json::from_str(json)?;
        Trace::try_from(raw)
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_latency_ms(mut self, latency_ms: u64) -> Self {
        self.total_latency_ms = latency_ms;
        self
    }

    pub fn with_cost_usd(mut self, cost: f64) -> Self {
        self.total_cost_usd = cost;
        self
    }

    pub fn with_status(mut self, status: ExecutionStatus) -> Self {
        self.status = status;
        self
    }

    /// Set the decision on both the trace and its output payload.
    pub fn with_decision(mut self, decision: Decision) -> Self {
        self.decision = Some(decision);
        self.output.decision = Some(decision);
        self.output.extra.remove("decision");
        self
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = Some(reasoning.into());
        self
    }

    pub fn with_input(mut self, input: DecisionInput) -> Self {
        self.input = input;
        self
    }

    pub fn with_output(mut self, output: DecisionOutput) -> Self {
        if self.decision.is_none() {
            self.decision = output.decision;
        }
        if self.confidence.is_none() {
            self.confidence = output.confidence;
        }
        self.output = output;
        self
    }

    pub fn with_llm_call(mut self, call: LlmCall) -> Self {
        self.llm_calls.push(call);
        self
    }

    pub fn with_tool_call(mut self, call: ToolCall) -> Self {
        self.tool_calls.push(call);
        self
    }

    pub fn with_guardrail(mut self, check: GuardrailCheck) -> Self {
        self.guardrail_checks.push(check);
        self
    }

    /// Decision as reported in the output payload, else the trace column.
    pub fn effective_decision(&self) -> Option<Decision> {
        self.output.decision.or(self.decision)
    }

    pub fn has_failed_guardrail(&self) -> bool {
        self.guardrail_checks.iter().any(|g| !g.passed)
    }
}

fn default_true() -> bool {
    true
}

fn first_nonzero(candidates: &[Option<f64>]) -> Option<f64> {
    candidates.iter().flatten().copied().find(|v| *v != 0.0)
}

/// Raw entries of `raw` that `typed` no longer carries: known fields whose
/// values were of an unexpected type and so read as absent.
fn unparsed_entries<T: Serialize>(raw: &Map<String, Value>, typed: &T) -> Vec<(String, Value)> {
    let parsed = match serde_json::to_value(typed) {
        Ok(Value::Object(parsed)) => parsed,
        _ => return Vec::new(),
    };
    raw.iter()
        .filter(|(key, value)| !value.is_null() && !parsed.contains_key(*key))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

fn first_non_empty<'a>(candidates: &[&'a Option<String>]) -> Option<&'a str> {
    candidates
        .iter()
        .filter_map(|c| c.as_deref())
        .find(|s| !s.is_empty())
}

/// Deserializers that accept numbers encoded either as JSON numbers or as
/// numeric strings (decimal columns are commonly serialized as strings).
///
/// The `loose_*` variants never fail: a value of the wrong type reads as
/// absent, so one odd field in an agent payload leaves its siblings typed.
pub(crate) mod lenient {
    use serde::de::DeserializeOwned;
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    fn to_f64<E: serde::de::Error>(value: Value) -> Result<Option<f64>, E> {
        match value {
            Value::Null => Ok(None),
            Value::Number(n) => Ok(n.as_f64()),
            Value::String(s) if s.trim().is_empty() => Ok(None),
            Value::String(s) => s.trim().parse::<f64>().map(Some).map_err(E::custom),
            other => Err(E::custom(format!("expected a number, got {other}"))),
        }
    }

    pub fn opt_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
        let value = Option::<Value>::deserialize(deserializer)?;
        match value {
            None => Ok(None),
            Some(v) => to_f64(v),
        }
    }

    pub fn f64_or_zero<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        opt_f64(deserializer).map(|v| v.unwrap_or(0.0))
    }

    pub fn f64_required<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        opt_f64(deserializer)?.ok_or_else(|| serde::de::Error::custom("missing numeric value"))
    }

    pub fn loose_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
        let value = Option::<Value>::deserialize(deserializer)?;
        Ok(value.and_then(|v| to_f64::<serde_json::Error>(v).ok().flatten()))
    }

    /// Strings as-is; numbers and booleans in their JSON text form.
    pub fn loose_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
        let value = Option::<Value>::deserialize(deserializer)?;
        Ok(match value {
            Some(Value::String(s)) => Some(s),
            Some(Value::Number(n)) => Some(n.to_string()),
            Some(Value::Bool(b)) => Some(b.to_string()),
            _ => None,
        })
    }

    /// Booleans, plus the strings "true"/"false" and the numbers 1/0.
    pub fn loose_bool<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<bool>, D::Error> {
        let value = Option::<Value>::deserialize(deserializer)?;
        Ok(match value {
            Some(Value::Bool(b)) => Some(b),
            Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => Some(true),
                "false" => Some(false),
                _ => None,
            },
            Some(Value::Number(n)) => match n.as_f64() {
                Some(v) if v == 1.0 => Some(true),
                Some(v) if v == 0.0 => Some(false),
                _ => None,
            },
            _ => None,
        })
    }

    pub fn loose<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
    where
        D: Deserializer<'de>,
        T: DeserializeOwned,
    {
        let value = Option::<Value>::deserialize(deserializer)?;
        Ok(value.and_then(|v| serde_json::from_value(v).ok()))
    }

    pub fn loose_or_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
    where
        D: Deserializer<'de>,
        T: DeserializeOwned + Default,
    {
        loose(deserializer).map(Option::unwrap_or_default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_confidence_normalization() {
        assert_eq!(Confidence::from_raw(0.35).unwrap().percent(), 35.0);
        assert_eq!(Confidence::from_raw(35.0).unwrap().percent(), 35.0);
        assert_eq!(Confidence::from_raw(1.0).unwrap().percent(), 100.0);
        assert_eq!(Confidence::from_raw(250.0).unwrap().percent(), 100.0);
        assert!(Confidence::from_raw(f64::NAN).is_err());
        assert!(Confidence::from_raw(-0.2).is_err());
    }

    #[test]
    fn test_confidence_round_trip_is_stable() {
        let c = Confidence::from_raw(72.0).unwrap();
        let json = serde_json::to_string(&c).unwrap();
        let back: Confidence = serde_json::from_str(&json).unwrap();
        assert_eq!(c, back);
    }

    #[test]
    fn test_raw_trace_conversion() {
        let trace = Trace::from_json(
            &json!({
                "id": "t-1",
                "agent_type": "claims",
                "total_latency": 1200,
                "total_cost": "0.004200",
                "confidence": 82,
                "status": "success",
                "input_data": { "claim_amount": 5000, "policy_id": "POL-1234567", "region": "West" },
                "output_data": {
                    "decision": "approved",
                    "confidence": 0.82,
                    "details": { "payout_amount": 4000, "coverage_limit": 10000, "toolsUsed": ["policy_lookup"] }
                }
            })
            .to_string(),
        )
        .unwrap();

        assert_eq!(trace.agent, AgentCategory::Claims);
        assert_eq!(trace.total_latency_ms, 1200);
        assert!((trace.total_cost_usd - 0.0042).abs() < 1e-9);
        assert_eq!(trace.confidence.unwrap().percent(), 82.0);
        assert_eq!(trace.effective_decision(), Some(Decision::Approved));
        assert_eq!(trace.input.claimed_amount(), 5000.0);
        assert_eq!(trace.input.geography(), Some("West"));
        assert_eq!(trace.output.payout(), 4000.0);
        assert_eq!(trace.output.coverage_limit(), Some(10000.0));
        assert_eq!(trace.output.tools_used(), ["policy_lookup".to_string()]);
    }

    #[test]
    fn test_unknown_agent_is_rejected() {
        let err = Trace::from_json(r#"{"agent_type":"pricing"}"#).unwrap_err();
        assert!(matches!(err, ModelError::UnknownAgent(_)));
    }

    #[test]
    fn test_mistyped_detail_field_keeps_siblings_typed() {
        let output = DecisionOutput::from_value(
            AgentCategory::Fraud,
            json!({ "decision": "flagged", "details": { "fraud_probability": "very high", "flags_count": 3 } }),
        );
        assert_eq!(output.decision, Some(Decision::Flagged));
        match output.details {
            Some(DecisionDetails::Fraud(details)) => {
                assert_eq!(details.fraud_probability, None);
                assert_eq!(details.flags_count, Some(3));
                assert_eq!(details.extra["fraud_probability"], json!("very high"));
            }
            other => panic!("expected fraud details, got {other:?}"),
        }
    }

    #[test]
    fn test_non_object_details_stay_unknown() {
        let output = DecisionOutput::from_value(AgentCategory::Claims, json!({ "details": "see notes" }));
        assert!(matches!(output.details, Some(DecisionDetails::Unknown(_))));
    }

    #[test]
    fn test_numeric_policy_id_keeps_amount_typed() {
        let input = DecisionInput::from_value(json!({ "amount": 600000, "policy_id": 12345678, "state": 48 }));
        assert_eq!(input.claimed_amount(), 600000.0);
        assert_eq!(input.policy_id.as_deref(), Some("12345678"));
        assert_eq!(input.geography(), Some("48"));
        assert!(input.extra.is_empty());
    }

    #[test]
    fn test_mistyped_input_field_is_kept_raw() {
        let input = DecisionInput::from_value(json!({ "claim_amount": 7500, "age": { "years": 40 } }));
        assert_eq!(input.claimed_amount(), 7500.0);
        assert_eq!(input.age, None);
        assert_eq!(input.extra["age"], json!({ "years": 40 }));

        let serialized = serde_json::to_value(&input).unwrap();
        assert_eq!(serialized["age"], json!({ "years": 40 }));
    }

    #[test]
    fn test_string_flag_keeps_confidence_typed() {
        let output = DecisionOutput::from_value(
            AgentCategory::Claims,
            json!({ "decision": "approved", "confidence": 0.9, "validation_passed": "true" }),
        );
        assert_eq!(output.confidence_percent(), 90.0);
        assert_eq!(output.validation_passed, Some(true));
        assert!(output.has_guardrail_clearance());
    }

    #[test]
    fn test_unreadable_output_fields_are_kept_raw() {
        let output = DecisionOutput::from_value(
            AgentCategory::Claims,
            json!({
                "decision": "deferred",
                "confidence": "high",
                "payout_amount": "1200",
                "clause_attribution": "none"
            }),
        );
        assert_eq!(output.decision, None);
        assert_eq!(output.confidence, None);
        assert_eq!(output.payout(), 1200.0);
        assert_eq!(output.clause_attribution, None);
        assert_eq!(output.extra["decision"], json!("deferred"));
        assert_eq!(output.extra["confidence"], json!("high"));
        assert_eq!(output.extra["clause_attribution"], json!("none"));
        assert!(!output.extra.contains_key("payout_amount"));
    }

    #[test]
    fn test_empty_payloads_are_reported() {
        let trace = Trace::from_json(r#"{"agent_type":"support","input_data":{},"output_data":{}}"#).unwrap();
        assert!(!trace.input.is_absent());
        assert!(!trace.output.is_absent());

        let bare = Trace::from_json(r#"{"agent_type":"support"}"#).unwrap();
        assert!(bare.input.is_absent());
        assert!(bare.output.is_absent());

        let json = serde_json::to_value(&bare).unwrap();
        assert!(json.get("input_data").is_none());
        let back: Trace = serde_json::from_value(serde_json::to_value(&trace).unwrap()).unwrap();
        assert!(!back.input.is_absent());
    }

    #[test]
    fn test_unrecognised_decision_maps_to_none() {
        let output = DecisionOutput::from_value(AgentCategory::Support, json!({ "decision": "deferred" }));
        assert_eq!(output.decision, None);
    }

    #[test]
    fn test_trace_serialization_round_trip() {
        let trace = Trace::new(AgentCategory::Underwriting)
            .with_latency_ms(900)
            .with_decision(Decision::Rejected)
            .with_guardrail(GuardrailCheck::failed(GuardrailKind::Bias, "skewed"));
        let json = serde_json::to_string(&trace).unwrap();
        let back: Trace = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, trace.id);
        assert_eq!(back.total_latency_ms, 900);
        assert_eq!(back.effective_decision(), Some(Decision::Rejected));
        assert!(back.has_failed_guardrail());
    }

    #[test]
    fn test_guardrail_clearance() {
        let mut output = DecisionOutput::default();
        assert!(!output.has_guardrail_clearance());
        output.deterministic_overrides = Some(vec![]);
        assert!(output.has_guardrail_clearance());
        output.deterministic_overrides = Some(vec![json!("cap_payout")]);
        assert!(!output.has_guardrail_clearance());
        output.validation_passed = Some(true);
        assert!(output.has_guardrail_clearance());
    }
}
