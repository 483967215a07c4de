//! Alert rules and the alerts they raise.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::{lenient, AgentCategory, Trace};

/// Metric an alert rule watches.
///
/// Names are parsed leniently: anything unknown is preserved as
/// `Unrecognized` so the rule listing still loads and the rule is simply
/// never breached.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AlertMetric {
    /// Latency of the current trace.
    Latency,
    /// Nearest-rank p95 latency over the lookback window.
    LatencyP95,
    /// Percentage of errored traces in the window.
    ErrorRate,
    /// Cost of the current trace.
    Cost,
    /// Summed cost over the window.
    CostPerHour,
    /// Percentage of escalated or flagged decisions in the window.
    EscalationRate,
    /// 100 when any guardrail on the current trace failed, else 0.
    GuardrailFailureRate,
    Unrecognized(String),
}

impl AlertMetric {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Latency => "latency",
            Self::LatencyP95 => "latency_p95",
            Self::ErrorRate => "error_rate",
            Self::Cost => "cost",
            Self::CostPerHour => "cost_per_hour",
            Self::EscalationRate => "escalation_rate",
            Self::GuardrailFailureRate => "guardrail_failure_rate",
            Self::Unrecognized(name) => name,
        }
    }
}

impl From<String> for AlertMetric {
    fn from(name: String) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "latency" => Self::Latency,
            "latency_p95" => Self::LatencyP95,
            "error_rate" => Self::ErrorRate,
            "cost" => Self::Cost,
            "cost_per_hour" => Self::CostPerHour,
            "escalation_rate" => Self::EscalationRate,
            "guardrail_failure_rate" => Self::GuardrailFailureRate,
            _ => Self::Unrecognized(name),
        }
    }
}

impl From<AlertMetric> for String {
    fn from(metric: AlertMetric) -> Self {
        metric.as_str().to_string()
    }
}

impl fmt::Display for AlertMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Comparison between an observed metric value and a rule threshold.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ComparisonOperator {
    GreaterThan,
    LessThan,
    GreaterThanOrEqual,
    LessThanOrEqual,
    Equal,
    NotEqual,
    Unrecognized(String),
}

impl ComparisonOperator {
    /// Apply the operator. An unrecognised operator never breaches.
    pub fn compare(&self, observed: f64, threshold: f64) -> bool {
        match self {
            Self::GreaterThan => observed > threshold,
            Self::LessThan => observed < threshold,
            Self::GreaterThanOrEqual => observed >= threshold,
            Self::LessThanOrEqual => observed <= threshold,
            Self::Equal => observed == threshold,
            Self::NotEqual => observed != threshold,
            Self::Unrecognized(_) => false,
        }
    }

    pub fn is_recognized(&self) -> bool {
        !matches!(self, Self::Unrecognized(_))
    }
}

impl From<String> for ComparisonOperator {
    fn from(op: String) -> Self {
        match op.trim() {
            ">" | "gt" => Self::GreaterThan,
            "<" | "lt" => Self::LessThan,
            ">=" | "gte" => Self::GreaterThanOrEqual,
            "<=" | "lte" => Self::LessThanOrEqual,
            "==" | "=" | "eq" => Self::Equal,
            "!=" | "ne" => Self::NotEqual,
            _ => Self::Unrecognized(op),
        }
    }
}

impl From<ComparisonOperator> for String {
    fn from(op: ComparisonOperator) -> Self {
        op.to_string()
    }
}

impl fmt::Display for ComparisonOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GreaterThan => write!(f, ">"),
            Self::LessThan => write!(f, "<"),
            Self::GreaterThanOrEqual => write!(f, ">="),
            Self::LessThanOrEqual => write!(f, "<="),
            Self::Equal => write!(f, "=="),
            Self::NotEqual => write!(f, "!="),
            Self::Unrecognized(op) => write!(f, "{}", op),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
    Investigation,
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Critical => write!(f, "critical"),
            Self::Investigation => write!(f, "investigation"),
        }
    }
}

/// Cooldown applied when neither the rule nor the engine configures one.
pub const DEFAULT_COOLDOWN_MINUTES: u32 = 5;

fn default_enabled() -> bool {
    true
}

/// Operator-configured alerting rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub metric: AlertMetric,
    #[serde(alias = "condition")]
    pub operator: ComparisonOperator,
    #[serde(deserialize_with = "lenient::f64_required")]
    pub threshold: f64,
    pub severity: AlertSeverity,
    #[serde(default, alias = "agent_type", skip_serializing_if = "Option::is_none")]
    pub agent_scope: Option<AgentCategory>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Minutes a fired rule stays quiet; unset falls back to the engine default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_minutes: Option<u32>,
}

impl AlertRule {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        metric: AlertMetric,
        operator: ComparisonOperator,
        threshold: f64,
        severity: AlertSeverity,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            metric,
            operator,
            threshold,
            severity,
            agent_scope: None,
            enabled: true,
            cooldown_minutes: None,
        }
    }

    pub fn with_scope(mut self, agent: AgentCategory) -> Self {
        self.agent_scope = Some(agent);
        self
    }

    pub fn with_cooldown_minutes(mut self, minutes: u32) -> Self {
        self.cooldown_minutes = Some(minutes);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn cooldown_or(&self, default_minutes: u32) -> u32 {
        self.cooldown_minutes.unwrap_or(default_minutes)
    }

    /// Dedup key: rule id plus the rule's scope, or `all` when unscoped.
    pub fn dedup_key(&self) -> String {
        match self.agent_scope {
            Some(agent) => format!("{}_{}", self.id, agent),
            None => format!("{}_all", self.id),
        }
    }

    /// True when the rule applies to traces from `agent`.
    pub fn applies_to(&self, agent: AgentCategory) -> bool {
        self.agent_scope.map_or(true, |scope| scope == agent)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertMetadata {
    pub rule_metric: String,
    pub rule_operator: String,
}

/// A rule breach. Write-once: built, persisted and broadcast, never edited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub rule_id: String,
    pub rule_name: String,
    pub severity: AlertSeverity,
    pub title: String,
    pub description: String,
    pub observed_value: f64,
    pub threshold_value: f64,
    pub rule_scope: Option<AgentCategory>,
    pub agent: AgentCategory,
    pub trace_id: String,
    pub acknowledged: bool,
    pub triggered_at: DateTime<Utc>,
    pub metadata: AlertMetadata,
}

impl Alert {
    /// Build the alert raised by `rule` for `trace` at the given observed value.
    pub fn from_breach(rule: &AlertRule, trace: &Trace, observed_value: f64, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            rule_id: rule.id.clone(),
            rule_name: rule.name.clone(),
            severity: rule.severity,
            title: rule.name.clone(),
            description: format!(
                "Alert: {} — {} {} {} triggered by {} agent",
                rule.name, rule.metric, rule.operator, rule.threshold, trace.agent
            ),
            observed_value,
            threshold_value: rule.threshold,
            rule_scope: rule.agent_scope,
            agent: trace.agent,
            trace_id: trace.id.clone(),
            acknowledged: false,
            triggered_at: now,
            metadata: AlertMetadata {
                rule_metric: rule.metric.to_string(),
                rule_operator: rule.operator.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_operator_parsing_accepts_both_forms() {
        assert_eq!(ComparisonOperator::from("gt".to_string()), ComparisonOperator::GreaterThan);
        assert_eq!(ComparisonOperator::from(">".to_string()), ComparisonOperator::GreaterThan);
        assert_eq!(ComparisonOperator::from("lte".to_string()), ComparisonOperator::LessThanOrEqual);
        assert_eq!(ComparisonOperator::from("!=".to_string()), ComparisonOperator::NotEqual);
        assert!(!ComparisonOperator::from("~".to_string()).is_recognized());
    }

    #[test]
    fn test_operator_compare() {
        assert!(ComparisonOperator::GreaterThan.compare(9000.0, 8000.0));
        assert!(!ComparisonOperator::GreaterThan.compare(8000.0, 8000.0));
        assert!(ComparisonOperator::GreaterThanOrEqual.compare(8000.0, 8000.0));
        assert!(ComparisonOperator::Equal.compare(100.0, 100.0));
        assert!(!ComparisonOperator::Equal.compare(1e-10, 0.0));
        assert!(ComparisonOperator::NotEqual.compare(1e-10, 0.0));
        assert!(!ComparisonOperator::NotEqual.compare(0.0, 0.0));
        assert!(!ComparisonOperator::Unrecognized("~".into()).compare(1.0, 0.0));
    }

    #[test]
    fn test_rule_deserialization_is_lenient() {
        let rule: AlertRule = serde_json::from_value(json!({
            "id": "r1",
            "name": "Slow claims",
            "metric": "latency_p95",
            "condition": "gt",
            "threshold": "8000",
            "severity": "critical",
            "agent_type": "claims"
        }))
        .unwrap();

        assert_eq!(rule.metric, AlertMetric::LatencyP95);
        assert_eq!(rule.operator, ComparisonOperator::GreaterThan);
        assert_eq!(rule.threshold, 8000.0);
        assert_eq!(rule.cooldown_minutes, None);
        assert_eq!(rule.cooldown_or(DEFAULT_COOLDOWN_MINUTES), 5);
        assert!(rule.enabled);
        assert_eq!(rule.dedup_key(), "r1_claims");
    }

    #[test]
    fn test_unknown_metric_is_preserved() {
        let rule: AlertRule = serde_json::from_value(json!({
            "id": "r2", "name": "Odd", "metric": "token_burn", "operator": ">",
            "threshold": 1, "severity": "info"
        }))
        .unwrap();
        assert_eq!(rule.metric, AlertMetric::Unrecognized("token_burn".into()));
        assert_eq!(rule.dedup_key(), "r2_all");
        assert_eq!(serde_json::to_value(&rule.metric).unwrap(), json!("token_burn"));
    }

    #[test]
    fn test_alert_from_breach() {
        let rule = AlertRule::new(
            "r1",
            "Slow claims",
            AlertMetric::LatencyP95,
            ComparisonOperator::GreaterThan,
            8000.0,
            AlertSeverity::Critical,
        );
        let trace = Trace::new(AgentCategory::Claims).with_latency_ms(9000);
        let alert = Alert::from_breach(&rule, &trace, 9000.0, Utc::now());

        assert_eq!(alert.title, "Slow claims");
        assert_eq!(
            alert.description,
            "Alert: Slow claims — latency_p95 > 8000 triggered by claims agent"
        );
        assert_eq!(alert.observed_value, 9000.0);
        assert_eq!(alert.trace_id, trace.id);
        assert!(!alert.acknowledged);
        assert_eq!(alert.metadata.rule_operator, ">");
    }
}
