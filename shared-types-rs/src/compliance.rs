//! Compliance pass results: PII findings, policy validation, the audit record
//! and the per-trace compliance event.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::model::{AgentCategory, GuardrailKind};

/// Severity of a single PII detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PiiSeverity {
    Medium,
    High,
    Critical,
}

/// Aggregate PII risk of a scan: the highest severity found, or `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    #[default]
    None,
    Medium,
    High,
    Critical,
}

impl From<PiiSeverity> for RiskLevel {
    fn from(severity: PiiSeverity) -> Self {
        match severity {
            PiiSeverity::Medium => RiskLevel::Medium,
            PiiSeverity::High => RiskLevel::High,
            PiiSeverity::Critical => RiskLevel::Critical,
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Matches of one detector within the scanned text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PiiFinding {
    #[serde(rename = "type")]
    pub pii_type: String,
    pub count: usize,
    pub severity: PiiSeverity,
    /// Up to two masked samples (first four characters plus `***`).
    pub samples: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PiiScanResult {
    pub clean: bool,
    pub findings: Vec<PiiFinding>,
    pub risk_level: RiskLevel,
    pub total_exposures: usize,
    pub scanned_fields: usize,
    pub scanned_chars: usize,
}

impl PiiScanResult {
    pub fn finding_types(&self) -> Vec<&str> {
        self.findings.iter().map(|f| f.pii_type.as_str()).collect()
    }
}

/// Identifier of a fixed policy rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PolicyRuleId {
    #[serde(rename = "PR-001")]
    CoverageLimit,
    #[serde(rename = "PR-002")]
    ExclusionOverride,
    #[serde(rename = "PR-003")]
    ConfidenceFloor,
    #[serde(rename = "PR-004")]
    HighValueEscalation,
    #[serde(rename = "PR-005")]
    PreExistingDisclosure,
    #[serde(rename = "PR-006")]
    DecisionAuthority,
}

impl PolicyRuleId {
    pub const ALL: [PolicyRuleId; 6] = [
        PolicyRuleId::CoverageLimit,
        PolicyRuleId::ExclusionOverride,
        PolicyRuleId::ConfidenceFloor,
        PolicyRuleId::HighValueEscalation,
        PolicyRuleId::PreExistingDisclosure,
        PolicyRuleId::DecisionAuthority,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            Self::CoverageLimit => "PR-001",
            Self::ExclusionOverride => "PR-002",
            Self::ConfidenceFloor => "PR-003",
            Self::HighValueEscalation => "PR-004",
            Self::PreExistingDisclosure => "PR-005",
            Self::DecisionAuthority => "PR-006",
        }
    }
}

impl fmt::Display for PolicyRuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Outcome of one policy rule against one trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRuleResult {
    pub rule_id: PolicyRuleId,
    pub rule_name: String,
    pub description: String,
    pub passed: bool,
    pub detail: String,
    /// Set when the check itself failed and the rule was recorded as passed.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub error: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyValidation {
    pub total_rules: usize,
    pub passed: usize,
    pub failed: usize,
    pub compliance_rate: u32,
    pub results: Vec<PolicyRuleResult>,
    pub violations: Vec<PolicyRuleResult>,
    pub checked_at: DateTime<Utc>,
}

impl PolicyValidation {
    /// Summarize rule results. An empty rule set is fully compliant.
    pub fn from_results(results: Vec<PolicyRuleResult>, checked_at: DateTime<Utc>) -> Self {
        let total_rules = results.len();
        let passed = results.iter().filter(|r| r.passed).count();
        let violations: Vec<_> = results.iter().filter(|r| !r.passed).cloned().collect();
        let compliance_rate = if total_rules == 0 {
            100
        } else {
            ((passed as f64 / total_rules as f64) * 100.0).round() as u32
        };

        Self {
            total_rules,
            passed,
            failed: total_rules - passed,
            compliance_rate,
            results,
            violations,
            checked_at,
        }
    }

    pub fn violated_rule_ids(&self) -> Vec<PolicyRuleId> {
        self.violations.iter().map(|v| v.rule_id).collect()
    }
}

/// Overall verdict of a compliance pass, most severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallStatus {
    Critical,
    Warning,
    Review,
    Compliant,
}

impl OverallStatus {
    pub const ALL: [OverallStatus; 4] = [
        OverallStatus::Compliant,
        OverallStatus::Review,
        OverallStatus::Warning,
        OverallStatus::Critical,
    ];

    /// First matching condition wins.
    pub fn assess(pii: &PiiScanResult, policy: &PolicyValidation) -> Self {
        if pii.risk_level == RiskLevel::Critical || policy.compliance_rate < 50 {
            Self::Critical
        } else if pii.risk_level == RiskLevel::High || policy.compliance_rate < 80 {
            Self::Warning
        } else if !pii.clean || !policy.violations.is_empty() {
            Self::Review
        } else {
            Self::Compliant
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::Warning => "warning",
            Self::Review => "review",
            Self::Compliant => "compliant",
        }
    }
}

impl fmt::Display for OverallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditDecision {
    #[serde(rename = "type")]
    pub decision_type: String,
    pub confidence: Option<f64>,
    pub reasoning: Option<String>,
}

/// Input summary with identifiers masked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedactedInputSummary {
    pub claim_type: Option<String>,
    pub amount: Option<f64>,
    pub policy_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PiiSummary {
    pub clean: bool,
    pub risk_level: RiskLevel,
    pub exposures: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyComplianceSummary {
    pub rate: u32,
    pub violations: usize,
    pub failed_rules: Vec<PolicyRuleId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardrailResult {
    #[serde(rename = "type")]
    pub check_type: GuardrailKind,
    pub passed: bool,
}

/// Regulator-facing summary of one agent decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub trace_id: String,
    pub agent_type: AgentCategory,
    pub timestamp: DateTime<Utc>,
    pub decision: AuditDecision,
    pub input_summary: RedactedInputSummary,
    pub tools_used: Vec<String>,
    pub model_used: String,
    pub total_latency_ms: u64,
    pub total_cost_usd: f64,
    pub human_override: Option<Value>,
    pub escalated_to_human: bool,
    pub pii_scan: PiiSummary,
    pub policy_compliance: PolicyComplianceSummary,
    pub guardrail_checks: Vec<GuardrailResult>,
    pub audit_version: String,
    pub generated_at: DateTime<Utc>,
}

/// Persisted outcome of one compliance pass. Write-once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceEvent {
    pub id: String,
    pub trace_id: String,
    pub agent_type: AgentCategory,
    pub pii_clean: bool,
    pub pii_risk_level: RiskLevel,
    pub pii_exposures: usize,
    pub pii_findings: Vec<PiiFinding>,
    pub policy_compliance_rate: u32,
    pub policy_violations: Vec<PolicyRuleResult>,
    pub policy_rules_checked: usize,
    pub policy_rules_passed: usize,
    pub audit_record: AuditRecord,
    pub overall_status: OverallStatus,
    pub created_at: DateTime<Utc>,
}

impl ComplianceEvent {
    pub fn new(
        pii: &PiiScanResult,
        policy: &PolicyValidation,
        audit_record: AuditRecord,
        overall_status: OverallStatus,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            trace_id: audit_record.trace_id.clone(),
            agent_type: audit_record.agent_type,
            pii_clean: pii.clean,
            pii_risk_level: pii.risk_level,
            pii_exposures: pii.total_exposures,
            pii_findings: pii.findings.clone(),
            policy_compliance_rate: policy.compliance_rate,
            policy_violations: policy.violations.clone(),
            policy_rules_checked: policy.total_rules,
            policy_rules_passed: policy.passed,
            audit_record,
            overall_status,
            created_at: Utc::now(),
        }
    }
}

/// Summary pushed on the `compliance_update` topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceUpdate {
    #[serde(rename = "type")]
    pub kind: String,
    pub trace_id: String,
    pub agent_type: AgentCategory,
    pub pii_clean: bool,
    pub pii_risk_level: RiskLevel,
    pub policy_compliance_rate: u32,
    pub violations: usize,
    pub overall_status: OverallStatus,
    pub latency_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule_result(rule_id: PolicyRuleId, passed: bool) -> PolicyRuleResult {
        PolicyRuleResult {
            rule_id,
            rule_name: rule_id.code().to_string(),
            description: String::new(),
            passed,
            detail: String::new(),
            error: false,
        }
    }

    fn validation(passed: usize, failed: usize) -> PolicyValidation {
        let mut results = Vec::new();
        for id in PolicyRuleId::ALL.iter().take(passed) {
            results.push(rule_result(*id, true));
        }
        for id in PolicyRuleId::ALL.iter().skip(passed).take(failed) {
            results.push(rule_result(*id, false));
        }
        PolicyValidation::from_results(results, Utc::now())
    }

    fn pii(risk_level: RiskLevel) -> PiiScanResult {
        PiiScanResult { clean: risk_level == RiskLevel::None, risk_level, ..Default::default() }
    }

    #[test]
    fn test_compliance_rate_rounding() {
        assert_eq!(validation(6, 0).compliance_rate, 100);
        assert_eq!(validation(5, 1).compliance_rate, 83);
        assert_eq!(validation(4, 2).compliance_rate, 67);
        assert_eq!(validation(0, 0).compliance_rate, 100);
    }

    #[test]
    fn test_overall_status_precedence() {
        let clean_policy = validation(6, 0);
        assert_eq!(OverallStatus::assess(&pii(RiskLevel::Critical), &clean_policy), OverallStatus::Critical);
        assert_eq!(OverallStatus::assess(&pii(RiskLevel::High), &clean_policy), OverallStatus::Warning);
        assert_eq!(OverallStatus::assess(&pii(RiskLevel::Medium), &clean_policy), OverallStatus::Review);
        assert_eq!(OverallStatus::assess(&pii(RiskLevel::None), &clean_policy), OverallStatus::Compliant);
        // 5 of 6 passed is 83%, above every threshold, but still a violation.
        assert_eq!(OverallStatus::assess(&pii(RiskLevel::None), &validation(5, 1)), OverallStatus::Review);
        assert_eq!(OverallStatus::assess(&pii(RiskLevel::None), &validation(4, 2)), OverallStatus::Warning);
    }

    #[test]
    fn test_overall_status_from_rate_alone() {
        let mut policy = validation(6, 0);
        policy.compliance_rate = 90;
        assert_eq!(OverallStatus::assess(&pii(RiskLevel::Critical), &policy), OverallStatus::Critical);
        policy.compliance_rate = 45;
        assert_eq!(OverallStatus::assess(&pii(RiskLevel::None), &policy), OverallStatus::Critical);
    }

    #[test]
    fn test_policy_rule_id_serializes_as_code() {
        let json = serde_json::to_string(&PolicyRuleId::HighValueEscalation).unwrap();
        assert_eq!(json, "\"PR-004\"");
    }
}
