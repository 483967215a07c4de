//! Audit trail builder

use chrono::{DateTime, Utc};
use shared_types::{
    AuditDecision, AuditRecord, Decision, GuardrailResult, PiiScanResult, PiiSummary,
    PolicyComplianceSummary, PolicyValidation, RedactedInputSummary, Trace,
};

use crate::pii;

pub const AUDIT_VERSION: &str = "1.0";
const REDACTED: &str = "***REDACTED***";

pub fn build_audit_record(trace: &Trace, pii_scan: &PiiScanResult, policy: &PolicyValidation) -> AuditRecord {
    build_audit_record_at(trace, pii_scan, policy, Utc::now())
}

/// Assemble the regulator-facing record for one decision. Identifiers are
/// masked and free-text reasoning is passed through the PII redactor.
pub fn build_audit_record_at(
    trace: &Trace,
    pii_scan: &PiiScanResult,
    policy: &PolicyValidation,
    generated_at: DateTime<Utc>,
) -> AuditRecord {
    let output = &trace.output;

    let decision = AuditDecision {
        decision_type: trace
            .effective_decision()
            .map(|d| d.as_str().to_string())
            .unwrap_or_else(|| "unknown".to_string()),
        confidence: output.confidence.or(trace.confidence).map(|c| c.percent()),
        reasoning: output
            .reasoning
            .as_deref()
            .or(trace.reasoning.as_deref())
            .map(pii::redact),
    };

    let input_summary = RedactedInputSummary {
        claim_type: trace.input.claim_category().map(str::to_string),
        amount: trace.input.reported_amount(),
        policy_id: trace.input.policy_id.as_ref().map(|_| REDACTED.to_string()),
    };

    let tools_used = if trace.tool_calls.is_empty() {
        output.tools_used().to_vec()
    } else {
        trace.tool_calls.iter().map(|t| t.tool_name.clone()).collect()
    };

    let model_used = trace
        .llm_calls
        .first()
        .and_then(|call| call.model.clone())
        .unwrap_or_else(|| "unknown".to_string());

    AuditRecord {
        trace_id: trace.id.clone(),
        agent_type: trace.agent,
        timestamp: trace.timestamp,
        decision,
        input_summary,
        tools_used,
        model_used,
        total_latency_ms: trace.total_latency_ms,
        total_cost_usd: trace.total_cost_usd,
        human_override: output.human_override.clone(),
        escalated_to_human: output.decision == Some(Decision::Escalated),
        pii_scan: PiiSummary {
            clean: pii_scan.clean,
            risk_level: pii_scan.risk_level,
            exposures: pii_scan.total_exposures,
        },
        policy_compliance: PolicyComplianceSummary {
            rate: policy.compliance_rate,
            violations: policy.violations.len(),
            failed_rules: policy.violated_rule_ids(),
        },
        guardrail_checks: trace
            .guardrail_checks
            .iter()
            .map(|g| GuardrailResult {
                check_type: g.check_type,
                passed: g.passed,
            })
            .collect(),
        audit_version: AUDIT_VERSION.to_string(),
        generated_at,
    }
}
