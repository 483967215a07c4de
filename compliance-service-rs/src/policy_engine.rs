//! Policy Rule Validator
//!
//! Fixed business-rule predicates over a decision's input and output. Each
//! rule is a named, independently testable function; the validator runs a
//! table of them and summarizes the outcome.
//!
//! A check that cannot be evaluated is recorded as passed with an error
//! annotation (fail-open), so a malformed payload never produces a spurious
//! violation.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use shared_types::{Decision, PolicyRuleId, PolicyRuleResult, PolicyValidation, Trace};
use tracing::warn;

/// Amount above which a claim must be escalated to a human.
pub const HIGH_VALUE_THRESHOLD: f64 = 500_000.0;

/// Amount above which an approval needs guardrail clearance.
pub const DECISION_AUTHORITY_LIMIT: f64 = 100_000.0;

/// Minimum confidence (percent) for an automated decision.
pub const CONFIDENCE_FLOOR: f64 = 40.0;

static PRE_EXISTING_REVIEW: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)pre-existing|pre existing|prior condition").unwrap());

/// Policy check error
#[derive(Debug, thiserror::Error)]
pub enum PolicyCheckError {
    #[error("{field} is not a finite amount: {value}")]
    NonFiniteAmount { field: &'static str, value: f64 },

    #[error("Rule evaluation failed: {0}")]
    Evaluation(String),
}

/// Pass/fail verdict of one check with a human-readable detail line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckVerdict {
    pub passed: bool,
    pub detail: String,
}

impl CheckVerdict {
    pub fn pass(detail: impl Into<String>) -> Self {
        Self { passed: true, detail: detail.into() }
    }

    pub fn fail(detail: impl Into<String>) -> Self {
        Self { passed: false, detail: detail.into() }
    }
}

pub type PolicyCheck = fn(&Trace) -> Result<CheckVerdict, PolicyCheckError>;

/// One entry of the policy table.
#[derive(Clone)]
pub struct PolicyRule {
    pub id: PolicyRuleId,
    pub name: &'static str,
    pub description: &'static str,
    pub check: PolicyCheck,
}

impl std::fmt::Debug for PolicyRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyRule")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish()
    }
}

/// The six regulatory rules, in evaluation order.
pub fn default_rules() -> Vec<PolicyRule> {
    vec![
        PolicyRule {
            id: PolicyRuleId::CoverageLimit,
            name: "Coverage Limit Enforcement",
            description: "Payout must not exceed policy coverage limit",
            check: check_coverage_limit,
        },
        PolicyRule {
            id: PolicyRuleId::ExclusionOverride,
            name: "Exclusion Override Prevention",
            description: "Claims with triggered exclusions cannot be approved",
            check: check_exclusion_override,
        },
        PolicyRule {
            id: PolicyRuleId::ConfidenceFloor,
            name: "Confidence Floor Enforcement",
            description: "Decisions with confidence < 40% must be escalated",
            check: check_confidence_floor,
        },
        PolicyRule {
            id: PolicyRuleId::HighValueEscalation,
            name: "High-Value Claim Escalation",
            description: "Claims > $500,000 must be escalated for human review",
            check: check_high_value_escalation,
        },
        PolicyRule {
            id: PolicyRuleId::PreExistingDisclosure,
            name: "Pre-existing Condition Disclosure",
            description: "Health claims must check for pre-existing conditions",
            check: check_pre_existing_disclosure,
        },
        PolicyRule {
            id: PolicyRuleId::DecisionAuthority,
            name: "Decision Authority Limit",
            description: "AI agents cannot approve claims > $100,000 without guardrail pass",
            check: check_decision_authority,
        },
    ]
}

/// Render an amount the way reviewers read it: no trailing `.0` on whole
/// numbers.
pub(crate) fn format_amount(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

fn finite(field: &'static str, value: f64) -> Result<f64, PolicyCheckError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(PolicyCheckError::NonFiniteAmount { field, value })
    }
}

fn claimed_amount(trace: &Trace) -> Result<f64, PolicyCheckError> {
    finite("amount", trace.input.claimed_amount())
}

fn is_escalated(trace: &Trace) -> bool {
    trace.output.decision == Some(Decision::Escalated)
}

fn is_approved(trace: &Trace) -> bool {
    trace.output.decision == Some(Decision::Approved)
}

/// PR-001: payout must not exceed the coverage limit.
pub fn check_coverage_limit(trace: &Trace) -> Result<CheckVerdict, PolicyCheckError> {
    let payout = finite("payout_amount", trace.output.payout())?;
    let limit = match trace.output.coverage_limit() {
        Some(limit) => finite("coverage_limit", limit)?,
        None => return Ok(CheckVerdict::pass("Payout within coverage limits")),
    };

    if payout > limit {
        return Ok(CheckVerdict::fail(format!(
            "Payout ${} exceeds coverage limit ${}",
            format_amount(payout),
            format_amount(limit)
        )));
    }
    Ok(CheckVerdict::pass("Payout within coverage limits"))
}

/// PR-002: an approval must not override a triggered exclusion clause.
pub fn check_exclusion_override(trace: &Trace) -> Result<CheckVerdict, PolicyCheckError> {
    if is_approved(trace) && trace.output.exclusion_triggered() {
        return Ok(CheckVerdict::fail("Approved despite exclusion clause triggered"));
    }
    Ok(CheckVerdict::pass("No exclusion-approval conflict"))
}

/// PR-003: low-confidence decisions must be escalated.
pub fn check_confidence_floor(trace: &Trace) -> Result<CheckVerdict, PolicyCheckError> {
    let confidence = trace.output.confidence_percent();
    if confidence < CONFIDENCE_FLOOR && !is_escalated(trace) {
        return Ok(CheckVerdict::fail(format!(
            "Low confidence ({}%) decision not escalated",
            format_amount(confidence)
        )));
    }
    Ok(CheckVerdict::pass(format!(
        "Confidence {}% meets the threshold",
        format_amount(confidence)
    )))
}

/// PR-004: high-value claims must go to a human.
pub fn check_high_value_escalation(trace: &Trace) -> Result<CheckVerdict, PolicyCheckError> {
    let amount = claimed_amount(trace)?;
    if amount > HIGH_VALUE_THRESHOLD && !is_escalated(trace) {
        return Ok(CheckVerdict::fail(format!(
            "${} claim auto-decided without human review",
            format_amount(amount)
        )));
    }
    Ok(CheckVerdict::pass("High-value claim rule compliant"))
}

/// PR-005: approved health claims must show a pre-existing condition review.
pub fn check_pre_existing_disclosure(trace: &Trace) -> Result<CheckVerdict, PolicyCheckError> {
    if !trace.input.is_health_insurance() {
        return Ok(CheckVerdict::pass("Not applicable (non-health)"));
    }
    let reasoning = trace.output.reasoning.as_deref().unwrap_or("");
    if is_approved(trace) && !PRE_EXISTING_REVIEW.is_match(reasoning) {
        return Ok(CheckVerdict::fail(
            "Health claim approved without pre-existing condition review",
        ));
    }
    Ok(CheckVerdict::pass("Pre-existing condition check present"))
}

/// PR-006: large approvals need guardrail clearance.
pub fn check_decision_authority(trace: &Trace) -> Result<CheckVerdict, PolicyCheckError> {
    let amount = claimed_amount(trace)?;
    if amount > DECISION_AUTHORITY_LIMIT
        && is_approved(trace)
        && !trace.output.has_guardrail_clearance()
    {
        return Ok(CheckVerdict::fail(format!(
            "${} approved without guardrail clearance",
            format_amount(amount)
        )));
    }
    Ok(CheckVerdict::pass("Decision authority limits respected"))
}

/// Runs a policy table against traces.
#[derive(Debug, Clone)]
pub struct PolicyValidator {
    rules: Vec<PolicyRule>,
}

impl Default for PolicyValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl PolicyValidator {
    pub fn new() -> Self {
        Self::with_rules(default_rules())
    }

    pub fn with_rules(rules: Vec<PolicyRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[PolicyRule] {
        &self.rules
    }

    pub fn validate(&self, trace: &Trace) -> PolicyValidation {
        self.validate_at(trace, Utc::now())
    }

    pub fn validate_at(&self, trace: &Trace, checked_at: DateTime<Utc>) -> PolicyValidation {
        let results = self
            .rules
            .iter()
            .map(|rule| match (rule.check)(trace) {
                Ok(verdict) => PolicyRuleResult {
                    rule_id: rule.id,
                    rule_name: rule.name.to_string(),
                    description: rule.description.to_string(),
                    passed: verdict.passed,
                    detail: verdict.detail,
                    error: false,
                },
                Err(e) => {
                    warn!(trace_id = %trace.id, rule_id = %rule.id, error = %e, "Policy check failed; recording as passed");
                    PolicyRuleResult {
                        rule_id: rule.id,
                        rule_name: rule.name.to_string(),
                        description: rule.description.to_string(),
                        passed: true,
                        detail: format!("Check error: {}", e),
                        error: true,
                    }
                }
            })
            .collect();

        PolicyValidation::from_results(results, checked_at)
    }
}
