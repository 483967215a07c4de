//! Bias & fairness analyzer
//!
//! Groups a batch of decisions by one demographic dimension and compares
//! per-group rejection rates. The spread between the highest and lowest
//! qualifying rate is the "variance"; bias is flagged when it reaches the
//! dimension's threshold. This is a screening heuristic, not a statistical
//! test.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared_types::{BiasThresholds, Decision, Trace};

const UNKNOWN_GROUP: &str = "Unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BiasDimension {
    Geography,
    AgeGroup,
    ClaimType,
    Gender,
}

impl BiasDimension {
    pub const ALL: [BiasDimension; 4] = [
        BiasDimension::Geography,
        BiasDimension::AgeGroup,
        BiasDimension::ClaimType,
        BiasDimension::Gender,
    ];

    /// Group key of `trace` along this dimension.
    pub fn group_key(&self, trace: &Trace) -> String {
        let input = &trace.input;
        match self {
            Self::Geography => input.geography().unwrap_or(UNKNOWN_GROUP).to_string(),
            Self::AgeGroup => age_bucket(input.age_years()).to_string(),
            Self::ClaimType => input.claim_category().unwrap_or(UNKNOWN_GROUP).to_string(),
            Self::Gender => input
                .gender
                .as_deref()
                .filter(|g| !g.is_empty())
                .unwrap_or(UNKNOWN_GROUP)
                .to_string(),
        }
    }

    pub fn threshold(&self, thresholds: &BiasThresholds) -> f64 {
        match self {
            Self::Geography => thresholds.geography,
            Self::AgeGroup => thresholds.age_group,
            Self::ClaimType => thresholds.claim_type,
            Self::Gender => thresholds.gender,
        }
    }
}

impl fmt::Display for BiasDimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Geography => write!(f, "geography"),
            Self::AgeGroup => write!(f, "age_group"),
            Self::ClaimType => write!(f, "claim_type"),
            Self::Gender => write!(f, "gender"),
        }
    }
}

/// Unreported ages (0) land in the youngest bucket.
fn age_bucket(age: f64) -> &'static str {
    if age < 25.0 {
        "18-24"
    } else if age < 35.0 {
        "25-34"
    } else if age < 45.0 {
        "35-44"
    } else if age < 55.0 {
        "45-54"
    } else if age < 65.0 {
        "55-64"
    } else {
        "65+"
    }
}

fn round_tenth(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Approved,
    Rejected,
    Escalated,
}

fn classify(decision: Option<Decision>) -> Outcome {
    match decision {
        Some(Decision::Approved) | Some(Decision::Cleared) => Outcome::Approved,
        Some(Decision::Rejected) | Some(Decision::Flagged) => Outcome::Rejected,
        _ => Outcome::Escalated,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupStats {
    pub total: usize,
    pub approved: usize,
    pub rejected: usize,
    pub escalated: usize,
    /// Rejection rate in percent, rounded to 0.1; `None` below the minimum sample.
    pub rejection_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub insufficient_data: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BiasReport {
    pub dimension: BiasDimension,
    pub groups: BTreeMap<String, GroupStats>,
    pub max_variance: f64,
    pub threshold: f64,
    pub bias_detected: bool,
    pub sample_size: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FullBiasReport {
    pub geography: BiasReport,
    pub age_group: BiasReport,
    pub claim_type: BiasReport,
    pub gender: BiasReport,
    pub overall_bias_detected: bool,
    pub checked_at: DateTime<Utc>,
}

impl FullBiasReport {
    pub fn reports(&self) -> [&BiasReport; 4] {
        [&self.geography, &self.age_group, &self.claim_type, &self.gender]
    }
}

#[derive(Debug, Clone, Default)]
pub struct BiasAnalyzer {
    thresholds: BiasThresholds,
}

impl BiasAnalyzer {
    pub fn new(thresholds: BiasThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &BiasThresholds {
        &self.thresholds
    }

    /// Analyze one dimension against an explicit threshold.
    pub fn analyze(&self, traces: &[Trace], dimension: BiasDimension, threshold: f64) -> BiasReport {
        let mut groups: BTreeMap<String, GroupStats> = BTreeMap::new();

        for trace in traces {
            let stats = groups.entry(dimension.group_key(trace)).or_default();
            stats.total += 1;
            match classify(trace.effective_decision()) {
                Outcome::Approved => stats.approved += 1,
                Outcome::Rejected => stats.rejected += 1,
                Outcome::Escalated => stats.escalated += 1,
            }
        }

        let mut qualifying_rates = Vec::new();
        for stats in groups.values_mut() {
            if stats.total >= self.thresholds.minimum_sample_size {
                let rate = stats.rejected as f64 / stats.total as f64 * 100.0;
                stats.rejection_rate = Some(round_tenth(rate));
                qualifying_rates.push(rate);
            } else {
                stats.insufficient_data = true;
            }
        }

        let (max_variance, bias_detected) = if qualifying_rates.len() >= 2 {
            let max = qualifying_rates.iter().copied().fold(f64::MIN, f64::max);
            let min = qualifying_rates.iter().copied().fold(f64::MAX, f64::min);
            let variance = round_tenth(max - min);
            (variance, variance >= threshold)
        } else {
            (0.0, false)
        };

        BiasReport {
            dimension,
            groups,
            max_variance,
            threshold,
            bias_detected,
            sample_size: traces.len(),
        }
    }

    /// Analyze every dimension with its configured threshold.
    pub fn run_full_analysis(&self, traces: &[Trace]) -> FullBiasReport {
        let report = |dimension: BiasDimension| {
            self.analyze(traces, dimension, dimension.threshold(&self.thresholds))
        };
        let geography = report(BiasDimension::Geography);
        let age_group = report(BiasDimension::AgeGroup);
        let claim_type = report(BiasDimension::ClaimType);
        let gender = report(BiasDimension::Gender);
        let overall_bias_detected = [&geography, &age_group, &claim_type, &gender]
            .iter()
            .any(|r| r.bias_detected);

        FullBiasReport {
            geography,
            age_group,
            claim_type,
            gender,
            overall_bias_detected,
            checked_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shared_types::{AgentCategory, DecisionInput};
    use test_case::test_case;

    fn decided(input: serde_json::Value, decision: Decision) -> Trace {
        Trace::new(AgentCategory::Underwriting)
            .with_input(DecisionInput::from_value(input))
            .with_decision(decision)
    }

    /// `total` traces in `region`, of which `rejected` are rejected.
    fn region_batch(region: &str, total: usize, rejected: usize) -> Vec<Trace> {
        (0..total)
            .map(|i| {
                let decision = if i < rejected { Decision::Rejected } else { Decision::Approved };
                decided(json!({ "region": region }), decision)
            })
            .collect()
    }

    #[test]
    fn test_geography_bias_detected() {
        // Rejection rates 10%, 12%, 25%, 11%.
        let mut traces = region_batch("North", 10, 1);
        traces.extend(region_batch("South", 25, 3));
        traces.extend(region_batch("East", 8, 2));
        traces.extend(region_batch("West", 100, 11));

        let report = BiasAnalyzer::default().analyze(&traces, BiasDimension::Geography, 15.0);
        assert_eq!(report.groups["North"].rejection_rate, Some(10.0));
        assert_eq!(report.groups["South"].rejection_rate, Some(12.0));
        assert_eq!(report.groups["East"].rejection_rate, Some(25.0));
        assert_eq!(report.groups["West"].rejection_rate, Some(11.0));
        assert_eq!(report.max_variance, 15.0);
        assert!(report.bias_detected);
        assert_eq!(report.sample_size, 143);
    }

    #[test]
    fn test_single_qualifying_group_never_flags() {
        let mut traces = region_batch("North", 10, 9);
        traces.extend(region_batch("South", 3, 0));

        let report = BiasAnalyzer::default().analyze(&traces, BiasDimension::Geography, 15.0);
        assert!(!report.bias_detected);
        assert_eq!(report.max_variance, 0.0);
        assert!(report.groups["South"].insufficient_data);
        assert_eq!(report.groups["South"].rejection_rate, None);
    }

    #[test]
    fn test_spread_below_threshold() {
        let mut traces = region_batch("North", 10, 1);
        traces.extend(region_batch("South", 10, 2));
        let report = BiasAnalyzer::default().analyze(&traces, BiasDimension::Geography, 15.0);
        assert_eq!(report.max_variance, 10.0);
        assert!(!report.bias_detected);
    }

    #[test_case(json!({}), "18-24" ; "missing age")]
    #[test_case(json!({ "age": 24 }), "18-24" ; "upper edge of youngest")]
    #[test_case(json!({ "age": 25 }), "25-34" ; "lower edge")]
    #[test_case(json!({ "applicant_age": 47 }), "45-54" ; "applicant age")]
    #[test_case(json!({ "age": 80 }), "65+" ; "oldest")]
    fn test_age_buckets(input: serde_json::Value, expected: &str) {
        let trace = decided(input, Decision::Approved);
        assert_eq!(BiasDimension::AgeGroup.group_key(&trace), expected);
    }

    #[test]
    fn test_group_keys_fall_back_to_unknown() {
        let trace = decided(json!({}), Decision::Approved);
        assert_eq!(BiasDimension::Geography.group_key(&trace), "Unknown");
        assert_eq!(BiasDimension::ClaimType.group_key(&trace), "Unknown");
        assert_eq!(BiasDimension::Gender.group_key(&trace), "Unknown");

        let trace = decided(json!({ "state": "TX", "insurance_type": "auto" }), Decision::Approved);
        assert_eq!(BiasDimension::Geography.group_key(&trace), "TX");
        assert_eq!(BiasDimension::ClaimType.group_key(&trace), "auto");
    }

    #[test]
    fn test_decision_mapping() {
        let traces: Vec<Trace> = [
            Decision::Approved,
            Decision::Cleared,
            Decision::Rejected,
            Decision::Flagged,
            Decision::Escalated,
        ]
        .into_iter()
        .map(|d| decided(json!({ "gender": "F" }), d))
        .chain(std::iter::once(Trace::new(AgentCategory::Claims).with_input(
            DecisionInput::from_value(json!({ "gender": "F" })),
        )))
        .collect();

        let report = BiasAnalyzer::default().analyze(&traces, BiasDimension::Gender, 10.0);
        let stats = &report.groups["F"];
        assert_eq!((stats.approved, stats.rejected, stats.escalated), (2, 2, 2));
        assert_eq!(stats.rejection_rate, Some(33.3));
    }

    #[test]
    fn test_full_analysis_uses_configured_thresholds() {
        let mut traces = Vec::new();
        for (gender, rejected) in [("F", 1), ("M", 3)] {
            traces.extend((0..10).map(|i| {
                let decision = if i < rejected { Decision::Rejected } else { Decision::Approved };
                decided(json!({ "gender": gender }), decision)
            }));
        }

        let report = BiasAnalyzer::default().run_full_analysis(&traces);
        assert_eq!(report.gender.threshold, 10.0);
        assert_eq!(report.gender.max_variance, 20.0);
        assert!(report.gender.bias_detected);
        assert!(!report.geography.bias_detected);
        assert!(report.overall_bias_detected);
    }
}
