//! Dashboard aggregation over stored compliance events

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use shared_types::{ComplianceEvent, OverallStatus, RiskLevel};

use crate::policy_engine::PolicyRule;

/// Lookback window for dashboard queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TimeRange {
    #[serde(rename = "1h")]
    Hour,
    #[serde(rename = "6h")]
    SixHours,
    #[default]
    #[serde(rename = "24h")]
    Day,
    #[serde(rename = "7d")]
    Week,
    #[serde(rename = "30d")]
    Month,
}

impl TimeRange {
    pub fn hours(&self) -> i64 {
        match self {
            Self::Hour => 1,
            Self::SixHours => 6,
            Self::Day => 24,
            Self::Week => 168,
            Self::Month => 720,
        }
    }

    pub fn since(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - Duration::hours(self.hours())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hour => "1h",
            Self::SixHours => "6h",
            Self::Day => "24h",
            Self::Week => "7d",
            Self::Month => "30d",
        }
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeRange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1h" => Ok(Self::Hour),
            "6h" => Ok(Self::SixHours),
            "24h" => Ok(Self::Day),
            "7d" => Ok(Self::Week),
            "30d" => Ok(Self::Month),
            other => Err(format!("unknown time range: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PiiOverview {
    pub clean: usize,
    pub leaks: usize,
    pub critical: usize,
    pub high: usize,
    pub clean_rate: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PolicyOverview {
    pub avg_compliance_rate: u32,
    pub total_violations: usize,
    pub rules_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AgentCompliance {
    pub total: usize,
    pub compliant: usize,
    pub violations: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimelineBucket {
    pub time: DateTime<Utc>,
    pub total: usize,
    pub compliant: usize,
    pub violations: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComplianceOverview {
    pub total_checks: usize,
    pub pii: PiiOverview,
    pub policy: PolicyOverview,
    /// Always carries all four statuses.
    pub status_distribution: BTreeMap<String, usize>,
    pub agent_compliance: BTreeMap<String, AgentCompliance>,
    pub timeline: Vec<TimelineBucket>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolicyRuleStat {
    pub id: String,
    pub name: String,
    pub description: String,
    pub total_checks: usize,
    pub violations: usize,
    pub pass_rate: u32,
}

fn percent(part: usize, total: usize) -> u32 {
    if total == 0 {
        return 100;
    }
    ((part as f64 / total as f64) * 100.0).round() as u32
}

fn in_range<'a>(
    events: &'a [ComplianceEvent],
    since: DateTime<Utc>,
) -> impl Iterator<Item = &'a ComplianceEvent> + 'a {
    events.iter().filter(move |e| e.created_at >= since)
}

/// Bucket width for a lookback of `hours`: hourly up to a day, six-hourly up
/// to a week, daily beyond.
fn bucket_hours(hours: i64) -> i64 {
    if hours <= 24 {
        1
    } else if hours <= 168 {
        6
    } else {
        24
    }
}

fn build_timeline(events: &[&ComplianceEvent], since: DateTime<Utc>, now: DateTime<Utc>) -> Vec<TimelineBucket> {
    let span_minutes = (now - since).num_minutes().max(0);
    let hours = (span_minutes + 59) / 60;
    let width = bucket_hours(hours);
    let count = ((hours + width - 1) / width).max(0) as usize;

    let mut buckets: Vec<TimelineBucket> = (0..count)
        .map(|i| TimelineBucket {
            time: since + Duration::hours(i as i64 * width),
            total: 0,
            compliant: 0,
            violations: 0,
        })
        .collect();

    for event in events {
        let offset = (event.created_at - since).num_hours();
        if offset < 0 {
            continue;
        }
        if let Some(bucket) = buckets.get_mut((offset / width) as usize) {
            bucket.total += 1;
            if event.overall_status == OverallStatus::Compliant {
                bucket.compliant += 1;
            }
            bucket.violations += event.policy_violations.len();
        }
    }
    buckets
}

/// Aggregate the events created in `[since, now]` into dashboard figures.
pub fn compliance_overview(
    events: &[ComplianceEvent],
    rules: &[PolicyRule],
    since: DateTime<Utc>,
    now: DateTime<Utc>,
) -> ComplianceOverview {
    let selected: Vec<&ComplianceEvent> = in_range(events, since).filter(|e| e.created_at <= now).collect();
    let total = selected.len();

    let clean = selected.iter().filter(|e| e.pii_clean).count();
    let pii = PiiOverview {
        clean,
        leaks: total - clean,
        critical: selected.iter().filter(|e| e.pii_risk_level == RiskLevel::Critical).count(),
        high: selected.iter().filter(|e| e.pii_risk_level == RiskLevel::High).count(),
        clean_rate: percent(clean, total),
    };

    let avg_compliance_rate = if total == 0 {
        100
    } else {
        let sum: u64 = selected.iter().map(|e| u64::from(e.policy_compliance_rate)).sum();
        (sum as f64 / total as f64).round() as u32
    };
    let policy = PolicyOverview {
        avg_compliance_rate,
        total_violations: selected.iter().map(|e| e.policy_violations.len()).sum(),
        rules_count: rules.len(),
    };

    let mut status_distribution: BTreeMap<String, usize> =
        OverallStatus::ALL.iter().map(|s| (s.as_str().to_string(), 0)).collect();
    let mut agent_compliance: BTreeMap<String, AgentCompliance> = BTreeMap::new();
    for event in &selected {
        *status_distribution
            .entry(event.overall_status.as_str().to_string())
            .or_insert(0) += 1;

        let agent = agent_compliance.entry(event.agent_type.as_str().to_string()).or_default();
        agent.total += 1;
        if event.overall_status == OverallStatus::Compliant {
            agent.compliant += 1;
        }
        agent.violations += event.policy_violations.len();
    }

    ComplianceOverview {
        total_checks: total,
        pii,
        policy,
        status_distribution,
        agent_compliance,
        timeline: build_timeline(&selected, since, now),
    }
}

/// Violation counts per rule of `rules`, including rules never violated.
pub fn policy_rule_stats(events: &[ComplianceEvent], rules: &[PolicyRule], since: DateTime<Utc>) -> Vec<PolicyRuleStat> {
    let selected: Vec<&ComplianceEvent> = in_range(events, since).collect();
    let total = selected.len();

    rules
        .iter()
        .map(|rule| {
            let violations = selected
                .iter()
                .map(|e| e.policy_violations.iter().filter(|v| v.rule_id == rule.id).count())
                .sum::<usize>();
            PolicyRuleStat {
                id: rule.id.code().to_string(),
                name: rule.name.to_string(),
                description: rule.description.to_string(),
                total_checks: total,
                violations,
                pass_rate: percent(total.saturating_sub(violations), total),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::build_audit_record;
    use crate::pii;
    use crate::policy_engine::{default_rules, PolicyValidator};
    use serde_json::json;
    use shared_types::{AgentCategory, DecisionInput, DecisionOutput, Trace};

    fn event_for(trace: &Trace, created_at: DateTime<Utc>) -> ComplianceEvent {
        let pii_scan = pii::scan_trace(trace);
        let policy = PolicyValidator::new().validate(trace);
        let audit = build_audit_record(trace, &pii_scan, &policy);
        let status = OverallStatus::assess(&pii_scan, &policy);
        let mut event = ComplianceEvent::new(&pii_scan, &policy, audit, status);
        event.created_at = created_at;
        event
    }

    fn compliant(agent: AgentCategory) -> Trace {
        Trace::new(agent).with_output(DecisionOutput::from_value(
            agent,
            json!({ "decision": "approved", "confidence": 0.9 }),
        ))
    }

    fn high_value_approval() -> Trace {
        Trace::new(AgentCategory::Claims)
            .with_input(DecisionInput::from_value(json!({ "amount": 600000 })))
            .with_output(DecisionOutput::from_value(
                AgentCategory::Claims,
                json!({ "decision": "approved", "confidence": 0.9 }),
            ))
    }

    fn leaky() -> Trace {
        compliant(AgentCategory::Support).with_reasoning("SSN 123-45-6789")
    }

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-06-01T12:00:00Z").unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_time_range_parsing() {
        assert_eq!("7d".parse::<TimeRange>().unwrap(), TimeRange::Week);
        assert_eq!(TimeRange::default().hours(), 24);
        assert!("2w".parse::<TimeRange>().is_err());
        assert_eq!(TimeRange::Hour.since(now()), now() - Duration::hours(1));
    }

    #[test]
    fn test_overview_aggregates() {
        let now = now();
        let since = TimeRange::Day.since(now);
        let events = vec![
            event_for(&compliant(AgentCategory::Claims), now - Duration::minutes(30)),
            event_for(&high_value_approval(), now - Duration::hours(2)),
            event_for(&leaky(), now - Duration::hours(5)),
            // Outside the window.
            event_for(&leaky(), now - Duration::hours(30)),
        ];

        let overview = compliance_overview(&events, &default_rules(), since, now);

        assert_eq!(overview.total_checks, 3);
        assert_eq!(overview.pii.clean, 2);
        assert_eq!(overview.pii.leaks, 1);
        assert_eq!(overview.pii.critical, 1);
        assert_eq!(overview.pii.clean_rate, 67);
        // (100 + 67 + 100) / 3
        assert_eq!(overview.policy.avg_compliance_rate, 89);
        assert_eq!(overview.policy.total_violations, 2);
        assert_eq!(overview.policy.rules_count, 6);

        assert_eq!(overview.status_distribution.len(), 4);
        assert_eq!(overview.status_distribution["compliant"], 1);
        assert_eq!(overview.status_distribution["warning"], 1);
        assert_eq!(overview.status_distribution["critical"], 1);
        assert_eq!(overview.status_distribution["review"], 0);

        let claims = &overview.agent_compliance["claims"];
        assert_eq!(claims.total, 2);
        assert_eq!(claims.compliant, 1);
        assert_eq!(claims.violations, 2);
    }

    #[test]
    fn test_timeline_buckets() {
        let now = now();
        let since = TimeRange::Day.since(now);
        let events = vec![
            event_for(&compliant(AgentCategory::Fraud), since + Duration::minutes(10)),
            event_for(&high_value_approval(), now - Duration::minutes(20)),
        ];

        let overview = compliance_overview(&events, &default_rules(), since, now);
        assert_eq!(overview.timeline.len(), 24);
        assert_eq!(overview.timeline[0].time, since);
        assert_eq!(overview.timeline[0].compliant, 1);
        assert_eq!(overview.timeline[23].total, 1);
        assert_eq!(overview.timeline[23].violations, 2);

        let weekly = compliance_overview(&events, &default_rules(), TimeRange::Week.since(now), now);
        assert_eq!(weekly.timeline.len(), 28);
        let monthly = compliance_overview(&events, &default_rules(), TimeRange::Month.since(now), now);
        assert_eq!(monthly.timeline.len(), 30);
    }

    #[test]
    fn test_empty_overview() {
        let overview = compliance_overview(&[], &default_rules(), TimeRange::Hour.since(now()), now());
        assert_eq!(overview.total_checks, 0);
        assert_eq!(overview.pii.clean_rate, 100);
        assert_eq!(overview.policy.avg_compliance_rate, 100);
        assert!(overview.agent_compliance.is_empty());
    }

    #[test]
    fn test_policy_rule_stats_lists_every_rule() {
        let now = now();
        let events = vec![
            event_for(&high_value_approval(), now - Duration::hours(1)),
            event_for(&compliant(AgentCategory::Claims), now - Duration::hours(1)),
        ];

        let stats = policy_rule_stats(&events, &default_rules(), TimeRange::Day.since(now));
        assert_eq!(stats.len(), 6);
        assert_eq!(stats[0].id, "PR-001");
        assert_eq!(stats[0].violations, 0);
        assert_eq!(stats[0].pass_rate, 100);

        let high_value = stats.iter().find(|s| s.id == "PR-004").unwrap();
        assert_eq!(high_value.total_checks, 2);
        assert_eq!(high_value.violations, 1);
        assert_eq!(high_value.pass_rate, 50);
    }
}
