//! Alert rule evaluation.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use metrics::counter;
use serde::Serialize;
use shared_types::{Alert, AlertRule, Broadcaster, EventStore, RuleSource, Topic, Trace};
use tracing::{debug, error, info, warn};

use crate::dedup::DedupCache;
use crate::window::MetricWindow;
use crate::AlertingError;

/// Why a rule was not evaluated against a trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Disabled,
    OutOfScope,
    UnknownMetric,
    UnknownOperator,
}

/// Result of evaluating one rule against one trace.
#[derive(Debug, Clone)]
pub enum RuleDisposition {
    Fired(Alert),
    Suppressed,
    Skipped(SkipReason),
    NotBreached { observed: f64 },
}

/// Everything that happened while evaluating a rule set against a trace.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EvaluationOutcome {
    pub fired: Vec<Alert>,
    pub suppressed: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<String>,
    pub evaluated: usize,
}

impl EvaluationOutcome {
    pub fn fired_count(&self) -> usize {
        self.fired.len()
    }
}

/// Evaluates alert rules against incoming traces.
///
/// Rules are independent: they are evaluated concurrently and a failure in
/// one never affects the others. The only shared state is the injected
/// [`DedupCache`].
#[derive(Clone)]
pub struct AlertEvaluator {
    window: MetricWindow,
    dedup: Arc<DedupCache>,
    store: Arc<dyn EventStore>,
    broadcaster: Arc<dyn Broadcaster>,
    default_cooldown_minutes: u32,
}

impl AlertEvaluator {
    pub fn new(
        window: MetricWindow,
        dedup: Arc<DedupCache>,
        store: Arc<dyn EventStore>,
        broadcaster: Arc<dyn Broadcaster>,
    ) -> Self {
        Self {
            window,
            dedup,
            store,
            broadcaster,
            default_cooldown_minutes: shared_types::DEFAULT_COOLDOWN_MINUTES,
        }
    }

    pub fn with_default_cooldown_minutes(mut self, minutes: u32) -> Self {
        self.default_cooldown_minutes = minutes;
        self
    }

    pub fn dedup(&self) -> &Arc<DedupCache> {
        &self.dedup
    }

    pub async fn evaluate(&self, trace: &Trace, rules: &[AlertRule]) -> EvaluationOutcome {
        self.evaluate_at(trace, rules, Utc::now()).await
    }

    /// Fetch the enabled rules from `source` and evaluate them.
    pub async fn evaluate_from(
        &self,
        trace: &Trace,
        source: &dyn RuleSource,
    ) -> Result<EvaluationOutcome, AlertingError> {
        let rules = source.enabled_rules().await.map_err(AlertingError::RuleSource)?;
        Ok(self.evaluate(trace, &rules).await)
    }

    /// Evaluate every rule against `trace` with `now` as the window end.
    pub async fn evaluate_at(
        &self,
        trace: &Trace,
        rules: &[AlertRule],
        now: DateTime<Utc>,
    ) -> EvaluationOutcome {
        let results = join_all(rules.iter().map(|rule| self.evaluate_rule(rule, trace, now))).await;

        let mut outcome = EvaluationOutcome {
            evaluated: rules.len(),
            ..Default::default()
        };
        for (rule, result) in rules.iter().zip(results) {
            match result {
                Ok(RuleDisposition::Fired(alert)) => outcome.fired.push(alert),
                Ok(RuleDisposition::Suppressed) => outcome.suppressed.push(rule.id.clone()),
                Ok(RuleDisposition::Skipped(_)) => outcome.skipped.push(rule.id.clone()),
                Ok(RuleDisposition::NotBreached { .. }) => {}
                Err(e) => {
                    error!(rule_id = %rule.id, rule = %rule.name, trace_id = %trace.id, error = %e, "Alert rule evaluation error");
                    counter!("alerting.rule_errors", 1);
                    outcome.failed.push(rule.id.clone());
                }
            }
        }
        outcome
    }

    /// Evaluate a single rule. Side effects (persist, publish) happen only
    /// for the caller that wins the dedup claim.
    pub async fn evaluate_rule(
        &self,
        rule: &AlertRule,
        trace: &Trace,
        now: DateTime<Utc>,
    ) -> Result<RuleDisposition, AlertingError> {
        if !rule.enabled {
            return Ok(RuleDisposition::Skipped(SkipReason::Disabled));
        }
        if !rule.applies_to(trace.agent) {
            return Ok(RuleDisposition::Skipped(SkipReason::OutOfScope));
        }
        if !rule.operator.is_recognized() {
            warn!(rule_id = %rule.id, operator = %rule.operator, "Rule has an unrecognized operator; skipping");
            return Ok(RuleDisposition::Skipped(SkipReason::UnknownOperator));
        }

        let key = rule.dedup_key();
        let cooldown = Duration::minutes(i64::from(rule.cooldown_or(self.default_cooldown_minutes)));
        if self.dedup.should_suppress_at(&key, cooldown, now) {
            debug!(rule_id = %rule.id, key = %key, "Rule within cooldown");
            counter!("alerting.alerts_suppressed", 1);
            return Ok(RuleDisposition::Suppressed);
        }

        let observed = match self.window.resolve(&rule.metric, rule.agent_scope, trace, now).await? {
            Some(value) => value,
            None => {
                warn!(rule_id = %rule.id, metric = %rule.metric, "Rule has an unrecognized metric; skipping");
                return Ok(RuleDisposition::Skipped(SkipReason::UnknownMetric));
            }
        };

        if !rule.operator.compare(observed, rule.threshold) {
            return Ok(RuleDisposition::NotBreached { observed });
        }

        // Another pass may have fired this key since the check above.
        if !self.dedup.try_claim(&key, cooldown, now) {
            counter!("alerting.alerts_suppressed", 1);
            return Ok(RuleDisposition::Suppressed);
        }

        let alert = Alert::from_breach(rule, trace, observed, now);
        self.deliver(&alert).await;

        info!(
            rule_id = %rule.id,
            rule = %rule.name,
            severity = %rule.severity,
            agent = %trace.agent,
            observed,
            "Alert fired"
        );
        counter!("alerting.alerts_fired", 1, "severity" => rule.severity.to_string());
        Ok(RuleDisposition::Fired(alert))
    }

    /// Persist then publish. A persistence failure is logged and the alert is
    /// still published.
    async fn deliver(&self, alert: &Alert) {
        if let Err(e) = self.store.save_alert(alert).await {
            error!(alert_id = %alert.id, rule_id = %alert.rule_id, error = %e, "Failed to store alert");
            counter!("alerting.persist_failures", 1);
        }

        match serde_json::to_value(alert) {
            Ok(payload) => {
                if let Err(e) = self.broadcaster.publish(Topic::Alerts, payload) {
                    warn!(alert_id = %alert.id, error = %e, "Failed to broadcast alert");
                }
            }
            Err(e) => warn!(alert_id = %alert.id, error = %e, "Failed to serialize alert"),
        }
    }
}
