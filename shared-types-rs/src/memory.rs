//! In-process adapters for the collaborator ports.
//!
//! Used by the CLI and by tests. Nothing here is durable.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

use crate::alert::{Alert, AlertRule};
use crate::compliance::ComplianceEvent;
use crate::model::{AgentCategory, Trace};
use crate::ports::{
    Broadcaster, EventStore, PortError, RuleSource, Topic, TraceRecorder, TraceSeries, TraceWindow,
};

/// Recent traces held in memory, pruned to a retention horizon on insert.
///
/// Entries are keyed on the time they were recorded, not on the trace's own
/// timestamp, so replayed historical traces still count toward the window.
pub struct InMemoryTraceWindow {
    traces: RwLock<VecDeque<(DateTime<Utc>, Trace)>>,
    retention: Duration,
}

impl InMemoryTraceWindow {
    pub fn new(retention: Duration) -> Self {
        Self {
            traces: RwLock::new(VecDeque::new()),
            retention,
        }
    }

    pub async fn len(&self) -> usize {
        self.traces.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.traces.read().await.is_empty()
    }

    /// Record `trace` as if it had been ingested at `ingested_at`.
    pub async fn record_at(&self, trace: &Trace, ingested_at: DateTime<Utc>) {
        let horizon = Utc::now() - self.retention;
        let mut traces = self.traces.write().await;
        traces.retain(|(at, _)| *at >= horizon);
        if ingested_at >= horizon {
            traces.push_back((ingested_at, trace.clone()));
        }
    }
}

impl Default for InMemoryTraceWindow {
    fn default() -> Self {
        Self::new(Duration::hours(24))
    }
}

#[async_trait]
impl TraceRecorder for InMemoryTraceWindow {
    async fn record(&self, trace: &Trace) -> Result<(), PortError> {
        self.record_at(trace, Utc::now()).await;
        Ok(())
    }
}

#[async_trait]
impl TraceWindow for InMemoryTraceWindow {
    async fn query(
        &self,
        series: TraceSeries,
        scope: Option<AgentCategory>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<f64>, PortError> {
        let traces = self.traces.read().await;
        Ok(traces
            .iter()
            .filter(|(at, _)| *at >= start && *at <= end)
            .filter(|(_, t)| scope.map_or(true, |agent| t.agent == agent))
            .map(|(_, t)| series.value_of(t))
            .collect())
    }
}

/// Event store backed by two vectors. Can be switched to "unavailable" to
/// exercise persistence-failure paths.
#[derive(Default)]
pub struct InMemoryEventStore {
    alerts: RwLock<Vec<Alert>>,
    compliance_events: RwLock<Vec<ComplianceEvent>>,
    unavailable: AtomicBool,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub async fn alerts(&self) -> Vec<Alert> {
        self.alerts.read().await.clone()
    }

    pub async fn compliance_events(&self) -> Vec<ComplianceEvent> {
        self.compliance_events.read().await.clone()
    }

    fn check_available(&self) -> Result<(), PortError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(PortError::Unavailable("in-memory event store is offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn save_alert(&self, alert: &Alert) -> Result<(), PortError> {
        self.check_available()?;
        self.alerts.write().await.push(alert.clone());
        Ok(())
    }

    async fn save_compliance_event(&self, event: &ComplianceEvent) -> Result<String, PortError> {
        self.check_available()?;
        self.compliance_events.write().await.push(event.clone());
        Ok(event.id.clone())
    }
}

/// One tokio broadcast channel per topic.
pub struct ChannelBroadcaster {
    channels: HashMap<Topic, broadcast::Sender<Value>>,
}

impl ChannelBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let channels = [Topic::Alerts, Topic::ComplianceUpdate]
            .into_iter()
            .map(|topic| (topic, broadcast::channel(capacity.max(1)).0))
            .collect();
        Self { channels }
    }

    pub fn subscribe(&self, topic: Topic) -> Option<broadcast::Receiver<Value>> {
        self.channels.get(&topic).map(broadcast::Sender::subscribe)
    }
}

impl Broadcaster for ChannelBroadcaster {
    fn publish(&self, topic: Topic, payload: Value) -> Result<(), PortError> {
        let sender = self
            .channels
            .get(&topic)
            .ok_or_else(|| PortError::Broadcast(format!("no channel for topic {}", topic)))?;
        // No subscribers is not a failure for fire-and-forget delivery.
        if sender.send(payload).is_err() {
            debug!(topic = %topic, "Published with no active subscribers");
        }
        Ok(())
    }
}

/// Fixed rule list, typically loaded from a JSON file.
#[derive(Debug, Clone, Default)]
pub struct StaticRuleSource {
    rules: Vec<AlertRule>,
}

impl StaticRuleSource {
    pub fn new(rules: Vec<AlertRule>) -> Self {
        Self { rules }
    }

    /// Parse a JSON array of rules.
    pub fn from_json_str(json: &str) -> Result<Self, PortError> {
        let rules: Vec<AlertRule> = serde_json::from_str(json)?;
        Ok(Self::new(rules))
    }

    pub fn rules(&self) -> &[AlertRule] {
        &self.rules
    }
}

#[async_trait]
impl RuleSource for StaticRuleSource {
    async fn enabled_rules(&self) -> Result<Vec<AlertRule>, PortError> {
        Ok(self.rules.iter().filter(|r| r.enabled).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::{AlertMetric, AlertSeverity, ComparisonOperator};
    use crate::model::{Decision, ExecutionStatus};
    use serde_json::json;

    #[tokio::test]
    async fn test_window_query_filters_by_time_and_scope() {
        let window = InMemoryTraceWindow::default();
        let now = Utc::now();
        let old = Trace::new(AgentCategory::Claims).with_latency_ms(100);
        let recent_claims = Trace::new(AgentCategory::Claims)
            .with_latency_ms(200)
            .with_status(ExecutionStatus::Error);
        let recent_fraud = Trace::new(AgentCategory::Fraud)
            .with_latency_ms(300)
            .with_decision(Decision::Flagged);

        window.record_at(&old, now - Duration::minutes(90)).await;
        for t in [&recent_claims, &recent_fraud] {
            window.record(t).await.unwrap();
        }

        let start = now - Duration::hours(1);
        let end = Utc::now();
        let latencies = window.query(TraceSeries::LatencyMs, None, start, end).await.unwrap();
        assert_eq!(latencies.len(), 2);

        let claims = window
            .query(TraceSeries::ErrorIndicator, Some(AgentCategory::Claims), start, end)
            .await
            .unwrap();
        assert_eq!(claims, vec![1.0]);

        let escalations = window
            .query(TraceSeries::EscalationIndicator, Some(AgentCategory::Fraud), start, end)
            .await
            .unwrap();
        assert_eq!(escalations, vec![1.0]);
    }

    #[tokio::test]
    async fn test_window_prunes_past_retention() {
        let window = InMemoryTraceWindow::new(Duration::minutes(10));
        let stale = Trace::new(AgentCategory::Support);
        window.record_at(&stale, Utc::now() - Duration::hours(1)).await;
        window.record(&Trace::new(AgentCategory::Support)).await.unwrap();
        assert_eq!(window.len().await, 1);
    }

    #[tokio::test]
    async fn test_window_counts_replayed_traces_by_ingest_time() {
        let window = InMemoryTraceWindow::default();
        let replayed = Trace::from_json(
            r#"{"agent_type":"claims","created_at":"2024-01-01T00:00:00Z","total_latency_ms":9000}"#,
        )
        .unwrap();
        window.record(&replayed).await.unwrap();

        let now = Utc::now();
        let latencies = window
            .query(TraceSeries::LatencyMs, None, now - Duration::hours(1), now)
            .await
            .unwrap();
        assert_eq!(latencies, vec![9000.0]);
    }

    #[tokio::test]
    async fn test_event_store_unavailable() {
        let store = InMemoryEventStore::new();
        let rule = AlertRule::new("r1", "Slow", AlertMetric::Latency, ComparisonOperator::GreaterThan, 1.0, AlertSeverity::Info);
        let alert = Alert::from_breach(&rule, &Trace::new(AgentCategory::Claims), 2.0, Utc::now());

        store.set_unavailable(true);
        assert!(matches!(store.save_alert(&alert).await, Err(PortError::Unavailable(_))));
        store.set_unavailable(false);
        store.save_alert(&alert).await.unwrap();
        assert_eq!(store.alerts().await.len(), 1);
    }

    #[tokio::test]
    async fn test_broadcaster_delivers_per_topic() {
        let broadcaster = ChannelBroadcaster::new(8);
        let mut alerts = broadcaster.subscribe(Topic::Alerts).unwrap();
        let mut updates = broadcaster.subscribe(Topic::ComplianceUpdate).unwrap();

        broadcaster.publish(Topic::Alerts, json!({"id": "a1"})).unwrap();
        assert_eq!(alerts.recv().await.unwrap(), json!({"id": "a1"}));
        assert!(updates.try_recv().is_err());
    }

    #[test]
    fn test_publish_without_subscribers_is_ok() {
        let broadcaster = ChannelBroadcaster::new(8);
        assert!(broadcaster.publish(Topic::ComplianceUpdate, json!({})).is_ok());
    }

    #[tokio::test]
    async fn test_static_rule_source_filters_disabled() {
        let source = StaticRuleSource::from_json_str(
            r#"[
                {"id":"r1","name":"a","metric":"latency","operator":">","threshold":1,"severity":"info"},
                {"id":"r2","name":"b","metric":"cost","operator":">","threshold":1,"severity":"info","enabled":false}
            ]"#,
        )
        .unwrap();
        let rules = source.enabled_rules().await.unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].id, "r1");
    }
}
