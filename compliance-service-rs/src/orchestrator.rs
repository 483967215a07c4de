//! Compliance pass orchestration
//!
//! Scan, validate, build the audit record, assess, then persist and
//! broadcast. Persistence and broadcast failures are logged; the computed
//! report is always returned.

use std::sync::Arc;
use std::time::Instant;

use metrics::counter;
use serde::Serialize;
use shared_types::{
    AuditRecord, Broadcaster, ComplianceEvent, ComplianceUpdate, EventStore, OverallStatus,
    PiiScanResult, PolicyValidation, RiskLevel, Topic, Trace,
};
use tracing::{debug, error, warn};

use crate::audit::build_audit_record;
use crate::pii;
use crate::policy_engine::PolicyValidator;
use crate::ComplianceError;

/// Full outcome of one compliance pass.
#[derive(Debug, Clone, Serialize)]
pub struct ComplianceReport {
    pub pii: PiiScanResult,
    pub policy: PolicyValidation,
    pub audit: AuditRecord,
    pub overall_status: OverallStatus,
    /// Stored event id; `None` when persistence failed.
    pub event_id: Option<String>,
    #[serde(skip)]
    pub event: ComplianceEvent,
}

#[derive(Clone)]
pub struct ComplianceOrchestrator {
    validator: PolicyValidator,
    store: Arc<dyn EventStore>,
    broadcaster: Arc<dyn Broadcaster>,
}

impl ComplianceOrchestrator {
    pub fn new(store: Arc<dyn EventStore>, broadcaster: Arc<dyn Broadcaster>) -> Self {
        Self::with_validator(PolicyValidator::new(), store, broadcaster)
    }

    pub fn with_validator(
        validator: PolicyValidator,
        store: Arc<dyn EventStore>,
        broadcaster: Arc<dyn Broadcaster>,
    ) -> Self {
        Self {
            validator,
            store,
            broadcaster,
        }
    }

    pub fn validator(&self) -> &PolicyValidator {
        &self.validator
    }

    /// Run the compliance pass for `trace`.
    pub async fn run(&self, trace: &Trace) -> ComplianceReport {
        let started = Instant::now();

        let pii_scan = pii::scan_trace(trace);
        let policy = self.validator.validate(trace);
        let audit = build_audit_record(trace, &pii_scan, &policy);
        let overall_status = OverallStatus::assess(&pii_scan, &policy);
        let event = ComplianceEvent::new(&pii_scan, &policy, audit.clone(), overall_status);

        let event_id = match self.persist(&event).await {
            Ok(id) => Some(id),
            Err(e) => {
                error!(trace_id = %trace.id, error = %e, "Failed to store compliance event");
                counter!("compliance.persist_failures", 1);
                None
            }
        };

        let update = ComplianceUpdate {
            kind: "compliance_event".to_string(),
            trace_id: trace.id.clone(),
            agent_type: trace.agent,
            pii_clean: pii_scan.clean,
            pii_risk_level: pii_scan.risk_level,
            policy_compliance_rate: policy.compliance_rate,
            violations: policy.violations.len(),
            overall_status,
            latency_ms: started.elapsed().as_millis() as u64,
        };
        if let Err(e) = self.publish(&update) {
            warn!(trace_id = %trace.id, error = %e, "Failed to broadcast compliance update");
        }

        if pii_scan.risk_level == RiskLevel::Critical {
            error!(
                trace_id = %trace.id,
                agent = %trace.agent,
                findings = %pii_scan.finding_types().join(", "),
                "Critical PII leak detected"
            );
        }
        if !policy.violations.is_empty() {
            let rules: Vec<String> = policy.violated_rule_ids().iter().map(|id| id.to_string()).collect();
            warn!(trace_id = %trace.id, agent = %trace.agent, rules = %rules.join(", "), "Policy violations");
        }
        debug!(trace_id = %trace.id, status = %overall_status, "Compliance pass complete");
        counter!("compliance.events", 1, "status" => overall_status.as_str());

        ComplianceReport {
            pii: pii_scan,
            policy,
            audit,
            overall_status,
            event_id,
            event,
        }
    }

    async fn persist(&self, event: &ComplianceEvent) -> Result<String, ComplianceError> {
        self.store
            .save_compliance_event(event)
            .await
            .map_err(ComplianceError::Persistence)
    }

    fn publish(&self, update: &ComplianceUpdate) -> Result<(), ComplianceError> {
        let payload = serde_json::to_value(update)?;
        self.broadcaster
            .publish(Topic::ComplianceUpdate, payload)
            .map_err(ComplianceError::Broadcast)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shared_types::memory::{ChannelBroadcaster, InMemoryEventStore};
    use shared_types::{AgentCategory, DecisionInput, DecisionOutput};

    fn setup() -> (ComplianceOrchestrator, Arc<InMemoryEventStore>, Arc<ChannelBroadcaster>) {
        let store = Arc::new(InMemoryEventStore::new());
        let broadcaster = Arc::new(ChannelBroadcaster::new(16));
        let orchestrator = ComplianceOrchestrator::new(store.clone(), broadcaster.clone());
        (orchestrator, store, broadcaster)
    }

    fn compliant_trace() -> Trace {
        Trace::new(AgentCategory::Claims).with_output(DecisionOutput::from_value(
            AgentCategory::Claims,
            json!({ "decision": "approved", "confidence": 0.88, "reasoning": "Within limits." }),
        ))
    }

    #[tokio::test]
    async fn test_compliant_pass_is_stored_and_broadcast() {
        let (orchestrator, store, broadcaster) = setup();
        let mut updates = broadcaster.subscribe(Topic::ComplianceUpdate).unwrap();

        let trace = compliant_trace();
        let report = orchestrator.run(&trace).await;

        assert_eq!(report.overall_status, OverallStatus::Compliant);
        assert_eq!(report.policy.compliance_rate, 100);
        let stored = store.compliance_events().await;
        assert_eq!(stored.len(), 1);
        assert_eq!(report.event_id.as_deref(), Some(stored[0].id.as_str()));

        let update = updates.recv().await.unwrap();
        assert_eq!(update["type"], "compliance_event");
        assert_eq!(update["trace_id"], trace.id.as_str());
        assert_eq!(update["overall_status"], "compliant");
    }

    #[tokio::test]
    async fn test_critical_pii_drives_status() {
        let (orchestrator, _store, _broadcaster) = setup();
        let trace = compliant_trace().with_reasoning("Card on file 4111111111111111");

        let report = orchestrator.run(&trace).await;
        assert_eq!(report.pii.risk_level, RiskLevel::Critical);
        assert_eq!(report.overall_status, OverallStatus::Critical);
        assert_eq!(report.event.pii_exposures, 1);
    }

    #[tokio::test]
    async fn test_persistence_failure_still_broadcasts() {
        let (orchestrator, store, broadcaster) = setup();
        let mut updates = broadcaster.subscribe(Topic::ComplianceUpdate).unwrap();
        store.set_unavailable(true);

        let trace = Trace::new(AgentCategory::Claims)
            .with_input(DecisionInput::from_value(json!({ "amount": 600000 })))
            .with_output(DecisionOutput::from_value(
                AgentCategory::Claims,
                json!({ "decision": "approved", "confidence": 0.95 }),
            ));
        let report = orchestrator.run(&trace).await;

        assert_eq!(report.event_id, None);
        assert_eq!(report.overall_status, OverallStatus::Warning);
        assert_eq!(report.policy.violations.len(), 2);
        let update = updates.recv().await.unwrap();
        assert_eq!(update["violations"], 2);
    }
}
