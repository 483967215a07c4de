//! # Telemetrist - Decision Trace Ingest
//!
//! Entry point for every completed agent decision. A trace is recorded in the
//! rolling window, then the alert pass and the compliance pass run
//! concurrently against it. Neither pass can fail the other.

pub mod logging;

use std::sync::Arc;
use std::time::Duration;

use alerting::{AlertEvaluator, DedupCache, EvaluationOutcome, MetricWindow};
use compliance::{BiasAnalyzer, ComplianceOrchestrator, ComplianceReport, FullBiasReport};
use serde::Serialize;
use shared_types::{
    Broadcaster, ChannelBroadcaster, ConfigError, EventStore, InMemoryEventStore, InMemoryTraceWindow,
    MonitorConfig, PortError, RuleSource, StaticRuleSource, Trace, TraceRecorder, TraceWindow,
};
use tracing::{info_span, warn, Instrument};

pub use logging::init_logging;

/// Trace retention of the in-memory window.
const IN_MEMORY_RETENTION_HOURS: i64 = 24;

/// Ports an engine runs against.
#[derive(Clone)]
pub struct Ports {
    pub recorder: Arc<dyn TraceRecorder>,
    pub window: Arc<dyn TraceWindow>,
    pub store: Arc<dyn EventStore>,
    pub broadcaster: Arc<dyn Broadcaster>,
    pub rules: Arc<dyn RuleSource>,
}

/// In-process adapters for every port, kept typed so callers can inspect
/// what was stored and subscribe to topics.
#[derive(Clone)]
pub struct InMemoryStack {
    pub window: Arc<InMemoryTraceWindow>,
    pub store: Arc<InMemoryEventStore>,
    pub broadcaster: Arc<ChannelBroadcaster>,
    pub rules: Arc<StaticRuleSource>,
}

impl InMemoryStack {
    pub fn new(config: &MonitorConfig, rules: StaticRuleSource) -> Self {
        Self {
            window: Arc::new(InMemoryTraceWindow::new(chrono::Duration::hours(IN_MEMORY_RETENTION_HOURS))),
            store: Arc::new(InMemoryEventStore::new()),
            broadcaster: Arc::new(ChannelBroadcaster::new(config.broadcast.channel_capacity)),
            rules: Arc::new(rules),
        }
    }

    pub fn ports(&self) -> Ports {
        Ports {
            recorder: self.window.clone(),
            window: self.window.clone(),
            store: self.store.clone(),
            broadcaster: self.broadcaster.clone(),
            rules: self.rules.clone(),
        }
    }
}

/// What one ingest pass produced.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub trace_id: String,
    /// `None` when the rule source could not be read.
    pub alerts: Option<EvaluationOutcome>,
    pub compliance: ComplianceReport,
}

impl IngestReport {
    pub fn fired_count(&self) -> usize {
        self.alerts.as_ref().map_or(0, EvaluationOutcome::fired_count)
    }
}

/// Main ingest service
#[derive(Clone)]
pub struct Telemetrist {
    recorder: Arc<dyn TraceRecorder>,
    rules: Arc<dyn RuleSource>,
    evaluator: AlertEvaluator,
    compliance: ComplianceOrchestrator,
    bias: BiasAnalyzer,
    timeout: Option<Duration>,
}

impl Telemetrist {
    pub fn new(ports: Ports, config: &MonitorConfig) -> Self {
        Self::with_dedup(ports, config, Arc::new(DedupCache::new()))
    }

    /// Build an engine that shares `dedup` with other engines.
    pub fn with_dedup(ports: Ports, config: &MonitorConfig, dedup: Arc<DedupCache>) -> Self {
        let window = MetricWindow::new(
            ports.window,
            chrono::Duration::minutes(i64::from(config.alerting.window_minutes)),
        );
        let evaluator = AlertEvaluator::new(window, dedup, ports.store.clone(), ports.broadcaster.clone())
            .with_default_cooldown_minutes(config.alerting.default_cooldown_minutes);

        Self {
            recorder: ports.recorder,
            rules: ports.rules,
            evaluator,
            compliance: ComplianceOrchestrator::new(ports.store, ports.broadcaster),
            bias: BiasAnalyzer::new(config.compliance.bias.clone()),
            timeout: config.alerting.evaluation_timeout_ms.map(Duration::from_millis),
        }
    }

    /// Build from the process-wide configuration.
    pub fn from_config(ports: Ports) -> Result<Self, TelemetristError> {
        let config = MonitorConfig::get()?;
        Ok(Self::new(ports, &config))
    }

    pub fn evaluator(&self) -> &AlertEvaluator {
        &self.evaluator
    }

    /// Record `trace`, then run the alert and compliance passes on it.
    ///
    /// The passes run on their own task. The configured timeout bounds only
    /// the wait for the report: a pass that outlives it still persists and
    /// publishes what it claimed.
    pub async fn ingest(&self, trace: Trace) -> Result<IngestReport, TelemetristError> {
        let span = info_span!("ingest", trace_id = %trace.id, agent = %trace.agent);
        let engine = self.clone();
        let task = tokio::spawn(async move { engine.run_passes(trace).await }.instrument(span));

        match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, task).await {
                Ok(joined) => Ok(joined?),
                Err(_) => {
                    let timeout_ms = limit.as_millis() as u64;
                    warn!(timeout_ms, "Ingest pass timed out; it continues in the background");
                    Err(TelemetristError::Timeout { timeout_ms })
                }
            },
            None => Ok(task.await?),
        }
    }

    async fn run_passes(&self, trace: Trace) -> IngestReport {
        if let Err(e) = self.recorder.record(&trace).await {
            // The passes still run; windowed metrics just miss this trace.
            warn!(error = %e, "Failed to record trace in window store");
        }

        let alert_pass = async {
            match self.evaluator.evaluate_from(&trace, self.rules.as_ref()).await {
                Ok(outcome) => Some(outcome),
                Err(e) => {
                    warn!(error = %e, "Alert pass skipped");
                    None
                }
            }
        };
        let compliance_pass = self.compliance.run(&trace);

        let (alerts, compliance) = tokio::join!(alert_pass, compliance_pass);
        IngestReport {
            trace_id: trace.id,
            alerts,
            compliance,
        }
    }

    /// Bias analysis over a batch, using the configured thresholds.
    pub fn bias_report(&self, traces: &[Trace]) -> FullBiasReport {
        self.bias.run_full_analysis(traces)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TelemetristError {
    #[error("Ingest pass exceeded {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Port error: {0}")]
    Port(#[from] PortError),

    #[error("Ingest task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("Logging error: {0}")]
    Logging(String),
}
