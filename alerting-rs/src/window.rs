//! Rolling-window metric aggregation.

use std::cmp::Ordering;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use shared_types::{AgentCategory, AlertMetric, Trace, TraceSeries, TraceWindow};
use tracing::debug;

use crate::AlertingError;

/// Nearest-rank percentile of `values` for `percentile` in `0..=100`.
///
/// Sorts ascending and returns the element at `ceil(p * n / 100) - 1`, with
/// no interpolation. Empty input yields 0.
pub fn nearest_rank_percentile(values: &[f64], percentile: u8) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));

    let n = sorted.len();
    let p = percentile.min(100) as usize;
    // Integer ceiling keeps the rank exact for every n.
    let rank = (p * n + 99) / 100;
    sorted[rank.saturating_sub(1).min(n - 1)]
}

/// Percentage of non-zero indicator values; 0 for an empty window.
fn indicator_rate(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let hits = values.iter().filter(|v| **v != 0.0).count();
    100.0 * hits as f64 / values.len() as f64
}

/// Resolves alert metrics, either off the current trace or over the recent
/// window served by a [`TraceWindow`].
#[derive(Clone)]
pub struct MetricWindow {
    source: Arc<dyn TraceWindow>,
    lookback: Duration,
}

impl MetricWindow {
    pub fn new(source: Arc<dyn TraceWindow>, lookback: Duration) -> Self {
        Self { source, lookback }
    }

    pub fn lookback(&self) -> Duration {
        self.lookback
    }

    async fn series(
        &self,
        series: TraceSeries,
        scope: Option<AgentCategory>,
        now: DateTime<Utc>,
    ) -> Result<Vec<f64>, AlertingError> {
        let start = now - self.lookback;
        let values = self
            .source
            .query(series, scope, start, now)
            .await
            .map_err(AlertingError::WindowQuery)?;
        debug!(?series, ?scope, count = values.len(), "Window query");
        Ok(values)
    }

    /// Resolve `metric` for `trace`. Windowed metrics are restricted to
    /// `scope` when set. Returns `None` for unrecognised metrics.
    pub async fn resolve(
        &self,
        metric: &AlertMetric,
        scope: Option<AgentCategory>,
        trace: &Trace,
        now: DateTime<Utc>,
    ) -> Result<Option<f64>, AlertingError> {
        let value = match metric {
            AlertMetric::Latency => trace.total_latency_ms as f64,
            AlertMetric::Cost => trace.total_cost_usd,
            AlertMetric::GuardrailFailureRate => {
                if trace.has_failed_guardrail() {
                    100.0
                } else {
                    0.0
                }
            }
            AlertMetric::LatencyP95 => {
                let latencies = self.series(TraceSeries::LatencyMs, scope, now).await?;
                nearest_rank_percentile(&latencies, 95)
            }
            AlertMetric::ErrorRate => {
                indicator_rate(&self.series(TraceSeries::ErrorIndicator, scope, now).await?)
            }
            AlertMetric::CostPerHour => {
                self.series(TraceSeries::CostUsd, scope, now).await?.iter().sum()
            }
            AlertMetric::EscalationRate => {
                indicator_rate(&self.series(TraceSeries::EscalationIndicator, scope, now).await?)
            }
            AlertMetric::Unrecognized(_) => return Ok(None),
        };

        if !value.is_finite() {
            return Err(AlertingError::NonFiniteMetric {
                metric: metric.to_string(),
                value,
            });
        }
        Ok(Some(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::memory::InMemoryTraceWindow;
    use shared_types::{Decision, ExecutionStatus, GuardrailCheck, GuardrailKind, TraceRecorder};
    use test_case::test_case;

    #[test_case(&[], 95 => 0.0 ; "empty window")]
    #[test_case(&[42.0], 95 => 42.0 ; "single value")]
    #[test_case(&[5.0, 1.0, 4.0, 2.0, 3.0], 95 => 5.0 ; "five values")]
    #[test_case(&[5.0, 1.0, 4.0, 2.0, 3.0], 50 => 3.0 ; "median")]
    #[test_case(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0,
                  11.0, 12.0, 13.0, 14.0, 15.0, 16.0, 17.0, 18.0, 19.0, 20.0], 95 => 19.0 ; "twenty values")]
    fn test_nearest_rank(values: &[f64], percentile: u8) -> f64 {
        nearest_rank_percentile(values, percentile)
    }

    #[test]
    fn test_p99_of_hundred() {
        let values: Vec<f64> = (1..=100).map(f64::from).collect();
        assert_eq!(nearest_rank_percentile(&values, 99), 99.0);
        assert_eq!(nearest_rank_percentile(&values, 100), 100.0);
    }

    async fn window_with(traces: Vec<Trace>) -> MetricWindow {
        let store = Arc::new(InMemoryTraceWindow::default());
        for t in &traces {
            store.record(t).await.unwrap();
        }
        MetricWindow::new(store, Duration::hours(1))
    }

    #[tokio::test]
    async fn test_windowed_metrics() {
        let traces = vec![
            Trace::new(AgentCategory::Claims).with_latency_ms(1000).with_cost_usd(0.5),
            Trace::new(AgentCategory::Claims)
                .with_latency_ms(3000)
                .with_cost_usd(0.25)
                .with_status(ExecutionStatus::Error),
            Trace::new(AgentCategory::Claims)
                .with_latency_ms(2000)
                .with_decision(Decision::Escalated),
            Trace::new(AgentCategory::Fraud)
                .with_latency_ms(9000)
                .with_decision(Decision::Flagged),
        ];
        let current = traces[0].clone();
        let window = window_with(traces).await;
        let now = Utc::now();

        let p95_claims = window
            .resolve(&AlertMetric::LatencyP95, Some(AgentCategory::Claims), &current, now)
            .await
            .unwrap();
        assert_eq!(p95_claims, Some(3000.0));

        let p95_all = window.resolve(&AlertMetric::LatencyP95, None, &current, now).await.unwrap();
        assert_eq!(p95_all, Some(9000.0));

        let error_rate = window.resolve(&AlertMetric::ErrorRate, None, &current, now).await.unwrap();
        assert_eq!(error_rate, Some(25.0));

        let escalation = window
            .resolve(&AlertMetric::EscalationRate, None, &current, now)
            .await
            .unwrap();
        assert_eq!(escalation, Some(50.0));

        let cost = window.resolve(&AlertMetric::CostPerHour, None, &current, now).await.unwrap();
        assert_eq!(cost, Some(0.75));
    }

    #[tokio::test]
    async fn test_trace_local_metrics() {
        let window = window_with(Vec::new()).await;
        let trace = Trace::new(AgentCategory::Support)
            .with_latency_ms(750)
            .with_cost_usd(0.01)
            .with_guardrail(GuardrailCheck::failed(GuardrailKind::Pii, "email in reply"));
        let now = Utc::now();

        assert_eq!(window.resolve(&AlertMetric::Latency, None, &trace, now).await.unwrap(), Some(750.0));
        assert_eq!(window.resolve(&AlertMetric::Cost, None, &trace, now).await.unwrap(), Some(0.01));
        assert_eq!(
            window.resolve(&AlertMetric::GuardrailFailureRate, None, &trace, now).await.unwrap(),
            Some(100.0)
        );
        assert_eq!(window.resolve(&AlertMetric::ErrorRate, None, &trace, now).await.unwrap(), Some(0.0));
        assert_eq!(
            window
                .resolve(&AlertMetric::Unrecognized("token_burn".into()), None, &trace, now)
                .await
                .unwrap(),
            None
        );
    }
}
