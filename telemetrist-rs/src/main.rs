// telemetrist-rs/src/main.rs
// Batch ingest: runs newline-delimited JSON traces through the engine and
// prints alerts and compliance events as JSON lines.

use std::env;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Write};

use anyhow::Context;
use serde_json::json;
use shared_types::{MonitorConfig, StaticRuleSource, Trace};
use telemetrist::{init_logging, InMemoryStack, Telemetrist};
use tracing::{info, warn};

const TRACES_PATH_ENV: &str = "TELEMETRIST_TRACES_PATH";
const RULES_PATH_ENV: &str = "TELEMETRIST_RULES_PATH";
const BIAS_REPORT_ENV: &str = "TELEMETRIST_BIAS_REPORT";

fn flag_enabled(name: &str) -> bool {
    env::var(name)
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

fn load_rules() -> anyhow::Result<StaticRuleSource> {
    match env::var(RULES_PATH_ENV) {
        Ok(path) => {
            let contents =
                fs::read_to_string(&path).with_context(|| format!("Failed to read rules file {}", path))?;
            let rules = StaticRuleSource::from_json_str(&contents)
                .with_context(|| format!("Failed to parse rules file {}", path))?;
            info!(path = %path, rules = rules.rules().len(), "Loaded alert rules");
            Ok(rules)
        }
        Err(_) => {
            warn!("{} not set; running without alert rules", RULES_PATH_ENV);
            Ok(StaticRuleSource::default())
        }
    }
}

fn read_traces() -> anyhow::Result<Vec<Trace>> {
    let reader: Box<dyn BufRead> = match env::var(TRACES_PATH_ENV) {
        Ok(path) => Box::new(BufReader::new(
            File::open(&path).with_context(|| format!("Failed to open traces file {}", path))?,
        )),
        Err(_) => Box::new(BufReader::new(io::stdin())),
    };

    let mut traces = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line.context("Failed to read trace input")?;
        if line.trim().is_empty() {
            continue;
        }
        match Trace::from_json(&line) {
            Ok(trace) => traces.push(trace),
            Err(e) => warn!(line = index + 1, error = %e, "Skipping malformed trace"),
        }
    }
    Ok(traces)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenv::dotenv().ok();

    let config = MonitorConfig::load()?;
    init_logging(&config.logging)?;

    let stack = InMemoryStack::new(&config, load_rules()?);
    let engine = Telemetrist::new(stack.ports(), &config);

    let traces = read_traces()?;
    info!(count = traces.len(), "Ingesting traces");

    let stdout = io::stdout();
    let mut out = stdout.lock();
    for trace in &traces {
        let report = match engine.ingest(trace.clone()).await {
            Ok(report) => report,
            Err(e) => {
                warn!(trace_id = %trace.id, error = %e, "Ingest failed");
                continue;
            }
        };

        if let Some(outcome) = &report.alerts {
            for alert in &outcome.fired {
                writeln!(out, "{}", json!({ "kind": "alert", "alert": alert }))?;
            }
        }
        writeln!(
            out,
            "{}",
            json!({ "kind": "compliance_event", "event": report.compliance.event })
        )?;
    }

    if flag_enabled(BIAS_REPORT_ENV) {
        let bias = engine.bias_report(&traces);
        writeln!(out, "{}", json!({ "kind": "bias_report", "report": bias }))?;
    }

    out.flush()?;
    Ok(())
}
