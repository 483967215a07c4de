//! # Structured Logging
//!
//! Installs the global `tracing` subscriber for the ingest binary.

use std::sync::atomic::{AtomicBool, Ordering};

use shared_types::config::LoggingConfig;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

use crate::TelemetristError;

// Flag to track if logging has been initialized
static LOGGING_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Initialize logging. `RUST_LOG` wins over `config.level` when set.
/// Calling this more than once is a no-op.
pub fn init_logging(config: &LoggingConfig) -> Result<(), TelemetristError> {
    if LOGGING_INITIALIZED.load(Ordering::SeqCst) {
        return Ok(());
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    // Exactly one of the two formatting layers is active.
    let json_layer = config.json_format.then(|| {
        fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_target(true)
            .with_writer(std::io::stderr)
    });
    let text_layer = (!config.json_format).then(|| {
        fmt::layer()
            .with_target(true)
            .with_writer(std::io::stderr)
    });

    let subscriber = Registry::default().with(filter).with(json_layer).with(text_layer);

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| TelemetristError::Logging(format!("Failed to set global subscriber: {}", e)))?;

    LOGGING_INITIALIZED.store(true, Ordering::SeqCst);

    tracing::info!(level = %config.level, json = %config.json_format, "Structured logging initialized");
    Ok(())
}
