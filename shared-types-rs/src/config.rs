// shared-types-rs/src/config.rs
// Configuration loader for the monitoring engine

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

static MONITOR_CONFIG: OnceCell<Arc<MonitorConfig>> = OnceCell::new();

pub const CONFIG_PATH_ENV: &str = "MONITOR_CONFIG_PATH";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Configuration not initialized")]
    NotInitialized,

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Main configuration structure. Every field has a default, so an empty file
/// (or no file at all) is a valid configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub alerting: AlertingConfig,
    pub compliance: ComplianceConfig,
    pub broadcast: BroadcastConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AlertingConfig {
    /// Lookback window for windowed metrics.
    pub window_minutes: u32,
    /// Cooldown applied to rules that do not carry their own.
    pub default_cooldown_minutes: u32,
    /// Upper bound on one ingest pass; unset means no bound.
    pub evaluation_timeout_ms: Option<u64>,
}

impl Default for AlertingConfig {
    fn default() -> Self {
        Self {
            window_minutes: 60,
            default_cooldown_minutes: 5,
            evaluation_timeout_ms: None,
        }
    }
}

/// Maximum tolerated spread of per-group rates, in percentage points.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct BiasThresholds {
    pub geography: f64,
    pub age_group: f64,
    pub gender: f64,
    pub claim_type: f64,
    pub minimum_sample_size: usize,
}

impl Default for BiasThresholds {
    fn default() -> Self {
        Self {
            geography: 15.0,
            age_group: 12.0,
            gender: 10.0,
            claim_type: 20.0,
            minimum_sample_size: 5,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ComplianceConfig {
    pub bias: BiasThresholds,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct BroadcastConfig {
    pub channel_capacity: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self { channel_capacity: 256 }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

impl MonitorConfig {
    /// Load the process-wide configuration.
    ///
    /// Reads the TOML file named by `MONITOR_CONFIG_PATH` (defaults when the
    /// variable is unset), applies `MONITOR_*` overrides and validates.
    pub fn load() -> Result<Arc<MonitorConfig>, ConfigError> {
        // Check if already loaded
        if let Some(config) = MONITOR_CONFIG.get() {
            return Ok(Arc::clone(config));
        }

        let mut config = match env::var(CONFIG_PATH_ENV) {
            Ok(path) => Self::from_file(path)?,
            Err(_) => Self::default(),
        };
        config.apply_overrides(|key| env::var(key).ok())?;
        config.validate()?;

        Self::init(config)
    }

    /// Install `config` as the process-wide configuration. The first caller
    /// wins; later callers receive the already-installed instance.
    pub fn init(config: MonitorConfig) -> Result<Arc<MonitorConfig>, ConfigError> {
        config.validate()?;
        Ok(Arc::clone(MONITOR_CONFIG.get_or_init(|| Arc::new(config))))
    }

    /// Get the global configuration instance
    pub fn get() -> Result<Arc<MonitorConfig>, ConfigError> {
        MONITOR_CONFIG
            .get()
            .map(Arc::clone)
            .ok_or(ConfigError::NotInitialized)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = PathBuf::from(path.as_ref());
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }
        let contents = fs::read_to_string(&path)?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Apply `MONITOR_*` overrides read through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("MONITOR_WINDOW_MINUTES") {
            self.alerting.window_minutes = parse_override("MONITOR_WINDOW_MINUTES", &v)?;
        }
        if let Some(v) = lookup("MONITOR_DEFAULT_COOLDOWN_MINUTES") {
            self.alerting.default_cooldown_minutes =
                parse_override("MONITOR_DEFAULT_COOLDOWN_MINUTES", &v)?;
        }
        if let Some(v) = lookup("MONITOR_EVALUATION_TIMEOUT_MS") {
            self.alerting.evaluation_timeout_ms =
                Some(parse_override("MONITOR_EVALUATION_TIMEOUT_MS", &v)?);
        }
        if let Some(v) = lookup("MONITOR_BROADCAST_CAPACITY") {
            self.broadcast.channel_capacity = parse_override("MONITOR_BROADCAST_CAPACITY", &v)?;
        }
        if let Some(v) = lookup("MONITOR_BIAS_MIN_SAMPLE") {
            self.compliance.bias.minimum_sample_size = parse_override("MONITOR_BIAS_MIN_SAMPLE", &v)?;
        }
        if let Some(v) = lookup("MONITOR_LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = lookup("MONITOR_LOG_JSON") {
            self.logging.json_format = parse_override("MONITOR_LOG_JSON", &v)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.alerting.window_minutes == 0 {
            return Err(ConfigError::InvalidValue(
                "alerting.window_minutes must be positive".to_string(),
            ));
        }
        if self.broadcast.channel_capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "broadcast.channel_capacity must be positive".to_string(),
            ));
        }
        let bias = &self.compliance.bias;
        for (name, value) in [
            ("geography", bias.geography),
            ("age_group", bias.age_group),
            ("gender", bias.gender),
            ("claim_type", bias.claim_type),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::InvalidValue(format!(
                    "compliance.bias.{} must be a non-negative number",
                    name
                )));
            }
        }
        Ok(())
    }
}

fn parse_override<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue(format!("{}={}", key, value)))
}
