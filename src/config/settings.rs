/// Engine configuration structures

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use lodestar_core::{OrderKind, RiskLimits};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub engine: EngineSettings,
    pub limits: RiskLimits,
    pub logging: LoggingSettings,
    pub seed: SeedSettings,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Seconds between control-loop ticks
    pub poll_interval_secs: u64,
    /// Seconds between standalone expiry sweeps
    pub expiry_sweep_interval_secs: u64,
    /// Upper bound on any single store or venue call
    pub call_timeout_ms: u64,
    /// Commission charged per unit of executed quantity
    pub fee_rate: f64,
    pub order_kind: OrderKind,
    /// Entries kept in the execution journal
    pub journal_capacity: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: 30,
            expiry_sweep_interval_secs: 60,
            call_timeout_ms: 5000,
            fee_rate: 0.001,
            order_kind: OrderKind::Market,
            journal_capacity: 50,
        }
    }
}

impl EngineSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn expiry_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.expiry_sweep_interval_secs)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub directory: PathBuf,
    pub file_prefix: String,
    /// Filter used when RUST_LOG is unset
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("logs"),
            file_prefix: "lodestar.log".to_string(),
            level: "info".to_string(),
        }
    }
}

/// JSON files a paper session starts from. Missing entries are skipped.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SeedSettings {
    pub signals: Option<PathBuf>,
    pub accounts: Option<PathBuf>,
    pub prices: Option<PathBuf>,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("engine.poll_interval_secs must be at least 1")]
    PollInterval,
    #[error("engine.expiry_sweep_interval_secs must be at least 1")]
    SweepInterval,
    #[error("engine.call_timeout_ms must be at least 1")]
    CallTimeout,
    #[error("engine.fee_rate {0} must be in [0, 1)")]
    FeeRate(f64),
}

impl Config {
    pub fn load_from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks engine settings. Limits are checked when a loop starts with them.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let engine = &self.engine;
        if engine.poll_interval_secs == 0 {
            return Err(ConfigError::PollInterval);
        }
        if engine.expiry_sweep_interval_secs == 0 {
            return Err(ConfigError::SweepInterval);
        }
        if engine.call_timeout_ms == 0 {
            return Err(ConfigError::CallTimeout);
        }
        if !(engine.fee_rate >= 0.0 && engine.fee_rate < 1.0) {
            return Err(ConfigError::FeeRate(engine.fee_rate));
        }
        Ok(())
    }
}
