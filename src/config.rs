use log::warn;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::constants::{
    BAUD_RATE, DEFAULT_BREAK_STEPS, MAX_RETRY_COUNT, MAX_TIMEOUT_MS, POLL_INTERVAL_MS,
    RETRY_COUNT, STOP_DEADLINE_MS, TIMEOUT_MS,
};
use crate::error::{Result, SyntaError};
use crate::types::{Hemisphere, StopMode};

/// Environment variable naming the config file
pub const CONFIG_ENV: &str = "SYNTA_CONFIG";

/// Config file used when the environment variable is unset
pub const DEFAULT_CONFIG_PATH: &str = "synta.toml";

/// Deployment settings for one mount
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MountConfig {
    pub port: String,
    pub baud_rate: u32,
    /// Per-transaction timeout
    pub timeout_ms: u64,
    /// Attempts per transaction
    pub retry: u32,
    pub stop_mode: StopMode,
    pub hemisphere: Hemisphere,
    pub poll_interval_ms: u64,
    /// Overall bound on waiting for an axis to stop
    pub stop_deadline_ms: u64,
    /// Break point increment sent with GOTO moves
    pub break_steps: u32,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: BAUD_RATE,
            timeout_ms: TIMEOUT_MS,
            retry: RETRY_COUNT,
            stop_mode: StopMode::default(),
            hemisphere: Hemisphere::default(),
            poll_interval_ms: POLL_INTERVAL_MS,
            stop_deadline_ms: STOP_DEADLINE_MS,
            break_steps: DEFAULT_BREAK_STEPS,
        }
    }
}

/// Reject timeouts outside (0, 50000] ms and more than 100 attempts.
pub fn validate_link(timeout_ms: u64, retry: u32) -> Result<()> {
    if timeout_ms == 0 || timeout_ms > MAX_TIMEOUT_MS {
        return Err(SyntaError::BadParameter(format!(
            "timeout {timeout_ms} ms outside (0, {MAX_TIMEOUT_MS}]"
        )));
    }
    if retry > MAX_RETRY_COUNT {
        return Err(SyntaError::BadParameter(format!(
            "retry count {retry} exceeds {MAX_RETRY_COUNT}"
        )));
    }
    Ok(())
}

impl MountConfig {
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: MountConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`; a missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(content) => Self::from_toml(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Config file '{}' not found, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Load from `$SYNTA_CONFIG`, falling back to `synta.toml`.
    pub fn from_env() -> Result<Self> {
        let path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load(path)
    }

    pub fn validate(&self) -> Result<()> {
        validate_link(self.timeout_ms, self.retry)?;
        if self.poll_interval_ms == 0 {
            return Err(SyntaError::BadParameter("poll interval must be positive".to_string()));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn stop_deadline(&self) -> Duration {
        Duration::from_millis(self.stop_deadline_ms)
    }
}
