use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::number::FixedDecimal;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Protocol parameters the engine needs. Every field has a default, so an
/// empty JSON object is a valid configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Applied to claim value modifiers when opening new exposure.
    pub setup_leverage_fraction: FixedDecimal,
    pub warning_threshold: FixedDecimal,
    pub critical_threshold: FixedDecimal,
    /// Seconds after which the owner may end a liquidation unilaterally.
    pub liquidation_timeout_secs: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            setup_leverage_fraction: FixedDecimal::from_bps(5_000),
            warning_threshold: FixedDecimal::from_bps(8_000),
            critical_threshold: FixedDecimal::from_bps(9_000),
            liquidation_timeout_secs: 60,
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let fraction = self.setup_leverage_fraction;
        if fraction <= FixedDecimal::ZERO || fraction > FixedDecimal::ONE {
            return Err(ConfigError::Invalid(format!(
                "setup_leverage_fraction must be in (0, 1], got {fraction}"
            )));
        }
        if !(FixedDecimal::ZERO < self.warning_threshold
            && self.warning_threshold < self.critical_threshold
            && self.critical_threshold < FixedDecimal::ONE)
        {
            return Err(ConfigError::Invalid(format!(
                "thresholds must satisfy 0 < warning ({}) < critical ({}) < 1",
                self.warning_threshold, self.critical_threshold
            )));
        }
        if self.liquidation_timeout_secs < 0 {
            return Err(ConfigError::Invalid(
                "liquidation_timeout_secs must not be negative".into(),
            ));
        }
        Ok(())
    }
}
