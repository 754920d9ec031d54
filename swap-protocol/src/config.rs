use crate::data_structures::Balance;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Timing and sizing parameters for swaps, relative to the moment a swap is planned.
///
/// Durations are written human-readably in JSON, e.g. `"finality_delay": "12s"`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwapConfig {
    // Both legs
    #[serde(with = "humantime_serde")]
    pub finality_delay: Duration,

    // Source leg: maker may refund after this
    #[serde(with = "humantime_serde")]
    pub src_cancel_delay: Duration,

    // Destination leg
    #[serde(with = "humantime_serde")]
    pub dst_exclusive_delay: Duration,
    #[serde(with = "humantime_serde")]
    pub dst_cancel_delay: Duration,

    // Minimum gap between destination expiry and source cancellation
    #[serde(with = "humantime_serde")]
    pub reaction_margin: Duration,

    pub default_parts_count: u32,
    pub src_safety_deposit: Balance,
    pub dst_safety_deposit: Balance,
}

impl Default for SwapConfig {
    fn default() -> Self {
        SwapConfig {
            finality_delay: Duration::from_secs(12),
            src_cancel_delay: Duration::from_secs(600),
            dst_exclusive_delay: Duration::from_secs(60),
            dst_cancel_delay: Duration::from_secs(300),
            reaction_margin: Duration::from_secs(120),
            default_parts_count: 4,
            src_safety_deposit: 1_000,
            dst_safety_deposit: 1_000,
        }
    }
}

impl SwapConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: SwapConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Checks the delays stagger so every actor keeps a window to react.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_parts_count == 0 {
            return Err(ConfigError::Invalid("default_parts_count must be at least 1".into()));
        }
        if self.dst_exclusive_delay <= self.finality_delay {
            return Err(ConfigError::Invalid(format!(
                "dst_exclusive_delay ({:?}) must exceed finality_delay ({:?})",
                self.dst_exclusive_delay, self.finality_delay
            )));
        }
        if self.dst_cancel_delay <= self.dst_exclusive_delay {
            return Err(ConfigError::Invalid(format!(
                "dst_cancel_delay ({:?}) must exceed dst_exclusive_delay ({:?})",
                self.dst_cancel_delay, self.dst_exclusive_delay
            )));
        }
        if self.dst_cancel_delay + self.reaction_margin > self.src_cancel_delay {
            return Err(ConfigError::Invalid(format!(
                "src_cancel_delay ({:?}) must be at least dst_cancel_delay + reaction_margin ({:?})",
                self.src_cancel_delay,
                self.dst_cancel_delay + self.reaction_margin
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = SwapConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.default_parts_count, 4);
        assert_eq!(config.finality_delay, Duration::from_secs(12));
    }

    #[test]
    fn parses_humantime_durations() {
        let config = SwapConfig::from_json_str(
            r#"{
                "finality_delay": "10s",
                "src_cancel_delay": "20m",
                "dst_exclusive_delay": "1m",
                "dst_cancel_delay": "10m",
                "reaction_margin": "5m",
                "default_parts_count": 8,
                "src_safety_deposit": 5,
                "dst_safety_deposit": 7
            }"#,
        )
        .unwrap();
        assert_eq!(config.src_cancel_delay, Duration::from_secs(1200));
        assert_eq!(config.default_parts_count, 8);
        assert_eq!(config.dst_safety_deposit, 7);
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config = SwapConfig::from_json_str(r#"{ "default_parts_count": 2 }"#).unwrap();
        assert_eq!(config.default_parts_count, 2);
        assert_eq!(config.reaction_margin, SwapConfig::default().reaction_margin);
    }

    #[test]
    fn rejects_unstaggered_delays() {
        let err = SwapConfig::from_json_str(r#"{ "src_cancel_delay": "5m" }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = SwapConfig::from_json_str(r#"{ "dst_exclusive_delay": "5s" }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = SwapConfig::from_json_str(r#"{ "default_parts_count": 0 }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let err = SwapConfig::from_json_str(r#"{ "finality_delay": "soon" }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = SwapConfig::from_file("/nonexistent/swap-config.json").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
