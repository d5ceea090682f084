//! Audit configuration shared by every stage of the pipeline.

use std::path::Path;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ConfigError;

/// Price-book year assumed when an estimate does not state one.
pub const DEFAULT_YEAR: i32 = 2024;

/// Tunables for one audit run.
///
/// Every field has a default, so a config file only needs the keys it
/// overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Allowed relative deviation between calculated and claimed totals (0.005 = 0.5%).
    pub tolerance: Decimal,
    /// Multiplier from reference units to claim units. Reference tables quote
    /// thousands of tenge while estimates quote tenge, hence 1000.
    pub reference_unit_scale: Decimal,
    /// Maximum number of tables audited concurrently.
    pub worker_limit: usize,
    /// Year used when the extracted claim omits one.
    pub default_year: i32,
    pub extraction: ExtractionConfig,
    /// Upper bound for one reference-store query, in seconds.
    pub reference_timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Extra attempts after the first malformed or failed extraction.
    pub max_retries: u32,
    /// Backoff before the first retry; doubles on every further retry.
    pub backoff_ms: u64,
    /// Upper bound for one extraction call, in seconds.
    pub timeout_secs: u64,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            tolerance: Decimal::new(5, 3),
            reference_unit_scale: Decimal::from(1000),
            worker_limit: 4,
            default_year: DEFAULT_YEAR,
            extraction: ExtractionConfig::default(),
            reference_timeout_secs: 10,
        }
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff_ms: 500,
            timeout_secs: 120,
        }
    }
}

impl ExtractionConfig {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl AuditConfig {
    /// Load a JSON config file; missing keys keep their defaults.
    pub fn from_json_path(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        info!(path = %path.display(), "loaded audit config");
        Ok(config)
    }

    pub fn reference_timeout(&self) -> Duration {
        Duration::from_secs(self.reference_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tolerance.is_sign_negative() {
            return Err(ConfigError::Invalid(format!(
                "tolerance must be >= 0, got {}",
                self.tolerance
            )));
        }
        if self.reference_unit_scale <= Decimal::ZERO {
            return Err(ConfigError::Invalid(format!(
                "reference_unit_scale must be > 0, got {}",
                self.reference_unit_scale
            )));
        }
        if self.worker_limit == 0 {
            return Err(ConfigError::Invalid("worker_limit must be >= 1".into()));
        }
        if self.extraction.timeout_secs == 0 || self.reference_timeout_secs == 0 {
            return Err(ConfigError::Invalid("timeouts must be >= 1 second".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = AuditConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.tolerance.to_string(), "0.005");
        assert_eq!(config.extraction.max_retries, 2);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"tolerance": 0.01, "extraction": {{"max_retries": 4}}}}"#).unwrap();

        let config = AuditConfig::from_json_path(file.path()).unwrap();
        assert_eq!(config.tolerance, Decimal::new(1, 2));
        assert_eq!(config.extraction.max_retries, 4);
        assert_eq!(config.extraction.timeout_secs, 120);
        assert_eq!(config.reference_unit_scale, Decimal::from(1000));
    }

    #[test]
    fn missing_file_errors() {
        let result = AuditConfig::from_json_path(Path::new("/nonexistent/smeta.json"));
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn rejects_nonsense_values() {
        let config = AuditConfig {
            worker_limit: 0,
            ..AuditConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let config = AuditConfig {
            tolerance: Decimal::new(-1, 2),
            ..AuditConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let config = AuditConfig {
            reference_unit_scale: Decimal::ZERO,
            ..AuditConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
