//! Engine configuration: k-anonymity floor, budget policy, and the two time
//! anchors.
//!
//! Two distinct notions of "current time" coexist and must not be unified:
//! budget resets run against the wall clock, while relative and absolute
//! time-window filters resolve against a fixed *reference instant*, the
//! dataset's nominal "now". A snapshot captured at 12:00 answers "last 2
//! hours" relative to 12:00, regardless of when the query is typed.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, CordonResult};
use crate::model::ClearanceLevel;

/// Engine-wide configuration. Loadable from TOML; every field has a default.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Minimum result-set size for individual-record disclosure.
    pub min_k: usize,
    /// Per-window query budget for SECRET users.
    pub budget_secret: u32,
    /// Per-window query budget for CONFIDENTIAL users.
    pub budget_confidential: u32,
    /// Per-window query budget for everyone else.
    pub budget_default: u32,
    /// Seconds until an exhausted budget replenishes.
    pub budget_reset_secs: i64,
    /// Fixed reference instant that time-window filters resolve against.
    pub reference_instant: DateTime<Utc>,
    /// Geo-filter radius in km when the query names a point but no radius.
    pub default_radius_km: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_k: 2,
            budget_secret: 20,
            budget_confidential: 8,
            budget_default: 5,
            budget_reset_secs: 3600,
            reference_instant: default_reference_instant(),
            default_radius_km: 10.0,
        }
    }
}

/// 2024-06-15T12:00:00Z, the nominal "current" instant of the demo dataset.
fn default_reference_instant() -> DateTime<Utc> {
    DateTime::from_timestamp(1_718_452_800, 0).expect("static timestamp is in range")
}

impl EngineConfig {
    /// Load configuration from a TOML file and validate it.
    pub fn from_toml_file(path: impl AsRef<Path>) -> CordonResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that would disable a protection outright.
    pub fn validate(&self) -> CordonResult<()> {
        if self.min_k == 0 {
            return Err(ConfigError::Invalid {
                message: "min_k must be >= 1".into(),
            }
            .into());
        }
        if self.budget_reset_secs <= 0 {
            return Err(ConfigError::Invalid {
                message: "budget_reset_secs must be positive".into(),
            }
            .into());
        }
        if self.default_radius_km <= 0.0 {
            return Err(ConfigError::Invalid {
                message: "default_radius_km must be positive".into(),
            }
            .into());
        }
        Ok(())
    }

    /// Clearance-dependent budget maximum applied on reset.
    pub fn budget_max(&self, level: ClearanceLevel) -> u32 {
        match level {
            ClearanceLevel::Secret => self.budget_secret,
            ClearanceLevel::Confidential => self.budget_confidential,
            ClearanceLevel::Unclassified => self.budget_default,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = EngineConfig::default();
        config.validate().expect("defaults validate");
        assert_eq!(config.min_k, 2);
        assert_eq!(config.budget_max(ClearanceLevel::Secret), 20);
        assert_eq!(config.budget_max(ClearanceLevel::Confidential), 8);
        assert_eq!(config.budget_max(ClearanceLevel::Unclassified), 5);
    }

    #[test]
    fn zero_min_k_rejected() {
        let config = EngineConfig {
            min_k: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_partial_toml() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        write!(file, "min_k = 3\nbudget_secret = 50\n").expect("write");
        let config = EngineConfig::from_toml_file(file.path()).expect("load");
        assert_eq!(config.min_k, 3);
        assert_eq!(config.budget_secret, 50);
        // Unset fields fall back to defaults.
        assert_eq!(config.budget_default, 5);
    }
}
