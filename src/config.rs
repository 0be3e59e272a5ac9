//! Runtime configuration for the assessor, the restore executor and the
//! upgrade validator.
//!
//! Every section has sensible defaults so an empty JSON object (or no config
//! file at all) yields a working setup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::assessor::profiles::PackageProfile;
use crate::errors::{RemedyError, RemedyResult};
use crate::utils::{duration_hours, duration_secs};

/// Risk-score thresholds for each priority level.
///
/// Must be strictly ordered: immediate > urgent > scheduled > planned.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriorityThresholds {
    pub immediate: f64,
    pub urgent: f64,
    pub scheduled: f64,
    pub planned: f64,
}

impl Default for PriorityThresholds {
    fn default() -> Self {
        Self {
            immediate: 8.0,
            urgent: 6.0,
            scheduled: 4.0,
            planned: 0.0,
        }
    }
}

impl PriorityThresholds {
    pub fn validate(&self) -> RemedyResult<()> {
        let values = [self.immediate, self.urgent, self.scheduled, self.planned];
        if values.iter().any(|v| !v.is_finite()) {
            return Err(RemedyError::Config(
                "priority thresholds must be finite numbers".to_string(),
            ));
        }
        if !(self.immediate > self.urgent
            && self.urgent > self.scheduled
            && self.scheduled > self.planned)
        {
            return Err(RemedyError::Config(format!(
                "priority thresholds must be strictly ordered, got immediate={} urgent={} scheduled={} planned={}",
                self.immediate, self.urgent, self.scheduled, self.planned
            )));
        }
        Ok(())
    }
}

/// Base remediation timeline per priority level, serialized in hours.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriorityTimelines {
    #[serde(with = "duration_hours")]
    pub immediate: Duration,
    #[serde(with = "duration_hours")]
    pub urgent: Duration,
    #[serde(with = "duration_hours")]
    pub scheduled: Duration,
    #[serde(with = "duration_hours")]
    pub planned: Duration,
}

impl Default for PriorityTimelines {
    fn default() -> Self {
        const HOUR: u64 = 3600;
        Self {
            immediate: Duration::from_secs(24 * HOUR),
            urgent: Duration::from_secs(72 * HOUR),
            scheduled: Duration::from_secs(7 * 24 * HOUR),
            planned: Duration::from_secs(30 * 24 * HOUR),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AssessorConfig {
    pub thresholds: PriorityThresholds,
    pub timelines: PriorityTimelines,
    /// Extra or overriding package profiles, keyed by package name
    pub custom_profiles: Vec<PackageProfile>,
    /// Worker threads for bulk assessment (0 = number of CPUs)
    pub threads: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RestoreConfig {
    /// Upper bound for a single strategy attempt
    #[serde(with = "duration_secs")]
    pub strategy_timeout: Duration,
    /// Upper bound for a single installer command
    #[serde(with = "duration_secs")]
    pub command_timeout: Duration,
    /// Residual packages tolerated after restoring an empty environment
    pub max_empty_residual: usize,
    /// Where new backups are created; the system temp dir when unset
    pub backup_root: Option<PathBuf>,
}

impl Default for RestoreConfig {
    fn default() -> Self {
        Self {
            strategy_timeout: Duration::from_secs(300),
            command_timeout: Duration::from_secs(120),
            max_empty_residual: 5,
            backup_root: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpgradeConfig {
    /// Python interpreter used to drive pip
    pub python: String,
    /// Shell command run after an upgrade; non-zero exit means failure
    pub test_command: Option<String>,
    #[serde(with = "duration_secs")]
    pub test_timeout: Duration,
}

impl Default for UpgradeConfig {
    fn default() -> Self {
        Self {
            python: "python3".to_string(),
            test_command: None,
            test_timeout: Duration::from_secs(600),
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RemedyConfig {
    pub assessor: AssessorConfig,
    pub restore: RestoreConfig,
    pub upgrade: UpgradeConfig,
}

impl RemedyConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> RemedyResult<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|e| RemedyError::io(e, path.to_path_buf()))?;
        let config: RemedyConfig = serde_json::from_str(&content)?;
        config.assessor.thresholds.validate()?;
        log::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Load from `path` when given, otherwise fall back to defaults.
    pub fn load(path: Option<&Path>) -> RemedyResult<Self> {
        match path {
            Some(p) => Self::from_file(p),
            None => Ok(Self::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_thresholds_are_valid() {
        assert!(PriorityThresholds::default().validate().is_ok());
    }

    #[test]
    fn test_unordered_thresholds_rejected() {
        let thresholds = PriorityThresholds {
            immediate: 6.0,
            urgent: 6.0,
            ..Default::default()
        };
        let err = thresholds.validate().unwrap_err();
        assert!(matches!(err, RemedyError::Config(_)));
    }

    #[test]
    fn test_empty_json_gives_defaults() {
        let config: RemedyConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.restore.strategy_timeout, Duration::from_secs(300));
        assert_eq!(config.restore.max_empty_residual, 5);
        assert_eq!(
            config.assessor.timelines.urgent,
            Duration::from_secs(72 * 3600)
        );
    }

    #[test]
    fn test_from_file_with_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "assessor": {{"thresholds": {{"immediate": 9.0}}, "threads": 2}},
                "restore": {{"strategy_timeout": 12.5}}
            }}"#
        )
        .unwrap();

        let config = RemedyConfig::from_file(file.path()).unwrap();
        assert_eq!(config.assessor.thresholds.immediate, 9.0);
        assert_eq!(config.assessor.thresholds.urgent, 6.0);
        assert_eq!(config.assessor.threads, 2);
        assert_eq!(config.restore.strategy_timeout, Duration::from_millis(12500));
    }

    #[test]
    fn test_from_file_rejects_bad_thresholds() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"assessor": {{"thresholds": {{"planned": 5.0}}}}}}"#).unwrap();
        assert!(RemedyConfig::from_file(file.path()).is_err());
    }
}
