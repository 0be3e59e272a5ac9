//! Guarded package upgrades.
//!
//! An upgrade is backed up, applied, checked and rolled back through the
//! restore executor when either the install or the check fails. The backup
//! is removed on every path.

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Command;

use crate::config::{RemedyConfig, RestoreConfig, UpgradeConfig};
use crate::errors::{RemedyError, RemedyResult};
use crate::installer::PackageInstaller;
use crate::models::Vulnerability;
use crate::restore::requirements::{installed_versions, normalize_name};
use crate::restore::{create_environment_backup, EnvironmentBackup, RestoreExecutor, RestoreResult};
use crate::utils::duration_secs;

const PACKAGE_NAME_PATTERN: &str = r"^[A-Za-z0-9]([A-Za-z0-9._-]*[A-Za-z0-9])?$";
const VERSION_PATTERN: &str = r"^[A-Za-z0-9][A-Za-z0-9.+!_-]*$";

/// Lines of check output kept in an error message
const CHECK_OUTPUT_LINES: usize = 20;

/// Decides whether an upgraded environment is acceptable
#[async_trait]
pub trait PostUpgradeCheck: Send + Sync {
    async fn run(&self) -> RemedyResult<()>;
}

/// Accepts every upgrade
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCheck;

#[async_trait]
impl PostUpgradeCheck for NoCheck {
    async fn run(&self) -> RemedyResult<()> {
        Ok(())
    }
}

/// Runs a shell command; a non-zero exit rejects the upgrade.
#[derive(Debug, Clone)]
pub struct CommandCheck {
    command: String,
    timeout: Duration,
}

impl CommandCheck {
    pub fn new(command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            timeout,
        }
    }
}

#[async_trait]
impl PostUpgradeCheck for CommandCheck {
    async fn run(&self) -> RemedyResult<()> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&self.command)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        log::info!("Running post-upgrade check: {}", self.command);
        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| RemedyError::timeout("post-upgrade check", self.timeout))?
            .map_err(|e| RemedyError::external("post-upgrade check", e.to_string()))?;

        if output.status.success() {
            return Ok(());
        }

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
        let tail = lines[lines.len().saturating_sub(CHECK_OUTPUT_LINES)..].join("\n");
        Err(RemedyError::external(
            format!("post-upgrade check exited with {}", output.status),
            tail,
        ))
    }
}

/// Outcome of one guarded upgrade
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpgradeResult {
    pub package_name: String,
    pub from_version: Option<String>,
    pub to_version: String,
    pub success: bool,
    pub error_message: Option<String>,
    pub rollback_performed: bool,
    /// The restore run when the upgrade was rolled back
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restore: Option<RestoreResult>,
    #[serde(with = "duration_secs")]
    pub duration: Duration,
}

impl UpgradeResult {
    fn new(package_name: &str, from_version: Option<String>, to_version: &str) -> Self {
        Self {
            package_name: package_name.to_string(),
            from_version,
            to_version: to_version.to_string(),
            success: false,
            error_message: None,
            rollback_performed: false,
            restore: None,
            duration: Duration::ZERO,
        }
    }

    fn failed(mut self, message: impl Into<String>, started: Instant) -> Self {
        self.error_message = Some(message.into());
        self.duration = started.elapsed();
        self
    }
}

pub struct UpgradeValidator {
    installer: Arc<dyn PackageInstaller>,
    restore_config: RestoreConfig,
    executor: RestoreExecutor,
    check: Box<dyn PostUpgradeCheck>,
    package_name_re: Regex,
    version_re: Regex,
}

impl UpgradeValidator {
    pub fn new(installer: Arc<dyn PackageInstaller>, restore_config: RestoreConfig) -> RemedyResult<Self> {
        let executor = RestoreExecutor::new(installer.clone(), restore_config.clone());
        Ok(Self {
            installer,
            restore_config,
            executor,
            check: Box::new(NoCheck),
            package_name_re: Regex::new(PACKAGE_NAME_PATTERN)
                .map_err(|e| RemedyError::regex(e, PACKAGE_NAME_PATTERN))?,
            version_re: Regex::new(VERSION_PATTERN).map_err(|e| RemedyError::regex(e, VERSION_PATTERN))?,
        })
    }

    /// Build a validator from configuration: the configured test command, if
    /// any, becomes the post-upgrade check.
    pub fn from_config(installer: Arc<dyn PackageInstaller>, config: &RemedyConfig) -> RemedyResult<Self> {
        let validator = Self::new(installer, config.restore.clone())?;
        Ok(match Self::command_check(&config.upgrade) {
            Some(check) => validator.with_check(Box::new(check)),
            None => validator,
        })
    }

    fn command_check(config: &UpgradeConfig) -> Option<CommandCheck> {
        config
            .test_command
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .map(|c| CommandCheck::new(c, config.test_timeout))
    }

    pub fn with_check(mut self, check: Box<dyn PostUpgradeCheck>) -> Self {
        self.check = check;
        self
    }

    async fn current_version(&self, package: &str) -> Option<String> {
        match self.installer.list_installed().await {
            Ok(lines) => installed_versions(&lines)
                .remove(&normalize_name(package))
                .flatten(),
            Err(e) => {
                log::warn!("Could not determine installed version of {}: {}", package, e);
                None
            }
        }
    }

    /// Upgrade `package` to `target_version`, rolling back on failure.
    ///
    /// Failed upgrades are `Ok` results; `Err` means the backup itself could
    /// not be written.
    pub async fn validate_upgrade(
        &self,
        package: &str,
        target_version: &str,
    ) -> RemedyResult<UpgradeResult> {
        let started = Instant::now();

        if !self.package_name_re.is_match(package) {
            return Ok(UpgradeResult::new(package, None, target_version)
                .failed(format!("Invalid package name '{}'", package), started));
        }
        if !self.version_re.is_match(target_version) {
            return Ok(UpgradeResult::new(package, None, target_version)
                .failed(format!("Invalid version '{}'", target_version), started));
        }

        let from_version = self.current_version(package).await;
        log::info!(
            "Validating upgrade: {} {} -> {}",
            package,
            from_version.as_deref().unwrap_or("(not installed)"),
            target_version
        );
        let result = UpgradeResult::new(package, from_version, target_version);

        let mut backup = create_environment_backup(self.installer.as_ref(), &self.restore_config).await?;
        let outcome = self.apply(&backup, result, started).await;
        if let Err(e) = backup.cleanup() {
            log::warn!("Failed to clean up backup {}: {}", backup.backup_path().display(), e);
        }

        if outcome.success {
            log::info!("Upgrade of {} to {} validated", package, target_version);
        } else {
            log::warn!(
                "Upgrade of {} to {} failed: {}",
                package,
                target_version,
                outcome.error_message.as_deref().unwrap_or("unknown error")
            );
        }
        Ok(outcome)
    }

    async fn apply(
        &self,
        backup: &EnvironmentBackup,
        mut result: UpgradeResult,
        started: Instant,
    ) -> UpgradeResult {
        if !backup.is_valid() {
            return result.failed(
                "Backup validation failed; refusing to upgrade without a usable backup",
                started,
            );
        }

        let failure = match self
            .installer
            .install(&result.package_name, Some(result.to_version.as_str()))
            .await
        {
            Err(e) => format!("Failed to install package: {}", e),
            Ok(()) => match self.check.run().await {
                Ok(()) => {
                    result.success = true;
                    result.duration = started.elapsed();
                    return result;
                }
                Err(e) => format!("Post-upgrade check failed: {}", e),
            },
        };

        log::warn!("{}; rolling back", failure);
        match self.executor.restore_environment_detailed(backup).await {
            Ok(restore) => {
                result.rollback_performed = restore.success;
                result.restore = Some(restore);
            }
            Err(e) => log::error!("Rollback of {} failed: {}", result.package_name, e),
        }
        result.failed(failure, started)
    }

    /// Upgrade to the vulnerability's recommended fix version
    pub async fn validate_vulnerability_fix(
        &self,
        vulnerability: &Vulnerability,
    ) -> RemedyResult<UpgradeResult> {
        match vulnerability.recommended_fix_version() {
            Some(version) => {
                self.validate_upgrade(vulnerability.package_name(), version)
                    .await
            }
            None => Ok(UpgradeResult::new(
                vulnerability.package_name(),
                Some(vulnerability.installed_version().to_string()),
                "",
            )
            .failed(
                format!("No fix available for {}", vulnerability.id()),
                Instant::now(),
            )),
        }
    }
}
