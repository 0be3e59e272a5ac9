//! Environment Restore Module
//!
//! Restores an [`EnvironmentBackup`] by trying a fixed sequence of
//! strategies: ForceReinstall, then CleanInstall, then Fallback. The first
//! success stops the sequence. When all fail the caller gets an aggregate
//! result carrying the most confident error analysis.

pub mod backup;
pub mod logger;
pub mod requirements;
mod strategies;
#[cfg(test)]
pub(crate) mod testing;

pub use backup::{
    create_environment_backup, BackupMetadata, BackupValidator, EnvironmentBackup,
    ValidationResult,
};
pub use logger::{OperationSummary, RestoreLogger, RestoreOperation};

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::analysis::{ErrorAnalysis, ErrorAnalyzer};
use crate::config::RestoreConfig;
use crate::errors::{RemedyError, RemedyResult};
use crate::installer::PackageInstaller;
use crate::utils::{duration_secs, truncated_list};
use requirements::{installed_versions, is_protected, normalize_name, Requirement};
use strategies::StrategyRun;

/// Recovery suggestions copied into an aggregate failure's warnings
const AGGREGATE_SUGGESTIONS: usize = 3;

/// Which strategy (or pseudo-strategy) produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StrategyLabel {
    ForceReinstall,
    CleanInstall,
    Fallback,
    ValidationFailed,
    AllStrategiesFailed,
}

impl std::fmt::Display for StrategyLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StrategyLabel::ForceReinstall => "ForceReinstall",
            StrategyLabel::CleanInstall => "CleanInstall",
            StrategyLabel::Fallback => "Fallback",
            StrategyLabel::ValidationFailed => "ValidationFailed",
            StrategyLabel::AllStrategiesFailed => "AllStrategiesFailed",
        };
        f.write_str(name)
    }
}

/// Outcome of one strategy attempt, or of a whole restore
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestoreResult {
    pub strategy: StrategyLabel,
    pub success: bool,
    pub packages_restored: usize,
    pub packages_failed: Vec<String>,
    #[serde(with = "duration_secs")]
    pub duration: Duration,
    pub error_message: Option<String>,
    pub warnings: Vec<String>,
    /// Present on aggregate and validation failures
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_analysis: Option<ErrorAnalysis>,
}

impl RestoreResult {
    pub fn succeeded(strategy: StrategyLabel, packages_restored: usize, duration: Duration) -> Self {
        Self {
            strategy,
            success: true,
            packages_restored,
            packages_failed: Vec::new(),
            duration,
            error_message: None,
            warnings: Vec::new(),
            error_analysis: None,
        }
    }

    pub fn failed(
        strategy: StrategyLabel,
        error_message: impl Into<String>,
        packages_failed: Vec<String>,
        duration: Duration,
    ) -> Self {
        Self {
            strategy,
            success: false,
            packages_restored: 0,
            packages_failed,
            duration,
            error_message: Some(error_message.into()),
            warnings: Vec::new(),
            error_analysis: None,
        }
    }

    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings.extend(warnings);
        self
    }

    pub fn with_packages_restored(mut self, packages_restored: usize) -> Self {
        self.packages_restored = packages_restored;
        self
    }
}

/// Restore strategies, in the only order they are ever tried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreStrategy {
    ForceReinstall,
    CleanInstall,
    Fallback,
}

impl RestoreStrategy {
    pub const ORDER: [RestoreStrategy; 3] = [
        RestoreStrategy::ForceReinstall,
        RestoreStrategy::CleanInstall,
        RestoreStrategy::Fallback,
    ];

    pub fn label(&self) -> StrategyLabel {
        match self {
            RestoreStrategy::ForceReinstall => StrategyLabel::ForceReinstall,
            RestoreStrategy::CleanInstall => StrategyLabel::CleanInstall,
            RestoreStrategy::Fallback => StrategyLabel::Fallback,
        }
    }
}

impl std::fmt::Display for RestoreStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.label().fmt(f)
    }
}

/// Runs the restore state machine against a package installer.
pub struct RestoreExecutor {
    installer: Arc<dyn PackageInstaller>,
    config: RestoreConfig,
    analyzer: ErrorAnalyzer,
    logger: RestoreLogger,
}

impl RestoreExecutor {
    pub fn new(installer: Arc<dyn PackageInstaller>, config: RestoreConfig) -> Self {
        Self {
            installer,
            config,
            analyzer: ErrorAnalyzer::new(),
            logger: RestoreLogger::new(),
        }
    }

    pub fn analyzer(&self) -> &ErrorAnalyzer {
        &self.analyzer
    }

    /// Restore the backup; `true` when some strategy succeeded.
    pub async fn restore_environment(&self, backup: &EnvironmentBackup) -> RemedyResult<bool> {
        Ok(self.restore_environment_detailed(backup).await?.success)
    }

    /// Restore the backup and report how it went.
    ///
    /// Returns `Err` only for contract violations such as restoring a backup
    /// that was already cleaned up. Every restore failure is an `Ok` result.
    pub async fn restore_environment_detailed(
        &self,
        backup: &EnvironmentBackup,
    ) -> RemedyResult<RestoreResult> {
        if backup.is_released() {
            return Err(RemedyError::BackupReleased(backup.backup_path().to_path_buf()));
        }

        let operation_id = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();
        let op = self.logger.start_operation(operation_id, backup);

        let requirements = match self.validated_requirements(backup) {
            Ok(reqs) => reqs,
            Err(message) => {
                let mut result = RestoreResult::failed(
                    StrategyLabel::ValidationFailed,
                    format!("Backup validation failed: {}", message),
                    Vec::new(),
                    op.elapsed(),
                );
                let analysis = self.analyzer.analyze_backup_failure(&result);
                self.logger.log_error_analysis(&op, &analysis);
                result.error_analysis = Some(analysis);
                self.logger.log_final_result(&op, &result);
                return Ok(result);
            }
        };

        let run = StrategyRun {
            installer: self.installer.as_ref(),
            logger: &self.logger,
            op: &op,
            requirements: &requirements,
            is_empty_environment: backup.is_empty_environment(),
        };

        let mut attempts: Vec<(RestoreResult, ErrorAnalysis)> = Vec::new();
        for (i, strategy) in RestoreStrategy::ORDER.iter().enumerate() {
            self.logger.log_strategy_attempt(
                &op,
                &strategy.to_string(),
                i + 1,
                RestoreStrategy::ORDER.len(),
            );

            let limit = self.config.strategy_timeout;
            let started = Instant::now();
            let mut result = match tokio::time::timeout(limit, strategy.run(&run)).await {
                Ok(result) => result,
                Err(_) => RestoreResult::failed(
                    strategy.label(),
                    RemedyError::timeout(strategy.to_string(), limit).to_string(),
                    requirements.iter().map(|r| r.label().to_string()).collect(),
                    started.elapsed(),
                ),
            };
            self.logger.log_strategy_result(&op, &result);

            if result.success {
                let warnings = self.verify_restored(&op, backup, &requirements).await;
                result.warnings.extend(warnings);
                self.logger.log_final_result(&op, &result);
                return Ok(result);
            }

            let analysis = self.analyzer.analyze_error(&result);
            self.logger.log_error_analysis(&op, &analysis);
            attempts.push((result, analysis));
        }

        let result = self.aggregate_failure(attempts, op.elapsed());
        self.logger.log_final_result(&op, &result);
        Ok(result)
    }

    fn validated_requirements(&self, backup: &EnvironmentBackup) -> Result<Vec<Requirement>, String> {
        let report = BackupValidator::validate_backup(backup);
        if !report.is_valid {
            return Err(report.errors.join("; "));
        }
        if report.parsed_package_count != Some(backup.package_count()) {
            return Err(format!(
                "package count {} does not match requirements file",
                backup.package_count()
            ));
        }
        backup.requirements().map_err(|e| e.to_string())
    }

    /// Compare the environment with what the backup expects. Mismatches are
    /// returned as warnings; they never turn a success into a failure.
    async fn verify_restored(
        &self,
        op: &RestoreOperation,
        backup: &EnvironmentBackup,
        requirements: &[Requirement],
    ) -> Vec<String> {
        let installed = match self.installer.list_installed().await {
            Ok(lines) => lines,
            Err(e) => {
                let message = format!("Could not verify restored environment: {}", e);
                self.logger.log_validation_result(op, false, &message);
                return vec![message];
            }
        };
        self.logger.log_environment_state(op, "after restore", &installed);

        let actual = installed_versions(&installed);
        let unprotected: Vec<String> = actual
            .keys()
            .filter(|name| !is_protected(name))
            .cloned()
            .collect();

        if backup.is_empty_environment() {
            let limit = self.config.max_empty_residual;
            if unprotected.len() > limit {
                let message = format!(
                    "{} packages remain after restoring an empty environment (limit {}): {}",
                    unprotected.len(),
                    limit,
                    truncated_list(&unprotected, 5)
                );
                self.logger.log_validation_result(op, false, &message);
                return vec![message];
            }
            self.logger.log_validation_result(
                op,
                true,
                &format!("{} residual packages", unprotected.len()),
            );
            return Vec::new();
        }

        let mut mismatched = Vec::new();
        let mut expected_names = std::collections::HashSet::new();
        for req in requirements {
            let Some(name) = req.name() else { continue };
            let key = normalize_name(name);
            let found = actual.get(&key);
            match (req, found) {
                (_, None) => mismatched.push(format!("{} missing", name)),
                (Requirement::Pinned { version, .. }, Some(Some(v))) if v != version => {
                    mismatched.push(format!("{} is {} (expected {})", name, v, version))
                }
                _ => {}
            }
            expected_names.insert(key);
        }

        // Verbatim installs cannot be named, so extras are only checked without them
        if !requirements.iter().any(Requirement::is_verbatim) {
            for name in &unprotected {
                if !expected_names.contains(name) {
                    mismatched.push(format!("{} unexpected", name));
                }
            }
        }

        if mismatched.is_empty() {
            self.logger
                .log_validation_result(op, true, "environment matches backup");
            Vec::new()
        } else {
            let message = format!(
                "Restored environment differs from backup: {}",
                truncated_list(&mismatched, 5)
            );
            self.logger.log_validation_result(op, false, &message);
            vec![message]
        }
    }

    fn aggregate_failure(
        &self,
        attempts: Vec<(RestoreResult, ErrorAnalysis)>,
        duration: Duration,
    ) -> RestoreResult {
        let mut packages_failed: Vec<String> = Vec::new();
        let mut warnings = Vec::new();
        let mut best: Option<&ErrorAnalysis> = None;

        for (result, analysis) in &attempts {
            for pkg in &result.packages_failed {
                if !packages_failed.contains(pkg) {
                    packages_failed.push(pkg.clone());
                }
            }
            warnings.push(format!(
                "{}: {}",
                result.strategy,
                result.error_message.as_deref().unwrap_or("failed")
            ));
            warnings.extend(result.warnings.iter().cloned());
            // Earliest attempt wins ties
            if best.map_or(true, |b| analysis.confidence > b.confidence) {
                best = Some(analysis);
            }
        }

        let error_message = match best {
            Some(analysis) => format!(
                "All restore strategies failed. Primary issue: {} ({})",
                analysis.description, analysis.category
            ),
            None => "All restore strategies failed".to_string(),
        };
        if let Some(analysis) = best {
            warnings.extend(
                self.analyzer
                    .get_recovery_suggestions(analysis)
                    .into_iter()
                    .take(AGGREGATE_SUGGESTIONS),
            );
        }

        let mut result = RestoreResult::failed(
            StrategyLabel::AllStrategiesFailed,
            error_message,
            packages_failed,
            duration,
        )
        .with_warnings(warnings);
        result.error_analysis = best.cloned();
        result
    }
}
