//! Structured logging for one restore operation.
//!
//! `start_operation` hands back a [`RestoreOperation`]; every other call
//! takes it, so each message carries the operation's `[id]` prefix and the
//! operation keeps its own tally of what happened.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use super::backup::EnvironmentBackup;
use super::RestoreResult;
use crate::analysis::ErrorAnalysis;
use crate::utils::{duration_secs, truncated_list};

const PACKAGE_LIST_LIMIT: usize = 5;

/// Backup facts captured when the operation starts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationContext {
    pub backup_path: PathBuf,
    pub package_count: usize,
    pub is_empty_environment: bool,
    pub freeze_failed: bool,
}

/// Handle for one restore operation
#[derive(Debug)]
pub struct RestoreOperation {
    id: String,
    started: Instant,
    context: OperationContext,
    strategies_attempted: AtomicUsize,
    package_operations: AtomicUsize,
    failed_package_operations: AtomicUsize,
    warnings: AtomicUsize,
}

impl RestoreOperation {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn context(&self) -> &OperationContext {
        &self.context
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Snapshot of an operation for programmatic inspection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationSummary {
    pub operation_id: String,
    #[serde(with = "duration_secs")]
    pub duration: Duration,
    pub context: OperationContext,
    pub strategies_attempted: usize,
    pub package_operations: usize,
    pub failed_package_operations: usize,
    pub warnings: usize,
}

#[derive(Debug, Clone, Default)]
pub struct RestoreLogger;

impl RestoreLogger {
    pub fn new() -> Self {
        Self
    }

    /// Start a new operation. Any previous handle is simply superseded.
    pub fn start_operation(
        &self,
        operation_id: impl Into<String>,
        backup: &EnvironmentBackup,
    ) -> RestoreOperation {
        let op = RestoreOperation {
            id: operation_id.into(),
            started: Instant::now(),
            context: OperationContext {
                backup_path: backup.backup_path().to_path_buf(),
                package_count: backup.package_count(),
                is_empty_environment: backup.is_empty_environment(),
                freeze_failed: backup.metadata().freeze_failed(),
            },
            strategies_attempted: AtomicUsize::new(0),
            package_operations: AtomicUsize::new(0),
            failed_package_operations: AtomicUsize::new(0),
            warnings: AtomicUsize::new(0),
        };

        log::info!(
            "[{}] Starting environment restore from {} ({} packages{})",
            op.id,
            op.context.backup_path.display(),
            op.context.package_count,
            if op.context.is_empty_environment {
                ", empty environment"
            } else {
                ""
            }
        );
        op
    }

    pub fn log_strategy_attempt(
        &self,
        op: &RestoreOperation,
        strategy: &str,
        attempt: usize,
        total: usize,
    ) {
        RestoreOperation::bump(&op.strategies_attempted);
        log::info!(
            "[{}] Attempting strategy {} ({}/{})",
            op.id,
            strategy,
            attempt,
            total
        );
    }

    pub fn log_strategy_result(&self, op: &RestoreOperation, result: &RestoreResult) {
        if result.success {
            log::info!(
                "[{}] Strategy {} succeeded: {} packages restored in {:.2}s",
                op.id,
                result.strategy,
                result.packages_restored,
                result.duration.as_secs_f64()
            );
        } else {
            log::warn!(
                "[{}] Strategy {} failed after {:.2}s: {}",
                op.id,
                result.strategy,
                result.duration.as_secs_f64(),
                result.error_message.as_deref().unwrap_or("no error message")
            );
            if !result.packages_failed.is_empty() {
                log::warn!(
                    "[{}] Failed packages: {}",
                    op.id,
                    truncated_list(&result.packages_failed, PACKAGE_LIST_LIMIT)
                );
            }
        }
        for warning in &result.warnings {
            RestoreOperation::bump(&op.warnings);
            log::warn!("[{}] {}", op.id, warning);
        }
    }

    pub fn log_validation_result(&self, op: &RestoreOperation, passed: bool, details: &str) {
        if passed {
            log::info!("[{}] Post-restore validation passed: {}", op.id, details);
        } else {
            RestoreOperation::bump(&op.warnings);
            log::warn!("[{}] Post-restore validation failed: {}", op.id, details);
        }
    }

    pub fn log_final_result(&self, op: &RestoreOperation, result: &RestoreResult) {
        let elapsed = op.elapsed().as_secs_f64();
        if result.success {
            log::info!(
                "[{}] Restore completed with {} in {:.2}s",
                op.id,
                result.strategy,
                elapsed
            );
        } else {
            log::error!(
                "[{}] Restore failed ({}) after {:.2}s: {}",
                op.id,
                result.strategy,
                elapsed,
                result.error_message.as_deref().unwrap_or("unknown error")
            );
        }
    }

    pub fn log_package_operation(
        &self,
        op: &RestoreOperation,
        operation: &str,
        package: &str,
        error: Option<&str>,
    ) {
        RestoreOperation::bump(&op.package_operations);
        match error {
            None => log::debug!("[{}] {} {}: ok", op.id, operation, package),
            Some(e) => {
                RestoreOperation::bump(&op.failed_package_operations);
                log::warn!("[{}] {} {} failed: {}", op.id, operation, package, e);
            }
        }
    }

    pub fn log_environment_state(&self, op: &RestoreOperation, label: &str, packages: &[String]) {
        log::debug!(
            "[{}] Environment {}: {} packages [{}]",
            op.id,
            label,
            packages.len(),
            truncated_list(packages, PACKAGE_LIST_LIMIT)
        );
    }

    pub fn log_error_analysis(&self, op: &RestoreOperation, analysis: &ErrorAnalysis) {
        log::info!(
            "[{}] Error analysis: {} (confidence {:.2}, {}): {}",
            op.id,
            analysis.category,
            analysis.confidence,
            if analysis.is_recoverable {
                "recoverable"
            } else {
                "not recoverable"
            },
            analysis.description
        );
        if let Some(first) = analysis.suggested_actions.first() {
            log::info!("[{}] Suggested: {}", op.id, first);
        }
    }

    pub fn get_operation_summary(&self, op: &RestoreOperation) -> OperationSummary {
        OperationSummary {
            operation_id: op.id.clone(),
            duration: op.elapsed(),
            context: op.context.clone(),
            strategies_attempted: op.strategies_attempted.load(Ordering::Relaxed),
            package_operations: op.package_operations.load(Ordering::Relaxed),
            failed_package_operations: op.failed_package_operations.load(Ordering::Relaxed),
            warnings: op.warnings.load(Ordering::Relaxed),
        }
    }
}
