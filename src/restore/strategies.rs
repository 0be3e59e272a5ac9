//! The three restore strategies.
//!
//! Strategies never return `Err`: every outcome, including installer
//! failures, is reported as a [`RestoreResult`].

use std::time::Instant;

use super::logger::{RestoreLogger, RestoreOperation};
use super::requirements::{installed_versions, is_protected, Requirement};
use super::{RestoreResult, RestoreStrategy};
use crate::installer::PackageInstaller;
use crate::utils::truncated_list;

/// Everything a strategy needs for one attempt
pub(crate) struct StrategyRun<'a> {
    pub installer: &'a dyn PackageInstaller,
    pub logger: &'a RestoreLogger,
    pub op: &'a RestoreOperation,
    pub requirements: &'a [Requirement],
    pub is_empty_environment: bool,
}

impl RestoreStrategy {
    pub(crate) async fn run(self, ctx: &StrategyRun<'_>) -> RestoreResult {
        if ctx.is_empty_environment {
            return clear_environment(self, ctx).await;
        }
        match self {
            RestoreStrategy::ForceReinstall => force_reinstall(ctx).await,
            RestoreStrategy::CleanInstall => clean_install(ctx).await,
            RestoreStrategy::Fallback => fallback(ctx).await,
        }
    }
}

/// Uninstall every unprotected package. Individual failures are warnings.
async fn uninstall_unprotected(ctx: &StrategyRun<'_>, installed: &[String]) -> Vec<String> {
    let mut warnings = Vec::new();
    for name in installed_versions(installed).keys() {
        if is_protected(name) {
            continue;
        }
        match ctx.installer.uninstall(name).await {
            Ok(()) => ctx.logger.log_package_operation(ctx.op, "uninstall", name, None),
            Err(e) => {
                let message = e.to_string();
                ctx.logger
                    .log_package_operation(ctx.op, "uninstall", name, Some(&message));
                warnings.push(format!("Could not uninstall {}: {}", name, message));
            }
        }
    }
    warnings
}

/// Restore an empty-environment backup by removing what is installed.
/// Always succeeds; anything left behind is reported as a warning.
async fn clear_environment(strategy: RestoreStrategy, ctx: &StrategyRun<'_>) -> RestoreResult {
    let started = Instant::now();
    let installed = match ctx.installer.list_installed().await {
        Ok(lines) => lines,
        Err(e) => {
            let message = format!("Could not list installed packages: {}", e);
            log::warn!("[{}] {}", ctx.op.id(), message);
            return RestoreResult::succeeded(strategy.label(), 0, started.elapsed())
                .with_warnings(vec![message]);
        }
    };
    ctx.logger
        .log_environment_state(ctx.op, "before clearing", &installed);

    let warnings = uninstall_unprotected(ctx, &installed).await;
    RestoreResult::succeeded(strategy.label(), 0, started.elapsed()).with_warnings(warnings)
}

/// Reinstall every package at its captured version, stopping at the first
/// failure. The failing package and everything not yet attempted are
/// reported as failed.
async fn force_reinstall(ctx: &StrategyRun<'_>) -> RestoreResult {
    let label = RestoreStrategy::ForceReinstall.label();
    let started = Instant::now();
    let mut restored = 0;

    for (i, req) in ctx.requirements.iter().enumerate() {
        let (name, version) = req.install_args();
        match ctx.installer.reinstall(name, version).await {
            Ok(()) => {
                restored += 1;
                ctx.logger
                    .log_package_operation(ctx.op, "reinstall", req.label(), None);
            }
            Err(e) => {
                let message = e.to_string();
                ctx.logger
                    .log_package_operation(ctx.op, "reinstall", req.label(), Some(&message));
                let failed = ctx.requirements[i..]
                    .iter()
                    .map(|r| r.label().to_string())
                    .collect();
                return RestoreResult::failed(label, message, failed, started.elapsed())
                    .with_packages_restored(restored);
            }
        }
    }

    RestoreResult::succeeded(label, restored, started.elapsed())
}

/// Remove everything except build tooling, then install the backup list.
async fn clean_install(ctx: &StrategyRun<'_>) -> RestoreResult {
    let label = RestoreStrategy::CleanInstall.label();
    let started = Instant::now();

    let installed = match ctx.installer.list_installed().await {
        Ok(lines) => lines,
        Err(e) => {
            return RestoreResult::failed(
                label,
                format!("Could not list installed packages: {}", e),
                Vec::new(),
                started.elapsed(),
            )
        }
    };
    ctx.logger
        .log_environment_state(ctx.op, "before clean install", &installed);
    let warnings = uninstall_unprotected(ctx, &installed).await;

    let mut restored = 0;
    let mut failed = Vec::new();
    let mut first_error = None;
    for req in ctx.requirements {
        let (name, version) = req.install_args();
        match ctx.installer.install(name, version).await {
            Ok(()) => {
                restored += 1;
                ctx.logger
                    .log_package_operation(ctx.op, "install", req.label(), None);
            }
            Err(e) => {
                let message = e.to_string();
                ctx.logger
                    .log_package_operation(ctx.op, "install", req.label(), Some(&message));
                failed.push(req.label().to_string());
                first_error.get_or_insert(message);
            }
        }
    }

    match first_error {
        None => RestoreResult::succeeded(label, restored, started.elapsed()).with_warnings(warnings),
        Some(message) => RestoreResult::failed(label, message, failed, started.elapsed())
            .with_packages_restored(restored)
            .with_warnings(warnings),
    }
}

/// Best effort: install what can be installed, retrying a pinned package
/// without its pin before giving up on it. Succeeds if anything was restored.
async fn fallback(ctx: &StrategyRun<'_>) -> RestoreResult {
    let label = RestoreStrategy::Fallback.label();
    let started = Instant::now();
    let mut restored = 0;
    let mut failed = Vec::new();
    let mut warnings = Vec::new();
    let mut first_error = None;

    for req in ctx.requirements {
        let (name, version) = req.install_args();
        let outcome = match ctx.installer.install(name, version).await {
            Ok(()) => Ok(()),
            Err(pinned_err) => match req {
                Requirement::Pinned { name, version } => {
                    match ctx.installer.install(name, None).await {
                        Ok(()) => {
                            warnings.push(format!(
                                "Installed {} without its version pin ({} unavailable)",
                                name, version
                            ));
                            Ok(())
                        }
                        Err(_) => Err(pinned_err),
                    }
                }
                _ => Err(pinned_err),
            },
        };

        match outcome {
            Ok(()) => {
                restored += 1;
                ctx.logger
                    .log_package_operation(ctx.op, "install", req.label(), None);
            }
            Err(e) => {
                let message = e.to_string();
                ctx.logger
                    .log_package_operation(ctx.op, "install", req.label(), Some(&message));
                failed.push(req.label().to_string());
                first_error.get_or_insert(message);
            }
        }
    }

    if ctx.requirements.is_empty() {
        return RestoreResult::succeeded(label, 0, started.elapsed());
    }

    match first_error {
        None => RestoreResult::succeeded(label, restored, started.elapsed()).with_warnings(warnings),
        Some(message) if restored == 0 => {
            RestoreResult::failed(label, message, failed, started.elapsed()).with_warnings(warnings)
        }
        Some(_) => {
            warnings.push(format!(
                "Partial success: {} of {} packages restored; failed: {}",
                restored,
                ctx.requirements.len(),
                truncated_list(&failed, 5)
            ));
            let mut result = RestoreResult::succeeded(label, restored, started.elapsed())
                .with_warnings(warnings);
            result.packages_failed = failed;
            result
        }
    }
}
