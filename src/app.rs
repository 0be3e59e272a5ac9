//! Command dispatch for the `remedy` binary.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::analysis::ErrorAnalyzer;
use crate::assessor::{
    configure_thread_pool, PriorityLevel, PrioritySummary, RiskAssessment, RiskAssessor,
};
use crate::cli::{Args, Command};
use crate::config::RemedyConfig;
use crate::errors::{RemedyError, RemedyResult};
use crate::installer::{PackageInstaller, PipInstaller};
use crate::models::{SecurityReport, Vulnerability};
use crate::restore::{
    create_environment_backup, BackupValidator, EnvironmentBackup, RestoreExecutor, RestoreResult,
    StrategyLabel,
};
use crate::upgrade::{CommandCheck, UpgradeResult, UpgradeValidator};

/// Vulnerability input: a bare array or a full scan report
#[derive(Deserialize)]
#[serde(untagged)]
enum ScanInput {
    Report(SecurityReport),
    Vulnerabilities(Vec<Vulnerability>),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ReportsInput {
    One(SecurityReport),
    Many(Vec<SecurityReport>),
}

/// What a command produced, ready for display and JSON output
pub struct Outcome {
    pub command: &'static str,
    pub success: bool,
    pub headline: String,
    pub details: Vec<(String, String)>,
    pub json: serde_json::Value,
}

impl Outcome {
    fn new(command: &'static str, success: bool, headline: impl Into<String>) -> Self {
        Self {
            command,
            success,
            headline: headline.into(),
            details: Vec::new(),
            json: serde_json::Value::Null,
        }
    }

    fn detail(mut self, label: &str, value: impl ToString) -> Self {
        self.details.push((label.to_string(), value.to_string()));
        self
    }

    fn with_json<T: Serialize>(mut self, value: &T) -> RemedyResult<Self> {
        self.json = serde_json::to_value(value)?;
        Ok(self)
    }
}

#[derive(Serialize)]
struct BackupOutput<'a> {
    backup_path: &'a Path,
    package_count: usize,
    is_empty_environment: bool,
    metadata: &'a crate::restore::BackupMetadata,
    validation: crate::restore::ValidationResult,
}

#[derive(Serialize)]
struct PrioritizedEntry<'a> {
    vulnerability: &'a Vulnerability,
    assessment: &'a RiskAssessment,
}

#[derive(Serialize)]
struct PrioritizeOutput<'a> {
    summary: &'a PrioritySummary,
    prioritized: BTreeMap<PriorityLevel, Vec<PrioritizedEntry<'a>>>,
}

#[derive(Serialize)]
struct AnalyzeOutput {
    analysis: crate::analysis::ErrorAnalysis,
    recovery_suggestions: Vec<String>,
}

pub struct RemedyApp {
    args: Args,
    config: RemedyConfig,
}

impl RemedyApp {
    pub fn new(args: Args) -> RemedyResult<Self> {
        let mut config = RemedyConfig::load(args.config.as_deref())?;
        if let Some(threads) = args.threads {
            config.assessor.threads = threads;
        }
        if let Some(python) = &args.python {
            config.upgrade.python = python.clone();
        }
        if let Some(secs) = args.strategy_timeout {
            config.restore.strategy_timeout = Duration::from_secs(secs);
        }
        Ok(Self { args, config })
    }

    fn installer(&self) -> Arc<dyn PackageInstaller> {
        Arc::new(PipInstaller::new(
            self.config.upgrade.python.clone(),
            self.config.restore.command_timeout,
        ))
    }

    fn assessor(&self) -> RemedyResult<RiskAssessor> {
        configure_thread_pool(self.config.assessor.threads);
        RiskAssessor::with_config(&self.config.assessor)
    }

    fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> RemedyResult<T> {
        let content =
            std::fs::read_to_string(path).map_err(|e| RemedyError::io(e, path.to_path_buf()))?;
        Ok(serde_json::from_str(&content)?)
    }

    fn load_vulnerabilities(path: &Path) -> RemedyResult<Vec<Vulnerability>> {
        let vulns = match Self::read_json::<ScanInput>(path)? {
            ScanInput::Report(report) => report.vulnerabilities,
            ScanInput::Vulnerabilities(vulns) => vulns,
        };
        log::info!("Loaded {} vulnerabilities from {}", vulns.len(), path.display());
        Ok(vulns)
    }

    pub async fn run(&self) -> RemedyResult<Outcome> {
        log::debug!("Running {} command", self.args.command.name());
        match &self.args.command {
            Command::Assess { input } => self.assess(input),
            Command::Prioritize { input } => self.prioritize(input),
            Command::Trends { reports } => self.trends(reports),
            Command::Profile { package } => self.profile(package),
            Command::AnalyzeError { message, packages } => self.analyze_error(message, packages),
            Command::Backup => self.backup().await,
            Command::Restore { backup, keep } => self.restore(backup, *keep).await,
            Command::Upgrade {
                package,
                version,
                test_command,
            } => {
                let validator = self.upgrade_validator(test_command.as_deref())?;
                let result = validator.validate_upgrade(package, version).await?;
                Self::upgrade_outcome("upgrade", &result)
            }
            Command::Fix {
                input,
                id,
                test_command,
            } => {
                let vulns = Self::load_vulnerabilities(input)?;
                let vuln = vulns.iter().find(|v| v.id() == id.as_str()).ok_or_else(|| {
                    RemedyError::external("fix", format!("vulnerability {} not found in input", id))
                })?;
                let validator = self.upgrade_validator(test_command.as_deref())?;
                let result = validator.validate_vulnerability_fix(vuln).await?;
                Self::upgrade_outcome("fix", &result)
            }
        }
    }

    fn assess(&self, input: &Path) -> RemedyResult<Outcome> {
        let vulns = Self::load_vulnerabilities(input)?;
        let assessments = self.assessor()?.assess_report(&vulns);
        let immediate = assessments
            .iter()
            .filter(|a| a.requires_immediate_action())
            .count();
        let top = assessments
            .first()
            .map(|a| format!("{} ({:.2})", a.vulnerability_id, a.risk_score))
            .unwrap_or_else(|| "-".to_string());

        Outcome::new("assess", true, format!("Assessed {} vulnerabilities", assessments.len()))
            .detail("Immediate action", immediate)
            .detail("Highest risk", top)
            .with_json(&assessments)
    }

    fn prioritize(&self, input: &Path) -> RemedyResult<Outcome> {
        let vulns = Self::load_vulnerabilities(input)?;
        let assessor = self.assessor()?;
        let prioritized = assessor.get_prioritized_vulnerabilities(&vulns);
        let summary = assessor.generate_priority_summary(&prioritized);

        let mut outcome = Outcome::new(
            "prioritize",
            true,
            format!("Prioritized {} vulnerabilities", summary.total_vulnerabilities),
        );
        for (level, count) in &summary.priority_counts {
            outcome = outcome.detail(level.as_str(), count);
        }
        if let Some(first) = summary.recommendations.first() {
            outcome = outcome.detail("Recommendation", first);
        }

        let groups = prioritized
            .iter()
            .map(|(level, entries)| {
                let items = entries
                    .iter()
                    .map(|(vulnerability, assessment)| PrioritizedEntry {
                        vulnerability,
                        assessment,
                    })
                    .collect();
                (*level, items)
            })
            .collect();
        outcome.with_json(&PrioritizeOutput {
            summary: &summary,
            prioritized: groups,
        })
    }

    fn trends(&self, paths: &[std::path::PathBuf]) -> RemedyResult<Outcome> {
        let mut reports = Vec::new();
        for path in paths {
            match Self::read_json::<ReportsInput>(path)? {
                ReportsInput::One(report) => reports.push(report),
                ReportsInput::Many(many) => reports.extend(many),
            }
        }

        match self.assessor()?.analyze_vulnerability_trends(&reports) {
            Ok(analysis) => Outcome::new(
                "trends",
                true,
                format!("Analyzed {} reports", analysis.report_count),
            )
            .detail(
                "Vulnerabilities",
                format!(
                    "{} total, {:.1} per scan ({:?})",
                    analysis.vulnerability_trends.total_vulnerabilities,
                    analysis.vulnerability_trends.average_per_scan,
                    analysis.vulnerability_trends.trend_direction
                ),
            )
            .with_json(&analysis),
            Err(e) => Outcome::new("trends", false, e.to_string()).with_json(&e),
        }
    }

    fn profile(&self, package: &str) -> RemedyResult<Outcome> {
        let assessor = self.assessor()?;
        let known = assessor.is_known_package(package);
        let profile = assessor.get_package_risk_profile(package);
        Outcome::new("profile", true, format!("Risk profile for {}", profile.package_name))
            .detail("Known package", known)
            .detail(
                "Exposure score",
                format!("{:.2}", profile.calculated_exposure_score),
            )
            .with_json(&profile)
    }

    fn analyze_error(&self, message: &str, packages: &[String]) -> RemedyResult<Outcome> {
        let analyzer = ErrorAnalyzer::new();
        let result = RestoreResult::failed(
            StrategyLabel::AllStrategiesFailed,
            message,
            packages.to_vec(),
            Duration::ZERO,
        );
        let analysis = analyzer.analyze_error(&result);
        let recovery_suggestions = analyzer.get_recovery_suggestions(&analysis);

        Outcome::new("analyze-error", true, analysis.description.clone())
            .detail("Category", analysis.category)
            .detail("Confidence", format!("{:.2}", analysis.confidence))
            .detail("Recoverable", analysis.is_recoverable)
            .with_json(&AnalyzeOutput {
                analysis,
                recovery_suggestions,
            })
    }

    async fn backup(&self) -> RemedyResult<Outcome> {
        let installer = self.installer();
        let mut backup = create_environment_backup(installer.as_ref(), &self.config.restore).await?;
        let path = backup.persist()?;
        let validation = BackupValidator::validate_backup(&backup);

        Outcome::new(
            "backup",
            validation.is_valid,
            format!("Backup written to {}", path.display()),
        )
        .detail("Packages", backup.package_count())
        .detail("Empty environment", backup.is_empty_environment())
        .with_json(&BackupOutput {
            backup_path: &path,
            package_count: backup.package_count(),
            is_empty_environment: backup.is_empty_environment(),
            metadata: backup.metadata(),
            validation,
        })
    }

    async fn restore(&self, path: &Path, keep: bool) -> RemedyResult<Outcome> {
        let mut backup = EnvironmentBackup::open(path)?;
        let executor = RestoreExecutor::new(self.installer(), self.config.restore.clone());
        let result = executor.restore_environment_detailed(&backup).await?;

        // A failed restore keeps its backup for another attempt
        if result.success && !keep {
            backup.cleanup()?;
        }

        let mut outcome = Outcome::new(
            "restore",
            result.success,
            format!("Restore finished with {}", result.strategy),
        )
        .detail("Packages restored", result.packages_restored)
        .detail("Duration", format!("{:.2}s", result.duration.as_secs_f64()));
        if let Some(message) = &result.error_message {
            outcome = outcome.detail("Error", message);
        }
        outcome.with_json(&result)
    }

    fn upgrade_validator(&self, test_command: Option<&str>) -> RemedyResult<UpgradeValidator> {
        let validator = UpgradeValidator::from_config(self.installer(), &self.config)?;
        Ok(match test_command {
            Some(command) => validator.with_check(Box::new(CommandCheck::new(
                command,
                self.config.upgrade.test_timeout,
            ))),
            None => validator,
        })
    }

    fn upgrade_outcome(command: &'static str, result: &UpgradeResult) -> RemedyResult<Outcome> {
        let mut outcome = Outcome::new(
            command,
            result.success,
            format!(
                "{} {} -> {}",
                result.package_name,
                result.from_version.as_deref().unwrap_or("?"),
                result.to_version
            ),
        )
        .detail("Rolled back", result.rollback_performed);
        if let Some(message) = &result.error_message {
            outcome = outcome.detail("Error", message);
        }
        outcome.with_json(result)
    }
}
