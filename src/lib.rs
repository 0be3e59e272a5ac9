//! Remedy
//!
//! Vulnerability risk prioritization and safe dependency remediation for
//! Python environments: score scanner findings, then upgrade packages behind
//! an environment backup that is restored when the upgrade goes wrong.

pub mod analysis;
pub mod app;
pub mod assessor;
pub mod cli;
pub mod config;
pub mod errors;
pub mod installer;
pub mod models;
pub mod restore;
pub mod ui;
pub mod upgrade;
pub mod utils;

pub use analysis::{ErrorAnalysis, ErrorAnalyzer, ErrorCategory};
pub use assessor::{PriorityLevel, RiskAssessment, RiskAssessor};
pub use errors::{RemedyError, RemedyResult};
pub use models::{SecurityReport, Severity, Vulnerability};
pub use restore::{EnvironmentBackup, RestoreExecutor, RestoreResult, StrategyLabel};
pub use upgrade::{UpgradeResult, UpgradeValidator};
