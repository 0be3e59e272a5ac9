//! Restore Failure Analysis Module
//!
//! Classifies the error text of a failed restore attempt into a category
//! with a fixed confidence, a human description and ordered recovery
//! guidance. Classification is a pure function of the `RestoreResult`.

mod patterns;

pub use patterns::{get_pattern_definitions, ErrorPattern};

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use crate::errors::{RemedyError, RemedyResult};
use crate::restore::{RestoreResult, StrategyLabel};
use crate::utils::{duration_secs, truncated_list};

/// Affected packages listed by name before the rest are summarised
const AFFECTED_LIST_LIMIT: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    NetworkError,
    PermissionError,
    PackageNotFound,
    DependencyConflict,
    DiskSpaceError,
    PythonVersionIncompatible,
    CorruptedPackage,
    BackupInvalid,
    SystemError,
    UnknownError,
}

impl ErrorCategory {
    /// Python version incompatibility needs a different interpreter;
    /// everything else can be retried once the cause is addressed.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, ErrorCategory::PythonVersionIncompatible)
    }

    pub fn description(&self) -> &'static str {
        patterns::description(*self)
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorCategory::NetworkError => "network_error",
            ErrorCategory::PermissionError => "permission_error",
            ErrorCategory::PackageNotFound => "package_not_found",
            ErrorCategory::DependencyConflict => "dependency_conflict",
            ErrorCategory::DiskSpaceError => "disk_space_error",
            ErrorCategory::PythonVersionIncompatible => "python_version_incompatible",
            ErrorCategory::CorruptedPackage => "corrupted_package",
            ErrorCategory::BackupInvalid => "backup_invalid",
            ErrorCategory::SystemError => "system_error",
            ErrorCategory::UnknownError => "unknown_error",
        };
        f.write_str(name)
    }
}

/// Raw facts about the analysed attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TechnicalDetails {
    pub strategy: StrategyLabel,
    #[serde(with = "duration_secs")]
    pub duration: Duration,
    pub packages_failed_count: usize,
    pub error_message: String,
}

impl TechnicalDetails {
    fn of(result: &RestoreResult) -> Self {
        Self {
            strategy: result.strategy,
            duration: result.duration,
            packages_failed_count: result.packages_failed.len(),
            error_message: result.error_message.clone().unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorAnalysis {
    pub category: ErrorCategory,
    /// 0.0 to 1.0
    pub confidence: f64,
    pub description: String,
    pub suggested_actions: Vec<String>,
    pub affected_packages: Vec<String>,
    pub technical_details: TechnicalDetails,
    pub is_recoverable: bool,
}

/// Table-driven classifier for restore failures
pub struct ErrorAnalyzer {
    table: Vec<(ErrorPattern, Vec<Regex>)>,
}

impl Default for ErrorAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorAnalyzer {
    /// Create an analyzer with the default table. Patterns that fail to
    /// compile are logged and skipped.
    pub fn new() -> Self {
        let mut table = Vec::new();
        for def in get_pattern_definitions() {
            let mut compiled = Vec::with_capacity(def.patterns.len());
            for pattern in &def.patterns {
                match Self::compile(pattern) {
                    Ok(re) => compiled.push(re),
                    Err(e) => log::warn!("Failed to compile {} pattern: {}", def.category, e),
                }
            }
            table.push((def, compiled));
        }
        Self { table }
    }

    /// Create an analyzer from a custom table, failing on the first bad pattern.
    pub fn from_table(definitions: Vec<ErrorPattern>) -> RemedyResult<Self> {
        let table = definitions
            .into_iter()
            .map(|def| {
                let compiled = def
                    .patterns
                    .iter()
                    .map(|p| Self::compile(p))
                    .collect::<RemedyResult<Vec<_>>>()?;
                Ok((def, compiled))
            })
            .collect::<RemedyResult<Vec<_>>>()?;
        Ok(Self { table })
    }

    fn compile(pattern: &str) -> RemedyResult<Regex> {
        Regex::new(&format!("(?i){}", pattern)).map_err(|e| RemedyError::regex(e, pattern))
    }

    /// Classify error text. Empty or unmatched text is `UnknownError` at 0.1.
    pub fn classify(&self, error_message: &str) -> (ErrorCategory, f64) {
        if error_message.trim().is_empty() {
            return (ErrorCategory::UnknownError, 0.1);
        }

        self.table
            .iter()
            .find(|(_, regexes)| regexes.iter().any(|re| re.is_match(error_message)))
            .map(|(def, _)| (def.category, def.confidence))
            .unwrap_or((ErrorCategory::UnknownError, 0.1))
    }

    /// Analyse one restore attempt
    pub fn analyze_error(&self, result: &RestoreResult) -> ErrorAnalysis {
        let technical_details = TechnicalDetails::of(result);

        if result.success {
            return ErrorAnalysis {
                category: ErrorCategory::UnknownError,
                confidence: 0.0,
                description: "No error to analyze".to_string(),
                suggested_actions: Vec::new(),
                affected_packages: Vec::new(),
                technical_details,
                is_recoverable: true,
            };
        }

        let (category, confidence) = self.classify(&technical_details.error_message);
        self.build(result, technical_details, category, confidence)
    }

    /// Analyse a result that failed because its backup was rejected. The
    /// category is fixed whatever the error text mentions.
    pub fn analyze_backup_failure(&self, result: &RestoreResult) -> ErrorAnalysis {
        let confidence = self
            .table
            .iter()
            .find(|(def, _)| def.category == ErrorCategory::BackupInvalid)
            .map_or(0.9, |(def, _)| def.confidence);
        let technical_details = TechnicalDetails::of(result);
        self.build(result, technical_details, ErrorCategory::BackupInvalid, confidence)
    }

    fn build(
        &self,
        result: &RestoreResult,
        technical_details: TechnicalDetails,
        category: ErrorCategory,
        confidence: f64,
    ) -> ErrorAnalysis {
        let mut suggested_actions: Vec<String> = patterns::suggested_actions(category)
            .iter()
            .map(|s| s.to_string())
            .collect();
        if !result.packages_failed.is_empty() {
            suggested_actions.push(format!(
                "Affected packages: {}",
                truncated_list(&result.packages_failed, AFFECTED_LIST_LIMIT)
            ));
        }

        log::debug!(
            "Classified {} failure as {} ({:.2})",
            result.strategy,
            category,
            confidence
        );

        ErrorAnalysis {
            category,
            confidence,
            description: category.description().to_string(),
            suggested_actions,
            affected_packages: result.packages_failed.clone(),
            technical_details,
            is_recoverable: category.is_recoverable(),
        }
    }

    /// Analyse every failed result, grouped by category. Successes are skipped.
    pub fn analyze_multiple_failures(
        &self,
        results: &[RestoreResult],
    ) -> BTreeMap<ErrorCategory, Vec<ErrorAnalysis>> {
        let mut grouped: BTreeMap<ErrorCategory, Vec<ErrorAnalysis>> = BTreeMap::new();
        for result in results.iter().filter(|r| !r.success) {
            let analysis = self.analyze_error(result);
            grouped.entry(analysis.category).or_default().push(analysis);
        }
        grouped
    }

    /// The analysis's own actions followed by extended guidance, de-duplicated.
    pub fn get_recovery_suggestions(&self, analysis: &ErrorAnalysis) -> Vec<String> {
        let mut seen = HashSet::new();
        analysis
            .suggested_actions
            .iter()
            .map(String::as_str)
            .chain(patterns::extended_suggestions(analysis.category).iter().copied())
            .filter(|s| seen.insert(*s))
            .map(str::to_string)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed(message: &str, packages: &[&str]) -> RestoreResult {
        RestoreResult::failed(
            StrategyLabel::ForceReinstall,
            message,
            packages.iter().map(|s| s.to_string()).collect(),
            Duration::from_millis(1200),
        )
    }

    #[test]
    fn test_network_timeout() {
        let analyzer = ErrorAnalyzer::new();
        let analysis = analyzer.analyze_error(&failed(
            "Connection timed out while downloading package",
            &["requests", "urllib3"],
        ));

        assert_eq!(analysis.category, ErrorCategory::NetworkError);
        assert_eq!(analysis.confidence, 0.9);
        assert_eq!(analysis.affected_packages, vec!["requests", "urllib3"]);
        assert!(analysis.is_recoverable);
        assert_eq!(analysis.technical_details.packages_failed_count, 2);
        assert!(analysis
            .suggested_actions
            .last()
            .unwrap()
            .ends_with("requests, urllib3"));
    }

    #[test]
    fn test_permission_denied() {
        let analyzer = ErrorAnalyzer::new();
        let analysis = analyzer.analyze_error(&failed(
            "Permission denied: cannot write to /usr/local/lib/python3.11/site-packages",
            &[],
        ));
        assert_eq!(analysis.category, ErrorCategory::PermissionError);
        assert_eq!(analysis.confidence, 0.95);
    }

    #[test]
    fn test_empty_message_is_unknown() {
        let analyzer = ErrorAnalyzer::new();
        let analysis = analyzer.analyze_error(&failed("", &[]));
        assert_eq!(analysis.category, ErrorCategory::UnknownError);
        assert_eq!(analysis.confidence, 0.1);
        assert!(analysis.is_recoverable);
    }

    #[test]
    fn test_success_has_nothing_to_analyze() {
        let analyzer = ErrorAnalyzer::new();
        let ok = RestoreResult::succeeded(StrategyLabel::CleanInstall, 3, Duration::ZERO);
        let analysis = analyzer.analyze_error(&ok);
        assert_eq!(analysis.category, ErrorCategory::UnknownError);
        assert_eq!(analysis.confidence, 0.0);
        assert!(analysis.suggested_actions.is_empty());
    }

    #[test]
    fn test_table_ordering() {
        let analyzer = ErrorAnalyzer::new();
        let cases = [
            (
                "No space left on device: cannot write to /tmp",
                ErrorCategory::DiskSpaceError,
            ),
            (
                "ERROR: Package 'numpy' requires Python >=3.12 but you have 3.8 installed",
                ErrorCategory::PythonVersionIncompatible,
            ),
            ("OSError: Connection refused", ErrorCategory::NetworkError),
            (
                "ERROR: No matching distribution found for nosuchpkg==9.9",
                ErrorCategory::PackageNotFound,
            ),
            (
                "ERROR: Cannot satisfy requirement: flask 3.0 requires werkzeug>=3.0",
                ErrorCategory::DependencyConflict,
            ),
            (
                "THESE PACKAGES DO NOT MATCH THE HASHES FROM THE REQUIREMENTS FILE",
                ErrorCategory::CorruptedPackage,
            ),
            (
                "Backup validation failed: requirements checksum mismatch",
                ErrorCategory::BackupInvalid,
            ),
            ("OSError: [Errno 5] Input/output error", ErrorCategory::SystemError),
            ("force reinstall timed out after 300s", ErrorCategory::SystemError),
            ("something odd happened", ErrorCategory::UnknownError),
        ];
        for (message, expected) in cases {
            assert_eq!(analyzer.classify(message).0, expected, "{}", message);
        }
    }

    #[test]
    fn test_python_version_is_not_recoverable() {
        let analyzer = ErrorAnalyzer::new();
        let analysis = analyzer.analyze_error(&failed("Unsupported Python version 3.6", &["x"]));
        assert_eq!(analysis.category, ErrorCategory::PythonVersionIncompatible);
        assert!(!analysis.is_recoverable);
    }

    #[test]
    fn test_affected_packages_truncated() {
        let analyzer = ErrorAnalyzer::new();
        let packages: Vec<String> = (1..=7).map(|i| format!("pkg{}", i)).collect();
        let refs: Vec<&str> = packages.iter().map(String::as_str).collect();
        let analysis = analyzer.analyze_error(&failed("network error", &refs));
        assert_eq!(
            analysis.suggested_actions.last().unwrap(),
            "Affected packages: pkg1, pkg2, pkg3, pkg4, pkg5 and 2 more"
        );
        assert_eq!(analysis.affected_packages.len(), 7);
    }

    #[test]
    fn test_multiple_failures_grouped() {
        let analyzer = ErrorAnalyzer::new();
        let results = vec![
            failed("Connection refused", &[]),
            RestoreResult::succeeded(StrategyLabel::Fallback, 1, Duration::ZERO),
            failed("network unreachable", &[]),
            failed("Permission denied", &[]),
        ];
        let grouped = analyzer.analyze_multiple_failures(&results);
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped[&ErrorCategory::NetworkError].len(), 2);
        assert_eq!(grouped[&ErrorCategory::PermissionError].len(), 1);
    }

    #[test]
    fn test_recovery_suggestions_deduplicated() {
        let analyzer = ErrorAnalyzer::new();
        let analysis = analyzer.analyze_error(&failed("Connection refused", &[]));
        let suggestions = analyzer.get_recovery_suggestions(&analysis);

        assert_eq!(&suggestions[..4], &analysis.suggested_actions[..]);
        let mirror = "Use a different package index or mirror";
        assert_eq!(suggestions.iter().filter(|s| *s == mirror).count(), 1);
        assert!(suggestions.contains(&"Use cached packages if available (pip --cache-dir)".to_string()));
    }

    #[test]
    fn test_backup_failure_category_is_fixed() {
        let analyzer = ErrorAnalyzer::new();
        let result = RestoreResult::failed(
            StrategyLabel::ValidationFailed,
            "Backup validation failed: Environment capture failed: Connection refused",
            Vec::new(),
            Duration::ZERO,
        );
        assert_eq!(analyzer.analyze_error(&result).category, ErrorCategory::NetworkError);
        let analysis = analyzer.analyze_backup_failure(&result);
        assert_eq!(analysis.category, ErrorCategory::BackupInvalid);
        assert_eq!(analysis.confidence, 0.9);
    }

    #[test]
    fn test_from_table_rejects_bad_pattern() {
        let table = vec![ErrorPattern {
            category: ErrorCategory::SystemError,
            confidence: 0.5,
            patterns: vec!["(unclosed"],
        }];
        assert!(matches!(
            ErrorAnalyzer::from_table(table),
            Err(RemedyError::Regex { .. })
        ));
    }

    #[test]
    fn test_analysis_roundtrip_keeps_category() {
        let analyzer = ErrorAnalyzer::new();
        let analysis = analyzer.analyze_error(&failed("Errno 28", &["a"]));
        let json = serde_json::to_string(&analysis).unwrap();
        assert!(json.contains(r#""category":"disk_space_error""#));
        assert!(json.contains(r#""strategy":"ForceReinstall""#));
        let back: ErrorAnalysis = serde_json::from_str(&json).unwrap();
        assert_eq!(back.category, ErrorCategory::DiskSpaceError);
    }
}
