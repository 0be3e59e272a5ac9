//! Vulnerability records and scan reports consumed by the risk assessor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Vulnerability severity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Unknown,
}

impl Severity {
    /// All severities, most severe first
    pub const ALL: [Severity; 5] = [
        Severity::Critical,
        Severity::High,
        Severity::Medium,
        Severity::Low,
        Severity::Unknown,
    ];

    /// Map a CVSS score onto a severity band.
    ///
    /// `>= 9.0` critical, `>= 7.0` high, `>= 4.0` medium, `> 0.0` low.
    /// A missing, zero or non-finite score is `Unknown`.
    pub fn from_cvss(score: Option<f64>) -> Self {
        match score {
            Some(s) if s.is_finite() && s >= 9.0 => Severity::Critical,
            Some(s) if s.is_finite() && s >= 7.0 => Severity::High,
            Some(s) if s.is_finite() && s >= 4.0 => Severity::Medium,
            Some(s) if s.is_finite() && s > 0.0 => Severity::Low,
            _ => Severity::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
            Severity::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A security vulnerability in one installed package.
///
/// Immutable once built. When the severity is `Unknown` and a CVSS score is
/// present, the severity is derived from the score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "VulnerabilityRecord")]
pub struct Vulnerability {
    id: String,
    package_name: String,
    installed_version: String,
    fix_versions: Vec<String>,
    severity: Severity,
    cvss_score: Option<f64>,
    description: String,
    published_date: Option<DateTime<Utc>>,
    discovered_date: DateTime<Utc>,
}

/// Wire form of a vulnerability as produced by the external scanner.
#[derive(Debug, Clone, Deserialize)]
struct VulnerabilityRecord {
    id: String,
    package_name: String,
    installed_version: String,
    #[serde(default)]
    fix_versions: Vec<String>,
    #[serde(default = "unknown_severity")]
    severity: Severity,
    #[serde(default)]
    cvss_score: Option<f64>,
    #[serde(default)]
    description: String,
    #[serde(default)]
    published_date: Option<DateTime<Utc>>,
    #[serde(default = "Utc::now")]
    discovered_date: DateTime<Utc>,
}

fn unknown_severity() -> Severity {
    Severity::Unknown
}

impl From<VulnerabilityRecord> for Vulnerability {
    fn from(record: VulnerabilityRecord) -> Self {
        Vulnerability::new(
            record.id,
            record.package_name,
            record.installed_version,
            record.fix_versions,
            record.severity,
        )
        .with_cvss_score(record.cvss_score)
        .with_description(record.description)
        .with_published_date(record.published_date)
        .with_discovered_date(record.discovered_date)
    }
}

impl Vulnerability {
    pub fn new(
        id: impl Into<String>,
        package_name: impl Into<String>,
        installed_version: impl Into<String>,
        fix_versions: Vec<String>,
        severity: Severity,
    ) -> Self {
        Self {
            id: id.into(),
            package_name: package_name.into(),
            installed_version: installed_version.into(),
            fix_versions,
            severity,
            cvss_score: None,
            description: String::new(),
            published_date: None,
            discovered_date: Utc::now(),
        }
    }

    pub fn with_cvss_score(mut self, cvss_score: Option<f64>) -> Self {
        self.cvss_score = cvss_score;
        if self.severity == Severity::Unknown && cvss_score.is_some() {
            self.severity = Severity::from_cvss(cvss_score);
        }
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_published_date(mut self, published_date: Option<DateTime<Utc>>) -> Self {
        self.published_date = published_date;
        self
    }

    pub fn with_discovered_date(mut self, discovered_date: DateTime<Utc>) -> Self {
        self.discovered_date = discovered_date;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn package_name(&self) -> &str {
        &self.package_name
    }

    pub fn installed_version(&self) -> &str {
        &self.installed_version
    }

    /// Fix versions, ascending; the last entry is the latest.
    pub fn fix_versions(&self) -> &[String] {
        &self.fix_versions
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn cvss_score(&self) -> Option<f64> {
        self.cvss_score
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn published_date(&self) -> Option<DateTime<Utc>> {
        self.published_date
    }

    pub fn discovered_date(&self) -> DateTime<Utc> {
        self.discovered_date
    }

    pub fn is_fixable(&self) -> bool {
        !self.fix_versions.is_empty()
    }

    /// The latest fix version, if any
    pub fn recommended_fix_version(&self) -> Option<&str> {
        self.fix_versions.last().map(String::as_str)
    }
}

/// A complete scan report from the external scanner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityReport {
    pub scan_date: DateTime<Utc>,
    pub vulnerabilities: Vec<Vulnerability>,
    #[serde(default)]
    pub total_packages_scanned: usize,
    #[serde(default, with = "crate::utils::duration_secs")]
    pub scan_duration: Duration,
    #[serde(default)]
    pub scanner_version: String,
    #[serde(default)]
    pub scan_command: String,
}

impl SecurityReport {
    pub fn new(scan_date: DateTime<Utc>, vulnerabilities: Vec<Vulnerability>) -> Self {
        Self {
            scan_date,
            vulnerabilities,
            total_packages_scanned: 0,
            scan_duration: Duration::ZERO,
            scanner_version: String::new(),
            scan_command: String::new(),
        }
    }

    pub fn vulnerability_count(&self) -> usize {
        self.vulnerabilities.len()
    }

    pub fn count_by_severity(&self, severity: Severity) -> usize {
        self.vulnerabilities
            .iter()
            .filter(|v| v.severity() == severity)
            .count()
    }

    pub fn fixable_count(&self) -> usize {
        self.vulnerabilities.iter().filter(|v| v.is_fixable()).count()
    }

    pub fn vulnerabilities_by_severity(&self, severity: Severity) -> Vec<&Vulnerability> {
        self.vulnerabilities
            .iter()
            .filter(|v| v.severity() == severity)
            .collect()
    }

    pub fn vulnerabilities_by_package(&self, package_name: &str) -> Vec<&Vulnerability> {
        self.vulnerabilities
            .iter()
            .filter(|v| v.package_name().eq_ignore_ascii_case(package_name))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vuln(fixes: &[&str], severity: Severity, cvss: Option<f64>) -> Vulnerability {
        Vulnerability::new(
            "PYSEC-2024-48",
            "requests",
            "2.25.0",
            fixes.iter().map(|s| s.to_string()).collect(),
            severity,
        )
        .with_cvss_score(cvss)
    }

    #[test]
    fn test_cvss_bands() {
        assert_eq!(Severity::from_cvss(Some(9.0)), Severity::Critical);
        assert_eq!(Severity::from_cvss(Some(8.9)), Severity::High);
        assert_eq!(Severity::from_cvss(Some(7.0)), Severity::High);
        assert_eq!(Severity::from_cvss(Some(6.9)), Severity::Medium);
        assert_eq!(Severity::from_cvss(Some(4.0)), Severity::Medium);
        assert_eq!(Severity::from_cvss(Some(3.9)), Severity::Low);
        assert_eq!(Severity::from_cvss(Some(0.1)), Severity::Low);
        assert_eq!(Severity::from_cvss(Some(0.0)), Severity::Unknown);
        assert_eq!(Severity::from_cvss(None), Severity::Unknown);
    }

    #[test]
    fn test_severity_derived_only_when_unknown() {
        assert_eq!(vuln(&[], Severity::Unknown, Some(7.5)).severity(), Severity::High);
        assert_eq!(vuln(&[], Severity::Low, Some(9.8)).severity(), Severity::Low);
        assert_eq!(vuln(&[], Severity::Unknown, None).severity(), Severity::Unknown);
    }

    #[test]
    fn test_fixability() {
        let unfixable = vuln(&[], Severity::High, None);
        assert!(!unfixable.is_fixable());
        assert_eq!(unfixable.recommended_fix_version(), None);

        let fixable = vuln(&["2.31.0", "2.32.0"], Severity::High, None);
        assert!(fixable.is_fixable());
        assert_eq!(fixable.recommended_fix_version(), Some("2.32.0"));
    }

    #[test]
    fn test_deserialize_derives_severity() {
        let json = r#"{
            "id": "GHSA-xxxx",
            "package_name": "urllib3",
            "installed_version": "1.26.0",
            "fix_versions": ["1.26.18"],
            "cvss_score": 9.1
        }"#;
        let v: Vulnerability = serde_json::from_str(json).unwrap();
        assert_eq!(v.severity(), Severity::Critical);
        assert_eq!(v.recommended_fix_version(), Some("1.26.18"));
        assert!(v.published_date().is_none());
    }

    #[test]
    fn test_vulnerability_roundtrip_keeps_severity() {
        let v = vuln(&["1.0"], Severity::Medium, Some(5.0)).with_description("xss");
        let json = serde_json::to_string(&v).unwrap();
        assert!(json.contains(r#""severity":"medium""#));
        let back: Vulnerability = serde_json::from_str(&json).unwrap();
        assert_eq!(back, v);
    }

    #[test]
    fn test_report_counts() {
        let report = SecurityReport::new(
            Utc::now(),
            vec![
                vuln(&["1"], Severity::Critical, None),
                vuln(&[], Severity::High, None),
                vuln(&["2"], Severity::High, None),
            ],
        );
        assert_eq!(report.vulnerability_count(), 3);
        assert_eq!(report.count_by_severity(Severity::High), 2);
        assert_eq!(report.fixable_count(), 2);
        assert_eq!(report.vulnerabilities_by_package("REQUESTS").len(), 3);
    }
}
