//! Vulnerability Risk Assessment Module
//!
//! Scores each vulnerability on a 0-10 scale from ten weighted impact
//! factors, maps the score onto a remediation priority and derives a
//! recommended timeline, remediation complexity and business impact.

pub mod factors;
pub mod profiles;
mod summary;

pub use factors::ImpactFactor;
pub use profiles::PackageProfile;
pub use summary::{
    ConfidenceAnalysis, DateRange, PackageRiskFactors, PackageRiskProfile, PrioritySummary,
    RiskMetrics, ScoreBand, SeverityTrend, TimelineAnalysis, TrendAnalysis, TrendDirection,
    TrendError, VulnerabilityTrend,
};

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use crate::config::{AssessorConfig, PriorityThresholds, PriorityTimelines};
use crate::errors::RemedyResult;
use crate::models::{Severity, Vulnerability};
use crate::utils::duration_hours;

/// Remediation priority, most pressing first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriorityLevel {
    Immediate,
    Urgent,
    Scheduled,
    Planned,
}

impl PriorityLevel {
    pub const ALL: [PriorityLevel; 4] = [
        PriorityLevel::Immediate,
        PriorityLevel::Urgent,
        PriorityLevel::Scheduled,
        PriorityLevel::Planned,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PriorityLevel::Immediate => "immediate",
            PriorityLevel::Urgent => "urgent",
            PriorityLevel::Scheduled => "scheduled",
            PriorityLevel::Planned => "planned",
        }
    }
}

impl std::fmt::Display for PriorityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemediationComplexity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusinessImpact {
    Low,
    Medium,
    High,
    Critical,
}

impl BusinessImpact {
    fn raised(self) -> Self {
        match self {
            BusinessImpact::Low => BusinessImpact::Medium,
            BusinessImpact::Medium => BusinessImpact::High,
            BusinessImpact::High => BusinessImpact::Critical,
            BusinessImpact::Critical => BusinessImpact::Critical,
        }
    }
}

/// Risk assessment of one vulnerability
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub vulnerability_id: String,
    /// 0.0 to 10.0
    pub risk_score: f64,
    pub priority_level: PriorityLevel,
    #[serde(rename = "recommended_timeline_hours", with = "duration_hours")]
    pub recommended_timeline: Duration,
    pub impact_factors: BTreeMap<ImpactFactor, f64>,
    pub assessment_date: DateTime<Utc>,
    /// 0.0 to 1.0
    pub confidence_score: f64,
    pub remediation_complexity: RemediationComplexity,
    pub business_impact: BusinessImpact,
}

impl RiskAssessment {
    pub fn is_high_confidence(&self) -> bool {
        self.confidence_score >= 0.7
    }

    pub fn requires_immediate_action(&self) -> bool {
        self.priority_level == PriorityLevel::Immediate
    }
}

/// Vulnerabilities grouped by priority, highest risk first within a group.
/// Every priority level is present, possibly with an empty list.
pub type Prioritized = BTreeMap<PriorityLevel, Vec<(Vulnerability, RiskAssessment)>>;

/// Tools that are cheap to upgrade because nothing ships with them
const DEV_TOOLS: &[&str] = &["black", "isort", "mypy", "pytest", "flake8", "bandit"];

/// Packages whose upgrades need careful regression testing
const SENSITIVE_CORE: &[&str] = &["cryptography", "sqlalchemy", "django", "flask"];

/// Initialise the global rayon pool used for bulk assessment.
///
/// `threads == 0` uses one thread per CPU. Only the first call takes effect.
pub fn configure_thread_pool(threads: usize) {
    let thread_count = if threads == 0 { num_cpus::get() } else { threads };

    log::debug!("Assessing with {} threads", thread_count);

    rayon::ThreadPoolBuilder::new()
        .num_threads(thread_count)
        .build_global()
        .unwrap_or_else(|_| {
            log::warn!("Failed to initialize custom thread pool, using default");
        });
}

/// Risk assessor with a per-instance package profile cache.
pub struct RiskAssessor {
    profiles: RwLock<HashMap<String, PackageProfile>>,
    /// Names with an explicit (built-in or configured) profile
    known: HashSet<String>,
    thresholds: PriorityThresholds,
    timelines: PriorityTimelines,
}

impl Default for RiskAssessor {
    fn default() -> Self {
        Self::new()
    }
}

impl RiskAssessor {
    /// Create an assessor with the built-in profiles and default thresholds
    pub fn new() -> Self {
        let mut profiles = HashMap::new();
        let mut known = HashSet::new();
        for profile in profiles::default_profiles() {
            let key = profile.name.to_lowercase();
            known.insert(key.clone());
            profiles.insert(key, profile);
        }

        log::debug!("Initialized RiskAssessor with {} package profiles", profiles.len());

        Self {
            profiles: RwLock::new(profiles),
            known,
            thresholds: PriorityThresholds::default(),
            timelines: PriorityTimelines::default(),
        }
    }

    /// Create an assessor from configuration, validating the thresholds
    pub fn with_config(config: &AssessorConfig) -> RemedyResult<Self> {
        config.thresholds.validate()?;

        let mut assessor = Self::new();
        assessor.thresholds = config.thresholds;
        assessor.timelines = config.timelines;
        for profile in &config.custom_profiles {
            assessor = assessor.with_profile(profile.clone());
        }
        Ok(assessor)
    }

    /// Add or replace the profile of a package
    pub fn with_profile(mut self, profile: PackageProfile) -> Self {
        let key = profile.name.to_lowercase();
        self.known.insert(key.clone());
        self.profiles
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, profile);
        self
    }

    /// Whether the package has a built-in or configured profile
    pub fn is_known_package(&self, package_name: &str) -> bool {
        self.known.contains(&package_name.to_lowercase())
    }

    pub(crate) fn timelines_for(&self, level: PriorityLevel) -> Duration {
        match level {
            PriorityLevel::Immediate => self.timelines.immediate,
            PriorityLevel::Urgent => self.timelines.urgent,
            PriorityLevel::Scheduled => self.timelines.scheduled,
            PriorityLevel::Planned => self.timelines.planned,
        }
    }

    /// Look up a profile, creating and caching a default one if unseen
    pub(crate) fn profile_for(&self, package_name: &str) -> PackageProfile {
        let key = package_name.to_lowercase();
        {
            let cache = self.profiles.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(profile) = cache.get(&key) {
                return profile.clone();
            }
        }

        let mut cache = self.profiles.write().unwrap_or_else(PoisonError::into_inner);
        cache
            .entry(key)
            .or_insert_with(|| {
                log::debug!("Created default profile for unknown package: {}", package_name);
                PackageProfile::unknown(package_name.to_lowercase())
            })
            .clone()
    }

    /// Assess a single vulnerability
    pub fn assess_vulnerability(&self, vuln: &Vulnerability) -> RiskAssessment {
        self.assess_at(vuln, Utc::now())
    }

    /// Assess a vulnerability as of `now`
    pub fn assess_at(&self, vuln: &Vulnerability, now: DateTime<Utc>) -> RiskAssessment {
        let profile = self.profile_for(vuln.package_name());

        let impact_factors: BTreeMap<ImpactFactor, f64> = ImpactFactor::ALL
            .iter()
            .map(|factor| (*factor, factor.score(vuln, &profile, now)))
            .collect();

        let risk_score = weighted_risk_score(&impact_factors, vuln);
        let priority_level = self.priority_level(risk_score, vuln.severity());
        let recommended_timeline = self.timeline(priority_level, vuln, &impact_factors);
        let remediation_complexity = remediation_complexity(vuln, &profile);
        let business_impact = business_impact(vuln, &impact_factors);
        let confidence_score = self.confidence(vuln, &impact_factors);

        log::debug!(
            "Assessed {}: risk_score={:.2}, priority={}, confidence={:.2}",
            vuln.id(),
            risk_score,
            priority_level,
            confidence_score
        );

        RiskAssessment {
            vulnerability_id: vuln.id().to_string(),
            risk_score,
            priority_level,
            recommended_timeline,
            impact_factors,
            assessment_date: now,
            confidence_score,
            remediation_complexity,
            business_impact,
        }
    }

    /// Assess every vulnerability, highest risk first. Ties keep input order.
    pub fn assess_report(&self, vulnerabilities: &[Vulnerability]) -> Vec<RiskAssessment> {
        self.assess_sorted(vulnerabilities)
            .into_iter()
            .map(|(_, assessment)| assessment)
            .collect()
    }

    /// Group vulnerabilities by priority level.
    pub fn get_prioritized_vulnerabilities(&self, vulnerabilities: &[Vulnerability]) -> Prioritized {
        let mut prioritized: Prioritized = PriorityLevel::ALL
            .iter()
            .map(|level| (*level, Vec::new()))
            .collect();

        for (vuln, assessment) in self.assess_sorted(vulnerabilities) {
            prioritized
                .entry(assessment.priority_level)
                .or_default()
                .push((vuln.clone(), assessment));
        }
        prioritized
    }

    fn assess_sorted<'a>(
        &self,
        vulnerabilities: &'a [Vulnerability],
    ) -> Vec<(&'a Vulnerability, RiskAssessment)> {
        let now = Utc::now();
        let mut assessed: Vec<(&Vulnerability, RiskAssessment)> = vulnerabilities
            .par_iter()
            .map(|v| (v, self.assess_at(v, now)))
            .collect();

        // sort_by is stable, so equal scores keep their input order
        assessed.sort_by(|(_, a), (_, b)| b.risk_score.total_cmp(&a.risk_score));

        log::info!("Assessed {} vulnerabilities", assessed.len());
        assessed
    }

    fn priority_level(&self, risk_score: f64, severity: Severity) -> PriorityLevel {
        if severity == Severity::Critical {
            return PriorityLevel::Immediate;
        }
        if severity == Severity::High && risk_score >= 8.5 {
            return PriorityLevel::Immediate;
        }

        let t = &self.thresholds;
        if risk_score >= t.immediate {
            PriorityLevel::Immediate
        } else if risk_score >= t.urgent {
            PriorityLevel::Urgent
        } else if risk_score >= t.scheduled {
            PriorityLevel::Scheduled
        } else {
            PriorityLevel::Planned
        }
    }

    fn timeline(
        &self,
        level: PriorityLevel,
        vuln: &Vulnerability,
        factors: &BTreeMap<ImpactFactor, f64>,
    ) -> Duration {
        let mut adjustment = 1.0;
        if vuln.severity() == Severity::Critical {
            adjustment *= 0.5;
        }
        if !vuln.is_fixable() {
            adjustment *= 2.0;
        }
        if factors.get(&ImpactFactor::ExposureLevel).copied().unwrap_or(0.5) > 0.8 {
            adjustment *= 0.8;
        }
        if factors.get(&ImpactFactor::AgeUrgency).copied().unwrap_or(0.5) > 0.8 {
            adjustment *= 0.7;
        }

        let hours = self.timelines_for(level).as_secs_f64() / 3600.0 * adjustment;
        Duration::from_secs_f64(hours.max(1.0) * 3600.0)
    }

    fn confidence(&self, vuln: &Vulnerability, factors: &BTreeMap<ImpactFactor, f64>) -> f64 {
        let mut confidence = 0.5;
        if vuln.cvss_score().is_some() {
            confidence += 0.2;
        }
        if vuln.published_date().is_some() {
            confidence += 0.1;
        }
        if vuln.is_fixable() {
            confidence += 0.1;
        }
        if self.is_known_package(vuln.package_name()) {
            confidence += 0.1;
        }
        if vuln.severity() == Severity::Unknown {
            confidence -= 0.1;
        }

        let completeness = factors.len() as f64 / ImpactFactor::ALL.len() as f64;
        (confidence * completeness).clamp(0.0, 1.0)
    }
}

/// Weight-normalised blend of the present factors, on a 0-10 scale.
fn weighted_risk_score(factors: &BTreeMap<ImpactFactor, f64>, vuln: &Vulnerability) -> f64 {
    let mut weighted = 0.0;
    let mut total_weight = 0.0;
    for factor in ImpactFactor::ALL {
        if let Some(value) = factors.get(&factor) {
            weighted += value * factor.weight();
            total_weight += factor.weight();
        }
    }

    let mut score = if total_weight > 0.0 {
        weighted / total_weight * 10.0
    } else {
        5.0
    };

    if vuln.severity() == Severity::Critical {
        score = (score * 1.2).min(10.0);
    }
    if vuln.cvss_score().is_some_and(|cvss| cvss >= 9.0) {
        score = (score * 1.1).min(10.0);
    }
    score.clamp(0.0, 10.0)
}

fn remediation_complexity(vuln: &Vulnerability, profile: &PackageProfile) -> RemediationComplexity {
    if !vuln.is_fixable() {
        return RemediationComplexity::High;
    }

    let name = vuln.package_name().to_lowercase();
    if DEV_TOOLS.contains(&name.as_str()) || profile.is_development_only {
        RemediationComplexity::Low
    } else if SENSITIVE_CORE.contains(&name.as_str()) {
        RemediationComplexity::High
    } else {
        RemediationComplexity::Medium
    }
}

fn business_impact(vuln: &Vulnerability, factors: &BTreeMap<ImpactFactor, f64>) -> BusinessImpact {
    let mut impact = match vuln.severity() {
        Severity::Critical => BusinessImpact::Critical,
        Severity::High => BusinessImpact::High,
        Severity::Medium | Severity::Unknown => BusinessImpact::Medium,
        Severity::Low => BusinessImpact::Low,
    };

    let criticality = factors
        .get(&ImpactFactor::PackageCriticality)
        .copied()
        .unwrap_or(0.5);
    if criticality > 0.8 && impact <= BusinessImpact::Medium {
        impact = impact.raised();
    }

    let sensitivity = factors
        .get(&ImpactFactor::DataSensitivity)
        .copied()
        .unwrap_or(0.3);
    if sensitivity > 0.8 && impact <= BusinessImpact::Medium {
        impact = BusinessImpact::High;
    }

    impact
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn vuln(id: &str, package: &str, fixes: &[&str], severity: Severity, cvss: Option<f64>) -> Vulnerability {
        Vulnerability::new(
            id,
            package,
            "1.0.0",
            fixes.iter().map(|s| s.to_string()).collect(),
            severity,
        )
        .with_cvss_score(cvss)
    }

    #[test]
    fn test_critical_runtime_package_is_immediate() {
        let assessor = RiskAssessor::new();
        let v = vuln("CVE-2024-0001", "requests", &["2.32.0"], Severity::Critical, Some(9.5));
        let assessment = assessor.assess_vulnerability(&v);

        assert_eq!(assessment.priority_level, PriorityLevel::Immediate);
        assert!(assessment.requires_immediate_action());
        assert!(assessment.risk_score >= 8.0);
        assert!(assessment.risk_score <= 10.0);
        assert_eq!(assessment.business_impact, BusinessImpact::Critical);
        assert_eq!(assessment.impact_factors.len(), 10);
        // 24h halved for critical severity, then reduced for high exposure
        assert!(assessment.recommended_timeline < std::time::Duration::from_secs(12 * 3600));
    }

    #[test]
    fn test_low_dev_tool_is_planned() {
        let assessor = RiskAssessor::new();
        let v = vuln("CVE-2024-0002", "black", &["24.1.0"], Severity::Low, Some(2.1));
        let assessment = assessor.assess_vulnerability(&v);

        assert_eq!(assessment.remediation_complexity, RemediationComplexity::Low);
        assert!(matches!(
            assessment.priority_level,
            PriorityLevel::Planned | PriorityLevel::Scheduled
        ));
        assert_eq!(assessment.business_impact, BusinessImpact::Low);
        assert!(assessment.risk_score < 4.0);
    }

    #[test]
    fn test_unfixable_is_high_complexity_and_slower() {
        let assessor = RiskAssessor::new();
        let fixable = vuln("A", "leftpad", &["1.1"], Severity::Medium, Some(5.0));
        let unfixable = vuln("B", "leftpad", &[], Severity::Medium, Some(5.0));

        let a = assessor.assess_vulnerability(&fixable);
        let b = assessor.assess_vulnerability(&unfixable);
        assert_eq!(b.remediation_complexity, RemediationComplexity::High);
        assert_eq!(a.remediation_complexity, RemediationComplexity::Medium);
        assert_eq!(a.priority_level, b.priority_level);
        assert_eq!(b.recommended_timeline, a.recommended_timeline * 2);
    }

    #[test]
    fn test_sensitive_core_is_high_complexity() {
        let assessor = RiskAssessor::new();
        let v = vuln("C", "Django", &["4.2.11"], Severity::High, Some(7.5));
        let assessment = assessor.assess_vulnerability(&v);
        assert_eq!(assessment.remediation_complexity, RemediationComplexity::High);
    }

    #[test]
    fn test_assess_report_sorted_and_stable() {
        let assessor = RiskAssessor::new();
        let vulns = vec![
            vuln("low", "black", &["1"], Severity::Low, Some(2.1)),
            vuln("tie-1", "leftpad", &["1"], Severity::Medium, Some(5.0)),
            vuln("crit", "requests", &["1"], Severity::Critical, Some(9.5)),
            vuln("tie-2", "leftpad", &["1"], Severity::Medium, Some(5.0)),
        ];
        let assessments = assessor.assess_report(&vulns);

        assert_eq!(assessments.len(), vulns.len());
        for pair in assessments.windows(2) {
            assert!(pair[0].risk_score >= pair[1].risk_score);
        }
        let ids: Vec<&str> = assessments.iter().map(|a| a.vulnerability_id.as_str()).collect();
        assert_eq!(ids, vec!["crit", "tie-1", "tie-2", "low"]);
    }

    #[test]
    fn test_prioritized_has_every_level() {
        let assessor = RiskAssessor::new();
        let vulns = vec![vuln("crit", "requests", &["1"], Severity::Critical, Some(9.5))];
        let prioritized = assessor.get_prioritized_vulnerabilities(&vulns);

        assert_eq!(prioritized.len(), 4);
        assert_eq!(prioritized[&PriorityLevel::Immediate].len(), 1);
        assert_eq!(prioritized[&PriorityLevel::Immediate][0].0.id(), "crit");
        assert!(prioritized[&PriorityLevel::Planned].is_empty());
    }

    #[test]
    fn test_unknown_package_gets_cached_default_profile() {
        let assessor = RiskAssessor::new();
        assert!(!assessor.is_known_package("leftpad"));
        let v = vuln("X", "LeftPad", &["1"], Severity::Medium, None);
        let assessment = assessor.assess_vulnerability(&v);

        assert_eq!(assessment.impact_factors[&ImpactFactor::PackageCriticality], 0.5);
        assert!(assessor.profiles.read().unwrap().contains_key("leftpad"));
        // Caching a default does not make the package "known"
        assert!(!assessor.is_known_package("leftpad"));
    }

    #[test]
    fn test_confidence_reflects_signal() {
        let assessor = RiskAssessor::new();
        let bare = vuln("A", "leftpad", &[], Severity::Unknown, None);
        assert!((assessor.assess_vulnerability(&bare).confidence_score - 0.4).abs() < 1e-9);

        let rich = vuln("B", "requests", &["2.32.0"], Severity::Unknown, Some(7.5))
            .with_published_date(Some(Utc::now() - ChronoDuration::days(2)));
        let assessment = assessor.assess_vulnerability(&rich);
        assert!((assessment.confidence_score - 1.0).abs() < 1e-9);
        assert!(assessment.is_high_confidence());
    }

    #[test]
    fn test_custom_profile_overrides_default() {
        let mut custom = PackageProfile::unknown("requests");
        custom.criticality_score = 0.1;
        let config = AssessorConfig {
            custom_profiles: vec![custom, PackageProfile::unknown("internal-sdk")],
            ..Default::default()
        };
        let assessor = RiskAssessor::with_config(&config).unwrap();
        assert!(assessor.is_known_package("INTERNAL-SDK"));

        let v = vuln("A", "requests", &["1"], Severity::Medium, None);
        let assessment = assessor.assess_vulnerability(&v);
        assert_eq!(assessment.impact_factors[&ImpactFactor::PackageCriticality], 0.1);
    }

    #[test]
    fn test_invalid_thresholds_rejected() {
        let config = AssessorConfig {
            thresholds: PriorityThresholds {
                immediate: 3.0,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(RiskAssessor::with_config(&config).is_err());
    }

    #[test]
    fn test_custom_thresholds_change_priority() {
        let config = AssessorConfig {
            thresholds: PriorityThresholds {
                immediate: 9.5,
                urgent: 9.0,
                scheduled: 8.5,
                planned: 0.0,
            },
            ..Default::default()
        };
        let assessor = RiskAssessor::with_config(&config).unwrap();
        let v = vuln("A", "leftpad", &["1"], Severity::Medium, Some(5.0));
        assert_eq!(assessor.assess_vulnerability(&v).priority_level, PriorityLevel::Planned);
    }

    #[test]
    fn test_timeline_floor_of_one_hour() {
        let config = AssessorConfig {
            timelines: PriorityTimelines {
                immediate: std::time::Duration::from_secs(60),
                ..Default::default()
            },
            ..Default::default()
        };
        let assessor = RiskAssessor::with_config(&config).unwrap();
        let v = vuln("A", "requests", &["1"], Severity::Critical, Some(9.8));
        assert_eq!(
            assessor.assess_vulnerability(&v).recommended_timeline,
            std::time::Duration::from_secs(3600)
        );
    }

    #[test]
    fn test_assessment_serializes_flat() {
        let assessor = RiskAssessor::new();
        let v = vuln("A", "requests", &["1"], Severity::High, Some(7.5));
        let assessment = assessor.assess_vulnerability(&v);
        let json = serde_json::to_value(&assessment).unwrap();

        assert!(json["recommended_timeline_hours"].is_number());
        assert!(json["impact_factors"]["package_criticality"].is_number());
        let back: RiskAssessment = serde_json::from_value(json).unwrap();
        assert_eq!(back.priority_level, assessment.priority_level);
        assert_eq!(back.business_impact, assessment.business_impact);
        assert_eq!(back.remediation_complexity, assessment.remediation_complexity);
    }
}
