//! Impact factors and their weights in the overall risk score.
//!
//! Every factor is a score in `[0, 1]`. The assessor records each one in the
//! resulting assessment so callers can see why a score came out the way it did.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::profiles::PackageProfile;
use crate::models::{Severity, Vulnerability};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImpactFactor {
    Severity,
    PackageCriticality,
    ExposureLevel,
    Exploitability,
    FixAvailability,
    AgeUrgency,
    DataSensitivity,
    NetworkExposure,
    DependencyImpact,
    EcosystemHealth,
}

impl ImpactFactor {
    pub const ALL: [ImpactFactor; 10] = [
        ImpactFactor::Severity,
        ImpactFactor::PackageCriticality,
        ImpactFactor::ExposureLevel,
        ImpactFactor::Exploitability,
        ImpactFactor::FixAvailability,
        ImpactFactor::AgeUrgency,
        ImpactFactor::DataSensitivity,
        ImpactFactor::NetworkExposure,
        ImpactFactor::DependencyImpact,
        ImpactFactor::EcosystemHealth,
    ];

    /// Weight in the blended score. Weights sum to 1.0.
    pub fn weight(&self) -> f64 {
        match self {
            ImpactFactor::Severity => 0.25,
            ImpactFactor::PackageCriticality => 0.20,
            ImpactFactor::ExposureLevel => 0.15,
            ImpactFactor::Exploitability => 0.10,
            ImpactFactor::FixAvailability => 0.08,
            ImpactFactor::AgeUrgency => 0.07,
            ImpactFactor::DataSensitivity => 0.05,
            ImpactFactor::NetworkExposure => 0.04,
            ImpactFactor::DependencyImpact => 0.03,
            ImpactFactor::EcosystemHealth => 0.03,
        }
    }

    /// Compute this factor for a vulnerability in a package.
    pub fn score(&self, vuln: &Vulnerability, profile: &PackageProfile, now: DateTime<Utc>) -> f64 {
        match self {
            ImpactFactor::Severity => severity(vuln),
            ImpactFactor::PackageCriticality => profile.criticality_score.clamp(0.0, 1.0),
            ImpactFactor::ExposureLevel => profile.calculated_exposure_score(),
            ImpactFactor::Exploitability => exploitability(profile),
            ImpactFactor::FixAvailability => fix_availability(vuln),
            ImpactFactor::AgeUrgency => age_urgency(vuln.published_date(), now),
            ImpactFactor::DataSensitivity => data_sensitivity(profile),
            ImpactFactor::NetworkExposure => network_exposure(profile),
            ImpactFactor::DependencyImpact => dependency_impact(profile),
            ImpactFactor::EcosystemHealth => ecosystem_health(profile, now),
        }
    }
}

fn severity(vuln: &Vulnerability) -> f64 {
    match vuln.cvss_score() {
        // Sub-linear scaling lifts the middle of the CVSS range
        Some(cvss) if cvss.is_finite() => (cvss / 10.0).clamp(0.0, 1.0).powf(0.8),
        _ => match vuln.severity() {
            Severity::Critical => 1.0,
            Severity::High => 0.8,
            Severity::Medium => 0.6,
            Severity::Low => 0.3,
            Severity::Unknown => 0.5,
        },
    }
}

fn exploitability(profile: &PackageProfile) -> f64 {
    let mut score = 0.5 + profile.usage_frequency * 0.2;
    if profile.has_network_access {
        score += 0.3;
    }
    if profile.handles_sensitive_data {
        score += 0.2;
    }
    if profile.is_development_only {
        score -= 0.3;
    }
    score.clamp(0.0, 1.0)
}

fn fix_availability(vuln: &Vulnerability) -> f64 {
    match vuln.fix_versions().len() {
        0 => 0.2,
        1 => 0.9,
        _ => 1.0,
    }
}

fn age_urgency(published: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f64 {
    let Some(published) = published else {
        return 0.5;
    };
    let days = (now - published).num_days();
    if days <= 7 {
        1.0
    } else if days <= 28 {
        0.8 - (days - 7) as f64 * 0.02
    } else {
        (0.6 - (days - 28) as f64 * 0.01).max(0.2)
    }
}

fn data_sensitivity(profile: &PackageProfile) -> f64 {
    if profile.handles_sensitive_data {
        0.9
    } else if profile.has_network_access {
        0.6
    } else {
        0.3
    }
}

fn network_exposure(profile: &PackageProfile) -> f64 {
    if profile.has_network_access {
        0.8 + profile.usage_frequency * 0.2
    } else {
        0.2
    }
}

fn dependency_impact(profile: &PackageProfile) -> f64 {
    let depth_factor = (1.0 - (profile.dependency_depth as f64 - 1.0) * 0.15).max(0.2);
    (depth_factor + profile.usage_frequency) / 2.0
}

fn ecosystem_health(profile: &PackageProfile, now: DateTime<Utc>) -> f64 {
    let mut health = profile.maintainer_reputation;
    if let Some(updated) = profile.last_updated {
        let days = (now - updated).num_days();
        if days <= 90 {
            health += 0.2;
        } else if days <= 365 {
            health += 0.1;
        }
    }
    health.min(1.0)
}
