//! Aggregate views over assessments: priority summaries, trends across
//! scan reports and per-package risk profiles.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use super::profiles::PackageProfile;
use super::{PriorityLevel, Prioritized, RiskAssessment, RiskAssessor};
use crate::models::{SecurityReport, Severity};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskMetrics {
    pub average_risk_score: f64,
    pub max_risk_score: f64,
    pub min_risk_score: f64,
    /// Assessments scoring 7.0 or more
    pub high_risk_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineAnalysis {
    pub average_timeline_hours: f64,
    /// Assessments due within 24 hours
    pub urgent_timeline_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfidenceAnalysis {
    pub average_confidence: f64,
    pub high_confidence_count: usize,
    pub low_confidence_count: usize,
}

/// Aggregate metrics over a prioritized set of vulnerabilities.
///
/// The metric sections are absent when there is nothing to summarise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrioritySummary {
    pub total_vulnerabilities: usize,
    pub priority_counts: BTreeMap<PriorityLevel, usize>,
    pub recommendations: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_metrics: Option<RiskMetrics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeline_analysis: Option<TimelineAnalysis>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_analysis: Option<ConfidenceAnalysis>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Increasing,
    Decreasing,
    Stable,
    InsufficientData,
}

impl TrendDirection {
    /// Compare the average of the later half of `values` with the earlier half.
    pub fn of(values: &[f64]) -> Self {
        if values.len() < 2 {
            return TrendDirection::InsufficientData;
        }
        let (first, second) = values.split_at(values.len() / 2);
        let first_avg = mean(first);
        let second_avg = mean(second);

        if second_avg > first_avg * 1.1 {
            TrendDirection::Increasing
        } else if second_avg < first_avg * 0.9 {
            TrendDirection::Decreasing
        } else {
            TrendDirection::Stable
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VulnerabilityTrend {
    pub total_vulnerabilities: usize,
    pub average_per_scan: f64,
    pub trend_direction: TrendDirection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeverityTrend {
    pub total: usize,
    pub average: f64,
    pub trend: TrendDirection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendAnalysis {
    pub report_count: usize,
    pub date_range: DateRange,
    pub vulnerability_trends: VulnerabilityTrend,
    pub severity_trends: BTreeMap<Severity, SeverityTrend>,
}

/// Returned instead of a trend analysis when there is nothing to analyse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{error}")]
pub struct TrendError {
    pub error: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreBand {
    High,
    Medium,
    Low,
    VeryLow,
}

impl ScoreBand {
    pub fn of(score: f64) -> Self {
        if score >= 0.8 {
            ScoreBand::High
        } else if score >= 0.6 {
            ScoreBand::Medium
        } else if score >= 0.4 {
            ScoreBand::Low
        } else {
            ScoreBand::VeryLow
        }
    }

    fn flag(high: bool) -> Self {
        if high {
            ScoreBand::High
        } else {
            ScoreBand::Low
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageRiskFactors {
    pub criticality_level: ScoreBand,
    pub exposure_level: ScoreBand,
    pub security_sensitivity: ScoreBand,
    pub network_risk: ScoreBand,
    pub production_impact: ScoreBand,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageRiskProfile {
    pub package_name: String,
    pub profile: PackageProfile,
    pub calculated_exposure_score: f64,
    pub risk_factors: PackageRiskFactors,
    pub recommendations: Vec<String>,
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn describe_window(window: Duration) -> String {
    let hours = window.as_secs() / 3600;
    if hours <= 72 {
        format!("{} hours", hours)
    } else {
        format!("{} days", hours / 24)
    }
}

impl RiskAssessor {
    /// Summarise a prioritized set of vulnerabilities.
    pub fn generate_priority_summary(&self, prioritized: &Prioritized) -> PrioritySummary {
        let priority_counts: BTreeMap<PriorityLevel, usize> = PriorityLevel::ALL
            .iter()
            .map(|level| (*level, prioritized.get(level).map_or(0, Vec::len)))
            .collect();
        let total_vulnerabilities = priority_counts.values().sum();

        let mut recommendations = Vec::new();
        for level in PriorityLevel::ALL {
            let count = priority_counts[&level];
            if count == 0 {
                continue;
            }
            let window = describe_window(self.timelines_for(level));
            let line = match level {
                PriorityLevel::Immediate => format!(
                    "CRITICAL: {} vulnerabilities require immediate attention (within {})",
                    count, window
                ),
                PriorityLevel::Urgent => format!(
                    "HIGH: {} vulnerabilities should be addressed within {}",
                    count, window
                ),
                PriorityLevel::Scheduled => format!(
                    "MEDIUM: {} vulnerabilities should be scheduled within {}",
                    count, window
                ),
                PriorityLevel::Planned => format!(
                    "LOW: {} vulnerabilities can be planned within {}",
                    count, window
                ),
            };
            recommendations.push(line);
        }

        let assessments: Vec<&RiskAssessment> = prioritized
            .values()
            .flat_map(|entries| entries.iter().map(|(_, a)| a))
            .collect();

        let mut summary = PrioritySummary {
            total_vulnerabilities,
            priority_counts,
            recommendations,
            risk_metrics: None,
            timeline_analysis: None,
            confidence_analysis: None,
        };
        if assessments.is_empty() {
            return summary;
        }

        let scores: Vec<f64> = assessments.iter().map(|a| a.risk_score).collect();
        summary.risk_metrics = Some(RiskMetrics {
            average_risk_score: mean(&scores),
            max_risk_score: scores.iter().copied().fold(f64::MIN, f64::max),
            min_risk_score: scores.iter().copied().fold(f64::MAX, f64::min),
            high_risk_count: scores.iter().filter(|s| **s >= 7.0).count(),
        });

        let hours: Vec<f64> = assessments
            .iter()
            .map(|a| a.recommended_timeline.as_secs_f64() / 3600.0)
            .collect();
        summary.timeline_analysis = Some(TimelineAnalysis {
            average_timeline_hours: mean(&hours),
            urgent_timeline_count: hours.iter().filter(|h| **h <= 24.0).count(),
        });

        let confidences: Vec<f64> = assessments.iter().map(|a| a.confidence_score).collect();
        summary.confidence_analysis = Some(ConfidenceAnalysis {
            average_confidence: mean(&confidences),
            high_confidence_count: confidences.iter().filter(|c| **c >= 0.7).count(),
            low_confidence_count: confidences.iter().filter(|c| **c < 0.5).count(),
        });

        summary
    }

    /// Trend analysis across scan reports, oldest first.
    pub fn analyze_vulnerability_trends(
        &self,
        reports: &[SecurityReport],
    ) -> Result<TrendAnalysis, TrendError> {
        if reports.is_empty() {
            return Err(TrendError {
                error: "No reports provided for analysis".to_string(),
            });
        }

        let mut sorted: Vec<&SecurityReport> = reports.iter().collect();
        sorted.sort_by_key(|r| r.scan_date);

        let counts: Vec<f64> = sorted
            .iter()
            .map(|r| r.vulnerability_count() as f64)
            .collect();
        let vulnerability_trends = VulnerabilityTrend {
            total_vulnerabilities: sorted.iter().map(|r| r.vulnerability_count()).sum(),
            average_per_scan: mean(&counts),
            trend_direction: TrendDirection::of(&counts),
        };

        let severity_trends = Severity::ALL
            .iter()
            .map(|severity| {
                let per_scan: Vec<f64> = sorted
                    .iter()
                    .map(|r| r.count_by_severity(*severity) as f64)
                    .collect();
                let trend = SeverityTrend {
                    total: per_scan.iter().sum::<f64>() as usize,
                    average: mean(&per_scan),
                    trend: TrendDirection::of(&per_scan),
                };
                (*severity, trend)
            })
            .collect();

        Ok(TrendAnalysis {
            report_count: sorted.len(),
            date_range: DateRange {
                start: sorted[0].scan_date,
                end: sorted[sorted.len() - 1].scan_date,
            },
            vulnerability_trends,
            severity_trends,
        })
    }

    /// Risk profile for one package, creating a default profile if unseen.
    pub fn get_package_risk_profile(&self, package_name: &str) -> PackageRiskProfile {
        let profile = self.profile_for(package_name);
        let exposure = profile.calculated_exposure_score();

        let mut recommendations = Vec::new();
        if profile.criticality_score > 0.8 {
            recommendations
                .push("High-priority package: Monitor closely for vulnerabilities".to_string());
        }
        if profile.has_network_access {
            recommendations
                .push("Network-accessible package: Prioritize security updates".to_string());
        }
        if profile.handles_sensitive_data {
            recommendations
                .push("Handles sensitive data: Implement strict update policies".to_string());
        }
        if profile.is_development_only {
            recommendations.push("Development-only package: Lower production risk".to_string());
        }
        if exposure > 0.7 {
            recommendations.push("High exposure: Consider additional security measures".to_string());
        }

        PackageRiskProfile {
            package_name: package_name.to_string(),
            risk_factors: PackageRiskFactors {
                criticality_level: ScoreBand::of(profile.criticality_score),
                exposure_level: ScoreBand::of(exposure),
                security_sensitivity: ScoreBand::flag(profile.handles_sensitive_data),
                network_risk: ScoreBand::flag(profile.has_network_access),
                production_impact: ScoreBand::flag(!profile.is_development_only),
            },
            calculated_exposure_score: exposure,
            profile,
            recommendations,
        }
    }
}
