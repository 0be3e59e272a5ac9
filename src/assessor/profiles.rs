//! Package profiles: how critical and how exposed a package is.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Security profile of a single package
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageProfile {
    pub name: String,
    /// 0.0 to 1.0
    pub criticality_score: f64,
    /// 0.0 to 1.0
    pub exposure_level: f64,
    #[serde(default = "half")]
    pub usage_frequency: f64,
    #[serde(default = "top_level")]
    pub dependency_depth: u32,
    #[serde(default)]
    pub has_network_access: bool,
    #[serde(default)]
    pub handles_sensitive_data: bool,
    #[serde(default)]
    pub is_development_only: bool,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default = "half")]
    pub maintainer_reputation: f64,
}

fn half() -> f64 {
    0.5
}

fn top_level() -> u32 {
    1
}

impl PackageProfile {
    /// Profile assumed for a package nobody described: a moderately
    /// critical transitive dependency with no network or data access.
    pub fn unknown(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            criticality_score: 0.5,
            exposure_level: 0.6,
            usage_frequency: 0.5,
            dependency_depth: 2,
            has_network_access: false,
            handles_sensitive_data: false,
            is_development_only: false,
            last_updated: None,
            maintainer_reputation: 0.5,
        }
    }

    /// Overall exposure in `[0, 1]`, derived from usage, depth and access.
    pub fn calculated_exposure_score(&self) -> f64 {
        let usage_multiplier = 0.5 + self.usage_frequency * 0.5;
        let depth_factor = (1.0 - (self.dependency_depth as f64 - 1.0) * 0.1).max(0.1);

        let mut score = self.exposure_level * usage_multiplier * depth_factor;
        if self.has_network_access {
            score += 0.2;
        }
        if self.handles_sensitive_data {
            score += 0.3;
        }
        if self.is_development_only {
            score -= 0.3;
        }
        score.clamp(0.0, 1.0)
    }
}

#[allow(clippy::too_many_arguments)]
fn seed(
    name: &str,
    criticality_score: f64,
    exposure_level: f64,
    usage_frequency: f64,
    dependency_depth: u32,
    has_network_access: bool,
    handles_sensitive_data: bool,
    is_development_only: bool,
) -> PackageProfile {
    PackageProfile {
        name: name.to_string(),
        criticality_score,
        exposure_level,
        usage_frequency,
        dependency_depth,
        has_network_access,
        handles_sensitive_data,
        is_development_only,
        last_updated: None,
        maintainer_reputation: 0.5,
    }
}

/// Built-in profiles for well-known packages
pub fn default_profiles() -> Vec<PackageProfile> {
    vec![
        // Packaging toolchain
        seed("setuptools", 0.95, 0.8, 0.9, 1, true, false, false),
        seed("pip", 0.95, 0.7, 0.8, 1, true, false, false),
        seed("wheel", 0.8, 0.6, 0.7, 1, false, false, false),
        // Cryptography and HTTP
        seed("cryptography", 0.95, 0.9, 0.8, 2, false, true, false),
        seed("pycryptodome", 0.9, 0.9, 0.6, 2, false, true, false),
        seed("requests", 0.85, 0.95, 0.9, 1, true, true, false),
        seed("urllib3", 0.8, 0.9, 0.8, 2, true, true, false),
        // Databases
        seed("sqlalchemy", 0.85, 0.8, 0.8, 1, true, true, false),
        seed("psycopg2", 0.75, 0.7, 0.6, 2, true, true, false),
        seed("asyncpg", 0.7, 0.7, 0.5, 2, true, true, false),
        // Web frameworks
        seed("django", 0.9, 0.95, 0.9, 1, true, true, false),
        seed("flask", 0.85, 0.9, 0.8, 1, true, true, false),
        seed("fastapi", 0.8, 0.85, 0.7, 1, true, true, false),
        // Development tooling
        seed("black", 0.3, 0.2, 0.8, 1, false, false, true),
        seed("isort", 0.2, 0.1, 0.6, 1, false, false, true),
        seed("mypy", 0.25, 0.1, 0.7, 1, false, false, true),
        seed("pytest", 0.3, 0.2, 0.9, 1, false, false, true),
    ]
}
