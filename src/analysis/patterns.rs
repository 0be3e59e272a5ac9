//! Error classification table and recovery guidance.
//!
//! Order matters: the first category with a matching pattern wins, so more
//! specific categories sit above broader ones and the generic system
//! category comes last.

use super::ErrorCategory;

/// One row of the classification table
#[derive(Debug, Clone)]
pub struct ErrorPattern {
    pub category: ErrorCategory,
    pub confidence: f64,
    /// Regexes, matched case-insensitively against the raw error text
    pub patterns: Vec<&'static str>,
}

/// The default classification table, most specific category first
pub fn get_pattern_definitions() -> Vec<ErrorPattern> {
    vec![
        ErrorPattern {
            category: ErrorCategory::NetworkError,
            confidence: 0.90,
            patterns: vec![
                r"connection.*timed?\s*out",
                r"network.*error",
                r"could not connect",
                r"connection.*refused",
                r"connection.*reset",
                r"timeout.*downloading",
                r"read\s+timed\s+out",
                r"failed to download",
                r"network.*unreachable",
                r"dns.*resolution.*failed",
                r"temporary\s+failure\s+in\s+name\s+resolution",
                r"max\s+retries\s+exceeded",
            ],
        },
        // Above permission: "no space left on device: cannot write to ..."
        ErrorPattern {
            category: ErrorCategory::DiskSpaceError,
            confidence: 0.95,
            patterns: vec![
                r"no\s+space\s+left\s+on\s+device",
                r"disk.*full",
                r"insufficient.*disk.*space",
                r"errno\s+28\b",
                r"cannot\s+write.*no\s+space",
                r"quota\s+exceeded",
            ],
        },
        ErrorPattern {
            category: ErrorCategory::PermissionError,
            confidence: 0.95,
            patterns: vec![
                r"permission\s+denied",
                r"access\s+(is\s+)?denied",
                r"cannot\s+write\s+to",
                r"insufficient.*privileges",
                r"operation.*not.*permitted",
                r"errno\s+13\b",
            ],
        },
        // Above dependency conflict: "requires python >=3.12 but you have 3.8"
        ErrorPattern {
            category: ErrorCategory::PythonVersionIncompatible,
            confidence: 0.90,
            patterns: vec![
                r"requires\s+python\s*[<>=!~]",
                r"requires\s+a\s+different\s+python",
                r"python\s+version.*incompatible",
                r"unsupported\s+python\s+version",
                r"requires.*python.*but.*have",
            ],
        },
        ErrorPattern {
            category: ErrorCategory::PackageNotFound,
            confidence: 0.85,
            patterns: vec![
                r"no\s+matching\s+distribution\s+found",
                r"could\s+not\s+find\s+a\s+version",
                r"package.*not.*found",
                r"no\s+such\s+package",
                r"404.*not.*found",
            ],
        },
        ErrorPattern {
            category: ErrorCategory::DependencyConflict,
            confidence: 0.80,
            patterns: vec![
                r"dependency.*conflict",
                r"cannot\s+satisfy\s+requirement",
                r"resolutionimpossible",
                r"incompatible.*requirements",
                r"version.*conflict",
                r"requires.*but.*installed",
            ],
        },
        ErrorPattern {
            category: ErrorCategory::CorruptedPackage,
            confidence: 0.85,
            patterns: vec![
                r"hash\s+mismatch",
                r"do\s+not\s+match\s+the\s+hashes",
                r"checksum.*failed",
                r"corrupted.*package",
                r"invalid.*wheel",
                r"bad.*archive",
                r"integrity.*check.*failed",
            ],
        },
        ErrorPattern {
            category: ErrorCategory::BackupInvalid,
            confidence: 0.90,
            patterns: vec![
                r"backup.*validation.*failed",
                r"requirements.*file.*not.*found",
                r"invalid.*backup",
                r"backup.*corrupted",
                r"checksum\s+mismatch",
            ],
        },
        ErrorPattern {
            category: ErrorCategory::SystemError,
            confidence: 0.60,
            patterns: vec![
                r"oserror",
                r"system.*error",
                r"errno\s+\d+",
                r"no\s+such\s+file\s+or\s+directory",
                r"command.*not.*found",
                r"timed\s+out",
            ],
        },
    ]
}

pub fn description(category: ErrorCategory) -> &'static str {
    match category {
        ErrorCategory::NetworkError => {
            "Network connectivity issues prevented the operation from completing"
        }
        ErrorCategory::PermissionError => {
            "Insufficient permissions to perform the requested operation"
        }
        ErrorCategory::PackageNotFound => {
            "One or more packages could not be found in the package index"
        }
        ErrorCategory::DependencyConflict => "Dependency conflicts prevent package installation",
        ErrorCategory::DiskSpaceError => "Insufficient disk space to complete the operation",
        ErrorCategory::PythonVersionIncompatible => {
            "Python version incompatibility with required packages"
        }
        ErrorCategory::CorruptedPackage => {
            "Package corruption detected during download or installation"
        }
        ErrorCategory::BackupInvalid => {
            "Backup validation failed; the backup may be corrupted or incomplete"
        }
        ErrorCategory::SystemError => "System-level error occurred during the operation",
        ErrorCategory::UnknownError => "An unrecognized error occurred",
    }
}

/// First-line recovery actions attached to every analysis
pub fn suggested_actions(category: ErrorCategory) -> &'static [&'static str] {
    match category {
        ErrorCategory::NetworkError => &[
            "Check your internet connection",
            "Retry the operation after a few minutes",
            "Use a different package index or mirror",
            "Check firewall and proxy settings",
        ],
        ErrorCategory::PermissionError => &[
            "Check file and directory permissions",
            "Use a virtual environment to avoid system-wide installations",
            "Verify the user has write access to the target directories",
            "Run the command with elevated privileges only if the environment requires it",
        ],
        ErrorCategory::PackageNotFound => &[
            "Verify package names and versions are correct",
            "Check if the package exists in the package index",
            "Try using a different package index",
            "Check for typos in package specifications",
        ],
        ErrorCategory::DependencyConflict => &[
            "Use dependency resolution tools to identify conflicts",
            "Update conflicting packages to compatible versions",
            "Consider using virtual environments",
            "Review and update requirements specifications",
        ],
        ErrorCategory::DiskSpaceError => &[
            "Free up disk space on the target device",
            "Clean up temporary files and caches",
            "Move installation to a different location with more space",
            "Check available disk space before operations",
        ],
        ErrorCategory::PythonVersionIncompatible => &[
            "Upgrade Python to a compatible version",
            "Use a different Python environment",
            "Find alternative packages compatible with your Python version",
            "Consider using version-specific package variants",
        ],
        ErrorCategory::CorruptedPackage => &[
            "Clear package cache and retry",
            "Download the package from a different source",
            "Verify package integrity manually",
            "Report the issue to package maintainers",
        ],
        ErrorCategory::BackupInvalid => &[
            "Recreate the backup with proper validation",
            "Check backup file integrity",
            "Verify backup contains all required files",
            "Use a different backup if available",
        ],
        ErrorCategory::SystemError => &[
            "Check system logs for more details",
            "Verify system dependencies are installed",
            "Restart the system if necessary",
            "Check for system-level issues",
        ],
        ErrorCategory::UnknownError => &[
            "Review the full error message for clues",
            "Check system and application logs",
            "Try the operation again",
            "Seek help from community or documentation",
        ],
    }
}

/// Extended suggestions merged in by `get_recovery_suggestions`
pub fn extended_suggestions(category: ErrorCategory) -> &'static [&'static str] {
    match category {
        ErrorCategory::NetworkError => &[
            "Check your internet connection and network settings",
            "Use a different package index or mirror",
            "Use cached packages if available (pip --cache-dir)",
        ],
        ErrorCategory::PermissionError => &[
            "Ensure you have appropriate permissions for the target directory",
            "Verify write access to the installation directory",
        ],
        ErrorCategory::PackageNotFound => &[
            "Verify package names and versions are correct",
            "Check if the package exists on PyPI",
            "Consider alternative package versions or names",
        ],
        ErrorCategory::DependencyConflict => &[
            "Review and resolve conflicting dependencies",
            "Use pip-tools to manage dependency resolution",
            "Try installing packages individually to isolate conflicts",
        ],
        ErrorCategory::DiskSpaceError => &[
            "Free up disk space on the target device",
            "Use 'pip cache purge' to clear pip cache",
            "Consider using a different temporary directory",
        ],
        ErrorCategory::PythonVersionIncompatible => &[
            "Upgrade Python to a compatible version",
            "Use a virtual environment with the correct Python version",
        ],
        ErrorCategory::CorruptedPackage => &[
            "Clear pip cache and retry installation",
            "Download packages from a different source",
        ],
        ErrorCategory::BackupInvalid => &[
            "Check backup file integrity and completeness",
            "Use a different backup if available",
        ],
        ErrorCategory::SystemError => &[
            "Consider restarting the system if necessary",
            "Check system logs for more details",
        ],
        ErrorCategory::UnknownError => &[],
    }
}
