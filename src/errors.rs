//! Custom error types for remedy.
//!
//! Contract violations and infrastructure failures surface here. Failed
//! restore attempts are not errors: they come back as `RestoreResult`
//! values so that callers always get a structured outcome.

use std::path::PathBuf;
use std::time::Duration;

/// The main error type for remedy operations.
#[derive(Debug, thiserror::Error)]
pub enum RemedyError {
    /// I/O error (file read/write, permissions, etc.)
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: Option<PathBuf>,
        #[source]
        source: std::io::Error,
    },

    /// Regex compilation error
    #[error("Invalid regex pattern '{pattern}': {source}")]
    Regex {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The backup was already released by `cleanup()`
    #[error("Backup at {0:?} has already been cleaned up")]
    BackupReleased(PathBuf),

    /// A backup directory could not be created or read
    #[error("Invalid backup: {0}")]
    InvalidBackup(String),

    /// An installer operation failed; `message` keeps the raw tool output
    #[error("{operation} failed for {package}: {message}")]
    Installer {
        operation: String,
        package: String,
        message: String,
    },

    /// An external process or strategy exceeded its time bound
    #[error("{operation} timed out after {}s", .limit.as_secs())]
    Timeout { operation: String, limit: Duration },

    /// Assessor thresholds or other configuration values are inconsistent
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Generic error for external library errors
    #[error("{context}: {message}")]
    External { context: String, message: String },
}

/// Result type alias using RemedyError
pub type RemedyResult<T> = Result<T, RemedyError>;

impl RemedyError {
    /// Create an I/O error with path context
    pub fn io(source: std::io::Error, path: impl Into<Option<PathBuf>>) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a regex error with pattern context
    pub fn regex(source: regex::Error, pattern: impl Into<String>) -> Self {
        Self::Regex {
            pattern: pattern.into(),
            source,
        }
    }

    /// Create an installer error for a package operation
    pub fn installer(
        operation: impl Into<String>,
        package: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Installer {
            operation: operation.into(),
            package: package.into(),
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, limit: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            limit,
        }
    }

    /// Create an external error with context
    pub fn external(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self::External {
            context: context.into(),
            message: message.into(),
        }
    }
}

/// Convert from raw I/O errors (without path context)
impl From<std::io::Error> for RemedyError {
    fn from(source: std::io::Error) -> Self {
        Self::Io { path: None, source }
    }
}
