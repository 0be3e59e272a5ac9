//! Environment backups.
//!
//! A backup is a directory holding the frozen requirement lines
//! (`requirements.txt`) and a flat `key=value` metadata file (`metadata`).
//! The metadata file is written last, so a directory without one was never
//! completed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use super::requirements::{package_count, parse_requirements};
use crate::config::RestoreConfig;
use crate::errors::{RemedyError, RemedyResult};
use crate::installer::PackageInstaller;
use crate::utils::{sha256_file, sha256_hex};

pub const REQUIREMENTS_FILE: &str = "requirements.txt";
pub const METADATA_FILE: &str = "metadata";

/// Backups older than this draw a staleness warning
const STALE_AFTER_HOURS: i64 = 24;

const METADATA_KEYS: &[&str] = &[
    "python_version",
    "platform",
    "created_by",
    "created_at",
    "package_count",
    "is_empty_environment",
    "requirements_sha256",
];

/// Facts recorded alongside the requirement lines
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupMetadata {
    pub python_version: Option<String>,
    pub platform: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub package_count: usize,
    pub is_empty_environment: bool,
    pub requirements_sha256: Option<String>,
    /// Set when the freeze failed or timed out
    pub freeze_error: Option<String>,
}

impl BackupMetadata {
    pub fn freeze_failed(&self) -> bool {
        self.freeze_error.is_some()
    }

    fn to_key_values(&self) -> String {
        let mut out = String::new();
        let mut put = |key: &str, value: &str| {
            // Values are single-line by construction
            out.push_str(key);
            out.push('=');
            out.push_str(&value.replace(['\r', '\n'], " "));
            out.push('\n');
        };
        put("python_version", self.python_version.as_deref().unwrap_or(""));
        put("platform", &self.platform);
        put("created_by", &self.created_by);
        put("created_at", &self.created_at.to_rfc3339());
        put("package_count", &self.package_count.to_string());
        put("is_empty_environment", &self.is_empty_environment.to_string());
        put(
            "requirements_sha256",
            self.requirements_sha256.as_deref().unwrap_or(""),
        );
        if let Some(err) = &self.freeze_error {
            put("freeze_failed", "true");
            put("freeze_error", err);
        }
        out
    }

    fn from_key_values(content: &str) -> (Self, BTreeMap<String, String>) {
        let raw: BTreeMap<String, String> = content
            .lines()
            .filter_map(|line| line.split_once('='))
            .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
            .collect();

        let text = |key: &str| raw.get(key).filter(|v| !v.is_empty()).cloned();
        let metadata = BackupMetadata {
            python_version: text("python_version"),
            platform: text("platform").unwrap_or_default(),
            created_by: text("created_by").unwrap_or_default(),
            created_at: text("created_at")
                .and_then(|v| DateTime::parse_from_rfc3339(&v).ok())
                .map(|d| d.with_timezone(&Utc))
                .unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
            package_count: text("package_count")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
            is_empty_environment: text("is_empty_environment").is_some_and(|v| v == "true"),
            requirements_sha256: text("requirements_sha256"),
            freeze_error: text("freeze_error"),
        };
        (metadata, raw)
    }
}

enum Storage {
    /// Removed on cleanup or drop
    Temp(TempDir),
    /// Removed on cleanup only
    Persistent,
}

/// Snapshot of installed packages taken before a risky operation.
pub struct EnvironmentBackup {
    backup_path: PathBuf,
    requirements_file: PathBuf,
    package_count: usize,
    is_empty_environment: bool,
    metadata: BackupMetadata,
    storage: Option<Storage>,
}

impl std::fmt::Debug for EnvironmentBackup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvironmentBackup")
            .field("backup_path", &self.backup_path)
            .field("package_count", &self.package_count)
            .field("is_empty_environment", &self.is_empty_environment)
            .field("released", &self.is_released())
            .finish()
    }
}

/// Capture the current environment into a fresh backup directory.
///
/// A failed or timed-out freeze does not fail the call: it yields an empty
/// backup whose metadata records the error.
pub async fn create_environment_backup(
    installer: &dyn PackageInstaller,
    config: &RestoreConfig,
) -> RemedyResult<EnvironmentBackup> {
    let root = config
        .backup_root
        .clone()
        .unwrap_or_else(std::env::temp_dir);
    std::fs::create_dir_all(&root).map_err(|e| RemedyError::io(e, root.clone()))?;
    let dir = tempfile::Builder::new()
        .prefix("remedy_backup_")
        .tempdir_in(&root)
        .map_err(|e| RemedyError::io(e, root.clone()))?;

    let (lines, freeze_error) =
        match tokio::time::timeout(config.command_timeout, installer.freeze()).await {
            Ok(Ok(lines)) => (lines, None),
            Ok(Err(e)) => {
                log::warn!("Package freeze failed, creating empty backup: {}", e);
                (Vec::new(), Some(e.to_string()))
            }
            Err(_) => {
                let e = RemedyError::timeout("package freeze", config.command_timeout);
                log::warn!("{}, creating empty backup", e);
                (Vec::new(), Some(e.to_string()))
            }
        };

    let mut content = lines.join("\n");
    if !content.is_empty() {
        content.push('\n');
    }

    let count = match parse_requirements(&content) {
        Ok(reqs) => package_count(&reqs),
        Err(e) => {
            log::warn!("Frozen environment contains an unparseable line: {}", e);
            lines.len()
        }
    };
    let is_empty_environment = count == 0 && !lines.iter().any(|l| !l.trim().is_empty());

    let requirements_file = dir.path().join(REQUIREMENTS_FILE);
    std::fs::write(&requirements_file, &content)
        .map_err(|e| RemedyError::io(e, requirements_file.clone()))?;

    let metadata = BackupMetadata {
        python_version: installer.interpreter_version().await,
        platform: format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH),
        created_by: whoami::username(),
        created_at: Utc::now(),
        package_count: count,
        is_empty_environment,
        requirements_sha256: Some(sha256_hex(content.as_bytes())),
        freeze_error,
    };
    let metadata_file = dir.path().join(METADATA_FILE);
    std::fs::write(&metadata_file, metadata.to_key_values())
        .map_err(|e| RemedyError::io(e, metadata_file.clone()))?;

    if is_empty_environment {
        log::info!("Created empty-environment backup at {}", dir.path().display());
    } else {
        log::info!(
            "Created backup with {} packages at {}",
            count,
            dir.path().display()
        );
    }

    Ok(EnvironmentBackup {
        backup_path: dir.path().to_path_buf(),
        requirements_file,
        package_count: count,
        is_empty_environment,
        metadata,
        storage: Some(Storage::Temp(dir)),
    })
}

impl EnvironmentBackup {
    /// Load a backup directory written earlier. The returned backup is not
    /// removed on drop, but `cleanup()` still deletes it.
    pub fn open(dir: impl AsRef<Path>) -> RemedyResult<Self> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(RemedyError::InvalidBackup(format!(
                "{} is not a directory",
                dir.display()
            )));
        }

        let metadata_path = dir.join(METADATA_FILE);
        let content = std::fs::read_to_string(&metadata_path)
            .map_err(|e| RemedyError::io(e, metadata_path.clone()))?;
        let (metadata, _) = BackupMetadata::from_key_values(&content);

        Ok(Self {
            backup_path: dir.to_path_buf(),
            requirements_file: dir.join(REQUIREMENTS_FILE),
            package_count: metadata.package_count,
            is_empty_environment: metadata.is_empty_environment,
            metadata,
            storage: Some(Storage::Persistent),
        })
    }

    pub fn backup_path(&self) -> &Path {
        &self.backup_path
    }

    pub fn requirements_file(&self) -> &Path {
        &self.requirements_file
    }

    pub fn package_count(&self) -> usize {
        self.package_count
    }

    pub fn is_empty_environment(&self) -> bool {
        self.is_empty_environment
    }

    pub fn metadata(&self) -> &BackupMetadata {
        &self.metadata
    }

    pub fn is_released(&self) -> bool {
        self.storage.is_none()
    }

    /// Whether the backup can be trusted for a restore
    pub fn is_valid(&self) -> bool {
        let report = BackupValidator::validate_backup(self);
        report.is_valid && report.parsed_package_count == Some(self.package_count)
    }

    /// Keep the directory past the lifetime of this value
    pub fn persist(&mut self) -> RemedyResult<PathBuf> {
        match self.storage.take() {
            Some(Storage::Temp(dir)) => {
                let path = dir.into_path();
                self.storage = Some(Storage::Persistent);
                Ok(path)
            }
            Some(Storage::Persistent) => {
                self.storage = Some(Storage::Persistent);
                Ok(self.backup_path.clone())
            }
            None => Err(RemedyError::BackupReleased(self.backup_path.clone())),
        }
    }

    /// Remove the backup directory. Calling it twice is a no-op.
    pub fn cleanup(&mut self) -> RemedyResult<()> {
        match self.storage.take() {
            Some(Storage::Temp(dir)) => dir
                .close()
                .map_err(|e| RemedyError::io(e, self.backup_path.clone()))?,
            Some(Storage::Persistent) => std::fs::remove_dir_all(&self.backup_path)
                .map_err(|e| RemedyError::io(e, self.backup_path.clone()))?,
            None => return Ok(()),
        }
        log::debug!("Cleaned up backup at {}", self.backup_path.display());
        Ok(())
    }

    /// Read and parse the requirement lines
    pub fn requirements(&self) -> RemedyResult<Vec<super::requirements::Requirement>> {
        if self.is_released() {
            return Err(RemedyError::BackupReleased(self.backup_path.clone()));
        }
        let content = std::fs::read_to_string(&self.requirements_file)
            .map_err(|e| RemedyError::io(e, self.requirements_file.clone()))?;
        parse_requirements(&content)
    }
}

/// Detailed outcome of a backup check
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub metadata: BTreeMap<String, String>,
    /// Named packages in the requirements file, when it parsed
    pub parsed_package_count: Option<usize>,
}

pub struct BackupValidator;

impl BackupValidator {
    pub fn validate_backup(backup: &EnvironmentBackup) -> ValidationResult {
        let mut result = ValidationResult::default();

        if backup.is_released() {
            result.errors.push("Backup has already been cleaned up".to_string());
            return result;
        }
        if !backup.backup_path.is_dir() {
            result.errors.push(format!(
                "Backup directory {} does not exist",
                backup.backup_path.display()
            ));
            return result;
        }

        match std::fs::read_to_string(backup.backup_path.join(METADATA_FILE)) {
            Ok(content) => {
                let (_, raw) = BackupMetadata::from_key_values(&content);
                for key in METADATA_KEYS {
                    if !raw.contains_key(*key) {
                        result.warnings.push(format!("Metadata is missing '{}'", key));
                    }
                }
                result.metadata = raw;
            }
            Err(e) => result.warnings.push(format!("Metadata file unreadable: {}", e)),
        }

        if let Some(err) = &backup.metadata.freeze_error {
            result
                .errors
                .push(format!("Environment capture failed: {}", err));
        }

        let content = match std::fs::read_to_string(&backup.requirements_file) {
            Ok(c) => c,
            Err(e) => {
                result.errors.push(format!(
                    "Requirements file not found or unreadable at {}: {}",
                    backup.requirements_file.display(),
                    e
                ));
                return result;
            }
        };

        if let Some(expected) = &backup.metadata.requirements_sha256 {
            match sha256_file(&backup.requirements_file) {
                Ok(actual) if &actual == expected => {}
                Ok(_) => result
                    .errors
                    .push("Requirements checksum mismatch".to_string()),
                Err(e) => result.errors.push(e.to_string()),
            }
        }

        match parse_requirements(&content) {
            Ok(reqs) => {
                let parsed = package_count(&reqs);
                result.parsed_package_count = Some(parsed);
                if parsed != backup.package_count {
                    result.warnings.push(format!(
                        "Package count mismatch: metadata says {}, requirements file has {}",
                        backup.package_count, parsed
                    ));
                }
                if backup.is_empty_environment && !reqs.is_empty() {
                    result.warnings.push(
                        "Backup is flagged empty but lists requirements".to_string(),
                    );
                }
                if !backup.is_empty_environment && reqs.is_empty() && !backup.metadata.freeze_failed()
                {
                    result.warnings.push(
                        "Backup lists no requirements but is not flagged empty".to_string(),
                    );
                }
            }
            Err(e) => result.errors.push(e.to_string()),
        }

        let age = Utc::now() - backup.metadata.created_at;
        if age.num_hours() > STALE_AFTER_HOURS {
            result.warnings.push(format!(
                "Backup is {} hours old and may not reflect the current environment",
                age.num_hours()
            ));
        }

        result.is_valid = result.errors.is_empty();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::restore::testing::MemoryInstaller;

    fn config_in(root: &Path) -> RestoreConfig {
        RestoreConfig {
            backup_root: Some(root.to_path_buf()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_backup_captures_freeze() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let root = TempDir::new()?;
        let installer = MemoryInstaller::with_packages(&[("requests", "2.31.0"), ("urllib3", "2.2.1")])
            .with_extra_freeze_line("-e git+https://github.com/org/tool.git#egg=tool");

        let backup = create_environment_backup(&installer, &config_in(root.path())).await?;

        assert!(backup.is_valid());
        assert_eq!(backup.package_count(), 2);
        assert!(!backup.is_empty_environment());
        assert!(backup
            .backup_path()
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("remedy_backup_"));
        let content = std::fs::read_to_string(backup.requirements_file())?;
        assert!(content.contains("requests==2.31.0"));
        assert!(content.contains("-e git+https://github.com/org/tool.git#egg=tool"));
        assert_eq!(backup.metadata().python_version.as_deref(), Some("3.11.9"));
        Ok(())
    }

    #[tokio::test]
    async fn test_empty_environment_backup() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let root = TempDir::new()?;
        let installer = MemoryInstaller::with_packages(&[]);
        let backup = create_environment_backup(&installer, &config_in(root.path())).await?;

        assert!(backup.is_empty_environment());
        assert_eq!(backup.package_count(), 0);
        assert!(!backup.metadata().freeze_failed());
        assert!(backup.is_valid());
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_freeze_is_recorded() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let root = TempDir::new()?;
        let installer = MemoryInstaller::with_packages(&[("requests", "2.31.0")])
            .with_freeze_error("pip: command not found");
        let backup = create_environment_backup(&installer, &config_in(root.path())).await?;

        assert!(backup.is_empty_environment());
        assert!(backup.metadata().freeze_failed());
        assert!(!backup.is_valid());

        let reopened = EnvironmentBackup::open(backup.backup_path())?;
        assert!(reopened
            .metadata()
            .freeze_error
            .as_deref()
            .unwrap()
            .contains("command not found"));
        Ok(())
    }

    #[tokio::test]
    async fn test_tampered_requirements_invalidate_backup(
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let root = TempDir::new()?;
        let installer = MemoryInstaller::with_packages(&[("requests", "2.31.0")]);
        let backup = create_environment_backup(&installer, &config_in(root.path())).await?;

        std::fs::write(backup.requirements_file(), "requests==2.0.0\n")?;
        let report = BackupValidator::validate_backup(&backup);
        assert!(!report.is_valid);
        assert!(report.errors.iter().any(|e| e.contains("checksum mismatch")));
        assert!(!backup.is_valid());
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_requirements_file() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let root = TempDir::new()?;
        let installer = MemoryInstaller::with_packages(&[("requests", "2.31.0")]);
        let backup = create_environment_backup(&installer, &config_in(root.path())).await?;

        std::fs::remove_file(backup.requirements_file())?;
        let report = BackupValidator::validate_backup(&backup);
        assert!(!report.is_valid);
        assert!(report.errors[0].starts_with("Requirements file not found"));
        Ok(())
    }

    #[tokio::test]
    async fn test_cleanup_releases_directory() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let root = TempDir::new()?;
        let installer = MemoryInstaller::with_packages(&[("requests", "2.31.0")]);
        let mut backup = create_environment_backup(&installer, &config_in(root.path())).await?;
        let path = backup.backup_path().to_path_buf();

        backup.cleanup()?;
        assert!(!path.exists());
        assert!(backup.is_released());
        assert!(!backup.is_valid());
        assert!(matches!(
            backup.requirements(),
            Err(RemedyError::BackupReleased(_))
        ));
        backup.cleanup()?;
        Ok(())
    }

    #[tokio::test]
    async fn test_drop_removes_temp_backup() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let root = TempDir::new()?;
        let installer = MemoryInstaller::with_packages(&[("requests", "2.31.0")]);
        let backup = create_environment_backup(&installer, &config_in(root.path())).await?;
        let path = backup.backup_path().to_path_buf();
        drop(backup);
        assert!(!path.exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_persist_and_reopen() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let root = TempDir::new()?;
        let installer = MemoryInstaller::with_packages(&[("requests", "2.31.0"), ("idna", "3.7")]);
        let mut backup = create_environment_backup(&installer, &config_in(root.path())).await?;
        let path = backup.persist()?;
        drop(backup);
        assert!(path.exists());

        let mut reopened = EnvironmentBackup::open(&path)?;
        assert_eq!(reopened.package_count(), 2);
        assert!(reopened.is_valid());
        let report = BackupValidator::validate_backup(&reopened);
        assert_eq!(report.metadata.get("package_count").map(String::as_str), Some("2"));

        reopened.cleanup()?;
        assert!(!path.exists());
        Ok(())
    }

    #[test]
    fn test_stale_and_missing_keys_warn() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(REQUIREMENTS_FILE), "a==1.0\n").unwrap();
        std::fs::write(
            dir.path().join(METADATA_FILE),
            "package_count=1\ncreated_at=2020-01-01T00:00:00+00:00\n",
        )
        .unwrap();

        let backup = EnvironmentBackup::open(dir.path()).unwrap();
        let report = BackupValidator::validate_backup(&backup);
        assert!(report.is_valid);
        assert!(report.warnings.iter().any(|w| w.contains("hours old")));
        assert!(report.warnings.iter().any(|w| w.contains("'platform'")));
        assert!(backup.is_valid());
    }

    #[test]
    fn test_count_mismatch_is_warning_but_not_valid() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(REQUIREMENTS_FILE), "a==1.0\nb==2.0\n").unwrap();
        std::fs::write(dir.path().join(METADATA_FILE), "package_count=5\n").unwrap();

        let backup = EnvironmentBackup::open(dir.path()).unwrap();
        let report = BackupValidator::validate_backup(&backup);
        assert!(report.is_valid);
        assert!(report.warnings.iter().any(|w| w.contains("Package count mismatch")));
        assert!(!backup.is_valid());
    }
}
