use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use super::PackageInstaller;
use crate::errors::{RemedyError, RemedyResult};

/// [`PackageInstaller`] backed by `<python> -m pip`.
#[derive(Debug, Clone)]
pub struct PipInstaller {
    python: String,
    command_timeout: Duration,
}

impl PipInstaller {
    pub fn new(python: impl Into<String>, command_timeout: Duration) -> Self {
        Self {
            python: python.into(),
            command_timeout,
        }
    }

    /// Run pip and return its stdout. Non-zero exit becomes an installer
    /// error carrying pip's stderr.
    async fn run(&self, operation: &str, package: &str, args: &[&str]) -> RemedyResult<String> {
        let mut cmd = Command::new(&self.python);
        cmd.arg("-m")
            .arg("pip")
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        log::debug!("Running {} -m pip {}", self.python, args.join(" "));

        let output = tokio::time::timeout(self.command_timeout, cmd.output())
            .await
            .map_err(|_| RemedyError::timeout(format!("pip {}", operation), self.command_timeout))?
            .map_err(|e| RemedyError::installer(operation, package, e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let message = if stderr.trim().is_empty() {
                format!("pip {} exited with {}", operation, output.status)
            } else {
                stderr.trim().to_string()
            };
            return Err(RemedyError::installer(operation, package, message));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn lines(stdout: &str) -> Vec<String> {
        stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// Command-line arguments naming one requirement
fn requirement_args(name: &str, version: Option<&str>) -> Vec<String> {
    match version {
        Some(v) => vec![format!("{}=={}", name, v)],
        None => match name.strip_prefix("-e ") {
            Some(target) => vec!["-e".to_string(), target.trim().to_string()],
            None => vec![name.to_string()],
        },
    }
}

#[async_trait]
impl PackageInstaller for PipInstaller {
    async fn freeze(&self) -> RemedyResult<Vec<String>> {
        let stdout = self.run("freeze", "environment", &["freeze"]).await?;
        Ok(Self::lines(&stdout))
    }

    async fn install(&self, name: &str, version: Option<&str>) -> RemedyResult<()> {
        let requirement = requirement_args(name, version);
        let mut args = vec!["install", "--disable-pip-version-check"];
        args.extend(requirement.iter().map(String::as_str));
        self.run("install", name, &args).await.map(|_| ())
    }

    async fn reinstall(&self, name: &str, version: Option<&str>) -> RemedyResult<()> {
        let requirement = requirement_args(name, version);
        let mut args = vec![
            "install",
            "--disable-pip-version-check",
            "--force-reinstall",
            "--no-deps",
        ];
        args.extend(requirement.iter().map(String::as_str));
        self.run("reinstall", name, &args).await.map(|_| ())
    }

    async fn uninstall(&self, name: &str) -> RemedyResult<()> {
        self.run("uninstall", name, &["uninstall", "-y", name])
            .await
            .map(|_| ())
    }

    async fn list_installed(&self) -> RemedyResult<Vec<String>> {
        let stdout = self
            .run("list", "environment", &["list", "--format=freeze"])
            .await?;
        Ok(Self::lines(&stdout))
    }

    async fn interpreter_version(&self) -> Option<String> {
        let output = tokio::time::timeout(
            self.command_timeout,
            Command::new(&self.python)
                .arg("--version")
                .kill_on_drop(true)
                .output(),
        )
        .await
        .ok()?
        .ok()?;

        // Older interpreters print the version on stderr
        let text = if output.stdout.is_empty() {
            String::from_utf8_lossy(&output.stderr).into_owned()
        } else {
            String::from_utf8_lossy(&output.stdout).into_owned()
        };
        text.trim()
            .strip_prefix("Python ")
            .map(|v| v.trim().to_string())
    }
}
