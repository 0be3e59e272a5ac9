//! In-memory installer for restore and upgrade tests.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Duration;

use super::requirements::{normalize_name, parse_line, Requirement, PROTECTED_PACKAGES};
use crate::errors::{RemedyError, RemedyResult};
use crate::installer::PackageInstaller;

/// Version reported for packages installed without a pin
pub const LATEST: &str = "99.0";

#[derive(Default)]
struct State {
    installed: BTreeMap<String, String>,
    extra_freeze_lines: Vec<String>,
    freeze_error: Option<String>,
    list_error: Option<String>,
    /// Keyed by `name` or `name==version`
    install_failures: HashMap<String, String>,
    reinstall_failures: HashMap<String, String>,
    uninstall_failures: HashMap<String, String>,
    reinstall_overrides: HashMap<String, String>,
    reinstall_delay: Option<Duration>,
    calls: Vec<String>,
}

pub struct MemoryInstaller {
    state: Mutex<State>,
}

impl MemoryInstaller {
    pub fn with_packages(packages: &[(&str, &str)]) -> Self {
        let mut state = State::default();
        for tool in PROTECTED_PACKAGES {
            state.installed.insert(tool.to_string(), "24.0".to_string());
        }
        for (name, version) in packages {
            state
                .installed
                .insert(normalize_name(name), version.to_string());
        }
        Self {
            state: Mutex::new(state),
        }
    }

    pub fn with_extra_freeze_line(self, line: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .extra_freeze_lines
            .push(line.to_string());
        self
    }

    pub fn with_freeze_error(self, message: &str) -> Self {
        self.state.lock().unwrap().freeze_error = Some(message.to_string());
        self
    }

    pub fn add(&self, name: &str, version: &str) {
        self.state
            .lock()
            .unwrap()
            .installed
            .insert(normalize_name(name), version.to_string());
    }

    pub fn set_version(&self, name: &str, version: &str) {
        self.add(name, version);
    }

    pub fn version_of(&self, name: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .installed
            .get(&normalize_name(name))
            .cloned()
    }

    pub fn installed_names(&self) -> Vec<String> {
        self.state.lock().unwrap().installed.keys().cloned().collect()
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn fail_install(&self, name: &str, message: &str) {
        self.state
            .lock()
            .unwrap()
            .install_failures
            .insert(normalize_name(name), message.to_string());
    }

    pub fn fail_install_version(&self, name: &str, version: &str, message: &str) {
        self.state
            .lock()
            .unwrap()
            .install_failures
            .insert(format!("{}=={}", normalize_name(name), version), message.to_string());
    }

    pub fn fail_reinstall(&self, name: &str, message: &str) {
        self.state
            .lock()
            .unwrap()
            .reinstall_failures
            .insert(normalize_name(name), message.to_string());
    }

    pub fn fail_uninstall(&self, name: &str, message: &str) {
        self.state
            .lock()
            .unwrap()
            .uninstall_failures
            .insert(normalize_name(name), message.to_string());
    }

    pub fn fail_list(&self, message: &str) {
        self.state.lock().unwrap().list_error = Some(message.to_string());
    }

    /// Reinstalling `name` lands `version` instead of the requested one
    pub fn pin_after_reinstall(&self, name: &str, version: &str) {
        self.state
            .lock()
            .unwrap()
            .reinstall_overrides
            .insert(normalize_name(name), version.to_string());
    }

    pub fn delay_reinstall(&self, delay: Duration) {
        self.state.lock().unwrap().reinstall_delay = Some(delay);
    }

    /// Resolve an install request to a package key and the version it lands
    fn target(name: &str, version: Option<&str>) -> Option<(String, String)> {
        match version {
            Some(v) => Some((normalize_name(name), v.to_string())),
            None => match parse_line(name).ok().flatten()? {
                Requirement::Pinned { name, version } => Some((normalize_name(&name), version)),
                Requirement::Unpinned { name, .. } => Some((normalize_name(&name), LATEST.to_string())),
                Requirement::Verbatim(_) => None,
            },
        }
    }

    fn failure(failures: &HashMap<String, String>, key: &str, version: &str) -> Option<String> {
        failures
            .get(&format!("{}=={}", key, version))
            .or_else(|| failures.get(key))
            .cloned()
    }

    fn apply(
        &self,
        operation: &str,
        name: &str,
        version: Option<&str>,
    ) -> RemedyResult<()> {
        let mut state = self.state.lock().unwrap();
        let label = match version {
            Some(v) => format!("{}=={}", name, v),
            None => name.to_string(),
        };
        state.calls.push(format!("{} {}", operation, label));

        let Some((key, mut landed)) = Self::target(name, version) else {
            return Ok(());
        };
        let failures = if operation == "reinstall" {
            &state.reinstall_failures
        } else {
            &state.install_failures
        };
        if let Some(message) = Self::failure(failures, &key, &landed) {
            return Err(RemedyError::installer(operation, name, message));
        }
        if operation == "reinstall" {
            if let Some(v) = state.reinstall_overrides.get(&key) {
                landed = v.clone();
            }
        }
        state.installed.insert(key, landed);
        Ok(())
    }
}

#[async_trait]
impl PackageInstaller for MemoryInstaller {
    async fn freeze(&self) -> RemedyResult<Vec<String>> {
        let state = self.state.lock().unwrap();
        if let Some(message) = &state.freeze_error {
            return Err(RemedyError::installer("freeze", "environment", message.clone()));
        }
        let mut lines: Vec<String> = state
            .installed
            .iter()
            .filter(|(name, _)| !PROTECTED_PACKAGES.contains(&name.as_str()))
            .map(|(name, version)| format!("{}=={}", name, version))
            .collect();
        lines.extend(state.extra_freeze_lines.iter().cloned());
        Ok(lines)
    }

    async fn install(&self, name: &str, version: Option<&str>) -> RemedyResult<()> {
        self.apply("install", name, version)
    }

    async fn reinstall(&self, name: &str, version: Option<&str>) -> RemedyResult<()> {
        let delay = self.state.lock().unwrap().reinstall_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.apply("reinstall", name, version)
    }

    async fn uninstall(&self, name: &str) -> RemedyResult<()> {
        let mut state = self.state.lock().unwrap();
        let key = normalize_name(name);
        state.calls.push(format!("uninstall {}", key));
        if let Some(message) = state.uninstall_failures.get(&key).cloned() {
            return Err(RemedyError::installer("uninstall", name, message));
        }
        state.installed.remove(&key);
        Ok(())
    }

    async fn list_installed(&self) -> RemedyResult<Vec<String>> {
        let state = self.state.lock().unwrap();
        if let Some(message) = &state.list_error {
            return Err(RemedyError::installer("list", "environment", message.clone()));
        }
        Ok(state
            .installed
            .iter()
            .map(|(name, version)| format!("{}=={}", name, version))
            .collect())
    }

    async fn interpreter_version(&self) -> Option<String> {
        Some("3.11.9".to_string())
    }
}
