//! Package installer capability.
//!
//! The restore and upgrade machinery only talks to the package manager
//! through [`PackageInstaller`]. [`PipInstaller`] drives `python -m pip`.

mod pip;

pub use pip::PipInstaller;

use async_trait::async_trait;

use crate::errors::RemedyResult;

/// Narrow contract over a package manager.
///
/// `freeze` and `list_installed` return requirement lines: `name==version`
/// for ordinary installs, anything else (editable, VCS or URL installs)
/// verbatim.
#[async_trait]
pub trait PackageInstaller: Send + Sync {
    /// Snapshot of the environment suitable for a later restore
    async fn freeze(&self) -> RemedyResult<Vec<String>>;

    /// Install `name`, pinned to `version` when given. With no version,
    /// `name` may also be a verbatim requirement line.
    async fn install(&self, name: &str, version: Option<&str>) -> RemedyResult<()>;

    /// Reinstall even if the same version is already present
    async fn reinstall(&self, name: &str, version: Option<&str>) -> RemedyResult<()> {
        self.install(name, version).await
    }

    async fn uninstall(&self, name: &str) -> RemedyResult<()>;

    /// Currently installed packages, in the same format as `freeze`
    async fn list_installed(&self) -> RemedyResult<Vec<String>>;

    /// Interpreter version, recorded in backup metadata when known
    async fn interpreter_version(&self) -> Option<String> {
        None
    }
}
