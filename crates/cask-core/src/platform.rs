//! Host operating system probes and security side effects.
//!
//! Everything here is opaque to the installer: it asks questions and fires
//! side effects through [`Platform`] and never inspects how they are done.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use cask_schema::{Arch, OsVersion};
use tracing::debug;

use crate::command::{CommandRunner, SystemCommand};
use crate::error::{CaskError, CommandError, Result};

const X11_PATHS: &[&str] = &[
    "/Applications/Utilities/XQuartz.app",
    "/opt/X11/bin/Xquartz",
    "/usr/X11/bin/X",
];

const TCC_DB: &str = "/Library/Application Support/com.apple.TCC/TCC.db";
const LEGACY_ACCESSIBILITY_FLAG: &str = "/private/var/db/.AccessibilityAPIEnabled";
const QUARANTINE_ATTR: &str = "com.apple.quarantine";

pub trait Platform: Send + Sync {
    /// Running macOS release, `None` on other systems.
    fn macos_version(&self) -> Option<OsVersion>;

    fn arch(&self) -> Arch;

    fn x11_installed(&self) -> bool;

    fn formula_installed(&self, name: &str) -> bool;

    /// Install a formula through the system package manager.
    ///
    /// # Errors
    ///
    /// Any failure of the package manager.
    fn install_formula(&self, name: &str) -> Result<()>;

    /// Grant the given application bundles accessibility access.
    ///
    /// # Errors
    ///
    /// Any failure to update the permission store.
    fn enable_accessibility_access(&self, apps: &[PathBuf]) -> Result<()>;

    /// Revoke what [`Platform::enable_accessibility_access`] granted.
    ///
    /// # Errors
    ///
    /// Any failure to update the permission store.
    fn disable_accessibility_access(&self, apps: &[PathBuf]) -> Result<()>;

    /// Mark a staged tree as downloaded from the internet.
    ///
    /// # Errors
    ///
    /// Any failure to set the attribute.
    fn quarantine(&self, path: &Path) -> Result<()>;
}

impl<T: Platform + ?Sized> Platform for Arc<T> {
    fn macos_version(&self) -> Option<OsVersion> {
        (**self).macos_version()
    }
    fn arch(&self) -> Arch {
        (**self).arch()
    }
    fn x11_installed(&self) -> bool {
        (**self).x11_installed()
    }
    fn formula_installed(&self, name: &str) -> bool {
        (**self).formula_installed(name)
    }
    fn install_formula(&self, name: &str) -> Result<()> {
        (**self).install_formula(name)
    }
    fn enable_accessibility_access(&self, apps: &[PathBuf]) -> Result<()> {
        (**self).enable_accessibility_access(apps)
    }
    fn disable_accessibility_access(&self, apps: &[PathBuf]) -> Result<()> {
        (**self).disable_accessibility_access(apps)
    }
    fn quarantine(&self, path: &Path) -> Result<()> {
        (**self).quarantine(path)
    }
}

/// The machine we are running on, probed through system tools.
pub struct HostPlatform {
    runner: Arc<dyn CommandRunner>,
}

impl std::fmt::Debug for HostPlatform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostPlatform").finish_non_exhaustive()
    }
}

impl HostPlatform {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    fn brew(&self) -> Result<PathBuf> {
        which::which("brew").map_err(|e| {
            CaskError::from(CommandError::Spawn {
                command: "brew".to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, e),
            })
        })
    }

    fn bundle_identifier(&self, app: &Path) -> Result<String> {
        let plist = app.join("Contents/Info");
        let out = self.runner.run(
            &SystemCommand::new("/usr/bin/defaults")
                .arg("read")
                .arg(&plist)
                .arg("CFBundleIdentifier"),
        )?;
        Ok(out.stdout.trim().to_string())
    }

    fn tcc(&self, sql: &str) -> Result<()> {
        self.runner.run(
            &SystemCommand::new("/usr/bin/sqlite3")
                .args([TCC_DB, sql])
                .sudo(true),
        )?;
        Ok(())
    }

    fn legacy_accessibility(&self) -> bool {
        let Ok(mavericks) = OsVersion::parse("10.9") else {
            return false;
        };
        self.macos_version().is_some_and(|v| v < mavericks)
    }
}

impl Platform for HostPlatform {
    fn macos_version(&self) -> Option<OsVersion> {
        if !cfg!(target_os = "macos") {
            return None;
        }
        let out = self
            .runner
            .run(&SystemCommand::new("/usr/bin/sw_vers").arg("-productVersion"))
            .ok()?;
        OsVersion::parse(out.stdout.trim()).ok()
    }

    fn arch(&self) -> Arch {
        Arch::current()
    }

    fn x11_installed(&self) -> bool {
        X11_PATHS.iter().any(|p| Path::new(p).exists())
    }

    fn formula_installed(&self, name: &str) -> bool {
        let Ok(brew) = self.brew() else {
            return false;
        };
        self.runner
            .run(
                &SystemCommand::new(brew)
                    .args(["list", "--formula", "--versions", name])
                    .allow_failure(),
            )
            .is_ok_and(|out| out.success && !out.stdout.trim().is_empty())
    }

    fn install_formula(&self, name: &str) -> Result<()> {
        let brew = self.brew()?;
        debug!(formula = name, "Installing formula");
        self.runner
            .run(&SystemCommand::new(brew).args(["install", name]))?;
        Ok(())
    }

    fn enable_accessibility_access(&self, apps: &[PathBuf]) -> Result<()> {
        if self.legacy_accessibility() {
            self.runner.run(
                &SystemCommand::new("/usr/bin/touch")
                    .arg(LEGACY_ACCESSIBILITY_FLAG)
                    .sudo(true),
            )?;
            return Ok(());
        }
        for app in apps {
            let id = self.bundle_identifier(app)?;
            self.tcc(&format!(
                "INSERT OR REPLACE INTO access VALUES('kTCCServiceAccessibility','{id}',0,1,1,NULL);"
            ))?;
        }
        Ok(())
    }

    fn disable_accessibility_access(&self, apps: &[PathBuf]) -> Result<()> {
        if self.legacy_accessibility() {
            return Ok(());
        }
        for app in apps {
            let id = self.bundle_identifier(app)?;
            self.tcc(&format!(
                "DELETE FROM access WHERE client='{id}' AND service='kTCCServiceAccessibility';"
            ))?;
        }
        Ok(())
    }

    fn quarantine(&self, path: &Path) -> Result<()> {
        if !cfg!(target_os = "macos") {
            return Ok(());
        }
        let stamp = format!("0181;{:x};cask;", chrono::Utc::now().timestamp());
        self.runner.run(
            &SystemCommand::new("/usr/bin/xattr")
                .args(["-r", "-w", QUARANTINE_ATTR, &stamp])
                .arg(path),
        )?;
        Ok(())
    }
}
