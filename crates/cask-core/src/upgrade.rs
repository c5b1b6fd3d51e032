//! Upgrade orchestration.
//!
//! The old version is set aside by renaming its staged and metadata
//! directories, not copying them, so the switch needs no extra disk space.
//! The backup is deleted once the new version is active and renamed back
//! if anything fails.

use std::fs;
use std::path::{Path, PathBuf};

use cask_schema::{Cask, Version};
use tracing::{info, warn};

use crate::context::Context;
use crate::error::{CaskError, Result};
use crate::installer::Installer;
use crate::io::remove_path;
use crate::metadata::{Metadata, UPGRADE_SUFFIX};

/// The renamed directories of the version being replaced.
#[derive(Debug)]
pub struct Backup {
    pub version: Version,
    pub staged: PathBuf,
    pub metadata: PathBuf,
}

fn with_suffix(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(UPGRADE_SUFFIX);
    PathBuf::from(name)
}

fn rename(from: &Path, to: &Path) -> Result<()> {
    fs::rename(from, to).map_err(CaskError::io(format!(
        "renaming {} to {}",
        from.display(),
        to.display()
    )))
}

impl Installer<'_> {
    /// Deactivate the installed version and rename its directories aside.
    ///
    /// Called on the installer of the version being replaced.
    ///
    /// # Errors
    ///
    /// [`CaskError::NotInstalled`], artifact or rename failures.
    pub fn start_upgrade(&self) -> Result<Backup> {
        let version = self
            .metadata
            .installed_version()?
            .ok_or_else(|| CaskError::NotInstalled {
                token: self.cask.token.clone(),
            })?;
        let staged = self.metadata.staged_path(&version);

        self.uninstall_artifacts(&self.cask, &staged, true, self.ctx.options.force)?;

        let backup = Backup {
            staged: with_suffix(&staged),
            metadata: with_suffix(&self.metadata.versioned_path(&version)),
            version,
        };
        if staged.exists() {
            rename(&staged, &backup.staged)?;
        }
        rename(&self.metadata.versioned_path(&backup.version), &backup.metadata)?;
        info!(token = %self.cask.token, version = %backup.version, "Backed up for upgrade");
        Ok(backup)
    }

    /// Drop the backup once the new version is active.
    ///
    /// # Errors
    ///
    /// I/O failures while removing.
    pub fn finalize_upgrade(&self, backup: Backup) -> Result<()> {
        remove_path(&backup.staged)?;
        remove_path(&backup.metadata)?;
        info!(token = %self.cask.token, version = %backup.version, "Removed upgrade backup");
        Ok(())
    }

    /// Rename the backup into place and activate it again.
    ///
    /// # Errors
    ///
    /// Rename or artifact failures.
    pub fn revert_upgrade(&self, backup: Backup) -> Result<()> {
        self.ctx
            .reporter
            .warning(&format!("Reverting upgrade for Cask {}", self.cask.token));

        let staged = self.metadata.staged_path(&backup.version);
        let versioned = self.metadata.versioned_path(&backup.version);
        if backup.staged.exists() {
            remove_path(&staged)?;
            rename(&backup.staged, &staged)?;
        }
        if backup.metadata.exists() {
            remove_path(&versioned)?;
            rename(&backup.metadata, &versioned)?;
        }

        self.install_artifacts(&staged)
    }
}

/// Replace the installed version of `new.token` with `new`.
///
/// Returns `false` when the installed version is already current.
///
/// # Errors
///
/// [`CaskError::NotInstalled`] when there is nothing to upgrade; otherwise
/// the error of the failing step, after the old version was restored.
pub async fn upgrade(ctx: &Context, new: Cask) -> Result<bool> {
    let metadata = Metadata::new(&ctx.config.caskroom, &new.token);
    if !metadata.is_installed()? {
        return Err(CaskError::NotInstalled { token: new.token });
    }
    let old_cask = metadata.installed_cask()?;
    if old_cask.version == new.version && !new.version.is_latest() {
        ctx.reporter.info(&format!(
            "{} {} is already up to date",
            new.token, new.version
        ));
        return Ok(false);
    }

    ctx.reporter.section(&format!(
        "Upgrading {} {} -> {}",
        new.token, old_cask.version, new.version
    ));

    let mut old = Installer::new(ctx, old_cask);
    old.upgrade = true;
    let mut new = Installer::new(ctx, new);
    new.upgrade = true;

    // Nothing on disk changes until the new version is downloaded and verified.
    new.check_conflicts()?;
    if let Some(text) = &new.cask.caveats {
        ctx.reporter.caveats(&new.cask.token, text);
    }
    let fetched = new.fetch().await?;

    let backup = old.start_upgrade()?;

    // stage and install_artifacts purge the new version themselves on failure.
    let result = new
        .stage(&fetched)
        .and_then(|staged| new.install_artifacts(&staged.path));

    match result {
        Ok(()) => {
            old.finalize_upgrade(backup)?;
            ctx.reporter.success(&format!(
                "{} was successfully upgraded to {}!",
                new.cask.token, new.cask.version
            ));
            Ok(true)
        }
        Err(e) => {
            if let Err(revert) = old.revert_upgrade(backup) {
                warn!(token = %old.cask.token, error = %revert, "Reverting upgrade failed");
                ctx.reporter
                    .error(&format!("Could not restore the previous version: {revert}"));
            }
            Err(e)
        }
    }
}
