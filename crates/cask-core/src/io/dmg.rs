//! DMG handling via hdiutil

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::command::{CommandRunner, SystemCommand};
use crate::error::{CaskError, Result};

const HDIUTIL: &str = "/usr/bin/hdiutil";

/// Represents a mounted volume. Dropping this struct will detach it.
pub struct MountPoint<'a> {
    pub path: PathBuf,
    runner: &'a dyn CommandRunner,
}

impl std::fmt::Debug for MountPoint<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MountPoint")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl Drop for MountPoint<'_> {
    fn drop(&mut self) {
        if let Err(e) = detach(self.runner, &self.path) {
            warn!(mount = %self.path.display(), error = %e, "Failed to detach volume");
        }
    }
}

/// Attach a DMG file and return every volume it mounted.
///
/// # Errors
///
/// Fails if `hdiutil attach` fails or reports no mount point.
pub fn attach<'a>(runner: &'a dyn CommandRunner, dmg_path: &Path) -> Result<Vec<MountPoint<'a>>> {
    let output = runner.run(
        &SystemCommand::new(HDIUTIL)
            .args(["attach", "-nobrowse", "-readonly", "-noidme"])
            .arg(dmg_path),
    )?;

    // Format: /dev/diskXsY <TYPE> <MOUNTPOINT>
    let mounts: Vec<MountPoint<'a>> = output
        .stdout
        .lines()
        .filter_map(|line| line.find("/Volumes/").map(|idx| line[idx..].trim()))
        .map(|path| MountPoint {
            path: PathBuf::from(path),
            runner,
        })
        .collect();

    if mounts.is_empty() {
        return Err(CaskError::io(format!("attaching {}", dmg_path.display()))(
            std::io::Error::other("could not find mount point in hdiutil output"),
        ));
    }

    debug!(dmg = %dmg_path.display(), mounts = mounts.len(), "Attached");
    Ok(mounts)
}

/// Detach a volume
///
/// # Errors
///
/// Fails after three unsuccessful attempts.
pub fn detach(runner: &dyn CommandRunner, mount_point: &Path) -> Result<()> {
    // Retry: the volume is often still busy right after copying.
    for _ in 0..3 {
        let out = runner.run(
            &SystemCommand::new(HDIUTIL)
                .arg("detach")
                .arg(mount_point)
                .arg("-force")
                .allow_failure(),
        );
        if out.is_ok_and(|o| o.success) {
            return Ok(());
        }
        std::thread::sleep(std::time::Duration::from_millis(500));
    }

    Err(CaskError::io(format!("detaching {}", mount_point.display()))(
        std::io::Error::other("hdiutil detach failed"),
    ))
}
