//! Per-download advisory lock.

use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use fs4::FileExt;
use tracing::debug;

use crate::error::{CaskError, Result};

/// Exclusive `flock` on `<lock_dir>/<name>.lock`, released on drop.
#[derive(Debug)]
pub struct DownloadLock {
    file: File,
    path: PathBuf,
}

impl DownloadLock {
    /// Take the lock without waiting.
    ///
    /// # Errors
    ///
    /// [`CaskError::Locked`] when another process holds it; `Io` if the lock
    /// file cannot be created.
    pub fn acquire(lock_dir: &Path, name: &str) -> Result<Self> {
        fs::create_dir_all(lock_dir)
            .map_err(CaskError::io(format!("creating {}", lock_dir.display())))?;

        let path = lock_dir.join(format!("{name}.lock"));
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(CaskError::io(format!("opening {}", path.display())))?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                debug!(lock = %path.display(), "Acquired download lock");
                Ok(Self { file, path })
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => Err(CaskError::Locked { path }),
            Err(err) => Err(CaskError::io(format!("locking {}", path.display()))(err)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DownloadLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}
