//! Filesystem and network I/O: downloads, locks, containers and disk images.

pub mod dmg;
pub mod download;
pub mod extract;
pub mod lock;

use std::fs;
use std::io;
use std::path::Path;

use crate::error::{CaskError, Result};

/// Remove a file, symlink or directory tree. A missing path is not an error.
pub(crate) fn remove_path(path: &Path) -> Result<()> {
    let result = if path.is_dir() && !path.is_symlink() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    match result {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(CaskError::io(format!("removing {}", path.display()))(e)),
    }
}
