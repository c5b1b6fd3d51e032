//! Versioned metadata store.
//!
//! Layout under `<caskroom>/<token>/`:
//!
//! ```text
//! <version>/                              staged sources
//! .metadata/<version>/<timestamp>/        one per install of that version
//! .metadata/<version>/<timestamp>/Casks/<token>.toml
//! ```
//!
//! Timestamps are fixed-width UTC (`YYYYMMDDHHMMSS.fff`), so the
//! lexicographically last directory is also the most recent one.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use cask_schema::{Cask, Token, Version};
use chrono::Utc;
use tracing::debug;

use crate::error::{CaskError, Result};
use crate::io::remove_path;

const METADATA_DIR: &str = ".metadata";
const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S%.3f";
/// Suffix of staged and metadata directories set aside during an upgrade.
pub const UPGRADE_SUFFIX: &str = ".upgrading";
/// Metadata subdirectories that survive a purge of versioned files.
pub const PERSISTENT_METADATA_SUBDIRS: &[&str] = &["gpg"];

/// Which timestamped directory of a version to address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Timestamp {
    /// The most recent existing one.
    Latest,
    /// The one for this process. Fixed on first use and shared by every
    /// [`Metadata`], so later writes never sort before earlier ones.
    Now,
    /// An explicit directory name.
    At(String),
}

#[derive(Debug)]
pub struct Metadata {
    token: Token,
    root: PathBuf,
}

impl Metadata {
    pub fn new(caskroom: &Path, token: &Token) -> Self {
        Self {
            token: token.clone(),
            root: caskroom.join(token),
        }
    }

    /// `<caskroom>/<token>`
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<caskroom>/<token>/<version>`
    pub fn staged_path(&self, version: &Version) -> PathBuf {
        self.root.join(version)
    }

    pub fn metadata_root(&self) -> PathBuf {
        self.root.join(METADATA_DIR)
    }

    /// `<caskroom>/<token>/.metadata/<version>`
    pub fn versioned_path(&self, version: &Version) -> PathBuf {
        self.metadata_root().join(version)
    }

    fn now() -> &'static str {
        static NOW: OnceLock<String> = OnceLock::new();
        NOW.get_or_init(|| Utc::now().format(TIMESTAMP_FORMAT).to_string())
    }

    /// Resolve a timestamped metadata directory.
    ///
    /// Without `create` nothing is written. `Latest` yields `None` when the
    /// version has no timestamp directory yet.
    ///
    /// # Errors
    ///
    /// I/O failures while listing or creating directories.
    pub fn timestamped_path(
        &self,
        version: &Version,
        timestamp: &Timestamp,
        create: bool,
    ) -> Result<Option<PathBuf>> {
        let versioned = self.versioned_path(version);
        let path = match timestamp {
            Timestamp::Latest => latest_child(&versioned)?.map(|name| versioned.join(name)),
            Timestamp::Now => Some(versioned.join(Self::now())),
            Timestamp::At(name) => Some(versioned.join(name)),
        };

        if create && let Some(path) = &path {
            fs::create_dir_all(path)
                .map_err(CaskError::io(format!("creating {}", path.display())))?;
            debug!(path = %path.display(), "Created metadata directory");
        }
        Ok(path)
    }

    /// Resolve a named subdirectory of a timestamped metadata directory.
    ///
    /// # Errors
    ///
    /// [`CaskError::Metadata`] for an empty leaf, or when asked to create a
    /// directory under `Latest` (which would be ambiguous).
    pub fn subdir(
        &self,
        version: &Version,
        leaf: &str,
        timestamp: &Timestamp,
        create: bool,
    ) -> Result<Option<PathBuf>> {
        if leaf.is_empty() {
            return Err(CaskError::Metadata(
                "cannot access a metadata subdirectory with an empty name".to_string(),
            ));
        }
        if create && *timestamp == Timestamp::Latest {
            return Err(CaskError::Metadata(
                "cannot create a metadata subdirectory for the latest timestamp".to_string(),
            ));
        }

        let Some(parent) = self.timestamped_path(version, timestamp, create)? else {
            return Ok(None);
        };
        let path = parent.join(leaf);
        if create {
            fs::create_dir_all(&path)
                .map_err(CaskError::io(format!("creating {}", path.display())))?;
        }
        Ok(Some(path))
    }

    /// Write a copy of the descriptor for this install.
    ///
    /// # Errors
    ///
    /// Serialization or I/O failures.
    pub fn save_descriptor(&self, cask: &Cask) -> Result<PathBuf> {
        let dir = self
            .subdir(&cask.version, "Casks", &Timestamp::Now, true)?
            .ok_or_else(|| CaskError::Metadata("no metadata directory".to_string()))?;
        let path = dir.join(format!("{}.toml", cask.token));
        fs::write(&path, cask.to_toml()?)
            .map_err(CaskError::io(format!("writing {}", path.display())))?;
        Ok(path)
    }

    /// Path of the most recently saved descriptor for `version`, if any.
    ///
    /// # Errors
    ///
    /// I/O failures while listing directories.
    pub fn saved_descriptor(&self, version: &Version) -> Result<Option<PathBuf>> {
        Ok(self
            .subdir(version, "Casks", &Timestamp::Latest, false)?
            .map(|dir| dir.join(format!("{}.toml", self.token)))
            .filter(|p| p.is_file()))
    }

    /// Versions with at least one timestamp directory, most recently installed last.
    ///
    /// Versions set aside by an in-progress upgrade are not listed.
    ///
    /// # Errors
    ///
    /// I/O failures while listing directories.
    pub fn installed_versions(&self) -> Result<Vec<Version>> {
        let mut found = Vec::new();
        for name in child_dirs(&self.metadata_root())? {
            if name.ends_with(UPGRADE_SUFFIX) {
                continue;
            }
            let version = Version::new(&name);
            if let Some(ts) = latest_child(&self.versioned_path(&version))? {
                found.push((ts, version));
            }
        }
        found.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(found.into_iter().map(|(_, v)| v).collect())
    }

    /// # Errors
    ///
    /// As [`Metadata::installed_versions`].
    pub fn installed_version(&self) -> Result<Option<Version>> {
        Ok(self.installed_versions()?.pop())
    }

    /// # Errors
    ///
    /// As [`Metadata::installed_versions`].
    pub fn is_installed(&self) -> Result<bool> {
        Ok(!self.installed_versions()?.is_empty())
    }

    /// Load the descriptor saved by the current install.
    ///
    /// # Errors
    ///
    /// [`CaskError::NotInstalled`] when nothing is installed, or the saved
    /// copy cannot be read.
    pub fn installed_cask(&self) -> Result<Cask> {
        let not_installed = || CaskError::NotInstalled {
            token: self.token.clone(),
        };
        let version = self.installed_version()?.ok_or_else(not_installed)?;
        let path = self.saved_descriptor(&version)?.ok_or_else(not_installed)?;
        Ok(Cask::from_file(&path)?)
    }

    /// Remove the staged directory and non-persistent metadata for `version`,
    /// then prune directories left empty.
    ///
    /// # Errors
    ///
    /// I/O failures while removing.
    pub fn purge_versioned_files(&self, version: &Version) -> Result<()> {
        debug!(token = %self.token, version = %version, "Purging versioned files");
        remove_path(&self.staged_path(version))?;

        let versioned = self.versioned_path(version);
        for name in child_dirs(&versioned)? {
            if !PERSISTENT_METADATA_SUBDIRS.contains(&name.as_str()) {
                remove_path(&versioned.join(name))?;
            }
        }

        rmdir_if_empty(&versioned);
        rmdir_if_empty(&self.metadata_root());
        rmdir_if_empty(&self.root);
        Ok(())
    }

    /// Remove everything under `<caskroom>/<token>`.
    ///
    /// # Errors
    ///
    /// I/O failures while removing.
    pub fn purge_caskroom(&self) -> Result<()> {
        debug!(token = %self.token, "Purging caskroom path");
        remove_path(&self.root)
    }
}

/// Tokens with an installed version under `caskroom`, sorted.
///
/// # Errors
///
/// I/O failures while listing directories.
pub fn installed_tokens(caskroom: &Path) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    for name in child_dirs(caskroom)? {
        if name.starts_with('.') {
            continue;
        }
        let token = Token::new(&name);
        if Metadata::new(caskroom, &token).is_installed()? {
            tokens.push(token);
        }
    }
    Ok(tokens)
}

fn child_dirs(dir: &Path) -> Result<Vec<String>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(CaskError::io(format!("reading {}", dir.display()))(e)),
    };

    let mut names: Vec<String> = entries
        .flatten()
        .filter(|e| e.file_type().is_ok_and(|t| t.is_dir()))
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    Ok(names)
}

/// Newest timestamp directory of a versioned metadata path.
fn latest_child(dir: &Path) -> Result<Option<String>> {
    Ok(child_dirs(dir)?
        .into_iter()
        .rfind(|name| !PERSISTENT_METADATA_SUBDIRS.contains(&name.as_str())))
}

fn rmdir_if_empty(dir: &Path) {
    // Fails harmlessly when the directory still has entries.
    let _ = fs::remove_dir(dir);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store(dir: &Path) -> Metadata {
        Metadata::new(dir, &Token::new("foo"))
    }

    #[test]
    fn test_resolving_never_creates() {
        let dir = tempdir().unwrap();
        let meta = store(dir.path());
        let v = Version::new("1.0");

        let now = meta.timestamped_path(&v, &Timestamp::Now, false).unwrap().unwrap();
        assert!(!now.exists());
        assert!(meta.timestamped_path(&v, &Timestamp::Latest, false).unwrap().is_none());
        assert!(!meta.root().exists());
    }

    #[test]
    fn test_now_is_stable_within_process() {
        let dir = tempdir().unwrap();
        let meta = store(dir.path());
        let v = Version::new("1.0");

        let a = meta.timestamped_path(&v, &Timestamp::Now, true).unwrap().unwrap();
        let b = meta.timestamped_path(&v, &Timestamp::Now, false).unwrap().unwrap();
        assert_eq!(a, b);
        assert!(a.is_dir());

        let other = Metadata::new(dir.path(), &Token::new("bar"));
        let c = other.timestamped_path(&v, &Timestamp::Now, false).unwrap().unwrap();
        assert_eq!(a.file_name(), c.file_name());

        let name = a.file_name().unwrap().to_str().unwrap();
        assert_eq!(name.len(), "20240101120000.123".len());
        assert_eq!(&name[14..15], ".");
    }

    #[test]
    fn test_latest_is_lexicographic_max() {
        let dir = tempdir().unwrap();
        let meta = store(dir.path());
        let v = Version::new("1.0");

        for ts in ["20230101000000.000", "20240101000000.000", "20231231235959.999"] {
            meta.timestamped_path(&v, &Timestamp::At(ts.into()), true).unwrap();
        }
        let latest = meta.timestamped_path(&v, &Timestamp::Latest, false).unwrap().unwrap();
        assert!(latest.ends_with("20240101000000.000"));
    }

    #[test]
    fn test_subdir_rules() {
        let dir = tempdir().unwrap();
        let meta = store(dir.path());
        let v = Version::new("1.0");

        assert!(matches!(
            meta.subdir(&v, "", &Timestamp::Now, false),
            Err(CaskError::Metadata(_))
        ));
        assert!(matches!(
            meta.subdir(&v, "gpg", &Timestamp::Latest, true),
            Err(CaskError::Metadata(_))
        ));

        let created = meta.subdir(&v, "gpg", &Timestamp::Now, true).unwrap().unwrap();
        assert!(created.is_dir());
        let found = meta.subdir(&v, "gpg", &Timestamp::Latest, false).unwrap().unwrap();
        assert_eq!(created, found);
    }

    #[test]
    fn test_installed_tracks_timestamp_dirs() {
        let dir = tempdir().unwrap();
        let meta = store(dir.path());
        let v = Version::new("1.0");
        assert!(!meta.is_installed().unwrap());

        fs::create_dir_all(meta.versioned_path(&v)).unwrap();
        assert!(!meta.is_installed().unwrap());

        meta.timestamped_path(&v, &Timestamp::Now, true).unwrap();
        assert!(meta.is_installed().unwrap());
        assert_eq!(meta.installed_version().unwrap(), Some(v.clone()));

        fs::create_dir_all(meta.staged_path(&v)).unwrap();
        meta.purge_versioned_files(&v).unwrap();
        assert!(!meta.is_installed().unwrap());
        assert!(!meta.root().exists());
    }

    #[test]
    fn test_installed_versions_follow_timestamps() {
        let dir = tempdir().unwrap();
        let meta = store(dir.path());
        let (old, new) = (Version::new("2.0"), Version::new("1.0"));
        meta.timestamped_path(&old, &Timestamp::At("20230101000000.000".into()), true)
            .unwrap();
        meta.timestamped_path(&new, &Timestamp::At("20240101000000.000".into()), true)
            .unwrap();

        assert_eq!(meta.installed_versions().unwrap(), vec![old, new.clone()]);
        assert_eq!(meta.installed_version().unwrap(), Some(new));
    }

    #[test]
    fn test_upgrade_backups_are_not_installed() {
        let dir = tempdir().unwrap();
        let meta = store(dir.path());
        let backup = Version::new(&format!("1.0{UPGRADE_SUFFIX}"));
        meta.timestamped_path(&backup, &Timestamp::Now, true).unwrap();
        assert!(!meta.is_installed().unwrap());
    }

    #[test]
    fn test_saved_descriptor_round_trip() {
        let dir = tempdir().unwrap();
        let meta = store(dir.path());
        let text = "token = \"foo\"\nversion = \"1.0\"\nsha256 = \"no_check\"\nurl = \"https://example.com/foo.zip\"\n";
        let cask = Cask::parse(text).unwrap();

        let path = meta.save_descriptor(&cask).unwrap();
        assert!(path.ends_with("Casks/foo.toml"));
        assert_eq!(meta.saved_descriptor(&cask.version).unwrap(), Some(path));
        assert_eq!(meta.installed_cask().unwrap(), cask);
    }

    #[test]
    fn test_installed_tokens_skips_leftovers() {
        let dir = tempdir().unwrap();
        let v = Version::new("1.0");
        for token in ["foo", "bar"] {
            Metadata::new(dir.path(), &Token::new(token))
                .timestamped_path(&v, &Timestamp::Now, true)
                .unwrap();
        }
        fs::create_dir_all(dir.path().join("stale/1.0")).unwrap();

        let tokens = installed_tokens(dir.path()).unwrap();
        assert_eq!(tokens, vec![Token::new("bar"), Token::new("foo")]);
        assert!(installed_tokens(&dir.path().join("missing")).unwrap().is_empty());
    }

    #[test]
    fn test_purge_keeps_persistent_subdirs() {
        let dir = tempdir().unwrap();
        let meta = store(dir.path());
        let v = Version::new("1.0");
        meta.timestamped_path(&v, &Timestamp::Now, true).unwrap();
        fs::create_dir_all(meta.versioned_path(&v).join("gpg")).unwrap();

        meta.purge_versioned_files(&v).unwrap();
        assert!(meta.versioned_path(&v).join("gpg").is_dir());
        assert!(!meta.is_installed().unwrap());

        meta.purge_caskroom().unwrap();
        assert!(!meta.root().exists());
    }
}
