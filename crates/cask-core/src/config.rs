//! Installation roots and per-invocation options.

use std::path::{Path, PathBuf};

use dirs::home_dir;

/// User agent sent with every download.
pub const USER_AGENT: &str = concat!("cask/", env!("CARGO_PKG_VERSION"));

/// Directory layout used by the engine.
///
/// Built once per invocation and threaded through [`crate::Context`]; nothing
/// in the engine reads the environment after this is constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Root of per-cask staged and metadata trees.
    pub caskroom: PathBuf,
    /// Download cache.
    pub cache: PathBuf,
    /// Target for `app` artifacts.
    pub appdir: PathBuf,
    /// Target for `binary` symlinks.
    pub binarydir: PathBuf,
    /// Target for `font` artifacts.
    pub fontdir: PathBuf,
    /// Target for `prefpane` artifacts.
    pub prefpanedir: PathBuf,
    /// Target for `qlplugin` artifacts.
    pub qlplugindir: PathBuf,
    /// Target for `service` artifacts.
    pub servicedir: PathBuf,
    pub user_agent: String,
}

fn env_dir(var: &str) -> Option<PathBuf> {
    std::env::var_os(var)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

impl Config {
    /// Resolve every directory from its `CASK_*` override or the default under
    /// the user's home. Returns `None` when no home directory can be found and
    /// a default is needed.
    pub fn try_from_env() -> Option<Self> {
        let home = home_dir();
        let under_home = |rel: &str| home.as_ref().map(|h| h.join(rel));

        Some(Self {
            caskroom: env_dir("CASK_ROOM").or_else(|| under_home(".cask/Caskroom"))?,
            cache: env_dir("CASK_CACHE").or_else(|| under_home(".cask/cache"))?,
            appdir: env_dir("CASK_APPDIR").unwrap_or_else(|| PathBuf::from("/Applications")),
            binarydir: env_dir("CASK_BINARYDIR").or_else(|| under_home(".cask/bin"))?,
            fontdir: env_dir("CASK_FONTDIR").or_else(|| under_home("Library/Fonts"))?,
            prefpanedir: env_dir("CASK_PREFPANEDIR")
                .or_else(|| under_home("Library/PreferencePanes"))?,
            qlplugindir: env_dir("CASK_QLPLUGINDIR").or_else(|| under_home("Library/QuickLook"))?,
            servicedir: env_dir("CASK_SERVICEDIR").or_else(|| under_home("Library/Services"))?,
            user_agent: USER_AGENT.to_string(),
        })
    }

    /// Place every directory under `root`. Used for sandboxed runs and tests.
    pub fn rooted(root: &Path) -> Self {
        Self {
            caskroom: root.join("Caskroom"),
            cache: root.join("cache"),
            appdir: root.join("Applications"),
            binarydir: root.join("bin"),
            fontdir: root.join("Fonts"),
            prefpanedir: root.join("PreferencePanes"),
            qlplugindir: root.join("QuickLook"),
            servicedir: root.join("Services"),
            user_agent: USER_AGENT.to_string(),
        }
    }

    /// Directory holding download lock files.
    pub fn lock_dir(&self) -> PathBuf {
        self.cache.join("locks")
    }
}

/// Per-invocation switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InstallOptions {
    /// Reinstall over an existing install and replace existing targets.
    pub force: bool,
    /// Do not install `depends_on.cask` dependencies.
    pub skip_cask_deps: bool,
    /// Refuse casks that opt out of checksum verification.
    pub require_sha: bool,
    pub verbose: bool,
}
