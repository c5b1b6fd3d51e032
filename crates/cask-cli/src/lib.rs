//! cask - application package lifecycle manager
#![allow(missing_docs)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]
//!
//! Installs, upgrades and removes application bundles described by TOML
//! cask descriptors.
//!
//! # Directory Layout
//!
//! ```text
//! ~/.cask/
//! ├── Caskroom/   # Staged versions and install metadata, per token
//! ├── Casks/      # Default descriptor catalog
//! ├── cache/      # Downloaded containers
//! └── bin/        # Symlinks for `binary` artifacts
//! ```

pub mod cmd;
pub mod ui;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "cask")]
#[command(author, version, about = "cask - install and manage application packages")]
pub struct Cli {
    /// Replace existing installs and targets, and re-download
    #[arg(short, long, global = true)]
    pub force: bool,

    /// Do not install casks listed in `depends_on.cask`
    #[arg(long, global = true)]
    pub skip_cask_deps: bool,

    /// Refuse casks without a sha256 checksum
    #[arg(long, global = true)]
    pub require_sha: bool,

    /// Show the output of external tools
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Directory holding `<token>.toml` descriptors (repeatable, searched in order)
    #[arg(long = "catalog", global = true, env = "CASK_CATALOG", value_delimiter = ':')]
    pub catalogs: Vec<PathBuf>,

    #[command(flatten)]
    pub dirs: DirOverrides,

    #[command(subcommand)]
    pub command: Commands,
}

/// Installation directory overrides. Unset ones fall back to defaults under
/// the home directory.
#[derive(Debug, Default, Args)]
pub struct DirOverrides {
    #[arg(long, global = true, env = "CASK_ROOM", value_name = "DIR")]
    pub caskroom: Option<PathBuf>,
    #[arg(long, global = true, env = "CASK_CACHE", value_name = "DIR")]
    pub cache: Option<PathBuf>,
    #[arg(long, global = true, env = "CASK_APPDIR", value_name = "DIR")]
    pub appdir: Option<PathBuf>,
    #[arg(long, global = true, env = "CASK_BINARYDIR", value_name = "DIR")]
    pub binarydir: Option<PathBuf>,
    #[arg(long, global = true, env = "CASK_FONTDIR", value_name = "DIR")]
    pub fontdir: Option<PathBuf>,
    #[arg(long, global = true, env = "CASK_PREFPANEDIR", value_name = "DIR")]
    pub prefpanedir: Option<PathBuf>,
    #[arg(long, global = true, env = "CASK_QLPLUGINDIR", value_name = "DIR")]
    pub qlplugindir: Option<PathBuf>,
    #[arg(long, global = true, env = "CASK_SERVICEDIR", value_name = "DIR")]
    pub servicedir: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Download and verify casks without installing them
    Fetch {
        /// Cask tokens or descriptor paths
        #[arg(required = true)]
        casks: Vec<String>,
    },
    /// Install casks
    Install {
        /// Cask tokens or descriptor paths
        #[arg(required = true)]
        casks: Vec<String>,
    },
    /// Uninstall and install casks again
    Reinstall {
        /// Cask tokens or descriptor paths
        #[arg(required = true)]
        casks: Vec<String>,
    },
    /// Uninstall casks
    #[command(alias = "rm", alias = "remove")]
    Uninstall {
        /// Cask tokens or descriptor paths
        #[arg(required = true)]
        casks: Vec<String>,
    },
    /// Upgrade casks to the version in the catalog
    Upgrade {
        /// Cask tokens (all installed casks if empty)
        casks: Vec<String>,
    },
    /// Uninstall casks and remove their user data
    Zap {
        /// Cask tokens or descriptor paths
        #[arg(required = true)]
        casks: Vec<String>,
    },
    /// List installed casks
    #[command(alias = "ls")]
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}
