//! Subcommand implementations.

pub mod completions;
pub mod fetch;
pub mod install;
pub mod list;
pub mod uninstall;
pub mod upgrade;
pub mod zap;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context as _, Result};
use cask_core::{Config, Context, DirectoryCatalog, InstallOptions};
use cask_schema::{Cask, Token};

use crate::ui::ConsoleReporter;
use crate::{Cli, Commands, DirOverrides};

/// Engine context plus the catalog it loads from.
#[derive(Debug)]
pub struct Session {
    pub ctx: Context,
    pub catalog: Arc<DirectoryCatalog>,
}

impl Session {
    /// Build the engine from command-line flags and the environment.
    pub fn new(cli: &Cli) -> Result<Self> {
        let mut config = Config::try_from_env()
            .context("cannot determine the home directory; set CASK_ROOM and the other CASK_* directories")?;
        cli.dirs.apply(&mut config);

        let catalogs = if cli.catalogs.is_empty() {
            default_catalog().into_iter().collect()
        } else {
            cli.catalogs.clone()
        };
        let catalog = Arc::new(DirectoryCatalog::new(catalogs));

        let options = InstallOptions {
            force: cli.force,
            skip_cask_deps: cli.skip_cask_deps,
            require_sha: cli.require_sha,
            verbose: cli.verbose,
        };
        let ctx = Context::host(
            config,
            options,
            Arc::new(ConsoleReporter::new()),
            catalog.clone(),
        )
        .context("initializing")?;

        Ok(Self { ctx, catalog })
    }

    /// Load a descriptor named by a token or a path on the command line.
    pub fn load(&self, arg: &str) -> cask_core::Result<Cask> {
        self.catalog.load_arg(arg)
    }

    /// The token an argument refers to, without requiring it in the catalog.
    pub fn token(&self, arg: &str) -> Token {
        let path = Path::new(arg);
        if path.extension().is_some_and(|e| e == "toml")
            && let Ok(cask) = DirectoryCatalog::load_path(path)
        {
            return cask.token;
        }
        Token::new(arg)
    }
}

impl DirOverrides {
    fn apply(&self, config: &mut Config) {
        let overrides = [
            (&self.caskroom, &mut config.caskroom),
            (&self.cache, &mut config.cache),
            (&self.appdir, &mut config.appdir),
            (&self.binarydir, &mut config.binarydir),
            (&self.fontdir, &mut config.fontdir),
            (&self.prefpanedir, &mut config.prefpanedir),
            (&self.qlplugindir, &mut config.qlplugindir),
            (&self.servicedir, &mut config.servicedir),
        ];
        for (flag, field) in overrides {
            if let Some(dir) = flag {
                field.clone_from(dir);
            }
        }
    }
}

fn default_catalog() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".cask/Casks"))
}

/// Dispatch a parsed command line.
pub async fn run(cli: Cli) -> Result<()> {
    if let Commands::Completions { shell } = cli.command {
        completions::completions(shell);
        return Ok(());
    }

    let session = Session::new(&cli)?;
    match &cli.command {
        Commands::Fetch { casks } => fetch::fetch(&session, casks).await,
        Commands::Install { casks } => install::install(&session, casks, false).await,
        Commands::Reinstall { casks } => install::install(&session, casks, true).await,
        Commands::Uninstall { casks } => uninstall::uninstall(&session, casks),
        Commands::Upgrade { casks } => upgrade::upgrade(&session, casks).await,
        Commands::Zap { casks } => zap::zap(&session, casks),
        Commands::List { json } => list::list(&session, *json),
        Commands::Completions { .. } => Ok(()),
    }
}
