//! Shared engine context.
//!
//! Groups the configuration and collaborators every operation needs so they
//! are threaded explicitly instead of read from globals.

use std::sync::Arc;

use crate::catalog::CaskLoader;
use crate::command::{CommandRunner, ProcessRunner};
use crate::config::{Config, InstallOptions};
use crate::error::Result;
use crate::io::download::{DownloadManager, Fetcher};
use crate::platform::{HostPlatform, Platform};
use crate::reporter::Reporter;

#[derive(Clone)]
pub struct Context {
    pub config: Arc<Config>,
    pub options: InstallOptions,
    pub reporter: Arc<dyn Reporter>,
    pub runner: Arc<dyn CommandRunner>,
    pub platform: Arc<dyn Platform>,
    pub loader: Arc<dyn CaskLoader>,
    pub fetcher: Arc<dyn Fetcher>,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("config", &self.config)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Context {
    pub fn new(
        config: Config,
        options: InstallOptions,
        reporter: Arc<dyn Reporter>,
        runner: Arc<dyn CommandRunner>,
        platform: Arc<dyn Platform>,
        loader: Arc<dyn CaskLoader>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            options,
            reporter,
            runner,
            platform,
            loader,
            fetcher,
        }
    }

    /// Wire the real subprocess runner, host probes and download manager.
    ///
    /// # Errors
    ///
    /// Fails if the HTTP client cannot be built.
    pub fn host(
        config: Config,
        options: InstallOptions,
        reporter: Arc<dyn Reporter>,
        loader: Arc<dyn CaskLoader>,
    ) -> Result<Self> {
        let runner: Arc<dyn CommandRunner> = Arc::new(ProcessRunner);
        let platform = Arc::new(HostPlatform::new(runner.clone()));
        let fetcher = Arc::new(DownloadManager::new(&config, runner.clone(), reporter.clone())?);
        Ok(Self::new(
            config, options, reporter, runner, platform, loader, fetcher,
        ))
    }

    /// The same collaborators with different switches.
    pub fn with_options(&self, options: InstallOptions) -> Self {
        Self {
            options,
            ..self.clone()
        }
    }
}
