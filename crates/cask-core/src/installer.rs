//! Installer state machine.
//!
//! An install moves through explicit states:
//! `Installer::fetch` -> [`Fetched`] -> `Installer::stage` -> [`Staged`] ->
//! activated artifacts. Each state is only constructible from the previous
//! one, so nothing can be staged before it was downloaded and verified.
//! Failures after staging unwind to "not installed" before they propagate.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use cask_schema::{Arch, ArtifactSpec, Cask, Checksum, OsVersion, Token};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::artifact::{Activation, ArtifactContext, app_targets, zap_phase};
use crate::catalog::CaskLoader;
use crate::config::InstallOptions;
use crate::context::Context;
use crate::error::{CaskError, Result};
use crate::io::download::verify_checksum;
use crate::io::extract::{self, Extractor};
use crate::metadata::Metadata;
use crate::resolver::resolve;
use crate::rollback::Rollback;

/// Accessibility access can no longer be granted by writing TCC from this release on.
const TCC_LOCKED_SINCE: &str = "10.12";

/// A downloaded and verified container.
#[derive(Debug)]
pub struct Fetched {
    pub download: PathBuf,
}

/// A container unpacked into its versioned staging directory.
#[derive(Debug)]
pub struct Staged {
    pub path: PathBuf,
}

pub struct Installer<'a> {
    pub(crate) ctx: &'a Context,
    pub(crate) cask: Cask,
    pub(crate) metadata: Metadata,
    reinstall: bool,
    pub(crate) upgrade: bool,
}

impl std::fmt::Debug for Installer<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Installer")
            .field("token", &self.cask.token)
            .field("version", &self.cask.version)
            .field("reinstall", &self.reinstall)
            .field("upgrade", &self.upgrade)
            .finish_non_exhaustive()
    }
}

// Type-erased so dependency installs can recurse.
fn install_dependency<'b>(
    installer: &'b Installer<'b>,
) -> Pin<Box<dyn Future<Output = Result<()>> + 'b>> {
    Box::pin(installer.install())
}

impl<'a> Installer<'a> {
    pub fn new(ctx: &'a Context, cask: Cask) -> Self {
        let metadata = Metadata::new(&ctx.config.caskroom, &cask.token);
        Self {
            ctx,
            cask,
            metadata,
            reinstall: false,
            upgrade: false,
        }
    }

    /// Replace an existing install of the same cask.
    pub fn reinstall(mut self, reinstall: bool) -> Self {
        self.reinstall = reinstall;
        self
    }

    pub fn cask(&self) -> &Cask {
        &self.cask
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn staged_path(&self) -> PathBuf {
        self.metadata.staged_path(&self.cask.version)
    }

    fn token(&self) -> &Token {
        &self.cask.token
    }

    /// Fetch, stage and activate the cask.
    ///
    /// # Errors
    ///
    /// Any error of the taxonomy. Pre-flight errors leave the system
    /// untouched; later ones are unwound first.
    pub async fn install(&self) -> Result<()> {
        let opts = self.ctx.options;
        let reporter = &self.ctx.reporter;

        if !opts.force
            && !self.reinstall
            && !self.upgrade
            && let Some(version) = self.metadata.installed_version()?
        {
            return Err(CaskError::AlreadyInstalled {
                token: self.token().clone(),
                version,
            });
        }

        self.check_conflicts()?;

        if let Some(text) = &self.cask.caveats {
            reporter.caveats(self.token(), text);
        }

        let fetched = self.fetch().await?;

        if self.reinstall && self.metadata.is_installed()? {
            self.uninstall_existing()?;
        }

        let staged = self.stage(&fetched)?;
        self.install_artifacts(&staged.path)?;

        info!(token = %self.token(), version = %self.cask.version, "Installed");
        reporter.success(&format!("{} was successfully installed!", self.token()));
        reporter.info(&self.summary());
        Ok(())
    }

    pub(crate) fn check_conflicts(&self) -> Result<()> {
        for other in &self.cask.conflicts_with.cask {
            match self.ctx.loader.load(other) {
                Ok(conflict) => {
                    if Metadata::new(&self.ctx.config.caskroom, &conflict.token).is_installed()? {
                        return Err(CaskError::ConflictDetected {
                            token: self.token().clone(),
                            conflict: conflict.token,
                        });
                    }
                }
                Err(CaskError::CaskUnavailable { .. }) => {
                    debug!(conflict = %other, "Conflicting cask unavailable, ignoring");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Satisfy dependencies, then download and verify.
    ///
    /// # Errors
    ///
    /// `DependencyUnsatisfied`, `SelfDependency`, `CyclicDependency`,
    /// `ChecksumMissing`, `ChecksumMismatch`, `DownloadFailed`.
    pub async fn fetch(&self) -> Result<Fetched> {
        self.satisfy_dependencies().await?;
        let download = self.download(false).await?;
        Ok(Fetched { download })
    }

    /// Download and verify without looking at dependencies.
    ///
    /// # Errors
    ///
    /// `ChecksumMissing` (under `require_sha`, before any network I/O),
    /// `DownloadFailed`, `ChecksumMismatch`.
    pub async fn download(&self, force: bool) -> Result<PathBuf> {
        if self.ctx.options.require_sha
            && self.cask.sha256.as_ref().is_none_or(Checksum::is_no_check)
        {
            return Err(CaskError::ChecksumMissing {
                token: self.token().clone(),
            });
        }

        let path = self.ctx.fetcher.fetch(&self.cask, force).await?;
        verify_checksum(&self.cask, &path)?;
        Ok(path)
    }

    async fn satisfy_dependencies(&self) -> Result<()> {
        let deps = &self.cask.depends_on;
        if deps.is_empty() {
            return Ok(());
        }
        self.ctx.reporter.section("Satisfying dependencies");

        let platform = &self.ctx.platform;
        let unsatisfied = |reason: String| CaskError::DependencyUnsatisfied {
            token: self.token().clone(),
            reason,
        };

        if let Some(requirement) = &deps.macos {
            let host = platform.macos_version();
            if !host.as_ref().is_some_and(|v| requirement.is_satisfied_by(v)) {
                let running = host.map_or_else(
                    || "a non-macOS system".to_string(),
                    |v| format!("macOS {v}"),
                );
                return Err(unsatisfied(format!(
                    "requires macOS {requirement}, but you are running {running}"
                )));
            }
        }

        if !deps.arch.is_empty() {
            let current = platform.arch();
            if !deps.arch.contains(&current) {
                let wanted: Vec<&str> = deps.arch.iter().map(Arch::as_str).collect();
                return Err(unsatisfied(format!(
                    "requires architecture {}, but you are running {current}",
                    wanted.join(" or ")
                )));
            }
        }

        if deps.x11 && !platform.x11_installed() {
            return Err(unsatisfied(
                "requires XQuartz/X11, which can be installed with `cask install xquartz`"
                    .to_string(),
            ));
        }

        // The graph is checked before anything touches the host. Resolving
        // runs even when cask installs are skipped.
        let order = resolve(&self.cask, &*self.ctx.loader)?;

        for formula in &deps.formula {
            if platform.formula_installed(formula) {
                debug!(formula, "Formula already installed");
                continue;
            }
            self.ctx
                .reporter
                .info(&format!("Installing Formula dependency {formula}"));
            platform
                .install_formula(formula)
                .map_err(|e| unsatisfied(format!("formula '{formula}' could not be installed: {e}")))?;
        }

        self.install_cask_dependencies(order).await
    }

    async fn install_cask_dependencies(&self, order: Vec<Token>) -> Result<()> {
        if self.ctx.options.skip_cask_deps || order.is_empty() {
            return Ok(());
        }

        let dep_ctx = self.ctx.with_options(InstallOptions {
            force: false,
            skip_cask_deps: true,
            ..self.ctx.options
        });

        for token in order {
            if Metadata::new(&self.ctx.config.caskroom, &token).is_installed()? {
                debug!(dependency = %token, "Already installed");
                continue;
            }
            let dependency = self.ctx.loader.load(&token)?;
            self.ctx
                .reporter
                .info(&format!("Installing Cask dependency {token}"));
            let installer = Installer::new(&dep_ctx, dependency);
            install_dependency(&installer).await?;
        }
        Ok(())
    }

    /// Unpack a fetched container into the versioned staging directory.
    ///
    /// All or nothing: on failure every versioned file of this version is
    /// purged before the error is returned.
    ///
    /// # Errors
    ///
    /// `UnknownContainerFormat`, `UnknownContainerType`, extraction and I/O
    /// failures.
    pub fn stage(&self, fetched: &Fetched) -> Result<Staged> {
        let path = self.staged_path();
        match self.try_stage(&fetched.download, &path) {
            Ok(()) => {
                debug!(token = %self.token(), path = %path.display(), "Staged");
                Ok(Staged { path })
            }
            Err(e) => {
                self.purge_after_failure();
                Err(e)
            }
        }
    }

    fn try_stage(&self, download: &Path, staged: &Path) -> Result<()> {
        let runner = &*self.ctx.runner;
        let verbose = self.ctx.options.verbose;

        std::fs::create_dir_all(staged)
            .map_err(CaskError::io(format!("creating {}", staged.display())))?;

        let kind = extract::detect(self.token(), download, self.cask.container_type(), runner)?;
        self.ctx
            .reporter
            .info(&format!("Extracting {kind} container for {}", self.token()));
        Extractor::new(kind, download, self.cask.url.basename(), runner).extract(staged, verbose)?;

        if let Some(nested) = self.cask.nested_container() {
            let inner = staged.join(nested);
            let kind = extract::detect(self.token(), &inner, None, runner)?;
            debug!(nested = %inner.display(), container = %kind, "Extracting nested container");
            Extractor::new(kind, &inner, "", runner).extract(staged, verbose)?;
        }

        self.metadata.save_descriptor(&self.cask)?;
        self.ctx.platform.quarantine(staged)?;
        Ok(())
    }

    fn purge_after_failure(&self) {
        if let Err(e) = self.metadata.purge_versioned_files(&self.cask.version) {
            warn!(token = %self.token(), error = %e, "Purging versioned files failed");
        }
    }

    pub(crate) fn artifact_context<'c>(
        &'c self,
        cask: &'c Cask,
        staged: &'c Path,
    ) -> ArtifactContext<'c> {
        ArtifactContext {
            cask,
            staged,
            config: &self.ctx.config,
            runner: &*self.ctx.runner,
            reporter: &*self.ctx.reporter,
        }
    }

    /// Activate every artifact in descriptor order.
    ///
    /// On the first failure the already activated artifacts are uninstalled
    /// most-recent-first and the version is purged.
    ///
    /// # Errors
    ///
    /// [`CaskError::ArtifactInstallFailed`] wrapping the cause.
    pub fn install_artifacts(&self, staged: &Path) -> Result<()> {
        let opts = self.ctx.options;
        let actx = self.artifact_context(&self.cask, staged);
        let mut rollback = Rollback::new();

        for artifact in &self.cask.artifacts {
            if let Err(source) = artifact.install_phase(&actx, opts.verbose, opts.force) {
                return Err(self.abort(rollback, artifact.describe(), source));
            }
            let actx = &actx;
            rollback.push(artifact.describe(), move || {
                artifact.uninstall_phase(actx, opts.verbose, false, true)
            });
        }

        if self.cask.accessibility_access
            && let Err(source) = self.enable_accessibility_access()
        {
            return Err(self.abort(rollback, "accessibility access".to_string(), source));
        }

        rollback.commit();
        Ok(())
    }

    fn abort(&self, rollback: Rollback<'_>, artifact: String, source: CaskError) -> CaskError {
        let reporter = &*self.ctx.reporter;
        reporter.warning(&format!("Reverting installation of {}", self.token()));
        rollback.unwind(reporter);
        self.purge_after_failure();
        CaskError::ArtifactInstallFailed {
            token: self.token().clone(),
            artifact,
            source: Box::new(source),
        }
    }

    fn tcc_locked(&self) -> bool {
        let since = OsVersion::parse(TCC_LOCKED_SINCE).ok();
        since
            .zip(self.ctx.platform.macos_version())
            .is_some_and(|(since, host)| host >= since)
    }

    fn enable_accessibility_access(&self) -> Result<()> {
        if self.tcc_locked() {
            self.ctx.reporter.warning(
                "Accessibility access cannot be enabled automatically on this version of macOS. \
                 See System Preferences to enable it manually.",
            );
            return Ok(());
        }
        info!(token = %self.token(), "Enabling accessibility access");
        self.ctx
            .platform
            .enable_accessibility_access(&app_targets(&self.cask, &self.ctx.config))
    }

    fn disable_accessibility_access(&self, cask: &Cask) {
        if !cask.accessibility_access || self.tcc_locked() {
            return;
        }
        if let Err(e) = self
            .ctx
            .platform
            .disable_accessibility_access(&app_targets(cask, &self.ctx.config))
        {
            warn!(token = %cask.token, error = %e, "Disabling accessibility access failed");
        }
    }

    /// The descriptor the current install was made from, falling back to the
    /// one this installer was built with.
    pub(crate) fn installed_cask(&self) -> Cask {
        self.metadata.installed_cask().unwrap_or_else(|e| {
            debug!(token = %self.token(), error = %e, "No saved descriptor, using the given one");
            self.cask.clone()
        })
    }

    /// Run every artifact's uninstall step in descriptor order.
    ///
    /// # Errors
    ///
    /// The first failing artifact's error.
    pub(crate) fn uninstall_artifacts(
        &self,
        cask: &Cask,
        staged: &Path,
        skip: bool,
        force: bool,
    ) -> Result<()> {
        let actx = self.artifact_context(cask, staged);
        self.disable_accessibility_access(cask);
        for artifact in &cask.artifacts {
            artifact.uninstall_phase(&actx, self.ctx.options.verbose, skip, force)?;
        }
        Ok(())
    }

    fn uninstall_existing(&self) -> Result<()> {
        let existing = self.installed_cask();
        info!(token = %self.token(), version = %existing.version, "Removing existing install");
        Installer::new(self.ctx, existing).uninstall_with(true)
    }

    /// Deactivate the installed version and purge its files.
    ///
    /// # Errors
    ///
    /// [`CaskError::NotInstalled`] when nothing is installed and `force` is
    /// off; artifact failures.
    pub fn uninstall(&self) -> Result<()> {
        self.uninstall_with(self.ctx.options.force)
    }

    fn uninstall_with(&self, force: bool) -> Result<()> {
        let Some(version) = self.metadata.installed_version()? else {
            if force {
                debug!(token = %self.token(), "Not installed, purging leftovers");
                return self.metadata.purge_caskroom();
            }
            return Err(CaskError::NotInstalled {
                token: self.token().clone(),
            });
        };

        let cask = self.installed_cask();
        self.ctx
            .reporter
            .section(&format!("Uninstalling Cask {}", self.token()));
        self.uninstall_artifacts(&cask, &self.metadata.staged_path(&version), false, force)?;
        self.metadata.purge_versioned_files(&version)?;
        if force {
            self.metadata.purge_caskroom()?;
        }
        info!(token = %self.token(), version = %version, "Uninstalled");
        Ok(())
    }

    /// Uninstall, run the zap directives and remove every staged version.
    ///
    /// # Errors
    ///
    /// Artifact or removal failures.
    pub fn zap(&self) -> Result<()> {
        let reporter = &*self.ctx.reporter;
        let installed = self.metadata.installed_version()?;
        let cask = self.installed_cask();
        let staged = self.metadata.staged_path(installed.as_ref().unwrap_or(&cask.version));

        reporter.section(&format!("Implied \"cask uninstall {}\"", self.token()));
        if installed.is_some() {
            self.uninstall_artifacts(&cask, &staged, false, true)?;
        }

        let actx = self.artifact_context(&cask, &staged);
        let mut any = false;
        for artifact in &cask.artifacts {
            if let ArtifactSpec::Zap(directives) = artifact {
                any = true;
                reporter.section("Dispatching zap stanza");
                zap_phase(&actx, directives, self.ctx.options.verbose)?;
            }
        }
        if !any {
            reporter.warning(&format!("No zap stanza present for Cask '{}'", self.token()));
        }

        reporter.info(&format!("Removing all staged versions of Cask '{}'", self.token()));
        self.metadata.purge_caskroom()
    }

    /// `<token> staged at '<path>' (<n> files, <size>)`
    pub fn summary(&self) -> String {
        let staged = self.staged_path();
        let (files, bytes) = WalkDir::new(&staged)
            .into_iter()
            .flatten()
            .filter(|e| e.file_type().is_file())
            .fold((0u64, 0u64), |(n, size), e| {
                (n + 1, size + e.metadata().map_or(0, |m| m.len()))
            });
        format!(
            "{} staged at '{}' ({files} files, {})",
            self.token(),
            staged.display(),
            format_size(bytes)
        )
    }
}

/// Format bytes for human-readable display
pub fn format_size(bytes: u64) -> String {
    let kb = bytes as f64 / 1024.0;
    let mb = kb / 1024.0;
    if mb >= 1024.0 {
        format!("{:.1}GB", mb / 1024.0)
    } else if kb >= 1024.0 {
        format!("{mb:.1}MB")
    } else if kb >= 1.0 {
        format!("{kb:.1}KB")
    } else {
        format!("{bytes}B")
    }
}

/// Load a cask for an operation on an installed token, preferring the saved
/// descriptor over the catalog.
///
/// # Errors
///
/// `CaskUnavailable` when neither has it.
pub fn load_for_removal(ctx: &Context, token: &Token) -> Result<Cask> {
    Metadata::new(&ctx.config.caskroom, token)
        .installed_cask()
        .or_else(|_| ctx.loader.load(token))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512B");
        assert_eq!(format_size(2048), "2.0KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0MB");
    }
}
