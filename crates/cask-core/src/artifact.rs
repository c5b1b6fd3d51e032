//! Artifact activation.
//!
//! Every [`ArtifactSpec`] variant is handled through the [`Activation`]
//! capability. Artifacts of one cask live at disjoint locations, so their
//! uninstall order does not matter.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use cask_schema::{
    ArtifactSpec, Binary, Cask, Moved, Pkg, Relocated, Script, UninstallDirectives, ZapDirectives,
};
use tracing::{debug, info, warn};

use crate::command::{CommandRunner, SystemCommand};
use crate::config::Config;
use crate::error::{CaskError, Result};
use crate::io::remove_path;
use crate::reporter::Reporter;

const INSTALLER: &str = "/usr/sbin/installer";
const PKGUTIL: &str = "/usr/sbin/pkgutil";
const LAUNCHCTL: &str = "/bin/launchctl";

/// What an artifact needs to activate itself.
pub struct ArtifactContext<'a> {
    pub cask: &'a Cask,
    /// Staged tree of the version being activated.
    pub staged: &'a Path,
    pub config: &'a Config,
    pub runner: &'a dyn CommandRunner,
    pub reporter: &'a dyn Reporter,
}

impl std::fmt::Debug for ArtifactContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactContext")
            .field("token", &self.cask.token)
            .field("staged", &self.staged)
            .finish_non_exhaustive()
    }
}

impl ArtifactContext<'_> {
    fn run(&self, cmd: &SystemCommand, verbose: bool) -> Result<()> {
        let out = self.runner.run(cmd)?;
        if verbose && !out.stdout.trim().is_empty() {
            info!(command = %cmd.program_name(), "{}", out.stdout.trim_end());
        }
        Ok(())
    }

    /// A path inside the staged tree, or an absolute path as given.
    fn staged_path(&self, relative: &str) -> PathBuf {
        let expanded = expand_tilde(relative);
        if expanded.is_absolute() {
            expanded
        } else {
            self.staged.join(expanded)
        }
    }
}

pub trait Activation {
    /// Put the artifact in place.
    ///
    /// # Errors
    ///
    /// Any failure; the caller unwinds already activated artifacts.
    fn install_phase(&self, ctx: &ArtifactContext<'_>, verbose: bool, force: bool) -> Result<()>;

    /// Undo [`Activation::install_phase`]. `skip` leaves out steps that run
    /// external programs (used while an upgrade sets the old version aside).
    ///
    /// # Errors
    ///
    /// Any failure.
    fn uninstall_phase(
        &self,
        ctx: &ArtifactContext<'_>,
        verbose: bool,
        skip: bool,
        force: bool,
    ) -> Result<()>;
}

impl Activation for ArtifactSpec {
    fn install_phase(&self, ctx: &ArtifactContext<'_>, verbose: bool, force: bool) -> Result<()> {
        debug!(token = %ctx.cask.token, artifact = %self.describe(), "Installing artifact");
        match self {
            Self::App(_)
            | Self::Font(_)
            | Self::Prefpane(_)
            | Self::Qlplugin(_)
            | Self::Service(_)
            | Self::Artifact(_) => {
                let (source, target) = moved_paths(self, ctx)?;
                install_copy(ctx, self.kind_name(), &source, &target, force)
            }
            Self::Binary(binary) => install_binary(ctx, binary, force),
            Self::Pkg(pkg) => install_pkg(ctx, pkg, verbose),
            Self::Installer(installer) => {
                if let Some(manual) = &installer.manual {
                    ctx.reporter.info(&format!(
                        "To complete the installation of Cask {}, you must also\nrun the installer at:\n  '{}'",
                        ctx.cask.token,
                        ctx.staged_path(manual).display()
                    ));
                    Ok(())
                } else if let Some(script) = &installer.script {
                    run_script(ctx, script, verbose)
                } else {
                    Ok(())
                }
            }
            Self::StageOnly | Self::Uninstall(_) | Self::Zap(_) => Ok(()),
        }
    }

    fn uninstall_phase(
        &self,
        ctx: &ArtifactContext<'_>,
        verbose: bool,
        skip: bool,
        force: bool,
    ) -> Result<()> {
        debug!(token = %ctx.cask.token, artifact = %self.describe(), skip, "Uninstalling artifact");
        match self {
            Self::App(_)
            | Self::Font(_)
            | Self::Prefpane(_)
            | Self::Qlplugin(_)
            | Self::Service(_)
            | Self::Artifact(_) => {
                let (_, target) = moved_paths(self, ctx)?;
                if target.exists() || target.is_symlink() {
                    ctx.reporter
                        .info(&format!("Removing {} '{}'", self.kind_name(), target.display()));
                    delete(ctx, &target, force)?;
                } else {
                    debug!(target = %target.display(), "Already gone");
                }
                Ok(())
            }
            Self::Binary(binary) => uninstall_binary(ctx, binary),
            Self::Pkg(pkg) => {
                if skip {
                    return Ok(());
                }
                for receipt in &pkg.receipts {
                    forget_receipt(ctx, receipt, verbose)?;
                }
                Ok(())
            }
            Self::Uninstall(directives) => run_uninstall_directives(ctx, directives, verbose, skip, force),
            Self::Installer(_) | Self::StageOnly | Self::Zap(_) => Ok(()),
        }
    }
}

/// Destructive removal of user data declared by a `zap` artifact.
///
/// # Errors
///
/// Any failure to delete or move a path.
pub fn zap_phase(ctx: &ArtifactContext<'_>, zap: &ZapDirectives, verbose: bool) -> Result<()> {
    for path in absolute_paths(ctx, &zap.delete) {
        if verbose {
            info!(path = %path.display(), "Deleting");
        }
        delete(ctx, &path, true)?;
    }
    for path in absolute_paths(ctx, &zap.trash) {
        trash(ctx, &path)?;
    }
    for path in absolute_paths(ctx, &zap.rmdir) {
        rmdir(&path);
    }
    Ok(())
}

/// Installed locations of the cask's application bundles.
pub fn app_targets(cask: &Cask, config: &Config) -> Vec<PathBuf> {
    cask.artifacts
        .iter()
        .filter_map(|a| match a {
            ArtifactSpec::App(m) => Some(moved_target(&config.appdir, m)),
            _ => None,
        })
        .collect()
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    match (path.strip_prefix('~'), dirs::home_dir()) {
        (Some(rest), Some(home)) if rest.is_empty() || rest.starts_with('/') => {
            home.join(rest.trim_start_matches('/'))
        }
        _ => PathBuf::from(path),
    }
}

fn basename(path: &str) -> &str {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(path)
}

fn moved_target(dir: &Path, moved: &Moved) -> PathBuf {
    dir.join(moved.target.as_deref().unwrap_or_else(|| basename(&moved.source)))
}

fn moved_paths(artifact: &ArtifactSpec, ctx: &ArtifactContext<'_>) -> Result<(PathBuf, PathBuf)> {
    let cfg = ctx.config;
    let (dir, moved) = match artifact {
        ArtifactSpec::App(m) => (&cfg.appdir, m),
        ArtifactSpec::Font(m) => (&cfg.fontdir, m),
        ArtifactSpec::Prefpane(m) => (&cfg.prefpanedir, m),
        ArtifactSpec::Qlplugin(m) => (&cfg.qlplugindir, m),
        ArtifactSpec::Service(m) => (&cfg.servicedir, m),
        ArtifactSpec::Artifact(Relocated { source, target }) => {
            let target = expand_tilde(target);
            let target = if target.is_absolute() {
                target
            } else {
                cfg.appdir.join(target)
            };
            return Ok((ctx.staged_path(source), target));
        }
        other => {
            return Err(CaskError::Metadata(format!(
                "{} has no install location",
                other.describe()
            )));
        }
    };
    Ok((ctx.staged_path(&moved.source), moved_target(dir, moved)))
}

fn missing_source(kind: &str, source: &Path) -> CaskError {
    CaskError::io(format!("installing {kind}"))(io::Error::new(
        io::ErrorKind::NotFound,
        format!("the {kind} source '{}' is not there", source.display()),
    ))
}

fn install_copy(
    ctx: &ArtifactContext<'_>,
    kind: &str,
    source: &Path,
    target: &Path,
    force: bool,
) -> Result<()> {
    if !source.exists() {
        return Err(missing_source(kind, source));
    }

    if target.exists() || target.is_symlink() {
        if !force {
            return Err(CaskError::io(format!("installing {kind}"))(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("there is already a {kind} at '{}'", target.display()),
            )));
        }
        ctx.reporter.warning(&format!(
            "There is already a {kind} at '{}'; overwriting.",
            target.display()
        ));
        delete(ctx, target, true)?;
    }

    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)
            .map_err(CaskError::io(format!("creating {}", parent.display())))?;
    }

    ctx.reporter.info(&format!(
        "Copying {kind} '{}' to '{}'",
        basename(&source.to_string_lossy()),
        target.display()
    ));

    let ctx_msg = || format!("copying {} to {}", source.display(), target.display());
    if source.is_dir() {
        let options = fs_extra::dir::CopyOptions::new().copy_inside(true);
        fs_extra::dir::copy(source, target, &options)
            .map_err(|e| CaskError::io(ctx_msg())(io::Error::other(e)))?;
    } else {
        fs::copy(source, target).map_err(CaskError::io(ctx_msg()))?;
    }
    Ok(())
}

fn binary_paths(ctx: &ArtifactContext<'_>, binary: &Binary) -> (PathBuf, PathBuf) {
    let source = ctx.staged_path(&binary.source);
    let name = binary
        .target
        .as_deref()
        .unwrap_or_else(|| basename(&binary.source));
    (source, ctx.config.binarydir.join(name))
}

fn points_into_caskroom(link: &Path, caskroom: &Path) -> bool {
    fs::read_link(link).is_ok_and(|dest| dest.starts_with(caskroom))
}

fn install_binary(ctx: &ArtifactContext<'_>, binary: &Binary, force: bool) -> Result<()> {
    let (source, target) = binary_paths(ctx, binary);
    if !source.exists() {
        return Err(missing_source("binary", &source));
    }

    if target.exists() || target.is_symlink() {
        if !force && !points_into_caskroom(&target, &ctx.config.caskroom) {
            return Err(CaskError::io("linking binary")(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("there is already a binary at '{}'", target.display()),
            )));
        }
        remove_path(&target)?;
    }

    fs::create_dir_all(&ctx.config.binarydir)
        .map_err(CaskError::io(format!("creating {}", ctx.config.binarydir.display())))?;

    #[cfg(unix)]
    if source.is_file() {
        use std::os::unix::fs::PermissionsExt;

        let mode = fs::metadata(&source)
            .map_err(CaskError::io(format!("reading {}", source.display())))?
            .permissions()
            .mode();
        fs::set_permissions(&source, fs::Permissions::from_mode(mode | 0o111))
            .map_err(CaskError::io(format!("chmod {}", source.display())))?;
    }

    ctx.reporter.info(&format!(
        "Linking binary '{}' to '{}'",
        binary.source,
        target.display()
    ));
    symlink(&source, &target)
        .map_err(CaskError::io(format!("linking {}", target.display())))
}

fn uninstall_binary(ctx: &ArtifactContext<'_>, binary: &Binary) -> Result<()> {
    let (_, target) = binary_paths(ctx, binary);
    if !target.is_symlink() {
        return Ok(());
    }
    if points_into_caskroom(&target, &ctx.config.caskroom) {
        ctx.reporter
            .info(&format!("Unlinking binary '{}'", target.display()));
        remove_path(&target)
    } else {
        debug!(target = %target.display(), "Not our link, leaving it");
        Ok(())
    }
}

#[cfg(unix)]
fn symlink(source: &Path, target: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(source, target)
}

#[cfg(not(unix))]
fn symlink(_: &Path, _: &Path) -> io::Result<()> {
    Err(io::Error::new(io::ErrorKind::Unsupported, "symlinks need a unix host"))
}

fn install_pkg(ctx: &ArtifactContext<'_>, pkg: &Pkg, verbose: bool) -> Result<()> {
    let path = ctx.staged_path(&pkg.path);
    if !path.exists() {
        return Err(missing_source("pkg", &path));
    }

    ctx.reporter
        .info(&format!("Running installer for {}", ctx.cask.token));
    let mut cmd = SystemCommand::new(INSTALLER)
        .arg("-pkg")
        .arg(&path)
        .args(["-target", "/"])
        .sudo(true);
    if verbose {
        cmd = cmd.arg("-verboseR");
    }
    if pkg.allow_untrusted {
        cmd = cmd.arg("-allowUntrusted");
    }
    ctx.run(&cmd, verbose)
}

fn forget_receipt(ctx: &ArtifactContext<'_>, receipt: &str, verbose: bool) -> Result<()> {
    ctx.reporter
        .info(&format!("Forgetting package receipt '{receipt}'"));
    ctx.run(
        &SystemCommand::new(PKGUTIL)
            .args(["--forget", receipt])
            .sudo(true)
            .allow_failure(),
        verbose,
    )
}

fn run_script(ctx: &ArtifactContext<'_>, script: &Script, verbose: bool) -> Result<()> {
    let executable = ctx.staged_path(&script.executable);

    #[cfg(unix)]
    if executable.is_file() {
        use std::os::unix::fs::PermissionsExt;

        if let Ok(meta) = fs::metadata(&executable) {
            let mode = meta.permissions().mode();
            let _ = fs::set_permissions(&executable, fs::Permissions::from_mode(mode | 0o111));
        }
    }

    ctx.reporter
        .info(&format!("Running {} script '{}'", ctx.cask.token, script.executable));
    ctx.run(
        &SystemCommand::new(&executable)
            .args(&script.args)
            .sudo(script.sudo)
            .current_dir(ctx.staged),
        verbose,
    )
}

fn remove_pkg_files(ctx: &ArtifactContext<'_>, id: &str, verbose: bool) -> Result<()> {
    let listed = |flag: &str| -> Result<Vec<PathBuf>> {
        let out = ctx.runner.run(
            &SystemCommand::new(PKGUTIL)
                .args([flag, "--files", id])
                .allow_failure(),
        )?;
        Ok(out
            .stdout
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| Path::new("/").join(l.trim()))
            .collect())
    };

    let files = listed("--only-files")?;
    if !files.is_empty() {
        ctx.run(
            &SystemCommand::new("/bin/rm")
                .args(["-f", "--"])
                .args(&files)
                .sudo(true),
            verbose,
        )?;
    }

    // Deepest first so parents are empty by the time they are reached.
    let mut dirs = listed("--only-dirs")?;
    dirs.sort_by_key(|d| std::cmp::Reverse(d.components().count()));
    for dir in dirs {
        ctx.run(
            &SystemCommand::new("/bin/rmdir")
                .arg(&dir)
                .sudo(true)
                .allow_failure(),
            verbose,
        )?;
    }

    forget_receipt(ctx, id, verbose)
}

fn run_uninstall_directives(
    ctx: &ArtifactContext<'_>,
    directives: &UninstallDirectives,
    verbose: bool,
    skip: bool,
    force: bool,
) -> Result<()> {
    if !skip {
        for label in &directives.launchctl {
            for sudo in [false, true] {
                let listed = ctx.runner.run(
                    &SystemCommand::new(LAUNCHCTL)
                        .args(["list", label])
                        .sudo(sudo)
                        .allow_failure(),
                )?;
                if listed.success {
                    ctx.reporter
                        .info(&format!("Removing launchctl service {label}"));
                    ctx.run(
                        &SystemCommand::new(LAUNCHCTL)
                            .args(["remove", label])
                            .sudo(sudo),
                        verbose,
                    )?;
                }
            }
        }

        for id in &directives.pkgutil {
            remove_pkg_files(ctx, id, verbose)?;
        }

        if let Some(script) = &directives.script {
            run_script(ctx, script, verbose)?;
        }
    }

    for path in absolute_paths(ctx, &directives.delete) {
        delete(ctx, &path, force)?;
    }
    for path in absolute_paths(ctx, &directives.rmdir) {
        rmdir(&path);
    }
    Ok(())
}

fn absolute_paths(ctx: &ArtifactContext<'_>, paths: &[String]) -> Vec<PathBuf> {
    paths
        .iter()
        .filter_map(|p| {
            let path = expand_tilde(p);
            if path.is_absolute() {
                Some(path)
            } else {
                ctx.reporter
                    .warning(&format!("Skipping relative path '{p}'"));
                None
            }
        })
        .collect()
}

/// Remove a path, escalating with sudo if the user may not.
fn delete(ctx: &ArtifactContext<'_>, path: &Path, force: bool) -> Result<()> {
    match remove_path(path) {
        Err(CaskError::Io { source, .. }) if source.kind() == io::ErrorKind::PermissionDenied => {
            let flags = if force { "-rf" } else { "-r" };
            ctx.run(
                &SystemCommand::new("/bin/rm")
                    .args([flags, "--"])
                    .arg(path)
                    .sudo(true),
                false,
            )
        }
        other => other,
    }
}

fn rmdir(path: &Path) {
    if path.is_dir() && fs::remove_dir(path).is_err() {
        debug!(path = %path.display(), "Not empty, leaving it");
    }
}

fn trash(ctx: &ArtifactContext<'_>, path: &Path) -> Result<()> {
    if !path.exists() && !path.is_symlink() {
        return Ok(());
    }
    let Some(home) = dirs::home_dir() else {
        warn!(path = %path.display(), "No home directory, cannot trash");
        return Ok(());
    };
    let trash_dir = home.join(".Trash");
    fs::create_dir_all(&trash_dir)
        .map_err(CaskError::io(format!("creating {}", trash_dir.display())))?;

    let name = path
        .file_name()
        .map_or_else(|| "item".into(), |n| n.to_string_lossy().into_owned());
    let mut dest = trash_dir.join(&name);
    if dest.exists() {
        let stamp = chrono::Local::now().format("%H.%M.%S");
        dest = trash_dir.join(format!("{name} {stamp}"));
    }

    ctx.reporter
        .info(&format!("Trashing '{}'", path.display()));
    if fs::rename(path, &dest).is_ok() {
        return Ok(());
    }

    // Different volume: copy, then remove the original.
    let moved = if path.is_dir() {
        let options = fs_extra::dir::CopyOptions::new().copy_inside(true);
        fs_extra::dir::move_dir(path, &dest, &options).map(|_| ())
    } else {
        fs_extra::file::move_file(path, &dest, &fs_extra::file::CopyOptions::new()).map(|_| ())
    };
    moved.map_err(|e| CaskError::io(format!("trashing {}", path.display()))(io::Error::other(e)))
}
