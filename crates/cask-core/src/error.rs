//! Error taxonomy for cask operations.

use std::path::PathBuf;

use cask_schema::{SchemaError, Token, Version};
use thiserror::Error;

pub type Result<T, E = CaskError> = std::result::Result<T, E>;

/// Failure of an external program.
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("failed to run '{command}': {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    #[error("command '{command}' exited with {status}\n==> stdout:\n{stdout}\n==> stderr:\n{stderr}")]
    Failed {
        command: String,
        status: String,
        stdout: String,
        stderr: String,
    },
}

#[derive(Error, Debug)]
pub enum CaskError {
    #[error("Cask '{token}' is already installed ({version})")]
    AlreadyInstalled { token: Token, version: Version },

    #[error("Cask '{token}' conflicts with '{conflict}', which is installed")]
    ConflictDetected { token: Token, conflict: Token },

    #[error("Cask '{token}' dependency unsatisfied: {reason}")]
    DependencyUnsatisfied { token: Token, reason: String },

    #[error("Cask '{token}' depends on itself")]
    SelfDependency { token: Token },

    #[error("Cask '{token}' has a cyclic dependency: {}", format_cycle(.cycle))]
    CyclicDependency { token: Token, cycle: Vec<Token> },

    #[error("Cask '{token}' is unavailable: {reason}")]
    CaskUnavailable { token: Token, reason: String },

    #[error("Cask '{token}' does not have a sha256 checksum defined")]
    ChecksumMissing { token: Token },

    #[error(
        "Checksum for cask '{token}' does not match.\nExpected: {expected}\nActual:   {actual}\nFile:     {}",
        .path.display()
    )]
    ChecksumMismatch {
        token: Token,
        expected: String,
        actual: String,
        path: PathBuf,
    },

    #[error("Cask '{token}': unknown container format for {}", .path.display())]
    UnknownContainerFormat { token: Token, path: PathBuf },

    #[error("Cask '{token}': unknown container type '{kind}'")]
    UnknownContainerType { token: Token, kind: String },

    #[error("Download failed for cask '{token}' from {url}: {reason}{}", partial_note(.partial.as_ref()))]
    DownloadFailed {
        token: Token,
        url: String,
        reason: String,
        partial: Option<PathBuf>,
    },

    #[error("{} is in use by another process", .path.display())]
    Locked { path: PathBuf },

    #[error("Cask '{token}': {artifact} failed to install: {source}")]
    ArtifactInstallFailed {
        token: Token,
        artifact: String,
        source: Box<CaskError>,
    },

    #[error("Cask '{token}' is not installed")]
    NotInstalled { token: Token },

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("Metadata error: {0}")]
    Metadata(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        source: std::io::Error,
    },
}

impl CaskError {
    /// Build a mapper that tags an `io::Error` with what was being attempted.
    ///
    /// ```ignore
    /// fs::create_dir_all(&dir).map_err(CaskError::io(format!("creating {}", dir.display())))?;
    /// ```
    pub fn io(context: impl Into<String>) -> impl FnOnce(std::io::Error) -> Self {
        let context = context.into();
        move |source| Self::Io { context, source }
    }

    /// Whether this error happened before anything on disk or the network was touched.
    pub fn is_preflight(&self) -> bool {
        matches!(
            self,
            Self::AlreadyInstalled { .. }
                | Self::ConflictDetected { .. }
                | Self::DependencyUnsatisfied { .. }
                | Self::SelfDependency { .. }
                | Self::CyclicDependency { .. }
                | Self::ChecksumMissing { .. }
        )
    }
}

fn format_cycle(cycle: &[Token]) -> String {
    cycle
        .iter()
        .map(Token::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}

fn partial_note(partial: Option<&PathBuf>) -> String {
    partial
        .map(|p| format!(" (partial download kept at {})", p.display()))
        .unwrap_or_default()
}
