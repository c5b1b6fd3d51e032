//! External program invocation.
//!
//! Artifacts, container probes and the Subversion strategy all shell out.
//! They describe the call as a [`SystemCommand`] and hand it to a
//! [`CommandRunner`], so tests can record calls instead of spawning.

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::debug;

use crate::error::CommandError;

const SUDO: &str = "/usr/bin/sudo";

/// A fully described external call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemCommand {
    pub executable: PathBuf,
    pub args: Vec<OsString>,
    pub sudo: bool,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    /// Non-zero exit becomes [`CommandError::Failed`].
    pub must_succeed: bool,
}

impl SystemCommand {
    pub fn new(executable: impl AsRef<Path>) -> Self {
        Self {
            executable: executable.as_ref().to_path_buf(),
            args: Vec::new(),
            sudo: false,
            cwd: None,
            env: Vec::new(),
            must_succeed: true,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    pub fn sudo(mut self, sudo: bool) -> Self {
        self.sudo = sudo;
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.env.push((key.to_string(), value.to_string()));
        self
    }

    /// Report non-zero exit through [`CommandOutput::success`] instead of an error.
    pub fn allow_failure(mut self) -> Self {
        self.must_succeed = false;
        self
    }

    /// Name of the program, without directories.
    pub fn program_name(&self) -> String {
        self.executable
            .file_name()
            .map_or_else(String::new, |n| n.to_string_lossy().into_owned())
    }
}

impl std::fmt::Display for SystemCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.sudo {
            write!(f, "{SUDO} -E -- ")?;
        }
        write!(f, "{}", self.executable.display())?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// A successful run with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// A failed run with the given exit code and stderr.
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }
}

pub trait CommandRunner: Send + Sync {
    /// Run `cmd` to completion.
    ///
    /// # Errors
    ///
    /// [`CommandError::Spawn`] if the program cannot start;
    /// [`CommandError::Failed`] on non-zero exit when `must_succeed` is set.
    fn run(&self, cmd: &SystemCommand) -> Result<CommandOutput, CommandError>;
}

impl<T: CommandRunner + ?Sized> CommandRunner for std::sync::Arc<T> {
    fn run(&self, cmd: &SystemCommand) -> Result<CommandOutput, CommandError> {
        (**self).run(cmd)
    }
}

/// Spawns real processes and waits for them. There is no timeout.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    fn run(&self, cmd: &SystemCommand) -> Result<CommandOutput, CommandError> {
        debug!(command = %cmd, "Executing");

        let mut process = if cmd.sudo {
            let mut c = Command::new(SUDO);
            c.arg("-E").arg("--").arg(&cmd.executable);
            c
        } else {
            Command::new(&cmd.executable)
        };
        process
            .args(&cmd.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &cmd.cwd {
            process.current_dir(dir);
        }
        for (k, v) in &cmd.env {
            process.env(k, v);
        }

        let output = process.output().map_err(|source| CommandError::Spawn {
            command: cmd.to_string(),
            source,
        })?;

        let result = CommandOutput {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        if cmd.must_succeed && !result.success {
            return Err(CommandError::Failed {
                command: cmd.to_string(),
                status: output.status.to_string(),
                stdout: result.stdout,
                stderr: result.stderr,
            });
        }

        Ok(result)
    }
}
