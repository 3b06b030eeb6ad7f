// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! External command execution.
//!
//! Almost everything hostprep does boils down to calling some external
//! program: apt-get, systemctl, ssh-keygen, etc. All of these calls go
//! through the [`CommandRunner`] trait so that provisioning logic can be
//! exercised without touching the host.

use indicatif::{ProgressBar, ProgressStyle};
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    path::PathBuf,
    process::{Command, Stdio},
    time::Duration,
};
use tracing::{debug, instrument};

/// A single external command invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl Invocation {
    /// Construct new invocation.
    pub fn new(
        program: impl Into<String>,
        args: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            env: Vec::new(),
        }
    }

    /// Set environment variable for the invocation.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    fn to_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        for (key, value) in &self.env {
            command.env(key, value);
        }
        command
    }
}

impl Display for Invocation {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(&self.program)?;
        for arg in &self.args {
            write!(fmt, " {arg}")?;
        }
        Ok(())
    }
}

/// Run external programs.
pub trait CommandRunner: Send + Sync + 'static {
    /// Run program to completion, capturing stdout and stderr together.
    fn output(&self, invocation: &Invocation) -> Result<String>;

    /// Locate program in `PATH`.
    fn which(&self, program: &str) -> Option<PathBuf>;
}

/// Run external programs on the current host.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    #[instrument(skip(self), level = "debug")]
    fn output(&self, invocation: &Invocation) -> Result<String> {
        let output = invocation
            .to_command()
            .stdin(Stdio::null())
            .output()
            .map_err(|err| SyscallError::Spawn {
                source: err,
                program: invocation.program.clone(),
            })?;
        let stdout = String::from_utf8_lossy(output.stdout.as_slice()).into_owned();
        let stderr = String::from_utf8_lossy(output.stderr.as_slice()).into_owned();
        let mut message = String::new();

        if !stdout.is_empty() {
            message.push_str(format!("stdout: {stdout}").as_str());
        }

        if !stderr.is_empty() {
            message.push_str(format!("stderr: {stderr}").as_str());
        }

        // INVARIANT: Chomp trailing newlines.
        let message = message
            .strip_suffix("\r\n")
            .or(message.strip_suffix('\n'))
            .map(ToString::to_string)
            .unwrap_or(message);

        if !output.status.success() {
            return Err(SyscallError::Failed {
                command: invocation.to_string(),
                message,
            });
        }

        debug!("{message}");
        Ok(stdout)
    }

    fn which(&self, program: &str) -> Option<PathBuf> {
        which::which(program).ok()
    }
}

/// Run a long blocking step behind a terminal spinner.
pub fn with_spinner<T>(message: impl Into<String>, step: impl FnOnce() -> T) -> T {
    let bar = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.green} {elapsed_precise:.green}  {msg}") {
        bar.set_style(style);
    }
    bar.set_message(message.into());
    bar.enable_steady_tick(Duration::from_millis(100));
    let result = step();
    bar.finish_and_clear();
    result
}

/// External command error types.
#[derive(Debug, thiserror::Error)]
pub enum SyscallError {
    /// Program could not be started.
    #[error("failed to run {program:?}")]
    Spawn {
        #[source]
        source: std::io::Error,
        program: String,
    },

    /// Program exited unsuccessfully.
    #[error("command {command:?} failed:\n{message}")]
    Failed { command: String, message: String },
}

/// Friendly result alias :3
pub type Result<T, E = SyscallError> = std::result::Result<T, E>;
