// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Preflight checks for provisioning prerequisites.
//!
//! Validates that every external command hostprep relies on is available
//! before any provisioning step runs, and installs whatever is missing.
//!
//! # Installation Strategy
//!
//! Missing packages are first installed all at once, one apt process per
//! package. Apt holds an exclusive lock on the package database, so some of
//! these parallel attempts are expected to lose the race and fail. Every
//! package that failed is then retried one at a time, with a pause between
//! attempts, until it succeeds or the retry budget runs out.

use crate::{apt, config::PreflightSettings, syscall::CommandRunner};

use futures::future::join_all;
use std::{collections::BTreeSet, sync::Arc, time::Duration};
use tracing::{info, instrument, warn};

/// Package that provides a command, for commands whose package has a
/// different name.
const PACKAGE_FOR_COMMAND: &[(&str, &str)] = &[
    ("ssh-keygen", "openssh-client"),
    ("ssh", "openssh-client"),
    ("sshd", "openssh-server"),
    ("visudo", "sudo"),
    ("gpg", "gnupg"),
    ("watch", "procps"),
    ("sensors", "lm-sensors"),
    ("ss", "iproute2"),
    ("snmpwalk", "snmp"),
];

/// Determine package providing given command.
pub fn package_for(command: &str) -> &str {
    PACKAGE_FOR_COMMAND
        .iter()
        .find(|(name, _)| *name == command)
        .map(|(_, package)| *package)
        .unwrap_or(command)
}

/// Result of a single preflight check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    /// Command that was checked.
    pub command: String,

    /// Whether the command resolved.
    pub passed: bool,

    /// Human-readable message.
    pub message: String,

    /// Package that would provide the command.
    pub package: String,
}

impl CheckResult {
    /// Create a passing check result.
    pub fn pass(command: impl Into<String>, message: impl Into<String>) -> Self {
        let command = command.into();
        Self {
            package: package_for(&command).to_string(),
            command,
            passed: true,
            message: message.into(),
        }
    }

    /// Create a failing check result.
    pub fn fail(command: impl Into<String>, message: impl Into<String>) -> Self {
        let command = command.into();
        Self {
            package: package_for(&command).to_string(),
            command,
            passed: false,
            message: message.into(),
        }
    }
}

/// Comprehensive preflight report.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PreflightReport {
    pub checks: Vec<CheckResult>,
}

impl PreflightReport {
    /// Check if all preflight checks passed.
    pub fn is_ok(&self) -> bool {
        self.checks.iter().all(|check| check.passed)
    }

    /// Get all failing checks.
    pub fn errors(&self) -> Vec<&CheckResult> {
        self.checks.iter().filter(|check| !check.passed).collect()
    }

    /// Packages needed to fix failing checks, without duplicates.
    pub fn missing_packages(&self) -> Vec<String> {
        self.errors()
            .into_iter()
            .map(|check| check.package.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Log a summary of the preflight checks.
    pub fn log_summary(&self) {
        for check in &self.checks {
            if check.passed {
                info!("[OK] {}: {}", check.command, check.message);
            } else {
                warn!(
                    "[MISSING] {}: {} (package {})",
                    check.command, check.message, check.package
                );
            }
        }
    }
}

/// Preflight checker.
pub struct Preflight<R>
where
    R: CommandRunner,
{
    runner: Arc<R>,
    settings: PreflightSettings,
}

impl<R> Preflight<R>
where
    R: CommandRunner,
{
    /// Construct new preflight checker.
    pub fn new(runner: Arc<R>, settings: PreflightSettings) -> Self {
        Self { runner, settings }
    }

    /// Check that every configured command resolves.
    pub fn check(&self) -> PreflightReport {
        PreflightReport {
            checks: self
                .settings
                .commands
                .iter()
                .map(|command| match self.runner.which(command) {
                    Some(path) => CheckResult::pass(command, format!("found at {}", path.display())),
                    None => CheckResult::fail(command, "not found"),
                })
                .collect(),
        }
    }

    /// Check prerequisites and install whatever is missing.
    ///
    /// # Errors
    ///
    /// - Return [`PreflightError::Install`] if some package could not be
    ///   installed after all retries.
    /// - Return [`PreflightError::StillMissing`] if commands are still missing
    ///   after installation.
    #[instrument(skip(self), level = "debug")]
    pub async fn run(&self) -> Result<PreflightReport> {
        let report = self.check();
        report.log_summary();
        if report.is_ok() {
            info!("all prerequisites present");
            return Ok(report);
        }

        self.install_packages(report.missing_packages()).await?;

        let report = self.check();
        if !report.is_ok() {
            return Err(PreflightError::StillMissing {
                commands: report
                    .errors()
                    .into_iter()
                    .map(|check| check.command.clone())
                    .collect(),
            });
        }

        Ok(report)
    }

    /// Install packages in parallel, then retry failures serially.
    ///
    /// # Errors
    ///
    /// - Return [`PreflightError::Install`] listing packages that could not
    ///   be installed.
    pub async fn install_packages(&self, packages: Vec<String>) -> Result<()> {
        if packages.is_empty() {
            return Ok(());
        }

        if let Err(error) = self.runner.output(&apt::apt_get(["update"], None)) {
            warn!("failed to refresh package lists: {error}");
        }

        info!("install {} in parallel", packages.join(" "));
        let tasks = packages.iter().map(|package| {
            let runner = Arc::clone(&self.runner);
            let invocation = apt::install([package.as_str()]);
            tokio::task::spawn_blocking(move || runner.output(&invocation).map(|_| ()))
        });
        let results = join_all(tasks).await;

        let mut failed = Vec::new();
        for (package, result) in packages.into_iter().zip(results) {
            match result {
                Ok(Ok(())) => info!("installed {package}"),
                Ok(Err(error)) => {
                    warn!("parallel install of {package} failed: {error}");
                    failed.push(package);
                }
                Err(error) => {
                    warn!("parallel install of {package} did not finish: {error}");
                    failed.push(package);
                }
            }
        }

        let mut remaining = Vec::new();
        for package in failed {
            if !self.install_serially(&package).await {
                remaining.push(package);
            }
        }

        if !remaining.is_empty() {
            return Err(PreflightError::Install { packages: remaining });
        }

        Ok(())
    }

    async fn install_serially(&self, package: &str) -> bool {
        let attempts = self.settings.retries.max(1);
        let delay = Duration::from_secs(self.settings.retry_delay_secs);
        for attempt in 1..=attempts {
            match self.runner.output(&apt::install([package])) {
                Ok(_) => {
                    info!("installed {package} (attempt {attempt}/{attempts})");
                    return true;
                }
                Err(error) => warn!("install of {package} failed (attempt {attempt}/{attempts}): {error}"),
            }

            if attempt < attempts {
                tokio::time::sleep(delay).await;
            }
        }

        false
    }
}

/// Preflight error types.
#[derive(Debug, thiserror::Error)]
pub enum PreflightError {
    /// Packages could not be installed.
    #[error("failed to install packages: {}", packages.join(", "))]
    Install { packages: Vec<String> },

    /// Commands still missing after installation.
    #[error("commands still missing after installation: {}", commands.join(", "))]
    StillMissing { commands: Vec<String> },
}

/// Friendly result alias :3
pub type Result<T, E = PreflightError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syscall::fake::{failed, FakeRunner};
    use pretty_assertions::assert_eq;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    };

    fn settings(commands: &[&str]) -> PreflightSettings {
        PreflightSettings {
            commands: commands.iter().map(ToString::to_string).collect(),
            retries: 2,
            retry_delay_secs: 0,
        }
    }

    #[test]
    fn package_lookup() {
        assert_eq!(package_for("ssh-keygen"), "openssh-client");
        assert_eq!(package_for("curl"), "curl");
    }

    #[test]
    fn report_lists_missing_packages_once() {
        let runner = Arc::new(FakeRunner::new().install(["curl"]));
        let preflight = Preflight::new(runner, settings(&["curl", "ssh", "ssh-keygen", "gpg"]));
        let report = preflight.check();

        assert!(!report.is_ok());
        assert_eq!(report.errors().len(), 3);
        assert_eq!(report.missing_packages(), ["gnupg", "openssh-client"]);
    }

    #[tokio::test]
    async fn nothing_to_install() -> anyhow::Result<()> {
        let runner = Arc::new(FakeRunner::new().install(["curl"]));
        let preflight = Preflight::new(Arc::clone(&runner), settings(&["curl"]));
        preflight.run().await?;
        assert!(runner.calls().is_empty());

        Ok(())
    }

    #[tokio::test]
    async fn failed_parallel_install_is_retried_serially() -> anyhow::Result<()> {
        // First attempt at gnupg loses the apt lock race, the retry succeeds.
        let gnupg_attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&gnupg_attempts);
        let runner = Arc::new(FakeRunner::with_responder(move |invocation| {
            if invocation.args.last().map(String::as_str) == Some("gnupg")
                && counter.fetch_add(1, Ordering::SeqCst) == 0
            {
                return Err(failed(invocation));
            }
            Ok(String::new())
        }));
        let preflight = Preflight::new(Arc::clone(&runner), settings(&[]));
        preflight
            .install_packages(vec!["curl".into(), "gnupg".into()])
            .await?;

        let calls = runner.calls();
        assert_eq!(calls[0], "apt-get update");
        assert_eq!(gnupg_attempts.load(Ordering::SeqCst), 2);
        assert_eq!(calls.last().map(String::as_str), Some("apt-get install -y gnupg"));

        Ok(())
    }

    #[tokio::test]
    async fn exhausted_retries_are_reported() {
        let attempts = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&attempts);
        let runner = Arc::new(FakeRunner::with_responder(move |invocation| {
            if invocation.args.first().map(String::as_str) == Some("install") {
                *counter.lock().unwrap() += 1;
                return Err(failed(invocation));
            }
            Ok(String::new())
        }));
        let preflight = Preflight::new(runner, settings(&[]));
        let result = preflight.install_packages(vec!["snmpd".into()]).await;

        assert!(matches!(
            result,
            Err(PreflightError::Install { ref packages }) if packages == &["snmpd".to_string()]
        ));
        // One parallel attempt plus two serial retries.
        assert_eq!(*attempts.lock().unwrap(), 3);
    }
}
