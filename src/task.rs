// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Provisioning task dispatch.
//!
//! Every operation hostprep offers is a [`Task`]. The [`Provisioner`] owns
//! everything a task needs, i.e., the command runner, the loaded
//! configuration, and the target user, so the command line and the menu
//! drive the exact same code.

use crate::{
    access::{AccessConfigurator, AccessError},
    alias::{
        AliasError, AliasReconciler, FixedDecision, InquirePrompter, KnownAliasSet,
    },
    config::HostConfig,
    edit::EditError,
    keys::{KeyError, KeyProvisioner},
    path::TargetUser,
    preflight::{Preflight, PreflightError},
    profile::install_bashrc,
    service::{ServiceError, ServiceInstaller},
    syscall::{CommandRunner, SyscallError},
    update::Updater,
};

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::{info, instrument};

/// Default alias file, relative to the target user's home.
pub const DEFAULT_ALIAS_FILE: &str = ".bash_aliases";

/// How unknown aliases are decided on.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum AliasMode {
    /// Ask the operator for each unknown alias.
    #[default]
    Interactive,

    /// Keep every unknown alias without asking.
    KeepAll,

    /// Discard every unknown alias without asking.
    DiscardUnknown,
}

/// Provisioning operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    Preflight,
    Update,
    Sudoers,
    Ssh,
    Keygen,
    Bashrc,
    Aliases,
    Snmpd,
    Docker,
}

impl Task {
    /// Every task, in the order a full run performs them.
    pub const ALL: [Task; 9] = [
        Task::Preflight,
        Task::Update,
        Task::Sudoers,
        Task::Ssh,
        Task::Keygen,
        Task::Bashrc,
        Task::Aliases,
        Task::Snmpd,
        Task::Docker,
    ];

    /// Check if failure of this task must terminate the run.
    ///
    /// Access edits and package installation leave the host in a state that
    /// later steps depend on. Everything else can be retried on its own.
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            Task::Preflight
                | Task::Sudoers
                | Task::Ssh
                | Task::Snmpd
                | Task::Docker
        )
    }
}

impl Display for Task {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        let label = match self {
            Task::Preflight => "Check prerequisites",
            Task::Update => "Update system",
            Task::Sudoers => "Grant sudo rights",
            Task::Ssh => "Harden SSH daemon",
            Task::Keygen => "Generate SSH key",
            Task::Bashrc => "Install .bashrc",
            Task::Aliases => "Reconcile aliases",
            Task::Snmpd => "Install SNMP daemon",
            Task::Docker => "Install Docker",
        };
        fmt.write_str(label)
    }
}

/// Runs tasks against one host and one target user.
pub struct Provisioner<R>
where
    R: CommandRunner,
{
    runner: Arc<R>,
    config: HostConfig,
    user: TargetUser,
    alias_mode: AliasMode,
    alias_file: Option<PathBuf>,
}

impl<R> Provisioner<R>
where
    R: CommandRunner,
{
    /// Construct new provisioner.
    pub fn new(runner: Arc<R>, config: HostConfig, user: TargetUser) -> Self {
        Self {
            runner,
            config,
            user,
            alias_mode: AliasMode::default(),
            alias_file: None,
        }
    }

    /// Decide unknown aliases with given mode.
    pub fn with_alias_mode(mut self, mode: AliasMode) -> Self {
        self.alias_mode = mode;
        self
    }

    /// Reconcile given alias file instead of the configured one.
    pub fn with_alias_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.alias_file = Some(path.into());
        self
    }

    /// Alias file to reconcile.
    ///
    /// Relative paths are resolved against the target user's home directory.
    pub fn alias_path(&self) -> PathBuf {
        let path = self
            .alias_file
            .as_deref()
            .or(self.config.aliases.file.as_deref())
            .unwrap_or(Path::new(DEFAULT_ALIAS_FILE));
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.user.home_join(path)
        }
    }

    /// Run every task in order, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// - Return [`TaskError::Step`] naming the first failed task.
    pub async fn run_all(&self) -> Result<()> {
        for task in Task::ALL {
            info!("==> {task}");
            self.run(task).await.map_err(|err| TaskError::Step {
                task,
                source: Box::new(err),
            })?;
        }

        Ok(())
    }

    /// Run one task.
    ///
    /// # Errors
    ///
    /// - Return [`TaskError`] wrapping the failure of the underlying module.
    #[instrument(skip(self), fields(user = %self.user.name), level = "debug")]
    pub async fn run(&self, task: Task) -> Result<()> {
        match task {
            Task::Preflight => {
                Preflight::new(Arc::clone(&self.runner), self.config.preflight.clone())
                    .run()
                    .await?;
            }
            Task::Update => {
                Updater::new(Arc::clone(&self.runner), self.config.update.clone())
                    .run()
                    .await
                    .map_err(TaskError::Update)?;
            }
            Task::Sudoers => {
                let sudo = &self.config.sudo;
                self.access()
                    .configure_sudoers(&self.user, &sudo.dropin_dir, sudo.nopasswd)?;
            }
            Task::Ssh => {
                let ssh = &self.config.ssh;
                self.access().configure_sshd(
                    &ssh.sshd_config,
                    &ssh.dropin_glob,
                    &ssh.service,
                    &ssh.directives,
                )?;
            }
            Task::Keygen => {
                KeyProvisioner::new(
                    Arc::clone(&self.runner),
                    self.user.clone(),
                    self.config.ssh.key_type.as_str(),
                )
                .run()?;
            }
            Task::Bashrc => {
                install_bashrc(&self.user).map_err(TaskError::Profile)?;
            }
            Task::Aliases => self.reconcile_aliases()?,
            Task::Snmpd => self.services().install_snmpd(&self.config.snmpd)?,
            Task::Docker => self
                .services()
                .install_docker(&self.config.docker, &self.user)?,
        }

        Ok(())
    }

    fn access(&self) -> AccessConfigurator<R> {
        AccessConfigurator::new(Arc::clone(&self.runner))
    }

    fn services(&self) -> ServiceInstaller<R> {
        ServiceInstaller::new(Arc::clone(&self.runner))
    }

    fn reconcile_aliases(&self) -> Result<()> {
        let known = KnownAliasSet::from_commands(
            self.config
                .aliases
                .known
                .iter()
                .map(|(name, command)| (name.as_str(), command.as_str())),
        );
        let reconciler = AliasReconciler::for_user(&self.user, self.alias_path(), known);
        match self.alias_mode {
            AliasMode::Interactive => reconciler.run(&mut InquirePrompter)?,
            AliasMode::KeepAll => reconciler.run(&mut FixedDecision(true))?,
            AliasMode::DiscardUnknown => reconciler.run(&mut FixedDecision(false))?,
        };

        Ok(())
    }
}

/// Task error types.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    /// A task of a full run failed.
    #[error("step {task:?} failed")]
    Step {
        task: Task,
        #[source]
        source: Box<TaskError>,
    },

    #[error(transparent)]
    Preflight(#[from] PreflightError),

    #[error("system update failed")]
    Update(#[source] SyscallError),

    #[error(transparent)]
    Access(#[from] AccessError),

    #[error(transparent)]
    Keys(#[from] KeyError),

    #[error("failed to install .bashrc")]
    Profile(#[source] EditError),

    #[error(transparent)]
    Alias(#[from] AliasError),

    #[error(transparent)]
    Service(#[from] ServiceError),
}

impl TaskError {
    /// Check if the operator cancelled an alias prompt.
    pub fn is_abort(&self) -> bool {
        match self {
            Self::Alias(error) => error.is_abort(),
            Self::Step { source, .. } => source.is_abort(),
            _ => false,
        }
    }
}

/// Friendly result alias :3
pub type Result<T, E = TaskError> = std::result::Result<T, E>;
