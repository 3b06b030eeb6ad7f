// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Service installation.
//!
//! Installs and configures the SNMP daemon, and the Docker engine from
//! Docker's own apt repository. Both are plain sequences of package manager
//! steps, made idempotent by checking for what is already there.

use crate::{
    apt,
    config::{DockerSettings, SnmpdSettings},
    edit::{replace_file, EditError, FileAttrs},
    path::TargetUser,
    syscall::{CommandRunner, Invocation, SyscallError},
};

use std::{
    fs::read_to_string,
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::{info, instrument};

/// Render SNMP daemon configuration.
pub fn render_snmpd_conf(settings: &SnmpdSettings) -> String {
    format!(
        "# Managed by hostprep.\n\
         agentAddress {}\n\
         rocommunity {} {}\n\
         sysLocation {}\n\
         sysContact {}\n\
         includeAllDisks 10%\n",
        settings.agent_address, settings.community, settings.source, settings.location, settings.contact
    )
}

/// Extract release codename from `/etc/os-release` content.
pub fn os_codename(os_release: &str) -> Option<String> {
    os_release.lines().find_map(|line| {
        let value = line.trim().strip_prefix("VERSION_CODENAME=")?;
        let value = value.trim_matches(|c| c == '"' || c == '\'');
        (!value.is_empty()).then(|| value.to_string())
    })
}

/// Render apt source line for Docker's repository.
pub fn docker_source_line(arch: &str, keyring: &Path, repo_url: &str, codename: &str) -> String {
    format!(
        "deb [arch={arch} signed-by={}] {repo_url} {codename} stable\n",
        keyring.display()
    )
}

/// File locations touched by the Docker installation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DockerPaths {
    pub keyring_dir: PathBuf,
    pub source_list: PathBuf,
    pub os_release: PathBuf,
}

impl DockerPaths {
    /// Path of Docker's repository signing key.
    pub fn keyring(&self) -> PathBuf {
        self.keyring_dir.join("docker.asc")
    }
}

impl Default for DockerPaths {
    fn default() -> Self {
        Self {
            keyring_dir: PathBuf::from("/etc/apt/keyrings"),
            source_list: PathBuf::from("/etc/apt/sources.list.d/docker.list"),
            os_release: PathBuf::from("/etc/os-release"),
        }
    }
}

/// Service installer.
pub struct ServiceInstaller<R>
where
    R: CommandRunner,
{
    runner: Arc<R>,
    docker_paths: DockerPaths,
}

impl<R> ServiceInstaller<R>
where
    R: CommandRunner,
{
    /// Construct new service installer.
    pub fn new(runner: Arc<R>) -> Self {
        Self {
            runner,
            docker_paths: DockerPaths::default(),
        }
    }

    /// Use different Docker file locations.
    pub fn with_docker_paths(mut self, paths: DockerPaths) -> Self {
        self.docker_paths = paths;
        self
    }

    fn call(&self, program: &str, args: &[&str]) -> Result<String> {
        Ok(self.runner.output(&Invocation::new(program, args.iter().copied()))?)
    }

    /// Install and configure the SNMP daemon.
    ///
    /// # Errors
    ///
    /// - Return [`ServiceError::Syscall`] if a package or service step fails.
    /// - Return [`ServiceError::Edit`] if the configuration cannot be written.
    #[instrument(skip(self, settings), level = "debug")]
    pub fn install_snmpd(&self, settings: &SnmpdSettings) -> Result<()> {
        if self.runner.which("snmpd").is_none() {
            info!("install snmpd");
            self.runner.output(&apt::install(["snmpd"]))?;
        }

        let replaced = replace_file(
            &settings.config_path,
            &render_snmpd_conf(settings),
            FileAttrs::default().with_mode(0o600),
        )?;
        self.call("systemctl", &["enable", "--now", "snmpd"])?;
        if replaced.changed() {
            self.call("systemctl", &["restart", "snmpd"])?;
            info!("restarted snmpd with new configuration");
        }

        Ok(())
    }

    /// Install Docker engine from Docker's apt repository.
    ///
    /// # Errors
    ///
    /// - Return [`ServiceError::Syscall`] if a package step fails.
    /// - Return [`ServiceError::OsRelease`] if the release codename cannot be
    ///   determined.
    /// - Return [`ServiceError::Edit`] if the apt source cannot be written.
    #[instrument(skip(self, settings, user), fields(user = %user.name), level = "debug")]
    pub fn install_docker(&self, settings: &DockerSettings, user: &TargetUser) -> Result<()> {
        if self.runner.which("docker").is_some() {
            info!("docker already installed");
        } else {
            self.add_docker_repository(settings)?;
            self.runner.output(&apt::apt_get(["update"], None))?;
            self.runner.output(&apt::install(settings.packages.iter().map(String::as_str)))?;
            info!("installed docker engine");
        }

        if settings.add_user_to_group {
            self.call("usermod", &["-aG", "docker", &user.name])?;
            info!("added {} to docker group", user.name);
        }

        Ok(())
    }

    fn add_docker_repository(&self, settings: &DockerSettings) -> Result<()> {
        self.runner
            .output(&apt::install(["ca-certificates", "curl", "gnupg"]))?;

        let keyring_dir = self.docker_paths.keyring_dir.to_string_lossy().into_owned();
        let keyring = self.docker_paths.keyring().to_string_lossy().into_owned();
        let key_url = format!("{}/gpg", settings.repo_url);
        self.call("install", &["-m", "0755", "-d", &keyring_dir])?;
        self.call("curl", &["-fsSL", &key_url, "-o", &keyring])?;
        self.call("chmod", &["a+r", &keyring])?;

        let arch = self.call("dpkg", &["--print-architecture"])?.trim().to_string();
        let os_release = &self.docker_paths.os_release;
        let codename = read_to_string(os_release)
            .ok()
            .as_deref()
            .and_then(os_codename)
            .ok_or_else(|| ServiceError::OsRelease {
                path: os_release.clone(),
            })?;

        let line = docker_source_line(&arch, &self.docker_paths.keyring(), &settings.repo_url, &codename);
        replace_file(
            &self.docker_paths.source_list,
            &line,
            FileAttrs::default().with_mode(0o644),
        )?;

        Ok(())
    }
}

/// Service installation error types.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Release codename missing from os-release file.
    #[error("cannot determine release codename from {:?}", path.display())]
    OsRelease { path: PathBuf },

    #[error(transparent)]
    Syscall(#[from] SyscallError),

    #[error(transparent)]
    Edit(#[from] EditError),
}

/// Friendly result alias :3
pub type Result<T, E = ServiceError> = std::result::Result<T, E>;
