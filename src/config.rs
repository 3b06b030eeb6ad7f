// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout.
//!
//! Specify the layout of the configuration file that hostprep uses to
//! simplify the process of serialization and deserialization. Every section
//! is optional, and every missing field falls back to a sensible default for
//! a stock Debian host. Thus, hostprep works without any configuration file
//! at all.
//!
//! # General Layout
//!
//! ```toml
//! [user]
//! name = "deploy"
//!
//! [aliases]
//! file = ".bash_aliases"
//!
//! [aliases.known]
//! reb = "sudo reboot"
//! sen = "watch -n 1 sensors"
//!
//! [update]
//! proxy = "http://10.0.0.1:3128"
//!
//! [ssh.directives]
//! PermitRootLogin = "no"
//! ```

use crate::alias::{AliasEntry, DEFAULT_ALIASES};

use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    fs::read_to_string,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::debug;

/// Host configuration layout.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HostConfig {
    /// Account to provision.
    pub user: UserSettings,

    /// Alias reconciliation settings.
    pub aliases: AliasSettings,

    /// System update settings.
    pub update: UpdateSettings,

    /// Prerequisite command checks.
    pub preflight: PreflightSettings,

    /// Sudoers rule settings.
    pub sudo: SudoSettings,

    /// SSH daemon hardening and key generation settings.
    pub ssh: SshSettings,

    /// SNMP daemon settings.
    pub snmpd: SnmpdSettings,

    /// Docker engine settings.
    pub docker: DockerSettings,
}

impl HostConfig {
    /// Load configuration file.
    ///
    /// A missing configuration file is not an error, the default
    /// configuration is used instead.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Read`] if file exists but cannot be read.
    /// - Return [`ConfigError::Deserialize`] if file is not valid.
    /// - Return [`ConfigError::InvalidAlias`] if a known alias cannot be
    ///   written as a single declaration.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!("no configuration at {:?}, using defaults", path.display());
            return Ok(Self::default());
        }

        read_to_string(path)
            .map_err(|err| ConfigError::Read {
                source: err,
                path: path.into(),
            })?
            .parse()
    }
}

impl FromStr for HostConfig {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut config: HostConfig =
            toml::de::from_str(data).map_err(ConfigError::Deserialize)?;

        // INVARIANT: Perform shell expansion on all path fields.
        if let Some(file) = &config.aliases.file {
            config.aliases.file = Some(expand_path(file)?);
        }
        config.sudo.dropin_dir = expand_path(&config.sudo.dropin_dir)?;
        config.ssh.sshd_config = expand_path(&config.ssh.sshd_config)?;
        config.snmpd.config_path = expand_path(&config.snmpd.config_path)?;

        // INVARIANT: Known aliases must be written as declarations that parse back as themselves.
        for (name, command) in &config.aliases.known {
            AliasEntry::check_name(name)
                .and_then(|_| AliasEntry::check_command(command))
                .map_err(|reason| ConfigError::InvalidAlias {
                    name: name.clone(),
                    reason,
                })?;
        }

        Ok(config)
    }
}

impl Display for HostConfig {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

fn expand_path(path: &Path) -> Result<PathBuf> {
    Ok(PathBuf::from(
        shellexpand::full(path.to_string_lossy().as_ref())
            .map_err(ConfigError::ShellExpansion)?
            .into_owned(),
    ))
}

/// Target account settings.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UserSettings {
    /// Login name of account to provision. Defaults to the invoking user.
    pub name: Option<String>,
}

/// Alias reconciliation settings.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AliasSettings {
    /// Alias file. Relative paths are resolved against the target user's
    /// home directory.
    pub file: Option<PathBuf>,

    /// Tool-owned aliases, name to command.
    pub known: BTreeMap<String, String>,
}

impl Default for AliasSettings {
    fn default() -> Self {
        Self {
            file: None,
            known: DEFAULT_ALIASES
                .iter()
                .map(|(name, command)| (name.to_string(), command.to_string()))
                .collect(),
        }
    }
}

/// System update settings.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpdateSettings {
    /// HTTP proxy for apt, used only when reachable.
    pub proxy: Option<String>,

    /// Seconds to wait for the proxy to accept a connection.
    pub probe_timeout_secs: u64,

    /// Remove orphaned packages after upgrade.
    pub autoremove: bool,
}

impl Default for UpdateSettings {
    fn default() -> Self {
        Self {
            proxy: None,
            probe_timeout_secs: 3,
            autoremove: true,
        }
    }
}

/// Prerequisite command checks.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PreflightSettings {
    /// Commands that must resolve in `PATH`.
    pub commands: Vec<String>,

    /// Serial install attempts per package after the parallel pass.
    pub retries: u32,

    /// Seconds between serial attempts.
    pub retry_delay_secs: u64,
}

impl Default for PreflightSettings {
    fn default() -> Self {
        Self {
            commands: ["sudo", "curl", "gpg", "ssh-keygen", "sshd", "visudo", "watch"]
                .into_iter()
                .map(Into::into)
                .collect(),
            retries: 3,
            retry_delay_secs: 5,
        }
    }
}

/// Sudoers rule settings.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SudoSettings {
    /// Directory holding per-user sudoers drop-in files.
    pub dropin_dir: PathBuf,

    /// Grant passwordless sudo.
    pub nopasswd: bool,
}

impl Default for SudoSettings {
    fn default() -> Self {
        Self {
            dropin_dir: PathBuf::from("/etc/sudoers.d"),
            nopasswd: true,
        }
    }
}

/// SSH daemon and key settings.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SshSettings {
    /// Main sshd configuration file.
    pub sshd_config: PathBuf,

    /// Glob matching sshd drop-in files checked for conflicts.
    pub dropin_glob: String,

    /// Systemd unit to restart after changes.
    pub service: String,

    /// Key type passed to ssh-keygen.
    pub key_type: String,

    /// Directives enforced in sshd configuration, keyword to value.
    pub directives: BTreeMap<String, String>,
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            sshd_config: PathBuf::from("/etc/ssh/sshd_config"),
            dropin_glob: "/etc/ssh/sshd_config.d/*.conf".into(),
            service: "ssh".into(),
            key_type: "ed25519".into(),
            directives: [
                ("PermitRootLogin", "no"),
                ("PubkeyAuthentication", "yes"),
                ("X11Forwarding", "no"),
            ]
            .into_iter()
            .map(|(keyword, value)| (keyword.to_string(), value.to_string()))
            .collect(),
        }
    }
}

/// SNMP daemon settings.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SnmpdSettings {
    pub config_path: PathBuf,
    pub agent_address: String,
    pub community: String,
    pub source: String,
    pub location: String,
    pub contact: String,
}

impl Default for SnmpdSettings {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from("/etc/snmp/snmpd.conf"),
            agent_address: "udp:161,udp6:[::1]:161".into(),
            community: "public".into(),
            source: "localhost".into(),
            location: "Unknown".into(),
            contact: "root@localhost".into(),
        }
    }
}

/// Docker engine settings.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DockerSettings {
    /// Base URL of Docker's apt repository.
    pub repo_url: String,

    /// Packages to install from Docker's repository.
    pub packages: Vec<String>,

    /// Add target user to the docker group.
    pub add_user_to_group: bool,
}

impl Default for DockerSettings {
    fn default() -> Self {
        Self {
            repo_url: "https://download.docker.com/linux/debian".into(),
            packages: [
                "docker-ce",
                "docker-ce-cli",
                "containerd.io",
                "docker-buildx-plugin",
                "docker-compose-plugin",
            ]
            .into_iter()
            .map(Into::into)
            .collect(),
            add_user_to_group: true,
        }
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read configuration at {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Failed to deserialize configuration.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to serialize configuration.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    /// Failed to perform shell expansion on configuration.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),

    /// Known alias cannot be written as a single declaration.
    #[error("invalid known alias {name:?}: {reason}")]
    InvalidAlias { name: String, reason: &'static str },
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;
