// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Path and user resolution utilities.
//!
//! Determine relevent path information for external files that need to be
//! interacted with, and the identity of the account being provisioned.
//!
//! Hostprep is usually run through sudo, so the account that owns the shell
//! profile is not the account running the process. The target user is
//! resolved once and passed around explicitly instead of being read from the
//! environment wherever it is needed.

use nix::{errno::Errno, unistd::User};
use std::{
    env,
    path::{Path, PathBuf},
};

/// Determine default absolute path to the configuration file.
///
/// Uses XDG Base Directory path `$XDG_CONFIG_HOME/hostprep/config.toml`.
/// Does not check if the path returned actually exists.
///
/// # Errors
///
/// - Return [`PathError::NoWayHome`] if configuration directory path cannot
///   be determined.
///
/// # See Also
///
/// - [XDG Base Directory](https://wiki.archlinux.org/title/XDG_Base_Directory)
pub fn default_config_path() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|path| path.join("hostprep").join("config.toml"))
        .ok_or(PathError::NoWayHome)
}

/// Name of the user that invoked hostprep.
///
/// Prefers `SUDO_USER` so that `sudo hostprep` provisions the caller rather
/// than root.
pub fn invoking_user_name() -> Option<String> {
    ["SUDO_USER", "USER", "LOGNAME"]
        .into_iter()
        .filter_map(|var| env::var(var).ok())
        .find(|name| !name.is_empty())
}

/// Account being provisioned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetUser {
    /// Login name.
    pub name: String,

    /// Numeric user id.
    pub uid: u32,

    /// Numeric primary group id.
    pub gid: u32,

    /// Home directory.
    pub home: PathBuf,
}

impl TargetUser {
    /// Look up user through the system account database.
    ///
    /// Goes through NSS, so accounts served by LDAP or sssd resolve the same
    /// way local ones do.
    ///
    /// # Errors
    ///
    /// - Return [`PathError::Lookup`] if account database query fails.
    /// - Return [`PathError::UnknownUser`] if no entry matches.
    pub fn lookup(name: impl AsRef<str>) -> Result<Self> {
        let name = name.as_ref();
        let user = User::from_name(name)
            .map_err(|err| PathError::Lookup {
                source: err,
                name: name.into(),
            })?
            .ok_or_else(|| PathError::UnknownUser { name: name.into() })?;

        Ok(Self::from(user))
    }

    /// Resolve path relative to user's home directory.
    pub fn home_join(&self, path: impl AsRef<Path>) -> PathBuf {
        self.home.join(path)
    }
}

impl From<User> for TargetUser {
    fn from(user: User) -> Self {
        Self {
            name: user.name,
            uid: user.uid.as_raw(),
            gid: user.gid.as_raw(),
            home: user.dir,
        }
    }
}

/// Path resolution error types.
#[derive(Debug, thiserror::Error)]
pub enum PathError {
    /// No way to determine user's configuration directory.
    #[error("cannot determine absolute path to user's configuration directory")]
    NoWayHome,

    /// Account database query failed.
    #[error("failed to look up user {name:?}")]
    Lookup {
        #[source]
        source: Errno,
        name: String,
    },

    /// Account does not exist.
    #[error("user {name:?} does not exist")]
    UnknownUser { name: String },
}

/// Friendly result alias :3
pub type Result<T, E = PathError> = std::result::Result<T, E>;
