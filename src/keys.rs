// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! SSH key pair provisioning.

use crate::{
    path::TargetUser,
    syscall::{CommandRunner, Invocation, SyscallError},
};

use std::{
    fs::{self, Permissions},
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::{info, instrument, warn};

/// Outcome of [`KeyProvisioner::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyOutcome {
    /// New key pair written at given private key path.
    Generated(PathBuf),

    /// Key pair already existed at given private key path.
    Existing(PathBuf),
}

/// Generate SSH key pair for target user.
pub struct KeyProvisioner<R>
where
    R: CommandRunner,
{
    runner: Arc<R>,
    user: TargetUser,
    key_type: String,
}

impl<R> KeyProvisioner<R>
where
    R: CommandRunner,
{
    /// Construct new key provisioner.
    pub fn new(runner: Arc<R>, user: TargetUser, key_type: impl Into<String>) -> Self {
        Self {
            runner,
            user,
            key_type: key_type.into(),
        }
    }

    /// Directory holding the user's keys.
    pub fn ssh_dir(&self) -> PathBuf {
        self.user.home_join(".ssh")
    }

    /// Path of the user's private key.
    pub fn key_path(&self) -> PathBuf {
        self.ssh_dir().join(format!("id_{}", self.key_type))
    }

    /// Generate key pair if absent, then fix ownership and permissions.
    ///
    /// # Errors
    ///
    /// - Return [`KeyError::CreateDir`] if `~/.ssh` cannot be created.
    /// - Return [`KeyError::Keygen`] if ssh-keygen fails.
    /// - Return [`KeyError::Permissions`] if ownership or mode cannot be set.
    #[instrument(skip(self), fields(user = %self.user.name), level = "debug")]
    pub fn run(&self) -> Result<KeyOutcome> {
        let ssh_dir = self.ssh_dir();
        let key_path = self.key_path();

        mkdirp::mkdirp(&ssh_dir).map_err(|err| KeyError::CreateDir {
            source: err,
            path: ssh_dir.clone(),
        })?;

        let outcome = if key_path.exists() {
            info!("key {:?} already exists", key_path.display());
            KeyOutcome::Existing(key_path.clone())
        } else {
            let comment = format!("{}@{}", self.user.name, self.hostname());
            let keygen = Invocation::new(
                "ssh-keygen",
                [
                    "-q".to_string(),
                    "-t".to_string(),
                    self.key_type.clone(),
                    "-N".to_string(),
                    String::new(),
                    "-C".to_string(),
                    comment,
                    "-f".to_string(),
                    key_path.to_string_lossy().into_owned(),
                ],
            );
            self.runner.output(&keygen)?;
            info!("generated {:?}", key_path.display());
            KeyOutcome::Generated(key_path.clone())
        };

        self.fix_permissions(&ssh_dir, &key_path)?;

        Ok(outcome)
    }

    fn hostname(&self) -> String {
        match self.runner.output(&Invocation::new("hostname", Vec::<String>::new())) {
            Ok(name) if !name.trim().is_empty() => name.trim().to_string(),
            Ok(_) => "localhost".into(),
            Err(error) => {
                warn!("cannot determine hostname: {error}");
                "localhost".into()
            }
        }
    }

    fn fix_permissions(&self, ssh_dir: &Path, key_path: &Path) -> Result<()> {
        let public = key_path.with_extension("pub");
        let targets = [(ssh_dir, 0o700), (key_path, 0o600), (public.as_path(), 0o644)];
        for (path, mode) in targets {
            if !path.exists() {
                continue;
            }
            set_owner_and_mode(path, self.user.uid, self.user.gid, mode).map_err(|err| {
                KeyError::Permissions {
                    source: err,
                    path: path.into(),
                }
            })?;
        }

        Ok(())
    }
}

#[cfg(unix)]
fn set_owner_and_mode(path: &Path, uid: u32, gid: u32, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::{chown, MetadataExt, PermissionsExt};

    fs::set_permissions(path, Permissions::from_mode(mode))?;
    let meta = fs::metadata(path)?;
    if meta.uid() != uid || meta.gid() != gid {
        chown(path, Some(uid), Some(gid))?;
    }

    Ok(())
}

#[cfg(not(unix))]
fn set_owner_and_mode(_path: &Path, _uid: u32, _gid: u32, _mode: u32) -> std::io::Result<()> {
    Ok(())
}

/// Key provisioning error types.
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("failed to create {:?}", path.display())]
    CreateDir {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    #[error("failed to set ownership or permissions of {:?}", path.display())]
    Permissions {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    #[error(transparent)]
    Keygen(#[from] SyscallError),
}

/// Friendly result alias :3
pub type Result<T, E = KeyError> = std::result::Result<T, E>;

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::syscall::fake::FakeRunner;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;
    use std::os::unix::fs::{MetadataExt, PermissionsExt};

    fn current_user() -> anyhow::Result<TargetUser> {
        let home = std::env::current_dir()?;
        let meta = fs::metadata(&home)?;
        Ok(TargetUser {
            name: "deploy".into(),
            uid: meta.uid(),
            gid: meta.gid(),
            home,
        })
    }

    fn keygen_writing_files() -> FakeRunner {
        FakeRunner::with_responder(|invocation| {
            if invocation.program == "hostname" {
                return Ok("web01\n".into());
            }
            if let Some(path) = invocation.args.last() {
                let spawn_err = |err: std::io::Error| SyscallError::Spawn {
                    source: err,
                    program: invocation.program.clone(),
                };
                fs::write(path, "private").map_err(spawn_err)?;
                fs::write(format!("{path}.pub"), "public").map_err(spawn_err)?;
            }
            Ok(String::new())
        })
    }

    #[sealed_test]
    fn generate_missing_key() -> anyhow::Result<()> {
        let user = current_user()?;
        let runner = Arc::new(keygen_writing_files());
        let provisioner = KeyProvisioner::new(Arc::clone(&runner), user, "ed25519");
        let key_path = provisioner.key_path();

        assert_eq!(provisioner.run()?, KeyOutcome::Generated(key_path.clone()));
        let calls = runner.calls();
        assert_eq!(calls[0], "hostname");
        assert_eq!(
            calls[1],
            format!(
                "ssh-keygen -q -t ed25519 -N  -C deploy@web01 -f {}",
                key_path.display()
            )
        );

        let mode = |path: &Path| -> anyhow::Result<u32> {
            Ok(fs::metadata(path)?.permissions().mode() & 0o777)
        };
        assert_eq!(mode(&provisioner.ssh_dir())?, 0o700);
        assert_eq!(mode(&key_path)?, 0o600);
        assert_eq!(mode(&key_path.with_extension("pub"))?, 0o644);

        Ok(())
    }

    #[sealed_test]
    fn existing_key_is_left_alone() -> anyhow::Result<()> {
        let user = current_user()?;
        let runner = Arc::new(FakeRunner::new());
        let provisioner = KeyProvisioner::new(Arc::clone(&runner), user, "ed25519");
        fs::create_dir_all(provisioner.ssh_dir())?;
        fs::write(provisioner.key_path(), "private")?;
        fs::set_permissions(provisioner.key_path(), Permissions::from_mode(0o644))?;

        assert_eq!(
            provisioner.run()?,
            KeyOutcome::Existing(provisioner.key_path())
        );
        assert!(runner.calls().is_empty());
        assert_eq!(
            fs::metadata(provisioner.key_path())?.permissions().mode() & 0o777,
            0o600
        );

        Ok(())
    }
}
