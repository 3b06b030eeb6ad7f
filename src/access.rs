// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Sudoers and SSH daemon configuration.
//!
//! Both files are edited in place by keyword, never regenerated, so that
//! whatever else the administrator put in them survives. Every edit is
//! idempotent: applying the same settings twice leaves the file untouched the
//! second time, which in turn means the SSH daemon is only restarted when
//! something actually changed.
//!
//! # Sudoers
//!
//! The target user's rule lives in its own drop-in file under
//! `/etc/sudoers.d`, so `/etc/sudoers` itself is never touched. The candidate
//! file is checked with `visudo -cf` before it is moved into place, because a
//! broken sudoers file locks everybody out of sudo.
//!
//! # SSH Daemon
//!
//! The SSH daemon uses the __first__ value it reads for a keyword. Managed
//! keywords are therefore rewritten where they already occur, commented-out
//! defaults are activated in place, and later duplicates are dropped. Lines
//! after the first `Match` block belong to that block, and are left alone.
//!
//! Debian includes `/etc/ssh/sshd_config.d/*.conf` at the very top of the
//! main file, so drop-in files win over anything hostprep writes. Conflicts
//! there are reported, not fixed.

use crate::{
    edit::{atomic_write, replace_file, EditError, FileAttrs, Replaced},
    path::TargetUser,
    syscall::{CommandRunner, Invocation, SyscallError},
};

use std::{
    collections::BTreeMap,
    fs::read_to_string,
    io::Write,
    path::{Path, PathBuf},
    sync::Arc,
};
use tempfile::NamedTempFile;
use tracing::{info, instrument, warn};

/// Render sudoers drop-in file for a user.
pub fn render_sudoers_rule(user: &str, nopasswd: bool) -> String {
    let tag = if nopasswd { "NOPASSWD: " } else { "" };
    format!("# Managed by hostprep.\n{user} ALL=(ALL:ALL) {tag}ALL\n")
}

/// Determine sudoers drop-in file name for a user.
///
/// Sudo skips drop-in files whose name contains a `.` or ends with `~`.
pub fn sudoers_file_name(user: &str) -> String {
    user.replace('.', "_").trim_end_matches('~').to_string()
}

/// Split a configuration line into keyword and value.
///
/// Keywords are separated from values by whitespace or `=`.
fn split_directive(line: &str) -> Option<(&str, &str)> {
    let line = line.trim();
    let end = line.find(|c: char| c.is_whitespace() || c == '=')?;
    let (keyword, rest) = line.split_at(end);
    let value = rest.trim_start_matches(|c: char| c.is_whitespace() || c == '=');
    Some((keyword, value.trim()))
}

fn is_match_line(line: &str) -> bool {
    split_directive(line).is_some_and(|(keyword, _)| keyword.eq_ignore_ascii_case("match"))
}

fn active_keyword(line: &str) -> Option<&str> {
    let trimmed = line.trim_start();
    if trimmed.starts_with('#') {
        return None;
    }
    split_directive(trimmed).map(|(keyword, _)| keyword)
}

fn commented_keyword(line: &str) -> Option<&str> {
    let uncommented = line.trim_start().strip_prefix('#')?.trim_start();
    split_directive(uncommented)
        .filter(|(_, value)| !value.is_empty())
        .map(|(keyword, _)| keyword)
}

/// Apply keyword/value directives to sshd configuration text.
///
/// # Invariants
///
/// - Only lines before the first `Match` line are changed.
/// - Each managed keyword ends up with exactly one active line there.
/// - Applying the same directives twice is a no-op.
pub fn patch_directives(content: &str, directives: &BTreeMap<String, String>) -> String {
    let mut lines = content.lines().map(str::to_owned).collect::<Vec<_>>();

    for (keyword, value) in directives {
        let desired = format!("{keyword} {value}");
        let region_end = lines
            .iter()
            .position(|line| is_match_line(line))
            .unwrap_or(lines.len());
        let matches_keyword = |found: Option<&str>| found.is_some_and(|found| found.eq_ignore_ascii_case(keyword));

        let active = (0..region_end)
            .filter(|&index| matches_keyword(active_keyword(&lines[index])))
            .collect::<Vec<_>>();

        if let Some((&first, duplicates)) = active.split_first() {
            lines[first] = desired;
            // INVARIANT: Remove from the back so earlier indices stay valid.
            for &index in duplicates.iter().rev() {
                lines.remove(index);
            }
            continue;
        }

        let commented = (0..region_end).find(|&index| matches_keyword(commented_keyword(&lines[index])));
        match commented {
            Some(index) => lines[index] = desired,
            None => lines.insert(region_end, desired),
        }
    }

    let mut out = lines.join("\n");
    out.push('\n');
    out
}

/// Managed keyword set to a different value in a drop-in file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DropinConflict {
    pub path: PathBuf,
    pub keyword: String,
    pub value: String,
}

/// Find drop-in files overriding managed directives.
pub fn find_dropin_conflicts(
    pattern: &str,
    directives: &BTreeMap<String, String>,
) -> Vec<DropinConflict> {
    let paths = match glob::glob(pattern) {
        Ok(paths) => paths,
        Err(error) => {
            warn!("invalid drop-in pattern {pattern:?}: {error}");
            return Vec::new();
        }
    };

    let mut conflicts = Vec::new();
    for path in paths.filter_map(|entry| entry.ok()) {
        let Ok(content) = read_to_string(&path) else {
            warn!("cannot read drop-in file {:?}", path.display());
            continue;
        };

        for line in content.lines().take_while(|line| !is_match_line(line)) {
            if line.trim_start().starts_with('#') {
                continue;
            }
            let Some((keyword, value)) = split_directive(line) else {
                continue;
            };
            let managed = directives
                .iter()
                .find(|(managed, _)| managed.eq_ignore_ascii_case(keyword));
            if let Some((managed, expected)) = managed {
                if value != expected.as_str() {
                    conflicts.push(DropinConflict {
                        path: path.clone(),
                        keyword: managed.clone(),
                        value: value.to_string(),
                    });
                }
            }
        }
    }

    conflicts
}

/// Sudoers and SSH daemon configurator.
pub struct AccessConfigurator<R>
where
    R: CommandRunner,
{
    runner: Arc<R>,
}

impl<R> AccessConfigurator<R>
where
    R: CommandRunner,
{
    /// Construct new access configurator.
    pub fn new(runner: Arc<R>) -> Self {
        Self { runner }
    }

    /// Grant sudo rights to target user through a drop-in file.
    ///
    /// # Errors
    ///
    /// - Return [`AccessError::Validate`] if visudo rejects the rule.
    /// - Return [`AccessError::Edit`] if the file cannot be written.
    #[instrument(skip(self, user), fields(user = %user.name), level = "debug")]
    pub fn configure_sudoers(
        &self,
        user: &TargetUser,
        dropin_dir: &Path,
        nopasswd: bool,
    ) -> Result<Replaced> {
        let path = dropin_dir.join(sudoers_file_name(&user.name));
        let contents = render_sudoers_rule(&user.name, nopasswd);
        if read_to_string(&path).is_ok_and(|current| current == contents) {
            info!("sudoers rule for {} already in place", user.name);
            return Ok(Replaced::Unchanged);
        }

        let mut candidate = NamedTempFile::new().map_err(|err| AccessError::Candidate {
            source: err,
            path: path.clone(),
        })?;
        candidate
            .write_all(contents.as_bytes())
            .map_err(|err| AccessError::Candidate {
                source: err,
                path: path.clone(),
            })?;
        let check = Invocation::new(
            "visudo",
            ["-cf".to_string(), candidate.path().to_string_lossy().into_owned()],
        );
        self.runner
            .output(&check)
            .map_err(|err| AccessError::Validate {
                source: err,
                path: path.clone(),
            })?;

        Ok(replace_file(&path, &contents, FileAttrs::default().with_mode(0o440))?)
    }

    /// Enforce directives in sshd configuration and restart the daemon.
    ///
    /// The daemon is only restarted when the file changed. A configuration
    /// rejected by `sshd -t` is rolled back to the previous version.
    ///
    /// # Errors
    ///
    /// - Return [`AccessError::Read`] if sshd configuration cannot be read.
    /// - Return [`AccessError::Validate`] if sshd rejects the new file.
    /// - Return [`AccessError::Restart`] if the daemon fails to restart.
    #[instrument(skip(self, directives), level = "debug")]
    pub fn configure_sshd(
        &self,
        sshd_config: &Path,
        dropin_glob: &str,
        service: &str,
        directives: &BTreeMap<String, String>,
    ) -> Result<Replaced> {
        for conflict in find_dropin_conflicts(dropin_glob, directives) {
            warn!(
                "{:?} sets {} {}, which overrides the managed value",
                conflict.path.display(),
                conflict.keyword,
                conflict.value
            );
        }

        let previous = read_to_string(sshd_config).map_err(|err| AccessError::Read {
            source: err,
            path: sshd_config.into(),
        })?;
        let patched = patch_directives(&previous, directives);
        let replaced = replace_file(sshd_config, &patched, FileAttrs::default())?;
        if !replaced.changed() {
            info!("sshd configuration already up to date");
            return Ok(replaced);
        }

        let check = Invocation::new(
            "sshd",
            ["-t".to_string(), "-f".to_string(), sshd_config.to_string_lossy().into_owned()],
        );
        if let Err(error) = self.runner.output(&check) {
            warn!("sshd rejected new configuration, restoring previous version");
            atomic_write(sshd_config, &previous, FileAttrs::default())?;
            return Err(AccessError::Validate {
                source: error,
                path: sshd_config.into(),
            });
        }

        self.runner
            .output(&Invocation::new("systemctl", ["restart", service]))
            .map_err(AccessError::Restart)?;
        info!("restarted {service}");

        Ok(replaced)
    }
}

/// Access configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum AccessError {
    /// Configuration file cannot be read.
    #[error("failed to read {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Candidate file for validation cannot be written.
    #[error("failed to stage candidate for {:?}", path.display())]
    Candidate {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Validator rejected new configuration.
    #[error("new configuration for {:?} is invalid", path.display())]
    Validate {
        #[source]
        source: SyscallError,
        path: PathBuf,
    },

    /// Service failed to restart.
    #[error("failed to restart ssh daemon")]
    Restart(#[source] SyscallError),

    /// File replacement failed.
    #[error(transparent)]
    Edit(#[from] EditError),
}

/// Friendly result alias :3
pub type Result<T, E = AccessError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syscall::fake::{failed, FakeRunner};
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;
    use std::fs;

    fn directives(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(keyword, value)| (keyword.to_string(), value.to_string()))
            .collect()
    }

    fn test_user() -> TargetUser {
        TargetUser {
            name: "deploy".into(),
            uid: 1000,
            gid: 1000,
            home: PathBuf::from("/home/deploy"),
        }
    }

    const SSHD: &str = indoc! {r#"
        Include /etc/ssh/sshd_config.d/*.conf

        #Port 22
        #PermitRootLogin prohibit-password
        PasswordAuthentication yes
        # To disable tunneled clear text passwords, change to no here!
        X11Forwarding yes
        x11forwarding no

        Match User anoncvs
            X11Forwarding no
            PermitRootLogin yes
    "#};

    #[test]
    fn patch_sshd_directives() {
        let result = patch_directives(
            SSHD,
            &directives(&[
                ("PermitRootLogin", "no"),
                ("X11Forwarding", "no"),
                ("PubkeyAuthentication", "yes"),
            ]),
        );
        let expect = indoc! {r#"
            Include /etc/ssh/sshd_config.d/*.conf

            #Port 22
            PermitRootLogin no
            PasswordAuthentication yes
            # To disable tunneled clear text passwords, change to no here!
            X11Forwarding no

            PubkeyAuthentication yes
            Match User anoncvs
                X11Forwarding no
                PermitRootLogin yes
        "#};
        assert_eq!(result, expect);
    }

    #[test]
    fn patch_sshd_directives_is_idempotent() {
        let wanted = directives(&[("PermitRootLogin", "no"), ("Port", "2222")]);
        let once = patch_directives(SSHD, &wanted);
        let twice = patch_directives(&once, &wanted);
        assert_eq!(once, twice);
    }

    #[test]
    fn patch_equals_separated_directive() {
        let result = patch_directives("PermitRootLogin=yes\n", &directives(&[("PermitRootLogin", "no")]));
        assert_eq!(result, "PermitRootLogin no\n");
    }

    #[test]
    fn sudoers_rule_rendering() {
        assert_eq!(
            render_sudoers_rule("deploy", true),
            "# Managed by hostprep.\ndeploy ALL=(ALL:ALL) NOPASSWD: ALL\n"
        );
        assert_eq!(
            render_sudoers_rule("deploy", false),
            "# Managed by hostprep.\ndeploy ALL=(ALL:ALL) ALL\n"
        );
        assert_eq!(sudoers_file_name("jane.doe"), "jane_doe");
    }

    #[sealed_test]
    fn sudoers_written_once_after_validation() -> anyhow::Result<()> {
        let dir = std::env::current_dir()?;
        let runner = Arc::new(FakeRunner::new());
        let configurator = AccessConfigurator::new(Arc::clone(&runner));

        let first = configurator.configure_sudoers(&test_user(), &dir, true)?;
        assert!(first.changed());
        assert_eq!(
            fs::read_to_string(dir.join("deploy"))?,
            render_sudoers_rule("deploy", true)
        );
        let second = configurator.configure_sudoers(&test_user(), &dir, true)?;
        assert_eq!(second, Replaced::Unchanged);

        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].starts_with("visudo -cf "));

        Ok(())
    }

    #[sealed_test]
    fn rejected_sudoers_rule_is_not_written() -> anyhow::Result<()> {
        let dir = std::env::current_dir()?;
        let runner = Arc::new(FakeRunner::with_responder(|invocation| Err(failed(invocation))));
        let configurator = AccessConfigurator::new(runner);

        let result = configurator.configure_sudoers(&test_user(), &dir, true);
        assert!(matches!(result, Err(AccessError::Validate { .. })));
        assert!(!dir.join("deploy").exists());

        Ok(())
    }

    #[sealed_test]
    fn sshd_restarted_only_on_change() -> anyhow::Result<()> {
        let dir = std::env::current_dir()?;
        let config = dir.join("sshd_config");
        fs::write(&config, SSHD)?;
        let dropins = format!("{}/sshd_config.d/*.conf", dir.display());
        let wanted = directives(&[("PermitRootLogin", "no")]);

        let runner = Arc::new(FakeRunner::new());
        let configurator = AccessConfigurator::new(Arc::clone(&runner));
        assert!(configurator
            .configure_sshd(&config, &dropins, "ssh", &wanted)?
            .changed());
        assert!(!configurator
            .configure_sshd(&config, &dropins, "ssh", &wanted)?
            .changed());

        let calls = runner.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].starts_with("sshd -t -f "));
        assert_eq!(calls[1], "systemctl restart ssh");

        Ok(())
    }

    #[sealed_test]
    fn rejected_sshd_config_is_rolled_back() -> anyhow::Result<()> {
        let dir = std::env::current_dir()?;
        let config = dir.join("sshd_config");
        fs::write(&config, SSHD)?;

        let runner = Arc::new(FakeRunner::with_responder(|invocation| {
            if invocation.program == "sshd" {
                return Err(failed(invocation));
            }
            Ok(String::new())
        }));
        let configurator = AccessConfigurator::new(Arc::clone(&runner));
        let result = configurator.configure_sshd(
            &config,
            "no-dropins/*.conf",
            "ssh",
            &directives(&[("Port", "2222")]),
        );

        assert!(matches!(result, Err(AccessError::Validate { .. })));
        assert_eq!(fs::read_to_string(&config)?, SSHD);
        assert!(runner.calls().iter().all(|call| !call.starts_with("systemctl")));

        Ok(())
    }

    #[sealed_test]
    fn dropin_conflicts_are_found() -> anyhow::Result<()> {
        let dir = std::env::current_dir()?.join("sshd_config.d");
        fs::create_dir_all(&dir)?;
        fs::write(dir.join("50-cloud-init.conf"), "PasswordAuthentication yes\n")?;
        fs::write(dir.join("60-fine.conf"), "# PermitRootLogin yes\nPermitRootLogin no\n")?;

        let result = find_dropin_conflicts(
            &format!("{}/*.conf", dir.display()),
            &directives(&[("PasswordAuthentication", "no"), ("PermitRootLogin", "no")]),
        );
        assert_eq!(
            result,
            [DropinConflict {
                path: dir.join("50-cloud-init.conf"),
                keyword: "PasswordAuthentication".into(),
                value: "yes".into(),
            }]
        );

        Ok(())
    }
}
