// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use hostprep::{
    access::patch_directives,
    alias::{AliasEntry, AliasReconciler, Answer, FixedDecision, KnownAliasSet, ScriptedDecisions},
    config::HostConfig,
};

use anyhow::Result;
use indoc::indoc;
use pretty_assertions::assert_eq;
use sealed_test::prelude::*;
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

/// Alias file inside a scratch directory.
pub(crate) struct AliasFixture {
    dir: PathBuf,
    target: PathBuf,
}

impl AliasFixture {
    pub(crate) fn new(contents: impl AsRef<str>) -> Result<Self> {
        let dir = std::env::current_dir()?;
        let target = dir.join(".bash_aliases");
        fs::write(&target, contents.as_ref())?;

        Ok(Self { dir, target })
    }

    pub(crate) fn target(&self) -> &Path {
        &self.target
    }

    pub(crate) fn contents(&self) -> Result<String> {
        Ok(fs::read_to_string(&self.target)?)
    }

    pub(crate) fn backups(&self) -> Result<Vec<PathBuf>> {
        let mut backups = fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.to_string_lossy().ends_with(".bak") || is_numbered_backup(path))
            .collect::<Vec<_>>();
        backups.sort();

        Ok(backups)
    }
}

fn is_numbered_backup(path: &Path) -> bool {
    path.file_name()
        .map(|name| name.to_string_lossy().contains(".bak."))
        .unwrap_or(false)
}

fn sample_known() -> KnownAliasSet {
    KnownAliasSet::from_commands([("reb", "sudo reboot"), ("sen", "watch -n 1 sensors")])
}

const SAMPLE: &str = indoc! {r#"
    # my custom shell
    alias reb="echo hi"
    alias foo="bar"
"#};

#[sealed_test]
fn sample_scenario_on_disk() -> Result<()> {
    let fixture = AliasFixture::new(SAMPLE)?;
    let reconciler = AliasReconciler::new("deploy", fixture.target(), sample_known());
    let mut decisions = ScriptedDecisions::new([Answer::Keep]);
    reconciler.run(&mut decisions)?;

    let expect = indoc! {r#"
        # my custom shell
        alias foo="bar"
        alias reb="sudo reboot"
        alias sen="watch -n 1 sensors"
    "#};
    assert_eq!(fixture.contents()?, expect);
    assert_eq!(decisions.asked(), ["foo".to_string()]);

    let backups = fixture.backups()?;
    assert_eq!(backups.len(), 1);
    assert_eq!(fs::read(&backups[0])?, SAMPLE.as_bytes());

    Ok(())
}

#[sealed_test]
fn second_run_changes_nothing() -> Result<()> {
    let fixture = AliasFixture::new(SAMPLE)?;
    let reconciler = AliasReconciler::new("deploy", fixture.target(), sample_known());

    reconciler.run(&mut FixedDecision(true))?;
    let first = fixture.contents()?;
    let mut decisions = ScriptedDecisions::default();
    reconciler.run(&mut decisions)?;

    assert_eq!(fixture.contents()?, first);
    assert_eq!(decisions.asked(), ["foo".to_string()]);
    assert_eq!(fixture.backups()?.len(), 2);

    Ok(())
}

#[sealed_test]
fn known_aliases_win_and_malformed_lines_survive() -> Result<()> {
    let fixture = AliasFixture::new(indoc! {r#"
        export EDITOR=vim
        alias ll="ls -l --color"
        alias broken
        alias gs='git status'
    "#})?;
    let config: HostConfig = indoc! {r#"
        [aliases.known]
        ll = "ls -alF"
        ports = "sudo ss -tulpn"
    "#}
    .parse()?;
    let known = KnownAliasSet::from_commands(
        config
            .aliases
            .known
            .iter()
            .map(|(name, command)| (name.as_str(), command.as_str())),
    );

    let mut decisions = ScriptedDecisions::new([Answer::Discard]);
    let result = AliasReconciler::new("deploy", fixture.target(), known).run(&mut decisions)?;
    let names = result.aliases().map(AliasEntry::name).collect::<Vec<_>>();
    assert_eq!(names, ["ll", "ports"]);

    let expect = indoc! {r#"
        export EDITOR=vim
        alias broken
        alias ll="ls -alF"
        alias ports="sudo ss -tulpn"
    "#};
    assert_eq!(fixture.contents()?, expect);
    assert_eq!(decisions.asked(), ["gs".to_string()]);

    Ok(())
}

#[sealed_test]
fn aborted_run_leaves_no_trace() -> Result<()> {
    let fixture = AliasFixture::new(SAMPLE)?;
    let reconciler = AliasReconciler::new("deploy", fixture.target(), sample_known());

    let result = reconciler.run(&mut ScriptedDecisions::new([Answer::Abort]));
    assert!(result.is_err_and(|err| err.is_abort()));
    assert_eq!(fixture.contents()?, SAMPLE);
    assert!(fixture.backups()?.is_empty());

    Ok(())
}

#[sealed_test]
fn crlf_file_is_stable_over_repeated_runs() -> Result<()> {
    let fixture = AliasFixture::new("# my custom shell\r\nexport X=1\r\nalias foo=\"bar\"\r\n")?;
    let config: HostConfig = indoc! {r#"
        [aliases.known]
        "g.st" = "git status"
        reb = "sudo reboot"
    "#}
    .parse()?;
    let known = KnownAliasSet::from_commands(
        config
            .aliases
            .known
            .iter()
            .map(|(name, command)| (name.as_str(), command.as_str())),
    );
    let reconciler = AliasReconciler::new("deploy", fixture.target(), known);

    let expect = indoc! {r#"
        alias foo="bar"
        alias g.st="git status"
        alias reb="sudo reboot"
    "#};
    let expect = format!("# my custom shell\r\nexport X=1\r\n{expect}");
    for _ in 0..3 {
        reconciler.run(&mut FixedDecision(true))?;
        assert_eq!(fixture.contents()?, expect);
    }

    Ok(())
}

#[test]
fn sshd_directives_patch_is_stable() {
    let config = indoc! {"
        #PermitRootLogin prohibit-password
        PasswordAuthentication yes
        PasswordAuthentication no

        Match User backup
            PasswordAuthentication yes
    "};
    let directives: BTreeMap<String, String> = [
        ("PermitRootLogin".to_string(), "no".to_string()),
        ("PasswordAuthentication".to_string(), "no".to_string()),
        ("Port".to_string(), "2222".to_string()),
    ]
    .into();

    let once = patch_directives(config, &directives);
    let expect = indoc! {"
        PermitRootLogin no
        PasswordAuthentication no

        Port 2222
        Match User backup
            PasswordAuthentication yes
    "};
    assert_eq!(once, expect);
    assert_eq!(patch_directives(&once, &directives), once);
}
