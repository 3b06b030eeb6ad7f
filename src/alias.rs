// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Alias reconciliation.
//!
//! Hostprep ships a small table of aliases that it owns, the
//! [`KnownAliasSet`]. Users usually already have an alias file of their own,
//! so hostprep cannot simply overwrite it. Instead it __reconciles__ the two:
//!
//! 1. Tool-owned aliases are always present, and always use the tool's
//!    definition, even when the user redefined them.
//! 2. Any other alias in the user's file is shown to the operator, who decides
//!    whether to keep it. Nothing is dropped without asking.
//! 3. Everything that is not an alias declaration is kept verbatim.
//!
//! # Output Layout
//!
//! The reconciled file starts with all passthrough lines in their original
//! order, followed by one declaration per alias, sorted by the full text of
//! the declaration line. Reconciling an already reconciled file with the same
//! decisions yields the exact same bytes, which keeps the file diff-friendly.
//!
//! # Safety Net
//!
//! The previous file is copied to a dated backup, and the new file is written
//! through a temporary file that is renamed into place. An aborted prompt, or
//! any I/O failure, leaves the original file untouched.

pub mod decide;
pub mod entry;

pub use decide::{Answer, FixedDecision, InquirePrompter, KeepDecision, ScriptedDecisions};
pub use entry::{AliasEntry, AliasFile, KnownAliasSet, ParseWarning, ParsedLine};

use crate::{
    edit::{atomic_write, backup_file, FileAttrs},
    path::TargetUser,
};

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};
use tracing::{debug, info, instrument, warn};

/// Aliases hostprep owns out of the box, name to command.
pub const DEFAULT_ALIASES: &[(&str, &str)] = &[
    ("reb", "sudo reboot"),
    ("sen", "watch -n 1 sensors"),
    ("upd", "sudo apt-get update && sudo apt-get -y dist-upgrade"),
    ("ll", "ls -alF"),
    ("la", "ls -A"),
    ("ports", "sudo ss -tulpn"),
    ("dps", "docker ps"),
];

/// Result of merging a parsed alias file with the tool-owned table.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    passthrough: Vec<String>,
    aliases: BTreeMap<String, AliasEntry>,
    kept: Vec<String>,
    discarded: Vec<String>,
    overridden: Vec<String>,
}

impl Reconciliation {
    /// Final alias set, one entry per name.
    pub fn aliases(&self) -> impl Iterator<Item = &AliasEntry> {
        self.aliases.values()
    }

    /// Unrecognized aliases the operator kept.
    pub fn kept(&self) -> &[String] {
        &self.kept
    }

    /// Unrecognized aliases the operator discarded.
    pub fn discarded(&self) -> &[String] {
        &self.discarded
    }

    /// User aliases replaced by a different tool-owned definition.
    pub fn overridden(&self) -> &[String] {
        &self.overridden
    }

    /// Declaration lines sorted lexicographically.
    pub fn declarations(&self) -> Vec<String> {
        let mut lines = self
            .aliases
            .values()
            .map(AliasEntry::declaration)
            .collect::<Vec<_>>();
        lines.sort();
        lines
    }

    /// Render final file content.
    ///
    /// Passthrough lines first, then sorted declarations. Every line ends
    /// with a newline.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for line in self.passthrough.iter().cloned().chain(self.declarations()) {
            out.push_str(&line);
            out.push('\n');
        }
        out
    }
}

/// Merge parsed alias file with tool-owned aliases.
///
/// Asks `decider` once for every alias name in `file` that is not in
/// `known`. Does not touch the file system.
///
/// # Errors
///
/// - Return [`AliasError::Decision`] if the decision source fails or the
///   operator aborts.
pub fn reconcile(
    file: &AliasFile,
    known: &KnownAliasSet,
    decider: &mut impl KeepDecision,
) -> Result<Reconciliation> {
    let mut reconciliation = Reconciliation {
        passthrough: file.passthrough().to_vec(),
        aliases: known
            .iter()
            .map(|entry| (entry.name().to_string(), entry.clone()))
            .collect(),
        ..Default::default()
    };

    for entry in file.entries() {
        // INVARIANT: Tool-owned definition always wins on name collision.
        if let Some(owned) = known.get(entry.name()) {
            if owned.definition() != entry.definition() {
                debug!("override {entry} with {owned}");
                reconciliation.overridden.push(entry.name().to_string());
            }
            continue;
        }

        if decider.keep(entry)? {
            reconciliation
                .aliases
                .insert(entry.name().to_string(), entry.clone());
            reconciliation.kept.push(entry.name().to_string());
        } else {
            reconciliation.discarded.push(entry.name().to_string());
        }
    }

    Ok(reconciliation)
}

/// Reconcile one user's alias file.
///
/// Holds everything reconciliation needs so nothing is read from ambient
/// process state. Callers must not run two reconcilers against the same file
/// at the same time.
#[derive(Debug, Clone)]
pub struct AliasReconciler {
    user: String,
    target: PathBuf,
    known: KnownAliasSet,
    owner: Option<(u32, u32)>,
}

impl AliasReconciler {
    /// Construct new reconciler that leaves file ownership alone.
    pub fn new(user: impl Into<String>, target: impl Into<PathBuf>, known: KnownAliasSet) -> Self {
        Self {
            user: user.into(),
            target: target.into(),
            known,
            owner: None,
        }
    }

    /// Construct new reconciler whose output file belongs to target user.
    pub fn for_user(user: &TargetUser, target: impl Into<PathBuf>, known: KnownAliasSet) -> Self {
        Self {
            user: user.name.clone(),
            target: target.into(),
            known,
            owner: Some((user.uid, user.gid)),
        }
    }

    /// Path of alias file being reconciled.
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Load, reconcile, back up, and atomically replace the alias file.
    ///
    /// All decisions are collected before anything is written.
    ///
    /// # Errors
    ///
    /// - Return [`AliasError::Read`] if the existing file cannot be read.
    /// - Return [`AliasError::Decision`] if the operator aborts.
    /// - Return [`AliasError::Edit`] if backup or replacement fails.
    #[instrument(skip(self, decider), fields(user = %self.user), level = "debug")]
    pub fn run(&self, decider: &mut impl KeepDecision) -> Result<Reconciliation> {
        info!("reconcile aliases in {:?}", self.target.display());
        let file = AliasFile::load(&self.target).map_err(|err| AliasError::Read {
            source: err,
            path: self.target.clone(),
        })?;

        for warning in file.warnings() {
            warn!("{}: {warning}", self.target.display());
        }

        let reconciliation = reconcile(&file, &self.known, decider)?;
        let contents = reconciliation.render();

        backup_file(&self.target)?;
        let attrs = match self.owner {
            Some((uid, gid)) => FileAttrs::owned_by(uid, gid),
            None => FileAttrs::default(),
        };
        atomic_write(&self.target, &contents, attrs)?;

        info!(
            "wrote {} aliases to {:?} (kept {}, discarded {}, overridden {})",
            reconciliation.aliases.len(),
            self.target.display(),
            reconciliation.kept.len(),
            reconciliation.discarded.len(),
            reconciliation.overridden.len(),
        );

        Ok(reconciliation)
    }
}

/// Alias reconciliation error types.
#[derive(Debug, thiserror::Error)]
pub enum AliasError {
    /// Existing alias file cannot be read.
    #[error("failed to read alias file at {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Operator aborted or prompt failed.
    #[error(transparent)]
    Decision(#[from] decide::DecisionError),

    /// Backup or replacement failed.
    #[error(transparent)]
    Edit(#[from] crate::edit::EditError),
}

impl AliasError {
    /// Check if the operator cancelled reconciliation.
    pub fn is_abort(&self) -> bool {
        matches!(self, Self::Decision(decide::DecisionError::Aborted))
    }
}

/// Friendly result alias :3
pub type Result<T, E = AliasError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;
    use std::fs;

    fn sample_known() -> KnownAliasSet {
        KnownAliasSet::from_commands([("reb", "sudo reboot"), ("sen", "watch -n 1 sensors")])
    }

    const SAMPLE: &str = indoc! {r#"
        # my custom shell
        alias reb="echo hi"
        alias foo="bar"
    "#};

    #[test]
    fn reconcile_sample_scenario() -> anyhow::Result<()> {
        let file = AliasFile::parse(SAMPLE);
        let mut decisions = ScriptedDecisions::new([Answer::Keep]);
        let result = reconcile(&file, &sample_known(), &mut decisions)?;

        let expect = indoc! {r#"
            # my custom shell
            alias foo="bar"
            alias reb="sudo reboot"
            alias sen="watch -n 1 sensors"
        "#};
        assert_eq!(result.render(), expect);
        assert_eq!(decisions.asked(), ["foo".to_string()]);
        assert_eq!(result.kept(), ["foo".to_string()]);
        assert_eq!(result.overridden(), ["reb".to_string()]);

        Ok(())
    }

    #[test]
    fn reconcile_discard_unknown_alias() -> anyhow::Result<()> {
        let file = AliasFile::parse(SAMPLE);
        let result = reconcile(&file, &sample_known(), &mut FixedDecision(false))?;

        let expect = indoc! {r#"
            # my custom shell
            alias reb="sudo reboot"
            alias sen="watch -n 1 sensors"
        "#};
        assert_eq!(result.render(), expect);
        assert_eq!(result.discarded(), ["foo".to_string()]);

        Ok(())
    }

    #[test]
    fn reconcile_sorts_by_declaration_text() -> anyhow::Result<()> {
        // "a-b" sorts before "a" once the "=" is part of the compared text.
        let file = AliasFile::parse("alias a=\"x\"\nalias a-b=\"y\"\n");
        let known = KnownAliasSet::from_commands(Vec::<(String, String)>::new());
        let result = reconcile(&file, &known, &mut FixedDecision(true))?;

        assert_eq!(result.declarations(), ["alias a-b=\"y\"", "alias a=\"x\""]);

        Ok(())
    }

    #[test]
    fn reconcile_is_idempotent() -> anyhow::Result<()> {
        let known = sample_known();
        let first = reconcile(&AliasFile::parse(SAMPLE), &known, &mut FixedDecision(true))?;
        let second = reconcile(
            &AliasFile::parse(&first.render()),
            &known,
            &mut FixedDecision(true),
        )?;
        assert_eq!(first.render(), second.render());

        Ok(())
    }

    #[test]
    fn reconcile_prompts_once_per_duplicated_name() -> anyhow::Result<()> {
        let file = AliasFile::parse("alias foo=\"one\"\nalias foo=\"two\"\n");
        let mut decisions = ScriptedDecisions::default();
        let result = reconcile(&file, &sample_known(), &mut decisions)?;

        assert_eq!(decisions.asked(), ["foo".to_string()]);
        let declarations = result.declarations();
        assert!(declarations.contains(&"alias foo=\"two\"".to_string()));
        assert!(!declarations.contains(&"alias foo=\"one\"".to_string()));

        Ok(())
    }

    #[test]
    fn empty_input_yields_known_aliases_only() -> anyhow::Result<()> {
        let result = reconcile(&AliasFile::default(), &sample_known(), &mut FixedDecision(false))?;
        assert_eq!(
            result.render(),
            "alias reb=\"sudo reboot\"\nalias sen=\"watch -n 1 sensors\"\n"
        );

        Ok(())
    }

    #[sealed_test]
    fn run_writes_file_and_backup() -> anyhow::Result<()> {
        let target = std::env::current_dir()?.join(".bash_aliases");
        fs::write(&target, SAMPLE)?;

        let reconciler = AliasReconciler::new("deploy", &target, sample_known());
        reconciler.run(&mut ScriptedDecisions::new([Answer::Keep]))?;

        let result = fs::read_to_string(&target)?;
        assert!(result.contains("alias foo=\"bar\"\n"));
        assert!(result.contains("alias reb=\"sudo reboot\"\n"));

        let backups = fs::read_dir(std::env::current_dir()?)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.to_string_lossy().contains(".bash_aliases."))
            .collect::<Vec<_>>();
        assert_eq!(backups.len(), 1);
        assert_eq!(fs::read_to_string(&backups[0])?, SAMPLE);

        Ok(())
    }

    #[sealed_test]
    fn run_abort_leaves_file_untouched() -> anyhow::Result<()> {
        let target = std::env::current_dir()?.join(".bash_aliases");
        fs::write(&target, SAMPLE)?;

        let reconciler = AliasReconciler::new("deploy", &target, sample_known());
        let result = reconciler.run(&mut ScriptedDecisions::new([Answer::Abort]));

        assert!(result.is_err_and(|err| err.is_abort()));
        assert_eq!(fs::read_to_string(&target)?, SAMPLE);
        assert_eq!(fs::read_dir(std::env::current_dir()?)?.count(), 1);

        Ok(())
    }

    #[sealed_test]
    fn run_creates_missing_file() -> anyhow::Result<()> {
        let target = std::env::current_dir()?.join(".bash_aliases");
        let reconciler = AliasReconciler::new("deploy", &target, sample_known());
        reconciler.run(&mut FixedDecision(true))?;

        assert_eq!(
            fs::read_to_string(&target)?,
            "alias reb=\"sudo reboot\"\nalias sen=\"watch -n 1 sensors\"\n"
        );

        Ok(())
    }

    #[sealed_test]
    fn run_fails_when_directory_is_missing() {
        let reconciler = AliasReconciler::new("deploy", "nowhere/.bash_aliases", sample_known());
        assert!(matches!(
            reconciler.run(&mut FixedDecision(true)),
            Err(AliasError::Edit(_))
        ));
    }
}
