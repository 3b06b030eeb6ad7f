// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Keep or discard decisions for unrecognized aliases.
//!
//! Aliases that hostprep does not own belong to the user. Hostprep never
//! drops one of them silently, it asks through a [`KeepDecision`] source
//! instead. The terminal prompter is the production source, scripted and
//! fixed answers exist for tests and non-interactive runs.

use crate::alias::entry::AliasEntry;

use inquire::{Confirm, InquireError};
use std::collections::VecDeque;
use tracing::debug;

/// Source of keep/discard decisions.
pub trait KeepDecision {
    /// Decide whether an unrecognized alias survives reconciliation.
    ///
    /// # Errors
    ///
    /// - Return [`DecisionError::Aborted`] if the operator cancels.
    /// - Return [`DecisionError::Prompt`] if the terminal cannot be used.
    fn keep(&mut self, entry: &AliasEntry) -> Result<bool>;
}

/// Ask the operator on the terminal.
///
/// Empty input keeps the alias.
#[derive(Debug, Default, Clone, Copy)]
pub struct InquirePrompter;

impl KeepDecision for InquirePrompter {
    fn keep(&mut self, entry: &AliasEntry) -> Result<bool> {
        let message = format!("keep unrecognized alias {:?}?", entry.name());
        let help = entry.declaration();
        Confirm::new(&message)
            .with_help_message(&help)
            .with_default(true)
            .prompt()
            .map_err(|err| match err {
                InquireError::OperationCanceled | InquireError::OperationInterrupted => {
                    DecisionError::Aborted
                }
                err => DecisionError::Prompt(err),
            })
    }
}

/// Answer given to a single prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Answer {
    Keep,
    Discard,

    /// Empty input, which means keep.
    Default,

    /// Operator cancels the whole run.
    Abort,
}

/// Replay a fixed sequence of answers.
///
/// Once the sequence runs out, every further prompt gets [`Answer::Default`].
#[derive(Debug, Default, Clone)]
pub struct ScriptedDecisions {
    answers: VecDeque<Answer>,
    asked: Vec<String>,
}

impl ScriptedDecisions {
    /// Construct new scripted decision source.
    pub fn new(answers: impl IntoIterator<Item = Answer>) -> Self {
        Self {
            answers: answers.into_iter().collect(),
            asked: Vec::new(),
        }
    }

    /// Names of aliases that were asked about, in order.
    pub fn asked(&self) -> &[String] {
        &self.asked
    }
}

impl KeepDecision for ScriptedDecisions {
    fn keep(&mut self, entry: &AliasEntry) -> Result<bool> {
        self.asked.push(entry.name().to_string());
        let answer = self.answers.pop_front().unwrap_or(Answer::Default);
        debug!("scripted answer for {:?}: {answer:?}", entry.name());
        match answer {
            Answer::Keep | Answer::Default => Ok(true),
            Answer::Discard => Ok(false),
            Answer::Abort => Err(DecisionError::Aborted),
        }
    }
}

/// Give the same answer to every prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedDecision(pub bool);

impl KeepDecision for FixedDecision {
    fn keep(&mut self, _entry: &AliasEntry) -> Result<bool> {
        Ok(self.0)
    }
}

/// Decision error types.
#[derive(Debug, thiserror::Error)]
pub enum DecisionError {
    /// Operator cancelled reconciliation.
    #[error("operator aborted alias reconciliation")]
    Aborted,

    /// Terminal prompt failed.
    #[error(transparent)]
    Prompt(#[from] InquireError),
}

/// Friendly result alias :3
pub type Result<T, E = DecisionError> = std::result::Result<T, E>;
