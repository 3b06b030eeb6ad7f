// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Interactive menu.
//!
//! Numbered list of every task. The operator picks one entry at a time until
//! choosing to quit. A failed entry is logged and the menu comes back, unless
//! the entry is critical, in which case the failure ends the session.

use crate::{
    syscall::CommandRunner,
    task::{Provisioner, Task, TaskError},
};

use inquire::{InquireError, Select};
use std::fmt::{Display, Formatter, Result as FmtResult};
use tracing::{error, info, warn};

/// Entry of the interactive menu.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuItem {
    Run(Task),
    Everything,
    Quit,
}

impl MenuItem {
    /// Menu entries in display order.
    pub fn all() -> Vec<MenuItem> {
        Task::ALL
            .into_iter()
            .map(MenuItem::Run)
            .chain([MenuItem::Everything, MenuItem::Quit])
            .collect()
    }

    /// Check if failure of this entry ends the session.
    pub fn is_critical(&self) -> bool {
        match self {
            MenuItem::Run(task) => task.is_critical(),
            MenuItem::Everything => true,
            MenuItem::Quit => false,
        }
    }
}

impl Display for MenuItem {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        let number = Self::all()
            .iter()
            .position(|item| item == self)
            .map_or(0, |index| index + 1);
        match self {
            MenuItem::Run(task) => write!(fmt, "{number:>2}) {task}"),
            MenuItem::Everything => write!(fmt, "{number:>2}) Run everything"),
            MenuItem::Quit => write!(fmt, "{number:>2}) Quit"),
        }
    }
}

/// Show the menu on the terminal until the operator quits.
///
/// # Errors
///
/// - Return [`MenuError::Task`] if a critical entry fails.
/// - Return [`MenuError::Prompt`] if the terminal cannot be used.
pub async fn run_menu<R>(provisioner: &Provisioner<R>) -> Result<()>
where
    R: CommandRunner,
{
    drive(provisioner, |items| {
        match Select::new("What should hostprep do?", items.to_vec())
            .with_page_size(items.len())
            .prompt()
        {
            Ok(item) => Ok(Some(item)),
            Err(InquireError::OperationCanceled | InquireError::OperationInterrupted) => Ok(None),
            Err(err) => Err(MenuError::Prompt(err)),
        }
    })
    .await
}

/// Menu loop over an arbitrary source of choices.
///
/// A choice of `None` means the operator left the menu.
pub(crate) async fn drive<R, C>(provisioner: &Provisioner<R>, mut choose: C) -> Result<()>
where
    R: CommandRunner,
    C: FnMut(&[MenuItem]) -> Result<Option<MenuItem>>,
{
    let items = MenuItem::all();
    loop {
        let item = match choose(&items)? {
            Some(MenuItem::Quit) | None => break,
            Some(item) => item,
        };

        let result = match item {
            MenuItem::Run(task) => provisioner.run(task).await,
            MenuItem::Everything => provisioner.run_all().await,
            MenuItem::Quit => Ok(()),
        };

        match result {
            Ok(()) => info!("done: {item}"),
            Err(error) if item.is_critical() => return Err(error.into()),
            Err(error) if error.is_abort() => warn!("cancelled, nothing was changed"),
            Err(error) => error!("{error:?}"),
        }
    }

    info!("bye");
    Ok(())
}

/// Menu error types.
#[derive(Debug, thiserror::Error)]
pub enum MenuError {
    #[error("menu prompt failed")]
    Prompt(#[source] InquireError),

    #[error(transparent)]
    Task(#[from] TaskError),
}

/// Friendly result alias :3
pub type Result<T, E = MenuError> = std::result::Result<T, E>;
