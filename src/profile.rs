// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Shell profile installation.
//!
//! The `.bashrc` is owned entirely by hostprep and overwritten from a fixed
//! template. User customizations are expected in `.bash_aliases`, which the
//! template sources, and `.bashrc.local`.

use crate::{
    edit::{replace_file, EditError, FileAttrs, Replaced},
    path::TargetUser,
};

use tracing::{info, instrument};

const BASHRC_TEMPLATE: &str = include_str!("../templates/bashrc");

/// Render `.bashrc` template for a user.
pub fn render_bashrc(user: &TargetUser) -> String {
    BASHRC_TEMPLATE.replace("{{user}}", &user.name)
}

/// Install `.bashrc` into the user's home directory.
///
/// # Errors
///
/// - Return [`EditError`] if the file cannot be backed up or written.
#[instrument(skip(user), fields(user = %user.name), level = "debug")]
pub fn install_bashrc(user: &TargetUser) -> Result<Replaced, EditError> {
    let path = user.home_join(".bashrc");
    let replaced = replace_file(
        &path,
        &render_bashrc(user),
        FileAttrs::owned_by(user.uid, user.gid).with_mode(0o644),
    )?;
    if !replaced.changed() {
        info!("{:?} already up to date", path.display());
    }

    Ok(replaced)
}
