// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Safe file replacement.
//!
//! Every file hostprep touches is replaced the same way: the previous
//! version is copied to a dated backup next to it, the new content is
//! written to a temporary file in the same directory, and the temporary
//! file is renamed over the target. A failure at any point leaves the
//! target exactly as it was.
//!
//! # Backup Layout
//!
//! Backups are named `<file>.<YYYYmmdd-HHMMSS>.bak`. When two backups of the
//! same file land in the same second, a counter is appended, e.g.,
//! `.bashrc.20251018-101500.bak.1`. Backups are never removed by hostprep.

use chrono::Local;
use std::{
    fs::{self, read_dir, Permissions},
    io::Write,
    path::{Path, PathBuf},
};
use tempfile::NamedTempFile;
use tracing::{debug, info, instrument};

/// Outcome of [`replace_file`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Replaced {
    /// Target already had the requested content.
    Unchanged,

    /// Target was written, previous version saved at given backup path.
    Written { backup: Option<PathBuf> },
}

impl Replaced {
    /// Check if target file changed.
    pub fn changed(&self) -> bool {
        matches!(self, Self::Written { .. })
    }
}

/// Ownership and mode applied to a freshly written file.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FileAttrs {
    pub owner: Option<(u32, u32)>,
    pub mode: Option<u32>,
}

impl FileAttrs {
    /// Attributes for a file owned by given user.
    pub fn owned_by(uid: u32, gid: u32) -> Self {
        Self {
            owner: Some((uid, gid)),
            mode: None,
        }
    }

    /// Set file mode.
    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = Some(mode);
        self
    }
}

/// Replace file only if its content differs.
///
/// Backs up the existing file, then writes atomically. Ownership and mode of
/// the previous file are preserved unless `attrs` says otherwise.
///
/// # Errors
///
/// - Return [`EditError`] if reading, backing up, or writing fails.
#[instrument(skip(contents, attrs), level = "debug")]
pub fn replace_file(path: &Path, contents: &str, attrs: FileAttrs) -> Result<Replaced> {
    if path.exists() {
        let current = fs::read(path).map_err(|err| EditError::Read {
            source: err,
            path: path.into(),
        })?;
        if current == contents.as_bytes() {
            debug!("{:?} already up to date", path.display());
            return Ok(Replaced::Unchanged);
        }
    }

    let backup = backup_file(path)?;
    atomic_write(path, contents, attrs)?;
    info!("wrote {:?}", path.display());

    Ok(Replaced::Written { backup })
}

/// Copy file to a dated backup path next to it.
///
/// Returns `None` if there is nothing to back up.
///
/// # Errors
///
/// - Return [`EditError::Backup`] if the copy fails.
pub fn backup_file(path: &Path) -> Result<Option<PathBuf>> {
    if !path.exists() {
        return Ok(None);
    }

    let stamp = Local::now().format("%Y%m%d-%H%M%S").to_string();
    let backup = free_backup_path(path, &stamp);
    fs::copy(path, &backup).map_err(|err| EditError::Backup {
        source: err,
        path: path.into(),
        backup: backup.clone(),
    })?;
    info!("backed up {:?} to {:?}", path.display(), backup.display());

    Ok(Some(backup))
}

/// Determine backup path for a file at given timestamp.
pub fn backup_path(path: &Path, stamp: &str) -> PathBuf {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("{name}.{stamp}.bak"))
}

fn free_backup_path(path: &Path, stamp: &str) -> PathBuf {
    let base = backup_path(path, stamp);
    let mut candidate = base.clone();
    let mut counter = 1;
    while candidate.exists() {
        candidate = PathBuf::from(format!("{}.{counter}", base.display()));
        counter += 1;
    }
    candidate
}

/// Write file through temporary file plus rename.
///
/// The temporary file is created in the target's directory so that the
/// rename never crosses file systems. If anything fails the temporary file
/// is dropped, and thus deleted, without touching the target.
///
/// # Errors
///
/// - Return [`EditError::ReadDir`] if the target directory cannot be read.
/// - Return [`EditError::CreateTemp`] if the temporary file cannot be made.
/// - Return [`EditError::Write`] if content or attributes cannot be written.
/// - Return [`EditError::Persist`] if the rename fails.
pub fn atomic_write(path: &Path, contents: &str, attrs: FileAttrs) -> Result<()> {
    let dir = parent_dir(path);
    read_dir(&dir).map_err(|err| EditError::ReadDir {
        source: err,
        dir: dir.clone(),
    })?;

    let mut temp = NamedTempFile::new_in(&dir).map_err(|err| EditError::CreateTemp {
        source: err,
        dir: dir.clone(),
    })?;

    let write_err = |err: std::io::Error| EditError::Write {
        source: err,
        path: path.into(),
    };
    temp.write_all(contents.as_bytes()).map_err(write_err)?;
    temp.as_file().sync_all().map_err(write_err)?;

    let previous = fs::metadata(path).ok();
    let attrs = inherit_attrs(attrs, previous.as_ref());
    apply_attrs(temp.path(), attrs).map_err(write_err)?;

    temp.persist(path).map_err(|err| EditError::Persist {
        source: err.error,
        path: path.into(),
    })?;

    Ok(())
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

#[cfg(unix)]
fn inherit_attrs(attrs: FileAttrs, previous: Option<&fs::Metadata>) -> FileAttrs {
    use std::os::unix::fs::{MetadataExt, PermissionsExt};

    match previous {
        Some(meta) => FileAttrs {
            owner: attrs.owner.or(Some((meta.uid(), meta.gid()))),
            mode: attrs.mode.or(Some(meta.permissions().mode() & 0o7777)),
        },
        None => attrs,
    }
}

#[cfg(not(unix))]
fn inherit_attrs(attrs: FileAttrs, _previous: Option<&fs::Metadata>) -> FileAttrs {
    attrs
}

#[cfg(unix)]
fn apply_attrs(path: &Path, attrs: FileAttrs) -> std::io::Result<()> {
    use std::os::unix::fs::{chown, MetadataExt, PermissionsExt};

    if let Some(mode) = attrs.mode {
        fs::set_permissions(path, Permissions::from_mode(mode))?;
    }

    if let Some((uid, gid)) = attrs.owner {
        // INVARIANT: Only chown when needed, unprivileged runs cannot give files away.
        let meta = fs::metadata(path)?;
        if meta.uid() != uid || meta.gid() != gid {
            chown(path, Some(uid), Some(gid))?;
        }
    }

    Ok(())
}

#[cfg(not(unix))]
fn apply_attrs(_path: &Path, _attrs: FileAttrs) -> std::io::Result<()> {
    Ok(())
}

/// File replacement error types.
#[derive(Debug, thiserror::Error)]
pub enum EditError {
    /// Existing file cannot be read.
    #[error("failed to read {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Directory of target file cannot be read.
    #[error("failed to read directory {:?}", dir.display())]
    ReadDir {
        #[source]
        source: std::io::Error,
        dir: PathBuf,
    },

    /// Backup copy cannot be made.
    #[error("failed to back up {:?} to {:?}", path.display(), backup.display())]
    Backup {
        #[source]
        source: std::io::Error,
        path: PathBuf,
        backup: PathBuf,
    },

    /// Temporary file cannot be created.
    #[error("failed to create temporary file in {:?}", dir.display())]
    CreateTemp {
        #[source]
        source: std::io::Error,
        dir: PathBuf,
    },

    /// Content cannot be written to temporary file.
    #[error("failed to write new content for {:?}", path.display())]
    Write {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Temporary file cannot be renamed into place.
    #[error("failed to move new content into place at {:?}", path.display())]
    Persist {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = EditError> = std::result::Result<T, E>;
