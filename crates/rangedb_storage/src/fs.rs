//! Filesystem helpers for the copy-on-write replace protocol.
//!
//! Writers never modify a file in place. They write a sibling temp file
//! (`_tmp_<name>`) and rename it over the target, so a reader sees either
//! the old file or the new one, never a mix.

use crate::error::StorageResult;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Prefix that marks an in-progress temp file.
pub const TEMP_PREFIX: &str = "_tmp_";

/// Returns the temp path used while rewriting `path`.
#[must_use]
pub fn temp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("{TEMP_PREFIX}{name}"))
}

/// True if `path` names a temp file.
#[must_use]
pub fn is_temp_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with(TEMP_PREFIX))
}

/// Atomically renames `from` over `to`.
///
/// With `sync` set, the parent directory is fsynced afterwards so the
/// rename itself is durable.
///
/// # Errors
///
/// Returns an error if the rename or the directory sync fails.
pub fn replace(from: &Path, to: &Path, sync: bool) -> StorageResult<()> {
    fs::rename(from, to)?;
    if sync {
        if let Some(parent) = to.parent() {
            sync_directory(parent)?;
        }
    }
    tracing::trace!(from = %from.display(), to = %to.display(), "file replaced");
    Ok(())
}

/// Deletes a file, returning whether it existed.
///
/// # Errors
///
/// Returns an error for failures other than the file being absent.
pub fn remove_if_exists(path: &Path) -> StorageResult<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Lists the direct children of `dir`, sorted by path.
///
/// A missing directory lists as empty.
///
/// # Errors
///
/// Returns an error if the directory exists but cannot be read.
pub fn list_dir(dir: &Path) -> StorageResult<Vec<PathBuf>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut paths = Vec::new();
    for entry in entries {
        match entry {
            Ok(entry) => paths.push(entry.path()),
            // Entry vanished between readdir and stat.
            Err(e) if e.kind() == ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        }
    }
    paths.sort();
    Ok(paths)
}

/// Recursively deletes leftover temp files below `root`.
///
/// Returns how many were removed.
///
/// # Errors
///
/// Returns an error if a directory cannot be read or a file cannot be removed.
pub fn remove_temp_files(root: &Path) -> StorageResult<usize> {
    let mut removed = 0;
    for path in list_dir(root)? {
        if path.is_dir() {
            removed += remove_temp_files(&path)?;
        } else if is_temp_file(&path) && remove_if_exists(&path)? {
            tracing::debug!(path = %path.display(), "removed leftover temp file");
            removed += 1;
        }
    }
    Ok(removed)
}

/// Syncs a directory so that renames and creations inside it are durable.
///
/// # Errors
///
/// Returns an error if the directory cannot be opened or synced.
#[cfg(unix)]
pub fn sync_directory(dir: &Path) -> StorageResult<()> {
    fs::File::open(dir)?.sync_all()?;
    Ok(())
}

/// Syncs a directory so that renames and creations inside it are durable.
///
/// Directory handles cannot be fsynced on this platform; this is a no-op.
///
/// # Errors
///
/// Never fails.
#[cfg(not(unix))]
pub fn sync_directory(_dir: &Path) -> StorageResult<()> {
    Ok(())
}
