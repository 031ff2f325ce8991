//! Collection directory management.
//!
//! ```text
//! <collection>/
//! ├─ LOCK              # Advisory lock for single-process access
//! ├─ METADATA          # Format version, key kind, value type, sizing
//! ├─ .recovery/        # Pending and completed change entries
//! ├─ <index name>/     # One segment tree per index, plus EXTRACTOR
//! └─ <start>_<end>/    # Top-level folders of the data segment tree
//! ```

use crate::error::{CoreError, CoreResult};
use crate::key::KeyKind;
use crate::object::{load_object, save_object, ObjectInput};
use crate::segment::SegmentSizing;
use fs2::FileExt;
use rangedb_storage::LockManager;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

/// Lock file name.
pub const LOCK_FILE: &str = "LOCK";
/// Metadata file name.
pub const METADATA_FILE: &str = "METADATA";
/// On-disk format written by this build.
pub const FORMAT_VERSION: u32 = 1;

/// What a collection directory was created with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionMetadata {
    /// On-disk format version.
    pub format_version: u32,
    /// Stored key kind.
    pub key_kind: KeyKind,
    /// Rust type name of the stored values.
    pub value_type: String,
    /// Rollup levels and folder sizes.
    pub sizing: SegmentSizing,
}

impl CollectionMetadata {
    /// Metadata for a new collection.
    #[must_use]
    pub fn new(key_kind: KeyKind, value_type: impl Into<String>, sizing: SegmentSizing) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            key_kind,
            value_type: value_type.into(),
            sizing,
        }
    }

    /// Reads the metadata of `root` without taking any lock.
    ///
    /// Returns `Ok(None)` for a directory without metadata.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be decoded.
    pub fn read(root: &Path) -> CoreResult<Option<Self>> {
        let path = root.join(METADATA_FILE);
        let mut input = ObjectInput::<Self>::open_unlocked(&path)?;
        if !input.exists() {
            return Ok(None);
        }
        match input.next_object_strict()? {
            Some(meta) => Ok(Some(meta)),
            None => Err(CoreError::corrupt_record(path, "metadata file is empty")),
        }
    }

    /// Checks that a collection opened as `expected` can use these files.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidFormat`] describing the first mismatch.
    pub fn check(&self, expected: &Self) -> CoreResult<()> {
        if self.format_version != expected.format_version {
            return Err(CoreError::invalid_format(format!(
                "format version {} is not supported (expected {})",
                self.format_version, expected.format_version
            )));
        }
        if self.key_kind != expected.key_kind {
            return Err(CoreError::invalid_format(format!(
                "collection stores {} keys, opened with {}",
                self.key_kind, expected.key_kind
            )));
        }
        if self.value_type != expected.value_type {
            return Err(CoreError::invalid_format(format!(
                "collection stores {}, opened with {}",
                self.value_type, expected.value_type
            )));
        }
        if self.sizing != expected.sizing {
            return Err(CoreError::invalid_format(format!(
                "collection uses sizing {:?}, opened with {:?}",
                self.sizing, expected.sizing
            )));
        }
        Ok(())
    }
}

/// Exclusive handle on a collection directory.
///
/// The LOCK file is held with an OS advisory lock for the lifetime of the
/// handle, so a second process (or a second open in this process) fails.
#[derive(Debug)]
pub struct CollectionDir {
    path: PathBuf,
    _lock_file: File,
}

impl CollectionDir {
    /// Opens or creates a collection directory.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory doesn't exist and `create_if_missing` is false
    /// - Another handle holds the lock (returns `CollectionLocked`)
    /// - I/O errors occur
    pub fn open(path: &Path, create_if_missing: bool) -> CoreResult<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(CoreError::invalid_format(format!(
                    "collection directory does not exist: {}",
                    path.display()
                )));
            }
        }
        if !path.is_dir() {
            return Err(CoreError::invalid_format(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(CoreError::CollectionLocked);
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// The collection directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the metadata file.
    #[must_use]
    pub fn metadata_path(&self) -> PathBuf {
        self.path.join(METADATA_FILE)
    }

    /// Validates the stored metadata against `expected`, writing it for a
    /// new collection.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidFormat`] on a mismatch.
    pub fn ensure_metadata(&self, locks: &LockManager, expected: &CollectionMetadata) -> CoreResult<()> {
        let path = self.metadata_path();
        match load_object::<CollectionMetadata>(locks, &path)? {
            Some(stored) => stored.check(expected),
            None => save_object(locks, &path, expected, true),
        }
    }
}
