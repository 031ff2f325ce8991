//! Error types for rangedb core.

use crate::key::Key;
use crate::range::Range;
use rangedb_storage::StorageError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in rangedb core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage layer error.
    #[error("storage error: {0}")]
    Storage(StorageError),

    /// Value codec error.
    #[error("codec error: {0}")]
    Codec(#[from] rangedb_codec::CodecError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Insert of a key that is already stored.
    #[error("duplicate key: {key}")]
    DuplicateKey {
        /// The key that already exists.
        key: Key,
    },

    /// A stored record could not be decoded.
    #[error("corrupt record in {}: {message}", path.display())]
    CorruptRecord {
        /// File holding the record.
        path: PathBuf,
        /// Description of the problem.
        message: String,
    },

    /// A value failed its encode/decode round trip.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the failure.
        message: String,
    },

    /// A lock could not be acquired in time.
    #[error("lock timeout on {}", path.display())]
    LockTimeout {
        /// The contended path.
        path: PathBuf,
    },

    /// A resource was used after it was closed.
    #[error("resource closed: {message}")]
    ClosedResource {
        /// What was closed and why.
        message: String,
    },

    /// A rollup was requested for a range that no rollup level produces.
    #[error("invalid rollup range {range}: {message}")]
    InvalidRollupRange {
        /// The rejected range.
        range: Range,
        /// Why it was rejected.
        message: String,
    },

    /// Files on disk do not match what this build expects.
    #[error("invalid format: {message}")]
    InvalidFormat {
        /// Description of the mismatch.
        message: String,
    },

    /// A caller supplied an unusable argument.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the problem.
        message: String,
    },

    /// Another process holds the collection directory.
    #[error("collection is locked by another process")]
    CollectionLocked,

    /// No index with this name is declared.
    #[error("index not found: {name}")]
    IndexNotFound {
        /// The requested index name.
        name: String,
    },

    /// An index with this name is already declared.
    #[error("index already exists: {name}")]
    IndexAlreadyExists {
        /// The duplicated index name.
        name: String,
    },

    /// A stored index was declared with a different key type.
    #[error("index {name} stores {stored} keys, extractor produces {requested}")]
    IndexKeyMismatch {
        /// The index name.
        name: String,
        /// Key kind recorded on disk.
        stored: String,
        /// Key kind of the supplied extractor.
        requested: String,
    },

    /// Replaying the recovery log failed.
    #[error("recovery failed: {message}")]
    RecoveryFailed {
        /// Description of the failure.
        message: String,
    },
}

impl From<StorageError> for CoreError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::LockTimeout { path, .. } => Self::LockTimeout { path },
            StorageError::Io(e) => Self::Io(e),
            other => Self::Storage(other),
        }
    }
}

impl CoreError {
    /// Creates a corrupt record error.
    pub fn corrupt_record(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::CorruptRecord {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a serialization error.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Creates a closed resource error.
    pub fn closed(message: impl Into<String>) -> Self {
        Self::ClosedResource {
            message: message.into(),
        }
    }

    /// Creates an invalid rollup range error.
    pub fn invalid_rollup_range(range: Range, message: impl Into<String>) -> Self {
        Self::InvalidRollupRange {
            range,
            message: message.into(),
        }
    }

    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Creates an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates a recovery failure.
    pub fn recovery_failed(message: impl Into<String>) -> Self {
        Self::RecoveryFailed {
            message: message.into(),
        }
    }

    /// True for errors caused by a single unreadable or unwritable record.
    ///
    /// Batch operations skip these instead of failing.
    #[must_use]
    pub fn is_record_fault(&self) -> bool {
        matches!(
            self,
            Self::CorruptRecord { .. } | Self::Serialization { .. } | Self::Codec(_)
        )
    }
}
