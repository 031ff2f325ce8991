//! Error types for storage operations.

use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A record declared a length larger than the stream allows.
    #[error("record too large: {len} bytes (limit {limit})")]
    RecordTooLarge {
        /// Declared length of the record.
        len: usize,
        /// Maximum accepted length.
        limit: usize,
    },

    /// A lock could not be acquired within the allowed time.
    #[error("timed out after {waited:?} waiting for lock on {}", path.display())]
    LockTimeout {
        /// The contended path.
        path: PathBuf,
        /// How long the caller waited.
        waited: Duration,
    },

    /// The stream was already finished.
    #[error("stream is closed")]
    Closed,
}
