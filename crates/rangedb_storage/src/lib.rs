//! # rangedb Storage
//!
//! Filesystem primitives for rangedb.
//!
//! This crate provides the lowest-level building blocks used by the engine.
//! Files are **opaque record streams** here: the crate frames and moves
//! bytes but never interprets them.
//!
//! ## Components
//!
//! - [`LockManager`] - registry of per-path reader/writer locks
//! - [`RecordReader`] / [`RecordWriter`] - length-prefixed record streams
//! - [`fs`] - temp paths, atomic replace, tolerant delete and listing
//!
//! ## Example
//!
//! ```rust
//! use rangedb_storage::{RecordReader, RecordWriter};
//! use std::io::Cursor;
//!
//! let mut writer = RecordWriter::new(Vec::new());
//! writer.write_record(b"hello").unwrap();
//! let bytes = writer.into_inner().unwrap();
//!
//! let mut reader = RecordReader::new(Cursor::new(bytes));
//! assert_eq!(reader.next_record().unwrap(), Some(b"hello".to_vec()));
//! assert_eq!(reader.next_record().unwrap(), None);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
pub mod fs;
mod lock;
mod record;

pub use error::{StorageError, StorageResult};
pub use lock::{LockManager, ReadLock, WriteLock};
pub use record::{RecordReader, RecordWriter, LENGTH_PREFIX_SIZE, MAX_RECORD_SIZE};
