//! Typed object streams over record files.
//!
//! [`ObjectInput`] and [`ObjectOutput`] layer the value codec on top of the
//! raw record streams from `rangedb_storage`, and hold the path lock for as
//! long as the stream is open. Dropping a stream releases its lock.

use crate::error::{CoreError, CoreResult};
use rangedb_codec::{from_cbor, to_cbor, validate_round_trip};
use rangedb_storage::{fs, LockManager, ReadLock, RecordReader, RecordWriter, WriteLock};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

/// Sequential reader of encoded objects from one file.
///
/// A missing file reads as an empty stream. Records that fail to decode
/// are skipped and counted.
pub struct ObjectInput<T> {
    path: PathBuf,
    reader: Option<RecordReader<BufReader<File>>>,
    lock: Option<ReadLock>,
    skipped: u64,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ObjectInput<T> {
    /// Opens `lock.path()` while holding `lock`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be opened.
    pub fn open(lock: ReadLock) -> CoreResult<Self> {
        let path = lock.path().to_path_buf();
        let reader = RecordReader::open(&path)?;
        Ok(Self {
            path,
            reader,
            lock: Some(lock),
            skipped: 0,
            _marker: PhantomData,
        })
    }

    /// Opens a file without taking a lock.
    ///
    /// For offline tools that own the directory exclusively, and for
    /// callers already holding the file's write lock.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be opened.
    pub fn open_unlocked(path: &Path) -> CoreResult<Self> {
        Ok(Self {
            path: path.to_path_buf(),
            reader: RecordReader::open(path)?,
            lock: None,
            skipped: 0,
            _marker: PhantomData,
        })
    }

    /// Reads the next record without decoding it.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure.
    pub fn next_raw(&mut self) -> CoreResult<Option<Vec<u8>>> {
        match self.reader.as_mut() {
            Some(reader) => Ok(reader.next_record()?),
            None => Ok(None),
        }
    }
}

impl<T: DeserializeOwned> ObjectInput<T> {
    /// Reads the next decodable object together with its encoded bytes.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure; undecodable records are skipped.
    pub fn next_with_bytes(&mut self) -> CoreResult<Option<(T, Vec<u8>)>> {
        while let Some(bytes) = self.next_raw()? {
            match from_cbor::<T>(&bytes) {
                Ok(object) => return Ok(Some((object, bytes))),
                Err(e) => {
                    self.skipped += 1;
                    tracing::warn!(
                        path = %self.path.display(),
                        error = %e,
                        "skipping corrupt record"
                    );
                }
            }
        }
        Ok(None)
    }

    /// Reads the next decodable object.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure; undecodable records are skipped.
    pub fn next_object(&mut self) -> CoreResult<Option<T>> {
        Ok(self.next_with_bytes()?.map(|(object, _)| object))
    }

    /// Reads the next record, failing on the first undecodable one.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::CorruptRecord`] for an undecodable record.
    pub fn next_object_strict(&mut self) -> CoreResult<Option<T>> {
        match self.next_raw()? {
            Some(bytes) => from_cbor::<T>(&bytes)
                .map(Some)
                .map_err(|e| CoreError::corrupt_record(&self.path, e.to_string())),
            None => Ok(None),
        }
    }
}

impl<T> ObjectInput<T> {
    /// The file being read.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True if the file existed when opened.
    pub fn exists(&self) -> bool {
        self.reader.is_some()
    }

    /// Number of records skipped as undecodable.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// True if the stream ended in a truncated record.
    pub fn is_truncated(&self) -> bool {
        self.reader.as_ref().is_some_and(RecordReader::is_truncated)
    }

    /// True while the stream holds its path lock.
    pub fn is_locked(&self) -> bool {
        self.lock.is_some()
    }
}

impl<T> std::fmt::Debug for ObjectInput<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectInput")
            .field("path", &self.path)
            .field("skipped", &self.skipped)
            .finish_non_exhaustive()
    }
}

/// Sequential writer of encoded objects to one file.
pub struct ObjectOutput<T> {
    path: PathBuf,
    writer: RecordWriter<BufWriter<File>>,
    lock: WriteLock,
    sync: bool,
    _marker: PhantomData<fn(&T)>,
}

impl<T> ObjectOutput<T> {
    /// Creates (or truncates) `lock.path()` while holding `lock`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created.
    pub fn create(lock: WriteLock, sync: bool) -> CoreResult<Self> {
        let path = lock.path().to_path_buf();
        let writer = RecordWriter::create(&path)?;
        Ok(Self {
            path,
            writer,
            lock,
            sync,
            _marker: PhantomData,
        })
    }

    /// Appends already encoded bytes.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure.
    pub fn write_raw(&mut self, bytes: &[u8]) -> CoreResult<()> {
        self.writer.write_record(bytes)?;
        Ok(())
    }

    /// Flushes and, if configured, fsyncs the file.
    ///
    /// Hands back the write lock so the caller can keep the file
    /// protected until it has been renamed into place.
    ///
    /// # Errors
    ///
    /// Returns an error if flushing or syncing fails.
    pub fn finish(self) -> CoreResult<WriteLock> {
        self.writer.finish(self.sync)?;
        Ok(self.lock)
    }

    /// The file being written.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of records written.
    pub fn written(&self) -> u64 {
        self.writer.records_written()
    }
}

impl<T: Serialize> ObjectOutput<T> {
    /// Encodes and appends an object.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Serialization`] if encoding fails.
    pub fn write(&mut self, object: &T) -> CoreResult<()> {
        let bytes = to_cbor(object).map_err(|e| CoreError::serialization(e.to_string()))?;
        self.write_raw(&bytes)
    }
}

impl<T> std::fmt::Debug for ObjectOutput<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectOutput")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// Encodes `value`, checking that it decodes back to itself.
///
/// # Errors
///
/// Returns [`CoreError::Serialization`] if the round trip fails.
pub fn encode_validated<T>(value: &T) -> CoreResult<Vec<u8>>
where
    T: Serialize + DeserializeOwned + PartialEq,
{
    validate_round_trip(value).map_err(|e| CoreError::serialization(e.to_string()))
}

/// Writes a single-object file with the copy-on-write protocol.
///
/// The object goes to a temp sibling which is renamed over `path` under a
/// write lock on `path`.
///
/// # Errors
///
/// Returns an error if encoding or any file operation fails.
pub fn save_object<T: Serialize>(
    locks: &LockManager,
    path: &Path,
    object: &T,
    sync: bool,
) -> CoreResult<()> {
    let tmp = fs::temp_path_for(path);
    let result: CoreResult<()> = (|| {
        let mut output = ObjectOutput::create(locks.acquire_write_lock(&tmp), sync)?;
        output.write(object)?;
        let _tmp_lock = output.finish()?;
        let _target = locks.acquire_write_lock(path);
        fs::replace(&tmp, path, sync)?;
        Ok(())
    })();
    if result.is_err() {
        let _ = fs::remove_if_exists(&tmp);
    }
    result
}

/// Reads a single-object file written by [`save_object`].
///
/// Returns `Ok(None)` if the file does not exist.
///
/// # Errors
///
/// Returns [`CoreError::CorruptRecord`] if the file exists but its first
/// record is missing or undecodable.
pub fn load_object<T: DeserializeOwned>(locks: &LockManager, path: &Path) -> CoreResult<Option<T>> {
    let mut input = ObjectInput::<T>::open(locks.acquire_read_lock(path))?;
    if !input.exists() {
        return Ok(None);
    }
    match input.next_object_strict()? {
        Some(object) => Ok(Some(object)),
        None => Err(CoreError::corrupt_record(path, "file holds no complete record")),
    }
}
