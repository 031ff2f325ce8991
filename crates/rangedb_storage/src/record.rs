//! Length-prefixed record streams.
//!
//! Every file rangedb writes is a plain sequence of records:
//!
//! ```text
//! ┌──────────────┬──────────────────┐
//! │ len: u32 (BE)│ payload (len B)  │  ... repeated until end of file
//! └──────────────┴──────────────────┘
//! ```
//!
//! End of file is end of stream. A record whose prefix or payload is cut
//! short is a truncated tail: reading stops there and the reader remembers
//! that it saw one.

use crate::error::{StorageError, StorageResult};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::Path;

/// Size of the big-endian length prefix in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Largest payload a reader accepts before treating the prefix as garbage.
pub const MAX_RECORD_SIZE: usize = 256 * 1024 * 1024;

/// Sequential reader over a record stream.
#[derive(Debug)]
pub struct RecordReader<R> {
    inner: R,
    records_read: u64,
    truncated: bool,
}

impl<R: Read> RecordReader<R> {
    /// Wraps a byte source.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            records_read: 0,
            truncated: false,
        }
    }

    /// Reads the next record payload.
    ///
    /// Returns `Ok(None)` at end of stream, including when the remaining
    /// bytes form a truncated record.
    ///
    /// # Errors
    ///
    /// Returns an error only for I/O failures other than end of file.
    pub fn next_record(&mut self) -> StorageResult<Option<Vec<u8>>> {
        if self.truncated {
            return Ok(None);
        }

        let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
        let filled = read_up_to(&mut self.inner, &mut prefix)?;
        if filled == 0 {
            return Ok(None);
        }
        if filled < LENGTH_PREFIX_SIZE {
            self.mark_truncated("partial length prefix");
            return Ok(None);
        }

        let len = u32::from_be_bytes(prefix) as usize;
        if len > MAX_RECORD_SIZE {
            self.mark_truncated("declared length exceeds limit");
            return Ok(None);
        }

        let mut payload = Vec::with_capacity(len.min(64 * 1024));
        let read = (&mut self.inner).take(len as u64).read_to_end(&mut payload)?;
        if read < len {
            self.mark_truncated("payload shorter than declared length");
            return Ok(None);
        }

        self.records_read += 1;
        Ok(Some(payload))
    }

    /// Number of complete records returned so far.
    #[must_use]
    pub fn records_read(&self) -> u64 {
        self.records_read
    }

    /// True once a truncated tail has been encountered.
    #[must_use]
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    fn mark_truncated(&mut self, reason: &str) {
        tracing::warn!(
            records_read = self.records_read,
            reason,
            "record stream ends in a truncated record"
        );
        self.truncated = true;
    }
}

impl RecordReader<BufReader<File>> {
    /// Opens a record file for reading.
    ///
    /// Returns `Ok(None)` if the file does not exist, which callers treat
    /// as an empty stream.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be opened.
    pub fn open(path: &Path) -> StorageResult<Option<Self>> {
        match File::open(path) {
            Ok(file) => Ok(Some(Self::new(BufReader::new(file)))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Fills `buf` as far as the source allows, returning the byte count.
fn read_up_to<R: Read>(source: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Sequential writer producing a record stream.
#[derive(Debug)]
pub struct RecordWriter<W: Write> {
    inner: W,
    records_written: u64,
}

impl<W: Write> RecordWriter<W> {
    /// Wraps a byte sink.
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            records_written: 0,
        }
    }

    /// Appends one record.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::RecordTooLarge`] for payloads over
    /// [`MAX_RECORD_SIZE`], or an I/O error.
    pub fn write_record(&mut self, payload: &[u8]) -> StorageResult<()> {
        if payload.len() > MAX_RECORD_SIZE {
            return Err(StorageError::RecordTooLarge {
                len: payload.len(),
                limit: MAX_RECORD_SIZE,
            });
        }
        // MAX_RECORD_SIZE fits in u32, so the cast is lossless.
        let prefix = (payload.len() as u32).to_be_bytes();
        self.inner.write_all(&prefix)?;
        self.inner.write_all(payload)?;
        self.records_written += 1;
        Ok(())
    }

    /// Number of records written so far.
    #[must_use]
    pub fn records_written(&self) -> u64 {
        self.records_written
    }

    /// Flushes and returns the underlying sink.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    pub fn into_inner(mut self) -> StorageResult<W> {
        self.inner.flush()?;
        Ok(self.inner)
    }
}

impl RecordWriter<BufWriter<File>> {
    /// Creates (or truncates) a record file, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the directories or the file cannot be created.
    pub fn create(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Ok(Self::new(BufWriter::new(file)))
    }

    /// Flushes buffered records and optionally fsyncs the file.
    ///
    /// # Errors
    ///
    /// Returns an error if flushing or syncing fails.
    pub fn finish(self, sync: bool) -> StorageResult<()> {
        let writer = self.into_inner()?;
        let file = writer.into_inner().map_err(|e| StorageError::Io(e.into_error()))?;
        if sync {
            file.sync_all()?;
        }
        Ok(())
    }
}
