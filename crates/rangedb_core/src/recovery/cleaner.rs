//! Trimming of completed recovery entries.

use super::manager::list_history;
use crate::error::CoreResult;
use parking_lot::Mutex;
use rangedb_storage::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Deletes completed recovery entries beyond a retention limit.
///
/// Pending entries are never touched. Holds nest: cleanup resumes once
/// every hold is removed. The hold counter stays locked for the whole of
/// a cleanup, so placing a hold waits for a running cleanup to finish.
#[derive(Debug)]
pub struct ChangeHistoryCleaner {
    dir: PathBuf,
    holds: Mutex<usize>,
    retention: AtomicUsize,
    interval: Mutex<Duration>,
    last_cleanup: Mutex<Instant>,
}

impl ChangeHistoryCleaner {
    pub(crate) fn new(dir: PathBuf, retention: usize, interval: Duration) -> Self {
        Self {
            dir,
            holds: Mutex::new(0),
            retention: AtomicUsize::new(retention),
            interval: Mutex::new(interval),
            last_cleanup: Mutex::new(Instant::now()),
        }
    }

    /// Number of completed entries kept.
    pub fn retention_limit(&self) -> usize {
        self.retention.load(Ordering::Relaxed)
    }

    /// Sets the number of completed entries kept.
    pub fn set_retention_limit(&self, limit: usize) {
        self.retention.store(limit, Ordering::Relaxed);
    }

    /// Sets the minimum time between automatic cleanups.
    pub fn set_cleanup_interval(&self, interval: Duration) {
        *self.interval.lock() = interval;
    }

    /// Suspends cleanup.
    pub fn place_hold(&self) {
        *self.holds.lock() += 1;
    }

    /// Releases one hold.
    pub fn remove_hold(&self) {
        let mut holds = self.holds.lock();
        *holds = holds.saturating_sub(1);
    }

    /// True while at least one hold is placed.
    pub fn is_held(&self) -> bool {
        *self.holds.lock() > 0
    }

    /// Runs [`cleanup_history`](Self::cleanup_history) if the interval has
    /// passed since the last run.
    ///
    /// # Errors
    ///
    /// Returns an error if the log folder cannot be read.
    pub fn cleanup_if_due(&self) -> CoreResult<usize> {
        {
            let mut last = self.last_cleanup.lock();
            if last.elapsed() < *self.interval.lock() {
                return Ok(0);
            }
            *last = Instant::now();
        }
        self.cleanup_history()
    }

    /// Deletes the oldest completed entries beyond the retention limit.
    ///
    /// Does nothing while a hold is placed. Returns the number of entries
    /// deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the folder cannot be read or an entry cannot
    /// be deleted.
    pub fn cleanup_history(&self) -> CoreResult<usize> {
        let holds = self.holds.lock();
        if *holds > 0 {
            tracing::debug!(holds = *holds, "history cleanup on hold");
            return Ok(0);
        }
        let completed: Vec<_> = list_history(&self.dir)?
            .into_iter()
            .filter(|entry| entry.complete)
            .collect();
        let excess = completed.len().saturating_sub(self.retention_limit());
        for entry in &completed[..excess] {
            fs::remove_if_exists(&entry.path)?;
        }
        if excess > 0 {
            tracing::info!(removed = excess, kept = completed.len() - excess, "cleaned change history");
        }
        Ok(excess)
    }
}
