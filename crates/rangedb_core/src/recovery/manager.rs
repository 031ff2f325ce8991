//! The recovery manager.

use super::cleaner::ChangeHistoryCleaner;
use super::recoverable::{ChangeApplier, Recoverable};
use crate::entity::StoredValue;
use crate::error::{CoreError, CoreResult};
use crate::object::{load_object, save_object};
use rangedb_storage::{fs, LockManager};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Name of the recovery log folder inside a collection.
pub const RECOVERY_DIR: &str = ".recovery";

const PENDING_EXTENSION: &str = "pending";
const COMPLETE_EXTENSION: &str = "complete";

/// One file in the recovery log.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct HistoryEntry {
    /// Creation time in milliseconds.
    pub creation_time: i64,
    /// Entry id.
    pub id: u64,
    /// True once the changes were applied.
    pub complete: bool,
    /// The entry file.
    pub path: PathBuf,
}

impl HistoryEntry {
    fn parse(path: PathBuf) -> Option<Self> {
        let complete = match path.extension()?.to_str()? {
            PENDING_EXTENSION => false,
            COMPLETE_EXTENSION => true,
            _ => return None,
        };
        let stem = path.file_stem()?.to_str()?;
        let (time, id) = stem.split_once('_')?;
        Some(Self {
            creation_time: time.parse().ok()?,
            id: id.parse().ok()?,
            complete,
            path,
        })
    }
}

/// Lists every entry in a recovery folder, ordered by `(creation time, id)`.
///
/// A missing folder lists as empty. Files that are not entries are ignored.
///
/// # Errors
///
/// Returns an error if the folder cannot be read.
pub fn list_history(dir: &Path) -> CoreResult<Vec<HistoryEntry>> {
    let mut entries: Vec<HistoryEntry> = fs::list_dir(dir)?
        .into_iter()
        .filter(|path| !fs::is_temp_file(path))
        .filter_map(HistoryEntry::parse)
        .collect();
    entries.sort();
    Ok(entries)
}

/// Persists pending changes and replays them after a crash.
pub struct RecoveryManager<V> {
    dir: PathBuf,
    locks: LockManager,
    sync: bool,
    next_id: AtomicU64,
    cleaner: ChangeHistoryCleaner,
    _marker: PhantomData<fn() -> V>,
}

impl<V: StoredValue> RecoveryManager<V> {
    /// Opens the log in `<collection_root>/.recovery`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the folder cannot be created or listed.
    pub fn open(
        collection_root: &Path,
        locks: LockManager,
        sync: bool,
        retention: usize,
        cleanup_interval: Duration,
    ) -> CoreResult<Self> {
        let dir = collection_root.join(RECOVERY_DIR);
        std::fs::create_dir_all(&dir)?;
        let next_id = list_history(&dir)?
            .iter()
            .map(|entry| entry.id)
            .max()
            .map_or(1, |id| id + 1);
        let cleaner = ChangeHistoryCleaner::new(dir.clone(), retention, cleanup_interval);
        Ok(Self {
            dir,
            locks,
            sync,
            next_id: AtomicU64::new(next_id),
            cleaner,
            _marker: PhantomData,
        })
    }

    /// The log folder.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Assigns an id to `recoverable` and persists it as pending.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry cannot be written; the changes must
    /// not be applied in that case.
    pub fn save_change(&self, recoverable: &mut Recoverable<V>) -> CoreResult<()> {
        recoverable.set_id(self.next_id.fetch_add(1, Ordering::SeqCst));
        let path = self.pending_path(recoverable);
        save_object(&self.locks, &path, recoverable, self.sync)?;
        tracing::debug!(path = %path.display(), changes = recoverable.changes().len(), "saved pending change");
        Ok(())
    }

    /// Moves a saved entry into history, then runs cleanup if it is due.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry cannot be renamed.
    pub fn mark_complete(&self, recoverable: &Recoverable<V>) -> CoreResult<()> {
        let pending = self.pending_path(recoverable);
        let complete = self.dir.join(format!("{}.{COMPLETE_EXTENSION}", recoverable.stem()));
        {
            let _pending = self.locks.acquire_write_lock(&pending);
            let _complete = self.locks.acquire_write_lock(&complete);
            fs::replace(&pending, &complete, self.sync)?;
        }
        if let Err(e) = self.cleaner.cleanup_if_due() {
            tracing::warn!(error = %e, "history cleanup failed");
        }
        Ok(())
    }

    /// Deletes a saved entry without keeping it as history.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be deleted.
    pub fn remove_change(&self, recoverable: &Recoverable<V>) -> CoreResult<()> {
        let pending = self.pending_path(recoverable);
        let _lock = self.locks.acquire_write_lock(&pending);
        fs::remove_if_exists(&pending)?;
        Ok(())
    }

    /// Entries that were saved but never completed, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::RecoveryFailed`] if an entry cannot be decoded.
    pub fn pending_changes(&self) -> CoreResult<Vec<Recoverable<V>>> {
        let mut pending = Vec::new();
        for entry in list_history(&self.dir)?.into_iter().filter(|e| !e.complete) {
            match load_object::<Recoverable<V>>(&self.locks, &entry.path) {
                Ok(Some(recoverable)) => pending.push(recoverable),
                Ok(None) => {}
                Err(e) => {
                    return Err(CoreError::recovery_failed(format!(
                        "unreadable entry {}: {e}",
                        entry.path.display()
                    )))
                }
            }
        }
        Ok(pending)
    }

    /// Replays every pending entry through `applier`, marking each complete.
    ///
    /// Returns the number of entries replayed.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::RecoveryFailed`] at the first entry that cannot
    /// be read or applied; later entries stay pending.
    pub fn recover(&self, applier: &dyn ChangeApplier<V>) -> CoreResult<usize> {
        let pending = self.pending_changes()?;
        for recoverable in &pending {
            applier.apply_changes(recoverable.changes()).map_err(|e| {
                CoreError::recovery_failed(format!("entry {}: {e}", recoverable.stem()))
            })?;
            self.mark_complete(recoverable)?;
            tracing::debug!(entry = %recoverable.stem(), "replayed pending change");
        }
        if !pending.is_empty() {
            tracing::info!(entries = pending.len(), "replayed recovery log");
        }
        Ok(pending.len())
    }

    /// Entries created within `[from, to]`, pending and complete.
    ///
    /// # Errors
    ///
    /// Returns an error if the folder cannot be read.
    pub fn change_history(&self, from: i64, to: i64) -> CoreResult<Vec<HistoryEntry>> {
        Ok(list_history(&self.dir)?
            .into_iter()
            .filter(|entry| (from..=to).contains(&entry.creation_time))
            .collect())
    }

    /// The history cleaner.
    pub fn cleaner(&self) -> &ChangeHistoryCleaner {
        &self.cleaner
    }

    /// Suspends history cleanup until the matching
    /// [`remove_hold_on_history_cleanup`](Self::remove_hold_on_history_cleanup).
    pub fn place_hold_on_history_cleanup(&self) {
        self.cleaner.place_hold();
    }

    /// Releases one hold placed on history cleanup.
    pub fn remove_hold_on_history_cleanup(&self) {
        self.cleaner.remove_hold();
    }

    fn pending_path(&self, recoverable: &Recoverable<V>) -> PathBuf {
        self.dir.join(format!("{}.{PENDING_EXTENSION}", recoverable.stem()))
    }
}

impl<V> std::fmt::Debug for RecoveryManager<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryManager")
            .field("dir", &self.dir)
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
