//! The collection facade.
//!
//! A [`Collection`] ties one directory's components together:
//!
//! ```text
//!   write ──► IndividualChange list ──► RecoveryManager::save_change
//!                                          │
//!                  batch::apply_changes ◄──┘  (data segments)
//!                  IndexManager::apply_changes (index segments)
//!                                          │
//!                  RecoveryManager::mark_complete
//! ```
//!
//! Segment activity is reported to the [`RollupScheduler`], whose workers
//! call back into the collection through [`RollupExecutor`].
//!
//! Writes are serialized per collection; reads run concurrently with
//! writes and with each other.

mod iterator;
mod watchdog;

pub use iterator::CollectionEntityIterator;

use crate::batch::apply_changes;
use crate::config::CollectionConfig;
use crate::dir::{CollectionDir, CollectionMetadata};
use crate::entity::{sort_changes, Entity, IndividualChange, StoredValue};
use crate::error::{CoreError, CoreResult};
use crate::index::{IndexManager, KeyExtractor, SecondaryIndex};
use crate::key::{Key, KeyKind};
use crate::object::encode_validated;
use crate::recovery::{ChangeApplier, Recoverable, RecoveryManager};
use crate::rollup::{
    ActivityListener, RollupExecutor, RollupOwner, RollupScheduler, RollupTarget,
};
use crate::segment::{SegmentManager, SegmentOptions, SegmentPathManager};
use parking_lot::Mutex;
use rangedb_storage::{fs, LockManager};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use watchdog::IteratorWatchdog;

/// An embedded, file-backed collection of `V` values addressed by [`Key`].
///
/// # Example
///
/// ```rust,ignore
/// use rangedb_core::{Collection, CollectionConfig, Key};
///
/// let people = Collection::<String>::open("people", CollectionConfig::default())?;
/// people.insert(Key::Long(1), "Anna".to_string())?;
/// people.insert(Key::Long(2), "Bob".to_string())?;
/// assert_eq!(people.get_range(1, 2)?.len(), 2);
/// ```
pub struct Collection<V: StoredValue> {
    dir: CollectionDir,
    config: CollectionConfig,
    locks: LockManager,
    segments: SegmentManager,
    recovery: RecoveryManager<V>,
    indexes: IndexManager<V>,
    scheduler: Arc<RollupScheduler>,
    watchdog: Option<IteratorWatchdog>,
    write_gate: Mutex<()>,
}

impl<V: StoredValue> Collection<V> {
    /// Opens or creates the collection stored in `path`.
    ///
    /// Leftover temp files are removed and pending recovery entries are
    /// replayed before the collection is returned.
    ///
    /// # Errors
    ///
    /// - [`CoreError::CollectionLocked`] if the directory is already open
    /// - [`CoreError::InvalidFormat`] if it was created with another key
    ///   kind, value type or sizing
    /// - [`CoreError::RecoveryFailed`] if a pending entry cannot be replayed
    pub fn open(path: impl AsRef<Path>, config: CollectionConfig) -> CoreResult<Arc<Self>> {
        let dir = CollectionDir::open(path.as_ref(), config.create_if_missing)?;
        let locks = LockManager::new();
        let sizing = config.effective_sizing();
        dir.ensure_metadata(
            &locks,
            &CollectionMetadata::new(config.key_kind, std::any::type_name::<V>(), sizing.clone()),
        )?;

        let removed = fs::remove_temp_files(dir.path())?;
        if removed > 0 {
            tracing::info!(removed, "removed leftover temp files");
        }

        let scheduler = Arc::new(RollupScheduler::new(config.rollup_threshold));
        let listener: Arc<dyn ActivityListener> = scheduler.clone();
        let options = SegmentOptions::default()
            .sync(config.sync_writes)
            .listener(listener)
            .rollup_lock_timeout(config.rollup_lock_timeout)
            .write_lock_timeout(config.write_lock_timeout);
        let segments = SegmentManager::new(
            SegmentPathManager::new(dir.path(), sizing),
            locks.clone(),
            options.clone().spans_ranges(config.key_kind.spans_ranges()),
        );
        let recovery = RecoveryManager::open(
            dir.path(),
            locks.clone(),
            config.sync_writes,
            config.history_retention,
            config.history_cleanup_interval,
        )?;
        let indexes = IndexManager::new(dir.path().to_path_buf(), locks.clone(), options);
        let watchdog = config
            .iterator_idle_timeout
            .map(IteratorWatchdog::start)
            .transpose()?;

        let collection = Arc::new(Self {
            dir,
            config,
            locks,
            segments,
            recovery,
            indexes,
            scheduler,
            watchdog,
            write_gate: Mutex::new(()),
        });

        let replayed = collection.recovery.recover(collection.as_ref())?;
        if replayed > 0 {
            collection.indexes.invalidate_stored()?;
        }

        let executor: Arc<dyn RollupExecutor> = collection.clone();
        collection
            .scheduler
            .start(Arc::downgrade(&executor), collection.config.rollup_workers)?;

        tracing::info!(
            path = %collection.path().display(),
            kind = %collection.config.key_kind,
            replayed,
            "opened collection"
        );
        Ok(collection)
    }

    /// The collection directory.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// The configuration the collection was opened with.
    pub fn config(&self) -> &CollectionConfig {
        &self.config
    }

    /// Kind of the keys stored in the collection.
    pub fn key_kind(&self) -> KeyKind {
        self.config.key_kind
    }

    /// The lock registry of this collection.
    pub fn lock_manager(&self) -> &LockManager {
        &self.locks
    }

    /// The data segment tree.
    pub fn segment_manager(&self) -> &SegmentManager {
        &self.segments
    }

    /// The recovery log.
    pub fn recovery(&self) -> &RecoveryManager<V> {
        &self.recovery
    }

    /// The rollup scheduler.
    pub fn scheduler(&self) -> &RollupScheduler {
        &self.scheduler
    }

    /// Looks up a value.
    ///
    /// # Errors
    ///
    /// Returns an error if the chunk cannot be read.
    pub fn get(&self, key: &Key) -> CoreResult<Option<V>> {
        self.segments.get(key)
    }

    /// True if `key` is stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the chunk cannot be read.
    pub fn contains(&self, key: &Key) -> CoreResult<bool> {
        self.segments.first_segment(key).contains(key)
    }

    /// Inserts a new value.
    ///
    /// # Errors
    ///
    /// - [`CoreError::DuplicateKey`] if `key` is already stored
    /// - [`CoreError::Serialization`] if the value fails its round trip
    /// - [`CoreError::InvalidArgument`] for a key of the wrong kind
    pub fn insert(&self, key: Key, value: V) -> CoreResult<()> {
        self.check_key(&key)?;
        encode_validated(&value)?;
        let _gate = self.write_gate.lock();
        if self.contains(&key)? {
            return Err(CoreError::DuplicateKey { key });
        }
        self.commit(vec![IndividualChange::insert(key, value)])
    }

    /// Replaces the value stored under `key`. Does nothing if absent.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Serialization`] if the value fails its round
    /// trip, or a storage error.
    pub fn update(&self, key: Key, value: V) -> CoreResult<()> {
        self.check_key(&key)?;
        encode_validated(&value)?;
        let _gate = self.write_gate.lock();
        let Some(old) = self.get(&key)? else {
            return Ok(());
        };
        self.commit(vec![IndividualChange::update(key, old, value)])
    }

    /// Deletes the value stored under `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if a chunk cannot be rewritten.
    pub fn delete(&self, key: &Key) -> CoreResult<()> {
        let _gate = self.write_gate.lock();
        let Some(old) = self.get(key)? else {
            return Ok(());
        };
        self.commit(vec![IndividualChange::delete(key.clone(), Some(old))])
    }

    /// Inserts or replaces many values at once.
    ///
    /// When a key appears more than once, the last value wins. A value that
    /// fails its round trip is dropped without failing the others.
    ///
    /// # Errors
    ///
    /// Returns an error for a key of the wrong kind or a storage failure.
    pub fn batch_upsert(&self, entities: impl IntoIterator<Item = (Key, V)>) -> CoreResult<()> {
        let mut latest = BTreeMap::new();
        for (key, value) in entities {
            self.check_key(&key)?;
            latest.insert(key, value);
        }
        latest.retain(|key, value| match encode_validated(value) {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "dropping value that fails its round trip");
                false
            }
        });
        let _gate = self.write_gate.lock();
        let mut changes = Vec::with_capacity(latest.len());
        for (key, value) in latest {
            let old = self.get(&key)?;
            changes.push(IndividualChange::new(key, old, Some(value)));
        }
        self.commit(changes)
    }

    /// Deletes many keys at once. Missing keys are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if a chunk cannot be rewritten.
    pub fn batch_delete(&self, keys: &[Key]) -> CoreResult<()> {
        let _gate = self.write_gate.lock();
        let mut changes = Vec::new();
        for key in keys {
            if let Some(old) = self.get(key)? {
                changes.push(IndividualChange::delete(key.clone(), Some(old)));
            }
        }
        self.commit(changes)
    }

    /// Every entity overlapping `[min, max]`, in key order.
    ///
    /// # Errors
    ///
    /// Returns an error if a chunk cannot be read.
    pub fn get_range(&self, min: i64, max: i64) -> CoreResult<Vec<Entity<V>>> {
        CollectionEntityIterator::new(self.segments.clone(), min, max).collect()
    }

    /// A lazy iterator over entities overlapping `[min, max]`.
    ///
    /// The iterator is closed automatically after the configured idle
    /// timeout.
    pub fn iter_range(&self, min: i64, max: i64) -> CollectionEntityIterator<V> {
        let iter = CollectionEntityIterator::new(self.segments.clone(), min, max);
        if let Some(watchdog) = &self.watchdog {
            watchdog.register(Arc::downgrade(&iter.expirable()));
        }
        iter
    }

    /// Rolls up one target synchronously.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidRollupRange`] for a range that is not a
    /// rollup level chunk, or [`CoreError::IndexNotFound`] for an unknown
    /// index.
    pub fn rollup(&self, target: &RollupTarget) -> CoreResult<()> {
        match target.owner() {
            RollupOwner::Collection => self
                .segments
                .rollup(target.segment_grouping_number(), target.range()),
            RollupOwner::Index(name) => {
                self.indexes
                    .rollup(name, target.segment_grouping_number(), target.range())
            }
        }
    }

    /// Declares a secondary index, building it if it is new or stale.
    ///
    /// # Errors
    ///
    /// - [`CoreError::IndexAlreadyExists`] if `name` is already declared
    /// - [`CoreError::IndexKeyMismatch`] if the stored index was built
    ///   with another key kind
    /// - [`CoreError::InvalidArgument`] for an unusable name
    pub fn create_index(
        &self,
        name: &str,
        extractor: impl KeyExtractor<V>,
    ) -> CoreResult<Arc<SecondaryIndex<V>>> {
        let _gate = self.write_gate.lock();
        let (index, needs_population) = self.indexes.create_index(name, Arc::new(extractor))?;
        if needs_population {
            if let Err(e) = self.populate(&index) {
                self.indexes.forget(name);
                return Err(e);
            }
        }
        Ok(index)
    }

    /// The index declared as `name`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IndexNotFound`] if it was not declared.
    pub fn index(&self, name: &str) -> CoreResult<Arc<SecondaryIndex<V>>> {
        self.indexes.index(name)
    }

    /// Names of the indexes declared in this session.
    pub fn index_names(&self) -> Vec<String> {
        self.indexes.names()
    }

    /// Values whose index `name` produced `key`, in collection key order.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IndexNotFound`] or a read error.
    pub fn get_by_index(&self, name: &str, key: &Key) -> CoreResult<Vec<V>> {
        let mut values = Vec::new();
        for destination in self.index(name)?.get_keys(key)? {
            if let Some(value) = self.get(&destination)? {
                values.push(value);
            }
        }
        Ok(values)
    }

    /// Stops background work. The collection stays readable and writable,
    /// but no more rollups are scheduled and iterators no longer expire.
    pub fn close(&self) {
        self.scheduler.shutdown();
        if let Some(watchdog) = &self.watchdog {
            watchdog.stop();
        }
    }

    fn check_key(&self, key: &Key) -> CoreResult<()> {
        match key.kind() {
            Some(kind) if kind == self.config.key_kind => Ok(()),
            _ => Err(CoreError::invalid_argument(format!(
                "key {key} does not match collection key kind {}",
                self.config.key_kind
            ))),
        }
    }

    /// Logs, applies and completes one set of changes.
    ///
    /// Changes whose new value cannot be stored are removed first, so the
    /// recovery log, the data segments and the indexes see the same set.
    fn commit(&self, mut changes: Vec<IndividualChange<V>>) -> CoreResult<()> {
        changes.retain(|change| change.new_value().map_or(true, |v| encode_validated(v).is_ok()));
        if changes.is_empty() {
            return Ok(());
        }
        sort_changes(&mut changes);
        let mut recoverable = Recoverable::new(changes);
        self.recovery.save_change(&mut recoverable)?;
        self.apply_changes(recoverable.changes())?;
        self.recovery.mark_complete(&recoverable)
    }

    fn populate(&self, index: &SecondaryIndex<V>) -> CoreResult<()> {
        index.clear()?;
        let batch_size = self.config.index_population_batch.max(1);
        let mut all = CollectionEntityIterator::new(self.segments.clone(), i64::MIN, i64::MAX);
        let mut total = 0;
        loop {
            let batch = all.next_batch(batch_size)?;
            if batch.is_empty() {
                break;
            }
            total += batch.len();
            index.add_entities(&batch)?;
        }
        index.mark_populated()?;
        tracing::info!(index = index.name(), entities = total, "populated index");
        Ok(())
    }
}

impl<V: StoredValue> ChangeApplier<V> for Collection<V> {
    fn apply_changes(&self, changes: &[IndividualChange<V>]) -> CoreResult<()> {
        apply_changes(&self.segments, changes)?;
        self.indexes.apply_changes(changes)
    }
}

impl<V: StoredValue> RollupExecutor for Collection<V> {
    fn execute_rollup(&self, target: &RollupTarget) -> CoreResult<()> {
        self.rollup(target)
    }
}

impl<V: StoredValue> Drop for Collection<V> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<V: StoredValue> std::fmt::Debug for Collection<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("path", &self.dir.path())
            .field("key_kind", &self.config.key_kind)
            .field("indexes", &self.indexes)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests;
