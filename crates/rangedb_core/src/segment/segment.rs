//! One partition of the key space and the chunk files inside it.
//!
//! ## Invariants
//!
//! - Every chunk file holds entities strictly ordered by key.
//! - A grouping number's data lives in exactly one chunk: the first one
//!   that exists when scanning rollup levels finest to coarsest.
//! - Chunk files are never modified in place. Every mutation writes a temp
//!   sibling and renames it over the target.
//!
//! ## Locking
//!
//! - Mutations hold a read lock on the segment folder; rollups hold its
//!   write lock, so the set of chunk files only changes under a rollup.
//! - A rollup never waits for a chunk lock while holding the folder.
//! - Writers of one chunk serialize on the chunk's temp path.
//! - Readers hold a read lock on the chunk file they are streaming.

use super::iterator::SegmentEntityIterator;
use super::manager::SegmentContext;
use super::path::list_chunk_files;
use crate::batch::BatchWriter;
use crate::entity::{Entity, IndividualChange, StoredValue};
use crate::error::{CoreError, CoreResult};
use crate::key::Key;
use crate::object::{encode_validated, ObjectInput, ObjectOutput};
use crate::range::Range;
use crate::rollup::RollupTarget;
use rangedb_storage::{fs, ReadLock, WriteLock};
use serde::de::IgnoredAny;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Entity whose value is skipped while decoding.
type KeyOnly = Entity<IgnoredAny>;

/// A segment: one folder of chunk files covering a fixed range.
#[derive(Clone)]
pub struct Segment {
    path: PathBuf,
    range: Range,
    ctx: Arc<SegmentContext>,
}

impl Segment {
    pub(crate) fn new(path: PathBuf, range: Range, ctx: Arc<SegmentContext>) -> Self {
        Self { path, range, ctx }
    }

    /// The segment folder.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Grouping numbers owned by this segment.
    #[must_use]
    pub fn range(&self) -> Range {
        self.range
    }

    /// Grouping number under which `key` is stored in this segment.
    ///
    /// A time-frame key that started before the segment lives in the
    /// segment's first chunk.
    #[must_use]
    pub fn placement(&self, key: &Key) -> i64 {
        key.grouping_number().max(self.range.start())
    }

    /// Looks up a value by key.
    ///
    /// # Errors
    ///
    /// Returns an error if the chunk file cannot be read.
    pub fn get<V: StoredValue>(&self, key: &Key) -> CoreResult<Option<V>> {
        let grouping_number = self.placement(key);
        let mut input = ObjectInput::<Entity<V>>::open(self.acquire_active_read_lock(grouping_number))?;
        self.report_read(grouping_number);
        while let Some(entity) = input.next_object()? {
            match entity.key().cmp(key) {
                std::cmp::Ordering::Less => continue,
                std::cmp::Ordering::Equal => return Ok(Some(entity.into_value())),
                std::cmp::Ordering::Greater => break,
            }
        }
        Ok(None)
    }

    /// True if `key` is stored here.
    ///
    /// # Errors
    ///
    /// Returns an error if the chunk file cannot be read.
    pub fn contains(&self, key: &Key) -> CoreResult<bool> {
        let grouping_number = self.placement(key);
        let mut input = ObjectInput::<KeyOnly>::open(self.acquire_active_read_lock(grouping_number))?;
        while let Some(entity) = input.next_object()? {
            if entity.key() == key {
                return Ok(true);
            }
            if entity.key() > key {
                break;
            }
        }
        Ok(false)
    }

    /// Inserts a new entity in key order.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DuplicateKey`] if the key is already stored;
    /// the chunk is left untouched.
    pub fn insert<V: StoredValue>(&self, key: Key, value: V) -> CoreResult<()> {
        let bytes = encode_validated(&Entity::new(key.clone(), value))?;
        self.modify_chunk::<KeyOnly, _>(self.placement(&key), |input, output| {
            let mut pending = Some(bytes);
            while let Some((entity, raw)) = input.next_with_bytes()? {
                if entity.key() == &key {
                    return Err(CoreError::DuplicateKey { key: key.clone() });
                }
                if entity.key() > &key {
                    if let Some(bytes) = pending.take() {
                        output.write_raw(&bytes)?;
                    }
                }
                output.write_raw(&raw)?;
            }
            if let Some(bytes) = pending.take() {
                output.write_raw(&bytes)?;
            }
            Ok(())
        })
    }

    /// Replaces the value stored under `key`, keeping its position.
    ///
    /// Does nothing if the key is absent.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Serialization`] if the value fails its round
    /// trip, or an I/O error.
    pub fn update<V: StoredValue>(&self, key: Key, value: V) -> CoreResult<()> {
        let bytes = encode_validated(&Entity::new(key.clone(), value))?;
        self.modify_chunk::<KeyOnly, _>(self.placement(&key), |input, output| {
            while let Some((entity, raw)) = input.next_with_bytes()? {
                if entity.key() == &key {
                    output.write_raw(&bytes)?;
                } else {
                    output.write_raw(&raw)?;
                }
            }
            Ok(())
        })
    }

    /// Removes the entity stored under `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the chunk cannot be rewritten.
    pub fn delete(&self, key: &Key) -> CoreResult<()> {
        self.modify_chunk::<KeyOnly, _>(self.placement(key), |input, output| {
            while let Some((entity, raw)) = input.next_with_bytes()? {
                if entity.key() != key {
                    output.write_raw(&raw)?;
                }
            }
            Ok(())
        })
    }

    /// Rewrites the active chunk for `grouping_number` through `transform`.
    ///
    /// The transform reads the current sorted stream and must write the
    /// complete new sorted stream. If it fails, the chunk is unchanged.
    ///
    /// # Errors
    ///
    /// Returns the transform's error or any file operation failure.
    pub fn modify_chunk<T, F>(&self, grouping_number: i64, transform: F) -> CoreResult<()>
    where
        F: FnOnce(&mut ObjectInput<T>, &mut ObjectOutput<T>) -> CoreResult<()>,
    {
        let _segment = self.ctx.locks.acquire_read_lock(&self.path);
        let target = self.active_chunk_path(grouping_number);
        self.replace_chunk(&target, transform)?;
        self.report_write(grouping_number);
        Ok(())
    }

    /// Applies sorted changes to every chunk they touch in this segment.
    ///
    /// # Errors
    ///
    /// Returns an error if a chunk cannot be rewritten. Individual changes
    /// whose new value cannot be encoded are dropped, not reported.
    pub fn apply_changes<V: StoredValue>(&self, changes: &[&IndividualChange<V>]) -> CoreResult<()> {
        if changes.is_empty() {
            return Ok(());
        }
        let _segment = self.ctx.locks.acquire_read_lock(&self.path);

        let mut by_chunk: BTreeMap<PathBuf, (i64, Vec<&IndividualChange<V>>)> = BTreeMap::new();
        for &change in changes {
            let grouping_number = self.placement(change.key());
            by_chunk
                .entry(self.active_chunk_path(grouping_number))
                .or_insert_with(|| (grouping_number, Vec::new()))
                .1
                .push(change);
        }

        for (target, (grouping_number, chunk_changes)) in by_chunk {
            let writer = BatchWriter::new(chunk_changes);
            self.replace_chunk::<Entity<V>, _>(&target, |input, output| {
                let stats = writer.process(input, output)?;
                tracing::debug!(
                    path = %target.display(),
                    inserted = stats.inserted,
                    updated = stats.updated,
                    deleted = stats.deleted,
                    dropped = stats.dropped,
                    "applied batch to chunk"
                );
                Ok(())
            })?;
            self.report_write(grouping_number);
        }
        Ok(())
    }

    /// Merges every chunk inside `range` into one chunk covering `range`.
    ///
    /// Chunk locks are only tried while the folder is held. A rollup whose
    /// chunks are busy (an open iterator, a concurrent read) is deferred
    /// and leaves the files untouched.
    ///
    /// # Errors
    ///
    /// - [`CoreError::InvalidRollupRange`] if `range` is not one chunk of a
    ///   configured level inside this segment
    /// - [`CoreError::LockTimeout`] if the rollup was deferred
    ///
    /// Nothing on disk changes in either case.
    pub fn rollup(&self, range: Range) -> CoreResult<()> {
        self.ctx.paths.validate_rollup_range(range)?;
        if !self.range.encloses(&range) {
            return Err(CoreError::invalid_rollup_range(
                range,
                format!("outside segment {}", self.range),
            ));
        }

        let _segment = self.acquire_folder_write_lock()?;
        let sources: Vec<(Range, PathBuf)> = list_chunk_files(&self.path)?
            .into_iter()
            .filter(|(chunk, _)| range.encloses(chunk))
            .collect();
        let target = self.path.join(range.to_file_name());
        if sources.is_empty() || (sources.len() == 1 && sources[0].1 == target) {
            return Ok(());
        }

        let target_lock = self.lock_if_free(&target)?;
        let mut source_locks = Vec::with_capacity(sources.len());
        for (_, path) in sources.iter().filter(|(_, path)| *path != target) {
            source_locks.push(self.lock_if_free(path)?);
        }
        let tmp = fs::temp_path_for(&target);
        let tmp_lock = self.lock_if_free(&tmp)?;

        let result = self.merge_and_swap(&sources, &target_lock, &source_locks, tmp_lock);
        if result.is_err() {
            let _ = fs::remove_if_exists(&tmp);
        }
        result?;
        tracing::debug!(
            segment = %self.path.display(),
            range = %range,
            sources = sources.len(),
            "rolled up chunks"
        );
        Ok(())
    }

    /// Copies every source into the temp file and renames it over the target.
    ///
    /// The caller holds write locks on the target and all sources, so they
    /// are read without further locking.
    fn merge_and_swap(
        &self,
        sources: &[(Range, PathBuf)],
        target: &WriteLock,
        source_locks: &[WriteLock],
        tmp_lock: WriteLock,
    ) -> CoreResult<()> {
        let tmp = tmp_lock.path().to_path_buf();
        let mut output = ObjectOutput::<IgnoredAny>::create(tmp_lock, self.ctx.sync)?;
        for (_, path) in sources {
            let mut input = ObjectInput::<IgnoredAny>::open_unlocked(path)?;
            while let Some(raw) = input.next_raw()? {
                output.write_raw(&raw)?;
            }
        }
        let _tmp_lock = output.finish()?;

        fs::replace(&tmp, target.path(), self.ctx.sync)?;
        for lock in source_locks {
            fs::remove_if_exists(lock.path())?;
        }
        Ok(())
    }

    /// Lazily iterates entities overlapping `[min, max]` in key order.
    ///
    /// Entities whose grouping number is at or below `highest_completed`
    /// are skipped; the collection iterator uses this to avoid repeating
    /// time-frame entities already returned from an earlier segment.
    #[must_use]
    pub fn iter<V: StoredValue>(
        &self,
        min: i64,
        max: i64,
        highest_completed: Option<i64>,
    ) -> SegmentEntityIterator<V> {
        SegmentEntityIterator::new(self.clone(), min, max, highest_completed)
    }

    /// Collects every entity overlapping `[min, max]`.
    ///
    /// # Errors
    ///
    /// Returns an error if a chunk cannot be read.
    pub fn get_range<V: StoredValue>(&self, min: i64, max: i64) -> CoreResult<Vec<Entity<V>>> {
        self.iter(min, max, None).collect()
    }

    /// Chunk files currently in the segment, sorted by range.
    ///
    /// # Errors
    ///
    /// Returns an error if the folder cannot be listed.
    pub fn chunk_files(&self) -> CoreResult<Vec<(Range, PathBuf)>> {
        list_chunk_files(&self.path)
    }

    pub(crate) fn spans_ranges(&self) -> bool {
        self.ctx.spans_ranges
    }

    pub(crate) fn acquire_chunk_read_lock(&self, path: &Path) -> ReadLock {
        self.ctx.locks.acquire_read_lock(path)
    }

    /// First existing chunk for `grouping_number`, else the finest path.
    fn active_chunk_path(&self, grouping_number: i64) -> PathBuf {
        let mut candidates = self
            .ctx
            .paths
            .rollup_levels()
            .iter()
            .map(|&level| self.chunk_path(grouping_number, level));
        let finest = candidates.next().unwrap_or_else(|| self.chunk_path(grouping_number, 1));
        if finest.exists() {
            return finest;
        }
        candidates.find(|path| path.exists()).unwrap_or(finest)
    }

    /// Read lock on the active chunk for `grouping_number`.
    ///
    /// Each candidate is locked before its existence is checked, so a
    /// rollup that deletes it cannot slip in between.
    fn acquire_active_read_lock(&self, grouping_number: i64) -> ReadLock {
        let levels = self.ctx.paths.rollup_levels();
        for &level in levels {
            let lock = self.ctx.locks.acquire_read_lock(&self.chunk_path(grouping_number, level));
            if lock.path().exists() {
                return lock;
            }
        }
        let finest = levels.first().copied().unwrap_or(1);
        self.ctx.locks.acquire_read_lock(&self.chunk_path(grouping_number, finest))
    }

    fn chunk_path(&self, grouping_number: i64, level: u64) -> PathBuf {
        self.path
            .join(Range::for_value_and_size(grouping_number, level).to_file_name())
    }

    /// Copy-on-write replacement of `target`.
    ///
    /// The wait for the target's write lock is bounded by the configured
    /// write lock timeout, so a chunk held by an open iterator fails the
    /// write with [`CoreError::LockTimeout`].
    fn replace_chunk<T, F>(&self, target: &Path, transform: F) -> CoreResult<()>
    where
        F: FnOnce(&mut ObjectInput<T>, &mut ObjectOutput<T>) -> CoreResult<()>,
    {
        let locks = &self.ctx.locks;
        let tmp = fs::temp_path_for(target);
        let tmp_lock = self.acquire_chunk_write_lock(&tmp)?;

        let result: CoreResult<()> = (|| {
            let mut input = ObjectInput::<T>::open(locks.acquire_read_lock(target))?;
            let mut output = ObjectOutput::<T>::create(tmp_lock, self.ctx.sync)?;
            transform(&mut input, &mut output)?;
            let tmp_lock = output.finish()?;
            drop(input);

            let _target_lock = self.acquire_chunk_write_lock(target)?;
            fs::replace(&tmp, target, self.ctx.sync)?;
            drop(tmp_lock);
            Ok(())
        })();

        if result.is_err() {
            let _ = fs::remove_if_exists(&tmp);
        }
        result
    }

    fn acquire_folder_write_lock(&self) -> CoreResult<WriteLock> {
        match self.ctx.rollup_lock_timeout {
            Some(timeout) => Ok(self.ctx.locks.try_acquire_write_lock(&self.path, timeout)?),
            None => Ok(self.ctx.locks.acquire_write_lock(&self.path)),
        }
    }

    fn acquire_chunk_write_lock(&self, path: &Path) -> CoreResult<WriteLock> {
        match self.ctx.write_lock_timeout {
            Some(timeout) => Ok(self.ctx.locks.try_acquire_write_lock(path, timeout)?),
            None => Ok(self.ctx.locks.acquire_write_lock(path)),
        }
    }

    fn lock_if_free(&self, path: &Path) -> CoreResult<WriteLock> {
        Ok(self.ctx.locks.try_acquire_write_lock(path, Duration::ZERO)?)
    }

    fn rollup_targets(&self, grouping_number: i64) -> Vec<RollupTarget> {
        self.ctx
            .paths
            .rollup_ranges(grouping_number)
            .into_iter()
            .map(|range| RollupTarget::new(self.ctx.owner.clone(), self.range.start(), range))
            .collect()
    }

    pub(crate) fn report_read(&self, grouping_number: i64) {
        if let Some(listener) = &self.ctx.listener {
            listener.report_reads(&self.rollup_targets(grouping_number));
        }
    }

    fn report_write(&self, grouping_number: i64) {
        if let Some(listener) = &self.ctx.listener {
            listener.report_writes(&self.rollup_targets(grouping_number));
        }
    }
}

impl fmt::Debug for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Segment")
            .field("path", &self.path)
            .field("range", &self.range)
            .finish()
    }
}

impl PartialEq for Segment {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path && self.range == other.range
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::{SegmentManager, SegmentOptions, SegmentPathManager, SegmentSizing};
    use rangedb_storage::LockManager;
    use std::fs as stdfs;
    use std::thread;
    use tempfile::{tempdir, TempDir};

    fn setup(spans: bool) -> (TempDir, SegmentManager) {
        let dir = tempdir().unwrap();
        let sizing = SegmentSizing::new(vec![1, 10, 100], vec![1000, 100]).unwrap();
        let segments = SegmentManager::new(
            SegmentPathManager::new(dir.path(), sizing),
            LockManager::new(),
            SegmentOptions::default().spans_ranges(spans),
        );
        (dir, segments)
    }

    fn values(entities: Vec<Entity<String>>) -> Vec<String> {
        entities.into_iter().map(Entity::into_value).collect()
    }

    fn values_of(segment: &Segment) -> Vec<i64> {
        segment
            .get_range::<i64>(0, 99)
            .unwrap()
            .into_iter()
            .map(Entity::into_value)
            .collect()
    }

    #[test]
    fn insert_get_update_delete() {
        let (_dir, segments) = setup(false);
        let segment = segments.segment_for(0);
        let key = Key::Long(7);

        assert_eq!(segment.get::<String>(&key).unwrap(), None);
        segment.insert(key.clone(), "seven".to_string()).unwrap();
        assert_eq!(segment.get::<String>(&key).unwrap().as_deref(), Some("seven"));

        segment.update(key.clone(), "SEVEN".to_string()).unwrap();
        assert_eq!(segment.get::<String>(&key).unwrap().as_deref(), Some("SEVEN"));

        segment.delete(&key).unwrap();
        assert_eq!(segment.get::<String>(&key).unwrap(), None);
        segment.delete(&key).unwrap();

        segment.insert(key.clone(), "again".to_string()).unwrap();
        assert_eq!(segment.get::<String>(&key).unwrap().as_deref(), Some("again"));
        assert!(segments.lock_manager().is_idle());
    }

    #[test]
    fn duplicate_insert_leaves_data_unchanged() {
        let (_dir, segments) = setup(false);
        let segment = segments.segment_for(0);
        segment.insert(Key::Long(3), "first".to_string()).unwrap();

        let err = segment.insert(Key::Long(3), "second".to_string()).unwrap_err();
        assert!(matches!(err, CoreError::DuplicateKey { .. }));
        assert_eq!(segment.get::<String>(&Key::Long(3)).unwrap().as_deref(), Some("first"));
        assert_eq!(segment.chunk_files().unwrap().len(), 1);
        assert!(segments.lock_manager().is_idle());
    }

    #[test]
    fn update_of_missing_key_is_a_no_op() {
        let (_dir, segments) = setup(false);
        let segment = segments.segment_for(0);
        segment.update(Key::Long(1), "ghost".to_string()).unwrap();
        assert_eq!(segment.get::<String>(&Key::Long(1)).unwrap(), None);
    }

    #[test]
    fn failed_transform_keeps_the_chunk() {
        let (_dir, segments) = setup(false);
        let segment = segments.segment_for(0);
        segment.insert(Key::Long(4), 4u32).unwrap();

        let err = segment
            .modify_chunk::<Entity<u32>, _>(4, |_input, output| {
                output.write(&Entity::new(Key::Long(4), 99))?;
                Err(CoreError::invalid_argument("abort"))
            })
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidArgument { .. }));
        assert_eq!(segment.get::<u32>(&Key::Long(4)).unwrap(), Some(4));
        assert!(stdfs::read_dir(segment.path())
            .unwrap()
            .all(|e| !fs::is_temp_file(&e.unwrap().path())));
        assert!(segments.lock_manager().is_idle());
    }

    #[test]
    fn rollup_keeps_range_contents() {
        let (_dir, segments) = setup(false);
        let segment = segments.segment_for(1);
        segment.insert(Key::Long(1), "Anna".to_string()).unwrap();
        segment.insert(Key::Long(2), "Bob".to_string()).unwrap();
        assert_eq!(values(segment.get_range(1, 2).unwrap()), vec!["Anna", "Bob"]);
        assert_eq!(segment.chunk_files().unwrap().len(), 2);

        segment.rollup(Range::new(0, 99)).unwrap();

        let chunks = segment.chunk_files().unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].0, Range::new(0, 99));
        assert_eq!(values(segment.get_range(1, 2).unwrap()), vec!["Anna", "Bob"]);
        assert_eq!(segment.get::<String>(&Key::Long(2)).unwrap().as_deref(), Some("Bob"));
        assert!(segments.lock_manager().is_idle());
    }

    #[test]
    fn writes_after_rollup_go_to_the_rolled_chunk() {
        let (_dir, segments) = setup(false);
        let segment = segments.segment_for(0);
        segment.insert(Key::Long(5), 5u32).unwrap();
        segment.rollup(Range::new(0, 9)).unwrap();
        segment.insert(Key::Long(3), 3u32).unwrap();
        segment.insert(Key::Long(50), 50u32).unwrap();

        let ranges: Vec<Range> = segment.chunk_files().unwrap().into_iter().map(|c| c.0).collect();
        assert_eq!(ranges, vec![Range::new(0, 9), Range::new(50, 50)]);
        let all: Vec<u32> = segment
            .get_range::<u32>(0, 99)
            .unwrap()
            .into_iter()
            .map(Entity::into_value)
            .collect();
        assert_eq!(all, vec![3, 5, 50]);

        segment.rollup(Range::new(0, 99)).unwrap();
        let again: Vec<u32> = segment
            .get_range::<u32>(0, 99)
            .unwrap()
            .into_iter()
            .map(Entity::into_value)
            .collect();
        assert_eq!(again, vec![3, 5, 50]);
    }

    #[test]
    fn invalid_rollup_changes_nothing() {
        let (_dir, segments) = setup(false);
        let segment = segments.segment_for(0);
        segment.insert(Key::Long(1), 1u8).unwrap();
        segment.insert(Key::Long(2), 2u8).unwrap();

        for range in [Range::new(0, 100), Range::new(0, 98), Range::new(5, 14), Range::new(100, 199)] {
            let err = segment.rollup(range).unwrap_err();
            assert!(matches!(err, CoreError::InvalidRollupRange { .. }), "{range}");
        }
        assert_eq!(segment.chunk_files().unwrap().len(), 2);
    }

    #[test]
    fn rollup_of_nothing_is_a_no_op() {
        let (_dir, segments) = setup(false);
        let segment = segments.segment_for(0);
        segment.rollup(Range::new(0, 99)).unwrap();
        assert!(!segment.path().exists());
    }

    #[test]
    fn iterator_opened_before_rollup_sees_same_entities() {
        let (_dir, segments) = setup(false);
        let segment = segments.segment_for(0);
        segment.insert(Key::Long(1), "Anna".to_string()).unwrap();
        segment.insert(Key::Long(2), "Bob".to_string()).unwrap();

        let iter = segment.iter::<String>(0, 99, None);
        segment.rollup(Range::new(0, 99)).unwrap();
        let seen: Vec<String> = iter.map(|e| e.unwrap().into_value()).collect();
        assert_eq!(seen, vec!["Anna", "Bob"]);
    }

    #[test]
    fn rollup_is_deferred_while_an_iterator_holds_a_source() {
        let (_dir, segments) = setup(false);
        let segment = segments.segment_for(0);
        for key in 1..=3i64 {
            segment.insert(Key::Long(key), key).unwrap();
        }

        let mut iter = segment.iter::<i64>(0, 99, None);
        assert_eq!(iter.next().unwrap().unwrap().into_value(), 1);
        let held = iter.current_path().unwrap().to_path_buf();

        let err = segment.rollup(Range::new(0, 99)).unwrap_err();
        assert!(matches!(err, CoreError::LockTimeout { ref path } if *path == held));
        assert_eq!(segment.chunk_files().unwrap().len(), 3);
        assert!(!fs::temp_path_for(&segment.path().join("0_99")).exists());

        let rest: Vec<i64> = iter.map(|e| e.unwrap().into_value()).collect();
        assert_eq!(rest, vec![2, 3]);

        segment.rollup(Range::new(0, 99)).unwrap();
        assert_eq!(segment.chunk_files().unwrap().len(), 1);
        assert!(segments.lock_manager().is_idle());
    }

    #[test]
    fn deferred_rollup_does_not_hold_up_writers() {
        let (_dir, segments) = setup(false);
        let segment = segments.segment_for(0);
        segment.insert(Key::Long(1), 1i64).unwrap();
        segment.insert(Key::Long(2), 2i64).unwrap();

        let mut iter = segment.iter::<i64>(0, 99, None);
        iter.next().unwrap().unwrap();

        let rollup = {
            let segment = segment.clone();
            thread::spawn(move || segment.rollup(Range::new(0, 99)))
        };
        assert!(matches!(rollup.join().unwrap(), Err(CoreError::LockTimeout { .. })));

        let writer = {
            let segment = segment.clone();
            thread::spawn(move || segment.insert(Key::Long(50), 50i64))
        };
        writer.join().unwrap().unwrap();
        assert_eq!(segment.get::<i64>(&Key::Long(50)).unwrap(), Some(50));

        iter.close();
        segment.rollup(Range::new(0, 99)).unwrap();
        assert_eq!(values_of(&segment), vec![1, 2, 50]);
    }

    #[test]
    fn write_to_a_chunk_held_by_an_iterator_times_out() {
        let dir = tempdir().unwrap();
        let sizing = SegmentSizing::new(vec![1, 10, 100], vec![1000, 100]).unwrap();
        let segments = SegmentManager::new(
            SegmentPathManager::new(dir.path(), sizing),
            LockManager::new(),
            SegmentOptions::default().write_lock_timeout(Some(Duration::from_millis(50))),
        );
        let segment = segments.segment_for(0);
        segment.insert(Key::Long(1), 1i64).unwrap();

        let mut iter = segment.iter::<i64>(0, 99, None);
        iter.next().unwrap().unwrap();
        let err = segment.update(Key::Long(1), 10i64).unwrap_err();
        assert!(matches!(err, CoreError::LockTimeout { .. }));
        assert!(!fs::temp_path_for(&segment.path().join("1_1")).exists());

        iter.close();
        segment.update(Key::Long(1), 10i64).unwrap();
        assert_eq!(segment.get::<i64>(&Key::Long(1)).unwrap(), Some(10));
        assert!(segments.lock_manager().is_idle());
    }

    #[test]
    fn iterator_releases_lock_on_close() {
        let (_dir, segments) = setup(false);
        let segment = segments.segment_for(0);
        segment.insert(Key::Long(1), 1u8).unwrap();
        segment.insert(Key::Long(2), 2u8).unwrap();

        let mut iter = segment.iter::<u8>(0, 99, None);
        assert!(iter.current_path().is_none());
        iter.next().unwrap().unwrap();
        let path = iter.current_path().unwrap().to_path_buf();
        assert!(segments.lock_manager().is_locked(&path));
        iter.close();
        assert!(!segments.lock_manager().is_locked(&path));
        assert!(iter.next().is_none());
    }

    #[test]
    fn iterator_survives_deleted_chunk() {
        let (_dir, segments) = setup(false);
        let segment = segments.segment_for(0);
        segment.insert(Key::Long(1), 1u8).unwrap();
        segment.insert(Key::Long(2), 2u8).unwrap();
        stdfs::remove_file(segment.path().join("1_1")).unwrap();

        let seen: Vec<u8> = segment
            .iter::<u8>(0, 99, None)
            .map(|e| e.unwrap().into_value())
            .collect();
        assert_eq!(seen, vec![2]);
    }

    #[test]
    fn iteration_window_filters_keys() {
        let (_dir, segments) = setup(false);
        let segment = segments.segment_for(0);
        for key in [1i64, 5, 9, 10, 50] {
            segment.insert(Key::Long(key), key).unwrap();
        }
        segment.rollup(Range::new(0, 9)).unwrap();
        let seen: Vec<i64> = segment
            .get_range::<i64>(5, 10)
            .unwrap()
            .into_iter()
            .map(Entity::into_value)
            .collect();
        assert_eq!(seen, vec![5, 9, 10]);

        let skipped: Vec<i64> = segment
            .iter::<i64>(0, 99, Some(9))
            .map(|e| e.unwrap().into_value())
            .collect();
        assert_eq!(skipped, vec![10, 50]);
    }

    #[test]
    fn time_frames_match_overlapping_windows() {
        let (_dir, segments) = setup(true);
        let segment = segments.segment_for(0);
        let frame = Key::time_frame(1i64, 2, 40).unwrap();
        segment.insert(frame.clone(), "frame".to_string()).unwrap();
        segment.insert(Key::time_frame(2i64, 60, 61).unwrap(), "late".to_string()).unwrap();

        assert_eq!(values(segment.get_range(30, 35).unwrap()), vec!["frame"]);
        assert_eq!(values(segment.get_range(41, 59).unwrap()), Vec::<String>::new());
        assert_eq!(values(segment.get_range(0, 99).unwrap()), vec!["frame", "late"]);
    }

    #[test]
    fn corrupt_tail_reads_as_end_of_chunk() {
        let (_dir, segments) = setup(false);
        let segment = segments.segment_for(0);
        segment.insert(Key::Long(1), 1u32).unwrap();
        segment.insert(Key::Long(2), 2u32).unwrap();
        segment.rollup(Range::new(0, 9)).unwrap();

        let chunk = segment.path().join("0_9");
        let mut bytes = stdfs::read(&chunk).unwrap();
        bytes.truncate(bytes.len() - 1);
        stdfs::write(&chunk, bytes).unwrap();

        assert_eq!(segment.get::<u32>(&Key::Long(1)).unwrap(), Some(1));
        assert_eq!(segment.get::<u32>(&Key::Long(2)).unwrap(), None);
        segment.insert(Key::Long(3), 3u32).unwrap();
        assert_eq!(segment.get::<u32>(&Key::Long(3)).unwrap(), Some(3));
    }
}
