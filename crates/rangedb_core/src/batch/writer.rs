//! Merge-join of sorted changes into a sorted chunk stream.

use crate::entity::{Entity, IndividualChange, StoredValue};
use crate::error::CoreResult;
use crate::object::{encode_validated, ObjectInput, ObjectOutput};
use std::cmp::Ordering;

/// Counts of what a [`BatchWriter`] did to one chunk.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchStats {
    /// Entities written for keys that were not stored before.
    pub inserted: usize,
    /// Stored entities replaced by a new value.
    pub updated: usize,
    /// Stored entities removed.
    pub deleted: usize,
    /// Stored entities copied through untouched.
    pub kept: usize,
    /// Changes dropped because their new value failed to encode.
    pub dropped: usize,
}

/// Applies a sorted list of changes to one chunk.
///
/// Both the changes and the chunk are in key order, so one pass over each
/// produces the new chunk:
///
/// - change key below the next stored key: insert (if it carries a value)
/// - equal keys: replace with the new value, or drop for a delete
/// - change key above: copy the stored entity through unchanged
///
/// Unreadable stored records are skipped by the input stream. A change
/// whose new value fails its round trip is dropped and the stored entity,
/// if any, is kept.
#[derive(Debug)]
pub struct BatchWriter<'a, V> {
    changes: Vec<&'a IndividualChange<V>>,
}

impl<'a, V: StoredValue> BatchWriter<'a, V> {
    /// Creates a writer over changes that are already in merge order.
    pub fn new(changes: Vec<&'a IndividualChange<V>>) -> Self {
        Self { changes }
    }

    /// Creates a writer over a slice of changes in merge order.
    pub fn from_slice(changes: &'a [IndividualChange<V>]) -> Self {
        Self::new(changes.iter().collect())
    }

    /// Streams `input` into `output` with the changes applied.
    ///
    /// # Errors
    ///
    /// Returns an error only for I/O failures.
    pub fn process(
        &self,
        input: &mut ObjectInput<Entity<V>>,
        output: &mut ObjectOutput<Entity<V>>,
    ) -> CoreResult<BatchStats> {
        let mut stats = BatchStats::default();
        let mut next_change = 0;
        let mut stored = input.next_with_bytes()?;

        loop {
            let change = self.changes.get(next_change).copied();
            match (change, stored.as_ref()) {
                (None, None) => break,
                (None, Some((_, raw))) => {
                    output.write_raw(raw)?;
                    stats.kept += 1;
                    stored = input.next_with_bytes()?;
                }
                (Some(change), None) => {
                    Self::write_insert(change, output, &mut stats)?;
                    next_change += 1;
                }
                (Some(change), Some((entity, raw))) => match change.key().cmp(entity.key()) {
                    Ordering::Less => {
                        Self::write_insert(change, output, &mut stats)?;
                        next_change += 1;
                    }
                    Ordering::Equal => {
                        match change.new_value() {
                            Some(value) => match Self::encode(change, value) {
                                Some(bytes) => {
                                    output.write_raw(&bytes)?;
                                    stats.updated += 1;
                                }
                                None => {
                                    output.write_raw(raw)?;
                                    stats.dropped += 1;
                                }
                            },
                            None => stats.deleted += 1,
                        }
                        next_change += 1;
                        stored = input.next_with_bytes()?;
                    }
                    Ordering::Greater => {
                        output.write_raw(raw)?;
                        stats.kept += 1;
                        stored = input.next_with_bytes()?;
                    }
                },
            }
        }
        Ok(stats)
    }

    fn write_insert(
        change: &IndividualChange<V>,
        output: &mut ObjectOutput<Entity<V>>,
        stats: &mut BatchStats,
    ) -> CoreResult<()> {
        let Some(value) = change.new_value() else {
            // Delete of a key that is not stored.
            return Ok(());
        };
        match Self::encode(change, value) {
            Some(bytes) => {
                output.write_raw(&bytes)?;
                stats.inserted += 1;
            }
            None => stats.dropped += 1,
        }
        Ok(())
    }

    fn encode(change: &IndividualChange<V>, value: &V) -> Option<Vec<u8>> {
        match encode_validated(&Entity::new(change.key().clone(), value.clone())) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                tracing::warn!(key = %change.key(), error = %e, "dropping change with unencodable value");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::sort_changes;
    use crate::key::Key;
    use proptest::prelude::*;
    use rangedb_storage::LockManager;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::BTreeMap;
    use std::path::Path;
    use tempfile::tempdir;

    fn write_chunk<V: StoredValue>(locks: &LockManager, path: &Path, entities: &[(i64, V)]) {
        let mut output = ObjectOutput::create(locks.acquire_write_lock(path), false).unwrap();
        for (key, value) in entities {
            output.write(&Entity::new(Key::Long(*key), value.clone())).unwrap();
        }
        drop(output.finish().unwrap());
    }

    fn read_chunk<V: StoredValue>(locks: &LockManager, path: &Path) -> Vec<(i64, V)> {
        let mut input = ObjectInput::<Entity<V>>::open(locks.acquire_read_lock(path)).unwrap();
        let mut entities = Vec::new();
        while let Some(entity) = input.next_object().unwrap() {
            let (key, value) = entity.into_parts();
            entities.push((key.grouping_number(), value));
        }
        entities
    }

    fn run<V: StoredValue>(
        locks: &LockManager,
        from: &Path,
        to: &Path,
        changes: &[IndividualChange<V>],
    ) -> BatchStats {
        let mut input = ObjectInput::open(locks.acquire_read_lock(from)).unwrap();
        let mut output = ObjectOutput::create(locks.acquire_write_lock(to), false).unwrap();
        let stats = BatchWriter::from_slice(changes).process(&mut input, &mut output).unwrap();
        drop(output.finish().unwrap());
        stats
    }

    #[test]
    fn deletes_skip_missing_keys() {
        let dir = tempdir().unwrap();
        let locks = LockManager::new();
        let (from, to) = (dir.path().join("in"), dir.path().join("out"));
        write_chunk(&locks, &from, &[(3, "c".to_string()), (5, "e".to_string()), (7, "g".to_string())]);

        let changes: Vec<IndividualChange<String>> = [2, 3, 5, 8]
            .into_iter()
            .map(|k| IndividualChange::delete(Key::Long(k), None))
            .collect();
        let stats = run(&locks, &from, &to, &changes);

        assert_eq!(read_chunk::<String>(&locks, &to), vec![(7, "g".to_string())]);
        assert_eq!(stats.deleted, 2);
        assert_eq!(stats.kept, 1);
        assert!(locks.is_idle());
    }

    #[test]
    fn inserts_updates_and_deletes_interleave() {
        let dir = tempdir().unwrap();
        let locks = LockManager::new();
        let (from, to) = (dir.path().join("in"), dir.path().join("out"));
        write_chunk(&locks, &from, &[(2, 20u32), (4, 40), (6, 60)]);

        let mut changes = vec![
            IndividualChange::insert(Key::Long(7), 70),
            IndividualChange::update(Key::Long(4), 40, 41),
            IndividualChange::insert(Key::Long(1), 10),
            IndividualChange::delete(Key::Long(6), Some(60)),
            IndividualChange::insert(Key::Long(3), 30),
        ];
        sort_changes(&mut changes);
        let stats = run(&locks, &from, &to, &changes);

        assert_eq!(
            read_chunk::<u32>(&locks, &to),
            vec![(1, 10), (2, 20), (3, 30), (4, 41), (7, 70)]
        );
        assert_eq!(
            stats,
            BatchStats {
                inserted: 3,
                updated: 1,
                deleted: 1,
                kept: 1,
                dropped: 0
            }
        );
    }

    #[test]
    fn missing_input_behaves_as_empty() {
        let dir = tempdir().unwrap();
        let locks = LockManager::new();
        let (from, to) = (dir.path().join("absent"), dir.path().join("out"));
        let changes = vec![
            IndividualChange::insert(Key::Long(1), 1u8),
            IndividualChange::delete(Key::Long(2), None),
        ];
        run(&locks, &from, &to, &changes);
        assert_eq!(read_chunk::<u8>(&locks, &to), vec![(1, 1)]);
    }

    #[test]
    fn corrupt_stored_record_does_not_abort_batch() {
        let dir = tempdir().unwrap();
        let locks = LockManager::new();
        let (from, to) = (dir.path().join("in"), dir.path().join("out"));
        {
            let mut output =
                ObjectOutput::<Entity<u32>>::create(locks.acquire_write_lock(&from), false).unwrap();
            output.write(&Entity::new(Key::Long(1), 1)).unwrap();
            output.write_raw(&[0x9f, 0xff, 0x00]).unwrap();
            output.write(&Entity::new(Key::Long(5), 5)).unwrap();
            drop(output.finish().unwrap());
        }
        let changes = vec![
            IndividualChange::update(Key::Long(1), 1, 100),
            IndividualChange::insert(Key::Long(3), 3),
            IndividualChange::delete(Key::Long(5), Some(5)),
        ];
        run(&locks, &from, &to, &changes);
        assert_eq!(read_chunk::<u32>(&locks, &to), vec![(1, 100), (3, 3)]);
    }

    /// Encodes fine but always decodes as zero.
    #[derive(Debug, Clone, PartialEq)]
    struct Lossy(u32);

    impl Serialize for Lossy {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            serializer.serialize_u32(self.0)
        }
    }

    impl<'de> Deserialize<'de> for Lossy {
        fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
            u32::deserialize(deserializer).map(|_| Lossy(0))
        }
    }

    #[test]
    fn invalid_new_value_is_dropped_alone() {
        let dir = tempdir().unwrap();
        let locks = LockManager::new();
        let (from, to) = (dir.path().join("in"), dir.path().join("out"));
        write_chunk(&locks, &from, &[(1, Lossy(0)), (2, Lossy(0))]);

        let changes = vec![
            IndividualChange::update(Key::Long(1), Lossy(0), Lossy(9)),
            IndividualChange::delete(Key::Long(2), None),
            IndividualChange::insert(Key::Long(3), Lossy(7)),
            IndividualChange::insert(Key::Long(4), Lossy(0)),
        ];
        let stats = run(&locks, &from, &to, &changes);

        assert_eq!(read_chunk::<Lossy>(&locks, &to), vec![(1, Lossy(0)), (4, Lossy(0))]);
        assert_eq!(stats.dropped, 2);
        assert_eq!(stats.deleted, 1);
    }

    proptest! {
        #[test]
        fn matches_a_map_model(
            stored in prop::collection::btree_map(-50i64..50, any::<u16>(), 0..30),
            edits in prop::collection::btree_map(-60i64..60, prop::option::of(any::<u16>()), 0..30),
        ) {
            let dir = tempdir().unwrap();
            let locks = LockManager::new();
            let (from, to) = (dir.path().join("in"), dir.path().join("out"));
            let initial: Vec<(i64, u16)> = stored.iter().map(|(k, v)| (*k, *v)).collect();
            write_chunk(&locks, &from, &initial);

            let mut model: BTreeMap<i64, u16> = stored.clone();
            let mut changes = Vec::new();
            for (key, new_value) in &edits {
                let old = stored.get(key).copied();
                changes.push(IndividualChange::new(Key::Long(*key), old, *new_value));
                match new_value {
                    Some(value) => { model.insert(*key, *value); }
                    None => { model.remove(key); }
                }
            }
            sort_changes(&mut changes);
            run(&locks, &from, &to, &changes);

            let expected: Vec<(i64, u16)> = model.into_iter().collect();
            prop_assert_eq!(read_chunk::<u16>(&locks, &to), expected);
        }
    }
}
