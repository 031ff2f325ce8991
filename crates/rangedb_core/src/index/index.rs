//! One secondary index.

use super::extractor::KeyExtractor;
use crate::batch::apply_changes;
use crate::entity::{sort_changes, Entity, IndividualChange, StoredValue};
use crate::error::{CoreError, CoreResult};
use crate::key::{Key, KeyKind};
use crate::object::{load_object, save_object};
use crate::range::Range;
use crate::rollup::RollupOwner;
use crate::segment::{SegmentManager, SegmentOptions, SegmentPathManager, SegmentSizing};
use rangedb_storage::LockManager;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Metadata file inside every index folder.
pub const EXTRACTOR_FILE: &str = "EXTRACTOR";

/// Contents of the [`EXTRACTOR_FILE`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexMeta {
    /// Index name.
    pub name: String,
    /// Kind of the extracted keys.
    pub key_kind: KeyKind,
    /// False until the initial population finished.
    pub populated: bool,
}

/// Checks that `name` can be used as an index folder name.
///
/// # Errors
///
/// Returns [`CoreError::InvalidArgument`] for empty names, names with path
/// separators, names starting with `.` or `_`, and names that parse as a
/// segment range.
pub fn validate_index_name(name: &str) -> CoreResult<()> {
    let problem = if name.is_empty() {
        Some("name is empty")
    } else if name.starts_with('.') || name.starts_with('_') {
        Some("name starts with '.' or '_'")
    } else if name.contains(['/', '\\']) {
        Some("name contains a path separator")
    } else if Range::from_file_name(name).is_some() {
        Some("name looks like a segment range")
    } else {
        None
    };
    match problem {
        Some(problem) => Err(CoreError::invalid_argument(format!("index name {name:?}: {problem}"))),
        None => Ok(()),
    }
}

/// A secondary index over a collection of `V`.
pub struct SecondaryIndex<V> {
    name: String,
    dir: PathBuf,
    kind: KeyKind,
    extractor: Arc<dyn KeyExtractor<V>>,
    segments: SegmentManager,
}

impl<V: StoredValue> SecondaryIndex<V> {
    /// Opens or declares the index stored in `dir`.
    ///
    /// `options` is the template for the index tree; owner and range
    /// spanning are set here. Returns the index and whether it still
    /// needs its initial population.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IndexKeyMismatch`] if the folder was declared
    /// with another key kind.
    pub fn open(
        name: &str,
        dir: PathBuf,
        extractor: Arc<dyn KeyExtractor<V>>,
        locks: LockManager,
        options: SegmentOptions,
    ) -> CoreResult<(Self, bool)> {
        validate_index_name(name)?;
        let kind = extractor.key_kind();
        let meta_path = dir.join(EXTRACTOR_FILE);
        let needs_population = match load_object::<IndexMeta>(&locks, &meta_path)? {
            Some(meta) if meta.key_kind != kind => {
                return Err(CoreError::IndexKeyMismatch {
                    name: name.to_string(),
                    stored: meta.key_kind.to_string(),
                    requested: kind.to_string(),
                });
            }
            Some(meta) => !meta.populated,
            None => {
                let meta = IndexMeta {
                    name: name.to_string(),
                    key_kind: kind,
                    populated: false,
                };
                save_object(&locks, &meta_path, &meta, true)?;
                true
            }
        };

        let paths = SegmentPathManager::new(dir.clone(), SegmentSizing::for_kind(kind));
        let options = options.owner(RollupOwner::Index(name.to_string())).spans_ranges(false);
        Ok((
            Self {
                name: name.to_string(),
                dir,
                kind,
                extractor,
                segments: SegmentManager::new(paths, locks, options),
            },
            needs_population,
        ))
    }

    /// Index name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The index folder.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Kind of the extracted keys.
    pub fn key_kind(&self) -> KeyKind {
        self.kind
    }

    /// The index's segment tree.
    pub fn segment_manager(&self) -> &SegmentManager {
        &self.segments
    }

    /// Records that the initial population finished.
    ///
    /// # Errors
    ///
    /// Returns an error if the metadata file cannot be written.
    pub fn mark_populated(&self) -> CoreResult<()> {
        let meta = IndexMeta {
            name: self.name.clone(),
            key_kind: self.kind,
            populated: true,
        };
        save_object(self.segments.lock_manager(), &self.dir.join(EXTRACTOR_FILE), &meta, true)
    }

    /// Deletes every segment folder of the index, keeping its metadata.
    ///
    /// Used before a rebuild; the caller must keep writers away.
    ///
    /// # Errors
    ///
    /// Returns an error if a folder cannot be removed.
    pub fn clear(&self) -> CoreResult<()> {
        for child in rangedb_storage::fs::list_dir(&self.dir)? {
            let is_segment_folder = child.is_dir()
                && child
                    .file_name()
                    .and_then(|n| n.to_str())
                    .and_then(Range::from_file_name)
                    .is_some();
            if is_segment_folder {
                std::fs::remove_dir_all(&child)?;
            }
        }
        Ok(())
    }

    /// Composite keys for `value` stored under `destination`.
    fn composite_keys(&self, destination: &Key, value: Option<&V>) -> BTreeSet<Key> {
        let Some(value) = value else {
            return BTreeSet::new();
        };
        self.extractor
            .extract_keys(value)
            .into_iter()
            .filter(|key| {
                let matches = key.kind() == Some(self.kind);
                if !matches {
                    tracing::warn!(index = %self.name, key = %key, "extracted key of the wrong kind ignored");
                }
                matches
            })
            .map(|key| Key::composite(key, destination.clone()))
            .collect()
    }

    /// Index changes implied by collection `changes`, in merge order.
    ///
    /// Keys produced by both the old and the new value are left alone.
    pub fn index_changes(&self, changes: &[IndividualChange<V>]) -> Vec<IndividualChange<Key>> {
        let mut index_changes = Vec::new();
        for change in changes {
            let destination = change.key();
            let old = self.composite_keys(destination, change.old_value());
            let new = self.composite_keys(destination, change.new_value());
            for removed in old.difference(&new) {
                index_changes.push(IndividualChange::delete(removed.clone(), Some(destination.clone())));
            }
            for added in new.difference(&old) {
                index_changes.push(IndividualChange::insert(added.clone(), destination.clone()));
            }
        }
        sort_changes(&mut index_changes);
        index_changes
    }

    /// Applies the index side of collection `changes`.
    ///
    /// # Errors
    ///
    /// Returns an error if an index chunk cannot be rewritten.
    pub fn apply(&self, changes: &[IndividualChange<V>]) -> CoreResult<()> {
        apply_changes(&self.segments, &self.index_changes(changes))
    }

    /// Indexes existing entities.
    ///
    /// # Errors
    ///
    /// Returns an error if an index chunk cannot be rewritten.
    pub fn add_entities(&self, entities: &[Entity<V>]) -> CoreResult<()> {
        let changes: Vec<IndividualChange<V>> = entities
            .iter()
            .map(|entity| IndividualChange::insert(entity.key().clone(), entity.value().clone()))
            .collect();
        self.apply(&changes)
    }

    /// Collection keys indexed under `extracted`, in key order.
    ///
    /// # Errors
    ///
    /// Returns an error if an index chunk cannot be read.
    pub fn get_keys(&self, extracted: &Key) -> CoreResult<Vec<Key>> {
        let grouping_number = extracted.grouping_number();
        let mut keys = Vec::new();
        for entity in self
            .segments
            .segment_for(grouping_number)
            .iter::<Key>(grouping_number, grouping_number, None)
        {
            let entity = entity?;
            if let Key::IndexComposite(composite) = entity.key() {
                if composite.extracted() == extracted {
                    keys.push(entity.into_value());
                }
            }
        }
        Ok(keys)
    }

    /// Rolls up `range` in the index segment holding `segment_grouping_number`.
    ///
    /// # Errors
    ///
    /// See [`Segment::rollup`](crate::segment::Segment::rollup).
    pub fn rollup(&self, segment_grouping_number: i64, range: Range) -> CoreResult<()> {
        self.segments.rollup(segment_grouping_number, range)
    }
}

impl<V> std::fmt::Debug for SecondaryIndex<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecondaryIndex")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("dir", &self.dir)
            .finish_non_exhaustive()
    }
}
