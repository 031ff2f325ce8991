//! The set of indexes declared on a collection.

use super::extractor::KeyExtractor;
use super::index::{IndexMeta, SecondaryIndex, EXTRACTOR_FILE};
use crate::entity::{IndividualChange, StoredValue};
use crate::error::{CoreError, CoreResult};
use crate::object::{load_object, save_object};
use crate::range::Range;
use crate::segment::SegmentOptions;
use parking_lot::RwLock;
use rangedb_storage::{fs, LockManager};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Names of the index folders under a collection root, sorted.
///
/// A folder counts as an index when it holds an [`EXTRACTOR_FILE`].
///
/// # Errors
///
/// Returns an error if the root cannot be listed.
pub fn list_index_names(root: &Path) -> CoreResult<Vec<String>> {
    let mut names: Vec<String> = fs::list_dir(root)?
        .into_iter()
        .filter(|path| path.join(EXTRACTOR_FILE).is_file())
        .filter_map(|path| path.file_name()?.to_str().map(str::to_string))
        .collect();
    names.sort();
    Ok(names)
}

/// Indexes declared on one collection.
pub struct IndexManager<V> {
    root: PathBuf,
    locks: LockManager,
    options: SegmentOptions,
    indexes: RwLock<BTreeMap<String, Arc<SecondaryIndex<V>>>>,
}

impl<V: StoredValue> IndexManager<V> {
    /// Creates an empty manager for the collection at `root`.
    ///
    /// `options` is the template handed to every index tree.
    pub fn new(root: PathBuf, locks: LockManager, options: SegmentOptions) -> Self {
        Self {
            root,
            locks,
            options,
            indexes: RwLock::new(BTreeMap::new()),
        }
    }

    /// Declares an index for this session.
    ///
    /// Returns the index and whether it still needs its initial
    /// population. An index folder left by an earlier session is reused.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IndexAlreadyExists`] if `name` is already
    /// declared, or [`CoreError::IndexKeyMismatch`] if the folder on disk
    /// was built with another key kind.
    pub fn create_index(
        &self,
        name: &str,
        extractor: Arc<dyn KeyExtractor<V>>,
    ) -> CoreResult<(Arc<SecondaryIndex<V>>, bool)> {
        let mut indexes = self.indexes.write();
        if indexes.contains_key(name) {
            return Err(CoreError::IndexAlreadyExists {
                name: name.to_string(),
            });
        }
        let (index, needs_population) = SecondaryIndex::open(
            name,
            self.root.join(name),
            extractor,
            self.locks.clone(),
            self.options.clone(),
        )?;
        let index = Arc::new(index);
        indexes.insert(name.to_string(), Arc::clone(&index));
        tracing::info!(index = name, kind = %index.key_kind(), "declared index");
        Ok((index, needs_population))
    }

    /// Removes `name` from this session without touching its files.
    pub fn forget(&self, name: &str) {
        self.indexes.write().remove(name);
    }

    /// The index declared as `name`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IndexNotFound`] if it was not declared.
    pub fn index(&self, name: &str) -> CoreResult<Arc<SecondaryIndex<V>>> {
        self.indexes
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::IndexNotFound {
                name: name.to_string(),
            })
    }

    /// Names declared in this session.
    pub fn names(&self) -> Vec<String> {
        self.indexes.read().keys().cloned().collect()
    }

    /// Metadata of index folders on disk, declared or not.
    ///
    /// # Errors
    ///
    /// Returns an error if a metadata file cannot be read.
    pub fn stored(&self) -> CoreResult<Vec<IndexMeta>> {
        let mut stored = Vec::new();
        for name in list_index_names(&self.root)? {
            let path = self.root.join(&name).join(EXTRACTOR_FILE);
            if let Some(meta) = load_object::<IndexMeta>(&self.locks, &path)? {
                stored.push(meta);
            }
        }
        Ok(stored)
    }

    /// Marks every index folder on disk as needing a rebuild.
    ///
    /// Called after recovery replayed changes that no index saw. Returns
    /// the number of indexes marked.
    ///
    /// # Errors
    ///
    /// Returns an error if a metadata file cannot be rewritten.
    pub fn invalidate_stored(&self) -> CoreResult<usize> {
        let stored = self.stored()?;
        for meta in &stored {
            let stale = IndexMeta {
                populated: false,
                ..meta.clone()
            };
            save_object(&self.locks, &self.root.join(&meta.name).join(EXTRACTOR_FILE), &stale, true)?;
            tracing::info!(index = %meta.name, "index marked for rebuild");
        }
        Ok(stored.len())
    }

    /// Applies the index side of `changes` to every declared index.
    ///
    /// # Errors
    ///
    /// Returns the first index failure.
    pub fn apply_changes(&self, changes: &[IndividualChange<V>]) -> CoreResult<()> {
        let indexes: Vec<Arc<SecondaryIndex<V>>> = self.indexes.read().values().cloned().collect();
        for index in indexes {
            index.apply(changes)?;
        }
        Ok(())
    }

    /// Rolls up a range of the named index.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IndexNotFound`] or the rollup failure.
    pub fn rollup(&self, name: &str, segment_grouping_number: i64, range: Range) -> CoreResult<()> {
        self.index(name)?.rollup(segment_grouping_number, range)
    }
}

impl<V> std::fmt::Debug for IndexManager<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexManager")
            .field("root", &self.root)
            .field("indexes", &self.indexes.read().keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::FnExtractor;
    use crate::key::{Key, KeyKind};
    use tempfile::tempdir;

    fn manager(root: &Path) -> IndexManager<i64> {
        IndexManager::new(root.to_path_buf(), LockManager::new(), SegmentOptions::default())
    }

    fn parity() -> Arc<dyn KeyExtractor<i64>> {
        Arc::new(FnExtractor::new(KeyKind::Integer, |v: &i64| {
            vec![Key::Integer(i32::from(v % 2 == 0))]
        }))
    }

    #[test]
    fn declare_lookup_and_list() {
        let dir = tempdir().unwrap();
        let indexes = manager(dir.path());
        assert!(matches!(indexes.index("parity"), Err(CoreError::IndexNotFound { .. })));

        let (_, needs_population) = indexes.create_index("parity", parity()).unwrap();
        assert!(needs_population);
        assert!(matches!(
            indexes.create_index("parity", parity()),
            Err(CoreError::IndexAlreadyExists { .. })
        ));
        assert_eq!(indexes.names(), vec!["parity".to_string()]);
        assert_eq!(list_index_names(dir.path()).unwrap(), vec!["parity".to_string()]);
        assert_eq!(indexes.stored().unwrap()[0].key_kind, KeyKind::Integer);

        indexes
            .apply_changes(&[
                IndividualChange::insert(Key::Long(1), 1),
                IndividualChange::insert(Key::Long(2), 2),
                IndividualChange::insert(Key::Long(4), 4),
            ])
            .unwrap();
        let even = indexes.index("parity").unwrap().get_keys(&Key::Integer(1)).unwrap();
        assert_eq!(even, vec![Key::Long(2), Key::Long(4)]);

        assert_eq!(indexes.invalidate_stored().unwrap(), 1);
        assert!(!indexes.stored().unwrap()[0].populated);
        let index = indexes.index("parity").unwrap();
        index.clear().unwrap();
        assert!(index.get_keys(&Key::Integer(1)).unwrap().is_empty());
        assert!(index.dir().join(EXTRACTOR_FILE).is_file());
    }

    #[test]
    fn invalid_names_are_rejected() {
        let dir = tempdir().unwrap();
        let indexes = manager(dir.path());
        assert!(matches!(
            indexes.create_index("0_63", parity()),
            Err(CoreError::InvalidArgument { .. })
        ));
        assert!(indexes.names().is_empty());
    }
}
