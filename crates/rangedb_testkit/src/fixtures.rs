//! Test fixtures and collection helpers.
//!
//! Provides a serde value type and temporary collections that can be
//! closed and reopened in place.

use rangedb_core::{Collection, CollectionConfig, KeyKind, SegmentSizing, StoredValue};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// Value stored by most tests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestValue {
    /// Free-form name, also used by index tests.
    pub name: String,
    /// Numeric payload.
    pub count: i64,
    /// Labels.
    pub tags: Vec<String>,
}

impl TestValue {
    /// Creates a value without tags.
    pub fn new(name: impl Into<String>, count: i64) -> Self {
        Self {
            name: name.into(),
            count,
            tags: Vec::new(),
        }
    }

    /// Adds a tag.
    #[must_use]
    pub fn tagged(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }
}

/// Small sizing so that a few dozen keys span several chunks and segments.
///
/// Chunks hold 1, 10 or 100 grouping numbers; segments hold 100.
pub fn small_sizing() -> SegmentSizing {
    SegmentSizing::new(vec![1, 10, 100], vec![1000, 100]).expect("small sizing is valid")
}

/// Configuration for deterministic tests: no fsync, no background threads.
pub fn test_config(kind: KeyKind) -> CollectionConfig {
    let config = CollectionConfig::default()
        .key_kind(kind)
        .sync_writes(false)
        .rollup_workers(0)
        .iterator_idle_timeout(None);
    match kind {
        KeyKind::Long | KeyKind::Integer | KeyKind::Time => config.segment_sizing(small_sizing()),
        _ => config,
    }
}

/// A collection in a temporary directory.
///
/// The directory is removed when the fixture is dropped.
pub struct TempCollection<V: StoredValue> {
    collection: Option<Arc<Collection<V>>>,
    config: CollectionConfig,
    path: PathBuf,
    _temp_dir: TempDir,
}

impl<V: StoredValue> TempCollection<V> {
    /// Opens a fresh collection of long keys with [`test_config`].
    pub fn new() -> Self {
        Self::with_config(test_config(KeyKind::Long))
    }

    /// Opens a fresh collection with `config`.
    pub fn with_config(config: CollectionConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("collection");
        let collection =
            Collection::open(&path, config.clone()).expect("Failed to open collection");
        Self {
            collection: Some(collection),
            config,
            path,
            _temp_dir: temp_dir,
        }
    }

    /// The collection directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A shared handle to the open collection.
    pub fn handle(&self) -> Arc<Collection<V>> {
        Arc::clone(self.collection())
    }

    /// Closes the collection, runs `f` on the closed directory, then opens
    /// it again. Useful to tamper with files between sessions.
    ///
    /// Every handle obtained through [`handle`](Self::handle) must be
    /// dropped first, otherwise the directory is still locked.
    pub fn reopen_after(&mut self, f: impl FnOnce(&Path)) {
        self.collection = None;
        f(&self.path);
        self.collection =
            Some(Collection::open(&self.path, self.config.clone()).expect("Failed to reopen collection"));
    }

    /// Closes and reopens the collection.
    pub fn reopen(&mut self) {
        self.reopen_after(|_| {});
    }

    fn collection(&self) -> &Arc<Collection<V>> {
        self.collection
            .as_ref()
            .expect("collection is open outside reopen_after")
    }
}

impl<V: StoredValue> Default for TempCollection<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: StoredValue> std::ops::Deref for TempCollection<V> {
    type Target = Collection<V>;

    fn deref(&self) -> &Self::Target {
        self.collection()
    }
}

/// Runs a test with a temporary collection of [`TestValue`]s.
///
/// # Example
///
/// ```rust,no_run
/// use rangedb_core::Key;
/// use rangedb_testkit::{with_temp_collection, TestValue};
///
/// with_temp_collection(|c| {
///     c.insert(Key::Long(1), TestValue::new("Anna", 1)).unwrap();
/// });
/// ```
pub fn with_temp_collection<F, R>(f: F) -> R
where
    F: FnOnce(&Collection<TestValue>) -> R,
{
    let fixture = TempCollection::<TestValue>::new();
    f(&fixture)
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;
    use rangedb_core::Key;

    /// A collection holding keys `0..count`, each with value `TestValue::new("item", key)`.
    pub fn populated_collection(count: i64) -> TempCollection<TestValue> {
        let fixture = TempCollection::new();
        fixture
            .batch_upsert((0..count).map(|i| (Key::Long(i), TestValue::new("item", i))))
            .expect("Failed to populate collection");
        fixture
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rangedb_core::Key;

    #[test]
    fn values_survive_reopen() {
        let mut c = TempCollection::<TestValue>::new();
        c.insert(Key::Long(7), TestValue::new("seven", 7).tagged("odd"))
            .unwrap();
        c.reopen();
        let value = c.get(&Key::Long(7)).unwrap().unwrap();
        assert_eq!(value.tags, ["odd"]);
    }

    #[test]
    fn populated_scenario_spans_segments() {
        let c = scenarios::populated_collection(250);
        assert_eq!(c.get_range(0, 249).unwrap().len(), 250);
        assert_eq!(c.segment_manager().existing_segments(0, 249).unwrap().len(), 3);
    }

    #[test]
    fn tampering_between_sessions_is_visible() {
        let mut c = TempCollection::<TestValue>::new();
        c.insert(Key::Long(1), TestValue::new("one", 1)).unwrap();
        let mut saw_metadata = false;
        c.reopen_after(|path| saw_metadata = path.join("METADATA").is_file());
        assert!(saw_metadata);
        assert!(c.contains(&Key::Long(1)).unwrap());
    }
}
