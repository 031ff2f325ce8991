//! Collection configuration.

use crate::key::KeyKind;
use crate::segment::SegmentSizing;
use std::time::Duration;

/// Configuration for opening a collection.
#[derive(Debug, Clone)]
pub struct CollectionConfig {
    /// Whether to create the collection directory if it doesn't exist.
    pub create_if_missing: bool,

    /// Key variant stored in the collection.
    pub key_kind: KeyKind,

    /// Overrides the default sizing for `key_kind`.
    pub segment_sizing: Option<SegmentSizing>,

    /// Whether chunk and log replacements are fsynced.
    pub sync_writes: bool,

    /// Reports on a rollup target before it is scheduled.
    pub rollup_threshold: u32,

    /// Rollup worker threads (0 = only explicit rollups).
    pub rollup_workers: usize,

    /// Maximum wait for the segment folder lock during a rollup.
    pub rollup_lock_timeout: Option<Duration>,

    /// Maximum wait for a chunk's write lock during a mutation.
    ///
    /// A write to a chunk held by an open iterator fails with
    /// [`CoreError::LockTimeout`](crate::CoreError::LockTimeout) after this
    /// long instead of waiting for the iterator to move on.
    pub write_lock_timeout: Option<Duration>,

    /// Idle time after which range iterators are closed (`None` = never).
    pub iterator_idle_timeout: Option<Duration>,

    /// Completed recovery entries kept as history.
    pub history_retention: usize,

    /// Minimum time between automatic history cleanups.
    pub history_cleanup_interval: Duration,

    /// Entities per batch while populating a new index.
    pub index_population_batch: usize,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            key_kind: KeyKind::Long,
            segment_sizing: None,
            sync_writes: true,
            rollup_threshold: 32,
            rollup_workers: 1,
            rollup_lock_timeout: Some(Duration::from_secs(5)),
            write_lock_timeout: Some(Duration::from_secs(30)),
            iterator_idle_timeout: Some(Duration::from_secs(60)),
            history_retention: 2000,
            history_cleanup_interval: Duration::from_secs(30),
            index_population_batch: 1000,
        }
    }
}

impl CollectionConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the collection if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets the stored key kind.
    #[must_use]
    pub const fn key_kind(mut self, kind: KeyKind) -> Self {
        self.key_kind = kind;
        self
    }

    /// Overrides the segment sizing.
    #[must_use]
    pub fn segment_sizing(mut self, sizing: SegmentSizing) -> Self {
        self.segment_sizing = Some(sizing);
        self
    }

    /// Sets whether writes are fsynced.
    #[must_use]
    pub const fn sync_writes(mut self, value: bool) -> Self {
        self.sync_writes = value;
        self
    }

    /// Sets the rollup threshold.
    #[must_use]
    pub const fn rollup_threshold(mut self, reports: u32) -> Self {
        self.rollup_threshold = reports;
        self
    }

    /// Sets the number of rollup workers.
    #[must_use]
    pub const fn rollup_workers(mut self, workers: usize) -> Self {
        self.rollup_workers = workers;
        self
    }

    /// Sets the rollup lock timeout.
    #[must_use]
    pub const fn rollup_lock_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.rollup_lock_timeout = timeout;
        self
    }

    /// Sets the chunk write lock timeout.
    #[must_use]
    pub const fn write_lock_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.write_lock_timeout = timeout;
        self
    }

    /// Sets the iterator idle timeout.
    #[must_use]
    pub const fn iterator_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.iterator_idle_timeout = timeout;
        self
    }

    /// Sets the number of completed recovery entries kept.
    #[must_use]
    pub const fn history_retention(mut self, entries: usize) -> Self {
        self.history_retention = entries;
        self
    }

    /// Sets the minimum time between automatic history cleanups.
    #[must_use]
    pub const fn history_cleanup_interval(mut self, interval: Duration) -> Self {
        self.history_cleanup_interval = interval;
        self
    }

    /// Sets the index population batch size.
    #[must_use]
    pub const fn index_population_batch(mut self, entities: usize) -> Self {
        self.index_population_batch = entities;
        self
    }

    /// The sizing in effect: the override, or the default for `key_kind`.
    #[must_use]
    pub fn effective_sizing(&self) -> SegmentSizing {
        self.segment_sizing
            .clone()
            .unwrap_or_else(|| SegmentSizing::for_kind(self.key_kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = CollectionConfig::default();
        assert!(config.create_if_missing);
        assert!(config.sync_writes);
        assert_eq!(config.key_kind, KeyKind::Long);
        assert_eq!(config.rollup_threshold, 32);
        assert_eq!(config.index_population_batch, 1000);
        assert_eq!(config.effective_sizing(), SegmentSizing::for_kind(KeyKind::Long));
    }

    #[test]
    fn builder_pattern() {
        let sizing = SegmentSizing::new(vec![1, 10], vec![100, 10]).unwrap();
        let config = CollectionConfig::new()
            .key_kind(KeyKind::Integer)
            .sync_writes(false)
            .rollup_workers(0)
            .iterator_idle_timeout(None)
            .segment_sizing(sizing.clone());

        assert_eq!(config.key_kind, KeyKind::Integer);
        assert!(!config.sync_writes);
        assert_eq!(config.rollup_workers, 0);
        assert!(config.iterator_idle_timeout.is_none());
        assert_eq!(config.effective_sizing(), sizing);
    }
}
