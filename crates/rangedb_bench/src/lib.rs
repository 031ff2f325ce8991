//! Benchmark utilities.

#![warn(missing_docs)]

use rand::Rng;
use rangedb_core::{Collection, CollectionConfig, Key};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tempfile::TempDir;

/// A sensor reading, the value type used by the collection benchmarks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Sensor name.
    pub sensor: String,
    /// Measured value.
    pub value: f64,
    /// Free-form payload.
    pub note: String,
}

/// Generate a reading with a random value and a note of `note_len` characters.
pub fn random_reading(note_len: usize) -> Reading {
    let mut rng = rand::thread_rng();
    Reading {
        sensor: format!("sensor-{}", rng.gen_range(0..16)),
        value: rng.gen(),
        note: (0..note_len)
            .map(|_| char::from(rng.gen_range(b'a'..=b'z')))
            .collect(),
    }
}

/// Generate `count` entities with consecutive long keys starting at `first`.
pub fn generate_entities(first: i64, count: usize, note_len: usize) -> Vec<(Key, Reading)> {
    (0..count as i64)
        .map(|i| (Key::Long(first + i), random_reading(note_len)))
        .collect()
}

/// Configuration used by benchmarks: no fsync and no background rollups,
/// so timings measure the write path itself.
pub fn bench_config() -> CollectionConfig {
    CollectionConfig::default()
        .sync_writes(false)
        .rollup_workers(0)
        .iterator_idle_timeout(None)
}

/// Opens an empty collection in a fresh temporary directory.
///
/// The directory must outlive the collection.
pub fn temp_collection() -> (TempDir, Arc<Collection<Reading>>) {
    let dir = TempDir::new().expect("Failed to create temp directory");
    let collection =
        Collection::open(dir.path().join("bench"), bench_config()).expect("Failed to open collection");
    (dir, collection)
}
