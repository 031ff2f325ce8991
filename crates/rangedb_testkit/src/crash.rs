//! Crash recovery testing for rangedb.
//!
//! A crash is simulated by closing a collection and leaving its directory
//! in the state the process would have left at a given point, then
//! reopening it. Opening must replay pending changes and discard
//! unfinished chunk files.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use rangedb_testkit::crash::{CrashPoint, CrashRecoveryHarness};
//!
//! let result = CrashRecoveryHarness::new().simulate(CrashPoint::AfterLogBeforeApply);
//! assert!(result.passed, "{:?}", result.error);
//! ```

use crate::fixtures::{scenarios, TempCollection, TestValue};
use rangedb_core::recovery::{list_history, RECOVERY_DIR};
use rangedb_core::{
    sort_changes, CoreResult, IndividualChange, Key, Range, Recoverable, RecoveryManager,
    StoredValue,
};
use rangedb_storage::{fs, LockManager};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Keys present before every simulated crash.
pub const BASE_ENTITIES: i64 = 10;

/// Points at which a crash can be simulated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrashPoint {
    /// The change was logged but never applied.
    AfterLogBeforeApply,
    /// The change was applied but its log entry never completed.
    AfterApplyBeforeComplete,
    /// A chunk's replacement was written but not renamed into place.
    DuringChunkReplace,
    /// A rolled-up chunk was written but not renamed into place.
    DuringRollup,
}

impl CrashPoint {
    /// Every crash point.
    pub const ALL: [CrashPoint; 4] = [
        CrashPoint::AfterLogBeforeApply,
        CrashPoint::AfterApplyBeforeComplete,
        CrashPoint::DuringChunkReplace,
        CrashPoint::DuringRollup,
    ];
}

/// Result of a crash recovery test.
#[derive(Debug, Clone)]
pub struct CrashRecoveryResult {
    /// Whether the test passed.
    pub passed: bool,
    /// What was tested.
    pub point: CrashPoint,
    /// Expected entities after recovery.
    pub expected_entities: usize,
    /// Actual entities after recovery.
    pub actual_entities: usize,
    /// Any error message.
    pub error: Option<String>,
}

impl CrashRecoveryResult {
    fn pass(point: CrashPoint, entities: usize) -> Self {
        Self {
            passed: true,
            point,
            expected_entities: entities,
            actual_entities: entities,
            error: None,
        }
    }

    fn fail(point: CrashPoint, expected: usize, actual: usize, error: impl Into<String>) -> Self {
        Self {
            passed: false,
            point,
            expected_entities: expected,
            actual_entities: actual,
            error: Some(error.into()),
        }
    }
}

/// Writes a pending recovery entry for `changes` into a closed collection.
///
/// The collection replays it the next time it is opened.
///
/// # Errors
///
/// Returns an error if the entry cannot be written.
pub fn write_pending_entry<V: StoredValue>(
    collection_root: &Path,
    mut changes: Vec<IndividualChange<V>>,
) -> CoreResult<()> {
    let recovery =
        RecoveryManager::<V>::open(collection_root, LockManager::new(), false, usize::MAX, Duration::MAX)?;
    sort_changes(&mut changes);
    let mut recoverable = Recoverable::new(changes);
    recovery.save_change(&mut recoverable)
}

/// Leaves an unfinished replacement of `chunk` behind, as a crash between
/// writing and renaming would.
pub fn leave_temp_file(chunk: &Path) -> std::io::Result<PathBuf> {
    let temp = fs::temp_path_for(chunk);
    if let Some(parent) = temp.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&temp, b"\x00\x00\x00\x05half")?;
    Ok(temp)
}

/// Temp files anywhere under `root`.
pub fn temp_files(root: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let mut dirs = vec![root.to_path_buf()];
    while let Some(dir) = dirs.pop() {
        for path in fs::list_dir(&dir).unwrap_or_default() {
            if fs::is_temp_file(&path) {
                found.push(path);
            } else if path.is_dir() {
                dirs.push(path);
            }
        }
    }
    found
}

/// Runs crash simulations against a populated collection.
pub struct CrashRecoveryHarness {
    fixture: TempCollection<TestValue>,
    expected: BTreeMap<i64, TestValue>,
}

impl CrashRecoveryHarness {
    /// A harness over keys `0..BASE_ENTITIES`.
    pub fn new() -> Self {
        Self {
            fixture: scenarios::populated_collection(BASE_ENTITIES),
            expected: (0..BASE_ENTITIES)
                .map(|i| (i, TestValue::new("item", i)))
                .collect(),
        }
    }

    /// The collection under test.
    pub fn collection(&self) -> &TempCollection<TestValue> {
        &self.fixture
    }

    /// Simulates a crash at `point`, reopens and checks the contents.
    pub fn simulate(mut self, point: CrashPoint) -> CrashRecoveryResult {
        let changed = TestValue::new("crashed", 3);
        let added = TestValue::new("added", 50);
        let changes = vec![
            IndividualChange::update(Key::Long(3), TestValue::new("item", 3), changed.clone()),
            IndividualChange::insert(Key::Long(50), added.clone()),
        ];
        let paths = self.fixture.segment_manager().path_manager().clone();

        let setup: Result<(), String> = match point {
            CrashPoint::AfterLogBeforeApply => {
                self.expect_changes(changed, added);
                self.crash_with(|root| write_pending_entry(root, changes).map_err(|e| e.to_string()))
            }
            CrashPoint::AfterApplyBeforeComplete => {
                self.expect_changes(changed.clone(), added.clone());
                match self
                    .fixture
                    .batch_upsert([(Key::Long(3), changed), (Key::Long(50), added)])
                {
                    Ok(()) => self.crash_with(|root| {
                        write_pending_entry(root, changes).map_err(|e| e.to_string())
                    }),
                    Err(e) => Err(e.to_string()),
                }
            }
            CrashPoint::DuringChunkReplace => {
                let chunk = paths.chunk_path(3, 1);
                self.crash_with(|_| leave_temp_file(&chunk).map(drop).map_err(|e| e.to_string()))
            }
            CrashPoint::DuringRollup => {
                let level = paths.rollup_levels().get(1).copied().unwrap_or(1);
                let chunk = paths.chunk_path(0, level);
                self.crash_with(|_| leave_temp_file(&chunk).map(drop).map_err(|e| e.to_string()))
            }
        };

        let expected = self.expected.len();
        if let Err(e) = setup {
            return CrashRecoveryResult::fail(point, expected, 0, e);
        }
        self.check(point)
    }

    /// Runs every crash point, each against a fresh collection.
    pub fn run_all() -> Vec<CrashRecoveryResult> {
        CrashPoint::ALL
            .iter()
            .map(|&point| Self::new().simulate(point))
            .collect()
    }

    fn expect_changes(&mut self, changed: TestValue, added: TestValue) {
        self.expected.insert(3, changed);
        self.expected.insert(50, added);
    }

    fn crash_with(&mut self, f: impl FnOnce(&Path) -> Result<(), String>) -> Result<(), String> {
        let mut outcome = Ok(());
        self.fixture.reopen_after(|root| outcome = f(root));
        outcome
    }

    fn check(&self, point: CrashPoint) -> CrashRecoveryResult {
        let expected = self.expected.len();
        let everything = Range::max_range();
        let stored = match self.fixture.get_range(everything.start(), everything.end()) {
            Ok(stored) => stored,
            Err(e) => return CrashRecoveryResult::fail(point, expected, 0, e.to_string()),
        };
        let actual = stored.len();
        let stored: BTreeMap<Key, TestValue> =
            stored.into_iter().map(|e| e.into_parts()).collect();
        let wanted: BTreeMap<Key, TestValue> = self
            .expected
            .iter()
            .map(|(k, v)| (Key::Long(*k), v.clone()))
            .collect();
        if stored != wanted {
            return CrashRecoveryResult::fail(point, expected, actual, "contents differ after reopen");
        }

        let leftovers = temp_files(self.fixture.path());
        if !leftovers.is_empty() {
            return CrashRecoveryResult::fail(
                point,
                expected,
                actual,
                format!("temp files survived reopen: {leftovers:?}"),
            );
        }
        match list_history(&self.fixture.path().join(RECOVERY_DIR)) {
            Ok(history) if history.iter().all(|entry| entry.complete) => {
                CrashRecoveryResult::pass(point, actual)
            }
            Ok(_) => CrashRecoveryResult::fail(point, expected, actual, "pending entries remain"),
            Err(e) => CrashRecoveryResult::fail(point, expected, actual, e.to_string()),
        }
    }
}

impl Default for CrashRecoveryHarness {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logged_change_is_replayed() {
        let result = CrashRecoveryHarness::new().simulate(CrashPoint::AfterLogBeforeApply);
        assert!(result.passed, "{:?}", result.error);
        assert_eq!(result.actual_entities, 11);
    }

    #[test]
    fn replaying_an_applied_change_is_harmless() {
        let result = CrashRecoveryHarness::new().simulate(CrashPoint::AfterApplyBeforeComplete);
        assert!(result.passed, "{:?}", result.error);
    }

    #[test]
    fn unfinished_chunk_files_are_discarded() {
        for point in [CrashPoint::DuringChunkReplace, CrashPoint::DuringRollup] {
            let result = CrashRecoveryHarness::new().simulate(point);
            assert!(result.passed, "{point:?}: {:?}", result.error);
            assert_eq!(result.actual_entities, BASE_ENTITIES as usize);
        }
    }

    #[test]
    fn every_point_recovers() {
        assert!(CrashRecoveryHarness::run_all().iter().all(|r| r.passed));
    }

    #[test]
    fn temp_files_are_found_recursively() {
        let dir = tempfile::tempdir().unwrap();
        let chunk = dir.path().join("0_99").join("3_3");
        let temp = leave_temp_file(&chunk).unwrap();
        assert_eq!(temp_files(dir.path()), [temp]);
    }
}
