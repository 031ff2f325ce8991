//! Lock leak assertions.

use rangedb_storage::LockManager;

/// Panics if any path is still locked in `locks`.
///
/// Call it after closing iterators and finishing writes; a held path at
/// that point means a guard leaked.
#[track_caller]
pub fn assert_no_locks_held(locks: &LockManager) {
    let held = locks.held_paths();
    assert!(held.is_empty(), "locks still held on {held:?}");
}
