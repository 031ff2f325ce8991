//! Per-path reader/writer locks.
//!
//! Every file the engine touches is guarded by a lock keyed by its path.
//! Any number of readers may hold a path at once; a writer excludes
//! everyone else. Entries are reference counted and evicted as soon as the
//! last holder lets go, so the registry only ever contains paths that are
//! currently in use.
//!
//! The registry is an explicit value: construct one [`LockManager`] per
//! process (or per collection) and hand out clones, which share state.

use crate::error::{StorageError, StorageResult};
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Default, Clone, Copy)]
struct LockState {
    readers: usize,
    writer: bool,
}

impl LockState {
    fn is_free(self) -> bool {
        self.readers == 0 && !self.writer
    }
}

#[derive(Debug, Default)]
struct Registry {
    locks: Mutex<HashMap<PathBuf, LockState>>,
    released: Condvar,
}

impl Registry {
    fn release_read(&self, path: &Path) {
        let mut locks = self.locks.lock();
        if let Some(state) = locks.get_mut(path) {
            state.readers = state.readers.saturating_sub(1);
            if state.is_free() {
                locks.remove(path);
            }
        }
        drop(locks);
        self.released.notify_all();
    }

    fn release_write(&self, path: &Path) {
        let mut locks = self.locks.lock();
        if let Some(state) = locks.get_mut(path) {
            state.writer = false;
            if state.is_free() {
                locks.remove(path);
            }
        }
        drop(locks);
        self.released.notify_all();
    }
}

/// Registry of path-scoped reader/writer locks.
///
/// Cloning a `LockManager` is cheap and yields a handle to the same registry.
///
/// # Example
///
/// ```rust
/// use rangedb_storage::LockManager;
/// use std::path::Path;
///
/// let locks = LockManager::new();
/// let path = Path::new("segment/0_0");
/// {
///     let _a = locks.acquire_read_lock(path);
///     let _b = locks.acquire_read_lock(path);
///     assert!(locks.is_locked(path));
/// }
/// assert!(!locks.is_locked(path));
/// ```
#[derive(Clone, Default)]
pub struct LockManager {
    registry: Arc<Registry>,
}

impl LockManager {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires a shared lock, blocking while a writer holds `path`.
    pub fn acquire_read_lock(&self, path: &Path) -> ReadLock {
        let mut locks = self.registry.locks.lock();
        loop {
            let state = locks.entry(path.to_path_buf()).or_default();
            if !state.writer {
                state.readers += 1;
                break;
            }
            self.registry.released.wait(&mut locks);
        }
        ReadLock {
            registry: Arc::clone(&self.registry),
            path: path.to_path_buf(),
        }
    }

    /// Acquires an exclusive lock, blocking while anyone else holds `path`.
    pub fn acquire_write_lock(&self, path: &Path) -> WriteLock {
        let mut locks = self.registry.locks.lock();
        while locks.get(path).is_some_and(|state| !state.is_free()) {
            self.registry.released.wait(&mut locks);
        }
        locks.insert(
            path.to_path_buf(),
            LockState {
                readers: 0,
                writer: true,
            },
        );
        WriteLock {
            registry: Arc::clone(&self.registry),
            path: path.to_path_buf(),
        }
    }

    /// Acquires an exclusive lock, giving up after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::LockTimeout`] if the path stayed busy.
    pub fn try_acquire_write_lock(&self, path: &Path, timeout: Duration) -> StorageResult<WriteLock> {
        let started = Instant::now();
        let deadline = started + timeout;
        let mut locks = self.registry.locks.lock();
        while locks.get(path).is_some_and(|state| !state.is_free()) {
            if self.registry.released.wait_until(&mut locks, deadline).timed_out()
                && locks.get(path).is_some_and(|state| !state.is_free())
            {
                return Err(StorageError::LockTimeout {
                    path: path.to_path_buf(),
                    waited: started.elapsed(),
                });
            }
        }
        locks.insert(
            path.to_path_buf(),
            LockState {
                readers: 0,
                writer: true,
            },
        );
        Ok(WriteLock {
            registry: Arc::clone(&self.registry),
            path: path.to_path_buf(),
        })
    }

    /// Returns true if any reader or writer currently holds `path`.
    #[must_use]
    pub fn is_locked(&self, path: &Path) -> bool {
        self.registry.locks.lock().contains_key(path)
    }

    /// Returns every path that currently has a holder, sorted.
    ///
    /// Intended for lock-leak assertions in tests and diagnostics.
    #[must_use]
    pub fn held_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.registry.locks.lock().keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Returns true if no path is locked.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.registry.locks.lock().is_empty()
    }
}

impl fmt::Debug for LockManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockManager")
            .field("held", &self.registry.locks.lock().len())
            .finish()
    }
}

/// Shared lock on a path, released on drop.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct ReadLock {
    registry: Arc<Registry>,
    path: PathBuf,
}

impl ReadLock {
    /// The locked path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Releases the lock now.
    pub fn release(self) {}
}

impl Drop for ReadLock {
    fn drop(&mut self) {
        self.registry.release_read(&self.path);
    }
}

impl fmt::Debug for ReadLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ReadLock").field(&self.path).finish()
    }
}

/// Exclusive lock on a path, released on drop.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct WriteLock {
    registry: Arc<Registry>,
    path: PathBuf,
}

impl WriteLock {
    /// The locked path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Releases the lock now.
    pub fn release(self) {}
}

impl Drop for WriteLock {
    fn drop(&mut self) {
        self.registry.release_write(&self.path);
    }
}

impl fmt::Debug for WriteLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("WriteLock").field(&self.path).finish()
    }
}
