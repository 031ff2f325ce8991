//! Range iteration across segments.

use super::watchdog::Expirable;
use crate::entity::{Entity, StoredValue};
use crate::error::{CoreError, CoreResult};
use crate::segment::{Segment, SegmentEntityIterator, SegmentManager};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Open,
    Closed,
    TimedOut,
}

struct State<V> {
    segments: SegmentManager,
    min: i64,
    max: i64,
    queue: Option<VecDeque<Segment>>,
    current: Option<SegmentEntityIterator<V>>,
    highest_completed: Option<i64>,
    status: Status,
    last_access: Instant,
}

impl<V: StoredValue> State<V> {
    fn next_entity(&mut self) -> CoreResult<Option<Entity<V>>> {
        self.last_access = Instant::now();
        match self.status {
            Status::Open => {}
            Status::Closed => return Ok(None),
            Status::TimedOut => {
                return Err(CoreError::closed("iterator was idle too long and has been closed"))
            }
        }
        loop {
            if let Some(current) = self.current.as_mut() {
                if let Some(entity) = current.next_entity()? {
                    return Ok(Some(entity));
                }
                let end = current.segment().range().end();
                self.current = None;
                self.highest_completed = Some(end);
            }
            if self.queue.is_none() {
                self.queue = Some(self.segments.existing_segments(self.min, self.max)?.into());
            }
            match self.queue.as_mut().and_then(VecDeque::pop_front) {
                Some(segment) => {
                    self.current = Some(segment.iter(self.min, self.max, self.highest_completed));
                }
                None => {
                    self.close(Status::Closed);
                    return Ok(None);
                }
            }
        }
    }

    fn close(&mut self, status: Status) {
        self.current = None;
        self.queue = Some(VecDeque::new());
        if self.status == Status::Open {
            self.status = status;
        }
    }
}

pub(crate) struct Shared<V> {
    state: Mutex<State<V>>,
}

impl<V: StoredValue> Expirable for Shared<V> {
    fn expire_if_idle(&self, timeout: Duration) -> bool {
        // A locked state is in use and therefore not idle.
        let Some(mut state) = self.state.try_lock() else {
            return false;
        };
        if state.status != Status::Open {
            return true;
        }
        if state.last_access.elapsed() < timeout {
            return false;
        }
        tracing::debug!(min = state.min, max = state.max, "closing idle iterator");
        state.close(Status::TimedOut);
        true
    }
}

/// Iterates a collection's entities overlapping `[min, max]` in key order.
///
/// Segments and chunk files are opened one at a time and only the chunk
/// being read is locked. Dropping or [closing](Self::close) the iterator
/// releases that lock.
///
/// If the collection was opened with an idle timeout, an iterator left
/// untouched for longer is closed in the background; every later call then
/// returns [`CoreError::ClosedResource`].
///
/// The iterator holds a read lock on its current chunk. A write to that
/// chunk waits for the iterator to move on, and fails with
/// [`CoreError::LockTimeout`] after the collection's write lock timeout. A
/// rollup of that chunk is deferred until the lock is released.
pub struct CollectionEntityIterator<V> {
    shared: Arc<Shared<V>>,
}

impl<V: StoredValue> CollectionEntityIterator<V> {
    pub(crate) fn new(segments: SegmentManager, min: i64, max: i64) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    segments,
                    min,
                    max,
                    queue: None,
                    current: None,
                    highest_completed: None,
                    status: if min <= max { Status::Open } else { Status::Closed },
                    last_access: Instant::now(),
                }),
            }),
        }
    }

    pub(crate) fn expirable(&self) -> Arc<dyn Expirable> {
        let shared: Arc<Shared<V>> = Arc::clone(&self.shared);
        shared
    }

    /// Returns the next entity.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ClosedResource`] after an idle timeout, or an
    /// error if a chunk cannot be read.
    pub fn next_entity(&mut self) -> CoreResult<Option<Entity<V>>> {
        self.shared.state.lock().next_entity()
    }

    /// Returns up to `n` entities; fewer only at the end.
    ///
    /// # Errors
    ///
    /// See [`next_entity`](Self::next_entity).
    pub fn next_batch(&mut self, n: usize) -> CoreResult<Vec<Entity<V>>> {
        let mut state = self.shared.state.lock();
        let mut batch = Vec::with_capacity(n.min(1024));
        while batch.len() < n {
            match state.next_entity()? {
                Some(entity) => batch.push(entity),
                None => break,
            }
        }
        Ok(batch)
    }

    /// Releases the iterator's locks; later calls return `None`.
    pub fn close(&mut self) {
        self.shared.state.lock().close(Status::Closed);
    }

    /// True once closed explicitly, exhausted or timed out.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().status != Status::Open
    }
}

impl<V: StoredValue> Iterator for CollectionEntityIterator<V> {
    type Item = CoreResult<Entity<V>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_entity().transpose()
    }
}

impl<V> std::fmt::Debug for CollectionEntityIterator<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionEntityIterator").finish_non_exhaustive()
    }
}
