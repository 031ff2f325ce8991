//! Segment lookup for one segment tree.

use super::path::SegmentPathManager;
use super::segment::Segment;
use crate::error::CoreResult;
use crate::key::Key;
use crate::rollup::{ActivityListener, RollupOwner};
use rangedb_storage::LockManager;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Behaviour shared by every segment of one tree.
#[derive(Clone)]
pub struct SegmentOptions {
    sync: bool,
    spans_ranges: bool,
    owner: RollupOwner,
    listener: Option<Arc<dyn ActivityListener>>,
    rollup_lock_timeout: Option<Duration>,
    write_lock_timeout: Option<Duration>,
}

impl Default for SegmentOptions {
    fn default() -> Self {
        Self {
            sync: false,
            spans_ranges: false,
            owner: RollupOwner::Collection,
            listener: None,
            rollup_lock_timeout: None,
            write_lock_timeout: None,
        }
    }
}

impl SegmentOptions {
    /// Whether chunk replacements are fsynced.
    #[must_use]
    pub fn sync(mut self, value: bool) -> Self {
        self.sync = value;
        self
    }

    /// Whether stored keys may span several grouping numbers.
    #[must_use]
    pub fn spans_ranges(mut self, value: bool) -> Self {
        self.spans_ranges = value;
        self
    }

    /// Owner recorded in rollup targets.
    #[must_use]
    pub fn owner(mut self, owner: RollupOwner) -> Self {
        self.owner = owner;
        self
    }

    /// Receiver of read/write activity.
    #[must_use]
    pub fn listener(mut self, listener: Arc<dyn ActivityListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Upper bound on the wait for the segment folder lock during a rollup.
    #[must_use]
    pub fn rollup_lock_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.rollup_lock_timeout = timeout;
        self
    }

    /// Upper bound on the wait for a chunk's write lock when replacing it.
    ///
    /// `None` waits indefinitely.
    #[must_use]
    pub fn write_lock_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.write_lock_timeout = timeout;
        self
    }
}

pub(crate) struct SegmentContext {
    pub(crate) paths: SegmentPathManager,
    pub(crate) locks: LockManager,
    pub(crate) sync: bool,
    pub(crate) spans_ranges: bool,
    pub(crate) owner: RollupOwner,
    pub(crate) listener: Option<Arc<dyn ActivityListener>>,
    pub(crate) rollup_lock_timeout: Option<Duration>,
    pub(crate) write_lock_timeout: Option<Duration>,
}

/// Maps grouping numbers to [`Segment`]s of one tree.
///
/// Segments are cheap handles; their folders are created by the first
/// write that lands in them.
#[derive(Clone)]
pub struct SegmentManager {
    ctx: Arc<SegmentContext>,
}

impl SegmentManager {
    /// Creates a manager for the tree described by `paths`.
    pub fn new(paths: SegmentPathManager, locks: LockManager, options: SegmentOptions) -> Self {
        Self {
            ctx: Arc::new(SegmentContext {
                paths,
                locks,
                sync: options.sync,
                spans_ranges: options.spans_ranges,
                owner: options.owner,
                listener: options.listener,
                rollup_lock_timeout: options.rollup_lock_timeout,
                write_lock_timeout: options.write_lock_timeout,
            }),
        }
    }

    /// The segment holding `grouping_number`.
    #[must_use]
    pub fn segment_for(&self, grouping_number: i64) -> Segment {
        Segment::new(
            self.ctx.paths.segment_path(grouping_number),
            self.ctx.paths.segment_range(grouping_number),
            Arc::clone(&self.ctx),
        )
    }

    /// The segment where `key` starts.
    #[must_use]
    pub fn first_segment(&self, key: &Key) -> Segment {
        self.segment_for(key.grouping_number())
    }

    /// The segment that follows `segment`, if any.
    #[must_use]
    pub fn segment_after(&self, segment: &Segment) -> Option<Segment> {
        segment
            .range()
            .end()
            .checked_add(1)
            .map(|next| self.segment_for(next))
    }

    /// Segments with a folder on disk overlapping `[min, max]`, in order.
    ///
    /// # Errors
    ///
    /// Returns an error if a folder cannot be listed.
    pub fn existing_segments(&self, min: i64, max: i64) -> CoreResult<Vec<Segment>> {
        Ok(self
            .ctx
            .paths
            .existing_segments(min, max)?
            .into_iter()
            .map(|(range, path)| Segment::new(path, range, Arc::clone(&self.ctx)))
            .collect())
    }

    /// Rolls up `range` in the segment holding `segment_grouping_number`.
    ///
    /// # Errors
    ///
    /// See [`Segment::rollup`].
    pub fn rollup(&self, segment_grouping_number: i64, range: crate::range::Range) -> CoreResult<()> {
        self.segment_for(segment_grouping_number).rollup(range)
    }

    /// Looks up `key` in the segment where it starts.
    ///
    /// # Errors
    ///
    /// Returns an error if the chunk cannot be read.
    pub fn get<V: crate::entity::StoredValue>(&self, key: &Key) -> CoreResult<Option<V>> {
        self.first_segment(key).get(key)
    }

    /// The path manager.
    #[must_use]
    pub fn path_manager(&self) -> &SegmentPathManager {
        &self.ctx.paths
    }

    /// The lock registry shared by this tree.
    #[must_use]
    pub fn lock_manager(&self) -> &LockManager {
        &self.ctx.locks
    }

    /// Root folder of the tree.
    #[must_use]
    pub fn root(&self) -> &Path {
        self.ctx.paths.root()
    }

    /// True if stored keys may span several grouping numbers.
    #[must_use]
    pub fn spans_ranges(&self) -> bool {
        self.ctx.spans_ranges
    }
}

impl fmt::Debug for SegmentManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SegmentManager")
            .field("root", &self.ctx.paths.root())
            .field("owner", &self.ctx.owner)
            .finish_non_exhaustive()
    }
}
