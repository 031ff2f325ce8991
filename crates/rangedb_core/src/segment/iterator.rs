//! Lazy iteration over one segment's chunk files.

use super::segment::Segment;
use crate::entity::{Entity, StoredValue};
use crate::error::CoreResult;
use crate::key::Key;
use crate::object::ObjectInput;
use crate::range::Range;
use std::path::Path;

/// Streams entities overlapping `[min, max]` from one segment, in key order.
///
/// Chunk files are discovered one at a time: after finishing a chunk the
/// iterator lists the folder again and opens the next chunk that ends
/// past the last one it read. A rollup that merges chunks mid-iteration
/// is therefore picked up, and keys already returned are skipped. A chunk
/// deleted between listing and opening reads as empty.
///
/// Only the chunk currently being read is locked.
pub struct SegmentEntityIterator<V> {
    segment: Segment,
    min: i64,
    max: i64,
    highest_completed: Option<i64>,
    window: Option<Range>,
    consumed_end: Option<i64>,
    last_key: Option<Key>,
    current: Option<(Range, ObjectInput<Entity<V>>)>,
    finished: bool,
}

impl<V: StoredValue> SegmentEntityIterator<V> {
    pub(crate) fn new(segment: Segment, min: i64, max: i64, highest_completed: Option<i64>) -> Self {
        let scan_start = if segment.spans_ranges() {
            segment.range().start()
        } else {
            min.max(segment.range().start())
        };
        let scan_end = max.min(segment.range().end());
        let window = (scan_start <= scan_end).then(|| Range::new(scan_start, scan_end));
        Self {
            segment,
            min,
            max,
            highest_completed,
            window,
            consumed_end: None,
            last_key: None,
            current: None,
            finished: window.is_none(),
        }
    }

    /// Returns the next matching entity.
    ///
    /// # Errors
    ///
    /// Returns an error if a chunk file cannot be listed or read.
    pub fn next_entity(&mut self) -> CoreResult<Option<Entity<V>>> {
        loop {
            if self.finished {
                return Ok(None);
            }
            let Some((range, input)) = self.current.as_mut() else {
                self.open_next_chunk()?;
                continue;
            };
            let range = *range;
            match input.next_object()? {
                Some(entity) => {
                    if self.accepts(&entity) {
                        self.last_key = Some(entity.key().clone());
                        return Ok(Some(entity));
                    }
                    if entity.key().grouping_number() > self.max && !self.segment.spans_ranges() {
                        self.finished = true;
                        self.current = None;
                    }
                }
                None => {
                    self.consumed_end = Some(range.end());
                    self.current = None;
                    if range.end() >= self.window.map_or(i64::MIN, |w| w.end()) {
                        self.finished = true;
                    }
                }
            }
        }
    }

    /// Releases the current chunk's lock and stops the iteration.
    pub fn close(&mut self) {
        self.current = None;
        self.finished = true;
    }

    /// Path of the chunk being read, if any.
    pub fn current_path(&self) -> Option<&Path> {
        self.current.as_ref().map(|(_, input)| input.path())
    }

    /// The segment being iterated.
    pub fn segment(&self) -> &Segment {
        &self.segment
    }

    fn accepts(&self, entity: &Entity<V>) -> bool {
        let key = entity.key();
        if self.last_key.as_ref().is_some_and(|last| key <= last) {
            return false;
        }
        if !key.overlaps(self.min, self.max) {
            return false;
        }
        self.highest_completed
            .map_or(true, |highest| key.grouping_number() > highest)
    }

    fn open_next_chunk(&mut self) -> CoreResult<()> {
        let Some(window) = self.window else {
            self.finished = true;
            return Ok(());
        };
        let next = self
            .segment
            .chunk_files()?
            .into_iter()
            .find(|(range, _)| {
                range.overlaps(&window) && self.consumed_end.map_or(true, |end| range.end() > end)
            });
        match next {
            Some((range, path)) => {
                let input = ObjectInput::open(self.segment.acquire_chunk_read_lock(&path))?;
                self.segment.report_read(range.start());
                self.current = Some((range, input));
            }
            None => self.finished = true,
        }
        Ok(())
    }
}

impl<V: StoredValue> Iterator for SegmentEntityIterator<V> {
    type Item = CoreResult<Entity<V>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_entity().transpose()
    }
}

impl<V> std::fmt::Debug for SegmentEntityIterator<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentEntityIterator")
            .field("segment", &self.segment)
            .field("min", &self.min)
            .field("max", &self.max)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}
