//! Routing a sorted change list across segments.

use crate::entity::{IndividualChange, StoredValue};
use crate::error::CoreResult;
use crate::segment::SegmentManager;

/// Applies `changes` (in merge order) to every segment they touch.
///
/// Starting at the segment of the first change, each segment receives the
/// changes that begin at or before its end. Changes that also end inside
/// the segment are then retired; time-frame changes that reach past it
/// stay queued for the following segment. Empty stretches between
/// changes are skipped rather than walked.
///
/// # Errors
///
/// Returns the first segment failure. Segments already written keep their
/// changes; replaying the same list is harmless because every change
/// targets a specific key.
pub fn apply_changes<V: StoredValue>(
    segments: &SegmentManager,
    changes: &[IndividualChange<V>],
) -> CoreResult<()> {
    let mut pending: Vec<&IndividualChange<V>> = changes.iter().collect();
    let Some(first) = pending.iter().map(|c| c.grouping_number()).min() else {
        return Ok(());
    };
    let mut segment = segments.segment_for(first);

    loop {
        let end = segment.range().end();
        let batch: Vec<&IndividualChange<V>> = pending
            .iter()
            .copied()
            .filter(|change| change.grouping_number() <= end)
            .collect();
        segment.apply_changes(&batch)?;

        pending.retain(|change| change.end_grouping_number() > end);
        let Some(next_start) = pending.iter().map(|c| c.grouping_number()).min() else {
            return Ok(());
        };
        let Some(after) = end.checked_add(1) else {
            return Ok(());
        };
        segment = segments.segment_for(next_start.max(after));
    }
}
