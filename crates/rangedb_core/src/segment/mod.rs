//! Segments: the on-disk partitions of a segment tree.
//!
//! - [`SegmentPathManager`] maps grouping numbers to folders and chunk paths
//! - [`Segment`] reads and rewrites the chunk files of one folder
//! - [`SegmentManager`] hands out segments and finds existing ones
//! - [`SegmentEntityIterator`] streams a segment's entities lazily

mod iterator;
mod manager;
mod path;
#[allow(clippy::module_inception)]
mod segment;

pub use iterator::SegmentEntityIterator;
pub use manager::{SegmentManager, SegmentOptions};
pub use path::{list_chunk_files, SegmentPathManager, SegmentSizing};
pub use segment::Segment;
