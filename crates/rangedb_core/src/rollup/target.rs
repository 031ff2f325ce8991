//! Rollup targets and activity reporting.

use crate::range::Range;
use std::fmt;

/// Which segment tree a rollup target belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RollupOwner {
    /// The collection's own data.
    Collection,
    /// A secondary index, by name.
    Index(String),
}

impl fmt::Display for RollupOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Collection => f.write_str("collection"),
            Self::Index(name) => write!(f, "index:{name}"),
        }
    }
}

/// A range inside one segment that may be rolled up into a single chunk.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RollupTarget {
    owner: RollupOwner,
    segment_grouping_number: i64,
    range: Range,
}

impl RollupTarget {
    /// Creates a target.
    #[must_use]
    pub fn new(owner: RollupOwner, segment_grouping_number: i64, range: Range) -> Self {
        Self {
            owner,
            segment_grouping_number,
            range,
        }
    }

    /// Target in the collection's own segment tree.
    #[must_use]
    pub fn collection(segment_grouping_number: i64, range: Range) -> Self {
        Self::new(RollupOwner::Collection, segment_grouping_number, range)
    }

    /// Target in an index's segment tree.
    #[must_use]
    pub fn index(name: impl Into<String>, segment_grouping_number: i64, range: Range) -> Self {
        Self::new(RollupOwner::Index(name.into()), segment_grouping_number, range)
    }

    /// Owning segment tree.
    #[must_use]
    pub fn owner(&self) -> &RollupOwner {
        &self.owner
    }

    /// A grouping number inside the target's segment.
    #[must_use]
    pub fn segment_grouping_number(&self) -> i64 {
        self.segment_grouping_number
    }

    /// The range to roll up.
    #[must_use]
    pub fn range(&self) -> Range {
        self.range
    }
}

impl fmt::Display for RollupTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.owner, self.range)
    }
}

/// Receives read and write activity from segments.
pub trait ActivityListener: Send + Sync {
    /// A chunk covered by these targets was read.
    fn report_reads(&self, targets: &[RollupTarget]);

    /// A chunk covered by these targets was rewritten.
    fn report_writes(&self, targets: &[RollupTarget]);
}
