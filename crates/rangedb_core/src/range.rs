//! Inclusive ranges of grouping numbers.
//!
//! A [`Range`] names every chunk file and every segment folder on disk
//! (`"{start}_{end}"`). All arithmetic saturates at the `i64` bounds.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// An inclusive `[start, end]` interval with `end >= start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Range {
    start: i64,
    end: i64,
}

impl Range {
    /// Creates a range.
    ///
    /// Bounds given in the wrong order are swapped.
    #[must_use]
    pub const fn new(start: i64, end: i64) -> Self {
        if end < start {
            Self {
                start: end,
                end: start,
            }
        } else {
            Self { start, end }
        }
    }

    /// The range covering every grouping number.
    #[must_use]
    pub const fn max_range() -> Self {
        Self::new(i64::MIN, i64::MAX)
    }

    /// The aligned range of `size` values that contains `value`.
    ///
    /// Ranges for one `size` never overlap. The bucket holding `i64::MIN`
    /// is cut short at `i64::MIN` and the one holding `i64::MAX` at
    /// `i64::MAX` when `size` does not divide the key space.
    #[must_use]
    pub fn for_value_and_size(value: i64, size: u64) -> Self {
        let size = i128::from(size.max(1));
        let floor = i128::from(value).div_euclid(size) * size;
        let low = floor.max(i128::from(i64::MIN));
        let high = (floor + size - 1).min(i128::from(i64::MAX));
        // low <= value <= high, so both fit.
        Self::new(low as i64, high as i64)
    }

    /// First value in the range.
    #[must_use]
    pub const fn start(&self) -> i64 {
        self.start
    }

    /// Last value in the range.
    #[must_use]
    pub const fn end(&self) -> i64 {
        self.end
    }

    /// Number of values covered, saturating at `u64::MAX`.
    #[must_use]
    pub fn length(&self) -> u64 {
        let len = i128::from(self.end) - i128::from(self.start) + 1;
        u64::try_from(len).unwrap_or(u64::MAX)
    }

    /// True if `value` is inside the range.
    #[must_use]
    pub const fn contains(&self, value: i64) -> bool {
        self.start <= value && value <= self.end
    }

    /// True if `other` lies entirely inside this range.
    #[must_use]
    pub const fn encloses(&self, other: &Range) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// True if the two ranges share at least one value.
    #[must_use]
    pub const fn overlaps(&self, other: &Range) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    /// True if this range overlaps any of `others`.
    #[must_use]
    pub fn overlaps_any(&self, others: &[Range]) -> bool {
        others.iter().any(|other| self.overlaps(other))
    }

    /// The file or folder name for this range.
    #[must_use]
    pub fn to_file_name(&self) -> String {
        format!("{}_{}", self.start, self.end)
    }

    /// Parses a `"{start}_{end}"` name.
    ///
    /// Anything else, including temp files and names with `end < start`,
    /// returns `None`.
    #[must_use]
    pub fn from_file_name(name: &str) -> Option<Self> {
        let (start, end) = name.split_once('_')?;
        let start = start.parse::<i64>().ok()?;
        let end = end.parse::<i64>().ok()?;
        (end >= start).then_some(Self { start, end })
    }
}

impl Ord for Range {
    fn cmp(&self, other: &Self) -> Ordering {
        self.start
            .cmp(&other.start)
            .then_with(|| self.end.cmp(&other.end))
    }
}

impl PartialOrd for Range {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

/// Largest multiple of `size` that is `<= value`, or `i64::MIN` when that
/// multiple lies below it.
#[must_use]
pub fn round_down_to_multiple(value: i64, size: u64) -> i64 {
    let size = i128::from(size.max(1));
    let rounded = i128::from(value).div_euclid(size) * size;
    // rounded <= value, and rounded > value - size >= i64::MIN - 2^64, so
    // only the lower bound can be out of range.
    i64::try_from(rounded).unwrap_or(i64::MIN)
}
