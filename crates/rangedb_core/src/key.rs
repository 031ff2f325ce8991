//! Keys and grouping numbers.
//!
//! Every stored entity is addressed by a [`Key`]. Besides its own natural
//! order, each key maps to a *grouping number*: the 64-bit value that
//! decides which segment and chunk file hold it. Time-frame keys cover a
//! span of grouping numbers; every other key covers exactly one.
//!
//! ## Ordering
//!
//! Keys of different variants order by a stable variant name. Within a
//! variant they order by grouping number first, then by their natural
//! order. Grouping-number-first is what lets chunk files be concatenated
//! in range order during a rollup and still produce a sorted stream.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::fmt;
use uuid::Uuid;

/// The key variant stored by a collection or produced by an index extractor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyKind {
    /// [`TimeKey`]
    Time,
    /// [`TimeFrameKey`]
    TimeFrame,
    /// 32-bit integer keys.
    Integer,
    /// 64-bit integer keys.
    Long,
    /// String keys, grouped by hash.
    String,
    /// UUID keys, grouped by hash.
    Uuid,
}

impl KeyKind {
    /// True for variants whose grouping number is a hash of the key.
    #[must_use]
    pub const fn is_hash_grouped(self) -> bool {
        matches!(self, Self::String | Self::Uuid)
    }

    /// True for variants that cover a span of grouping numbers.
    #[must_use]
    pub const fn spans_ranges(self) -> bool {
        matches!(self, Self::TimeFrame)
    }
}

impl fmt::Display for KeyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Time => "time",
            Self::TimeFrame => "time-frame",
            Self::Integer => "integer",
            Self::Long => "long",
            Self::String => "string",
            Self::Uuid => "uuid",
        };
        f.write_str(name)
    }
}

/// A point-in-time key: an id plus a timestamp used as grouping number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeKey {
    id: Box<Key>,
    time: i64,
}

impl TimeKey {
    /// Creates a time key.
    pub fn new(id: impl Into<Key>, time: i64) -> Self {
        Self {
            id: Box::new(id.into()),
            time,
        }
    }

    /// The identifying key.
    #[must_use]
    pub fn id(&self) -> &Key {
        &self.id
    }

    /// The timestamp.
    #[must_use]
    pub fn time(&self) -> i64 {
        self.time
    }
}

/// A key that spans `[start, end]`, stored in every segment it overlaps.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeFrameKey {
    id: Box<Key>,
    start: i64,
    end: i64,
}

impl TimeFrameKey {
    /// Creates a time-frame key.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidArgument`] if `end < start`.
    pub fn new(id: impl Into<Key>, start: i64, end: i64) -> CoreResult<Self> {
        if end < start {
            return Err(CoreError::invalid_argument(format!(
                "time frame ends before it starts: {start}..{end}"
            )));
        }
        Ok(Self {
            id: Box::new(id.into()),
            start,
            end,
        })
    }

    /// The identifying key.
    #[must_use]
    pub fn id(&self) -> &Key {
        &self.id
    }

    /// Start of the span.
    #[must_use]
    pub fn start(&self) -> i64 {
        self.start
    }

    /// End of the span (inclusive).
    #[must_use]
    pub fn end(&self) -> i64 {
        self.end
    }
}

/// Secondary index entry: the extracted key pointing at a stored key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexCompositeKey {
    extracted: Key,
    destination: Key,
}

impl IndexCompositeKey {
    /// Creates a composite key.
    pub fn new(extracted: Key, destination: Key) -> Self {
        Self {
            extracted,
            destination,
        }
    }

    /// The key produced by the index extractor.
    #[must_use]
    pub fn extracted(&self) -> &Key {
        &self.extracted
    }

    /// The key of the entity in the base collection.
    #[must_use]
    pub fn destination(&self) -> &Key {
        &self.destination
    }
}

/// A stored entity's key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Key {
    /// Point in time.
    Time(TimeKey),
    /// Span of time.
    TimeFrame(TimeFrameKey),
    /// 32-bit integer.
    Integer(i32),
    /// 64-bit integer.
    Long(i64),
    /// String, grouped by hash.
    String(String),
    /// UUID, grouped by hash.
    Uuid(Uuid),
    /// Secondary index entry.
    IndexComposite(Box<IndexCompositeKey>),
}

impl Key {
    /// Creates a [`TimeKey`].
    pub fn time(id: impl Into<Key>, time: i64) -> Self {
        Self::Time(TimeKey::new(id, time))
    }

    /// Creates a [`TimeFrameKey`].
    ///
    /// # Errors
    ///
    /// Returns an error if `end < start`.
    pub fn time_frame(id: impl Into<Key>, start: i64, end: i64) -> CoreResult<Self> {
        TimeFrameKey::new(id, start, end).map(Self::TimeFrame)
    }

    /// Creates an index composite key.
    #[must_use]
    pub fn composite(extracted: Key, destination: Key) -> Self {
        Self::IndexComposite(Box::new(IndexCompositeKey::new(extracted, destination)))
    }

    /// The grouping number that places this key.
    ///
    /// For time-frame keys this is the start of the span.
    #[must_use]
    pub fn grouping_number(&self) -> i64 {
        match self {
            Self::Time(k) => k.time,
            Self::TimeFrame(k) => k.start,
            Self::Integer(v) => i64::from(*v),
            Self::Long(v) => *v,
            Self::String(s) => hash_grouping_number(s.as_bytes()),
            Self::Uuid(u) => hash_grouping_number(u.as_bytes()),
            Self::IndexComposite(k) => k.extracted.grouping_number(),
        }
    }

    /// The last grouping number covered by this key.
    #[must_use]
    pub fn end_grouping_number(&self) -> i64 {
        match self {
            Self::TimeFrame(k) => k.end,
            other => other.grouping_number(),
        }
    }

    /// True if the key's grouping span intersects `[min, max]`.
    #[must_use]
    pub fn overlaps(&self, min: i64, max: i64) -> bool {
        self.grouping_number() <= max && self.end_grouping_number() >= min
    }

    /// Stable name of the variant, used for cross-variant ordering.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Time(_) => "TimeKey",
            Self::TimeFrame(_) => "TimeFrameKey",
            Self::Integer(_) => "IntegerKey",
            Self::Long(_) => "LongKey",
            Self::String(_) => "StringKey",
            Self::Uuid(_) => "UUIDKey",
            Self::IndexComposite(_) => "IndexCompositeKey",
        }
    }

    /// The kind of this key, or `None` for index composite keys.
    #[must_use]
    pub fn kind(&self) -> Option<KeyKind> {
        match self {
            Self::Time(_) => Some(KeyKind::Time),
            Self::TimeFrame(_) => Some(KeyKind::TimeFrame),
            Self::Integer(_) => Some(KeyKind::Integer),
            Self::Long(_) => Some(KeyKind::Long),
            Self::String(_) => Some(KeyKind::String),
            Self::Uuid(_) => Some(KeyKind::Uuid),
            Self::IndexComposite(_) => None,
        }
    }

    fn cmp_within_variant(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Time(a), Self::Time(b)) => a.time.cmp(&b.time).then_with(|| a.id.cmp(&b.id)),
            (Self::TimeFrame(a), Self::TimeFrame(b)) => a
                .start
                .cmp(&b.start)
                .then_with(|| a.id.cmp(&b.id))
                .then_with(|| a.end.cmp(&b.end)),
            (Self::Integer(a), Self::Integer(b)) => a.cmp(b),
            (Self::Long(a), Self::Long(b)) => a.cmp(b),
            (Self::String(a), Self::String(b)) => self
                .grouping_number()
                .cmp(&other.grouping_number())
                .then_with(|| a.cmp(b)),
            (Self::Uuid(a), Self::Uuid(b)) => self
                .grouping_number()
                .cmp(&other.grouping_number())
                .then_with(|| a.cmp(b)),
            (Self::IndexComposite(a), Self::IndexComposite(b)) => a
                .extracted
                .cmp(&b.extracted)
                .then_with(|| a.destination.cmp(&b.destination)),
            _ => Ordering::Equal,
        }
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        self.type_name()
            .cmp(other.type_name())
            .then_with(|| self.cmp_within_variant(other))
    }
}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Time(k) => write!(f, "TimeKey({}, {})", k.id, k.time),
            Self::TimeFrame(k) => write!(f, "TimeFrameKey({}, {}..{})", k.id, k.start, k.end),
            Self::Integer(v) => write!(f, "IntegerKey({v})"),
            Self::Long(v) => write!(f, "LongKey({v})"),
            Self::String(s) => write!(f, "StringKey({s:?})"),
            Self::Uuid(u) => write!(f, "UUIDKey({u})"),
            Self::IndexComposite(k) => {
                write!(f, "IndexCompositeKey({} -> {})", k.extracted, k.destination)
            }
        }
    }
}

impl From<i64> for Key {
    fn from(value: i64) -> Self {
        Self::Long(value)
    }
}

impl From<i32> for Key {
    fn from(value: i32) -> Self {
        Self::Integer(value)
    }
}

impl From<String> for Key {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<Uuid> for Key {
    fn from(value: Uuid) -> Self {
        Self::Uuid(value)
    }
}

/// Maps bytes to a grouping number in `[0, 2^32)`.
///
/// Uses the first four bytes of SHA-256 so the value is identical across
/// processes, platforms and releases.
fn hash_grouping_number(bytes: &[u8]) -> i64 {
    let digest = Sha256::digest(bytes);
    let prefix = [digest[0], digest[1], digest[2], digest[3]];
    i64::from(u32::from_be_bytes(prefix))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_grouping_numbers() {
        assert_eq!(Key::Long(-5).grouping_number(), -5);
        assert_eq!(Key::Integer(17).grouping_number(), 17);
        assert_eq!(Key::time(1i64, 1_000).grouping_number(), 1_000);
    }

    #[test]
    fn time_frame_spans() {
        let key = Key::time_frame(1i64, 10, 20).unwrap();
        assert_eq!(key.grouping_number(), 10);
        assert_eq!(key.end_grouping_number(), 20);
        assert!(key.overlaps(15, 30));
        assert!(key.overlaps(0, 10));
        assert!(!key.overlaps(21, 30));
        assert!(Key::time_frame(1i64, 20, 10).is_err());
    }

    #[test]
    fn hash_grouping_is_stable_and_bounded() {
        let a = Key::from("hello");
        let b = Key::from("hello");
        assert_eq!(a.grouping_number(), b.grouping_number());
        assert!(a.grouping_number() >= 0);
        assert!(a.grouping_number() < 1 << 32);

        let u = Key::Uuid(Uuid::nil());
        assert!((0..1 << 32).contains(&u.grouping_number()));
    }

    #[test]
    fn same_variant_orders_by_grouping_number() {
        let mut keys = vec![Key::from("b"), Key::from("a"), Key::from("c")];
        keys.sort();
        for pair in keys.windows(2) {
            assert!(pair[0].grouping_number() <= pair[1].grouping_number());
        }
    }

    #[test]
    fn cross_variant_order_uses_type_name() {
        assert!(Key::Integer(100) < Key::Long(1));
        assert!(Key::Long(1) < Key::from("a"));
        assert!(Key::time(1i64, 5) > Key::time_frame(1i64, 0, 9).unwrap());
    }

    #[test]
    fn time_keys_order_by_time_then_id() {
        let early = Key::time(9i64, 1);
        let late = Key::time(1i64, 2);
        assert!(early < late);
        assert!(Key::time(1i64, 2) < Key::time(2i64, 2));
    }

    #[test]
    fn composite_orders_by_extracted_then_destination() {
        let a = Key::composite(Key::Integer(1), Key::Long(9));
        let b = Key::composite(Key::Integer(2), Key::Long(0));
        let c = Key::composite(Key::Integer(2), Key::Long(1));
        assert!(a < b && b < c);
        assert_eq!(b.grouping_number(), 2);
    }

    #[test]
    fn kinds() {
        assert_eq!(Key::Long(1).kind(), Some(KeyKind::Long));
        assert_eq!(Key::composite(Key::Long(1), Key::Long(2)).kind(), None);
        assert!(KeyKind::Uuid.is_hash_grouped());
        assert!(KeyKind::TimeFrame.spans_ranges());
    }
}
