//! Key extraction for secondary indexes.

use crate::key::{Key, KeyKind};
use std::fmt;

/// Produces the secondary keys of a value.
pub trait KeyExtractor<V>: Send + Sync + 'static {
    /// Kind of every key this extractor produces.
    fn key_kind(&self) -> KeyKind;

    /// Secondary keys of `value`. May be empty; duplicates are ignored.
    fn extract_keys(&self, value: &V) -> Vec<Key>;
}

/// A [`KeyExtractor`] backed by a closure.
///
/// ```rust,ignore
/// let by_age = FnExtractor::new(KeyKind::Integer, |p: &Person| vec![Key::Integer(p.age)]);
/// ```
pub struct FnExtractor<F> {
    kind: KeyKind,
    extract: F,
}

impl<F> FnExtractor<F> {
    /// Wraps `extract`, declaring that it produces `kind` keys.
    pub fn new(kind: KeyKind, extract: F) -> Self {
        Self { kind, extract }
    }
}

impl<V, F> KeyExtractor<V> for FnExtractor<F>
where
    F: Fn(&V) -> Vec<Key> + Send + Sync + 'static,
{
    fn key_kind(&self) -> KeyKind {
        self.kind
    }

    fn extract_keys(&self, value: &V) -> Vec<Key> {
        (self.extract)(value)
    }
}

impl<F> fmt::Debug for FnExtractor<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnExtractor").field("kind", &self.kind).finish_non_exhaustive()
    }
}
