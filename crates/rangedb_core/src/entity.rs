//! Stored entities and the changes applied to them.

use crate::key::Key;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt::Debug;

/// Bound satisfied by every type a collection can store.
///
/// Values are opaque to the engine; they only need to survive an encode
/// and decode round trip and compare equal afterwards.
pub trait StoredValue:
    Serialize + DeserializeOwned + Clone + PartialEq + Debug + Send + Sync + 'static
{
}

impl<T> StoredValue for T where
    T: Serialize + DeserializeOwned + Clone + PartialEq + Debug + Send + Sync + 'static
{
}

/// A key and its value: the unit stored in chunk files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity<V> {
    key: Key,
    value: V,
}

impl<V> Entity<V> {
    /// Creates an entity.
    pub fn new(key: Key, value: V) -> Self {
        Self { key, value }
    }

    /// The entity's key.
    pub fn key(&self) -> &Key {
        &self.key
    }

    /// The entity's value.
    pub fn value(&self) -> &V {
        &self.value
    }

    /// Splits the entity into key and value.
    pub fn into_parts(self) -> (Key, V) {
        (self.key, self.value)
    }

    /// Consumes the entity, returning its value.
    pub fn into_value(self) -> V {
        self.value
    }
}

/// One keyed mutation: insert, update or delete.
///
/// A missing `new_value` deletes; a missing `old_value` inserts; both
/// present updates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndividualChange<V> {
    key: Key,
    old_value: Option<V>,
    new_value: Option<V>,
}

impl<V> IndividualChange<V> {
    /// Creates a change from its parts.
    pub fn new(key: Key, old_value: Option<V>, new_value: Option<V>) -> Self {
        Self {
            key,
            old_value,
            new_value,
        }
    }

    /// An insert of a new key.
    pub fn insert(key: Key, value: V) -> Self {
        Self::new(key, None, Some(value))
    }

    /// An update of an existing key.
    pub fn update(key: Key, old_value: V, new_value: V) -> Self {
        Self::new(key, Some(old_value), Some(new_value))
    }

    /// A delete; `old_value` is what the key held, if known.
    pub fn delete(key: Key, old_value: Option<V>) -> Self {
        Self::new(key, old_value, None)
    }

    /// The targeted key.
    pub fn key(&self) -> &Key {
        &self.key
    }

    /// Value before the change.
    pub fn old_value(&self) -> Option<&V> {
        self.old_value.as_ref()
    }

    /// Value after the change.
    pub fn new_value(&self) -> Option<&V> {
        self.new_value.as_ref()
    }

    /// Grouping number of the key.
    pub fn grouping_number(&self) -> i64 {
        self.key.grouping_number()
    }

    /// Last grouping number the key covers.
    pub fn end_grouping_number(&self) -> i64 {
        self.key.end_grouping_number()
    }

    /// True if applying this change removes the key.
    pub fn is_delete(&self) -> bool {
        self.new_value.is_none()
    }

    /// Total order used to merge changes with stored entities.
    pub fn cmp_order(&self, other: &Self) -> Ordering {
        self.key
            .cmp(&other.key)
            .then_with(|| self.grouping_number().cmp(&other.grouping_number()))
    }
}

/// Sorts changes into merge order.
pub fn sort_changes<V>(changes: &mut [IndividualChange<V>]) {
    changes.sort_by(IndividualChange::cmp_order);
}
