//! Recovery log entries.

use crate::entity::IndividualChange;
use crate::error::CoreResult;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// A set of changes persisted before it is applied.
///
/// Entries order by creation time, then by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recoverable<V> {
    creation_time: i64,
    id: u64,
    changes: Vec<IndividualChange<V>>,
}

impl<V> Recoverable<V> {
    /// Creates an entry stamped with the current time.
    pub fn new(changes: Vec<IndividualChange<V>>) -> Self {
        Self::with_creation_time(now_millis(), changes)
    }

    /// Creates an entry with an explicit creation time in milliseconds.
    pub fn with_creation_time(creation_time: i64, changes: Vec<IndividualChange<V>>) -> Self {
        Self {
            creation_time,
            id: 0,
            changes,
        }
    }

    /// Creation time in milliseconds since the Unix epoch.
    pub fn creation_time(&self) -> i64 {
        self.creation_time
    }

    /// Id assigned when the entry was saved.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The changes, sorted.
    pub fn changes(&self) -> &[IndividualChange<V>] {
        &self.changes
    }

    pub(crate) fn set_id(&mut self, id: u64) {
        self.id = id;
    }

    /// Base file name, without the state extension.
    pub(crate) fn stem(&self) -> String {
        format!("{}_{}", self.creation_time, self.id)
    }
}

/// Applies replayed changes through the normal write path.
pub trait ChangeApplier<V>: Send + Sync {
    /// Applies `changes` to data and indexes.
    ///
    /// # Errors
    ///
    /// Any error aborts recovery.
    fn apply_changes(&self, changes: &[IndividualChange<V>]) -> CoreResult<()>;
}

pub(crate) fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
