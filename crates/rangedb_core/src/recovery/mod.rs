//! Write-ahead log of pending changes.
//!
//! ## Layout
//!
//! ```text
//! <collection>/.recovery/
//! ├─ 1718000000000_41.complete    # applied, kept as history
//! └─ 1718000000123_42.pending     # saved, not yet applied
//! ```
//!
//! ## Protocol
//!
//! 1. [`RecoveryManager::save_change`] writes the entry *before* any chunk
//!    is touched.
//! 2. The caller applies the changes through the normal write path.
//! 3. [`RecoveryManager::mark_complete`] renames the entry to `.complete`.
//!
//! On open, every `.pending` entry is replayed in `(creation time, id)`
//! order. Replay goes through the same merge as live writes, so applying
//! an entry twice leaves the same result as applying it once.
//!
//! Completed entries are history. The [`ChangeHistoryCleaner`] trims them
//! to a retention limit; a hold suspends trimming while a backup copies
//! the directory.

mod cleaner;
mod manager;
mod recoverable;

pub use cleaner::ChangeHistoryCleaner;
pub use manager::{list_history, HistoryEntry, RecoveryManager, RECOVERY_DIR};
pub use recoverable::{ChangeApplier, Recoverable};
