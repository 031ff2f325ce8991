//! # rangedb Core
//!
//! Segment storage engine for rangedb.
//!
//! This crate provides:
//! - Keys, grouping numbers and [`Range`]s
//! - Segment trees of sorted chunk files with copy-on-write replacement
//! - Rollups that merge small chunk files into larger ones
//! - Batched writes across segments
//! - A recovery log replayed after a crash
//! - Secondary indexes maintained through the same write path
//! - The [`Collection`] facade tying it together
//!
//! ## Example
//!
//! ```rust,no_run
//! use rangedb_core::{Collection, CollectionConfig, Key};
//!
//! let people = Collection::<String>::open("people", CollectionConfig::default())?;
//! people.insert(Key::Long(1), "Anna".to_string())?;
//! people.insert(Key::Long(2), "Bob".to_string())?;
//!
//! let names: Vec<String> = people
//!     .get_range(1, 2)?
//!     .into_iter()
//!     .map(|entity| entity.into_value())
//!     .collect();
//! assert_eq!(names, ["Anna", "Bob"]);
//! # Ok::<(), rangedb_core::CoreError>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod batch;
mod collection;
mod config;
pub mod dir;
mod entity;
mod error;
pub mod index;
mod key;
pub mod object;
mod range;
pub mod recovery;
pub mod rollup;
pub mod segment;

pub use collection::{Collection, CollectionEntityIterator};
pub use config::CollectionConfig;
pub use dir::{CollectionDir, CollectionMetadata};
pub use entity::{sort_changes, Entity, IndividualChange, StoredValue};
pub use error::{CoreError, CoreResult};
pub use index::{FnExtractor, KeyExtractor, SecondaryIndex};
pub use key::{IndexCompositeKey, Key, KeyKind, TimeFrameKey, TimeKey};
pub use range::{round_down_to_multiple, Range};
pub use recovery::{ChangeHistoryCleaner, Recoverable, RecoveryManager};
pub use rollup::{RollupOwner, RollupScheduler, RollupTarget};
pub use segment::{Segment, SegmentManager, SegmentOptions, SegmentPathManager, SegmentSizing};

/// Crate version, as recorded by tools that inspect collections.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
