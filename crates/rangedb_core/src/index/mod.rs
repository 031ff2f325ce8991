//! Secondary indexes.
//!
//! An index is a second segment tree under `<collection>/<name>/`. Each
//! stored entity is keyed by an [`IndexCompositeKey`](crate::IndexCompositeKey)
//! `(extracted, destination)` and holds the destination key as its value,
//! so one extracted key can point at many collection entities.
//!
//! Index maintenance goes through the same batch path as collection
//! writes: every collection change is turned into composite-key deletes
//! and inserts, sorted, and applied with [`apply_changes`](crate::batch::apply_changes).

mod extractor;
#[allow(clippy::module_inception)]
mod index;
mod manager;

pub use extractor::{FnExtractor, KeyExtractor};
pub use index::{validate_index_name, IndexMeta, SecondaryIndex, EXTRACTOR_FILE};
pub use manager::{list_index_names, IndexManager};
