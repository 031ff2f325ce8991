//! Batched writes.
//!
//! - [`BatchWriter`] merges sorted changes into one chunk
//! - [`apply_changes`] spreads a sorted change list over every segment it touches

mod utils;
mod writer;

pub use utils::apply_changes;
pub use writer::{BatchStats, BatchWriter};
