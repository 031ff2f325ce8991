//! # rangedb Testkit
//!
//! Test utilities for rangedb.
//!
//! This crate provides:
//! - Temporary collections and a serde test value
//! - Property-based test generators using proptest
//! - A crash simulation harness
//! - Lock leak assertions
//!
//! ## Usage
//!
//! ```rust,no_run
//! use rangedb_testkit::prelude::*;
//! use rangedb_core::Key;
//!
//! let people = TempCollection::<TestValue>::new();
//! people.insert(Key::Long(1), TestValue::new("Anna", 1)).unwrap();
//! assert_no_locks_held(people.lock_manager());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;
pub mod locks;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::locks::*;
}

pub use crash::*;
pub use fixtures::*;
pub use generators::*;
pub use locks::*;
