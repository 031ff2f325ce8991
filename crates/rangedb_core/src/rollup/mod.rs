//! Background compaction of chunk files.
//!
//! Segments report every chunk read and write as a list of
//! [`RollupTarget`]s. The [`RollupScheduler`] counts that activity and,
//! once a target crosses its threshold, queues it for a worker thread that
//! hands it to a [`RollupExecutor`].

mod scheduler;
mod target;

pub use scheduler::{RollupExecutor, RollupScheduler, SchedulerStats};
pub use target::{ActivityListener, RollupOwner, RollupTarget};
