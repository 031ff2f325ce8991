//! Task queue and worker pool for rollups.

use super::target::{ActivityListener, RollupTarget};
use crate::error::{CoreError, CoreResult};
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

/// Performs the rollups the scheduler decides on.
pub trait RollupExecutor: Send + Sync {
    /// Rolls up one target. Called from a worker thread or from
    /// [`RollupScheduler::run_pending`].
    ///
    /// # Errors
    ///
    /// Any error is logged by the scheduler and counted as a failure.
    fn execute_rollup(&self, target: &RollupTarget) -> CoreResult<()>;
}

/// Counters describing scheduler activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Targets waiting in the queue.
    pub pending: usize,
    /// Targets being rolled up right now.
    pub running: usize,
    /// Rollups that finished successfully.
    pub completed: u64,
    /// Rollups that returned an error.
    pub failed: u64,
}

#[derive(Default)]
struct State {
    activity: HashMap<RollupTarget, u32>,
    queue: VecDeque<RollupTarget>,
    queued: HashSet<RollupTarget>,
    running: usize,
    completed: u64,
    failed: u64,
    shutdown: bool,
}

struct Shared {
    state: Mutex<State>,
    work: Condvar,
    idle: Condvar,
    threshold: u32,
}

impl Shared {
    fn take_next(&self) -> Option<RollupTarget> {
        let mut state = self.state.lock();
        loop {
            if state.shutdown {
                return None;
            }
            if let Some(target) = state.queue.pop_front() {
                state.queued.remove(&target);
                state.running += 1;
                return Some(target);
            }
            self.work.wait(&mut state);
        }
    }

    fn finish(&self, target: &RollupTarget, result: CoreResult<()>) {
        let mut state = self.state.lock();
        state.running -= 1;
        match result {
            Ok(()) => state.completed += 1,
            Err(CoreError::LockTimeout { path }) => {
                state.failed += 1;
                tracing::debug!(target = %target, path = %path.display(), "rollup deferred, chunk busy");
            }
            Err(e) => {
                state.failed += 1;
                tracing::warn!(target = %target, error = %e, "background rollup failed");
            }
        }
        if state.queue.is_empty() && state.running == 0 {
            self.idle.notify_all();
        }
    }

    fn record(&self, targets: &[RollupTarget]) {
        if targets.is_empty() {
            return;
        }
        let mut state = self.state.lock();
        if state.shutdown {
            return;
        }
        let mut scheduled = false;
        for target in targets {
            let count = state.activity.entry(target.clone()).or_insert(0);
            *count += 1;
            if *count < self.threshold {
                continue;
            }
            state.activity.remove(target);
            if state.queued.insert(target.clone()) {
                tracing::debug!(target = %target, "scheduled rollup");
                state.queue.push_back(target.clone());
                scheduled = true;
            }
        }
        if scheduled {
            self.work.notify_all();
        }
    }
}

/// Counts chunk activity per target and rolls up busy targets.
///
/// Rollups run on a small pool of worker threads started by
/// [`start`](Self::start). With no workers, queued targets stay queued
/// until [`run_pending`](Self::run_pending) is called.
///
/// The executor is held weakly: a worker never keeps its owner alive, and
/// once the owner is gone queued targets are discarded.
pub struct RollupScheduler {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    executor: Mutex<Option<Weak<dyn RollupExecutor>>>,
}

impl RollupScheduler {
    /// Creates a scheduler that queues a target after `threshold` reports.
    #[must_use]
    pub fn new(threshold: u32) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                work: Condvar::new(),
                idle: Condvar::new(),
                threshold: threshold.max(1),
            }),
            workers: Mutex::new(Vec::new()),
            executor: Mutex::new(None),
        }
    }

    /// Registers the executor and spawns `workers` threads.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if a worker thread cannot be spawned.
    pub fn start(&self, executor: Weak<dyn RollupExecutor>, workers: usize) -> CoreResult<()> {
        *self.executor.lock() = Some(executor.clone());
        let mut handles = self.workers.lock();
        for n in 0..workers {
            let shared = Arc::clone(&self.shared);
            let executor = executor.clone();
            let handle = thread::Builder::new()
                .name(format!("rangedb-rollup-{n}"))
                .spawn(move || worker_loop(&shared, &executor))?;
            handles.push(handle);
        }
        Ok(())
    }

    /// Queues `target` regardless of its activity count.
    pub fn schedule(&self, target: RollupTarget) {
        let mut state = self.shared.state.lock();
        if state.shutdown || !state.queued.insert(target.clone()) {
            return;
        }
        state.activity.remove(&target);
        state.queue.push_back(target);
        self.shared.work.notify_one();
    }

    /// Runs every queued target on the calling thread.
    ///
    /// Returns the number of targets executed.
    pub fn run_pending(&self) -> usize {
        let executor = self.executor.lock().as_ref().and_then(Weak::upgrade);
        let mut executed = 0;
        loop {
            let target = {
                let mut state = self.shared.state.lock();
                let Some(target) = state.queue.pop_front() else {
                    break;
                };
                state.queued.remove(&target);
                state.running += 1;
                target
            };
            let result = match &executor {
                Some(executor) => executor.execute_rollup(&target),
                None => Ok(()),
            };
            self.shared.finish(&target, result);
            executed += 1;
        }
        executed
    }

    /// Blocks until the queue is drained by the workers.
    ///
    /// Returns immediately when there are no workers.
    pub fn wait_idle(&self) {
        if self.workers.lock().is_empty() {
            return;
        }
        let mut state = self.shared.state.lock();
        while !state.shutdown && (!state.queue.is_empty() || state.running > 0) {
            self.shared.idle.wait(&mut state);
        }
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> SchedulerStats {
        let state = self.shared.state.lock();
        SchedulerStats {
            pending: state.queue.len(),
            running: state.running,
            completed: state.completed,
            failed: state.failed,
        }
    }

    /// Stops the workers and discards queued targets.
    ///
    /// Safe to call from a worker thread: that thread is not joined.
    pub fn shutdown(&self) {
        {
            let mut state = self.shared.state.lock();
            if state.shutdown {
                return;
            }
            state.shutdown = true;
            state.queue.clear();
            state.queued.clear();
            state.activity.clear();
            self.shared.work.notify_all();
            self.shared.idle.notify_all();
        }
        let current = thread::current().id();
        let handles: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        for handle in handles {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                tracing::warn!("rollup worker panicked");
            }
        }
    }
}

impl ActivityListener for RollupScheduler {
    fn report_reads(&self, targets: &[RollupTarget]) {
        self.shared.record(targets);
    }

    fn report_writes(&self, targets: &[RollupTarget]) {
        self.shared.record(targets);
    }
}

impl Drop for RollupScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for RollupScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RollupScheduler")
            .field("threshold", &self.shared.threshold)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

fn worker_loop(shared: &Shared, executor: &Weak<dyn RollupExecutor>) {
    while let Some(target) = shared.take_next() {
        let Some(strong) = executor.upgrade() else {
            shared.finish(&target, Ok(()));
            return;
        };
        let result = strong.execute_rollup(&target);
        // May drop the last strong reference, which shuts this scheduler down.
        drop(strong);
        shared.finish(&target, result);
    }
}
