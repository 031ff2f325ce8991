//! Idle auto-close of range iterators.

use parking_lot::{Condvar, Mutex};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Something the watchdog can close after a period of inactivity.
pub(crate) trait Expirable: Send + Sync {
    /// Closes the resource if it has been idle longer than `timeout`.
    ///
    /// Returns true once the resource is closed and no longer needs
    /// watching.
    fn expire_if_idle(&self, timeout: Duration) -> bool;
}

struct Shared {
    watched: Mutex<Vec<Weak<dyn Expirable>>>,
    stopped: Mutex<bool>,
    wake: Condvar,
}

/// Background thread that force-closes idle iterators.
pub(crate) struct IteratorWatchdog {
    shared: Arc<Shared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl IteratorWatchdog {
    /// Starts the watchdog thread.
    pub(crate) fn start(timeout: Duration) -> std::io::Result<Self> {
        let shared = Arc::new(Shared {
            watched: Mutex::new(Vec::new()),
            stopped: Mutex::new(false),
            wake: Condvar::new(),
        });
        let interval = (timeout / 4).max(Duration::from_millis(10));
        let thread_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("rangedb-iterator-watchdog".to_string())
            .spawn(move || watch(&thread_shared, timeout, interval))?;
        Ok(Self {
            shared,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Starts watching `resource`.
    pub(crate) fn register(&self, resource: Weak<dyn Expirable>) {
        self.shared.watched.lock().push(resource);
    }

    /// Stops and joins the thread.
    pub(crate) fn stop(&self) {
        *self.shared.stopped.lock() = true;
        self.shared.wake.notify_all();
        if let Some(handle) = self.handle.lock().take() {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                tracing::warn!("iterator watchdog panicked");
            }
        }
    }
}

impl Drop for IteratorWatchdog {
    fn drop(&mut self) {
        self.stop();
    }
}

fn watch(shared: &Shared, timeout: Duration, interval: Duration) {
    loop {
        {
            let mut stopped = shared.stopped.lock();
            if !*stopped {
                shared.wake.wait_for(&mut stopped, interval);
            }
            if *stopped {
                return;
            }
        }
        let watched: Vec<Weak<dyn Expirable>> = shared.watched.lock().clone();
        let mut done = Vec::new();
        for (n, weak) in watched.iter().enumerate() {
            let finished = match weak.upgrade() {
                Some(resource) => resource.expire_if_idle(timeout),
                None => true,
            };
            if finished {
                done.push(n);
            }
        }
        if !done.is_empty() {
            let mut current = shared.watched.lock();
            // Registrations made during the sweep were appended after the snapshot.
            let mut n = 0;
            current.retain(|_| {
                let keep = !done.contains(&n);
                n += 1;
                keep
            });
        }
    }
}
