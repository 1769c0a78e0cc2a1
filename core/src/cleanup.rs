//! Cleanup thread: periodic resource reclamation standing in for the
//! kernel module's workqueue (spec.md §5 "Workqueue / cleanup thread").
//!
//! Drains RCU retire queues past their grace period, processes deferred
//! host-query/reply work, and runs a caller-supplied pull-retransmit tick.
//! Kept generic over what each tick does rather than owning `net`/`mm`
//! types directly, so `core` does not need to depend on crates that in
//! turn depend on it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// A unit of periodic work run on every cleanup tick. Implementors close
/// over whatever table they need to sweep (iface retirement, peer
/// host-query list, pull-handle timers, ...).
pub trait CleanupTask: Send + Sync {
    fn run(&self);
}

impl<F: Fn() + Send + Sync> CleanupTask for F {
    fn run(&self) {
        (self)()
    }
}

pub struct CleanupThread {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl CleanupThread {
    /// Spawns a background thread that runs every task in `tasks` once per
    /// `interval` until [`CleanupThread::stop`] or drop.
    pub fn spawn(tasks: Vec<Arc<dyn CleanupTask>>, interval: Duration) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_clone = stop.clone();
        let handle = thread::spawn(move || {
            while !stop_clone.load(Ordering::Acquire) {
                for task in &tasks {
                    task.run();
                }
                thread::sleep(interval);
            }
        });
        Self {
            stop,
            handle: Some(handle),
        }
    }

    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CleanupThread {
    fn drop(&mut self) {
        self.stop();
    }
}
