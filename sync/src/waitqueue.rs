//! Wait queue for blocking ioctls (spec.md §5: "All blocking ioctls accept
//! a millisecond timeout; `infinite` is the sentinel").
//!
//! Modeled after the teacher's futex-backed wait queue, but built on
//! `Condvar` since this crate has a real OS scheduler underneath it instead
//! of rolling its own.

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Sentinel for "block forever" in millisecond-timeout APIs (spec.md §5).
pub const TIMEOUT_INFINITE: i64 = -1;

#[derive(Debug)]
pub struct WaitQueue {
    generation: Mutex<u64>,
    cv: Condvar,
}

impl Default for WaitQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitQueue {
    pub const fn new() -> Self {
        Self {
            generation: Mutex::new(0),
            cv: Condvar::new(),
        }
    }

    /// Blocks until `predicate` is true or `timeout_ms` elapses.
    /// `timeout_ms == TIMEOUT_INFINITE` blocks with no deadline.
    /// Returns `true` if `predicate` became true, `false` on timeout.
    pub fn wait_event<F: FnMut() -> bool>(&self, timeout_ms: i64, mut predicate: F) -> bool {
        if predicate() {
            return true;
        }
        let deadline = if timeout_ms == TIMEOUT_INFINITE {
            None
        } else {
            Some(Instant::now() + Duration::from_millis(timeout_ms.max(0) as u64))
        };
        let mut gen = self.generation.lock().unwrap();
        loop {
            if predicate() {
                return true;
            }
            match deadline {
                None => {
                    gen = self.cv.wait(gen).unwrap();
                }
                Some(d) => {
                    let now = Instant::now();
                    if now >= d {
                        return predicate();
                    }
                    let (g, result) = self.cv.wait_timeout(gen, d - now).unwrap();
                    gen = g;
                    if result.timed_out() && !predicate() {
                        return false;
                    }
                }
            }
        }
    }

    pub fn wake_one(&self) {
        *self.generation.lock().unwrap() += 1;
        self.cv.notify_one();
    }

    pub fn wake_all(&self) {
        *self.generation.lock().unwrap() += 1;
        self.cv.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn wakes_on_predicate_change() {
        let wq = Arc::new(WaitQueue::new());
        let flag = Arc::new(AtomicBool::new(false));

        let wq2 = wq.clone();
        let flag2 = flag.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            flag2.store(true, Ordering::SeqCst);
            wq2.wake_all();
        });

        let woke = wq.wait_event(5000, || flag.load(Ordering::SeqCst));
        assert!(woke);
        handle.join().unwrap();
    }

    #[test]
    fn times_out_when_predicate_never_true() {
        let wq = WaitQueue::new();
        let woke = wq.wait_event(20, || false);
        assert!(!woke);
    }

    #[test]
    fn returns_immediately_when_already_true() {
        let wq = WaitQueue::new();
        assert!(wq.wait_event(0, || true));
    }
}
