//! `DeferredRelease`: last-drop detection that hands the teardown of a
//! resource to the cleanup thread instead of running it inline wherever the
//! final reference happened to be dropped (spec.md §5, §9 — "kref_put from
//! interrupt deferred to workqueue").
//!
//! Endpoints and pull handles are reference-counted with `Arc`. An `Arc`
//! drop that turns out to be the last one runs the value's destructor right
//! there, which is fine in application context but not from the simulated
//! packet-reception path: destructors here can unpin memory or close a
//! socket, and the lock-ordering rules in spec.md §5 don't hold for
//! whatever lock the caller was holding when the drop happened to land.
//! [`DeferredRelease::release`] checks the strong count before dropping its
//! own handle and, if it was the last one, pushes the value onto a channel
//! drained by the cleanup thread rather than letting it fall here.

use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};

pub struct DeferredRelease<T> {
    retire_tx: Sender<Arc<T>>,
    retire_rx: Mutex<Receiver<Arc<T>>>,
}

impl<T> DeferredRelease<T> {
    pub fn new() -> Self {
        let (retire_tx, retire_rx) = channel();
        Self {
            retire_tx,
            retire_rx: Mutex::new(retire_rx),
        }
    }

    /// Consumes the caller's `Arc` handle. If this was the last strong
    /// reference, the value is routed to the retire queue instead of being
    /// dropped on the caller's stack; otherwise it is simply dropped here,
    /// since some other holder is still keeping it alive.
    pub fn release(&self, handle: Arc<T>) {
        if Arc::strong_count(&handle) == 1 {
            let _ = self.retire_tx.send(handle);
        }
        // else: dropped here, another holder remains live.
    }

    /// Drains values that reached a zero-external-refcount release since the
    /// last call, running `on_retire` for each. Intended to be called from
    /// the cleanup thread on an interval (spec.md §5: "periodic resource
    /// reclamation").
    pub fn drain<F: FnMut(Arc<T>)>(&self, mut on_retire: F) -> usize {
        let rx = self.retire_rx.lock().unwrap();
        let mut n = 0;
        while let Ok(value) = rx.try_recv() {
            on_retire(value);
            n += 1;
        }
        n
    }
}

impl<T> Default for DeferredRelease<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn last_reference_is_queued_for_retire() {
        let dr: DeferredRelease<u32> = DeferredRelease::new();
        let handle = Arc::new(7u32);
        dr.release(handle);
        let mut seen = Vec::new();
        let n = dr.drain(|v| seen.push(*v));
        assert_eq!(n, 1);
        assert_eq!(seen, vec![7]);
    }

    #[test]
    fn shared_reference_is_not_queued() {
        let dr: DeferredRelease<u32> = DeferredRelease::new();
        let handle = Arc::new(7u32);
        let _other = handle.clone();
        dr.release(handle);
        assert_eq!(dr.drain(|_| {}), 0);
    }

    #[test]
    fn drain_runs_teardown_exactly_once_per_retired_value() {
        let dr: DeferredRelease<AtomicUsize> = DeferredRelease::new();
        let counter = Arc::new(AtomicUsize::new(0));
        dr.release(counter);
        let mut teardowns = 0;
        dr.drain(|v| {
            v.fetch_add(1, Ordering::SeqCst);
            teardowns += 1;
        });
        assert_eq!(teardowns, 1);
    }
}
