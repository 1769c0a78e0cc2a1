//! `IrqMutex`: a ticket-lock spinlock for state touched from more than one
//! simulated execution context (spec.md §5).
//!
//! The name is kept from the kernel module this engine reimplements: in the
//! original, this lock also disabled interrupts and preemption because the
//! softirq path could run on the same CPU as the holder. This crate has no
//! real interrupts to disable, but the same rule applies — never sleep or
//! block while holding one, and never acquire a second `IrqMutex` out of the
//! order documented in spec.md §5.
//!
//! Tickets guarantee FIFO acquisition order, which matters for the
//! host-query list and pull-handle list where starvation under contention
//! would otherwise be possible.

use std::cell::UnsafeCell;
use std::fmt;
use std::hint::spin_loop;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU32, Ordering};

pub struct IrqMutex<T> {
    next_ticket: AtomicU32,
    now_serving: AtomicU32,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for IrqMutex<T> {}
unsafe impl<T: Send> Sync for IrqMutex<T> {}

pub struct IrqMutexGuard<'a, T> {
    mutex: &'a IrqMutex<T>,
}

impl<T> IrqMutex<T> {
    pub const fn new(data: T) -> Self {
        Self {
            next_ticket: AtomicU32::new(0),
            now_serving: AtomicU32::new(0),
            data: UnsafeCell::new(data),
        }
    }

    pub fn lock(&self) -> IrqMutexGuard<'_, T> {
        let my_ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        while self.now_serving.load(Ordering::Acquire) != my_ticket {
            spin_loop();
        }
        IrqMutexGuard { mutex: self }
    }

    /// Non-blocking acquire: succeeds only if no one is waiting or holding.
    pub fn try_lock(&self) -> Option<IrqMutexGuard<'_, T>> {
        let serving = self.now_serving.load(Ordering::Acquire);
        let next = self.next_ticket.load(Ordering::Acquire);
        if serving != next {
            return None;
        }
        self.next_ticket
            .compare_exchange(next, next + 1, Ordering::AcqRel, Ordering::Relaxed)
            .ok()
            .map(|_| IrqMutexGuard { mutex: self })
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<'a, T> Drop for IrqMutexGuard<'a, T> {
    fn drop(&mut self) {
        self.mutex.now_serving.fetch_add(1, Ordering::Release);
    }
}

impl<'a, T> Deref for IrqMutexGuard<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.mutex.data.get() }
    }
}

impl<'a, T> DerefMut for IrqMutexGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T: fmt::Debug> fmt::Debug for IrqMutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.try_lock() {
            Some(guard) => f.debug_struct("IrqMutex").field("data", &*guard).finish(),
            None => f.debug_struct("IrqMutex").field("data", &"<locked>").finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn mutual_exclusion_holds_under_contention() {
        let counter = Arc::new(IrqMutex::new(0u64));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let counter = counter.clone();
            handles.push(thread::spawn(move || {
                for _ in 0..1000 {
                    *counter.lock() += 1;
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*counter.lock(), 8000);
    }

    #[test]
    fn try_lock_fails_while_held() {
        let m = IrqMutex::new(5);
        let guard = m.lock();
        assert!(m.try_lock().is_none());
        drop(guard);
        assert!(m.try_lock().is_some());
    }
}
