//! Event queue: the expected/unexpected ring pair owned by each endpoint
//! (spec.md §4.5).
//!
//! The ring head is advanced under a spinlock (multiple softirqs may
//! produce concurrently) while the slot payload itself is filled without
//! holding it; [`omx_abi::event::EventSlot`]'s type-byte-last publish gives
//! the consumer a consistent view regardless.

use omx_abi::event::{Event, EventSlot};
use omx_sync::IrqMutex;

pub use omx_abi::event::EventType;

/// A fixed-capacity ring of [`EventSlot`]s with a single advancing head.
#[derive(Debug)]
pub struct EventQueue {
    slots: Vec<EventSlot>,
    /// Guards only head advancement, never slot contents.
    head: IrqMutex<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum EventQueueError {
    #[error("event queue is full")]
    NoResources,
}

impl EventQueue {
    pub fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, EventSlot::new);
        Self {
            slots,
            head: IrqMutex::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn reserve_slot(&self) -> Option<usize> {
        let mut head = self.head.lock();
        for i in 0..self.slots.len() {
            let idx = (*head + i) % self.slots.len();
            if self.slots[idx].is_empty() {
                *head = (idx + 1) % self.slots.len();
                return Some(idx);
            }
        }
        None
    }

    /// Posts an expected-queue completion. Always succeeds: the caller is
    /// required to have pre-reserved capacity via its own flow control
    /// before issuing the operation this event completes (spec.md §4.5).
    pub fn notify_expected(&self, event: Event) {
        match self.reserve_slot() {
            Some(idx) => self.slots[idx].publish(event),
            None => {
                // The caller's own accounting guarantees a slot exists;
                // reaching here means that invariant was violated upstream.
                debug_assert!(false, "expected-queue overflow: caller did not pre-reserve");
            }
        }
    }

    /// Posts an unexpected-queue event. May fail with `NoResources` if the
    /// ring is full; the caller then drops the triggering packet and relies
    /// on the sender's retransmission (spec.md §4.5).
    pub fn notify_unexpected(&self, event: Event) -> Result<(), EventQueueError> {
        match self.reserve_slot() {
            Some(idx) => {
                self.slots[idx].publish(event);
                Ok(())
            }
            None => Err(EventQueueError::NoResources),
        }
    }

    /// Reserves a slot without publishing to it, for the two-phase
    /// unexpected-receive path that also needs a recv-queue slot before the
    /// payload can be copied in (spec.md §4.5
    /// `prepare_unexpected_with_recvq`). Returns the slot's index, used
    /// later by [`EventQueue::commit`] or [`EventQueue::cancel`].
    pub fn prepare_unexpected(&self) -> Result<usize, EventQueueError> {
        // A reservation here is observationally identical to publishing a
        // `None`-typed placeholder: the slot stays "empty" to consumers
        // until `commit` publishes the real event, so no separate marker
        // state is needed.
        self.reserve_slot().ok_or(EventQueueError::NoResources)
    }

    pub fn commit(&self, slot: usize, event: Event) {
        self.slots[slot].publish(event);
    }

    /// Rolls back a `prepare_unexpected` reservation. Since reservation
    /// never marked the slot non-empty, there is nothing to undo beyond
    /// letting the slot be picked up by the next `reserve_slot` scan.
    pub fn cancel(&self, _slot: usize) {}

    pub fn poll(&self) -> Option<Event> {
        self.slots.iter().find_map(|s| s.peek())
    }

    pub fn consume_next(&self) -> Option<Event> {
        self.slots.iter().find_map(|s| s.consume())
    }

    pub fn in_use_count(&self) -> usize {
        self.slots.iter().filter(|s| !s.is_empty()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use omx_abi::event::EventType;

    #[test]
    fn notify_expected_always_succeeds_until_genuinely_full() {
        let q = EventQueue::new(2);
        q.notify_expected(Event::new(EventType::SendDone));
        q.notify_expected(Event::new(EventType::SendDone));
        assert_eq!(q.in_use_count(), 2);
    }

    #[test]
    fn notify_unexpected_fails_when_full() {
        let q = EventQueue::new(1);
        assert!(q.notify_unexpected(Event::new(EventType::RecvTiny)).is_ok());
        assert_eq!(
            q.notify_unexpected(Event::new(EventType::RecvTiny)),
            Err(EventQueueError::NoResources)
        );
    }

    #[test]
    fn prepare_then_commit_publishes_the_event() {
        let q = EventQueue::new(4);
        let slot = q.prepare_unexpected().unwrap();
        assert!(q.poll().is_none());
        let mut evt = Event::new(EventType::RecvSmall);
        evt.xfer_length = 60;
        q.commit(slot, evt);
        assert_eq!(q.poll().unwrap().xfer_length, 60);
    }
}
