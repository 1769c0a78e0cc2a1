//! Wire transport standing in for the NIC driver a real deployment sits on
//! top of (spec.md §4.7 "netdev packet handler", §4.9).
//!
//! [`LoopbackLink`] is the only implementation this crate ships: frames
//! transmitted on one interface are queued for immediate delivery back
//! through [`crate::recv::dispatch_ready`] on the next poll, exactly the
//! role the teacher's loopback device plays for its own stack. A production
//! deployment would add a raw-socket or DPDK-backed link here without
//! touching anything above this module.

use std::collections::VecDeque;

use omx_sync::IrqMutex;

/// One queued, already-encoded Ethernet frame plus the interface it arrived
/// or is departing on.
#[derive(Debug)]
pub struct QueuedFrame {
    pub iface_index: u32,
    pub bytes: Vec<u8>,
}

#[derive(Debug)]
struct LinkInner {
    queue: VecDeque<QueuedFrame>,
}

/// A single shared loopback wire: every attached interface transmits into
/// and receives from the same queue, tagged by `iface_index`.
#[derive(Debug)]
pub struct LoopbackLink {
    inner: IrqMutex<LinkInner>,
}

impl Default for LoopbackLink {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackLink {
    pub fn new() -> Self {
        Self {
            inner: IrqMutex::new(LinkInner { queue: VecDeque::new() }),
        }
    }

    /// Queues `bytes` for delivery back to `iface_index` (spec.md §4.9: the
    /// only link this crate models is one where every peer is reachable by
    /// loopback).
    pub fn transmit(&self, iface_index: u32, bytes: Vec<u8>) {
        self.inner.lock().queue.push_back(QueuedFrame { iface_index, bytes });
    }

    /// Drains every frame queued so far. Called from whatever stands in for
    /// the softirq/NAPI poll loop in this crate's tests.
    pub fn poll(&self) -> Vec<QueuedFrame> {
        self.inner.lock().queue.drain(..).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transmit_then_poll_drains_in_fifo_order() {
        let link = LoopbackLink::new();
        link.transmit(0, vec![1]);
        link.transmit(0, vec![2]);
        let frames = link.poll();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].bytes, vec![1]);
        assert_eq!(frames[1].bytes, vec![2]);
        assert!(link.is_empty());
    }
}
