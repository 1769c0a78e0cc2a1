//! Endpoint manager: user-visible message-passing ports (spec.md §4.3).

use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use omx_mm::Region;
use omx_sync::{IrqMutex, WaitQueue};
use rand::Rng;
use tracing::info;

use crate::event::EventQueue;
use crate::iface::Iface;
use crate::ring_mem::SlotRing;
use crate::slotmap::SlotAllocator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointStatus {
    Free,
    Initializing,
    Ok,
    Closing,
}

const STATUS_FREE: u8 = 0;
const STATUS_INITIALIZING: u8 = 1;
const STATUS_OK: u8 = 2;
const STATUS_CLOSING: u8 = 3;

fn decode_status(raw: u8) -> EndpointStatus {
    match raw {
        STATUS_INITIALIZING => EndpointStatus::Initializing,
        STATUS_OK => EndpointStatus::Ok,
        STATUS_CLOSING => EndpointStatus::Closing,
        _ => EndpointStatus::Free,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum EndpointError {
    #[error("endpoint index already open on this interface")]
    Busy,
    #[error("no such endpoint index")]
    BadEndpoint,
    #[error("endpoint is closed")]
    EndpointClosed,
    #[error("endpoint has no free user-region slot")]
    NoLocalResources,
}

/// A user-visible message-passing port: a (NIC, index, session) triple
/// (spec.md §3 "Endpoint", GLOSSARY).
#[derive(Debug)]
pub struct Endpoint {
    pub iface: Arc<Iface>,
    pub index: u32,
    pub session_id: u32,
    pub owner_pid: u32,
    status: AtomicU8,
    status_lock: IrqMutex<()>,
    close_waiters: WaitQueue,

    pub sendq: SlotRing,
    pub recvq: SlotRing,
    pub expected: EventQueue,
    pub unexpected: EventQueue,

    regions: Mutex<std::collections::HashMap<u32, Arc<Region>>>,
    next_region_id: AtomicU32,

    /// Generational id allocator for outstanding pull handles; the handle
    /// payload itself lives in the pull engine, keyed by the same id
    /// (spec.md §3 "Slot table").
    pub pull_slots: SlotAllocator,
}

const MAX_USER_REGIONS: usize = 64;
const SENDQ_SLOTS: usize = 256;
const RECVQ_SLOTS: usize = 256;
const RING_SLOT_SIZE: usize = omx_abi::limits::PULL_REPLY_LENGTH_MAX;
const EVENTQ_DEPTH: usize = 256;
const MAX_PULL_HANDLES: usize = 256;

impl Endpoint {
    fn new(iface: Arc<Iface>, index: u32, owner_pid: u32) -> Self {
        let session_id = rand::thread_rng().gen::<u32>();
        Self {
            iface,
            index,
            session_id,
            owner_pid,
            status: AtomicU8::new(STATUS_INITIALIZING),
            status_lock: IrqMutex::new(()),
            close_waiters: WaitQueue::new(),
            sendq: SlotRing::new(SENDQ_SLOTS, RING_SLOT_SIZE),
            recvq: SlotRing::new(RECVQ_SLOTS, RING_SLOT_SIZE),
            expected: EventQueue::new(EVENTQ_DEPTH),
            unexpected: EventQueue::new(EVENTQ_DEPTH),
            regions: Mutex::new(std::collections::HashMap::new()),
            next_region_id: AtomicU32::new(0),
            pull_slots: SlotAllocator::new(MAX_PULL_HANDLES),
        }
    }

    pub fn status(&self) -> EndpointStatus {
        decode_status(self.status.load(Ordering::Acquire))
    }

    pub fn is_ok(&self) -> bool {
        self.status() == EndpointStatus::Ok
    }

    fn transition(&self, from: u8, to: u8) -> bool {
        let _guard = self.status_lock.lock();
        self.status
            .compare_exchange(from, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Completes the FREE → INITIALIZING → OK transition (spec.md §4.3
    /// `open`). Called once after construction.
    fn activate(&self) {
        self.transition(STATUS_INITIALIZING, STATUS_OK);
    }

    /// Transitions OK → CLOSING and wakes any blocked waiters (spec.md
    /// §4.3 `close`).
    pub fn begin_close(&self) -> bool {
        let transitioned = self.transition(STATUS_OK, STATUS_CLOSING);
        if transitioned {
            self.close_waiters.wake_all();
        }
        transitioned
    }

    pub fn wait_for_close(&self, timeout_ms: i64) -> bool {
        self.close_waiters
            .wait_event(timeout_ms, || self.status() == EndpointStatus::Closing)
    }

    pub fn create_region(&self, region: Region) -> Result<u32, EndpointError> {
        let mut regions = self.regions.lock().unwrap();
        if regions.len() >= MAX_USER_REGIONS {
            return Err(EndpointError::NoLocalResources);
        }
        let id = self.next_region_id.fetch_add(1, Ordering::Relaxed);
        regions.insert(id, Arc::new(region));
        Ok(id)
    }

    pub fn region(&self, id: u32) -> Option<Arc<Region>> {
        self.regions.lock().unwrap().get(&id).cloned()
    }

    pub fn destroy_region(&self, id: u32) -> bool {
        self.regions.lock().unwrap().remove(&id).is_some()
    }
}

/// Endpoint registry keyed by `(iface_index, endpoint_index)`, enforcing
/// at most one open endpoint per pair (spec.md §3 invariant).
pub struct EndpointTable {
    endpoints: Mutex<std::collections::HashMap<(u32, u32), Arc<Endpoint>>>,
    max_per_iface: usize,
}

impl EndpointTable {
    pub fn new(max_per_iface: usize) -> Self {
        Self {
            endpoints: Mutex::new(std::collections::HashMap::new()),
            max_per_iface,
        }
    }

    pub fn open(&self, iface: Arc<Iface>, ep_index: u32, owner_pid: u32) -> Result<Arc<Endpoint>, EndpointError> {
        if ep_index as usize >= self.max_per_iface {
            return Err(EndpointError::BadEndpoint);
        }
        let mut endpoints = self.endpoints.lock().unwrap();
        let key = (iface.index, ep_index);
        if endpoints.contains_key(&key) {
            return Err(EndpointError::Busy);
        }
        let endpoint = Arc::new(Endpoint::new(iface.clone(), ep_index, owner_pid));
        endpoint.activate();
        endpoints.insert(key, endpoint.clone());
        info!(iface = iface.index, endpoint = ep_index, session = endpoint.session_id, "endpoint opened");
        Ok(endpoint)
    }

    /// Softirq-safe lookup: returns the endpoint only if it is still OK,
    /// translating a missing or non-OK endpoint into the caller's NACK
    /// reason (spec.md §4.3 "Acquire by index").
    pub fn acquire(&self, iface_index: u32, ep_index: u32) -> Result<Arc<Endpoint>, EndpointError> {
        let endpoints = self.endpoints.lock().unwrap();
        match endpoints.get(&(iface_index, ep_index)) {
            Some(ep) if ep.is_ok() => Ok(ep.clone()),
            Some(_) => Err(EndpointError::EndpointClosed),
            None => Err(EndpointError::BadEndpoint),
        }
    }

    pub fn close(&self, iface_index: u32, ep_index: u32) -> bool {
        let mut endpoints = self.endpoints.lock().unwrap();
        match endpoints.remove(&(iface_index, ep_index)) {
            Some(ep) => {
                ep.begin_close();
                true
            }
            None => false,
        }
    }

    /// Force-closes every endpoint belonging to `iface_index` (spec.md
    /// §4.1: interface detach "invokes the endpoint close path" for each
    /// of its endpoints).
    pub fn close_all_for_iface(&self, iface_index: u32) -> usize {
        let mut endpoints = self.endpoints.lock().unwrap();
        let keys: Vec<_> = endpoints
            .keys()
            .filter(|(iface, _)| *iface == iface_index)
            .copied()
            .collect();
        for key in &keys {
            if let Some(ep) = endpoints.remove(key) {
                ep.begin_close();
            }
        }
        keys.len()
    }

    pub fn len(&self) -> usize {
        self.endpoints.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use omx_abi::MacAddr;

    #[test]
    fn open_enforces_single_open_per_iface_and_index() {
        let table = crate::iface::IfaceTable::new(4);
        let idx = table.attach(MacAddr::new([2, 0, 0, 0, 0, 1]), 1500, 1500).unwrap();
        let iface = table.find_by_index(idx).unwrap();
        let endpoints = EndpointTable::new(8);
        let ep = endpoints.open(iface.clone(), 0, 100).unwrap();
        assert_eq!(ep.status(), EndpointStatus::Ok);
        assert_eq!(endpoints.open(iface, 0, 100).unwrap_err(), EndpointError::Busy);
    }

    #[test]
    fn acquire_rejects_closed_endpoint() {
        let table = crate::iface::IfaceTable::new(4);
        let idx = table.attach(MacAddr::new([2, 0, 0, 0, 0, 1]), 1500, 1500).unwrap();
        let iface = table.find_by_index(idx).unwrap();
        let endpoints = EndpointTable::new(8);
        endpoints.open(iface.clone(), 0, 100).unwrap();
        endpoints.close(iface.index, 0);
        assert_eq!(
            endpoints.acquire(iface.index, 0).unwrap_err(),
            EndpointError::BadEndpoint
        );
    }

    #[test]
    fn create_region_enforces_capacity() {
        let table = crate::iface::IfaceTable::new(4);
        let idx = table.attach(MacAddr::new([2, 0, 0, 0, 0, 1]), 1500, 1500).unwrap();
        let iface = table.find_by_index(idx).unwrap();
        let endpoints = EndpointTable::new(8);
        let ep = endpoints.open(iface, 0, 100).unwrap();
        let region = omx_mm::Region::new(0, vec![omx_mm::Segment::new(0, 4096)]).unwrap();
        assert!(ep.create_region(region).is_ok());
    }
}
