//! Interface registry: attached network interfaces and their per-NIC state
//! (spec.md §4.1).
//!
//! Split on the control plane / data plane line the way the teacher's
//! `NetDeviceRegistry`/`DeviceHandle` pair is split: [`IfaceTable`] takes a
//! coarse lock only for attach/detach/enumerate; everyday lookups go
//! through [`omx_sync::RcuTable`] and return an `Arc<Iface>` a caller can
//! use without holding any registry lock.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use omx_abi::MacAddr;
use omx_sync::RcuTable;
use tracing::{info, warn};

use crate::config::IfaceCounters;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IfaceStatus {
    Ok,
    Closing,
}

/// An attached NIC (spec.md §3 "Interface").
#[derive(Debug)]
pub struct Iface {
    pub index: u32,
    pub mac: MacAddr,
    pub mtu: u16,
    hostname: Mutex<Option<String>>,
    status: AtomicU8,
    counters: Mutex<IfaceCounters>,
    /// Reverse-peer-index array: for each known peer, the index by which
    /// that peer knows us (spec.md §4.2 "Reverse index").
    reverse_peer_index: Mutex<std::collections::HashMap<u32, u32>>,
    raw_endpoint_taken: AtomicU8,
}

const STATUS_OK: u8 = 0;
const STATUS_CLOSING: u8 = 1;

impl Iface {
    fn new(index: u32, mac: MacAddr, mtu: u16) -> Self {
        Self {
            index,
            mac,
            mtu,
            hostname: Mutex::new(None),
            status: AtomicU8::new(STATUS_OK),
            counters: Mutex::new(IfaceCounters::default()),
            reverse_peer_index: Mutex::new(std::collections::HashMap::new()),
            raw_endpoint_taken: AtomicU8::new(0),
        }
    }

    pub fn status(&self) -> IfaceStatus {
        match self.status.load(Ordering::Acquire) {
            STATUS_CLOSING => IfaceStatus::Closing,
            _ => IfaceStatus::Ok,
        }
    }

    pub fn hostname(&self) -> Option<String> {
        self.hostname.lock().unwrap().clone()
    }

    pub fn set_hostname(&self, name: Option<String>) {
        *self.hostname.lock().unwrap() = name;
    }

    pub fn counters(&self) -> IfaceCounters {
        *self.counters.lock().unwrap()
    }

    pub fn with_counters_mut<F: FnOnce(&mut IfaceCounters)>(&self, f: F) {
        f(&mut self.counters.lock().unwrap());
    }

    /// Records the index by which `peer_index` (local to us) knows us,
    /// learned from an incoming frame's `dst_src_peer_index` field.
    pub fn record_reverse_peer_index(&self, peer_index: u32, remote_view_of_us: u32) {
        self.reverse_peer_index
            .lock()
            .unwrap()
            .insert(peer_index, remote_view_of_us);
    }

    pub fn reverse_peer_index(&self, peer_index: u32) -> Option<u32> {
        self.reverse_peer_index.lock().unwrap().get(&peer_index).copied()
    }

    /// Exclusive raw-endpoint slot (spec.md §4.10: "one process per
    /// interface"). Returns `true` if the slot was free and is now taken.
    pub fn try_take_raw_endpoint(&self) -> bool {
        self.raw_endpoint_taken
            .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn release_raw_endpoint(&self) {
        self.raw_endpoint_taken.store(0, Ordering::Release);
    }
}

/// Registry of attached interfaces. Mutation (attach/detach) is serialized
/// by a coarse mutex; lookups go through the lock-free RCU table.
pub struct IfaceTable {
    table: RcuTable<u32, Iface>,
    mutation_lock: Mutex<()>,
    next_index: Mutex<u32>,
    max_ifaces: usize,
}

impl IfaceTable {
    pub fn new(max_ifaces: usize) -> Self {
        Self {
            table: RcuTable::new(),
            mutation_lock: Mutex::new(()),
            next_index: Mutex::new(0),
            max_ifaces,
        }
    }

    /// Attaches a new interface. Refuses non-Ethernet MTUs implicitly by
    /// requiring `mtu >= min_mtu`; warns (but proceeds) when `mtu` is small
    /// or the table is nearly full, matching spec.md §4.1's "reports
    /// warnings ... but proceeds."
    pub fn attach(&self, mac: MacAddr, mtu: u16, min_mtu: u16) -> Option<u32> {
        let _guard = self.mutation_lock.lock().unwrap();
        if self.table.len() >= self.max_ifaces {
            warn!(max = self.max_ifaces, "interface table full, refusing attach");
            return None;
        }
        if mtu < min_mtu {
            warn!(mtu, min_mtu, "attaching interface with MTU below the recommended minimum");
        }
        let mut next = self.next_index.lock().unwrap();
        let index = *next;
        *next += 1;
        drop(next);

        let iface = Arc::new(Iface::new(index, mac, mtu));
        self.table.insert(index, iface);
        info!(index, %mac, mtu, "interface attached");
        Some(index)
    }

    /// Marks `index` CLOSING and removes it from the table. The caller is
    /// responsible for walking the endpoint table and force-closing
    /// endpoints that belonged to this interface before or after this call
    /// (spec.md §4.1); `IfaceTable` itself only owns interface identity.
    pub fn detach(&self, index: u32) -> bool {
        let _guard = self.mutation_lock.lock().unwrap();
        let Some(iface) = self.table.get(&index) else {
            return false;
        };
        iface.status.store(STATUS_CLOSING, Ordering::Release);
        self.table.remove(&index);
        info!(index, "interface detached");
        true
    }

    pub fn find_by_index(&self, index: u32) -> Option<Arc<Iface>> {
        self.table.get(&index)
    }

    pub fn find_by_addr(&self, addr: MacAddr) -> Option<Arc<Iface>> {
        self.table.iter_snapshot().into_iter().find(|i| i.mac == addr)
    }

    pub fn iter(&self) -> Vec<Arc<Iface>> {
        self.table.iter_snapshot()
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Drains interfaces retired by a prior detach; called by the cleanup
    /// thread once past the grace period during which a softirq reader
    /// might still hold a clone.
    pub fn drain_retired(&self) -> usize {
        self.table.drain_retired()
    }
}
