//! Peer table: MAC ↔ index ↔ hostname mapping with reverse-index learning
//! and the host-query/reply protocol (spec.md §4.2).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Instant;

use omx_abi::MacAddr;
use tracing::debug;

use crate::iface::Iface;

/// An (address → index) entry (spec.md §3 "Peer").
pub struct Peer {
    pub mac: MacAddr,
    pub index: u32,
    hostname: Mutex<Option<String>>,
    /// Non-empty iff this peer is one of our own local interfaces.
    local_iface: Mutex<Option<Weak<Iface>>>,
    on_query_list: AtomicBool,
}

impl Peer {
    fn new(mac: MacAddr, index: u32) -> Self {
        Self {
            mac,
            index,
            hostname: Mutex::new(None),
            local_iface: Mutex::new(None),
            on_query_list: AtomicBool::new(false),
        }
    }

    pub fn hostname(&self) -> Option<String> {
        self.hostname.lock().unwrap().clone()
    }

    pub fn is_local(&self) -> bool {
        self.local_iface.lock().unwrap().is_some()
    }

    pub fn local_iface(&self) -> Option<Arc<Iface>> {
        self.local_iface.lock().unwrap().as_ref().and_then(Weak::upgrade)
    }
}

struct HostQueryEntry {
    peer_index: u32,
    magic: u32,
    last_sent: Option<Instant>,
}

struct HostReplyEntry {
    peer_index: u32,
    hostname: String,
    remote_view_of_us: u32,
}

/// Dual-indexed peer table: dense array by index, 256-bucket hash by
/// folded MAC (spec.md §4.2).
pub struct PeerTable {
    by_index: Mutex<Vec<Option<Arc<Peer>>>>,
    by_hash: Mutex<[Vec<Arc<Peer>>; 256]>,
    max_peers: usize,
    /// Sticky "full" flag: set once capacity is exhausted, cleared only by
    /// [`PeerTable::clear`] (spec.md §9 open question: preserve literally).
    full: AtomicBool,
    next_magic: AtomicU32,
    host_query_list: Mutex<VecDeque<HostQueryEntry>>,
    host_reply_list: Mutex<VecDeque<HostReplyEntry>>,
}

const HOST_QUERY_INTERVAL: std::time::Duration = omx_abi::limits::HOST_QUERY_INTERVAL;

impl PeerTable {
    pub fn new(max_peers: usize) -> Self {
        let mut slots = Vec::with_capacity(max_peers);
        slots.resize_with(max_peers, || None);
        Self {
            by_index: Mutex::new(slots),
            by_hash: Mutex::new(std::array::from_fn(|_| Vec::new())),
            max_peers,
            full: AtomicBool::new(false),
            next_magic: AtomicU32::new(1),
            host_query_list: Mutex::new(VecDeque::new()),
            host_reply_list: Mutex::new(VecDeque::new()),
        }
    }

    pub fn is_full(&self) -> bool {
        self.full.load(Ordering::Acquire)
    }

    /// Clears the whole table, including the sticky "full" flag.
    pub fn clear(&self) {
        let mut idx = self.by_index.lock().unwrap();
        idx.iter_mut().for_each(|s| *s = None);
        let mut hash = self.by_hash.lock().unwrap();
        hash.iter_mut().for_each(|b| b.clear());
        self.full.store(false, Ordering::Release);
        self.host_query_list.lock().unwrap().clear();
        self.host_reply_list.lock().unwrap().clear();
    }

    fn allocate_index(&self, idx_table: &mut [Option<Arc<Peer>>]) -> Option<u32> {
        idx_table
            .iter()
            .position(|s| s.is_none())
            .map(|p| p as u32)
    }

    fn insert_locked(
        &self,
        idx_table: &mut Vec<Option<Arc<Peer>>>,
        hash_table: &mut [Vec<Arc<Peer>>; 256],
        mac: MacAddr,
        hostname: Option<String>,
    ) -> Option<Arc<Peer>> {
        let Some(index) = self.allocate_index(idx_table) else {
            self.full.store(true, Ordering::Release);
            return None;
        };
        let peer = Arc::new(Peer::new(mac, index));
        *peer.hostname.lock().unwrap() = hostname;
        idx_table[index as usize] = Some(peer.clone());
        hash_table[mac.hash_fold() as usize].push(peer.clone());
        Some(peer)
    }

    /// Inserts or renames a peer by address. If present, `hostname` (when
    /// `Some`) replaces the old one; absent→present removes the entry from
    /// the host-query list, present→absent appends it and re-arms the
    /// query timer if the list was empty (spec.md §4.2 `add`).
    pub fn add(&self, mac: MacAddr, hostname: Option<String>) -> Option<Arc<Peer>> {
        let mut idx_table = self.by_index.lock().unwrap();
        let mut hash_table = self.by_hash.lock().unwrap();

        if let Some(existing) = Self::find_by_addr_locked(&hash_table, mac) {
            let mut current = existing.hostname.lock().unwrap();
            let had_name = current.is_some();
            let mut needs_query = false;
            match hostname {
                Some(name) => {
                    *current = Some(name);
                    if !had_name {
                        existing.on_query_list.store(false, Ordering::Release);
                    }
                }
                None => {
                    if had_name {
                        *current = None;
                        if existing
                            .on_query_list
                            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                            .is_ok()
                        {
                            needs_query = true;
                        }
                    }
                }
            }
            drop(current);
            if needs_query {
                self.queue_host_query(existing.index);
            }
            return Some(existing);
        }

        let was_empty_query_needed = hostname.is_none();
        let peer = self.insert_locked(&mut idx_table, &mut hash_table, mac, hostname)?;
        if was_empty_query_needed {
            peer.on_query_list.store(true, Ordering::Release);
            drop(idx_table);
            drop(hash_table);
            self.queue_host_query(peer.index);
        }
        Some(peer)
    }

    fn queue_host_query(&self, peer_index: u32) {
        let magic = self.next_magic.fetch_add(1, Ordering::Relaxed);
        self.host_query_list.lock().unwrap().push_back(HostQueryEntry {
            peer_index,
            magic,
            last_sent: None,
        });
    }

    /// Installs (or replaces) the peer entry for a just-attached local
    /// interface, transferring the hostname of a pre-existing remote entry
    /// for the same address if one existed (spec.md §4.2
    /// `notify_iface_attach`).
    pub fn notify_iface_attach(&self, iface: &Arc<Iface>) -> Arc<Peer> {
        let mut idx_table = self.by_index.lock().unwrap();
        let mut hash_table = self.by_hash.lock().unwrap();

        let old_hostname = Self::find_by_addr_locked(&hash_table, iface.mac)
            .and_then(|p| p.hostname());
        if let Some(old) = Self::find_by_addr_locked(&hash_table, iface.mac) {
            Self::remove_locked(&mut idx_table, &mut hash_table, old.index);
        }

        let Some(index) = self.allocate_index(&mut idx_table) else {
            self.full.store(true, Ordering::Release);
            // Table is full; synthesize a peer with no stable index rather
            // than panicking. The caller observes `is_full()` separately.
            return Arc::new(Peer::new(iface.mac, u32::MAX));
        };
        let peer = Arc::new(Peer::new(iface.mac, index));
        *peer.hostname.lock().unwrap() = old_hostname;
        *peer.local_iface.lock().unwrap() = Some(Arc::downgrade(iface));
        idx_table[index as usize] = Some(peer.clone());
        hash_table[iface.mac.hash_fold() as usize].push(peer.clone());
        debug!(iface = iface.index, peer_index = index, "local interface registered as peer");
        peer
    }

    pub fn notify_iface_detach(&self, iface: &Iface) {
        let mut idx_table = self.by_index.lock().unwrap();
        let mut hash_table = self.by_hash.lock().unwrap();
        if let Some(peer) = Self::find_by_addr_locked(&hash_table, iface.mac) {
            Self::remove_locked(&mut idx_table, &mut hash_table, peer.index);
        }
    }

    fn remove_locked(
        idx_table: &mut [Option<Arc<Peer>>],
        hash_table: &mut [Vec<Arc<Peer>>; 256],
        index: u32,
    ) {
        if let Some(slot) = idx_table.get_mut(index as usize) {
            if let Some(peer) = slot.take() {
                let bucket = &mut hash_table[peer.mac.hash_fold() as usize];
                bucket.retain(|p| p.index != index);
            }
        }
    }

    fn find_by_addr_locked(hash_table: &[Vec<Arc<Peer>>; 256], mac: MacAddr) -> Option<Arc<Peer>> {
        hash_table[mac.hash_fold() as usize]
            .iter()
            .find(|p| p.mac == mac)
            .cloned()
    }

    pub fn lookup_by_index(&self, index: u32) -> Option<Arc<Peer>> {
        self.by_index.lock().unwrap().get(index as usize)?.clone()
    }

    pub fn lookup_by_addr(&self, mac: MacAddr) -> Option<Arc<Peer>> {
        let hash_table = self.by_hash.lock().unwrap();
        Self::find_by_addr_locked(&hash_table, mac)
    }

    pub fn lookup_by_hostname(&self, hostname: &str) -> Option<Arc<Peer>> {
        self.by_index
            .lock()
            .unwrap()
            .iter()
            .flatten()
            .find(|p| p.hostname().as_deref() == Some(hostname))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.by_index.lock().unwrap().iter().filter(|s| s.is_some()).count()
    }

    pub fn capacity(&self) -> usize {
        self.max_peers
    }

    /// Queues an observed `HOST_QUERY` for regular-context processing
    /// (spec.md §4.2: "arrive on the softirq; queued ... processed in a
    /// regular context").
    pub fn on_host_query_received(&self, peer_index: u32, magic: u32) {
        self.host_query_list.lock().unwrap().push_back(HostQueryEntry {
            peer_index,
            magic,
            last_sent: None,
        });
    }

    pub fn on_host_reply_received(&self, peer_index: u32, hostname: String, remote_view_of_us: u32) {
        self.host_reply_list.lock().unwrap().push_back(HostReplyEntry {
            peer_index,
            hostname,
            remote_view_of_us,
        });
    }

    /// Drains the deferred reply list, applying each learned hostname and
    /// reverse-index and recording it against the owning interface. Called
    /// from the cleanup thread (regular context, may take the table mutex).
    pub fn process_deferred_replies(&self, local_iface: &Iface) -> usize {
        let mut reply_list = self.host_reply_list.lock().unwrap();
        let mut n = 0;
        while let Some(entry) = reply_list.pop_front() {
            if let Some(peer) = self.lookup_by_index(entry.peer_index) {
                *peer.hostname.lock().unwrap() = Some(entry.hostname);
                peer.on_query_list.store(false, Ordering::Release);
            }
            local_iface.record_reverse_peer_index(entry.peer_index, entry.remote_view_of_us);
            self.host_query_list
                .lock()
                .unwrap()
                .retain(|q| q.peer_index != entry.peer_index);
            n += 1;
        }
        n
    }

    /// Returns `(peer_index, magic)` for entries that either have never
    /// been sent or were last sent more than [`HOST_QUERY_INTERVAL`] ago,
    /// and marks them as sent at `now` (spec.md §4.2: "broadcasts ... every
    /// 5 seconds until the target replies").
    pub fn peers_due_for_query(&self, now: Instant) -> Vec<(u32, u32)> {
        let mut list = self.host_query_list.lock().unwrap();
        let mut due = Vec::new();
        for entry in list.iter_mut() {
            let is_due = match entry.last_sent {
                None => true,
                Some(last) => now.duration_since(last) >= HOST_QUERY_INTERVAL,
            };
            if is_due {
                entry.last_sent = Some(now);
                due.push((entry.peer_index, entry.magic));
            }
        }
        due
    }
}
