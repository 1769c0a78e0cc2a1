//! Stand-in for the process address space a region's segments are pinned
//! against.
//!
//! The kernel module this reimplements calls `get_user_pages()` against
//! `current->mm` to turn a virtual address range into a pinned array of
//! `struct page`. There is no such thing to pin here, so `UserAddressSpace`
//! models only the part of that operation observable from the rest of the
//! transport engine: whether a chunk of pages can be pinned, and letting
//! tests inject a failure at a chosen page count to exercise the FAILED
//! transition in [`crate::region::Region::demand_pin_continue`].

use std::sync::atomic::{AtomicUsize, Ordering};

/// A process address space, simulated just enough to drive pinning.
///
/// Real `get_user_pages()` can fail (address not mapped, OOM, permission).
/// [`UserAddressSpace::fail_after_pages`] lets callers configure that for
/// tests without needing real page tables.
pub struct UserAddressSpace {
    fail_after_pages: Option<usize>,
    pinned_pages: AtomicUsize,
}

impl UserAddressSpace {
    pub const fn new() -> Self {
        Self {
            fail_after_pages: None,
            pinned_pages: AtomicUsize::new(0),
        }
    }

    /// Builder used by tests to force a pin failure once `limit` pages have
    /// been pinned across the lifetime of this address space.
    pub fn with_failure_after(limit: usize) -> Self {
        Self {
            fail_after_pages: Some(limit),
            pinned_pages: AtomicUsize::new(0),
        }
    }

    pub fn pinned_pages(&self) -> usize {
        self.pinned_pages.load(Ordering::Relaxed)
    }

    /// Attempts to pin `count` pages starting at `_virt_addr`. Succeeds
    /// unless a configured failure threshold has been reached.
    pub fn pin_pages(&self, _virt_addr: u64, count: usize) -> bool {
        let already = self.pinned_pages.load(Ordering::Relaxed);
        if let Some(limit) = self.fail_after_pages {
            if already >= limit {
                return false;
            }
        }
        self.pinned_pages.fetch_add(count, Ordering::Relaxed);
        true
    }

    pub fn unpin_pages(&self, count: usize) {
        self.pinned_pages.fetch_sub(count, Ordering::Relaxed);
    }
}

impl Default for UserAddressSpace {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pins_succeed_with_no_configured_limit() {
        let uas = UserAddressSpace::new();
        assert!(uas.pin_pages(0x1000, 8));
        assert_eq!(uas.pinned_pages(), 8);
    }

    #[test]
    fn pin_fails_past_configured_threshold() {
        let uas = UserAddressSpace::with_failure_after(16);
        assert!(uas.pin_pages(0x1000, 16));
        assert!(!uas.pin_pages(0x1000, 1));
    }
}
