//! Shared harness for the integration tests under `tests/`: every scenario
//! needs a running [`Driver`] with one loopback board attached and the
//! "self" peer resolved, so that setup lives here once instead of being
//! copy-pasted into every scenario file.

use std::sync::Arc;

use omx_core::config::ModuleParams;
use omx_core::Peer;
use omx_kernel::device::OmxDevice;
use omx_kernel::Driver;

/// One attached loopback board plus the device surface bound to it.
pub struct Harness {
    pub driver: Arc<Driver>,
    pub device: OmxDevice,
}

impl Harness {
    pub fn new() -> Self {
        let mut params = ModuleParams::default();
        params.ifnames = vec!["mx0".to_string()];
        Self::with_params(params)
    }

    pub fn with_params(mut params: ModuleParams) -> Self {
        if params.ifnames.is_empty() {
            params.ifnames = vec!["mx0".to_string()];
        }
        let driver = Arc::new(Driver::new(params).expect("driver starts with one board"));
        let device = OmxDevice::new(driver.clone());
        Self { driver, device }
    }

    /// The board's own peer entry: sending to this index loops a frame back
    /// on the same interface instead of needing a second simulated host.
    pub fn self_peer(&self) -> Arc<Peer> {
        let iface = self.driver.ifaces.find_by_index(0).expect("board 0 attached");
        self.driver.peers.notify_iface_attach(&iface)
    }

    /// Drains the link and dispatches every frame currently queued,
    /// repeating until the link goes quiet or `max_rounds` is hit. Pull
    /// replies and block re-requests are generated mid-dispatch, so more
    /// than one round is usually needed to drive a transfer to completion.
    pub fn pump(&self, max_rounds: usize) {
        for _ in 0..max_rounds {
            if self.driver.link.is_empty() {
                return;
            }
            self.driver.dispatcher.poll_and_dispatch(0);
        }
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}
