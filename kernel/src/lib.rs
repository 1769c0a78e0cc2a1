//! The open-mx device driver: owns every shared table (interfaces, peers,
//! endpoints, pull handles, the loopback wire) for one running instance and
//! exposes the ioctl-equivalent surface user-space talks to (spec.md §6).
//!
//! There is no real character device here — [`device::OmxDevice`] and
//! [`device::OmxRawDevice`] are in-process handles a caller invokes
//! directly instead of through `ioctl(2)`, but the method boundary mirrors
//! the original one call for call.

pub mod device;

use std::sync::Arc;

use omx_abi::MacAddr;
use omx_core::config::ModuleParams;
use omx_core::cleanup::{CleanupTask, CleanupThread};
use omx_core::{EndpointTable, IfaceTable, PeerTable};
use omx_mm::UserAddressSpace;
use omx_net::{Dispatcher, LoopbackLink, PullTable};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DriverError {
    #[error("invalid module parameter")]
    InvalidArgument,
}

/// Validates module parameters the way `insmod` would reject a bad
/// `module_param` combination before the driver ever attaches an interface
/// (spec.md §6 "Module parameters").
fn validate_params(params: &ModuleParams) -> Result<(), DriverError> {
    if params.max_ifaces == 0 || params.max_endpoints_per_iface == 0 || params.max_peers == 0 {
        return Err(DriverError::InvalidArgument);
    }
    if params.pin_chunk_pages_min == 0 || params.pin_chunk_pages_min > params.pin_chunk_pages_max {
        return Err(DriverError::InvalidArgument);
    }
    Ok(())
}

/// One running instance of the transport engine: the tables every
/// `OmxDevice` call reaches into, plus the loopback wire they all share
/// (spec.md §2 "one process per node" simplified to one process, period).
pub struct Driver {
    pub params: ModuleParams,
    pub ifaces: Arc<IfaceTable>,
    pub peers: Arc<PeerTable>,
    pub endpoints: Arc<EndpointTable>,
    pub pulls: Arc<PullTable>,
    pub link: Arc<LoopbackLink>,
    pub address_space: UserAddressSpace,
    pub dispatcher: Dispatcher,
}

impl Driver {
    pub fn new(params: ModuleParams) -> Result<Self, DriverError> {
        validate_params(&params)?;

        let ifaces = Arc::new(IfaceTable::new(params.max_ifaces));
        let peers = Arc::new(PeerTable::new(params.max_peers));
        let endpoints = Arc::new(EndpointTable::new(params.max_endpoints_per_iface));
        let pulls = Arc::new(PullTable::new());
        let link = Arc::new(LoopbackLink::new());
        let dispatcher = Dispatcher::new(ifaces.clone(), peers.clone(), endpoints.clone(), pulls.clone(), link.clone());

        let driver = Self {
            params,
            ifaces,
            peers,
            endpoints,
            pulls,
            link,
            address_space: UserAddressSpace::new(),
            dispatcher,
        };

        for name in driver.params.ifnames.clone() {
            if let Err(err) = driver.attach_named(&name) {
                warn!(name, ?err, "failed to attach interface named in module parameters");
            }
        }
        Ok(driver)
    }

    /// Attaches a loopback-backed interface named `name`, deriving a
    /// locally-administered MAC from its bytes since there is no real NIC
    /// to query (spec.md §4.1: interfaces are identified by name at load
    /// time, by index afterward).
    fn attach_named(&self, name: &str) -> Result<u32, DriverError> {
        let mut octets = [0u8; 6];
        octets[0] = 0x02;
        for (i, b) in name.bytes().take(5).enumerate() {
            octets[i + 1] = b;
        }
        self.ifaces
            .attach(MacAddr::new(octets), 1500, 1500)
            .inspect(|&index| {
                if let Some(iface) = self.ifaces.find_by_index(index) {
                    iface.set_hostname(Some(name.to_string()));
                    self.peers.notify_iface_attach(&iface);
                }
            })
            .ok_or(DriverError::InvalidArgument)
    }

    /// Builds the periodic cleanup-thread task list (spec.md §5
    /// "Workqueue / cleanup thread"): RCU grace-period reclamation, deferred
    /// peer-reply processing, host-query rebroadcast, pull-handle
    /// retransmission, and timer-exited pull-handle reclamation.
    pub fn cleanup_tasks(self: &Arc<Self>) -> Vec<Arc<dyn CleanupTask>> {
        let this = self.clone();
        let drain_ifaces: Arc<dyn CleanupTask> = Arc::new(move || {
            this.ifaces.drain_retired();
        });

        let this = self.clone();
        let deferred_replies: Arc<dyn CleanupTask> = Arc::new(move || {
            for iface in this.ifaces.iter() {
                this.peers.process_deferred_replies(&iface);
            }
        });

        let this = self.clone();
        let pull_retransmit: Arc<dyn CleanupTask> = Arc::new(move || {
            let peers = this.peers.clone();
            let ifaces = this.ifaces.clone();
            // Resolves the sending MAC from whichever interface is attached
            // first; this simulation runs one loopback interface per
            // driver, so there is no ambiguity in practice.
            let timed_out = this.pulls.retransmit_tick(
                &this.link,
                move |peer_index| {
                    let peer = peers.lookup_by_index(peer_index)?;
                    let iface = ifaces.iter().into_iter().next()?;
                    Some((iface.mac, peer.mac))
                },
                std::time::Instant::now(),
            );
            for handle in timed_out {
                if let Ok(ep) = this.endpoints.acquire(handle.iface_index, handle.owner_endpoint_index) {
                    let mut event = omx_abi::event::Event::new(omx_abi::event::EventType::PullDone);
                    event.pull_status = handle.status();
                    ep.expected.notify_expected(event);
                }
            }
        });

        let this = self.clone();
        let sweep_done: Arc<dyn CleanupTask> = Arc::new(move || {
            this.pulls.sweep_timer_exited();
        });

        vec![drain_ifaces, deferred_replies, pull_retransmit, sweep_done]
    }

    pub fn spawn_cleanup_thread(self: &Arc<Self>) -> CleanupThread {
        info!("cleanup thread started");
        CleanupThread::spawn(self.cleanup_tasks(), omx_abi::limits::PULL_RETRANSMIT_TIMEOUT)
    }
}
