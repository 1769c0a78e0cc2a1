//! The ioctl-equivalent surface (spec.md §6): every public method here
//! mirrors one call a user-space library would issue against the real
//! character device. [`OmxDevice`] covers the per-board/per-endpoint
//! control and fast-path surface; [`OmxRawDevice`] is the raw, one-process-
//! per-interface escape hatch (spec.md §4.10).
//!
//! `SEND_CONNECT_REQUEST`/`SEND_CONNECT_REPLY`, `SEND_MEDIUMSQ_FRAG` as a
//! distinct op, and `BENCH` are intentionally absent here, matching
//! [`omx_net::recv::Dispatcher`]'s own choice to leave connect-frame
//! handling to the peer table's deferred-processing path rather than
//! building a full handshake state machine.

use std::sync::Arc;

use omx_abi::event::Event;
use omx_abi::{MacAddr, OmxError};
use omx_core::config::IfaceCounters;
use omx_core::{Endpoint, EndpointError, Peer};
use omx_mm::{Region, Segment};
use omx_net::{PullHandle, Sender};

use crate::Driver;

fn map_endpoint_err(err: EndpointError) -> OmxError {
    match err {
        EndpointError::Busy => OmxError::Busy,
        EndpointError::BadEndpoint => OmxError::BadEndpoint,
        EndpointError::EndpointClosed => OmxError::EndpointClosed,
        EndpointError::NoLocalResources => OmxError::NoLocalResources,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoardInfo {
    pub index: u32,
    pub addr: MacAddr,
    pub mtu: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointInfo {
    pub iface_index: u32,
    pub endpoint_index: u32,
    pub owner_pid: u32,
    pub closed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub index: u32,
    pub addr: MacAddr,
    pub hostname: Option<String>,
}

fn peer_info(peer: Arc<Peer>) -> PeerInfo {
    PeerInfo {
        index: peer.index,
        addr: peer.mac,
        hostname: peer.hostname(),
    }
}

/// Bound to one running [`Driver`]; every call reaches into its tables the
/// way the kernel module's `ioctl` handler reaches into the device private
/// data attached at `open()` time (spec.md §6).
pub struct OmxDevice {
    driver: Arc<Driver>,
}

impl OmxDevice {
    pub fn new(driver: Arc<Driver>) -> Self {
        Self { driver }
    }

    pub fn board_count(&self) -> u32 {
        self.driver.ifaces.len() as u32
    }

    pub fn board_info(&self, iface_index: u32) -> Option<BoardInfo> {
        let iface = self.driver.ifaces.find_by_index(iface_index)?;
        Some(BoardInfo {
            index: iface.index,
            addr: iface.mac,
            mtu: iface.mtu,
        })
    }

    pub fn board_hostname(&self, iface_index: u32) -> Option<String> {
        self.driver.ifaces.find_by_index(iface_index)?.hostname()
    }

    pub fn endpoint_info(&self, iface_index: u32, endpoint_index: u32) -> Result<EndpointInfo, OmxError> {
        match self.driver.endpoints.acquire(iface_index, endpoint_index) {
            Ok(ep) => Ok(EndpointInfo {
                iface_index,
                endpoint_index,
                owner_pid: ep.owner_pid,
                closed: false,
            }),
            Err(EndpointError::EndpointClosed) => Ok(EndpointInfo {
                iface_index,
                endpoint_index,
                owner_pid: 0,
                closed: true,
            }),
            Err(err) => Err(map_endpoint_err(err)),
        }
    }

    pub fn counters(&self, iface_index: u32) -> Result<IfaceCounters, OmxError> {
        self.driver
            .ifaces
            .find_by_index(iface_index)
            .map(|iface| iface.counters())
            .ok_or(OmxError::NoDevice)
    }

    pub fn set_hostname(&self, iface_index: u32, hostname: Option<String>) -> Result<(), OmxError> {
        let iface = self.driver.ifaces.find_by_index(iface_index).ok_or(OmxError::NoDevice)?;
        iface.set_hostname(hostname);
        Ok(())
    }

    pub fn peer_add(&self, mac: MacAddr, hostname: Option<String>) -> Result<u32, OmxError> {
        self.driver.peers.add(mac, hostname).map(|p| p.index).ok_or(OmxError::PeerTableFull)
    }

    pub fn peer_from_index(&self, peer_index: u32) -> Option<PeerInfo> {
        self.driver.peers.lookup_by_index(peer_index).map(peer_info)
    }

    pub fn peer_from_addr(&self, mac: MacAddr) -> Option<PeerInfo> {
        self.driver.peers.lookup_by_addr(mac).map(peer_info)
    }

    pub fn peer_from_hostname(&self, hostname: &str) -> Option<PeerInfo> {
        self.driver.peers.lookup_by_hostname(hostname).map(peer_info)
    }

    pub fn peer_table_clear(&self) {
        self.driver.peers.clear();
    }

    pub fn open_endpoint(&self, iface_index: u32, endpoint_index: u32, owner_pid: u32) -> Result<Arc<Endpoint>, OmxError> {
        let iface = self.driver.ifaces.find_by_index(iface_index).ok_or(OmxError::NoDevice)?;
        self.driver.endpoints.open(iface, endpoint_index, owner_pid).map_err(map_endpoint_err)
    }

    /// Closing an endpoint unconditionally cancels its outstanding pulls
    /// before releasing the endpoint slot itself (spec.md §4.8, §5).
    pub fn close_endpoint(&self, iface_index: u32, endpoint_index: u32) -> bool {
        self.driver.pulls.cancel_all_for_endpoint(iface_index, endpoint_index);
        self.driver.endpoints.close(iface_index, endpoint_index)
    }

    fn sender(&self) -> Sender<'_> {
        Sender::new(&self.driver.link)
    }

    fn resolve_peer(&self, peer_index: u32) -> Result<Arc<Peer>, OmxError> {
        self.driver.peers.lookup_by_index(peer_index).ok_or(OmxError::RemoteEndpointBadId)
    }

    pub fn send_tiny(
        &self,
        ep: &Endpoint,
        dst_peer_index: u32,
        dst_endpoint: u8,
        match_info: u64,
        lib_seqnum: u32,
        data: &[u8],
    ) -> Result<(), OmxError> {
        let peer = self.resolve_peer(dst_peer_index)?;
        self.sender().send_tiny(ep, &peer, dst_endpoint, match_info, lib_seqnum, data)
    }

    pub fn send_small(
        &self,
        ep: &Endpoint,
        dst_peer_index: u32,
        dst_endpoint: u8,
        match_info: u64,
        lib_seqnum: u32,
        payload: &[u8],
    ) -> Result<(), OmxError> {
        let peer = self.resolve_peer(dst_peer_index)?;
        self.sender().send_small(ep, &peer, dst_endpoint, match_info, lib_seqnum, payload);
        Ok(())
    }

    /// Fragments `payload` at the module's `skbcopy` threshold, matching the
    /// teacher's own chunking knob rather than a fixed MTU (spec.md §6
    /// `skbcopy`, §4.6 MEDIUMVA).
    pub fn send_mediumva(
        &self,
        ep: &Endpoint,
        dst_peer_index: u32,
        dst_endpoint: u8,
        match_info: u64,
        lib_seqnum: u32,
        payload: &[u8],
    ) -> Result<(), OmxError> {
        let peer = self.resolve_peer(dst_peer_index)?;
        let frag_size = self.driver.params.skb_copy_threshold.max(1);
        self.sender().send_medium(ep, &peer, dst_endpoint, match_info, lib_seqnum, payload, frag_size);
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn send_rndv(
        &self,
        ep: &Endpoint,
        dst_peer_index: u32,
        dst_endpoint: u8,
        match_info: u64,
        lib_seqnum: u32,
        msg_length: u32,
        region_id: u32,
    ) -> Result<(), OmxError> {
        let peer = self.resolve_peer(dst_peer_index)?;
        self.sender().send_rndv(ep, &peer, dst_endpoint, match_info, lib_seqnum, msg_length, region_id);
        Ok(())
    }

    pub fn send_notify(
        &self,
        ep: &Endpoint,
        dst_peer_index: u32,
        dst_endpoint: u8,
        total_length: u32,
        lib_seqnum: u32,
        pulled_rdma_id: u32,
    ) -> Result<(), OmxError> {
        let peer = self.resolve_peer(dst_peer_index)?;
        self.sender().send_notify(ep, &peer, dst_endpoint, total_length, lib_seqnum, pulled_rdma_id);
        Ok(())
    }

    pub fn send_liback(
        &self,
        ep: &Endpoint,
        dst_peer_index: u32,
        lib_seqnum: u32,
        acknum: u32,
        send_seq: u32,
    ) -> Result<(), OmxError> {
        let peer = self.resolve_peer(dst_peer_index)?;
        self.sender().send_liback(ep, &peer, lib_seqnum, acknum, send_seq);
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn pull(
        &self,
        ep: &Endpoint,
        local_region: Arc<Region>,
        local_offset: u64,
        length: u64,
        remote_region_id: u32,
        remote_offset: u64,
        dst_peer_index: u32,
        target_endpoint: u8,
        target_session: u32,
    ) -> Result<Arc<PullHandle>, OmxError> {
        let peer = self.resolve_peer(dst_peer_index)?;
        omx_net::pull::ioctl_pull(
            &self.driver.pulls,
            &self.driver.link,
            &ep.pull_slots,
            local_region,
            local_offset,
            length,
            remote_region_id,
            remote_offset,
            ep.iface.index,
            ep.index,
            ep.index as u8,
            target_endpoint,
            target_session,
            peer.index,
            ep.iface.mac,
            peer.mac,
        )
        .ok_or(OmxError::NoSystemResources)
    }

    /// Registers `segments` as a new user region, pinning it immediately
    /// unless the module was loaded with `demandpin` set (spec.md §6
    /// `demandpin`, §4.7 `CREATE_USER_REGION`).
    pub fn create_user_region(&self, ep: &Endpoint, id: u32, segments: Vec<Segment>) -> Result<u32, OmxError> {
        let region = Region::new(id, segments).map_err(|_| OmxError::InvalidArgument)?;
        if !self.driver.params.demand_pin {
            region.pin_all(&self.driver.address_space).map_err(|_| OmxError::RegionPinningFailed)?;
        }
        ep.create_region(region).map_err(map_endpoint_err)
    }

    pub fn destroy_user_region(&self, ep: &Endpoint, id: u32) -> bool {
        ep.destroy_region(id)
    }

    /// Drains the next completion, preferring `expected` the way the real
    /// ioctl prefers a send/pull completion over an unmatched receive when
    /// both are ready. This simulation's event queues are polled rather
    /// than slept on, so there is no blocking to do here (spec.md §4.5,
    /// §6 `WAIT_EVENT`).
    pub fn wait_event(&self, ep: &Endpoint) -> Option<Event> {
        ep.expected.consume_next().or_else(|| ep.unexpected.consume_next())
    }

    /// No-op: nothing blocks inside [`OmxDevice::wait_event`] for this to
    /// interrupt. Kept as a distinct call for symmetry with the ioctl it
    /// stands in for.
    pub fn wakeup(&self, _ep: &Endpoint) {}

    pub fn release_exp_slot(&self, ep: &Endpoint, slot: u32) {
        ep.sendq.free_slot(slot as usize);
    }

    pub fn release_unexp_slot(&self, ep: &Endpoint, slot: u32) {
        ep.recvq.free_slot(slot as usize);
    }
}

/// Raw, one-process-per-interface fast path (spec.md §4.10): no endpoint,
/// no events, just frames in and out.
pub struct OmxRawDevice {
    driver: Arc<Driver>,
    raw: omx_net::RawEndpoint,
}

impl OmxRawDevice {
    pub fn open(driver: Arc<Driver>, iface_index: u32) -> Result<Self, OmxError> {
        let iface = driver.ifaces.find_by_index(iface_index).ok_or(OmxError::NoDevice)?;
        let raw = omx_net::RawEndpoint::open(iface, driver.link.clone()).map_err(|_| OmxError::Busy)?;
        Ok(Self { driver, raw })
    }

    pub fn send(&self, dst_mac: MacAddr, payload: Vec<u8>) {
        self.raw.send(dst_mac, payload);
    }

    pub fn poll(&self) -> Vec<Vec<u8>> {
        self.raw.poll(&self.driver.dispatcher)
    }
}
