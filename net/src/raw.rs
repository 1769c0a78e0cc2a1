//! Raw endpoint: a single process per interface gets an unmediated
//! send/receive handle below the message-passing layer (spec.md §4.10).

use std::sync::Arc;

use omx_abi::limits::ETHERTYPE_OMX;
use omx_abi::wire::{EthHeader, Frame, PacketBody};
use omx_abi::MacAddr;
use omx_core::Iface;

use crate::link::LoopbackLink;
use crate::recv::Dispatcher;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RawError {
    #[error("raw endpoint already open on this interface")]
    Busy,
}

/// Holds the interface's exclusive raw slot for its lifetime, releasing it
/// on drop (spec.md §4.10 "one process per interface").
#[derive(Debug)]
pub struct RawEndpoint {
    iface: Arc<Iface>,
    link: Arc<LoopbackLink>,
}

impl RawEndpoint {
    pub fn open(iface: Arc<Iface>, link: Arc<LoopbackLink>) -> Result<Self, RawError> {
        if !iface.try_take_raw_endpoint() {
            return Err(RawError::Busy);
        }
        Ok(Self { iface, link })
    }

    pub fn send(&self, dst_mac: MacAddr, payload: Vec<u8>) {
        let frame = Frame::new(
            EthHeader {
                dst: dst_mac,
                src: self.iface.mac,
                ethertype: ETHERTYPE_OMX,
            },
            0,
            PacketBody::Raw { payload },
        );
        self.iface.with_counters_mut(|c| c.frames_sent += 1);
        self.link.transmit(self.iface.index, frame.encode());
    }

    /// Drains raw frames the dispatcher has queued for this interface since
    /// the last poll.
    pub fn poll(&self, dispatcher: &Dispatcher) -> Vec<Vec<u8>> {
        dispatcher.take_raw(self.iface.index)
    }
}

impl Drop for RawEndpoint {
    fn drop(&mut self) {
        self.iface.release_raw_endpoint();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use omx_core::IfaceTable;

    #[test]
    fn open_is_exclusive_and_releases_on_drop() {
        let ifaces = IfaceTable::new(4);
        let idx = ifaces.attach(MacAddr::new([2, 0, 0, 0, 0, 9]), 1500, 1500).unwrap();
        let iface = ifaces.find_by_index(idx).unwrap();
        let link = Arc::new(LoopbackLink::new());

        let first = RawEndpoint::open(iface.clone(), link.clone()).unwrap();
        assert_eq!(RawEndpoint::open(iface.clone(), link.clone()).unwrap_err(), RawError::Busy);
        drop(first);
        assert!(RawEndpoint::open(iface, link).is_ok());
    }

    #[test]
    fn send_then_dispatcher_delivers_to_poll() {
        use crate::pull::PullTable;
        use omx_core::{EndpointTable, PeerTable};

        let ifaces = Arc::new(IfaceTable::new(4));
        let idx = ifaces.attach(MacAddr::new([2, 0, 0, 0, 0, 8]), 1500, 1500).unwrap();
        let iface = ifaces.find_by_index(idx).unwrap();
        let link = Arc::new(LoopbackLink::new());
        let peers = Arc::new(PeerTable::new(8));
        let endpoints = Arc::new(EndpointTable::new(8));
        let pulls = Arc::new(PullTable::new());

        let raw = RawEndpoint::open(iface.clone(), link.clone()).unwrap();
        raw.send(iface.mac, b"ping".to_vec());

        let dispatcher = Dispatcher::new(ifaces.clone(), peers.clone(), endpoints.clone(), pulls.clone(), link.clone());
        dispatcher.poll_and_dispatch(idx);

        let got = raw.poll(&dispatcher);
        assert_eq!(got, vec![b"ping".to_vec()]);
    }
}
