//! Send path: frame builders for every message class (spec.md §4.6).
//!
//! Each builder fills the common Ethernet header and `dst_src_peer_index`
//! field from a peer/endpoint lookup and hands back a ready-to-transmit
//! [`Frame`]; [`Sender`] is the thin wrapper that also knows how to queue
//! the result on a [`LoopbackLink`] and update per-interface counters.

use omx_abi::limits::{ENDPOINT_PULL_MAGIC_XOR, TINY_LENGTH_MAX};
use omx_abi::wire::{EthHeader, Frame, MsgHeader, PacketBody};
use omx_abi::{MacAddr, OmxError};
use omx_core::{Endpoint, Iface, Peer};
use std::sync::Arc;

use crate::link::LoopbackLink;

pub struct Sender<'a> {
    pub link: &'a LoopbackLink,
}

fn eth_header(src: &Iface, dst_mac: MacAddr) -> EthHeader {
    EthHeader {
        dst: dst_mac,
        src: src.mac,
        ethertype: omx_abi::limits::ETHERTYPE_OMX,
    }
}

/// `dst_src_peer_index` carried by outbound frames: the index by which the
/// remote peer knows us, falling back to our own index when never learned
/// (the first frame to a never-contacted peer).
fn reverse_index_or(iface: &Iface, dst_peer: &Peer) -> u16 {
    iface.reverse_peer_index(dst_peer.index).unwrap_or(dst_peer.index) as u16
}

impl<'a> Sender<'a> {
    pub fn new(link: &'a LoopbackLink) -> Self {
        Self { link }
    }

    fn transmit(&self, ep: &Endpoint, dst_mac: MacAddr, dst_peer: &Peer, body: PacketBody) {
        let frame = Frame::new(eth_header(&ep.iface, dst_mac), reverse_index_or(&ep.iface, dst_peer), body);
        let bytes = frame.encode();
        ep.iface.with_counters_mut(|c| c.frames_sent += 1);
        self.link.transmit(ep.iface.index, bytes);
    }

    pub fn send_tiny(
        &self,
        ep: &Endpoint,
        dst_peer: &Peer,
        dst_endpoint: u8,
        match_info: u64,
        lib_seqnum: u32,
        data: &[u8],
    ) -> Result<(), OmxError> {
        if data.len() > TINY_LENGTH_MAX {
            return Err(OmxError::InvalidArgument);
        }
        let msg = MsgHeader {
            src_endpoint: ep.index as u8,
            dst_endpoint,
            length: data.len() as u32,
            lib_seqnum,
            lib_piggyack: 0,
            session: ep.session_id,
            checksum: 0,
            match_info,
        };
        self.transmit(
            ep,
            dst_peer.mac,
            dst_peer,
            PacketBody::Tiny { msg, data: data.to_vec() },
        );
        Ok(())
    }

    pub fn send_small(
        &self,
        ep: &Endpoint,
        dst_peer: &Peer,
        dst_endpoint: u8,
        match_info: u64,
        lib_seqnum: u32,
        payload: &[u8],
    ) {
        let msg = MsgHeader {
            src_endpoint: ep.index as u8,
            dst_endpoint,
            length: payload.len() as u32,
            lib_seqnum,
            lib_piggyack: 0,
            session: ep.session_id,
            checksum: 0,
            match_info,
        };
        self.transmit(
            ep,
            dst_peer.mac,
            dst_peer,
            PacketBody::Small { msg, payload: payload.to_vec() },
        );
    }

    /// Splits `payload` into MTU-bounded fragments and sends one MEDIUM
    /// frame per fragment, each carrying the whole message's `length` so
    /// the receiver can size its reassembly buffer from the first fragment
    /// (spec.md §4.6, §8 scenario 3).
    pub fn send_medium(
        &self,
        ep: &Endpoint,
        dst_peer: &Peer,
        dst_endpoint: u8,
        match_info: u64,
        lib_seqnum: u32,
        payload: &[u8],
        frag_size: usize,
    ) {
        let total_len = payload.len() as u32;
        let pipeline = payload.len().div_ceil(frag_size).max(1) as u8;
        for (seqnum, chunk) in payload.chunks(frag_size).enumerate() {
            let msg = MsgHeader {
                src_endpoint: ep.index as u8,
                dst_endpoint,
                length: total_len,
                lib_seqnum,
                lib_piggyack: 0,
                session: ep.session_id,
                checksum: 0,
                match_info,
            };
            self.transmit(
                ep,
                dst_peer.mac,
                dst_peer,
                PacketBody::Medium {
                    msg,
                    frag_seqnum: seqnum as u16,
                    frag_length: chunk.len() as u16,
                    frag_pipeline: pipeline,
                    frag_threshold: frag_size as u16,
                    payload: chunk.to_vec(),
                },
            );
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn send_rndv(
        &self,
        ep: &Endpoint,
        dst_peer: &Peer,
        dst_endpoint: u8,
        match_info: u64,
        lib_seqnum: u32,
        msg_length: u32,
        region_id: u32,
    ) {
        let msg = MsgHeader {
            src_endpoint: ep.index as u8,
            dst_endpoint,
            length: 0,
            lib_seqnum,
            lib_piggyack: 0,
            session: ep.session_id,
            checksum: 0,
            match_info,
        };
        self.transmit(
            ep,
            dst_peer.mac,
            dst_peer,
            PacketBody::Rndv {
                msg,
                msg_length,
                pulled_rdma_id: region_id,
                pulled_rdma_seqnum: 0,
                pulled_rdma_offset: 0,
            },
        );
    }

    pub fn send_notify(
        &self,
        ep: &Endpoint,
        dst_peer: &Peer,
        dst_endpoint: u8,
        total_length: u32,
        lib_seqnum: u32,
        pulled_rdma_id: u32,
    ) {
        self.transmit(
            ep,
            dst_peer.mac,
            dst_peer,
            PacketBody::Notify {
                src_endpoint: ep.index as u8,
                dst_endpoint,
                total_length,
                lib_seqnum,
                lib_piggyack: 0,
                session: ep.session_id,
                pulled_rdma_id,
                pulled_rdma_seqnum: 0,
            },
        );
    }

    pub fn send_liback(
        &self,
        ep: &Endpoint,
        dst_peer: &Peer,
        lib_seqnum: u32,
        acknum: u32,
        send_seq: u32,
    ) {
        self.transmit(
            ep,
            dst_peer.mac,
            dst_peer,
            PacketBody::Truc {
                session: ep.session_id,
                ty: 0,
                length: 0,
                lib_seqnum,
                liback_session: ep.session_id,
                acknum,
                send_seq,
                resent: 0,
            },
        );
    }

    pub fn send_nack_lib(
        &self,
        iface: &Arc<Iface>,
        dst_mac: MacAddr,
        dst_peer: &Peer,
        src_endpoint: u8,
        dst_endpoint: u8,
        nack_type: omx_abi::NackLibType,
        lib_seqnum: u32,
    ) {
        let frame = Frame::new(
            eth_header(iface, dst_mac),
            reverse_index_or(iface, dst_peer),
            PacketBody::NackLib {
                src_endpoint,
                dst_endpoint,
                nack_type: nack_type as u8,
                lib_seqnum,
            },
        );
        iface.with_counters_mut(|c| {
            c.frames_sent += 1;
            c.nacks_sent += 1;
        });
        self.link.transmit(iface.index, frame.encode());
    }

    pub fn send_nack_mcp(
        &self,
        iface: &Arc<Iface>,
        dst_mac: MacAddr,
        dst_peer: &Peer,
        src_endpoint: u8,
        nack_type: omx_abi::NackMcpType,
        src_pull_handle: u32,
    ) {
        let frame = Frame::new(
            eth_header(iface, dst_mac),
            reverse_index_or(iface, dst_peer),
            PacketBody::NackMcp {
                src_endpoint,
                nack_type: nack_type as u8,
                src_pull_handle,
                src_magic: src_endpoint as u32 ^ ENDPOINT_PULL_MAGIC_XOR,
            },
        );
        iface.with_counters_mut(|c| {
            c.frames_sent += 1;
            c.nacks_sent += 1;
        });
        self.link.transmit(iface.index, frame.encode());
    }
}
