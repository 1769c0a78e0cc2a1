//! On-wire frame format (spec.md §6).
//!
//! Every frame is `[14-byte Ethernet header][2-byte dst_src_peer_index][a
//! type-specific body whose first byte is the packet type]`, multibyte
//! fields in network byte order. `ByteWriter`/`ByteReader` are the explicit
//! accessors the spec calls for in place of a one-off `(frame as
//! *const _) as *const Header` cast at every call site.

use crate::limits::ETH_ZLEN;
use crate::mac::MacAddr;
use std::convert::TryFrom;

// ---------------------------------------------------------------------------
// Byte cursor helpers
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn put_u8(&mut self, v: u8) -> &mut Self {
        self.buf.push(v);
        self
    }

    pub fn put_u16(&mut self, v: u16) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn put_u32(&mut self, v: u32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn put_u64(&mut self, v: u64) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn put_bytes(&mut self, v: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(v);
        self
    }

    pub fn put_mac(&mut self, v: MacAddr) -> &mut Self {
        self.buf.extend_from_slice(v.as_bytes());
        self
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buf
    }
}

pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Truncated;

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], Truncated> {
        if self.remaining() < n {
            return Err(Truncated);
        }
        let s = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    pub fn get_u8(&mut self) -> Result<u8, Truncated> {
        Ok(self.take(1)?[0])
    }

    pub fn get_u16(&mut self) -> Result<u16, Truncated> {
        let s = self.take(2)?;
        Ok(u16::from_be_bytes([s[0], s[1]]))
    }

    pub fn get_u32(&mut self) -> Result<u32, Truncated> {
        let s = self.take(4)?;
        Ok(u32::from_be_bytes([s[0], s[1], s[2], s[3]]))
    }

    pub fn get_u64(&mut self) -> Result<u64, Truncated> {
        let s = self.take(8)?;
        let mut b = [0u8; 8];
        b.copy_from_slice(s);
        Ok(u64::from_be_bytes(b))
    }

    pub fn get_mac(&mut self) -> Result<MacAddr, Truncated> {
        let s = self.take(6)?;
        MacAddr::from_slice(s).ok_or(Truncated)
    }

    pub fn get_bytes(&mut self, n: usize) -> Result<&'a [u8], Truncated> {
        self.take(n)
    }

    /// Everything left in the buffer.
    pub fn rest(&mut self) -> &'a [u8] {
        let s = &self.buf[self.pos..];
        self.pos = self.buf.len();
        s
    }
}

// ---------------------------------------------------------------------------
// Packet type tag
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    Raw = 0,
    MfmNicReply = 1,
    HostQuery = 2,
    HostReply = 3,
    Truc = 7,
    Connect = 8,
    Tiny = 9,
    Small = 10,
    Medium = 11,
    Rndv = 12,
    Pull = 13,
    PullReply = 14,
    Notify = 15,
    NackLib = 16,
    NackMcp = 17,
}

impl PacketType {
    /// Minimum body length (after the 2-byte peer index, including the type
    /// byte itself) the receive dispatcher requires before linearizing and
    /// invoking the handler (spec.md §4.7).
    pub fn min_header_len(self) -> usize {
        match self {
            PacketType::Raw => 1,
            PacketType::MfmNicReply => 1,
            PacketType::HostQuery => 1 + 2 + 4,
            PacketType::HostReply => 1 + 2 + 2 + 4,
            PacketType::Truc => 1 + 4 + 1 + 2 + 17,
            PacketType::Connect => 1 + 1 + 1 + 2 + 4 + 2 + 1,
            PacketType::Tiny => 1 + 1 + 1 + 4 + 4 + 4 + 4 + 4 + 8,
            PacketType::Small => 1 + 1 + 1 + 4 + 4 + 4 + 4 + 4 + 8,
            PacketType::Medium => 1 + 1 + 1 + 4 + 4 + 4 + 4 + 4 + 8 + 2 + 2 + 1 + 2,
            PacketType::Rndv => 1 + 1 + 1 + 4 + 4 + 4 + 4 + 4 + 8 + 4 + 4 + 4 + 4,
            PacketType::Pull => 1 + 1 + 1 + 4 + 4 + 4 + 4 + 4 + 4 + 4 + 4 + 4,
            PacketType::PullReply => 1 + 4 + 2 + 2 + 4 + 4,
            PacketType::Notify => 1 + 1 + 1 + 4 + 4 + 4 + 4 + 4 + 4,
            PacketType::NackLib => 1 + 1 + 1 + 1 + 4,
            PacketType::NackMcp => 1 + 1 + 1 + 4 + 4,
        }
    }
}

impl TryFrom<u8> for PacketType {
    type Error = ();

    fn try_from(v: u8) -> Result<Self, ()> {
        Ok(match v {
            0 => PacketType::Raw,
            1 => PacketType::MfmNicReply,
            2 => PacketType::HostQuery,
            3 => PacketType::HostReply,
            7 => PacketType::Truc,
            8 => PacketType::Connect,
            9 => PacketType::Tiny,
            10 => PacketType::Small,
            11 => PacketType::Medium,
            12 => PacketType::Rndv,
            13 => PacketType::Pull,
            14 => PacketType::PullReply,
            15 => PacketType::Notify,
            16 => PacketType::NackLib,
            17 => PacketType::NackMcp,
            _ => return Err(()),
        })
    }
}

// ---------------------------------------------------------------------------
// Ethernet header
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EthHeader {
    pub dst: MacAddr,
    pub src: MacAddr,
    pub ethertype: u16,
}

impl EthHeader {
    pub fn encode(&self, w: &mut ByteWriter) {
        w.put_mac(self.dst).put_mac(self.src).put_u16(self.ethertype);
    }

    pub fn decode(r: &mut ByteReader) -> Result<Self, Truncated> {
        Ok(Self {
            dst: r.get_mac()?,
            src: r.get_mac()?,
            ethertype: r.get_u16()?,
        })
    }
}

// ---------------------------------------------------------------------------
// Per-type fixed headers
// ---------------------------------------------------------------------------

/// Common fields shared by TINY/SMALL/MEDIUM/RNDV message headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MsgHeader {
    pub src_endpoint: u8,
    pub dst_endpoint: u8,
    pub length: u32,
    pub lib_seqnum: u32,
    pub lib_piggyack: u32,
    pub session: u32,
    pub checksum: u32,
    pub match_info: u64,
}

impl MsgHeader {
    fn encode(&self, w: &mut ByteWriter) {
        w.put_u8(self.src_endpoint)
            .put_u8(self.dst_endpoint)
            .put_u32(self.length)
            .put_u32(self.lib_seqnum)
            .put_u32(self.lib_piggyack)
            .put_u32(self.session)
            .put_u32(self.checksum)
            .put_u64(self.match_info);
    }

    fn decode(r: &mut ByteReader) -> Result<Self, Truncated> {
        Ok(Self {
            src_endpoint: r.get_u8()?,
            dst_endpoint: r.get_u8()?,
            length: r.get_u32()?,
            lib_seqnum: r.get_u32()?,
            lib_piggyack: r.get_u32()?,
            session: r.get_u32()?,
            checksum: r.get_u32()?,
            match_info: r.get_u64()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketBody {
    Raw {
        payload: Vec<u8>,
    },
    MfmNicReply,
    HostQuery {
        src_dst_peer_index: u16,
        magic: u32,
    },
    HostReply {
        src_dst_peer_index: u16,
        magic: u32,
        hostname: String,
    },
    Truc {
        session: u32,
        ty: u8,
        length: u16,
        lib_seqnum: u32,
        liback_session: u32,
        acknum: u32,
        send_seq: u32,
        resent: u8,
    },
    Connect {
        src_endpoint: u8,
        dst_endpoint: u8,
        length: u16,
        lib_seqnum: u32,
        src_dst_peer_index: u16,
        is_reply: bool,
        payload: Vec<u8>,
    },
    Tiny {
        msg: MsgHeader,
        data: Vec<u8>,
    },
    Small {
        msg: MsgHeader,
        payload: Vec<u8>,
    },
    Medium {
        msg: MsgHeader,
        frag_seqnum: u16,
        frag_length: u16,
        frag_pipeline: u8,
        /// The fixed chunk size every fragment but the last was split at.
        /// Carried explicitly rather than left for the receiver to infer,
        /// since `frag_length` alone is only that size for the last
        /// (possibly shorter) fragment of the message.
        frag_threshold: u16,
        payload: Vec<u8>,
    },
    Rndv {
        msg: MsgHeader,
        msg_length: u32,
        pulled_rdma_id: u32,
        pulled_rdma_seqnum: u32,
        pulled_rdma_offset: u32,
    },
    Pull {
        src_endpoint: u8,
        dst_endpoint: u8,
        session: u32,
        block_length: u32,
        src_pull_handle: u32,
        src_magic: u32,
        frame_index: u32,
        first_frame_offset: u32,
        pulled_rdma_id: u32,
        pulled_rdma_offset: u32,
        total_length: u32,
    },
    PullReply {
        msg_offset: u32,
        frame_seqnum: u16,
        frame_length: u16,
        dst_pull_handle: u32,
        dst_magic: u32,
        payload: Vec<u8>,
    },
    Notify {
        src_endpoint: u8,
        dst_endpoint: u8,
        total_length: u32,
        lib_seqnum: u32,
        lib_piggyack: u32,
        session: u32,
        pulled_rdma_id: u32,
        pulled_rdma_seqnum: u32,
    },
    NackLib {
        src_endpoint: u8,
        dst_endpoint: u8,
        nack_type: u8,
        lib_seqnum: u32,
    },
    NackMcp {
        src_endpoint: u8,
        nack_type: u8,
        src_pull_handle: u32,
        src_magic: u32,
    },
}

impl PacketBody {
    pub fn packet_type(&self) -> PacketType {
        match self {
            PacketBody::Raw { .. } => PacketType::Raw,
            PacketBody::MfmNicReply => PacketType::MfmNicReply,
            PacketBody::HostQuery { .. } => PacketType::HostQuery,
            PacketBody::HostReply { .. } => PacketType::HostReply,
            PacketBody::Truc { .. } => PacketType::Truc,
            PacketBody::Connect { .. } => PacketType::Connect,
            PacketBody::Tiny { .. } => PacketType::Tiny,
            PacketBody::Small { .. } => PacketType::Small,
            PacketBody::Medium { .. } => PacketType::Medium,
            PacketBody::Rndv { .. } => PacketType::Rndv,
            PacketBody::Pull { .. } => PacketType::Pull,
            PacketBody::PullReply { .. } => PacketType::PullReply,
            PacketBody::Notify { .. } => PacketType::Notify,
            PacketBody::NackLib { .. } => PacketType::NackLib,
            PacketBody::NackMcp { .. } => PacketType::NackMcp,
        }
    }

    fn encode(&self, w: &mut ByteWriter) {
        w.put_u8(self.packet_type() as u8);
        match self {
            PacketBody::Raw { payload } => {
                w.put_bytes(payload);
            }
            PacketBody::MfmNicReply => {}
            PacketBody::HostQuery {
                src_dst_peer_index,
                magic,
            } => {
                w.put_u16(*src_dst_peer_index).put_u32(*magic);
            }
            PacketBody::HostReply {
                src_dst_peer_index,
                magic,
                hostname,
            } => {
                w.put_u16(*src_dst_peer_index)
                    .put_u16(hostname.len() as u16)
                    .put_u32(*magic)
                    .put_bytes(hostname.as_bytes());
            }
            PacketBody::Truc {
                session,
                ty,
                length,
                lib_seqnum,
                liback_session,
                acknum,
                send_seq,
                resent,
            } => {
                w.put_u32(*session)
                    .put_u8(*ty)
                    .put_u16(*length)
                    .put_u32(*lib_seqnum)
                    .put_u32(*liback_session)
                    .put_u32(*acknum)
                    .put_u32(*send_seq)
                    .put_u8(*resent);
            }
            PacketBody::Connect {
                src_endpoint,
                dst_endpoint,
                length,
                lib_seqnum,
                src_dst_peer_index,
                is_reply,
                payload,
            } => {
                w.put_u8(*src_endpoint)
                    .put_u8(*dst_endpoint)
                    .put_u16(*length)
                    .put_u32(*lib_seqnum)
                    .put_u16(*src_dst_peer_index)
                    .put_u8(*is_reply as u8)
                    .put_bytes(payload);
            }
            PacketBody::Tiny { msg, data } => {
                msg.encode(w);
                w.put_bytes(data);
            }
            PacketBody::Small { msg, payload } => {
                msg.encode(w);
                w.put_bytes(payload);
            }
            PacketBody::Medium {
                msg,
                frag_seqnum,
                frag_length,
                frag_pipeline,
                frag_threshold,
                payload,
            } => {
                msg.encode(w);
                w.put_u16(*frag_seqnum)
                    .put_u16(*frag_length)
                    .put_u8(*frag_pipeline)
                    .put_u16(*frag_threshold)
                    .put_bytes(payload);
            }
            PacketBody::Rndv {
                msg,
                msg_length,
                pulled_rdma_id,
                pulled_rdma_seqnum,
                pulled_rdma_offset,
            } => {
                msg.encode(w);
                w.put_u32(*msg_length)
                    .put_u32(*pulled_rdma_id)
                    .put_u32(*pulled_rdma_seqnum)
                    .put_u32(*pulled_rdma_offset);
            }
            PacketBody::Pull {
                src_endpoint,
                dst_endpoint,
                session,
                block_length,
                src_pull_handle,
                src_magic,
                frame_index,
                first_frame_offset,
                pulled_rdma_id,
                pulled_rdma_offset,
                total_length,
            } => {
                w.put_u8(*src_endpoint)
                    .put_u8(*dst_endpoint)
                    .put_u32(*session)
                    .put_u32(*block_length)
                    .put_u32(*src_pull_handle)
                    .put_u32(*src_magic)
                    .put_u32(*frame_index)
                    .put_u32(*first_frame_offset)
                    .put_u32(*pulled_rdma_id)
                    .put_u32(*pulled_rdma_offset)
                    .put_u32(*total_length);
            }
            PacketBody::PullReply {
                msg_offset,
                frame_seqnum,
                frame_length,
                dst_pull_handle,
                dst_magic,
                payload,
            } => {
                w.put_u32(*msg_offset)
                    .put_u16(*frame_seqnum)
                    .put_u16(*frame_length)
                    .put_u32(*dst_pull_handle)
                    .put_u32(*dst_magic)
                    .put_bytes(payload);
            }
            PacketBody::Notify {
                src_endpoint,
                dst_endpoint,
                total_length,
                lib_seqnum,
                lib_piggyack,
                session,
                pulled_rdma_id,
                pulled_rdma_seqnum,
            } => {
                w.put_u8(*src_endpoint)
                    .put_u8(*dst_endpoint)
                    .put_u32(*total_length)
                    .put_u32(*lib_seqnum)
                    .put_u32(*lib_piggyack)
                    .put_u32(*session)
                    .put_u32(*pulled_rdma_id)
                    .put_u32(*pulled_rdma_seqnum);
            }
            PacketBody::NackLib {
                src_endpoint,
                dst_endpoint,
                nack_type,
                lib_seqnum,
            } => {
                w.put_u8(*src_endpoint)
                    .put_u8(*dst_endpoint)
                    .put_u8(*nack_type)
                    .put_u32(*lib_seqnum);
            }
            PacketBody::NackMcp {
                src_endpoint,
                nack_type,
                src_pull_handle,
                src_magic,
            } => {
                w.put_u8(*src_endpoint)
                    .put_u8(*nack_type)
                    .put_u32(*src_pull_handle)
                    .put_u32(*src_magic);
            }
        }
    }

    fn decode(ty: PacketType, r: &mut ByteReader) -> Result<Self, Truncated> {
        Ok(match ty {
            PacketType::Raw => PacketBody::Raw {
                payload: r.rest().to_vec(),
            },
            PacketType::MfmNicReply => PacketBody::MfmNicReply,
            PacketType::HostQuery => PacketBody::HostQuery {
                src_dst_peer_index: r.get_u16()?,
                magic: r.get_u32()?,
            },
            PacketType::HostReply => {
                let src_dst_peer_index = r.get_u16()?;
                let length = r.get_u16()?;
                let magic = r.get_u32()?;
                let bytes = r.get_bytes(length as usize)?;
                PacketBody::HostReply {
                    src_dst_peer_index,
                    magic,
                    hostname: String::from_utf8_lossy(bytes).into_owned(),
                }
            }
            PacketType::Truc => PacketBody::Truc {
                session: r.get_u32()?,
                ty: r.get_u8()?,
                length: r.get_u16()?,
                lib_seqnum: r.get_u32()?,
                liback_session: r.get_u32()?,
                acknum: r.get_u32()?,
                send_seq: r.get_u32()?,
                resent: r.get_u8()?,
            },
            PacketType::Connect => {
                let src_endpoint = r.get_u8()?;
                let dst_endpoint = r.get_u8()?;
                let length = r.get_u16()?;
                let lib_seqnum = r.get_u32()?;
                let src_dst_peer_index = r.get_u16()?;
                let is_reply = r.get_u8()? != 0;
                PacketBody::Connect {
                    src_endpoint,
                    dst_endpoint,
                    length,
                    lib_seqnum,
                    src_dst_peer_index,
                    is_reply,
                    payload: r.rest().to_vec(),
                }
            }
            PacketType::Tiny => PacketBody::Tiny {
                msg: MsgHeader::decode(r)?,
                data: r.rest().to_vec(),
            },
            PacketType::Small => PacketBody::Small {
                msg: MsgHeader::decode(r)?,
                payload: r.rest().to_vec(),
            },
            PacketType::Medium => {
                let msg = MsgHeader::decode(r)?;
                let frag_seqnum = r.get_u16()?;
                let frag_length = r.get_u16()?;
                let frag_pipeline = r.get_u8()?;
                let frag_threshold = r.get_u16()?;
                PacketBody::Medium {
                    msg,
                    frag_seqnum,
                    frag_length,
                    frag_pipeline,
                    frag_threshold,
                    payload: r.rest().to_vec(),
                }
            }
            PacketType::Rndv => PacketBody::Rndv {
                msg: MsgHeader::decode(r)?,
                msg_length: r.get_u32()?,
                pulled_rdma_id: r.get_u32()?,
                pulled_rdma_seqnum: r.get_u32()?,
                pulled_rdma_offset: r.get_u32()?,
            },
            PacketType::Pull => PacketBody::Pull {
                src_endpoint: r.get_u8()?,
                dst_endpoint: r.get_u8()?,
                session: r.get_u32()?,
                block_length: r.get_u32()?,
                src_pull_handle: r.get_u32()?,
                src_magic: r.get_u32()?,
                frame_index: r.get_u32()?,
                first_frame_offset: r.get_u32()?,
                pulled_rdma_id: r.get_u32()?,
                pulled_rdma_offset: r.get_u32()?,
                total_length: r.get_u32()?,
            },
            PacketType::PullReply => {
                let msg_offset = r.get_u32()?;
                let frame_seqnum = r.get_u16()?;
                let frame_length = r.get_u16()?;
                let dst_pull_handle = r.get_u32()?;
                let dst_magic = r.get_u32()?;
                PacketBody::PullReply {
                    msg_offset,
                    frame_seqnum,
                    frame_length,
                    dst_pull_handle,
                    dst_magic,
                    payload: r.rest().to_vec(),
                }
            }
            PacketType::Notify => PacketBody::Notify {
                src_endpoint: r.get_u8()?,
                dst_endpoint: r.get_u8()?,
                total_length: r.get_u32()?,
                lib_seqnum: r.get_u32()?,
                lib_piggyack: r.get_u32()?,
                session: r.get_u32()?,
                pulled_rdma_id: r.get_u32()?,
                pulled_rdma_seqnum: r.get_u32()?,
            },
            PacketType::NackLib => PacketBody::NackLib {
                src_endpoint: r.get_u8()?,
                dst_endpoint: r.get_u8()?,
                nack_type: r.get_u8()?,
                lib_seqnum: r.get_u32()?,
            },
            PacketType::NackMcp => PacketBody::NackMcp {
                src_endpoint: r.get_u8()?,
                nack_type: r.get_u8()?,
                src_pull_handle: r.get_u32()?,
                src_magic: r.get_u32()?,
            },
        })
    }
}

// ---------------------------------------------------------------------------
// Full frame
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub eth: EthHeader,
    pub dst_src_peer_index: u16,
    pub body: PacketBody,
}

impl Frame {
    pub fn new(eth: EthHeader, dst_src_peer_index: u16, body: PacketBody) -> Self {
        Self {
            eth,
            dst_src_peer_index,
            body,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = ByteWriter::new();
        self.eth.encode(&mut w);
        w.put_u16(self.dst_src_peer_index);
        self.body.encode(&mut w);
        let mut bytes = w.into_vec();
        if bytes.len() < ETH_ZLEN {
            bytes.resize(ETH_ZLEN, 0);
        }
        bytes
    }

    /// Decodes a frame already known to carry [`ETHERTYPE_OMX`].
    ///
    /// Returns `None` on truncation or an unrecognized packet type byte; the
    /// caller (receive dispatch, spec.md §4.7) counts this as a drop.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        let mut r = ByteReader::new(bytes);
        let eth = EthHeader::decode(&mut r).ok()?;
        let dst_src_peer_index = r.get_u16().ok()?;
        let type_byte = bytes[r.pos_for_type_peek()?];
        let ty = PacketType::try_from(type_byte).ok()?;
        if r.remaining() < ty.min_header_len() {
            return None;
        }
        let type_tag = r.get_u8().ok()?;
        debug_assert_eq!(type_tag, type_byte);
        let body = PacketBody::decode(ty, &mut r).ok()?;
        Some(Self {
            eth,
            dst_src_peer_index,
            body,
        })
    }
}

impl<'a> ByteReader<'a> {
    /// Index of the not-yet-consumed type byte, used by [`Frame::decode`] to
    /// peek the dispatch tag before committing to a per-variant decoder.
    fn pos_for_type_peek(&self) -> Option<usize> {
        if self.pos < self.buf.len() {
            Some(self.pos)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::{ENDPOINT_PULL_MAGIC_XOR, ETH_HLEN, ETHERTYPE_OMX};

    fn eth() -> EthHeader {
        EthHeader {
            dst: MacAddr::new([1, 2, 3, 4, 5, 6]),
            src: MacAddr::new([6, 5, 4, 3, 2, 1]),
            ethertype: ETHERTYPE_OMX,
        }
    }

    #[test]
    fn tiny_round_trips() {
        let frame = Frame::new(
            eth(),
            7,
            PacketBody::Tiny {
                msg: MsgHeader {
                    src_endpoint: 1,
                    dst_endpoint: 2,
                    length: 7,
                    lib_seqnum: 42,
                    lib_piggyack: 0,
                    session: 0xdead_beef,
                    checksum: 0,
                    match_info: 0x42,
                },
                data: b"abcdefg".to_vec(),
            },
        );
        let bytes = frame.encode();
        assert!(bytes.len() >= ETH_ZLEN);
        let decoded = Frame::decode(&bytes).expect("decodes");
        assert_eq!(decoded, frame);
    }

    #[test]
    fn pull_reply_round_trips_with_payload() {
        let frame = Frame::new(
            eth(),
            3,
            PacketBody::PullReply {
                msg_offset: 8192,
                frame_seqnum: 5,
                frame_length: 4096,
                dst_pull_handle: 9,
                dst_magic: 3 ^ ENDPOINT_PULL_MAGIC_XOR,
                payload: vec![0xAB; 4096],
            },
        );
        let bytes = frame.encode();
        let decoded = Frame::decode(&bytes).expect("decodes");
        assert_eq!(decoded, frame);
    }

    #[test]
    fn medium_fragment_round_trips_with_its_threshold() {
        let frame = Frame::new(
            eth(),
            4,
            PacketBody::Medium {
                msg: MsgHeader {
                    src_endpoint: 1,
                    dst_endpoint: 2,
                    length: 20000,
                    lib_seqnum: 1,
                    lib_piggyack: 0,
                    session: 0xdead_beef,
                    checksum: 0,
                    match_info: 0,
                },
                frag_seqnum: 2,
                frag_length: 3616,
                frag_pipeline: 3,
                frag_threshold: 8192,
                payload: vec![0x11; 3616],
            },
        );
        let bytes = frame.encode();
        let decoded = Frame::decode(&bytes).expect("decodes");
        assert_eq!(decoded, frame);
    }

    #[test]
    fn truncated_frame_is_rejected() {
        let frame = Frame::new(
            eth(),
            0,
            PacketBody::HostQuery {
                src_dst_peer_index: 1,
                magic: 5,
            },
        );
        let mut bytes = frame.encode();
        bytes.truncate(ETH_HLEN + 2 + 1);
        assert!(Frame::decode(&bytes).is_none());
    }

    #[test]
    fn unknown_packet_type_is_rejected() {
        let mut bytes = vec![0u8; ETH_ZLEN];
        bytes[12] = (ETHERTYPE_OMX >> 8) as u8;
        bytes[13] = (ETHERTYPE_OMX & 0xff) as u8;
        bytes[16] = 250; // not a valid PacketType discriminant
        assert!(Frame::decode(&bytes).is_none());
    }
}
