//! Fixed protocol parameters (spec.md §4.8, §6).

use std::time::Duration;

/// EtherType carried by every Open-MX frame.
pub const ETHERTYPE_OMX: u16 = 0x86DF;

/// Length of the Ethernet header (dst MAC + src MAC + ethertype).
pub const ETH_HLEN: usize = 14;

/// Ethernet minimum frame length (header + payload, without FCS); shorter
/// frames are zero-padded to this length before transmit.
pub const ETH_ZLEN: usize = 60;

/// `endpoint_index XOR magic` encoding used to validate `PULL_REPLY` frames
/// without per-handle wire state (spec.md §6).
pub const ENDPOINT_PULL_MAGIC_XOR: u32 = 0x2107_1980;

/// Largest payload carried inline in a TINY frame.
pub const TINY_LENGTH_MAX: usize = 32;

/// Per-reply payload ceiling for a pull (bounded by MTU).
pub const PULL_REPLY_LENGTH_MAX: usize = 8192;

/// Replies per pull block. Must be a power of two, <= 64.
pub const PULL_REPLIES_PER_BLOCK: usize = 32;

/// Pull pipeline depth: number of blocks kept in flight at once.
pub const PULL_BLOCK_DESCS_NR: usize = 2;

/// Retransmit tick for an outstanding pull block.
pub const PULL_RETRANSMIT_TIMEOUT: Duration = Duration::from_millis(1000);

/// Host-query broadcast interval for peers known only by address.
pub const HOST_QUERY_INTERVAL: Duration = Duration::from_secs(5);

/// Default starting chunk size (in pages) for progressive region pinning.
pub const PIN_CHUNK_PAGES_MIN: usize = 8;

/// Default maximum chunk size (in pages) for progressive region pinning;
/// chunk size doubles from `PIN_CHUNK_PAGES_MIN` up to this ceiling.
pub const PIN_CHUNK_PAGES_MAX: usize = 1024;

/// Page size assumed for pinning accounting.
pub const PAGE_SIZE: usize = 4096;

const _: () = assert!(PULL_REPLIES_PER_BLOCK.is_power_of_two());
const _: () = assert!(PULL_REPLIES_PER_BLOCK <= 64);
