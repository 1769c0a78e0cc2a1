//! Module configuration, equivalent to the kernel module's `module_param`
//! table (spec.md §6).

use omx_mm::PinParams;

/// Per-packet-type loss injectors for fault-injection testing (spec.md §6:
/// "per-packet-type `*_packet_loss` debug injectors"). Each value is
/// "drop 1 in N", `0` meaning "never drop".
#[derive(Debug, Clone, Copy, Default)]
pub struct PacketLossInjectors {
    pub pull_request: u32,
    pub pull_reply: u32,
}

impl PacketLossInjectors {
    pub const fn none() -> Self {
        Self {
            pull_request: 0,
            pull_reply: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaEngine {
    Disabled,
    Enabled,
}

#[derive(Debug, Clone)]
pub struct ModuleParams {
    /// Interface names to attach at module load (`ifnames`).
    pub ifnames: Vec<String>,
    /// Maximum number of attached interfaces (`ifaces`).
    pub max_ifaces: usize,
    /// Maximum endpoints open per interface (`endpoints`).
    pub max_endpoints_per_iface: usize,
    /// Maximum peers in the peer table (`peers`).
    pub max_peers: usize,
    /// Whether the send path may use zero-copy skb fragments (`skbfrags`).
    pub skb_frags_enabled: bool,
    /// Payload length above which a copy favors fragments over linear copy
    /// (`skbcopy`).
    pub skb_copy_threshold: usize,
    /// Whether regions are pinned progressively on demand rather than
    /// fully up front (`demandpin`).
    pub demand_pin: bool,
    pub pin_chunk_pages_min: usize,
    pub pin_chunk_pages_max: usize,
    /// DMA offload for pull-reply payload copies (`dmaengine`).
    pub dma_engine: DmaEngine,
    /// Frame length above which a reply copy is offloaded to DMA, if
    /// enabled.
    pub dma_async_frame_threshold: usize,
    /// Message length above which a pull may use DMA offload at all.
    pub dma_async_msg_threshold: usize,
    /// Synchronous copy benchmarking switch (`copybench`); when set, copy
    /// paths record timing instead of skipping it.
    pub copybench: bool,
    /// Verbosity level for structured logging (`debug`).
    pub debug: u8,
    pub packet_loss: PacketLossInjectors,
}

impl Default for ModuleParams {
    fn default() -> Self {
        Self {
            ifnames: Vec::new(),
            max_ifaces: 8,
            max_endpoints_per_iface: 64,
            max_peers: 1024,
            skb_frags_enabled: true,
            skb_copy_threshold: 4096,
            demand_pin: false,
            pin_chunk_pages_min: omx_abi::limits::PIN_CHUNK_PAGES_MIN,
            pin_chunk_pages_max: omx_abi::limits::PIN_CHUNK_PAGES_MAX,
            dma_engine: DmaEngine::Disabled,
            dma_async_frame_threshold: 2048,
            dma_async_msg_threshold: 65536,
            copybench: false,
            debug: 0,
            packet_loss: PacketLossInjectors::none(),
        }
    }
}

impl ModuleParams {
    pub fn pin_params(&self) -> PinParams {
        PinParams {
            demand_pin: self.demand_pin,
            pin_chunk_pages_min: self.pin_chunk_pages_min,
            pin_chunk_pages_max: self.pin_chunk_pages_max,
        }
    }
}

/// Per-interface counters exposed by `GET_COUNTERS` (spec.md §6).
#[derive(Debug, Clone, Copy, Default)]
pub struct IfaceCounters {
    pub frames_sent: u64,
    pub frames_received: u64,
    pub frames_dropped: u64,
    pub pull_requests_sent: u64,
    pub pull_replies_sent: u64,
    pub pull_replies_received: u64,
    pub pull_retransmits: u64,
    pub nacks_sent: u64,
}
