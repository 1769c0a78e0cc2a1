//! Pull engine: block-pipelined reliable RDMA-read (spec.md §4.8).
//!
//! The target side is stateless: it answers a `PULL_REQUEST` with a burst
//! of `PULL_REPLY` frames and forgets about it. All pipeline state —
//! descriptors, missing-frame bitmaps, retransmit deadlines — lives on the
//! puller side in a [`PullHandle`], reached through its generational
//! [`SlotId`] the same way the rest of this workspace addresses
//! short-lived handles.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use omx_abi::limits::{
    ENDPOINT_PULL_MAGIC_XOR, PULL_BLOCK_DESCS_NR, PULL_REPLIES_PER_BLOCK, PULL_REPLY_LENGTH_MAX,
    PULL_RETRANSMIT_TIMEOUT,
};
use omx_abi::status::PullStatus;
use omx_abi::wire::PacketBody;
use omx_core::slotmap::SlotId;
use omx_mm::Region;
use tracing::{debug, warn};

use crate::link::LoopbackLink;

/// Number of silent retransmit cycles tolerated before a handle gives up
/// for good. `retransmit_deadline` is set once, at handle creation, to
/// `now + RETRANSMIT_TIMEOUT * MAX_SILENT_RETRANSMITS` and never touched
/// again by the periodic tick — the same absolute ceiling the original
/// driver computes once from `resend_timeout_jiffies + jiffies`.
const MAX_SILENT_RETRANSMITS: u32 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandleState {
    Ok,
    TimerMustExit,
    TimerExited,
}

struct BlockDesc {
    frame_index: u32,
    nr_requested_frames: u32,
    missing_bitmap: u64,
    already_rerequested: bool,
}

impl BlockDesc {
    fn is_complete(&self) -> bool {
        self.missing_bitmap == 0
    }
}

/// Everything the puller needs to drive one in-flight pull to completion
/// (spec.md §3 "Slot table", §4.8).
pub struct PullHandle {
    pub id: SlotId,
    state: Mutex<HandleState>,
    done: Mutex<Option<PullStatus>>,
    remaining_length: AtomicU64,
    /// Frame index of `blocks.front()`; reply frame numbers are relative to
    /// this when computing which block/bit they land on.
    window_base_frame_index: AtomicU32,
    next_frame_index: AtomicU32,
    blocks: Mutex<VecDeque<BlockDesc>>,
    retransmit_deadline: Mutex<Instant>,

    pub local_region: Arc<Region>,
    pub local_base_offset: u64,
    pub total_length: u64,
    pub remote_region_id: u32,
    pub remote_offset: u64,
    pub puller_endpoint: u8,
    pub target_endpoint: u8,
    pub target_session: u32,
    pub target_peer_index: u32,
    pub iface_index: u32,
    pub owner_endpoint_index: u32,
}

fn frames_for(bytes: u64) -> u32 {
    bytes.div_ceil(PULL_REPLY_LENGTH_MAX as u64) as u32
}

impl PullHandle {
    pub fn is_done(&self) -> bool {
        self.done.lock().unwrap().is_some()
    }

    pub fn status(&self) -> Option<PullStatus> {
        *self.done.lock().unwrap()
    }

    fn complete(&self, status: PullStatus) {
        let mut done = self.done.lock().unwrap();
        if done.is_some() {
            return;
        }
        *done = Some(status);
        *self.state.lock().unwrap() = HandleState::TimerMustExit;
    }

    fn new_block(&self, frame_index: u32) -> Option<BlockDesc> {
        let consumed_bytes = frame_index as u64 * PULL_REPLY_LENGTH_MAX as u64;
        if consumed_bytes >= self.total_length {
            return None;
        }
        let block_bytes = (self.total_length - consumed_bytes)
            .min(PULL_REPLY_LENGTH_MAX as u64 * PULL_REPLIES_PER_BLOCK as u64);
        let nr = frames_for(block_bytes);
        Some(BlockDesc {
            frame_index,
            nr_requested_frames: nr,
            missing_bitmap: if nr >= 64 { u64::MAX } else { (1u64 << nr) - 1 },
            already_rerequested: false,
        })
    }

    fn block_length_bytes(&self, block: &BlockDesc) -> u32 {
        let start = block.frame_index as u64 * PULL_REPLY_LENGTH_MAX as u64;
        ((self.total_length - start).min(block.nr_requested_frames as u64 * PULL_REPLY_LENGTH_MAX as u64)) as u32
    }
}

/// Handles keyed by `(iface_index, owner_endpoint_index, slot raw id)`, plus
/// the done-but-awaiting-timer-exit list the cleanup thread sweeps (spec.md
/// §4.8 "Handle lifecycle and shutdown").
pub struct PullTable {
    running: Mutex<HashMap<(u32, u32, u32), Arc<PullHandle>>>,
    done_timer: Mutex<Vec<Arc<PullHandle>>>,
}

impl Default for PullTable {
    fn default() -> Self {
        Self::new()
    }
}

impl PullTable {
    pub fn new() -> Self {
        Self {
            running: Mutex::new(HashMap::new()),
            done_timer: Mutex::new(Vec::new()),
        }
    }

    fn key(handle: &PullHandle) -> (u32, u32, u32) {
        (handle.iface_index, handle.owner_endpoint_index, handle.id.raw())
    }

    pub fn get(&self, iface_index: u32, owner_endpoint_index: u32, slot_raw: u32) -> Option<Arc<PullHandle>> {
        self.running
            .lock()
            .unwrap()
            .get(&(iface_index, owner_endpoint_index, slot_raw))
            .cloned()
    }

    pub fn running_count(&self) -> usize {
        self.running.lock().unwrap().len()
    }

    /// Moves every running handle for `(iface_index, owner_endpoint_index)`
    /// to MUST_EXIT, completing it with `Aborted` (spec.md §4.8, §5:
    /// "Endpoint close unconditionally cancels outstanding pulls").
    pub fn cancel_all_for_endpoint(&self, iface_index: u32, owner_endpoint_index: u32) -> usize {
        let mut running = self.running.lock().unwrap();
        let keys: Vec<_> = running
            .keys()
            .filter(|(i, e, _)| *i == iface_index && *e == owner_endpoint_index)
            .copied()
            .collect();
        let mut done_timer = self.done_timer.lock().unwrap();
        for key in &keys {
            if let Some(handle) = running.remove(key) {
                handle.complete(PullStatus::Aborted);
                done_timer.push(handle);
            }
        }
        keys.len()
    }

    /// Runs one retransmit-timer tick across every running handle: declares
    /// absolute timeouts dead and resends blocks that need it (spec.md §4.8
    /// "Retransmit timer"). `retransmit_deadline` is set once at handle
    /// creation and never rearmed here — it is an absolute ceiling on the
    /// handle's lifetime, not a per-tick progress timer. Returns the
    /// handles that timed out this tick, for the caller to post `PullDone`
    /// against.
    pub fn retransmit_tick(
        &self,
        link: &LoopbackLink,
        peer_mac: impl Fn(u32) -> Option<(omx_abi::MacAddr, omx_abi::MacAddr)>,
        now: Instant,
    ) -> Vec<Arc<PullHandle>> {
        let handles: Vec<_> = self.running.lock().unwrap().values().cloned().collect();
        let mut timed_out = Vec::new();
        for handle in handles {
            if *handle.state.lock().unwrap() != HandleState::Ok {
                continue;
            }
            let deadline = *handle.retransmit_deadline.lock().unwrap();
            if now > deadline {
                handle.complete(PullStatus::Timeout);
                self.move_to_done_timer(&handle);
                timed_out.push(handle);
                continue;
            }
            let Some((src_mac, dst_mac)) = peer_mac(handle.target_peer_index) else {
                continue;
            };
            let mut blocks = handle.blocks.lock().unwrap();
            for (i, block) in blocks.iter_mut().enumerate() {
                let should_resend = i == 0 || !block.is_complete();
                if !should_resend {
                    continue;
                }
                let body = PacketBody::Pull {
                    src_endpoint: handle.puller_endpoint,
                    dst_endpoint: handle.target_endpoint,
                    session: handle.target_session,
                    block_length: handle.block_length_bytes(block),
                    src_pull_handle: handle.id.raw(),
                    src_magic: handle.puller_endpoint as u32 ^ ENDPOINT_PULL_MAGIC_XOR,
                    frame_index: block.frame_index,
                    first_frame_offset: block.frame_index * PULL_REPLY_LENGTH_MAX as u32,
                    pulled_rdma_id: handle.remote_region_id,
                    pulled_rdma_offset: handle.remote_offset as u32,
                    total_length: handle.total_length as u32,
                };
                let frame = omx_abi::wire::Frame::new(
                    omx_abi::wire::EthHeader {
                        dst: dst_mac,
                        src: src_mac,
                        ethertype: omx_abi::limits::ETHERTYPE_OMX,
                    },
                    handle.target_peer_index as u16,
                    body,
                );
                link.transmit(handle.iface_index, frame.encode());
            }
        }
        timed_out
    }

    fn move_to_done_timer(&self, handle: &Arc<PullHandle>) {
        self.running.lock().unwrap().remove(&Self::key(handle));
        self.done_timer.lock().unwrap().push(handle.clone());
    }

    /// Sweeps handles whose timer has observed MUST_EXIT and transitioned
    /// to EXITED, releasing this table's reference (spec.md §4.8: cleanup
    /// thread calls the synchronous del_timer_sync equivalent).
    pub fn sweep_timer_exited(&self) -> usize {
        let mut done_timer = self.done_timer.lock().unwrap();
        let before = done_timer.len();
        done_timer.retain_mut(|h| {
            let mut state = h.state.lock().unwrap();
            if *state == HandleState::TimerMustExit {
                *state = HandleState::TimerExited;
            }
            *state != HandleState::TimerExited
        });
        before - done_timer.len()
    }
}

/// Starts a new pull, registers its first `BLOCK_DESCS_NR` descriptors, and
/// transmits their `PULL_REQUEST` frames (spec.md §4.8 "Puller side").
#[allow(clippy::too_many_arguments)]
pub fn ioctl_pull(
    table: &PullTable,
    link: &LoopbackLink,
    pull_slots: &omx_core::slotmap::SlotAllocator,
    local_region: Arc<Region>,
    local_base_offset: u64,
    total_length: u64,
    remote_region_id: u32,
    remote_offset: u64,
    iface_index: u32,
    owner_endpoint_index: u32,
    puller_endpoint: u8,
    target_endpoint: u8,
    target_session: u32,
    target_peer_index: u32,
    src_mac: omx_abi::MacAddr,
    dst_mac: omx_abi::MacAddr,
) -> Option<Arc<PullHandle>> {
    let id = pull_slots.allocate()?;
    let now = Instant::now();
    let handle = Arc::new(PullHandle {
        id,
        state: Mutex::new(HandleState::Ok),
        done: Mutex::new(None),
        remaining_length: AtomicU64::new(total_length),
        window_base_frame_index: AtomicU32::new(0),
        next_frame_index: AtomicU32::new(0),
        blocks: Mutex::new(VecDeque::new()),
        retransmit_deadline: Mutex::new(now + PULL_RETRANSMIT_TIMEOUT * MAX_SILENT_RETRANSMITS),
        local_region,
        local_base_offset,
        total_length,
        remote_region_id,
        remote_offset,
        puller_endpoint,
        target_endpoint,
        target_session,
        target_peer_index,
        iface_index,
        owner_endpoint_index,
    });

    {
        let mut blocks = handle.blocks.lock().unwrap();
        for _ in 0..PULL_BLOCK_DESCS_NR {
            let next_index = handle.next_frame_index.load(Ordering::Acquire);
            let Some(block) = handle.new_block(next_index) else {
                break;
            };
            handle
                .next_frame_index
                .store(next_index + block.nr_requested_frames, Ordering::Release);
            request_block_frame(&handle, &block, link, src_mac, dst_mac);
            blocks.push_back(block);
        }
    }

    if total_length == 0 {
        handle.complete(PullStatus::Success);
    }

    table
        .running
        .lock()
        .unwrap()
        .insert(PullTable::key(&handle), handle.clone());
    Some(handle)
}

fn request_block_frame(
    handle: &PullHandle,
    block: &BlockDesc,
    link: &LoopbackLink,
    src_mac: omx_abi::MacAddr,
    dst_mac: omx_abi::MacAddr,
) {
    let body = PacketBody::Pull {
        src_endpoint: handle.puller_endpoint,
        dst_endpoint: handle.target_endpoint,
        session: handle.target_session,
        block_length: handle.block_length_bytes(block),
        src_pull_handle: handle.id.raw(),
        src_magic: handle.puller_endpoint as u32 ^ ENDPOINT_PULL_MAGIC_XOR,
        frame_index: block.frame_index,
        first_frame_offset: block.frame_index * PULL_REPLY_LENGTH_MAX as u32,
        pulled_rdma_id: handle.remote_region_id,
        pulled_rdma_offset: handle.remote_offset as u32,
        total_length: handle.total_length as u32,
    };
    let frame = omx_abi::wire::Frame::new(
        omx_abi::wire::EthHeader {
            dst: dst_mac,
            src: src_mac,
            ethertype: omx_abi::limits::ETHERTYPE_OMX,
        },
        handle.target_peer_index as u16,
        body,
    );
    link.transmit(handle.iface_index, frame.encode());
}

/// Target side: answers a `PULL_REQUEST` with a burst of `PULL_REPLY`
/// frames read out of `source_region` (spec.md §4.8 "Target side").
#[allow(clippy::too_many_arguments)]
pub fn on_pull_request(
    link: &LoopbackLink,
    source_region: &Region,
    iface_index: u32,
    src_endpoint: u8,
    dst_endpoint: u8,
    block_length: u32,
    src_pull_handle: u32,
    src_magic: u32,
    frame_index: u32,
    pulled_rdma_offset: u32,
    requester_peer_index: u32,
    src_mac: omx_abi::MacAddr,
    dst_mac: omx_abi::MacAddr,
) -> u32 {
    let nr_frames = block_length.div_ceil(PULL_REPLY_LENGTH_MAX as u32);
    let mut sent = 0u32;
    for i in 0..nr_frames {
        let frame_seqnum = frame_index + i;
        let msg_offset = frame_seqnum as u64 * PULL_REPLY_LENGTH_MAX as u64;
        let remaining = block_length as u64 - (i as u64 * PULL_REPLY_LENGTH_MAX as u64);
        let frame_length = remaining.min(PULL_REPLY_LENGTH_MAX as u64) as u16;
        let payload = source_region.read_at(pulled_rdma_offset as u64 + msg_offset, frame_length as u64);
        let body = PacketBody::PullReply {
            msg_offset: msg_offset as u32,
            frame_seqnum: frame_seqnum as u16,
            frame_length,
            dst_pull_handle: src_pull_handle,
            dst_magic: src_magic,
            payload,
        };
        let frame = omx_abi::wire::Frame::new(
            omx_abi::wire::EthHeader {
                dst: dst_mac,
                src: src_mac,
                ethertype: omx_abi::limits::ETHERTYPE_OMX,
            },
            requester_peer_index as u16,
            body,
        );
        link.transmit(iface_index, frame.encode());
        sent += 1;
    }
    let _ = (src_endpoint, dst_endpoint);
    sent
}

/// Outcome of processing one `PULL_REPLY`, used by the caller to decide
/// whether to post a `PULL_DONE` event (spec.md §4.8, step 10).
pub enum ReplyOutcome {
    Progressed,
    Duplicate,
    Completed(PullStatus),
    UnknownHandle,
}

/// Puller side: processes one `PULL_REPLY` frame against `table`
/// (spec.md §4.8 "Puller on PULL_REPLY", steps 1-8).
#[allow(clippy::too_many_arguments)]
pub fn on_pull_reply(
    table: &PullTable,
    link: &LoopbackLink,
    iface_index: u32,
    owner_endpoint_index: u32,
    dst_pull_handle: u32,
    dst_magic: u32,
    msg_offset: u32,
    frame_seqnum: u16,
    frame_length: u16,
    payload: &[u8],
    peer_mac: impl Fn(u32) -> Option<(omx_abi::MacAddr, omx_abi::MacAddr)>,
) -> ReplyOutcome {
    let Some(handle) = table.get(iface_index, owner_endpoint_index, dst_pull_handle) else {
        return ReplyOutcome::UnknownHandle;
    };
    if handle.id.raw() != dst_pull_handle {
        return ReplyOutcome::UnknownHandle;
    }
    let expected_magic = handle.puller_endpoint as u32 ^ ENDPOINT_PULL_MAGIC_XOR;
    if dst_magic != expected_magic {
        return ReplyOutcome::UnknownHandle;
    }
    if *handle.state.lock().unwrap() != HandleState::Ok {
        return ReplyOutcome::UnknownHandle;
    }

    let window_base = handle.window_base_frame_index.load(Ordering::Acquire);
    let rel = (frame_seqnum as u32).wrapping_sub(window_base);
    let expected_msg_offset = (window_base as u64 + rel as u64) * PULL_REPLY_LENGTH_MAX as u64;
    if msg_offset as u64 != expected_msg_offset {
        warn!(frame_seqnum, msg_offset, "pull reply offset mismatch, dropping");
        return ReplyOutcome::Duplicate;
    }

    let mut blocks = handle.blocks.lock().unwrap();
    let idesc = (rel / PULL_REPLIES_PER_BLOCK as u32) as usize;
    let bit = rel % PULL_REPLIES_PER_BLOCK as u32;
    let Some(block) = blocks.get_mut(idesc) else {
        return ReplyOutcome::Duplicate;
    };
    let mask = 1u64 << bit;
    if block.missing_bitmap & mask == 0 {
        return ReplyOutcome::Duplicate;
    }
    block.missing_bitmap &= !mask;

    handle.local_region.write_at(handle.local_base_offset + msg_offset as u64, &payload[..frame_length as usize]);
    handle.remaining_length.fetch_sub(frame_length as u64, Ordering::AcqRel);

    progress_pipeline(&handle, &mut blocks, link, &peer_mac);
    drop(blocks);

    if handle.remaining_length.load(Ordering::Acquire) == 0 && handle.blocks.lock().unwrap().is_empty() {
        handle.complete(PullStatus::Success);
        table.move_to_done_timer(&handle);
        return ReplyOutcome::Completed(PullStatus::Success);
    }
    ReplyOutcome::Progressed
}

fn progress_pipeline(
    handle: &PullHandle,
    blocks: &mut VecDeque<BlockDesc>,
    link: &LoopbackLink,
    peer_mac: &impl Fn(u32) -> Option<(omx_abi::MacAddr, omx_abi::MacAddr)>,
) {
    loop {
        let Some(first) = blocks.front() else { break };
        if !first.is_complete() {
            if blocks.iter().skip(1).any(|b| b.is_complete()) {
                let first_frame_index = first.frame_index;
                if let Some(front) = blocks.front_mut() {
                    if !front.already_rerequested {
                        front.already_rerequested = true;
                        debug!(frame_index = first_frame_index, "re-requesting stalled first pull block");
                        if let Some((src_mac, dst_mac)) = peer_mac(handle.target_peer_index) {
                            request_block_frame(handle, front, link, src_mac, dst_mac);
                        }
                    }
                }
            }
            break;
        }

        let completed = blocks.pop_front().unwrap();
        handle
            .window_base_frame_index
            .store(completed.frame_index + completed.nr_requested_frames, Ordering::Release);

        let next_index = handle.next_frame_index.load(Ordering::Acquire);
        if let Some(new_block) = handle.new_block(next_index) {
            handle
                .next_frame_index
                .store(next_index + new_block.nr_requested_frames, Ordering::Release);
            if let Some((src_mac, dst_mac)) = peer_mac(handle.target_peer_index) {
                request_block_frame(handle, &new_block, link, src_mac, dst_mac);
            }
            blocks.push_back(new_block);
        }
    }
}

/// A `NACK_MCP` targeting this handle completes it with the mapped status
/// (spec.md §4.8 "NACK-mcp").
pub fn on_nack_mcp(table: &PullTable, iface_index: u32, owner_endpoint_index: u32, src_pull_handle: u32, status: PullStatus) {
    if let Some(handle) = table.get(iface_index, owner_endpoint_index, src_pull_handle) {
        handle.complete(status);
        table.move_to_done_timer(&handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use omx_core::slotmap::SlotAllocator;
    use omx_mm::{Region, Segment};

    fn mac(n: u8) -> omx_abi::MacAddr {
        omx_abi::MacAddr::new([2, 0, 0, 0, 0, n])
    }

    fn setup(total_length: u64) -> (PullTable, LoopbackLink, SlotAllocator, Arc<PullHandle>) {
        let table = PullTable::new();
        let link = LoopbackLink::new();
        let slots = SlotAllocator::new(8);
        let local_region = Arc::new(Region::new(1, vec![Segment::new(0, total_length)]).unwrap());
        let handle = ioctl_pull(
            &table,
            &link,
            &slots,
            local_region,
            0,
            total_length,
            42,
            0,
            0,
            0,
            0,
            1,
            0xdead_beef,
            0,
            mac(1),
            mac(2),
        )
        .unwrap();
        (table, link, slots, handle)
    }

    #[test]
    fn small_pull_completes_immediately_with_zero_length() {
        let (table, link, slots, handle) = setup(0);
        assert_eq!(handle.status(), Some(PullStatus::Success));
        let _ = (table, link, slots);
    }

    #[test]
    fn single_block_pull_round_trips_through_request_and_reply() {
        let total = (PULL_REPLY_LENGTH_MAX * 2) as u64;
        let (table, link, _slots, handle) = setup(total);
        assert!(handle.status().is_none());

        let target_region = Region::new(7, vec![Segment::new(0, total)]).unwrap();
        target_region.write_at(0, &vec![0xABu8; total as usize]);

        let frames = link.poll();
        assert_eq!(frames.len(), 1, "expect exactly one PULL_REQUEST frame");
        let decoded = omx_abi::wire::Frame::decode(&frames[0].bytes).unwrap();
        let PacketBody::Pull {
            block_length,
            frame_index,
            src_pull_handle,
            src_magic,
            pulled_rdma_offset,
            ..
        } = decoded.body
        else {
            panic!("expected PULL body");
        };

        let sent = on_pull_request(
            &link,
            &target_region,
            0,
            0,
            0,
            block_length,
            src_pull_handle,
            src_magic,
            frame_index,
            pulled_rdma_offset,
            0,
            mac(2),
            mac(1),
        );
        assert_eq!(sent, 2);

        let replies = link.poll();
        assert_eq!(replies.len(), 2);
        for r in replies {
            let decoded = omx_abi::wire::Frame::decode(&r.bytes).unwrap();
            let PacketBody::PullReply {
                msg_offset,
                frame_seqnum,
                frame_length,
                dst_pull_handle,
                dst_magic,
                payload,
            } = decoded.body
            else {
                panic!("expected PULL_REPLY body");
            };
            let outcome = on_pull_reply(
                &table,
                &link,
                0,
                0,
                dst_pull_handle,
                dst_magic,
                msg_offset,
                frame_seqnum,
                frame_length,
                &payload,
                |_| Some((mac(1), mac(2))),
            );
            match outcome {
                ReplyOutcome::Progressed | ReplyOutcome::Completed(_) => {}
                _ => panic!("unexpected reply outcome"),
            }
        }

        assert_eq!(handle.status(), Some(PullStatus::Success));
        assert_eq!(handle.local_region.read_at(0, total), vec![0xABu8; total as usize]);
    }

    #[test]
    fn duplicate_reply_is_rejected_and_does_not_double_count() {
        let total = PULL_REPLY_LENGTH_MAX as u64;
        let (table, link, _slots, handle) = setup(total);
        let frames = link.poll();
        let decoded = omx_abi::wire::Frame::decode(&frames[0].bytes).unwrap();
        let PacketBody::Pull {
            dst_endpoint: _,
            src_pull_handle,
            src_magic,
            ..
        } = decoded.body
        else {
            panic!()
        };
        let reply = |payload: Vec<u8>| {
            on_pull_reply(
                &table,
                &link,
                0,
                0,
                src_pull_handle,
                src_magic,
                0,
                0,
                PULL_REPLY_LENGTH_MAX as u16,
                &payload,
                |_| Some((mac(1), mac(2))),
            )
        };
        let payload = vec![1u8; PULL_REPLY_LENGTH_MAX];
        assert!(matches!(reply(payload.clone()), ReplyOutcome::Completed(PullStatus::Success)));
        assert!(matches!(reply(payload), ReplyOutcome::UnknownHandle));
        let _ = handle;
    }

    #[test]
    fn cancel_all_for_endpoint_aborts_running_handles() {
        let (table, _link, _slots, handle) = setup(PULL_REPLY_LENGTH_MAX as u64);
        assert_eq!(table.running_count(), 1);
        let n = table.cancel_all_for_endpoint(0, 0);
        assert_eq!(n, 1);
        assert_eq!(handle.status(), Some(PullStatus::Aborted));
        assert_eq!(table.running_count(), 0);
    }

    #[test]
    fn retransmit_tick_times_out_a_silent_handle() {
        let (table, link, _slots, handle) = setup(PULL_REPLY_LENGTH_MAX as u64);
        let far_future = Instant::now() + Duration::from_secs(3600);
        let timed_out = table.retransmit_tick(&link, |_| Some((mac(1), mac(2))), far_future);
        assert_eq!(timed_out.len(), 1);
        assert_eq!(handle.status(), Some(PullStatus::Timeout));
    }

    /// The deadline is an absolute ceiling set once at creation, not a
    /// per-tick progress timer: ticking a silent handle every
    /// `PULL_RETRANSMIT_TIMEOUT` for `MAX_SILENT_RETRANSMITS` cycles must
    /// still expire it on schedule rather than being pushed out forever by
    /// each tick's own resend.
    #[test]
    fn repeated_silent_ticks_still_expire_on_the_original_deadline() {
        let (table, link, _slots, handle) = setup(PULL_REPLY_LENGTH_MAX as u64);
        let start = Instant::now();

        for cycle in 1..MAX_SILENT_RETRANSMITS {
            let now = start + PULL_RETRANSMIT_TIMEOUT * cycle;
            let timed_out = table.retransmit_tick(&link, |_| Some((mac(1), mac(2))), now);
            assert!(timed_out.is_empty(), "must not time out before its absolute deadline");
            link.poll();
        }

        let past_deadline = start + PULL_RETRANSMIT_TIMEOUT * MAX_SILENT_RETRANSMITS + Duration::from_millis(1);
        let timed_out = table.retransmit_tick(&link, |_| Some((mac(1), mac(2))), past_deadline);
        assert_eq!(timed_out.len(), 1);
        assert_eq!(handle.status(), Some(PullStatus::Timeout));
    }
}
