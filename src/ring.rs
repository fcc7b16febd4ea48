//! Descriptor ring and buffer pool (C6).
//!
//! Fixed-size TX/RX rings with Linux-style `cur`/`dirty` monotonic cursors,
//! grounded in the teacher's virtqueue cursor pair
//! (`drivers/virtio/virtqueue/split.rs`'s `next_avail`/`last_used`), but
//! adapted to this chip family's own descriptor layout (spec §6) instead
//! of the virtio ring format. Arithmetic uses `Wrapping<u16>` so that
//! cursor overflow (P1) is well-defined wraparound rather than a panic.

use std::num::Wrapping;

use bitflags::bitflags;

use crate::error::Error;
use crate::RING_SIZE;

bitflags! {
    /// Status word bits (spec §6 descriptor layout, word 1).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DescriptorStatus: u32 {
        /// Device has finished processing this descriptor.
        const COMPLETE = 1 << 31;
        /// An error occurred processing this descriptor.
        const ERROR = 1 << 30;
        /// Transmit underrun / receive overrun on this descriptor.
        const UNDERRUN_OVERRUN = 1 << 29;
        /// Alignment error.
        const ALIGNMENT_ERROR = 1 << 28;
        /// Length mask (bits 15..0), applied manually, not a flag bit.
        const LENGTH_MASK = 0xffff;
    }
}

bitflags! {
    /// Fragment length/flags word bits (spec §6 descriptor layout, word 3).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FragmentFlags: u32 {
        /// This is the last fragment of the frame.
        const LAST_FRAGMENT = 1 << 31;
        /// IP checksum generation/validation enabled for this fragment.
        const IP_CHECKSUM = 1 << 30;
        /// TCP checksum generation/validation enabled for this fragment.
        const TCP_CHECKSUM = 1 << 29;
        /// UDP checksum generation/validation enabled for this fragment.
        const UDP_CHECKSUM = 1 << 28;
        /// Length mask (bits 15..0).
        const LENGTH_MASK = 0xffff;
    }
}

/// One descriptor: four 32-bit little-endian words (spec §6).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Descriptor {
    /// Physical address of the next descriptor (0 terminates the chain).
    pub next_phys: u32,
    /// Status word; device-owned bits set by hardware.
    pub status: u32,
    /// Physical address of this descriptor's single fragment buffer.
    pub fragment_phys: u32,
    /// Fragment length and flag bits, packed per [`FragmentFlags`].
    pub fragment_flags: u32,
}

impl Descriptor {
    /// The frame length hardware wrote into the status word, once
    /// [`DescriptorStatus::COMPLETE`] is set.
    pub fn length(&self) -> u16 {
        (self.status & DescriptorStatus::LENGTH_MASK.bits()) as u16
    }

    /// True once the device has finished with this descriptor.
    pub fn is_complete(&self) -> bool {
        self.status & DescriptorStatus::COMPLETE.bits() != 0
    }

    /// True if the device flagged an error while processing this
    /// descriptor.
    pub fn has_error(&self) -> bool {
        self.status & DescriptorStatus::ERROR.bits() != 0
    }
}

/// Who currently owns a ring slot's buffer (spec §4.5's ownership tags).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    /// Free, available to be handed out.
    Free,
    /// Held by driver software, being built up or harvested.
    Driver,
    /// Handed to the device, awaiting hardware completion.
    Device,
}

/// A fixed-size pool of buffers backing ring slots, indexed by buffer id.
/// Each buffer tracks its own [`Ownership`] tag; the zero-leak invariant
/// (spec §4.9, P2) is "every buffer is [`Ownership::Free`] once detach
/// completes".
pub struct BufferPool {
    buffers: Vec<Vec<u8>>,
    owners: Vec<Ownership>,
    free_list: Vec<u16>,
    #[cfg(feature = "leak-tracking")]
    outstanding: std::collections::HashSet<u16>,
}

impl BufferPool {
    /// Allocates `count` buffers of `buffer_size` bytes, all initially
    /// free.
    pub fn new(count: usize, buffer_size: usize) -> Self {
        BufferPool {
            buffers: (0..count).map(|_| vec![0u8; buffer_size]).collect(),
            owners: vec![Ownership::Free; count],
            free_list: (0..count as u16).collect(),
            #[cfg(feature = "leak-tracking")]
            outstanding: std::collections::HashSet::new(),
        }
    }

    /// Takes a free buffer id, tagging it [`Ownership::Driver`].
    pub fn acquire(&mut self) -> Result<u16, Error> {
        let id = self.free_list.pop().ok_or(Error::BufferPoolEmpty)?;
        self.owners[id as usize] = Ownership::Driver;
        #[cfg(feature = "leak-tracking")]
        self.outstanding.insert(id);
        Ok(id)
    }

    /// Returns a buffer to the free list, regardless of its current
    /// ownership tag — callers are expected to have already synchronized
    /// with the device side.
    pub fn release(&mut self, id: u16) {
        self.owners[id as usize] = Ownership::Free;
        self.free_list.push(id);
        #[cfg(feature = "leak-tracking")]
        self.outstanding.remove(&id);
    }

    /// Marks a buffer as handed to the device.
    pub fn mark_device_owned(&mut self, id: u16) {
        self.owners[id as usize] = Ownership::Device;
    }

    /// Mutable access to one buffer's backing bytes.
    pub fn buffer_mut(&mut self, id: u16) -> &mut [u8] {
        &mut self.buffers[id as usize]
    }

    /// Read access to one buffer's backing bytes.
    pub fn buffer(&self, id: u16) -> &[u8] {
        &self.buffers[id as usize]
    }

    /// Number of buffers still free.
    pub fn free_count(&self) -> usize {
        self.free_list.len()
    }

    /// True if every buffer is free — the detach-time zero-leak check
    /// (spec §4.9, P2). With `leak-tracking` enabled this also requires the
    /// `outstanding` side-table to agree there are no live acquisitions, so
    /// the two bookkeeping mechanisms can't silently diverge.
    pub fn all_free(&self) -> bool {
        let owners_free = self.owners.iter().all(|o| *o == Ownership::Free);
        #[cfg(feature = "leak-tracking")]
        {
            owners_free && self.outstanding.is_empty()
        }
        #[cfg(not(feature = "leak-tracking"))]
        {
            owners_free
        }
    }

    /// Buffer ids where the `outstanding` side-table and `owners` disagree
    /// about whether the buffer is live (spec §4.5's leak detector). A
    /// non-empty result means `acquire`/`release` and the owner tags were
    /// driven out of sync by a caller bypassing one or the other.
    #[cfg(feature = "leak-tracking")]
    pub fn diverged_ids(&self) -> Vec<u16> {
        (0..self.owners.len() as u16)
            .filter(|&id| self.outstanding.contains(&id) != (self.owners[id as usize] != Ownership::Free))
            .collect()
    }
}

/// A fixed-capacity descriptor ring with `cur`/`dirty` cursors (spec §6,
/// §4.5). `cur` is the next slot software will fill; `dirty` is the next
/// slot software has not yet reclaimed from the device. Both cursors are
/// monotonically increasing `u16`s that wrap; the occupied slot count is
/// always `(cur - dirty) % (2*RING_SIZE)`... but since the classic
/// convention only needs slot *index* modulo [`RING_SIZE`], we keep the
/// cursors themselves wrapping over the full `u16` range the way the
/// teacher's virtqueue cursors do, and reduce mod `RING_SIZE` only when
/// indexing.
pub struct Ring {
    descriptors: [Descriptor; RING_SIZE],
    cur: Wrapping<u16>,
    dirty: Wrapping<u16>,
}

impl Ring {
    /// Builds an empty ring with both cursors at the given seed value —
    /// tests use a seed near `u16::MAX` to exercise wraparound (spec §8 P1).
    pub fn with_seed(seed: u16) -> Self {
        Ring {
            descriptors: [Descriptor::default(); RING_SIZE],
            cur: Wrapping(seed),
            dirty: Wrapping(seed),
        }
    }

    fn slot(cursor: Wrapping<u16>) -> usize {
        (cursor.0 as usize) % RING_SIZE
    }

    /// Number of slots between `dirty` and `cur`, i.e. slots currently
    /// occupied by driver- or device-owned descriptors.
    pub fn occupied(&self) -> usize {
        (self.cur - self.dirty).0 as usize
    }

    /// Number of free slots available for a new enqueue.
    pub fn free_slots(&self) -> usize {
        RING_SIZE - self.occupied()
    }

    /// Writes a descriptor into the next `cur` slot and advances `cur`.
    /// Fails with [`Error::RingFull`] if every slot is occupied.
    pub fn enqueue(&mut self, descriptor: Descriptor) -> Result<(), Error> {
        if self.free_slots() == 0 {
            return Err(Error::RingFull);
        }
        let slot = Self::slot(self.cur);
        self.descriptors[slot] = descriptor;
        self.cur += Wrapping(1);
        Ok(())
    }

    /// Reclaims descriptors starting at `dirty` while they are marked
    /// complete by the device, calling `on_reap` with each one and
    /// advancing `dirty` past it. Stops at the first not-yet-complete
    /// descriptor or when `dirty` catches up to `cur`.
    pub fn reap(&mut self, mut on_reap: impl FnMut(Descriptor)) -> usize {
        let mut reaped = 0;
        while self.dirty != self.cur {
            let slot = Self::slot(self.dirty);
            let descriptor = self.descriptors[slot];
            if !descriptor.is_complete() {
                break;
            }
            on_reap(descriptor);
            self.dirty += Wrapping(1);
            reaped += 1;
        }
        reaped
    }

    /// The descriptor currently at `cur`, for hardware to reach through
    /// `next_phys` chaining before the enqueue to that slot happens, and
    /// for a soft reset to sanity-check before discarding in-flight state
    /// (spec §4.7 step 2).
    pub fn descriptor_at_cur(&self) -> Descriptor {
        self.descriptors[Self::slot(self.cur)]
    }

    /// Unconditionally reclaims every descriptor between `dirty` and `cur`,
    /// calling `on_drain` with each one regardless of completion, and
    /// leaves the ring in the drained state. Used by a soft reset, where
    /// the device's own notion of completion can no longer be trusted.
    pub fn drain(&mut self, mut on_drain: impl FnMut(Descriptor)) {
        while self.dirty != self.cur {
            let slot = Self::slot(self.dirty);
            on_drain(self.descriptors[slot]);
            self.dirty += Wrapping(1);
        }
    }

    /// True once `cur == dirty`, i.e. the ring holds no outstanding
    /// descriptors (spec §4.9's drain condition before detach).
    pub fn is_drained(&self) -> bool {
        self.cur == self.dirty
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete_descriptor(length: u16) -> Descriptor {
        Descriptor {
            status: DescriptorStatus::COMPLETE.bits() | length as u32,
            ..Default::default()
        }
    }

    #[test]
    fn cursor_wraps_past_u16_max_without_panicking() {
        // spec §8 P1: seed cur == dirty == 0xFFFE, enqueue 3 frames.
        let mut ring = Ring::with_seed(0xfffe);
        for _ in 0..3 {
            ring.enqueue(complete_descriptor(64)).unwrap();
        }
        assert_eq!(ring.occupied(), 3);
        assert_eq!(ring.free_slots(), RING_SIZE - 3);
    }

    #[test]
    fn reap_stops_at_first_incomplete_descriptor() {
        let mut ring = Ring::with_seed(0);
        ring.enqueue(complete_descriptor(64)).unwrap();
        ring.enqueue(Descriptor::default()).unwrap(); // not complete
        ring.enqueue(complete_descriptor(64)).unwrap();

        let mut reaped = Vec::new();
        let n = ring.reap(|d| reaped.push(d.length()));
        assert_eq!(n, 1);
        assert_eq!(reaped, vec![64]);
        assert!(!ring.is_drained());
    }

    #[test]
    fn ring_full_is_rejected_without_advancing_cur() {
        let mut ring = Ring::with_seed(0);
        for _ in 0..RING_SIZE {
            ring.enqueue(Descriptor::default()).unwrap();
        }
        assert_eq!(ring.enqueue(Descriptor::default()).unwrap_err(), Error::RingFull);
        assert_eq!(ring.occupied(), RING_SIZE);
    }

    #[test]
    fn buffer_pool_zero_leak_after_acquire_then_release_all() {
        // spec §8 P2.
        let mut pool = BufferPool::new(RING_SIZE, 1536);
        let ids: Vec<u16> = (0..RING_SIZE).map(|_| pool.acquire().unwrap()).collect();
        assert_eq!(pool.free_count(), 0);
        for id in ids {
            pool.mark_device_owned(id);
            pool.release(id);
        }
        assert!(pool.all_free());
    }

    #[test]
    fn buffer_pool_exhaustion_is_reported_not_panicked() {
        let mut pool = BufferPool::new(1, 1536);
        pool.acquire().unwrap();
        assert_eq!(pool.acquire().unwrap_err(), Error::BufferPoolEmpty);
    }

    #[test]
    #[cfg(feature = "leak-tracking")]
    fn leak_tracking_reports_a_buffer_released_behind_its_own_back() {
        let mut pool = BufferPool::new(RING_SIZE, 1536);
        let id = pool.acquire().unwrap();
        // Simulate a caller that forgot to release through the pool by
        // poking the owner tag directly — `outstanding` still thinks the
        // buffer is live.
        pool.owners[id as usize] = Ownership::Free;
        assert_eq!(pool.diverged_ids(), vec![id]);
        assert!(!pool.all_free());
    }

    #[test]
    fn ring_drain_reclaims_regardless_of_completion_and_leaves_ring_drained() {
        let mut ring = Ring::with_seed(0);
        ring.enqueue(complete_descriptor(64)).unwrap();
        ring.enqueue(Descriptor::default()).unwrap(); // not complete
        let mut drained = Vec::new();
        ring.drain(|d| drained.push(d.length()));
        assert_eq!(drained, vec![64, 0]);
        assert!(ring.is_drained());
    }

    #[test]
    fn fifteen_frame_fill_and_drain_scenario() {
        // spec §8 S2: fill 15 of 16 TX slots, then drain them all.
        let mut ring = Ring::with_seed(0);
        for _ in 0..15 {
            ring.enqueue(complete_descriptor(100)).unwrap();
        }
        assert_eq!(ring.free_slots(), 1);
        let reaped = ring.reap(|_| {});
        assert_eq!(reaped, 15);
        assert!(ring.is_drained());
    }
}
