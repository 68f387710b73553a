//! Fixed-size double-buffer slots transferred whole between writer and persister.
//!
//! Grounded on `MPMC::Buffer::Buffer` (a fixed-stride region
//! addressed by index) but without the shared-memory backing: slots here are
//! plain heap allocations, since cross-process visibility is handled by the
//! PID-framed file format, not by a memory-mapped region.

use std::cell::UnsafeCell;
use std::sync::Arc;

/// Capacity of one buffer slot: 64 KiB.
pub const SLOT_CAPACITY: usize = 64 * 1024;

/// A fixed 64 KiB contiguous buffer with a usage counter.
///
/// `BufferSlot` itself carries no synchronization: the `SpscQueue` handoff
/// between writer and persister is what makes exclusive ownership safe (see
/// `SlotPool`).
pub struct BufferSlot {
    buf: Box<[u8; SLOT_CAPACITY]>,
    used: usize,
}

impl BufferSlot {
    fn new() -> Self {
        Self {
            buf: Box::new([0u8; SLOT_CAPACITY]),
            used: 0,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        SLOT_CAPACITY
    }

    #[inline]
    pub fn used(&self) -> usize {
        self.used
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        SLOT_CAPACITY - self.used
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.buf[..self.used]
    }

    /// Appends `bytes` to the slot. Caller must have already checked
    /// `bytes.len() <= remaining()`.
    #[inline]
    pub fn extend_from_slice(&mut self, bytes: &[u8]) {
        debug_assert!(bytes.len() <= self.remaining());
        let end = self.used + bytes.len();
        self.buf[self.used..end].copy_from_slice(bytes);
        self.used = end;
    }

    #[inline]
    pub fn reset(&mut self) {
        self.used = 0;
    }
}

/// A fixed pool of `BufferSlot`s shared between exactly one writer thread and
/// one persister thread. Ownership of a given slot index is established by
/// the SPSC hand-off protocol (forward queue, return queue): at any instant
/// only one side touches a given index, so interior mutability here is sound
/// without locking.
pub struct SlotPool {
    slots: Box<[UnsafeCell<BufferSlot>]>,
}

// SAFETY: access to a given slot index is serialized by the SPSC queues that
// transfer ownership of that index between writer and persister; the pool
// itself performs no concurrent access to the same cell.
unsafe impl Sync for SlotPool {}
unsafe impl Send for SlotPool {}

impl SlotPool {
    pub fn new(slot_count: usize) -> Arc<Self> {
        let slots = (0..slot_count)
            .map(|_| UnsafeCell::new(BufferSlot::new()))
            .collect();
        Arc::new(Self { slots })
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns a mutable view of the slot at `id`.
    ///
    /// # Safety
    /// The caller must currently hold exclusive ownership of `id`, as
    /// established by the forward/return queue hand-off.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn slot_mut(&self, id: usize) -> &mut BufferSlot {
        &mut *self.slots[id].get()
    }

    /// Returns a shared view of the slot at `id`, under the same ownership
    /// requirement as `slot_mut`.
    ///
    /// # Safety
    /// See `slot_mut`.
    pub unsafe fn slot(&self, id: usize) -> &BufferSlot {
        &*self.slots[id].get()
    }
}
