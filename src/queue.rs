//! Bounded single-producer/single-consumer ring queue.
//!
//! Grounded on `MPMC::Buffer::Buffer_impl`'s sequence-per-slot
//! protocol (a Vyukov ring buffer), but with every compare-exchange retry
//! loop removed: the forward and return channels here have exactly one
//! producer thread and one consumer thread each, so a slot's sequence number
//! only ever needs a plain load/store, never a CAS.

use crossbeam_utils::CachePadded;
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};

struct Cell<T> {
    /// Sequence protocol (per Vyukov): a cell is ready to push when
    /// `sequence == pos`, and ready to pop when `sequence == pos + 1`.
    sequence: AtomicUsize,
    value: UnsafeCell<MaybeUninit<T>>,
}

/// A bounded SPSC ring buffer. Capacity is rounded up internally but
/// `try_push`/`try_pop` behave as a fixed-capacity queue of the requested
/// size.
pub struct SpscQueue<T> {
    buffer: Box<[Cell<T>]>,
    mask: usize,
    enqueue_pos: CachePadded<AtomicUsize>,
    dequeue_pos: CachePadded<AtomicUsize>,
}

// SAFETY: exactly one thread calls try_push, exactly one (possibly
// different) thread calls try_pop; the sequence field establishes
// happens-before edges between them via Acquire/Release ordering.
unsafe impl<T: Send> Send for SpscQueue<T> {}
unsafe impl<T: Send> Sync for SpscQueue<T> {}

impl<T> SpscQueue<T> {
    /// Creates a queue able to hold at least `capacity` entries. `capacity`
    /// must be non-zero; it is rounded up to the next power of two.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1).next_power_of_two();
        let buffer: Box<[Cell<T>]> = (0..capacity)
            .map(|i| Cell {
                sequence: AtomicUsize::new(i),
                value: UnsafeCell::new(MaybeUninit::uninit()),
            })
            .collect();
        Self {
            buffer,
            mask: capacity - 1,
            enqueue_pos: CachePadded::new(AtomicUsize::new(0)),
            dequeue_pos: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Attempts to push `value`. Returns `Err(value)` if the queue is full.
    pub fn try_push(&self, value: T) -> Result<(), T> {
        let pos = self.enqueue_pos.load(Ordering::Relaxed);
        let cell = &self.buffer[pos & self.mask];
        let seq = cell.sequence.load(Ordering::Acquire);

        if seq != pos {
            // Either full (seq < pos) or, for a genuine SPSC producer,
            // never seq > pos since only this thread advances enqueue_pos.
            return Err(value);
        }

        unsafe {
            (*cell.value.get()).write(value);
        }
        cell.sequence.store(pos + 1, Ordering::Release);
        self.enqueue_pos.store(pos + 1, Ordering::Relaxed);
        Ok(())
    }

    /// Attempts to pop the next value. Returns `None` if the queue is empty.
    pub fn try_pop(&self) -> Option<T> {
        let pos = self.dequeue_pos.load(Ordering::Relaxed);
        let cell = &self.buffer[pos & self.mask];
        let seq = cell.sequence.load(Ordering::Acquire);

        if seq != pos + 1 {
            return None;
        }

        let value = unsafe { (*cell.value.get()).assume_init_read() };
        cell.sequence
            .store(pos + self.buffer.len() + 1, Ordering::Release);
        self.dequeue_pos.store(pos + 1, Ordering::Relaxed);
        Some(value)
    }

    pub fn is_empty(&self) -> bool {
        let dequeue = self.dequeue_pos.load(Ordering::Relaxed);
        let cell = &self.buffer[dequeue & self.mask];
        cell.sequence.load(Ordering::Acquire) != dequeue + 1
    }

    pub fn is_full(&self) -> bool {
        let enqueue = self.enqueue_pos.load(Ordering::Relaxed);
        let cell = &self.buffer[enqueue & self.mask];
        cell.sequence.load(Ordering::Acquire) != enqueue
    }
}

impl<T> Drop for SpscQueue<T> {
    fn drop(&mut self) {
        while self.try_pop().is_some() {}
    }
}
