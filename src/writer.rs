//! The producer side of the trace transport.
//!
//! Grounded on `MPMC::producer::Producer`: a size check against
//! a capacity before enqueuing, a `WouldBlock`-shaped rejection when the
//! consumer can't keep up, and plain getters for introspection
//! (`channel_id`, `max_message_size`) mirrored here as `messages_written`,
//! `inflight_bytes`, etc. The double-buffered slot swap and the
//! wait/drop/timeout backpressure modes are built directly on the same
//! `parking_lot`/queue primitives used throughout this crate.

use std::time::Duration;
use tracing::{debug, trace};

use crate::config::WriterConfig;
use crate::encode::{self, build_stack_delta_payload, encoded_len};
use crate::entry::QueueEntry;
use crate::error::{Result, StreamError};
use crate::inflight::InflightCounter;
use crate::persister::Persister;
use crate::progress::ProgressSignal;
use crate::queue::SpscQueue;
use crate::record::{StackFrame, Tag};
use crate::slot::{SlotPool, SLOT_CAPACITY};
use std::sync::Arc;

pub struct Writer<T> {
    persister: Persister,
    slot_pool: Arc<SlotPool>,
    forward_queue: Arc<SpscQueue<QueueEntry>>,
    return_queue: Arc<SpscQueue<usize>>,
    inflight: Arc<InflightCounter>,
    forward_signal: Arc<ProgressSignal>,
    backpressure_timeout: Option<Duration>,
    serializer: Box<dyn Fn(&T) -> Vec<u8> + Send + Sync>,
    thread_id: Box<dyn Fn() -> Vec<u8> + Send + Sync>,
    normalize_path: Option<Box<dyn Fn(&[u8]) -> Vec<u8> + Send + Sync>>,
    active_slot: usize,
    last_thread_id: Option<Vec<u8>>,
    dropped_messages: u32,
    messages_written: u64,
    closed: bool,
    verbose: bool,
}

impl<T> Writer<T> {
    pub fn new(config: WriterConfig<T>) -> Result<Self> {
        let slot_pool = SlotPool::new(2);
        let forward_queue = Arc::new(SpscQueue::new(config.queue_capacity));
        let return_queue = Arc::new(SpscQueue::new(config.return_queue_capacity.max(2)));
        // Slot 0 starts active; slot 1 starts as the immediately available spare.
        return_queue
            .try_push(1)
            .unwrap_or_else(|_| panic!("freshly created return queue cannot be full"));

        let inflight = InflightCounter::new(config.inflight_limit);
        let forward_signal = Arc::new(ProgressSignal::new());

        let persister = Persister::open(
            config.output,
            config.append,
            config.preamble.as_deref(),
            forward_queue.clone(),
            return_queue.clone(),
            slot_pool.clone(),
            inflight.clone(),
            forward_signal.clone(),
        )?;

        Ok(Self {
            persister,
            slot_pool,
            forward_queue,
            return_queue,
            inflight,
            forward_signal,
            backpressure_timeout: config.backpressure_timeout,
            serializer: config.serializer,
            thread_id: config.thread_id,
            normalize_path: config.normalize_path,
            active_slot: 0,
            last_thread_id: None,
            dropped_messages: 0,
            messages_written: 0,
            closed: false,
            verbose: config.verbose,
        })
    }

    pub fn inflight_bytes(&self) -> u64 {
        self.inflight.bytes()
    }

    pub fn inflight_limit(&self) -> u64 {
        self.inflight.limit()
    }

    pub fn backpressure_timeout(&self) -> Option<Duration> {
        self.backpressure_timeout
    }

    pub fn messages_written(&self) -> u64 {
        self.messages_written
    }

    pub fn dropped_messages(&self) -> u32 {
        self.dropped_messages
    }

    fn check_closed(&self) -> Result<()> {
        if self.closed {
            Err(StreamError::Closed)
        } else {
            Ok(())
        }
    }

    fn propagate_persister_error(&self) -> Result<()> {
        if let Some(err) = self.persister.take_error() {
            return Err(err);
        }
        Ok(())
    }

    /// Appends one opaque record. Emits a `ThreadSwitch` marker first if the
    /// producing thread changed since the last call, and a `Dropped` marker
    /// if prior writes were discarded under backpressure.
    pub fn write(&mut self, payload: &T) -> Result<()> {
        self.check_closed()?;
        self.propagate_persister_error()?;

        let tid = (self.thread_id)();
        if self.last_thread_id.as_deref() != Some(tid.as_slice()) {
            if self.write_tagged(Tag::ThreadSwitch, &tid)? {
                self.last_thread_id = Some(tid);
            }
        }

        if self.dropped_messages > 0 {
            let count_bytes = self.dropped_messages.to_le_bytes();
            if self.write_tagged(Tag::Dropped, &count_bytes)? {
                self.dropped_messages = 0;
            }
        }

        let bytes = (self.serializer)(payload);
        if self.write_tagged(Tag::Payload, &bytes)? {
            self.messages_written += 1;
            trace!(messages_written = self.messages_written, "record written");
        } else {
            self.dropped_messages += 1;
            if self.verbose {
                debug!(dropped_messages = self.dropped_messages, "record dropped under backpressure");
            }
        }
        Ok(())
    }

    /// Emits a `Bind` control record carrying caller-defined sentinel bytes.
    pub fn bind(&mut self, payload: &[u8]) -> Result<()> {
        self.check_closed()?;
        self.propagate_persister_error()?;
        self.write_tagged(Tag::Bind, payload)?;
        Ok(())
    }

    /// Emits a `StackDelta` control record. `normalize_path` (if configured)
    /// rewrites each frame's source bytes before encoding.
    pub fn stack_delta(&mut self, to_drop: u16, frames: &[StackFrame]) -> Result<()> {
        self.check_closed()?;
        self.propagate_persister_error()?;

        let rewritten;
        let frames = if let Some(normalize) = &self.normalize_path {
            rewritten = frames
                .iter()
                .map(|f| StackFrame {
                    source: normalize(&f.source),
                    line: f.line,
                })
                .collect::<Vec<_>>();
            &rewritten[..]
        } else {
            frames
        };

        let payload = build_stack_delta_payload(to_drop, frames);
        self.write_tagged(Tag::StackDelta, &payload)?;
        Ok(())
    }

    /// Enqueues telemetry bytes as a `Heartbeat` entry. Unlike `write`,
    /// heartbeats bypass the slot pool entirely and are best-effort: a
    /// heartbeat dropped under backpressure does not affect
    /// `dropped_messages`, since it carries no payload the reader is relying
    /// on to reconstruct the event stream.
    pub fn heartbeat(&mut self, payload: &[u8]) -> Result<()> {
        self.check_closed()?;
        self.propagate_persister_error()?;

        let needed = encoded_len(payload.len());
        let mut buf = Vec::with_capacity(needed);
        encode::encode_heartbeat(&mut buf, payload, needed)?;
        let len = buf.len() as u64;
        self.enqueue_direct(len, move || QueueEntry::Heartbeat(buf))?;
        Ok(())
    }

    /// If the active slot is non-empty, hands it to the persister and swaps
    /// in a fresh one. Does not wait for disk.
    pub fn flush(&mut self) -> Result<()> {
        self.check_closed()?;
        self.propagate_persister_error()?;
        let used = unsafe { self.slot_pool.slot(self.active_slot).used() };
        if used > 0 {
            self.swap_slot()?;
        }
        Ok(())
    }

    /// Flushes, enqueues a shutdown marker, and joins the consumer thread.
    /// Idempotent: calling more than once has no further effect.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        if self.verbose {
            debug!(messages_written = self.messages_written, "closing writer");
        }
        let flush_result = self.flush();
        self.persister.close();
        self.closed = true;
        flush_result
    }

    /// Pre-fork hook: flushes the active slot and stops the consumer thread,
    /// then (if the output is a regular file) sets `O_APPEND` so the parent
    /// and a forked child can both append PID frames atomically.
    pub fn prepare_for_fork(&mut self) -> Result<()> {
        self.flush()?;
        self.persister.drain();
        self.persister.enable_append_mode_for_fork();
        Ok(())
    }

    /// Post-fork hook: restarts the consumer thread. Call in both parent and
    /// child after `prepare_for_fork`; a child that skips this call gets the
    /// "writes become no-ops" variant of the fork policy, since nothing ever
    /// drains its forward queue.
    pub fn resume_after_fork(&mut self) {
        self.persister.resume();
    }

    /// Encodes `tag`/`payload` and commits it: directly into the active slot
    /// when it fits, via slot swap when it doesn't, or as a bypass
    /// `Oversized` entry when the encoded record exceeds slot capacity.
    /// Returns `false` if the record was dropped under backpressure.
    fn write_tagged(&mut self, tag: Tag, payload: &[u8]) -> Result<bool> {
        let needed = encoded_len(payload.len());

        if needed > SLOT_CAPACITY {
            let mut buf = Vec::with_capacity(needed);
            encode::push_record(&mut buf, tag, payload, needed)?;
            let len = buf.len() as u64;
            return self.enqueue_direct(len, move || QueueEntry::Oversized(buf));
        }

        let remaining = unsafe { self.slot_pool.slot(self.active_slot).remaining() };
        if remaining < needed && !self.swap_slot()? {
            return Ok(false);
        }

        let remaining_after = unsafe { self.slot_pool.slot(self.active_slot).remaining() };
        let mut buf = Vec::with_capacity(needed);
        encode::push_record(&mut buf, tag, payload, remaining_after)?;
        unsafe {
            self.slot_pool.slot_mut(self.active_slot).extend_from_slice(&buf);
        }
        Ok(true)
    }

    /// Slot-swap protocol: secures a free slot from the return
    /// channel first, then hands the filled active slot to the persister —
    /// acquire before handoff, so a dropped swap under backpressure never
    /// orphans the active slot the writer still owns. Inflight capacity and
    /// return-slot availability are checked together in one wait, so there
    /// is exactly one suspension point here.
    fn swap_slot(&mut self) -> Result<bool> {
        let deadline = ProgressSignal::deadline_from(self.backpressure_timeout);
        let acquired = self.inflight.signal().wait_until(deadline, || {
            !self.return_queue.is_empty() && self.inflight.bytes() <= self.inflight.limit()
        });
        if !acquired {
            if let Some(err) = self.persister.take_error() {
                return Err(err);
            }
            return Ok(false);
        }

        let new_slot_id = self
            .return_queue
            .try_pop()
            .expect("wait_until verified the return queue is non-empty");

        let filled_id = self.active_slot;
        let used = unsafe { self.slot_pool.slot(filled_id).used() };
        self.forward_queue
            .try_push(QueueEntry::FilledSlot { slot_id: filled_id, used })
            .unwrap_or_else(|_| panic!("forward queue sized for at most one in-flight slot"));
        self.inflight.add(used as u64);
        self.forward_signal.notify_all();

        unsafe {
            self.slot_pool.slot_mut(new_slot_id).reset();
        }
        self.active_slot = new_slot_id;
        Ok(true)
    }

    /// Enqueues an entry directly onto the forward channel, bypassing the
    /// slot pool (used for oversized records and heartbeats). Subject to the
    /// same backpressure policy as a slot swap.
    fn enqueue_direct(&mut self, byte_len: u64, make_entry: impl FnOnce() -> QueueEntry) -> Result<bool> {
        let deadline = ProgressSignal::deadline_from(self.backpressure_timeout);
        let acquired = self.inflight.signal().wait_until(deadline, || {
            !self.forward_queue.is_full()
                && self.inflight.bytes() + byte_len <= self.inflight.limit()
        });
        if !acquired {
            if let Some(err) = self.persister.take_error() {
                return Err(err);
            }
            return Ok(false);
        }

        let entry = make_entry();
        self.forward_queue
            .try_push(entry)
            .unwrap_or_else(|_| panic!("checked not full just above, single producer"));
        self.inflight.add(byte_len);
        self.forward_signal.notify_all();
        Ok(true)
    }
}

impl<T> Drop for Writer<T> {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
