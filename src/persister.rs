//! Async file persister: the SPSC consumer side.
//!
//! Grounded on `MPMC::consumer::Consumer` (a dedicated
//! draining side with a blocking receive loop and a liveness flag) but
//! retargeted from a shared-memory ring to a plain file descriptor: instead
//! of `dequeue`/`wait_for_data` against a ring buffer, this persister pops
//! `QueueEntry`s and writes PID-framed chunks with `write(2)`.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use tracing::{debug, warn};

use crate::config::Output;
use crate::entry::QueueEntry;
use crate::error::{Result, StreamError};
use crate::inflight::InflightCounter;
use crate::progress::ProgressSignal;
use crate::queue::SpscQueue;
use crate::slot::SlotPool;
use crate::wire::{write_frame, MAX_FRAME_PAYLOAD};

enum Sink {
    File(File),
    Boxed(Box<dyn Write + Send>),
}

impl Write for Sink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            Sink::File(f) => f.write(buf),
            Sink::Boxed(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Sink::File(f) => f.flush(),
            Sink::Boxed(w) => w.flush(),
        }
    }
}

/// Owns the output file descriptor and the dedicated draining thread.
pub struct Persister {
    sink: Arc<Mutex<Sink>>,
    forward_queue: Arc<SpscQueue<QueueEntry>>,
    return_queue: Arc<SpscQueue<usize>>,
    slot_pool: Arc<SlotPool>,
    inflight: Arc<InflightCounter>,
    forward_signal: Arc<ProgressSignal>,
    handle: Option<JoinHandle<()>>,
    running: Arc<AtomicBool>,
    failed: Arc<Mutex<Option<StreamError>>>,
    path: Option<PathBuf>,
    closed: bool,
}

impl Persister {
    /// Opens `output`, acquiring an advisory exclusive non-blocking lock and
    /// applying truncate/append semantics when it is a path. Starts the
    /// consumer thread immediately.
    #[allow(clippy::too_many_arguments)]
    pub fn open(
        output: Output,
        append: bool,
        preamble: Option<&[u8]>,
        forward_queue: Arc<SpscQueue<QueueEntry>>,
        return_queue: Arc<SpscQueue<usize>>,
        slot_pool: Arc<SlotPool>,
        inflight: Arc<InflightCounter>,
        forward_signal: Arc<ProgressSignal>,
    ) -> Result<Self> {
        let (sink, path) = match output {
            Output::Path(path) => {
                let file = open_locked(&path, append)?;
                debug!(path = %path.display(), append, "opened trace for writing");
                (Sink::File(file), Some(path))
            }
            Output::Sink(boxed) => (Sink::Boxed(boxed), None),
        };
        let mut sink = sink;
        if !append {
            if let Some(bytes) = preamble {
                sink.write_all(bytes).map_err(StreamError::io)?;
            }
        }

        let sink = Arc::new(Mutex::new(sink));
        let running = Arc::new(AtomicBool::new(true));
        let failed = Arc::new(Mutex::new(None));

        let handle = spawn_consumer(
            sink.clone(),
            forward_queue.clone(),
            return_queue.clone(),
            slot_pool.clone(),
            inflight.clone(),
            forward_signal.clone(),
            running.clone(),
            failed.clone(),
        );

        Ok(Self {
            sink,
            forward_queue,
            return_queue,
            slot_pool,
            inflight,
            forward_signal,
            handle: Some(handle),
            running,
            failed,
            path,
            closed: false,
        })
    }

    /// Returns the stored fatal error, if the consumer thread has stopped
    /// consuming due to an I/O failure.
    pub fn take_error(&self) -> Option<StreamError> {
        self.failed.lock().unwrap().take()
    }

    pub fn has_failed(&self) -> bool {
        self.failed.lock().unwrap().is_some()
    }

    /// Stops the consumer thread cleanly after it finishes draining
    /// everything currently queued. Does not close the fd.
    pub fn drain(&mut self) {
        self.running.store(false, Ordering::Release);
        self.forward_signal.notify_all();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }

    /// Restarts the consumer thread after `drain()`.
    pub fn resume(&mut self) {
        if self.handle.is_some() {
            return;
        }
        self.running.store(true, Ordering::Release);
        self.handle = Some(spawn_consumer(
            self.sink.clone(),
            self.forward_queue.clone(),
            self.return_queue.clone(),
            self.slot_pool.clone(),
            self.inflight.clone(),
            self.forward_signal.clone(),
            self.running.clone(),
            self.failed.clone(),
        ));
    }

    /// If the underlying output is a regular file, sets `O_APPEND` so
    /// concurrent writers (e.g. a forked child) append atomically at EOF
    /// regardless of either side's buffered file position.
    pub fn enable_append_mode_for_fork(&self) {
        if let Sink::File(file) = &*self.sink.lock().unwrap() {
            unsafe {
                let fd = file.as_raw_fd();
                let flags = libc::fcntl(fd, libc::F_GETFL);
                if flags >= 0 {
                    libc::fcntl(fd, libc::F_SETFL, flags | libc::O_APPEND);
                }
            }
        }
    }

    /// Idempotent: enqueues `Shutdown`, joins the consumer, fsyncs and
    /// closes the fd, releasing the advisory lock.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        if self.handle.is_some() {
            while self.forward_queue.try_push(QueueEntry::Shutdown).is_err() {
                self.forward_signal.notify_all();
                std::thread::yield_now();
            }
            self.forward_signal.notify_all();
            self.drain();
        }
        if let Sink::File(file) = &*self.sink.lock().unwrap() {
            let _ = file.sync_all();
        }
        self.closed = true;
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

impl Drop for Persister {
    fn drop(&mut self) {
        self.close();
    }
}

fn open_locked(path: &Path, append: bool) -> Result<File> {
    let mut options = OpenOptions::new();
    options.read(false).write(true).create(true);
    if append {
        options.append(true);
    } else {
        options.truncate(true);
    }
    let file = options.open(path).map_err(|e| StreamError::io_at(path, e))?;

    let lock_result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if lock_result != 0 {
        return Err(StreamError::exclusive_lock_held(path));
    }
    Ok(file)
}

#[allow(clippy::too_many_arguments)]
fn spawn_consumer(
    sink: Arc<Mutex<Sink>>,
    forward_queue: Arc<SpscQueue<QueueEntry>>,
    return_queue: Arc<SpscQueue<usize>>,
    slot_pool: Arc<SlotPool>,
    inflight: Arc<InflightCounter>,
    forward_signal: Arc<ProgressSignal>,
    running: Arc<AtomicBool>,
    failed: Arc<Mutex<Option<StreamError>>>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let pid = std::process::id();
        loop {
            match forward_queue.try_pop() {
                Some(QueueEntry::Shutdown) => break,
                Some(entry) => {
                    if let Err(e) = process_entry(&sink, &slot_pool, &return_queue, &inflight, pid, entry)
                    {
                        warn!(error = %e, "persister write failed, consumer stopping");
                        *failed.lock().unwrap() = Some(e);
                        // Wake any writer blocked on inflight capacity or a
                        // free slot; otherwise a fatal I/O error here would
                        // hang the writer forever.
                        inflight.signal().notify_all();
                        break;
                    }
                }
                None => {
                    if !running.load(Ordering::Acquire) {
                        break;
                    }
                    forward_signal.wait_until(None, || {
                        !forward_queue.is_empty() || !running.load(Ordering::Acquire)
                    });
                }
            }
        }
    })
}

fn process_entry(
    sink: &Arc<Mutex<Sink>>,
    slot_pool: &Arc<SlotPool>,
    return_queue: &Arc<SpscQueue<usize>>,
    inflight: &Arc<InflightCounter>,
    pid: u32,
    entry: QueueEntry,
) -> Result<()> {
    let inflight_bytes = entry.inflight_bytes();
    match entry {
        QueueEntry::FilledSlot { slot_id, used } => {
            // SAFETY: the writer only forwards a slot after it stops
            // touching it; ownership transfers to us until we return the
            // slot_id on the return channel below.
            debug_assert_eq!(used, unsafe { slot_pool.slot(slot_id).used() });
            let bytes = unsafe { slot_pool.slot(slot_id).as_slice() }.to_vec();
            write_chunked(sink, pid, &bytes)?;
            let mut pushed = return_queue.try_push(slot_id);
            while let Err(slot_id) = pushed {
                std::thread::yield_now();
                pushed = return_queue.try_push(slot_id);
            }
        }
        QueueEntry::Oversized(bytes) => write_chunked(sink, pid, &bytes)?,
        QueueEntry::Heartbeat(bytes) => write_chunked(sink, pid, &bytes)?,
        QueueEntry::Shutdown => {}
    }
    inflight.complete(inflight_bytes);
    Ok(())
}

fn write_chunked(sink: &Arc<Mutex<Sink>>, pid: u32, bytes: &[u8]) -> Result<()> {
    let mut guard = sink.lock().unwrap();
    for chunk in bytes.chunks(MAX_FRAME_PAYLOAD) {
        write_frame(&mut *guard, pid, chunk)?;
    }
    Ok(())
}
