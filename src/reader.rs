//! PID-demultiplexing reader.
//!
//! Grounded on `MPMC::consumer::Consumer::receive_timeout`
//! (poll-with-deadline loop, exponential-backoff sleep) for the read-timeout
//! behavior, retargeted from a ring-buffer `dequeue` to pulling bytes off a
//! file and unframing them.

use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::config::ReaderConfig;
use crate::decode::decode_record;
use crate::error::{Result, StreamError};
use crate::record::Decoded;
use crate::wire::read_frame;

/// A byte queue accumulating frame payloads for one observed PID, decoded
/// lazily as complete records accumulate.
#[derive(Default)]
struct PerPidQueue {
    bytes: VecDeque<u8>,
}

impl PerPidQueue {
    fn push(&mut self, payload: &[u8]) {
        self.bytes.extend(payload.iter().copied());
    }

    /// Returns a contiguous view of buffered bytes for decoding. `VecDeque`
    /// is not contiguous in general, so this makes it so on demand; cheap in
    /// practice since frames are consumed promptly.
    fn contiguous(&mut self) -> &[u8] {
        self.bytes.make_contiguous()
    }

    fn consume(&mut self, n: usize) {
        self.bytes.drain(..n);
    }

    fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Reads a PID-framed trace file and reconstructs one PID's record stream at
/// a time, switchable via `set_pid`.
pub struct Reader<T> {
    file: File,
    eof: bool,
    closed: bool,
    active_pid: Option<u32>,
    queues: HashMap<u32, PerPidQueue>,
    read_timeout: Option<Duration>,
    bind_value: Option<Vec<u8>>,
    create_stack_delta: bool,
    on_thread_switch: bool,
    on_dropped: bool,
    on_heartbeat: bool,
    deserialize: Box<dyn Fn(&[u8]) -> T + Send + Sync>,
    verbose: bool,
}

impl<T> Reader<T> {
    pub fn open(config: ReaderConfig<T>) -> Result<Self> {
        let file = File::open(&config.path).map_err(|e| StreamError::io_at(&config.path, e))?;
        if config.verbose {
            debug!(path = %config.path.display(), "opened trace for reading");
        }
        Ok(Self {
            file,
            eof: false,
            closed: false,
            active_pid: None,
            queues: HashMap::new(),
            read_timeout: config.read_timeout,
            bind_value: config.bind_value,
            create_stack_delta: config.create_stack_delta,
            on_thread_switch: config.on_thread_switch,
            on_dropped: config.on_dropped,
            on_heartbeat: config.on_heartbeat,
            deserialize: config.deserialize,
            verbose: config.verbose,
        })
    }

    pub fn active_pid(&self) -> Option<u32> {
        self.active_pid
    }

    /// Switches the active PID. Frames for other PIDs observed so far are
    /// retained and become available once switched back to them.
    pub fn set_pid(&mut self, pid: u32) {
        if self.verbose {
            debug!(pid, "switched active pid");
        }
        self.active_pid = Some(pid);
    }

    /// PIDs observed in the stream so far, including ones that have since
    /// been fully decoded out of their queue.
    pub fn known_pids(&self) -> Vec<u32> {
        self.queues.keys().copied().collect()
    }

    /// Returns the next decoded item for the active PID, pulling and
    /// unframing additional bytes as needed, bounded by `read_timeout`.
    pub fn next(&mut self) -> Result<Decoded<T>> {
        if self.closed {
            return Err(StreamError::Closed);
        }
        let deadline = self.read_timeout.map(|t| Instant::now() + t);

        loop {
            if let Some(pid) = self.active_pid {
                if let Some(item) = self.try_decode_one(pid)? {
                    return Ok(item);
                }
            }

            match self.pull_frame()? {
                Pulled::Frame => continue,
                Pulled::Eof => {
                    let partial = self
                        .active_pid
                        .and_then(|pid| self.queues.get(&pid))
                        .map(|q| !q.is_empty())
                        .unwrap_or(false);
                    if partial {
                        return Err(StreamError::Protocol(
                            "trailing bytes for active pid do not form a complete record".into(),
                        ));
                    }
                    return Err(StreamError::Eof);
                }
                Pulled::NoneYet => {
                    if let Some(deadline) = deadline {
                        if Instant::now() >= deadline {
                            return Err(StreamError::Timeout);
                        }
                        std::thread::sleep(Duration::from_millis(5).min(deadline - Instant::now()));
                    } else {
                        std::thread::sleep(Duration::from_millis(5));
                    }
                }
            }
        }
    }

    /// Tries to decode one record from `pid`'s queue; materializes control
    /// markers per configuration, silently skipping a tag with no
    /// configured callback equivalent by looping to the next record.
    fn try_decode_one(&mut self, pid: u32) -> Result<Option<Decoded<T>>> {
        loop {
            let queue = match self.queues.get_mut(&pid) {
                Some(q) => q,
                None => return Ok(None),
            };
            let buf = queue.contiguous();
            if buf.is_empty() {
                return Ok(None);
            }

            let deserialize = &self.deserialize;
            let decoded = decode_record(buf, &|bytes| deserialize(bytes))?;
            let Some(record) = decoded else { return Ok(None) };

            let queue = self.queues.get_mut(&pid).unwrap();
            queue.consume(record.consumed);

            match record.item {
                Decoded::Bind(_) => {
                    if let Some(value) = &self.bind_value {
                        return Ok(Some(Decoded::Bind(value.clone())));
                    }
                    continue;
                }
                Decoded::StackDelta { .. } if !self.create_stack_delta => continue,
                Decoded::ThreadSwitch(_) if !self.on_thread_switch => continue,
                Decoded::Dropped(_) if !self.on_dropped => continue,
                Decoded::Heartbeat(_) if !self.on_heartbeat => continue,
                other => return Ok(Some(other)),
            }
        }
    }

    /// Reads and unframes one PID frame from the file, appending it to its
    /// queue. A zero-length frame is valid and simply contributes no bytes.
    ///
    /// A read that returns no bytes is ambiguous for a plain file: it could
    /// mean the trace is finished, or that a writer just hasn't appended
    /// more yet. This is resolved by probing the same advisory lock the
    /// persister holds exclusively while active (see `persister::open_locked`):
    /// if a shared lock can be acquired, no persister is writing and the
    /// empty read is a genuine EOF; otherwise it's treated as "not yet" and
    /// retried, bounded by `read_timeout`.
    fn pull_frame(&mut self) -> Result<Pulled> {
        if self.eof {
            return Ok(Pulled::Eof);
        }
        match read_frame(&mut self.file)? {
            None => {
                if self.writer_still_active() {
                    Ok(Pulled::NoneYet)
                } else {
                    self.eof = true;
                    Ok(Pulled::Eof)
                }
            }
            Some(frame) => {
                if self.active_pid.is_none() {
                    self.active_pid = Some(frame.pid);
                }
                self.queues.entry(frame.pid).or_default().push(&frame.payload);
                Ok(Pulled::Frame)
            }
        }
    }

    fn writer_still_active(&self) -> bool {
        let fd = self.file.as_raw_fd();
        // SAFETY: fd is the reader's own open file descriptor, valid for the
        // lifetime of this call.
        let acquired = unsafe { libc::flock(fd, libc::LOCK_SH | libc::LOCK_NB) };
        if acquired == 0 {
            unsafe {
                libc::flock(fd, libc::LOCK_UN);
            }
            false
        } else {
            true
        }
    }
}

enum Pulled {
    Frame,
    Eof,
    NoneYet,
}

impl<T> Drop for Reader<T> {
    fn drop(&mut self) {
        self.closed = true;
    }
}

/// Scans a trace file and returns the distinct PIDs observed, without
/// decoding any records.
pub fn list_pids(path: impl AsRef<Path>) -> Result<Vec<u32>> {
    let path = path.as_ref();
    let mut file = File::open(path).map_err(|e| StreamError::io_at(path, e))?;
    let mut seen = Vec::new();
    loop {
        match read_frame(&mut file)? {
            None => break,
            Some(frame) => {
                if !seen.contains(&frame.pid) {
                    seen.push(frame.pid);
                }
            }
        }
    }
    Ok(seen)
}
