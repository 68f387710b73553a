//! Writer and reader configuration surfaces.
//!
//! Shaped after `MPMC::builder::ChannelBuilder`: consuming
//! `with_*` setters defaulted by a `Default` impl, terminated by a `build_*`
//! call. Construction here is infallible — validation
//! (e.g. rejecting a negative backpressure timeout) is folded into Rust's
//! own types (`Duration` cannot be negative) rather than deferred to
//! `build()`.

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Result, StreamError};

/// Default byte budget for in-flight (enqueued but not yet persisted) data.
pub const DEFAULT_INFLIGHT_LIMIT: u64 = 128 * 1024 * 1024;

/// Target for persisted bytes: either a path the persister opens itself, or
/// a caller-supplied sink (primarily for tests).
pub enum Output {
    Path(PathBuf),
    Sink(Box<dyn Write + Send>),
}

/// Configuration for a `Writer`/`Persister` pair.
pub struct WriterConfig<T> {
    pub(crate) output: Output,
    pub(crate) verbose: bool,
    pub(crate) inflight_limit: u64,
    pub(crate) backpressure_timeout: Option<Duration>,
    pub(crate) queue_capacity: usize,
    pub(crate) return_queue_capacity: usize,
    pub(crate) append: bool,
    pub(crate) preamble: Option<Vec<u8>>,
    pub(crate) serializer: Box<dyn Fn(&T) -> Vec<u8> + Send + Sync>,
    pub(crate) thread_id: Box<dyn Fn() -> Vec<u8> + Send + Sync>,
    pub(crate) normalize_path: Option<Box<dyn Fn(&[u8]) -> Vec<u8> + Send + Sync>>,
}

/// Builder for `WriterConfig`. Construct with `WriterConfigBuilder::new`
/// (requires a serializer up front, since it has no sensible default),
/// chain `with_*` setters, finish with `build`.
pub struct WriterConfigBuilder<T> {
    output: Option<Output>,
    verbose: bool,
    inflight_limit: u64,
    backpressure_timeout: Option<Duration>,
    queue_capacity: usize,
    return_queue_capacity: usize,
    append: bool,
    preamble: Option<Vec<u8>>,
    serializer: Box<dyn Fn(&T) -> Vec<u8> + Send + Sync>,
    thread_id: Box<dyn Fn() -> Vec<u8> + Send + Sync>,
    normalize_path: Option<Box<dyn Fn(&[u8]) -> Vec<u8> + Send + Sync>>,
}

impl<T> WriterConfigBuilder<T> {
    pub fn new(serializer: impl Fn(&T) -> Vec<u8> + Send + Sync + 'static) -> Self {
        Self {
            output: None,
            verbose: false,
            inflight_limit: DEFAULT_INFLIGHT_LIMIT,
            backpressure_timeout: None,
            queue_capacity: 4,
            return_queue_capacity: 2,
            append: false,
            preamble: None,
            serializer: Box::new(serializer),
            thread_id: Box::new(|| Vec::new()),
            normalize_path: None,
        }
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.output = Some(Output::Path(path.into()));
        self
    }

    pub fn with_sink(mut self, sink: impl Write + Send + 'static) -> Self {
        self.output = Some(Output::Sink(Box::new(sink)));
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_inflight_limit(mut self, bytes: u64) -> Self {
        self.inflight_limit = bytes;
        self
    }

    /// `None` (default) is wait mode; `Some(Duration::ZERO)` is drop mode;
    /// any other `Some(t)` waits up to `t` before dropping. Rust's
    /// `Duration` cannot represent a negative value, so a negative timeout
    /// is unrepresentable rather than checked at runtime.
    pub fn with_backpressure_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.backpressure_timeout = timeout;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_return_queue_capacity(mut self, capacity: usize) -> Self {
        self.return_queue_capacity = capacity;
        self
    }

    pub fn with_append(mut self, append: bool) -> Self {
        self.append = append;
        self
    }

    pub fn with_preamble(mut self, preamble: impl Into<Vec<u8>>) -> Self {
        self.preamble = Some(preamble.into());
        self
    }

    pub fn with_thread_id(mut self, thread_id: impl Fn() -> Vec<u8> + Send + Sync + 'static) -> Self {
        self.thread_id = Box::new(thread_id);
        self
    }

    pub fn with_normalize_path(
        mut self,
        normalize_path: impl Fn(&[u8]) -> Vec<u8> + Send + Sync + 'static,
    ) -> Self {
        self.normalize_path = Some(Box::new(normalize_path));
        self
    }

    pub fn build(self) -> Result<WriterConfig<T>> {
        let output = self.output.ok_or_else(|| {
            StreamError::InvalidArgument("writer config requires a path or a sink".into())
        })?;
        Ok(WriterConfig {
            output,
            verbose: self.verbose,
            inflight_limit: self.inflight_limit,
            backpressure_timeout: self.backpressure_timeout,
            queue_capacity: self.queue_capacity,
            return_queue_capacity: self.return_queue_capacity,
            append: self.append,
            preamble: self.preamble,
            serializer: self.serializer,
            thread_id: self.thread_id,
            normalize_path: self.normalize_path,
        })
    }
}

/// Configuration for a `Reader`.
pub struct ReaderConfig<T> {
    pub(crate) path: PathBuf,
    pub(crate) read_timeout: Option<Duration>,
    pub(crate) verbose: bool,
    pub(crate) bind_value: Option<Vec<u8>>,
    pub(crate) create_stack_delta: bool,
    pub(crate) on_thread_switch: bool,
    pub(crate) on_dropped: bool,
    pub(crate) on_heartbeat: bool,
    pub(crate) deserialize: Box<dyn Fn(&[u8]) -> T + Send + Sync>,
}

pub struct ReaderConfigBuilder<T> {
    path: PathBuf,
    read_timeout: Option<Duration>,
    verbose: bool,
    bind_value: Option<Vec<u8>>,
    create_stack_delta: bool,
    on_thread_switch: bool,
    on_dropped: bool,
    on_heartbeat: bool,
    deserialize: Box<dyn Fn(&[u8]) -> T + Send + Sync>,
}

impl<T> ReaderConfigBuilder<T> {
    pub fn new(
        path: impl Into<PathBuf>,
        deserialize: impl Fn(&[u8]) -> T + Send + Sync + 'static,
    ) -> Self {
        Self {
            path: path.into(),
            read_timeout: None,
            verbose: false,
            bind_value: None,
            create_stack_delta: true,
            on_thread_switch: false,
            on_dropped: false,
            on_heartbeat: false,
            deserialize: Box::new(deserialize),
        }
    }

    pub fn with_read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_bind_value(mut self, value: impl Into<Vec<u8>>) -> Self {
        self.bind_value = Some(value.into());
        self
    }

    pub fn with_create_stack_delta(mut self, enabled: bool) -> Self {
        self.create_stack_delta = enabled;
        self
    }

    /// Enables surfacing `ThreadSwitch` records. Off by default: with no
    /// configured handler, a caller's `next()` loop would otherwise have to
    /// account for a marker it never asked for.
    pub fn with_on_thread_switch(mut self, enabled: bool) -> Self {
        self.on_thread_switch = enabled;
        self
    }

    /// Enables surfacing `Dropped` records (backpressure-loss counts).
    pub fn with_on_dropped(mut self, enabled: bool) -> Self {
        self.on_dropped = enabled;
        self
    }

    /// Enables surfacing `Heartbeat` records.
    pub fn with_on_heartbeat(mut self, enabled: bool) -> Self {
        self.on_heartbeat = enabled;
        self
    }

    pub fn build(self) -> ReaderConfig<T> {
        ReaderConfig {
            path: self.path,
            read_timeout: self.read_timeout,
            verbose: self.verbose,
            bind_value: self.bind_value,
            create_stack_delta: self.create_stack_delta,
            on_thread_switch: self.on_thread_switch,
            on_dropped: self.on_dropped,
            on_heartbeat: self.on_heartbeat,
            deserialize: self.deserialize,
        }
    }
}
