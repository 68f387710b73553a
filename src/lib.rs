//! A record/replay event trace pipeline.
//!
//! A single-producer writer appends opaque, caller-serialized events (plus a
//! handful of control markers — thread switches, bind sentinels, drop
//! counts, heartbeats, stack deltas) into double-buffered 64 KiB slots. A
//! dedicated persister thread drains those slots to a file, PID-framing
//! every write so that multiple processes (e.g. a `fork()`ed child) can
//! safely append to the same trace concurrently. A reader on the other end
//! demultiplexes the PID-framed container back into per-process record
//! streams.
//!
//! ```text
//! caller -> Writer -> encode -> BufferSlot -> SpscQueue -> Persister -> PID frame -> file
//! file -> PID frame -> Reader -> per-PID queue -> decode -> caller
//! ```
//!
//! See [`WriterConfigBuilder`] / [`ReaderConfigBuilder`] for construction.

pub mod config;
pub mod decode;
pub mod encode;
mod entry;
pub mod error;
mod inflight;
mod persister;
mod progress;
mod queue;
pub mod reader;
pub mod record;
mod slot;
pub mod wire;
mod writer;

pub use config::{
    Output, ReaderConfig, ReaderConfigBuilder, WriterConfig, WriterConfigBuilder,
    DEFAULT_INFLIGHT_LIMIT,
};
pub use error::{Result, StreamError};
pub use reader::{list_pids, Reader};
pub use record::{Decoded, StackFrame, Tag};
pub use wire::{read_frame, write_frame, PidFrame, FRAME_HEADER_LEN, MAX_FRAME_PAYLOAD};
pub use writer::Writer;

/// Installs a `tracing-subscriber` formatter reading `RUST_LOG`/`TRACEWIRE_LOG`,
/// for binaries embedding this crate that want the `verbose` config flags to
/// actually surface somewhere. Libraries should not call this themselves;
/// it's provided for example binaries and tests.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_env("TRACEWIRE_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
