//! Error taxonomy for the trace transport.
//!
//! Rust's type system already rejects non-byte payloads at compile time, so
//! the "TypeError" category from the original interface collapses into
//! `InvalidArgument` alongside "ValueError" cases like a negative timeout.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Every fallible operation in this crate returns this result alias.
pub type Result<T> = std::result::Result<T, StreamError>;

#[derive(Debug, Error)]
pub enum StreamError {
    /// Category (ii): path issues, lock contention, disk full, short writes.
    #[error("I/O error{}: {source}", path.as_ref().map(|p| format!(" at {}", p.display())).unwrap_or_default())]
    Io {
        path: Option<PathBuf>,
        #[source]
        source: io::Error,
    },

    /// Category (i): invalid configuration or call arguments, rejected eagerly.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Category (iii): malformed frame header, truncated length, unknown tag.
    #[error("malformed trace data: {0}")]
    Protocol(String),

    /// Category (iv): the reader did not receive enough bytes within `read_timeout`.
    #[error("timed out waiting for the next record")]
    Timeout,

    /// Clean end of stream with no partial record pending.
    #[error("end of trace")]
    Eof,

    /// Category (v): use-after-close.
    #[error("stream is closed")]
    Closed,
}

impl StreamError {
    pub fn io(source: io::Error) -> Self {
        StreamError::Io { path: None, source }
    }

    pub fn io_at(path: impl Into<PathBuf>, source: io::Error) -> Self {
        StreamError::Io {
            path: Some(path.into()),
            source,
        }
    }

    /// Used by `AsyncFilePersister::open` when the advisory exclusive lock is
    /// already held by another process. The substring "exclusive" is part of
    /// the external contract: callers grep for it.
    pub fn exclusive_lock_held(path: impl Into<PathBuf>) -> Self {
        StreamError::Io {
            path: Some(path.into()),
            source: io::Error::new(
                io::ErrorKind::WouldBlock,
                "failed to acquire exclusive file lock: trace file is already open for writing",
            ),
        }
    }
}
