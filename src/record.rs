//! Record tags and decoded control-marker types.

/// Tag byte prefixing every record inside a slot / per-PID byte stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    Payload,
    ThreadSwitch,
    Bind,
    Dropped,
    Heartbeat,
    StackDelta,
}

impl Tag {
    pub const fn byte(self) -> u8 {
        match self {
            Tag::Payload => 0x01,
            Tag::ThreadSwitch => 0x02,
            Tag::Bind => 0x03,
            Tag::Dropped => 0x04,
            Tag::Heartbeat => 0x05,
            Tag::StackDelta => 0x06,
        }
    }

    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Tag::Payload),
            0x02 => Some(Tag::ThreadSwitch),
            0x03 => Some(Tag::Bind),
            0x04 => Some(Tag::Dropped),
            0x05 => Some(Tag::Heartbeat),
            0x06 => Some(Tag::StackDelta),
            _ => None,
        }
    }
}

/// One call-stack frame inside a `StackDelta` record: a source location
/// (raw bytes, optionally rewritten by `WriterConfig::normalize_path` before
/// encoding) and a line number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    pub source: Vec<u8>,
    pub line: u32,
}

/// A decoded item from a reader's per-PID stream: either the caller's own
/// opaque payload or a materialized control marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded<T> {
    Payload(T),
    ThreadSwitch(Vec<u8>),
    Bind(Vec<u8>),
    Dropped(u32),
    Heartbeat(Vec<u8>),
    StackDelta { to_drop: u16, frames: Vec<StackFrame> },
}
