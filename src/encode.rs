//! Record-level encoder: `<tag:u8><length:varint><payload>`.

use crate::error::{Result, StreamError};
use crate::record::{StackFrame, Tag};
use crate::wire::write_varint;

/// Appends one tagged record to `out`. Returns `Err` if the encoded record
/// would exceed `max_len` bytes — used by the writer to decide whether a
/// record fits in the remaining slot space before committing it.
pub(crate) fn push_record(out: &mut Vec<u8>, tag: Tag, payload: &[u8], max_len: usize) -> Result<()> {
    let mut header = Vec::with_capacity(1 + 10);
    header.push(tag.byte());
    write_varint(&mut header, payload.len() as u64);

    if header.len() + payload.len() > max_len {
        return Err(StreamError::Protocol(format!(
            "record of {} bytes exceeds {max_len}-byte limit",
            header.len() + payload.len()
        )));
    }

    out.extend_from_slice(&header);
    out.extend_from_slice(payload);
    Ok(())
}

/// Encodes the length a record would occupy without writing it, so callers
/// can check slot capacity before committing.
pub fn encoded_len(payload_len: usize) -> usize {
    let mut header = Vec::with_capacity(10);
    write_varint(&mut header, payload_len as u64);
    1 + header.len() + payload_len
}

pub fn encode_payload(out: &mut Vec<u8>, bytes: &[u8], max_len: usize) -> Result<()> {
    push_record(out, Tag::Payload, bytes, max_len)
}

pub fn encode_thread_switch(out: &mut Vec<u8>, thread_id: &[u8], max_len: usize) -> Result<()> {
    push_record(out, Tag::ThreadSwitch, thread_id, max_len)
}

pub fn encode_bind(out: &mut Vec<u8>, payload: &[u8], max_len: usize) -> Result<()> {
    push_record(out, Tag::Bind, payload, max_len)
}

pub fn encode_dropped(out: &mut Vec<u8>, count: u32, max_len: usize) -> Result<()> {
    push_record(out, Tag::Dropped, &count.to_le_bytes(), max_len)
}

pub fn encode_heartbeat(out: &mut Vec<u8>, telemetry: &[u8], max_len: usize) -> Result<()> {
    push_record(out, Tag::Heartbeat, telemetry, max_len)
}

/// Assembles the raw `StackDelta` payload bytes (before the outer
/// `<tag><length>` header): `<to_drop:u16><frame_count:u16><frames…>` where
/// each frame is `<source_len:varint><source_bytes><line:u32 LE>`.
pub(crate) fn build_stack_delta_payload(to_drop: u16, frames: &[StackFrame]) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(&to_drop.to_le_bytes());
    payload.extend_from_slice(&(frames.len() as u16).to_le_bytes());
    for frame in frames {
        write_varint(&mut payload, frame.source.len() as u64);
        payload.extend_from_slice(&frame.source);
        payload.extend_from_slice(&frame.line.to_le_bytes());
    }
    payload
}

/// Encodes a full `StackDelta` record.
pub fn encode_stack_delta(
    out: &mut Vec<u8>,
    to_drop: u16,
    frames: &[StackFrame],
    max_len: usize,
) -> Result<()> {
    let payload = build_stack_delta_payload(to_drop, frames);
    push_record(out, Tag::StackDelta, &payload, max_len)
}
