//! On-disk PID-framed container format and varint length encoding.
//!
//! `<pid:u32 LE><length:u16 LE><payload:length bytes>`, concatenated with no
//! file header and no magic — a parser must tolerate truncation at any frame
//! boundary and report EOF cleanly.

use crate::error::{Result, StreamError};
use std::io::{self, Read, Write};

/// Maximum payload bytes carried by a single PID frame.
pub const MAX_FRAME_PAYLOAD: usize = 0xFFFF;

/// Byte length of a PID frame header (`pid` + `length`).
pub const FRAME_HEADER_LEN: usize = 4 + 2;

/// Writes one PID frame: `<pid:u32 LE><len:u16 LE><payload>`.
///
/// `payload.len()` must be `<= MAX_FRAME_PAYLOAD`; the header and payload
/// are assembled into a single buffer and issued as one `write` call so the
/// frame is atomic with respect to other writers appending to the same fd.
pub fn write_frame<W: Write>(out: &mut W, pid: u32, payload: &[u8]) -> Result<()> {
    debug_assert!(payload.len() <= MAX_FRAME_PAYLOAD);
    let mut header = [0u8; FRAME_HEADER_LEN];
    header[0..4].copy_from_slice(&pid.to_le_bytes());
    header[4..6].copy_from_slice(&(payload.len() as u16).to_le_bytes());

    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    frame.extend_from_slice(&header);
    frame.extend_from_slice(payload);
    out.write_all(&frame).map_err(StreamError::io)?;
    Ok(())
}

/// One parsed PID frame.
#[derive(Debug)]
pub struct PidFrame {
    pub pid: u32,
    pub payload: Vec<u8>,
}

/// Reads one PID frame from `input`. Returns `Ok(None)` on a clean EOF
/// (nothing read at all). A frame truncated partway through the header or
/// payload is a protocol error, not EOF.
pub fn read_frame<R: Read>(input: &mut R) -> Result<Option<PidFrame>> {
    let mut header = [0u8; FRAME_HEADER_LEN];
    match read_exact_or_eof(input, &mut header)? {
        None => return Ok(None),
        Some(0) => return Ok(None),
        Some(n) if n < FRAME_HEADER_LEN => {
            return Err(StreamError::Protocol(format!(
                "truncated frame header: got {n} of {FRAME_HEADER_LEN} bytes"
            )))
        }
        Some(_) => {}
    }

    let pid = u32::from_le_bytes(header[0..4].try_into().unwrap());
    let length = u16::from_le_bytes(header[4..6].try_into().unwrap()) as usize;

    let mut payload = vec![0u8; length];
    input.read_exact(&mut payload).map_err(|source| {
        if source.kind() == io::ErrorKind::UnexpectedEof {
            StreamError::Protocol(format!(
                "truncated frame payload: expected {length} bytes for pid {pid}"
            ))
        } else {
            StreamError::io(source)
        }
    })?;

    Ok(Some(PidFrame { pid, payload }))
}

/// Reads into `buf` fully, but tolerates EOF on the very first byte by
/// returning `Ok(None)`; a short read after at least one byte is returned as
/// `Ok(Some(n))` so the caller can distinguish "clean EOF" from "truncated".
fn read_exact_or_eof<R: Read>(input: &mut R, buf: &mut [u8]) -> Result<Option<usize>> {
    let mut filled = 0;
    while filled < buf.len() {
        match input.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(StreamError::io(e)),
        }
    }
    if filled == 0 {
        Ok(None)
    } else {
        Ok(Some(filled))
    }
}

/// Encodes `value` as a LEB128 unsigned varint, the minimum byte count that
/// represents it.
pub fn write_varint(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            break;
        }
        out.push(byte | 0x80);
    }
}

/// Decodes a LEB128 unsigned varint from the front of `buf`. Returns the
/// value and the number of bytes consumed, or `None` if `buf` does not yet
/// contain a complete varint.
pub fn read_varint(buf: &[u8]) -> Result<Option<(u64, usize)>> {
    let mut value: u64 = 0;
    let mut shift = 0u32;
    for (i, &byte) in buf.iter().enumerate() {
        if shift >= 64 {
            return Err(StreamError::Protocol("varint too long".into()));
        }
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok(Some((value, i + 1)));
        }
        shift += 7;
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_round_trips() {
        let mut buf = Vec::new();
        write_frame(&mut buf, 4242, b"hello").unwrap();
        let mut cursor = io::Cursor::new(buf);
        let frame = read_frame(&mut cursor).unwrap().unwrap();
        assert_eq!(frame.pid, 4242);
        assert_eq!(frame.payload, b"hello");
        assert!(read_frame(&mut cursor).unwrap().is_none());
    }

    #[test]
    fn truncated_header_is_protocol_error() {
        let mut cursor = io::Cursor::new(vec![1, 2, 3]);
        let err = read_frame(&mut cursor).unwrap_err();
        assert!(matches!(err, StreamError::Protocol(_)));
    }

    #[test]
    fn truncated_payload_is_protocol_error() {
        let mut buf = Vec::new();
        write_frame(&mut buf, 1, b"0123456789").unwrap();
        buf.truncate(buf.len() - 5);
        let mut cursor = io::Cursor::new(buf);
        let err = read_frame(&mut cursor).unwrap_err();
        assert!(matches!(err, StreamError::Protocol(_)));
    }

    #[test]
    fn varint_round_trips_edge_values() {
        for value in [0u64, 1, 127, 128, 300, u32::MAX as u64, u64::MAX] {
            let mut buf = Vec::new();
            write_varint(&mut buf, value);
            let (decoded, used) = read_varint(&buf).unwrap().unwrap();
            assert_eq!(decoded, value);
            assert_eq!(used, buf.len());
        }
    }

    #[test]
    fn varint_incomplete_returns_none() {
        let mut buf = Vec::new();
        write_varint(&mut buf, 300);
        assert!(read_varint(&buf[..1]).unwrap().is_none());
    }
}
