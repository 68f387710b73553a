//! Record-level decoder: inverse of `encode`.

use crate::error::{Result, StreamError};
use crate::record::{Decoded, StackFrame, Tag};
use crate::wire::read_varint;

/// One decoded record plus the number of bytes it consumed from the input.
#[derive(Debug)]
pub struct DecodedRecord<T> {
    pub item: Decoded<T>,
    pub consumed: usize,
}

/// Decodes one tagged record from the front of `buf`.
///
/// Returns `Ok(None)` if `buf` does not yet contain a complete record (the
/// caller should pull more bytes and retry). `deserialize` turns opaque
/// payload bytes into `T`. `StackDelta` is always decoded into its typed
/// fields here; whether a reader surfaces it to the caller is a
/// `ReaderConfig::create_stack_delta` decision made one layer up.
pub fn decode_record<T>(
    buf: &[u8],
    deserialize: &dyn Fn(&[u8]) -> T,
) -> Result<Option<DecodedRecord<T>>> {
    if buf.is_empty() {
        return Ok(None);
    }
    let tag_byte = buf[0];
    let tag = Tag::from_byte(tag_byte)
        .ok_or_else(|| StreamError::Protocol(format!("unknown record tag 0x{tag_byte:02x}")))?;

    let (length, len_bytes) = match read_varint(&buf[1..])? {
        None => return Ok(None),
        Some(v) => v,
    };
    let length = length as usize;
    let header_len = 1 + len_bytes;

    if buf.len() < header_len + length {
        return Ok(None);
    }
    let payload = &buf[header_len..header_len + length];
    let consumed = header_len + length;

    let item = match tag {
        Tag::Payload => Decoded::Payload(deserialize(payload)),
        Tag::ThreadSwitch => Decoded::ThreadSwitch(payload.to_vec()),
        Tag::Bind => Decoded::Bind(payload.to_vec()),
        Tag::Dropped => {
            if payload.len() != 4 {
                return Err(StreamError::Protocol(format!(
                    "Dropped record payload must be 4 bytes, got {}",
                    payload.len()
                )));
            }
            Decoded::Dropped(u32::from_le_bytes(payload.try_into().unwrap()))
        }
        Tag::Heartbeat => Decoded::Heartbeat(payload.to_vec()),
        Tag::StackDelta => decode_stack_delta(payload)?,
    };

    Ok(Some(DecodedRecord { item, consumed }))
}

fn decode_stack_delta<T>(payload: &[u8]) -> Result<Decoded<T>> {
    if payload.len() < 4 {
        return Err(StreamError::Protocol(
            "StackDelta payload shorter than its fixed header".into(),
        ));
    }
    let to_drop = u16::from_le_bytes(payload[0..2].try_into().unwrap());
    let frame_count = u16::from_le_bytes(payload[2..4].try_into().unwrap()) as usize;

    let mut cursor = 4;
    let mut frames = Vec::with_capacity(frame_count);
    for _ in 0..frame_count {
        let (source_len, used) = read_varint(&payload[cursor..])?.ok_or_else(|| {
            StreamError::Protocol("truncated StackDelta frame source length".into())
        })?;
        cursor += used;
        let source_len = source_len as usize;

        if payload.len() < cursor + source_len + 4 {
            return Err(StreamError::Protocol("truncated StackDelta frame".into()));
        }
        let source = payload[cursor..cursor + source_len].to_vec();
        cursor += source_len;
        let line = u32::from_le_bytes(payload[cursor..cursor + 4].try_into().unwrap());
        cursor += 4;

        frames.push(StackFrame { source, line });
    }

    Ok(Decoded::StackDelta { to_drop, frames })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::{encode_dropped, encode_payload, encode_stack_delta};
    use crate::record::StackFrame;

    fn identity(bytes: &[u8]) -> Vec<u8> {
        bytes.to_vec()
    }

    #[test]
    fn decodes_payload_record() {
        let mut buf = Vec::new();
        encode_payload(&mut buf, b"hello", 1024).unwrap();
        let decoded = decode_record(&buf, &identity).unwrap().unwrap();
        assert_eq!(decoded.consumed, buf.len());
        assert_eq!(decoded.item, Decoded::Payload(b"hello".to_vec()));
    }

    #[test]
    fn incomplete_buffer_returns_none() {
        let mut buf = Vec::new();
        encode_payload(&mut buf, b"hello world", 1024).unwrap();
        buf.truncate(buf.len() - 3);
        assert!(decode_record(&buf, &identity).unwrap().is_none());
    }

    #[test]
    fn decodes_dropped_count() {
        let mut buf = Vec::new();
        encode_dropped(&mut buf, 42, 1024).unwrap();
        let decoded = decode_record(&buf, &identity).unwrap().unwrap();
        assert_eq!(decoded.item, Decoded::Dropped(42));
    }

    #[test]
    fn decodes_stack_delta_round_trip() {
        let mut buf = Vec::new();
        let frames = vec![
            StackFrame { source: b"a.rs".to_vec(), line: 1 },
            StackFrame { source: b"b.rs".to_vec(), line: 42 },
        ];
        encode_stack_delta(&mut buf, 3, &frames, 1024).unwrap();
        let decoded = decode_record(&buf, &identity).unwrap().unwrap();
        match decoded.item {
            Decoded::StackDelta { to_drop, frames: got } => {
                assert_eq!(to_drop, 3);
                assert_eq!(got, frames);
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn unknown_tag_is_protocol_error() {
        let buf = vec![0xEE, 0x00];
        let err = decode_record(&buf, &identity).unwrap_err();
        assert!(matches!(err, StreamError::Protocol(_)));
    }
}
