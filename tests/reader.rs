//! Reader-specific behavior: pid demux, bind substitution, stack delta
//! gating, timeouts, and close idempotency.

use std::time::Duration;

use tempfile::tempdir;
use tracewire::{Decoded, Reader, ReaderConfigBuilder, StackFrame, StreamError, Writer, WriterConfigBuilder};

fn serialize(payload: &Vec<u8>) -> Vec<u8> {
    payload.clone()
}

fn identity(bytes: &[u8]) -> Vec<u8> {
    bytes.to_vec()
}

#[test]
fn list_pids_reports_every_observed_pid() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("trace.bin");

    let config = WriterConfigBuilder::new(serialize).with_path(&path).build().unwrap();
    let mut writer = Writer::new(config).unwrap();
    writer.write(&b"only-this-process".to_vec()).unwrap();
    writer.close().unwrap();

    let pids = tracewire::list_pids(&path).unwrap();
    assert_eq!(pids, vec![std::process::id()]);
}

#[test]
fn bind_value_is_substituted_when_configured() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("trace.bin");

    let config = WriterConfigBuilder::new(serialize).with_path(&path).build().unwrap();
    let mut writer = Writer::new(config).unwrap();
    writer.bind(b"original-sentinel").unwrap();
    writer.write(&b"payload".to_vec()).unwrap();
    writer.close().unwrap();

    let mut reader = Reader::open(
        ReaderConfigBuilder::new(&path, identity)
            .with_bind_value(b"replacement".to_vec())
            .with_read_timeout(Some(Duration::from_secs(2)))
            .build(),
    )
    .unwrap();

    assert_eq!(reader.next().unwrap(), Decoded::Bind(b"replacement".to_vec()));
    assert_eq!(reader.next().unwrap(), Decoded::Payload(b"payload".to_vec()));
}

#[test]
fn bind_record_is_skipped_without_bind_value() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("trace.bin");

    let config = WriterConfigBuilder::new(serialize).with_path(&path).build().unwrap();
    let mut writer = Writer::new(config).unwrap();
    writer.bind(b"original-sentinel").unwrap();
    writer.write(&b"payload".to_vec()).unwrap();
    writer.close().unwrap();

    let mut reader = Reader::open(
        ReaderConfigBuilder::new(&path, identity)
            .with_read_timeout(Some(Duration::from_secs(2)))
            .build(),
    )
    .unwrap();

    // No bind_value configured: the Bind record is skipped entirely, the
    // first visible item is the payload.
    assert_eq!(reader.next().unwrap(), Decoded::Payload(b"payload".to_vec()));
}

#[test]
fn stack_delta_is_gated_by_create_stack_delta() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("trace.bin");

    let frames = vec![
        StackFrame { source: b"main.rs".to_vec(), line: 10 },
        StackFrame { source: b"lib.rs".to_vec(), line: 42 },
    ];

    let config = WriterConfigBuilder::new(serialize).with_path(&path).build().unwrap();
    let mut writer = Writer::new(config).unwrap();
    writer.stack_delta(1, &frames).unwrap();
    writer.write(&b"after-delta".to_vec()).unwrap();
    writer.close().unwrap();

    let mut reader = Reader::open(
        ReaderConfigBuilder::new(&path, identity)
            .with_create_stack_delta(false)
            .with_read_timeout(Some(Duration::from_secs(2)))
            .build(),
    )
    .unwrap();
    assert_eq!(reader.next().unwrap(), Decoded::Payload(b"after-delta".to_vec()));

    let mut reader = Reader::open(
        ReaderConfigBuilder::new(&path, identity)
            .with_create_stack_delta(true)
            .with_read_timeout(Some(Duration::from_secs(2)))
            .build(),
    )
    .unwrap();
    match reader.next().unwrap() {
        Decoded::StackDelta { to_drop, frames: got } => {
            assert_eq!(to_drop, 1);
            assert_eq!(got, frames);
        }
        other => panic!("expected StackDelta, got {other:?}"),
    }
}

#[test]
fn read_timeout_fires_while_waiting_for_more_data() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("trace.bin");

    // A writer that stays open (not closed) keeps the exclusive lock held, so
    // the reader cannot conclude EOF and must time out instead.
    let config = WriterConfigBuilder::new(serialize).with_path(&path).build().unwrap();
    let mut writer = Writer::new(config).unwrap();
    writer.write(&b"only-record".to_vec()).unwrap();
    writer.flush().unwrap();

    let mut reader = Reader::open(
        ReaderConfigBuilder::new(&path, identity)
            .with_read_timeout(Some(Duration::from_millis(200)))
            .build(),
    )
    .unwrap();

    assert_eq!(reader.next().unwrap(), Decoded::Payload(b"only-record".to_vec()));
    assert!(matches!(reader.next(), Err(StreamError::Timeout)));

    writer.close().unwrap();
}

#[test]
fn eof_after_writer_closes() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("trace.bin");

    let config = WriterConfigBuilder::new(serialize).with_path(&path).build().unwrap();
    let mut writer = Writer::new(config).unwrap();
    writer.write(&b"one".to_vec()).unwrap();
    writer.close().unwrap();

    let mut reader = Reader::open(
        ReaderConfigBuilder::new(&path, identity)
            .with_read_timeout(Some(Duration::from_secs(2)))
            .build(),
    )
    .unwrap();
    assert_eq!(reader.next().unwrap(), Decoded::Payload(b"one".to_vec()));
    assert!(matches!(reader.next(), Err(StreamError::Eof)));
    // Repeated calls after EOF keep returning Eof, not panicking or blocking.
    assert!(matches!(reader.next(), Err(StreamError::Eof)));
}

#[test]
fn writer_close_is_idempotent() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("trace.bin");

    let config = WriterConfigBuilder::new(serialize).with_path(&path).build().unwrap();
    let mut writer = Writer::new(config).unwrap();
    writer.write(&b"one".to_vec()).unwrap();
    writer.close().unwrap();
    writer.close().unwrap();
    writer.close().unwrap();
}
