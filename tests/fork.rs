//! Fork discipline: `flush(); drain(); fork(); resume()` in both parent and
//! child, PID-framed output tolerating concurrent appenders.
//!
//! `fork()` only survives the calling thread in the child, so these tests
//! serialize with each other via `FORK_GUARD` rather than relying on the
//! cargo test harness to run this file single-threaded.

use std::sync::Mutex;
use std::time::Duration;

use tempfile::tempdir;
use tracewire::{Decoded, Reader, ReaderConfigBuilder, Writer, WriterConfigBuilder};

static FORK_GUARD: Mutex<()> = Mutex::new(());

fn serialize(payload: &Vec<u8>) -> Vec<u8> {
    payload.clone()
}

fn identity(bytes: &[u8]) -> Vec<u8> {
    bytes.to_vec()
}

fn open_reader(path: &std::path::Path) -> Reader<Vec<u8>> {
    Reader::open(
        ReaderConfigBuilder::new(path, identity)
            .with_read_timeout(Some(Duration::from_secs(5)))
            .build(),
    )
    .unwrap()
}

fn next_payload(reader: &mut Reader<Vec<u8>>) -> Vec<u8> {
    match reader.next().unwrap() {
        Decoded::Payload(bytes) => bytes,
        other => panic!("expected Payload, got {other:?}"),
    }
}

/// Parent writes 100 records, forks a child that exits without writing, then
/// writes 100 more: the reader sees all 200 in order (scenario 5).
#[test]
fn nonwriting_child_contributes_nothing() {
    let _guard = FORK_GUARD.lock().unwrap();
    let dir = tempdir().unwrap();
    let path = dir.path().join("trace.bin");

    let config = WriterConfigBuilder::new(serialize).with_path(&path).build().unwrap();
    let mut writer = Writer::new(config).unwrap();

    for i in 0..100u32 {
        writer.write(&format!("pre_{i}").into_bytes()).unwrap();
    }

    writer.prepare_for_fork().unwrap();
    let pid = unsafe { libc::fork() };
    assert!(pid >= 0, "fork failed");

    if pid == 0 {
        // Child: does not touch the writer at all, exits immediately.
        std::process::exit(0);
    }

    let mut status = 0i32;
    unsafe {
        libc::waitpid(pid, &mut status, 0);
    }

    writer.resume_after_fork();
    for i in 0..100u32 {
        writer.write(&format!("post_{i}").into_bytes()).unwrap();
    }
    writer.close().unwrap();

    let mut reader = open_reader(&path);
    for i in 0..100u32 {
        assert_eq!(next_payload(&mut reader), format!("pre_{i}").into_bytes());
    }
    for i in 0..100u32 {
        assert_eq!(next_payload(&mut reader), format!("post_{i}").into_bytes());
    }
    assert!(matches!(reader.next(), Err(tracewire::StreamError::Eof)));
    assert_eq!(tracewire::list_pids(&path).unwrap(), vec![std::process::id()]);
}

/// Parent writes, forks a child that itself writes and closes, parent
/// writes again: the default reader yields only the parent's records in
/// order, and `set_pid` recovers the child's (scenario 6).
#[test]
fn writing_child_is_demuxed_by_pid() {
    let _guard = FORK_GUARD.lock().unwrap();
    let dir = tempdir().unwrap();
    let path = dir.path().join("trace.bin");

    let config = WriterConfigBuilder::new(serialize).with_path(&path).build().unwrap();
    let mut writer = Writer::new(config).unwrap();
    writer.write(&b"parent_first".to_vec()).unwrap();

    writer.prepare_for_fork().unwrap();
    let pid = unsafe { libc::fork() };
    assert!(pid >= 0, "fork failed");

    if pid == 0 {
        writer.resume_after_fork();
        writer.write(&b"child_val_1".to_vec()).unwrap();
        writer.write(&b"child_val_2".to_vec()).unwrap();
        writer.close().unwrap();
        std::process::exit(0);
    }

    // Wait for the child to finish and fully flush before the parent
    // appends further, so the on-disk ordering is deterministic.
    let mut status = 0i32;
    unsafe {
        libc::waitpid(pid, &mut status, 0);
    }

    writer.resume_after_fork();
    writer.write(&b"parent_second".to_vec()).unwrap();
    writer.close().unwrap();

    let mut reader = open_reader(&path);
    assert_eq!(next_payload(&mut reader), b"parent_first".to_vec());
    assert_eq!(next_payload(&mut reader), b"parent_second".to_vec());
    assert!(matches!(reader.next(), Err(tracewire::StreamError::Eof)));

    reader.set_pid(pid as u32);
    assert_eq!(next_payload(&mut reader), b"child_val_1".to_vec());
    assert_eq!(next_payload(&mut reader), b"child_val_2".to_vec());
}
