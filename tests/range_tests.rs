//! Tests for the range engine
//!
//! These tests verify:
//! - READ_RANGE collection and replay over `[start, end]`
//! - SORT ordering and the terminating reply
//! - start/limit windowing of collected hits
//! - NODATA counting
//! - DEL_RANGE removal semantics

mod common;

use blobkv_backend::protocol::{cmdflags, ioflags, Cmd, CommandCode, IoAttr, Key};
use common::*;

// =============================================================================
// Helpers
// =============================================================================

/// Writes keys 0..n with payload "value<i>"
fn populate(backend: &blobkv_backend::BlobBackend, sink: &mut CapturingSink, n: u8) {
    for i in 0..n {
        let payload = format!("value{}", i);
        put(backend, sink, key_n(i), payload.as_bytes());
    }
}

/// Issue a range command over `[start, end]`; returns the status
fn range(
    backend: &blobkv_backend::BlobBackend,
    sink: &mut CapturingSink,
    code: CommandCode,
    start: Key,
    end: Key,
    io_setup: impl FnOnce(&mut IoAttr),
    cmd_flags: u64,
) -> i32 {
    let mut io = IoAttr::for_key(start);
    io.parent = end;
    io_setup(&mut io);

    let mut cmd = Cmd::new(code, start);
    cmd.flags |= cmd_flags;
    backend.handle_command(sink, &mut cmd, &io_data(&io))
}

// =============================================================================
// READ_RANGE
// =============================================================================

#[test]
fn test_read_range_sorted_replays_in_key_order() {
    let (_dir, backend) = setup_backend();
    let mut sink = CapturingSink::new();
    populate(&backend, &mut sink, 10);

    sink.replies.clear();
    let status = range(
        &backend,
        &mut sink,
        CommandCode::ReadRange,
        key_n(0),
        key_n(9),
        |_| {},
        cmdflags::SORT,
    );
    assert_eq!(status, 0);

    // Ten data replies in nondecreasing key order, then the terminator
    let replies = sink.read_replies();
    assert_eq!(replies.len(), 11);

    let mut last_key = [0u8; 64];
    for (i, reply) in replies[..10].iter().enumerate() {
        match reply {
            Reply::ReadData {
                id,
                data: Some(data),
                ..
            } => {
                assert!(id.as_slice() >= last_key.as_slice());
                last_key = *id;
                assert_eq!(data, format!("value{}", i).as_bytes());
            }
            other => panic!("expected data reply, got {:?}", other),
        }
    }

    match replies[10] {
        Reply::ReadData {
            num,
            offset,
            size,
            data: None,
            ..
        } => {
            assert_eq!(*num, 10);
            assert_eq!(*offset, 0);
            assert_eq!(*size, 0);
        }
        other => panic!("expected terminator, got {:?}", other),
    }
}

#[test]
fn test_read_range_subrange() {
    let (_dir, backend) = setup_backend();
    let mut sink = CapturingSink::new();
    populate(&backend, &mut sink, 10);

    sink.replies.clear();
    let status = range(
        &backend,
        &mut sink,
        CommandCode::ReadRange,
        key_n(3),
        key_n(6),
        |_| {},
        cmdflags::SORT,
    );
    assert_eq!(status, 0);

    let replies = sink.read_replies();
    assert_eq!(replies.len(), 5); // keys 3..=6 plus terminator
    match replies[4] {
        Reply::ReadData { num, .. } => assert_eq!(*num, 4),
        other => panic!("expected terminator, got {:?}", other),
    }
}

#[test]
fn test_read_range_limits_start_and_num() {
    let (_dir, backend) = setup_backend();
    let mut sink = CapturingSink::new();
    populate(&backend, &mut sink, 10);

    sink.replies.clear();
    let status = range(
        &backend,
        &mut sink,
        CommandCode::ReadRange,
        key_n(0),
        key_n(9),
        |io| {
            io.start = 2;
            io.num = 3;
        },
        cmdflags::SORT,
    );
    assert_eq!(status, 0);

    // Exactly 3 hits, starting at the 2nd collected entry
    let replies = sink.read_replies();
    assert_eq!(replies.len(), 4);
    for (i, reply) in replies[..3].iter().enumerate() {
        match reply {
            Reply::ReadData {
                data: Some(data), ..
            } => assert_eq!(data, format!("value{}", i + 2).as_bytes()),
            other => panic!("expected data reply, got {:?}", other),
        }
    }

    // The terminator reports collected minus start
    match replies[3] {
        Reply::ReadData { num, .. } => assert_eq!(*num, 8),
        other => panic!("expected terminator, got {:?}", other),
    }
}

#[test]
fn test_read_range_empty_range_sends_nothing() {
    let (_dir, backend) = setup_backend();
    let mut sink = CapturingSink::new();
    populate(&backend, &mut sink, 3);

    sink.replies.clear();
    let status = range(
        &backend,
        &mut sink,
        CommandCode::ReadRange,
        key_n(100),
        key_n(200),
        |_| {},
        0,
    );
    assert_eq!(status, 0);
    assert!(sink.replies.is_empty(), "no hits means no terminator");
}

#[test]
fn test_read_range_applies_requested_offset() {
    let (_dir, backend) = setup_backend();
    let mut sink = CapturingSink::new();
    put(&backend, &mut sink, key_n(1), b"abcdef");

    sink.replies.clear();
    let status = range(
        &backend,
        &mut sink,
        CommandCode::ReadRange,
        key_n(0),
        key_n(2),
        |io| io.offset = 2,
        0,
    );
    assert_eq!(status, 0);

    let replies = sink.read_replies();
    assert_eq!(replies.len(), 2);
    match replies[0] {
        Reply::ReadData {
            data: Some(data), ..
        } => assert_eq!(data, b"cdef"),
        other => panic!("expected data reply, got {:?}", other),
    }
}

#[test]
fn test_read_range_nodata_counts_without_sending() {
    let (_dir, backend) = setup_backend();
    let mut sink = CapturingSink::new();
    populate(&backend, &mut sink, 5);

    sink.replies.clear();
    let status = range(
        &backend,
        &mut sink,
        CommandCode::ReadRange,
        key_n(0),
        key_n(4),
        |io| io.flags = ioflags::NODATA,
        0,
    );
    assert_eq!(status, 0);

    // Only the terminator, reporting all five hits
    let replies = sink.read_replies();
    assert_eq!(replies.len(), 1);
    match replies[0] {
        Reply::ReadData { num, data: None, .. } => assert_eq!(*num, 5),
        other => panic!("expected terminator, got {:?}", other),
    }
}

// =============================================================================
// DEL_RANGE
// =============================================================================

#[test]
fn test_del_range_removes_only_the_range() {
    let (_dir, backend) = setup_backend();
    let mut sink = CapturingSink::new();
    populate(&backend, &mut sink, 10);

    let status = range(
        &backend,
        &mut sink,
        CommandCode::DelRange,
        key_n(0),
        key_n(4),
        |_| {},
        0,
    );
    assert_eq!(status, 0);

    // Inside the range: gone; outside: still present
    assert_eq!(get(&backend, &mut sink, key_n(2)), -libc::ENOENT);
    assert_eq!(get(&backend, &mut sink, key_n(5)), 0);
    assert_eq!(backend.engine().total_records(), 5);
}

// =============================================================================
// Edge Cases
// =============================================================================

#[test]
fn test_range_skips_hits_shorter_than_requested_offset() {
    let (_dir, backend) = setup_backend();
    let mut sink = CapturingSink::new();

    put(&backend, &mut sink, key_n(1), b"tiny");
    put(&backend, &mut sink, key_n(2), &vec![7u8; 4096]);

    sink.replies.clear();
    // Offset larger than the small record's size: that hit is skipped
    let status = range(
        &backend,
        &mut sink,
        CommandCode::ReadRange,
        key_n(0),
        key_n(3),
        |io| io.offset = 1000,
        0,
    );
    assert_eq!(status, 0);

    let replies = sink.read_replies();
    assert_eq!(replies.len(), 2);
    match replies[0] {
        Reply::ReadData {
            id,
            data: Some(data),
            ..
        } => {
            assert_eq!(id[0], 2);
            assert_eq!(data.len(), 4096 - 1000);
        }
        other => panic!("expected data reply, got {:?}", other),
    }
}

#[test]
fn test_range_includes_both_bounds() {
    let (_dir, backend) = setup_backend();
    let mut sink = CapturingSink::new();
    populate(&backend, &mut sink, 3);

    sink.replies.clear();
    let status = range(
        &backend,
        &mut sink,
        CommandCode::ReadRange,
        key_n(0),
        key_n(2),
        |_| {},
        0,
    );
    assert_eq!(status, 0);

    // Keys 0, 1 and 2 all hit
    let replies = sink.read_replies();
    assert_eq!(replies.len(), 4);
}
