//! Tests for FileEnvelope
//!
//! These tests verify:
//! - Create/open round trip of meta and data
//! - Append bookkeeping (tag data length survives reopen)
//! - Positioned reads (blocks and lines, partial trailing lines)
//! - Meta and data rewrites, read-only and closed envelopes
//! - Recovery of an under-reported data length
//! - Appends never splice onto an unrecorded tail

use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

use shelfdb::envelope::{FileEnvelope, MetaCodecKind, Tag, TAG_SIZE};
use shelfdb::{Meta, ShelfError};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_envelope() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("test.table");
    (temp_dir, path)
}

fn sample_meta() -> Meta {
    Meta::new().with("name", "test").with("type", "table")
}

fn create(path: &PathBuf) -> FileEnvelope {
    FileEnvelope::create(path, &sample_meta(), MetaCodecKind::Json).unwrap()
}

// =============================================================================
// Create/Open Tests
// =============================================================================

#[test]
fn test_create_writes_empty_envelope() {
    let (_temp, path) = setup_temp_envelope();
    let envelope = create(&path);

    assert_eq!(envelope.data_length().unwrap(), 0);
    assert_eq!(envelope.meta().unwrap(), sample_meta());
    assert!(FileEnvelope::probe(&path));
}

#[test]
fn test_create_refuses_existing_file() {
    let (_temp, path) = setup_temp_envelope();
    let _envelope = create(&path);

    let result = FileEnvelope::create(&path, &Meta::new(), MetaCodecKind::Json);
    assert!(matches!(result, Err(ShelfError::Io(_))));
}

#[test]
fn test_open_missing_file() {
    let (_temp, path) = setup_temp_envelope();
    let result = FileEnvelope::open(&path, false);
    assert!(matches!(result, Err(ShelfError::NotFound(_))));
}

#[test]
fn test_open_garbage_file() {
    let (_temp, path) = setup_temp_envelope();
    std::fs::write(&path, b"this is not an envelope at all, just text").unwrap();

    assert!(!FileEnvelope::probe(&path));
    let envelope = FileEnvelope::open(&path, true).unwrap();
    assert!(matches!(envelope.meta(), Err(ShelfError::Format(_))));
}

#[test]
fn test_binary_codec_envelope() {
    let (_temp, path) = setup_temp_envelope();
    {
        let envelope = FileEnvelope::create(&path, &sample_meta(), MetaCodecKind::Binary).unwrap();
        envelope.append(b"abc\n").unwrap();
    }
    let envelope = FileEnvelope::open(&path, true).unwrap();
    assert_eq!(envelope.tag().unwrap().meta_codec, MetaCodecKind::Binary);
    assert_eq!(envelope.meta().unwrap(), sample_meta());
    assert_eq!(&envelope.data().unwrap()[..], b"abc\n");
}

// =============================================================================
// Append Tests
// =============================================================================

#[test]
fn test_append_updates_length_across_reopen() {
    let (_temp, path) = setup_temp_envelope();
    {
        let envelope = create(&path);
        assert_eq!(envelope.append(b"first line\n").unwrap(), 11);
        assert_eq!(envelope.append(b"second\n").unwrap(), 18);
    }

    let envelope = FileEnvelope::open(&path, true).unwrap();
    assert_eq!(envelope.data_length().unwrap(), 18);
    assert_eq!(envelope.meta().unwrap(), sample_meta());
    assert_eq!(&envelope.data().unwrap()[..], b"first line\nsecond\n");
}

#[test]
fn test_append_read_only_fails() {
    let (_temp, path) = setup_temp_envelope();
    drop(create(&path));

    let envelope = FileEnvelope::open(&path, true).unwrap();
    assert!(envelope.is_read_only());
    assert!(matches!(envelope.append(b"x"), Err(ShelfError::ReadOnly(_))));
    assert!(matches!(envelope.clear_data(), Err(ShelfError::ReadOnly(_))));
}

#[test]
fn test_closed_envelope() {
    let (_temp, path) = setup_temp_envelope();
    let envelope = create(&path);
    envelope.close();
    envelope.close();

    assert!(envelope.is_closed());
    assert!(matches!(envelope.append(b"x"), Err(ShelfError::Closed(_))));
}

// =============================================================================
// Read Tests
// =============================================================================

#[test]
fn test_read_block_clamps_to_data() {
    let (_temp, path) = setup_temp_envelope();
    let envelope = create(&path);
    envelope.append(b"0123456789").unwrap();

    assert_eq!(&envelope.read_block(2, 3).unwrap()[..], b"234");
    assert_eq!(&envelope.read_block(8, 100).unwrap()[..], b"89");
    assert!(envelope.read_block(11, 1).is_err());
}

#[test]
fn test_read_line_and_lines() {
    let (_temp, path) = setup_temp_envelope();
    let envelope = create(&path);
    envelope.append(b"alpha\nbeta\r\ngamma\n").unwrap();

    let line = envelope.read_line(6).unwrap().unwrap();
    assert_eq!(line.offset, 6);
    assert_eq!(line.text, "beta");

    let (lines, end) = envelope.read_lines(0, u64::MAX).unwrap();
    let texts: Vec<&str> = lines.iter().map(|l| l.text.as_str()).collect();
    assert_eq!(texts, vec!["alpha", "beta", "gamma"]);
    assert_eq!(lines[2].offset, 12);
    assert_eq!(end, 18);
}

#[test]
fn test_read_lines_skips_partial_tail() {
    let (_temp, path) = setup_temp_envelope();
    let envelope = create(&path);
    envelope.append(b"done\nunfinish").unwrap();

    let (lines, end) = envelope.read_lines(0, u64::MAX).unwrap();
    assert_eq!(lines.len(), 1);
    assert_eq!(end, 5);
    assert!(envelope.read_line(5).unwrap().is_none());
}

#[test]
fn test_read_lines_budget() {
    let (_temp, path) = setup_temp_envelope();
    let envelope = create(&path);
    envelope.append(b"aa\nbb\ncc\n").unwrap();

    let (lines, end) = envelope.read_lines(0, 4).unwrap();
    assert_eq!(lines.len(), 2);
    assert_eq!(end, 6);

    let (lines, end) = envelope.read_lines(end, 4).unwrap();
    assert_eq!(lines.len(), 1);
    assert_eq!(end, 9);
}

// =============================================================================
// Rewrite Tests
// =============================================================================

#[test]
fn test_clear_data() {
    let (_temp, path) = setup_temp_envelope();
    let envelope = create(&path);
    envelope.append(b"something\n").unwrap();
    let epoch = envelope.epoch();

    envelope.clear_data().unwrap();
    assert_eq!(envelope.data_length().unwrap(), 0);
    assert!(envelope.epoch() > epoch);
    assert_eq!(envelope.meta().unwrap(), sample_meta());

    envelope.append(b"fresh\n").unwrap();
    assert_eq!(&envelope.data().unwrap()[..], b"fresh\n");
}

#[test]
fn test_set_meta_keeps_data() {
    let (_temp, path) = setup_temp_envelope();
    let envelope = create(&path);
    envelope.append(b"row 1\nrow 2\n").unwrap();

    let bigger = sample_meta().with("description", "a much longer meta block than before");
    envelope.set_meta(&bigger).unwrap();
    assert_eq!(envelope.meta().unwrap(), bigger);
    assert_eq!(&envelope.data().unwrap()[..], b"row 1\nrow 2\n");

    envelope.append(b"row 3\n").unwrap();
    drop(envelope);

    let reopened = FileEnvelope::open(&path, true).unwrap();
    assert_eq!(reopened.meta().unwrap(), bigger);
    assert_eq!(&reopened.data().unwrap()[..], b"row 1\nrow 2\nrow 3\n");
}

#[test]
fn test_reconcile_under_reported_length() {
    let (_temp, path) = setup_temp_envelope();
    {
        let envelope = create(&path);
        envelope.append(b"kept\n").unwrap();
    }

    // data written, tag not rewritten
    let mut file = OpenOptions::new().append(true).open(&path).unwrap();
    file.write_all(b"lost\n").unwrap();
    drop(file);

    let envelope = FileEnvelope::open(&path, false).unwrap();
    assert_eq!(envelope.data_length().unwrap(), 5);
    assert_eq!(envelope.reconcile_length().unwrap(), Some(10));
    assert_eq!(envelope.data_length().unwrap(), 10);
    assert_eq!(envelope.reconcile_length().unwrap(), None);
}

#[test]
fn test_append_discards_unrecorded_tail() {
    let (_temp, path) = setup_temp_envelope();
    {
        let envelope = create(&path);
        envelope.append(b"first\n").unwrap();
        envelope.append(b"second\n").unwrap();
    }

    // the tag of the second append never reached the disk
    let mut header = [0u8; TAG_SIZE];
    let mut file = OpenOptions::new().read(true).write(true).open(&path).unwrap();
    file.read_exact(&mut header).unwrap();
    let tag = Tag::decode(&header).unwrap().with_data_length(Some(6));
    file.seek(SeekFrom::Start(0)).unwrap();
    file.write_all(&tag.encode()).unwrap();
    drop(file);

    let envelope = FileEnvelope::open(&path, false).unwrap();
    assert_eq!(envelope.append(b"x\n").unwrap(), 8);
    assert_eq!(&envelope.data().unwrap()[..], b"first\nx\n");
    assert_eq!(envelope.reconcile_length().unwrap(), None);

    let file_length = std::fs::metadata(&path).unwrap().len();
    assert_eq!(file_length, tag.data_offset() + 8);
}

#[test]
fn test_raw_meta_matches_file() {
    let (_temp, path) = setup_temp_envelope();
    let envelope = create(&path);
    let raw = envelope.raw_meta().unwrap();

    let bytes = std::fs::read(&path).unwrap();
    assert_eq!(&bytes[TAG_SIZE..TAG_SIZE + raw.len()], &raw[..]);
}
