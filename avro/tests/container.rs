//! End-to-end container tests: write with one handle, re-read with
//! another, and exercise the failure paths a consumer can hit.

use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use avro::reader::AvroReader;
use avro::schema::Value;
use avro::writer::AvroWriter;

const SCHEMA: &str = r#"{"type":"record","name":"R","fields":[{"name":"x","type":"long"}]}"#;

fn file_with_blocks(dir: &Path, blocks: &[&[i64]]) -> PathBuf {
    let path = dir.join("t.avro");
    let mut writer = AvroWriter::create(&path, SCHEMA, 1024).unwrap();
    for block in blocks {
        for value in *block {
            writer.append_record(&[Value::Long(*value)]).unwrap();
        }
        writer.finalize_block().unwrap();
    }
    writer.close().unwrap();
    path
}

#[test]
fn two_single_record_blocks() {
    let dir = tempfile::tempdir().unwrap();
    let path = file_with_blocks(dir.path(), &[&[1], &[-1]]);

    let mut reader = AvroReader::open(&path).unwrap();

    assert!(reader.next_block().unwrap());
    assert_eq!(reader.records_in_block(), 1);
    let first = reader.read_record().unwrap().unwrap();
    assert_eq!(first["x"], 1);
    assert!(reader.read_record().unwrap().is_none());

    assert!(reader.next_block().unwrap());
    let second = reader.read_record().unwrap().unwrap();
    assert_eq!(second["x"], -1);

    assert!(!reader.next_block().unwrap());
}

#[test]
fn reread_preserves_record_order() {
    let dir = tempfile::tempdir().unwrap();
    let values: Vec<i64> = (0..100).map(|i| i * 3 - 50).collect();
    let blocks: Vec<&[i64]> = values.chunks(7).collect();
    let path = file_with_blocks(dir.path(), &blocks);

    let mut reader = AvroReader::open(&path).unwrap();
    let mut seen = Vec::new();
    while let Some(record) = reader.next_record().unwrap() {
        seen.push(record["x"].as_i64().unwrap());
    }
    assert_eq!(seen, values);
}

#[test]
fn seek_record_crosses_block_boundaries() {
    let dir = tempfile::tempdir().unwrap();
    let values: Vec<i64> = (0..40).collect();
    let blocks: Vec<&[i64]> = values.chunks(10).collect();
    let path = file_with_blocks(dir.path(), &blocks);

    // Seek into the middle of the third block.
    let mut reader = AvroReader::open(&path).unwrap();
    reader.seek_record(25).unwrap();
    let record = reader.read_record().unwrap().unwrap();
    assert_eq!(record["x"], 25);

    // Seeking relative to the cursor continues from here: one record was
    // consumed, four more skip to index 30.
    reader.seek_record(4).unwrap();
    let record = reader.next_record().unwrap().unwrap();
    assert_eq!(record["x"], 30);

    // Seeking exactly to the end is allowed and leaves nothing to read.
    let mut reader = AvroReader::open(&path).unwrap();
    reader.seek_record(40).unwrap();
    assert!(reader.next_record().unwrap().is_none());

    // One past the end is an error.
    let mut reader = AvroReader::open(&path).unwrap();
    assert!(reader.seek_record(41).is_err());
}

#[test]
fn read_block_binary_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let path = file_with_blocks(dir.path(), &[&[7, 8], &[9]]);

    let mut reader = AvroReader::open(&path).unwrap();
    let first = reader.read_block_binary().unwrap().unwrap();
    let second = reader.read_block_binary().unwrap().unwrap();
    assert!(reader.read_block_binary().unwrap().is_none());

    // The concatenation of header, blocks and nothing else is the file.
    let raw = std::fs::read(&path).unwrap();
    let tail = [first, second].concat();
    assert_eq!(&raw[raw.len() - tail.len()..], tail.as_slice());
}

#[test]
fn sync_mismatch_poisons_the_handle() {
    let dir = tempfile::tempdir().unwrap();
    let path = file_with_blocks(dir.path(), &[&[1], &[2]]);

    // Flip one byte in the first block's trailing sync marker.
    let len = std::fs::metadata(&path).unwrap().len();
    let mut file = OpenOptions::new().write(true).read(true).open(&path).unwrap();
    // Each block is count(1) + size(1) + payload(1) + sync(16) bytes; the
    // first block's sync ends where the second block starts.
    let second_block_len: u64 = 1 + 1 + 1 + 16;
    file.seek(SeekFrom::Start(len - second_block_len - 1)).unwrap();
    file.write_all(&[0xAA]).unwrap();
    drop(file);

    let mut reader = AvroReader::open(&path).unwrap();
    assert!(reader.next_block().unwrap());
    reader.read_record().unwrap().unwrap();
    let err = reader.next_block().unwrap_err();
    assert!(err.to_string().contains("sync"), "{err}");

    // The handle stays invalid afterwards and remembers why.
    assert!(reader.read_record().is_err());
    assert!(reader.next_block().is_err());
    assert!(reader.last_error().unwrap().contains("sync"));
}

#[test]
fn truncated_append_is_cut_back_on_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = file_with_blocks(dir.path(), &[&[1, 2, 3]]);
    let good_len = std::fs::metadata(&path).unwrap().len();

    // Simulate a crash mid-append: half a block header and payload.
    let mut file = OpenOptions::new().append(true).open(&path).unwrap();
    file.write_all(&[0x06, 0x0a, 0x02, 0x04]).unwrap();
    drop(file);

    let mut writer = AvroWriter::create(&path, SCHEMA, 1024).unwrap();
    writer.append_record(&[Value::Long(4)]).unwrap();
    writer.finalize_block().unwrap();
    drop(writer);

    assert!(std::fs::metadata(&path).unwrap().len() > good_len);

    // The file ends on a sync marker again and reads back cleanly.
    let mut reader = AvroReader::open(&path).unwrap();
    let mut seen = Vec::new();
    while let Some(record) = reader.next_record().unwrap() {
        seen.push(record["x"].as_i64().unwrap());
    }
    assert_eq!(seen, [1, 2, 3, 4]);
}

#[test]
fn append_resumes_with_original_sync_marker() {
    let dir = tempfile::tempdir().unwrap();
    let path = file_with_blocks(dir.path(), &[&[1]]);

    let marker = *AvroReader::open(&path).unwrap().sync_marker();
    let writer = AvroWriter::create(&path, SCHEMA, 1024).unwrap();
    assert_eq!(writer.sync_marker(), &marker);
}

#[test]
fn missing_schema_metadata_is_corruption() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.avro");

    let mut buf = Vec::new();
    buf.extend_from_slice(b"Obj\x01");
    // Metadata without avro.schema: single zero-count block.
    buf.push(0x00);
    buf.extend_from_slice(&[0u8; 16]);
    std::fs::write(&path, buf).unwrap();

    let err = AvroReader::open(&path).unwrap_err();
    assert!(err.to_string().contains("avro.schema"), "{err}");
}

#[test]
fn bad_magic_is_corruption() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.avro");
    std::fs::write(&path, b"Avro-123456789").unwrap();

    let err = AvroReader::open(&path).unwrap_err();
    assert!(err.to_string().contains("magic"), "{err}");
}
