//! Avro object-container writer: header emission, in-memory block
//! grouping and atomic block finalization with truncation on failure.

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use common::err::cdc_error::{CdcError, CdcResult};
use rand::RngCore;
use tracing::{error, info};

use crate::codec;
use crate::reader::AvroReader;
use crate::schema::{encode_value, Value};
use crate::{AVRO_MAGIC, CODEC_KEY, SCHEMA_KEY, SYNC_MARKER_SIZE};

/// Hard ceiling for one serialized block. A block this large means the
/// grouping thresholds are broken; growing further would only defer an
/// allocation failure.
const MAX_BLOCK_BYTES: usize = 1 << 30;

fn new_sync_marker() -> [u8; SYNC_MARKER_SIZE] {
    let mut marker = [0u8; SYNC_MARKER_SIZE];
    rand::thread_rng().fill_bytes(&mut marker);
    marker
}

/// Appends records to one `.avro` file, grouping them into blocks that are
/// flushed with `finalize_block`.
pub struct AvroWriter {
    file: File,
    path: PathBuf,
    sync_marker: [u8; SYNC_MARKER_SIZE],
    buffer: Vec<u8>,
    records_in_block: u64,
}

impl AvroWriter {
    /// Creates a new container, or appends to an existing one after
    /// truncating any damaged tail past its last complete block.
    pub fn create(path: &Path, schema_json: &str, block_capacity: usize) -> CdcResult<Self> {
        let exists = path.metadata().map(|m| m.len() > 0).unwrap_or(false);
        if exists {
            return Self::open_append(path, block_capacity);
        }

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        let mut header = Vec::with_capacity(schema_json.len() + 64);
        header.extend_from_slice(&AVRO_MAGIC);
        codec::encode_map(&[(CODEC_KEY, "null"), (SCHEMA_KEY, schema_json)], &mut header);
        let sync_marker = new_sync_marker();
        header.extend_from_slice(&sync_marker);
        file.write_all(&header)?;
        file.flush()?;

        Ok(AvroWriter {
            file,
            path: path.to_path_buf(),
            sync_marker,
            buffer: Vec::with_capacity(block_capacity),
            records_in_block: 0,
        })
    }

    fn open_append(path: &Path, block_capacity: usize) -> CdcResult<Self> {
        let scan = AvroReader::scan(path)?;

        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let file_len = file.metadata()?.len();
        if file_len > scan.valid_len {
            info!(
                file = %path.display(),
                file_len,
                valid_len = scan.valid_len,
                "truncating damaged container tail before appending"
            );
            file.set_len(scan.valid_len)?;
        }

        let mut writer = AvroWriter {
            file,
            path: path.to_path_buf(),
            sync_marker: scan.sync_marker,
            buffer: Vec::with_capacity(block_capacity),
            records_in_block: 0,
        };
        writer.file.seek(SeekFrom::End(0))?;
        Ok(writer)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn sync_marker(&self) -> &[u8; SYNC_MARKER_SIZE] {
        &self.sync_marker
    }

    /// Records buffered in the open block.
    pub fn records_in_block(&self) -> u64 {
        self.records_in_block
    }

    /// Serialized size of the open block so far.
    pub fn block_bytes(&self) -> usize {
        self.buffer.len()
    }

    /// Encodes one record into the open block. The buffer grows by
    /// doubling as needed, up to a hard ceiling.
    pub fn append_record(&mut self, fields: &[Value]) -> CdcResult<()> {
        for value in fields {
            encode_value(value, &mut self.buffer);
        }
        if self.buffer.len() > MAX_BLOCK_BYTES {
            return Err(CdcError::Memory(format!(
                "{}: block buffer grew past {} bytes",
                self.path.display(),
                MAX_BLOCK_BYTES
            )));
        }
        self.records_in_block += 1;
        Ok(())
    }

    /// Writes `records, size, payload, sync` as one unit. A short write
    /// truncates the file back to its pre-append length and surfaces the
    /// error; the buffered block stays intact for a retry.
    pub fn finalize_block(&mut self) -> CdcResult<()> {
        if self.records_in_block == 0 {
            return Ok(());
        }

        let rollback = self.file.seek(SeekFrom::End(0))?;

        let mut head = Vec::with_capacity(20);
        codec::encode_long(self.records_in_block as i64, &mut head);
        codec::encode_long(self.buffer.len() as i64, &mut head);

        let result = self
            .file
            .write_all(&head)
            .and_then(|_| self.file.write_all(&self.buffer))
            .and_then(|_| self.file.write_all(&self.sync_marker))
            .and_then(|_| self.file.flush());

        if let Err(e) = result {
            error!(
                file = %self.path.display(),
                error = %e,
                "block write failed, truncating back to {} bytes", rollback
            );
            self.file.set_len(rollback)?;
            self.file.seek(SeekFrom::Start(rollback))?;
            return Err(e.into());
        }

        self.buffer.clear();
        self.records_in_block = 0;
        Ok(())
    }

    /// Flushes any open block and hands back the underlying file length.
    pub fn close(mut self) -> CdcResult<u64> {
        self.finalize_block()?;
        Ok(self.file.metadata()?.len())
    }
}

impl Drop for AvroWriter {
    fn drop(&mut self) {
        if self.records_in_block > 0 {
            if let Err(e) = self.finalize_block() {
                error!(
                    file = %self.path.display(),
                    error = %e,
                    "failed to flush final block on drop"
                );
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::schema::Value;

    const SCHEMA: &str =
        r#"{"type":"record","name":"R","fields":[{"name":"x","type":"long"}]}"#;

    #[test]
    fn header_written_on_creation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.avro");

        let writer = AvroWriter::create(&path, SCHEMA, 1024).unwrap();
        drop(writer);

        let buf = std::fs::read(&path).unwrap();
        assert_eq!(&buf[0..4], b"Obj\x01");
        // Metadata plus the 16 byte sync marker follow the magic.
        assert!(buf.len() > 4 + SYNC_MARKER_SIZE);
    }

    #[test]
    fn empty_block_is_not_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.avro");

        let mut writer = AvroWriter::create(&path, SCHEMA, 1024).unwrap();
        let header_len = writer.file.metadata().unwrap().len();
        writer.finalize_block().unwrap();
        assert_eq!(writer.file.metadata().unwrap().len(), header_len);
    }

    #[test]
    fn append_accumulates_until_finalize() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.avro");

        let mut writer = AvroWriter::create(&path, SCHEMA, 1024).unwrap();
        writer.append_record(&[Value::Long(1)]).unwrap();
        writer.append_record(&[Value::Long(2)]).unwrap();
        assert_eq!(writer.records_in_block(), 2);
        assert_eq!(writer.block_bytes(), 2);

        writer.finalize_block().unwrap();
        assert_eq!(writer.records_in_block(), 0);
        assert_eq!(writer.block_bytes(), 0);
    }
}
