//! Avro object-container reader: header validation, block iteration with
//! sync verification, record projection to JSON and record-level seek.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use common::err::cdc_error::{CdcError, CdcResult};
use serde_json::Value as Json;
use tracing::warn;

use crate::codec;
use crate::schema::RecordSchema;
use crate::{AVRO_MAGIC, CODEC_KEY, SCHEMA_KEY, SYNC_MARKER_SIZE};

/// Outcome of scanning a container tail for its last intact block.
#[derive(Debug)]
pub struct ContainerScan {
    pub schema_json: String,
    pub sync_marker: [u8; SYNC_MARKER_SIZE],
    /// File length up to and including the last complete, sync-verified
    /// block.
    pub valid_len: u64,
}

/// A reader over one `.avro` file.
///
/// Sync mismatch, a truncated block or a record decode error poison the
/// handle: further reads keep failing and the file on disk is untouched.
/// Callers recover by re-opening.
#[derive(Debug)]
pub struct AvroReader {
    file: File,
    path: PathBuf,
    schema: RecordSchema,
    schema_json: String,
    sync_marker: [u8; SYNC_MARKER_SIZE],
    /// Offset of the first block header.
    header_len: u64,
    block_start: u64,
    payload_start: u64,
    block_size: u64,
    records_in_block: u64,
    records_left: u64,
    in_block: bool,
    poisoned: bool,
    /// Rendering of the error that poisoned the handle, for diagnostics.
    last_error: Option<String>,
}

impl AvroReader {
    pub fn open(path: &Path) -> CdcResult<Self> {
        let mut file = File::open(path)?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if magic != AVRO_MAGIC {
            return Err(CdcError::corruption(format!(
                "{}: bad container magic {:02x?}",
                path.display(),
                magic
            )));
        }

        let metadata = codec::decode_map(&mut file)?;
        let schema_json = metadata
            .get(SCHEMA_KEY)
            .cloned()
            .ok_or_else(|| {
                CdcError::corruption(format!("{}: no {} in metadata", path.display(), SCHEMA_KEY))
            })?;
        if let Some(codec_name) = metadata.get(CODEC_KEY) {
            if codec_name != "null" {
                return Err(CdcError::corruption(format!(
                    "{}: unsupported codec {:?}",
                    path.display(),
                    codec_name
                )));
            }
        }
        let schema = RecordSchema::parse(&schema_json)?;

        let mut sync_marker = [0u8; SYNC_MARKER_SIZE];
        file.read_exact(&mut sync_marker)?;
        let header_len = file.stream_position()?;

        Ok(AvroReader {
            file,
            path: path.to_path_buf(),
            schema,
            schema_json,
            sync_marker,
            header_len,
            block_start: header_len,
            payload_start: header_len,
            block_size: 0,
            records_in_block: 0,
            records_left: 0,
            in_block: false,
            poisoned: false,
            last_error: None,
        })
    }

    pub fn schema(&self) -> &RecordSchema {
        &self.schema
    }

    pub fn schema_json(&self) -> &str {
        &self.schema_json
    }

    pub fn sync_marker(&self) -> &[u8; SYNC_MARKER_SIZE] {
        &self.sync_marker
    }

    /// Offset of the current block's header.
    pub fn block_start(&self) -> u64 {
        self.block_start
    }

    pub fn records_in_block(&self) -> u64 {
        self.records_in_block
    }

    pub fn position(&mut self) -> CdcResult<u64> {
        Ok(self.file.stream_position()?)
    }

    /// The error that invalidated this handle, if any.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    fn ensure_ok(&self) -> CdcResult<()> {
        if self.poisoned {
            return Err(CdcError::corruption(format!(
                "{}: handle invalidated by an earlier error ({})",
                self.path.display(),
                self.last_error.as_deref().unwrap_or("unknown")
            )));
        }
        Ok(())
    }

    fn fail<T>(&mut self, err: CdcError) -> CdcResult<T> {
        self.poisoned = true;
        self.last_error = Some(err.to_string());
        Err(err)
    }

    fn verify_sync(&mut self) -> CdcResult<()> {
        let mut trailer = [0u8; SYNC_MARKER_SIZE];
        match self.file.read_exact(&mut trailer) {
            Ok(()) => {}
            Err(e) => return self.fail(e.into()),
        }
        if trailer != self.sync_marker {
            let msg = format!(
                "{}: sync marker mismatch at block starting {} (expected {}, found {})",
                self.path.display(),
                self.block_start,
                hex::encode(self.sync_marker),
                hex::encode(trailer)
            );
            return self.fail(CdcError::corruption(msg));
        }
        Ok(())
    }

    /// Leaves the current block (skipping any unread records), verifies its
    /// trailing sync marker and reads the next block header. `false` at end
    /// of file.
    pub fn next_block(&mut self) -> CdcResult<bool> {
        self.ensure_ok()?;

        if self.in_block {
            let payload_end = self.payload_start + self.block_size;
            if self.records_left == 0 {
                // A fully decoded block must land exactly on its recorded
                // size.
                let pos = self.file.stream_position()?;
                if pos != payload_end {
                    return self.fail(CdcError::corruption(format!(
                        "{}: block payload is {} bytes but records ended at {}",
                        self.path.display(),
                        self.block_size,
                        pos - self.payload_start
                    )));
                }
            } else {
                self.file.seek(SeekFrom::Start(payload_end))?;
            }
            self.verify_sync()?;
            self.in_block = false;
        }

        self.block_start = self.file.stream_position()?;
        let records = match codec::decode_long(&mut self.file) {
            Ok(Some(v)) => v,
            Ok(None) => return Ok(false),
            Err(e) => return self.fail(e),
        };
        if records <= 0 {
            return self.fail(CdcError::corruption(format!(
                "{}: block with record count {}",
                self.path.display(),
                records
            )));
        }
        let size = match codec::decode_long(&mut self.file) {
            Ok(Some(v)) if v >= 0 => v,
            Ok(Some(v)) => {
                return self.fail(CdcError::corruption(format!(
                    "{}: negative block size {}",
                    self.path.display(),
                    v
                )))
            }
            Ok(None) => return self.fail(CdcError::eof("truncated block header")),
            Err(e) => return self.fail(e),
        };

        self.payload_start = self.file.stream_position()?;
        self.block_size = size as u64;
        self.records_in_block = records as u64;
        self.records_left = records as u64;
        self.in_block = true;
        Ok(true)
    }

    /// Next record of the current block, `None` once the block is
    /// exhausted; the caller then advances with `next_block`.
    pub fn read_record(&mut self) -> CdcResult<Option<Json>> {
        self.ensure_ok()?;
        if !self.in_block || self.records_left == 0 {
            return Ok(None);
        }
        let record = match self.schema.read_record(&mut self.file) {
            Ok(r) => r,
            Err(e) => return self.fail(e),
        };
        self.records_left -= 1;
        Ok(Some(record))
    }

    /// Next record of the file, entering new blocks as needed. `None` at
    /// end of file.
    pub fn next_record(&mut self) -> CdcResult<Option<Json>> {
        loop {
            if let Some(record) = self.read_record()? {
                return Ok(Some(record));
            }
            if !self.next_block()? {
                return Ok(None);
            }
        }
    }

    /// Advances `offset` records from the cursor. Whole blocks are skipped
    /// by seeking over their payload; the remainder is decoded one record
    /// at a time.
    pub fn seek_record(&mut self, offset: u64) -> CdcResult<()> {
        self.ensure_ok()?;
        let mut remaining = offset;

        loop {
            if !self.in_block || self.records_left == 0 {
                if !self.next_block()? {
                    if remaining > 0 {
                        return Err(CdcError::eof("seek past end of container"));
                    }
                    return Ok(());
                }
            }
            if remaining == 0 {
                return Ok(());
            }
            if remaining >= self.records_left {
                remaining -= self.records_left;
                // Skip the rest of the block wholesale; the next
                // `next_block` verifies its sync.
                self.file
                    .seek(SeekFrom::Start(self.payload_start + self.block_size))?;
                self.records_left = 0;
            } else {
                for _ in 0..remaining {
                    self.read_record()?
                        .ok_or_else(|| CdcError::eof("seek past end of block"))?;
                }
                return Ok(());
            }
        }
    }

    /// Repositions the reader at an absolute block offset, as recorded by
    /// `block_start`.
    pub fn seek_to_block(&mut self, offset: u64) -> CdcResult<()> {
        self.ensure_ok()?;
        if offset < self.header_len {
            return Err(CdcError::corruption(format!(
                "{}: block offset {} inside the header",
                self.path.display(),
                offset
            )));
        }
        self.file.seek(SeekFrom::Start(offset))?;
        self.block_start = offset;
        self.payload_start = offset;
        self.block_size = 0;
        self.records_in_block = 0;
        self.records_left = 0;
        self.in_block = false;
        Ok(())
    }

    /// The next block verbatim: header varints, payload and trailing sync,
    /// for forwarding without reparsing. `None` at end of file.
    pub fn read_block_binary(&mut self) -> CdcResult<Option<Vec<u8>>> {
        self.ensure_ok()?;

        if self.in_block {
            // Rewind to the block header so the copy is complete.
            self.file.seek(SeekFrom::Start(self.block_start))?;
            self.in_block = false;
        }

        let start = self.file.stream_position()?;
        self.block_start = start;
        let records = match codec::decode_long(&mut self.file) {
            Ok(Some(v)) if v > 0 => v as u64,
            Ok(Some(v)) => {
                return self.fail(CdcError::corruption(format!(
                    "{}: block with record count {}",
                    self.path.display(),
                    v
                )))
            }
            Ok(None) => return Ok(None),
            Err(e) => return self.fail(e),
        };
        let size = match codec::decode_long(&mut self.file) {
            Ok(Some(v)) if v >= 0 => v as u64,
            _ => return self.fail(CdcError::eof("truncated block header")),
        };

        let payload_start = self.file.stream_position()?;
        let end = payload_start + size + SYNC_MARKER_SIZE as u64;
        let len = (end - start) as usize;

        self.file.seek(SeekFrom::Start(start))?;
        let mut buf = vec![0u8; len];
        match self.file.read_exact(&mut buf) {
            Ok(()) => {}
            Err(e) => return self.fail(e.into()),
        }
        if buf[len - SYNC_MARKER_SIZE..] != self.sync_marker {
            return self.fail(CdcError::corruption(format!(
                "{}: sync marker mismatch in binary block at {}",
                self.path.display(),
                start
            )));
        }

        self.records_in_block = records;
        self.records_left = 0;
        Ok(Some(buf))
    }

    /// Scans the container tail and reports the length of its intact
    /// prefix. Used by the writer to truncate a crashed append.
    pub fn scan(path: &Path) -> CdcResult<ContainerScan> {
        let mut reader = AvroReader::open(path)?;
        let mut valid_len = reader.header_len;

        loop {
            let _records = match codec::decode_long(&mut reader.file) {
                Ok(Some(v)) if v > 0 => v,
                _ => break,
            };
            let size = match codec::decode_long(&mut reader.file) {
                Ok(Some(v)) if v >= 0 => v as u64,
                _ => break,
            };
            let payload_start = match reader.file.stream_position() {
                Ok(p) => p,
                Err(_) => break,
            };
            if reader
                .file
                .seek(SeekFrom::Start(payload_start + size))
                .is_err()
            {
                break;
            }
            let mut trailer = [0u8; SYNC_MARKER_SIZE];
            if reader.file.read_exact(&mut trailer).is_err() || trailer != reader.sync_marker {
                break;
            }
            valid_len = match reader.file.stream_position() {
                Ok(p) => p,
                Err(_) => break,
            };
        }

        if valid_len < reader.file.metadata()?.len() {
            warn!(
                file = %path.display(),
                valid_len,
                "container has a damaged tail past the last sync marker"
            );
        }

        Ok(ContainerScan {
            schema_json: reader.schema_json,
            sync_marker: reader.sync_marker,
            valid_len,
        })
    }
}
