//! Reads events from one binlog file: magic check, then header/payload
//! pairs in file order. Running off the end of a live file is reported as
//! "no more events", not an error, so the scan loop can poll again later.

use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use common::err::cdc_error::{CdcError, CdcResult};
use tracing::trace;

use crate::events::event_header::{check_magic, EventHeader, EVENT_HEADER_LEN};
use crate::BINLOG_MAGIC;

pub struct BinlogFileReader {
    file: File,
    path: PathBuf,
    /// Offset of the next unread event header.
    position: u64,
}

/// Reads as much of `buf` as the file holds. `Ok(false)` when zero bytes
/// were available, an error when the fill stopped partway.
fn read_exact_or_eof(file: &mut File, buf: &mut [u8]) -> CdcResult<bool> {
    let mut filled = 0usize;
    while filled < buf.len() {
        match file.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(false),
            Ok(0) => return Err(CdcError::eof("event truncated")),
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(true)
}

impl BinlogFileReader {
    pub fn open(path: &Path) -> CdcResult<Self> {
        Self::open_at(path, BINLOG_MAGIC.len() as u64)
    }

    /// Opens the file and resumes at `position`, which must sit on an
    /// event boundary as previously reported by `position()`.
    pub fn open_at(path: &Path, position: u64) -> CdcResult<Self> {
        let mut file = File::open(path)?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        check_magic(&magic)?;

        let position = position.max(BINLOG_MAGIC.len() as u64);
        file.seek(SeekFrom::Start(position))?;

        Ok(BinlogFileReader {
            file,
            path: path.to_path_buf(),
            position,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Offset of the next unread event, for resuming a later poll.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// The next `(header, body)` pair, or `None` at a clean end of file.
    ///
    /// A partially written trailing event also yields `None`: the
    /// position stays on its header so the next poll retries once the
    /// server has finished writing it.
    pub fn read_event(&mut self) -> CdcResult<Option<(EventHeader, Vec<u8>)>> {
        let mut header_buf = [0u8; EVENT_HEADER_LEN];
        match read_exact_or_eof(&mut self.file, &mut header_buf) {
            Ok(true) => {}
            Ok(false) => return Ok(None),
            Err(e) if e.is_eof() => {
                trace!(file = %self.path.display(), "partial event header, retrying later");
                self.file.seek(SeekFrom::Start(self.position))?;
                return Ok(None);
            }
            Err(e) => return Err(e),
        }

        let header = EventHeader::parse(&header_buf)?;
        let mut body = vec![0u8; header.body_len()];
        match read_exact_or_eof(&mut self.file, &mut body) {
            Ok(true) => {}
            _ => {
                trace!(file = %self.path.display(), "partial event body, retrying later");
                self.file.seek(SeekFrom::Start(self.position))?;
                return Ok(None);
            }
        }

        self.position += header.event_size as u64;
        Ok(Some((header, body)))
    }
}

impl Iterator for BinlogFileReader {
    type Item = CdcResult<(EventHeader, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_event().transpose()
    }
}
