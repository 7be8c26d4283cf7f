//! FORMAT_DESCRIPTION event: the first event of every binlog file,
//! describing how the rest of the file is laid out. This pipeline reads
//! it for one thing that changes the wire format of every later event:
//! the checksum algorithm, which decides whether event bodies end in a
//! 4 byte CRC32 trailer.
//!
//! ref: https://dev.mysql.com/doc/internals/en/format-description-event.html

use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt};
use common::err::cdc_error::{CdcError, CdcResult};
use serde::Serialize;

use crate::events::event_header::EVENT_CHECKSUM_LEN;

const SERVER_VERSION_LEN: usize = 50;

/// Fixed part of the body: binlog_version(2), server_version(50),
/// create_timestamp(4), common_header_len(1).
const FIXED_BODY_LEN: usize = 2 + SERVER_VERSION_LEN + 4 + 1;

/// Trailing part: the checksum algorithm byte plus this event's own
/// checksum field.
const CHECKSUM_SUFFIX_LEN: usize = 1 + EVENT_CHECKSUM_LEN;

/// Checksum algorithm announced for the events of this file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChecksumAlgorithm {
    /// `binlog_checksum=NONE`: event bodies end at their payload.
    Off,
    /// `binlog_checksum=CRC32`: every event body carries a 4 byte
    /// trailer. The value is carried opaquely, not validated.
    Crc32,
}

impl ChecksumAlgorithm {
    pub fn from_byte(byte: u8) -> CdcResult<Self> {
        match byte {
            0 => Ok(ChecksumAlgorithm::Off),
            1 => Ok(ChecksumAlgorithm::Crc32),
            other => Err(CdcError::corruption(format!(
                "unsupported binlog checksum algorithm {}",
                other
            ))),
        }
    }

    /// Bytes to leave unread at the end of every event body.
    pub fn trailer_len(&self) -> usize {
        match self {
            ChecksumAlgorithm::Off => 0,
            ChecksumAlgorithm::Crc32 => EVENT_CHECKSUM_LEN,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormatDescriptionEvent {
    pub binlog_version: u16,
    pub server_version: String,
    pub create_timestamp: u32,
    pub common_header_len: u8,
    /// Post-header length per event type, kept as announced.
    pub post_header_lens: Vec<u8>,
    pub checksum_algorithm: ChecksumAlgorithm,
}

impl FormatDescriptionEvent {
    pub fn parse(body: &[u8]) -> CdcResult<Self> {
        if body.len() < FIXED_BODY_LEN + CHECKSUM_SUFFIX_LEN {
            return Err(CdcError::corruption(format!(
                "format description event of {} bytes",
                body.len()
            )));
        }

        let mut cursor = Cursor::new(body);
        let binlog_version = cursor.read_u16::<LittleEndian>()?;
        if binlog_version != 4 {
            return Err(CdcError::corruption(format!(
                "unsupported binlog format version {}",
                binlog_version
            )));
        }

        let mut version_bytes = [0u8; SERVER_VERSION_LEN];
        cursor.read_exact(&mut version_bytes)?;
        let end = version_bytes
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(SERVER_VERSION_LEN);
        let server_version = String::from_utf8_lossy(&version_bytes[..end]).into_owned();

        let create_timestamp = cursor.read_u32::<LittleEndian>()?;
        let common_header_len = cursor.read_u8()?;

        // Between the fixed part and the checksum suffix sits one
        // post-header length per known event type.
        let table_len = body.len() - FIXED_BODY_LEN - CHECKSUM_SUFFIX_LEN;
        let mut post_header_lens = vec![0u8; table_len];
        cursor.read_exact(&mut post_header_lens)?;

        let checksum_algorithm = ChecksumAlgorithm::from_byte(body[body.len() - CHECKSUM_SUFFIX_LEN])?;

        Ok(FormatDescriptionEvent {
            binlog_version,
            server_version,
            create_timestamp,
            common_header_len,
            post_header_lens,
            checksum_algorithm,
        })
    }
}
