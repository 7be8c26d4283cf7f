use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt};
use common::err::cdc_error::{CdcError, CdcResult};
use serde::Serialize;

use crate::events::event_type::EventType;
use crate::BINLOG_MAGIC;

/// v4 header length: every event starts with these 19 bytes.
pub const EVENT_HEADER_LEN: usize = 19;

/// Width of the CRC32 trailer an event body carries when the file's
/// FORMAT_DESCRIPTION announces `binlog_checksum=CRC32`. The value is
/// not validated here; parsers only need the width to find the end of
/// the payload, and with `binlog_checksum=NONE` the width is zero.
pub const EVENT_CHECKSUM_LEN: usize = 4;

/// The common event header.
///
/// Layout: `timestamp(4) event_type(1) server_id(4) event_size(4)
/// next_position(4) flags(2)`, all little-endian.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventHeader {
    /// Statement time on the master, seconds since the epoch.
    pub timestamp: u32,
    pub event_type: u8,
    pub server_id: u32,
    /// Size of header plus body.
    pub event_size: u32,
    /// Offset of the next event in the file.
    pub next_position: u32,
    pub flags: u16,
}

impl EventHeader {
    pub fn parse(buf: &[u8; EVENT_HEADER_LEN]) -> CdcResult<Self> {
        let mut cursor = Cursor::new(&buf[..]);
        let header = EventHeader {
            timestamp: cursor.read_u32::<LittleEndian>()?,
            event_type: cursor.read_u8()?,
            server_id: cursor.read_u32::<LittleEndian>()?,
            event_size: cursor.read_u32::<LittleEndian>()?,
            next_position: cursor.read_u32::<LittleEndian>()?,
            flags: cursor.read_u16::<LittleEndian>()?,
        };
        if (header.event_size as usize) < EVENT_HEADER_LEN {
            return Err(CdcError::corruption(format!(
                "event size {} smaller than its header",
                header.event_size
            )));
        }
        Ok(header)
    }

    pub fn type_code(&self) -> Option<EventType> {
        EventType::from_code(self.event_type)
    }

    pub fn body_len(&self) -> usize {
        self.event_size as usize - EVENT_HEADER_LEN
    }
}

/// Validates the 4 byte file magic that precedes the first event.
pub fn check_magic(buf: &[u8]) -> CdcResult<()> {
    if buf.len() < BINLOG_MAGIC.len() || buf[..4] != BINLOG_MAGIC {
        return Err(CdcError::corruption(format!(
            "not a binlog file, magic {:02x?}",
            &buf[..buf.len().min(4)]
        )));
    }
    Ok(())
}
