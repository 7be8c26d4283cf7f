//! MariaDB GTID event: one per transaction, carrying the sequence and
//! domain that, together with the header's server id, form the
//! `domain-server-sequence` identifier.
//!
//! ref: https://mariadb.com/kb/en/gtid_event/

use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt};
use common::err::cdc_error::CdcResult;
use serde::Serialize;

/// The transaction consists of this event only.
pub const FL_STANDALONE: u8 = 0x01;
pub const FL_GROUP_COMMIT_ID: u8 = 0x02;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GtidEvent {
    pub sequence: u64,
    pub domain: u32,
    pub flags: u8,
}

impl GtidEvent {
    pub fn parse(body: &[u8]) -> CdcResult<Self> {
        let mut cursor = Cursor::new(body);
        Ok(GtidEvent {
            sequence: cursor.read_u64::<LittleEndian>()?,
            domain: cursor.read_u32::<LittleEndian>()?,
            flags: cursor.read_u8()?,
        })
    }

    pub fn is_standalone(&self) -> bool {
        self.flags & FL_STANDALONE != 0
    }

    /// Canonical `domain-server-sequence` rendering.
    pub fn gtid_string(&self, server_id: u32) -> String {
        format!("{}-{}-{}", self.domain, server_id, self.sequence)
    }
}
