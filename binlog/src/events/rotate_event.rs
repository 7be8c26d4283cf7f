//! ROTATE event: names the binlog file that continues the stream.

use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt};
use common::err::cdc_error::{CdcError, CdcResult};
use serde::Serialize;

use crate::utils::remaining;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RotateEvent {
    /// First event offset in the next file, normally 4.
    pub position: u64,
    pub next_file: String,
}

impl RotateEvent {
    /// The file name runs to the end of the body minus the trailer width
    /// the file's FORMAT_DESCRIPTION announced (`checksum_len`).
    pub fn parse(body: &[u8], checksum_len: usize) -> CdcResult<Self> {
        let mut cursor = Cursor::new(body);
        let position = cursor.read_u64::<LittleEndian>()?;

        let name_len = remaining(&cursor)
            .checked_sub(checksum_len as u64)
            .ok_or_else(|| CdcError::eof("rotate event truncated"))?;
        let mut name = vec![0u8; name_len as usize];
        cursor.read_exact(&mut name)?;

        Ok(RotateEvent {
            position,
            next_file: String::from_utf8_lossy(&name).into_owned(),
        })
    }
}
