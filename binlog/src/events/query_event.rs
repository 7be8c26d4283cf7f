//! QUERY event: the statement text plus its default database, which is
//! where CREATE/ALTER TABLE and COMMIT markers arrive.
//!
//! ref: https://dev.mysql.com/doc/internals/en/query-event.html

use std::io::{Cursor, Read, Seek, SeekFrom};

use byteorder::{LittleEndian, ReadBytesExt};
use common::err::cdc_error::{CdcError, CdcResult};
use serde::Serialize;

use crate::utils::{read_fixed_string, remaining};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryEvent {
    pub thread_id: u32,
    pub exec_time: u32,
    pub error_code: u16,
    /// Default database of the session that ran the statement.
    pub database: String,
    pub sql: String,
}

impl QueryEvent {
    /// `checksum_len` is the event trailer width the file's
    /// FORMAT_DESCRIPTION announced: 4 for CRC32 streams, 0 for
    /// `binlog_checksum=NONE`.
    pub fn parse(body: &[u8], checksum_len: usize) -> CdcResult<Self> {
        let mut cursor = Cursor::new(body);

        let thread_id = cursor.read_u32::<LittleEndian>()?;
        let exec_time = cursor.read_u32::<LittleEndian>()?;
        let database_len = cursor.read_u8()? as usize;
        let error_code = cursor.read_u16::<LittleEndian>()?;
        let status_vars_len = cursor.read_u16::<LittleEndian>()?;

        // Status variables are irrelevant here.
        cursor.seek(SeekFrom::Current(status_vars_len as i64))?;

        let database = read_fixed_string(&mut cursor, database_len)?;
        let terminator = cursor.read_u8()?;
        if terminator != 0 {
            return Err(CdcError::corruption(
                "database name missing its null terminator".to_string(),
            ));
        }

        let sql_len = remaining(&cursor)
            .checked_sub(checksum_len as u64)
            .ok_or_else(|| CdcError::eof("query event truncated before its statement"))?;
        let mut sql_bytes = vec![0u8; sql_len as usize];
        cursor.read_exact(&mut sql_bytes)?;

        Ok(QueryEvent {
            thread_id,
            exec_time,
            error_code,
            database,
            sql: String::from_utf8_lossy(&sql_bytes).into_owned(),
        })
    }

    /// True for the bare COMMIT statement that closes a transaction group.
    pub fn is_commit(&self) -> bool {
        self.sql.trim().eq_ignore_ascii_case("commit")
    }
}
