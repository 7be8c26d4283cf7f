//! WRITE/UPDATE/DELETE_ROWS v1/v2: the shared post-header, the
//! columns-present bitmaps and the packed row images.
//!
//! ref: https://mariadb.com/kb/en/rows_event_v1/

use std::io::{Cursor, Seek, SeekFrom};

use bitflags::bitflags;
use byteorder::{LittleEndian, ReadBytesExt};
use common::err::cdc_error::{CdcError, CdcResult};
use serde::Serialize;

use crate::column::column_parser::{parse_cell, RowBitmap};
use crate::column::column_value::ColumnValue;
use crate::events::event_type::EventType;
use crate::utils::{read_bitmap_little_endian, read_len_enc_num, remaining};

/// Table id carried by the dummy row event that closes a statement
/// without touching a real table.
pub const DUMMY_TABLE_ID: u64 = 0x00ff_ffff;

bitflags! {
    /// Rows event flag word.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RowsFlags: u16 {
        const STMT_END = 0x0001;
        const NO_FOREIGN_KEY_CHECKS = 0x0002;
        const NO_UNIQUE_KEY_CHECKS = 0x0004;
        const NO_CHECK_CONSTRAINT_CHECKS = 0x0080;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowsKind {
    Write,
    Update,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowEventVersion {
    V1,
    V2,
}

impl RowsKind {
    /// Classifies a rows event type code into kind and version.
    pub fn from_event_type(event_type: EventType) -> Option<(RowsKind, RowEventVersion)> {
        match event_type {
            EventType::WriteRowsV1 => Some((RowsKind::Write, RowEventVersion::V1)),
            EventType::UpdateRowsV1 => Some((RowsKind::Update, RowEventVersion::V1)),
            EventType::DeleteRowsV1 => Some((RowsKind::Delete, RowEventVersion::V1)),
            EventType::WriteRowsV2 => Some((RowsKind::Write, RowEventVersion::V2)),
            EventType::UpdateRowsV2 => Some((RowsKind::Update, RowEventVersion::V2)),
            EventType::DeleteRowsV2 => Some((RowsKind::Delete, RowEventVersion::V2)),
            _ => None,
        }
    }
}

/// What a single row image represents in the change stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RowImageKind {
    Insert,
    UpdateBefore,
    UpdateAfter,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowImage {
    pub kind: RowImageKind,
    /// One value per table column; absent and NULL cells are `Null`.
    pub cells: Vec<ColumnValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowsEvent {
    pub table_id: u64,
    pub flags: u16,
    pub column_count: usize,
    pub columns_present: Vec<bool>,
    /// UPDATE events carry a second bitmap for the after image.
    pub columns_updated: Option<Vec<bool>>,
    pub rows: Vec<RowImage>,
}

impl RowsEvent {
    pub fn is_end_of_statement(&self) -> bool {
        RowsFlags::from_bits_truncate(self.flags).contains(RowsFlags::STMT_END)
    }
}

/// Reads just the table id so the dispatcher can resolve the table map
/// before committing to a full decode.
pub fn peek_table_id(body: &[u8]) -> CdcResult<u64> {
    if body.len() < 8 {
        return Err(CdcError::eof("rows event shorter than its post-header"));
    }
    let mut filled = [0u8; 8];
    filled[..6].copy_from_slice(&body[..6]);
    Ok(u64::from_le_bytes(filled))
}

/// Reads the flag word following the table id.
pub fn peek_flags(body: &[u8]) -> CdcResult<u16> {
    if body.len() < 8 {
        return Err(CdcError::eof("rows event shorter than its post-header"));
    }
    Ok(u16::from_le_bytes([body[6], body[7]]))
}

fn parse_row_image(
    cursor: &mut Cursor<&[u8]>,
    kind: RowImageKind,
    present: &[bool],
    column_types: &[u8],
    column_metadata: &[[u8; 2]],
) -> CdcResult<RowImage> {
    let cells_included = present.iter().filter(|&&p| p).count();
    let mut bitmap = RowBitmap::read(cursor, cells_included)?;

    let mut cells = Vec::with_capacity(column_types.len());
    let mut present_index = 0usize;
    for (i, &code) in column_types.iter().enumerate() {
        if !present[i] {
            cells.push(ColumnValue::Null);
            continue;
        }
        let cell = if bitmap.is_null(present_index) {
            ColumnValue::Null
        } else {
            parse_cell(cursor, code, column_metadata[i], &mut bitmap)?
        };
        present_index += 1;
        cells.push(cell);
    }

    Ok(RowImage { kind, cells })
}

impl RowsEvent {
    /// Decodes a full rows event body against the table description its
    /// TABLE_MAP established. `checksum_len` is the event trailer width
    /// the file's FORMAT_DESCRIPTION announced; row images run until
    /// only that trailer remains.
    pub fn parse(
        body: &[u8],
        kind: RowsKind,
        version: RowEventVersion,
        column_types: &[u8],
        column_metadata: &[[u8; 2]],
        checksum_len: usize,
    ) -> CdcResult<RowsEvent> {
        let mut cursor = Cursor::new(body);

        let table_id = {
            let mut raw = [0u8; 8];
            std::io::Read::read_exact(&mut cursor, &mut raw[..6])?;
            u64::from_le_bytes(raw)
        };
        let flags = cursor.read_u16::<LittleEndian>()?;

        if version == RowEventVersion::V2 {
            let extra_len = cursor.read_u16::<LittleEndian>()?;
            if extra_len < 2 {
                return Err(CdcError::corruption(format!(
                    "rows v2 extra data length {}",
                    extra_len
                )));
            }
            cursor.seek(SeekFrom::Current(extra_len as i64 - 2))?;
        }

        let (_, column_count) = read_len_enc_num(&mut cursor)?;
        let column_count = column_count as usize;
        if column_count != column_types.len() {
            return Err(CdcError::schema(format!(
                "rows event has {} columns, table map describes {}",
                column_count,
                column_types.len()
            )));
        }

        let columns_present = read_bitmap_little_endian(&mut cursor, column_count)?;
        let columns_updated = if kind == RowsKind::Update {
            Some(read_bitmap_little_endian(&mut cursor, column_count)?)
        } else {
            None
        };

        let mut rows = Vec::new();
        while remaining(&cursor) > checksum_len as u64 {
            match kind {
                RowsKind::Write => rows.push(parse_row_image(
                    &mut cursor,
                    RowImageKind::Insert,
                    &columns_present,
                    column_types,
                    column_metadata,
                )?),
                RowsKind::Delete => rows.push(parse_row_image(
                    &mut cursor,
                    RowImageKind::Delete,
                    &columns_present,
                    column_types,
                    column_metadata,
                )?),
                RowsKind::Update => {
                    rows.push(parse_row_image(
                        &mut cursor,
                        RowImageKind::UpdateBefore,
                        &columns_present,
                        column_types,
                        column_metadata,
                    )?);
                    rows.push(parse_row_image(
                        &mut cursor,
                        RowImageKind::UpdateAfter,
                        columns_updated.as_deref().unwrap_or(&columns_present),
                        column_types,
                        column_metadata,
                    )?);
                }
            }
        }

        Ok(RowsEvent {
            table_id,
            flags,
            column_count,
            columns_present,
            columns_updated,
            rows,
        })
    }
}
