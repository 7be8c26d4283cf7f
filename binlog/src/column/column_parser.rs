//! Per-column extraction from a row image, driven by the column type code
//! and its two metadata bytes from the TABLE_MAP side-channel.
//!
//! See <https://mariadb.com/kb/en/library/rows_event_v1/#column-data-formats>

use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt};
use common::err::cdc_error::{CdcError, CdcResult};

use crate::column::column_type::ColumnType;
use crate::column::column_value::ColumnValue;
use crate::utils::unpack_bytes_be;

const DATETIMEF_INT_OFS: u64 = 0x8000000000;

/// The pre-row null bitmap. Covers one bit per present cell; the unused
/// bits of its last byte double as storage for leading BIT column bits.
#[derive(Debug)]
pub struct RowBitmap {
    bytes: Vec<u8>,
    cells: usize,
    spill_cursor: usize,
}

impl RowBitmap {
    /// Reads `⌈cells / 8⌉` bytes covering the present cells of one row.
    pub fn read(cursor: &mut Cursor<&[u8]>, cells: usize) -> CdcResult<Self> {
        let mut bytes = vec![0u8; (cells + 7) / 8];
        cursor.read_exact(&mut bytes)?;
        Ok(RowBitmap {
            bytes,
            cells,
            spill_cursor: cells,
        })
    }

    /// Whether the cell at `index` is NULL. Bits are little-endian within
    /// each byte.
    pub fn is_null(&self, index: usize) -> bool {
        debug_assert!(index < self.cells);
        self.bytes[index >> 3] & (1 << (index & 7)) != 0
    }

    /// Bits of the final byte not claimed by a cell.
    pub fn spill_bits_remaining(&self) -> usize {
        self.bytes.len() * 8 - self.spill_cursor
    }

    /// Consumes up to `count` spill bits, low bits first.
    fn take_spill_bits(&mut self, count: usize) -> u64 {
        let mut value = 0u64;
        for taken in 0..count {
            let index = self.spill_cursor;
            self.spill_cursor += 1;
            let bit = (self.bytes[index >> 3] >> (index & 7)) & 1;
            value |= (bit as u64) << taken;
        }
        value
    }
}

fn read_len_prefixed_string(cursor: &mut Cursor<&[u8]>) -> CdcResult<String> {
    let buf = crate::utils::read_len_enc_bytes(cursor)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Decodes one present cell of type `type_code` with metadata `meta`.
pub fn parse_cell(
    cursor: &mut Cursor<&[u8]>,
    type_code: u8,
    meta: [u8; 2],
    bitmap: &mut RowBitmap,
) -> CdcResult<ColumnValue> {
    let column_type = ColumnType::from_code(type_code).ok_or_else(|| {
        CdcError::corruption(format!("unknown column type code {}", type_code))
    })?;

    let value = match column_type {
        /* Numeric types, the only place where values are negative. */
        ColumnType::Tiny => ColumnValue::SignedInt(cursor.read_i8()? as i64),
        ColumnType::Short => ColumnValue::SignedInt(cursor.read_i16::<LittleEndian>()? as i64),
        ColumnType::Int24 => ColumnValue::SignedInt(cursor.read_i24::<LittleEndian>()? as i64),
        ColumnType::Long => ColumnValue::SignedInt(cursor.read_i32::<LittleEndian>()? as i64),
        ColumnType::LongLong => ColumnValue::SignedInt(cursor.read_i64::<LittleEndian>()?),
        ColumnType::Float => ColumnValue::Float(cursor.read_f32::<LittleEndian>()?),
        ColumnType::Double => ColumnValue::Double(cursor.read_f64::<LittleEndian>()?),
        ColumnType::Null => ColumnValue::Null,

        /* Temporal types. */
        ColumnType::Year => ColumnValue::Year(cursor.read_u8()?),
        ColumnType::Time => {
            let packed = unpack_bytes_be(cursor, 3)? as u32;
            ColumnValue::Time {
                hour: packed / 10000,
                minute: (packed / 100) % 100,
                second: packed % 100,
            }
        }
        ColumnType::Date => {
            let packed = cursor.read_u24::<LittleEndian>()?;
            ColumnValue::Date {
                year: packed >> 9,
                month: (packed >> 5) & 15,
                day: packed & 31,
            }
        }
        ColumnType::DateTime2 => {
            let raw = unpack_bytes_be(cursor, 5)?;
            let unpacked = raw.checked_sub(DATETIMEF_INT_OFS).ok_or_else(|| {
                CdcError::corruption(format!("datetime2 value 0x{:010x} below offset", raw))
            })?;
            let time = unpacked & 0x1ffff;
            let date = unpacked >> 17;
            let yearmonth = date >> 5;
            ColumnValue::DateTime {
                year: (yearmonth / 13) as u32,
                month: (yearmonth % 13) as u32,
                day: (date & 31) as u32,
                hour: (time >> 12) as u32,
                minute: ((time >> 6) & 63) as u32,
                second: (time & 63) as u32,
            }
        }
        ColumnType::Timestamp | ColumnType::Timestamp2 => {
            // Seconds since the epoch in big-endian order. The metadata
            // side-channel carries no precision for the v2 type, so there
            // is no fractional tail to consume.
            ColumnValue::Timestamp(unpack_bytes_be(cursor, 4)? as u32)
        }

        /* Variable-length string family, copied opaquely. */
        ColumnType::VarChar
        | ColumnType::VarString
        | ColumnType::Decimal
        | ColumnType::NewDecimal
        | ColumnType::Geometry => ColumnValue::String(read_len_prefixed_string(cursor)?),

        /* Fixed STRING doubles as the wire form of ENUM and SET. */
        ColumnType::String => {
            let real_type = ColumnType::from_code(meta[0]);
            if matches!(real_type, Some(ColumnType::Enum) | Some(ColumnType::Set)) {
                let width = meta[1] as usize;
                if !(1..=8).contains(&width) {
                    return Err(CdcError::corruption(format!(
                        "enum/set packed width {}",
                        width
                    )));
                }
                ColumnValue::EnumIndex(cursor.read_uint::<LittleEndian>(width)?)
            } else {
                let len = cursor.read_u8()? as usize;
                let mut buf = vec![0u8; len];
                cursor.read_exact(&mut buf)?;
                ColumnValue::String(String::from_utf8_lossy(&buf).into_owned())
            }
        }

        /* Blob family: metadata byte 0 is the width of the length field. */
        ColumnType::TinyBlob | ColumnType::MediumBlob | ColumnType::LongBlob | ColumnType::Blob => {
            let width = meta[0] as usize;
            if !(1..=4).contains(&width) {
                return Err(CdcError::corruption(format!("blob length width {}", width)));
            }
            let len = cursor.read_uint::<LittleEndian>(width)? as usize;
            let mut buf = vec![0u8; len];
            cursor.read_exact(&mut buf)?;
            ColumnValue::Blob(buf)
        }

        ColumnType::Bit => {
            // Total width in bits; leading bits live in the null bitmap's
            // spare bits, the remainder inline big-endian.
            let width = meta[0] as usize + meta[1] as usize * 8;
            let in_bitmap = width.min(bitmap.spill_bits_remaining());
            let spilled = bitmap.take_spill_bits(in_bitmap);
            let inline_bytes = (width - in_bitmap) / 8;
            let inline = if inline_bytes > 0 {
                unpack_bytes_be(cursor, inline_bytes)?
            } else {
                0
            };
            ColumnValue::Bit((spilled << (inline_bytes * 8)) | inline)
        }

        other => {
            return Err(CdcError::corruption(format!(
                "decoding column type {:?} is not supported",
                other
            )))
        }
    };

    Ok(value)
}
