//! Shared MySQL wire primitives: length-encoded integers and strings,
//! little-endian bitmaps and the big-endian unpackers the temporal types
//! use.
//!
//! ref: https://dev.mysql.com/doc/internals/en/integer.html

use std::io::{Cursor, Read};

use byteorder::{BigEndian, LittleEndian, ReadBytesExt};
use common::err::cdc_error::{CdcError, CdcResult};

/// Parses a length-encoded integer, returning `(consumed_bytes, value)`
/// and advancing the cursor by the consumed width.
///
/// First byte `n < 0xfb` is the value itself; `0xfc` is followed by two
/// bytes, `0xfd` by three and `0xfe` by eight. `0xfb` (NULL) and `0xff`
/// do not occur where this core reads integers.
pub fn read_len_enc_num(cursor: &mut Cursor<&[u8]>) -> CdcResult<(usize, u64)> {
    let lead = cursor.read_u8()?;
    match lead {
        0..=0xfa => Ok((1, lead as u64)),
        0xfc => Ok((3, cursor.read_u16::<LittleEndian>()? as u64)),
        0xfd => Ok((4, cursor.read_u24::<LittleEndian>()? as u64)),
        0xfe => Ok((9, cursor.read_u64::<LittleEndian>()?)),
        other => Err(CdcError::corruption(format!(
            "unexpected length-encoded integer lead byte 0x{:02x}",
            other
        ))),
    }
}

/// Length-encoded string: a length-encoded integer followed by that many
/// raw bytes.
pub fn read_len_enc_bytes(cursor: &mut Cursor<&[u8]>) -> CdcResult<Vec<u8>> {
    let (_, len) = read_len_enc_num(cursor)?;
    let mut buf = vec![0u8; len as usize];
    cursor.read_exact(&mut buf)?;
    Ok(buf)
}

/// Reads `count` bits of a little-endian bitmap, one `bool` per bit.
pub fn read_bitmap_little_endian(cursor: &mut Cursor<&[u8]>, count: usize) -> CdcResult<Vec<bool>> {
    let mut bits = vec![false; count];
    for byte_index in 0..(count + 7) / 8 {
        let byte = cursor.read_u8()?;
        for bit in 0..8 {
            let index = (byte_index << 3) + bit;
            if index == count {
                break;
            }
            bits[index] = byte & (1 << bit) != 0;
        }
    }
    Ok(bits)
}

/// Big-endian unpacker for the 3, 4 and 5 byte fields of DATE, TIME,
/// TIMESTAMP and DATETIME2.
pub fn unpack_bytes_be(cursor: &mut Cursor<&[u8]>, width: usize) -> CdcResult<u64> {
    debug_assert!((1..=8).contains(&width));
    Ok(cursor.read_uint::<BigEndian>(width)?)
}

/// Null-terminated string, consuming the terminator.
pub fn read_nul_terminated_string(cursor: &mut Cursor<&[u8]>) -> CdcResult<String> {
    let mut buf = Vec::new();
    loop {
        let byte = cursor.read_u8()?;
        if byte == 0 {
            return Ok(String::from_utf8_lossy(&buf).into_owned());
        }
        buf.push(byte);
    }
}

/// Exactly `len` bytes, decoded as UTF-8 with replacement.
pub fn read_fixed_string(cursor: &mut Cursor<&[u8]>, len: usize) -> CdcResult<String> {
    let mut buf = vec![0u8; len];
    cursor.read_exact(&mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Bytes left before the cursor reaches the end of its slice.
pub fn remaining(cursor: &Cursor<&[u8]>) -> u64 {
    bytes::Buf::remaining(cursor) as u64
}
