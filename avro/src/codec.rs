//! Avro primitive encoding: zigzag varint longs, length-prefixed strings
//! and bytes, fixed-width floats and the metadata map layout.

use std::collections::HashMap;
use std::io::{ErrorKind, Read, Seek, SeekFrom};

use byteorder::{LittleEndian, ReadBytesExt};
use common::err::cdc_error::{CdcError, CdcResult};

/// A zigzag varint terminates within ten bytes for any 64 bit value.
const VARINT_MAX_BYTES: usize = 10;

fn zigzag_encode(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

fn zigzag_decode(raw: u64) -> i64 {
    ((raw >> 1) as i64) ^ -((raw & 1) as i64)
}

/// Reads a single byte, mapping a source that is already exhausted to
/// `None`.
fn read_byte(source: &mut impl Read) -> CdcResult<Option<u8>> {
    let mut buf = [0u8; 1];
    loop {
        match source.read(&mut buf) {
            Ok(0) => return Ok(None),
            Ok(_) => return Ok(Some(buf[0])),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
}

/// Decodes one zigzag varint. `None` means the source was exhausted at the
/// position where the value was expected, which callers treat as a clean
/// end of file. Truncation inside the varint is an IO error and an
/// unterminated tenth byte is `ValueOverflow`.
pub fn decode_long(source: &mut impl Read) -> CdcResult<Option<i64>> {
    let first = match read_byte(source)? {
        Some(b) => b,
        None => return Ok(None),
    };

    let mut raw = (first & 0x7f) as u64;
    let mut byte = first;
    let mut nread = 1usize;

    while byte & 0x80 != 0 {
        if nread == VARINT_MAX_BYTES {
            return Err(CdcError::ValueOverflow);
        }
        byte = match read_byte(source)? {
            Some(b) => b,
            None => return Err(CdcError::eof("truncated varint")),
        };
        raw |= ((byte & 0x7f) as u64) << (7 * nread);
        nread += 1;
    }

    Ok(Some(zigzag_decode(raw)))
}

/// Like `decode_long` but an exhausted source is an error, for positions
/// where a value is mandatory.
pub fn require_long(source: &mut impl Read) -> CdcResult<i64> {
    decode_long(source)?.ok_or_else(|| CdcError::eof("expected varint"))
}

/// Appends the 1 to 10 byte zigzag varint encoding of `value`.
pub fn encode_long(value: i64, dest: &mut Vec<u8>) {
    let mut raw = zigzag_encode(value);
    loop {
        let byte = (raw & 0x7f) as u8;
        raw >>= 7;
        if raw == 0 {
            dest.push(byte);
            return;
        }
        dest.push(byte | 0x80);
    }
}

fn decode_len(source: &mut impl Read) -> CdcResult<Option<usize>> {
    let len = match decode_long(source)? {
        Some(v) => v,
        None => return Ok(None),
    };
    if len < 0 {
        return Err(CdcError::corruption(format!("negative length {}", len)));
    }
    Ok(Some(len as usize))
}

/// Length-prefixed byte sequence; the empty sequence is valid.
pub fn decode_bytes(source: &mut impl Read) -> CdcResult<Option<Vec<u8>>> {
    let len = match decode_len(source)? {
        Some(v) => v,
        None => return Ok(None),
    };
    let mut buf = vec![0u8; len];
    source.read_exact(&mut buf)?;
    Ok(Some(buf))
}

pub fn decode_string(source: &mut impl Read) -> CdcResult<Option<String>> {
    match decode_bytes(source)? {
        Some(buf) => String::from_utf8(buf)
            .map(Some)
            .map_err(|e| CdcError::corruption(format!("invalid utf-8 in string: {}", e))),
        None => Ok(None),
    }
}

pub fn encode_bytes(value: &[u8], dest: &mut Vec<u8>) {
    encode_long(value.len() as i64, dest);
    dest.extend_from_slice(value);
}

pub fn encode_string(value: &str, dest: &mut Vec<u8>) {
    encode_bytes(value.as_bytes(), dest);
}

/// Advances past one string without allocating, returning its length.
pub fn skip_string(source: &mut (impl Read + Seek)) -> CdcResult<Option<u64>> {
    let len = match decode_len(source)? {
        Some(v) => v as u64,
        None => return Ok(None),
    };
    source.seek(SeekFrom::Current(len as i64))?;
    Ok(Some(len))
}

pub fn decode_float(source: &mut impl Read) -> CdcResult<f32> {
    Ok(source.read_f32::<LittleEndian>()?)
}

pub fn decode_double(source: &mut impl Read) -> CdcResult<f64> {
    Ok(source.read_f64::<LittleEndian>()?)
}

pub fn encode_float(value: f32, dest: &mut Vec<u8>) {
    dest.extend_from_slice(&value.to_le_bytes());
}

pub fn encode_double(value: f64, dest: &mut Vec<u8>) {
    dest.extend_from_slice(&value.to_le_bytes());
}

/// Reads a `map<string,bytes>` as a sequence of counted blocks terminated
/// by a zero-count block. Keys are unique; iteration order is not part of
/// the contract.
pub fn decode_map(source: &mut impl Read) -> CdcResult<HashMap<String, String>> {
    let mut map = HashMap::new();

    loop {
        let count = require_long(source)?;
        if count == 0 {
            return Ok(map);
        }
        if count < 0 {
            return Err(CdcError::corruption(format!(
                "negative map block count {}",
                count
            )));
        }
        for _ in 0..count {
            let key = decode_string(source)?.ok_or_else(|| CdcError::eof("truncated map key"))?;
            let value =
                decode_string(source)?.ok_or_else(|| CdcError::eof("truncated map value"))?;
            map.insert(key, value);
        }
    }
}

/// Emits the map as a single block followed by the zero-count terminator.
pub fn encode_map(map: &[(&str, &str)], dest: &mut Vec<u8>) {
    if !map.is_empty() {
        encode_long(map.len() as i64, dest);
        for (key, value) in map {
            encode_string(key, dest);
            encode_string(value, dest);
        }
    }
    encode_long(0, dest);
}
