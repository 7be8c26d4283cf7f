//! TABLE_MAP event body: binds a numeric table id to the (database,
//! table, column types) description row events decode against.
//!
//! ref: https://mariadb.com/kb/en/table_map_event/

use nom::{
    bytes::complete::take,
    combinator::map,
    number::complete::{le_u16, le_u24, le_u64, le_u8},
    IResult,
};

use common::err::cdc_error::{CdcError, CdcResult};
use serde::Serialize;

use crate::column::column_type::ColumnType;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableMapEvent {
    /// 6 bytes on the wire.
    pub table_id: u64,
    /// Reserved for future use; currently always 0.
    pub flags: u16,
    pub database: String,
    pub table: String,
    pub column_count: u64,
    pub column_types: Vec<u8>,
    /// Two raw side-channel bytes per column, zero-padded for the types
    /// that carry fewer.
    pub column_metadata: Vec<[u8; 2]>,
    /// Nullability bitmap as it appears on the wire.
    pub null_bitmap: Vec<u8>,
}

fn len_enc_num(input: &[u8]) -> IResult<&[u8], u64> {
    let (i, lead) = le_u8(input)?;
    match lead {
        0..=0xfa => Ok((i, lead as u64)),
        0xfc => map(le_u16, |v| v as u64)(i),
        0xfd => map(le_u24, |v| v as u64)(i),
        0xfe => le_u64(i),
        _ => Err(nom::Err::Failure(nom::error::Error::new(
            i,
            nom::error::ErrorKind::Tag,
        ))),
    }
}

/// A length-prefixed name followed by its null terminator.
fn prefixed_name(input: &[u8]) -> IResult<&[u8], String> {
    let (i, len) = le_u8(input)?;
    let (i, name) = map(take(len), |s: &[u8]| {
        String::from_utf8_lossy(s).into_owned()
    })(i)?;
    let (i, _term) = le_u8(i)?;
    Ok((i, name))
}

fn parse_metadata<'a>(input: &'a [u8], column_types: &[u8]) -> IResult<&'a [u8], Vec<[u8; 2]>> {
    let mut metadata = Vec::with_capacity(column_types.len());
    let mut source = input;

    for &code in column_types {
        let width = ColumnType::from_code(code)
            .map(|t| t.metadata_len())
            .unwrap_or(0);
        let (rest, raw) = take(width)(source)?;
        let mut entry = [0u8; 2];
        entry[..width].copy_from_slice(raw);
        metadata.push(entry);
        source = rest;
    }

    Ok((source, metadata))
}

fn parse_body(input: &[u8]) -> IResult<&[u8], TableMapEvent> {
    let (i, table_id) = map(take(6usize), |raw: &[u8]| {
        let mut filled = [0u8; 8];
        filled[..6].copy_from_slice(raw);
        u64::from_le_bytes(filled)
    })(input)?;
    let (i, flags) = le_u16(i)?;

    let (i, database) = prefixed_name(i)?;
    let (i, table) = prefixed_name(i)?;

    let (i, column_count) = len_enc_num(i)?;
    let (i, column_types) = map(take(column_count), <[u8]>::to_vec)(i)?;

    let (i, _metadata_len) = len_enc_num(i)?;
    let (i, column_metadata) = parse_metadata(i, &column_types)?;

    let mask_len = (column_count + 7) / 8;
    let (i, null_bitmap) = map(take(mask_len), <[u8]>::to_vec)(i)?;

    // Optional extra metadata and the event checksum may follow; neither
    // is interpreted here.
    Ok((
        i,
        TableMapEvent {
            table_id,
            flags,
            database,
            table,
            column_count,
            column_types,
            column_metadata,
            null_bitmap,
        },
    ))
}

impl TableMapEvent {
    pub fn parse(body: &[u8]) -> CdcResult<Self> {
        match parse_body(body) {
            Ok((_, event)) => Ok(event),
            Err(e) => Err(CdcError::corruption(format!(
                "malformed TABLE_MAP event: {}",
                e
            ))),
        }
    }

    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.database, self.table)
    }
}
