use serde::Serialize;

/// A decoded row cell.
///
/// Temporal values keep their components; rendering (including the YEAR
/// 1900 offset and the TIMESTAMP timezone) is the consumer's business.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ColumnValue {
    Null,
    /// TINY/SHORT/INT24/LONG/LONGLONG, sign-extended.
    SignedInt(i64),
    Float(f32),
    Double(f64),
    /// Raw YEAR byte; 1900 offset not yet applied.
    Year(u8),
    Time {
        hour: u32,
        minute: u32,
        second: u32,
    },
    Date {
        year: u32,
        month: u32,
        day: u32,
    },
    DateTime {
        year: u32,
        month: u32,
        day: u32,
        hour: u32,
        minute: u32,
        second: u32,
    },
    /// Seconds since the epoch.
    Timestamp(u32),
    /// VARCHAR, VAR_STRING, DECIMAL, NEWDECIMAL, GEOMETRY and fixed
    /// STRING payloads, copied as opaque UTF-8.
    String(String),
    /// ENUM/SET ordinal, rendered decimally downstream.
    EnumIndex(u64),
    /// BIT columns combined into one integer.
    Bit(u64),
    Blob(Vec<u8>),
}
