use num_enum::TryFromPrimitive;
use serde::Serialize;

/// Column type codes as they appear in a TABLE_MAP event.
///
/// ref: https://dev.mysql.com/doc/dev/mysql-server/latest/field__types_8h.html
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, TryFromPrimitive)]
#[repr(u8)]
pub enum ColumnType {
    Decimal = 0,
    Tiny = 1,
    Short = 2,
    Long = 3,
    Float = 4,
    Double = 5,
    Null = 6,
    Timestamp = 7,
    LongLong = 8,
    Int24 = 9,
    Date = 10,
    Time = 11,
    DateTime = 12,
    Year = 13,
    NewDate = 14,
    VarChar = 15,
    Bit = 16,
    Timestamp2 = 17,
    DateTime2 = 18,
    Time2 = 19,
    Json = 245,
    NewDecimal = 246,
    Enum = 247,
    Set = 248,
    TinyBlob = 249,
    MediumBlob = 250,
    LongBlob = 251,
    Blob = 252,
    VarString = 253,
    String = 254,
    Geometry = 255,
}

impl ColumnType {
    pub fn from_code(code: u8) -> Option<ColumnType> {
        ColumnType::try_from(code).ok()
    }

    /// Width of this type's entry in the TABLE_MAP metadata side-channel.
    pub fn metadata_len(&self) -> usize {
        match self {
            ColumnType::String
            | ColumnType::VarString
            | ColumnType::VarChar
            | ColumnType::Decimal
            | ColumnType::NewDecimal
            | ColumnType::Enum
            | ColumnType::Set
            | ColumnType::Bit => 2,
            ColumnType::Long
            | ColumnType::LongLong
            | ColumnType::TinyBlob
            | ColumnType::MediumBlob
            | ColumnType::LongBlob
            | ColumnType::Blob
            | ColumnType::Float
            | ColumnType::Double => 1,
            _ => 0,
        }
    }

    pub fn is_blob(&self) -> bool {
        matches!(
            self,
            ColumnType::TinyBlob | ColumnType::MediumBlob | ColumnType::LongBlob | ColumnType::Blob
        )
    }
}
