//! Builds the typed field values of one ChangeRecord from a decoded row
//! image, following the same MySQL-to-Avro map the schema projector uses.

use avro::schema::Value;
use binlog::column::column_value::ColumnValue;
use binlog::events::event_header::EventHeader;
use binlog::events::rows_event::{RowImage, RowImageKind};
use binlog::table_map_cache::TableMap;
use chrono::{Local, TimeZone, Utc};
use common::err::cdc_error::{CdcError, CdcResult};

use crate::schema_gen::avro_type_name;

pub fn event_type_index(kind: RowImageKind) -> usize {
    match kind {
        RowImageKind::Insert => 0,
        RowImageKind::UpdateBefore => 1,
        RowImageKind::UpdateAfter => 2,
        RowImageKind::Delete => 3,
    }
}

/// Renders an epoch timestamp the way the server's own clients show it.
pub fn render_timestamp(seconds: u32, utc: bool) -> String {
    const FORMAT: &str = "%Y-%m-%d %H:%M:%S";
    if utc {
        match Utc.timestamp_opt(seconds as i64, 0).single() {
            Some(t) => t.format(FORMAT).to_string(),
            None => seconds.to_string(),
        }
    } else {
        match Local.timestamp_opt(seconds as i64, 0).single() {
            Some(t) => t.format(FORMAT).to_string(),
            None => seconds.to_string(),
        }
    }
}

fn numeric(cell: &ColumnValue) -> i64 {
    match cell {
        ColumnValue::SignedInt(v) => *v,
        ColumnValue::Bit(v) => *v as i64,
        ColumnValue::EnumIndex(v) => *v as i64,
        ColumnValue::Year(v) => *v as i64 + 1900,
        // Legacy DECIMAL travels as text but lands in a numeric slot.
        ColumnValue::String(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

fn text(cell: &ColumnValue, utc_timestamps: bool) -> String {
    match cell {
        ColumnValue::String(s) => s.clone(),
        ColumnValue::EnumIndex(v) => v.to_string(),
        ColumnValue::Year(v) => format!("{:04}", *v as u32 + 1900),
        ColumnValue::Time {
            hour,
            minute,
            second,
        } => format!("{:02}:{:02}:{:02}", hour, minute, second),
        ColumnValue::Date { year, month, day } => {
            format!("{:04}-{:02}-{:02}", year, month, day)
        }
        ColumnValue::DateTime {
            year,
            month,
            day,
            hour,
            minute,
            second,
        } => format!(
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            year, month, day, hour, minute, second
        ),
        ColumnValue::Timestamp(seconds) => render_timestamp(*seconds, utc_timestamps),
        ColumnValue::SignedInt(v) => v.to_string(),
        ColumnValue::Bit(v) => v.to_string(),
        ColumnValue::Float(v) => v.to_string(),
        ColumnValue::Double(v) => v.to_string(),
        ColumnValue::Blob(b) => String::from_utf8_lossy(b).into_owned(),
        ColumnValue::Null => String::new(),
    }
}

/// Converts one cell into the writer value its schema slot expects. NULL
/// cells become the slot's default; the flat schema has no unions to
/// carry them.
pub fn cell_to_value(cell: &ColumnValue, type_code: u8, utc_timestamps: bool) -> Value {
    match avro_type_name(type_code) {
        "int" | "long" => Value::Long(numeric(cell)),
        "float" => match cell {
            ColumnValue::Float(v) => Value::Float(*v),
            ColumnValue::Double(v) => Value::Float(*v as f32),
            _ => Value::Float(0.0),
        },
        "double" => match cell {
            ColumnValue::Double(v) => Value::Double(*v),
            ColumnValue::Float(v) => Value::Double(*v as f64),
            _ => Value::Double(0.0),
        },
        "bytes" => match cell {
            ColumnValue::Blob(b) => Value::Bytes(b.clone()),
            ColumnValue::String(s) => Value::Bytes(s.clone().into_bytes()),
            _ => Value::Bytes(Vec::new()),
        },
        "null" => Value::Null,
        _ => Value::String(text(cell, utc_timestamps)),
    }
}

/// The full ordered field list for one row image: GTID, timestamp,
/// event_type, then one value per column.
pub fn build_record(
    gtid: &str,
    header: &EventHeader,
    map: &TableMap,
    image: &RowImage,
    utc_timestamps: bool,
) -> CdcResult<Vec<Value>> {
    if image.cells.len() != map.column_types.len() {
        return Err(CdcError::schema(format!(
            "{}: row image has {} cells, table map describes {}",
            map.qualified_name(),
            image.cells.len(),
            map.column_types.len()
        )));
    }

    let mut values = Vec::with_capacity(3 + image.cells.len());
    values.push(Value::String(gtid.to_string()));
    values.push(Value::Long(header.timestamp as i64));
    values.push(Value::Enum(event_type_index(image.kind)));
    for (cell, &code) in image.cells.iter().zip(map.column_types.iter()) {
        values.push(cell_to_value(cell, code, utc_timestamps));
    }
    Ok(values)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn event_type_order_matches_symbols() {
        assert_eq!(event_type_index(RowImageKind::Insert), 0);
        assert_eq!(event_type_index(RowImageKind::UpdateBefore), 1);
        assert_eq!(event_type_index(RowImageKind::UpdateAfter), 2);
        assert_eq!(event_type_index(RowImageKind::Delete), 3);
    }

    #[test]
    fn numeric_slots() {
        assert_eq!(
            cell_to_value(&ColumnValue::SignedInt(-7), 3, false),
            Value::Long(-7)
        );
        assert_eq!(
            cell_to_value(&ColumnValue::Bit(0b101), 16, false),
            Value::Long(5)
        );
        // Legacy DECIMAL: numeric slot fed by a textual wire value.
        assert_eq!(
            cell_to_value(&ColumnValue::String("42".to_string()), 0, false),
            Value::Long(42)
        );
        assert_eq!(
            cell_to_value(&ColumnValue::String("junk".to_string()), 0, false),
            Value::Long(0)
        );
        assert_eq!(cell_to_value(&ColumnValue::Null, 3, false), Value::Long(0));
    }

    #[test]
    fn string_slots() {
        assert_eq!(
            cell_to_value(&ColumnValue::Year(86), 13, false),
            Value::String("1986".to_string())
        );
        assert_eq!(
            cell_to_value(
                &ColumnValue::Time {
                    hour: 3,
                    minute: 4,
                    second: 5
                },
                11,
                false
            ),
            Value::String("03:04:05".to_string())
        );
        assert_eq!(
            cell_to_value(
                &ColumnValue::DateTime {
                    year: 2020,
                    month: 1,
                    day: 2,
                    hour: 3,
                    minute: 4,
                    second: 0
                },
                18,
                false
            ),
            Value::String("2020-01-02 03:04:00".to_string())
        );
        assert_eq!(
            cell_to_value(&ColumnValue::EnumIndex(7), 254, false),
            Value::String("7".to_string())
        );
    }

    #[test]
    fn utc_timestamp_rendering() {
        assert_eq!(
            cell_to_value(&ColumnValue::Timestamp(0), 17, true),
            Value::String("1970-01-01 00:00:00".to_string())
        );
    }

    #[test]
    fn blob_slots() {
        assert_eq!(
            cell_to_value(&ColumnValue::Blob(vec![1, 2]), 252, false),
            Value::Bytes(vec![1, 2])
        );
        assert_eq!(
            cell_to_value(&ColumnValue::Null, 252, false),
            Value::Bytes(Vec::new())
        );
    }
}
