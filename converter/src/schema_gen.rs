//! Projects a (table map, tracked CREATE) pair to the ChangeRecord Avro
//! schema: a fixed GTID/timestamp/event_type prefix followed by one field
//! per column, typed by a fixed MySQL-to-Avro map.

use binlog::column::column_type::ColumnType;
use binlog::table_map_cache::TableMap;
use common::err::cdc_error::{CdcError, CdcResult};
use serde_json::{json, Value as Json};

use crate::ddl::TableCreate;

pub const AVRO_NAMESPACE: &str = "MaxScaleChangeDataSchema.avro";
pub const RECORD_NAME: &str = "ChangeRecord";

pub const EVENT_TYPE_SYMBOLS: [&str; 4] = ["insert", "update_before", "update_after", "delete"];

/// The fixed MySQL-to-Avro type map. Everything without a numeric or blob
/// rendering becomes a string.
pub fn avro_type_name(code: u8) -> &'static str {
    match ColumnType::from_code(code) {
        Some(
            ColumnType::Decimal
            | ColumnType::Tiny
            | ColumnType::Short
            | ColumnType::Long
            | ColumnType::Int24
            | ColumnType::Bit,
        ) => "int",
        Some(ColumnType::Float) => "float",
        Some(ColumnType::Double) => "double",
        Some(ColumnType::Null) => "null",
        Some(ColumnType::LongLong) => "long",
        Some(t) if t.is_blob() => "bytes",
        _ => "string",
    }
}

/// Builds the schema JSON. Field order is part of the contract: the fixed
/// prefix, then the tracked columns in source order.
pub fn change_record_schema(create: &TableCreate, map: &TableMap) -> CdcResult<String> {
    if create.columns.len() != map.column_types.len() {
        return Err(CdcError::schema(format!(
            "{}: CREATE TABLE tracks {} columns but the table map describes {}",
            create.qualified_name(),
            create.columns.len(),
            map.column_types.len()
        )));
    }

    let mut fields: Vec<Json> = vec![
        json!({"name": "GTID", "type": "string"}),
        json!({"name": "timestamp", "type": "int"}),
        json!({"name": "event_type", "type": {
            "type": "enum",
            "name": "EVENT_TYPES",
            "symbols": EVENT_TYPE_SYMBOLS,
        }}),
    ];
    for (name, &code) in create.columns.iter().zip(map.column_types.iter()) {
        fields.push(json!({"name": name, "type": avro_type_name(code)}));
    }

    let schema = json!({
        "namespace": AVRO_NAMESPACE,
        "type": "record",
        "name": RECORD_NAME,
        "fields": fields,
    });
    serde_json::to_string(&schema).map_err(|e| CdcError::schema(e.to_string()))
}
