//! Flat record schema model: the ordered field list parsed from the
//! `avro.schema` metadata, typed values for the writer and the JSON
//! projection used by the reader.

use std::io::Read;

use common::err::cdc_error::{CdcError, CdcResult};
use serde_json::{Map, Number, Value as Json};

use crate::codec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Int,
    Long,
    Float,
    Double,
    Bool,
    Bytes,
    String,
    Null,
    Enum,
}

#[derive(Debug, Clone)]
pub struct SchemaField {
    pub name: String,
    pub field_type: FieldType,
    /// Symbol table, `Enum` fields only.
    pub symbols: Vec<String>,
}

/// An Avro record schema reduced to its ordered field list.
#[derive(Debug, Clone)]
pub struct RecordSchema {
    pub fields: Vec<SchemaField>,
}

fn primitive_from_name(name: &str) -> CdcResult<FieldType> {
    match name {
        "int" => Ok(FieldType::Int),
        "long" => Ok(FieldType::Long),
        "float" => Ok(FieldType::Float),
        "double" => Ok(FieldType::Double),
        "boolean" => Ok(FieldType::Bool),
        "bytes" => Ok(FieldType::Bytes),
        "string" => Ok(FieldType::String),
        "null" => Ok(FieldType::Null),
        other => Err(CdcError::schema(format!("unsupported avro type {:?}", other))),
    }
}

/// Resolves a field type expression: a type name, a `{ "type": T }`
/// wrapper (including enums with their symbol list) or a union, of which
/// only the first branch is taken.
fn resolve_type(value: &Json) -> CdcResult<(FieldType, Vec<String>)> {
    match value {
        Json::String(name) => Ok((primitive_from_name(name)?, Vec::new())),
        Json::Array(branches) => branches
            .first()
            .ok_or_else(|| CdcError::schema("empty union"))
            .and_then(resolve_type),
        Json::Object(map) => {
            let type_name = map
                .get("type")
                .ok_or_else(|| CdcError::schema("type object without \"type\""))?;
            if type_name.as_str() == Some("enum") {
                let symbols = map
                    .get("symbols")
                    .and_then(Json::as_array)
                    .ok_or_else(|| CdcError::schema("enum without symbols"))?
                    .iter()
                    .map(|s| {
                        s.as_str()
                            .map(str::to_string)
                            .ok_or_else(|| CdcError::schema("non-string enum symbol"))
                    })
                    .collect::<CdcResult<Vec<_>>>()?;
                Ok((FieldType::Enum, symbols))
            } else {
                resolve_type(type_name)
            }
        }
        other => Err(CdcError::schema(format!(
            "unsupported type expression {}",
            other
        ))),
    }
}

impl RecordSchema {
    pub fn parse(json_text: &str) -> CdcResult<Self> {
        let root: Json = serde_json::from_str(json_text)
            .map_err(|e| CdcError::schema(format!("schema is not valid JSON: {}", e)))?;
        let object = root
            .as_object()
            .ok_or_else(|| CdcError::schema("schema root is not an object"))?;

        if object.get("type").and_then(Json::as_str) != Some("record") {
            return Err(CdcError::schema("schema root is not a record"));
        }

        let raw_fields = object
            .get("fields")
            .and_then(Json::as_array)
            .ok_or_else(|| CdcError::schema("record without fields"))?;

        let mut fields = Vec::with_capacity(raw_fields.len());
        for raw in raw_fields {
            let name = raw
                .get("name")
                .and_then(Json::as_str)
                .ok_or_else(|| CdcError::schema("field without name"))?;
            let (field_type, symbols) = resolve_type(
                raw.get("type")
                    .ok_or_else(|| CdcError::schema("field without type"))?,
            )?;
            fields.push(SchemaField {
                name: name.to_string(),
                field_type,
                symbols,
            });
        }

        Ok(RecordSchema { fields })
    }

    /// Reads one record from `source`, projecting each field in declared
    /// order into a JSON object.
    pub fn read_record(&self, source: &mut impl Read) -> CdcResult<Json> {
        let mut record = Map::with_capacity(self.fields.len());
        for field in &self.fields {
            record.insert(field.name.clone(), read_field(field, source)?);
        }
        Ok(Json::Object(record))
    }
}

fn number_from_f64(value: f64) -> Json {
    Number::from_f64(value).map(Json::Number).unwrap_or(Json::Null)
}

fn read_field(field: &SchemaField, source: &mut impl Read) -> CdcResult<Json> {
    match field.field_type {
        FieldType::Null => Ok(Json::Null),
        FieldType::Bool => {
            let mut buf = [0u8; 1];
            source.read_exact(&mut buf)?;
            Ok(Json::Bool(buf[0] != 0))
        }
        FieldType::Int | FieldType::Long => {
            let value = codec::decode_long(source)?
                .ok_or_else(|| CdcError::eof("record truncated inside a number"))?;
            Ok(Json::Number(Number::from(value)))
        }
        FieldType::Float => Ok(number_from_f64(codec::decode_float(source)? as f64)),
        FieldType::Double => Ok(number_from_f64(codec::decode_double(source)?)),
        FieldType::String => {
            let text = codec::decode_string(source)?
                .ok_or_else(|| CdcError::eof("record truncated inside a string"))?;
            Ok(Json::String(text))
        }
        FieldType::Bytes => {
            let buf = codec::decode_bytes(source)?
                .ok_or_else(|| CdcError::eof("record truncated inside bytes"))?;
            Ok(Json::String(String::from_utf8_lossy(&buf).into_owned()))
        }
        FieldType::Enum => {
            let index = codec::decode_long(source)?
                .ok_or_else(|| CdcError::eof("record truncated inside an enum"))?;
            let symbol = usize::try_from(index)
                .ok()
                .and_then(|i| field.symbols.get(i))
                .ok_or_else(|| {
                    CdcError::corruption(format!(
                        "enum index {} outside of {} symbols",
                        index,
                        field.symbols.len()
                    ))
                })?;
            Ok(Json::String(symbol.clone()))
        }
    }
}

/// A typed value headed for the writer's block buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    /// `int` and `long` share the varint encoding.
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
    Bytes(Vec<u8>),
    /// Index into the field's symbol table.
    Enum(usize),
}

pub fn encode_value(value: &Value, dest: &mut Vec<u8>) {
    match value {
        Value::Null => {}
        Value::Bool(v) => dest.push(*v as u8),
        Value::Long(v) => codec::encode_long(*v, dest),
        Value::Float(v) => codec::encode_float(*v, dest),
        Value::Double(v) => codec::encode_double(*v, dest),
        Value::String(v) => codec::encode_string(v, dest),
        Value::Bytes(v) => codec::encode_bytes(v, dest),
        Value::Enum(v) => codec::encode_long(*v as i64, dest),
    }
}
