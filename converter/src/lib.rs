//! The converter: tracks CREATE/ALTER TABLE statements, projects table
//! descriptions to Avro schemas and walks binlog files turning row events
//! into per-table Avro containers.

pub mod avro_table;
pub mod converter;
pub mod ddl;
pub mod record;
pub mod schema_gen;
