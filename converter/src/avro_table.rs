//! One open output pair per `(database, table, version)`: the `.avsc`
//! schema file written once and the `.avro` container records stream
//! into.

use std::fs;
use std::path::{Path, PathBuf};

use avro::writer::AvroWriter;
use common::err::cdc_error::CdcResult;
use tracing::info;

pub struct AvroTable {
    pub database: String,
    pub table: String,
    pub version: u32,
    pub writer: AvroWriter,
    avro_path: PathBuf,
}

/// `<db>.<table>.<version, six digits>` naming shared by both files.
pub fn table_base_name(database: &str, table: &str, version: u32) -> String {
    format!("{}.{}.{:06}", database, table, version)
}

impl AvroTable {
    /// Opens (or resumes) the container for this table version, writing
    /// the `.avsc` next to it exactly once.
    pub fn open(
        avro_dir: &Path,
        database: &str,
        table: &str,
        version: u32,
        schema_json: &str,
        block_capacity: usize,
    ) -> CdcResult<Self> {
        let base = table_base_name(database, table, version);

        let avsc_path = avro_dir.join(format!("{}.avsc", base));
        if !avsc_path.exists() {
            fs::write(&avsc_path, schema_json)?;
            info!(schema = %avsc_path.display(), "new table schema version");
        }

        let avro_path = avro_dir.join(format!("{}.avro", base));
        let writer = AvroWriter::create(&avro_path, schema_json, block_capacity)?;

        Ok(AvroTable {
            database: database.to_string(),
            table: table.to_string(),
            version,
            writer,
            avro_path,
        })
    }

    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.database, self.table)
    }

    pub fn path(&self) -> &Path {
        &self.avro_path
    }
}
