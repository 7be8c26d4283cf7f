use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::err::cdc_error::{CdcError, CdcResult};

/// Converter settings, loadable from a TOML file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConverterConfig {
    /// Directory containing the binlog files to convert.
    pub binlog_dir: PathBuf,

    /// Output directory for `.avro` and `.avsc` files.
    pub avro_dir: PathBuf,

    /// Binlog base name, e.g. `binlog` for `binlog.000001`.
    pub filestem: String,

    /// Sequence number of the first binlog file to read.
    pub start_index: u64,

    /// Rows per data block before the block is finalized.
    pub group_rows: u64,

    /// Completed transactions per data block before all open blocks are
    /// finalized.
    pub group_trx: u64,

    /// Initial capacity of the in-memory block buffer.
    pub block_size: usize,

    /// Render TIMESTAMP columns in UTC instead of local time.
    pub timestamps_in_utc: bool,

    /// Ceiling for the exponential backoff while waiting on the last file.
    pub max_backoff_ms: u64,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        ConverterConfig {
            binlog_dir: PathBuf::from("."),
            avro_dir: PathBuf::from("."),
            filestem: String::from("binlog"),
            start_index: 1,
            group_rows: 1000,
            group_trx: 1,
            block_size: 16 * 1024,
            timestamps_in_utc: false,
            max_backoff_ms: 15_000,
        }
    }
}

impl ConverterConfig {
    pub fn from_file(path: &Path) -> CdcResult<Self> {
        let text = fs::read_to_string(path)?;
        let config: ConverterConfig = toml::from_str(&text)
            .map_err(|e| CdcError::config(format!("{}: {}", path.display(), e)))?;
        Ok(config)
    }

    /// Creates the output directory. Failure here is fatal at startup.
    pub fn validate(&self) -> CdcResult<()> {
        if self.group_rows == 0 {
            return Err(CdcError::config("group_rows must be at least 1"));
        }
        if self.group_trx == 0 {
            return Err(CdcError::config("group_trx must be at least 1"));
        }
        fs::create_dir_all(&self.avro_dir).map_err(|e| {
            CdcError::config(format!(
                "cannot create avro directory {}: {}",
                self.avro_dir.display(),
                e
            ))
        })?;
        Ok(())
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}
