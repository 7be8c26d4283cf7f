use std::io;
use std::io::ErrorKind;

use thiserror::Error;

/// Unified error for every decode and IO path in the workspace.
///
/// Every fallible operation returns a `CdcResult`; there is no out-of-band
/// error field to poll afterwards.
#[derive(Debug, Error)]
pub enum CdcError {
    /// Truncated read, short write or any other filesystem failure.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Magic mismatch, bad sync marker, missing schema metadata or a block
    /// whose size disagrees with its record count.
    #[error("corrupted data: {0}")]
    Corruption(String),

    /// A variable-length integer ran past its 10 byte maximum.
    #[error("value overflow: varint longer than 10 bytes")]
    ValueOverflow,

    /// A buffer limit was breached in a path where the core cannot retry.
    #[error("memory: {0}")]
    Memory(String),

    /// Table metadata that cannot be reconciled, e.g. a table map whose
    /// column count disagrees with the tracked CREATE TABLE.
    #[error("schema error: {0}")]
    Schema(String),

    /// A CREATE or ALTER statement the minimal DDL parser cannot digest.
    #[error("sql error: {0}")]
    Sql(String),

    #[error("config error: {0}")]
    Config(String),
}

pub type CdcResult<T> = Result<T, CdcError>;

impl CdcError {
    pub fn corruption(msg: impl Into<String>) -> Self {
        CdcError::Corruption(msg.into())
    }

    pub fn schema(msg: impl Into<String>) -> Self {
        CdcError::Schema(msg.into())
    }

    pub fn sql(msg: impl Into<String>) -> Self {
        CdcError::Sql(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        CdcError::Config(msg.into())
    }

    pub fn eof(msg: &str) -> Self {
        CdcError::Io(io::Error::new(ErrorKind::UnexpectedEof, msg.to_string()))
    }

    /// True when the underlying cause is running out of bytes, which scan
    /// loops treat as "wait for more data" rather than a failure.
    pub fn is_eof(&self) -> bool {
        matches!(self, CdcError::Io(e) if e.kind() == ErrorKind::UnexpectedEof)
    }
}
