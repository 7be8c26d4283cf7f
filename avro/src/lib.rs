//! Avro object-container codec: primitive encoders, container reader and
//! writer, the flat record schema model and the GTID seek index.

pub mod codec;
pub mod index;
pub mod reader;
pub mod schema;
pub mod writer;

/// File magic: `O` `b` `j` followed by the format version byte.
pub const AVRO_MAGIC: [u8; 4] = [b'O', b'b', b'j', 0x01];

pub const SYNC_MARKER_SIZE: usize = 16;

/// Metadata key holding the writer schema JSON.
pub const SCHEMA_KEY: &str = "avro.schema";

/// Metadata key holding the block codec; only `null` is supported.
pub const CODEC_KEY: &str = "avro.codec";
