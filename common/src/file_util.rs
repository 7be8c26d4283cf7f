//! Binlog file naming: `<stem>.<zero padded sequence>`.

/// Builds `stem.000007` style names. Six digits minimum, more when the
/// sequence outgrows them, matching the server's own naming.
pub fn binlog_file_name(stem: &str, index: u64) -> String {
    format!("{}.{:06}", stem, index)
}

/// Extracts the numeric suffix of a binlog file name.
pub fn binlog_index(name: &str) -> Option<u64> {
    let (_, suffix) = name.rsplit_once('.')?;
    suffix.parse().ok()
}

/// Name of the file that follows `name` in the sequence, preserving the
/// suffix width.
pub fn next_binlog_file(name: &str) -> Option<String> {
    let (stem, suffix) = name.rsplit_once('.')?;
    let index: u64 = suffix.parse().ok()?;
    Some(format!(
        "{}.{:0width$}",
        stem,
        index + 1,
        width = suffix.len()
    ))
}
