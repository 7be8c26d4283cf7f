//! Seek index: maps each GTID to the file and block offset of the first
//! record carrying it, so consumers can resume mid-stream.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use common::err::cdc_error::{CdcError, CdcResult};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use tracing::{debug, warn};

use crate::reader::AvroReader;

pub const INDEX_FILE_NAME: &str = "gtid-index.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Avro file name, relative to the index directory.
    pub file: String,
    /// Offset of the block header containing the record.
    pub offset: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct IndexState {
    /// `domain-server-sequence` → location of the first matching record.
    entries: HashMap<String, IndexEntry>,
    /// Per file, the offset of the next unindexed block header.
    progress: HashMap<String, u64>,
}

/// Persistent GTID → (file, block offset) index over a directory of
/// finalized `.avro` files.
///
/// Indexing is idempotent: re-inserting a key replaces the entry, and each
/// file resumes from its recorded progress offset instead of being
/// rescanned.
pub struct GtidIndex {
    dir: PathBuf,
    state: IndexState,
}

impl GtidIndex {
    pub fn load(dir: &Path) -> CdcResult<Self> {
        let path = dir.join(INDEX_FILE_NAME);
        let state = match fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text)
                .map_err(|e| CdcError::corruption(format!("{}: {}", path.display(), e)))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => IndexState::default(),
            Err(e) => return Err(e.into()),
        };
        Ok(GtidIndex {
            dir: dir.to_path_buf(),
            state,
        })
    }

    pub fn save(&self) -> CdcResult<()> {
        let text = serde_json::to_string(&self.state)
            .map_err(|e| CdcError::corruption(e.to_string()))?;
        fs::write(self.dir.join(INDEX_FILE_NAME), text)?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.state.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.entries.is_empty()
    }

    pub fn lookup(&self, domain: u64, server_id: u64, sequence: u64) -> Option<&IndexEntry> {
        self.state
            .entries
            .get(&format!("{}-{}-{}", domain, server_id, sequence))
    }

    pub fn lookup_gtid(&self, gtid: &str) -> Option<&IndexEntry> {
        self.state.entries.get(gtid)
    }

    /// Indexes the unread tail of one file, resuming from the recorded
    /// offset. Returns the number of records visited.
    pub fn update_file(&mut self, path: &Path) -> CdcResult<u64> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| CdcError::corruption(format!("unusable path {}", path.display())))?
            .to_string();

        let mut reader = AvroReader::open(path)?;
        if let Some(&resume) = self.state.progress.get(&name) {
            reader.seek_to_block(resume)?;
        }

        let mut visited = 0u64;
        while reader.next_block()? {
            let block_offset = reader.block_start();
            while let Some(record) = reader.read_record()? {
                visited += 1;
                match record.get("GTID").and_then(Json::as_str) {
                    Some(gtid) => {
                        self.state.entries.insert(
                            gtid.to_string(),
                            IndexEntry {
                                file: name.clone(),
                                offset: block_offset,
                            },
                        );
                    }
                    None => warn!(file = %path.display(), "record without a GTID field"),
                }
            }
            // The cursor sits at the payload end; the next block header
            // starts past the 16 byte sync marker.
            let resume_at = reader.position()? + crate::SYNC_MARKER_SIZE as u64;
            self.state.progress.insert(name.clone(), resume_at);
        }

        debug!(file = %path.display(), visited, "gtid index updated");
        Ok(visited)
    }

    /// Indexes every `.avro` file in the directory and persists the
    /// result.
    pub fn update_dir(&mut self) -> CdcResult<u64> {
        let mut visited = 0;
        let mut files: Vec<PathBuf> = fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().map(|e| e == "avro").unwrap_or(false))
            .collect();
        files.sort();

        for file in files {
            visited += self.update_file(&file)?;
        }
        self.save()?;
        Ok(visited)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::schema::Value;
    use crate::writer::AvroWriter;

    const SCHEMA: &str = r#"{"type":"record","name":"ChangeRecord","fields":[
        {"name":"GTID","type":"string"},
        {"name":"x","type":"long"}
    ]}"#;

    fn write_file(dir: &Path, name: &str, gtids: &[&str]) {
        let mut writer = AvroWriter::create(&dir.join(name), SCHEMA, 1024).unwrap();
        for (i, gtid) in gtids.iter().enumerate() {
            writer
                .append_record(&[Value::String(gtid.to_string()), Value::Long(i as i64)])
                .unwrap();
            writer.finalize_block().unwrap();
        }
        writer.close().unwrap();
    }

    #[test]
    fn index_and_lookup() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "d.t.000001.avro", &["0-1-1", "0-1-2"]);

        let mut index = GtidIndex::load(dir.path()).unwrap();
        assert_eq!(index.update_dir().unwrap(), 2);

        let entry = index.lookup(0, 1, 2).unwrap();
        assert_eq!(entry.file, "d.t.000001.avro");
        assert!(entry.offset > 0);
        assert!(index.lookup(0, 1, 9).is_none());
    }

    #[test]
    fn rerun_resumes_without_rework() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "d.t.000001.avro", &["0-1-1"]);

        let mut index = GtidIndex::load(dir.path()).unwrap();
        assert_eq!(index.update_dir().unwrap(), 1);
        // Nothing new to visit on the second pass.
        assert_eq!(index.update_dir().unwrap(), 0);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn persisted_state_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "d.t.000001.avro", &["0-1-7"]);

        let mut index = GtidIndex::load(dir.path()).unwrap();
        index.update_dir().unwrap();
        drop(index);

        let reloaded = GtidIndex::load(dir.path()).unwrap();
        assert!(reloaded.lookup_gtid("0-1-7").is_some());
    }
}
