//! The scan loop: walks binlog files in sequence, dispatches the events
//! this pipeline interprets and streams row images into per-table Avro
//! containers.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread;
use std::time::Duration;

use avro::index::GtidIndex;
use binlog::events::event_header::EventHeader;
use binlog::events::event_type::EventType;
use binlog::events::format_description_event::{ChecksumAlgorithm, FormatDescriptionEvent};
use binlog::events::gtid_event::GtidEvent;
use binlog::events::query_event::QueryEvent;
use binlog::events::rotate_event::RotateEvent;
use binlog::events::rows_event::{
    peek_flags, peek_table_id, RowEventVersion, RowsEvent, RowsFlags, RowsKind, DUMMY_TABLE_ID,
};
use binlog::events::table_map_event::TableMapEvent;
use binlog::reader::BinlogFileReader;
use binlog::table_map_cache::TableMapCache;
use binlog::BINLOG_MAGIC;
use common::config::config::ConverterConfig;
use common::err::cdc_error::{CdcError, CdcResult};
use common::file_util::{binlog_file_name, next_binlog_file};
use tracing::{debug, info, trace, warn};

use crate::avro_table::AvroTable;
use crate::ddl::{self, TableCreate};
use crate::record::build_record;
use crate::schema_gen::change_record_schema;

/// The caches shared between the converter thread and consumer-facing
/// readers. Mutated only under the write lock, snapshotted under the read
/// lock.
#[derive(Debug, Default)]
pub struct Registry {
    pub table_maps: TableMapCache,
    pub creates: HashMap<String, TableCreate>,
}

impl Registry {
    pub fn new() -> Self {
        Registry::default()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ConverterStats {
    pub events: u64,
    pub rows: u64,
    pub transactions: u64,
    pub schema_versions: u64,
    pub files_done: u64,
}

/// Outcome of scanning the current binlog file to its end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    /// Advanced to the named successor file.
    Rotated(PathBuf),
    /// No successor yet; poll again after a delay.
    LastFile,
}

pub struct Converter {
    config: ConverterConfig,
    registry: Arc<RwLock<Registry>>,
    shutdown: Arc<AtomicBool>,
    tables: HashMap<String, AvroTable>,
    index: GtidIndex,
    current_file: PathBuf,
    /// Resume offset within the current file.
    position: u64,
    current_gtid: String,
    pending_rotate: Option<String>,
    /// Event trailer width, renegotiated by each file's
    /// FORMAT_DESCRIPTION event.
    checksum: ChecksumAlgorithm,
    trx_since_flush: u64,
    stats: ConverterStats,
}

impl Converter {
    /// The registry is owned by the caller and passed in; there is no
    /// process-wide instance state.
    pub fn new(
        config: ConverterConfig,
        registry: Arc<RwLock<Registry>>,
        shutdown: Arc<AtomicBool>,
    ) -> CdcResult<Self> {
        config.validate()?;
        let index = GtidIndex::load(&config.avro_dir)?;
        let current_file = config
            .binlog_dir
            .join(binlog_file_name(&config.filestem, config.start_index));

        Ok(Converter {
            config,
            registry,
            shutdown,
            tables: HashMap::new(),
            index,
            current_file,
            position: BINLOG_MAGIC.len() as u64,
            current_gtid: String::from("0-0-0"),
            pending_rotate: None,
            // The server default since 5.6.6; every real binlog opens
            // with a FORMAT_DESCRIPTION that overrides this before any
            // event that cares.
            checksum: ChecksumAlgorithm::Crc32,
            trx_since_flush: 0,
            stats: ConverterStats::default(),
        })
    }

    pub fn stats(&self) -> ConverterStats {
        self.stats
    }

    pub fn registry(&self) -> Arc<RwLock<Registry>> {
        self.registry.clone()
    }

    pub fn current_file(&self) -> &PathBuf {
        &self.current_file
    }

    fn registry_read(&self) -> CdcResult<RwLockReadGuard<'_, Registry>> {
        self.registry
            .read()
            .map_err(|_| CdcError::corruption("registry lock poisoned"))
    }

    fn registry_write(&self) -> CdcResult<RwLockWriteGuard<'_, Registry>> {
        self.registry
            .write()
            .map_err(|_| CdcError::corruption("registry lock poisoned"))
    }

    /// Runs until shutdown, backing off exponentially while parked on the
    /// newest file.
    pub fn run(&mut self) -> CdcResult<()> {
        let initial_backoff = Duration::from_millis(100);
        let mut backoff = initial_backoff;

        while !self.shutdown.load(Ordering::Relaxed) {
            match self.process_current_file()? {
                ScanOutcome::Rotated(_) => {
                    backoff = initial_backoff;
                }
                ScanOutcome::LastFile => {
                    self.flush_tables()?;
                    self.update_index()?;
                    if self.shutdown.load(Ordering::Relaxed) {
                        break;
                    }
                    thread::sleep(backoff);
                    backoff = (backoff * 2).min(self.config.max_backoff());
                }
            }
        }

        self.close_tables()?;
        self.update_index()?;
        Ok(())
    }

    /// Scans the current file from the stored position to its end and
    /// decides whether the walk can advance.
    pub fn process_current_file(&mut self) -> CdcResult<ScanOutcome> {
        if !self.current_file.exists() {
            debug!(file = %self.current_file.display(), "binlog not created yet");
            return Ok(ScanOutcome::LastFile);
        }

        let mut reader = BinlogFileReader::open_at(&self.current_file, self.position)?;
        while !self.shutdown.load(Ordering::Relaxed) {
            match reader.read_event()? {
                Some((header, body)) => {
                    self.dispatch(&header, &body)?;
                    self.position = reader.position();
                }
                None => break,
            }
        }

        // End of file (or shutdown): every open block is finalized before
        // the walk moves on.
        self.close_tables()?;

        let current_name = self
            .current_file
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        let candidate = self
            .pending_rotate
            .clone()
            .or_else(|| next_binlog_file(&current_name));

        if let Some(name) = candidate {
            let next = self.config.binlog_dir.join(&name);
            if name != current_name && next.exists() {
                info!(previous = %current_name, next = %name, "rotating to the next binlog");
                self.pending_rotate = None;
                self.current_file = next.clone();
                self.position = BINLOG_MAGIC.len() as u64;
                self.stats.files_done += 1;
                return Ok(ScanOutcome::Rotated(next));
            }
        }
        Ok(ScanOutcome::LastFile)
    }

    fn dispatch(&mut self, header: &EventHeader, body: &[u8]) -> CdcResult<()> {
        self.stats.events += 1;

        let event_type = match header.type_code() {
            Some(t) => t,
            None => {
                trace!(code = header.event_type, "skipping unknown event type");
                return Ok(());
            }
        };

        match event_type {
            EventType::FormatDescription => {
                let description = FormatDescriptionEvent::parse(body)?;
                debug!(
                    server_version = %description.server_version,
                    checksum = ?description.checksum_algorithm,
                    "format description"
                );
                self.checksum = description.checksum_algorithm;
                Ok(())
            }
            EventType::Query => self.handle_query(body),
            EventType::Xid => self.transaction_done(),
            EventType::MariadbGtid => {
                let gtid = GtidEvent::parse(body)?;
                self.current_gtid = gtid.gtid_string(header.server_id);
                Ok(())
            }
            EventType::TableMap => self.handle_table_map(body),
            EventType::Rotate => {
                let rotate = RotateEvent::parse(body, self.checksum.trailer_len())?;
                debug!(next = %rotate.next_file, "rotate event");
                self.pending_rotate = Some(rotate.next_file);
                Ok(())
            }
            other if other.is_rows_event() => {
                let (kind, version) = match RowsKind::from_event_type(other) {
                    Some(pair) => pair,
                    None => return Ok(()),
                };
                self.handle_rows(header, body, kind, version)
            }
            other => {
                trace!(event = ?other, "event not interpreted");
                Ok(())
            }
        }
    }

    fn handle_query(&mut self, body: &[u8]) -> CdcResult<()> {
        let query = QueryEvent::parse(body, self.checksum.trailer_len())?;

        if ddl::is_create_table(&query.sql) {
            match TableCreate::from_sql(&query.database, &query.sql, &self.current_gtid) {
                Ok(create) => {
                    let name = create.qualified_name();
                    info!(table = %name, columns = create.columns.len(), "tracking CREATE TABLE");
                    self.registry_write()?.creates.insert(name, create);
                }
                Err(e) => warn!(error = %e, "unusable CREATE TABLE statement"),
            }
        } else if ddl::is_alter_table(&query.sql) {
            let Some((database, table)) = ddl::alter_target(&query.database, &query.sql) else {
                warn!(sql = %query.sql, "unusable ALTER TABLE statement");
                return Ok(());
            };
            let name = format!("{}.{}", database, table);
            let mut registry = self.registry_write()?;
            match registry.creates.get_mut(&name) {
                Some(create) => match create.apply_alter(&query.sql) {
                    Ok(changed) => {
                        if changed {
                            debug!(table = %name, version = create.version, "applied ALTER TABLE");
                        }
                    }
                    Err(e) => warn!(table = %name, error = %e, "unusable ALTER TABLE statement"),
                },
                None => warn!(table = %name, "ALTER TABLE for an untracked table"),
            }
        } else if query.is_commit() {
            return self.transaction_done();
        }
        Ok(())
    }

    fn transaction_done(&mut self) -> CdcResult<()> {
        self.stats.transactions += 1;
        self.trx_since_flush += 1;
        if self.trx_since_flush >= self.config.group_trx {
            self.flush_tables()?;
            self.trx_since_flush = 0;
        }
        Ok(())
    }

    fn handle_table_map(&mut self, body: &[u8]) -> CdcResult<()> {
        let event = TableMapEvent::parse(body)?;
        let name = event.qualified_name();

        let (version, schema_json) = {
            let mut registry = self.registry_write()?;
            let Some(create) = registry.creates.get(&name) else {
                warn!(table = %name, "table map without a tracked CREATE TABLE");
                return Ok(());
            };
            if create.columns.len() as u64 != event.column_count {
                warn!(
                    table = %name,
                    tracked = create.columns.len(),
                    mapped = event.column_count,
                    "column count mismatch between CREATE TABLE and table map"
                );
                return Ok(());
            }
            let version = create.version;

            if !registry
                .table_maps
                .update(&event, version, &self.current_gtid)
            {
                return Ok(());
            }
            let create = registry
                .creates
                .get(&name)
                .ok_or_else(|| CdcError::schema(format!("{} vanished from the registry", name)))?;
            let map = registry
                .table_maps
                .get(event.table_id)
                .ok_or_else(|| CdcError::schema(format!("{} vanished from the cache", name)))?;
            (version, change_record_schema(create, map)?)
        };

        self.ensure_table(&name, &event.database, &event.table, version, &schema_json)
    }

    /// Opens the output pair for this table version if it is not already
    /// the open one.
    fn ensure_table(
        &mut self,
        name: &str,
        database: &str,
        table: &str,
        version: u32,
        schema_json: &str,
    ) -> CdcResult<()> {
        if let Some(open) = self.tables.get(name) {
            if open.version == version {
                return Ok(());
            }
        }

        if let Some(old) = self.tables.remove(name) {
            let old_version = old.version;
            old.writer.close()?;
            debug!(table = %name, version = old_version, "closed previous table version");
        }

        let table = AvroTable::open(
            &self.config.avro_dir,
            database,
            table,
            version,
            schema_json,
            self.config.block_size,
        )?;
        self.stats.schema_versions += 1;
        self.tables.insert(name.to_string(), table);
        Ok(())
    }

    fn handle_rows(
        &mut self,
        header: &EventHeader,
        body: &[u8],
        kind: RowsKind,
        version: RowEventVersion,
    ) -> CdcResult<()> {
        let table_id = peek_table_id(body)?;
        let flags = RowsFlags::from_bits_truncate(peek_flags(body)?);
        if table_id == DUMMY_TABLE_ID && flags.contains(RowsFlags::STMT_END) {
            trace!("skipping dummy end-of-statement row event");
            return Ok(());
        }

        let map = {
            let registry = self.registry_read()?;
            match registry.table_maps.get(table_id) {
                Some(map) => map.clone(),
                None => {
                    warn!(table_id, "row event without a preceding table map");
                    return Ok(());
                }
            }
        };
        let name = map.qualified_name();

        let event = RowsEvent::parse(
            body,
            kind,
            version,
            &map.column_types,
            &map.column_metadata,
            self.checksum.trailer_len(),
        )?;

        // Reopen the output if a rotation closed it.
        let is_open = self
            .tables
            .get(&name)
            .map(|t| t.version == map.version)
            .unwrap_or(false);
        if !is_open {
            let schema_json = {
                let registry = self.registry_read()?;
                let Some(create) = registry.creates.get(&name) else {
                    warn!(table = %name, "row event without a tracked CREATE TABLE");
                    return Ok(());
                };
                match change_record_schema(create, &map) {
                    Ok(schema) => schema,
                    Err(e) => {
                        warn!(table = %name, error = %e, "cannot reopen output for row event");
                        return Ok(());
                    }
                }
            };
            self.ensure_table(&name, &map.database, &map.table, map.version, &schema_json)?;
        }

        let Some(table) = self.tables.get_mut(&name) else {
            return Ok(());
        };
        let mut appended = 0u64;
        for image in &event.rows {
            let values = build_record(
                &self.current_gtid,
                header,
                &map,
                image,
                self.config.timestamps_in_utc,
            )?;
            table.writer.append_record(&values)?;
            appended += 1;
            if table.writer.records_in_block() >= self.config.group_rows {
                table.writer.finalize_block()?;
            }
        }
        self.stats.rows += appended;

        if appended > 0 {
            if let Some(create) = self.registry_write()?.creates.get_mut(&name) {
                create.mark_used();
            }
        }
        Ok(())
    }

    /// Finalizes every open block, keeping the files open.
    pub fn flush_tables(&mut self) -> CdcResult<()> {
        for table in self.tables.values_mut() {
            table.writer.finalize_block()?;
        }
        Ok(())
    }

    /// Flushes and closes every output; they reopen on demand.
    pub fn close_tables(&mut self) -> CdcResult<()> {
        for (_, table) in self.tables.drain() {
            table.writer.close()?;
        }
        Ok(())
    }

    /// Brings the GTID index up to date with the finalized containers.
    pub fn update_index(&mut self) -> CdcResult<u64> {
        self.index.update_dir()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn registry_defaults_empty() {
        let registry = Registry::new();
        assert!(registry.creates.is_empty());
        assert!(registry.table_maps.is_empty());
    }
}
