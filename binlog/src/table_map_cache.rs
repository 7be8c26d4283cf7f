//! Table-map cache: the live binding from numeric table ids to table
//! descriptions, owned exclusively by the converter thread.

use std::collections::HashMap;

use serde::Serialize;

use crate::events::table_map_event::TableMapEvent;

/// A cached table description, enriched with the schema version of the
/// tracked CREATE and the GTID under which it appeared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableMap {
    pub id: u64,
    pub version: u32,
    pub flags: u16,
    pub database: String,
    pub table: String,
    pub column_types: Vec<u8>,
    pub column_metadata: Vec<[u8; 2]>,
    pub null_bitmap: Vec<u8>,
    pub gtid: String,
}

impl TableMap {
    fn from_event(event: &TableMapEvent, version: u32, gtid: &str) -> Self {
        TableMap {
            id: event.table_id,
            version,
            flags: event.flags,
            database: event.database.clone(),
            table: event.table.clone(),
            column_types: event.column_types.clone(),
            column_metadata: event.column_metadata.clone(),
            null_bitmap: event.null_bitmap.clone(),
            gtid: gtid.to_string(),
        }
    }

    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.database, self.table)
    }
}

/// Keyed by the wire table id. An entry is replaced when a TABLE_MAP
/// arrives whose column count or type vector differs from the stored one.
#[derive(Debug, Default)]
pub struct TableMapCache {
    maps: HashMap<u64, TableMap>,
}

impl TableMapCache {
    pub fn new() -> Self {
        TableMapCache::default()
    }

    /// Applies a TABLE_MAP event. Returns true when a new entry was
    /// installed, false when the existing one already matches.
    pub fn update(&mut self, event: &TableMapEvent, version: u32, gtid: &str) -> bool {
        if let Some(existing) = self.maps.get(&event.table_id) {
            if existing.column_types == event.column_types && existing.version == version {
                return false;
            }
        }
        self.maps
            .insert(event.table_id, TableMap::from_event(event, version, gtid));
        true
    }

    pub fn get(&self, table_id: u64) -> Option<&TableMap> {
        self.maps.get(&table_id)
    }

    pub fn len(&self) -> usize {
        self.maps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }
}
