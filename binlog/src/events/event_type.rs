use num_enum::TryFromPrimitive;

/// Binlog event type codes, restricted to what this pipeline interprets
/// plus the codes it deliberately skips over.
///
/// ref: https://dev.mysql.com/doc/dev/mysql-server/latest/namespacemysql_1_1binlog_1_1event.html
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum EventType {
    Unknown = 0,
    StartV3 = 1,
    Query = 2,
    Stop = 3,
    /// Binary log switches to a new file.
    Rotate = 4,
    IntVar = 5,
    FormatDescription = 15,
    /// Transaction commit.
    Xid = 16,
    /// Binds a table id to a table description for the row events that
    /// follow in the same file.
    TableMap = 19,
    WriteRowsV1 = 23,
    UpdateRowsV1 = 24,
    DeleteRowsV1 = 25,
    WriteRowsV2 = 30,
    UpdateRowsV2 = 31,
    DeleteRowsV2 = 32,
    MysqlGtid = 33,
    AnonymousGtid = 34,
    PreviousGtids = 35,
    MariadbAnnotateRows = 160,
    MariadbBinlogCheckpoint = 161,
    /// MariaDB per-transaction GTID.
    MariadbGtid = 162,
    MariadbGtidList = 163,
}

impl EventType {
    pub fn from_code(code: u8) -> Option<EventType> {
        EventType::try_from(code).ok()
    }

    pub fn is_rows_event(&self) -> bool {
        matches!(
            self,
            EventType::WriteRowsV1
                | EventType::UpdateRowsV1
                | EventType::DeleteRowsV1
                | EventType::WriteRowsV2
                | EventType::UpdateRowsV2
                | EventType::DeleteRowsV2
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn code_conversion() {
        assert_eq!(EventType::from_code(19), Some(EventType::TableMap));
        assert_eq!(EventType::from_code(162), Some(EventType::MariadbGtid));
        assert_eq!(EventType::from_code(200), None);
        assert!(EventType::WriteRowsV2.is_rows_event());
        assert!(!EventType::Query.is_rows_event());
    }
}
