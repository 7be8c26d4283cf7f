//! End-to-end pipeline tests over hand-assembled binlog files: DDL
//! tracking, table maps, row events, block grouping, rotation and the
//! GTID index.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, RwLock};

use avro::reader::AvroReader;
use common::config::config::ConverterConfig;
use converter::converter::{Converter, Registry, ScanOutcome};

const EVENT_HEADER_LEN: usize = 19;
const CHECKSUM: [u8; 4] = [0u8; 4];

const QUERY: u8 = 2;
const ROTATE: u8 = 4;
const FORMAT_DESCRIPTION: u8 = 15;
const XID: u8 = 16;
const TABLE_MAP: u8 = 19;
const WRITE_ROWS_V2: u8 = 30;
const UPDATE_ROWS_V2: u8 = 31;
const DELETE_ROWS_V2: u8 = 32;
const MARIADB_GTID: u8 = 162;

fn event(timestamp: u32, event_type: u8, server_id: u32, body: &[u8]) -> Vec<u8> {
    let size = (EVENT_HEADER_LEN + body.len()) as u32;
    let mut buf = Vec::new();
    buf.extend_from_slice(&timestamp.to_le_bytes());
    buf.push(event_type);
    buf.extend_from_slice(&server_id.to_le_bytes());
    buf.extend_from_slice(&size.to_le_bytes());
    buf.extend_from_slice(&0u32.to_le_bytes());
    buf.extend_from_slice(&0u16.to_le_bytes());
    buf.extend_from_slice(body);
    buf
}

/// FORMAT_DESCRIPTION body announcing the given checksum algorithm
/// (0 = NONE, 1 = CRC32).
fn format_description_body(checksum_alg: u8) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&4u16.to_le_bytes());
    let mut version = [0u8; 50];
    version[..6].copy_from_slice(b"10.6.4");
    body.extend_from_slice(&version);
    body.extend_from_slice(&0u32.to_le_bytes());
    body.push(19);
    body.extend_from_slice(&[0u8; 40]); // post-header length table
    body.push(checksum_alg);
    body.extend_from_slice(&CHECKSUM);
    body
}

/// Drops the CRC32 placeholder a body builder appended, for assembling
/// `binlog_checksum=NONE` streams.
fn strip_checksum(mut body: Vec<u8>) -> Vec<u8> {
    body.truncate(body.len() - CHECKSUM.len());
    body
}

fn gtid_body(sequence: u64, domain: u32) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&sequence.to_le_bytes());
    body.extend_from_slice(&domain.to_le_bytes());
    body.push(0);
    body.extend_from_slice(&CHECKSUM);
    body
}

fn query_body(database: &str, sql: &str) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&1u32.to_le_bytes()); // thread id
    body.extend_from_slice(&0u32.to_le_bytes()); // exec time
    body.push(database.len() as u8);
    body.extend_from_slice(&0u16.to_le_bytes()); // error code
    body.extend_from_slice(&0u16.to_le_bytes()); // status vars
    body.extend_from_slice(database.as_bytes());
    body.push(0);
    body.extend_from_slice(sql.as_bytes());
    body.extend_from_slice(&CHECKSUM);
    body
}

fn xid_body() -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&9u64.to_le_bytes());
    body.extend_from_slice(&CHECKSUM);
    body
}

fn rotate_body(next_file: &str) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&4u64.to_le_bytes());
    body.extend_from_slice(next_file.as_bytes());
    body.extend_from_slice(&CHECKSUM);
    body
}

fn table_map_body(table_id: u64, database: &str, table: &str, columns: &[(u8, &[u8])]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&table_id.to_le_bytes()[..6]);
    body.extend_from_slice(&0u16.to_le_bytes());
    body.push(database.len() as u8);
    body.extend_from_slice(database.as_bytes());
    body.push(0);
    body.push(table.len() as u8);
    body.extend_from_slice(table.as_bytes());
    body.push(0);
    body.push(columns.len() as u8);
    for (code, _) in columns {
        body.push(*code);
    }
    let metadata_len: usize = columns.iter().map(|(_, m)| m.len()).sum();
    body.push(metadata_len as u8);
    for (_, meta) in columns {
        body.extend_from_slice(meta);
    }
    body.extend(std::iter::repeat(0).take((columns.len() + 7) / 8));
    body.extend_from_slice(&CHECKSUM);
    body
}

/// Rows event body (v2, no extra data): present bitmap then the packed
/// row images.
fn rows_body(table_id: u64, columns: usize, present: &[u8], rows: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&table_id.to_le_bytes()[..6]);
    body.extend_from_slice(&1u16.to_le_bytes()); // STMT_END
    body.extend_from_slice(&2u16.to_le_bytes()); // v2 extra length
    body.push(columns as u8);
    body.extend_from_slice(present);
    body.extend_from_slice(rows);
    body.extend_from_slice(&CHECKSUM);
    body
}

fn write_binlog(path: &Path, events: &[Vec<u8>]) {
    let mut file = File::create(path).unwrap();
    file.write_all(&[0xfe, b'b', b'i', b'n']).unwrap();
    for event in events {
        file.write_all(event).unwrap();
    }
}

struct Pipeline {
    _dir: tempfile::TempDir,
    binlog_dir: PathBuf,
    avro_dir: PathBuf,
    converter: Converter,
}

fn pipeline(config_tweak: impl FnOnce(&mut ConverterConfig)) -> Pipeline {
    let dir = tempfile::tempdir().unwrap();
    let binlog_dir = dir.path().join("binlog");
    let avro_dir = dir.path().join("avro");
    std::fs::create_dir_all(&binlog_dir).unwrap();

    let mut config = ConverterConfig {
        binlog_dir: binlog_dir.clone(),
        avro_dir: avro_dir.clone(),
        ..Default::default()
    };
    config_tweak(&mut config);

    let converter = Converter::new(
        config,
        Arc::new(RwLock::new(Registry::new())),
        Arc::new(AtomicBool::new(false)),
    )
    .unwrap();

    Pipeline {
        _dir: dir,
        binlog_dir,
        avro_dir,
        converter,
    }
}

fn read_all(path: &Path) -> Vec<serde_json::Value> {
    let mut reader = AvroReader::open(path).unwrap();
    let mut records = Vec::new();
    while let Some(record) = reader.next_record().unwrap() {
        records.push(record);
    }
    records
}

/// LONG 42 and VARCHAR "abc", both present, neither NULL.
fn long_varchar_row() -> Vec<u8> {
    vec![0b0000_0000, 0x2a, 0x00, 0x00, 0x00, 0x03, b'a', b'b', b'c']
}

#[test]
fn insert_produces_a_change_record() {
    let mut p = pipeline(|_| {});

    write_binlog(
        &p.binlog_dir.join("binlog.000001"),
        &[
            event(1000, MARIADB_GTID, 1, &gtid_body(1, 0)),
            event(1000, QUERY, 1, &query_body("d", "CREATE TABLE t (c0 INT, c1 VARCHAR(10))")),
            event(
                1000,
                TABLE_MAP,
                1,
                &table_map_body(17, "d", "t", &[(3, &[0]), (15, &[0xff, 0x00])]),
            ),
            event(
                1001,
                WRITE_ROWS_V2,
                1,
                &rows_body(17, 2, &[0b11], &long_varchar_row()),
            ),
            event(1001, XID, 1, &xid_body()),
        ],
    );

    assert_eq!(
        p.converter.process_current_file().unwrap(),
        ScanOutcome::LastFile
    );

    let avsc = p.avro_dir.join("d.t.000001.avsc");
    assert!(avsc.exists());
    let schema: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&avsc).unwrap()).unwrap();
    assert_eq!(schema["namespace"], "MaxScaleChangeDataSchema.avro");

    let records = read_all(&p.avro_dir.join("d.t.000001.avro"));
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["GTID"], "0-1-1");
    assert_eq!(records[0]["timestamp"], 1001);
    assert_eq!(records[0]["event_type"], "insert");
    assert_eq!(records[0]["c0"], 42);
    assert_eq!(records[0]["c1"], "abc");

    let stats = p.converter.stats();
    assert_eq!(stats.rows, 1);
    assert_eq!(stats.transactions, 1);
}

#[test]
fn update_emits_before_and_after_delete_one_record() {
    let mut p = pipeline(|_| {});

    // UPDATE: before image LONG 1, after image LONG 2; then DELETE LONG 2.
    let update_row = vec![
        0b0000_0000,
        0x01,
        0x00,
        0x00,
        0x00,
        0b0000_0000,
        0x02,
        0x00,
        0x00,
        0x00,
    ];
    let mut update_body = Vec::new();
    update_body.extend_from_slice(&5u64.to_le_bytes()[..6]);
    update_body.extend_from_slice(&1u16.to_le_bytes());
    update_body.extend_from_slice(&2u16.to_le_bytes());
    update_body.push(1); // one column
    update_body.push(0b1); // present
    update_body.push(0b1); // present after
    update_body.extend_from_slice(&update_row);
    update_body.extend_from_slice(&CHECKSUM);

    let delete_row = vec![0b0000_0000, 0x02, 0x00, 0x00, 0x00];

    write_binlog(
        &p.binlog_dir.join("binlog.000001"),
        &[
            event(2000, MARIADB_GTID, 1, &gtid_body(5, 0)),
            event(2000, QUERY, 1, &query_body("d", "CREATE TABLE u (a INT)")),
            event(2000, TABLE_MAP, 1, &table_map_body(5, "d", "u", &[(3, &[0])])),
            event(2001, UPDATE_ROWS_V2, 1, &update_body),
            event(2002, DELETE_ROWS_V2, 1, &rows_body(5, 1, &[0b1], &delete_row)),
            event(2002, XID, 1, &xid_body()),
        ],
    );

    p.converter.process_current_file().unwrap();

    let records = read_all(&p.avro_dir.join("d.u.000001.avro"));
    assert_eq!(records.len(), 3);
    assert_eq!(records[0]["event_type"], "update_before");
    assert_eq!(records[0]["a"], 1);
    assert_eq!(records[1]["event_type"], "update_after");
    assert_eq!(records[1]["a"], 2);
    assert_eq!(records[2]["event_type"], "delete");
    assert_eq!(records[2]["a"], 2);
}

#[test]
fn alter_after_use_opens_a_new_version() {
    let mut p = pipeline(|_| {});

    write_binlog(
        &p.binlog_dir.join("binlog.000001"),
        &[
            event(3000, MARIADB_GTID, 1, &gtid_body(1, 0)),
            event(3000, QUERY, 1, &query_body("d", "CREATE TABLE t (a INT, b VARCHAR(10))")),
            event(
                3000,
                TABLE_MAP,
                1,
                &table_map_body(17, "d", "t", &[(3, &[0]), (15, &[0xff, 0x00])]),
            ),
            event(3001, WRITE_ROWS_V2, 1, &rows_body(17, 2, &[0b11], &long_varchar_row())),
            event(3001, XID, 1, &xid_body()),
            // Schema change after the schema was used: version bump.
            event(3002, QUERY, 1, &query_body("d", "ALTER TABLE t ADD COLUMN c INT")),
            event(
                3002,
                TABLE_MAP,
                1,
                &table_map_body(17, "d", "t", &[(3, &[0]), (15, &[0xff, 0x00]), (3, &[0])]),
            ),
            event(
                3003,
                WRITE_ROWS_V2,
                1,
                &rows_body(
                    17,
                    3,
                    &[0b111],
                    &[
                        0b0000_0000,
                        0x07, 0x00, 0x00, 0x00, // a = 7
                        0x02, b'h', b'i', // b = "hi"
                        0x09, 0x00, 0x00, 0x00, // c = 9
                    ],
                ),
            ),
            event(3003, XID, 1, &xid_body()),
        ],
    );

    p.converter.process_current_file().unwrap();

    // Version 1 holds the first insert.
    let v1 = read_all(&p.avro_dir.join("d.t.000001.avro"));
    assert_eq!(v1.len(), 1);

    // Version 2 has its own schema and data pair.
    assert!(p.avro_dir.join("d.t.000002.avsc").exists());
    let v2 = read_all(&p.avro_dir.join("d.t.000002.avro"));
    assert_eq!(v2.len(), 1);
    assert_eq!(v2[0]["a"], 7);
    assert_eq!(v2[0]["b"], "hi");
    assert_eq!(v2[0]["c"], 9);
}

#[test]
fn row_threshold_splits_blocks() {
    let mut p = pipeline(|config| config.group_rows = 1000);

    // 1500 one-column rows in a single event.
    let mut rows = Vec::new();
    for i in 0..1500u32 {
        rows.push(0b0000_0000);
        rows.extend_from_slice(&i.to_le_bytes());
    }

    write_binlog(
        &p.binlog_dir.join("binlog.000001"),
        &[
            event(4000, MARIADB_GTID, 1, &gtid_body(1, 0)),
            event(4000, QUERY, 1, &query_body("d", "CREATE TABLE big (n INT)")),
            event(4000, TABLE_MAP, 1, &table_map_body(8, "d", "big", &[(3, &[0])])),
            event(4001, WRITE_ROWS_V2, 1, &rows_body(8, 1, &[0b1], &rows)),
            event(4001, XID, 1, &xid_body()),
        ],
    );

    p.converter.process_current_file().unwrap();

    let mut reader = AvroReader::open(&p.avro_dir.join("d.big.000001.avro")).unwrap();
    let mut block_sizes = Vec::new();
    while reader.next_block().unwrap() {
        block_sizes.push(reader.records_in_block());
    }
    assert_eq!(block_sizes, [1000, 500]);
}

#[test]
fn each_transaction_closes_a_block() {
    let mut p = pipeline(|config| config.group_trx = 1);

    let one_row = |v: u32| {
        let mut row = vec![0b0000_0000];
        row.extend_from_slice(&v.to_le_bytes());
        row
    };

    write_binlog(
        &p.binlog_dir.join("binlog.000001"),
        &[
            event(5000, MARIADB_GTID, 1, &gtid_body(1, 0)),
            event(5000, QUERY, 1, &query_body("d", "CREATE TABLE t (n INT)")),
            event(5000, TABLE_MAP, 1, &table_map_body(3, "d", "t", &[(3, &[0])])),
            event(5001, WRITE_ROWS_V2, 1, &rows_body(3, 1, &[0b1], &one_row(1))),
            event(5001, XID, 1, &xid_body()),
            event(5002, MARIADB_GTID, 1, &gtid_body(2, 0)),
            event(5002, WRITE_ROWS_V2, 1, &rows_body(3, 1, &[0b1], &one_row(2))),
            event(5002, XID, 1, &xid_body()),
        ],
    );

    p.converter.process_current_file().unwrap();

    let mut reader = AvroReader::open(&p.avro_dir.join("d.t.000001.avro")).unwrap();
    let mut block_sizes = Vec::new();
    while reader.next_block().unwrap() {
        block_sizes.push(reader.records_in_block());
    }
    assert_eq!(block_sizes, [1, 1]);

    // The two transactions carried distinct GTIDs.
    let records = read_all(&p.avro_dir.join("d.t.000001.avro"));
    assert_eq!(records[0]["GTID"], "0-1-1");
    assert_eq!(records[1]["GTID"], "0-1-2");
}

#[test]
fn rotation_walks_to_the_next_file_and_indexes_gtids() {
    let mut p = pipeline(|_| {});

    write_binlog(
        &p.binlog_dir.join("binlog.000001"),
        &[
            event(6000, MARIADB_GTID, 1, &gtid_body(1, 0)),
            event(6000, QUERY, 1, &query_body("d", "CREATE TABLE t (n INT)")),
            event(6000, TABLE_MAP, 1, &table_map_body(3, "d", "t", &[(3, &[0])])),
            event(
                6001,
                WRITE_ROWS_V2,
                1,
                &rows_body(3, 1, &[0b1], &[0b0000_0000, 0x01, 0x00, 0x00, 0x00]),
            ),
            event(6001, XID, 1, &xid_body()),
            event(6001, ROTATE, 1, &rotate_body("binlog.000002")),
        ],
    );
    write_binlog(
        &p.binlog_dir.join("binlog.000002"),
        &[
            event(6002, MARIADB_GTID, 1, &gtid_body(2, 0)),
            event(6002, TABLE_MAP, 1, &table_map_body(3, "d", "t", &[(3, &[0])])),
            event(
                6003,
                WRITE_ROWS_V2,
                1,
                &rows_body(3, 1, &[0b1], &[0b0000_0000, 0x02, 0x00, 0x00, 0x00]),
            ),
            event(6003, XID, 1, &xid_body()),
        ],
    );

    let outcome = p.converter.process_current_file().unwrap();
    assert_eq!(
        outcome,
        ScanOutcome::Rotated(p.binlog_dir.join("binlog.000002"))
    );
    assert_eq!(
        p.converter.process_current_file().unwrap(),
        ScanOutcome::LastFile
    );

    // Both rows ended up in the same container, in order.
    let records = read_all(&p.avro_dir.join("d.t.000001.avro"));
    assert_eq!(records.len(), 2);
    assert_eq!(records[0]["n"], 1);
    assert_eq!(records[1]["n"], 2);

    // The index resolves both transactions to the file.
    p.converter.update_index().unwrap();
    assert!(p.avro_dir.join("gtid-index.json").exists());
}

#[test]
fn unchecksummed_stream_is_not_truncated() {
    let mut p = pipeline(|_| {});

    // binlog_checksum=NONE: the FORMAT_DESCRIPTION announces algorithm 0
    // and no event carries a CRC32 trailer. The ROTATE file name, the
    // CREATE TABLE text and the last row image all run to the body end.
    write_binlog(
        &p.binlog_dir.join("binlog.000001"),
        &[
            event(8000, FORMAT_DESCRIPTION, 1, &format_description_body(0)),
            event(8000, MARIADB_GTID, 1, &strip_checksum(gtid_body(1, 0))),
            event(
                8000,
                QUERY,
                1,
                &strip_checksum(query_body("d", "CREATE TABLE t (c0 INT, c1 VARCHAR(10))")),
            ),
            event(
                8000,
                TABLE_MAP,
                1,
                &strip_checksum(table_map_body(17, "d", "t", &[(3, &[0]), (15, &[0xff, 0x00])])),
            ),
            event(
                8001,
                WRITE_ROWS_V2,
                1,
                &strip_checksum(rows_body(17, 2, &[0b11], &long_varchar_row())),
            ),
            event(8001, XID, 1, &strip_checksum(xid_body())),
            event(8001, ROTATE, 1, &strip_checksum(rotate_body("binlog.000002"))),
        ],
    );
    write_binlog(
        &p.binlog_dir.join("binlog.000002"),
        &[
            event(8002, FORMAT_DESCRIPTION, 1, &format_description_body(0)),
            event(8002, MARIADB_GTID, 1, &strip_checksum(gtid_body(2, 0))),
            event(
                8002,
                TABLE_MAP,
                1,
                &strip_checksum(table_map_body(17, "d", "t", &[(3, &[0]), (15, &[0xff, 0x00])])),
            ),
            event(
                8003,
                WRITE_ROWS_V2,
                1,
                &strip_checksum(rows_body(17, 2, &[0b11], &long_varchar_row())),
            ),
            event(8003, XID, 1, &strip_checksum(xid_body())),
        ],
    );

    // The rotate target parsed without losing its last four characters.
    assert_eq!(
        p.converter.process_current_file().unwrap(),
        ScanOutcome::Rotated(p.binlog_dir.join("binlog.000002"))
    );
    assert_eq!(
        p.converter.process_current_file().unwrap(),
        ScanOutcome::LastFile
    );

    let records = read_all(&p.avro_dir.join("d.t.000001.avro"));
    assert_eq!(records.len(), 2);
    // The VARCHAR at the end of each row image survived intact.
    assert_eq!(records[0]["c1"], "abc");
    assert_eq!(records[1]["c1"], "abc");
    assert_eq!(records[1]["GTID"], "0-1-2");
}

#[test]
fn rows_for_untracked_tables_are_skipped() {
    let mut p = pipeline(|_| {});

    // No CREATE TABLE: the table map cannot be matched.
    write_binlog(
        &p.binlog_dir.join("binlog.000001"),
        &[
            event(7000, MARIADB_GTID, 1, &gtid_body(1, 0)),
            event(7000, TABLE_MAP, 1, &table_map_body(3, "d", "ghost", &[(3, &[0])])),
            event(
                7001,
                WRITE_ROWS_V2,
                1,
                &rows_body(3, 1, &[0b1], &[0b0000_0000, 0x01, 0x00, 0x00, 0x00]),
            ),
        ],
    );

    assert_eq!(
        p.converter.process_current_file().unwrap(),
        ScanOutcome::LastFile
    );
    assert!(!p.avro_dir.join("d.ghost.000001.avro").exists());
    assert_eq!(p.converter.stats().rows, 0);
}
