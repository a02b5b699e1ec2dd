//! Binlog v4 event builders
//!
//! Produces events the way a MySQL 8.0 source writes them: v2 rows events,
//! 6-byte table ids, optional CRC32 trailer. The builder tracks the log file
//! and offset so `next_position` fields line up with what a real source sends.

use sluice_cdc::mysql::LOG_EVENT_ARTIFICIAL_F;

const HEADER_LEN: usize = 19;
const SERVER_ID: u32 = 1;

const QUERY_EVENT: u8 = 2;
const ROTATE_EVENT: u8 = 4;
const FORMAT_DESCRIPTION_EVENT: u8 = 15;
const XID_EVENT: u8 = 16;
const TABLE_MAP_EVENT: u8 = 19;
const HEARTBEAT_LOG_EVENT: u8 = 27;
const WRITE_ROWS_EVENT_V2: u8 = 30;
const UPDATE_ROWS_EVENT_V2: u8 = 31;
const DELETE_ROWS_EVENT_V2: u8 = 32;
const GTID_LOG_EVENT: u8 = 33;

/// Column of a scripted table.
#[derive(Debug, Clone, Copy)]
pub enum ColumnSpec {
    /// INT
    Int,
    /// BIGINT
    BigInt,
    /// VARCHAR(n), n < 256
    Varchar(u8),
}

impl ColumnSpec {
    fn type_code(self) -> u8 {
        match self {
            ColumnSpec::Int => 3,
            ColumnSpec::BigInt => 8,
            ColumnSpec::Varchar(_) => 15,
        }
    }
}

/// Table layout announced by a TABLE_MAP event.
#[derive(Debug, Clone)]
pub struct TableSpec {
    pub table_id: u64,
    pub schema: String,
    pub table: String,
    pub columns: Vec<(String, ColumnSpec)>,
    /// Log column names as optional metadata (binlog_row_metadata=FULL)
    pub with_names: bool,
}

impl TableSpec {
    pub fn new(table_id: u64, schema: &str, table: &str, columns: &[(&str, ColumnSpec)]) -> Self {
        Self {
            table_id,
            schema: schema.to_string(),
            table: table.to_string(),
            columns: columns
                .iter()
                .map(|(name, spec)| (name.to_string(), *spec))
                .collect(),
            with_names: true,
        }
    }

    pub fn without_names(mut self) -> Self {
        self.with_names = false;
        self
    }

    /// The `users` table used throughout the session tests.
    pub fn users(table_id: u64) -> Self {
        Self::new(
            table_id,
            "app",
            "users",
            &[
                ("id", ColumnSpec::Int),
                ("username", ColumnSpec::Varchar(64)),
                ("password", ColumnSpec::Varchar(64)),
                ("login_count", ColumnSpec::Int),
            ],
        )
    }
}

/// One column value in a row image.
#[derive(Debug, Clone)]
pub enum Cell {
    Null,
    Int(i32),
    BigInt(i64),
    Str(String),
}

impl From<&str> for Cell {
    fn from(s: &str) -> Self {
        Cell::Str(s.to_string())
    }
}

impl From<i32> for Cell {
    fn from(v: i32) -> Self {
        Cell::Int(v)
    }
}

/// Builds consecutive events of one binlog.
#[derive(Debug, Clone)]
pub struct BinlogBuilder {
    file: String,
    offset: u32,
    crc: bool,
    timestamp: u32,
}

impl BinlogBuilder {
    /// Events starting at `offset` of `file`.
    pub fn new(file: &str, offset: u32) -> Self {
        Self {
            file: file.to_string(),
            offset,
            crc: false,
            timestamp: 1_700_000_000,
        }
    }

    /// Append CRC32 checksums (binlog_checksum=CRC32).
    pub fn with_crc(mut self) -> Self {
        self.crc = true;
        self
    }

    pub fn file(&self) -> &str {
        &self.file
    }

    /// Offset the next event will start at.
    pub fn offset(&self) -> u64 {
        self.offset as u64
    }

    fn frame(&mut self, type_code: u8, flags: u16, payload: &[u8], advance: bool) -> Vec<u8> {
        let len = HEADER_LEN + payload.len() + if self.crc { 4 } else { 0 };
        let next_position = if advance { self.offset + len as u32 } else { 0 };
        let mut data = header(self.timestamp, type_code, len, next_position, flags);
        data.extend_from_slice(payload);
        if self.crc {
            let sum = crc32fast::hash(&data);
            data.extend_from_slice(&sum.to_le_bytes());
        }
        if advance {
            self.offset = next_position;
        }
        data
    }

    /// The artificial ROTATE a source sends first on every dump.
    pub fn artificial_rotate(&mut self) -> Vec<u8> {
        let payload = rotate_payload(self.offset as u64, &self.file);
        self.frame(ROTATE_EVENT, LOG_EVENT_ARTIFICIAL_F, &payload, false)
    }

    /// FORMAT_DESCRIPTION as replayed at the start of a dump.
    ///
    /// A non-zero `create_timestamp` marks a freshly started source.
    pub fn format_description(&mut self, create_timestamp: u32) -> Vec<u8> {
        let mut p = Vec::new();
        p.extend_from_slice(&4u16.to_le_bytes());
        let mut version = [0u8; 50];
        version[..6].copy_from_slice(b"8.0.36");
        p.extend_from_slice(&version);
        p.extend_from_slice(&create_timestamp.to_le_bytes());
        p.push(HEADER_LEN as u8);
        let mut lengths = vec![0u8; 41];
        lengths[(QUERY_EVENT - 1) as usize] = 13;
        lengths[(ROTATE_EVENT - 1) as usize] = 8;
        lengths[(TABLE_MAP_EVENT - 1) as usize] = 8;
        for code in WRITE_ROWS_EVENT_V2..=DELETE_ROWS_EVENT_V2 {
            lengths[(code - 1) as usize] = 10;
        }
        p.extend_from_slice(&lengths);
        p.push(u8::from(self.crc));

        // The checksum slot is present even when checksums are off
        let len = HEADER_LEN + p.len() + 4;
        let mut data = header(self.timestamp, FORMAT_DESCRIPTION_EVENT, len, 0, 0);
        data.extend_from_slice(&p);
        let sum = if self.crc { crc32fast::hash(&data) } else { 0 };
        data.extend_from_slice(&sum.to_le_bytes());
        data
    }

    /// A real ROTATE closing the current file; the builder continues in `next_file`.
    pub fn rotate(&mut self, next_file: &str) -> Vec<u8> {
        let payload = rotate_payload(4, next_file);
        let event = self.frame(ROTATE_EVENT, 0, &payload, true);
        self.file = next_file.to_string();
        self.offset = 4;
        event
    }

    pub fn heartbeat(&mut self) -> Vec<u8> {
        let payload = self.file.clone().into_bytes();
        let len = HEADER_LEN + payload.len() + if self.crc { 4 } else { 0 };
        // Heartbeats carry the current position without moving it
        let mut data = header(0, HEARTBEAT_LOG_EVENT, len, self.offset, LOG_EVENT_ARTIFICIAL_F);
        data.extend_from_slice(&payload);
        if self.crc {
            let sum = crc32fast::hash(&data);
            data.extend_from_slice(&sum.to_le_bytes());
        }
        data
    }

    pub fn query(&mut self, schema: &str, sql: &str) -> Vec<u8> {
        let mut p = Vec::new();
        p.extend_from_slice(&7u32.to_le_bytes()); // thread id
        p.extend_from_slice(&0u32.to_le_bytes()); // exec time
        p.push(schema.len() as u8);
        p.extend_from_slice(&0u16.to_le_bytes()); // error code
        p.extend_from_slice(&0u16.to_le_bytes()); // status vars
        p.extend_from_slice(schema.as_bytes());
        p.push(0);
        p.extend_from_slice(sql.as_bytes());
        self.frame(QUERY_EVENT, 0, &p, true)
    }

    pub fn begin(&mut self) -> Vec<u8> {
        self.query("", "BEGIN")
    }

    pub fn xid(&mut self, xid: u64) -> Vec<u8> {
        self.frame(XID_EVENT, 0, &xid.to_le_bytes(), true)
    }

    pub fn gtid(&mut self, uuid: [u8; 16], gno: u64) -> Vec<u8> {
        let mut p = vec![1u8];
        p.extend_from_slice(&uuid);
        p.extend_from_slice(&gno.to_le_bytes());
        self.frame(GTID_LOG_EVENT, 0, &p, true)
    }

    pub fn table_map(&mut self, table: &TableSpec) -> Vec<u8> {
        let mut p = Vec::new();
        p.extend_from_slice(&table.table_id.to_le_bytes()[..6]);
        p.extend_from_slice(&1u16.to_le_bytes());
        p.push(table.schema.len() as u8);
        p.extend_from_slice(table.schema.as_bytes());
        p.push(0);
        p.push(table.table.len() as u8);
        p.extend_from_slice(table.table.as_bytes());
        p.push(0);

        p.push(table.columns.len() as u8);
        p.extend(table.columns.iter().map(|(_, spec)| spec.type_code()));

        let mut metadata = Vec::new();
        for (_, spec) in &table.columns {
            if let ColumnSpec::Varchar(max) = spec {
                metadata.extend_from_slice(&(*max as u16).to_le_bytes());
            }
        }
        p.push(metadata.len() as u8);
        p.extend_from_slice(&metadata);

        // Every column nullable
        p.extend(std::iter::repeat(0xFF).take(table.columns.len().div_ceil(8)));

        if table.with_names {
            let mut names = Vec::new();
            for (name, _) in &table.columns {
                names.push(name.len() as u8);
                names.extend_from_slice(name.as_bytes());
            }
            p.push(4); // COLUMN_NAME
            p.push(names.len() as u8);
            p.extend_from_slice(&names);
        }

        self.frame(TABLE_MAP_EVENT, 0, &p, true)
    }

    pub fn write_rows(&mut self, table: &TableSpec, rows: &[Vec<Cell>]) -> Vec<u8> {
        let mut p = rows_header(table, false);
        for row in rows {
            encode_image(&mut p, table, row);
        }
        self.frame(WRITE_ROWS_EVENT_V2, 0, &p, true)
    }

    pub fn update_rows(&mut self, table: &TableSpec, rows: &[(Vec<Cell>, Vec<Cell>)]) -> Vec<u8> {
        let mut p = rows_header(table, true);
        for (before, after) in rows {
            encode_image(&mut p, table, before);
            encode_image(&mut p, table, after);
        }
        self.frame(UPDATE_ROWS_EVENT_V2, 0, &p, true)
    }

    pub fn delete_rows(&mut self, table: &TableSpec, rows: &[Vec<Cell>]) -> Vec<u8> {
        let mut p = rows_header(table, false);
        for row in rows {
            encode_image(&mut p, table, row);
        }
        self.frame(DELETE_ROWS_EVENT_V2, 0, &p, true)
    }
}

fn header(timestamp: u32, type_code: u8, len: usize, next_position: u32, flags: u16) -> Vec<u8> {
    let mut data = Vec::with_capacity(len);
    data.extend_from_slice(&timestamp.to_le_bytes());
    data.push(type_code);
    data.extend_from_slice(&SERVER_ID.to_le_bytes());
    data.extend_from_slice(&(len as u32).to_le_bytes());
    data.extend_from_slice(&next_position.to_le_bytes());
    data.extend_from_slice(&flags.to_le_bytes());
    data
}

fn rotate_payload(position: u64, file: &str) -> Vec<u8> {
    let mut p = position.to_le_bytes().to_vec();
    p.extend_from_slice(file.as_bytes());
    p
}

fn rows_header(table: &TableSpec, update: bool) -> Vec<u8> {
    let mut p = Vec::new();
    p.extend_from_slice(&table.table_id.to_le_bytes()[..6]);
    p.extend_from_slice(&1u16.to_le_bytes()); // STMT_END_F
    p.extend_from_slice(&2u16.to_le_bytes()); // no extra data
    p.push(table.columns.len() as u8);
    let bitmap_len = table.columns.len().div_ceil(8);
    let present = full_bitmap(table.columns.len());
    p.extend_from_slice(&present[..bitmap_len]);
    if update {
        p.extend_from_slice(&present[..bitmap_len]);
    }
    p
}

fn full_bitmap(columns: usize) -> Vec<u8> {
    let mut bitmap = vec![0u8; columns.div_ceil(8)];
    for i in 0..columns {
        bitmap[i / 8] |= 1 << (i % 8);
    }
    bitmap
}

fn encode_image(p: &mut Vec<u8>, table: &TableSpec, row: &[Cell]) {
    assert_eq!(row.len(), table.columns.len(), "row width must match the table");

    let mut nulls = vec![0u8; row.len().div_ceil(8)];
    for (i, cell) in row.iter().enumerate() {
        if matches!(cell, Cell::Null) {
            nulls[i / 8] |= 1 << (i % 8);
        }
    }
    p.extend_from_slice(&nulls);

    for cell in row {
        match cell {
            Cell::Null => {}
            Cell::Int(v) => p.extend_from_slice(&v.to_le_bytes()),
            Cell::BigInt(v) => p.extend_from_slice(&v.to_le_bytes()),
            Cell::Str(s) => {
                p.push(s.len() as u8);
                p.extend_from_slice(s.as_bytes());
            }
        }
    }
}
