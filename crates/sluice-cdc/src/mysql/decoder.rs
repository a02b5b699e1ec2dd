//! MySQL binlog event decoder
//!
//! Decodes MySQL binary log (v4) events:
//! - FORMAT_DESCRIPTION_EVENT
//! - ROTATE_EVENT
//! - TABLE_MAP_EVENT (including optional metadata: signedness, column names, primary key)
//! - WRITE_ROWS_EVENT / UPDATE_ROWS_EVENT / DELETE_ROWS_EVENT (v1 and v2)
//! - XID_EVENT and QUERY_EVENT (transaction boundaries, DDL)
//! - GTID_LOG_EVENT / ANONYMOUS_GTID_LOG_EVENT
//! - HEARTBEAT_LOG_EVENT
//!
//! Decoding is a pure function of the event bytes, the active
//! [`FormatDescription`] and the [`SchemaContext`]; the caller owns both and
//! applies the side effects (registering table maps, switching formats).
//! Any malformed payload is a [`CdcError::Decode`], never a panic and never a
//! silently skipped event.

use bytes::Bytes;
use tracing::{debug, trace};

use super::json::decode_json_binary;
use super::reader::ByteReader;
use super::schema::{ColumnDescriptor, SchemaContext};
use crate::common::{CdcError, Result, Value};

/// Event was generated by the source for the replica, not read from a log file.
pub const LOG_EVENT_ARTIFICIAL_F: u16 = 0x0020;

/// Length of the CRC32 trailer on checksummed events.
const CHECKSUM_LEN: usize = 4;

/// FDE fields before the post-header length table: version(2) + server version(50)
/// + create timestamp(4) + header length(1)
const FDE_FIXED_LEN: usize = 57;

/// Binlog event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EventType {
    Unknown = 0,
    StartEventV3 = 1,
    QueryEvent = 2,
    StopEvent = 3,
    RotateEvent = 4,
    IntvarEvent = 5,
    RandEvent = 13,
    UserVarEvent = 14,
    FormatDescriptionEvent = 15,
    XidEvent = 16,
    BeginLoadQueryEvent = 17,
    ExecuteLoadQueryEvent = 18,
    TableMapEvent = 19,
    PreGaWriteRowsEvent = 20,
    PreGaUpdateRowsEvent = 21,
    PreGaDeleteRowsEvent = 22,
    WriteRowsEventV1 = 23,
    UpdateRowsEventV1 = 24,
    DeleteRowsEventV1 = 25,
    IncidentEvent = 26,
    HeartbeatLogEvent = 27,
    IgnorableLogEvent = 28,
    RowsQueryLogEvent = 29,
    WriteRowsEventV2 = 30,
    UpdateRowsEventV2 = 31,
    DeleteRowsEventV2 = 32,
    GtidLogEvent = 33,
    AnonymousGtidLogEvent = 34,
    PreviousGtidsLogEvent = 35,
    TransactionContextEvent = 36,
    ViewChangeEvent = 37,
    XaPrepareLogEvent = 38,
    PartialUpdateRowsEvent = 39,
    TransactionPayloadEvent = 40,
    HeartbeatLogEventV2 = 41,
}

impl EventType {
    /// Map a wire type code. Codes this client does not know become `Unknown`
    /// and are skipped, so newer sources can add event types.
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => EventType::StartEventV3,
            2 => EventType::QueryEvent,
            3 => EventType::StopEvent,
            4 => EventType::RotateEvent,
            5 => EventType::IntvarEvent,
            13 => EventType::RandEvent,
            14 => EventType::UserVarEvent,
            15 => EventType::FormatDescriptionEvent,
            16 => EventType::XidEvent,
            17 => EventType::BeginLoadQueryEvent,
            18 => EventType::ExecuteLoadQueryEvent,
            19 => EventType::TableMapEvent,
            20 => EventType::PreGaWriteRowsEvent,
            21 => EventType::PreGaUpdateRowsEvent,
            22 => EventType::PreGaDeleteRowsEvent,
            23 => EventType::WriteRowsEventV1,
            24 => EventType::UpdateRowsEventV1,
            25 => EventType::DeleteRowsEventV1,
            26 => EventType::IncidentEvent,
            27 => EventType::HeartbeatLogEvent,
            28 => EventType::IgnorableLogEvent,
            29 => EventType::RowsQueryLogEvent,
            30 => EventType::WriteRowsEventV2,
            31 => EventType::UpdateRowsEventV2,
            32 => EventType::DeleteRowsEventV2,
            33 => EventType::GtidLogEvent,
            34 => EventType::AnonymousGtidLogEvent,
            35 => EventType::PreviousGtidsLogEvent,
            36 => EventType::TransactionContextEvent,
            37 => EventType::ViewChangeEvent,
            38 => EventType::XaPrepareLogEvent,
            39 => EventType::PartialUpdateRowsEvent,
            40 => EventType::TransactionPayloadEvent,
            41 => EventType::HeartbeatLogEventV2,
            _ => EventType::Unknown,
        }
    }

    pub fn is_row_event(&self) -> bool {
        matches!(
            self,
            EventType::WriteRowsEventV1
                | EventType::WriteRowsEventV2
                | EventType::UpdateRowsEventV1
                | EventType::UpdateRowsEventV2
                | EventType::DeleteRowsEventV1
                | EventType::DeleteRowsEventV2
        )
    }
}

/// MySQL column types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ColumnType {
    Decimal = 0,
    Tiny = 1,
    Short = 2,
    Long = 3,
    Float = 4,
    Double = 5,
    Null = 6,
    Timestamp = 7,
    LongLong = 8,
    Int24 = 9,
    Date = 10,
    Time = 11,
    DateTime = 12,
    Year = 13,
    NewDate = 14,
    Varchar = 15,
    Bit = 16,
    Timestamp2 = 17,
    DateTime2 = 18,
    Time2 = 19,
    TypedArray = 20,
    Json = 245,
    NewDecimal = 246,
    Enum = 247,
    Set = 248,
    TinyBlob = 249,
    MediumBlob = 250,
    LongBlob = 251,
    Blob = 252,
    VarString = 253,
    String = 254,
    Geometry = 255,
}

impl ColumnType {
    /// Map a wire type code; unknown codes are a decode error because the
    /// width of the value, and therefore the rest of the row, is unknown.
    pub fn from_u8(value: u8) -> Result<Self> {
        Ok(match value {
            0 => ColumnType::Decimal,
            1 => ColumnType::Tiny,
            2 => ColumnType::Short,
            3 => ColumnType::Long,
            4 => ColumnType::Float,
            5 => ColumnType::Double,
            6 => ColumnType::Null,
            7 => ColumnType::Timestamp,
            8 => ColumnType::LongLong,
            9 => ColumnType::Int24,
            10 => ColumnType::Date,
            11 => ColumnType::Time,
            12 => ColumnType::DateTime,
            13 => ColumnType::Year,
            14 => ColumnType::NewDate,
            15 => ColumnType::Varchar,
            16 => ColumnType::Bit,
            17 => ColumnType::Timestamp2,
            18 => ColumnType::DateTime2,
            19 => ColumnType::Time2,
            20 => ColumnType::TypedArray,
            245 => ColumnType::Json,
            246 => ColumnType::NewDecimal,
            247 => ColumnType::Enum,
            248 => ColumnType::Set,
            249 => ColumnType::TinyBlob,
            250 => ColumnType::MediumBlob,
            251 => ColumnType::LongBlob,
            252 => ColumnType::Blob,
            253 => ColumnType::VarString,
            254 => ColumnType::String,
            255 => ColumnType::Geometry,
            other => {
                return Err(CdcError::decode(format!("unknown column type {}", other)));
            }
        })
    }

    /// Types covered by the table map SIGNEDNESS bitmap.
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            ColumnType::Tiny
                | ColumnType::Short
                | ColumnType::Int24
                | ColumnType::Long
                | ColumnType::LongLong
                | ColumnType::Float
                | ColumnType::Double
                | ColumnType::NewDecimal
                | ColumnType::Decimal
        )
    }
}

impl TryFrom<u8> for ColumnType {
    type Error = CdcError;

    fn try_from(value: u8) -> Result<Self> {
        Self::from_u8(value)
    }
}

/// Binlog event header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventHeader {
    pub timestamp: u32,
    pub event_type: EventType,
    /// Raw type code, kept for event types this client does not name
    pub type_code: u8,
    pub server_id: u32,
    pub event_length: u32,
    pub next_position: u32,
    pub flags: u16,
}

impl EventHeader {
    pub const SIZE: usize = 19;

    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(CdcError::decode(format!(
                "Event header too short: {} bytes",
                data.len()
            )));
        }

        let mut r = ByteReader::new(data);
        let timestamp = r.u32_le()?;
        let type_code = r.u8()?;
        let server_id = r.u32_le()?;
        let event_length = r.u32_le()?;
        let next_position = r.u32_le()?;
        let flags = r.u16_le()?;

        Ok(Self {
            timestamp,
            event_type: EventType::from_u8(type_code),
            type_code,
            server_id,
            event_length,
            next_position,
            flags,
        })
    }

    /// Synthesized by the source (e.g. the ROTATE that opens every dump).
    pub fn is_artificial(&self) -> bool {
        self.flags & LOG_EVENT_ARTIFICIAL_F != 0
    }
}

/// Event checksum algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChecksumAlgorithm {
    #[default]
    None,
    Crc32,
}

impl ChecksumAlgorithm {
    fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 | 0xFF => Ok(Self::None),
            1 => Ok(Self::Crc32),
            other => Err(CdcError::decode(format!(
                "unknown checksum algorithm {}",
                other
            ))),
        }
    }
}

/// Format description: how the events that follow are laid out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatDescription {
    pub binlog_version: u16,
    pub server_version: String,
    /// Non-zero when the source (re)started and wrote a fresh log
    pub create_timestamp: u32,
    pub header_length: u8,
    /// Post-header length per event type, indexed by `type_code - 1`
    pub post_header_lengths: Vec<u8>,
    pub checksum: ChecksumAlgorithm,
}

impl FormatDescription {
    /// Layout assumed before the source's own description arrives.
    pub fn initial(checksum: ChecksumAlgorithm) -> Self {
        Self {
            binlog_version: 4,
            server_version: String::new(),
            create_timestamp: 0,
            header_length: EventHeader::SIZE as u8,
            post_header_lengths: Vec::new(),
            checksum,
        }
    }

    pub fn post_header_len(&self, type_code: u8) -> Option<u8> {
        (type_code as usize)
            .checked_sub(1)
            .and_then(|idx| self.post_header_lengths.get(idx))
            .copied()
    }

    /// Table ids are 4 bytes on sources with a 6-byte post-header, else 6.
    fn table_id_size(&self, type_code: u8) -> usize {
        if self.post_header_len(type_code) == Some(6) {
            4
        } else {
            6
        }
    }
}

/// Decoded binlog event body
#[derive(Debug, Clone, PartialEq)]
pub enum BinlogEvent {
    /// Format description - contains binlog format info
    FormatDescription(FormatDescription),

    /// Switch to another log file
    Rotate(RotateEvent),

    /// Table map - maps table ID to schema
    TableMap(TableMapEvent),

    /// Row insert, update or delete
    Rows(RowsEvent),

    /// Transaction commit
    Xid(XidEvent),

    /// Statement (BEGIN/COMMIT markers and DDL in row-based logs)
    Query(QueryEvent),

    /// GTID for the following transaction
    Gtid(GtidEvent),

    /// Keepalive from an idle source
    Heartbeat,

    /// Event with no effect on replication state; carries the type code
    Ignored(u8),
}

/// One decoded event.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEvent {
    pub header: EventHeader,
    /// Body bytes after the header, checksum stripped
    pub payload: Bytes,
    pub event: BinlogEvent,
}

/// Rotate event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotateEvent {
    pub position: u64,
    pub next_binlog: String,
}

/// Table map event - describes table structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableMapEvent {
    pub table_id: u64,
    pub flags: u16,
    pub schema_name: String,
    pub table_name: String,
    pub column_types: Vec<ColumnType>,
    pub column_metadata: Vec<u16>,
    pub nullable: Vec<bool>,
    /// Per column; all `false` when the source sent no SIGNEDNESS metadata
    pub unsigned: Vec<bool>,
    /// Present when the source runs with `binlog_row_metadata=FULL`
    pub column_names: Option<Vec<String>>,
    pub primary_key: Vec<usize>,
}

impl TableMapEvent {
    pub fn column_count(&self) -> usize {
        self.column_types.len()
    }
}

/// Rows event kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowsKind {
    Write,
    Update,
    Delete,
}

/// Rows event (INSERT/UPDATE/DELETE)
#[derive(Debug, Clone, PartialEq)]
pub struct RowsEvent {
    pub kind: RowsKind,
    pub table_id: u64,
    pub flags: u16,
    pub column_count: usize,
    pub rows: Vec<RowData>,
}

/// Row images. Values are in table column order; columns missing from the
/// image are [`Value::Omitted`].
#[derive(Debug, Clone, PartialEq)]
pub struct RowData {
    pub before: Option<Vec<Value>>,
    pub after: Option<Vec<Value>>,
}

/// XID event (transaction commit)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XidEvent {
    pub xid: u64,
}

/// What a QUERY event means for replication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    Begin,
    Commit,
    Rollback,
    /// Schema change; cached column names may be stale
    Ddl,
    Other,
}

/// Query event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryEvent {
    pub thread_id: u32,
    pub exec_time: u32,
    pub error_code: u16,
    pub schema: String,
    pub query: String,
}

impl QueryEvent {
    pub fn kind(&self) -> QueryKind {
        let statement = self.query.trim_start();
        let mut words = statement.split_whitespace();
        let first = words.next().unwrap_or("").to_ascii_uppercase();
        match first.as_str() {
            "BEGIN" => QueryKind::Begin,
            "COMMIT" => QueryKind::Commit,
            // ROLLBACK TO SAVEPOINT stays inside the transaction
            "ROLLBACK" if words.next().is_none() => QueryKind::Rollback,
            "CREATE" | "ALTER" | "DROP" | "RENAME" | "TRUNCATE" => QueryKind::Ddl,
            _ => QueryKind::Other,
        }
    }
}

/// GTID event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GtidEvent {
    pub flags: u8,
    pub uuid: [u8; 16],
    pub gno: u64,
    pub anonymous: bool,
}

impl GtidEvent {
    pub fn uuid_string(&self) -> String {
        format!(
            "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
            self.uuid[0], self.uuid[1], self.uuid[2], self.uuid[3],
            self.uuid[4], self.uuid[5],
            self.uuid[6], self.uuid[7],
            self.uuid[8], self.uuid[9],
            self.uuid[10], self.uuid[11], self.uuid[12], self.uuid[13], self.uuid[14], self.uuid[15]
        )
    }

    /// `uuid:gno`, or `None` for anonymous transactions.
    pub fn gtid_string(&self) -> Option<String> {
        (!self.anonymous).then(|| format!("{}:{}", self.uuid_string(), self.gno))
    }
}

/// Stateless binlog event decoder.
#[derive(Debug, Clone, Copy)]
pub struct EventDecoder {
    verify_checksum: bool,
}

impl Default for EventDecoder {
    fn default() -> Self {
        Self::new(true)
    }
}

impl EventDecoder {
    pub fn new(verify_checksum: bool) -> Self {
        Self { verify_checksum }
    }

    /// Decode one event.
    ///
    /// `format` describes the layout in effect (the last FORMAT_DESCRIPTION
    /// seen, or [`FormatDescription::initial`] before the first one) and
    /// `schema` resolves the table ids rows events refer to.
    pub fn decode(
        &self,
        data: &Bytes,
        format: &FormatDescription,
        schema: &SchemaContext,
    ) -> Result<RawEvent> {
        let header = EventHeader::parse(data)?;
        if header.event_length as usize != data.len() {
            return Err(CdcError::decode(format!(
                "Event length mismatch: header says {}, received {}",
                header.event_length,
                data.len()
            )));
        }

        let body_end = if header.event_type == EventType::FormatDescriptionEvent {
            self.fde_body_end(data)?
        } else {
            self.body_end(data, format.checksum)?
        };
        let payload = data.slice(EventHeader::SIZE..body_end);

        trace!(
            "Decoding {:?} event, {} bytes total, {} bytes payload",
            header.event_type,
            data.len(),
            payload.len()
        );

        let event = match header.event_type {
            EventType::FormatDescriptionEvent => BinlogEvent::FormatDescription(
                decode_format_description(&data[EventHeader::SIZE..])?,
            ),
            EventType::RotateEvent => BinlogEvent::Rotate(decode_rotate(&payload)?),
            EventType::TableMapEvent => {
                BinlogEvent::TableMap(decode_table_map(&payload, format, header.type_code)?)
            }
            EventType::WriteRowsEventV1 | EventType::WriteRowsEventV2 => BinlogEvent::Rows(
                decode_rows_event(&payload, format, &header, RowsKind::Write, schema)?,
            ),
            EventType::UpdateRowsEventV1 | EventType::UpdateRowsEventV2 => BinlogEvent::Rows(
                decode_rows_event(&payload, format, &header, RowsKind::Update, schema)?,
            ),
            EventType::DeleteRowsEventV1 | EventType::DeleteRowsEventV2 => BinlogEvent::Rows(
                decode_rows_event(&payload, format, &header, RowsKind::Delete, schema)?,
            ),
            EventType::XidEvent => BinlogEvent::Xid(decode_xid(&payload)?),
            EventType::QueryEvent => BinlogEvent::Query(decode_query(&payload)?),
            EventType::GtidLogEvent => BinlogEvent::Gtid(decode_gtid(&payload, false)?),
            EventType::AnonymousGtidLogEvent => BinlogEvent::Gtid(decode_gtid(&payload, true)?),
            EventType::HeartbeatLogEvent | EventType::HeartbeatLogEventV2 => BinlogEvent::Heartbeat,
            EventType::PartialUpdateRowsEvent => {
                return Err(CdcError::unsupported(
                    "PARTIAL_UPDATE_ROWS_EVENT (binlog_row_value_options=PARTIAL_JSON); \
                     set binlog_row_value_options='' on the source",
                ));
            }
            EventType::TransactionPayloadEvent => {
                return Err(CdcError::unsupported(
                    "TRANSACTION_PAYLOAD_EVENT (binlog_transaction_compression=ON); \
                     disable binlog compression on the source",
                ));
            }
            EventType::PreGaWriteRowsEvent
            | EventType::PreGaUpdateRowsEvent
            | EventType::PreGaDeleteRowsEvent => {
                return Err(CdcError::unsupported(format!(
                    "pre-GA rows event type {}",
                    header.type_code
                )));
            }
            other => {
                debug!("Ignoring event type {:?} ({})", other, header.type_code);
                BinlogEvent::Ignored(header.type_code)
            }
        };

        Ok(RawEvent {
            header,
            payload,
            event,
        })
    }

    /// End of the body for ordinary events, after verifying any checksum.
    fn body_end(&self, data: &[u8], checksum: ChecksumAlgorithm) -> Result<usize> {
        match checksum {
            ChecksumAlgorithm::None => Ok(data.len()),
            ChecksumAlgorithm::Crc32 => {
                if data.len() < EventHeader::SIZE + CHECKSUM_LEN {
                    return Err(CdcError::decode("Event too short to carry a checksum"));
                }
                let end = data.len() - CHECKSUM_LEN;
                if self.verify_checksum {
                    verify_crc32(&data[..end], &data[end..])?;
                }
                Ok(end)
            }
        }
    }

    /// FORMAT_DESCRIPTION events describe their own checksum.
    fn fde_body_end(&self, data: &[u8]) -> Result<usize> {
        let payload = &data[EventHeader::SIZE..];
        if payload.len() < FDE_FIXED_LEN {
            return Err(CdcError::decode(format!(
                "Format description too short: {} bytes",
                payload.len()
            )));
        }
        if !version_has_checksum(&fde_server_version(payload)) {
            return Ok(data.len());
        }
        if payload.len() < FDE_FIXED_LEN + 1 + CHECKSUM_LEN {
            return Err(CdcError::decode("Format description lacks checksum fields"));
        }
        // The 4-byte checksum slot exists even when checksums are off
        let end = data.len() - CHECKSUM_LEN;
        let alg = ChecksumAlgorithm::from_u8(data[end - 1])?;
        if alg == ChecksumAlgorithm::Crc32 && self.verify_checksum {
            verify_crc32(&data[..end], &data[end..])?;
        }
        Ok(end)
    }
}

fn verify_crc32(body: &[u8], trailer: &[u8]) -> Result<()> {
    let expected = ByteReader::new(trailer).u32_le()?;
    let actual = crc32fast::hash(body);
    if expected != actual {
        return Err(CdcError::ChecksumMismatch { expected, actual });
    }
    Ok(())
}

fn fde_server_version(payload: &[u8]) -> String {
    let raw = payload.get(2..52).unwrap_or(&[]);
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

/// Returns `true` when the server version writes a checksum algorithm byte
/// (and checksum slot) into its format description.
///
/// MySQL 5.6.1+ and MariaDB 5.3+.
fn version_has_checksum(version: &str) -> bool {
    let numbers: Vec<u32> = version
        .split(|c: char| !c.is_ascii_digit())
        .take(3)
        .map(|part| part.parse().unwrap_or(0))
        .collect();
    let major = numbers.first().copied().unwrap_or(0);
    let minor = numbers.get(1).copied().unwrap_or(0);
    let patch = numbers.get(2).copied().unwrap_or(0);

    if version.contains("MariaDB") {
        return (major, minor) >= (5, 3);
    }
    (major, minor, patch) >= (5, 6, 1)
}

/// Decode a Format Description Event.
///
/// ```text
/// [binlog_version: 2] [server_version: 50] [create_timestamp: 4]
/// [header_length: 1] [post_header_lengths: N] [checksum_alg: 1] [crc32: 4]
/// ```
///
/// The last two fields only exist on servers that support checksums.
/// `data` is the full payload including the checksum slot.
fn decode_format_description(data: &[u8]) -> Result<FormatDescription> {
    let mut r = ByteReader::new(data);
    let binlog_version = r.u16_le()?;
    r.skip(50)?;
    let server_version = fde_server_version(data);
    let create_timestamp = r.u32_le()?;
    let header_length = r.u8()?;

    let (post_header_lengths, checksum) = if version_has_checksum(&server_version) {
        let table_end = data.len() - 1 - CHECKSUM_LEN;
        (
            data[FDE_FIXED_LEN..table_end].to_vec(),
            ChecksumAlgorithm::from_u8(data[table_end])?,
        )
    } else {
        (data[FDE_FIXED_LEN..].to_vec(), ChecksumAlgorithm::None)
    };

    debug!(
        "FDE: binlog_version={}, server={}, checksum={:?}",
        binlog_version, server_version, checksum
    );

    Ok(FormatDescription {
        binlog_version,
        server_version,
        create_timestamp,
        header_length,
        post_header_lengths,
        checksum,
    })
}

fn decode_rotate(data: &[u8]) -> Result<RotateEvent> {
    let mut r = ByteReader::new(data);
    let position = r.u64_le()?;
    let name = r.rest();
    let end = name.iter().position(|&b| b == 0).unwrap_or(name.len());
    let next_binlog = String::from_utf8_lossy(&name[..end]).into_owned();
    if next_binlog.is_empty() {
        return Err(CdcError::decode("Rotate event without a log name"));
    }
    Ok(RotateEvent {
        position,
        next_binlog,
    })
}

fn read_name(r: &mut ByteReader<'_>) -> Result<String> {
    let len = r.u8()? as usize;
    let name = String::from_utf8_lossy(r.bytes(len)?).into_owned();
    r.skip(1)?; // NUL terminator
    Ok(name)
}

fn decode_table_map(
    data: &[u8],
    format: &FormatDescription,
    type_code: u8,
) -> Result<TableMapEvent> {
    let mut r = ByteReader::new(data);

    let table_id = r.uint_le(format.table_id_size(type_code))?;
    let flags = r.u16_le()?;
    let schema_name = read_name(&mut r)?;
    let table_name = read_name(&mut r)?;

    let column_count = r.lenenc_int()? as usize;
    let column_types = r
        .bytes(column_count)?
        .iter()
        .map(|&code| ColumnType::from_u8(code))
        .collect::<Result<Vec<_>>>()?;

    let metadata_block = r.lenenc_bytes()?;
    let column_metadata = decode_column_metadata(&column_types, metadata_block)?;

    let null_bitmap = r.bytes(column_count.div_ceil(8))?;
    let nullable = (0..column_count).map(|i| is_bit_set(null_bitmap, i)).collect();

    let mut unsigned = vec![false; column_count];
    let mut column_names = None;
    let mut primary_key = Vec::new();

    // Optional metadata (MySQL 8.0.1+): type, length, value
    while r.has_remaining() {
        let field_type = r.u8()?;
        let value = r.lenenc_bytes()?;
        match field_type {
            OPT_SIGNEDNESS => {
                let numeric = column_types
                    .iter()
                    .enumerate()
                    .filter(|(_, t)| t.is_numeric())
                    .map(|(i, _)| i);
                for (k, col) in numeric.enumerate() {
                    unsigned[col] = value
                        .get(k / 8)
                        .is_some_and(|byte| byte & (0x80 >> (k % 8)) != 0);
                }
            }
            OPT_COLUMN_NAME => {
                let mut names_reader = ByteReader::new(value);
                let mut names = Vec::with_capacity(column_count);
                while names_reader.has_remaining() {
                    names.push(String::from_utf8_lossy(names_reader.lenenc_bytes()?).into_owned());
                }
                if names.len() == column_count {
                    column_names = Some(names);
                } else {
                    debug!(
                        "Ignoring COLUMN_NAME metadata with {} names for {} columns",
                        names.len(),
                        column_count
                    );
                }
            }
            OPT_SIMPLE_PRIMARY_KEY => {
                let mut pk = ByteReader::new(value);
                while pk.has_remaining() {
                    primary_key.push(pk.lenenc_int()? as usize);
                }
            }
            OPT_PRIMARY_KEY_WITH_PREFIX => {
                let mut pk = ByteReader::new(value);
                while pk.has_remaining() {
                    primary_key.push(pk.lenenc_int()? as usize);
                    pk.lenenc_int()?; // prefix length
                }
            }
            _ => {}
        }
    }

    Ok(TableMapEvent {
        table_id,
        flags,
        schema_name,
        table_name,
        column_types,
        column_metadata,
        nullable,
        unsigned,
        column_names,
        primary_key,
    })
}

const OPT_SIGNEDNESS: u8 = 1;
const OPT_COLUMN_NAME: u8 = 4;
const OPT_SIMPLE_PRIMARY_KEY: u8 = 8;
const OPT_PRIMARY_KEY_WITH_PREFIX: u8 = 9;

/// Per-column metadata from the table map, normalized into a `u16`.
///
/// The block must be consumed exactly; any other outcome means the column
/// types and metadata disagree.
fn decode_column_metadata(column_types: &[ColumnType], block: &[u8]) -> Result<Vec<u16>> {
    let mut r = ByteReader::new(block);
    let mut metadata = Vec::with_capacity(column_types.len());

    for col_type in column_types {
        let meta = match col_type {
            ColumnType::Float
            | ColumnType::Double
            | ColumnType::Blob
            | ColumnType::TinyBlob
            | ColumnType::MediumBlob
            | ColumnType::LongBlob
            | ColumnType::Json
            | ColumnType::Geometry
            | ColumnType::Time2
            | ColumnType::DateTime2
            | ColumnType::Timestamp2 => r.u8()? as u16,
            ColumnType::Bit | ColumnType::Varchar | ColumnType::VarString => r.u16_le()?,
            // (precision, scale) and (real type, length) pairs: first byte high
            ColumnType::NewDecimal
            | ColumnType::String
            | ColumnType::Enum
            | ColumnType::Set => r.u16_be()?,
            _ => 0,
        };
        metadata.push(meta);
    }

    if r.has_remaining() {
        return Err(CdcError::decode(format!(
            "Column metadata has {} unexpected trailing bytes",
            r.remaining()
        )));
    }
    Ok(metadata)
}

fn decode_rows_event(
    data: &[u8],
    format: &FormatDescription,
    header: &EventHeader,
    kind: RowsKind,
    schema: &SchemaContext,
) -> Result<RowsEvent> {
    let mut r = ByteReader::new(data);

    let table_id = r.uint_le(format.table_id_size(header.type_code))?;
    let flags = r.u16_le()?;

    if matches!(
        header.event_type,
        EventType::WriteRowsEventV2 | EventType::UpdateRowsEventV2 | EventType::DeleteRowsEventV2
    ) {
        // Length includes its own two bytes
        let extra_len = r.u16_le()? as usize;
        if extra_len < 2 {
            return Err(CdcError::decode(format!(
                "Invalid rows event extra data length {}",
                extra_len
            )));
        }
        r.skip(extra_len - 2)?;
    }

    let column_count = r.lenenc_int()? as usize;
    let bitmap_len = column_count.div_ceil(8);
    let before_present = r.bytes(bitmap_len)?;
    let after_present = if kind == RowsKind::Update {
        r.bytes(bitmap_len)?
    } else {
        before_present
    };

    let table = schema
        .get(table_id)
        .ok_or(CdcError::MissingTableMap(table_id))?;
    let columns = table.columns();
    if columns.len() != column_count {
        return Err(CdcError::decode(format!(
            "Rows event for {}.{} has {} columns, table map has {}",
            table.database,
            table.table,
            column_count,
            columns.len()
        )));
    }

    let mut rows = Vec::new();
    while r.has_remaining() {
        let row = match kind {
            RowsKind::Write => RowData {
                before: None,
                after: Some(decode_row_image(&mut r, columns, after_present)?),
            },
            RowsKind::Delete => RowData {
                before: Some(decode_row_image(&mut r, columns, before_present)?),
                after: None,
            },
            RowsKind::Update => {
                let before = decode_row_image(&mut r, columns, before_present)?;
                let after = decode_row_image(&mut r, columns, after_present)?;
                RowData {
                    before: Some(before),
                    after: Some(after),
                }
            }
        };
        rows.push(row);
    }

    Ok(RowsEvent {
        kind,
        table_id,
        flags,
        column_count,
        rows,
    })
}

/// One row image: null bitmap over the present columns, then their values.
fn decode_row_image(
    r: &mut ByteReader<'_>,
    columns: &[ColumnDescriptor],
    present: &[u8],
) -> Result<Vec<Value>> {
    let present_count = (0..columns.len()).filter(|&i| is_bit_set(present, i)).count();
    let null_bitmap = r.bytes(present_count.div_ceil(8))?;

    let mut values = Vec::with_capacity(columns.len());
    let mut null_idx = 0;
    for (col_idx, column) in columns.iter().enumerate() {
        if !is_bit_set(present, col_idx) {
            values.push(Value::Omitted);
            continue;
        }
        let value = if is_bit_set(null_bitmap, null_idx) {
            Value::Null
        } else {
            decode_column_value(r, column).map_err(|e| {
                CdcError::decode(format!(
                    "column '{}' ({:?}): {}",
                    column.name, column.column_type, e
                ))
            })?
        };
        values.push(value);
        null_idx += 1;
    }
    Ok(values)
}

fn text_or_bytes(bytes: &[u8]) -> Value {
    match std::str::from_utf8(bytes) {
        Ok(s) => Value::String(s.to_string()),
        Err(_) => Value::Bytes(bytes.to_vec()),
    }
}

fn decode_column_value(r: &mut ByteReader<'_>, column: &ColumnDescriptor) -> Result<Value> {
    let metadata = column.metadata;
    let unsigned = column.unsigned;

    match column.column_type {
        ColumnType::Tiny => {
            let v = r.u8()?;
            Ok(if unsigned {
                Value::UInt(v as u64)
            } else {
                Value::Int(v as i8 as i64)
            })
        }
        ColumnType::Short => {
            let v = r.u16_le()?;
            Ok(if unsigned {
                Value::UInt(v as u64)
            } else {
                Value::Int(v as i16 as i64)
            })
        }
        ColumnType::Int24 => {
            let v = r.u24_le()?;
            Ok(if unsigned {
                Value::UInt(v as u64)
            } else {
                // Sign extend from 24 bits
                Value::Int(((v << 8) as i32 >> 8) as i64)
            })
        }
        ColumnType::Long => {
            let v = r.u32_le()?;
            Ok(if unsigned {
                Value::UInt(v as u64)
            } else {
                Value::Int(v as i32 as i64)
            })
        }
        ColumnType::LongLong => {
            let v = r.u64_le()?;
            Ok(if unsigned {
                Value::UInt(v)
            } else {
                Value::Int(v as i64)
            })
        }
        ColumnType::Float => Ok(Value::Float(r.f32_le()?)),
        ColumnType::Double => Ok(Value::Double(r.f64_le()?)),
        ColumnType::Null => Ok(Value::Null),
        ColumnType::Year => {
            let v = r.u8()? as u16;
            Ok(Value::Year(if v == 0 { 0 } else { 1900 + v }))
        }
        ColumnType::Date | ColumnType::NewDate => {
            let packed = r.u24_le()?;
            Ok(Value::Date {
                year: (packed >> 9) as u16,
                month: ((packed >> 5) & 0x0F) as u8,
                day: (packed & 0x1F) as u8,
            })
        }
        ColumnType::Time => {
            // Signed HHMMSS as a 3-byte integer
            let raw = r.u24_le()?;
            let v = ((raw << 8) as i32) >> 8;
            let abs = v.unsigned_abs();
            Ok(Value::Time {
                negative: v < 0,
                hours: abs / 10000,
                minutes: ((abs / 100) % 100) as u8,
                seconds: (abs % 100) as u8,
                microseconds: 0,
            })
        }
        ColumnType::DateTime => {
            // YYYYMMDDhhmmss as a u64
            let packed = r.u64_le()?;
            Ok(Value::DateTime {
                year: (packed / 10_000_000_000) as u16,
                month: ((packed / 100_000_000) % 100) as u8,
                day: ((packed / 1_000_000) % 100) as u8,
                hour: ((packed / 10_000) % 100) as u8,
                minute: ((packed / 100) % 100) as u8,
                second: (packed % 100) as u8,
                microsecond: 0,
            })
        }
        ColumnType::Timestamp => Ok(Value::Timestamp {
            seconds: r.u32_le()?,
            microseconds: 0,
        }),
        ColumnType::Timestamp2 => {
            let seconds = r.u32_be()?;
            let microseconds = read_fractional_seconds(r, metadata as u8)?;
            Ok(Value::Timestamp {
                seconds,
                microseconds,
            })
        }
        ColumnType::DateTime2 => {
            // 1 bit sign, 17 bits year*13+month, 5 day, 5 hour, 6 minute, 6 second
            let packed = r.uint_be(5)? as i64 - 0x80_0000_0000;
            let microsecond = read_fractional_seconds(r, metadata as u8)?;
            let packed = packed.unsigned_abs();
            let year_month = (packed >> 22) & 0x1FFFF;
            Ok(Value::DateTime {
                year: (year_month / 13) as u16,
                month: (year_month % 13) as u8,
                day: ((packed >> 17) & 0x1F) as u8,
                hour: ((packed >> 12) & 0x1F) as u8,
                minute: ((packed >> 6) & 0x3F) as u8,
                second: (packed & 0x3F) as u8,
                microsecond,
            })
        }
        ColumnType::Time2 => decode_time2(r, metadata as u8),
        ColumnType::Varchar | ColumnType::VarString => {
            let len = if metadata < 256 {
                r.u8()? as usize
            } else {
                r.u16_le()? as usize
            };
            Ok(text_or_bytes(r.bytes(len)?))
        }
        ColumnType::String | ColumnType::Enum | ColumnType::Set => {
            decode_string_family(r, metadata)
        }
        ColumnType::Blob
        | ColumnType::TinyBlob
        | ColumnType::MediumBlob
        | ColumnType::LongBlob
        | ColumnType::Geometry => {
            let len = read_blob_length(r, metadata)?;
            Ok(Value::Bytes(r.bytes(len)?.to_vec()))
        }
        ColumnType::Json => {
            let len = read_blob_length(r, metadata)?;
            Ok(Value::Json(decode_json_binary(r.bytes(len)?)?))
        }
        ColumnType::NewDecimal => {
            let precision = (metadata >> 8) as usize;
            let scale = (metadata & 0xFF) as usize;
            Ok(Value::Decimal(decode_decimal(r, precision, scale)?))
        }
        ColumnType::Bit => {
            let nbits = ((metadata >> 8) * 8 + (metadata & 0xFF)) as usize;
            let bytes = r.bytes(nbits.div_ceil(8))?;
            if nbits == 1 {
                Ok(Value::Bool(bytes[0] & 0x01 != 0))
            } else {
                Ok(Value::Bit(bytes.to_vec()))
            }
        }
        ColumnType::Decimal | ColumnType::TypedArray => Err(CdcError::decode(format!(
            "column type {:?} cannot appear in row images",
            column.column_type
        ))),
    }
}

/// CHAR, BINARY, ENUM and SET share the STRING wire type; the metadata's
/// high byte holds the real type and two bits of the length.
fn decode_string_family(r: &mut ByteReader<'_>, metadata: u16) -> Result<Value> {
    let mut real_type = (metadata >> 8) as u8;
    let mut max_len = (metadata & 0xFF) as usize;
    if real_type & 0x30 != 0x30 {
        max_len |= (((real_type & 0x30) ^ 0x30) as usize) << 4;
        real_type |= 0x30;
    }

    match real_type {
        t if t == ColumnType::Enum as u8 => Ok(Value::Enum(r.uint_le(max_len.min(2))? as u16)),
        t if t == ColumnType::Set as u8 => Ok(Value::Set(r.uint_le(max_len.min(8))?)),
        _ => {
            let len = if max_len < 256 {
                r.u8()? as usize
            } else {
                r.u16_le()? as usize
            };
            Ok(text_or_bytes(r.bytes(len)?))
        }
    }
}

fn read_blob_length(r: &mut ByteReader<'_>, length_bytes: u16) -> Result<usize> {
    match length_bytes {
        1..=4 => Ok(r.uint_le(length_bytes as usize)? as usize),
        other => Err(CdcError::decode(format!(
            "invalid blob length size {}",
            other
        ))),
    }
}

/// Fractional seconds of TIME2/DATETIME2/TIMESTAMP2, in microseconds.
///
/// Precision 1-2 is stored in hundredths, 3-4 in ten-thousandths, 5-6 in
/// microseconds (big-endian, 1/2/3 bytes).
fn read_fractional_seconds(r: &mut ByteReader<'_>, fsp: u8) -> Result<u32> {
    match fsp {
        0 => Ok(0),
        1 | 2 => Ok(r.u8()? as u32 * 10_000),
        3 | 4 => Ok(r.u16_be()? as u32 * 100),
        5 | 6 => r.u24_be(),
        other => Err(CdcError::decode(format!(
            "invalid fractional seconds precision {}",
            other
        ))),
    }
}

/// TIME2: 3-byte big-endian offset-binary integer part plus fraction.
///
/// Negative values store the fraction as a complement borrowing from the
/// integer part.
fn decode_time2(r: &mut ByteReader<'_>, fsp: u8) -> Result<Value> {
    let int_part = r.u24_be()? as i64 - 0x80_0000;
    let packed: i64 = match fsp {
        0 => int_part << 24,
        1 | 2 => {
            let (mut int_part, mut frac) = (int_part, r.u8()? as i64);
            if int_part < 0 && frac != 0 {
                int_part += 1;
                frac -= 0x100;
            }
            (int_part << 24) + frac * 10_000
        }
        3 | 4 => {
            let (mut int_part, mut frac) = (int_part, r.u16_be()? as i64);
            if int_part < 0 && frac != 0 {
                int_part += 1;
                frac -= 0x10000;
            }
            (int_part << 24) + frac * 100
        }
        5 | 6 => (int_part << 24) + r.u24_be()? as i64,
        other => {
            return Err(CdcError::decode(format!(
                "invalid fractional seconds precision {}",
                other
            )))
        }
    };

    let abs = packed.unsigned_abs();
    let hms = abs >> 24;
    Ok(Value::Time {
        negative: packed < 0,
        hours: ((hms >> 12) & 0x3FF) as u32,
        minutes: ((hms >> 6) & 0x3F) as u8,
        seconds: (hms & 0x3F) as u8,
        microseconds: (abs & 0xFF_FFFF) as u32,
    })
}

fn decode_xid(data: &[u8]) -> Result<XidEvent> {
    Ok(XidEvent {
        xid: ByteReader::new(data).u64_le()?,
    })
}

fn decode_query(data: &[u8]) -> Result<QueryEvent> {
    let mut r = ByteReader::new(data);

    let thread_id = r.u32_le()?;
    let exec_time = r.u32_le()?;
    let schema_len = r.u8()? as usize;
    let error_code = r.u16_le()?;
    let status_vars_len = r.u16_le()? as usize;
    r.skip(status_vars_len)?;

    let schema = String::from_utf8_lossy(r.bytes(schema_len)?).into_owned();
    r.skip(1)?; // NUL terminator
    let query = String::from_utf8_lossy(r.rest()).into_owned();

    Ok(QueryEvent {
        thread_id,
        exec_time,
        error_code,
        schema,
        query,
    })
}

fn decode_gtid(data: &[u8], anonymous: bool) -> Result<GtidEvent> {
    let mut r = ByteReader::new(data);
    let flags = r.u8()?;
    let mut uuid = [0u8; 16];
    uuid.copy_from_slice(r.bytes(16)?);
    let gno = r.u64_le()?;

    Ok(GtidEvent {
        flags,
        uuid,
        gno,
        anonymous,
    })
}

fn is_bit_set(bitmap: &[u8], idx: usize) -> bool {
    let byte_idx = idx / 8;
    let bit_idx = idx % 8;
    byte_idx < bitmap.len() && (bitmap[byte_idx] & (1 << bit_idx)) != 0
}

/// Bytes used by a group of `digits` leftover decimal digits.
const DIG2BYTES: [usize; 10] = [0, 1, 1, 2, 2, 3, 3, 4, 4, 4];
const DIGITS_PER_WORD: usize = 9;

/// Decode MySQL's binary DECIMAL into its exact text form.
///
/// Digits are stored in groups of nine per 4-byte big-endian word, with
/// shorter leading/trailing groups. The sign bit is inverted and negative
/// numbers are stored as the bitwise complement so that the encoding sorts.
pub(crate) fn decode_decimal(
    r: &mut ByteReader<'_>,
    precision: usize,
    scale: usize,
) -> Result<String> {
    if precision == 0 || scale > precision {
        return Err(CdcError::decode(format!(
            "invalid DECIMAL({},{})",
            precision, scale
        )));
    }

    let int_digits = precision - scale;
    let int_words = int_digits / DIGITS_PER_WORD;
    let int_leftover = int_digits % DIGITS_PER_WORD;
    let frac_words = scale / DIGITS_PER_WORD;
    let frac_leftover = scale % DIGITS_PER_WORD;

    let int_leftover_bytes = DIG2BYTES[int_leftover];
    let frac_leftover_bytes = DIG2BYTES[frac_leftover];
    let total_bytes = int_leftover_bytes + (int_words + frac_words) * 4 + frac_leftover_bytes;

    let mut bytes = r.bytes(total_bytes)?.to_vec();

    let negative = (bytes[0] & 0x80) == 0;
    bytes[0] ^= 0x80;
    if negative {
        for b in bytes.iter_mut() {
            *b = !*b;
        }
    }

    let mut d = ByteReader::new(&bytes);
    let mut int_part = String::new();

    if int_leftover_bytes > 0 {
        let val = d.uint_be(int_leftover_bytes)?;
        if val > 0 {
            int_part.push_str(&val.to_string());
        }
    }
    for _ in 0..int_words {
        let val = d.u32_be()?;
        if int_part.is_empty() {
            if val > 0 {
                int_part.push_str(&val.to_string());
            }
        } else {
            int_part.push_str(&format!("{:09}", val));
        }
    }
    if int_part.is_empty() {
        int_part.push('0');
    }

    let mut result = String::with_capacity(precision + 2);
    if negative {
        result.push('-');
    }
    result.push_str(&int_part);

    if scale > 0 {
        result.push('.');
        for _ in 0..frac_words {
            result.push_str(&format!("{:09}", d.u32_be()?));
        }
        if frac_leftover_bytes > 0 {
            let val = d.uint_be(frac_leftover_bytes)?;
            result.push_str(&format!("{:0width$}", val, width = frac_leftover));
        }
    }

    Ok(result)
}
