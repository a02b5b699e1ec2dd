//! MySQL client/server protocol for replication
//!
//! Implements the subset of the MySQL wire protocol a replica needs:
//! - Handshake v10 and authentication (mysql_native_password, caching_sha2_password)
//! - Text-protocol queries (COM_QUERY) with result set reading
//! - COM_REGISTER_SLAVE
//! - COM_BINLOG_DUMP and the resulting event stream
//!
//! Every packet read checks the sequence id and reassembles payloads split
//! across 16 MiB continuation packets.

use bytes::{BufMut, Bytes, BytesMut};
use sha1::{Digest, Sha1};
use sha2::Sha256;
use std::fmt;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::decoder::ChecksumAlgorithm;
use super::reader::ByteReader;
use crate::common::{CdcError, Position, Result, Validator};

/// MySQL packet header size (3 bytes length + 1 byte sequence)
const PACKET_HEADER_SIZE: usize = 4;
/// Largest payload a single packet carries; a packet of exactly this size
/// is followed by a continuation packet.
const MAX_PAYLOAD_LEN: usize = 0xFF_FFFF;

/// utf8mb4_general_ci
const CHARSET_UTF8MB4: u8 = 45;

const COM_QUERY: u8 = 0x03;
const COM_BINLOG_DUMP: u8 = 0x12;
const COM_REGISTER_SLAVE: u8 = 0x15;

/// MySQL capability flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapabilityFlags(u32);

impl CapabilityFlags {
    pub const CLIENT_LONG_PASSWORD: u32 = 0x00000001;
    pub const CLIENT_CONNECT_WITH_DB: u32 = 0x00000008;
    pub const CLIENT_PROTOCOL_41: u32 = 0x00000200;
    pub const CLIENT_SSL: u32 = 0x00000800;
    pub const CLIENT_TRANSACTIONS: u32 = 0x00002000;
    pub const CLIENT_SECURE_CONNECTION: u32 = 0x00008000;
    pub const CLIENT_PLUGIN_AUTH: u32 = 0x00080000;
    pub const CLIENT_DEPRECATE_EOF: u32 = 0x01000000;

    /// What this client asks for.
    pub const REPLICA_CLIENT: u32 = Self::CLIENT_PROTOCOL_41
        | Self::CLIENT_SECURE_CONNECTION
        | Self::CLIENT_LONG_PASSWORD
        | Self::CLIENT_TRANSACTIONS
        | Self::CLIENT_PLUGIN_AUTH
        | Self::CLIENT_DEPRECATE_EOF;

    pub fn new(flags: u32) -> Self {
        Self(flags)
    }

    pub fn has(&self, flag: u32) -> bool {
        (self.0 & flag) != 0
    }

    pub fn value(&self) -> u32 {
        self.0
    }
}

/// Byte stream the client runs over. TCP in production, in-memory pipes in tests.
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send + Sync {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send + Sync> Transport for T {}

// ============================================================================
// Server error packet
// ============================================================================

/// Decoded ERR packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerError {
    pub code: u16,
    pub sql_state: Option<String>,
    pub message: String,
}

impl ServerError {
    /// Parse an ERR packet (`0xFF`, code, optional `#` + 5-byte SQL state, message).
    pub fn parse(packet: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(packet);
        if r.u8()? != 0xFF {
            return Err(CdcError::protocol("not an ERR packet"));
        }
        let code = r.u16_le()?;
        let sql_state = if r.peek() == Some(b'#') && r.remaining() >= 6 {
            r.skip(1)?;
            Some(String::from_utf8_lossy(r.bytes(5)?).into_owned())
        } else {
            None
        };
        let message = String::from_utf8_lossy(r.rest()).into_owned();
        Ok(Self {
            code,
            sql_state,
            message,
        })
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.sql_state {
            Some(state) => write!(f, "{} ({}): {}", self.code, state, self.message),
            None => write!(f, "{}: {}", self.code, self.message),
        }
    }
}

fn server_error(packet: &[u8]) -> ServerError {
    ServerError::parse(packet).unwrap_or_else(|_| ServerError {
        code: 0,
        sql_state: None,
        message: "malformed ERR packet".to_string(),
    })
}

// ============================================================================
// Handshake Packet
// ============================================================================

/// MySQL handshake packet (initial greeting from server)
#[derive(Debug, Clone)]
pub struct HandshakePacket {
    pub protocol_version: u8,
    pub server_version: String,
    pub connection_id: u32,
    pub auth_plugin_data: Vec<u8>,
    pub capability_flags: CapabilityFlags,
    pub character_set: u8,
    pub status_flags: u16,
    pub auth_plugin_name: String,
}

impl HandshakePacket {
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(data);

        let protocol_version = r.u8()?;
        if protocol_version == 0xFF {
            return Err(CdcError::connection(format!(
                "Server refused connection: {}",
                server_error(data)
            )));
        }
        if protocol_version != 10 {
            return Err(CdcError::protocol(format!(
                "Unsupported handshake protocol version {}",
                protocol_version
            )));
        }

        let server_version = String::from_utf8_lossy(r.null_terminated()?).into_owned();
        let connection_id = r.u32_le()?;
        let mut auth_plugin_data = r.bytes(8)?.to_vec();
        r.skip(1)?; // filler

        let cap_lower = r.u16_le()?;
        let character_set = r.u8()?;
        let status_flags = r.u16_le()?;
        let cap_upper = r.u16_le()?;
        let capability_flags =
            CapabilityFlags::new(((cap_upper as u32) << 16) | (cap_lower as u32));

        let auth_data_len = r.u8()? as usize;
        r.skip(10)?; // reserved

        if capability_flags.has(CapabilityFlags::CLIENT_SECURE_CONNECTION) {
            let part2_len = auth_data_len.saturating_sub(8).max(13);
            let part2 = r.bytes(part2_len.min(r.remaining()))?;
            // Scramble part 2 is NUL-terminated
            let end = part2.iter().position(|&b| b == 0).unwrap_or(part2.len());
            auth_plugin_data.extend_from_slice(&part2[..end]);
        }

        let auth_plugin_name = if capability_flags.has(CapabilityFlags::CLIENT_PLUGIN_AUTH) {
            let rest = r.rest();
            let end = rest.iter().position(|&b| b == 0).unwrap_or(rest.len());
            String::from_utf8_lossy(&rest[..end]).into_owned()
        } else {
            "mysql_native_password".to_string()
        };

        Ok(Self {
            protocol_version,
            server_version,
            connection_id,
            auth_plugin_data,
            capability_flags,
            character_set,
            status_flags,
            auth_plugin_name,
        })
    }
}

/// One text-protocol row; `None` is SQL NULL.
pub type TextRow = Vec<Option<String>>;

// ============================================================================
// MySQL Binlog Client
// ============================================================================

/// Authenticated connection to a MySQL source.
pub struct MySqlBinlogClient {
    stream: BufReader<Box<dyn Transport>>,
    sequence_id: u8,
    server_version: String,
    connection_id: u32,
    capabilities: CapabilityFlags,
}

impl fmt::Debug for MySqlBinlogClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MySqlBinlogClient")
            .field("sequence_id", &self.sequence_id)
            .field("server_version", &self.server_version)
            .field("connection_id", &self.connection_id)
            .finish_non_exhaustive()
    }
}

impl MySqlBinlogClient {
    /// Open a TCP connection and authenticate.
    ///
    /// `connect_timeout` bounds the TCP connect and the whole authentication
    /// exchange.
    pub async fn connect(
        host: &str,
        port: u16,
        user: &str,
        password: Option<&str>,
        connect_timeout: Duration,
    ) -> Result<Self> {
        Validator::validate_host(host).map_err(|e| CdcError::config(e.to_string()))?;
        Validator::validate_user(user).map_err(|e| CdcError::config(e.to_string()))?;

        let addr = format!("{}:{}", host, port);
        info!("Connecting to MySQL at {}", addr);

        let connect = async {
            let tcp = TcpStream::connect(&addr).await.map_err(|e| {
                CdcError::connection(format!("Failed to connect to {}: {}", addr, e))
            })?;
            if let Err(e) = tcp.set_nodelay(true) {
                debug!("Failed to set TCP_NODELAY: {}", e);
            }
            Self::handshake(tcp, user, password).await
        };

        match timeout(connect_timeout, connect).await {
            Ok(result) => result,
            Err(_) => Err(CdcError::timeout(format!(
                "Connecting to {} took longer than {:?}",
                addr, connect_timeout
            ))),
        }
    }

    /// Authenticate over an already established byte stream.
    pub async fn handshake<S>(stream: S, user: &str, password: Option<&str>) -> Result<Self>
    where
        S: Transport + 'static,
    {
        let mut client = Self {
            stream: BufReader::new(Box::new(stream)),
            sequence_id: 0,
            server_version: String::new(),
            connection_id: 0,
            capabilities: CapabilityFlags::new(0),
        };

        let greeting = client.read_packet().await?;
        let handshake = HandshakePacket::parse(&greeting)?;
        client.server_version = handshake.server_version.clone();
        client.connection_id = handshake.connection_id;
        client.capabilities = CapabilityFlags::new(
            CapabilityFlags::REPLICA_CLIENT & handshake.capability_flags.value(),
        );

        if !handshake
            .capability_flags
            .has(CapabilityFlags::CLIENT_PROTOCOL_41)
        {
            return Err(CdcError::protocol(
                "Server does not support protocol 4.1",
            ));
        }

        info!(
            "Connected to MySQL {} (connection_id={})",
            handshake.server_version, handshake.connection_id
        );
        debug!("Auth plugin: {}", handshake.auth_plugin_name);

        client.authenticate(user, password, &handshake).await?;
        Ok(client)
    }

    pub fn server_version(&self) -> &str {
        &self.server_version
    }

    pub fn connection_id(&self) -> u32 {
        self.connection_id
    }

    /// Capabilities both sides agreed on.
    pub fn capabilities(&self) -> CapabilityFlags {
        self.capabilities
    }

    /// Read one logical packet, joining continuation packets.
    async fn read_packet(&mut self) -> Result<Vec<u8>> {
        let mut payload = Vec::new();
        loop {
            let mut header = [0u8; PACKET_HEADER_SIZE];
            if let Err(e) = self.stream.read_exact(&mut header).await {
                return Err(match e.kind() {
                    std::io::ErrorKind::UnexpectedEof => CdcError::ConnectionClosed,
                    _ => CdcError::Io(e),
                });
            }

            let len =
                (header[0] as usize) | ((header[1] as usize) << 8) | ((header[2] as usize) << 16);
            if header[3] != self.sequence_id {
                return Err(CdcError::protocol(format!(
                    "Packet out of order: expected sequence {}, got {}",
                    self.sequence_id, header[3]
                )));
            }
            self.sequence_id = self.sequence_id.wrapping_add(1);

            Validator::validate_packet_size(payload.len() + len)
                .map_err(|e| CdcError::protocol(e.to_string()))?;

            let start = payload.len();
            payload.resize(start + len, 0);
            if let Err(e) = self.stream.read_exact(&mut payload[start..]).await {
                return Err(match e.kind() {
                    std::io::ErrorKind::UnexpectedEof => CdcError::ConnectionClosed,
                    _ => CdcError::Io(e),
                });
            }

            if len < MAX_PAYLOAD_LEN {
                return Ok(payload);
            }
        }
    }

    /// Write one logical packet, splitting it as needed.
    async fn write_packet(&mut self, data: &[u8]) -> Result<()> {
        let mut packet = BytesMut::with_capacity(data.len() + PACKET_HEADER_SIZE);
        for chunk in data.chunks(MAX_PAYLOAD_LEN) {
            packet.put_uint_le(chunk.len() as u64, 3);
            packet.put_u8(self.sequence_id);
            packet.put_slice(chunk);
            self.sequence_id = self.sequence_id.wrapping_add(1);
        }
        if data.len() % MAX_PAYLOAD_LEN == 0 {
            // Empty packet terminates a payload that is a multiple of the max size
            packet.put_uint_le(0, 3);
            packet.put_u8(self.sequence_id);
            self.sequence_id = self.sequence_id.wrapping_add(1);
        }

        let inner = self.stream.get_mut();
        inner.write_all(&packet).await?;
        inner.flush().await?;
        Ok(())
    }

    /// Send a command packet, starting a new sequence.
    async fn send_command(&mut self, command: u8, body: &[u8]) -> Result<()> {
        self.sequence_id = 0;
        let mut packet = BytesMut::with_capacity(body.len() + 1);
        packet.put_u8(command);
        packet.put_slice(body);
        self.write_packet(&packet).await
    }

    async fn authenticate(
        &mut self,
        user: &str,
        password: Option<&str>,
        handshake: &HandshakePacket,
    ) -> Result<()> {
        let mut plugin = handshake.auth_plugin_name.clone();
        let auth_response = match plugin.as_str() {
            "mysql_native_password" | "caching_sha2_password" => {
                scramble(&plugin, password, &handshake.auth_plugin_data)?
            }
            other => {
                // The server answers with an auth switch when it insists
                warn!(
                    "Unknown auth plugin: {}, trying mysql_native_password",
                    other
                );
                plugin = "mysql_native_password".to_string();
                scramble(&plugin, password, &handshake.auth_plugin_data)?
            }
        };

        let mut response = BytesMut::with_capacity(128);
        response.put_u32_le(self.capabilities.value());
        response.put_u32_le(MAX_PAYLOAD_LEN as u32);
        response.put_u8(CHARSET_UTF8MB4);
        response.put_slice(&[0u8; 23]);
        response.put_slice(user.as_bytes());
        response.put_u8(0);
        response.put_u8(auth_response.len() as u8);
        response.put_slice(&auth_response);
        if self.capabilities.has(CapabilityFlags::CLIENT_PLUGIN_AUTH) {
            response.put_slice(plugin.as_bytes());
            response.put_u8(0);
        }
        self.write_packet(&response).await?;

        loop {
            let resp = self.read_packet().await?;
            match resp.first() {
                Some(0x00) => {
                    debug!("Authentication successful");
                    return Ok(());
                }
                Some(0xFF) => {
                    return Err(CdcError::authentication(server_error(&resp).to_string()));
                }
                Some(0xFE) => {
                    let mut r = ByteReader::new(&resp[1..]);
                    let name = String::from_utf8_lossy(r.null_terminated()?).into_owned();
                    let data = r.rest();
                    let salt = data.strip_suffix(&[0]).unwrap_or(data);

                    debug!("Auth switch to plugin: {}", name);
                    let switched = scramble(&name, password, salt)?;
                    plugin = name;
                    self.write_packet(&switched).await?;
                }
                Some(0x01) if plugin == "caching_sha2_password" => match resp.get(1) {
                    Some(0x03) => {
                        // Fast auth succeeded; the server follows with OK
                        debug!("caching_sha2_password fast auth success");
                    }
                    Some(0x04) => {
                        return Err(CdcError::authentication(
                            "caching_sha2_password requires full authentication, \
                             which needs a TLS connection; authenticate once with a \
                             TLS client to warm the server cache or use \
                             mysql_native_password",
                        ));
                    }
                    other => {
                        return Err(CdcError::protocol(format!(
                            "Unexpected caching_sha2_password state {:?}",
                            other
                        )));
                    }
                },
                Some(other) => {
                    return Err(CdcError::protocol(format!(
                        "Unexpected auth response: 0x{:02X}",
                        other
                    )));
                }
                None => return Err(CdcError::protocol("Empty auth response")),
            }
        }
    }

    /// Run a text query and collect its rows, or the server's ERR packet.
    async fn run_query(
        &mut self,
        sql: &str,
    ) -> Result<std::result::Result<Vec<TextRow>, ServerError>> {
        self.send_command(COM_QUERY, sql.as_bytes()).await?;

        let first = self.read_packet().await?;
        let column_count = match first.first() {
            Some(0x00) => return Ok(Ok(Vec::new())),
            Some(0xFF) => return Ok(Err(server_error(&first))),
            Some(0xFB) => {
                return Err(CdcError::protocol(
                    "Server requested LOCAL INFILE, which this client does not support",
                ))
            }
            Some(_) => ByteReader::new(&first).lenenc_int()? as usize,
            None => return Err(CdcError::protocol("Empty query response")),
        };

        // Column definitions are not needed, rows are read positionally
        for _ in 0..column_count {
            self.read_packet().await?;
        }
        if !self.capabilities.has(CapabilityFlags::CLIENT_DEPRECATE_EOF) {
            let eof = self.read_packet().await?;
            if eof.first() != Some(&0xFE) {
                return Err(CdcError::protocol("Expected EOF after column definitions"));
            }
        }

        let mut rows = Vec::new();
        loop {
            let packet = self.read_packet().await?;
            match packet.first() {
                Some(0xFE) if packet.len() < 9 => return Ok(Ok(rows)),
                Some(0xFF) => return Ok(Err(server_error(&packet))),
                _ => {
                    let mut r = ByteReader::new(&packet);
                    let mut row = Vec::with_capacity(column_count);
                    for _ in 0..column_count {
                        if r.peek() == Some(0xFB) {
                            r.skip(1)?;
                            row.push(None);
                        } else {
                            row.push(Some(String::from_utf8_lossy(r.lenenc_bytes()?).into_owned()));
                        }
                    }
                    rows.push(row);
                }
            }
        }
    }

    /// Execute a statement, discarding any rows it returns.
    pub async fn query(&mut self, sql: &str) -> Result<()> {
        self.query_rows(sql).await.map(|_| ())
    }

    /// Execute a query and return every row as text.
    pub async fn query_rows(&mut self, sql: &str) -> Result<Vec<TextRow>> {
        self.run_query(sql)
            .await?
            .map_err(|e| CdcError::protocol(format!("Query '{}' failed: {}", sql, e)))
    }

    /// Ask the source to compute event checksums the way it writes them and
    /// report which algorithm that is.
    pub async fn negotiate_checksum(&mut self) -> Result<ChecksumAlgorithm> {
        if let Err(e) = self
            .run_query("SET @master_binlog_checksum = @@global.binlog_checksum")
            .await?
        {
            // Servers before 5.6.2 have no binlog_checksum variable
            debug!("Checksum negotiation unavailable: {}", e);
            return Ok(ChecksumAlgorithm::None);
        }

        let rows = self.query_rows("SELECT @@global.binlog_checksum").await?;
        let value = rows.first().and_then(|row| row.first().cloned().flatten());
        match value.as_deref().map(str::to_ascii_uppercase).as_deref() {
            None | Some("NONE") => Ok(ChecksumAlgorithm::None),
            Some("CRC32") => Ok(ChecksumAlgorithm::Crc32),
            Some(other) => Err(CdcError::protocol(format!(
                "Unsupported binlog checksum algorithm '{}'",
                other
            ))),
        }
    }

    /// Ask the source to send heartbeats when idle for `period`.
    pub async fn set_heartbeat_period(&mut self, period: Duration) -> Result<()> {
        self.query(&format!(
            "SET @master_heartbeat_period = {}",
            period.as_nanos()
        ))
        .await
    }

    /// The source's current write position.
    pub async fn current_binlog_position(&mut self) -> Result<Position> {
        // MySQL 8.2+ renamed SHOW MASTER STATUS
        let rows = match self.run_query("SHOW BINARY LOG STATUS").await? {
            Ok(rows) => rows,
            Err(e) => {
                debug!("SHOW BINARY LOG STATUS failed ({}), falling back", e);
                self.query_rows("SHOW MASTER STATUS").await?
            }
        };

        let row = rows
            .first()
            .ok_or_else(|| CdcError::protocol("Binary logging is not enabled on the source"))?;
        let file = row
            .first()
            .cloned()
            .flatten()
            .ok_or_else(|| CdcError::protocol("Binary log status has no file name"))?;
        let offset = row
            .get(1)
            .cloned()
            .flatten()
            .and_then(|p| p.parse::<u64>().ok())
            .ok_or_else(|| CdcError::protocol("Binary log status has no position"))?;
        Ok(Position::new(file, offset))
    }

    /// Register with the source as a replica.
    pub async fn register_replica(&mut self, server_id: u32) -> Result<()> {
        let mut body = BytesMut::with_capacity(17);
        body.put_u32_le(server_id);
        body.put_u8(0); // hostname length
        body.put_u8(0); // user length
        body.put_u8(0); // password length
        body.put_u16_le(0); // port
        body.put_u32_le(0); // replication rank (ignored)
        body.put_u32_le(0); // master id (0 = use this connection's server id)
        self.send_command(COM_REGISTER_SLAVE, &body).await?;

        let resp = self.read_packet().await?;
        match resp.first() {
            Some(0x00) => {
                info!("Registered as replica with server_id={}", server_id);
                Ok(())
            }
            Some(0xFF) => Err(CdcError::authentication(format!(
                "Replica registration rejected: {}",
                server_error(&resp)
            ))),
            _ => Err(CdcError::protocol("Unexpected response to COM_REGISTER_SLAVE")),
        }
    }

    /// Start streaming events from `position`.
    ///
    /// Consumes the client: once the dump starts the connection carries
    /// nothing but events.
    pub async fn binlog_dump(
        mut self,
        server_id: u32,
        position: &Position,
    ) -> Result<BinlogStream> {
        let (file, offset) = match position {
            Position::Binlog { source_id, offset } => (source_id.as_str(), *offset),
            Position::Current => {
                return Err(CdcError::invalid_state(
                    "Resolve the current position before starting a dump",
                ))
            }
        };
        let offset = u32::try_from(offset).map_err(|_| {
            CdcError::config(format!("Binlog offset {} exceeds 4 GiB", offset))
        })?;

        let mut body = BytesMut::with_capacity(file.len() + 10);
        body.put_u32_le(offset);
        body.put_u16_le(0); // flags: blocking
        body.put_u32_le(server_id);
        body.put_slice(file.as_bytes());
        self.send_command(COM_BINLOG_DUMP, &body).await?;

        // The source answers with its first event (the artificial ROTATE)
        // or with ERR when it cannot serve the requested position.
        let packet = self.read_packet().await?;
        if packet.first() == Some(&0xFF) {
            return Err(CdcError::protocol(format!(
                "Binlog dump from {}:{} rejected: {}",
                file,
                offset,
                server_error(&packet)
            )));
        }
        let first = event_payload(packet)?;

        info!("Started binlog dump from {}:{}", file, offset);
        Ok(BinlogStream {
            client: self,
            buffered: Some(first),
        })
    }
}

/// Compute the scrambled password for `plugin`.
fn scramble(plugin: &str, password: Option<&str>, salt: &[u8]) -> Result<Vec<u8>> {
    match plugin {
        "mysql_native_password" => Ok(mysql_native_password(password, salt)),
        "caching_sha2_password" => Ok(caching_sha2_password(password, salt)),
        other => Err(CdcError::authentication(format!(
            "Unsupported auth plugin: {}",
            other
        ))),
    }
}

/// SHA1(password) XOR SHA1(salt + SHA1(SHA1(password)))
fn mysql_native_password(password: Option<&str>, salt: &[u8]) -> Vec<u8> {
    match password {
        None | Some("") => vec![],
        Some(pwd) => {
            let stage1 = Sha1::digest(pwd.as_bytes());
            let stage2 = Sha1::digest(stage1);

            let mut hasher = Sha1::new();
            hasher.update(salt);
            hasher.update(stage2);
            let stage3 = hasher.finalize();

            stage1
                .iter()
                .zip(stage3.iter())
                .map(|(a, b)| a ^ b)
                .collect()
        }
    }
}

/// XOR(SHA256(password), SHA256(SHA256(SHA256(password)) + salt))
fn caching_sha2_password(password: Option<&str>, salt: &[u8]) -> Vec<u8> {
    match password {
        None | Some("") => vec![],
        Some(pwd) => {
            let hash1 = Sha256::digest(pwd.as_bytes());
            let hash2 = Sha256::digest(hash1);

            let mut hasher = Sha256::new();
            hasher.update(hash2);
            hasher.update(salt);
            let hash3 = hasher.finalize();

            hash1.iter().zip(hash3.iter()).map(|(a, b)| a ^ b).collect()
        }
    }
}

/// Strip the OK marker from a binlog stream packet.
fn event_payload(packet: Vec<u8>) -> Result<Bytes> {
    match packet.first() {
        Some(0x00) => Ok(Bytes::from(packet).slice(1..)),
        Some(0xFE) => {
            debug!("Received EOF in binlog stream");
            Err(CdcError::ConnectionClosed)
        }
        Some(0xFF) => Err(CdcError::protocol(format!(
            "Binlog stream error: {}",
            server_error(&packet)
        ))),
        Some(other) => Err(CdcError::protocol(format!(
            "Unexpected packet 0x{:02X} in binlog stream",
            other
        ))),
        None => Err(CdcError::protocol("Empty packet in binlog stream")),
    }
}

/// Event stream of a running binlog dump.
#[derive(Debug)]
pub struct BinlogStream {
    client: MySqlBinlogClient,
    /// Event read while confirming the dump
    buffered: Option<Bytes>,
}

impl BinlogStream {
    /// Read the next raw event (header included, OK marker stripped).
    ///
    /// Returns [`CdcError::ConnectionClosed`] when the source ends the
    /// stream and a protocol error for ERR or unexpected packets.
    pub async fn next_event(&mut self) -> Result<Bytes> {
        if let Some(event) = self.buffered.take() {
            return Ok(event);
        }
        let packet = self.client.read_packet().await?;
        event_payload(packet)
    }

    pub fn server_version(&self) -> &str {
        self.client.server_version()
    }
}
