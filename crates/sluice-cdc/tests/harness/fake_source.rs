//! In-process MySQL source
//!
//! Speaks just enough of the server side of the protocol for a replica:
//! greeting, authentication, the handful of queries a replica issues,
//! COM_REGISTER_SLAVE and COM_BINLOG_DUMP. Like a real source, a dump
//! begins with an artificial ROTATE naming the requested position; the
//! scripted events follow. Every accepted connection replays the same
//! script.

use super::binlog::BinlogBuilder;
use bytes::{BufMut, BytesMut};
use sluice_cdc::mysql::CapabilityFlags;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::debug;

pub const SERVER_VERSION: &str = "8.0.36-fake";

const COM_QUERY: u8 = 0x03;
const COM_BINLOG_DUMP: u8 = 0x12;
const COM_REGISTER_SLAVE: u8 = 0x15;

/// One step of the event stream.
#[derive(Debug, Clone)]
pub enum Step {
    Event(Vec<u8>),
    Pause(Duration),
}

/// What happens once the script is exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// Keep the connection open and silent
    Hold,
    /// Send an EOF packet
    Eof,
    /// Drop the connection
    Close,
}

/// Behaviour of the fake source.
#[derive(Debug, Clone)]
pub struct Script {
    /// `@@global.binlog_checksum`
    pub checksum: &'static str,
    /// Answer to SHOW BINARY LOG STATUS
    pub current: (String, u64),
    pub reject_auth: bool,
    pub reject_register: bool,
    /// Answer COM_BINLOG_DUMP with ERR 1236
    pub reject_dump: bool,
    pub steps: Vec<Step>,
    pub end: StreamEnd,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            checksum: "NONE",
            current: ("mysql-bin.000001".to_string(), 4),
            reject_auth: false,
            reject_register: false,
            reject_dump: false,
            steps: Vec::new(),
            end: StreamEnd::Hold,
        }
    }
}

impl Script {
    pub fn events(events: impl IntoIterator<Item = Vec<u8>>) -> Self {
        Self {
            steps: events.into_iter().map(Step::Event).collect(),
            ..Default::default()
        }
    }

    pub fn with_checksum(mut self, checksum: &'static str) -> Self {
        self.checksum = checksum;
        self
    }

    pub fn with_current(mut self, file: &str, offset: u64) -> Self {
        self.current = (file.to_string(), offset);
        self
    }

    pub fn ending(mut self, end: StreamEnd) -> Self {
        self.end = end;
        self
    }
}

/// A COM_BINLOG_DUMP the source received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpRequest {
    pub server_id: u32,
    pub file: String,
    pub offset: u32,
}

#[derive(Default)]
struct Log {
    queries: Mutex<Vec<String>>,
    dumps: Mutex<Vec<DumpRequest>>,
}

/// Listening fake source; stops accepting when dropped.
pub struct FakeSource {
    port: u16,
    log: Arc<Log>,
    task: JoinHandle<()>,
}

impl FakeSource {
    pub async fn start(script: Script) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let log = Arc::new(Log::default());
        let script = Arc::new(script);

        let task = {
            let log = Arc::clone(&log);
            tokio::spawn(async move {
                while let Ok((socket, _)) = listener.accept().await {
                    let script = Arc::clone(&script);
                    let log = Arc::clone(&log);
                    tokio::spawn(async move {
                        if let Err(e) = serve(socket, &script, &log).await {
                            debug!("Fake source connection ended: {}", e);
                        }
                    });
                }
            })
        };

        Self { port, log, task }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn queries(&self) -> Vec<String> {
        self.log.queries.lock().unwrap().clone()
    }

    pub fn dump_requests(&self) -> Vec<DumpRequest> {
        self.log.dumps.lock().unwrap().clone()
    }
}

impl Drop for FakeSource {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct Connection {
    socket: TcpStream,
}

impl Connection {
    async fn write(&mut self, seq: u8, payload: &[u8]) -> io::Result<()> {
        let mut frame = BytesMut::with_capacity(payload.len() + 4);
        frame.put_uint_le(payload.len() as u64, 3);
        frame.put_u8(seq);
        frame.put_slice(payload);
        self.socket.write_all(&frame).await
    }

    async fn read(&mut self) -> io::Result<Vec<u8>> {
        let mut header = [0u8; 4];
        self.socket.read_exact(&mut header).await?;
        let len = header[0] as usize | (header[1] as usize) << 8 | (header[2] as usize) << 16;
        let mut payload = vec![0u8; len];
        self.socket.read_exact(&mut payload).await?;
        Ok(payload)
    }

    async fn ok(&mut self, seq: u8) -> io::Result<()> {
        self.write(seq, &[0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00]).await
    }

    async fn err(&mut self, seq: u8, code: u16, message: &str) -> io::Result<()> {
        let mut p = vec![0xFF];
        p.extend_from_slice(&code.to_le_bytes());
        p.extend_from_slice(b"#HY000");
        p.extend_from_slice(message.as_bytes());
        self.write(seq, &p).await
    }

    /// Text result set; the client negotiates CLIENT_DEPRECATE_EOF.
    async fn result_set(&mut self, columns: &[&str], rows: &[Vec<String>]) -> io::Result<()> {
        let mut seq = 1;
        self.write(seq, &[columns.len() as u8]).await?;
        for column in columns {
            seq += 1;
            let mut def = b"\x03def".to_vec();
            def.push(column.len() as u8);
            def.extend_from_slice(column.as_bytes());
            self.write(seq, &def).await?;
        }
        for row in rows {
            seq += 1;
            let mut p = Vec::new();
            for value in row {
                p.push(value.len() as u8);
                p.extend_from_slice(value.as_bytes());
            }
            self.write(seq, &p).await?;
        }
        seq += 1;
        self.write(seq, &[0xFE, 0x00, 0x00, 0x02, 0x00]).await
    }
}

fn greeting() -> Vec<u8> {
    let salt = b"abcdefghijklmnopqrst";
    let caps = CapabilityFlags::REPLICA_CLIENT;
    let mut p = BytesMut::new();
    p.put_u8(10);
    p.put_slice(SERVER_VERSION.as_bytes());
    p.put_u8(0);
    p.put_u32_le(11);
    p.put_slice(&salt[..8]);
    p.put_u8(0);
    p.put_u16_le(caps as u16);
    p.put_u8(45);
    p.put_u16_le(2);
    p.put_u16_le((caps >> 16) as u16);
    p.put_u8(21);
    p.put_slice(&[0u8; 10]);
    p.put_slice(&salt[8..]);
    p.put_u8(0);
    p.put_slice(b"mysql_native_password\0");
    p.to_vec()
}

async fn serve(socket: TcpStream, script: &Script, log: &Log) -> io::Result<()> {
    let mut conn = Connection { socket };
    conn.write(0, &greeting()).await?;
    conn.read().await?;
    if script.reject_auth {
        return conn.err(2, 1045, "Access denied for user").await;
    }
    conn.ok(2).await?;

    loop {
        let command = match conn.read().await {
            Ok(command) => command,
            Err(_) => return Ok(()),
        };
        match command.first() {
            Some(&COM_QUERY) => {
                let sql = String::from_utf8_lossy(&command[1..]).into_owned();
                log.queries.lock().unwrap().push(sql.clone());
                if sql.starts_with("SELECT @@global.binlog_checksum") {
                    let row = vec![script.checksum.to_string()];
                    conn.result_set(&["@@global.binlog_checksum"], &[row]).await?;
                } else if sql.starts_with("SHOW BINARY LOG STATUS") {
                    let (file, offset) = &script.current;
                    let row = vec![file.clone(), offset.to_string()];
                    conn.result_set(&["File", "Position"], &[row]).await?;
                } else {
                    conn.ok(1).await?;
                }
            }
            Some(&COM_REGISTER_SLAVE) => {
                if script.reject_register {
                    conn.err(1, 1227, "Access denied; you need the REPLICATION SLAVE privilege")
                        .await?;
                } else {
                    conn.ok(1).await?;
                }
            }
            Some(&COM_BINLOG_DUMP) => {
                let offset = u32::from_le_bytes([command[1], command[2], command[3], command[4]]);
                let server_id =
                    u32::from_le_bytes([command[7], command[8], command[9], command[10]]);
                let file = String::from_utf8_lossy(&command[11..]).into_owned();
                log.dumps.lock().unwrap().push(DumpRequest {
                    server_id,
                    file: file.clone(),
                    offset,
                });
                if script.reject_dump {
                    return conn
                        .err(1, 1236, "Could not find first log file name in binary log index file")
                        .await;
                }
                return stream(conn, script, &file, offset).await;
            }
            _ => conn.err(1, 1047, "Unknown command").await?,
        }
    }
}

async fn stream(mut conn: Connection, script: &Script, file: &str, offset: u32) -> io::Result<()> {
    let mut builder = BinlogBuilder::new(file, offset);
    if script.checksum == "CRC32" {
        builder = builder.with_crc();
    }
    let rotate = builder.artificial_rotate();

    let mut seq: u8 = 1;
    let events = std::iter::once(Step::Event(rotate)).chain(script.steps.iter().cloned());
    for step in events {
        match step {
            Step::Event(event) => {
                let mut packet = Vec::with_capacity(event.len() + 1);
                packet.push(0x00);
                packet.extend_from_slice(&event);
                conn.write(seq, &packet).await?;
                seq = seq.wrapping_add(1);
            }
            Step::Pause(duration) => tokio::time::sleep(duration).await,
        }
    }

    match script.end {
        StreamEnd::Hold => {
            // Wait for the replica to hang up
            let mut buf = [0u8; 64];
            while conn.socket.read(&mut buf).await? > 0 {}
            Ok(())
        }
        StreamEnd::Eof => conn.write(seq, &[0xFE, 0x00, 0x00, 0x02, 0x00]).await,
        StreamEnd::Close => Ok(()),
    }
}
