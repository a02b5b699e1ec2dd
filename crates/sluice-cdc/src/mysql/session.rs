//! Replication session
//!
//! A [`ReplicationSession`] owns one replication connection to a MySQL source.
//! [`ReplicationSession::connect`] performs the handshake (authentication,
//! checksum negotiation, replica registration, dump request) and returns once
//! the stream is running; a spawned task then reads, decodes and dispatches
//! events until [`ReplicationSession::disconnect`] or a fatal error.
//!
//! ```text
//! Disconnected → Connecting → Handshaking → Streaming → Closing → Disconnected
//! ```
//!
//! The streaming task is the only writer of the schema context and of the
//! position. Positions are published through `watch` channels after the
//! mutations of the event they follow have been dispatched, so a reader never
//! sees a position ahead of delivery.
//!
//! # Example
//!
//! ```rust,ignore
//! use sluice_cdc::common::{bounded_queue, Position};
//! use sluice_cdc::mysql::{ReplicationSession, SessionConfig};
//! use std::sync::Arc;
//!
//! let config = SessionConfig::new("localhost", "replicator").with_password("secret");
//! let session = ReplicationSession::new(config)?;
//! let (producer, mut queue) = bounded_queue(1024)?;
//! session.register_listener(Arc::new(producer));
//! session.connect(Position::Current).await?;
//!
//! while let Some(mutation) = queue.recv().await {
//!     println!("{}", mutation.to_json());
//! }
//! ```

use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::decoder::{
    BinlogEvent, ChecksumAlgorithm, EventDecoder, EventHeader, FormatDescription, QueryKind,
};
use super::protocol::{BinlogStream, MySqlBinlogClient};
use super::schema::{ColumnNameResolver, ColumnNames, SchemaContext, TableDescriptor};
use super::translator::{EventContext, MutationTranslator, Translated};
use crate::common::{
    CdcError, ListenerSet, Mutation, MutationListener, Position, Result, SessionHandle,
    SessionMetrics, SessionState, TableFilter, Validator, BINLOG_FIRST_EVENT_OFFSET,
    CONNECTION_TIMEOUT_SECS, IO_TIMEOUT_SECS,
};

/// How mutations are grouped for delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    /// Deliver each rows event as soon as it is decoded
    #[default]
    PerEvent,
    /// Buffer a transaction and deliver it as one batch at commit
    PerTransaction,
}

/// Replication session configuration
///
/// # Security Note
///
/// This struct implements a custom Debug that redacts the password field
/// to prevent accidental leakage to logs.
///
/// Deserializable from any serde format; durations are given in seconds
/// (fractions allowed) and every field has a default.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// MySQL host
    pub host: String,
    /// MySQL port (default: 3306)
    pub port: u16,
    /// Username for authentication
    pub user: String,
    /// Password for authentication
    pub password: Option<String>,
    /// Server ID for replication (must be unique among all replicas)
    pub server_id: u32,
    /// Bound on TCP connect plus authentication
    #[serde(deserialize_with = "secs::deserialize")]
    pub connect_timeout: Duration,
    /// Longest silence tolerated on the stream before the session fails
    #[serde(deserialize_with = "secs::deserialize")]
    pub read_timeout: Duration,
    /// Heartbeat period requested from the source; `None` leaves the source default
    #[serde(deserialize_with = "opt_secs::deserialize")]
    pub heartbeat_interval: Option<Duration>,
    pub dispatch_mode: DispatchMode,
    /// Verify CRC32 event checksums when the source writes them
    pub verify_checksum: bool,
    /// Tables to include (database.table patterns, empty = all)
    pub include_tables: Vec<String>,
    /// Tables to exclude
    pub exclude_tables: Vec<String>,
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("server_id", &self.server_id)
            .field("connect_timeout", &self.connect_timeout)
            .field("read_timeout", &self.read_timeout)
            .field("heartbeat_interval", &self.heartbeat_interval)
            .field("dispatch_mode", &self.dispatch_mode)
            .field("verify_checksum", &self.verify_checksum)
            .field("include_tables", &self.include_tables)
            .field("exclude_tables", &self.exclude_tables)
            .finish()
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 3306,
            user: "root".to_string(),
            password: None,
            server_id: 1001, // Arbitrary default, should be unique
            connect_timeout: Duration::from_secs(CONNECTION_TIMEOUT_SECS),
            read_timeout: Duration::from_secs(IO_TIMEOUT_SECS),
            heartbeat_interval: Some(Duration::from_secs(IO_TIMEOUT_SECS / 2)),
            dispatch_mode: DispatchMode::default(),
            verify_checksum: true,
            include_tables: vec![],
            exclude_tables: vec![],
        }
    }
}

impl SessionConfig {
    pub fn new(host: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            user: user.into(),
            ..Default::default()
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_server_id(mut self, server_id: u32) -> Self {
        self.server_id = server_id;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = Some(interval);
        self
    }

    pub fn without_heartbeat(mut self) -> Self {
        self.heartbeat_interval = None;
        self
    }

    pub fn with_dispatch_mode(mut self, mode: DispatchMode) -> Self {
        self.dispatch_mode = mode;
        self
    }

    pub fn with_checksum_verification(mut self, verify: bool) -> Self {
        self.verify_checksum = verify;
        self
    }

    pub fn include_table(mut self, pattern: impl Into<String>) -> Self {
        self.include_tables.push(pattern.into());
        self
    }

    pub fn exclude_table(mut self, pattern: impl Into<String>) -> Self {
        self.exclude_tables.push(pattern.into());
        self
    }

    /// Check the configuration before any connection attempt.
    pub fn validate(&self) -> Result<()> {
        let config_err = |e: anyhow::Error| CdcError::config(e.to_string());

        Validator::validate_host(&self.host).map_err(config_err)?;
        Validator::validate_user(&self.user).map_err(config_err)?;
        for pattern in self.include_tables.iter().chain(&self.exclude_tables) {
            Validator::validate_table_pattern(pattern).map_err(config_err)?;
        }

        if self.server_id == 0 {
            return Err(CdcError::config("server_id must be non-zero"));
        }
        if self.connect_timeout.is_zero() || self.read_timeout.is_zero() {
            return Err(CdcError::config("Timeouts must be greater than zero"));
        }
        if let Some(heartbeat) = self.heartbeat_interval {
            if heartbeat.is_zero() {
                return Err(CdcError::config("heartbeat_interval must be greater than zero"));
            }
            if self.read_timeout <= heartbeat {
                return Err(CdcError::config(format!(
                    "read_timeout ({:?}) must exceed heartbeat_interval ({:?})",
                    self.read_timeout, heartbeat
                )));
            }
        }
        Ok(())
    }

    fn source_label(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

mod secs {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

mod opt_secs {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Option::<f64>::deserialize(d)?
            .map(|secs| Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom))
            .transpose()
    }
}

/// Outcome of a finished streaming task.
pub type SessionOutcome = std::result::Result<(), Arc<CdcError>>;

/// One replication connection and its listeners.
pub struct ReplicationSession {
    config: SessionConfig,
    filter: TableFilter,
    listeners: ListenerSet,
    resolver: Option<Arc<dyn ColumnNameResolver>>,
    handle: SessionHandle,
    task: tokio::sync::Mutex<Option<JoinHandle<SessionOutcome>>>,
}

impl fmt::Debug for ReplicationSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplicationSession")
            .field("config", &self.config)
            .field("listeners", &self.listeners.len())
            .field("state", &self.handle.state())
            .finish()
    }
}

impl ReplicationSession {
    pub fn new(config: SessionConfig) -> Result<Self> {
        config.validate()?;
        let filter = TableFilter::new(&config.include_tables, &config.exclude_tables)?;
        let handle = SessionHandle::new(config.source_label());
        Ok(Self {
            config,
            filter,
            listeners: ListenerSet::new(),
            resolver: None,
            handle,
            task: tokio::sync::Mutex::new(None),
        })
    }

    /// Resolve column names for table maps that do not carry them.
    pub fn with_resolver(mut self, resolver: Arc<dyn ColumnNameResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Append a listener. Takes effect from the next dispatched event.
    pub fn register_listener(&self, listener: Arc<dyn MutationListener>) {
        self.listeners.register(listener);
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    pub fn current_position(&self) -> Position {
        self.handle.current_position()
    }

    pub fn checkpoint_position(&self) -> Position {
        self.handle.checkpoint_position()
    }

    pub fn state(&self) -> SessionState {
        self.handle.state()
    }

    pub fn metrics(&self) -> &SessionMetrics {
        self.handle.metrics()
    }

    /// Connect and start streaming from `start`.
    ///
    /// Returns once the source has accepted the dump request; events are then
    /// processed on a spawned task. `Position::Current` is resolved to the
    /// source's write position during the handshake.
    pub async fn connect(&self, start: Position) -> Result<()> {
        if let Position::Binlog { source_id, offset } = &start {
            Validator::validate_log_name(source_id).map_err(|e| CdcError::config(e.to_string()))?;
            if *offset < BINLOG_FIRST_EVENT_OFFSET {
                return Err(CdcError::config(format!(
                    "Binlog offset {} is before the first event ({})",
                    offset, BINLOG_FIRST_EVENT_OFFSET
                )));
            }
        }

        let mut task = self.task.lock().await;
        if let Some(previous) = task.take() {
            if self.handle.state() != SessionState::Disconnected {
                *task = Some(previous);
                return Err(CdcError::invalid_state(format!(
                    "Session is {}",
                    self.handle.state()
                )));
            }
            // Outcome of the previous run is kept in last_error
            let _ = previous.await;
        }
        if !self.handle.try_begin_connect() {
            return Err(CdcError::invalid_state(format!(
                "Session is {}",
                self.handle.state()
            )));
        }

        let stop = self.handle.reset_stop_token();
        self.handle.set_last_error(None);

        let handshake = tokio::select! {
            _ = stop.cancelled() => {
                Err(CdcError::invalid_state("Disconnect requested during handshake"))
            }
            result = self.handshake(&start) => result,
        };
        let (stream, start, checksum) = match handshake {
            Ok(ok) => ok,
            Err(e) => {
                warn!("Handshake with {} failed: {}", self.config.source_label(), e);
                self.handle.metrics().record_error(&e);
                self.handle.set_state(SessionState::Disconnected);
                return Err(e);
            }
        };

        self.handle.publish_position(start.clone());
        self.handle.publish_checkpoint(start.clone());
        self.handle.metrics().set_connected(true);
        self.handle.set_state(SessionState::Streaming);
        info!("Streaming from {} at {}", self.config.source_label(), start);

        let stream_loop = StreamLoop {
            stream,
            decoder: EventDecoder::new(self.config.verify_checksum),
            translator: MutationTranslator::new(self.filter.clone()),
            schema: SchemaContext::new(),
            names: ColumnNames::new(self.resolver.clone()),
            format: FormatDescription::initial(checksum),
            seen_format: false,
            position: start,
            gtid: None,
            in_transaction: false,
            pending: Vec::new(),
            mode: self.config.dispatch_mode,
            read_timeout: self.config.read_timeout,
            listeners: self.listeners.clone(),
            handle: self.handle.clone(),
            stop,
        };
        *task = Some(tokio::spawn(stream_loop.run()));
        Ok(())
    }

    async fn handshake(
        &self,
        start: &Position,
    ) -> Result<(BinlogStream, Position, ChecksumAlgorithm)> {
        let config = &self.config;
        let mut client = MySqlBinlogClient::connect(
            &config.host,
            config.port,
            &config.user,
            config.password.as_deref(),
            config.connect_timeout,
        )
        .await?;
        self.handle.set_server_version(client.server_version());
        self.handle.set_state(SessionState::Handshaking);

        let checksum = client.negotiate_checksum().await?;
        debug!("Binlog checksum: {:?}", checksum);

        if let Some(interval) = config.heartbeat_interval {
            client.set_heartbeat_period(interval).await?;
        }

        let start = match start {
            Position::Current => {
                let current = client.current_binlog_position().await?;
                info!("Resolved current position to {}", current);
                current
            }
            explicit => explicit.clone(),
        };

        client.register_replica(config.server_id).await?;
        let stream = tokio::time::timeout(
            config.read_timeout,
            client.binlog_dump(config.server_id, &start),
        )
        .await
        .map_err(|_| {
            CdcError::timeout(format!(
                "Source did not answer the dump request within {:?}",
                config.read_timeout
            ))
        })??;
        Ok((stream, start, checksum))
    }

    /// Stop streaming and wait for the task to finish.
    ///
    /// No mutation is dispatched after this returns. Calling it on a stopped
    /// session is a no-op.
    pub async fn disconnect(&self) -> Result<()> {
        self.handle.request_stop();
        let task = self.task.lock().await.take();
        if let Some(task) = task {
            // A connect queued ahead of us may have swapped in a fresh token
            self.handle.request_stop();
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!("Session had already failed: {}", e),
                Err(e) => warn!("Streaming task ended abnormally: {}", e),
            }
        }
        Ok(())
    }

    /// Wait for the streaming task to end on its own and return its outcome.
    ///
    /// Returns `Ok(())` immediately if nothing is running.
    pub async fn join(&self) -> SessionOutcome {
        let mut task = self.task.lock().await;
        let Some(running) = task.as_mut() else {
            return Ok(());
        };
        // Polled by reference so a cancelled join leaves the task in place
        let outcome = running.await.unwrap_or_else(|e| {
            Err(Arc::new(CdcError::other(format!(
                "Streaming task ended abnormally: {}",
                e
            ))))
        });
        *task = None;
        outcome
    }
}

impl Drop for ReplicationSession {
    fn drop(&mut self) {
        self.handle.request_stop();
    }
}

/// State owned by the streaming task.
struct StreamLoop {
    stream: BinlogStream,
    decoder: EventDecoder,
    translator: MutationTranslator,
    schema: SchemaContext,
    names: ColumnNames,
    format: FormatDescription,
    seen_format: bool,
    /// Last fully processed position; published subject to `mode`
    position: Position,
    gtid: Option<String>,
    in_transaction: bool,
    /// Mutations of the open transaction (`PerTransaction` only)
    pending: Vec<Mutation>,
    mode: DispatchMode,
    read_timeout: Duration,
    listeners: ListenerSet,
    handle: SessionHandle,
    stop: CancellationToken,
}

impl StreamLoop {
    async fn run(mut self) -> SessionOutcome {
        self.listeners.notify_connect(&self.handle).await;

        let outcome = self.stream_events().await.map_err(Arc::new);
        match &outcome {
            Ok(()) => info!("Replication session stopped at {}", self.position),
            Err(e) => {
                error!(
                    "Replication session failed at {}: {}",
                    self.handle.current_position(),
                    e
                );
                self.handle.metrics().record_error(e);
                self.handle.set_last_error(Some(Arc::clone(e)));
            }
        }
        if !self.pending.is_empty() {
            debug!(
                "Discarding {} mutation(s) of an unfinished transaction",
                self.pending.len()
            );
        }

        self.handle.set_state(SessionState::Closing);
        self.listeners.notify_disconnect(&self.handle).await;
        self.handle.metrics().set_connected(false);
        self.handle.set_state(SessionState::Disconnected);
        outcome
    }

    async fn stream_events(&mut self) -> Result<()> {
        let stop = self.stop.clone();
        let read_timeout = self.read_timeout;

        loop {
            let data = tokio::select! {
                biased;
                _ = stop.cancelled() => return Ok(()),
                read = tokio::time::timeout(read_timeout, self.stream.next_event()) => match read {
                    Ok(data) => data?,
                    Err(_) => {
                        return Err(CdcError::connection(format!(
                            "No data from source within {:?}",
                            read_timeout
                        )))
                    }
                },
            };

            tokio::select! {
                biased;
                _ = stop.cancelled() => return Ok(()),
                result = self.process(data) => result?,
            }
        }
    }

    async fn process(&mut self, data: bytes::Bytes) -> Result<()> {
        let raw = self.decoder.decode(&data, &self.format, &self.schema)?;
        let header = raw.header;
        self.handle
            .metrics()
            .record_event(data.len() as u64, header.timestamp);
        trace!(
            "{:?} at {} (next_position={})",
            header.event_type,
            self.position,
            header.next_position
        );

        if !self.seen_format
            && !matches!(
                raw.event,
                BinlogEvent::FormatDescription(_) | BinlogEvent::Rotate(_) | BinlogEvent::Heartbeat
            )
        {
            return Err(CdcError::protocol(format!(
                "Expected FORMAT_DESCRIPTION_EVENT before {:?}",
                header.event_type
            )));
        }

        let target = advance_target(&self.position, &header);
        let mut boundary = false;

        match raw.event {
            BinlogEvent::FormatDescription(format) => {
                if self.seen_format && format.create_timestamp != 0 {
                    info!("Source restarted; discarding {} table map(s)", self.schema.len());
                    self.schema.clear();
                }
                debug!(
                    "Format description: server {} binlog v{}, checksum {:?}",
                    format.server_version, format.binlog_version, format.checksum
                );
                self.format = format;
                self.seen_format = true;
            }

            BinlogEvent::Rotate(rotate) => {
                let next = Position::new(rotate.next_binlog, rotate.position);
                if self.position.source_id() != next.source_id() {
                    info!("Rotating to {}", next);
                    self.handle.metrics().record_rotation();
                }
                self.position = next;
                // Rotation only happens between transactions
                if self.pending.is_empty() {
                    self.publish(true);
                }
                return Ok(());
            }

            BinlogEvent::TableMap(map) => {
                debug!(
                    "Table map: {}.{} (table_id={}, {} columns)",
                    map.schema_name,
                    map.table_name,
                    map.table_id,
                    map.column_count()
                );
                let names = self.names.lookup(&map).await;
                let descriptor = TableDescriptor::from_table_map(&map, names);
                self.schema.register(map.table_id, Arc::new(descriptor));
            }

            BinlogEvent::Rows(rows) => {
                let position = target.clone().unwrap_or_else(|| self.position.clone());
                let ctx = EventContext {
                    position: &position,
                    timestamp: header.timestamp,
                    server_id: header.server_id,
                    gtid: self.gtid.as_deref(),
                };
                match self.translator.translate(&rows, &self.schema, ctx)? {
                    Translated::Mutations(mutations) => match self.mode {
                        DispatchMode::PerEvent => self.deliver(&mutations).await,
                        DispatchMode::PerTransaction => {
                            self.in_transaction = true;
                            self.pending.extend(mutations);
                        }
                    },
                    Translated::Filtered { rows } => {
                        self.handle.metrics().record_filtered(rows as u64);
                    }
                }
            }

            BinlogEvent::Xid(_) => {
                self.commit().await;
                boundary = true;
            }

            BinlogEvent::Query(query) => match query.kind() {
                QueryKind::Begin => self.in_transaction = true,
                QueryKind::Commit | QueryKind::Rollback => {
                    self.commit().await;
                    boundary = true;
                }
                QueryKind::Ddl => {
                    debug!("DDL in `{}`: {}", query.schema, query.query);
                    self.names.invalidate();
                    boundary = !self.in_transaction;
                }
                QueryKind::Other => {}
            },

            BinlogEvent::Gtid(gtid) => {
                self.gtid = gtid.gtid_string();
            }

            BinlogEvent::Heartbeat => {
                trace!("Heartbeat at {}", self.position);
                return Ok(());
            }

            BinlogEvent::Ignored(_) => {}
        }

        if let Some(target) = target {
            self.position = target;
        }
        self.publish(boundary);
        Ok(())
    }

    /// Deliver the open transaction, if buffered, and close it.
    async fn commit(&mut self) {
        if !self.pending.is_empty() {
            let batch = std::mem::take(&mut self.pending);
            self.deliver(&batch).await;
        }
        self.in_transaction = false;
        self.gtid = None;
        self.handle.metrics().record_transaction();
    }

    async fn deliver(&self, mutations: &[Mutation]) {
        let rejected = self.listeners.dispatch(&self.handle, mutations).await;
        let metrics = self.handle.metrics();
        for mutation in mutations {
            metrics.record_mutations(mutation.op(), 1);
        }
        if rejected > 0 {
            metrics.record_listener_rejections(rejected as u64);
        }
    }

    /// Publish the tracked position when delivery has caught up with it.
    fn publish(&self, boundary: bool) {
        if self.mode == DispatchMode::PerTransaction && self.in_transaction {
            return;
        }
        self.handle.publish_position(self.position.clone());
        if boundary {
            self.handle.publish_checkpoint(self.position.clone());
        }
    }
}

/// Position after `header`'s event, unless the event does not move it.
fn advance_target(current: &Position, header: &EventHeader) -> Option<Position> {
    (header.next_position != 0 && !header.is_artificial() && !current.is_current())
        .then(|| current.with_offset(header.next_position as u64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mysql::decoder::{EventType, LOG_EVENT_ARTIFICIAL_F};
    use crate::mysql::protocol::Transport;

    #[test]
    fn test_config_builder() {
        let config = SessionConfig::new("db.internal", "replicator")
            .with_password("secret")
            .with_port(3307)
            .with_server_id(4242)
            .with_dispatch_mode(DispatchMode::PerTransaction)
            .with_checksum_verification(false)
            .without_heartbeat()
            .include_table("shop.*")
            .exclude_table("shop.tmp_*");

        assert_eq!(config.host, "db.internal");
        assert_eq!(config.port, 3307);
        assert_eq!(config.server_id, 4242);
        assert_eq!(config.dispatch_mode, DispatchMode::PerTransaction);
        assert!(!config.verify_checksum);
        assert!(config.heartbeat_interval.is_none());
        assert_eq!(config.include_tables, vec!["shop.*"]);
        assert_eq!(config.exclude_tables, vec!["shop.tmp_*"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_debug_redacts_password() {
        let config =
            SessionConfig::new("localhost", "admin").with_password("super_secret_password");
        let debug_output = format!("{:?}", config);

        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains("super_secret_password"));
        assert!(debug_output.contains("admin"));
    }

    #[test]
    fn test_config_validation() {
        assert!(SessionConfig::default().validate().is_ok());
        assert!(SessionConfig::new("", "root").validate().is_err());
        assert!(SessionConfig::default().with_server_id(0).validate().is_err());
        assert!(SessionConfig::default()
            .with_read_timeout(Duration::from_secs(10))
            .with_heartbeat_interval(Duration::from_secs(10))
            .validate()
            .is_err());
        assert!(SessionConfig::default()
            .with_read_timeout(Duration::from_secs(10))
            .without_heartbeat()
            .validate()
            .is_ok());
        assert!(SessionConfig::default()
            .include_table("")
            .validate()
            .is_err());
    }

    #[test]
    fn test_config_deserialize_with_defaults() {
        let config: SessionConfig = serde_json::from_value(serde_json::json!({
            "host": "10.0.0.5",
            "user": "cdc",
            "password": "pw",
            "read_timeout": 2.5,
            "heartbeat_interval": null,
            "dispatch_mode": "per_transaction",
            "exclude_tables": ["*.audit"]
        }))
        .unwrap();

        assert_eq!(config.host, "10.0.0.5");
        assert_eq!(config.port, 3306);
        assert_eq!(config.read_timeout, Duration::from_millis(2500));
        assert_eq!(config.connect_timeout, Duration::from_secs(CONNECTION_TIMEOUT_SECS));
        assert!(config.heartbeat_interval.is_none());
        assert_eq!(config.dispatch_mode, DispatchMode::PerTransaction);
        assert_eq!(config.exclude_tables, vec!["*.audit"]);

        let bad =
            serde_json::from_value::<SessionConfig>(serde_json::json!({"read_timeout": -1.0}));
        assert!(bad.is_err());
    }

    #[test]
    fn test_advance_target() {
        let header = |next_position, flags| EventHeader {
            timestamp: 0,
            event_type: EventType::XidEvent,
            type_code: 16,
            server_id: 1,
            event_length: 31,
            next_position,
            flags,
        };
        let at = Position::new("mysql-bin.000002", 100);

        assert_eq!(
            advance_target(&at, &header(250, 0)),
            Some(Position::new("mysql-bin.000002", 250))
        );
        assert_eq!(advance_target(&at, &header(0, 0)), None);
        assert_eq!(advance_target(&at, &header(250, LOG_EVENT_ARTIFICIAL_F)), None);
        assert_eq!(advance_target(&Position::Current, &header(250, 0)), None);
    }

    #[tokio::test]
    async fn test_connect_refused_returns_to_disconnected() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let session = ReplicationSession::new(
            SessionConfig::new("127.0.0.1", "root")
                .with_port(port)
                .with_connect_timeout(Duration::from_secs(2)),
        )
        .unwrap();

        let err = session.connect(Position::Current).await.unwrap_err();
        assert!(err.is_retriable(), "{err}");
        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(session.metrics().snapshot().errors_total, 1);

        // Nothing running: both are no-ops
        session.disconnect().await.unwrap();
        session.disconnect().await.unwrap();
        assert!(session.join().await.is_ok());
    }

    #[test]
    fn test_stream_loop_can_be_spawned() {
        fn spawnable<F, Fut>(_: F)
        where
            F: FnOnce(StreamLoop) -> Fut,
            Fut: std::future::Future + Send + 'static,
        {
        }
        fn shareable<T: ?Sized + Send + Sync>() {}

        spawnable(StreamLoop::run);
        shareable::<Box<dyn Transport>>();
    }

    #[tokio::test]
    async fn test_connect_rejects_bad_start_position() {
        let session = ReplicationSession::new(SessionConfig::default()).unwrap();
        let err = session
            .connect(Position::new("mysql-bin.000001", 2))
            .await
            .unwrap_err();
        assert!(matches!(err, CdcError::Config(_)));
        assert_eq!(session.state(), SessionState::Disconnected);
    }
}
