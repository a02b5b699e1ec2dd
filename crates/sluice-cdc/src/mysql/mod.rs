//! MySQL binlog replication
//!
//! Supports:
//! - MySQL 5.6+, 8.0+ and MariaDB 10.x sources
//! - Row-based replication (binlog_format=ROW), rows events v1 and v2
//! - CRC32 event checksums
//! - GTID tagging of mutations
//! - Table filtering
//! - Column names from table map metadata or INFORMATION_SCHEMA
//!
//! # Architecture
//!
//! ```text
//! MySQL Binlog → MySqlBinlogClient → EventDecoder → MutationTranslator → listeners
//!                                         ↑
//!                                   SchemaContext
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use sluice_cdc::mysql::{ReplicationSession, SessionConfig};
//!
//! # fn example() -> sluice_cdc::Result<()> {
//! let config = SessionConfig::new("localhost", "root")
//!     .with_password("password")
//!     .with_server_id(1001)
//!     .include_table("shop.*");
//!
//! let session = ReplicationSession::new(config)?;
//! # Ok(())
//! # }
//! ```

pub mod decoder;
pub mod json;
pub mod protocol;
pub(crate) mod reader;
pub mod schema;
pub mod session;
pub mod translator;

pub use decoder::*;
pub use json::decode_json_binary;
pub use protocol::*;
pub use schema::*;
pub use session::*;
pub use translator::*;
