//! Test harness for replication session tests
//!
//! - [`fake_source`] - in-process MySQL source serving scripted binlog events
//! - [`binlog`] - byte-exact binlog event builders
//! - [`mysql`] - real MySQL via testcontainers (Docker required)

#![allow(dead_code)]

pub mod binlog;
pub mod fake_source;
pub mod mysql;

pub use binlog::{BinlogBuilder, Cell, ColumnSpec, TableSpec};
pub use fake_source::{DumpRequest, FakeSource, Script, Step, StreamEnd};
pub use mysql::MySqlTestContainer;

use std::sync::Once;
use std::time::Duration;

static INIT: Once = Once::new();

/// Initialize test logging (idempotent)
pub fn init_test_logging() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::from_default_env()
                    .add_directive("sluice_cdc=debug".parse().unwrap())
                    .add_directive("testcontainers=info".parse().unwrap()),
            )
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// Upper bound for any single wait in a test
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Event propagation wait time for the Docker-backed tests
pub const EVENT_PROPAGATION_DELAY_MS: u64 = 500;
