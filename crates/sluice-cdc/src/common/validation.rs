//! Input validation for session settings
//!
//! Protects against:
//! - Malformed host names and account names reaching the handshake
//! - Log file names that could address files outside the binlog index
//! - Table filter patterns with characters no MySQL identifier uses

use anyhow::{anyhow, Result};
use regex::Regex;
use std::sync::LazyLock;

/// Maximum MySQL account name length (MySQL 8.0)
const MAX_USER_LENGTH: usize = 32;

/// Maximum host name length (RFC 1035)
const MAX_HOST_LENGTH: usize = 253;

/// Maximum binlog file name length
const MAX_LOG_NAME_LENGTH: usize = 255;

/// Maximum size of a single reassembled packet (1 GiB, MySQL's `max_allowed_packet` ceiling)
pub const MAX_PACKET_SIZE: usize = 1024 * 1024 * 1024;

/// Default TCP connect + handshake timeout
pub const CONNECTION_TIMEOUT_SECS: u64 = 30;

/// Default no-bytes watchdog while streaming
pub const IO_TIMEOUT_SECS: u64 = 60;

/// Binlog file names: `mysql-bin.000001`, `binlog.000042`, `host-relay.000003`
static LOG_NAME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.\-]*$").unwrap());

/// `db.table` patterns with `*`/`?` wildcards, or a bare table pattern
static TABLE_PATTERN_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_$*?]+(\.[A-Za-z0-9_$*?]+)?$").unwrap());

static HOST_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_.:\-\[\]]+$").unwrap());

/// Validator for session inputs
pub struct Validator;

impl Validator {
    /// Validate a host name or IP literal.
    pub fn validate_host(host: &str) -> Result<()> {
        if host.is_empty() {
            return Err(anyhow!("Host cannot be empty"));
        }
        if host.len() > MAX_HOST_LENGTH {
            return Err(anyhow!(
                "Host too long: {} chars (max: {})",
                host.len(),
                MAX_HOST_LENGTH
            ));
        }
        if !HOST_REGEX.is_match(host) {
            return Err(anyhow!("Invalid host '{}'", host));
        }
        Ok(())
    }

    /// Validate a replication account name.
    ///
    /// The name is sent NUL-terminated in the handshake response, so an
    /// embedded NUL would truncate it.
    pub fn validate_user(user: &str) -> Result<()> {
        if user.is_empty() {
            return Err(anyhow!("User cannot be empty"));
        }
        if user.chars().count() > MAX_USER_LENGTH {
            return Err(anyhow!(
                "User too long: {} chars (max: {})",
                user.chars().count(),
                MAX_USER_LENGTH
            ));
        }
        if user.contains('\0') {
            return Err(anyhow!("User cannot contain NUL bytes"));
        }
        Ok(())
    }

    /// Validate a binlog file name used as a start position.
    pub fn validate_log_name(name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(anyhow!("Log file name cannot be empty"));
        }
        if name.len() > MAX_LOG_NAME_LENGTH {
            return Err(anyhow!(
                "Log file name too long: {} chars (max: {})",
                name.len(),
                MAX_LOG_NAME_LENGTH
            ));
        }
        if name.contains("..") || !LOG_NAME_REGEX.is_match(name) {
            return Err(anyhow!(
                "Invalid log file name '{}': expected a name like 'mysql-bin.000001'",
                name
            ));
        }
        Ok(())
    }

    /// Validate a table filter pattern (`db.table`, `db.*`, `*.audit_?`).
    pub fn validate_table_pattern(pattern: &str) -> Result<()> {
        if pattern.is_empty() {
            return Err(anyhow!("Table pattern cannot be empty"));
        }
        if !TABLE_PATTERN_REGEX.is_match(pattern) {
            return Err(anyhow!(
                "Invalid table pattern '{}': expected 'database.table' \
                 with optional * and ? wildcards",
                pattern
            ));
        }
        Ok(())
    }

    /// Validate a reassembled packet size.
    pub fn validate_packet_size(size: usize) -> Result<()> {
        if size > MAX_PACKET_SIZE {
            return Err(anyhow!(
                "Packet size {} bytes exceeds maximum {}",
                size,
                MAX_PACKET_SIZE
            ));
        }
        Ok(())
    }
}
