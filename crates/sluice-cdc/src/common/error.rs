//! Error types for replication sessions
//!
//! Errors are classified so callers can decide whether reconnecting from the
//! last checkpoint makes sense (network trouble) or whether the stream itself
//! can no longer be trusted (protocol and decode failures).

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error categories for metrics and alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Socket, timeout and end-of-stream failures
    Network,
    /// Credentials or replication privileges rejected
    Authentication,
    /// Unexpected packets or event ordering from the source
    Protocol,
    /// Malformed event payloads
    Decode,
    /// Invalid settings supplied by the caller
    Configuration,
    /// Other/unknown errors
    Other,
}

/// Replication errors
#[derive(Error, Debug)]
pub enum CdcError {
    /// TCP connect or handshake failure
    #[error("Connection error: {0}")]
    Connection(String),

    /// Authentication or replica registration rejected
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Server error packet or unexpected protocol flow
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Event payload could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// A rows event referenced a table id with no preceding table map
    #[error("No table map registered for table_id={0}")]
    MissingTableMap(u64),

    /// Row-bearing event this client cannot decode
    #[error("Unsupported event: {0}")]
    UnsupportedEvent(String),

    /// CRC32 mismatch on an event
    #[error("Checksum mismatch: expected {expected:#010x}, computed {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    /// Operation not valid in the current session state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Timeout error
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The source closed the stream
    #[error("Connection closed")]
    ConnectionClosed,

    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl CdcError {
    /// Create a connection error
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Create an authentication error
    pub fn authentication(msg: impl Into<String>) -> Self {
        Self::Authentication(msg.into())
    }

    /// Create a protocol error
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a decode error
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// Create an unsupported event error
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::UnsupportedEvent(msg.into())
    }

    /// Create an invalid state error
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create a generic error
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Check if reconnecting from the last checkpoint may succeed.
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Connection(_) | Self::ConnectionClosed | Self::Timeout(_) => true,
            Self::Io(e) => {
                use std::io::ErrorKind;
                matches!(
                    e.kind(),
                    ErrorKind::ConnectionReset
                        | ErrorKind::ConnectionAborted
                        | ErrorKind::ConnectionRefused
                        | ErrorKind::BrokenPipe
                        | ErrorKind::UnexpectedEof
                        | ErrorKind::TimedOut
                        | ErrorKind::Interrupted
                )
            }
            Self::Authentication(_)
            | Self::Protocol(_)
            | Self::Decode(_)
            | Self::MissingTableMap(_)
            | Self::UnsupportedEvent(_)
            | Self::ChecksumMismatch { .. }
            | Self::InvalidState(_)
            | Self::Config(_)
            | Self::Json(_)
            | Self::Other(_) => false,
        }
    }

    /// True when the byte stream can no longer be trusted to stay framed.
    pub fn is_fatal_for_stream(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Protocol | ErrorCategory::Decode
        )
    }

    /// Get the error category for metrics and alerting.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Connection(_) => ErrorCategory::Network,
            Self::ConnectionClosed => ErrorCategory::Network,
            Self::Timeout(_) => ErrorCategory::Network,
            Self::Io(_) => ErrorCategory::Network,
            Self::Authentication(_) => ErrorCategory::Authentication,
            Self::Protocol(_) => ErrorCategory::Protocol,
            Self::MissingTableMap(_) => ErrorCategory::Protocol,
            Self::Decode(_) => ErrorCategory::Decode,
            Self::UnsupportedEvent(_) => ErrorCategory::Decode,
            Self::ChecksumMismatch { .. } => ErrorCategory::Decode,
            Self::Config(_) => ErrorCategory::Configuration,
            Self::InvalidState(_) => ErrorCategory::Other,
            Self::Json(_) => ErrorCategory::Other,
            Self::Other(_) => ErrorCategory::Other,
        }
    }

    /// Get a metric-safe error code.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Connection(_) => "connection_error",
            Self::Authentication(_) => "auth_error",
            Self::Protocol(_) => "protocol_error",
            Self::Decode(_) => "decode_error",
            Self::MissingTableMap(_) => "missing_table_map",
            Self::UnsupportedEvent(_) => "unsupported_event",
            Self::ChecksumMismatch { .. } => "checksum_mismatch",
            Self::InvalidState(_) => "invalid_state",
            Self::Config(_) => "config_error",
            Self::Timeout(_) => "timeout",
            Self::ConnectionClosed => "connection_closed",
            Self::Io(_) => "io_error",
            Self::Json(_) => "json_error",
            Self::Other(_) => "unknown",
        }
    }
}

/// Result type for replication operations
pub type Result<T> = std::result::Result<T, CdcError>;
