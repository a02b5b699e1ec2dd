//! Replication stream positions
//!
//! A position names a place in the source's binary log: a log file
//! identifier plus a byte offset, or the `Current` sentinel meaning "wherever
//! the source is writing when the handshake happens".
//!
//! Positions order lexicographically by `(source_id, offset)`. MySQL names
//! its log files with a zero-padded, monotonically increasing suffix
//! (`mysql-bin.000009` < `mysql-bin.000010`), so string order is rotation
//! order. `Current` is not comparable with anything.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::common::{CdcError, Result};

/// Offset of the first event in every binlog file (after the 4-byte magic).
pub const BINLOG_FIRST_EVENT_OFFSET: u64 = 4;

/// A place in the replication stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Position {
    /// The source's live position, resolved at handshake time.
    Current,
    /// An explicit log file and byte offset.
    Binlog { source_id: String, offset: u64 },
}

impl Position {
    /// Create an explicit position.
    pub fn new(source_id: impl Into<String>, offset: u64) -> Self {
        Self::Binlog {
            source_id: source_id.into(),
            offset,
        }
    }

    /// Position of the first event in a log file.
    pub fn start_of(source_id: impl Into<String>) -> Self {
        Self::new(source_id, BINLOG_FIRST_EVENT_OFFSET)
    }

    pub fn is_current(&self) -> bool {
        matches!(self, Self::Current)
    }

    /// Log file identifier, `None` for the sentinel.
    pub fn source_id(&self) -> Option<&str> {
        match self {
            Self::Current => None,
            Self::Binlog { source_id, .. } => Some(source_id),
        }
    }

    /// Byte offset, `None` for the sentinel.
    pub fn offset(&self) -> Option<u64> {
        match self {
            Self::Current => None,
            Self::Binlog { offset, .. } => Some(*offset),
        }
    }

    /// A new position in the same file at `offset`.
    ///
    /// The sentinel stays the sentinel: there is no file to move within.
    pub fn with_offset(&self, offset: u64) -> Self {
        match self {
            Self::Current => Self::Current,
            Self::Binlog { source_id, .. } => Self::new(source_id.clone(), offset),
        }
    }
}

impl PartialOrd for Position {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (
                Self::Binlog {
                    source_id: a_id,
                    offset: a_off,
                },
                Self::Binlog {
                    source_id: b_id,
                    offset: b_off,
                },
            ) => Some(a_id.cmp(b_id).then(a_off.cmp(b_off))),
            (Self::Current, Self::Current) => Some(Ordering::Equal),
            _ => None,
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Current => write!(f, "current"),
            Self::Binlog { source_id, offset } => write!(f, "{}:{}", source_id, offset),
        }
    }
}

impl FromStr for Position {
    type Err = CdcError;

    /// Parses `current` or `file:offset` (the offset after the last colon).
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("current") {
            return Ok(Self::Current);
        }
        let (file, offset) = s.rsplit_once(':').ok_or_else(|| {
            CdcError::config(format!("Invalid position '{}': expected file:offset", s))
        })?;
        if file.is_empty() {
            return Err(CdcError::config(format!(
                "Invalid position '{}': empty log file name",
                s
            )));
        }
        let offset = offset
            .parse::<u64>()
            .map_err(|e| CdcError::config(format!("Invalid position offset in '{}': {}", s, e)))?;
        Ok(Self::new(file, offset))
    }
}
