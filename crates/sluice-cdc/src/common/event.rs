//! Row-level change events
//!
//! A [`Mutation`] is one inserted, updated or deleted row, carrying the
//! descriptor of the table it belongs to and the column values in table
//! column order.
//!
//! ## Invariants
//!
//! - `columns.len() == table.columns.len()` at translation time
//! - every value image (`old_values`, `new_values`) has that same length
//! - columns absent from a row image hold [`Value::Omitted`], which is
//!   distinct from SQL `NULL`

use base64::Engine;
use serde::Serialize;
use std::sync::Arc;

use crate::common::Position;
use crate::mysql::TableDescriptor;

/// A decoded column value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    /// SQL NULL
    Null,
    /// Column not present in this row image (partial row images)
    Omitted,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f32),
    Double(f64),
    /// Exact decimal, rendered as a string
    Decimal(String),
    String(String),
    Bytes(Vec<u8>),
    Date {
        year: u16,
        month: u8,
        day: u8,
    },
    Time {
        negative: bool,
        hours: u32,
        minutes: u8,
        seconds: u8,
        microseconds: u32,
    },
    DateTime {
        year: u16,
        month: u8,
        day: u8,
        hour: u8,
        minute: u8,
        second: u8,
        microsecond: u32,
    },
    /// Seconds since the Unix epoch (UTC)
    Timestamp { seconds: u32, microseconds: u32 },
    Year(u16),
    Json(serde_json::Value),
    /// 1-based index into the column's ENUM members
    Enum(u16),
    /// Bitmask over the column's SET members
    Set(u64),
    Bit(Vec<u8>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_omitted(&self) -> bool {
        matches!(self, Value::Omitted)
    }

    /// Integer view of signed and unsigned values that fit in `i64`.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::UInt(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) | Value::Decimal(s) => Some(s),
            _ => None,
        }
    }

    /// JSON rendering used for logging and serializing consumers.
    ///
    /// Binary data is base64 encoded; temporal values use ISO-8601 text.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null | Value::Omitted => serde_json::Value::Null,
            Value::Bool(v) => serde_json::json!(*v),
            Value::Int(v) => serde_json::json!(*v),
            Value::UInt(v) => serde_json::json!(*v),
            Value::Float(v) => serde_json::json!(*v),
            Value::Double(v) => serde_json::json!(*v),
            Value::Decimal(v) | Value::String(v) => serde_json::json!(v),
            Value::Bytes(v) | Value::Bit(v) => {
                serde_json::json!(base64::engine::general_purpose::STANDARD.encode(v))
            }
            Value::Date { year, month, day } => {
                serde_json::json!(format!("{:04}-{:02}-{:02}", year, month, day))
            }
            Value::Time {
                negative,
                hours,
                minutes,
                seconds,
                microseconds,
            } => {
                let sign = if *negative { "-" } else { "" };
                if *microseconds > 0 {
                    serde_json::json!(format!(
                        "{}{:02}:{:02}:{:02}.{:06}",
                        sign, hours, minutes, seconds, microseconds
                    ))
                } else {
                    serde_json::json!(format!("{}{:02}:{:02}:{:02}", sign, hours, minutes, seconds))
                }
            }
            Value::DateTime {
                year,
                month,
                day,
                hour,
                minute,
                second,
                microsecond,
            } => {
                if *microsecond > 0 {
                    serde_json::json!(format!(
                        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:06}",
                        year, month, day, hour, minute, second, microsecond
                    ))
                } else {
                    serde_json::json!(format!(
                        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}",
                        year, month, day, hour, minute, second
                    ))
                }
            }
            Value::Timestamp {
                seconds,
                microseconds,
            } => {
                if *microseconds > 0 {
                    serde_json::json!(*seconds as f64 + *microseconds as f64 / 1_000_000.0)
                } else {
                    serde_json::json!(*seconds)
                }
            }
            Value::Year(v) => serde_json::json!(*v),
            Value::Json(v) => v.clone(),
            Value::Enum(v) => serde_json::json!(*v),
            Value::Set(v) => serde_json::json!(*v),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

/// Operation kind of a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationOp {
    Insert,
    Update,
    Delete,
}

impl std::fmt::Display for MutationOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MutationOp::Insert => write!(f, "insert"),
            MutationOp::Update => write!(f, "update"),
            MutationOp::Delete => write!(f, "delete"),
        }
    }
}

/// Where a mutation came from in the stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MutationMetadata {
    /// Position just past the rows event that carried this row
    pub position: Position,
    /// Event timestamp (Unix epoch seconds, as written by the source)
    pub timestamp: u32,
    /// Server id of the source that wrote the event
    pub server_id: u32,
    /// GTID of the enclosing transaction, when the source uses GTIDs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gtid: Option<String>,
    /// Index of the row within its rows event
    pub row_index: usize,
}

/// One row-level change.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    Insert {
        table: Arc<TableDescriptor>,
        columns: Arc<[String]>,
        new_values: Vec<Value>,
        metadata: MutationMetadata,
    },
    Update {
        table: Arc<TableDescriptor>,
        columns: Arc<[String]>,
        old_values: Vec<Value>,
        new_values: Vec<Value>,
        metadata: MutationMetadata,
    },
    Delete {
        table: Arc<TableDescriptor>,
        columns: Arc<[String]>,
        old_values: Vec<Value>,
        metadata: MutationMetadata,
    },
}

impl Mutation {
    pub fn op(&self) -> MutationOp {
        match self {
            Mutation::Insert { .. } => MutationOp::Insert,
            Mutation::Update { .. } => MutationOp::Update,
            Mutation::Delete { .. } => MutationOp::Delete,
        }
    }

    pub fn table(&self) -> &Arc<TableDescriptor> {
        match self {
            Mutation::Insert { table, .. }
            | Mutation::Update { table, .. }
            | Mutation::Delete { table, .. } => table,
        }
    }

    pub fn columns(&self) -> &[String] {
        match self {
            Mutation::Insert { columns, .. }
            | Mutation::Update { columns, .. }
            | Mutation::Delete { columns, .. } => columns,
        }
    }

    pub fn metadata(&self) -> &MutationMetadata {
        match self {
            Mutation::Insert { metadata, .. }
            | Mutation::Update { metadata, .. }
            | Mutation::Delete { metadata, .. } => metadata,
        }
    }

    /// Row image before the change (updates and deletes).
    pub fn old_values(&self) -> Option<&[Value]> {
        match self {
            Mutation::Insert { .. } => None,
            Mutation::Update { old_values, .. } | Mutation::Delete { old_values, .. } => {
                Some(old_values)
            }
        }
    }

    /// Row image after the change (inserts and updates).
    pub fn new_values(&self) -> Option<&[Value]> {
        match self {
            Mutation::Delete { .. } => None,
            Mutation::Insert { new_values, .. } | Mutation::Update { new_values, .. } => {
                Some(new_values)
            }
        }
    }

    fn column_index(&self, column: &str) -> Option<usize> {
        self.columns().iter().position(|c| c == column)
    }

    /// Value of `column` in the before image.
    pub fn old_value(&self, column: &str) -> Option<&Value> {
        let idx = self.column_index(column)?;
        self.old_values().and_then(|v| v.get(idx))
    }

    /// Value of `column` in the after image.
    pub fn new_value(&self, column: &str) -> Option<&Value> {
        let idx = self.column_index(column)?;
        self.new_values().and_then(|v| v.get(idx))
    }

    /// Debezium-style JSON envelope: `{op, database, table, before, after, source}`.
    pub fn to_json(&self) -> serde_json::Value {
        let image = |values: Option<&[Value]>| -> serde_json::Value {
            match values {
                None => serde_json::Value::Null,
                Some(values) => {
                    let mut map = serde_json::Map::with_capacity(values.len());
                    for (name, value) in self.columns().iter().zip(values) {
                        if !value.is_omitted() {
                            map.insert(name.clone(), value.to_json());
                        }
                    }
                    serde_json::Value::Object(map)
                }
            }
        };

        let table = self.table();
        let metadata = self.metadata();
        serde_json::json!({
            "op": self.op(),
            "database": table.database,
            "table": table.table,
            "before": image(self.old_values()),
            "after": image(self.new_values()),
            "source": {
                "position": metadata.position.to_string(),
                "timestamp": metadata.timestamp,
                "server_id": metadata.server_id,
                "gtid": metadata.gtid,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mysql::{ColumnDescriptor, ColumnType};

    fn users_table() -> Arc<TableDescriptor> {
        Arc::new(TableDescriptor::new(
            "app",
            "users",
            vec![
                ColumnDescriptor::new("id", ColumnType::Long, 0),
                ColumnDescriptor::new("username", ColumnType::Varchar, 255),
            ],
        ))
    }

    fn metadata() -> MutationMetadata {
        MutationMetadata {
            position: Position::new("mysql-bin.000001", 500),
            timestamp: 1_700_000_000,
            server_id: 1,
            gtid: None,
            row_index: 0,
        }
    }

    #[test]
    fn test_update_accessors() {
        let table = users_table();
        let mutation = Mutation::Update {
            columns: table.column_names(),
            table,
            old_values: vec![Value::Int(1), "alice".into()],
            new_values: vec![Value::Int(1), "bob".into()],
            metadata: metadata(),
        };

        assert_eq!(mutation.op(), MutationOp::Update);
        assert_eq!(mutation.columns(), ["id", "username"]);
        assert_eq!(mutation.old_value("username"), Some(&Value::from("alice")));
        assert_eq!(mutation.new_value("username"), Some(&Value::from("bob")));
        assert_eq!(mutation.new_value("missing"), None);
    }

    #[test]
    fn test_insert_has_no_before_image() {
        let table = users_table();
        let mutation = Mutation::Insert {
            columns: table.column_names(),
            table,
            new_values: vec![Value::Int(7), Value::Null],
            metadata: metadata(),
        };
        assert!(mutation.old_values().is_none());
        assert_eq!(mutation.new_values().unwrap().len(), 2);
    }

    #[test]
    fn test_to_json_envelope() {
        let table = users_table();
        let mutation = Mutation::Delete {
            columns: table.column_names(),
            table,
            old_values: vec![Value::Int(3), Value::Omitted],
            metadata: metadata(),
        };

        let json = mutation.to_json();
        assert_eq!(json["op"], "delete");
        assert_eq!(json["table"], "users");
        assert_eq!(json["before"], serde_json::json!({"id": 3}));
        assert!(json["after"].is_null());
        assert_eq!(json["source"]["position"], "mysql-bin.000001:500");
    }

    #[test]
    fn test_value_to_json() {
        assert_eq!(Value::Null.to_json(), serde_json::Value::Null);
        assert_eq!(Value::Int(-4).to_json(), serde_json::json!(-4));
        assert_eq!(
            Value::Date {
                year: 2024,
                month: 1,
                day: 15
            }
            .to_json(),
            serde_json::json!("2024-01-15")
        );
        assert_eq!(
            Value::Time {
                negative: true,
                hours: 838,
                minutes: 59,
                seconds: 59,
                microseconds: 0
            }
            .to_json(),
            serde_json::json!("-838:59:59")
        );
        assert_eq!(Value::Bytes(vec![1, 2, 3]).to_json(), serde_json::json!("AQID"));
    }

    #[test]
    fn test_value_views() {
        assert_eq!(Value::UInt(5).as_i64(), Some(5));
        assert_eq!(Value::UInt(u64::MAX).as_i64(), None);
        assert_eq!(Value::Decimal("1.50".into()).as_str(), Some("1.50"));
        assert!(Value::Omitted.is_omitted());
        assert!(!Value::Omitted.is_null());
    }
}
