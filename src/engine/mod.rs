//! Database Engine Traits and Core Types
//!
//! This module defines the seam between the connection manager and the
//! database driver, plus the plain result structures every execution mode
//! returns.
//!
//! # Driver Seam
//! - [`Connector`] opens a pooled handle for a named connection policy.
//! - [`DatabaseHandle`] is that handle: cheap to clone, safe for concurrent
//!   statements, and able to probe, query, execute and close itself.
//!
//! The manager owns policy enforcement. Drivers never inspect SQL for safety;
//! they only execute what they are given and normalize the results.

use serde::{Serialize, Serializer};
use std::future::Future;

use crate::config::ConnectionPolicy;
use crate::error::Result;

pub mod memory;

// MySQL engine
#[cfg(feature = "mysql")]
pub mod mysql;

/// A single cell in a result row
///
/// Raw bytes never reach this type: drivers convert them to [`Value::Text`]
/// so results serialize uniformly.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int(i64),
    UInt(u64),
    Float(f64),
    Text(String),
}

impl Value {
    /// Text content, if this is a text value
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Integer content; numeric text is parsed as well
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::UInt(u) => i64::try_from(*u).ok(),
            Self::Text(s) => s.trim().parse().ok(),
            Self::Null | Self::Float(_) => None,
        }
    }

    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Convert raw column bytes to text (UTF-8 verbatim, otherwise Base64)
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Self {
        match std::str::from_utf8(bytes) {
            Ok(s) => Self::Text(s.to_string()),
            Err(_) => {
                use base64::Engine;
                Self::Text(base64::engine::general_purpose::STANDARD.encode(bytes))
            }
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_none(),
            Self::Int(i) => serializer.serialize_i64(*i),
            Self::UInt(u) => serializer.serialize_u64(*u),
            // NaN and infinities have no JSON form
            Self::Float(f) if !f.is_finite() => serializer.serialize_none(),
            Self::Float(f) => serializer.serialize_f64(*f),
            Self::Text(s) => serializer.serialize_str(s),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

/// Query execution result
///
/// Rows are fixed-width and aligned with `columns`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryResult {
    /// Column names in result set order
    pub columns: Vec<String>,

    /// Result rows, one value per column
    pub rows: Vec<Vec<Value>>,

    /// Number of rows returned (never above the connection's `max_rows`)
    pub count: usize,
}

impl QueryResult {
    /// Build a result, deriving `count` from the collected rows
    #[must_use]
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        let count = rows.len();
        Self { columns, rows, count }
    }

    /// Cell lookup by row index and column name
    #[must_use]
    pub fn get(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.columns.iter().position(|c| c == column)?;
        self.rows.get(row)?.get(idx)
    }

    /// Rows as (column, value) pairs in column order
    pub fn records(&self) -> impl Iterator<Item = Vec<(&str, &Value)>> + '_ {
        self.rows
            .iter()
            .map(|row| self.columns.iter().map(String::as_str).zip(row.iter()).collect())
    }

    /// Rows as JSON objects keyed by column name
    #[must_use]
    pub fn to_objects(&self) -> Vec<serde_json::Map<String, serde_json::Value>> {
        self.records()
            .map(|record| {
                record
                    .into_iter()
                    .map(|(column, value)| {
                        (column.to_string(), serde_json::to_value(value).unwrap_or_default())
                    })
                    .collect()
            })
            .collect()
    }
}

/// Write execution result
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WriteResult {
    /// Number of rows affected
    pub rows_affected: u64,

    /// Auto-increment id generated by the statement, when the driver reports one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_insert_id: Option<u64>,
}

/// Result of an unchecked execution
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnsafeResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_result: Option<QueryResult>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub write_result: Option<WriteResult>,

    /// Fixed warning attached to every unsafe execution
    pub warning: String,

    /// Checks that would have blocked this statement, or "none"
    pub skipped_check: String,
}

/// Connection listing entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionSummary {
    pub name: String,
    pub read_only: bool,
}

/// A live, pooled database handle
///
/// Clones share the same underlying pool.
pub trait DatabaseHandle: Clone + Send + Sync + 'static {
    /// Lightweight liveness probe
    fn ping(&self) -> impl Future<Output = Result<()>> + Send;

    /// Run a row-returning statement, collecting at most `max_rows` rows
    ///
    /// Rows past the cap are read off the wire and discarded, never buffered.
    fn query(&self, sql: &str, max_rows: usize) -> impl Future<Output = Result<QueryResult>> + Send;

    /// Run a statement that returns no rows
    fn execute(&self, sql: &str) -> impl Future<Output = Result<WriteResult>> + Send;

    /// Release every connection held by this handle
    fn close(self) -> impl Future<Output = Result<()>> + Send;
}

/// Opens pooled handles for named connections
pub trait Connector: Send + Sync + 'static {
    type Handle: DatabaseHandle;

    /// Open a new handle for `policy`
    ///
    /// Opening may be lazy; the manager probes the handle before storing it.
    fn open(
        &self,
        name: &str,
        policy: &ConnectionPolicy,
    ) -> impl Future<Output = Result<Self::Handle>> + Send;
}
