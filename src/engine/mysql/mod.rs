//! MySQL Database Engine Implementation
//!
//! This module implements the driver seam for MySQL databases (including MariaDB).
//!
//! # Features
//! - One bounded `mysql_async::Pool` per named connection
//! - Streaming row collection with a hard row cap
//! - Text-protocol numeric columns decoded to integers and floats
//!
//! # Implementation Notes
//! - Pools hold at most 5 connections; idle connections beyond 2 are
//!   released after 60s of inactivity
//! - Every round-trip is bounded to 30s via `tokio::time::timeout`
//! - DECIMAL stays text to keep its precision
//! - BLOB data that is not valid UTF-8 is Base64-encoded for JSON safety
//! - The session always accepts multi-statement batches; callers must hand
//!   over a single statement

use mysql_async::consts::{ColumnFlags, ColumnType};
use mysql_async::prelude::*;
use mysql_async::{OptsBuilder, Pool, PoolConstraints, PoolOpts, Value as MySqlValue};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::config::ConnectionPolicy;
use crate::engine::{Connector, DatabaseHandle, QueryResult, Value, WriteResult};
use crate::error::{Result, WardenError};

/// Upper bound for connect, read and write round-trips
pub const SESSION_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum open connections per pool
pub const MAX_OPEN_CONNECTIONS: usize = 5;

/// Idle connections kept beyond the inactivity TTL
pub const MAX_IDLE_CONNECTIONS: usize = 2;

const INACTIVE_CONNECTION_TTL: Duration = Duration::from_secs(60);

/// MySQL connector
#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlConnector;

impl Connector for MySqlConnector {
    type Handle = MySqlHandle;

    async fn open(&self, name: &str, policy: &ConnectionPolicy) -> Result<MySqlHandle> {
        let opts = build_mysql_opts(policy)?;

        tracing::debug!(
            connection = %name,
            host = %policy.host,
            port = policy.port,
            database = %policy.database,
            "opening MySQL pool"
        );

        Ok(MySqlHandle { name: Arc::from(name), pool: Pool::new(opts) })
    }
}

/// Pooled MySQL handle
#[derive(Debug, Clone)]
pub struct MySqlHandle {
    name: Arc<str>,
    pool: Pool,
}

impl MySqlHandle {
    async fn get_conn(&self) -> Result<mysql_async::Conn> {
        self.pool.get_conn().await.map_err(|e| {
            WardenError::connection_failed(format!("failed to connect to '{}': {e}", self.name))
        })
    }
}

impl DatabaseHandle for MySqlHandle {
    async fn ping(&self) -> Result<()> {
        let probe = async {
            let mut conn = self.get_conn().await?;
            conn.ping().await.map_err(|e| {
                WardenError::connection_failed(format!("failed to connect to '{}': {e}", self.name))
            })
        };

        bounded(probe, || {
            WardenError::connection_failed(format!(
                "failed to connect to '{}': timed out after {}s",
                self.name,
                SESSION_TIMEOUT.as_secs()
            ))
        })
        .await
    }

    async fn query(&self, sql: &str, max_rows: usize) -> Result<QueryResult> {
        let run = async {
            let mut conn = self.get_conn().await?;
            let mut result = conn.query_iter(sql).await.map_err(execution_error)?;

            let columns = result.columns_ref().to_vec();
            let names: Vec<String> =
                columns.iter().map(|column| column.name_str().into_owned()).collect();

            let mut rows = Vec::new();
            while rows.len() < max_rows {
                let Some(row) = result.next().await.map_err(decode_error)? else {
                    break;
                };

                let mut values = Vec::with_capacity(columns.len());
                for (idx, column) in columns.iter().enumerate() {
                    let raw = row.as_ref(idx).ok_or_else(|| {
                        WardenError::decode_failed(format!(
                            "missing value for column '{}'",
                            column.name_str()
                        ))
                    })?;
                    values.push(decode_value(raw, column.column_type(), column.flags()));
                }
                rows.push(values);
            }

            // Rows past the cap are read and discarded so the connection is reusable
            result.drop_result().await.map_err(execution_error)?;

            Ok(QueryResult::new(names, rows))
        };

        bounded(run, timeout_error).await
    }

    async fn execute(&self, sql: &str) -> Result<WriteResult> {
        let run = async {
            let mut conn = self.get_conn().await?;
            conn.query_drop(sql).await.map_err(execution_error)?;

            Ok(WriteResult {
                rows_affected: conn.affected_rows(),
                last_insert_id: conn.last_insert_id().filter(|id| *id != 0),
            })
        };

        bounded(run, timeout_error).await
    }

    async fn close(self) -> Result<()> {
        let name = Arc::clone(&self.name);
        self.pool.disconnect().await.map_err(|e| {
            WardenError::connection_failed(format!("failed to close connection '{name}': {e}"))
        })
    }
}

/// Build MySQL connection options from a connection policy
fn build_mysql_opts(policy: &ConnectionPolicy) -> Result<OptsBuilder> {
    let constraints = PoolConstraints::new(MAX_IDLE_CONNECTIONS, MAX_OPEN_CONNECTIONS)
        .ok_or_else(|| WardenError::config_error("invalid pool constraints"))?;

    let pool_opts = PoolOpts::default()
        .with_constraints(constraints)
        .with_inactive_connection_ttl(INACTIVE_CONNECTION_TTL);

    let opts = OptsBuilder::default()
        .ip_or_hostname(policy.host.as_str())
        .tcp_port(policy.port)
        .user(Some(policy.user.as_str()))
        .pass(Some(policy.password.as_str()))
        .db_name(Some(policy.database.as_str()))
        .pool_opts(pool_opts);

    Ok(opts)
}

/// Run a driver round-trip under [`SESSION_TIMEOUT`]
async fn bounded<T>(
    fut: impl Future<Output = Result<T>>,
    on_timeout: impl FnOnce() -> WardenError,
) -> Result<T> {
    tokio::time::timeout(SESSION_TIMEOUT, fut).await.unwrap_or_else(|_| Err(on_timeout()))
}

fn timeout_error() -> WardenError {
    WardenError::query_failed(format!(
        "query exceeded timeout of {}s",
        SESSION_TIMEOUT.as_secs()
    ))
}

fn execution_error(e: mysql_async::Error) -> WardenError {
    WardenError::query_failed(e.to_string())
}

fn decode_error(e: mysql_async::Error) -> WardenError {
    WardenError::decode_failed(e.to_string())
}

/// Convert a MySQL value to a result cell
///
/// The text protocol delivers every non-NULL value as bytes; integer and
/// floating point columns are parsed back to numbers, everything else
/// becomes text.
fn decode_value(value: &MySqlValue, column_type: ColumnType, flags: ColumnFlags) -> Value {
    match value {
        MySqlValue::NULL => Value::Null,

        MySqlValue::Bytes(bytes) => decode_bytes(bytes, column_type, flags),

        MySqlValue::Int(i) => Value::Int(*i),

        MySqlValue::UInt(u) => Value::UInt(*u),

        MySqlValue::Float(f) => Value::Float(f64::from(*f)),

        MySqlValue::Double(d) => Value::Float(*d),

        MySqlValue::Date(year, month, day, hour, minute, second, micro) => {
            let datetime = if *micro > 0 {
                format!("{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}.{micro:06}")
            } else {
                format!("{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}")
            };
            Value::Text(datetime)
        }

        MySqlValue::Time(is_negative, days, hours, minutes, seconds, micro) => {
            let sign = if *is_negative { "-" } else { "" };
            let total_hours = days * 24 + u32::from(*hours);
            Value::Text(format!("{sign}{total_hours:02}:{minutes:02}:{seconds:02}.{micro:06}"))
        }
    }
}

fn decode_bytes(bytes: &[u8], column_type: ColumnType, flags: ColumnFlags) -> Value {
    let text = match std::str::from_utf8(bytes) {
        Ok(text) => text,
        Err(_) => return Value::from_bytes(bytes),
    };

    let parsed = match column_type {
        ColumnType::MYSQL_TYPE_TINY
        | ColumnType::MYSQL_TYPE_SHORT
        | ColumnType::MYSQL_TYPE_INT24
        | ColumnType::MYSQL_TYPE_LONG
        | ColumnType::MYSQL_TYPE_LONGLONG
        | ColumnType::MYSQL_TYPE_YEAR => {
            if flags.contains(ColumnFlags::UNSIGNED_FLAG) {
                text.parse().ok().map(Value::UInt)
            } else {
                text.parse().ok().map(Value::Int)
            }
        }
        ColumnType::MYSQL_TYPE_FLOAT | ColumnType::MYSQL_TYPE_DOUBLE => {
            text.parse().ok().map(Value::Float)
        }
        _ => None,
    };

    parsed.unwrap_or_else(|| Value::Text(text.to_string()))
}
