//! In-Memory Scripted Engine
//!
//! A driver that never touches the network. Result sets and affected-row
//! counts are scripted up front by statement prefix, and every statement the
//! manager lets through is recorded unless recording is switched off. Used by
//! the test suite, the benchmarks and `serve --dry-run`.
//!
//! Lookups match the trimmed, upper-cased statement against the scripted
//! prefixes in insertion order; the first match wins. Unscripted queries
//! return an empty result and unscripted writes affect zero rows.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::config::ConnectionPolicy;
use crate::engine::{Connector, DatabaseHandle, QueryResult, WriteResult};
use crate::error::{Result, WardenError};

/// How a recorded statement reached the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Query,
    Execute,
}

/// A statement that reached the driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedStatement {
    pub connection: String,
    pub sql: String,
    pub kind: StatementKind,
}

#[derive(Default)]
struct ScriptState {
    results: Mutex<Vec<(String, QueryResult)>>,
    writes: Mutex<Vec<(String, WriteResult)>>,
    failures: Mutex<Vec<String>>,
    log: Mutex<Vec<RecordedStatement>>,
    opens: AtomicUsize,
    closes: AtomicUsize,
    fail_open: AtomicBool,
    fail_ping: AtomicBool,
    skip_log: AtomicBool,
    open_delay_ms: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn normalize(sql: &str) -> String {
    sql.trim().to_uppercase()
}

/// Scripted connector; clones share the same script and recordings
#[derive(Clone, Default)]
pub struct ScriptedConnector {
    state: Arc<ScriptState>,
}

impl ScriptedConnector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer queries starting with `prefix` with `result`
    #[must_use]
    pub fn with_result(self, prefix: &str, result: QueryResult) -> Self {
        lock(&self.state.results).push((normalize(prefix), result));
        self
    }

    /// Answer writes starting with `prefix` with `result`
    #[must_use]
    pub fn with_write(self, prefix: &str, result: WriteResult) -> Self {
        lock(&self.state.writes).push((normalize(prefix), result));
        self
    }

    /// Fail any statement starting with `prefix` with a driver error
    #[must_use]
    pub fn with_failure(self, prefix: &str) -> Self {
        lock(&self.state.failures).push(normalize(prefix));
        self
    }

    /// Delay every open, to widen race windows in tests
    #[must_use]
    pub fn with_open_delay(self, delay: Duration) -> Self {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.state.open_delay_ms.store(millis, Ordering::SeqCst);
        self
    }

    /// Stop keeping the statement log; statements are still traced at debug level
    #[must_use]
    pub fn without_recording(self) -> Self {
        self.state.skip_log.store(true, Ordering::SeqCst);
        self
    }

    /// Make subsequent opens fail
    pub fn set_open_failure(&self, fail: bool) {
        self.state.fail_open.store(fail, Ordering::SeqCst);
    }

    /// Make pings on every handle fail
    pub fn set_ping_failure(&self, fail: bool) {
        self.state.fail_ping.store(fail, Ordering::SeqCst);
    }

    /// Number of open sequences started
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.state.opens.load(Ordering::SeqCst)
    }

    /// Number of handles closed
    #[must_use]
    pub fn close_count(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }

    /// Every statement that reached the driver, in order
    #[must_use]
    pub fn statements(&self) -> Vec<RecordedStatement> {
        lock(&self.state.log).clone()
    }
}

impl Connector for ScriptedConnector {
    type Handle = ScriptedHandle;

    async fn open(&self, name: &str, _policy: &ConnectionPolicy) -> Result<ScriptedHandle> {
        self.state.opens.fetch_add(1, Ordering::SeqCst);

        let delay = self.state.open_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        if self.state.fail_open.load(Ordering::SeqCst) {
            return Err(WardenError::connection_failed(format!(
                "failed to open connection '{name}': scripted open failure"
            )));
        }

        Ok(ScriptedHandle {
            state: Arc::clone(&self.state),
            connection: name.to_string(),
            closed: Arc::new(AtomicBool::new(false)),
        })
    }
}

/// Handle produced by [`ScriptedConnector`]
#[derive(Clone)]
pub struct ScriptedHandle {
    state: Arc<ScriptState>,
    connection: String,
    closed: Arc<AtomicBool>,
}

impl ScriptedHandle {
    fn record(&self, sql: &str, kind: StatementKind) -> Result<String> {
        let normalized = normalize(sql);
        if lock(&self.state.failures).iter().any(|prefix| normalized.starts_with(prefix)) {
            return Err(WardenError::query_failed(format!("scripted failure for: {sql}")));
        }

        tracing::debug!(connection = %self.connection, sql = %sql, kind = ?kind, "scripted statement");
        if !self.state.skip_log.load(Ordering::SeqCst) {
            lock(&self.state.log).push(RecordedStatement {
                connection: self.connection.clone(),
                sql: sql.to_string(),
                kind,
            });
        }
        Ok(normalized)
    }
}

impl DatabaseHandle for ScriptedHandle {
    async fn ping(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) || self.state.fail_ping.load(Ordering::SeqCst) {
            return Err(WardenError::connection_failed(format!(
                "ping failed for '{}'",
                self.connection
            )));
        }
        Ok(())
    }

    async fn query(&self, sql: &str, max_rows: usize) -> Result<QueryResult> {
        let normalized = self.record(sql, StatementKind::Query)?;

        let scripted = lock(&self.state.results)
            .iter()
            .find(|(prefix, _)| normalized.starts_with(prefix.as_str()))
            .map(|(_, result)| result.clone());

        Ok(match scripted {
            Some(result) => {
                let rows = result.rows.into_iter().take(max_rows).collect();
                QueryResult::new(result.columns, rows)
            }
            None => QueryResult::default(),
        })
    }

    async fn execute(&self, sql: &str) -> Result<WriteResult> {
        let normalized = self.record(sql, StatementKind::Execute)?;

        Ok(lock(&self.state.writes)
            .iter()
            .find(|(prefix, _)| normalized.starts_with(prefix.as_str()))
            .map(|(_, result)| *result)
            .unwrap_or_default())
    }

    async fn close(self) -> Result<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.state.closes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}
