//! Connection Manager
//!
//! Owns one pooled handle per configured connection and enforces each
//! connection's policy before a statement reaches the driver.
//!
//! # Execution Modes
//! - [`ConnectionManager::execute_query`]: row-returning statements, capped at `max_rows`
//! - [`ConnectionManager::execute_write`]: INSERT / UPDATE / DELETE
//! - [`ConnectionManager::execute_alter`]: ALTER with a stricter phrase blocklist
//! - [`ConnectionManager::execute_unsafe`]: bypasses statement checks, never `read_only`
//!
//! # Handle Lifecycle
//!
//! Every configured name gets a slot at construction time; the set of slots
//! never changes afterwards. A slot moves `absent -> connecting -> alive` and
//! drops back to `absent` when its liveness probe fails. Reuse only takes a
//! read lock on the slot. Establishing or replacing a handle takes the slot's
//! establishment lock and re-checks the slot generation first, so callers
//! racing on the same dead or absent connection open it once.

use std::collections::HashMap;
use tokio::sync::{Mutex, RwLock};

use crate::classifier::{self, QueryType};
use crate::config::{ConnectionPolicy, ConnectionRegistry};
use crate::engine::{
    ConnectionSummary, Connector, DatabaseHandle, QueryResult, UnsafeResult, WriteResult,
};
use crate::error::{Result, WardenError};

/// Warning attached to every unsafe execution
pub const UNSAFE_WARNING: &str =
    "UNSAFE EXECUTION: This query bypassed safety checks. Ensure you understand the implications.";

/// Skipped-check label for statements the dangerous check would block
pub const SKIPPED_DANGEROUS: &str = "dangerous query blocking";

/// Skipped-check label for statements the sensitive check would block
pub const SKIPPED_SENSITIVE: &str = "sensitive query blocking";

/// Statement kinds accepted by the generic write path
pub const WRITE_TYPES: &[QueryType] = &[QueryType::Insert, QueryType::Update, QueryType::Delete];

const SENSITIVE_MESSAGE: &str = "access to sensitive MySQL metadata is not allowed";

const MULTIPLE_STATEMENTS_MESSAGE: &str = "only one statement is allowed per call";

struct SlotState<H> {
    handle: Option<H>,
    /// Bumped each time a freshly probed handle is stored
    generation: u64,
}

struct Slot<H> {
    state: RwLock<SlotState<H>>,
    establish: Mutex<()>,
}

impl<H> Slot<H> {
    fn new() -> Self {
        Self {
            state: RwLock::new(SlotState { handle: None, generation: 0 }),
            establish: Mutex::new(()),
        }
    }
}

/// Policy-enforcing connection manager
///
/// Shared across concurrent callers behind an `Arc`; every method takes `&self`.
pub struct ConnectionManager<C: Connector> {
    registry: ConnectionRegistry,
    connector: C,
    slots: HashMap<String, Slot<C::Handle>>,
}

impl<C: Connector> ConnectionManager<C> {
    pub fn new(registry: ConnectionRegistry, connector: C) -> Self {
        let slots = registry.names().map(|name| (name.to_string(), Slot::new())).collect();
        Self { registry, connector, slots }
    }

    #[must_use]
    pub const fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Configured connections, sorted by name
    #[must_use]
    pub fn list_connections(&self) -> Vec<ConnectionSummary> {
        self.registry
            .iter()
            .map(|(name, policy)| ConnectionSummary {
                name: name.to_string(),
                read_only: policy.read_only,
            })
            .collect()
    }

    /// Return a live handle and the policy for `name`
    ///
    /// A cached handle is probed before reuse. When it is dead or missing, a
    /// new handle is opened and probed under the slot's establishment lock.
    ///
    /// # Errors
    /// `UnknownConnection` for unconfigured names, `ConnectionFailed` when the
    /// new handle cannot be opened or fails its probe.
    pub async fn resolve(&self, name: &str) -> Result<(C::Handle, &ConnectionPolicy)> {
        let (policy, slot) = match (self.registry.get(name), self.slots.get(name)) {
            (Some(policy), Some(slot)) => (policy, slot),
            _ => return Err(WardenError::unknown_connection(name)),
        };

        let (cached, seen_generation) = {
            let state = slot.state.read().await;
            (state.handle.clone(), state.generation)
        };

        if let Some(handle) = cached {
            match handle.ping().await {
                Ok(()) => return Ok((handle, policy)),
                Err(e) => {
                    tracing::warn!(connection = %name, error = %e, "pooled connection is dead, reconnecting");
                }
            }
        }

        let _establishing = slot.establish.lock().await;

        // Another caller may have repaired the slot while we waited
        {
            let state = slot.state.read().await;
            if state.generation != seen_generation {
                if let Some(handle) = &state.handle {
                    return Ok((handle.clone(), policy));
                }
            }
        }

        let stale = slot.state.write().await.handle.take();
        if let Some(stale) = stale {
            if let Err(e) = stale.close().await {
                tracing::debug!(connection = %name, error = %e, "failed to close dead handle");
            }
        }

        tracing::info!(connection = %name, host = %policy.host, "establishing connection");
        let handle = self.connector.open(name, policy).await.map_err(|e| as_connection_failure(name, e))?;

        if let Err(e) = handle.ping().await {
            if let Err(close_err) = handle.close().await {
                tracing::debug!(connection = %name, error = %close_err, "failed to close unusable handle");
            }
            tracing::warn!(connection = %name, error = %e, "connection probe failed");
            return Err(as_connection_failure(name, e));
        }

        let mut state = slot.state.write().await;
        state.handle = Some(handle.clone());
        state.generation += 1;

        Ok((handle, policy))
    }

    /// Run a row-returning statement
    ///
    /// # Errors
    /// `MultipleStatements` for batched input, `ReadOnlyViolation` for non-read-only statements on read-only
    /// connections, `DangerousOperation` for DDL and privilege statements on
    /// writable connections, `SensitiveAccess` for credential or session
    /// metadata, plus resolution and driver errors.
    pub async fn execute_query(&self, name: &str, sql: &str) -> Result<QueryResult> {
        let (handle, policy) = self.resolve(name).await?;
        check_query(name, policy, sql)?;

        tracing::debug!(connection = %name, sql = %sql, "executing query");
        let result = handle.query(sql, policy.max_rows).await?;
        tracing::info!(connection = %name, rows = result.count, "query complete");

        Ok(result)
    }

    /// Run a data-modifying statement
    ///
    /// When `allowed` is non-empty the statement kind must be one of it.
    ///
    /// # Errors
    /// `MultipleStatements`, `QueryTypeMismatch`, `ReadOnlyViolation`, `DangerousOperation` or
    /// `SensitiveAccess` when policy rejects the statement, plus resolution and
    /// driver errors.
    pub async fn execute_write(
        &self,
        name: &str,
        sql: &str,
        allowed: &[QueryType],
    ) -> Result<WriteResult> {
        let (handle, policy) = self.resolve(name).await?;
        check_write(name, policy, sql, allowed)?;

        tracing::debug!(connection = %name, sql = %sql, "executing write");
        let result = handle.execute(sql).await?;
        tracing::info!(
            connection = %name,
            query_type = %classifier::detect_type(sql),
            rows_affected = result.rows_affected,
            "write complete"
        );

        Ok(result)
    }

    /// Run an ALTER statement
    ///
    /// # Errors
    /// `MultipleStatements`, `QueryTypeMismatch` for anything but ALTER, `ReadOnlyViolation`,
    /// `DangerousOperation` when a blocklisted phrase is embedded, and
    /// `SensitiveAccess`, plus resolution and driver errors.
    pub async fn execute_alter(&self, name: &str, sql: &str) -> Result<WriteResult> {
        let (handle, policy) = self.resolve(name).await?;
        check_alter(name, policy, sql)?;

        tracing::debug!(connection = %name, sql = %sql, "executing alter");
        let result = handle.execute(sql).await?;
        tracing::info!(connection = %name, rows_affected = result.rows_affected, "alter complete");

        Ok(WriteResult { rows_affected: result.rows_affected, last_insert_id: None })
    }

    /// Run any statement, reporting the checks it bypassed
    ///
    /// Read-only statements return a [`QueryResult`] capped at `max_rows`;
    /// everything else returns a [`WriteResult`].
    ///
    /// # Errors
    /// `MultipleStatements` for batched input, `ReadOnlyViolation` for
    /// non-read-only statements on read-only connections, plus resolution
    /// and driver errors.
    pub async fn execute_unsafe(&self, name: &str, sql: &str) -> Result<UnsafeResult> {
        let (handle, policy) = self.resolve(name).await?;
        let query_type = classifier::detect_type(sql);

        if policy.read_only && !classifier::is_read_only_type(query_type) {
            return Err(WardenError::read_only_violation(format!(
                "connection '{name}' is read-only, write operations are not allowed (even with unsafe mode)"
            )));
        }
        check_single_statement(sql)?;

        let skipped_check = skipped_checks(sql);
        tracing::warn!(
            connection = %name,
            query_type = %query_type,
            skipped = %skipped_check,
            "executing statement without safety checks"
        );

        let mut result = UnsafeResult {
            query_result: None,
            write_result: None,
            warning: UNSAFE_WARNING.to_string(),
            skipped_check,
        };

        if classifier::is_read_only_type(query_type) {
            result.query_result = Some(handle.query(sql, policy.max_rows).await?);
        } else {
            result.write_result = Some(handle.execute(sql).await?);
        }

        Ok(result)
    }

    /// Close every pooled handle and reset all slots to absent
    ///
    /// Close failures are logged, never returned.
    pub async fn close(&self) {
        for (name, slot) in &self.slots {
            let _establishing = slot.establish.lock().await;
            let handle = slot.state.write().await.handle.take();

            if let Some(handle) = handle {
                match handle.close().await {
                    Ok(()) => tracing::debug!(connection = %name, "connection closed"),
                    Err(e) => tracing::warn!(connection = %name, error = %e, "failed to close connection"),
                }
            }
        }
    }
}

fn as_connection_failure(name: &str, error: WardenError) -> WardenError {
    match error {
        WardenError::ConnectionFailed(_) => error,
        other => WardenError::connection_failed(format!("failed to connect to '{name}': {other}")),
    }
}

/// Last gate of every mode: the driver session accepts batches, and the
/// policy checks only see the leading statement
fn check_single_statement(sql: &str) -> Result<()> {
    if classifier::has_multiple_statements(sql) {
        return Err(WardenError::multiple_statements(MULTIPLE_STATEMENTS_MESSAGE));
    }
    Ok(())
}

fn check_query(name: &str, policy: &ConnectionPolicy, sql: &str) -> Result<()> {
    let query_type = classifier::detect_type(sql);

    if policy.read_only && !classifier::is_read_only_type(query_type) {
        return Err(WardenError::read_only_violation(format!(
            "connection '{name}' is read-only, write operations are not allowed"
        )));
    }

    if !policy.read_only && classifier::is_dangerous_text(sql) {
        return Err(WardenError::dangerous_operation(
            "dangerous operations (DROP, ALTER, TRUNCATE, CREATE, GRANT, REVOKE) are not allowed",
        ));
    }

    if classifier::is_sensitive_text(sql) {
        return Err(WardenError::sensitive_access(SENSITIVE_MESSAGE));
    }

    check_single_statement(sql)
}

fn check_write(
    name: &str,
    policy: &ConnectionPolicy,
    sql: &str,
    allowed: &[QueryType],
) -> Result<()> {
    if !allowed.is_empty() {
        classifier::validate_type(sql, allowed)?;
    }

    if policy.read_only {
        return Err(WardenError::read_only_violation(format!(
            "connection '{name}' is read-only, write operations are not allowed"
        )));
    }

    if classifier::is_dangerous_type(classifier::detect_type(sql))
        || classifier::starts_with_executable_comment(sql)
    {
        return Err(WardenError::dangerous_operation(
            "dangerous operations (DROP, TRUNCATE, CREATE, GRANT, REVOKE) are not allowed. \
             Use mysql_execute_unsafe if you need to bypass this check",
        ));
    }

    if classifier::is_sensitive_text(sql) {
        return Err(WardenError::sensitive_access(SENSITIVE_MESSAGE));
    }

    check_single_statement(sql)
}

fn check_alter(name: &str, policy: &ConnectionPolicy, sql: &str) -> Result<()> {
    classifier::validate_type(sql, &[QueryType::Alter])?;

    if policy.read_only {
        return Err(WardenError::read_only_violation(format!(
            "connection '{name}' is read-only, ALTER operations are not allowed"
        )));
    }

    if let Some(phrase) = classifier::alter_blocked_phrase(sql) {
        return Err(WardenError::dangerous_operation(format!(
            "operation '{phrase}' is not allowed even with mysql_alter. \
             Use mysql_execute_unsafe if absolutely necessary"
        )));
    }

    if classifier::is_sensitive_text(sql) {
        return Err(WardenError::sensitive_access(SENSITIVE_MESSAGE));
    }

    check_single_statement(sql)
}

/// Checks that would have blocked `sql` in the normal modes, or "none"
fn skipped_checks(sql: &str) -> String {
    let mut skipped = Vec::new();
    if classifier::is_dangerous_text(sql) {
        skipped.push(SKIPPED_DANGEROUS);
    }
    if classifier::is_sensitive_text(sql) {
        skipped.push(SKIPPED_SENSITIVE);
    }

    if skipped.is_empty() {
        "none".to_string()
    } else {
        skipped.join(", ")
    }
}
