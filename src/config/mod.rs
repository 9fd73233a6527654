//! Configuration Management
//!
//! This module loads the connection registry from a JSON configuration file.
//! The registry is read once at startup and never mutated afterwards.
//!
//! # File Format
//! ```json
//! {
//!   "connections": {
//!     "local": {
//!       "host": "127.0.0.1",
//!       "port": 3306,
//!       "user": "app",
//!       "password": "${APP_DB_PASSWORD}",
//!       "database": "app",
//!       "read_only": true,
//!       "max_rows": 500
//!     }
//!   }
//! }
//! ```
//!
//! # Resolution Precedence
//! 1. Explicit `--config` path (highest priority)
//! 2. `MYSQL_MCP_CONFIG` environment variable
//! 3. `./config.json`
//! 4. Per-user config (`~/.config/mysql-warden/config.json` on Linux)
//!
//! # Defaults
//! `port` defaults to 3306 and `max_rows` to 1000 when absent or zero.
//! `read_only` defaults to false.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Result, WardenError};

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "MYSQL_MCP_CONFIG";

/// Default MySQL port
pub const DEFAULT_PORT: u16 = 3306;

/// Default row cap for query results
pub const DEFAULT_MAX_ROWS: usize = 1000;

/// Safety policy and credentials for one named connection
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionPolicy {
    pub host: String,
    pub port: u16,
    pub user: String,
    /// WARNING: Sensitive data, do not log or include in error messages
    #[serde(skip_serializing)]
    pub password: String,
    pub database: String,
    /// Reject every statement that is not SELECT/SHOW/DESCRIBE/EXPLAIN
    pub read_only: bool,
    /// Maximum rows collected per query result
    pub max_rows: usize,
}

impl ConnectionPolicy {
    /// Build a policy with default port and row cap
    #[must_use]
    pub fn new(
        host: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            user: user.into(),
            password: password.into(),
            database: database.into(),
            read_only: false,
            max_rows: DEFAULT_MAX_ROWS,
        }
    }

    #[must_use]
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    #[must_use]
    pub fn max_rows(mut self, max_rows: usize) -> Self {
        self.max_rows = max_rows;
        self
    }

    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }
}

impl fmt::Debug for ConnectionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPolicy")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .field("read_only", &self.read_only)
            .field("max_rows", &self.max_rows)
            .finish()
    }
}

/// Immutable mapping from connection name to policy
#[derive(Debug, Clone, Default)]
pub struct ConnectionRegistry {
    connections: BTreeMap<String, ConnectionPolicy>,
}

impl ConnectionRegistry {
    /// Build a registry from already validated policies
    pub fn from_policies<I, S>(policies: I) -> Self
    where
        I: IntoIterator<Item = (S, ConnectionPolicy)>,
        S: Into<String>,
    {
        Self {
            connections: policies.into_iter().map(|(name, policy)| (name.into(), policy)).collect(),
        }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ConnectionPolicy> {
        self.connections.get(name)
    }

    /// Connection names in sorted order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.connections.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ConnectionPolicy)> {
        self.connections.iter().map(|(name, policy)| (name.as_str(), policy))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

/// On-disk connection entry, before defaults and validation
#[derive(Debug, Clone, Deserialize)]
struct StoredConnection {
    #[serde(default)]
    host: String,
    #[serde(default)]
    port: Option<u16>,
    #[serde(default)]
    user: String,
    #[serde(default)]
    password: String,
    #[serde(default)]
    database: String,
    #[serde(default)]
    read_only: bool,
    #[serde(default)]
    max_rows: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    connections: BTreeMap<String, StoredConnection>,
}

impl StoredConnection {
    /// Expand `${VAR}` references, apply defaults and check required fields
    fn resolve(self, name: &str) -> Result<ConnectionPolicy> {
        let host = expand_env_vars(&self.host);
        let user = expand_env_vars(&self.user);
        let password = expand_env_vars(&self.password);
        let database = expand_env_vars(&self.database);

        for (field, value) in [("host", &host), ("user", &user), ("database", &database)] {
            if value.trim().is_empty() {
                return Err(WardenError::config_error(format!(
                    "connection '{name}': {field} is required"
                )));
            }
        }

        Ok(ConnectionPolicy {
            host,
            port: self.port.filter(|p| *p != 0).unwrap_or(DEFAULT_PORT),
            user,
            password,
            database,
            read_only: self.read_only,
            max_rows: self.max_rows.filter(|n| *n != 0).unwrap_or(DEFAULT_MAX_ROWS),
        })
    }
}

/// Parse a registry from JSON text
///
/// # Errors
/// Fails on invalid JSON, an empty connection map, or a connection missing
/// host, user or database.
pub fn parse_registry(contents: &str) -> Result<ConnectionRegistry> {
    let file: ConfigFile = serde_json::from_str(contents)
        .map_err(|e| WardenError::config_error(format!("failed to parse config file: {e}")))?;

    if file.connections.is_empty() {
        return Err(WardenError::config_error("no connections defined in config"));
    }

    let mut connections = BTreeMap::new();
    for (name, stored) in file.connections {
        let policy = stored.resolve(&name)?;
        connections.insert(name, policy);
    }

    Ok(ConnectionRegistry { connections })
}

/// Load the registry from a config file
///
/// # Errors
/// Fails if the file cannot be read, or on any [`parse_registry`] error.
pub fn load_registry(path: &Path) -> Result<ConnectionRegistry> {
    let contents = fs::read_to_string(path).map_err(|e| {
        WardenError::config_error(format!("failed to read config file {}: {e}", path.display()))
    })?;

    parse_registry(&contents)
}

/// Get path to the per-user config file
pub fn global_config_path() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| WardenError::config_error("Could not determine user config directory"))?;

    Ok(config_dir.join("mysql-warden").join("config.json"))
}

/// Resolve which config file to load
///
/// `explicit` is the `--config` value; clap has already folded in the
/// environment variable. Without either, `./config.json` wins if it exists,
/// then the per-user file. If neither exists, `./config.json` is returned so
/// the load error names the conventional location.
#[must_use]
pub fn resolve_config_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }

    let local = PathBuf::from("./config.json");
    if local.exists() {
        return local;
    }

    match global_config_path() {
        Ok(global) if global.exists() => global,
        _ => local,
    }
}

/// Expand `${VAR}` tokens from the process environment
///
/// Unset variables expand to the empty string. Text that is not part of a
/// complete `${...}` token is kept verbatim.
#[must_use]
pub fn expand_env_vars(value: &str) -> String {
    let mut expanded = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        expanded.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) if end > 0 => {
                expanded.push_str(&std::env::var(&after[..end]).unwrap_or_default());
                rest = &after[end + 1..];
            }
            _ => {
                expanded.push_str(&rest[start..start + 2]);
                rest = after;
            }
        }
    }

    expanded.push_str(rest);
    expanded
}
