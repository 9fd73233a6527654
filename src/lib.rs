//! mysql-warden - Policy-Enforcing MySQL Access for Agents
//!
//! mysql-warden brokers SQL from automated clients to named MySQL connections,
//! enforcing each connection's policy before any statement reaches the database.
//!
//! # Architecture
//! Every statement flows through the same pipeline:
//! caller → [`ConnectionManager`] → resolve pooled handle → safety gate for the
//! execution mode → driver → normalized [`QueryResult`] / [`WriteResult`] or a
//! typed [`WardenError`].
//!
//! # Module Organization
//! - [`classifier`] - Pure SQL classification (query type and safety facts)
//! - [`manager`] - Pooled handles and the four execution modes
//! - [`engine`] - Driver seam, MySQL driver and in-memory scripted driver
//! - [`config`] - Connection registry loading
//! - [`mcp`] - MCP server (manual JSON-RPC 2.0 over stdio)
//! - [`output`] - JSON output envelopes for the CLI
//! - [`error`] - Error types and handling
//! - [`logging`] - stderr tracing setup

pub mod classifier;
pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod manager;
pub mod mcp;
pub mod output;

pub use classifier::{classify, detect_type, validate_type, Classification, QueryType};
pub use config::{load_registry, resolve_config_path, ConnectionPolicy, ConnectionRegistry};
pub use engine::memory::ScriptedConnector;
pub use engine::{
    ConnectionSummary, Connector, DatabaseHandle, QueryResult, UnsafeResult, Value, WriteResult,
};
pub use error::{Result, WardenError};
pub use manager::ConnectionManager;
pub use output::{ErrorEnvelope, ErrorInfo, Metadata, SuccessEnvelope};

#[cfg(feature = "mysql")]
pub use engine::mysql::MySqlConnector;
