//! Error Handling Infrastructure
//!
//! This module defines all error types used throughout mysql-warden.
//! All errors are structured and map to specific error codes for JSON output.
//!
//! # Error Categories
//! - `UnknownConnection`: Connection name not present in the registry
//! - `ConnectionFailed`: Opening or probing a database handle failed
//! - `ReadOnlyViolation`: Write attempted on a read-only connection
//! - `DangerousOperation`: DDL or privilege statement blocked by policy
//! - `SensitiveAccess`: Statement touches credential or session metadata
//! - `QueryTypeMismatch`: Statement kind does not match the requested operation
//! - `MultipleStatements`: More than one statement sent in a single call
//! - `QueryFailed`: Driver-level execution error
//! - `DecodeFailed`: Result set could not be decoded
//! - `InvalidInput`: Malformed input or missing required parameters
//! - `ConfigError`: Configuration file errors

use thiserror::Error;

/// Main error type for mysql-warden operations
#[derive(Error, Debug)]
pub enum WardenError {
    /// Connection name is not configured
    #[error("Unknown connection: {0}")]
    UnknownConnection(String),

    /// Database connection could not be opened or probed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Connection is configured read-only
    #[error("Read-only violation: {0}")]
    ReadOnlyViolation(String),

    /// Dangerous operation blocked by policy
    #[error("Dangerous operation blocked: {0}")]
    DangerousOperation(String),

    /// Sensitive metadata access blocked by policy
    #[error("Sensitive access blocked: {0}")]
    SensitiveAccess(String),

    /// Statement type does not match the operation
    #[error(
        "Query type mismatch: expected {expected}, got {got}. Use the appropriate tool for this query type"
    )]
    QueryTypeMismatch { expected: String, got: String },

    /// Input carries more than one statement
    #[error("Multiple statements blocked: {0}")]
    MultipleStatements(String),

    /// Query execution failed in the driver
    #[error("Query execution failed: {0}")]
    QueryFailed(String),

    /// Result set could not be decoded
    #[error("Failed to decode result: {0}")]
    DecodeFailed(String),

    /// Invalid input or missing required parameters
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration error (file not found, invalid JSON, missing fields)
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl WardenError {
    /// Convert error to error code string for JSON output
    ///
    /// Error codes are stable and suitable for programmatic handling by agents.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::UnknownConnection(_) => "UNKNOWN_CONNECTION",
            Self::ConnectionFailed(_) => "CONNECTION_FAILED",
            Self::ReadOnlyViolation(_) => "READ_ONLY_VIOLATION",
            Self::DangerousOperation(_) => "DANGEROUS_OPERATION",
            Self::SensitiveAccess(_) => "SENSITIVE_ACCESS",
            Self::QueryTypeMismatch { .. } => "QUERY_TYPE_MISMATCH",
            Self::MultipleStatements(_) => "MULTIPLE_STATEMENTS",
            Self::QueryFailed(_) => "QUERY_FAILED",
            Self::DecodeFailed(_) => "DECODE_FAILED",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::ConfigError(_) => "CONFIG_ERROR",
        }
    }

    /// Get human-readable error message (agent-appropriate, no credentials)
    #[must_use]
    pub fn message(&self) -> String {
        self.to_string()
    }

    /// True for errors raised by policy before any statement reached the database
    #[must_use]
    pub const fn is_policy_violation(&self) -> bool {
        matches!(
            self,
            Self::ReadOnlyViolation(_)
                | Self::DangerousOperation(_)
                | Self::SensitiveAccess(_)
                | Self::QueryTypeMismatch { .. }
                | Self::MultipleStatements(_)
        )
    }

    /// Create an unknown connection error
    pub fn unknown_connection(name: impl Into<String>) -> Self {
        Self::UnknownConnection(name.into())
    }

    /// Create a connection failed error
    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::ConnectionFailed(message.into())
    }

    /// Create a read-only violation error
    pub fn read_only_violation(message: impl Into<String>) -> Self {
        Self::ReadOnlyViolation(message.into())
    }

    /// Create a dangerous operation error
    pub fn dangerous_operation(message: impl Into<String>) -> Self {
        Self::DangerousOperation(message.into())
    }

    /// Create a sensitive access error
    pub fn sensitive_access(message: impl Into<String>) -> Self {
        Self::SensitiveAccess(message.into())
    }

    /// Create a query type mismatch error
    pub fn type_mismatch(expected: impl Into<String>, got: impl Into<String>) -> Self {
        Self::QueryTypeMismatch { expected: expected.into(), got: got.into() }
    }

    /// Create a multiple statements error
    pub fn multiple_statements(message: impl Into<String>) -> Self {
        Self::MultipleStatements(message.into())
    }

    /// Create a query failed error
    pub fn query_failed(message: impl Into<String>) -> Self {
        Self::QueryFailed(message.into())
    }

    /// Create a decode failed error
    pub fn decode_failed(message: impl Into<String>) -> Self {
        Self::DecodeFailed(message.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Create a configuration error
    pub fn config_error(message: impl Into<String>) -> Self {
        Self::ConfigError(message.into())
    }
}

/// Result type alias for mysql-warden operations
pub type Result<T> = std::result::Result<T, WardenError>;
