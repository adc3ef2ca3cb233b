//! Error types for Query-Hub
//!
//! This module defines the error types used throughout the crate. Driver
//! errors are folded into three families (connectivity, SQL, timeout) so the
//! executor can turn them into recorded outcomes instead of propagating them.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for Query-Hub
pub type Result<T> = std::result::Result<T, QueryHubError>;

/// Main error type for Query-Hub
#[derive(Error, Debug)]
pub enum QueryHubError {
    /// Host unreachable, authentication rejected, TLS negotiation failure
    #[error("Connection failed: {0}")]
    Connectivity(String),

    /// Malformed SQL, constraint violation, type mismatch. The driver message
    /// is kept verbatim.
    #[error("{0}")]
    Sql(String),

    /// Statement exceeded its timeout
    #[error("Query timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    /// The core itself misbehaved
    #[error("Unexpected error: {0}")]
    Unexpected(String),

    /// Local persistence (schema cache, execution history) errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO-related errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Not found errors
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid caller input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Unknown database kind
    #[error("Unsupported database type: {0}")]
    UnsupportedDatabaseType(String),

    /// Unknown REPL command
    #[error("Unknown command: {0}. Type /help for available commands")]
    UnknownCommand(String),

    /// REPL command with missing arguments
    #[error("Invalid syntax for {command}. Usage: {expected}")]
    InvalidCommandSyntax { command: String, expected: String },
}

impl QueryHubError {
    /// Errors that belong to a single execution attempt and are reported as a
    /// failed outcome rather than raised.
    pub fn is_driver_failure(&self) -> bool {
        matches!(
            self,
            QueryHubError::Connectivity(_) | QueryHubError::Sql(_) | QueryHubError::Timeout(_)
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, QueryHubError::Timeout(_))
    }

    pub fn not_found(entity: &str, id: impl std::fmt::Display) -> Self {
        QueryHubError::NotFound(format!("{} with id {}", entity, id))
    }

    /// Error raised while opening a connection to a target database.
    pub fn connect_sqlx(err: sqlx::Error) -> Self {
        QueryHubError::Connectivity(err.to_string())
    }

    /// Error raised by sqlx while a connection is open.
    ///
    /// Server-side statement cancellation is reported as a timeout so the
    /// caller can tell "too slow" from "wrong".
    pub fn from_sqlx(err: sqlx::Error, timeout: Duration) -> Self {
        match &err {
            sqlx::Error::Database(db) => {
                let message = db.message();
                if db.code().as_deref() == Some("57014")
                    || message.contains("maximum statement execution time exceeded")
                    || message.contains("max_statement_time exceeded")
                {
                    QueryHubError::Timeout(timeout)
                } else {
                    QueryHubError::Sql(message.to_string())
                }
            }
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => QueryHubError::Connectivity(err.to_string()),
            _ => QueryHubError::Sql(err.to_string()),
        }
    }

    /// Error raised by tiberius while a connection is open.
    pub fn from_tiberius(err: tiberius::error::Error) -> Self {
        match &err {
            tiberius::error::Error::Server(token) => QueryHubError::Sql(token.message().to_string()),
            tiberius::error::Error::Io { .. }
            | tiberius::error::Error::Tls(_)
            | tiberius::error::Error::Routing { .. } => QueryHubError::Connectivity(err.to_string()),
            _ => QueryHubError::Sql(err.to_string()),
        }
    }

    /// Error raised by the Oracle client while a connection is open.
    pub fn from_oracle(err: oracle::Error, timeout: Duration) -> Self {
        let message = err.to_string();
        if message.contains("DPI-1067") || message.contains("ORA-01013") {
            QueryHubError::Timeout(timeout)
        } else if message.contains("DPI-1080") || message.contains("ORA-03113") || message.contains("ORA-03114") {
            QueryHubError::Connectivity(message)
        } else {
            QueryHubError::Sql(message)
        }
    }

    /// Local SQLite store failures.
    pub fn storage(context: &str, err: sqlx::Error) -> Self {
        QueryHubError::Storage(format!("{}: {}", context, err))
    }
}
