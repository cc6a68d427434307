//! Error types for sync, snapshot, and restore operations.

use thiserror::Error;
use tokio_postgres::error::SqlState;

/// Result type alias for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Main error type for sync, snapshot, and restore operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Endpoint unreachable or failed the connection probe
    #[error("Cannot reach {endpoint}: {message}")]
    Connectivity { endpoint: String, message: String },

    /// Source and destination resolve to the same database
    #[error("source and destination resolve to the same database - refusing to sync into itself")]
    SelfSync,

    /// Database error from a query or statement
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// Connection pool error with context about where it occurred
    #[error("Connection pool error: {message} (context: {context})")]
    Pool { message: String, context: String },

    /// A source table could not be read into rows
    #[error("Failed reading table {table}: {message}")]
    Read { table: String, message: String },

    /// Restore failed for a specific table; the transaction rolled back
    #[error("Restore failed on table {table}: {message}")]
    Restore { table: String, message: String },

    /// Snapshot file rejected (wrong shape, no rows)
    #[error("Snapshot error: {0}")]
    Snapshot(String),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SyncError {
    /// Create a Connectivity error naming the endpoint
    pub fn connectivity(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        SyncError::Connectivity {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Create a Pool error with context about where it occurred
    pub fn pool(message: impl Into<String>, context: impl Into<String>) -> Self {
        SyncError::Pool {
            message: message.into(),
            context: context.into(),
        }
    }

    /// Create a Read error for a table
    pub fn read(table: impl Into<String>, message: impl Into<String>) -> Self {
        SyncError::Read {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Create a Restore error for a table
    pub fn restore(table: impl Into<String>, message: impl Into<String>) -> Self {
        SyncError::Restore {
            table: table.into(),
            message: message.into(),
        }
    }

    /// True for PostgreSQL "relation does not exist" (42P01) errors.
    pub fn is_undefined_table(&self) -> bool {
        match self {
            SyncError::Postgres(e) => e.code() == Some(&SqlState::UNDEFINED_TABLE),
            _ => false,
        }
    }

    /// Full message including the source chain, for top-level reporting.
    pub fn format_detailed(&self) -> String {
        let mut out = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            out.push_str(&format!("\n  caused by: {cause}"));
            source = cause.source();
        }
        out
    }

    /// Process exit code for this error class.
    pub fn exit_code(&self) -> u8 {
        match self {
            SyncError::Config(_) | SyncError::Yaml(_) | SyncError::Json(_) => 1,
            SyncError::Connectivity { .. } | SyncError::Pool { .. } => 2,
            SyncError::SelfSync => 3,
            SyncError::Postgres(_)
            | SyncError::Read { .. }
            | SyncError::Restore { .. }
            | SyncError::Snapshot(_) => 4,
            SyncError::Io(_) => 7,
        }
    }
}
