//! Error types for fieldbook-core

use thiserror::Error;

/// Result type alias using fieldbook-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in fieldbook-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// The host cannot provide a document store (e.g. a server-rendering context)
    #[error("Document store unavailable: {0}")]
    EnvironmentUnavailable(String),

    /// Document not found
    #[error("Document not found: {0}")]
    NotFound(String),

    /// Write based on a stale or missing revision
    #[error("Document update conflict: {0}")]
    Conflict(String),

    /// Secondary index could not be created
    #[error("Index creation failed for field `{field}`: {message}")]
    IndexCreation { field: String, message: String },

    /// Replication with the remote peer failed
    #[error("Sync transport failure: {0}")]
    SyncTransport(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Whether this error reports a missing document.
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Whether this error reports a stale-revision write.
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}
