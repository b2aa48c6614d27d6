//! Error types for carelink-core

use thiserror::Error;

use crate::conflict::ResolveError;
use crate::remote::RemoteError;

/// Result type alias using carelink-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in carelink-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// libSQL error
    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record not found
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Remote store error that had to be surfaced
    #[error("Remote store error: {0}")]
    Remote(#[from] RemoteError),

    /// Conflict could not be resolved as asked
    #[error("Conflict resolution error: {0}")]
    Conflict(#[from] ResolveError),

    /// Field encryption error
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}
