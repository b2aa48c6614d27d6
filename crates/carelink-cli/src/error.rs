use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] carelink_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Record key cannot be empty")]
    EmptyKey,
    #[error("No value for {feature}:{key} in any tier")]
    RecordNotFound { feature: String, key: String },
    #[error("Audit entry not found: {0}")]
    AuditEntryNotFound(String),
    #[error("Pass a user id, an --email, or both")]
    MissingUserLookup,
    #[error("No user matched in any lookup layer")]
    UserNotFound,
    #[error("Config already exists at {0}. Pass --force to overwrite it.")]
    ConfigExists(PathBuf),
    #[error("Configuration error: {0}")]
    Config(String),
}
