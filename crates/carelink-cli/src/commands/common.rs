use std::env;
use std::path::{Path, PathBuf};

use carelink_core::config::SyncSettings;
use carelink_core::models::ConflictResolution;
use carelink_core::sync::ReadSource;
use carelink_core::SyncContext;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::error::CliError;

/// Where the CLI keeps its cache database and settings file
#[derive(Debug, Clone)]
pub struct StoragePaths {
    pub db: PathBuf,
    pub config: PathBuf,
}

impl StoragePaths {
    pub fn resolve(cli_db_path: Option<PathBuf>, cli_config_path: Option<PathBuf>) -> Self {
        Self {
            db: resolve_db_path(cli_db_path),
            config: resolve_config_path(cli_config_path),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ConflictItem {
    pub conflict_id: String,
    pub table: String,
    pub record_id: String,
    pub field: String,
    pub strategy: String,
    pub resolved_value: Value,
    pub resolved_by: String,
    pub resolved_at: String,
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> PathBuf {
    cli_db_path
        .or_else(|| env::var_os("CARELINK_DB_PATH").map(PathBuf::from))
        .unwrap_or_else(default_db_path)
}

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("carelink")
        .join("carelink.db")
}

pub fn resolve_config_path(cli_config_path: Option<PathBuf>) -> PathBuf {
    cli_config_path
        .or_else(|| env::var_os("CARELINK_CONFIG").map(PathBuf::from))
        .unwrap_or_else(default_config_path)
}

pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("carelink")
        .join("config.json")
}

/// Settings file overlaid with `SUPABASE_*` / `CARELINK_*` variables.
///
/// A file without a device id gets one written into it.
pub fn load_settings(config_path: &Path) -> Result<SyncSettings, CliError> {
    Ok(SyncSettings::load_or_init(config_path)?.with_env_overrides())
}

pub async fn open_context(paths: &StoragePaths) -> Result<SyncContext, CliError> {
    let settings = load_settings(&paths.config)?;
    let context = SyncContext::open(settings, &paths.db).await?;
    if !context.remote_configured() {
        tracing::debug!("No remote configured; writes stay pending until one is");
    }
    Ok(context)
}

pub fn normalize_key(key: &str) -> Result<String, CliError> {
    let trimmed = key.trim();
    if trimmed.is_empty() {
        return Err(CliError::EmptyKey);
    }
    Ok(trimmed.to_string())
}

/// Parse a command-line value as JSON, keeping bare words as strings.
pub fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

pub const fn read_source_label(source: ReadSource) -> &'static str {
    match source {
        ReadSource::Memory => "memory",
        ReadSource::Remote => "remote",
        ReadSource::Local => "local",
        ReadSource::Backup => "backup",
        ReadSource::Missing => "missing",
    }
}

pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

pub fn conflict_to_item(resolution: &ConflictResolution) -> ConflictItem {
    ConflictItem {
        conflict_id: resolution.conflict_id.to_string(),
        table: resolution.table_name.clone(),
        record_id: resolution.record_id.clone(),
        field: resolution.field_name.clone(),
        strategy: resolution.strategy_name.clone(),
        resolved_value: resolution.resolved_value.clone(),
        resolved_by: resolution.resolved_by.as_str().to_string(),
        resolved_at: resolution.resolved_at.to_rfc3339(),
    }
}

pub fn format_conflict_lines(resolutions: &[ConflictResolution]) -> Vec<String> {
    resolutions
        .iter()
        .map(|resolution| {
            format!(
                "{}  {:<16}  {}/{}.{} = {}  ({})",
                format_timestamp(resolution.resolved_at),
                resolution.strategy_name,
                resolution.table_name,
                resolution.record_id,
                resolution.field_name,
                resolution.resolved_value,
                resolution.resolved_by.as_str()
            )
        })
        .collect()
}
