//! Remote store abstraction.
//!
//! The remote store is the hosted database acting as source of truth when it
//! is reachable. Implementations apply tenant scoping on every call.

mod supabase;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::models::{SyncRecord, SyncStatus};

pub use supabase::SupabaseStore;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Remote call timed out after {0:?}")]
    Timeout(Duration),
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    #[error("Remote store unavailable: {0}")]
    Unavailable(String),
    #[error("Remote API error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("Invalid remote payload: {0}")]
    InvalidPayload(String),
    #[error("Invalid remote configuration: {0}")]
    InvalidConfiguration(String),
}

pub type RemoteResult<T> = Result<T, RemoteError>;

/// Whether a failed remote call is worth retrying on the next reconcile tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    Transient,
    Permanent,
}

impl RemoteError {
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Classify error for retry policy.
    ///
    /// A 4xx answer other than timeout, conflict, too-early and rate limiting
    /// means the same request would be refused again.
    pub const fn retry_class(&self) -> RetryClass {
        match self {
            Self::Http(_) | Self::Timeout(_) | Self::Unavailable(_) => RetryClass::Transient,
            Self::Api { status, .. } => match *status {
                408 | 409 | 425 | 429 | 500..=599 => RetryClass::Transient,
                _ => RetryClass::Permanent,
            },
            Self::PermissionDenied(_) | Self::InvalidPayload(_) | Self::InvalidConfiguration(_) => {
                RetryClass::Permanent
            }
        }
    }

    pub const fn is_permanent(&self) -> bool {
        matches!(self.retry_class(), RetryClass::Permanent)
    }
}

/// A row as the remote store sees it, without tenant scoping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRow {
    pub key: String,
    pub value: Value,
    pub last_modified: DateTime<Utc>,
    /// Empty for rows written by clients that do not stamp a device
    #[serde(default)]
    pub origin_device_id: String,
}

impl RemoteRow {
    /// Convert into a local record with the given status.
    pub fn into_record(self, status: SyncStatus) -> SyncRecord {
        SyncRecord {
            key: self.key,
            value: self.value,
            last_modified: self.last_modified,
            origin_device_id: self.origin_device_id,
            sync_status: status,
        }
    }
}

impl From<&SyncRecord> for RemoteRow {
    fn from(record: &SyncRecord) -> Self {
        Self {
            key: record.key.clone(),
            value: record.value.clone(),
            last_modified: record.last_modified,
            origin_device_id: record.origin_device_id.clone(),
        }
    }
}

/// Table-scoped CRUD against the hosted database.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Fetch one row by primary key
    async fn fetch(&self, table: &str, key: &str) -> RemoteResult<Option<RemoteRow>>;

    /// Find rows whose JSON value has `field == value`
    async fn find_by_field(&self, table: &str, field: &str, value: &str)
        -> RemoteResult<Vec<RemoteRow>>;

    /// Insert or replace a row
    async fn upsert(&self, table: &str, row: &RemoteRow) -> RemoteResult<()>;

    /// Delete a row by primary key
    async fn delete(&self, table: &str, key: &str) -> RemoteResult<()>;
}

/// Kind of change delivered by the realtime feed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// A change notification from the remote store's realtime feed.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteChange {
    pub table: String,
    pub kind: ChangeKind,
    pub key: String,
    /// New row for inserts and updates
    pub row: Option<RemoteRow>,
}

#[derive(Debug, Deserialize)]
struct RealtimePayload {
    table: String,
    #[serde(rename = "eventType")]
    event_type: ChangeKind,
    #[serde(default)]
    new: Option<Value>,
    #[serde(default)]
    old: Option<Value>,
}

impl RemoteChange {
    /// Parse a Supabase `postgres_changes` payload.
    pub fn from_realtime_payload(payload: &Value) -> RemoteResult<Self> {
        let payload: RealtimePayload = serde_json::from_value(payload.clone())
            .map_err(|error| RemoteError::InvalidPayload(error.to_string()))?;

        let row = match payload.event_type {
            ChangeKind::Delete => None,
            ChangeKind::Insert | ChangeKind::Update => {
                let new = payload.new.clone().ok_or_else(|| {
                    RemoteError::InvalidPayload("change did not include a new row".to_string())
                })?;
                Some(serde_json::from_value::<RemoteRow>(new).map_err(|error| {
                    RemoteError::InvalidPayload(format!("malformed row: {error}"))
                })?)
            }
        };

        let key = match &row {
            Some(row) => row.key.clone(),
            None => payload
                .old
                .as_ref()
                .and_then(|old| old.get("key"))
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| {
                    RemoteError::InvalidPayload("delete did not include the old key".to_string())
                })?,
        };

        Ok(Self {
            table: payload.table,
            kind: payload.event_type,
            key,
            row,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn permission_errors_are_permanent() {
        assert!(RemoteError::PermissionDenied("rls".to_string()).is_permanent());
        assert!(RemoteError::api(400, "bad filter").is_permanent());
        assert!(!RemoteError::api(503, "down").is_permanent());
        assert!(!RemoteError::Timeout(Duration::from_secs(3)).is_permanent());
    }

    #[test]
    fn rate_limits_and_conflicts_are_transient() {
        for status in [408, 409, 425, 429] {
            assert_eq!(
                RemoteError::api(status, "later").retry_class(),
                RetryClass::Transient,
                "status {status}"
            );
        }
        for status in [401, 404, 422] {
            assert_eq!(
                RemoteError::api(status, "refused").retry_class(),
                RetryClass::Permanent,
                "status {status}"
            );
        }
    }

    #[test]
    fn row_without_device_deserializes() {
        let row: RemoteRow = serde_json::from_value(json!({
            "key": "n1",
            "value": {"body": "legacy"},
            "last_modified": "2024-01-02T00:00:00Z"
        }))
        .unwrap();
        assert_eq!(row.origin_device_id, "");
        assert_eq!(row.into_record(SyncStatus::Synced).key, "n1");
    }

    #[test]
    fn parses_update_payload() {
        let payload = json!({
            "table": "notes",
            "eventType": "UPDATE",
            "new": {
                "tenant_id": "clinic-1",
                "key": "note-9",
                "value": {"body": "call back"},
                "last_modified": "2024-01-02T00:00:00Z",
                "origin_device_id": "tablet"
            },
            "old": {"key": "note-9"}
        });

        let change = RemoteChange::from_realtime_payload(&payload).unwrap();
        assert_eq!(change.kind, ChangeKind::Update);
        assert_eq!(change.key, "note-9");
        assert_eq!(change.row.unwrap().origin_device_id, "tablet");
    }

    #[test]
    fn parses_delete_payload_from_old_row() {
        let payload = json!({
            "table": "notes",
            "eventType": "DELETE",
            "old": {"key": "note-3"}
        });
        let change = RemoteChange::from_realtime_payload(&payload).unwrap();
        assert_eq!(change.kind, ChangeKind::Delete);
        assert_eq!(change.key, "note-3");
        assert!(change.row.is_none());
    }

    #[test]
    fn rejects_insert_without_row() {
        let payload = json!({"table": "notes", "eventType": "INSERT"});
        assert!(RemoteChange::from_realtime_payload(&payload).is_err());
    }
}
