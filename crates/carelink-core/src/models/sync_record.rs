//! Sync record model

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Where a record stands relative to the remote store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Written locally, waiting for the next reconcile pass
    Pending,
    /// Remote store holds this value
    Synced,
    /// Rejected by the remote store's policy; never retried automatically
    Failed,
}

impl SyncStatus {
    /// Stable string form used in storage and CLI output
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Synced => "synced",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "synced" => Ok(Self::Synced),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown sync status '{other}'")),
        }
    }
}

/// A logical value mirrored between the remote store and the local cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRecord {
    /// Logical key within a feature
    pub key: String,
    /// JSON payload
    pub value: Value,
    /// Client wall-clock time of the last write
    pub last_modified: DateTime<Utc>,
    /// Device that produced the last write
    pub origin_device_id: String,
    /// Sync state
    pub sync_status: SyncStatus,
}

impl SyncRecord {
    /// Create a pending record stamped with the current time
    #[must_use]
    pub fn new(key: impl Into<String>, value: Value, origin_device_id: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value,
            last_modified: Utc::now(),
            origin_device_id: origin_device_id.into(),
            sync_status: SyncStatus::Pending,
        }
    }

    /// Return a copy with a different status
    #[must_use]
    pub fn with_status(mut self, status: SyncStatus) -> Self {
        self.sync_status = status;
        self
    }

    pub const fn is_pending(&self) -> bool {
        matches!(self.sync_status, SyncStatus::Pending)
    }
}
