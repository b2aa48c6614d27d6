//! Conflict models

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A unique identifier for a conflict, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConflictId(Uuid);

impl ConflictId {
    /// Create a new unique conflict ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ConflictId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConflictId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ConflictId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Shape of a divergence between two values of the same field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    /// Both sides hold a value of the same JSON kind
    ConcurrentUpdate,
    /// One side is null or absent
    UpdateDelete,
    /// The two sides hold different JSON kinds
    TypeMismatch,
}

impl ConflictType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ConcurrentUpdate => "concurrent_update",
            Self::UpdateDelete => "update_delete",
            Self::TypeMismatch => "type_mismatch",
        }
    }
}

impl fmt::Display for ConflictType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How urgently a conflict needs attention
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPriority {
    Low,
    Medium,
    High,
    Critical,
}

/// A detected divergence for a single field of a record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub id: ConflictId,
    pub table_name: String,
    pub record_id: String,
    pub field_name: String,
    pub conflict_type: ConflictType,
    pub local_value: Value,
    pub remote_value: Value,
    pub local_timestamp: DateTime<Utc>,
    pub remote_timestamp: DateTime<Utc>,
    pub local_device_id: String,
    pub remote_device_id: String,
    pub priority: ConflictPriority,
    /// Whether a strategy may pick a winner without a person
    pub auto_resolvable: bool,
    /// Set when the values were compared whole rather than per field
    #[serde(default)]
    pub whole_value: bool,
}

impl ConflictRecord {
    /// Key enforcing one open conflict per table/record/field
    #[must_use]
    pub fn tuple_key(&self) -> (String, String, String) {
        (
            self.table_name.clone(),
            self.record_id.clone(),
            self.field_name.clone(),
        )
    }
}

/// Who picked the winning value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolvedBy {
    System,
    User,
}

impl ResolvedBy {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
        }
    }
}

impl FromStr for ResolvedBy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(Self::System),
            "user" => Ok(Self::User),
            other => Err(format!("unknown resolver '{other}'")),
        }
    }
}

/// Applied resolution; history entries are never mutated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictResolution {
    pub conflict_id: ConflictId,
    pub table_name: String,
    pub record_id: String,
    pub field_name: String,
    pub strategy_name: String,
    pub resolved_value: Value,
    pub resolved_by: ResolvedBy,
    pub resolved_at: DateTime<Utc>,
}
