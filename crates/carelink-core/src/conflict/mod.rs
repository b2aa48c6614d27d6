//! Conflict detection and resolution.
//!
//! The detector turns two versions of a record into per-field
//! `ConflictRecord`s, the strategy table decides who wins, and the resolver
//! tracks which conflicts are still open.

mod detector;
mod resolver;
mod strategy;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::ConflictResolution;

pub use detector::{ConflictDetector, SYSTEM_FIELDS, WHOLE_VALUE_FIELD};
pub use resolver::{ConflictResolver, ResolveError};
pub use strategy::{
    Strategy, StrategyKind, StrategyTable, FIRST_WRITE_WINS, LAST_WRITE_WINS, LOCAL_WINS, MANUAL,
    REMOTE_WINS, STRING_MERGE,
};

/// Durable, append-only history of applied resolutions
#[async_trait]
pub trait ConflictLog: Send + Sync {
    async fn append(&self, resolution: &ConflictResolution) -> Result<()>;

    /// Most recent resolutions first
    async fn recent(&self, limit: usize) -> Result<Vec<ConflictResolution>>;

    /// Every resolution recorded for one record, oldest first
    async fn for_record(&self, table_name: &str, record_id: &str)
        -> Result<Vec<ConflictResolution>>;
}
