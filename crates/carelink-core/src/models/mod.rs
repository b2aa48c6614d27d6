//! Data models for Carelink

mod conflict;
mod sync_record;

pub use conflict::{
    ConflictId, ConflictPriority, ConflictRecord, ConflictResolution, ConflictType, ResolvedBy,
};
pub use sync_record::{SyncRecord, SyncStatus};
