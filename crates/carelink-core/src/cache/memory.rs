//! In-process backup tier

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use tokio::time::Instant;

use crate::models::SyncRecord;

#[derive(Debug, Clone)]
struct BackupEntry {
    record: SyncRecord,
    stored_at: Instant,
}

/// Last-known records kept in memory, keyed by namespaced cache key.
///
/// Entries younger than the feature TTL are served without asking the remote
/// store. Older entries stay around as the last resort when both the remote
/// store and the local cache come up empty.
#[derive(Debug, Default)]
pub struct MemoryBackup {
    entries: RwLock<HashMap<String, BackupEntry>>,
}

impl MemoryBackup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, key: impl Into<String>, record: SyncRecord) {
        let entry = BackupEntry {
            record,
            stored_at: Instant::now(),
        };
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), entry);
    }

    /// Entry stored less than `ttl` ago
    pub fn fresh(&self, key: &str, ttl: Duration) -> Option<SyncRecord> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(key)
            .filter(|entry| entry.stored_at.elapsed() < ttl)
            .map(|entry| entry.record.clone())
    }

    /// Entry regardless of age
    pub fn any(&self, key: &str) -> Option<SyncRecord> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(key).map(|entry| entry.record.clone())
    }

    pub fn evict(&self, key: &str) -> Option<SyncRecord> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
            .map(|entry| entry.record)
    }

    /// Every record whose key starts with `prefix`
    pub fn with_prefix(&self, prefix: &str) -> Vec<SyncRecord> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let mut matched: Vec<_> = entries
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, entry)| (key.clone(), entry.record.clone()))
            .collect();
        matched.sort_by(|left, right| left.0.cmp(&right.0));
        matched.into_iter().map(|(_, record)| record).collect()
    }

    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
