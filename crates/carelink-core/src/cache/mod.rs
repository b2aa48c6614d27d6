//! Local and in-memory tiers.
//!
//! The local cache is a plain string key-value store. `RecordCache` layers
//! the `{feature}:{key}` namespace and `SyncRecord` (de)serialization on top
//! of it.

mod memory;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{SyncRecord, SyncStatus};

pub use memory::MemoryBackup;

/// Durable on-device key-value store holding JSON strings
#[async_trait]
pub trait LocalCache: Send + Sync {
    /// Read the raw value stored under `key`
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Insert or replace the value stored under `key`
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove `key`, returning whether it existed
    async fn remove(&self, key: &str) -> Result<bool>;

    /// All entries whose key starts with `prefix`, ordered by key
    async fn entries(&self, prefix: &str) -> Result<Vec<(String, String)>>;
}

/// Build the namespaced cache key for a feature record.
pub fn cache_key(feature: &str, key: &str) -> String {
    format!("{feature}:{key}")
}

/// Typed view of one feature's slice of the local cache
#[derive(Clone)]
pub struct RecordCache {
    cache: Arc<dyn LocalCache>,
    feature: String,
}

impl RecordCache {
    pub fn new(cache: Arc<dyn LocalCache>, feature: impl Into<String>) -> Self {
        Self {
            cache,
            feature: feature.into(),
        }
    }

    pub fn feature(&self) -> &str {
        &self.feature
    }

    /// Load a record, dropping the entry if it no longer parses.
    pub async fn load(&self, key: &str) -> Result<Option<SyncRecord>> {
        let full_key = cache_key(&self.feature, key);
        let Some(raw) = self.cache.get(&full_key).await? else {
            return Ok(None);
        };
        Ok(self.parse_or_drop(&full_key, &raw).await)
    }

    pub async fn store(&self, record: &SyncRecord) -> Result<()> {
        let raw = serde_json::to_string(record)?;
        self.cache
            .set(&cache_key(&self.feature, &record.key), &raw)
            .await
    }

    pub async fn remove(&self, key: &str) -> Result<bool> {
        self.cache.remove(&cache_key(&self.feature, key)).await
    }

    /// Every readable record of this feature.
    pub async fn records(&self) -> Result<Vec<SyncRecord>> {
        let prefix = cache_key(&self.feature, "");
        let mut records = Vec::new();
        for (full_key, raw) in self.cache.entries(&prefix).await? {
            if let Some(record) = self.parse_or_drop(&full_key, &raw).await {
                records.push(record);
            }
        }
        Ok(records)
    }

    pub async fn records_with_status(&self, status: SyncStatus) -> Result<Vec<SyncRecord>> {
        let mut records = self.records().await?;
        records.retain(|record| record.sync_status == status);
        Ok(records)
    }

    async fn parse_or_drop(&self, full_key: &str, raw: &str) -> Option<SyncRecord> {
        match serde_json::from_str::<SyncRecord>(raw) {
            Ok(record) => Some(record),
            Err(error) => {
                tracing::warn!("Dropping corrupt cache entry {full_key}: {error}");
                if let Err(error) = self.cache.remove(full_key).await {
                    tracing::warn!("Failed to remove corrupt cache entry {full_key}: {error}");
                }
                None
            }
        }
    }
}
