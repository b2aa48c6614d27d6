//! Per-feature three-tier sync coordinator

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::{broadcast, Mutex};

use super::fallback::{call_remote, with_fallback, RetryPolicy, Tier};
use crate::cache::{cache_key, LocalCache, MemoryBackup, RecordCache};
use crate::config::FeatureConfig;
use crate::conflict::{ConflictLog, ConflictResolver, ResolveError, WHOLE_VALUE_FIELD};
use crate::error::{Error, Result};
use crate::models::{ConflictId, ConflictRecord, ConflictResolution, SyncRecord, SyncStatus};
use crate::remote::{ChangeKind, RemoteChange, RemoteError, RemoteResult, RemoteRow, RemoteStore};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Change notification broadcast to subscribers after every local mutation
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    Upserted { feature: String, record: SyncRecord },
    Deleted { feature: String, key: String },
}

/// Tier that served a read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadSource {
    /// Fresh in-memory entry
    Memory,
    Remote,
    Local,
    /// Stale in-memory entry, used when nothing else answered
    Backup,
    Missing,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReadOutcome {
    pub value: Option<Value>,
    pub source: ReadSource,
}

impl ReadOutcome {
    const fn missing() -> Self {
        Self {
            value: None,
            source: ReadSource::Missing,
        }
    }
}

/// Counts from one reconcile pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub attempted: usize,
    pub synced: usize,
    pub still_pending: usize,
    pub permanently_failed: usize,
}

impl ReconcileReport {
    pub fn merge(&mut self, other: Self) {
        self.attempted += other.attempted;
        self.synced += other.synced;
        self.still_pending += other.still_pending;
        self.permanently_failed += other.permanently_failed;
    }
}

/// What `apply_remote_change` did with a realtime change
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteApplyOutcome {
    /// Remote value replaced the local copy
    Accepted,
    /// Local copy removed
    Deleted,
    /// Local unsynced copy kept as is
    KeptLocal,
    /// Conflicting fields settled automatically
    Merged {
        resolutions: Vec<ConflictResolution>,
        status: SyncStatus,
    },
    /// At least one field needs a person; local copy untouched
    NeedsReview { open: Vec<ConflictId> },
}

/// Writes go remote first, then always to the local cache and memory backup.
/// Reads walk memory, remote, local, then stale memory.
pub struct SyncCoordinator {
    feature: FeatureConfig,
    device_id: String,
    remote: Option<Arc<dyn RemoteStore>>,
    records: RecordCache,
    memory: Arc<MemoryBackup>,
    resolver: Arc<Mutex<ConflictResolver>>,
    conflict_log: Option<Arc<dyn ConflictLog>>,
    retry: RetryPolicy,
    events: broadcast::Sender<ChangeEvent>,
}

impl std::fmt::Debug for SyncCoordinator {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("SyncCoordinator")
            .field("feature", &self.feature)
            .field("device_id", &self.device_id)
            .field("remote", &self.remote.is_some())
            .finish_non_exhaustive()
    }
}

impl SyncCoordinator {
    pub fn new(
        feature: FeatureConfig,
        device_id: impl Into<String>,
        remote: Option<Arc<dyn RemoteStore>>,
        cache: Arc<dyn LocalCache>,
        memory: Arc<MemoryBackup>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            records: RecordCache::new(cache, feature.name.clone()),
            retry: RetryPolicy::once(feature.remote_timeout()),
            feature,
            device_id: device_id.into(),
            remote,
            memory,
            resolver: Arc::new(Mutex::new(ConflictResolver::default())),
            conflict_log: None,
            events,
        }
    }

    /// Share one resolver across coordinators
    #[must_use]
    pub fn with_resolver(mut self, resolver: Arc<Mutex<ConflictResolver>>) -> Self {
        self.resolver = resolver;
        self
    }

    #[must_use]
    pub fn with_conflict_log(mut self, log: Arc<dyn ConflictLog>) -> Self {
        self.conflict_log = Some(log);
        self
    }

    #[must_use]
    pub const fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub const fn feature(&self) -> &FeatureConfig {
        &self.feature
    }

    pub fn resolver(&self) -> Arc<Mutex<ConflictResolver>> {
        Arc::clone(&self.resolver)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.events.subscribe()
    }

    /// Store `value` under `key`.
    ///
    /// Remote failures only decide the stored status; the sole error returned
    /// is a failed local-cache write.
    pub async fn write(&self, key: &str, value: Value) -> Result<SyncStatus> {
        let key = validate_key(key)?;
        let mut record = SyncRecord::new(key, value, self.device_id.as_str());

        record.sync_status = match self.push(&record).await {
            Ok(()) => SyncStatus::Synced,
            Err(None) => SyncStatus::Pending,
            Err(Some(error)) => self.status_after_failure(key, &error),
        };

        self.store(&record).await?;
        tracing::debug!(
            "Wrote {}:{key} as {}",
            self.feature.name,
            record.sync_status
        );

        // Open conflicts compared the value this write just replaced.
        let discarded = self
            .resolver
            .lock()
            .await
            .discard_record(&self.feature.table, key);
        if !discarded.is_empty() {
            tracing::info!(
                "Dropped {} open conflicts on {}:{key} after a local write",
                discarded.len(),
                self.feature.name
            );
        }
        Ok(record.sync_status)
    }

    /// Read the best available value for `key`; never fails.
    pub async fn read(&self, key: &str) -> Option<Value> {
        self.read_detailed(key).await.value
    }

    /// Read with the tier that answered.
    pub async fn read_detailed(&self, key: &str) -> ReadOutcome {
        let Ok(key) = validate_key(key) else {
            return ReadOutcome::missing();
        };
        let memory_key = cache_key(&self.feature.name, key);

        if let Some(record) = self.memory.fresh(&memory_key, self.feature.cache_ttl()) {
            tracing::debug!("Memory hit for {memory_key}");
            return ReadOutcome {
                value: Some(record.value),
                source: ReadSource::Memory,
            };
        }

        let outcome = with_fallback(
            self.retry,
            || self.fetch_remote(key),
            || self.load_local(key),
        )
        .await;

        match (outcome.tier, outcome.value) {
            (Tier::Primary, Some(remote)) => self.accept_remote_read(key, remote).await,
            (Tier::Secondary, Some(local)) => {
                self.memory.put(memory_key, local.clone());
                ReadOutcome {
                    value: Some(local.value),
                    source: ReadSource::Local,
                }
            }
            _ => match self.memory.any(&memory_key) {
                Some(record) => {
                    tracing::warn!("Serving stale memory backup for {memory_key}");
                    ReadOutcome {
                        value: Some(record.value),
                        source: ReadSource::Backup,
                    }
                }
                None => ReadOutcome::missing(),
            },
        }
    }

    /// Remove `key` from every tier. Remote failures are logged only.
    pub async fn delete(&self, key: &str) -> Result<bool> {
        let key = validate_key(key)?;
        if let Some(remote) = &self.remote {
            let table = self.feature.table.as_str();
            if let Err(error) = call_remote(self.retry, || remote.delete(table, key)).await {
                tracing::warn!(
                    "Remote delete of {}:{key} failed: {error}",
                    self.feature.name
                );
            }
        }

        let existed = self.records.remove(key).await?;
        self.memory.evict(&cache_key(&self.feature.name, key));
        self.emit(ChangeEvent::Deleted {
            feature: self.feature.name.clone(),
            key: key.to_string(),
        });
        Ok(existed)
    }

    /// Push every pending record of this feature to the remote store.
    pub async fn background_reconcile(&self) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();
        if self.remote.is_none() {
            report.still_pending = self.pending_records().await?.len();
            return Ok(report);
        }

        for record in self.pending_records().await? {
            report.attempted += 1;
            let status = match self.push(&record).await {
                Ok(()) => SyncStatus::Synced,
                Err(None) => SyncStatus::Pending,
                Err(Some(error)) => self.status_after_failure(&record.key, &error),
            };

            match status {
                SyncStatus::Synced => report.synced += 1,
                SyncStatus::Pending => report.still_pending += 1,
                SyncStatus::Failed => report.permanently_failed += 1,
            }
            if status != SyncStatus::Pending {
                self.settle(record, status).await?;
            }
        }

        if report.attempted > 0 {
            tracing::info!(
                "Reconciled {}: {} attempted, {} synced, {} pending, {} failed",
                self.feature.name,
                report.attempted,
                report.synced,
                report.still_pending,
                report.permanently_failed
            );
        }
        Ok(report)
    }

    /// Move a failed record back into the reconcile queue.
    pub async fn retry_failed(&self, key: &str) -> Result<bool> {
        let key = validate_key(key)?;
        let record = self
            .records
            .load(key)
            .await?
            .ok_or_else(|| Error::NotFound(cache_key(&self.feature.name, key)))?;
        if record.sync_status != SyncStatus::Failed {
            return Ok(false);
        }

        self.store(&record.with_status(SyncStatus::Pending)).await?;
        tracing::info!("Requeued failed record {}:{key}", self.feature.name);
        Ok(true)
    }

    pub async fn pending_records(&self) -> Result<Vec<SyncRecord>> {
        self.records_with_status(SyncStatus::Pending).await
    }

    pub async fn records_with_status(&self, status: SyncStatus) -> Result<Vec<SyncRecord>> {
        self.records.records_with_status(status).await
    }

    /// All readable local records of this feature
    pub async fn local_records(&self) -> Result<Vec<SyncRecord>> {
        self.records.records().await
    }

    /// Local record for `key`, if any
    pub async fn local_record(&self, key: &str) -> Result<Option<SyncRecord>> {
        self.records.load(validate_key(key)?).await
    }

    /// In-memory record for `key` that is still within the feature TTL
    pub fn memory_record(&self, key: &str) -> Option<SyncRecord> {
        self.memory
            .fresh(&cache_key(&self.feature.name, key), self.feature.cache_ttl())
    }

    /// Fetch one remote row under the feature's retry policy
    pub async fn fetch_remote_record(&self, key: &str) -> RemoteResult<Option<SyncRecord>> {
        let Some(remote) = &self.remote else {
            return Ok(None);
        };
        let table = self.feature.table.as_str();
        let row = call_remote(self.retry, || remote.fetch(table, key)).await?;
        Ok(row.map(|row| row.into_record(SyncStatus::Synced)))
    }

    /// Remote rows whose value has `field == value`
    pub async fn find_remote_records(
        &self,
        field: &str,
        value: &str,
    ) -> RemoteResult<Vec<SyncRecord>> {
        let Some(remote) = &self.remote else {
            return Ok(Vec::new());
        };
        let table = self.feature.table.as_str();
        let rows = call_remote(self.retry, || remote.find_by_field(table, field, value)).await?;
        Ok(rows
            .into_iter()
            .map(|row| row.into_record(SyncStatus::Synced))
            .collect())
    }

    /// Cache a record fetched from the remote store unless an unsynced local
    /// copy exists.
    pub async fn absorb_remote(&self, record: SyncRecord) -> Result<()> {
        if let Some(local) = self.records.load(&record.key).await? {
            if local.sync_status != SyncStatus::Synced {
                return Ok(());
            }
        }
        self.store(&record.with_status(SyncStatus::Synced)).await
    }

    /// Apply a change from the remote store's realtime feed.
    pub async fn apply_remote_change(&self, change: RemoteChange) -> Result<RemoteApplyOutcome> {
        if change.table != self.feature.table {
            return Err(Error::InvalidInput(format!(
                "change for table {} sent to {} coordinator",
                change.table, self.feature.name
            )));
        }
        let key = validate_key(&change.key)?;
        let local = self.records.load(key).await?;
        let unsynced = local
            .as_ref()
            .is_some_and(|record| record.sync_status != SyncStatus::Synced);

        match (change.kind, change.row) {
            (ChangeKind::Delete, _) => {
                if unsynced {
                    tracing::debug!(
                        "Ignoring remote delete of {}:{key}; local copy is unsynced",
                        self.feature.name
                    );
                    return Ok(RemoteApplyOutcome::KeptLocal);
                }
                self.records.remove(key).await?;
                self.memory.evict(&cache_key(&self.feature.name, key));
                self.emit(ChangeEvent::Deleted {
                    feature: self.feature.name.clone(),
                    key: key.to_string(),
                });
                Ok(RemoteApplyOutcome::Deleted)
            }
            (_, None) => Err(Error::InvalidInput(format!(
                "{:?} change for {key} carried no row",
                change.kind
            ))),
            (_, Some(row)) => {
                let remote = row.into_record(SyncStatus::Synced);
                match local {
                    Some(local) if unsynced => self.merge_remote(local, remote).await,
                    _ => {
                        self.store(&remote).await?;
                        Ok(RemoteApplyOutcome::Accepted)
                    }
                }
            }
        }
    }

    /// Write a resolved value for `conflict` into the local record it belongs to.
    ///
    /// Fails with [`ResolveError::StaleConflict`] when the local value no longer
    /// matches the one the conflict was detected against. The updated record is
    /// queued for upload unless it was already failed.
    pub async fn apply_resolution(
        &self,
        conflict: &ConflictRecord,
        resolution: &ConflictResolution,
    ) -> Result<SyncRecord> {
        let key = validate_key(&conflict.record_id)?;
        let mut record = self
            .records
            .load(key)
            .await?
            .ok_or_else(|| Error::NotFound(cache_key(&self.feature.name, key)))?;

        let current = if conflict.whole_value {
            Some(&record.value)
        } else {
            record
                .value
                .as_object()
                .map(|fields| fields.get(&conflict.field_name).unwrap_or(&Value::Null))
        };
        if current != Some(&conflict.local_value) {
            return Err(ResolveError::StaleConflict(conflict.id).into());
        }

        apply_resolved(&mut record.value, resolution, conflict.whole_value);
        record.last_modified = Utc::now();
        record.origin_device_id.clone_from(&self.device_id);
        if record.sync_status != SyncStatus::Failed {
            record.sync_status = SyncStatus::Pending;
        }
        self.store(&record).await?;
        Ok(record)
    }

    async fn merge_remote(
        &self,
        local: SyncRecord,
        remote: SyncRecord,
    ) -> Result<RemoteApplyOutcome> {
        let table = self.feature.table.as_str();
        let resolutions = {
            let mut resolver = self.resolver.lock().await;
            let conflicts = resolver.detector().detect(table, &local, &remote);
            if conflicts.is_empty() {
                drop(resolver);
                self.store(&remote).await?;
                return Ok(RemoteApplyOutcome::Accepted);
            }

            let needs_review = conflicts.iter().any(|conflict| !conflict.auto_resolvable);
            let ids = resolver.register(conflicts);
            if needs_review {
                tracing::warn!(
                    "Remote change to {}:{} needs manual review ({} open conflicts)",
                    self.feature.name,
                    local.key,
                    ids.len()
                );
                return Ok(RemoteApplyOutcome::NeedsReview { open: ids });
            }

            let mut resolutions = Vec::with_capacity(ids.len());
            let mut unresolved = Vec::new();
            for id in ids {
                match resolver.resolve(id, None) {
                    Ok(resolution) => resolutions.push(resolution),
                    Err(error) => {
                        tracing::warn!("Conflict {id} stays open: {error}");
                        unresolved.push(id);
                    }
                }
            }
            if !unresolved.is_empty() {
                return Ok(RemoteApplyOutcome::NeedsReview { open: unresolved });
            }
            resolutions
        };

        let merged = merge_value(&local.value, &remote.value, &resolutions);
        let record = if merged == remote.value {
            remote
        } else {
            let status = if local.sync_status == SyncStatus::Failed {
                SyncStatus::Failed
            } else {
                SyncStatus::Pending
            };
            SyncRecord {
                key: local.key,
                value: merged,
                last_modified: Utc::now(),
                origin_device_id: self.device_id.clone(),
                sync_status: status,
            }
        };
        self.store(&record).await?;

        if let Some(log) = &self.conflict_log {
            for resolution in &resolutions {
                if let Err(error) = log.append(resolution).await {
                    tracing::warn!(
                        "Failed to record resolution {}: {error}",
                        resolution.conflict_id
                    );
                }
            }
        }

        Ok(RemoteApplyOutcome::Merged {
            resolutions,
            status: record.sync_status,
        })
    }

    async fn accept_remote_read(&self, key: &str, record: SyncRecord) -> ReadOutcome {
        if let Some(local) = self.load_local(key).await {
            if local.sync_status != SyncStatus::Synced {
                self.memory
                    .put(cache_key(&self.feature.name, key), local.clone());
                return ReadOutcome {
                    value: Some(local.value),
                    source: ReadSource::Local,
                };
            }
        }

        let value = record.value.clone();
        if let Err(error) = self.records.store(&record).await {
            tracing::warn!(
                "Failed to refresh local cache for {}:{key}: {error}",
                self.feature.name
            );
        }
        self.memory
            .put(cache_key(&self.feature.name, key), record);
        ReadOutcome {
            value: Some(value),
            source: ReadSource::Remote,
        }
    }

    /// `Err(None)` means no remote is configured.
    async fn push(&self, record: &SyncRecord) -> std::result::Result<(), Option<RemoteError>> {
        let Some(remote) = &self.remote else {
            return Err(None);
        };
        let row = RemoteRow::from(record);
        let table = self.feature.table.as_str();
        call_remote(self.retry, || remote.upsert(table, &row))
            .await
            .map_err(Some)
    }

    async fn fetch_remote(&self, key: &str) -> RemoteResult<Option<SyncRecord>> {
        let Some(remote) = &self.remote else {
            return Ok(None);
        };
        let row = remote.fetch(&self.feature.table, key).await?;
        Ok(row.map(|row| row.into_record(SyncStatus::Synced)))
    }

    async fn load_local(&self, key: &str) -> Option<SyncRecord> {
        match self.records.load(key).await {
            Ok(record) => record,
            Err(error) => {
                tracing::warn!(
                    "Local cache read of {}:{key} failed: {error}",
                    self.feature.name
                );
                None
            }
        }
    }

    fn status_after_failure(&self, key: &str, error: &RemoteError) -> SyncStatus {
        if error.is_permanent() {
            tracing::warn!(
                "Remote rejected {}:{key}; marking failed: {error}",
                self.feature.name
            );
            SyncStatus::Failed
        } else {
            tracing::warn!(
                "Remote write of {}:{key} deferred: {error}",
                self.feature.name
            );
            SyncStatus::Pending
        }
    }

    /// Record a reconcile result unless the record changed meanwhile.
    async fn settle(&self, attempted: SyncRecord, status: SyncStatus) -> Result<()> {
        match self.records.load(&attempted.key).await? {
            Some(current)
                if current.last_modified == attempted.last_modified
                    && current.value == attempted.value =>
            {
                self.store(&current.with_status(status)).await
            }
            _ => {
                tracing::debug!(
                    "{}:{} changed during reconcile; leaving it pending",
                    self.feature.name,
                    attempted.key
                );
                Ok(())
            }
        }
    }

    async fn store(&self, record: &SyncRecord) -> Result<()> {
        self.records.store(record).await?;
        self.memory
            .put(cache_key(&self.feature.name, &record.key), record.clone());
        self.emit(ChangeEvent::Upserted {
            feature: self.feature.name.clone(),
            record: record.clone(),
        });
        Ok(())
    }

    fn emit(&self, event: ChangeEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

fn validate_key(key: &str) -> Result<&str> {
    let trimmed = key.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidInput("record key must not be empty".to_string()));
    }
    Ok(trimmed)
}

/// Apply resolved field values on top of the local value.
fn merge_value(local: &Value, remote: &Value, resolutions: &[ConflictResolution]) -> Value {
    let whole_value = !(local.is_object() && remote.is_object());
    let mut merged = local.clone();
    for resolution in resolutions {
        if whole_value && resolution.field_name != WHOLE_VALUE_FIELD {
            continue;
        }
        apply_resolved(&mut merged, resolution, whole_value);
    }
    merged
}

/// A null field resolution removes the field.
fn apply_resolved(value: &mut Value, resolution: &ConflictResolution, whole_value: bool) {
    if whole_value {
        value.clone_from(&resolution.resolved_value);
        return;
    }
    if let Value::Object(fields) = value {
        if resolution.resolved_value.is_null() {
            fields.remove(&resolution.field_name);
        } else {
            fields.insert(
                resolution.field_name.clone(),
                resolution.resolved_value.clone(),
            );
        }
    }
}
