//! Explicitly constructed sync runtime.
//!
//! `SyncContext` owns the shared tiers and one coordinator per configured
//! feature. Nothing here is global; callers create it at startup and call
//! `shutdown` before exit.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;

use crate::audit::AuditLog;
use crate::cache::{LocalCache, MemoryBackup};
use crate::config::SyncSettings;
use crate::conflict::{
    ConflictDetector, ConflictLog, ConflictResolver, ResolveError, StrategyTable,
};
use crate::db::{Database, LibSqlConflictLog, LibSqlLocalCache};
use crate::error::{Error, Result};
use crate::identity::{RoleOverridePolicy, UserDirectory};
use crate::models::{ConflictId, ConflictRecord, ConflictResolution};
use crate::policy::FieldCipher;
use crate::remote::{RemoteChange, RemoteStore, SupabaseStore};
use crate::sync::{
    reconcile_all, ReconcileReport, ReconcileScheduler, RemoteApplyOutcome, SyncCoordinator,
};

const USERS_FEATURE: &str = "users";
const AUDIT_FEATURE: &str = "audit";

pub struct SyncContext {
    settings: SyncSettings,
    remote_configured: bool,
    memory: Arc<MemoryBackup>,
    resolver: Arc<Mutex<ConflictResolver>>,
    conflict_log: Arc<dyn ConflictLog>,
    coordinators: BTreeMap<String, Arc<SyncCoordinator>>,
    users: Option<UserDirectory>,
    audit: Option<AuditLog>,
    scheduler: Option<ReconcileScheduler>,
}

impl std::fmt::Debug for SyncContext {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("SyncContext")
            .field("settings", &self.settings)
            .field("remote_configured", &self.remote_configured)
            .field("features", &self.coordinators.keys().collect::<Vec<_>>())
            .field("reconciler_running", &self.scheduler.is_some())
            .finish_non_exhaustive()
    }
}

impl SyncContext {
    /// Build every tier and one coordinator per configured feature.
    pub fn init(
        settings: SyncSettings,
        remote: Option<Arc<dyn RemoteStore>>,
        db: Database,
    ) -> Result<Self> {
        settings.validate()?;

        let db = Arc::new(Mutex::new(db));
        let cache: Arc<dyn LocalCache> = Arc::new(LibSqlLocalCache::new(Arc::clone(&db)));
        let conflict_log: Arc<dyn ConflictLog> = Arc::new(LibSqlConflictLog::new(db));
        let memory = Arc::new(MemoryBackup::new());
        let resolver = Arc::new(Mutex::new(ConflictResolver::new(
            ConflictDetector::new(&settings.sensitive_fields),
            StrategyTable::default(),
        )));

        let coordinators: BTreeMap<_, _> = settings
            .features
            .iter()
            .map(|feature| {
                let coordinator = SyncCoordinator::new(
                    feature.clone(),
                    settings.device_id.clone(),
                    remote.clone(),
                    Arc::clone(&cache),
                    Arc::clone(&memory),
                )
                .with_resolver(Arc::clone(&resolver))
                .with_conflict_log(Arc::clone(&conflict_log));
                (feature.name.clone(), Arc::new(coordinator))
            })
            .collect();

        let users = coordinators.get(USERS_FEATURE).map(|users| {
            UserDirectory::new(
                Arc::clone(users),
                RoleOverridePolicy::new(&settings.role_overrides),
            )
        });

        let audit = match (coordinators.get(AUDIT_FEATURE), &settings.encryption_key) {
            (Some(coordinator), Some(key)) => Some(AuditLog::new(
                Arc::clone(coordinator),
                settings.audit_encryption.clone(),
                FieldCipher::from_base64_key(key)?,
            )?),
            _ => None,
        };

        tracing::info!(
            "Sync context ready: {} features, remote {}",
            coordinators.len(),
            if remote.is_some() { "configured" } else { "offline" }
        );

        Ok(Self {
            remote_configured: remote.is_some(),
            settings,
            memory,
            resolver,
            conflict_log,
            coordinators,
            users,
            audit,
            scheduler: None,
        })
    }

    /// Open the local database at `db_path` and connect Supabase when the
    /// settings configure it.
    pub async fn open(settings: SyncSettings, db_path: impl AsRef<Path>) -> Result<Self> {
        let db = Database::open(db_path).await?;
        let remote = SupabaseStore::from_settings(&settings)?
            .map(|store| Arc::new(store) as Arc<dyn RemoteStore>);
        Self::init(settings, remote, db)
    }

    pub const fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    pub const fn remote_configured(&self) -> bool {
        self.remote_configured
    }

    pub fn coordinator(&self, feature: &str) -> Result<Arc<SyncCoordinator>> {
        self.coordinators
            .get(feature)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("feature '{feature}'")))
    }

    pub fn coordinators(&self) -> impl Iterator<Item = &Arc<SyncCoordinator>> {
        self.coordinators.values()
    }

    pub const fn users(&self) -> Option<&UserDirectory> {
        self.users.as_ref()
    }

    pub fn audit_log(&self) -> Result<&AuditLog> {
        self.audit.as_ref().ok_or_else(|| {
            Error::Config(
                "audit log needs the audit feature and an encryption key".to_string(),
            )
        })
    }

    pub fn memory(&self) -> Arc<MemoryBackup> {
        Arc::clone(&self.memory)
    }

    pub fn conflict_log(&self) -> Arc<dyn ConflictLog> {
        Arc::clone(&self.conflict_log)
    }

    /// Spawn the periodic reconciler; a no-op when already running.
    pub fn start_reconciler(&mut self) {
        if self.scheduler.is_some() {
            return;
        }
        self.scheduler = Some(ReconcileScheduler::spawn(
            self.coordinators.values().cloned().collect(),
            self.settings.reconcile_interval(),
        ));
    }

    pub const fn reconciler_running(&self) -> bool {
        self.scheduler.is_some()
    }

    /// Stop the reconciler and wait for its task.
    pub async fn shutdown(&mut self) {
        if let Some(scheduler) = self.scheduler.take() {
            scheduler.shutdown().await;
        }
    }

    /// One reconcile pass over every feature.
    pub async fn reconcile_all(&self) -> ReconcileReport {
        let coordinators: Vec<_> = self.coordinators.values().cloned().collect();
        reconcile_all(&coordinators).await
    }

    /// Route a realtime change to the coordinator owning its table.
    pub async fn apply_remote_change(&self, change: RemoteChange) -> Result<RemoteApplyOutcome> {
        let coordinator = self
            .coordinators
            .values()
            .find(|coordinator| coordinator.feature().table == change.table)
            .ok_or_else(|| Error::NotFound(format!("no feature for table '{}'", change.table)))?;
        coordinator.apply_remote_change(change).await
    }

    /// Open conflicts, most urgent first
    pub async fn open_conflicts(&self) -> Vec<ConflictRecord> {
        let resolver = self.resolver.lock().await;
        resolver.open_conflicts().into_iter().cloned().collect()
    }

    /// Resolve an open conflict and write the result into the local record.
    ///
    /// With no `strategy` the resolver picks one, or uses `user_input` as a
    /// manual resolution. The conflict stays open when the local write fails,
    /// and is dropped when the local record changed since it was detected.
    pub async fn resolve_conflict(
        &self,
        id: ConflictId,
        strategy: Option<&str>,
        user_input: Option<Value>,
    ) -> Result<ConflictResolution> {
        let mut resolver = self.resolver.lock().await;
        let conflict = resolver
            .get(id)
            .cloned()
            .ok_or(ResolveError::UnknownConflict(id))?;
        let coordinator = self
            .coordinators
            .values()
            .find(|coordinator| coordinator.feature().table == conflict.table_name)
            .ok_or_else(|| {
                Error::NotFound(format!("no feature for table '{}'", conflict.table_name))
            })?;
        let resolution = resolver.prepare(id, strategy, user_input)?;

        match coordinator.apply_resolution(&conflict, &resolution).await {
            Ok(_) => resolver.commit(&resolution)?,
            Err(error @ Error::Conflict(ResolveError::StaleConflict(_))) => {
                resolver.discard(id);
                return Err(error);
            }
            Err(error) => {
                tracing::warn!("Conflict {id} stays open: {error}");
                return Err(error);
            }
        }
        drop(resolver);

        self.conflict_log.append(&resolution).await?;
        Ok(resolution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FeatureConfig;
    use serde_json::json;

    async fn offline_context(settings: SyncSettings) -> SyncContext {
        let db = Database::open_in_memory().await.unwrap();
        SyncContext::init(settings, None, db).unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_init_builds_configured_features() {
        let context = offline_context(SyncSettings::default()).await;
        assert!(!context.remote_configured());
        assert_eq!(context.coordinators().count(), FeatureConfig::defaults().len());
        assert!(context.coordinator("notes").is_ok());
        assert!(context.coordinator("billing").is_err());
        assert!(context.users().is_some());
        assert!(context.audit_log().is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_audit_log_enabled_with_key() {
        let settings = SyncSettings {
            encryption_key: Some(FieldCipher::generate_key()),
            ..SyncSettings::default()
        };
        let context = offline_context(settings).await;
        assert!(context.audit_log().is_ok());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_invalid_settings_are_rejected() {
        let settings = SyncSettings {
            reconcile_interval_secs: 0,
            ..SyncSettings::default()
        };
        let db = Database::open_in_memory().await.unwrap();
        assert!(SyncContext::init(settings, None, db).is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_reconciler_lifecycle() {
        let mut context = offline_context(SyncSettings::default()).await;
        context
            .coordinator("notes")
            .unwrap()
            .write("n1", json!("hello"))
            .await
            .unwrap();

        context.start_reconciler();
        context.start_reconciler();
        assert!(context.reconciler_running());

        let report = context.reconcile_all().await;
        assert_eq!(report.still_pending, 1);

        context.shutdown().await;
        assert!(!context.reconciler_running());
    }
}
