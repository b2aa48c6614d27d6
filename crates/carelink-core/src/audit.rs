//! Audit trail written through the `audit` coordinator.
//!
//! Entries are sealed with the audit `FieldEncryptionPolicy` before they
//! touch any tier, so the local cache and memory backup never hold the
//! plaintext of encrypted fields.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::SyncStatus;
use crate::policy::{FieldCipher, FieldEncryptionPolicy};
use crate::sync::SyncCoordinator;

/// Result of an audited action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditOutcome {
    Success,
    Failure,
}

/// One audited action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: String,
    pub tenant_id: String,
    pub user_id: String,
    pub user_name: String,
    pub action: String,
    pub resource: String,
    pub outcome: AuditOutcome,
    #[serde(default)]
    pub failure_reason: Option<String>,
    #[serde(default)]
    pub details: Value,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(
        tenant_id: impl Into<String>,
        user_id: impl Into<String>,
        user_name: impl Into<String>,
        action: impl Into<String>,
        resource: impl Into<String>,
        outcome: AuditOutcome,
    ) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            tenant_id: tenant_id.into(),
            user_id: user_id.into(),
            user_name: user_name.into(),
            action: action.into(),
            resource: resource.into(),
            outcome,
            failure_reason: None,
            details: Value::Null,
            ip_address: None,
            user_agent: None,
            occurred_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    #[must_use]
    pub fn with_failure_reason(mut self, reason: impl Into<String>) -> Self {
        self.failure_reason = Some(reason.into());
        self
    }

    #[must_use]
    pub fn with_client(mut self, ip_address: Option<String>, user_agent: Option<String>) -> Self {
        self.ip_address = ip_address;
        self.user_agent = user_agent;
        self
    }
}

#[derive(Debug, Clone)]
pub struct AuditLog {
    coordinator: Arc<SyncCoordinator>,
    policy: FieldEncryptionPolicy,
    cipher: FieldCipher,
}

impl AuditLog {
    pub fn new(
        coordinator: Arc<SyncCoordinator>,
        policy: FieldEncryptionPolicy,
        cipher: FieldCipher,
    ) -> Result<Self> {
        policy.validate()?;
        Ok(Self {
            coordinator,
            policy,
            cipher,
        })
    }

    /// Seal and store `entry`; returns the sync status of the write.
    pub async fn record(&self, entry: &AuditEntry) -> Result<SyncStatus> {
        let Value::Object(mut fields) = serde_json::to_value(entry)? else {
            return Err(Error::InvalidInput(
                "audit entry did not serialize to an object".to_string(),
            ));
        };
        let sealed = self.policy.seal(&self.cipher, &mut fields)?;
        tracing::debug!("Recording audit entry {} ({sealed} sealed fields)", entry.id);
        self.coordinator
            .write(&entry.id, Value::Object(fields))
            .await
    }

    /// Read an entry back with its sealed fields opened.
    pub async fn read(&self, id: &str) -> Result<Option<AuditEntry>> {
        let Some(value) = self.coordinator.read(id).await else {
            return Ok(None);
        };
        let Value::Object(mut fields) = value else {
            return Err(Error::InvalidInput(format!(
                "audit entry {id} is not an object"
            )));
        };
        self.policy.open(&self.cipher, &mut fields)?;
        Ok(Some(serde_json::from_value(Value::Object(fields))?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryBackup;
    use crate::config::FeatureConfig;
    use crate::db::LibSqlLocalCache;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    async fn setup() -> (Arc<SyncCoordinator>, AuditLog) {
        let cache = Arc::new(LibSqlLocalCache::open_in_memory().await.unwrap());
        let coordinator = Arc::new(SyncCoordinator::new(
            FeatureConfig::audit(),
            "device-a",
            None,
            cache,
            Arc::new(MemoryBackup::new()),
        ));
        let cipher = FieldCipher::from_base64_key(&FieldCipher::generate_key()).unwrap();
        let log = AuditLog::new(
            Arc::clone(&coordinator),
            FieldEncryptionPolicy::audit_default(),
            cipher,
        )
        .unwrap();
        (coordinator, log)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_record_seals_and_read_opens() {
        let (coordinator, log) = setup().await;
        let entry = AuditEntry::new("clinic-1", "u1", "Dana", "login", "session", AuditOutcome::Failure)
            .with_failure_reason("bad password")
            .with_details(json!({"attempt": 3}))
            .with_client(Some("10.0.0.4".to_string()), Some("curl/8".to_string()));

        let status = log.record(&entry).await.unwrap();
        assert_eq!(status, SyncStatus::Pending);

        let stored = coordinator.local_record(&entry.id).await.unwrap().unwrap();
        let details = stored.value["details"].as_str().unwrap();
        assert!(FieldCipher::is_sealed(details));
        assert!(FieldCipher::is_sealed(stored.value["ip_address"].as_str().unwrap()));
        assert_eq!(stored.value["user_name"], json!("Dana"));
        assert_eq!(stored.value["failure_reason"], json!("bad password"));

        let read = log.read(&entry.id).await.unwrap().unwrap();
        assert_eq!(read, entry);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_overlapping_policy_is_rejected() {
        let (coordinator, _) = setup().await;
        let policy = FieldEncryptionPolicy::new(["details"], ["details"]);
        let cipher = FieldCipher::from_base64_key(&FieldCipher::generate_key()).unwrap();
        assert!(AuditLog::new(coordinator, policy, cipher).is_err());
    }
}
