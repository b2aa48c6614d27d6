//! User resolution across tiers and configured role overrides.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use crate::models::SyncRecord;
use crate::sync::{Lookup, SyncCoordinator};

/// Declarative `email -> role` overrides loaded from settings.
///
/// Emails compare case-insensitively.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleOverridePolicy {
    overrides: BTreeMap<String, String>,
}

impl RoleOverridePolicy {
    pub fn new<I, E, R>(overrides: I) -> Self
    where
        I: IntoIterator<Item = (E, R)>,
        E: AsRef<str>,
        R: AsRef<str>,
    {
        Self {
            overrides: overrides
                .into_iter()
                .map(|(email, role)| {
                    (
                        email.as_ref().trim().to_ascii_lowercase(),
                        role.as_ref().trim().to_string(),
                    )
                })
                .filter(|(email, role)| !email.is_empty() && !role.is_empty())
                .collect(),
        }
    }

    pub fn role_for(&self, email: &str) -> Option<&str> {
        self.overrides
            .get(&email.trim().to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Set `role` on a user object whose `email` has an override.
    pub fn apply(&self, user: &mut Value) -> bool {
        let Some(role) = user
            .get("email")
            .and_then(Value::as_str)
            .and_then(|email| self.role_for(email))
            .map(str::to_string)
        else {
            return false;
        };
        match user.as_object_mut() {
            Some(fields) => {
                fields.insert("role".to_string(), Value::String(role));
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.overrides.len()
    }

    pub fn is_empty(&self) -> bool {
        self.overrides.is_empty()
    }
}

/// A user found by `UserDirectory`
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedUser {
    pub key: String,
    pub value: Value,
    /// Lookup layer that produced the user
    pub layer: String,
}

/// Finds user records through memory, the local cache, then the remote store.
#[derive(Debug, Clone)]
pub struct UserDirectory {
    users: Arc<SyncCoordinator>,
    roles: RoleOverridePolicy,
}

impl UserDirectory {
    pub const fn new(users: Arc<SyncCoordinator>, roles: RoleOverridePolicy) -> Self {
        Self { users, roles }
    }

    pub const fn roles(&self) -> &RoleOverridePolicy {
        &self.roles
    }

    /// Resolve a user by id and/or email; the first layer with a match wins.
    pub async fn resolve(&self, user_id: Option<&str>, email: Option<&str>) -> Option<ResolvedUser> {
        let user_id = user_id.map(str::trim).filter(|id| !id.is_empty());
        let email = email.map(str::trim).filter(|email| !email.is_empty());
        if user_id.is_none() && email.is_none() {
            return None;
        }

        let users = &self.users;
        let hit = Lookup::new("user")
            .layer("memory", move || async move {
                user_id.and_then(|id| users.memory_record(id))
            })
            .layer("local", move || async move {
                match user_id {
                    Some(id) => users.local_record(id).await.ok().flatten(),
                    None => None,
                }
            })
            .layer("local-email", move || async move {
                let email = email?;
                let records = users.local_records().await.ok()?;
                records
                    .into_iter()
                    .find(|record| email_matches(&record.value, email))
            })
            .layer("remote", move || async move {
                let id = user_id?;
                match users.fetch_remote_record(id).await {
                    Ok(record) => record,
                    Err(error) => {
                        tracing::warn!("Remote user lookup by id failed: {error}");
                        None
                    }
                }
            })
            .layer("remote-email", move || async move {
                let email = email?;
                match users.find_remote_records("email", email).await {
                    Ok(records) => records
                        .into_iter()
                        .find(|record| email_matches(&record.value, email)),
                    Err(error) => {
                        tracing::warn!("Remote user lookup by email failed: {error}");
                        None
                    }
                }
            })
            .run()
            .await?;

        if hit.layer.starts_with("remote") {
            self.remember(hit.value.clone()).await;
        }
        Some(self.finish(hit.value, hit.layer))
    }

    async fn remember(&self, record: SyncRecord) {
        if let Err(error) = self.users.absorb_remote(record).await {
            tracing::warn!("Failed to cache remote user: {error}");
        }
    }

    fn finish(&self, record: SyncRecord, layer: String) -> ResolvedUser {
        let mut value = record.value;
        if self.roles.apply(&mut value) {
            tracing::debug!("Applied role override to user {}", record.key);
        }
        ResolvedUser {
            key: record.key,
            value,
            layer,
        }
    }
}

fn email_matches(user: &Value, email: &str) -> bool {
    user.get("email")
        .and_then(Value::as_str)
        .is_some_and(|candidate| candidate.trim().eq_ignore_ascii_case(email))
}
