//! Runtime configuration for the sync layer.
//!
//! `SyncSettings` is loaded from a JSON file, then overlaid with environment
//! variables. Secrets (access token, encryption key) are only ever read from
//! the environment and are never serialized back to disk.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::policy::FieldEncryptionPolicy;
use crate::util::{is_http_url, normalize_text_option};

const SETTINGS_SCHEMA_VERSION: u32 = 1;
const DEFAULT_RECONCILE_INTERVAL_SECS: u64 = 30;

pub const ENV_SUPABASE_URL: &str = "SUPABASE_URL";
pub const ENV_SUPABASE_ANON_KEY: &str = "SUPABASE_ANON_KEY";
pub const ENV_TENANT_ID: &str = "CARELINK_TENANT_ID";
pub const ENV_DEVICE_ID: &str = "CARELINK_DEVICE_ID";
pub const ENV_ACCESS_TOKEN: &str = "CARELINK_ACCESS_TOKEN";
pub const ENV_ENCRYPTION_KEY: &str = "CARELINK_ENCRYPTION_KEY";

/// Field-name substrings that are never auto-resolved.
pub const DEFAULT_SENSITIVE_FIELDS: &[&str] = &[
    "patient_name",
    "ssn",
    "diagnosis",
    "date_of_birth",
    "medical_record",
    "insurance",
];

/// Per-feature coordinator settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FeatureConfig {
    /// Feature name; also the local cache key namespace
    pub name: String,
    /// Remote table holding this feature's rows
    pub table: String,
    /// How long an in-memory entry is served without asking the remote
    pub cache_ttl_secs: u64,
    /// Upper bound on a single remote call
    pub remote_timeout_ms: u64,
}

impl FeatureConfig {
    pub fn new(
        name: impl Into<String>,
        table: impl Into<String>,
        cache_ttl: Duration,
        remote_timeout: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            cache_ttl_secs: cache_ttl.as_secs(),
            remote_timeout_ms: u64::try_from(remote_timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }

    pub fn notes() -> Self {
        Self::new(
            "notes",
            "notes",
            Duration::from_secs(30),
            Duration::from_secs(5),
        )
    }

    pub fn profile() -> Self {
        Self::new(
            "profile",
            "user_profiles",
            Duration::from_secs(60),
            Duration::from_secs(5),
        )
    }

    pub fn settings() -> Self {
        Self::new(
            "settings",
            "user_settings",
            Duration::from_secs(300),
            Duration::from_secs(3),
        )
    }

    pub fn avatars() -> Self {
        Self::new(
            "avatars",
            "user_avatars",
            Duration::from_secs(300),
            Duration::from_secs(10),
        )
    }

    pub fn users() -> Self {
        Self::new(
            "users",
            "users",
            Duration::from_secs(60),
            Duration::from_secs(5),
        )
    }

    pub fn audit() -> Self {
        Self::new(
            "audit",
            "audit_logs",
            Duration::from_secs(30),
            Duration::from_secs(10),
        )
    }

    /// Built-in feature set
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::notes(),
            Self::profile(),
            Self::settings(),
            Self::avatars(),
            Self::users(),
            Self::audit(),
        ]
    }

    pub const fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub const fn remote_timeout(&self) -> Duration {
        Duration::from_millis(self.remote_timeout_ms)
    }
}

/// Settings shared by every coordinator in a `SyncContext`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncSettings {
    pub version: u32,
    pub supabase_url: Option<String>,
    pub supabase_anon_key: Option<String>,
    pub tenant_id: String,
    pub device_id: String,
    pub reconcile_interval_secs: u64,
    pub features: Vec<FeatureConfig>,
    pub sensitive_fields: Vec<String>,
    /// Declarative role overrides keyed by lowercase email
    pub role_overrides: BTreeMap<String, String>,
    pub audit_encryption: FieldEncryptionPolicy,
    #[serde(skip)]
    pub access_token: Option<String>,
    #[serde(skip)]
    pub encryption_key: Option<String>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            version: SETTINGS_SCHEMA_VERSION,
            supabase_url: None,
            supabase_anon_key: None,
            tenant_id: "default".to_string(),
            device_id: format!("device-{}", uuid::Uuid::now_v7()),
            reconcile_interval_secs: DEFAULT_RECONCILE_INTERVAL_SECS,
            features: FeatureConfig::defaults(),
            sensitive_fields: DEFAULT_SENSITIVE_FIELDS
                .iter()
                .map(|field| (*field).to_string())
                .collect(),
            role_overrides: BTreeMap::new(),
            audit_encryption: FieldEncryptionPolicy::audit_default(),
            access_token: None,
            encryption_key: None,
        }
    }
}

impl std::fmt::Debug for SyncSettings {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("SyncSettings")
            .field("supabase_url", &self.supabase_url)
            .field("tenant_id", &self.tenant_id)
            .field("device_id", &self.device_id)
            .field("reconcile_interval_secs", &self.reconcile_interval_secs)
            .field("features", &self.features)
            .field("sensitive_fields", &self.sensitive_fields)
            .field("role_overrides", &self.role_overrides)
            .field("access_token", &self.access_token.as_ref().map(|_| "[REDACTED]"))
            .field(
                "encryption_key",
                &self.encryption_key.as_ref().map(|_| "[REDACTED]"),
            )
            .finish_non_exhaustive()
    }
}

impl SyncSettings {
    /// Load settings from a JSON file, falling back to defaults when missing.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        Self::parse(&raw, path)
    }

    /// Load settings and write them back when the file has no device id yet,
    /// so the generated one is reused on the next run.
    pub fn load_or_init(path: &Path) -> Result<Self> {
        let settings = if path.exists() {
            let raw = std::fs::read_to_string(path)?;
            let settings = Self::parse(&raw, path)?;
            if has_stored_device_id(&raw) {
                return Ok(settings);
            }
            settings
        } else {
            Self::default()
        };

        settings.save_to_path(path)?;
        tracing::info!(
            "Assigned device id {} in {}",
            settings.device_id,
            path.display()
        );
        Ok(settings)
    }

    fn parse(raw: &str, path: &Path) -> Result<Self> {
        let settings = serde_json::from_str::<Self>(raw).map_err(|error| {
            Error::Config(format!(
                "Failed to parse settings at {}: {}",
                path.display(),
                error
            ))
        })?;
        if settings.version != SETTINGS_SCHEMA_VERSION {
            return Err(Error::Config(format!(
                "unsupported settings version {} (expected {})",
                settings.version, SETTINGS_SCHEMA_VERSION
            )));
        }
        Ok(settings.normalized())
    }

    /// Persist settings as pretty JSON, creating parent directories.
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let serialized = serde_json::to_string_pretty(&self.clone().normalized())?;
        std::fs::write(path, serialized)?;
        Ok(())
    }

    /// Overlay values from the process environment.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|name| std::env::var(name).ok())
    }

    /// Overlay values from an arbitrary variable source.
    #[must_use]
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(url) = normalize_text_option(lookup(ENV_SUPABASE_URL)) {
            self.supabase_url = Some(url);
        }
        if let Some(key) = normalize_text_option(lookup(ENV_SUPABASE_ANON_KEY)) {
            self.supabase_anon_key = Some(key);
        }
        if let Some(tenant) = normalize_text_option(lookup(ENV_TENANT_ID)) {
            self.tenant_id = tenant;
        }
        if let Some(device) = normalize_text_option(lookup(ENV_DEVICE_ID)) {
            self.device_id = device;
        }
        if let Some(token) = normalize_text_option(lookup(ENV_ACCESS_TOKEN)) {
            self.access_token = Some(token);
        }
        if let Some(key) = normalize_text_option(lookup(ENV_ENCRYPTION_KEY)) {
            self.encryption_key = Some(key);
        }
        self.normalized()
    }

    /// Check invariants the rest of the crate relies on.
    pub fn validate(&self) -> Result<()> {
        if self.tenant_id.trim().is_empty() {
            return Err(Error::Config("tenant_id must not be empty".to_string()));
        }
        if self.device_id.trim().is_empty() {
            return Err(Error::Config("device_id must not be empty".to_string()));
        }
        if self.reconcile_interval_secs == 0 {
            return Err(Error::Config(
                "reconcile_interval_secs must be greater than zero".to_string(),
            ));
        }
        if let Some(url) = &self.supabase_url {
            if !is_http_url(url) {
                return Err(Error::Config(
                    "supabase_url must include http:// or https://".to_string(),
                ));
            }
        }

        let mut seen = BTreeSet::new();
        for feature in &self.features {
            if feature.name.trim().is_empty() || feature.table.trim().is_empty() {
                return Err(Error::Config(
                    "feature name and table must not be empty".to_string(),
                ));
            }
            if feature.name.contains(':') {
                return Err(Error::Config(format!(
                    "feature name '{}' must not contain ':'",
                    feature.name
                )));
            }
            if feature.remote_timeout_ms == 0 {
                return Err(Error::Config(format!(
                    "feature '{}' needs a non-zero remote timeout",
                    feature.name
                )));
            }
            if !seen.insert(feature.name.as_str()) {
                return Err(Error::Config(format!(
                    "feature '{}' is configured twice",
                    feature.name
                )));
            }
        }
        Ok(())
    }

    /// Whether enough is configured to talk to Supabase.
    pub const fn remote_configured(&self) -> bool {
        self.supabase_url.is_some() && self.supabase_anon_key.is_some()
    }

    pub fn feature(&self, name: &str) -> Option<&FeatureConfig> {
        self.features.iter().find(|feature| feature.name == name)
    }

    pub const fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }

    fn normalized(mut self) -> Self {
        self.supabase_url = normalize_text_option(self.supabase_url)
            .map(|url| url.trim_end_matches('/').to_string());
        self.supabase_anon_key = normalize_text_option(self.supabase_anon_key);
        self.tenant_id = self.tenant_id.trim().to_string();
        self.device_id = self.device_id.trim().to_string();
        self.sensitive_fields = self
            .sensitive_fields
            .into_iter()
            .filter_map(|field| normalize_text_option(Some(field)))
            .map(|field| field.to_ascii_lowercase())
            .collect();
        self.role_overrides = self
            .role_overrides
            .into_iter()
            .map(|(email, role)| (email.trim().to_ascii_lowercase(), role.trim().to_string()))
            .filter(|(email, role)| !email.is_empty() && !role.is_empty())
            .collect();
        self
    }
}

fn has_stored_device_id(raw: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(raw)
        .ok()
        .and_then(|value| {
            value
                .get("device_id")
                .and_then(serde_json::Value::as_str)
                .map(|id| !id.trim().is_empty())
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_are_valid() {
        let settings = SyncSettings::default();
        settings.validate().unwrap();
        assert!(!settings.remote_configured());
        assert!(settings.feature("notes").is_some());
        assert_eq!(settings.reconcile_interval(), Duration::from_secs(30));
    }

    #[test]
    fn overrides_fill_remote_and_secrets() {
        let vars = HashMap::from([
            (ENV_SUPABASE_URL, " https://project.supabase.co/ "),
            (ENV_SUPABASE_ANON_KEY, "anon"),
            (ENV_TENANT_ID, "clinic-7"),
            (ENV_ACCESS_TOKEN, "secret-token"),
        ]);
        let settings = SyncSettings::default()
            .with_overrides(|name| vars.get(name).map(|value| (*value).to_string()));

        assert_eq!(
            settings.supabase_url.as_deref(),
            Some("https://project.supabase.co")
        );
        assert_eq!(settings.tenant_id, "clinic-7");
        assert!(settings.remote_configured());
        let debug = format!("{settings:?}");
        assert!(!debug.contains("secret-token"));
    }

    #[test]
    fn validate_rejects_duplicate_features() {
        let mut settings = SyncSettings::default();
        settings.features.push(FeatureConfig::notes());
        let error = settings.validate().unwrap_err();
        assert!(error.to_string().contains("configured twice"));
    }

    #[test]
    fn validate_rejects_non_http_url() {
        let settings = SyncSettings {
            supabase_url: Some("project.supabase.co".to_string()),
            ..SyncSettings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn roundtrip_skips_secrets() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut settings = SyncSettings {
            access_token: Some("token".to_string()),
            encryption_key: Some("key".to_string()),
            ..SyncSettings::default()
        };
        settings
            .role_overrides
            .insert(" Admin@Clinic.example ".to_string(), "super_user".to_string());

        settings.save_to_path(&path).unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(!raw.contains("\"token\""));

        let loaded = SyncSettings::load_from_path(&path).unwrap();
        assert_eq!(loaded.access_token, None);
        assert_eq!(loaded.device_id, settings.device_id);
        assert_eq!(
            loaded.role_overrides.get("admin@clinic.example").map(String::as_str),
            Some("super_user")
        );
    }

    #[test]
    fn load_rejects_unknown_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "version": 1, "surprise": true }"#).unwrap();
        let error = SyncSettings::load_from_path(&path).unwrap_err();
        assert!(error.to_string().contains("unknown field"));
    }

    #[test]
    fn generated_device_id_is_kept_across_loads() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("fresh").join("config.json");
        let first = SyncSettings::load_or_init(&missing).unwrap();
        let second = SyncSettings::load_or_init(&missing).unwrap();
        assert!(first.device_id.starts_with("device-"));
        assert_eq!(first.device_id, second.device_id);

        let partial = dir.path().join("partial.json");
        std::fs::write(&partial, r#"{ "version": 1, "tenant_id": "clinic-2" }"#).unwrap();
        let first = SyncSettings::load_or_init(&partial).unwrap();
        let second = SyncSettings::load_or_init(&partial).unwrap();
        assert_eq!(first.device_id, second.device_id);
        assert_eq!(second.tenant_id, "clinic-2");
    }
}
