//! Supabase PostgREST client implementing `RemoteStore`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{RemoteError, RemoteResult, RemoteRow, RemoteStore};
use crate::config::SyncSettings;
use crate::util::{compact_text, is_http_url, normalize_text_option};

/// PostgREST code for an insufficient-privilege (row-level security) rejection.
const PG_INSUFFICIENT_PRIVILEGE: &str = "42501";

#[derive(Clone)]
pub struct SupabaseStore {
    rest_url: String,
    anon_key: String,
    access_token: Option<String>,
    tenant_id: String,
    client: Client,
}

impl std::fmt::Debug for SupabaseStore {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("SupabaseStore")
            .field("rest_url", &self.rest_url)
            .field("anon_key", &"[REDACTED]")
            .field(
                "access_token",
                &self.access_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("tenant_id", &self.tenant_id)
            .finish_non_exhaustive()
    }
}

impl SupabaseStore {
    pub fn new(
        url: impl AsRef<str>,
        anon_key: impl Into<String>,
        tenant_id: impl Into<String>,
    ) -> RemoteResult<Self> {
        let rest_url = normalize_rest_url(url.as_ref())?;
        let anon_key = anon_key.into().trim().to_string();
        if anon_key.is_empty() {
            return Err(RemoteError::InvalidConfiguration(
                "Supabase anon key must not be empty".to_string(),
            ));
        }
        let tenant_id = tenant_id.into().trim().to_string();
        if tenant_id.is_empty() {
            return Err(RemoteError::InvalidConfiguration(
                "tenant id must not be empty".to_string(),
            ));
        }

        Ok(Self {
            rest_url,
            anon_key,
            access_token: None,
            tenant_id,
            client: Client::builder().build()?,
        })
    }

    /// Build a store from settings; `None` when Supabase is not configured.
    pub fn from_settings(settings: &SyncSettings) -> RemoteResult<Option<Self>> {
        let (Some(url), Some(anon_key)) = (
            normalize_text_option(settings.supabase_url.clone()),
            normalize_text_option(settings.supabase_anon_key.clone()),
        ) else {
            return Ok(None);
        };

        let store = Self::new(url, anon_key, settings.tenant_id.clone())?;
        Ok(Some(match settings.access_token.clone() {
            Some(token) => store.with_access_token(token),
            None => store,
        }))
    }

    /// Use a signed-in user's token instead of the anon key for RLS.
    #[must_use]
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = normalize_text_option(Some(token.into()));
        self
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    fn table_url(&self, table: &str) -> RemoteResult<String> {
        validate_identifier(table, "table")?;
        Ok(format!("{}/{}", self.rest_url, table))
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        let bearer = self.access_token.as_deref().unwrap_or(&self.anon_key);
        request
            .header("apikey", &self.anon_key)
            .bearer_auth(bearer)
            .header("Accept", "application/json")
    }

    fn tenant_filter(&self) -> (&'static str, String) {
        ("tenant_id", format!("eq.{}", self.tenant_id))
    }

    async fn select(&self, request: RequestBuilder) -> RemoteResult<Vec<RemoteRow>> {
        let response = check_response(self.authed(request).send().await?).await?;
        let rows = response
            .json::<Vec<WireRow>>()
            .await
            .map_err(|error| RemoteError::InvalidPayload(error.to_string()))?;
        Ok(rows.into_iter().map(RemoteRow::from).collect())
    }
}

#[async_trait]
impl RemoteStore for SupabaseStore {
    async fn fetch(&self, table: &str, key: &str) -> RemoteResult<Option<RemoteRow>> {
        let request = self.client.get(self.table_url(table)?).query(&[
            self.tenant_filter(),
            ("key", format!("eq.{key}")),
            ("select", "*".to_string()),
            ("limit", "1".to_string()),
        ]);
        Ok(self.select(request).await?.into_iter().next())
    }

    async fn find_by_field(
        &self,
        table: &str,
        field: &str,
        value: &str,
    ) -> RemoteResult<Vec<RemoteRow>> {
        validate_identifier(field, "field")?;
        let filter = format!("value->>{field}");
        let request = self.client.get(self.table_url(table)?).query(&[
            self.tenant_filter(),
            (filter.as_str(), format!("eq.{value}")),
            ("select", "*".to_string()),
        ]);
        self.select(request).await
    }

    async fn upsert(&self, table: &str, row: &RemoteRow) -> RemoteResult<()> {
        let body = [WireRow::scoped(row, &self.tenant_id)];
        let request = self
            .client
            .post(self.table_url(table)?)
            .query(&[("on_conflict", "tenant_id,key")])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&body);
        check_response(self.authed(request).send().await?).await?;
        Ok(())
    }

    async fn delete(&self, table: &str, key: &str) -> RemoteResult<()> {
        let request = self
            .client
            .delete(self.table_url(table)?)
            .query(&[self.tenant_filter(), ("key", format!("eq.{key}"))]);
        check_response(self.authed(request).send().await?).await?;
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct WireRow {
    tenant_id: String,
    key: String,
    value: Value,
    last_modified: DateTime<Utc>,
    #[serde(default)]
    origin_device_id: Option<String>,
}

impl WireRow {
    fn scoped(row: &RemoteRow, tenant_id: &str) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            key: row.key.clone(),
            value: row.value.clone(),
            last_modified: row.last_modified,
            origin_device_id: Some(row.origin_device_id.clone()),
        }
    }
}

impl From<WireRow> for RemoteRow {
    fn from(row: WireRow) -> Self {
        Self {
            key: row.key,
            value: row.value,
            last_modified: row.last_modified,
            origin_device_id: row.origin_device_id.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct PostgrestErrorBody {
    code: Option<String>,
    message: Option<String>,
    error: Option<String>,
}

async fn check_response(response: Response) -> RemoteResult<Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(classify_error(status, &body))
}

fn classify_error(status: StatusCode, body: &str) -> RemoteError {
    let parsed = serde_json::from_str::<PostgrestErrorBody>(body).ok();
    let code = parsed.as_ref().and_then(|payload| payload.code.clone());
    let message = parsed
        .and_then(|payload| payload.message.or(payload.error))
        .map(|message| compact_text(&message))
        .filter(|message| !message.is_empty())
        .unwrap_or_else(|| {
            let trimmed = compact_text(body);
            if trimmed.is_empty() {
                format!("HTTP {}", status.as_u16())
            } else {
                trimmed
            }
        });

    if status == StatusCode::UNAUTHORIZED
        || status == StatusCode::FORBIDDEN
        || code.as_deref() == Some(PG_INSUFFICIENT_PRIVILEGE)
    {
        return RemoteError::PermissionDenied(message);
    }
    if status.is_server_error() {
        return RemoteError::Unavailable(format!("{message} ({})", status.as_u16()));
    }
    RemoteError::api(status.as_u16(), message)
}

fn normalize_rest_url(url: &str) -> RemoteResult<String> {
    let trimmed = url.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(RemoteError::InvalidConfiguration(
            "Supabase URL must not be empty".to_string(),
        ));
    }
    if !is_http_url(trimmed) {
        return Err(RemoteError::InvalidConfiguration(
            "Supabase URL must include http:// or https://".to_string(),
        ));
    }
    if trimmed.ends_with("/rest/v1") {
        Ok(trimmed.to_string())
    } else {
        Ok(format!("{trimmed}/rest/v1"))
    }
}

fn validate_identifier(value: &str, kind: &str) -> RemoteResult<()> {
    let valid = !value.is_empty()
        && value
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '_');
    if valid {
        Ok(())
    } else {
        Err(RemoteError::InvalidConfiguration(format!(
            "invalid {kind} name '{value}'"
        )))
    }
}
