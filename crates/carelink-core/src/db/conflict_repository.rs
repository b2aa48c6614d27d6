//! Conflict resolution history repository

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use tokio::sync::Mutex;

use crate::conflict::ConflictLog;
use crate::error::{Error, Result};
use crate::models::ConflictResolution;

use super::Database;

/// Fixed-width RFC 3339 so text order matches time order.
fn format_resolved_at(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

const SELECT_COLUMNS: &str = "conflict_id, table_name, record_id, field_name, strategy, \
     resolved_value, resolved_by, resolved_at";

/// libSQL implementation of `ConflictLog`
#[derive(Clone)]
pub struct LibSqlConflictLog {
    db: Arc<Mutex<Database>>,
}

impl LibSqlConflictLog {
    pub const fn new(db: Arc<Mutex<Database>>) -> Self {
        Self { db }
    }

    fn row_to_resolution(row: &libsql::Row) -> Result<ConflictResolution> {
        let conflict_id: String = row.get(0)?;
        let resolved_value: String = row.get(5)?;
        let resolved_by: String = row.get(6)?;
        let resolved_at: String = row.get(7)?;

        Ok(ConflictResolution {
            conflict_id: conflict_id
                .parse()
                .map_err(|error| Error::Database(format!("invalid conflict id: {error}")))?,
            table_name: row.get(1)?,
            record_id: row.get(2)?,
            field_name: row.get(3)?,
            strategy_name: row.get(4)?,
            resolved_value: serde_json::from_str(&resolved_value)?,
            resolved_by: resolved_by.parse().map_err(Error::Database)?,
            resolved_at: DateTime::parse_from_rfc3339(&resolved_at)
                .map_err(|error| {
                    Error::Database(format!("invalid resolution timestamp {resolved_at}: {error}"))
                })?
                .with_timezone(&Utc),
        })
    }

    async fn collect(mut rows: libsql::Rows) -> Result<Vec<ConflictResolution>> {
        let mut resolutions = Vec::new();
        while let Some(row) = rows.next().await? {
            resolutions.push(Self::row_to_resolution(&row)?);
        }
        Ok(resolutions)
    }
}

#[async_trait]
impl ConflictLog for LibSqlConflictLog {
    async fn append(&self, resolution: &ConflictResolution) -> Result<()> {
        let resolved_value = serde_json::to_string(&resolution.resolved_value)?;
        let db = self.db.lock().await;
        db.connection()
            .execute(
                "INSERT INTO conflict_resolutions
                 (conflict_id, table_name, record_id, field_name, strategy,
                  resolved_value, resolved_by, resolved_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                libsql::params![
                    resolution.conflict_id.to_string(),
                    resolution.table_name.as_str(),
                    resolution.record_id.as_str(),
                    resolution.field_name.as_str(),
                    resolution.strategy_name.as_str(),
                    resolved_value,
                    resolution.resolved_by.as_str(),
                    format_resolved_at(resolution.resolved_at),
                ],
            )
            .await?;
        Ok(())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<ConflictResolution>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let db = self.db.lock().await;
        let rows = db
            .connection()
            .query(
                &format!(
                    "SELECT {SELECT_COLUMNS} FROM conflict_resolutions
                     ORDER BY resolved_at DESC, id DESC LIMIT ?"
                ),
                [limit],
            )
            .await?;
        Self::collect(rows).await
    }

    async fn for_record(
        &self,
        table_name: &str,
        record_id: &str,
    ) -> Result<Vec<ConflictResolution>> {
        let db = self.db.lock().await;
        let rows = db
            .connection()
            .query(
                &format!(
                    "SELECT {SELECT_COLUMNS} FROM conflict_resolutions
                     WHERE table_name = ? AND record_id = ?
                     ORDER BY resolved_at ASC, id ASC"
                ),
                [table_name, record_id],
            )
            .await?;
        Self::collect(rows).await
    }
}
