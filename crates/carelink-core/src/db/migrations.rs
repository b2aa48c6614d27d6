//! Database migrations

use crate::error::Result;
use libsql::Connection;

/// Current schema version
const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations
pub async fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn).await?;

    if version < 1 {
        apply(conn, 1, &V1_LOCAL_CACHE).await?;
    }
    if version < 2 {
        apply(conn, 2, &V2_CONFLICT_HISTORY).await?;
    }

    Ok(())
}

/// Version 1: key-value cache with JSON string values
const V1_LOCAL_CACHE: [&str; 4] = [
    "CREATE TABLE IF NOT EXISTS schema_version (
        version INTEGER PRIMARY KEY
    )",
    "CREATE TABLE IF NOT EXISTS local_cache (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL,
        updated_at INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_local_cache_updated ON local_cache(updated_at DESC)",
    "INSERT INTO schema_version (version) VALUES (1)",
];

/// Version 2: append-only conflict resolution history
const V2_CONFLICT_HISTORY: [&str; 4] = [
    "CREATE TABLE IF NOT EXISTS conflict_resolutions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        conflict_id TEXT NOT NULL,
        table_name TEXT NOT NULL,
        record_id TEXT NOT NULL,
        field_name TEXT NOT NULL,
        strategy TEXT NOT NULL,
        resolved_value TEXT NOT NULL,
        resolved_by TEXT NOT NULL,
        resolved_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_conflict_resolutions_record
        ON conflict_resolutions(table_name, record_id)",
    "CREATE INDEX IF NOT EXISTS idx_conflict_resolutions_resolved_at
        ON conflict_resolutions(resolved_at DESC)",
    "INSERT INTO schema_version (version) VALUES (2)",
];

/// Get the current schema version
async fn get_version(conn: &Connection) -> Result<i32> {
    let mut rows = conn
        .query(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
            (),
        )
        .await?;

    let exists: bool = if let Some(row) = rows.next().await? {
        row.get::<i32>(0)? != 0
    } else {
        false
    };

    if !exists {
        return Ok(0);
    }

    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM schema_version", ())
        .await?;

    let version: i32 = if let Some(row) = rows.next().await? {
        row.get(0)?
    } else {
        0
    };

    Ok(version)
}

/// Run one migration's statements inside a transaction
async fn apply(conn: &Connection, version: i32, statements: &[&str]) -> Result<()> {
    // libsql doesn't have execute_batch, so we run each statement separately
    conn.execute("BEGIN TRANSACTION", ()).await?;

    for stmt in statements {
        if let Err(e) = conn.execute(stmt, ()).await {
            conn.execute("ROLLBACK", ()).await.ok();
            return Err(e.into());
        }
    }

    if let Err(e) = conn.execute("COMMIT", ()).await {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(e.into());
    }

    tracing::info!("Migrated local cache database to version {version}/{CURRENT_VERSION}");
    Ok(())
}
