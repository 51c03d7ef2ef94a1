//! SQLite engine details via `PRAGMA`.

use serde::Serialize;

use crate::counters::OpKind;
use crate::error::{Result, StoreError};
use crate::manager::DatabaseManager;

#[derive(Debug, Clone, Serialize)]
pub struct SqliteDetails {
    pub journal_mode: String,
    pub page_size: i64,
    pub freelist_count: i64,
    pub cache_size: i64,
    pub wal_file_size_bytes: Option<i64>,
    /// Pages copied to the database file by the last passive checkpoint.
    pub wal_checkpoint_pages: i64,
    /// Cached result of the last background `PRAGMA quick_check` run, not
    /// run inline here.
    pub last_integrity_check_ok: Option<bool>,
    pub last_vacuum_at: Option<i64>,
}

pub async fn collect(manager: &DatabaseManager) -> Result<SqliteDetails> {
    let journal_mode: String = manager
        .with_sqlite(OpKind::Read, |conn| {
            conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))
        })
        .await?;
    let page_size: i64 = manager
        .with_sqlite(OpKind::Read, |conn| conn.query_row("PRAGMA page_size", [], |row| row.get(0)))
        .await?;
    let freelist_count: i64 = manager
        .with_sqlite(OpKind::Read, |conn| {
            conn.query_row("PRAGMA freelist_count", [], |row| row.get(0))
        })
        .await?;
    let cache_size: i64 = manager
        .with_sqlite(OpKind::Read, |conn| conn.query_row("PRAGMA cache_size", [], |row| row.get(0)))
        .await?;

    let wal_file_size_bytes = manager.sqlite_path().map(|path| wal_size(path));

    let wal_checkpoint_pages: i64 = manager
        .with_sqlite(OpKind::Write, |conn| {
            conn.query_row("PRAGMA wal_checkpoint(PASSIVE)", [], |row| row.get(2))
        })
        .await?;

    let last_integrity_check_ok = manager
        .metadata_get("sqlite_last_integrity_check_ok")
        .await?
        .map(|v| v == "true");
    let last_vacuum_at = manager
        .metadata_get("sqlite_last_vacuum_at")
        .await?
        .and_then(|v| v.parse().ok());

    Ok(SqliteDetails {
        journal_mode,
        page_size,
        freelist_count,
        cache_size,
        wal_file_size_bytes,
        wal_checkpoint_pages,
        last_integrity_check_ok,
        last_vacuum_at,
    })
}

fn wal_size(db_path: &str) -> i64 {
    std::fs::metadata(format!("{db_path}-wal"))
        .map(|m| m.len() as i64)
        .unwrap_or(0)
}

/// Runs `PRAGMA quick_check` and records the result into `_metadata` for
/// `collect` to read back. Intended to be called from a daily background
/// monitor task, never inline on the read path.
pub async fn run_integrity_check(manager: &DatabaseManager) -> Result<bool> {
    let result: String = manager
        .with_sqlite(OpKind::Read, |conn| {
            conn.query_row("PRAGMA quick_check", [], |row| row.get(0))
        })
        .await?;
    let ok = result == "ok";
    manager
        .metadata_set("sqlite_last_integrity_check_ok", if ok { "true" } else { "false" })
        .await
        .map_err(|e| StoreError::Integrity(format!("failed to persist integrity check result: {e}")))?;
    Ok(ok)
}
