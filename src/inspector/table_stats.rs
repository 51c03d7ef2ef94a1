//! Per-table sizes/row counts, with a tri-state `dbstat` availability flag
//! (stored as an `AtomicU8`) and a proportional-estimation fallback when
//! `dbstat` (a SQLite-only virtual table, compiled in only on some builds)
//! is absent.

use std::sync::atomic::{AtomicU8, Ordering};

use serde::Serialize;

use crate::counters::OpKind;
use crate::error::Result;
use crate::manager::{Backend, DatabaseManager};

const UNKNOWN: u8 = 0;
const AVAILABLE: u8 = 1;
const UNAVAILABLE: u8 = 2;

static DBSTAT_AVAILABILITY: AtomicU8 = AtomicU8::new(UNKNOWN);

#[derive(Debug, Clone, Serialize)]
pub struct TableStats {
    pub name: String,
    pub row_count: i64,
    pub size_bytes: i64,
    /// `true` when `size_bytes` came from `dbstat`; `false` when estimated
    /// proportionally from the database file size.
    pub size_is_exact: bool,
}

const TABLES: &[&str] = &[
    "detections",
    "labels",
    "models",
    "audio_sources",
    "weather",
    "note_reviews",
    "note_locks",
    "note_comments",
    "daily_events",
    "image_cache",
    "dynamic_thresholds",
    "threshold_events",
    "notification_history",
];

pub async fn table_stats(manager: &DatabaseManager) -> Result<Vec<TableStats>> {
    match manager.backend() {
        Backend::Sqlite(_) => sqlite_table_stats(manager).await,
        Backend::MySql(_) => mysql_table_stats(manager).await,
    }
}

async fn sqlite_table_stats(manager: &DatabaseManager) -> Result<Vec<TableStats>> {
    let row_counts = row_counts(manager).await?;
    let total_rows: i64 = row_counts.iter().map(|(_, n)| n).sum::<i64>().max(1);

    if DBSTAT_AVAILABILITY.load(Ordering::Acquire) != UNAVAILABLE {
        match dbstat_sizes(manager).await {
            Ok(sizes) => {
                DBSTAT_AVAILABILITY.store(AVAILABLE, Ordering::Release);
                return Ok(row_counts
                    .into_iter()
                    .map(|(name, row_count)| {
                        let size_bytes = sizes.iter().find(|(n, _)| n == &name).map(|(_, s)| *s).unwrap_or(0);
                        TableStats {
                            name,
                            row_count,
                            size_bytes,
                            size_is_exact: true,
                        }
                    })
                    .collect());
            }
            Err(_) => DBSTAT_AVAILABILITY.store(UNAVAILABLE, Ordering::Release),
        }
    }

    // Fallback: distribute the whole database file size proportionally to
    // each table's share of total row count.
    let file_size = manager
        .sqlite_path()
        .and_then(|p| std::fs::metadata(p).ok())
        .map(|m| m.len() as i64)
        .unwrap_or(0);
    Ok(row_counts
        .into_iter()
        .map(|(name, row_count)| TableStats {
            name,
            row_count,
            size_bytes: file_size * row_count / total_rows,
            size_is_exact: false,
        })
        .collect())
}

async fn row_counts(manager: &DatabaseManager) -> Result<Vec<(String, i64)>> {
    let mut out = Vec::with_capacity(TABLES.len());
    for table in TABLES {
        let table = (*table).to_string();
        let count: i64 = manager
            .with_sqlite(OpKind::Read, {
                let table = table.clone();
                move |conn| conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
            })
            .await?;
        out.push((table, count));
    }
    Ok(out)
}

async fn dbstat_sizes(manager: &DatabaseManager) -> Result<Vec<(String, i64)>> {
    manager
        .with_sqlite(OpKind::Read, |conn| {
            let mut stmt = conn.prepare("SELECT name, SUM(pgsize) FROM dbstat GROUP BY name")?;
            let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })
        .await
}

async fn mysql_table_stats(manager: &DatabaseManager) -> Result<Vec<TableStats>> {
    use mysql_async::prelude::*;
    let mut conn = manager.mysql_conn().await?;
    let mut out = Vec::with_capacity(TABLES.len());
    for table in TABLES {
        let row: Option<(i64, i64)> = conn
            .exec_first(
                "SELECT table_rows, data_length + index_length
                 FROM information_schema.tables WHERE table_schema = DATABASE() AND table_name = ?",
                (table,),
            )
            .await?;
        let (row_count, size_bytes) = row.unwrap_or((0, 0));
        out.push(TableStats {
            name: (*table).to_string(),
            row_count,
            size_bytes,
            size_is_exact: true,
        });
    }
    Ok(out)
}
