//! Dirty-id tracking persisted as a SQL table rather than an in-memory set:
//! survives restarts, and the migration worker can resume reconciliation
//! across process lifetimes.

use std::sync::Arc;

use crate::counters::OpKind;
use crate::error::Result;
use crate::manager::{Backend, DatabaseManager};

pub struct DirtyIdTracker {
    manager: Arc<DatabaseManager>,
}

impl DirtyIdTracker {
    pub fn new(manager: Arc<DatabaseManager>) -> Self {
        Self { manager }
    }

    pub async fn mark(&self, legacy_id: i64, reason: &str) -> Result<()> {
        let reason = reason.to_string();
        match self.manager.backend() {
            Backend::Sqlite(_) => {
                self.manager
                    .with_sqlite(OpKind::Write, move |conn| {
                        conn.execute(
                            "INSERT INTO dirty_ids (legacy_id, reason, created_at) VALUES (?1, ?2, ?3)
                             ON CONFLICT(legacy_id) DO UPDATE SET reason = ?2, created_at = ?3",
                            rusqlite::params![legacy_id, reason, now_unix()],
                        )?;
                        Ok(())
                    })
                    .await
            }
            Backend::MySql(_) => {
                use mysql_async::prelude::*;
                let mut conn = self.manager.mysql_conn().await?;
                conn.exec_drop(
                    "INSERT INTO dirty_ids (legacy_id, reason, created_at) VALUES (?, ?, ?)
                     ON DUPLICATE KEY UPDATE reason = VALUES(reason), created_at = VALUES(created_at)",
                    (legacy_id, reason, now_unix()),
                )
                .await?;
                Ok(())
            }
        }
    }

    pub async fn clear(&self, legacy_id: i64) -> Result<()> {
        match self.manager.backend() {
            Backend::Sqlite(_) => {
                self.manager
                    .with_sqlite(OpKind::Write, move |conn| {
                        conn.execute("DELETE FROM dirty_ids WHERE legacy_id = ?1", rusqlite::params![legacy_id])?;
                        Ok(())
                    })
                    .await
            }
            Backend::MySql(_) => {
                use mysql_async::prelude::*;
                let mut conn = self.manager.mysql_conn().await?;
                conn.exec_drop("DELETE FROM dirty_ids WHERE legacy_id = ?", (legacy_id,)).await?;
                Ok(())
            }
        }
    }

    pub async fn count(&self) -> Result<i64> {
        match self.manager.backend() {
            Backend::Sqlite(_) => {
                self.manager
                    .with_sqlite(OpKind::Read, |conn| {
                        conn.query_row("SELECT COUNT(*) FROM dirty_ids", [], |row| row.get(0))
                    })
                    .await
            }
            Backend::MySql(_) => {
                use mysql_async::prelude::*;
                let mut conn = self.manager.mysql_conn().await?;
                Ok(conn.query_first("SELECT COUNT(*) FROM dirty_ids").await?.unwrap_or(0))
            }
        }
    }

    pub async fn all_ids(&self) -> Result<Vec<i64>> {
        match self.manager.backend() {
            Backend::Sqlite(_) => {
                self.manager
                    .with_sqlite(OpKind::Read, |conn| {
                        let mut stmt = conn.prepare("SELECT legacy_id FROM dirty_ids ORDER BY legacy_id ASC")?;
                        let rows = stmt.query_map([], |row| row.get(0))?;
                        rows.collect::<rusqlite::Result<Vec<_>>>()
                    })
                    .await
            }
            Backend::MySql(_) => {
                use mysql_async::prelude::*;
                let mut conn = self.manager.mysql_conn().await?;
                Ok(conn.query("SELECT legacy_id FROM dirty_ids ORDER BY legacy_id ASC").await?)
            }
        }
    }
}

/// Timestamps here are for bookkeeping only, not correctness-critical
/// ordering, so a wall-clock read is acceptable (unlike cache/migration
/// watermarks, which use monotonic counters).
fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EngineConfig, StoreConfig};

    async fn test_manager() -> Arc<DatabaseManager> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dirty.db");
        std::mem::forget(dir);
        let config = StoreConfig {
            engine: EngineConfig::Sqlite {
                path: path.to_str().unwrap().to_string(),
                busy_timeout_ms: 1000,
            },
            ..Default::default()
        };
        Arc::new(DatabaseManager::initialize(&config).await.unwrap())
    }

    #[tokio::test]
    async fn mark_then_clear_round_trips_count() {
        let manager = test_manager().await;
        let tracker = DirtyIdTracker::new(manager);
        tracker.mark(42, "copy failed").await.unwrap();
        assert_eq!(tracker.count().await.unwrap(), 1);
        tracker.clear(42).await.unwrap();
        assert_eq!(tracker.count().await.unwrap(), 0);
    }
}
