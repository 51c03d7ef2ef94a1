use std::sync::Arc;

use crate::counters::OpKind;
use crate::error::Result;
use crate::manager::{Backend, DatabaseManager};

/// Presence of a row in `note_locks` means the detection is locked; there is
/// no boolean field to flip. Locking/unlocking are insert/delete.
pub struct LockRepository {
    manager: Arc<DatabaseManager>,
}

impl LockRepository {
    pub fn new(manager: Arc<DatabaseManager>) -> Self {
        Self { manager }
    }

    pub async fn lock(&self, detection_id: i64, locked_at: i64) -> Result<()> {
        match self.manager.backend() {
            Backend::Sqlite(_) => {
                self.manager
                    .with_sqlite(OpKind::Write, move |conn| {
                        conn.execute(
                            "INSERT INTO note_locks (detection_id, locked_at) VALUES (?1, ?2)
                             ON CONFLICT(detection_id) DO NOTHING",
                            rusqlite::params![detection_id, locked_at],
                        )?;
                        Ok(())
                    })
                    .await
            }
            Backend::MySql(_) => {
                use mysql_async::prelude::*;
                let mut conn = self.manager.mysql_conn().await?;
                conn.exec_drop(
                    "INSERT IGNORE INTO note_locks (detection_id, locked_at) VALUES (?, ?)",
                    (detection_id, locked_at),
                )
                .await?;
                Ok(())
            }
        }
    }

    pub async fn unlock(&self, detection_id: i64) -> Result<()> {
        match self.manager.backend() {
            Backend::Sqlite(_) => {
                self.manager
                    .with_sqlite(OpKind::Write, move |conn| {
                        conn.execute(
                            "DELETE FROM note_locks WHERE detection_id = ?1",
                            rusqlite::params![detection_id],
                        )?;
                        Ok(())
                    })
                    .await
            }
            Backend::MySql(_) => {
                use mysql_async::prelude::*;
                let mut conn = self.manager.mysql_conn().await?;
                conn.exec_drop(
                    "DELETE FROM note_locks WHERE detection_id = ?",
                    (detection_id,),
                )
                .await?;
                Ok(())
            }
        }
    }

    pub async fn is_locked(&self, detection_id: i64) -> Result<bool> {
        match self.manager.backend() {
            Backend::Sqlite(_) => {
                self.manager
                    .with_sqlite(OpKind::Read, move |conn| {
                        let count: i64 = conn.query_row(
                            "SELECT COUNT(*) FROM note_locks WHERE detection_id = ?1",
                            rusqlite::params![detection_id],
                            |row| row.get(0),
                        )?;
                        Ok(count > 0)
                    })
                    .await
            }
            Backend::MySql(_) => {
                use mysql_async::prelude::*;
                let mut conn = self.manager.mysql_conn().await?;
                let count: i64 = conn
                    .exec_first(
                        "SELECT COUNT(*) FROM note_locks WHERE detection_id = ?",
                        (detection_id,),
                    )
                    .await?
                    .unwrap_or(0);
                Ok(count > 0)
            }
        }
    }
}
