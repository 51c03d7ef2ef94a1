use std::sync::Arc;

use crate::counters::OpKind;
use crate::error::Result;
use crate::manager::{Backend, DatabaseManager};
use crate::models::NoteReview;

pub struct ReviewRepository {
    manager: Arc<DatabaseManager>,
}

impl ReviewRepository {
    pub fn new(manager: Arc<DatabaseManager>) -> Self {
        Self { manager }
    }

    pub async fn upsert(&self, detection_id: i64, verdict: &str, created_at: i64) -> Result<()> {
        match self.manager.backend() {
            Backend::Sqlite(_) => {
                let verdict = verdict.to_string();
                self.manager
                    .with_sqlite(OpKind::Write, move |conn| {
                        conn.execute(
                            "INSERT INTO note_reviews (detection_id, verdict, created_at) VALUES (?1, ?2, ?3)
                             ON CONFLICT(detection_id) DO UPDATE SET verdict = ?2, created_at = ?3",
                            rusqlite::params![detection_id, verdict, created_at],
                        )?;
                        Ok(())
                    })
                    .await
            }
            Backend::MySql(_) => {
                use mysql_async::prelude::*;
                let mut conn = self.manager.mysql_conn().await?;
                conn.exec_drop(
                    "INSERT INTO note_reviews (detection_id, verdict, created_at) VALUES (?, ?, ?)
                     ON DUPLICATE KEY UPDATE verdict = VALUES(verdict), created_at = VALUES(created_at)",
                    (detection_id, verdict, created_at),
                )
                .await?;
                Ok(())
            }
        }
    }

    pub async fn by_detection(&self, detection_id: i64) -> Result<Option<NoteReview>> {
        match self.manager.backend() {
            Backend::Sqlite(_) => {
                self.manager
                    .with_sqlite(OpKind::Read, move |conn| {
                        let mut stmt = conn.prepare(
                            "SELECT detection_id, verdict, created_at FROM note_reviews WHERE detection_id = ?1",
                        )?;
                        let mut rows = stmt.query(rusqlite::params![detection_id])?;
                        if let Some(row) = rows.next()? {
                            Ok(Some(NoteReview {
                                detection_id: row.get(0)?,
                                verdict: row.get(1)?,
                                created_at: row.get(2)?,
                            }))
                        } else {
                            Ok(None)
                        }
                    })
                    .await
            }
            Backend::MySql(_) => {
                use mysql_async::prelude::*;
                let mut conn = self.manager.mysql_conn().await?;
                let row: Option<(i64, String, i64)> = conn
                    .exec_first(
                        "SELECT detection_id, verdict, created_at FROM note_reviews WHERE detection_id = ?",
                        (detection_id,),
                    )
                    .await?;
                Ok(row.map(|(detection_id, verdict, created_at)| NoteReview {
                    detection_id,
                    verdict,
                    created_at,
                }))
            }
        }
    }
}
