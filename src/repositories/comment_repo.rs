use std::sync::Arc;

use crate::counters::OpKind;
use crate::error::Result;
use crate::manager::{Backend, DatabaseManager};
use crate::models::NoteComment;

pub struct CommentRepository {
    manager: Arc<DatabaseManager>,
}

impl CommentRepository {
    pub fn new(manager: Arc<DatabaseManager>) -> Self {
        Self { manager }
    }

    pub async fn add(&self, detection_id: i64, body: &str, created_at: i64) -> Result<NoteComment> {
        match self.manager.backend() {
            Backend::Sqlite(_) => {
                let body = body.to_string();
                self.manager
                    .with_sqlite(OpKind::Write, move |conn| {
                        conn.execute(
                            "INSERT INTO note_comments (detection_id, body, created_at) VALUES (?1, ?2, ?3)",
                            rusqlite::params![detection_id, body, created_at],
                        )?;
                        let id = conn.last_insert_rowid();
                        Ok(NoteComment {
                            id,
                            detection_id,
                            body,
                            created_at,
                        })
                    })
                    .await
            }
            Backend::MySql(_) => {
                use mysql_async::prelude::*;
                let mut conn = self.manager.mysql_conn().await?;
                conn.exec_drop(
                    "INSERT INTO note_comments (detection_id, body, created_at) VALUES (?, ?, ?)",
                    (detection_id, body, created_at),
                )
                .await?;
                let id = conn.last_insert_id().unwrap_or_default() as i64;
                Ok(NoteComment {
                    id,
                    detection_id,
                    body: body.to_string(),
                    created_at,
                })
            }
        }
    }

    pub async fn by_detection(&self, detection_id: i64) -> Result<Vec<NoteComment>> {
        match self.manager.backend() {
            Backend::Sqlite(_) => {
                self.manager
                    .with_sqlite(OpKind::Read, move |conn| {
                        let mut stmt = conn.prepare(
                            "SELECT id, detection_id, body, created_at FROM note_comments
                             WHERE detection_id = ?1 ORDER BY created_at ASC",
                        )?;
                        let rows = stmt.query_map(rusqlite::params![detection_id], |row| {
                            Ok(NoteComment {
                                id: row.get(0)?,
                                detection_id: row.get(1)?,
                                body: row.get(2)?,
                                created_at: row.get(3)?,
                            })
                        })?;
                        rows.collect::<rusqlite::Result<Vec<_>>>()
                    })
                    .await
            }
            Backend::MySql(_) => {
                use mysql_async::prelude::*;
                let mut conn = self.manager.mysql_conn().await?;
                let rows: Vec<(i64, i64, String, i64)> = conn
                    .exec(
                        "SELECT id, detection_id, body, created_at FROM note_comments
                         WHERE detection_id = ? ORDER BY created_at ASC",
                        (detection_id,),
                    )
                    .await?;
                Ok(rows
                    .into_iter()
                    .map(|(id, detection_id, body, created_at)| NoteComment {
                        id,
                        detection_id,
                        body,
                        created_at,
                    })
                    .collect())
            }
        }
    }

    pub async fn delete(&self, id: i64) -> Result<()> {
        match self.manager.backend() {
            Backend::Sqlite(_) => {
                self.manager
                    .with_sqlite(OpKind::Write, move |conn| {
                        conn.execute("DELETE FROM note_comments WHERE id = ?1", rusqlite::params![id])?;
                        Ok(())
                    })
                    .await
            }
            Backend::MySql(_) => {
                use mysql_async::prelude::*;
                let mut conn = self.manager.mysql_conn().await?;
                conn.exec_drop("DELETE FROM note_comments WHERE id = ?", (id,)).await?;
                Ok(())
            }
        }
    }
}
