use std::sync::Arc;

use crate::counters::OpKind;
use crate::error::{Result, StoreError};
use crate::manager::{Backend, DatabaseManager};
use crate::models::AudioSource;

/// Interns deduplicated audio source identifiers (e.g. `rtsp_camera1`).
pub struct SourceRepository {
    manager: Arc<DatabaseManager>,
}

impl SourceRepository {
    pub fn new(manager: Arc<DatabaseManager>) -> Self {
        Self { manager }
    }

    pub async fn get_or_create(&self, safe_string: &str) -> Result<AudioSource> {
        if safe_string.is_empty() {
            return Err(StoreError::invalid_input("audio source is empty"));
        }
        match self.manager.backend() {
            Backend::Sqlite(_) => {
                let safe_string = safe_string.to_string();
                self.manager
                    .with_sqlite(OpKind::Write, move |conn| {
                        conn.execute(
                            "INSERT INTO audio_sources (safe_string) VALUES (?1)
                             ON CONFLICT(safe_string) DO NOTHING",
                            rusqlite::params![safe_string],
                        )?;
                        conn.query_row(
                            "SELECT id, safe_string FROM audio_sources WHERE safe_string = ?1",
                            rusqlite::params![safe_string],
                            |row| {
                                Ok(AudioSource {
                                    id: row.get(0)?,
                                    safe_string: row.get(1)?,
                                })
                            },
                        )
                    })
                    .await
            }
            Backend::MySql(_) => {
                use mysql_async::prelude::*;
                let mut conn = self.manager.mysql_conn().await?;
                conn.exec_drop(
                    "INSERT IGNORE INTO audio_sources (safe_string) VALUES (?)",
                    (safe_string,),
                )
                .await?;
                let row: Option<(i64, String)> = conn
                    .exec_first(
                        "SELECT id, safe_string FROM audio_sources WHERE safe_string = ?",
                        (safe_string,),
                    )
                    .await?;
                row.map(|(id, safe_string)| AudioSource { id, safe_string })
                    .ok_or_else(|| {
                        StoreError::Fatal("audio source insert-then-select produced no row".to_string())
                    })
            }
        }
    }

    pub async fn by_id(&self, id: i64) -> Result<AudioSource> {
        match self.manager.backend() {
            Backend::Sqlite(_) => {
                self.manager
                    .with_sqlite(OpKind::Read, move |conn| {
                        conn.query_row(
                            "SELECT id, safe_string FROM audio_sources WHERE id = ?1",
                            rusqlite::params![id],
                            |row| {
                                Ok(AudioSource {
                                    id: row.get(0)?,
                                    safe_string: row.get(1)?,
                                })
                            },
                        )
                    })
                    .await
            }
            Backend::MySql(_) => {
                use mysql_async::prelude::*;
                let mut conn = self.manager.mysql_conn().await?;
                let row: Option<(i64, String)> = conn
                    .exec_first("SELECT id, safe_string FROM audio_sources WHERE id = ?", (id,))
                    .await?;
                row.map(|(id, safe_string)| AudioSource { id, safe_string })
                    .ok_or_else(|| StoreError::not_found(format!("audio source {id}")))
            }
        }
    }
}
