use std::sync::Arc;

use rusqlite::OptionalExtension;

use crate::counters::OpKind;
use crate::error::Result;
use crate::manager::{Backend, DatabaseManager};
use crate::models::NotificationHistory;

/// Last-sent marker per `(label_id, notification_type)`. Dispatch itself is
/// out of scope here; this only records what was already sent.
pub struct NotificationRepository {
    manager: Arc<DatabaseManager>,
}

impl NotificationRepository {
    pub fn new(manager: Arc<DatabaseManager>) -> Self {
        Self { manager }
    }

    pub async fn record_sent(
        &self,
        label_id: i64,
        notification_type: &str,
        last_sent_at: i64,
        expires_at: i64,
    ) -> Result<()> {
        match self.manager.backend() {
            Backend::Sqlite(_) => {
                let notification_type = notification_type.to_string();
                self.manager
                    .with_sqlite(OpKind::Write, move |conn| {
                        conn.execute(
                            "INSERT INTO notification_history (label_id, notification_type, last_sent_at, expires_at)
                             VALUES (?1, ?2, ?3, ?4)
                             ON CONFLICT(label_id, notification_type) DO UPDATE SET
                                last_sent_at = ?3, expires_at = ?4",
                            rusqlite::params![label_id, notification_type, last_sent_at, expires_at],
                        )?;
                        Ok(())
                    })
                    .await
            }
            Backend::MySql(_) => {
                use mysql_async::prelude::*;
                let mut conn = self.manager.mysql_conn().await?;
                conn.exec_drop(
                    "INSERT INTO notification_history (label_id, notification_type, last_sent_at, expires_at)
                     VALUES (?, ?, ?, ?)
                     ON DUPLICATE KEY UPDATE last_sent_at = VALUES(last_sent_at), expires_at = VALUES(expires_at)",
                    (label_id, notification_type, last_sent_at, expires_at),
                )
                .await?;
                Ok(())
            }
        }
    }

    /// Whether a not-yet-expired suppression window exists for this pair.
    pub async fn is_suppressed(&self, label_id: i64, notification_type: &str, now: i64) -> Result<bool> {
        match self.manager.backend() {
            Backend::Sqlite(_) => {
                let notification_type = notification_type.to_string();
                self.manager
                    .with_sqlite(OpKind::Read, move |conn| {
                        let expires_at: Option<i64> = conn
                            .query_row(
                                "SELECT expires_at FROM notification_history
                                 WHERE label_id = ?1 AND notification_type = ?2",
                                rusqlite::params![label_id, notification_type],
                                |row| row.get(0),
                            )
                            .optional()?;
                        Ok(expires_at.is_some_and(|expires_at| expires_at > now))
                    })
                    .await
            }
            Backend::MySql(_) => {
                use mysql_async::prelude::*;
                let mut conn = self.manager.mysql_conn().await?;
                let expires_at: Option<i64> = conn
                    .exec_first(
                        "SELECT expires_at FROM notification_history
                         WHERE label_id = ? AND notification_type = ?",
                        (label_id, notification_type),
                    )
                    .await?;
                Ok(expires_at.is_some_and(|expires_at| expires_at > now))
            }
        }
    }

    pub async fn by_label(&self, label_id: i64) -> Result<Vec<NotificationHistory>> {
        match self.manager.backend() {
            Backend::Sqlite(_) => {
                self.manager
                    .with_sqlite(OpKind::Read, move |conn| {
                        let mut stmt = conn.prepare(
                            "SELECT label_id, notification_type, last_sent_at, expires_at
                             FROM notification_history WHERE label_id = ?1",
                        )?;
                        let rows = stmt.query_map(rusqlite::params![label_id], |row| {
                            Ok(NotificationHistory {
                                label_id: row.get(0)?,
                                notification_type: row.get(1)?,
                                last_sent_at: row.get(2)?,
                                expires_at: row.get(3)?,
                            })
                        })?;
                        rows.collect::<rusqlite::Result<Vec<_>>>()
                    })
                    .await
            }
            Backend::MySql(_) => {
                use mysql_async::prelude::*;
                let mut conn = self.manager.mysql_conn().await?;
                let rows: Vec<(i64, String, i64, i64)> = conn
                    .exec(
                        "SELECT label_id, notification_type, last_sent_at, expires_at
                         FROM notification_history WHERE label_id = ?",
                        (label_id,),
                    )
                    .await?;
                Ok(rows
                    .into_iter()
                    .map(|(label_id, notification_type, last_sent_at, expires_at)| NotificationHistory {
                        label_id,
                        notification_type,
                        last_sent_at,
                        expires_at,
                    })
                    .collect())
            }
        }
    }
}
