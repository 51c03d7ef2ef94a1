use std::sync::Arc;

use crate::counters::OpKind;
use crate::error::{Result, StoreError};
use crate::manager::{Backend, DatabaseManager};
use crate::models::{DynamicThreshold, ThresholdEvent};

/// Per-species runtime threshold state plus its append-only change log.
pub struct ThresholdRepository {
    manager: Arc<DatabaseManager>,
}

impl ThresholdRepository {
    pub fn new(manager: Arc<DatabaseManager>) -> Self {
        Self { manager }
    }

    pub async fn upsert(&self, threshold: &DynamicThreshold) -> Result<()> {
        let t = threshold.clone();
        match self.manager.backend() {
            Backend::Sqlite(_) => {
                self.manager
                    .with_sqlite(OpKind::Write, move |conn| {
                        conn.execute(
                            "INSERT INTO dynamic_thresholds
                                (label_id, scientific_name, level, current_value, base_threshold,
                                 valid_hours, expires_at, trigger_count, highest_level_reached)
                             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                             ON CONFLICT(label_id) DO UPDATE SET
                                scientific_name = ?2, level = ?3, current_value = ?4,
                                base_threshold = ?5, valid_hours = ?6, expires_at = ?7,
                                trigger_count = ?8, highest_level_reached = ?9",
                            rusqlite::params![
                                t.label_id,
                                t.scientific_name,
                                t.level,
                                t.current_value,
                                t.base_threshold,
                                t.valid_hours,
                                t.expires_at,
                                t.trigger_count,
                                t.highest_level_reached,
                            ],
                        )?;
                        Ok(())
                    })
                    .await
            }
            Backend::MySql(_) => {
                use mysql_async::prelude::*;
                let mut conn = self.manager.mysql_conn().await?;
                conn.exec_drop(
                    "INSERT INTO dynamic_thresholds
                        (label_id, scientific_name, level, current_value, base_threshold,
                         valid_hours, expires_at, trigger_count, highest_level_reached)
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                     ON DUPLICATE KEY UPDATE
                        scientific_name = VALUES(scientific_name), level = VALUES(level),
                        current_value = VALUES(current_value), base_threshold = VALUES(base_threshold),
                        valid_hours = VALUES(valid_hours), expires_at = VALUES(expires_at),
                        trigger_count = VALUES(trigger_count),
                        highest_level_reached = VALUES(highest_level_reached)",
                    (
                        t.label_id,
                        t.scientific_name,
                        t.level,
                        t.current_value,
                        t.base_threshold,
                        t.valid_hours,
                        t.expires_at,
                        t.trigger_count,
                        t.highest_level_reached,
                    ),
                )
                .await?;
                Ok(())
            }
        }
    }

    pub async fn by_label_id(&self, label_id: i64) -> Result<Option<DynamicThreshold>> {
        match self.manager.backend() {
            Backend::Sqlite(_) => {
                self.manager
                    .with_sqlite(OpKind::Read, move |conn| {
                        let mut stmt = conn.prepare(
                            "SELECT label_id, scientific_name, level, current_value, base_threshold,
                                    valid_hours, expires_at, trigger_count, highest_level_reached
                             FROM dynamic_thresholds WHERE label_id = ?1",
                        )?;
                        let mut rows = stmt.query(rusqlite::params![label_id])?;
                        if let Some(row) = rows.next()? {
                            Ok(Some(DynamicThreshold {
                                label_id: row.get(0)?,
                                scientific_name: row.get(1)?,
                                level: row.get(2)?,
                                current_value: row.get(3)?,
                                base_threshold: row.get(4)?,
                                valid_hours: row.get(5)?,
                                expires_at: row.get(6)?,
                                trigger_count: row.get(7)?,
                                highest_level_reached: row.get(8)?,
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
                let row: Option<(i64, String, i32, f64, f64, i32, i64, i64, i32)> = conn
                    .exec_first(
                        "SELECT label_id, scientific_name, level, current_value, base_threshold,
                                valid_hours, expires_at, trigger_count, highest_level_reached
                         FROM dynamic_thresholds WHERE label_id = ?",
                        (label_id,),
                    )
                    .await?;
                Ok(row.map(
                    |(label_id, scientific_name, level, current_value, base_threshold, valid_hours, expires_at, trigger_count, highest_level_reached)| {
                        DynamicThreshold {
                            label_id,
                            scientific_name,
                            level,
                            current_value,
                            base_threshold,
                            valid_hours,
                            expires_at,
                            trigger_count,
                            highest_level_reached,
                        }
                    },
                ))
            }
        }
    }

    /// Look up the current threshold level by common name via the caller's
    /// label map: resolve `common_name` to a `scientific_name` first, then
    /// join through `labels`.
    pub async fn by_common_name(
        &self,
        common_name_lookup: impl Fn(&str) -> Option<String>,
        common_name: &str,
    ) -> Result<Option<DynamicThreshold>> {
        let scientific_name = match common_name_lookup(common_name) {
            Some(name) => name,
            None => return Ok(None),
        };
        match self.manager.backend() {
            Backend::Sqlite(_) => {
                self.manager
                    .with_sqlite(OpKind::Read, move |conn| {
                        let mut stmt = conn.prepare(
                            "SELECT t.label_id, t.scientific_name, t.level, t.current_value, t.base_threshold,
                                    t.valid_hours, t.expires_at, t.trigger_count, t.highest_level_reached
                             FROM dynamic_thresholds t
                             JOIN labels l ON l.id = t.label_id
                             WHERE l.scientific_name = ?1",
                        )?;
                        let mut rows = stmt.query(rusqlite::params![scientific_name])?;
                        if let Some(row) = rows.next()? {
                            Ok(Some(DynamicThreshold {
                                label_id: row.get(0)?,
                                scientific_name: row.get(1)?,
                                level: row.get(2)?,
                                current_value: row.get(3)?,
                                base_threshold: row.get(4)?,
                                valid_hours: row.get(5)?,
                                expires_at: row.get(6)?,
                                trigger_count: row.get(7)?,
                                highest_level_reached: row.get(8)?,
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
                let row: Option<(i64, String, i32, f64, f64, i32, i64, i64, i32)> = conn
                    .exec_first(
                        "SELECT t.label_id, t.scientific_name, t.level, t.current_value, t.base_threshold,
                                t.valid_hours, t.expires_at, t.trigger_count, t.highest_level_reached
                         FROM dynamic_thresholds t
                         JOIN labels l ON l.id = t.label_id
                         WHERE l.scientific_name = ?",
                        (scientific_name,),
                    )
                    .await?;
                Ok(row.map(
                    |(label_id, scientific_name, level, current_value, base_threshold, valid_hours, expires_at, trigger_count, highest_level_reached)| {
                        DynamicThreshold {
                            label_id,
                            scientific_name,
                            level,
                            current_value,
                            base_threshold,
                            valid_hours,
                            expires_at,
                            trigger_count,
                            highest_level_reached,
                        }
                    },
                ))
            }
        }
    }

    /// Removes a species' dynamic threshold state (not its event log) by
    /// common name, resolved the same way `by_common_name` resolves reads.
    /// A no-op, not an error, if the lookup or the row doesn't exist.
    pub async fn delete_dynamic_threshold(
        &self,
        common_name_lookup: impl Fn(&str) -> Option<String>,
        common_name: &str,
    ) -> Result<()> {
        let scientific_name = match common_name_lookup(common_name) {
            Some(name) => name,
            None => return Ok(()),
        };
        match self.manager.backend() {
            Backend::Sqlite(_) => {
                self.manager
                    .with_sqlite(OpKind::Write, move |conn| {
                        conn.execute(
                            "DELETE FROM dynamic_thresholds
                             WHERE label_id IN (SELECT id FROM labels WHERE scientific_name = ?1)",
                            rusqlite::params![scientific_name],
                        )?;
                        Ok(())
                    })
                    .await
            }
            Backend::MySql(_) => {
                use mysql_async::prelude::*;
                let mut conn = self.manager.mysql_conn().await?;
                conn.exec_drop(
                    "DELETE FROM dynamic_thresholds
                     WHERE label_id IN (SELECT id FROM labels WHERE scientific_name = ?)",
                    (scientific_name,),
                )
                .await?;
                Ok(())
            }
        }
    }

    /// Logs a level change, capturing `species_name` verbatim at log time —
    /// never re-derived later even if the label's name changes.
    pub async fn log_event(
        &self,
        label_id: i64,
        species_name: &str,
        old_level: i32,
        new_level: i32,
        created_at: i64,
    ) -> Result<ThresholdEvent> {
        if old_level == new_level {
            return Err(StoreError::invalid_input(
                "threshold event requires old_level != new_level",
            ));
        }
        match self.manager.backend() {
            Backend::Sqlite(_) => {
                let species_name = species_name.to_string();
                self.manager
                    .with_sqlite(OpKind::Write, move |conn| {
                        conn.execute(
                            "INSERT INTO threshold_events (label_id, species_name, old_level, new_level, created_at)
                             VALUES (?1, ?2, ?3, ?4, ?5)",
                            rusqlite::params![label_id, species_name, old_level, new_level, created_at],
                        )?;
                        let id = conn.last_insert_rowid();
                        Ok(ThresholdEvent {
                            id,
                            label_id,
                            species_name,
                            old_level,
                            new_level,
                            created_at,
                        })
                    })
                    .await
            }
            Backend::MySql(_) => {
                use mysql_async::prelude::*;
                let mut conn = self.manager.mysql_conn().await?;
                conn.exec_drop(
                    "INSERT INTO threshold_events (label_id, species_name, old_level, new_level, created_at)
                     VALUES (?, ?, ?, ?, ?)",
                    (label_id, species_name, old_level, new_level, created_at),
                )
                .await?;
                let id = conn.last_insert_id().unwrap_or_default() as i64;
                Ok(ThresholdEvent {
                    id,
                    label_id,
                    species_name: species_name.to_string(),
                    old_level,
                    new_level,
                    created_at,
                })
            }
        }
    }

    pub async fn events_for_label(&self, label_id: i64) -> Result<Vec<ThresholdEvent>> {
        match self.manager.backend() {
            Backend::Sqlite(_) => {
                self.manager
                    .with_sqlite(OpKind::Read, move |conn| {
                        let mut stmt = conn.prepare(
                            "SELECT id, label_id, species_name, old_level, new_level, created_at
                             FROM threshold_events WHERE label_id = ?1 ORDER BY created_at ASC",
                        )?;
                        let rows = stmt.query_map(rusqlite::params![label_id], |row| {
                            Ok(ThresholdEvent {
                                id: row.get(0)?,
                                label_id: row.get(1)?,
                                species_name: row.get(2)?,
                                old_level: row.get(3)?,
                                new_level: row.get(4)?,
                                created_at: row.get(5)?,
                            })
                        })?;
                        rows.collect::<rusqlite::Result<Vec<_>>>()
                    })
                    .await
            }
            Backend::MySql(_) => {
                use mysql_async::prelude::*;
                let mut conn = self.manager.mysql_conn().await?;
                let rows: Vec<(i64, i64, String, i32, i32, i64)> = conn
                    .exec(
                        "SELECT id, label_id, species_name, old_level, new_level, created_at
                         FROM threshold_events WHERE label_id = ? ORDER BY created_at ASC",
                        (label_id,),
                    )
                    .await?;
                Ok(rows
                    .into_iter()
                    .map(|(id, label_id, species_name, old_level, new_level, created_at)| ThresholdEvent {
                        id,
                        label_id,
                        species_name,
                        old_level,
                        new_level,
                        created_at,
                    })
                    .collect())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EngineConfig, StoreConfig};

    async fn test_manager() -> Arc<DatabaseManager> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("thresholds.db");
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
    async fn by_common_name_resolves_through_external_lookup() {
        let manager = test_manager().await;
        let labels = crate::repositories::LabelRepository::new(manager.clone());
        let label = labels.get_or_create("Turdus merula", 1, 1, None).await.unwrap();

        let repo = ThresholdRepository::new(manager);
        repo.upsert(&DynamicThreshold {
            label_id: label.id,
            scientific_name: label.scientific_name.clone(),
            level: 1,
            current_value: 0.5,
            base_threshold: 0.3,
            valid_hours: 24,
            expires_at: 1_700_000_000,
            trigger_count: 1,
            highest_level_reached: 1,
        })
        .await
        .unwrap();

        let found = repo
            .by_common_name(
                |common| if common == "Eurasian Blackbird" { Some("Turdus merula".to_string()) } else { None },
                "Eurasian Blackbird",
            )
            .await
            .unwrap();
        assert_eq!(found.unwrap().label_id, label.id);
    }

    #[tokio::test]
    async fn log_event_rejects_no_op_transition() {
        let manager = test_manager().await;
        let repo = ThresholdRepository::new(manager);
        let err = repo.log_event(1, "Turdus merula", 2, 2, 0).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidInput(_)));
    }
}
