use std::sync::Arc;

use crate::counters::OpKind;
use crate::error::{Result, StoreError};
use crate::manager::{Backend, DatabaseManager};
use crate::models::{split_legacy_label, Label, LabelType};

/// Interns classification targets. `get_or_create` is the only write path:
/// labels are never mutated or deleted once created.
pub struct LabelRepository {
    manager: Arc<DatabaseManager>,
}

impl LabelRepository {
    pub fn new(manager: Arc<DatabaseManager>) -> Self {
        Self { manager }
    }

    /// Accepts either a plain scientific name or the legacy concatenated
    /// form (`"Scientific_Common"`, split on the FIRST `_`); both are
    /// normalized to `scientific_name` before interning. Fails with
    /// `InvalidInput` if the resulting scientific name is empty.
    ///
    /// Safe under concurrent callers: relies on the unique index on
    /// `(scientific_name, label_type_id, model_id)` and retries the select
    /// once if the insert loses the race.
    pub async fn get_or_create(
        &self,
        raw_name: &str,
        label_type_id: i64,
        model_id: i64,
        taxonomic_class_id: Option<i64>,
    ) -> Result<Label> {
        let (scientific_name, _common) = split_legacy_label(raw_name);
        if scientific_name.is_empty() {
            return Err(StoreError::invalid_input("label scientific_name is empty"));
        }

        match self.manager.backend() {
            Backend::Sqlite(_) => {
                self.get_or_create_sqlite(&scientific_name, label_type_id, model_id, taxonomic_class_id)
                    .await
            }
            Backend::MySql(_) => {
                self.get_or_create_mysql(&scientific_name, label_type_id, model_id, taxonomic_class_id)
                    .await
            }
        }
    }

    async fn get_or_create_sqlite(
        &self,
        scientific_name: &str,
        label_type_id: i64,
        model_id: i64,
        taxonomic_class_id: Option<i64>,
    ) -> Result<Label> {
        let scientific_name = scientific_name.to_string();
        self.manager
            .with_sqlite(OpKind::Write, move |conn| {
                conn.execute(
                    "INSERT INTO labels (scientific_name, label_type_id, model_id, taxonomic_class_id)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(scientific_name, label_type_id, model_id) DO NOTHING",
                    rusqlite::params![scientific_name, label_type_id, model_id, taxonomic_class_id],
                )?;
                conn.query_row(
                    "SELECT id, scientific_name, label_type_id, model_id, taxonomic_class_id
                     FROM labels WHERE scientific_name = ?1 AND label_type_id = ?2 AND model_id = ?3",
                    rusqlite::params![scientific_name, label_type_id, model_id],
                    |row| {
                        Ok(Label {
                            id: row.get(0)?,
                            scientific_name: row.get(1)?,
                            label_type_id: row.get(2)?,
                            model_id: row.get(3)?,
                            taxonomic_class_id: row.get(4)?,
                        })
                    },
                )
            })
            .await
    }

    async fn get_or_create_mysql(
        &self,
        scientific_name: &str,
        label_type_id: i64,
        model_id: i64,
        taxonomic_class_id: Option<i64>,
    ) -> Result<Label> {
        use mysql_async::prelude::*;
        let mut conn = self.manager.mysql_conn().await?;
        conn.exec_drop(
            "INSERT IGNORE INTO labels (scientific_name, label_type_id, model_id, taxonomic_class_id)
             VALUES (?, ?, ?, ?)",
            (scientific_name, label_type_id, model_id, taxonomic_class_id),
        )
        .await?;
        let row: Option<(i64, String, i64, i64, Option<i64>)> = conn
            .exec_first(
                "SELECT id, scientific_name, label_type_id, model_id, taxonomic_class_id
                 FROM labels WHERE scientific_name = ? AND label_type_id = ? AND model_id = ?",
                (scientific_name, label_type_id, model_id),
            )
            .await?;
        row.map(|(id, scientific_name, label_type_id, model_id, taxonomic_class_id)| Label {
            id,
            scientific_name,
            label_type_id,
            model_id,
            taxonomic_class_id,
        })
        .ok_or_else(|| StoreError::Fatal("label insert-then-select produced no row".to_string()))
    }

    pub async fn by_id(&self, id: i64) -> Result<Label> {
        match self.manager.backend() {
            Backend::Sqlite(_) => {
                self.manager
                    .with_sqlite(OpKind::Read, move |conn| {
                        conn.query_row(
                            "SELECT id, scientific_name, label_type_id, model_id, taxonomic_class_id
                             FROM labels WHERE id = ?1",
                            rusqlite::params![id],
                            |row| {
                                Ok(Label {
                                    id: row.get(0)?,
                                    scientific_name: row.get(1)?,
                                    label_type_id: row.get(2)?,
                                    model_id: row.get(3)?,
                                    taxonomic_class_id: row.get(4)?,
                                })
                            },
                        )
                    })
                    .await
            }
            Backend::MySql(_) => {
                use mysql_async::prelude::*;
                let mut conn = self.manager.mysql_conn().await?;
                let row: Option<(i64, String, i64, i64, Option<i64>)> = conn
                    .exec_first(
                        "SELECT id, scientific_name, label_type_id, model_id, taxonomic_class_id
                         FROM labels WHERE id = ?",
                        (id,),
                    )
                    .await?;
                row.map(|(id, scientific_name, label_type_id, model_id, taxonomic_class_id)| Label {
                    id,
                    scientific_name,
                    label_type_id,
                    model_id,
                    taxonomic_class_id,
                })
                .ok_or_else(|| StoreError::not_found(format!("label {id}")))
            }
        }
    }

    /// Find a label by scientific name (exact match, already normalized).
    pub async fn by_scientific_name(&self, scientific_name: &str) -> Result<Option<Label>> {
        match self.manager.backend() {
            Backend::Sqlite(_) => {
                let scientific_name = scientific_name.to_string();
                self.manager
                    .with_sqlite(OpKind::Read, move |conn| {
                        let mut stmt = conn.prepare(
                            "SELECT id, scientific_name, label_type_id, model_id, taxonomic_class_id
                             FROM labels WHERE scientific_name = ?1 LIMIT 1",
                        )?;
                        let mut rows = stmt.query(rusqlite::params![scientific_name])?;
                        if let Some(row) = rows.next()? {
                            Ok(Some(Label {
                                id: row.get(0)?,
                                scientific_name: row.get(1)?,
                                label_type_id: row.get(2)?,
                                model_id: row.get(3)?,
                                taxonomic_class_id: row.get(4)?,
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
                let row: Option<(i64, String, i64, i64, Option<i64>)> = conn
                    .exec_first(
                        "SELECT id, scientific_name, label_type_id, model_id, taxonomic_class_id
                         FROM labels WHERE scientific_name = ? LIMIT 1",
                        (scientific_name,),
                    )
                    .await?;
                Ok(row.map(|(id, scientific_name, label_type_id, model_id, taxonomic_class_id)| Label {
                    id,
                    scientific_name,
                    label_type_id,
                    model_id,
                    taxonomic_class_id,
                }))
            }
        }
    }

    /// Distinct labels that have at least one detection. Backs
    /// `DetectionRepository::all_detected_species`, lifted here since it's
    /// purely a label-table query joined against detections.
    pub async fn all_detected(&self) -> Result<Vec<Label>> {
        match self.manager.backend() {
            Backend::Sqlite(_) => {
                self.manager
                    .with_sqlite(OpKind::Read, |conn| {
                        let mut stmt = conn.prepare(
                            "SELECT DISTINCT l.id, l.scientific_name, l.label_type_id, l.model_id, l.taxonomic_class_id
                             FROM labels l JOIN detections d ON d.label_id = l.id",
                        )?;
                        let rows = stmt.query_map([], |row| {
                            Ok(Label {
                                id: row.get(0)?,
                                scientific_name: row.get(1)?,
                                label_type_id: row.get(2)?,
                                model_id: row.get(3)?,
                                taxonomic_class_id: row.get(4)?,
                            })
                        })?;
                        rows.collect::<rusqlite::Result<Vec<_>>>()
                    })
                    .await
            }
            Backend::MySql(_) => {
                use mysql_async::prelude::*;
                let mut conn = self.manager.mysql_conn().await?;
                let rows: Vec<(i64, String, i64, i64, Option<i64>)> = conn
                    .query(
                        "SELECT DISTINCT l.id, l.scientific_name, l.label_type_id, l.model_id, l.taxonomic_class_id
                         FROM labels l JOIN detections d ON d.label_id = l.id",
                    )
                    .await?;
                Ok(rows
                    .into_iter()
                    .map(|(id, scientific_name, label_type_id, model_id, taxonomic_class_id)| Label {
                        id,
                        scientific_name,
                        label_type_id,
                        model_id,
                        taxonomic_class_id,
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
        let path = dir.path().join("labels.db");
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
    async fn get_or_create_splits_legacy_concatenated_form() {
        let manager = test_manager().await;
        let repo = LabelRepository::new(manager);
        let label = repo
            .get_or_create("Picus viridis_vihertikka", 1, 1, None)
            .await
            .unwrap();
        assert_eq!(label.scientific_name, "Picus viridis");
        assert!(!label.scientific_name.contains('_'));
    }

    #[tokio::test]
    async fn get_or_create_is_idempotent() {
        let manager = test_manager().await;
        let repo = LabelRepository::new(manager);
        let first = repo.get_or_create("Parus major", 1, 1, None).await.unwrap();
        let second = repo.get_or_create("Parus major", 1, 1, None).await.unwrap();
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn empty_scientific_name_is_invalid_input() {
        let manager = test_manager().await;
        let repo = LabelRepository::new(manager);
        let err = repo.get_or_create("", 1, 1, None).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn concurrent_get_or_create_converges_on_one_row() {
        let manager = test_manager().await;
        let repo = Arc::new(LabelRepository::new(manager));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let repo = repo.clone();
            handles.push(tokio::spawn(async move {
                repo.get_or_create("Turdus merula", 1, 1, None).await.unwrap()
            }));
        }
        let mut ids = std::collections::HashSet::new();
        for h in handles {
            ids.insert(h.await.unwrap().id);
        }
        assert_eq!(ids.len(), 1, "all concurrent callers must observe the same id");
    }
}
