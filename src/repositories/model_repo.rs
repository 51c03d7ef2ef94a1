use std::sync::Arc;

use crate::counters::OpKind;
use crate::error::{Result, StoreError};
use crate::manager::{Backend, DatabaseManager};
use crate::models::Model;

/// Interns classifier identities `(name, version, variant)`.
pub struct ModelRepository {
    manager: Arc<DatabaseManager>,
}

impl ModelRepository {
    pub fn new(manager: Arc<DatabaseManager>) -> Self {
        Self { manager }
    }

    pub async fn get_or_create(&self, name: &str, version: &str, variant: &str) -> Result<Model> {
        if name.is_empty() {
            return Err(StoreError::invalid_input("model name is empty"));
        }
        match self.manager.backend() {
            Backend::Sqlite(_) => {
                let (name, version, variant) =
                    (name.to_string(), version.to_string(), variant.to_string());
                self.manager
                    .with_sqlite(OpKind::Write, move |conn| {
                        conn.execute(
                            "INSERT INTO models (name, version, variant) VALUES (?1, ?2, ?3)
                             ON CONFLICT(name, version, variant) DO NOTHING",
                            rusqlite::params![name, version, variant],
                        )?;
                        conn.query_row(
                            "SELECT id, name, version, variant FROM models
                             WHERE name = ?1 AND version = ?2 AND variant = ?3",
                            rusqlite::params![name, version, variant],
                            |row| {
                                Ok(Model {
                                    id: row.get(0)?,
                                    name: row.get(1)?,
                                    version: row.get(2)?,
                                    variant: row.get(3)?,
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
                    "INSERT IGNORE INTO models (name, version, variant) VALUES (?, ?, ?)",
                    (name, version, variant),
                )
                .await?;
                let row: Option<(i64, String, String, String)> = conn
                    .exec_first(
                        "SELECT id, name, version, variant FROM models
                         WHERE name = ? AND version = ? AND variant = ?",
                        (name, version, variant),
                    )
                    .await?;
                row.map(|(id, name, version, variant)| Model {
                    id,
                    name,
                    version,
                    variant,
                })
                .ok_or_else(|| StoreError::Fatal("model insert-then-select produced no row".to_string()))
            }
        }
    }

    pub async fn default_model(&self) -> Result<Model> {
        self.get_or_create(
            Model::DEFAULT_NAME,
            Model::DEFAULT_VERSION,
            Model::DEFAULT_VARIANT,
        )
        .await
    }
}
