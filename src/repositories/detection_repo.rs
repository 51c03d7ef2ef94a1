use std::sync::Arc;

use serde::Serialize;

use crate::counters::OpKind;
use crate::error::{Result, StoreError};
use crate::manager::{Backend, DatabaseManager};
use crate::models::{Detection, DetectionInput, Label, Model};

use super::{LabelRepository, ModelRepository, SourceRepository, WeatherRepository};

/// A `Detection` joined with the rows its foreign keys reference, assembled
/// for display without forcing callers to run their own joins.
#[derive(Debug, Clone, Serialize)]
pub struct DetectionWithRelations {
    pub detection: Detection,
    pub label: Label,
    pub model: Model,
    pub source_safe_string: Option<String>,
}

/// One row of the 24h/N-day hourly histogram used as detection-rate cache input.
#[derive(Debug, Clone, Serialize)]
pub struct HourlyCount {
    pub hour_bucket: i64,
    pub count: i64,
}

#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub scientific_name: Option<String>,
    pub min_confidence: Option<f64>,
    pub since: Option<i64>,
    pub until: Option<i64>,
    pub limit: i64,
    pub offset: i64,
}

/// A detection row with label/model/source already interned, ready for
/// `save_many_in_transaction`. Produced by a caller (the migration batch
/// copier) that has already run the idempotent `get_or_create` calls
/// outside the transaction.
#[derive(Debug, Clone)]
pub struct ResolvedDetectionRow {
    pub label_id: i64,
    pub model_id: i64,
    pub source_id: Option<i64>,
    pub weather_id: Option<i64>,
    pub detected_at: i64,
    pub begin_time: i64,
    pub end_time: i64,
    pub confidence: f64,
    pub latitude: f64,
    pub longitude: f64,
    pub clip_name: Option<String>,
    pub processing_time_ms: i64,
    pub legacy_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SpeciesCount {
    pub scientific_name: String,
    pub common_name: String,
    pub count: i64,
}

/// The core fact table. `save` interns label/model/source/weather first,
/// then inserts one row; everything else reads back through joins.
pub struct DetectionRepository {
    manager: Arc<DatabaseManager>,
    labels: LabelRepository,
    models: ModelRepository,
    sources: SourceRepository,
    weather: WeatherRepository,
}

impl DetectionRepository {
    pub fn new(manager: Arc<DatabaseManager>) -> Self {
        Self {
            labels: LabelRepository::new(manager.clone()),
            models: ModelRepository::new(manager.clone()),
            sources: SourceRepository::new(manager.clone()),
            weather: WeatherRepository::new(manager.clone()),
            manager,
        }
    }

    /// Interns the referenced label/model/source, validates
    /// `detected_at < begin_time + 10s` as a clip alignment sanity check,
    /// then inserts the detection row. Weather is the caller's
    /// responsibility to intern first (it needs observation fields this
    /// input doesn't carry) and is passed by id.
    pub async fn save(&self, input: DetectionInput, weather_id: Option<i64>) -> Result<Detection> {
        if input.detected_at >= input.begin_time + 10 {
            return Err(StoreError::invalid_input(
                "detected_at must be within 10s of begin_time",
            ));
        }
        if !(0.0..=1.0).contains(&input.confidence) {
            return Err(StoreError::invalid_input("confidence must be in [0, 1]"));
        }

        let model = self
            .models
            .get_or_create(&input.model_name, &input.model_version, &input.model_variant)
            .await?;
        // Classifier-sourced detections always reference the seeded species label_type.
        let label = self
            .labels
            .get_or_create(&input.scientific_name, crate::models::LabelType::SPECIES_ID, model.id, None)
            .await?;
        let source_id = match &input.source {
            Some(s) if !s.is_empty() => Some(self.sources.get_or_create(s).await?.id),
            _ => None,
        };

        match self.manager.backend() {
            Backend::Sqlite(_) => {
                self.manager
                    .with_sqlite(OpKind::Write, move |conn| {
                        conn.execute(
                            "INSERT INTO detections
                                (label_id, model_id, source_id, weather_id, detected_at, begin_time, end_time,
                                 confidence, latitude, longitude, clip_name, processing_time_ms, legacy_id)
                             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                            rusqlite::params![
                                label.id,
                                model.id,
                                source_id,
                                weather_id,
                                input.detected_at,
                                input.begin_time,
                                input.end_time,
                                input.confidence,
                                input.latitude,
                                input.longitude,
                                input.clip_name,
                                input.processing_time_ms,
                                input.legacy_id,
                            ],
                        )?;
                        let id = conn.last_insert_rowid();
                        Ok(Detection {
                            id,
                            label_id: label.id,
                            model_id: model.id,
                            source_id,
                            weather_id,
                            detected_at: input.detected_at,
                            begin_time: input.begin_time,
                            end_time: input.end_time,
                            confidence: input.confidence,
                            latitude: input.latitude,
                            longitude: input.longitude,
                            clip_name: input.clip_name,
                            processing_time_ms: input.processing_time_ms,
                            legacy_id: input.legacy_id,
                        })
                    })
                    .await
            }
            Backend::MySql(_) => {
                use mysql_async::prelude::*;
                let mut conn = self.manager.mysql_conn().await?;
                conn.exec_drop(
                    "INSERT INTO detections
                        (label_id, model_id, source_id, weather_id, detected_at, begin_time, end_time,
                         confidence, latitude, longitude, clip_name, processing_time_ms, legacy_id)
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                    vec![
                        mysql_async::Value::from(label.id),
                        mysql_async::Value::from(model.id),
                        mysql_async::Value::from(source_id),
                        mysql_async::Value::from(weather_id),
                        mysql_async::Value::from(input.detected_at),
                        mysql_async::Value::from(input.begin_time),
                        mysql_async::Value::from(input.end_time),
                        mysql_async::Value::from(input.confidence),
                        mysql_async::Value::from(input.latitude),
                        mysql_async::Value::from(input.longitude),
                        mysql_async::Value::from(input.clip_name.clone()),
                        mysql_async::Value::from(input.processing_time_ms),
                        mysql_async::Value::from(input.legacy_id),
                    ],
                )
                .await?;
                let id = conn.last_insert_id().unwrap_or_default() as i64;
                Ok(Detection {
                    id,
                    label_id: label.id,
                    model_id: model.id,
                    source_id,
                    weather_id,
                    detected_at: input.detected_at,
                    begin_time: input.begin_time,
                    end_time: input.end_time,
                    confidence: input.confidence,
                    latitude: input.latitude,
                    longitude: input.longitude,
                    clip_name: input.clip_name,
                    processing_time_ms: input.processing_time_ms,
                    legacy_id: input.legacy_id,
                })
            }
        }
    }

    /// Inserts every row in one transaction, rolling all of it back on the
    /// first failure. Callers intern label/model/source beforehand (those
    /// upserts are idempotent on their own) and pass already-resolved ids
    /// here, so the transaction only ever does plain inserts.
    pub async fn save_many_in_transaction(&self, rows: Vec<ResolvedDetectionRow>) -> Result<Vec<Detection>> {
        match self.manager.backend() {
            Backend::Sqlite(_) => {
                self.manager
                    .with_sqlite(OpKind::Write, move |conn| {
                        conn.execute_batch("BEGIN")?;
                        let mut saved = Vec::with_capacity(rows.len());
                        for r in &rows {
                            let result = conn.execute(
                                "INSERT INTO detections
                                    (label_id, model_id, source_id, weather_id, detected_at, begin_time, end_time,
                                     confidence, latitude, longitude, clip_name, processing_time_ms, legacy_id)
                                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                                rusqlite::params![
                                    r.label_id,
                                    r.model_id,
                                    r.source_id,
                                    r.weather_id,
                                    r.detected_at,
                                    r.begin_time,
                                    r.end_time,
                                    r.confidence,
                                    r.latitude,
                                    r.longitude,
                                    r.clip_name,
                                    r.processing_time_ms,
                                    r.legacy_id,
                                ],
                            );
                            match result {
                                Ok(_) => saved.push(Detection {
                                    id: conn.last_insert_rowid(),
                                    label_id: r.label_id,
                                    model_id: r.model_id,
                                    source_id: r.source_id,
                                    weather_id: r.weather_id,
                                    detected_at: r.detected_at,
                                    begin_time: r.begin_time,
                                    end_time: r.end_time,
                                    confidence: r.confidence,
                                    latitude: r.latitude,
                                    longitude: r.longitude,
                                    clip_name: r.clip_name.clone(),
                                    processing_time_ms: r.processing_time_ms,
                                    legacy_id: r.legacy_id,
                                }),
                                Err(e) => {
                                    conn.execute_batch("ROLLBACK")?;
                                    return Err(e);
                                }
                            }
                        }
                        conn.execute_batch("COMMIT")?;
                        Ok(saved)
                    })
                    .await
            }
            Backend::MySql(_) => {
                use mysql_async::prelude::*;
                let mut conn = self.manager.mysql_conn().await?;
                let mut tx = conn.start_transaction(mysql_async::TxOpts::default()).await?;
                let mut saved = Vec::with_capacity(rows.len());
                for r in &rows {
                    let result = tx
                        .exec_drop(
                            "INSERT INTO detections
                                (label_id, model_id, source_id, weather_id, detected_at, begin_time, end_time,
                                 confidence, latitude, longitude, clip_name, processing_time_ms, legacy_id)
                             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                            vec![
                                mysql_async::Value::from(r.label_id),
                                mysql_async::Value::from(r.model_id),
                                mysql_async::Value::from(r.source_id),
                                mysql_async::Value::from(r.weather_id),
                                mysql_async::Value::from(r.detected_at),
                                mysql_async::Value::from(r.begin_time),
                                mysql_async::Value::from(r.end_time),
                                mysql_async::Value::from(r.confidence),
                                mysql_async::Value::from(r.latitude),
                                mysql_async::Value::from(r.longitude),
                                mysql_async::Value::from(r.clip_name.clone()),
                                mysql_async::Value::from(r.processing_time_ms),
                                mysql_async::Value::from(r.legacy_id),
                            ],
                        )
                        .await;
                    match result {
                        Ok(()) => {
                            let id = tx.last_insert_id().unwrap_or_default() as i64;
                            saved.push(Detection {
                                id,
                                label_id: r.label_id,
                                model_id: r.model_id,
                                source_id: r.source_id,
                                weather_id: r.weather_id,
                                detected_at: r.detected_at,
                                begin_time: r.begin_time,
                                end_time: r.end_time,
                                confidence: r.confidence,
                                latitude: r.latitude,
                                longitude: r.longitude,
                                clip_name: r.clip_name.clone(),
                                processing_time_ms: r.processing_time_ms,
                                legacy_id: r.legacy_id,
                            });
                        }
                        Err(e) => {
                            tx.rollback().await?;
                            return Err(StoreError::from(e));
                        }
                    }
                }
                tx.commit().await?;
                Ok(saved)
            }
        }
    }

    pub async fn get_with_relations(&self, id: i64) -> Result<DetectionWithRelations> {
        let detection = self.by_id(id).await?;
        let label = self.labels.by_id(detection.label_id).await?;
        let model = self.models_by_id(detection.model_id).await?;
        let source_safe_string = match detection.source_id {
            Some(source_id) => Some(self.sources.by_id(source_id).await?.safe_string),
            None => None,
        };
        Ok(DetectionWithRelations {
            detection,
            label,
            model,
            source_safe_string,
        })
    }

    async fn models_by_id(&self, id: i64) -> Result<Model> {
        match self.manager.backend() {
            Backend::Sqlite(_) => {
                self.manager
                    .with_sqlite(OpKind::Read, move |conn| {
                        conn.query_row(
                            "SELECT id, name, version, variant FROM models WHERE id = ?1",
                            rusqlite::params![id],
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
                let row: Option<(i64, String, String, String)> = conn
                    .exec_first("SELECT id, name, version, variant FROM models WHERE id = ?", (id,))
                    .await?;
                row.map(|(id, name, version, variant)| Model { id, name, version, variant })
                    .ok_or_else(|| StoreError::not_found(format!("model {id}")))
            }
        }
    }

    pub async fn by_id(&self, id: i64) -> Result<Detection> {
        match self.manager.backend() {
            Backend::Sqlite(_) => {
                self.manager
                    .with_sqlite(OpKind::Read, move |conn| {
                        conn.query_row(
                            "SELECT id, label_id, model_id, source_id, weather_id, detected_at, begin_time,
                                    end_time, confidence, latitude, longitude, clip_name, processing_time_ms, legacy_id
                             FROM detections WHERE id = ?1",
                            rusqlite::params![id],
                            row_to_detection,
                        )
                    })
                    .await
            }
            Backend::MySql(_) => {
                use mysql_async::prelude::*;
                let mut conn = self.manager.mysql_conn().await?;
                let row: Option<DetectionRow> = conn
                    .exec_first(
                        "SELECT id, label_id, model_id, source_id, weather_id, detected_at, begin_time,
                                end_time, confidence, latitude, longitude, clip_name, processing_time_ms, legacy_id
                         FROM detections WHERE id = ?",
                        (id,),
                    )
                    .await?;
                row.map(Into::into).ok_or_else(|| StoreError::not_found(format!("detection {id}")))
            }
        }
    }

    /// Looks up a detection by its legacy row id, if one was ever recorded.
    /// Used by the migration worker to recognize a detection that a
    /// dual-write mirror already copied, so a later batch copy pass doesn't
    /// try to insert it again and trip the `legacy_id` unique constraint.
    pub async fn by_legacy_id(&self, legacy_id: i64) -> Result<Option<Detection>> {
        match self.manager.backend() {
            Backend::Sqlite(_) => {
                self.manager
                    .with_sqlite(OpKind::Read, move |conn| {
                        let mut stmt = conn.prepare(
                            "SELECT id, label_id, model_id, source_id, weather_id, detected_at, begin_time,
                                    end_time, confidence, latitude, longitude, clip_name, processing_time_ms, legacy_id
                             FROM detections WHERE legacy_id = ?1",
                        )?;
                        let mut rows = stmt.query(rusqlite::params![legacy_id])?;
                        match rows.next()? {
                            Some(row) => Ok(Some(row_to_detection(row)?)),
                            None => Ok(None),
                        }
                    })
                    .await
            }
            Backend::MySql(_) => {
                use mysql_async::prelude::*;
                let mut conn = self.manager.mysql_conn().await?;
                let row: Option<DetectionRow> = conn
                    .exec_first(
                        "SELECT id, label_id, model_id, source_id, weather_id, detected_at, begin_time,
                                end_time, confidence, latitude, longitude, clip_name, processing_time_ms, legacy_id
                         FROM detections WHERE legacy_id = ?",
                        (legacy_id,),
                    )
                    .await?;
                Ok(row.map(Into::into))
            }
        }
    }

    /// All detections for one species, most recent first.
    pub async fn species_detections(&self, scientific_name: &str, limit: i64) -> Result<Vec<Detection>> {
        let label = self
            .labels
            .by_scientific_name(scientific_name)
            .await?
            .ok_or_else(|| StoreError::not_found(format!("label {scientific_name}")))?;
        match self.manager.backend() {
            Backend::Sqlite(_) => {
                self.manager
                    .with_sqlite(OpKind::Read, move |conn| {
                        let mut stmt = conn.prepare(
                            "SELECT id, label_id, model_id, source_id, weather_id, detected_at, begin_time,
                                    end_time, confidence, latitude, longitude, clip_name, processing_time_ms, legacy_id
                             FROM detections WHERE label_id = ?1 ORDER BY detected_at DESC LIMIT ?2",
                        )?;
                        let rows = stmt.query_map(rusqlite::params![label.id, limit], row_to_detection)?;
                        rows.collect::<rusqlite::Result<Vec<_>>>()
                    })
                    .await
            }
            Backend::MySql(_) => {
                use mysql_async::prelude::*;
                let mut conn = self.manager.mysql_conn().await?;
                let rows: Vec<DetectionRow> = conn
                    .exec(
                        "SELECT id, label_id, model_id, source_id, weather_id, detected_at, begin_time,
                                end_time, confidence, latitude, longitude, clip_name, processing_time_ms, legacy_id
                         FROM detections WHERE label_id = ? ORDER BY detected_at DESC LIMIT ?",
                        (label.id, limit),
                    )
                    .await?;
                Ok(rows.into_iter().map(Into::into).collect())
            }
        }
    }

    /// Hourly detection counts between `since` (inclusive) and `until`
    /// (exclusive), bucketed by floor-to-hour of `detected_at` — input for
    /// the inspector's detection-rate histogram.
    pub async fn get_hourly_detections(&self, since: i64, until: i64) -> Result<Vec<HourlyCount>> {
        match self.manager.backend() {
            Backend::Sqlite(_) => {
                self.manager
                    .with_sqlite(OpKind::Read, move |conn| {
                        let mut stmt = conn.prepare(
                            "SELECT (detected_at / 3600) * 3600 AS bucket, COUNT(*)
                             FROM detections WHERE detected_at >= ?1 AND detected_at < ?2
                             GROUP BY bucket ORDER BY bucket ASC",
                        )?;
                        let rows = stmt.query_map(rusqlite::params![since, until], |row| {
                            Ok(HourlyCount {
                                hour_bucket: row.get(0)?,
                                count: row.get(1)?,
                            })
                        })?;
                        rows.collect::<rusqlite::Result<Vec<_>>>()
                    })
                    .await
            }
            Backend::MySql(_) => {
                use mysql_async::prelude::*;
                let mut conn = self.manager.mysql_conn().await?;
                let rows: Vec<(i64, i64)> = conn
                    .exec(
                        "SELECT FLOOR(detected_at / 3600) * 3600 AS bucket, COUNT(*)
                         FROM detections WHERE detected_at >= ? AND detected_at < ?
                         GROUP BY bucket ORDER BY bucket ASC",
                        (since, until),
                    )
                    .await?;
                Ok(rows
                    .into_iter()
                    .map(|(hour_bucket, count)| HourlyCount { hour_bucket, count })
                    .collect())
            }
        }
    }

    /// Filtered, paginated search. `scientific_name` matches exactly (the
    /// caller is responsible for splitting a legacy concatenated form
    /// first); confidence/date filters are optional lower/range bounds.
    pub async fn search(&self, filter: &SearchFilter) -> Result<Vec<Detection>> {
        let limit = if filter.limit <= 0 { 100 } else { filter.limit };
        let label_id = match &filter.scientific_name {
            Some(name) => Some(
                self.labels
                    .by_scientific_name(name)
                    .await?
                    .ok_or_else(|| StoreError::not_found(format!("label {name}")))?
                    .id,
            ),
            None => None,
        };
        let min_confidence = filter.min_confidence.unwrap_or(0.0);
        let since = filter.since.unwrap_or(0);
        let until = filter.until.unwrap_or(i64::MAX);
        let offset = filter.offset.max(0);

        match self.manager.backend() {
            Backend::Sqlite(_) => {
                self.manager
                    .with_sqlite(OpKind::Read, move |conn| {
                        let mut stmt = conn.prepare(
                            "SELECT id, label_id, model_id, source_id, weather_id, detected_at, begin_time,
                                    end_time, confidence, latitude, longitude, clip_name, processing_time_ms, legacy_id
                             FROM detections
                             WHERE (?1 IS NULL OR label_id = ?1)
                               AND confidence >= ?2
                               AND detected_at >= ?3 AND detected_at < ?4
                             ORDER BY detected_at DESC LIMIT ?5 OFFSET ?6",
                        )?;
                        let rows = stmt.query_map(
                            rusqlite::params![label_id, min_confidence, since, until, limit, offset],
                            row_to_detection,
                        )?;
                        rows.collect::<rusqlite::Result<Vec<_>>>()
                    })
                    .await
            }
            Backend::MySql(_) => {
                use mysql_async::prelude::*;
                let mut conn = self.manager.mysql_conn().await?;
                let rows: Vec<DetectionRow> = conn
                    .exec(
                        "SELECT id, label_id, model_id, source_id, weather_id, detected_at, begin_time,
                                end_time, confidence, latitude, longitude, clip_name, processing_time_ms, legacy_id
                         FROM detections
                         WHERE (? IS NULL OR label_id = ?)
                           AND confidence >= ? AND detected_at >= ? AND detected_at < ?
                         ORDER BY detected_at DESC LIMIT ? OFFSET ?",
                        (label_id, label_id, min_confidence, since, until, limit, offset),
                    )
                    .await?;
                Ok(rows.into_iter().map(Into::into).collect())
            }
        }
    }

    /// Top-N species by detection count in `[since, until)` with confidence
    /// at or above `min_confidence`. `common_name` is derived through the
    /// caller-supplied lookup the same way `get_with_relations`/
    /// `LegacyAdapter` derive it, falling back to the scientific name.
    pub async fn top_birds(
        &self,
        since: i64,
        until: i64,
        min_confidence: f64,
        limit: i64,
        common_name_lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Vec<SpeciesCount>> {
        let rows: Vec<(String, i64)> = match self.manager.backend() {
            Backend::Sqlite(_) => {
                self.manager
                    .with_sqlite(OpKind::Read, move |conn| {
                        let mut stmt = conn.prepare(
                            "SELECT l.scientific_name, COUNT(*) AS n
                             FROM detections d JOIN labels l ON l.id = d.label_id
                             WHERE d.detected_at >= ?1 AND d.detected_at < ?2 AND d.confidence >= ?3
                             GROUP BY l.scientific_name ORDER BY n DESC LIMIT ?4",
                        )?;
                        let rows = stmt.query_map(rusqlite::params![since, until, min_confidence, limit], |row| {
                            Ok((row.get(0)?, row.get(1)?))
                        })?;
                        rows.collect::<rusqlite::Result<Vec<_>>>()
                    })
                    .await?
            }
            Backend::MySql(_) => {
                use mysql_async::prelude::*;
                let mut conn = self.manager.mysql_conn().await?;
                conn.exec(
                    "SELECT l.scientific_name, COUNT(*) AS n
                     FROM detections d JOIN labels l ON l.id = d.label_id
                     WHERE d.detected_at >= ? AND d.detected_at < ? AND d.confidence >= ?
                     GROUP BY l.scientific_name ORDER BY n DESC LIMIT ?",
                    (since, until, min_confidence, limit),
                )
                .await?
            }
        };
        Ok(rows
            .into_iter()
            .map(|(scientific_name, count)| {
                let common_name = common_name_lookup(&scientific_name).unwrap_or_else(|| scientific_name.clone());
                SpeciesCount { scientific_name, common_name, count }
            })
            .collect())
    }

    /// Ids of detections whose scientific name contains `query` as a
    /// substring (a full scan when `query` is `None`), ordered by
    /// `detected_at` in either direction. Unlike `search`/`SearchFilter`,
    /// which matches a label exactly and always sorts descending, this
    /// backs the legacy flat API's free-text, direction-toggleable search.
    pub async fn search_ids_by_name(
        &self,
        query: Option<&str>,
        ascending: bool,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<i64>> {
        let limit = if limit <= 0 { 100 } else { limit };
        let offset = offset.max(0);
        let pattern = query.map(|q| format!("%{q}%"));
        let order = if ascending { "ASC" } else { "DESC" };

        match self.manager.backend() {
            Backend::Sqlite(_) => {
                let sql = format!(
                    "SELECT d.id FROM detections d JOIN labels l ON l.id = d.label_id
                     WHERE (?1 IS NULL OR l.scientific_name LIKE ?1)
                     ORDER BY d.detected_at {order} LIMIT ?2 OFFSET ?3"
                );
                self.manager
                    .with_sqlite(OpKind::Read, move |conn| {
                        let mut stmt = conn.prepare(&sql)?;
                        let rows = stmt.query_map(rusqlite::params![pattern, limit, offset], |row| row.get(0))?;
                        rows.collect::<rusqlite::Result<Vec<_>>>()
                    })
                    .await
            }
            Backend::MySql(_) => {
                use mysql_async::prelude::*;
                let mut conn = self.manager.mysql_conn().await?;
                let sql = format!(
                    "SELECT d.id FROM detections d JOIN labels l ON l.id = d.label_id
                     WHERE (? IS NULL OR l.scientific_name LIKE ?)
                     ORDER BY d.detected_at {order} LIMIT ? OFFSET ?"
                );
                Ok(conn.exec(sql, (pattern.clone(), pattern, limit, offset)).await?)
            }
        }
    }

    /// Distinct species that have at least one detection. Delegates to
    /// `LabelRepository` since it's purely a label-table query joined
    /// against detections.
    pub async fn all_detected_species(&self) -> Result<Vec<Label>> {
        self.labels.all_detected().await
    }

    /// Deletes a detection and its review/lock/comments. SQLite enforces
    /// this via `ON DELETE CASCADE` foreign keys declared on those tables;
    /// MySQL does the same through its own `FOREIGN KEY ... ON DELETE
    /// CASCADE` clauses, so a single `DELETE` suffices on both engines.
    pub async fn delete(&self, id: i64) -> Result<()> {
        match self.manager.backend() {
            Backend::Sqlite(_) => {
                self.manager
                    .with_sqlite(OpKind::Write, move |conn| {
                        let affected = conn.execute("DELETE FROM detections WHERE id = ?1", rusqlite::params![id])?;
                        if affected == 0 {
                            return Err(rusqlite::Error::QueryReturnedNoRows);
                        }
                        Ok(())
                    })
                    .await
            }
            Backend::MySql(_) => {
                use mysql_async::prelude::*;
                let mut conn = self.manager.mysql_conn().await?;
                conn.exec_drop("DELETE FROM detections WHERE id = ?", (id,)).await?;
                if conn.affected_rows() == 0 {
                    return Err(StoreError::not_found(format!("detection {id}")));
                }
                Ok(())
            }
        }
    }
}

fn row_to_detection(row: &rusqlite::Row) -> rusqlite::Result<Detection> {
    Ok(Detection {
        id: row.get(0)?,
        label_id: row.get(1)?,
        model_id: row.get(2)?,
        source_id: row.get(3)?,
        weather_id: row.get(4)?,
        detected_at: row.get(5)?,
        begin_time: row.get(6)?,
        end_time: row.get(7)?,
        confidence: row.get(8)?,
        latitude: row.get(9)?,
        longitude: row.get(10)?,
        clip_name: row.get(11)?,
        processing_time_ms: row.get(12)?,
        legacy_id: row.get(13)?,
    })
}

/// Row shape for the 14-column detections SELECT used across this
/// repository. `mysql_common`'s built-in tuple `FromRow` impls stop at 12
/// elements, so this column set is parsed by hand via indexed `row.get`.
#[derive(Debug, Clone)]
struct DetectionRow {
    id: i64,
    label_id: i64,
    model_id: i64,
    source_id: Option<i64>,
    weather_id: Option<i64>,
    detected_at: i64,
    begin_time: i64,
    end_time: i64,
    confidence: f64,
    latitude: f64,
    longitude: f64,
    clip_name: Option<String>,
    processing_time_ms: i64,
    legacy_id: Option<i64>,
}

impl mysql_async::prelude::FromRow for DetectionRow {
    fn from_row_opt(row: mysql_async::Row) -> std::result::Result<Self, mysql_async::FromRowError> {
        let err = || mysql_async::FromRowError(row.clone());
        Ok(DetectionRow {
            id: row.get(0).ok_or_else(err)?,
            label_id: row.get(1).ok_or_else(err)?,
            model_id: row.get(2).ok_or_else(err)?,
            source_id: row.get(3).ok_or_else(err)?,
            weather_id: row.get(4).ok_or_else(err)?,
            detected_at: row.get(5).ok_or_else(err)?,
            begin_time: row.get(6).ok_or_else(err)?,
            end_time: row.get(7).ok_or_else(err)?,
            confidence: row.get(8).ok_or_else(err)?,
            latitude: row.get(9).ok_or_else(err)?,
            longitude: row.get(10).ok_or_else(err)?,
            clip_name: row.get(11).ok_or_else(err)?,
            processing_time_ms: row.get(12).ok_or_else(err)?,
            legacy_id: row.get(13).ok_or_else(err)?,
        })
    }
}

impl From<DetectionRow> for Detection {
    fn from(row: DetectionRow) -> Self {
        Detection {
            id: row.id,
            label_id: row.label_id,
            model_id: row.model_id,
            source_id: row.source_id,
            weather_id: row.weather_id,
            detected_at: row.detected_at,
            begin_time: row.begin_time,
            end_time: row.end_time,
            confidence: row.confidence,
            latitude: row.latitude,
            longitude: row.longitude,
            clip_name: row.clip_name,
            processing_time_ms: row.processing_time_ms,
            legacy_id: row.legacy_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EngineConfig, StoreConfig};

    async fn test_manager() -> Arc<DatabaseManager> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("detections.db");
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

    fn sample_input() -> DetectionInput {
        DetectionInput {
            scientific_name: "Turdus merula".to_string(),
            model_name: Model::DEFAULT_NAME.to_string(),
            model_version: Model::DEFAULT_VERSION.to_string(),
            model_variant: Model::DEFAULT_VARIANT.to_string(),
            source: Some("rtsp_camera1".to_string()),
            detected_at: 1_700_000_000,
            begin_time: 1_700_000_000,
            end_time: 1_700_000_003,
            confidence: 0.91,
            latitude: 60.1,
            longitude: 24.9,
            clip_name: Some("clip.wav".to_string()),
            processing_time_ms: 42,
            legacy_id: None,
        }
    }

    #[tokio::test]
    async fn save_then_get_with_relations_round_trips() {
        let manager = test_manager().await;
        let repo = DetectionRepository::new(manager);
        let saved = repo.save(sample_input(), None).await.unwrap();
        let fetched = repo.get_with_relations(saved.id).await.unwrap();
        assert_eq!(fetched.label.scientific_name, "Turdus merula");
        assert_eq!(fetched.source_safe_string.as_deref(), Some("rtsp_camera1"));
    }

    #[tokio::test]
    async fn save_rejects_misaligned_detected_at() {
        let manager = test_manager().await;
        let repo = DetectionRepository::new(manager);
        let mut input = sample_input();
        input.detected_at = input.begin_time + 20;
        let err = repo.save(input, None).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn delete_removes_row_and_cascades() {
        let manager = test_manager().await;
        let repo = DetectionRepository::new(manager.clone());
        let saved = repo.save(sample_input(), None).await.unwrap();

        let reviews = crate::repositories::ReviewRepository::new(manager.clone());
        reviews.upsert(saved.id, "correct", 1_700_000_100).await.unwrap();

        repo.delete(saved.id).await.unwrap();
        assert!(repo.by_id(saved.id).await.is_err());
        assert!(reviews.by_detection(saved.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn top_birds_orders_by_count_descending() {
        let manager = test_manager().await;
        let repo = DetectionRepository::new(manager);
        repo.save(sample_input(), None).await.unwrap();
        let mut second = sample_input();
        second.scientific_name = "Parus major".to_string();
        repo.save(second, None).await.unwrap();
        repo.save(sample_input(), None).await.unwrap();

        let top = repo.top_birds(0, i64::MAX, 0.0, 10, |_| None).await.unwrap();
        assert_eq!(top[0].scientific_name, "Turdus merula");
        assert_eq!(top[0].common_name, "Turdus merula");
        assert_eq!(top[0].count, 2);
    }

    #[tokio::test]
    async fn top_birds_filters_below_min_confidence() {
        let manager = test_manager().await;
        let repo = DetectionRepository::new(manager);
        let mut low = sample_input();
        low.confidence = 0.1;
        repo.save(low, None).await.unwrap();

        let top = repo
            .top_birds(0, i64::MAX, 0.5, 10, |name| {
                if name == "Turdus merula" { Some("Eurasian Blackbird".to_string()) } else { None }
            })
            .await
            .unwrap();
        assert!(top.is_empty());
    }
}
