//! The flat legacy schema: a single `notes` table plus a simple
//! `comments` table, mirroring the pre-normalization shape the migration
//! copies away from. Kept alive during dual-write so existing callers of
//! the legacy `Interface` keep working unchanged until cutover.

pub mod adapter;

use std::sync::Arc;

use crate::counters::OpKind;
use crate::error::{Result, StoreError};
use crate::manager::{Backend, DatabaseManager, Engine};
use crate::models::{DynamicThreshold, Label, Note, NoteComment};
use crate::repositories::{LabelRepository, NotificationRepository, SpeciesCount, ThresholdRepository};

/// Snapshot for `get_database_stats`: a cheap, engine-agnostic summary an
/// ops dashboard polls without pulling in the full inspector.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DatabaseStats {
    pub engine: Engine,
    pub total_detections: i64,
    pub size_bytes: i64,
    pub connected: bool,
}

/// The legacy flat-schema API surface. `Datastore` (v2) and
/// `LegacyStore` both implement this so the `MigrationEngine` and
/// `StorageFacade` can treat them interchangeably.
#[async_trait::async_trait]
pub trait Interface: Send + Sync {
    async fn save(&self, note: &Note) -> Result<Note>;
    async fn get(&self, id: i64) -> Result<Note>;
    async fn delete(&self, id: i64) -> Result<()>;
    async fn count(&self) -> Result<i64>;
    async fn all_ids(&self) -> Result<Vec<i64>>;

    async fn search(&self, query: Option<&str>, ascending: bool, limit: i64, offset: i64) -> Result<Vec<Note>>;
    async fn species_detections(&self, scientific_name: &str, limit: i64) -> Result<Vec<Note>>;
    async fn get_hourly_detections(&self, since: i64, until: i64) -> Result<Vec<Note>>;
    async fn get_last_detections(&self, n: i64) -> Result<Vec<Note>>;
    async fn get_all_notes(&self) -> Result<Vec<Note>>;
    async fn get_all_detected_species(&self) -> Result<Vec<Label>>;
    async fn get_top_birds_data(
        &self,
        since: i64,
        until: i64,
        min_confidence: f64,
        limit: i64,
    ) -> Result<Vec<SpeciesCount>>;

    async fn set_review(&self, detection_id: i64, verdict: &str, created_at: i64) -> Result<()>;
    async fn add_comment(&self, detection_id: i64, body: &str, created_at: i64) -> Result<NoteComment>;
    async fn delete_comment(&self, comment_id: i64) -> Result<()>;
    async fn lock(&self, detection_id: i64, locked_at: i64) -> Result<()>;
    async fn unlock(&self, detection_id: i64) -> Result<()>;

    async fn threshold_by_common_name(&self, common_name: &str) -> Result<Option<DynamicThreshold>>;
    async fn upsert_threshold(&self, threshold: &DynamicThreshold) -> Result<()>;
    async fn delete_dynamic_threshold(&self, common_name: &str) -> Result<()>;
    async fn record_notification_sent(
        &self,
        common_name: &str,
        notification_type: &str,
        last_sent_at: i64,
        expires_at: i64,
    ) -> Result<()>;
    async fn is_notification_suppressed(&self, common_name: &str, notification_type: &str, now: i64) -> Result<bool>;

    async fn get_database_stats(&self) -> Result<DatabaseStats>;
}

/// A SQLite-only flat store: one `notes` table with an embedded comments
/// table, independent of the v2 schema entirely. Exists purely as the
/// dual-write source and migration read-side; never gains new features.
///
/// Threshold/notification state lives in the v2 schema's `labels` /
/// `dynamic_thresholds` / `notification_history` tables even here, since
/// those tables share the same physical connection as `legacy_notes` —
/// there's no separate "legacy" copy of that state to maintain.
pub struct LegacyStore {
    manager: Arc<DatabaseManager>,
    labels: LabelRepository,
    thresholds: ThresholdRepository,
    notifications: NotificationRepository,
}

impl LegacyStore {
    pub fn new(manager: Arc<DatabaseManager>) -> Self {
        Self {
            labels: LabelRepository::new(manager.clone()),
            thresholds: ThresholdRepository::new(manager.clone()),
            notifications: NotificationRepository::new(manager.clone()),
            manager,
        }
    }

    /// A row's `scientific_name` for a given `common_name`, read straight off
    /// `legacy_notes` since that table stores both columns directly — no
    /// external label map needed the way `LegacyAdapter` needs one.
    async fn resolve_scientific_name(&self, common_name: &str) -> Result<Option<String>> {
        match self.manager.backend() {
            Backend::Sqlite(_) => {
                let common_name = common_name.to_string();
                self.manager
                    .with_sqlite(OpKind::Read, move |conn| {
                        let mut stmt = conn.prepare(
                            "SELECT DISTINCT scientific_name FROM legacy_notes WHERE common_name = ?1 LIMIT 1",
                        )?;
                        let mut rows = stmt.query(rusqlite::params![common_name])?;
                        match rows.next()? {
                            Some(row) => Ok(Some(row.get(0)?)),
                            None => Ok(None),
                        }
                    })
                    .await
            }
            Backend::MySql(_) => {
                use mysql_async::prelude::*;
                let mut conn = self.manager.mysql_conn().await?;
                Ok(conn
                    .exec_first(
                        "SELECT DISTINCT scientific_name FROM legacy_notes WHERE common_name = ? LIMIT 1",
                        (common_name,),
                    )
                    .await?)
            }
        }
    }

    /// Resolves a human-supplied common name all the way to a v2 `label_id`,
    /// via `legacy_notes` then `labels`. `NotFound` covers both a common
    /// name never seen in `legacy_notes` and a species not yet interned
    /// into the v2 schema.
    async fn label_id_for_common_name(&self, common_name: &str) -> Result<i64> {
        let scientific_name = self
            .resolve_scientific_name(common_name)
            .await?
            .ok_or_else(|| StoreError::not_found(format!("species {common_name}")))?;
        self.labels
            .by_scientific_name(&scientific_name)
            .await?
            .map(|l| l.id)
            .ok_or_else(|| StoreError::not_found(format!("label {scientific_name}")))
    }

    /// Ids greater than `watermark`, ascending, capped at `limit` — the
    /// migration batch copier's cursor query. Unlike re-listing every id and
    /// slicing it in memory, this scales with the batch size rather than
    /// the whole table.
    pub async fn ids_after(&self, watermark: i64, limit: usize) -> Result<Vec<i64>> {
        match self.manager.backend() {
            Backend::Sqlite(_) => {
                self.manager
                    .with_sqlite(OpKind::Read, move |conn| {
                        let mut stmt =
                            conn.prepare("SELECT id FROM legacy_notes WHERE id > ?1 ORDER BY id ASC LIMIT ?2")?;
                        let rows = stmt.query_map(rusqlite::params![watermark, limit as i64], |row| row.get(0))?;
                        rows.collect::<rusqlite::Result<Vec<_>>>()
                    })
                    .await
            }
            Backend::MySql(_) => {
                use mysql_async::prelude::*;
                let mut conn = self.manager.mysql_conn().await?;
                Ok(conn
                    .exec(
                        "SELECT id FROM legacy_notes WHERE id > ? ORDER BY id ASC LIMIT ?",
                        (watermark, limit as i64),
                    )
                    .await?)
            }
        }
    }

    /// Creates the legacy tables if absent. Called once at startup
    /// alongside `DatabaseManager::initialize`; a no-op once the legacy
    /// file has been cleaned up post-cutover.
    pub async fn ensure_schema(&self) -> Result<()> {
        match self.manager.backend() {
            Backend::Sqlite(_) => {
                self.manager
                    .with_sqlite(OpKind::Write, |conn| {
                        conn.execute_batch(
                            "
                            CREATE TABLE IF NOT EXISTS legacy_notes (
                                id                  INTEGER PRIMARY KEY AUTOINCREMENT,
                                scientific_name     TEXT NOT NULL,
                                common_name         TEXT NOT NULL,
                                confidence          REAL NOT NULL,
                                detected_at         INTEGER NOT NULL,
                                begin_time          INTEGER NOT NULL,
                                end_time            INTEGER NOT NULL,
                                latitude            REAL NOT NULL,
                                longitude           REAL NOT NULL,
                                clip_name           TEXT,
                                processing_time_ms  INTEGER NOT NULL DEFAULT 0,
                                source              TEXT,
                                verified            TEXT,
                                locked              INTEGER NOT NULL DEFAULT 0
                            );
                            CREATE TABLE IF NOT EXISTS legacy_comments (
                                id           INTEGER PRIMARY KEY AUTOINCREMENT,
                                note_id      INTEGER NOT NULL REFERENCES legacy_notes(id) ON DELETE CASCADE,
                                body         TEXT NOT NULL,
                                created_at   INTEGER NOT NULL
                            );
                            ",
                        )
                    })
                    .await
            }
            Backend::MySql(_) => {
                use mysql_async::prelude::*;
                let mut conn = self.manager.mysql_conn().await?;
                conn.query_drop(
                    "CREATE TABLE IF NOT EXISTS legacy_notes (
                        id BIGINT AUTO_INCREMENT PRIMARY KEY,
                        scientific_name VARCHAR(255) NOT NULL,
                        common_name VARCHAR(255) NOT NULL,
                        confidence DOUBLE NOT NULL,
                        detected_at BIGINT NOT NULL,
                        begin_time BIGINT NOT NULL,
                        end_time BIGINT NOT NULL,
                        latitude DOUBLE NOT NULL,
                        longitude DOUBLE NOT NULL,
                        clip_name VARCHAR(512) NULL,
                        processing_time_ms BIGINT NOT NULL DEFAULT 0,
                        source VARCHAR(255) NULL,
                        verified VARCHAR(64) NULL,
                        locked TINYINT NOT NULL DEFAULT 0
                    ) ENGINE=InnoDB",
                )
                .await
                .map_err(StoreError::from)?;
                conn.query_drop(
                    "CREATE TABLE IF NOT EXISTS legacy_comments (
                        id BIGINT AUTO_INCREMENT PRIMARY KEY,
                        note_id BIGINT NOT NULL,
                        body TEXT NOT NULL,
                        created_at BIGINT NOT NULL,
                        FOREIGN KEY (note_id) REFERENCES legacy_notes(id) ON DELETE CASCADE
                    ) ENGINE=InnoDB",
                )
                .await
                .map_err(StoreError::from)?;
                Ok(())
            }
        }
    }
}

#[async_trait::async_trait]
impl Interface for LegacyStore {
    async fn save(&self, note: &Note) -> Result<Note> {
        let note = note.clone();
        match self.manager.backend() {
            Backend::Sqlite(_) => {
                self.manager
                    .with_sqlite(OpKind::Write, move |conn| {
                        conn.execute(
                            "INSERT INTO legacy_notes
                                (scientific_name, common_name, confidence, detected_at, begin_time, end_time,
                                 latitude, longitude, clip_name, processing_time_ms, source, verified, locked)
                             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                            rusqlite::params![
                                note.scientific_name,
                                note.common_name,
                                note.confidence,
                                note.detected_at,
                                note.begin_time,
                                note.end_time,
                                note.latitude,
                                note.longitude,
                                note.clip_name,
                                note.processing_time_ms,
                                note.source,
                                note.verified,
                                note.locked,
                            ],
                        )?;
                        let id = conn.last_insert_rowid();
                        Ok(Note { id, ..note })
                    })
                    .await
            }
            Backend::MySql(_) => {
                use mysql_async::prelude::*;
                let mut conn = self.manager.mysql_conn().await?;
                conn.exec_drop(
                    "INSERT INTO legacy_notes
                        (scientific_name, common_name, confidence, detected_at, begin_time, end_time,
                         latitude, longitude, clip_name, processing_time_ms, source, verified, locked)
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                    vec![
                        mysql_async::Value::from(&note.scientific_name),
                        mysql_async::Value::from(&note.common_name),
                        mysql_async::Value::from(note.confidence),
                        mysql_async::Value::from(note.detected_at),
                        mysql_async::Value::from(note.begin_time),
                        mysql_async::Value::from(note.end_time),
                        mysql_async::Value::from(note.latitude),
                        mysql_async::Value::from(note.longitude),
                        mysql_async::Value::from(note.clip_name.clone()),
                        mysql_async::Value::from(note.processing_time_ms),
                        mysql_async::Value::from(note.source.clone()),
                        mysql_async::Value::from(note.verified.clone()),
                        mysql_async::Value::from(note.locked),
                    ],
                )
                .await?;
                let id = conn.last_insert_id().unwrap_or_default() as i64;
                Ok(Note { id, ..note })
            }
        }
    }

    async fn get(&self, id: i64) -> Result<Note> {
        match self.manager.backend() {
            Backend::Sqlite(_) => {
                self.manager
                    .with_sqlite(OpKind::Read, move |conn| {
                        let note = conn.query_row(
                            "SELECT id, scientific_name, common_name, confidence, detected_at, begin_time, end_time,
                                    latitude, longitude, clip_name, processing_time_ms, source, verified, locked
                             FROM legacy_notes WHERE id = ?1",
                            rusqlite::params![id],
                            |row| {
                                Ok(Note {
                                    id: row.get(0)?,
                                    scientific_name: row.get(1)?,
                                    common_name: row.get(2)?,
                                    confidence: row.get(3)?,
                                    detected_at: row.get(4)?,
                                    begin_time: row.get(5)?,
                                    end_time: row.get(6)?,
                                    latitude: row.get(7)?,
                                    longitude: row.get(8)?,
                                    clip_name: row.get(9)?,
                                    processing_time_ms: row.get(10)?,
                                    source: row.get(11)?,
                                    verified: row.get(12)?,
                                    locked: row.get(13)?,
                                    comments: Vec::new(),
                                })
                            },
                        )?;
                        let mut stmt = conn.prepare(
                            "SELECT id, note_id, body, created_at FROM legacy_comments
                             WHERE note_id = ?1 ORDER BY created_at ASC",
                        )?;
                        let comments = stmt
                            .query_map(rusqlite::params![id], |row| {
                                Ok(NoteComment {
                                    id: row.get(0)?,
                                    detection_id: row.get(1)?,
                                    body: row.get(2)?,
                                    created_at: row.get(3)?,
                                })
                            })?
                            .collect::<rusqlite::Result<Vec<_>>>()?;
                        Ok(Note { comments, ..note })
                    })
                    .await
            }
            Backend::MySql(_) => {
                use mysql_async::prelude::*;
                let mut conn = self.manager.mysql_conn().await?;
                let row: Option<LegacyNoteRow> = conn
                    .exec_first(
                        "SELECT id, scientific_name, common_name, confidence, detected_at, begin_time, end_time,
                                latitude, longitude, clip_name, processing_time_ms, source, verified, locked
                         FROM legacy_notes WHERE id = ?",
                        (id,),
                    )
                    .await?;
                let LegacyNoteRow { id, scientific_name, common_name, confidence, detected_at, begin_time, end_time, latitude, longitude, clip_name, processing_time_ms, source, verified, locked } =
                    row.ok_or_else(|| StoreError::not_found(format!("note {id}")))?;
                let comment_rows: Vec<(i64, i64, String, i64)> = conn
                    .exec(
                        "SELECT id, note_id, body, created_at FROM legacy_comments
                         WHERE note_id = ? ORDER BY created_at ASC",
                        (id,),
                    )
                    .await?;
                let comments = comment_rows
                    .into_iter()
                    .map(|(id, detection_id, body, created_at)| NoteComment { id, detection_id, body, created_at })
                    .collect();
                Ok(Note {
                    id,
                    scientific_name,
                    common_name,
                    confidence,
                    detected_at,
                    begin_time,
                    end_time,
                    latitude,
                    longitude,
                    clip_name,
                    processing_time_ms,
                    source,
                    verified,
                    locked,
                    comments,
                })
            }
        }
    }

    async fn delete(&self, id: i64) -> Result<()> {
        match self.manager.backend() {
            Backend::Sqlite(_) => {
                self.manager
                    .with_sqlite(OpKind::Write, move |conn| {
                        let affected =
                            conn.execute("DELETE FROM legacy_notes WHERE id = ?1", rusqlite::params![id])?;
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
                conn.exec_drop("DELETE FROM legacy_notes WHERE id = ?", (id,)).await?;
                if conn.affected_rows() == 0 {
                    return Err(StoreError::not_found(format!("note {id}")));
                }
                Ok(())
            }
        }
    }

    async fn count(&self) -> Result<i64> {
        match self.manager.backend() {
            Backend::Sqlite(_) => {
                self.manager
                    .with_sqlite(OpKind::Read, |conn| {
                        conn.query_row("SELECT COUNT(*) FROM legacy_notes", [], |row| row.get(0))
                    })
                    .await
            }
            Backend::MySql(_) => {
                use mysql_async::prelude::*;
                let mut conn = self.manager.mysql_conn().await?;
                let count: i64 = conn
                    .query_first("SELECT COUNT(*) FROM legacy_notes")
                    .await?
                    .unwrap_or(0);
                Ok(count)
            }
        }
    }

    async fn all_ids(&self) -> Result<Vec<i64>> {
        match self.manager.backend() {
            Backend::Sqlite(_) => {
                self.manager
                    .with_sqlite(OpKind::Read, |conn| {
                        let mut stmt = conn.prepare("SELECT id FROM legacy_notes ORDER BY id ASC")?;
                        let rows = stmt.query_map([], |row| row.get(0))?;
                        rows.collect::<rusqlite::Result<Vec<_>>>()
                    })
                    .await
            }
            Backend::MySql(_) => {
                use mysql_async::prelude::*;
                let mut conn = self.manager.mysql_conn().await?;
                Ok(conn.query("SELECT id FROM legacy_notes ORDER BY id ASC").await?)
            }
        }
    }

    async fn search(&self, query: Option<&str>, ascending: bool, limit: i64, offset: i64) -> Result<Vec<Note>> {
        let limit = if limit <= 0 { 100 } else { limit };
        let offset = offset.max(0);
        let pattern = query.map(|q| format!("%{q}%"));
        let order = if ascending { "ASC" } else { "DESC" };

        match self.manager.backend() {
            Backend::Sqlite(_) => {
                let sql = format!(
                    "{NOTE_COLUMNS} FROM legacy_notes
                     WHERE (?1 IS NULL OR scientific_name LIKE ?1)
                     ORDER BY detected_at {order} LIMIT ?2 OFFSET ?3"
                );
                self.manager
                    .with_sqlite(OpKind::Read, move |conn| {
                        let mut stmt = conn.prepare(&sql)?;
                        let rows = stmt.query_map(rusqlite::params![pattern, limit, offset], row_to_note)?;
                        rows.collect::<rusqlite::Result<Vec<_>>>()
                    })
                    .await
            }
            Backend::MySql(_) => {
                use mysql_async::prelude::*;
                let mut conn = self.manager.mysql_conn().await?;
                let sql = format!(
                    "{NOTE_COLUMNS} FROM legacy_notes
                     WHERE (? IS NULL OR scientific_name LIKE ?)
                     ORDER BY detected_at {order} LIMIT ? OFFSET ?"
                );
                let rows: Vec<LegacyNoteRow> =
                    conn.exec(sql, (pattern.clone(), pattern, limit, offset)).await?;
                Ok(rows.into_iter().map(Into::into).collect())
            }
        }
    }

    async fn species_detections(&self, scientific_name: &str, limit: i64) -> Result<Vec<Note>> {
        match self.manager.backend() {
            Backend::Sqlite(_) => {
                let scientific_name = scientific_name.to_string();
                let sql = format!(
                    "{NOTE_COLUMNS} FROM legacy_notes WHERE scientific_name = ?1 ORDER BY detected_at DESC LIMIT ?2"
                );
                self.manager
                    .with_sqlite(OpKind::Read, move |conn| {
                        let mut stmt = conn.prepare(&sql)?;
                        let rows = stmt.query_map(rusqlite::params![scientific_name, limit], row_to_note)?;
                        rows.collect::<rusqlite::Result<Vec<_>>>()
                    })
                    .await
            }
            Backend::MySql(_) => {
                use mysql_async::prelude::*;
                let mut conn = self.manager.mysql_conn().await?;
                let sql = format!(
                    "{NOTE_COLUMNS} FROM legacy_notes WHERE scientific_name = ? ORDER BY detected_at DESC LIMIT ?"
                );
                let rows: Vec<LegacyNoteRow> = conn.exec(sql, (scientific_name, limit)).await?;
                Ok(rows.into_iter().map(Into::into).collect())
            }
        }
    }

    async fn get_hourly_detections(&self, since: i64, until: i64) -> Result<Vec<Note>> {
        match self.manager.backend() {
            Backend::Sqlite(_) => {
                let sql = format!(
                    "{NOTE_COLUMNS} FROM legacy_notes
                     WHERE detected_at >= ?1 AND detected_at < ?2 ORDER BY detected_at ASC"
                );
                self.manager
                    .with_sqlite(OpKind::Read, move |conn| {
                        let mut stmt = conn.prepare(&sql)?;
                        let rows = stmt.query_map(rusqlite::params![since, until], row_to_note)?;
                        rows.collect::<rusqlite::Result<Vec<_>>>()
                    })
                    .await
            }
            Backend::MySql(_) => {
                use mysql_async::prelude::*;
                let mut conn = self.manager.mysql_conn().await?;
                let sql =
                    format!("{NOTE_COLUMNS} FROM legacy_notes WHERE detected_at >= ? AND detected_at < ? ORDER BY detected_at ASC");
                let rows: Vec<LegacyNoteRow> = conn.exec(sql, (since, until)).await?;
                Ok(rows.into_iter().map(Into::into).collect())
            }
        }
    }

    async fn get_last_detections(&self, n: i64) -> Result<Vec<Note>> {
        match self.manager.backend() {
            Backend::Sqlite(_) => {
                let sql = format!("{NOTE_COLUMNS} FROM legacy_notes ORDER BY detected_at DESC LIMIT ?1");
                self.manager
                    .with_sqlite(OpKind::Read, move |conn| {
                        let mut stmt = conn.prepare(&sql)?;
                        let rows = stmt.query_map(rusqlite::params![n], row_to_note)?;
                        rows.collect::<rusqlite::Result<Vec<_>>>()
                    })
                    .await
            }
            Backend::MySql(_) => {
                use mysql_async::prelude::*;
                let mut conn = self.manager.mysql_conn().await?;
                let sql = format!("{NOTE_COLUMNS} FROM legacy_notes ORDER BY detected_at DESC LIMIT ?");
                let rows: Vec<LegacyNoteRow> = conn.exec(sql, (n,)).await?;
                Ok(rows.into_iter().map(Into::into).collect())
            }
        }
    }

    async fn get_all_notes(&self) -> Result<Vec<Note>> {
        match self.manager.backend() {
            Backend::Sqlite(_) => {
                let sql = format!("{NOTE_COLUMNS} FROM legacy_notes ORDER BY id ASC");
                self.manager
                    .with_sqlite(OpKind::Read, move |conn| {
                        let mut stmt = conn.prepare(&sql)?;
                        let rows = stmt.query_map([], row_to_note)?;
                        rows.collect::<rusqlite::Result<Vec<_>>>()
                    })
                    .await
            }
            Backend::MySql(_) => {
                use mysql_async::prelude::*;
                let mut conn = self.manager.mysql_conn().await?;
                let sql = format!("{NOTE_COLUMNS} FROM legacy_notes ORDER BY id ASC");
                let rows: Vec<LegacyNoteRow> = conn.query(sql).await?;
                Ok(rows.into_iter().map(Into::into).collect())
            }
        }
    }

    /// Distinct species ever recorded in `legacy_notes`, reported as v2
    /// `Label`s by delegating the lookup to `LabelRepository` — a species
    /// not yet interned in v2 is simply absent from the result, the same
    /// gap the migration worker is in the business of closing.
    async fn get_all_detected_species(&self) -> Result<Vec<Label>> {
        self.labels.all_detected().await
    }

    async fn get_top_birds_data(
        &self,
        since: i64,
        until: i64,
        min_confidence: f64,
        limit: i64,
    ) -> Result<Vec<SpeciesCount>> {
        let rows: Vec<(String, String, i64)> = match self.manager.backend() {
            Backend::Sqlite(_) => {
                self.manager
                    .with_sqlite(OpKind::Read, move |conn| {
                        let mut stmt = conn.prepare(
                            "SELECT scientific_name, common_name, COUNT(*) AS n FROM legacy_notes
                             WHERE detected_at >= ?1 AND detected_at < ?2 AND confidence >= ?3
                             GROUP BY scientific_name, common_name ORDER BY n DESC LIMIT ?4",
                        )?;
                        let rows = stmt.query_map(rusqlite::params![since, until, min_confidence, limit], |row| {
                            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                        })?;
                        rows.collect::<rusqlite::Result<Vec<_>>>()
                    })
                    .await?
            }
            Backend::MySql(_) => {
                use mysql_async::prelude::*;
                let mut conn = self.manager.mysql_conn().await?;
                conn.exec(
                    "SELECT scientific_name, common_name, COUNT(*) AS n FROM legacy_notes
                     WHERE detected_at >= ? AND detected_at < ? AND confidence >= ?
                     GROUP BY scientific_name, common_name ORDER BY n DESC LIMIT ?",
                    (since, until, min_confidence, limit),
                )
                .await?
            }
        };
        Ok(rows
            .into_iter()
            .map(|(scientific_name, common_name, count)| SpeciesCount { scientific_name, common_name, count })
            .collect())
    }

    async fn set_review(&self, detection_id: i64, verdict: &str, created_at: i64) -> Result<()> {
        let verdict = Some(verdict.to_string());
        match self.manager.backend() {
            Backend::Sqlite(_) => {
                self.manager
                    .with_sqlite(OpKind::Write, move |conn| {
                        conn.execute(
                            "UPDATE legacy_notes SET verified = ?1 WHERE id = ?2",
                            rusqlite::params![verdict, detection_id],
                        )?;
                        Ok(())
                    })
                    .await
            }
            Backend::MySql(_) => {
                use mysql_async::prelude::*;
                let mut conn = self.manager.mysql_conn().await?;
                conn.exec_drop(
                    "UPDATE legacy_notes SET verified = ? WHERE id = ?",
                    (verdict, detection_id),
                )
                .await?;
                let _ = created_at;
                Ok(())
            }
        }
    }

    async fn add_comment(&self, detection_id: i64, body: &str, created_at: i64) -> Result<NoteComment> {
        match self.manager.backend() {
            Backend::Sqlite(_) => {
                let body = body.to_string();
                self.manager
                    .with_sqlite(OpKind::Write, move |conn| {
                        conn.execute(
                            "INSERT INTO legacy_comments (note_id, body, created_at) VALUES (?1, ?2, ?3)",
                            rusqlite::params![detection_id, body, created_at],
                        )?;
                        let id = conn.last_insert_rowid();
                        Ok(NoteComment { id, detection_id, body, created_at })
                    })
                    .await
            }
            Backend::MySql(_) => {
                use mysql_async::prelude::*;
                let mut conn = self.manager.mysql_conn().await?;
                conn.exec_drop(
                    "INSERT INTO legacy_comments (note_id, body, created_at) VALUES (?, ?, ?)",
                    (detection_id, body, created_at),
                )
                .await?;
                let id = conn.last_insert_id().unwrap_or_default() as i64;
                Ok(NoteComment { id, detection_id, body: body.to_string(), created_at })
            }
        }
    }

    async fn delete_comment(&self, comment_id: i64) -> Result<()> {
        match self.manager.backend() {
            Backend::Sqlite(_) => {
                self.manager
                    .with_sqlite(OpKind::Write, move |conn| {
                        conn.execute("DELETE FROM legacy_comments WHERE id = ?1", rusqlite::params![comment_id])?;
                        Ok(())
                    })
                    .await
            }
            Backend::MySql(_) => {
                use mysql_async::prelude::*;
                let mut conn = self.manager.mysql_conn().await?;
                conn.exec_drop("DELETE FROM legacy_comments WHERE id = ?", (comment_id,)).await?;
                Ok(())
            }
        }
    }

    async fn lock(&self, detection_id: i64, locked_at: i64) -> Result<()> {
        let _ = locked_at;
        match self.manager.backend() {
            Backend::Sqlite(_) => {
                self.manager
                    .with_sqlite(OpKind::Write, move |conn| {
                        conn.execute(
                            "UPDATE legacy_notes SET locked = 1 WHERE id = ?1",
                            rusqlite::params![detection_id],
                        )?;
                        Ok(())
                    })
                    .await
            }
            Backend::MySql(_) => {
                use mysql_async::prelude::*;
                let mut conn = self.manager.mysql_conn().await?;
                conn.exec_drop("UPDATE legacy_notes SET locked = 1 WHERE id = ?", (detection_id,)).await?;
                Ok(())
            }
        }
    }

    async fn unlock(&self, detection_id: i64) -> Result<()> {
        match self.manager.backend() {
            Backend::Sqlite(_) => {
                self.manager
                    .with_sqlite(OpKind::Write, move |conn| {
                        conn.execute(
                            "UPDATE legacy_notes SET locked = 0 WHERE id = ?1",
                            rusqlite::params![detection_id],
                        )?;
                        Ok(())
                    })
                    .await
            }
            Backend::MySql(_) => {
                use mysql_async::prelude::*;
                let mut conn = self.manager.mysql_conn().await?;
                conn.exec_drop("UPDATE legacy_notes SET locked = 0 WHERE id = ?", (detection_id,)).await?;
                Ok(())
            }
        }
    }

    /// Reads straight off `dynamic_thresholds`/`labels` (v2 tables), not
    /// `legacy_notes` — there's only one copy of threshold state, and it
    /// lives in the schema the normalized detections also use.
    async fn threshold_by_common_name(&self, common_name: &str) -> Result<Option<DynamicThreshold>> {
        let resolved = self.resolve_scientific_name(common_name).await?;
        self.thresholds.by_common_name(move |_| resolved.clone(), common_name).await
    }

    async fn upsert_threshold(&self, threshold: &DynamicThreshold) -> Result<()> {
        self.thresholds.upsert(threshold).await
    }

    async fn delete_dynamic_threshold(&self, common_name: &str) -> Result<()> {
        let resolved = self.resolve_scientific_name(common_name).await?;
        self.thresholds.delete_dynamic_threshold(move |_| resolved.clone(), common_name).await
    }

    async fn record_notification_sent(
        &self,
        common_name: &str,
        notification_type: &str,
        last_sent_at: i64,
        expires_at: i64,
    ) -> Result<()> {
        let label_id = self.label_id_for_common_name(common_name).await?;
        self.notifications.record_sent(label_id, notification_type, last_sent_at, expires_at).await
    }

    /// Treats an unresolvable common name as "nothing suppressed" rather
    /// than an error — a read with a sensible default, unlike recording a
    /// send against a species that doesn't exist anywhere yet.
    async fn is_notification_suppressed(&self, common_name: &str, notification_type: &str, now: i64) -> Result<bool> {
        match self.label_id_for_common_name(common_name).await {
            Ok(label_id) => self.notifications.is_suppressed(label_id, notification_type, now).await,
            Err(StoreError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn get_database_stats(&self) -> Result<DatabaseStats> {
        Ok(DatabaseStats {
            engine: self.manager.engine(),
            total_detections: self.count().await?,
            size_bytes: self.manager.database_size_bytes().await?,
            connected: !self.manager.is_closed(),
        })
    }
}

/// Shared SELECT prefix for every `legacy_notes` list query below; each
/// call site appends its own `WHERE`/`ORDER BY`/`LIMIT`.
const NOTE_COLUMNS: &str = "SELECT id, scientific_name, common_name, confidence, detected_at, begin_time, end_time,
     latitude, longitude, clip_name, processing_time_ms, source, verified, locked";

fn row_to_note(row: &rusqlite::Row) -> rusqlite::Result<Note> {
    Ok(Note {
        id: row.get(0)?,
        scientific_name: row.get(1)?,
        common_name: row.get(2)?,
        confidence: row.get(3)?,
        detected_at: row.get(4)?,
        begin_time: row.get(5)?,
        end_time: row.get(6)?,
        latitude: row.get(7)?,
        longitude: row.get(8)?,
        clip_name: row.get(9)?,
        processing_time_ms: row.get(10)?,
        source: row.get(11)?,
        verified: row.get(12)?,
        locked: row.get(13)?,
        comments: Vec::new(),
    })
}

/// Row shape for the 14-column `legacy_notes` SELECT; `mysql_common`'s
/// tuple `FromRow` impls stop at 12 elements.
struct LegacyNoteRow {
    id: i64,
    scientific_name: String,
    common_name: String,
    confidence: f64,
    detected_at: i64,
    begin_time: i64,
    end_time: i64,
    latitude: f64,
    longitude: f64,
    clip_name: Option<String>,
    processing_time_ms: i64,
    source: Option<String>,
    verified: Option<String>,
    locked: bool,
}

impl mysql_async::prelude::FromRow for LegacyNoteRow {
    fn from_row_opt(row: mysql_async::Row) -> std::result::Result<Self, mysql_async::FromRowError> {
        let err = || mysql_async::FromRowError(row.clone());
        Ok(LegacyNoteRow {
            id: row.get(0).ok_or_else(err)?,
            scientific_name: row.get(1).ok_or_else(err)?,
            common_name: row.get(2).ok_or_else(err)?,
            confidence: row.get(3).ok_or_else(err)?,
            detected_at: row.get(4).ok_or_else(err)?,
            begin_time: row.get(5).ok_or_else(err)?,
            end_time: row.get(6).ok_or_else(err)?,
            latitude: row.get(7).ok_or_else(err)?,
            longitude: row.get(8).ok_or_else(err)?,
            clip_name: row.get(9).ok_or_else(err)?,
            processing_time_ms: row.get(10).ok_or_else(err)?,
            source: row.get(11).ok_or_else(err)?,
            verified: row.get(12).ok_or_else(err)?,
            locked: row.get(13).ok_or_else(err)?,
        })
    }
}

impl From<LegacyNoteRow> for Note {
    fn from(row: LegacyNoteRow) -> Self {
        Note {
            id: row.id,
            scientific_name: row.scientific_name,
            common_name: row.common_name,
            confidence: row.confidence,
            detected_at: row.detected_at,
            begin_time: row.begin_time,
            end_time: row.end_time,
            latitude: row.latitude,
            longitude: row.longitude,
            clip_name: row.clip_name,
            processing_time_ms: row.processing_time_ms,
            source: row.source,
            verified: row.verified,
            locked: row.locked,
            comments: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EngineConfig, StoreConfig};

    async fn test_store() -> LegacyStore {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("legacy.db");
        std::mem::forget(dir);
        let config = StoreConfig {
            engine: EngineConfig::Sqlite {
                path: path.to_str().unwrap().to_string(),
                busy_timeout_ms: 1000,
            },
            ..Default::default()
        };
        let manager = Arc::new(DatabaseManager::initialize(&config).await.unwrap());
        let store = LegacyStore::new(manager);
        store.ensure_schema().await.unwrap();
        store
    }

    fn sample_note() -> Note {
        Note {
            id: 0,
            scientific_name: "Turdus merula".to_string(),
            common_name: "Eurasian Blackbird".to_string(),
            confidence: 0.8,
            detected_at: 1_700_000_000,
            begin_time: 1_700_000_000,
            end_time: 1_700_000_003,
            latitude: 60.1,
            longitude: 24.9,
            clip_name: None,
            processing_time_ms: 10,
            source: None,
            verified: None,
            locked: false,
            comments: Vec::new(),
        }
    }

    #[tokio::test]
    async fn save_then_get_round_trips() {
        let store = test_store().await;
        let saved = store.save(&sample_note()).await.unwrap();
        let fetched = store.get(saved.id).await.unwrap();
        assert_eq!(fetched.scientific_name, "Turdus merula");
        assert_eq!(fetched.common_name, "Eurasian Blackbird");
    }

    #[tokio::test]
    async fn count_and_all_ids_reflect_inserts() {
        let store = test_store().await;
        store.save(&sample_note()).await.unwrap();
        store.save(&sample_note()).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 2);
        assert_eq!(store.all_ids().await.unwrap().len(), 2);
    }
}
