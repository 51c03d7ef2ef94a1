//! `DatabaseManager`: opens/closes the database, enforces
//! engine-specific pragmas at connect time, and exposes the shared
//! connection handle to repositories. Repositories share the manager; they
//! never own a connection themselves.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use rusqlite::Connection;

use crate::config::{EngineConfig, StoreConfig};
use crate::counters::{OpKind, QueryCounters};
use crate::error::{Result, StoreError};
use crate::models::{LabelType, Model, TaxonomicClass};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    Sqlite,
    MySql,
}

/// The underlying connection/pool. SQLite is a single blocking connection
/// behind a mutex, driven through `spawn_blocking` so async callers never
/// block the executor; MySQL is a native async pool.
pub enum Backend {
    Sqlite(Arc<Mutex<Connection>>),
    MySql(mysql_async::Pool),
}

pub struct DatabaseManager {
    backend: Backend,
    engine: Engine,
    sqlite_path: Option<String>,
    pub counters: QueryCounters,
    closed: AtomicBool,
    /// `PoolConstraints` max, kept around purely to report `MaxOpenConnections`
    /// in inspector output. `None` for SQLite, which has no pool.
    mysql_pool_size: Option<usize>,
    /// Connections currently checked out via `mysql_conn`, tracked ourselves
    /// since `mysql_async::Pool` exposes no live usage counters.
    mysql_active_conns: Arc<AtomicI64>,
}

impl DatabaseManager {
    /// Opens the connection, sets engine-specific pragmas, creates the
    /// `_metadata` table, and ensures the seed rows (LabelType, a default
    /// TaxonomicClass, and a default Model) exist. A failed `initialize`
    /// aborts startup — callers treat this as fatal.
    pub async fn initialize(config: &StoreConfig) -> Result<Self> {
        let manager = match &config.engine {
            EngineConfig::Sqlite {
                path,
                busy_timeout_ms,
            } => Self::initialize_sqlite(path, *busy_timeout_ms).await?,
            EngineConfig::MySql { dsn, pool_size } => {
                Self::initialize_mysql(dsn, *pool_size).await?
            }
        };
        manager.ensure_seed_rows().await?;
        Ok(manager)
    }

    async fn initialize_sqlite(path: &str, busy_timeout_ms: u32) -> Result<Self> {
        let path = path.to_string();
        let conn = tokio::task::spawn_blocking(move || -> Result<Connection> {
            let conn = Connection::open(&path)?;
            conn.busy_timeout(std::time::Duration::from_millis(busy_timeout_ms as u64))?;
            conn.execute_batch(
                "PRAGMA journal_mode=WAL;
                 PRAGMA foreign_keys=ON;
                 PRAGMA synchronous=NORMAL;",
            )?;
            create_sqlite_schema(&conn)?;
            Ok(conn)
        })
        .await
        .map_err(|e| StoreError::Fatal(e.to_string()))??;

        Ok(Self {
            sqlite_path: path_of(&conn),
            backend: Backend::Sqlite(Arc::new(Mutex::new(conn))),
            engine: Engine::Sqlite,
            counters: QueryCounters::new(),
            closed: AtomicBool::new(false),
            mysql_pool_size: None,
            mysql_active_conns: Arc::new(AtomicI64::new(0)),
        })
    }

    async fn initialize_mysql(dsn: &str, pool_size: usize) -> Result<Self> {
        let opts = mysql_async::Opts::from_url(dsn)
            .map_err(|e| StoreError::InvalidInput(format!("invalid mysql dsn: {e}")))?;
        let pool_opts = mysql_async::PoolOpts::default()
            .with_constraints(mysql_async::PoolConstraints::new(1, pool_size).ok_or_else(|| {
                StoreError::InvalidInput("pool_size must be >= 1".to_string())
            })?);
        let pool = mysql_async::Pool::new(mysql_async::OptsBuilder::from_opts(opts).pool_opts(pool_opts));

        let mut conn = pool.get_conn().await?;
        create_mysql_schema(&mut conn).await?;
        drop(conn);

        Ok(Self {
            sqlite_path: None,
            backend: Backend::MySql(pool),
            engine: Engine::MySql,
            counters: QueryCounters::new(),
            closed: AtomicBool::new(false),
            mysql_pool_size: Some(pool_size),
            mysql_active_conns: Arc::new(AtomicI64::new(0)),
        })
    }

    async fn ensure_seed_rows(&self) -> Result<()> {
        match &self.backend {
            Backend::Sqlite(conn) => {
                let conn = conn.clone();
                tokio::task::spawn_blocking(move || -> Result<()> {
                    let conn = conn.lock().unwrap();
                    conn.execute(
                        "INSERT OR IGNORE INTO label_types (id, name) VALUES (1, ?1)",
                        rusqlite::params![LabelType::SPECIES],
                    )?;
                    conn.execute(
                        "INSERT OR IGNORE INTO taxonomic_classes (id, name) VALUES (1, 'Aves')",
                        [],
                    )?;
                    conn.execute(
                        "INSERT OR IGNORE INTO models (id, name, version, variant) VALUES (1, ?1, ?2, ?3)",
                        rusqlite::params![Model::DEFAULT_NAME, Model::DEFAULT_VERSION, Model::DEFAULT_VARIANT],
                    )?;
                    Ok(())
                })
                .await
                .map_err(|e| StoreError::Fatal(e.to_string()))??;
            }
            Backend::MySql(pool) => {
                use mysql_async::prelude::*;
                let mut conn = pool.get_conn().await?;
                conn.exec_drop(
                    "INSERT IGNORE INTO label_types (id, name) VALUES (1, ?)",
                    (LabelType::SPECIES,),
                )
                .await?;
                conn.exec_drop(
                    "INSERT IGNORE INTO taxonomic_classes (id, name) VALUES (1, 'Aves')",
                    (),
                )
                .await?;
                conn.exec_drop(
                    "INSERT IGNORE INTO models (id, name, version, variant) VALUES (1, ?, ?, ?)",
                    (Model::DEFAULT_NAME, Model::DEFAULT_VERSION, Model::DEFAULT_VARIANT),
                )
                .await?;
            }
        }
        Ok(())
    }

    pub fn engine(&self) -> Engine {
        self.engine
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    /// Filesystem path of the SQLite database file; `None` for MySQL.
    pub fn sqlite_path(&self) -> Option<&str> {
        self.sqlite_path.as_deref()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        if let Backend::MySql(pool) = &self.backend {
            pool.clone()
                .disconnect()
                .await
                .map_err(StoreError::from)?;
        }
        Ok(())
    }

    /// Read a value from the `_metadata` key/value table.
    pub async fn metadata_get(&self, key: &str) -> Result<Option<String>> {
        match &self.backend {
            Backend::Sqlite(conn) => {
                let conn = conn.clone();
                let key = key.to_string();
                tokio::task::spawn_blocking(move || -> Result<Option<String>> {
                    let conn = conn.lock().unwrap();
                    let mut stmt =
                        conn.prepare("SELECT value FROM _metadata WHERE key = ?1")?;
                    let mut rows = stmt.query(rusqlite::params![key])?;
                    if let Some(row) = rows.next()? {
                        Ok(Some(row.get(0)?))
                    } else {
                        Ok(None)
                    }
                })
                .await
                .map_err(|e| StoreError::Fatal(e.to_string()))?
            }
            Backend::MySql(pool) => {
                use mysql_async::prelude::*;
                let mut conn = pool.get_conn().await?;
                let value: Option<String> = conn
                    .exec_first("SELECT value FROM _metadata WHERE `key` = ?", (key,))
                    .await?;
                Ok(value)
            }
        }
    }

    /// Upsert a value into the `_metadata` key/value table.
    pub async fn metadata_set(&self, key: &str, value: &str) -> Result<()> {
        match &self.backend {
            Backend::Sqlite(conn) => {
                let conn = conn.clone();
                let key = key.to_string();
                let value = value.to_string();
                tokio::task::spawn_blocking(move || -> Result<()> {
                    let conn = conn.lock().unwrap();
                    conn.execute(
                        "INSERT INTO _metadata (key, value) VALUES (?1, ?2)
                         ON CONFLICT(key) DO UPDATE SET value = ?2",
                        rusqlite::params![key, value],
                    )?;
                    Ok(())
                })
                .await
                .map_err(|e| StoreError::Fatal(e.to_string()))?
            }
            Backend::MySql(pool) => {
                use mysql_async::prelude::*;
                let mut conn = pool.get_conn().await?;
                conn.exec_drop(
                    "INSERT INTO _metadata (`key`, value) VALUES (?, ?)
                     ON DUPLICATE KEY UPDATE value = VALUES(value)",
                    (key, value),
                )
                .await?;
                Ok(())
            }
        }
    }

    /// `is_v2_only_mode` flag, defaulting to `false` until cutover completes.
    pub async fn is_v2_only_mode(&self) -> Result<bool> {
        Ok(self.metadata_get("is_v2_only_mode").await?.as_deref() == Some("true"))
    }

    pub async fn set_v2_only_mode(&self, value: bool) -> Result<()> {
        self.metadata_set("is_v2_only_mode", if value { "true" } else { "false" })
            .await
    }

    /// Run a blocking SQLite closure on the blocking thread pool, timing it
    /// into the shared counters. Returns `StoreError::Fatal` if called
    /// against a MySQL-backed manager — repositories pick their branch based
    /// on `manager.engine()` and should never mix them.
    pub async fn with_sqlite<F, T>(&self, kind: OpKind, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let Backend::Sqlite(conn) = &self.backend else {
            return Err(StoreError::Fatal(
                "with_sqlite called on a non-sqlite backend".to_string(),
            ));
        };
        let conn = conn.clone();
        let start = std::time::Instant::now();
        let result = tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            f(&conn)
        })
        .await
        .map_err(|e| StoreError::Fatal(e.to_string()))?;
        self.counters.record(kind, start.elapsed());
        match result {
            Ok(v) => Ok(v),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::DatabaseBusy =>
            {
                self.counters.record_busy_timeout();
                Err(StoreError::from(rusqlite::Error::SqliteFailure(e, None)))
            }
            Err(e) => Err(StoreError::from(e)),
        }
    }

    pub async fn mysql_conn(&self) -> Result<PooledConn> {
        let Backend::MySql(pool) = &self.backend else {
            return Err(StoreError::Fatal(
                "mysql_conn called on a non-mysql backend".to_string(),
            ));
        };
        let conn = pool.get_conn().await?;
        self.mysql_active_conns.fetch_add(1, Ordering::Relaxed);
        Ok(PooledConn {
            conn,
            active: self.mysql_active_conns.clone(),
        })
    }

    /// `(max_open, in_use)` for `MySqlDetails`; `None` on a SQLite backend.
    pub fn mysql_pool_stats(&self) -> Option<(usize, i64)> {
        self.mysql_pool_size
            .map(|max| (max, self.mysql_active_conns.load(Ordering::Relaxed)))
    }

    /// Total on-disk/on-server size of the whole database, independent of
    /// any particular table — the same physical store legacy and v2 both
    /// live in, so this is a single number regardless of which schema a
    /// caller is asking on behalf of.
    pub async fn database_size_bytes(&self) -> Result<i64> {
        match self.backend() {
            Backend::Sqlite(_) => Ok(self
                .sqlite_path()
                .and_then(|p| std::fs::metadata(p).ok())
                .map(|m| m.len() as i64)
                .unwrap_or(0)),
            Backend::MySql(_) => {
                use mysql_async::prelude::*;
                let mut conn = self.mysql_conn().await?;
                let size: Option<i64> = conn
                    .query_first(
                        "SELECT SUM(data_length + index_length) FROM information_schema.tables
                         WHERE table_schema = DATABASE()",
                    )
                    .await?;
                Ok(size.unwrap_or(0))
            }
        }
    }
}

/// Wraps a checked-out `mysql_async::Conn` and returns it to the active-count
/// tally on drop, so `mysql_pool_stats` reflects connections genuinely in use
/// rather than just the pool's static size. Derefs to `Conn` so existing call
/// sites (`conn.query(...)`, `conn.exec_drop(...)`) are unaffected.
pub struct PooledConn {
    conn: mysql_async::Conn,
    active: Arc<AtomicI64>,
}

impl std::ops::Deref for PooledConn {
    type Target = mysql_async::Conn;
    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl std::ops::DerefMut for PooledConn {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.conn
    }
}

impl Drop for PooledConn {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::Relaxed);
    }
}

fn path_of(conn: &Connection) -> Option<String> {
    conn.path().map(|p| p.to_string())
}

/// Idempotent DDL for the v2 schema, SQLite dialect. Every statement is
/// `IF NOT EXISTS` so it's safe to run on every startup.
fn create_sqlite_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS _metadata (
            key   TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS label_types (
            id   INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE
        );

        CREATE TABLE IF NOT EXISTS taxonomic_classes (
            id   INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE
        );

        CREATE TABLE IF NOT EXISTS models (
            id      INTEGER PRIMARY KEY AUTOINCREMENT,
            name    TEXT NOT NULL,
            version TEXT NOT NULL,
            variant TEXT NOT NULL,
            UNIQUE(name, version, variant)
        );

        CREATE TABLE IF NOT EXISTS labels (
            id                  INTEGER PRIMARY KEY AUTOINCREMENT,
            scientific_name     TEXT NOT NULL,
            label_type_id       INTEGER NOT NULL REFERENCES label_types(id),
            model_id            INTEGER NOT NULL REFERENCES models(id),
            taxonomic_class_id  INTEGER REFERENCES taxonomic_classes(id),
            UNIQUE(scientific_name, label_type_id, model_id)
        );

        CREATE TABLE IF NOT EXISTS audio_sources (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            safe_string TEXT NOT NULL UNIQUE
        );

        CREATE TABLE IF NOT EXISTS weather (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            hour_bucket     INTEGER NOT NULL,
            source          TEXT NOT NULL,
            temperature_c   REAL,
            humidity_pct    REAL,
            wind_speed_ms   REAL,
            condition       TEXT,
            UNIQUE(hour_bucket, source)
        );

        CREATE TABLE IF NOT EXISTS detections (
            id                  INTEGER PRIMARY KEY AUTOINCREMENT,
            label_id            INTEGER NOT NULL REFERENCES labels(id),
            model_id            INTEGER NOT NULL REFERENCES models(id),
            source_id           INTEGER REFERENCES audio_sources(id),
            weather_id          INTEGER REFERENCES weather(id),
            detected_at         INTEGER NOT NULL,
            begin_time          INTEGER NOT NULL,
            end_time            INTEGER NOT NULL,
            confidence          REAL NOT NULL,
            latitude            REAL NOT NULL,
            longitude           REAL NOT NULL,
            clip_name           TEXT,
            processing_time_ms  INTEGER NOT NULL DEFAULT 0,
            legacy_id           INTEGER UNIQUE
        );
        CREATE INDEX IF NOT EXISTS idx_detections_label ON detections(label_id);
        CREATE INDEX IF NOT EXISTS idx_detections_detected_at ON detections(detected_at);

        CREATE TABLE IF NOT EXISTS note_reviews (
            detection_id INTEGER PRIMARY KEY REFERENCES detections(id) ON DELETE CASCADE,
            verdict      TEXT NOT NULL,
            created_at   INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS note_locks (
            detection_id INTEGER PRIMARY KEY REFERENCES detections(id) ON DELETE CASCADE,
            locked_at    INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS note_comments (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            detection_id INTEGER NOT NULL REFERENCES detections(id) ON DELETE CASCADE,
            body         TEXT NOT NULL,
            created_at   INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_comments_detection ON note_comments(detection_id, created_at);

        CREATE TABLE IF NOT EXISTS daily_events (
            date      TEXT NOT NULL,
            latitude  REAL NOT NULL,
            longitude REAL NOT NULL,
            sunrise   INTEGER,
            sunset    INTEGER,
            country   TEXT,
            city      TEXT,
            PRIMARY KEY (date, latitude, longitude)
        );

        CREATE TABLE IF NOT EXISTS image_cache (
            provider        TEXT NOT NULL,
            scientific_name TEXT NOT NULL,
            image_url       TEXT NOT NULL,
            license_name    TEXT,
            license_url     TEXT,
            author          TEXT,
            cached_at       INTEGER NOT NULL,
            PRIMARY KEY (provider, scientific_name)
        );

        CREATE TABLE IF NOT EXISTS dynamic_thresholds (
            label_id            INTEGER PRIMARY KEY REFERENCES labels(id),
            scientific_name     TEXT NOT NULL,
            level               INTEGER NOT NULL DEFAULT 0,
            current_value       REAL NOT NULL,
            base_threshold      REAL NOT NULL,
            valid_hours         INTEGER NOT NULL,
            expires_at          INTEGER NOT NULL,
            trigger_count       INTEGER NOT NULL DEFAULT 0,
            highest_level_reached INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS threshold_events (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            label_id     INTEGER NOT NULL REFERENCES labels(id),
            species_name TEXT NOT NULL,
            old_level    INTEGER NOT NULL,
            new_level    INTEGER NOT NULL,
            created_at   INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_threshold_events_label ON threshold_events(label_id, created_at);

        CREATE TABLE IF NOT EXISTS notification_history (
            label_id            INTEGER NOT NULL REFERENCES labels(id),
            notification_type   TEXT NOT NULL,
            last_sent_at        INTEGER NOT NULL,
            expires_at          INTEGER NOT NULL,
            PRIMARY KEY (label_id, notification_type)
        );

        CREATE TABLE IF NOT EXISTS dirty_ids (
            legacy_id  INTEGER PRIMARY KEY,
            reason     TEXT NOT NULL,
            created_at INTEGER NOT NULL
        );
        ",
    )
}

/// Idempotent DDL for the v2 schema, MySQL dialect. Mirrors
/// `create_sqlite_schema` table-for-table; differences are MySQL's
/// `AUTO_INCREMENT`/engine clause and lack of `PRAGMA`.
async fn create_mysql_schema(conn: &mut mysql_async::Conn) -> Result<()> {
    use mysql_async::prelude::*;
    let statements = [
        "CREATE TABLE IF NOT EXISTS _metadata (
            `key` VARCHAR(191) PRIMARY KEY,
            value TEXT NOT NULL
        ) ENGINE=InnoDB",
        "CREATE TABLE IF NOT EXISTS label_types (
            id INT PRIMARY KEY,
            name VARCHAR(64) NOT NULL UNIQUE
        ) ENGINE=InnoDB",
        "CREATE TABLE IF NOT EXISTS taxonomic_classes (
            id INT PRIMARY KEY,
            name VARCHAR(64) NOT NULL UNIQUE
        ) ENGINE=InnoDB",
        "CREATE TABLE IF NOT EXISTS models (
            id INT AUTO_INCREMENT PRIMARY KEY,
            name VARCHAR(128) NOT NULL,
            version VARCHAR(32) NOT NULL,
            variant VARCHAR(64) NOT NULL,
            UNIQUE KEY uq_model (name, version, variant)
        ) ENGINE=InnoDB",
        "CREATE TABLE IF NOT EXISTS labels (
            id BIGINT AUTO_INCREMENT PRIMARY KEY,
            scientific_name VARCHAR(255) NOT NULL,
            label_type_id INT NOT NULL,
            model_id INT NOT NULL,
            taxonomic_class_id INT NULL,
            UNIQUE KEY uq_label (scientific_name, label_type_id, model_id),
            FOREIGN KEY (label_type_id) REFERENCES label_types(id),
            FOREIGN KEY (model_id) REFERENCES models(id),
            FOREIGN KEY (taxonomic_class_id) REFERENCES taxonomic_classes(id)
        ) ENGINE=InnoDB",
        "CREATE TABLE IF NOT EXISTS audio_sources (
            id BIGINT AUTO_INCREMENT PRIMARY KEY,
            safe_string VARCHAR(255) NOT NULL UNIQUE
        ) ENGINE=InnoDB",
        "CREATE TABLE IF NOT EXISTS weather (
            id BIGINT AUTO_INCREMENT PRIMARY KEY,
            hour_bucket BIGINT NOT NULL,
            source VARCHAR(255) NOT NULL,
            temperature_c DOUBLE NULL,
            humidity_pct DOUBLE NULL,
            wind_speed_ms DOUBLE NULL,
            `condition` VARCHAR(64) NULL,
            UNIQUE KEY uq_weather (hour_bucket, source)
        ) ENGINE=InnoDB",
        "CREATE TABLE IF NOT EXISTS detections (
            id BIGINT AUTO_INCREMENT PRIMARY KEY,
            label_id BIGINT NOT NULL,
            model_id INT NOT NULL,
            source_id BIGINT NULL,
            weather_id BIGINT NULL,
            detected_at BIGINT NOT NULL,
            begin_time BIGINT NOT NULL,
            end_time BIGINT NOT NULL,
            confidence DOUBLE NOT NULL,
            latitude DOUBLE NOT NULL,
            longitude DOUBLE NOT NULL,
            clip_name VARCHAR(512) NULL,
            processing_time_ms BIGINT NOT NULL DEFAULT 0,
            legacy_id BIGINT NULL UNIQUE,
            INDEX idx_detections_label (label_id),
            INDEX idx_detections_detected_at (detected_at),
            FOREIGN KEY (label_id) REFERENCES labels(id),
            FOREIGN KEY (model_id) REFERENCES models(id),
            FOREIGN KEY (source_id) REFERENCES audio_sources(id),
            FOREIGN KEY (weather_id) REFERENCES weather(id)
        ) ENGINE=InnoDB",
        "CREATE TABLE IF NOT EXISTS note_reviews (
            detection_id BIGINT PRIMARY KEY,
            verdict VARCHAR(64) NOT NULL,
            created_at BIGINT NOT NULL,
            FOREIGN KEY (detection_id) REFERENCES detections(id) ON DELETE CASCADE
        ) ENGINE=InnoDB",
        "CREATE TABLE IF NOT EXISTS note_locks (
            detection_id BIGINT PRIMARY KEY,
            locked_at BIGINT NOT NULL,
            FOREIGN KEY (detection_id) REFERENCES detections(id) ON DELETE CASCADE
        ) ENGINE=InnoDB",
        "CREATE TABLE IF NOT EXISTS note_comments (
            id BIGINT AUTO_INCREMENT PRIMARY KEY,
            detection_id BIGINT NOT NULL,
            body TEXT NOT NULL,
            created_at BIGINT NOT NULL,
            INDEX idx_comments_detection (detection_id, created_at),
            FOREIGN KEY (detection_id) REFERENCES detections(id) ON DELETE CASCADE
        ) ENGINE=InnoDB",
        "CREATE TABLE IF NOT EXISTS daily_events (
            date VARCHAR(10) NOT NULL,
            latitude DOUBLE NOT NULL,
            longitude DOUBLE NOT NULL,
            sunrise BIGINT NULL,
            sunset BIGINT NULL,
            country VARCHAR(128) NULL,
            city VARCHAR(128) NULL,
            PRIMARY KEY (date, latitude, longitude)
        ) ENGINE=InnoDB",
        "CREATE TABLE IF NOT EXISTS image_cache (
            provider VARCHAR(64) NOT NULL,
            scientific_name VARCHAR(255) NOT NULL,
            image_url VARCHAR(1024) NOT NULL,
            license_name VARCHAR(255) NULL,
            license_url VARCHAR(1024) NULL,
            author VARCHAR(255) NULL,
            cached_at BIGINT NOT NULL,
            PRIMARY KEY (provider, scientific_name)
        ) ENGINE=InnoDB",
        "CREATE TABLE IF NOT EXISTS dynamic_thresholds (
            label_id BIGINT PRIMARY KEY,
            scientific_name VARCHAR(255) NOT NULL,
            level INT NOT NULL DEFAULT 0,
            current_value DOUBLE NOT NULL,
            base_threshold DOUBLE NOT NULL,
            valid_hours INT NOT NULL,
            expires_at BIGINT NOT NULL,
            trigger_count BIGINT NOT NULL DEFAULT 0,
            highest_level_reached INT NOT NULL DEFAULT 0
        ) ENGINE=InnoDB",
        "CREATE TABLE IF NOT EXISTS threshold_events (
            id BIGINT AUTO_INCREMENT PRIMARY KEY,
            label_id BIGINT NOT NULL,
            species_name VARCHAR(255) NOT NULL,
            old_level INT NOT NULL,
            new_level INT NOT NULL,
            created_at BIGINT NOT NULL,
            INDEX idx_threshold_events_label (label_id, created_at)
        ) ENGINE=InnoDB",
        "CREATE TABLE IF NOT EXISTS notification_history (
            label_id BIGINT NOT NULL,
            notification_type VARCHAR(64) NOT NULL,
            last_sent_at BIGINT NOT NULL,
            expires_at BIGINT NOT NULL,
            PRIMARY KEY (label_id, notification_type)
        ) ENGINE=InnoDB",
        "CREATE TABLE IF NOT EXISTS dirty_ids (
            legacy_id BIGINT PRIMARY KEY,
            reason VARCHAR(255) NOT NULL,
            created_at BIGINT NOT NULL
        ) ENGINE=InnoDB",
    ];
    for stmt in statements {
        conn.query_drop(stmt).await.map_err(StoreError::from)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn sqlite_manager() -> DatabaseManager {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        // Leak the tempdir so the file survives for the duration of the test.
        std::mem::forget(dir);
        let config = StoreConfig {
            engine: EngineConfig::Sqlite {
                path: path.to_str().unwrap().to_string(),
                busy_timeout_ms: 1000,
            },
            ..Default::default()
        };
        DatabaseManager::initialize(&config).await.unwrap()
    }

    #[tokio::test]
    async fn initialize_creates_seed_rows() {
        let manager = sqlite_manager().await;
        let found: Option<String> = manager
            .with_sqlite(OpKind::Read, |conn| {
                conn.query_row(
                    "SELECT name FROM label_types WHERE id = 1",
                    [],
                    |row| row.get(0),
                )
            })
            .await
            .unwrap();
        assert_eq!(found.as_deref(), Some(LabelType::SPECIES));
    }

    #[tokio::test]
    async fn metadata_round_trips_and_defaults_v2_mode_to_false() {
        let manager = sqlite_manager().await;
        assert!(!manager.is_v2_only_mode().await.unwrap());
        manager.set_v2_only_mode(true).await.unwrap();
        assert!(manager.is_v2_only_mode().await.unwrap());
    }

    #[tokio::test]
    async fn metadata_set_is_idempotent_upsert() {
        let manager = sqlite_manager().await;
        manager.metadata_set("schema_version", "1").await.unwrap();
        manager.metadata_set("schema_version", "2").await.unwrap();
        assert_eq!(
            manager.metadata_get("schema_version").await.unwrap().as_deref(),
            Some("2")
        );
    }
}
