//! Legacy cleanup: once cutover has completed and a
//! post-cutover backup exists, drop the legacy schema and reclaim its disk
//! space. Gated hard on both conditions so cleanup can never run ahead of a
//! restorable backup.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use serde::Serialize;

use crate::backup::{BackupManager, BackupStatus};
use crate::counters::OpKind;
use crate::error::{Result, StoreError};
use crate::legacy::{Interface, LegacyStore};
use crate::manager::{Backend, DatabaseManager};

const IDLE: u8 = 0;
const IN_PROGRESS: u8 = 1;
const COMPLETED: u8 = 2;
const FAILED: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupState {
    Idle,
    InProgress,
    Completed,
    Failed,
}

impl CleanupState {
    fn from_u8(v: u8) -> Self {
        match v {
            IDLE => CleanupState::Idle,
            IN_PROGRESS => CleanupState::InProgress,
            COMPLETED => CleanupState::Completed,
            _ => CleanupState::Failed,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CleanupReport {
    pub state: CleanupState,
    pub space_reclaimed_bytes: i64,
    pub legacy_rows_removed: i64,
    pub error: Option<String>,
}

pub struct CleanupManager {
    manager: Arc<DatabaseManager>,
    legacy: Arc<LegacyStore>,
    state: AtomicU8,
}

impl CleanupManager {
    pub fn new(manager: Arc<DatabaseManager>, legacy: Arc<LegacyStore>) -> Self {
        Self {
            manager,
            legacy,
            state: AtomicU8::new(IDLE),
        }
    }

    pub fn state(&self) -> CleanupState {
        CleanupState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Runs cleanup if `is_v2_only_mode` is set and at least one backup
    /// completed after cutover; otherwise returns an error without touching
    /// any state. `backups` is searched for a `Completed` job whose id is
    /// greater than `cutover_backup_watermark` recorded in `_metadata`.
    pub async fn run(&self, backups: &BackupManager) -> Result<CleanupReport> {
        if !self.manager.is_v2_only_mode().await? {
            return Err(StoreError::invalid_input(
                "cleanup requires cutover to have completed (is_v2_only_mode=false)",
            ));
        }
        if !self.has_post_cutover_backup(backups).await? {
            return Err(StoreError::invalid_input(
                "cleanup requires a backup taken after cutover",
            ));
        }

        let legacy_rows_removed = self.legacy.count().await.unwrap_or(0);

        self.state.store(IN_PROGRESS, Ordering::Release);
        match self.drop_legacy_schema().await {
            Ok(space_reclaimed_bytes) => {
                self.state.store(COMPLETED, Ordering::Release);
                Ok(CleanupReport {
                    state: CleanupState::Completed,
                    space_reclaimed_bytes,
                    legacy_rows_removed,
                    error: None,
                })
            }
            Err(e) => {
                self.state.store(FAILED, Ordering::Release);
                Ok(CleanupReport {
                    state: CleanupState::Failed,
                    space_reclaimed_bytes: 0,
                    legacy_rows_removed: 0,
                    error: Some(e.to_string()),
                })
            }
        }
    }

    async fn has_post_cutover_backup(&self, backups: &BackupManager) -> Result<bool> {
        let watermark: i64 = self
            .manager
            .metadata_get("cutover_completed_at")
            .await?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        let jobs = backups.list().await;
        Ok(jobs
            .iter()
            .any(|j| j.status == BackupStatus::Completed && j.job_id as i64 >= watermark))
    }

    async fn drop_legacy_schema(&self) -> Result<i64> {
        let size_before = self.legacy_file_size();
        match self.manager.backend() {
            Backend::Sqlite(_) => {
                self.manager
                    .with_sqlite(OpKind::Write, |conn| {
                        conn.execute_batch(
                            "DROP TABLE IF EXISTS legacy_comments;
                             DROP TABLE IF EXISTS legacy_notes;
                             VACUUM;",
                        )
                    })
                    .await?;
                let size_after = self.legacy_file_size();
                Ok((size_before - size_after).max(0))
            }
            Backend::MySql(_) => {
                use mysql_async::prelude::*;
                let mut conn = self.manager.mysql_conn().await?;
                conn.query_drop("DROP TABLE IF EXISTS legacy_comments").await?;
                conn.query_drop("DROP TABLE IF EXISTS legacy_notes").await?;
                // InnoDB reclaims table space via OPTIMIZE TABLE, not a file-size
                // delta; there is nothing meaningful to report here.
                Ok(0)
            }
        }
    }

    fn legacy_file_size(&self) -> i64 {
        self.manager
            .sqlite_path()
            .and_then(|p| std::fs::metadata(p).ok())
            .map(|m| m.len() as i64)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackupConfig, EngineConfig, StoreConfig};

    async fn setup() -> (Arc<DatabaseManager>, Arc<LegacyStore>, StoreConfig) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cleanup.db");
        std::mem::forget(dir);
        let backup_dir = tempfile::tempdir().unwrap();
        let config = StoreConfig {
            engine: EngineConfig::Sqlite {
                path: path.to_str().unwrap().to_string(),
                busy_timeout_ms: 1000,
            },
            backup: BackupConfig {
                output_dir: backup_dir.path().to_str().unwrap().to_string(),
            },
            ..Default::default()
        };
        let manager = Arc::new(DatabaseManager::initialize(&config).await.unwrap());
        let legacy = Arc::new(LegacyStore::new(manager.clone()));
        legacy.ensure_schema().await.unwrap();
        (manager, legacy, config)
    }

    #[tokio::test]
    async fn refuses_before_cutover() {
        let (manager, legacy, config) = setup().await;
        let backups = BackupManager::new(manager.clone(), config.backup);
        let cleanup = CleanupManager::new(manager, legacy);
        let err = cleanup.run(&backups).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidInput(_)));
        assert_eq!(cleanup.state(), CleanupState::Idle);
    }

    #[tokio::test]
    async fn refuses_without_post_cutover_backup() {
        let (manager, legacy, config) = setup().await;
        manager.set_v2_only_mode(true).await.unwrap();
        let backups = BackupManager::new(manager.clone(), config.backup);
        let cleanup = CleanupManager::new(manager, legacy);
        let err = cleanup.run(&backups).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn runs_once_cutover_and_backup_are_both_satisfied() {
        let (manager, legacy, config) = setup().await;
        manager.set_v2_only_mode(true).await.unwrap();
        manager.metadata_set("cutover_completed_at", "0").await.unwrap();
        let backups = BackupManager::new(manager.clone(), config.backup);
        backups.create().await.unwrap();
        let cleanup = CleanupManager::new(manager, legacy);
        let report = cleanup.run(&backups).await.unwrap();
        assert_eq!(report.state, CleanupState::Completed);
        assert_eq!(cleanup.state(), CleanupState::Completed);
    }
}
