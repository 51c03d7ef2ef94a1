//! The legacy→v2 migration state machine: dual-write discipline,
//! background batch copy, validation, cutover, cancellation, and the
//! observable progress snapshot.

pub mod dirty;
pub mod prerequisites;
pub mod validation;

use std::sync::atomic::{AtomicI64, AtomicU8, Ordering};
use std::sync::Arc;

use serde::Serialize;

use crate::config::MigrationConfig;
use crate::datastore::Datastore;
use crate::error::{Check, Result, StoreError};
use crate::legacy::{Interface, LegacyStore};
use crate::manager::DatabaseManager;

pub use dirty::DirtyIdTracker;
pub use prerequisites::run_prerequisites;
pub use validation::{validate, ValidationReport};

/// Migration states, in the order a normal run passes through them.
/// `paused` is reachable only from `dual_write`/`migrating`;
/// `failed`/`cancelled` are reachable from any in-flight state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
    Idle,
    Initializing,
    DualWrite,
    Migrating,
    Paused,
    MigratingPredictions,
    Validating,
    Cutover,
    Completed,
    Failed,
    Cancelled,
}

impl State {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => State::Idle,
            1 => State::Initializing,
            2 => State::DualWrite,
            3 => State::Migrating,
            4 => State::Paused,
            5 => State::MigratingPredictions,
            6 => State::Validating,
            7 => State::Cutover,
            8 => State::Completed,
            9 => State::Failed,
            _ => State::Cancelled,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            State::Idle => 0,
            State::Initializing => 1,
            State::DualWrite => 2,
            State::Migrating => 3,
            State::Paused => 4,
            State::MigratingPredictions => 5,
            State::Validating => 6,
            State::Cutover => 7,
            State::Completed => 8,
            State::Failed => 9,
            State::Cancelled => 10,
        }
    }

    fn name(self) -> &'static str {
        match self {
            State::Idle => "idle",
            State::Initializing => "initializing",
            State::DualWrite => "dual_write",
            State::Migrating => "migrating",
            State::Paused => "paused",
            State::MigratingPredictions => "migrating_predictions",
            State::Validating => "validating",
            State::Cutover => "cutover",
            State::Completed => "completed",
            State::Failed => "failed",
            State::Cancelled => "cancelled",
        }
    }

    /// The states reachable directly from `self`, excluding the
    /// always-reachable `Failed`/`Cancelled` escape hatches which every
    /// in-flight state permits.
    fn allowed_targets(self) -> &'static [State] {
        match self {
            State::Idle => &[State::Initializing],
            State::Initializing => &[State::DualWrite],
            State::DualWrite => &[State::Migrating, State::Paused],
            State::Migrating => &[State::Paused, State::MigratingPredictions],
            State::Paused => &[State::DualWrite, State::Migrating],
            State::MigratingPredictions => &[State::Validating],
            State::Validating => &[State::Cutover, State::Failed],
            State::Cutover => &[State::Completed],
            State::Failed => &[State::Validating],
            State::Completed | State::Cancelled => &[],
        }
    }

    fn is_in_flight(self) -> bool {
        !matches!(self, State::Idle | State::Completed | State::Failed | State::Cancelled)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProgressSnapshot {
    pub state: String,
    pub total_records: i64,
    pub migrated_records: i64,
    pub dirty_count: i64,
    pub checks: Vec<Check>,
}

/// Drives the legacy→v2 copy. Holds non-owning references to both
/// datastores; ownership of the data itself stays with the callers that
/// constructed them.
pub struct MigrationEngine {
    legacy: Arc<LegacyStore>,
    v2: Arc<Datastore>,
    manager: Arc<DatabaseManager>,
    config: MigrationConfig,
    state: AtomicU8,
    total_records: AtomicI64,
    migrated_records: AtomicI64,
    dirty: DirtyIdTracker,
}

impl MigrationEngine {
    pub fn new(
        legacy: Arc<LegacyStore>,
        v2: Arc<Datastore>,
        manager: Arc<DatabaseManager>,
        config: MigrationConfig,
    ) -> Self {
        Self {
            dirty: DirtyIdTracker::new(manager.clone()),
            legacy,
            v2,
            manager,
            config,
            state: AtomicU8::new(State::Idle.as_u8()),
            total_records: AtomicI64::new(0),
            migrated_records: AtomicI64::new(0),
        }
    }

    pub fn state(&self) -> State {
        State::from_u8(self.state.load(Ordering::Acquire))
    }

    fn transition(&self, to: State) -> Result<()> {
        let from = self.state();
        let allowed = from.allowed_targets().contains(&to)
            || (matches!(to, State::Failed | State::Cancelled) && from.is_in_flight());
        if !allowed {
            return Err(StoreError::InvalidTransition {
                from: from.name().to_string(),
                attempted: to.name().to_string(),
            });
        }
        self.state.store(to.as_u8(), Ordering::Release);
        Ok(())
    }

    /// Runs prerequisite checks, then moves `idle -> initializing ->
    /// dual_write` and records the pre-migration total. Any critical check
    /// failure aborts before the first transition.
    pub async fn start(&self) -> Result<Vec<Check>> {
        let checks = run_prerequisites(&self.manager, &self.legacy).await?;
        if checks.iter().any(|c| !c.ok && c.severity == crate::error::Severity::Critical) {
            return Err(StoreError::Integrity(
                "critical prerequisite check failed, migration not started".to_string(),
            ));
        }
        self.transition(State::Initializing)?;
        let total = self.legacy.count().await?;
        self.total_records.store(total, Ordering::Release);
        self.transition(State::DualWrite)?;
        Ok(checks)
    }

    pub fn pause(&self) -> Result<()> {
        self.transition(State::Paused)
    }

    pub fn resume(&self) -> Result<()> {
        self.transition(State::Migrating)
    }

    pub fn cancel(&self) -> Result<()> {
        self.transition(State::Cancelled)
    }

    /// Re-enters validation after a failed run, so a transient mismatch
    /// doesn't require constructing a whole new engine to recover from.
    pub fn retry_validation(&self) -> Result<()> {
        self.transition(State::Validating)
    }

    /// Begins the background batch copy. Caller is expected to call this
    /// from the ops binary's spawned worker loop, one batch per tick, until
    /// it returns `migrated_records == total_records`.
    pub async fn run_one_batch(&self) -> Result<ProgressSnapshot> {
        if self.state() == State::DualWrite {
            self.transition(State::Migrating)?;
        }
        if self.state() != State::Migrating {
            return Err(StoreError::InvalidTransition {
                from: self.state().name().to_string(),
                attempted: "migrating".to_string(),
            });
        }

        // Re-read the watermark rather than trusting `migrated_records`:
        // the counter is an in-memory, restart-reset progress display, while
        // `_metadata` is the durable cursor every batch actually advances.
        let watermark = self
            .manager
            .metadata_get("migration_watermark")
            .await?
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(0);
        let ids = self.legacy.ids_after(watermark, self.config.batch_size).await?;

        if ids.is_empty() {
            self.transition(State::MigratingPredictions)?;
            self.transition(State::Validating)?;
            return self.snapshot().await;
        }

        self.commit_batch_with_retry(&ids).await?;
        self.migrated_records.fetch_add(ids.len() as i64, Ordering::AcqRel);
        let new_watermark = ids.iter().copied().max().unwrap_or(watermark);
        self.manager.metadata_set("migration_watermark", &new_watermark.to_string()).await?;
        self.snapshot().await
    }

    /// Resolves every legacy row in the batch to v2 ids (interning
    /// label/model/source, each idempotent on its own) and skips ids already
    /// mirrored by the dual-write tee path, before any transaction opens.
    async fn resolve_batch(&self, ids: &[i64]) -> Result<Vec<crate::repositories::ResolvedDetectionRow>> {
        let mut rows = Vec::with_capacity(ids.len());
        for &legacy_id in ids {
            if self.v2.detections.by_legacy_id(legacy_id).await?.is_some() {
                continue;
            }
            let note = self.legacy.get(legacy_id).await?;
            let model = self
                .v2
                .models
                .get_or_create(
                    crate::models::Model::DEFAULT_NAME,
                    crate::models::Model::DEFAULT_VERSION,
                    crate::models::Model::DEFAULT_VARIANT,
                )
                .await?;
            let label = self
                .v2
                .labels
                .get_or_create(&note.scientific_name, crate::models::LabelType::SPECIES_ID, model.id, None)
                .await?;
            let source_id = match &note.source {
                Some(s) if !s.is_empty() => Some(self.v2.sources.get_or_create(s).await?.id),
                _ => None,
            };
            rows.push(crate::repositories::ResolvedDetectionRow {
                label_id: label.id,
                model_id: model.id,
                source_id,
                weather_id: None,
                detected_at: note.detected_at,
                begin_time: note.begin_time,
                end_time: note.end_time,
                confidence: note.confidence,
                latitude: note.latitude,
                longitude: note.longitude,
                clip_name: note.clip_name,
                processing_time_ms: note.processing_time_ms,
                legacy_id: Some(legacy_id),
            });
        }
        Ok(rows)
    }

    /// Commits one batch transaction, retrying the whole batch on a
    /// transient failure with a 100/400/1600ms backoff. On final exhaustion,
    /// marks every id in the batch dirty and fails the migration outright —
    /// a batch that can't commit after retries needs operator attention, not
    /// another pass.
    async fn commit_batch_with_retry(&self, ids: &[i64]) -> Result<()> {
        let rows = self.resolve_batch(ids).await?;
        if rows.is_empty() {
            return Ok(());
        }
        let mut attempt = 0;
        loop {
            match self.v2.detections.save_many_in_transaction(rows.clone()).await {
                Ok(_) => return Ok(()),
                Err(e) if e.is_retryable() && attempt < self.config.max_batch_retries => {
                    attempt += 1;
                    let backoff = self.config.backoff_base_ms * 4u64.pow(attempt - 1);
                    tokio::time::sleep(std::time::Duration::from_millis(backoff)).await;
                }
                Err(e) => {
                    for &legacy_id in ids {
                        self.dirty
                            .mark(legacy_id, &format!("batch copy failed after {attempt} retries: {e}"))
                            .await?;
                    }
                    self.transition(State::Failed)?;
                    return Err(e);
                }
            }
        }
    }

    /// Compares legacy/v2 counts and reconciles dirty ids. Moves
    /// `validating -> cutover` on success, or back to
    /// `migrating` if a mismatch needs another copy pass.
    pub async fn validate_and_advance(&self) -> Result<ValidationReport> {
        if self.state() != State::Validating {
            return Err(StoreError::InvalidTransition {
                from: self.state().name().to_string(),
                attempted: "validating".to_string(),
            });
        }
        let report = validate(&self.legacy, &self.v2, &self.dirty, self.config.confidence_tolerance).await?;
        if report.ok {
            self.transition(State::Cutover)?;
        } else {
            // A mismatch here means validation itself failed, not that
            // another copy pass would fix it — `retry_validation` is the
            // explicit, operator-initiated way back in once the underlying
            // cause (usually a dirty id) is addressed.
            self.transition(State::Failed)?;
        }
        Ok(report)
    }

    /// Flips `is_v2_only_mode`, records when cutover completed, and moves
    /// `cutover -> completed`. Irreversible: once completed, the only
    /// further transition is starting a fresh migration run, which requires
    /// constructing a new engine.
    pub async fn complete_cutover(&self) -> Result<()> {
        if self.state() != State::Cutover {
            return Err(StoreError::InvalidTransition {
                from: self.state().name().to_string(),
                attempted: "completed".to_string(),
            });
        }
        self.manager.set_v2_only_mode(true).await?;
        self.manager.metadata_set("cutover_completed_at", &now_unix().to_string()).await?;
        self.transition(State::Completed)
    }

    pub async fn snapshot(&self) -> Result<ProgressSnapshot> {
        Ok(ProgressSnapshot {
            state: self.state().name().to_string(),
            total_records: self.total_records.load(Ordering::Acquire),
            migrated_records: self.migrated_records.load(Ordering::Acquire),
            dirty_count: self.dirty.count().await?,
            checks: Vec::new(),
        })
    }
}

/// Wall-clock read for bookkeeping only (when cutover happened), not
/// correctness-critical ordering — same rationale as `dirty::now_unix`.
fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EngineConfig, StoreConfig};

    async fn test_engine() -> MigrationEngine {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("migration.db");
        std::mem::forget(dir);
        let config = StoreConfig {
            engine: EngineConfig::Sqlite {
                path: path.to_str().unwrap().to_string(),
                busy_timeout_ms: 1000,
            },
            ..Default::default()
        };
        let manager = Arc::new(DatabaseManager::initialize(&config).await.unwrap());
        let legacy = Arc::new(LegacyStore::new(manager.clone()));
        legacy.ensure_schema().await.unwrap();
        let v2 = Arc::new(Datastore::new(manager.clone()));
        MigrationEngine::new(legacy, v2, manager, config.migration)
    }

    #[tokio::test]
    async fn idle_cannot_jump_straight_to_migrating() {
        let engine = test_engine().await;
        let err = engine.run_one_batch().await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn start_moves_idle_to_dual_write() {
        let engine = test_engine().await;
        engine.start().await.unwrap();
        assert_eq!(engine.state(), State::DualWrite);
    }

    #[tokio::test]
    async fn empty_legacy_store_reaches_validating_with_no_batches() {
        let engine = test_engine().await;
        engine.start().await.unwrap();
        let snapshot = engine.run_one_batch().await.unwrap();
        assert_eq!(snapshot.state, "validating");
    }

    #[tokio::test]
    async fn cancel_is_reachable_from_dual_write() {
        let engine = test_engine().await;
        engine.start().await.unwrap();
        engine.cancel().unwrap();
        assert_eq!(engine.state(), State::Cancelled);
    }

    #[tokio::test]
    async fn cancel_is_not_reachable_once_completed() {
        let engine = test_engine().await;
        engine.start().await.unwrap();
        engine.run_one_batch().await.unwrap();
        engine.validate_and_advance().await.unwrap();
        engine.complete_cutover().await.unwrap();
        assert_eq!(engine.state(), State::Completed);
        let err = engine.cancel().unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));
    }
}
