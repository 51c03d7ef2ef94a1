//! `StorageFacade`: the one surface callers outside
//! this crate talk to. Routes reads/writes to the legacy flat store or the
//! v2 `Datastore` depending on `DatabaseManager::is_v2_only_mode`, and
//! mirrors writes into v2 during dual-write so migration catch-up and
//! cutover validation see a consistent picture without callers ever
//! noticing which phase the migration is in.

use std::sync::Arc;

use crate::datastore::Datastore;
use crate::legacy::adapter::LegacyAdapter;
use crate::legacy::{DatabaseStats, Interface, LegacyStore};
use crate::manager::DatabaseManager;
use crate::migration::DirtyIdTracker;
use crate::models::{DynamicThreshold, Label, Note, NoteComment};
use crate::repositories::SpeciesCount;
use crate::error::Result;

pub struct StorageFacade {
    manager: Arc<DatabaseManager>,
    legacy: Arc<LegacyStore>,
    v2: LegacyAdapter,
    dirty: Arc<DirtyIdTracker>,
}

impl StorageFacade {
    pub fn new(
        manager: Arc<DatabaseManager>,
        legacy: Arc<LegacyStore>,
        v2: Arc<Datastore>,
        dirty: Arc<DirtyIdTracker>,
        common_name_lookup: Arc<dyn Fn(&str) -> Option<String> + Send + Sync>,
    ) -> Self {
        Self {
            manager,
            legacy,
            v2: LegacyAdapter::new(v2, common_name_lookup),
            dirty,
        }
    }

    async fn cut_over(&self) -> Result<bool> {
        self.manager.is_v2_only_mode().await
    }
}

#[async_trait::async_trait]
impl Interface for StorageFacade {
    async fn save(&self, note: &Note) -> Result<Note> {
        if self.cut_over().await? {
            return self.v2.save(note).await;
        }
        let saved = self.legacy.save(note).await?;
        let mirror = Note { id: 0, ..saved.clone() };
        if let Err(e) = self.v2.save_with_legacy_id(&mirror, saved.id).await {
            tracing::warn!(legacy_id = saved.id, error = %e, "dual-write mirror to v2 failed");
            self.dirty.mark(saved.id, &e.to_string()).await?;
        }
        Ok(saved)
    }

    async fn get(&self, id: i64) -> Result<Note> {
        if self.cut_over().await? {
            self.v2.get(id).await
        } else {
            self.legacy.get(id).await
        }
    }

    async fn delete(&self, id: i64) -> Result<()> {
        if self.cut_over().await? {
            return self.v2.delete(id).await;
        }
        self.legacy.delete(id).await?;
        self.dirty.clear(id).await
    }

    async fn count(&self) -> Result<i64> {
        if self.cut_over().await? {
            self.v2.count().await
        } else {
            self.legacy.count().await
        }
    }

    async fn all_ids(&self) -> Result<Vec<i64>> {
        if self.cut_over().await? {
            self.v2.all_ids().await
        } else {
            self.legacy.all_ids().await
        }
    }

    async fn search(&self, query: Option<&str>, ascending: bool, limit: i64, offset: i64) -> Result<Vec<Note>> {
        if self.cut_over().await? {
            self.v2.search(query, ascending, limit, offset).await
        } else {
            self.legacy.search(query, ascending, limit, offset).await
        }
    }

    async fn species_detections(&self, scientific_name: &str, limit: i64) -> Result<Vec<Note>> {
        if self.cut_over().await? {
            self.v2.species_detections(scientific_name, limit).await
        } else {
            self.legacy.species_detections(scientific_name, limit).await
        }
    }

    async fn get_hourly_detections(&self, since: i64, until: i64) -> Result<Vec<Note>> {
        if self.cut_over().await? {
            self.v2.get_hourly_detections(since, until).await
        } else {
            self.legacy.get_hourly_detections(since, until).await
        }
    }

    async fn get_last_detections(&self, n: i64) -> Result<Vec<Note>> {
        if self.cut_over().await? {
            self.v2.get_last_detections(n).await
        } else {
            self.legacy.get_last_detections(n).await
        }
    }

    async fn get_all_notes(&self) -> Result<Vec<Note>> {
        if self.cut_over().await? {
            self.v2.get_all_notes().await
        } else {
            self.legacy.get_all_notes().await
        }
    }

    async fn get_all_detected_species(&self) -> Result<Vec<Label>> {
        if self.cut_over().await? {
            self.v2.get_all_detected_species().await
        } else {
            self.legacy.get_all_detected_species().await
        }
    }

    async fn get_top_birds_data(
        &self,
        since: i64,
        until: i64,
        min_confidence: f64,
        limit: i64,
    ) -> Result<Vec<SpeciesCount>> {
        if self.cut_over().await? {
            self.v2.get_top_birds_data(since, until, min_confidence, limit).await
        } else {
            self.legacy.get_top_birds_data(since, until, min_confidence, limit).await
        }
    }

    async fn set_review(&self, detection_id: i64, verdict: &str, created_at: i64) -> Result<()> {
        if self.cut_over().await? {
            self.v2.set_review(detection_id, verdict, created_at).await
        } else {
            self.legacy.set_review(detection_id, verdict, created_at).await
        }
    }

    async fn add_comment(&self, detection_id: i64, body: &str, created_at: i64) -> Result<NoteComment> {
        if self.cut_over().await? {
            self.v2.add_comment(detection_id, body, created_at).await
        } else {
            self.legacy.add_comment(detection_id, body, created_at).await
        }
    }

    async fn delete_comment(&self, comment_id: i64) -> Result<()> {
        if self.cut_over().await? {
            self.v2.delete_comment(comment_id).await
        } else {
            self.legacy.delete_comment(comment_id).await
        }
    }

    async fn lock(&self, detection_id: i64, locked_at: i64) -> Result<()> {
        if self.cut_over().await? {
            self.v2.lock(detection_id, locked_at).await
        } else {
            self.legacy.lock(detection_id, locked_at).await
        }
    }

    async fn unlock(&self, detection_id: i64) -> Result<()> {
        if self.cut_over().await? {
            self.v2.unlock(detection_id).await
        } else {
            self.legacy.unlock(detection_id).await
        }
    }

    async fn threshold_by_common_name(&self, common_name: &str) -> Result<Option<DynamicThreshold>> {
        if self.cut_over().await? {
            self.v2.threshold_by_common_name(common_name).await
        } else {
            self.legacy.threshold_by_common_name(common_name).await
        }
    }

    async fn upsert_threshold(&self, threshold: &DynamicThreshold) -> Result<()> {
        if self.cut_over().await? {
            self.v2.upsert_threshold(threshold).await
        } else {
            self.legacy.upsert_threshold(threshold).await
        }
    }

    async fn delete_dynamic_threshold(&self, common_name: &str) -> Result<()> {
        if self.cut_over().await? {
            self.v2.delete_dynamic_threshold(common_name).await
        } else {
            self.legacy.delete_dynamic_threshold(common_name).await
        }
    }

    async fn record_notification_sent(
        &self,
        common_name: &str,
        notification_type: &str,
        last_sent_at: i64,
        expires_at: i64,
    ) -> Result<()> {
        if self.cut_over().await? {
            self.v2
                .record_notification_sent(common_name, notification_type, last_sent_at, expires_at)
                .await
        } else {
            self.legacy
                .record_notification_sent(common_name, notification_type, last_sent_at, expires_at)
                .await
        }
    }

    async fn is_notification_suppressed(&self, common_name: &str, notification_type: &str, now: i64) -> Result<bool> {
        if self.cut_over().await? {
            self.v2.is_notification_suppressed(common_name, notification_type, now).await
        } else {
            self.legacy.is_notification_suppressed(common_name, notification_type, now).await
        }
    }

    async fn get_database_stats(&self) -> Result<DatabaseStats> {
        if self.cut_over().await? {
            self.v2.get_database_stats().await
        } else {
            self.legacy.get_database_stats().await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EngineConfig, StoreConfig};

    async fn test_facade() -> StorageFacade {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("facade.db");
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
        let dirty = Arc::new(DirtyIdTracker::new(manager.clone()));
        StorageFacade::new(manager, legacy, v2, dirty, Arc::new(|_: &str| None))
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
    async fn pre_cutover_writes_mirror_into_v2() {
        let facade = test_facade().await;
        let saved = facade.save(&sample_note()).await.unwrap();
        assert_eq!(facade.count().await.unwrap(), 1);
        let fetched = facade.get(saved.id).await.unwrap();
        assert_eq!(fetched.scientific_name, "Turdus merula");
    }

    #[tokio::test]
    async fn post_cutover_routes_straight_to_v2() {
        let facade = test_facade().await;
        facade.manager.set_v2_only_mode(true).await.unwrap();
        let saved = facade.save(&sample_note()).await.unwrap();
        let fetched = facade.get(saved.id).await.unwrap();
        assert_eq!(fetched.scientific_name, saved.scientific_name);
    }
}
