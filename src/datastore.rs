//! The v2 `Datastore`: composes every repository over one shared
//! `DatabaseManager` and implements the legacy `Interface` trait directly,
//! so migration code can treat both stores as interchangeable.

use std::sync::Arc;

use crate::error::{Result, StoreError};
use crate::legacy::{DatabaseStats, Interface};
use crate::manager::DatabaseManager;
use crate::models::{split_legacy_label, Detection, DetectionInput, DynamicThreshold, Label, Model, Note, NoteComment};
use crate::repositories::{
    CommentRepository, DetectionRepository, ImageCacheRepository, LabelRepository, LockRepository,
    ModelRepository, NotificationRepository, ReviewRepository, SearchFilter, SourceRepository, SpeciesCount,
    ThresholdRepository, WeatherRepository,
};

pub struct Datastore {
    pub manager: Arc<DatabaseManager>,
    pub detections: DetectionRepository,
    pub labels: LabelRepository,
    pub models: ModelRepository,
    pub sources: SourceRepository,
    pub weather: WeatherRepository,
    pub reviews: ReviewRepository,
    pub locks: LockRepository,
    pub comments: CommentRepository,
    pub image_cache: ImageCacheRepository,
    pub thresholds: ThresholdRepository,
    pub notifications: NotificationRepository,
}

impl Datastore {
    pub fn new(manager: Arc<DatabaseManager>) -> Self {
        Self {
            detections: DetectionRepository::new(manager.clone()),
            labels: LabelRepository::new(manager.clone()),
            models: ModelRepository::new(manager.clone()),
            sources: SourceRepository::new(manager.clone()),
            weather: WeatherRepository::new(manager.clone()),
            reviews: ReviewRepository::new(manager.clone()),
            locks: LockRepository::new(manager.clone()),
            comments: CommentRepository::new(manager.clone()),
            image_cache: ImageCacheRepository::new(manager.clone()),
            thresholds: ThresholdRepository::new(manager.clone()),
            notifications: NotificationRepository::new(manager.clone()),
            manager,
        }
    }

    /// Builds a flat `Note` for list endpoints: label, source, review and
    /// lock state, same as `get()`, but skipping the per-row comments join —
    /// a list response never renders comment bodies, and loading N comment
    /// sets for an N-row page would dominate the query cost for nothing.
    async fn note_for_list(&self, detection: Detection) -> Result<Note> {
        let label = self.labels.by_id(detection.label_id).await?;
        let source_safe_string = match detection.source_id {
            Some(source_id) => Some(self.sources.by_id(source_id).await?.safe_string),
            None => None,
        };
        let review = self.reviews.by_detection(detection.id).await?;
        let locked = self.locks.is_locked(detection.id).await?;
        Ok(Note {
            id: detection.id,
            common_name: label.scientific_name.clone(),
            scientific_name: label.scientific_name,
            confidence: detection.confidence,
            detected_at: detection.detected_at,
            begin_time: detection.begin_time,
            end_time: detection.end_time,
            latitude: detection.latitude,
            longitude: detection.longitude,
            clip_name: detection.clip_name,
            processing_time_ms: detection.processing_time_ms,
            source: source_safe_string,
            verified: review.map(|r| r.verdict),
            locked,
            comments: Vec::new(),
        })
    }
}

/// Direct `Interface` implementation over the normalized schema — used once
/// `is_v2_only_mode` is set and the legacy file is gone, so the
/// `StorageFacade` can keep returning flat `Note`s without the
/// `legacy::adapter` indirection (which additionally applies an external
/// common-name lookup this impl does not have access to; the facade is
/// responsible for picking whichever of the two the caller needs).
#[async_trait::async_trait]
impl Interface for Datastore {
    async fn save(&self, note: &Note) -> Result<Note> {
        let (scientific_name, _) = split_legacy_label(&note.scientific_name);
        let input = DetectionInput {
            scientific_name,
            model_name: Model::DEFAULT_NAME.to_string(),
            model_version: Model::DEFAULT_VERSION.to_string(),
            model_variant: Model::DEFAULT_VARIANT.to_string(),
            source: note.source.clone(),
            detected_at: note.detected_at,
            begin_time: note.begin_time,
            end_time: note.end_time,
            confidence: note.confidence,
            latitude: note.latitude,
            longitude: note.longitude,
            clip_name: note.clip_name.clone(),
            processing_time_ms: note.processing_time_ms,
            legacy_id: None,
        };
        let detection = self.detections.save(input, None).await?;
        self.get(detection.id).await
    }

    async fn get(&self, id: i64) -> Result<Note> {
        let with_relations = self.detections.get_with_relations(id).await?;
        let comments = self.comments.by_detection(id).await?;
        let review = self.reviews.by_detection(id).await?;
        let locked = self.locks.is_locked(id).await?;
        Ok(Note {
            id,
            common_name: with_relations.label.scientific_name.clone(),
            scientific_name: with_relations.label.scientific_name,
            confidence: with_relations.detection.confidence,
            detected_at: with_relations.detection.detected_at,
            begin_time: with_relations.detection.begin_time,
            end_time: with_relations.detection.end_time,
            latitude: with_relations.detection.latitude,
            longitude: with_relations.detection.longitude,
            clip_name: with_relations.detection.clip_name,
            processing_time_ms: with_relations.detection.processing_time_ms,
            source: with_relations.source_safe_string,
            verified: review.map(|r| r.verdict),
            locked,
            comments,
        })
    }

    async fn delete(&self, id: i64) -> Result<()> {
        self.detections.delete(id).await
    }

    async fn count(&self) -> Result<i64> {
        Ok(self.all_ids().await?.len() as i64)
    }

    async fn all_ids(&self) -> Result<Vec<i64>> {
        let rows = self
            .detections
            .search(&SearchFilter {
                limit: i64::MAX,
                ..Default::default()
            })
            .await?;
        Ok(rows.into_iter().map(|d| d.id).collect())
    }

    async fn search(&self, query: Option<&str>, ascending: bool, limit: i64, offset: i64) -> Result<Vec<Note>> {
        let ids = self.detections.search_ids_by_name(query, ascending, limit, offset).await?;
        let mut notes = Vec::with_capacity(ids.len());
        for id in ids {
            notes.push(self.note_for_list(self.detections.by_id(id).await?).await?);
        }
        Ok(notes)
    }

    async fn species_detections(&self, scientific_name: &str, limit: i64) -> Result<Vec<Note>> {
        let rows = self.detections.species_detections(scientific_name, limit).await?;
        let mut notes = Vec::with_capacity(rows.len());
        for row in rows {
            notes.push(self.note_for_list(row).await?);
        }
        Ok(notes)
    }

    async fn get_hourly_detections(&self, since: i64, until: i64) -> Result<Vec<Note>> {
        let rows = self
            .detections
            .search(&SearchFilter {
                since: Some(since),
                until: Some(until),
                limit: i64::MAX,
                ..Default::default()
            })
            .await?;
        let mut notes = Vec::with_capacity(rows.len());
        for row in rows {
            notes.push(self.note_for_list(row).await?);
        }
        Ok(notes)
    }

    async fn get_last_detections(&self, n: i64) -> Result<Vec<Note>> {
        let rows = self.detections.search(&SearchFilter { limit: n, ..Default::default() }).await?;
        let mut notes = Vec::with_capacity(rows.len());
        for row in rows {
            notes.push(self.note_for_list(row).await?);
        }
        Ok(notes)
    }

    async fn get_all_notes(&self) -> Result<Vec<Note>> {
        let rows = self
            .detections
            .search(&SearchFilter {
                limit: i64::MAX,
                ..Default::default()
            })
            .await?;
        let mut notes = Vec::with_capacity(rows.len());
        for row in rows {
            notes.push(self.note_for_list(row).await?);
        }
        Ok(notes)
    }

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
        self.detections
            .top_birds(since, until, min_confidence, limit, |name| Some(name.to_string()))
            .await
    }

    async fn set_review(&self, detection_id: i64, verdict: &str, created_at: i64) -> Result<()> {
        self.reviews.upsert(detection_id, verdict, created_at).await
    }

    async fn add_comment(&self, detection_id: i64, body: &str, created_at: i64) -> Result<NoteComment> {
        self.comments.add(detection_id, body, created_at).await
    }

    async fn delete_comment(&self, comment_id: i64) -> Result<()> {
        self.comments.delete(comment_id).await
    }

    async fn lock(&self, detection_id: i64, locked_at: i64) -> Result<()> {
        self.locks.lock(detection_id, locked_at).await
    }

    async fn unlock(&self, detection_id: i64) -> Result<()> {
        self.locks.unlock(detection_id).await
    }

    /// `common_name` is treated literally as a scientific name here — the
    /// normalized schema has no common-name column of its own, the same
    /// literal-fallback precedent `get()`/`top_birds` use elsewhere in this
    /// impl.
    async fn threshold_by_common_name(&self, common_name: &str) -> Result<Option<DynamicThreshold>> {
        self.thresholds.by_common_name(|name| Some(name.to_string()), common_name).await
    }

    async fn upsert_threshold(&self, threshold: &DynamicThreshold) -> Result<()> {
        self.thresholds.upsert(threshold).await
    }

    async fn delete_dynamic_threshold(&self, common_name: &str) -> Result<()> {
        self.thresholds.delete_dynamic_threshold(|name| Some(name.to_string()), common_name).await
    }

    async fn record_notification_sent(
        &self,
        common_name: &str,
        notification_type: &str,
        last_sent_at: i64,
        expires_at: i64,
    ) -> Result<()> {
        let label_id = self
            .labels
            .by_scientific_name(common_name)
            .await?
            .ok_or_else(|| StoreError::not_found(format!("label {common_name}")))?
            .id;
        self.notifications.record_sent(label_id, notification_type, last_sent_at, expires_at).await
    }

    async fn is_notification_suppressed(&self, common_name: &str, notification_type: &str, now: i64) -> Result<bool> {
        match self.labels.by_scientific_name(common_name).await? {
            Some(label) => self.notifications.is_suppressed(label.id, notification_type, now).await,
            None => Ok(false),
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EngineConfig, StoreConfig};

    async fn test_datastore() -> Datastore {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("datastore.db");
        std::mem::forget(dir);
        let config = StoreConfig {
            engine: EngineConfig::Sqlite {
                path: path.to_str().unwrap().to_string(),
                busy_timeout_ms: 1000,
            },
            ..Default::default()
        };
        let manager = Arc::new(DatabaseManager::initialize(&config).await.unwrap());
        Datastore::new(manager)
    }

    fn sample_note() -> Note {
        Note {
            id: 0,
            scientific_name: "Turdus merula".to_string(),
            common_name: String::new(),
            confidence: 0.77,
            detected_at: 1_700_000_000,
            begin_time: 1_700_000_000,
            end_time: 1_700_000_003,
            latitude: 60.1,
            longitude: 24.9,
            clip_name: None,
            processing_time_ms: 5,
            source: None,
            verified: None,
            locked: false,
            comments: Vec::new(),
        }
    }

    #[tokio::test]
    async fn save_through_interface_persists_relations_visibly() {
        let store = test_datastore().await;
        let saved = store.save(&sample_note()).await.unwrap();
        assert_eq!(saved.scientific_name, "Turdus merula");
        let fetched = store.get(saved.id).await.unwrap();
        assert_eq!(fetched.scientific_name, saved.scientific_name);
    }
}
