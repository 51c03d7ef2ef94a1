//! Bridges the normalized v2 `Datastore` to the legacy flat `Interface`,
//! so callers written against the old API keep working once `is_v2_only_mode`
//! flips and the legacy file is gone.

use std::sync::Arc;

use crate::datastore::Datastore;
use crate::error::Result;
use crate::models::{split_legacy_label, DetectionInput, DynamicThreshold, Label, Model, Note, NoteComment};
use crate::repositories::SpeciesCount;

use super::{DatabaseStats, Interface};

/// Reconstructs a legacy `Note` from a v2 `Detection` and its relations on
/// every read; never stores the flat shape. `common_name` comes from the
/// caller-supplied lookup function, falling back to the scientific name
/// when the lookup returns nothing.
pub struct LegacyAdapter {
    datastore: Arc<Datastore>,
    common_name_lookup: Arc<dyn Fn(&str) -> Option<String> + Send + Sync>,
}

impl LegacyAdapter {
    pub fn new(
        datastore: Arc<Datastore>,
        common_name_lookup: Arc<dyn Fn(&str) -> Option<String> + Send + Sync>,
    ) -> Self {
        Self {
            datastore,
            common_name_lookup,
        }
    }

    fn common_name_for(&self, scientific_name: &str) -> String {
        (self.common_name_lookup)(scientific_name).unwrap_or_else(|| scientific_name.to_string())
    }

    /// Replaces a `Note`'s placeholder `common_name` (the scientific name,
    /// as `Datastore` fills it with no lookup of its own) with this
    /// adapter's real lookup result — applied after delegating a
    /// list-returning call straight to `self.datastore`.
    fn with_common_name(&self, mut note: Note) -> Note {
        note.common_name = self.common_name_for(&note.scientific_name);
        note
    }

    /// Shared by `Interface::save` and `save_with_legacy_id`; `legacy_id` is
    /// threaded through to the v2 row so a later migration-worker batch copy
    /// recognizes this row as already mirrored instead of inserting it again.
    async fn save_inner(&self, note: &Note, legacy_id: Option<i64>) -> Result<Note> {
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
            legacy_id,
        };
        let detection = self.datastore.detections.save(input, None).await?;
        if let Some(verdict) = &note.verified {
            self.datastore
                .reviews
                .upsert(detection.id, verdict, note.detected_at)
                .await?;
        }
        if note.locked {
            self.datastore.locks.lock(detection.id, note.detected_at).await?;
        }
        self.get(detection.id).await
    }

    /// Mirrors a note into v2 carrying the legacy row's real id, for the
    /// dual-write tee path (`StorageFacade::save`). Keeping `legacy_id` set
    /// here is what lets the migration worker's batch copy recognize this
    /// detection as already mirrored instead of inserting a duplicate.
    pub async fn save_with_legacy_id(&self, note: &Note, legacy_id: i64) -> Result<Note> {
        self.save_inner(note, Some(legacy_id)).await
    }
}

#[async_trait::async_trait]
impl Interface for LegacyAdapter {
    async fn save(&self, note: &Note) -> Result<Note> {
        self.save_inner(note, None).await
    }

    async fn get(&self, id: i64) -> Result<Note> {
        let with_relations = self.datastore.detections.get_with_relations(id).await?;
        let comments = self.datastore.comments.by_detection(id).await?;
        let review = self.datastore.reviews.by_detection(id).await?;
        let locked = self.datastore.locks.is_locked(id).await?;
        Ok(Note {
            id,
            common_name: self.common_name_for(&with_relations.label.scientific_name),
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
        self.datastore.detections.delete(id).await
    }

    async fn count(&self) -> Result<i64> {
        Ok(self.all_ids().await?.len() as i64)
    }

    async fn all_ids(&self) -> Result<Vec<i64>> {
        let rows = self
            .datastore
            .detections
            .search(&crate::repositories::SearchFilter {
                limit: i64::MAX,
                ..Default::default()
            })
            .await?;
        Ok(rows.into_iter().map(|d| d.id).collect())
    }

    async fn search(&self, query: Option<&str>, ascending: bool, limit: i64, offset: i64) -> Result<Vec<Note>> {
        let notes = self.datastore.search(query, ascending, limit, offset).await?;
        Ok(notes.into_iter().map(|n| self.with_common_name(n)).collect())
    }

    async fn species_detections(&self, scientific_name: &str, limit: i64) -> Result<Vec<Note>> {
        let notes = self.datastore.species_detections(scientific_name, limit).await?;
        Ok(notes.into_iter().map(|n| self.with_common_name(n)).collect())
    }

    async fn get_hourly_detections(&self, since: i64, until: i64) -> Result<Vec<Note>> {
        let notes = self.datastore.get_hourly_detections(since, until).await?;
        Ok(notes.into_iter().map(|n| self.with_common_name(n)).collect())
    }

    async fn get_last_detections(&self, n: i64) -> Result<Vec<Note>> {
        let notes = self.datastore.get_last_detections(n).await?;
        Ok(notes.into_iter().map(|note| self.with_common_name(note)).collect())
    }

    async fn get_all_notes(&self) -> Result<Vec<Note>> {
        let notes = self.datastore.get_all_notes().await?;
        Ok(notes.into_iter().map(|n| self.with_common_name(n)).collect())
    }

    async fn get_all_detected_species(&self) -> Result<Vec<Label>> {
        self.datastore.get_all_detected_species().await
    }

    /// Bypasses `self.datastore.get_top_birds_data`, which has no lookup of
    /// its own: calls the repository directly with this adapter's real
    /// `common_name_lookup` so results carry real common names instead of
    /// the scientific-name placeholder.
    async fn get_top_birds_data(
        &self,
        since: i64,
        until: i64,
        min_confidence: f64,
        limit: i64,
    ) -> Result<Vec<SpeciesCount>> {
        let lookup = self.common_name_lookup.clone();
        self.datastore
            .detections
            .top_birds(since, until, min_confidence, limit, move |name| lookup(name))
            .await
    }

    async fn set_review(&self, detection_id: i64, verdict: &str, created_at: i64) -> Result<()> {
        self.datastore.set_review(detection_id, verdict, created_at).await
    }

    async fn add_comment(&self, detection_id: i64, body: &str, created_at: i64) -> Result<NoteComment> {
        self.datastore.add_comment(detection_id, body, created_at).await
    }

    async fn delete_comment(&self, comment_id: i64) -> Result<()> {
        self.datastore.delete_comment(comment_id).await
    }

    async fn lock(&self, detection_id: i64, locked_at: i64) -> Result<()> {
        self.datastore.lock(detection_id, locked_at).await
    }

    async fn unlock(&self, detection_id: i64) -> Result<()> {
        self.datastore.unlock(detection_id).await
    }

    /// Threshold/notification state is name-keyed, not row-keyed, so there's
    /// no common-name placeholder to fix up here the way list reads need —
    /// delegate straight through to `self.datastore`'s own literal-fallback
    /// implementations unchanged.
    async fn threshold_by_common_name(&self, common_name: &str) -> Result<Option<DynamicThreshold>> {
        self.datastore.threshold_by_common_name(common_name).await
    }

    async fn upsert_threshold(&self, threshold: &DynamicThreshold) -> Result<()> {
        self.datastore.upsert_threshold(threshold).await
    }

    async fn delete_dynamic_threshold(&self, common_name: &str) -> Result<()> {
        self.datastore.delete_dynamic_threshold(common_name).await
    }

    async fn record_notification_sent(
        &self,
        common_name: &str,
        notification_type: &str,
        last_sent_at: i64,
        expires_at: i64,
    ) -> Result<()> {
        self.datastore
            .record_notification_sent(common_name, notification_type, last_sent_at, expires_at)
            .await
    }

    async fn is_notification_suppressed(&self, common_name: &str, notification_type: &str, now: i64) -> Result<bool> {
        self.datastore.is_notification_suppressed(common_name, notification_type, now).await
    }

    async fn get_database_stats(&self) -> Result<DatabaseStats> {
        self.datastore.get_database_stats().await
    }
}
