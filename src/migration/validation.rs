//! Validation: compares legacy/v2 counts and reconciles dirty ids before
//! cutover is permitted. Cutover requires `validation_ok`, which holds iff
//! `legacy_count == v2_count` and no dirty ids remain outstanding.

use serde::Serialize;

use crate::datastore::Datastore;
use crate::error::Result;
use crate::legacy::{Interface, LegacyStore};
use crate::repositories::SearchFilter;

use super::dirty::DirtyIdTracker;

#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub ok: bool,
    pub legacy_count: i64,
    pub v2_count: i64,
    pub dirty_count: i64,
    pub detail: String,
}

/// `confidence_tolerance` is accepted for symmetry with a future
/// per-record float comparison but count equivalence is the only check
/// implemented here; a fuller per-record confidence diff is left to the
/// `dirty_ids` reconciliation pass the copy worker already performs.
pub async fn validate(
    legacy: &LegacyStore,
    v2: &Datastore,
    dirty: &DirtyIdTracker,
    _confidence_tolerance: f64,
) -> Result<ValidationReport> {
    let legacy_count = legacy.count().await?;
    let v2_count = v2
        .detections
        .search(&SearchFilter {
            limit: i64::MAX,
            ..Default::default()
        })
        .await?
        .len() as i64;
    let dirty_count = dirty.count().await?;

    let ok = legacy_count == v2_count && dirty_count == 0;
    let detail = if ok {
        "legacy and v2 record counts match, no dirty ids outstanding".to_string()
    } else {
        format!(
            "legacy={legacy_count} v2={v2_count} dirty={dirty_count}; another copy pass is required"
        )
    };

    Ok(ValidationReport {
        ok,
        legacy_count,
        v2_count,
        dirty_count,
        detail,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EngineConfig, StoreConfig};
    use crate::manager::DatabaseManager;
    use crate::models::{DetectionInput, Model};
    use std::sync::Arc;

    async fn fixtures() -> (LegacyStore, Datastore, DirtyIdTracker) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("validate.db");
        std::mem::forget(dir);
        let config = StoreConfig {
            engine: EngineConfig::Sqlite {
                path: path.to_str().unwrap().to_string(),
                busy_timeout_ms: 1000,
            },
            ..Default::default()
        };
        let manager = Arc::new(DatabaseManager::initialize(&config).await.unwrap());
        let legacy = LegacyStore::new(manager.clone());
        legacy.ensure_schema().await.unwrap();
        let v2 = Datastore::new(manager.clone());
        let dirty = DirtyIdTracker::new(manager);
        (legacy, v2, dirty)
    }

    #[tokio::test]
    async fn matching_counts_and_no_dirty_ids_validate_ok() {
        let (legacy, v2, dirty) = fixtures().await;
        let note = crate::models::Note {
            id: 0,
            scientific_name: "Turdus merula".to_string(),
            common_name: String::new(),
            confidence: 0.9,
            detected_at: 100,
            begin_time: 100,
            end_time: 103,
            latitude: 0.0,
            longitude: 0.0,
            clip_name: None,
            processing_time_ms: 0,
            source: None,
            verified: None,
            locked: false,
            comments: Vec::new(),
        };
        legacy.save(&note).await.unwrap();
        v2.detections
            .save(
                DetectionInput {
                    scientific_name: "Turdus merula".to_string(),
                    model_name: Model::DEFAULT_NAME.to_string(),
                    model_version: Model::DEFAULT_VERSION.to_string(),
                    model_variant: Model::DEFAULT_VARIANT.to_string(),
                    source: None,
                    detected_at: 100,
                    begin_time: 100,
                    end_time: 103,
                    confidence: 0.9,
                    latitude: 0.0,
                    longitude: 0.0,
                    clip_name: None,
                    processing_time_ms: 0,
                    legacy_id: Some(1),
                },
                None,
            )
            .await
            .unwrap();

        let report = validate(&legacy, &v2, &dirty, 1e-6).await.unwrap();
        assert!(report.ok);
        assert_eq!(report.legacy_count, report.v2_count);
    }

    #[tokio::test]
    async fn outstanding_dirty_ids_fail_validation() {
        let (legacy, v2, dirty) = fixtures().await;
        dirty.mark(99, "copy failed").await.unwrap();
        let report = validate(&legacy, &v2, &dirty, 1e-6).await.unwrap();
        assert!(!report.ok);
    }
}
