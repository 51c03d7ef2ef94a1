use serde::{Deserialize, Serialize};

/// The core fact: one classifier output, normalized v2 shape.
///
/// `legacy_id` is retained permanently, not cleared once migration
/// completes, so a detection can always be traced back to its original
/// legacy row id for reconciliation after cutover.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    pub id: i64,
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

/// Classifier output as received from the audio/classifier pipeline, before
/// label/model/source/weather interning.
#[derive(Debug, Clone, Deserialize)]
pub struct DetectionInput {
    pub scientific_name: String,
    pub model_name: String,
    pub model_version: String,
    pub model_variant: String,
    pub source: Option<String>,
    pub detected_at: i64,
    pub begin_time: i64,
    pub end_time: i64,
    pub confidence: f64,
    pub latitude: f64,
    pub longitude: f64,
    pub clip_name: Option<String>,
    pub processing_time_ms: i64,
    /// Populated only by the migration path.
    pub legacy_id: Option<i64>,
}

/// The flat legacy shape. `scientific_name` and `common_name` are always
/// split apart: `scientific_name = Label.scientific_name`,
/// `common_name = lookup(scientific_name)` if the external label map has an
/// entry, else equal to the scientific name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Note {
    pub id: i64,
    pub scientific_name: String,
    pub common_name: String,
    pub confidence: f64,
    pub detected_at: i64,
    pub begin_time: i64,
    pub end_time: i64,
    pub latitude: f64,
    pub longitude: f64,
    pub clip_name: Option<String>,
    pub processing_time_ms: i64,
    pub source: Option<String>,
    pub verified: Option<String>,
    pub locked: bool,
    pub comments: Vec<super::NoteComment>,
}

/// Additional per-detection classifier output the source code calls
/// "Results" — alternate species candidates with their own confidence,
/// persisted alongside the primary detection for later review/analytics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierResult {
    pub scientific_name: String,
    pub confidence: f64,
}
