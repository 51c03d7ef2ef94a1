use serde::{Deserialize, Serialize};

/// Per-species runtime threshold state, keyed by `label_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DynamicThreshold {
    pub label_id: i64,
    /// The scientific name, persisted verbatim for display without a join.
    pub scientific_name: String,
    pub level: i32,
    pub current_value: f64,
    pub base_threshold: f64,
    pub valid_hours: i32,
    pub expires_at: i64,
    pub trigger_count: i64,
    pub highest_level_reached: i32,
}

/// Append-only log of level changes, keyed by `label_id`.
///
/// `species_name` is stored and returned verbatim as captured at event-log
/// time — it is never re-derived from the current label map even if the
/// label map changes between logging and display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdEvent {
    pub id: i64,
    pub label_id: i64,
    pub species_name: String,
    pub old_level: i32,
    pub new_level: i32,
    pub created_at: i64,
}
