use serde::{Deserialize, Serialize};

/// Deduplicated observation row, keyed by `(hour_bucket, source)`. Many
/// detections per weather row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Weather {
    pub id: i64,
    pub hour_bucket: i64,
    pub source: String,
    pub temperature_c: Option<f64>,
    pub humidity_pct: Option<f64>,
    pub wind_speed_ms: Option<f64>,
    pub condition: Option<String>,
}
