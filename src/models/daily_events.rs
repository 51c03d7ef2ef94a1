use serde::{Deserialize, Serialize};

/// One row per `(date, location)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyEvents {
    pub date: String,
    pub latitude: f64,
    pub longitude: f64,
    pub sunrise: Option<i64>,
    pub sunset: Option<i64>,
    pub country: Option<String>,
    pub city: Option<String>,
}
