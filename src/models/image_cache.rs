use serde::{Deserialize, Serialize};

/// One row per `(provider, scientific_name)` with URL + license metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageCacheEntry {
    pub provider: String,
    pub scientific_name: String,
    pub image_url: String,
    pub license_name: Option<String>,
    pub license_url: Option<String>,
    pub author: Option<String>,
    pub cached_at: i64,
}
