//! TTL-cached detection-rate histogram: double-checked
//! locking over a `tokio::sync::RwLock`, keyed by the `(since, until)`
//! window so distinct callers (24h view, N-day view) don't evict each
//! other's entry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use crate::error::Result;
use crate::manager::DatabaseManager;
use crate::repositories::{DetectionRepository, HourlyCount};

struct Entry {
    value: Vec<HourlyCount>,
    fetched_at: Instant,
}

pub struct DetectionRateCache {
    ttl: Duration,
    entries: RwLock<HashMap<(i64, i64), Entry>>,
    _manager: Arc<DatabaseManager>,
}

impl DetectionRateCache {
    pub fn new(manager: Arc<DatabaseManager>, ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
            _manager: manager,
        }
    }

    pub async fn get(&self, detections: &DetectionRepository, since: i64, until: i64) -> Result<Vec<HourlyCount>> {
        let key = (since, until);
        {
            let cache = self.entries.read().await;
            if let Some(entry) = cache.get(&key) {
                if entry.fetched_at.elapsed() < self.ttl {
                    return Ok(entry.value.clone());
                }
            }
        }

        let mut cache = self.entries.write().await;
        if let Some(entry) = cache.get(&key) {
            if entry.fetched_at.elapsed() < self.ttl {
                return Ok(entry.value.clone());
            }
        }

        let value = detections.get_hourly_detections(since, until).await?;
        cache.insert(
            key,
            Entry {
                value: value.clone(),
                fetched_at: Instant::now(),
            },
        );
        Ok(value)
    }
}
