//! Database inspector: point-in-time engine metadata, per-table
//! sizes/row counts, and detection-rate histograms, all behind TTL caches so
//! repeated control-plane polling doesn't hammer the live connection.

pub mod mysql_details;
pub mod rate_cache;
pub mod sqlite_details;
pub mod table_stats;

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::RwLock;

use crate::config::InspectorConfig;
use crate::error::Result;
use crate::manager::{Backend, DatabaseManager};
use crate::repositories::DetectionRepository;

pub use mysql_details::MySqlDetails;
pub use rate_cache::DetectionRateCache;
pub use sqlite_details::SqliteDetails;
pub use table_stats::{table_stats, TableStats};

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum EngineDetails {
    Sqlite(SqliteDetails),
    MySql(MySqlDetails),
}

#[derive(Debug, Clone, Serialize)]
pub struct Overview {
    pub engine_details: EngineDetails,
    pub tables: Vec<TableStats>,
}

struct CachedOverview {
    value: Overview,
    fetched_at: std::time::Instant,
}

/// Caches the (relatively expensive) overview assembly behind a TTL, using
/// the same double-checked locking as the detection-rate cache below.
pub struct Inspector {
    manager: Arc<DatabaseManager>,
    detections: DetectionRepository,
    config: InspectorConfig,
    overview: RwLock<Option<CachedOverview>>,
    rate_cache: DetectionRateCache,
}

impl Inspector {
    pub fn new(manager: Arc<DatabaseManager>, config: InspectorConfig) -> Self {
        Self {
            detections: DetectionRepository::new(manager.clone()),
            rate_cache: DetectionRateCache::new(manager.clone(), Duration::from_secs(config.rate_cache_ttl_secs)),
            manager,
            config,
            overview: RwLock::new(None),
        }
    }

    pub async fn overview(&self) -> Result<Overview> {
        let ttl = Duration::from_secs(self.config.overview_ttl_secs);
        {
            let guard = self.overview.read().await;
            if let Some(cached) = guard.as_ref() {
                if cached.fetched_at.elapsed() < ttl {
                    return Ok(cached.value.clone());
                }
            }
        }

        let mut guard = self.overview.write().await;
        if let Some(cached) = guard.as_ref() {
            if cached.fetched_at.elapsed() < ttl {
                return Ok(cached.value.clone());
            }
        }

        let value = self.build_overview().await?;
        *guard = Some(CachedOverview {
            value: value.clone(),
            fetched_at: std::time::Instant::now(),
        });
        Ok(value)
    }

    async fn build_overview(&self) -> Result<Overview> {
        let engine_details = match self.manager.backend() {
            Backend::Sqlite(_) => EngineDetails::Sqlite(sqlite_details::collect(&self.manager).await?),
            Backend::MySql(_) => EngineDetails::MySql(mysql_details::collect(&self.manager).await?),
        };
        let tables = table_stats(&self.manager).await?;
        Ok(Overview { engine_details, tables })
    }

    /// 24h/N-day histogram, TTL-cached independently of the overview since
    /// it's refreshed on a different natural cadence.
    pub async fn detection_rate(&self, since: i64, until: i64) -> Result<Vec<crate::repositories::HourlyCount>> {
        self.rate_cache.get(&self.detections, since, until).await
    }
}
