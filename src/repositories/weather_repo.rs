use std::sync::Arc;

use crate::counters::OpKind;
use crate::error::Result;
use crate::manager::{Backend, DatabaseManager};
use crate::models::Weather;

/// Interns deduplicated weather observations keyed by `(hour_bucket, source)`.
pub struct WeatherRepository {
    manager: Arc<DatabaseManager>,
}

impl WeatherRepository {
    pub fn new(manager: Arc<DatabaseManager>) -> Self {
        Self { manager }
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn get_or_create(
        &self,
        hour_bucket: i64,
        source: &str,
        temperature_c: Option<f64>,
        humidity_pct: Option<f64>,
        wind_speed_ms: Option<f64>,
        condition: Option<&str>,
    ) -> Result<Weather> {
        match self.manager.backend() {
            Backend::Sqlite(_) => {
                let source = source.to_string();
                let condition = condition.map(|c| c.to_string());
                self.manager
                    .with_sqlite(OpKind::Write, move |conn| {
                        conn.execute(
                            "INSERT INTO weather (hour_bucket, source, temperature_c, humidity_pct, wind_speed_ms, condition)
                             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                             ON CONFLICT(hour_bucket, source) DO NOTHING",
                            rusqlite::params![hour_bucket, source, temperature_c, humidity_pct, wind_speed_ms, condition],
                        )?;
                        conn.query_row(
                            "SELECT id, hour_bucket, source, temperature_c, humidity_pct, wind_speed_ms, condition
                             FROM weather WHERE hour_bucket = ?1 AND source = ?2",
                            rusqlite::params![hour_bucket, source],
                            |row| {
                                Ok(Weather {
                                    id: row.get(0)?,
                                    hour_bucket: row.get(1)?,
                                    source: row.get(2)?,
                                    temperature_c: row.get(3)?,
                                    humidity_pct: row.get(4)?,
                                    wind_speed_ms: row.get(5)?,
                                    condition: row.get(6)?,
                                })
                            },
                        )
                    })
                    .await
            }
            Backend::MySql(_) => {
                use mysql_async::prelude::*;
                let mut conn = self.manager.mysql_conn().await?;
                conn.exec_drop(
                    "INSERT IGNORE INTO weather (hour_bucket, source, temperature_c, humidity_pct, wind_speed_ms, `condition`)
                     VALUES (?, ?, ?, ?, ?, ?)",
                    (hour_bucket, source, temperature_c, humidity_pct, wind_speed_ms, condition),
                )
                .await?;
                let row: Option<(i64, i64, String, Option<f64>, Option<f64>, Option<f64>, Option<String>)> = conn
                    .exec_first(
                        "SELECT id, hour_bucket, source, temperature_c, humidity_pct, wind_speed_ms, `condition`
                         FROM weather WHERE hour_bucket = ? AND source = ?",
                        (hour_bucket, source),
                    )
                    .await?;
                row.map(|(id, hour_bucket, source, temperature_c, humidity_pct, wind_speed_ms, condition)| Weather {
                    id,
                    hour_bucket,
                    source,
                    temperature_c,
                    humidity_pct,
                    wind_speed_ms,
                    condition,
                })
                .ok_or_else(|| crate::error::StoreError::Fatal("weather insert-then-select produced no row".to_string()))
            }
        }
    }
}
