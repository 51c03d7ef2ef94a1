use std::sync::Arc;

use crate::counters::OpKind;
use crate::error::Result;
use crate::manager::{Backend, DatabaseManager};
use crate::models::ImageCacheEntry;

/// Keyed by `(provider, scientific_name)`; re-fetching overwrites the row
/// rather than versioning it.
pub struct ImageCacheRepository {
    manager: Arc<DatabaseManager>,
}

impl ImageCacheRepository {
    pub fn new(manager: Arc<DatabaseManager>) -> Self {
        Self { manager }
    }

    pub async fn put(&self, entry: &ImageCacheEntry) -> Result<()> {
        let entry = entry.clone();
        match self.manager.backend() {
            Backend::Sqlite(_) => {
                self.manager
                    .with_sqlite(OpKind::Write, move |conn| {
                        conn.execute(
                            "INSERT INTO image_cache (provider, scientific_name, image_url, license_name, license_url, author, cached_at)
                             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                             ON CONFLICT(provider, scientific_name) DO UPDATE SET
                                image_url = excluded.image_url,
                                license_name = excluded.license_name,
                                license_url = excluded.license_url,
                                author = excluded.author,
                                cached_at = excluded.cached_at",
                            rusqlite::params![
                                entry.provider,
                                entry.scientific_name,
                                entry.image_url,
                                entry.license_name,
                                entry.license_url,
                                entry.author,
                                entry.cached_at,
                            ],
                        )?;
                        Ok(())
                    })
                    .await
            }
            Backend::MySql(_) => {
                use mysql_async::prelude::*;
                let mut conn = self.manager.mysql_conn().await?;
                conn.exec_drop(
                    "INSERT INTO image_cache (provider, scientific_name, image_url, license_name, license_url, author, cached_at)
                     VALUES (?, ?, ?, ?, ?, ?, ?)
                     ON DUPLICATE KEY UPDATE
                        image_url = VALUES(image_url),
                        license_name = VALUES(license_name),
                        license_url = VALUES(license_url),
                        author = VALUES(author),
                        cached_at = VALUES(cached_at)",
                    (
                        entry.provider,
                        entry.scientific_name,
                        entry.image_url,
                        entry.license_name,
                        entry.license_url,
                        entry.author,
                        entry.cached_at,
                    ),
                )
                .await?;
                Ok(())
            }
        }
    }

    pub async fn get(&self, provider: &str, scientific_name: &str) -> Result<Option<ImageCacheEntry>> {
        match self.manager.backend() {
            Backend::Sqlite(_) => {
                let (provider, scientific_name) = (provider.to_string(), scientific_name.to_string());
                self.manager
                    .with_sqlite(OpKind::Read, move |conn| {
                        let mut stmt = conn.prepare(
                            "SELECT provider, scientific_name, image_url, license_name, license_url, author, cached_at
                             FROM image_cache WHERE provider = ?1 AND scientific_name = ?2",
                        )?;
                        let mut rows = stmt.query(rusqlite::params![provider, scientific_name])?;
                        if let Some(row) = rows.next()? {
                            Ok(Some(ImageCacheEntry {
                                provider: row.get(0)?,
                                scientific_name: row.get(1)?,
                                image_url: row.get(2)?,
                                license_name: row.get(3)?,
                                license_url: row.get(4)?,
                                author: row.get(5)?,
                                cached_at: row.get(6)?,
                            }))
                        } else {
                            Ok(None)
                        }
                    })
                    .await
            }
            Backend::MySql(_) => {
                use mysql_async::prelude::*;
                let mut conn = self.manager.mysql_conn().await?;
                let row: Option<(String, String, String, Option<String>, Option<String>, Option<String>, i64)> = conn
                    .exec_first(
                        "SELECT provider, scientific_name, image_url, license_name, license_url, author, cached_at
                         FROM image_cache WHERE provider = ? AND scientific_name = ?",
                        (provider, scientific_name),
                    )
                    .await?;
                Ok(row.map(
                    |(provider, scientific_name, image_url, license_name, license_url, author, cached_at)| {
                        ImageCacheEntry {
                            provider,
                            scientific_name,
                            image_url,
                            license_name,
                            license_url,
                            author,
                            cached_at,
                        }
                    },
                ))
            }
        }
    }
}
