mod api;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use detect_store::backup::BackupManager;
use detect_store::cleanup::CleanupManager;
use detect_store::config::StoreConfig;
use detect_store::datastore::Datastore;
use detect_store::inspector::{sqlite_details, Inspector};
use detect_store::legacy::LegacyStore;
use detect_store::manager::{Backend, DatabaseManager};
use detect_store::migration::MigrationEngine;

use api::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("detect_store=info,detect_store_ops=info,tower_http=info")
        }))
        .init();

    let config_path = std::env::var("DETECT_STORE_CONFIG").unwrap_or_else(|_| "./detect-store.toml".to_string());
    let config = StoreConfig::load(&config_path)?;

    let manager = Arc::new(DatabaseManager::initialize(&config).await?);
    tracing::info!(engine = ?manager.engine(), "database manager initialized");

    let legacy = Arc::new(LegacyStore::new(manager.clone()));
    legacy.ensure_schema().await?;
    let v2 = Arc::new(Datastore::new(manager.clone()));

    let migration = Arc::new(MigrationEngine::new(legacy.clone(), v2.clone(), manager.clone(), config.migration.clone()));
    let inspector = Arc::new(Inspector::new(manager.clone(), config.inspector.clone()));
    let backups = Arc::new(BackupManager::new(manager.clone(), config.backup.clone()));
    let cleanup = Arc::new(CleanupManager::new(manager.clone(), legacy.clone()));

    spawn_migration_worker(migration.clone());
    if manager.engine() == detect_store::manager::Engine::Sqlite {
        spawn_integrity_monitor(manager.clone(), config.inspector.integrity_check_interval_hours);
    }

    let state = AppState {
        migration,
        inspector,
        backups,
        cleanup,
    };

    let app = Router::new()
        .route("/healthz", get(api::healthz))
        .route("/api/v1/migration/status", get(api::migration_status))
        .route("/api/v1/migration/start", post(api::migration_start))
        .route("/api/v1/migration/pause", post(api::migration_pause))
        .route("/api/v1/migration/resume", post(api::migration_resume))
        .route("/api/v1/migration/cancel", post(api::migration_cancel))
        .route("/api/v1/migration/validate", post(api::migration_validate))
        .route("/api/v1/migration/cutover", post(api::migration_cutover))
        .route("/api/v1/inspector/overview", get(api::inspector_overview))
        .route("/api/v1/inspector/rate", get(api::inspector_rate))
        .route(
            "/api/v1/backups",
            get(api::backups_list).post(api::backups_create),
        )
        .route("/api/v1/legacy/status", get(api::legacy_status))
        .route("/api/v1/legacy/cleanup", post(api::legacy_cleanup))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], 8090));
    tracing::info!("detect-store-ops listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Drives the migration engine one batch at a time. Called unconditionally
/// on every tick; `run_one_batch` rejects states other than `dual_write`/
/// `migrating` with `InvalidTransition`, which this loop just logs and
/// retries on the next tick rather than treating as fatal.
fn spawn_migration_worker(migration: Arc<MigrationEngine>) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(5)).await;
            match migration.run_one_batch().await {
                Ok(snapshot) if snapshot.state == "validating" => {
                    if let Err(e) = migration.validate_and_advance().await {
                        tracing::warn!(error = %e, "validation pass failed");
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::debug!(error = %e, "migration batch skipped"),
            }
        }
    });
}

/// Daily `PRAGMA quick_check`, running on its own background loop like the
/// migration worker above.
fn spawn_integrity_monitor(manager: Arc<DatabaseManager>, interval_hours: u64) {
    tokio::spawn(async move {
        let interval = Duration::from_secs(interval_hours.max(1) * 3600);
        loop {
            tokio::time::sleep(interval).await;
            if !matches!(manager.backend(), Backend::Sqlite(_)) {
                continue;
            }
            match sqlite_details::run_integrity_check(&manager).await {
                Ok(true) => tracing::info!("sqlite integrity check passed"),
                Ok(false) => tracing::error!("sqlite integrity check failed quick_check"),
                Err(e) => tracing::warn!(error = %e, "sqlite integrity check could not run"),
            }
        }
    });
}
