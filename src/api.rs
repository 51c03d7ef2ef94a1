//! Control-plane HTTP surface for the migration/inspector/backup/cleanup
//! subsystems. Bin-only: these handlers aren't part of the library crate,
//! since they exist solely to back this binary's router.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;

use detect_store::backup::BackupManager;
use detect_store::cleanup::CleanupManager;
use detect_store::error::StoreError;
use detect_store::inspector::Inspector;
use detect_store::migration::MigrationEngine;

#[derive(Clone)]
pub struct AppState {
    pub migration: Arc<MigrationEngine>,
    pub inspector: Arc<Inspector>,
    pub backups: Arc<BackupManager>,
    pub cleanup: Arc<CleanupManager>,
}

type ApiResult<T> = Result<T, (StatusCode, String)>;

fn status_for(err: &StoreError) -> StatusCode {
    match err {
        StoreError::InvalidInput(_) | StoreError::InvalidTransition { .. } => StatusCode::BAD_REQUEST,
        StoreError::NotFound(_) => StatusCode::NOT_FOUND,
        StoreError::Conflict(_) => StatusCode::CONFLICT,
        StoreError::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
        StoreError::Integrity(_) | StoreError::Fatal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn map_err(err: StoreError) -> (StatusCode, String) {
    let status = status_for(&err);
    (status, err.to_string())
}

pub async fn healthz() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn migration_status(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let snapshot = state.migration.snapshot().await.map_err(map_err)?;
    Ok(Json(snapshot))
}

pub async fn migration_start(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let checks = state.migration.start().await.map_err(map_err)?;
    Ok(Json(json!({ "checks": checks })))
}

pub async fn migration_pause(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    state.migration.pause().map_err(map_err)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn migration_resume(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    state.migration.resume().map_err(map_err)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn migration_cancel(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    state.migration.cancel().map_err(map_err)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn migration_validate(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let report = state.migration.validate_and_advance().await.map_err(map_err)?;
    Ok(Json(report))
}

pub async fn migration_cutover(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    state.migration.complete_cutover().await.map_err(map_err)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn inspector_overview(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let overview = state.inspector.overview().await.map_err(map_err)?;
    Ok(Json(overview))
}

#[derive(Debug, Deserialize)]
pub struct RateQuery {
    since: i64,
    until: i64,
}

pub async fn inspector_rate(
    State(state): State<AppState>,
    Query(q): Query<RateQuery>,
) -> ApiResult<impl IntoResponse> {
    let rate = state.inspector.detection_rate(q.since, q.until).await.map_err(map_err)?;
    Ok(Json(rate))
}

pub async fn backups_create(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let job = state.backups.create().await.map_err(map_err)?;
    Ok((StatusCode::CREATED, Json(job)))
}

pub async fn backups_list(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.backups.list().await))
}

pub async fn legacy_cleanup(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let report = state.cleanup.run(&state.backups).await.map_err(map_err)?;
    Ok(Json(report))
}

pub async fn legacy_status(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    Ok(Json(json!({ "state": state.cleanup.state() })))
}
