use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

use super::{api_error, ApiError};
use crate::models::assessment::AssessmentKind;
use crate::models::attempt::AttemptRecord;
use crate::models::profile::ProgressView;
use crate::services::{
    catalog_service::{CatalogService, Playability},
    progress_service::ProgressService,
    AppState,
};

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    pub assessment_id: Option<String>,
    pub limit: Option<u64>,
}

pub async fn get_progress(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<ProgressView>, ApiError> {
    tracing::info!("Getting progress for user: {}", user_id);

    ProgressService::new(state.store.clone())
        .progress_view(&user_id)
        .await
        .map(Json)
        .map_err(|e| {
            tracing::error!("Failed to load progress for {}: {}", user_id, e);
            api_error(StatusCode::SERVICE_UNAVAILABLE, "Progress store unavailable")
        })
}

pub async fn list_attempts(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<Vec<AttemptRecord>>, ApiError> {
    ProgressService::new(state.store.clone())
        .attempt_history(&user_id, params.assessment_id.as_deref(), params.limit)
        .await
        .map(Json)
        .map_err(|e| {
            tracing::error!("Failed to list attempts for {}: {}", user_id, e);
            api_error(StatusCode::SERVICE_UNAVAILABLE, "Attempt store unavailable")
        })
}

pub async fn quiz_playability(
    State(state): State<Arc<AppState>>,
    Path(quiz_id): Path<String>,
) -> Result<Json<Playability>, ApiError> {
    let catalog = CatalogService::new(state.store.clone(), state.config.quizzes);
    let quiz = catalog
        .load(AssessmentKind::Quiz, &quiz_id)
        .await
        .map_err(|e| {
            tracing::error!("Failed to load quiz {}: {}", quiz_id, e);
            api_error(StatusCode::SERVICE_UNAVAILABLE, "Assessment store unavailable")
        })?
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("quiz {} not found", quiz_id)))?;

    Ok(Json(catalog.playability(&quiz)))
}
