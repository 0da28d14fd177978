//! Extraction job status and cancellation endpoints

use axum::{
    extract::{Path, State},
    Json,
};
use uuid::Uuid;

use crate::error::Result;
use crate::processing::ExtractionStatus;
use crate::server::state::AppState;

/// GET /api/jobs
pub async fn list_jobs(State(state): State<AppState>) -> Json<Vec<ExtractionStatus>> {
    Json(state.pipeline().jobs().list())
}

/// GET /api/jobs/:id
pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ExtractionStatus>> {
    Ok(Json(state.pipeline().extraction_status(id)?))
}

/// DELETE /api/jobs/:id
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ExtractionStatus>> {
    Ok(Json(state.pipeline().cancel_extraction(id).await?))
}
