//! Scoped retrieval with pre-bound citations

use axum::{extract::State, Json};

use crate::error::Result;
use crate::server::state::AppState;
use crate::types::{RetrieveRequest, RetrieveResponse};

/// POST /api/retrieve
pub async fn retrieve(
    State(state): State<AppState>,
    Json(request): Json<RetrieveRequest>,
) -> Result<Json<RetrieveResponse>> {
    Ok(Json(state.pipeline().retrieve(&request).await?))
}
