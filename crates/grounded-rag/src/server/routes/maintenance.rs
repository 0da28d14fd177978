//! Reconciliation and checkpoint sweep endpoints

use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::error::Result;
use crate::indexing::ReconcileReport;
use crate::server::state::AppState;

/// POST /api/maintenance/reconcile
pub async fn reconcile(State(state): State<AppState>) -> Result<Json<ReconcileReport>> {
    Ok(Json(state.pipeline().reconcile().await?))
}

/// POST /api/maintenance/sweep
pub async fn sweep(State(state): State<AppState>) -> Result<Json<Value>> {
    let removed = state.pipeline().sweep_checkpoints().await?;
    Ok(Json(json!({
        "removed": removed,
        "retention_days": state.config().checkpoint.retention_days,
    })))
}
