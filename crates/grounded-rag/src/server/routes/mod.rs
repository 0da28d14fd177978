//! API routes for the pipeline server

pub mod documents;
pub mod jobs;
pub mod maintenance;
pub mod retrieve;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post, put},
    Router,
};
use crate::server::state::AppState;

/// Build all API routes
pub fn api_routes(max_upload_size: usize) -> Router<AppState> {
    Router::new()
        // Documents - uploads get the larger body limit
        .route(
            "/documents",
            post(documents::upload_document)
                .layer(DefaultBodyLimit::max(max_upload_size))
                .get(documents::list_documents),
        )
        .route("/documents/:id", get(documents::get_document))
        .route("/documents/:id/agents", put(documents::assign_agents))
        .route("/documents/:id/extract", post(documents::start_extraction))
        .route("/documents/:id/reindex", post(documents::reindex))
        // Extraction jobs
        .route("/jobs", get(jobs::list_jobs))
        .route("/jobs/:id", get(jobs::get_job).delete(jobs::cancel_job))
        // Retrieval
        .route("/retrieve", post(retrieve::retrieve))
        // Maintenance
        .route("/maintenance/reconcile", post(maintenance::reconcile))
        .route("/maintenance/sweep", post(maintenance::sweep))
        .route("/info", get(info))
}

/// API info endpoint
async fn info() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "name": "grounded-rag",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Resumable document extraction and citation-bounded retrieval",
        "endpoints": {
            "POST /api/documents": "Upload a document (multipart: file, owner_id, agent_ids)",
            "GET /api/documents": "List documents",
            "GET /api/documents/:id": "Document details with checkpoint summary",
            "PUT /api/documents/:id/agents": "Replace the agents allowed to retrieve a document",
            "POST /api/documents/:id/extract": "Start or resume extraction",
            "POST /api/documents/:id/reindex": "Re-chunk and re-embed extracted text",
            "GET /api/jobs": "List extraction jobs",
            "GET /api/jobs/:id": "Extraction job status",
            "DELETE /api/jobs/:id": "Cancel an extraction job",
            "POST /api/retrieve": "Scoped retrieval with bound citations",
            "POST /api/maintenance/reconcile": "Compare primary and analytical stores",
            "POST /api/maintenance/sweep": "Remove expired checkpoints"
        }
    }))
}
