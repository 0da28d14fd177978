//! Document registration, extraction and re-indexing endpoints

use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::indexing::IndexReport;
use crate::server::state::AppState;
use crate::types::{CheckpointInfo, SourceDocument};

/// Document with its checkpoint summary
#[derive(Debug, Serialize)]
pub struct DocumentDetails {
    #[serde(flatten)]
    pub document: SourceDocument,
    pub checkpoint: CheckpointInfo,
    pub active_job: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct StartExtractionResponse {
    pub job_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct AssignAgentsRequest {
    pub agent_ids: Vec<String>,
}

/// POST /api/documents - multipart `file`, `owner_id`, `agent_ids`
pub async fn upload_document(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<SourceDocument>)> {
    let mut file: Option<(String, Vec<u8>)> = None;
    let mut owner_id: Option<String> = None;
    let mut agent_ids: Vec<String> = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::InvalidRequest(format!("Failed to read multipart field: {}", e)))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "file" => {
                let filename = field
                    .file_name()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| format!("upload_{}.bin", Uuid::new_v4()));
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| Error::InvalidRequest(format!("Failed to read file: {}", e)))?;
                file = Some((filename, data.to_vec()));
            }
            "owner_id" => owner_id = Some(read_text(field).await?),
            "agent_ids" => agent_ids.extend(split_agents(&read_text(field).await?)),
            other => tracing::debug!("Ignoring multipart field {:?}", other),
        }
    }

    let (filename, data) = file.ok_or_else(|| Error::InvalidRequest("missing `file` field".into()))?;
    let owner_id = owner_id
        .filter(|o| !o.trim().is_empty())
        .ok_or_else(|| Error::InvalidRequest("missing `owner_id` field".into()))?;

    let document = state
        .pipeline()
        .register_document(owner_id.trim(), agent_ids, &filename, data)
        .await?;

    Ok((StatusCode::CREATED, Json(document)))
}

/// GET /api/documents
pub async fn list_documents(State(state): State<AppState>) -> Result<Json<Vec<SourceDocument>>> {
    Ok(Json(state.pipeline().list_documents().await?))
}

/// GET /api/documents/:id
pub async fn get_document(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<DocumentDetails>> {
    let pipeline = state.pipeline();
    let document = pipeline.document(id).await?;
    let checkpoint = pipeline.checkpoint_info(&document).await;

    Ok(Json(DocumentDetails {
        active_job: pipeline.jobs().active_job(&id),
        document,
        checkpoint,
    }))
}

/// PUT /api/documents/:id/agents
pub async fn assign_agents(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<AssignAgentsRequest>,
) -> Result<Json<SourceDocument>> {
    Ok(Json(state.pipeline().assign_agents(id, request.agent_ids).await?))
}

/// POST /api/documents/:id/extract
pub async fn start_extraction(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<StartExtractionResponse>)> {
    let job_id = state.pipeline().start_extraction(id).await?;
    Ok((StatusCode::ACCEPTED, Json(StartExtractionResponse { job_id })))
}

/// POST /api/documents/:id/reindex
pub async fn reindex(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<IndexReport>> {
    Ok(Json(state.pipeline().reindex(id).await?))
}

async fn read_text(field: axum::extract::multipart::Field<'_>) -> Result<String> {
    field
        .text()
        .await
        .map_err(|e| Error::InvalidRequest(format!("Failed to read field: {}", e)))
}

/// Comma-separated or JSON array
fn split_agents(value: &str) -> Vec<String> {
    if let Ok(list) = serde_json::from_str::<Vec<String>>(value) {
        return list;
    }
    value
        .split(',')
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_agents() {
        assert_eq!(split_agents("legal, hr,,ops"), vec!["legal", "hr", "ops"]);
        assert_eq!(split_agents(r#"["a","b"]"#), vec!["a", "b"]);
        assert!(split_agents("  ").is_empty());
    }
}
