//! Vertex AI text embeddings
//!
//! Drop-in alternative to the Gemini API embedder for deployments that
//! authenticate with a service account instead of an API key.

use async_trait::async_trait;
use std::sync::Arc;

use super::auth::GcpAuth;
use crate::config::{EmbeddingConfig, GcpConfig};
use crate::error::{Error, Result};
use crate::providers::embedding::EmbeddingProvider;

/// Instances per `:predict` call accepted by the API
const MAX_BATCH: usize = 250;

/// Vertex AI embedding provider
pub struct VertexAiEmbedder {
    auth: Arc<GcpAuth>,
    model: String,
    location: String,
    dimensions: usize,
}

impl VertexAiEmbedder {
    pub fn new(auth: Arc<GcpAuth>, gcp: &GcpConfig, embeddings: &EmbeddingConfig) -> Self {
        Self {
            auth,
            model: embeddings.model.clone(),
            location: gcp.location.clone(),
            dimensions: embeddings.dimensions,
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "https://{loc}-aiplatform.googleapis.com/v1/projects/{project}/locations/{loc}/publishers/google/models/{model}:predict",
            loc = self.location,
            project = self.auth.project_id(),
            model = self.model
        )
    }

    async fn predict(&self, client: &reqwest::Client, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let request = PredictRequest {
            instances: texts
                .iter()
                .map(|t| Instance {
                    content: t.as_str(),
                    task_type: "RETRIEVAL_DOCUMENT",
                })
                .collect(),
            parameters: Parameters {
                output_dimensionality: self.dimensions,
            },
        };

        let response = client
            .post(self.endpoint())
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::embedding(format!("Vertex AI request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::embedding(format!(
                "Vertex AI embedding failed ({}): {}",
                status, body
            )));
        }

        let parsed: PredictResponse = response
            .json()
            .await
            .map_err(|e| Error::embedding(format!("Failed to parse Vertex AI response: {}", e)))?;

        if parsed.predictions.len() != texts.len() {
            return Err(Error::embedding(format!(
                "Vertex AI returned {} embeddings for {} inputs",
                parsed.predictions.len(),
                texts.len()
            )));
        }

        Ok(parsed
            .predictions
            .into_iter()
            .map(|p| p.embeddings.values)
            .collect())
    }
}

#[derive(serde::Serialize)]
struct PredictRequest<'a> {
    instances: Vec<Instance<'a>>,
    parameters: Parameters,
}

#[derive(serde::Serialize)]
struct Instance<'a> {
    content: &'a str,
    task_type: &'static str,
}

#[derive(serde::Serialize)]
struct Parameters {
    #[serde(rename = "outputDimensionality")]
    output_dimensionality: usize,
}

#[derive(serde::Deserialize)]
struct PredictResponse {
    #[serde(default)]
    predictions: Vec<Prediction>,
}

#[derive(serde::Deserialize)]
struct Prediction {
    embeddings: Values,
}

#[derive(serde::Deserialize)]
struct Values {
    values: Vec<f32>,
}

#[async_trait]
impl EmbeddingProvider for VertexAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let client = self.auth.authorized_client().await?;
        self.predict(&client, &[text.to_string()])
            .await?
            .pop()
            .ok_or_else(|| Error::embedding("No embedding in Vertex AI response"))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let client = self.auth.authorized_client().await?;
        let mut embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(MAX_BATCH) {
            embeddings.extend(self.predict(&client, batch).await?);
        }
        Ok(embeddings)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn health_check(&self) -> Result<bool> {
        self.auth.get_token().await.map(|_| true)
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn name(&self) -> &str {
        "vertex-ai"
    }
}
