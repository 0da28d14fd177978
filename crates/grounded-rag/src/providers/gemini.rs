//! Gemini API client for document text extraction and embeddings
//!
//! Authenticates with an API key. Documents are sent inline (base64), which
//! caps the payload at the model's inline limit; the section splitter keeps
//! every request under it.

use async_trait::async_trait;
use base64::Engine;
use std::time::Duration;

use crate::config::{EmbeddingConfig, ExtractionConfig, GeminiConfig};
use crate::error::{Error, Result};

use super::embedding::EmbeddingProvider;
use super::extraction::{ExtractionModel, ExtractionOutput};

/// Gemini client via the Generative Language API
pub struct GeminiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    extraction_model: String,
    temperature: f32,
    embedding_model: String,
    dimensions: usize,
}

impl GeminiClient {
    /// Create a new Gemini client
    ///
    /// # Arguments
    /// * `gemini` - API base URL and key
    /// * `extraction` - extraction model and sampling settings
    /// * `embeddings` - embedding model and dimensions
    pub fn new(
        gemini: &GeminiConfig,
        extraction: &ExtractionConfig,
        embeddings: &EmbeddingConfig,
    ) -> Result<Self> {
        let api_key = gemini.resolve_api_key().ok_or_else(|| {
            Error::Config(format!(
                "Gemini API key missing: set gemini.api_key or {}",
                gemini.api_key_env
            ))
        })?;

        // Per-call deadlines are enforced by the callers; this is a backstop
        let http = reqwest::Client::builder()
            .timeout(extraction.call_timeout() + Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: gemini.base_url.trim_end_matches('/').to_string(),
            api_key,
            extraction_model: extraction.model.clone(),
            temperature: extraction.temperature,
            embedding_model: embeddings.model.clone(),
            dimensions: embeddings.dimensions,
        })
    }

    fn endpoint(&self, model: &str, method: &str) -> String {
        format!("{}/models/{}:{}", self.base_url, model, method)
    }
}

#[derive(serde::Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(serde::Serialize)]
struct Content {
    role: String,
    parts: Vec<Part>,
}

#[derive(serde::Serialize)]
#[serde(untagged)]
enum Part {
    Text {
        text: String,
    },
    Inline {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
}

#[derive(serde::Serialize)]
struct InlineData {
    #[serde(rename = "mimeType")]
    mime_type: String,
    data: String,
}

#[derive(serde::Serialize)]
struct GenerationConfig {
    temperature: f32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

#[derive(serde::Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(serde::Deserialize)]
struct Candidate {
    content: Option<ResponseContent>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(serde::Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(serde::Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(serde::Deserialize)]
struct UsageMetadata {
    #[serde(rename = "promptTokenCount")]
    prompt_token_count: Option<u64>,
    #[serde(rename = "candidatesTokenCount")]
    candidates_token_count: Option<u64>,
}

#[derive(serde::Serialize)]
struct EmbedRequest {
    model: String,
    content: EmbedContent,
}

#[derive(serde::Serialize)]
struct EmbedContent {
    parts: Vec<EmbedPart>,
}

#[derive(serde::Serialize)]
struct EmbedPart {
    text: String,
}

#[derive(serde::Deserialize)]
struct EmbedResponse {
    embedding: EmbeddingValues,
}

#[derive(serde::Deserialize)]
struct EmbeddingValues {
    values: Vec<f32>,
}

/// Map a transport failure to the extraction error taxonomy
fn classify_send_error(e: reqwest::Error) -> Error {
    if e.is_timeout() || e.is_connect() || e.is_request() {
        Error::transient(format!("Gemini request failed: {}", e))
    } else {
        Error::permanent(format!("Gemini request failed: {}", e))
    }
}

#[async_trait]
impl ExtractionModel for GeminiClient {
    async fn extract(
        &self,
        document: &[u8],
        mime_type: &str,
        prompt: &str,
        max_output_tokens: u32,
    ) -> Result<ExtractionOutput> {
        let request = GenerateRequest {
            contents: vec![Content {
                role: "user".to_string(),
                parts: vec![
                    Part::Inline {
                        inline_data: InlineData {
                            mime_type: mime_type.to_string(),
                            data: base64::engine::general_purpose::STANDARD.encode(document),
                        },
                    },
                    Part::Text {
                        text: prompt.to_string(),
                    },
                ],
            }],
            generation_config: GenerationConfig {
                temperature: self.temperature,
                max_output_tokens,
            },
        };

        let response = self
            .http
            .post(self.endpoint(&self.extraction_model, "generateContent"))
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(classify_send_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::from_extraction_status(status, &body));
        }

        let gen_response: GenerateResponse = response
            .json()
            .await
            .map_err(|e| Error::transient(format!("Failed to parse Gemini response: {}", e)))?;

        let candidate = gen_response
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| Error::permanent("No candidates in Gemini response"))?;

        let truncated = candidate.finish_reason.as_deref() == Some("MAX_TOKENS");
        let text: String = candidate
            .content
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        if text.is_empty() {
            return Err(Error::permanent(format!(
                "Gemini returned no text (finish reason: {})",
                candidate.finish_reason.as_deref().unwrap_or("unknown")
            )));
        }

        let usage = gen_response.usage_metadata;
        Ok(ExtractionOutput {
            text,
            input_tokens: usage.as_ref().and_then(|u| u.prompt_token_count),
            output_tokens: usage.as_ref().and_then(|u| u.candidates_token_count),
            truncated,
        })
    }

    async fn health_check(&self) -> Result<bool> {
        let response = self
            .http
            .get(format!("{}/models/{}", self.base_url, self.extraction_model))
            .header("x-goog-api-key", &self.api_key)
            .send()
            .await?;
        Ok(response.status().is_success())
    }

    fn model(&self) -> &str {
        &self.extraction_model
    }

    fn name(&self) -> &str {
        "gemini"
    }
}

#[async_trait]
impl EmbeddingProvider for GeminiClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let request = EmbedRequest {
            model: format!("models/{}", self.embedding_model),
            content: EmbedContent {
                parts: vec![EmbedPart {
                    text: text.to_string(),
                }],
            },
        };

        let response = self
            .http
            .post(self.endpoint(&self.embedding_model, "embedContent"))
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::embedding(format!("Gemini embedding request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::embedding(format!(
                "Gemini embedding failed ({}): {}",
                status, body
            )));
        }

        let embed_response: EmbedResponse = response
            .json()
            .await
            .map_err(|e| Error::embedding(format!("Failed to parse Gemini embedding: {}", e)))?;

        Ok(embed_response.embedding.values)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn health_check(&self) -> Result<bool> {
        let response = self
            .http
            .get(format!("{}/models/{}", self.base_url, self.embedding_model))
            .header("x-goog-api-key", &self.api_key)
            .send()
            .await?;
        Ok(response.status().is_success())
    }

    fn model(&self) -> &str {
        &self.embedding_model
    }

    fn name(&self) -> &str {
        "gemini"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inline_request_shape() {
        let request = GenerateRequest {
            contents: vec![Content {
                role: "user".to_string(),
                parts: vec![
                    Part::Inline {
                        inline_data: InlineData {
                            mime_type: "application/pdf".to_string(),
                            data: "JVBERg==".to_string(),
                        },
                    },
                    Part::Text { text: "Extract".to_string() },
                ],
            }],
            generation_config: GenerationConfig {
                temperature: 0.1,
                max_output_tokens: 65536,
            },
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["contents"][0]["parts"][0]["inlineData"]["mimeType"], "application/pdf");
        assert_eq!(json["contents"][0]["parts"][1]["text"], "Extract");
        assert_eq!(json["generationConfig"]["maxOutputTokens"], 65536);
    }

    #[test]
    fn test_missing_api_key_is_config_error() {
        let gemini = GeminiConfig {
            api_key: None,
            api_key_env: "GROUNDED_RAG_TEST_UNSET_KEY".to_string(),
            ..GeminiConfig::default()
        };
        let result = GeminiClient::new(&gemini, &ExtractionConfig::default(), &EmbeddingConfig::default());
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
