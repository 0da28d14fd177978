//! Vision-capable extraction model trait

use async_trait::async_trait;
use crate::error::Result;

/// Text returned by one extraction call
#[derive(Debug, Clone, Default)]
pub struct ExtractionOutput {
    /// Extracted text
    pub text: String,
    /// Prompt tokens reported by the model, if any
    pub input_tokens: Option<u64>,
    /// Output tokens reported by the model, if any
    pub output_tokens: Option<u64>,
    /// The model stopped at the output-token ceiling
    pub truncated: bool,
}

/// Trait for turning a (sub-)document into plain text
///
/// Treated as an untrusted, rate-limited black box. Implementations must
/// report retryable failures as `Error::ExtractionTransient` and everything
/// else as `Error::ExtractionPermanent`.
///
/// Implementations:
/// - `GeminiClient`: Gemini generateContent with inline document data
#[async_trait]
pub trait ExtractionModel: Send + Sync {
    /// Extract the complete text of `document`
    async fn extract(
        &self,
        document: &[u8],
        mime_type: &str,
        prompt: &str,
        max_output_tokens: u32,
    ) -> Result<ExtractionOutput>;

    /// Check if the model endpoint is reachable
    async fn health_check(&self) -> Result<bool>;

    /// Model identifier (used for cost estimates)
    fn model(&self) -> &str;

    /// Get provider name for logging
    fn name(&self) -> &str;
}
