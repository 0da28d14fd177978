//! Configuration for the extraction and indexing pipeline

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Environment variable naming the TOML configuration file
pub const CONFIG_PATH_ENV: &str = "GROUNDED_RAG_CONFIG";

/// Main pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RagConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Local storage locations
    #[serde(default)]
    pub storage: StorageConfig,
    /// Section splitting and extraction calls
    #[serde(default)]
    pub extraction: ExtractionConfig,
    /// Checkpoint persistence
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
    /// Chunking and garbage filtering
    #[serde(default)]
    pub chunking: ChunkingConfig,
    /// Embedding indexer
    #[serde(default)]
    pub indexing: IndexingConfig,
    /// Query-time retrieval defaults
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    /// Embedding model selection
    #[serde(default)]
    pub embeddings: EmbeddingConfig,
    /// Gemini API access (extraction + embeddings)
    #[serde(default)]
    pub gemini: GeminiConfig,
    /// Ollama access (local embeddings)
    #[serde(default)]
    pub ollama: OllamaConfig,
    /// GCP configuration (blob storage on GCS, Vertex AI embeddings)
    #[serde(default)]
    pub gcp: Option<GcpConfig>,
}

impl RagConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read config {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: RagConfig = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from the file named by `GROUNDED_RAG_CONFIG`, or defaults
    pub fn from_env() -> Result<Self> {
        match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) if !path.is_empty() => Self::from_file(path),
            _ => Ok(Self::default()),
        }
    }

    /// Reject values the pipeline cannot operate with
    pub fn validate(&self) -> Result<()> {
        if self.chunking.chunk_tokens == 0 {
            return Err(Error::Config("chunking.chunk_tokens must be > 0".into()));
        }
        if self.chunking.overlap_tokens >= self.chunking.chunk_tokens {
            return Err(Error::Config(format!(
                "chunking.overlap_tokens ({}) must be smaller than chunk_tokens ({})",
                self.chunking.overlap_tokens, self.chunking.chunk_tokens
            )));
        }
        if self.extraction.target_section_mb == 0
            || self.extraction.target_section_mb >= self.extraction.inline_limit_mb
        {
            return Err(Error::Config(format!(
                "extraction.target_section_mb ({}) must be between 1 and inline_limit_mb ({})",
                self.extraction.target_section_mb, self.extraction.inline_limit_mb
            )));
        }
        if self.embeddings.dimensions == 0 {
            return Err(Error::Config("embeddings.dimensions must be > 0".into()));
        }
        if !(-1.0..=1.0).contains(&self.retrieval.min_similarity) {
            return Err(Error::Config(format!(
                "retrieval.min_similarity ({}) must be within [-1, 1]",
                self.retrieval.min_similarity
            )));
        }
        if self.retrieval.top_k == 0 {
            return Err(Error::Config("retrieval.top_k must be > 0".into()));
        }
        Ok(())
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host address
    pub host: String,
    /// Port number
    pub port: u16,
    /// Enable CORS
    pub enable_cors: bool,
    /// Maximum upload size in bytes (default: 200MB)
    pub max_upload_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            enable_cors: true,
            max_upload_size: 200 * 1024 * 1024,
        }
    }
}

/// Where the primary store and local blobs live
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root data directory
    pub data_dir: PathBuf,
    /// SQLite file name inside `data_dir`
    #[serde(default = "default_database_file")]
    pub database_file: String,
    /// Blob directory name inside `data_dir` (originals + checkpoints)
    #[serde(default = "default_blob_dir")]
    pub blob_dir: String,
}

fn default_database_file() -> String { "grounded-rag.db".to_string() }
fn default_blob_dir() -> String { "blobs".to_string() }

impl Default for StorageConfig {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
            .join("grounded-rag");

        Self {
            data_dir,
            database_file: default_database_file(),
            blob_dir: default_blob_dir(),
        }
    }
}

impl StorageConfig {
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_file)
    }

    pub fn blob_path(&self) -> PathBuf {
        self.data_dir.join(&self.blob_dir)
    }
}

/// Section splitting and extraction call configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Extraction model (default: "gemini-2.5-flash")
    #[serde(default = "default_extraction_model")]
    pub model: String,
    /// Hard inline payload limit of the extraction model in MB (default: 20)
    #[serde(default = "default_inline_limit_mb")]
    pub inline_limit_mb: u64,
    /// Target section size in MB, below the inline limit (default: 12)
    #[serde(default = "default_target_section_mb")]
    pub target_section_mb: u64,
    /// Output token ceiling per extraction call (default: 65536)
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    /// Retries after the first failed call, transient errors only (default: 2)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base backoff delay; attempt n waits base * 2^n (default: 2000ms)
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// Timeout for a single extraction call (default: 600s)
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
    /// Quality score below which a section is flagged (default: 60)
    #[serde(default = "default_quality_pass_threshold")]
    pub quality_pass_threshold: u8,
    /// Sampling temperature for extraction calls (default: 0.1)
    #[serde(default = "default_extraction_temperature")]
    pub temperature: f32,
}

fn default_extraction_model() -> String { "gemini-2.5-flash".to_string() }
fn default_inline_limit_mb() -> u64 { 20 }
fn default_target_section_mb() -> u64 { 12 }
fn default_max_output_tokens() -> u32 { 65_536 }
fn default_max_retries() -> u32 { 2 }
fn default_retry_base_delay_ms() -> u64 { 2_000 }
fn default_call_timeout_secs() -> u64 { 600 }
fn default_quality_pass_threshold() -> u8 { 60 }
fn default_extraction_temperature() -> f32 { 0.1 }

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            model: default_extraction_model(),
            inline_limit_mb: default_inline_limit_mb(),
            target_section_mb: default_target_section_mb(),
            max_output_tokens: default_max_output_tokens(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            call_timeout_secs: default_call_timeout_secs(),
            quality_pass_threshold: default_quality_pass_threshold(),
            temperature: default_extraction_temperature(),
        }
    }
}

impl ExtractionConfig {
    pub fn inline_limit_bytes(&self) -> u64 {
        self.inline_limit_mb * 1024 * 1024
    }

    pub fn target_section_bytes(&self) -> u64 {
        self.target_section_mb * 1024 * 1024
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    /// Backoff before retry number `attempt` (0-based): 2s, 4s, ...
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms.saturating_mul(1u64 << attempt.min(16)))
    }
}

/// Checkpoint persistence configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// Blob key prefix for checkpoint records
    #[serde(default = "default_checkpoint_prefix")]
    pub prefix: String,
    /// Checkpoints older than this are swept (default: 7 days)
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
    /// Interval of the background sweep (default: 1 hour)
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Delete checkpoint records once extraction completes
    #[serde(default = "default_delete_on_complete")]
    pub delete_on_complete: bool,
}

fn default_checkpoint_prefix() -> String { "extraction-checkpoints".to_string() }
fn default_retention_days() -> i64 { 7 }
fn default_sweep_interval_secs() -> u64 { 3600 }
fn default_delete_on_complete() -> bool { true }

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            prefix: default_checkpoint_prefix(),
            retention_days: default_retention_days(),
            sweep_interval_secs: default_sweep_interval_secs(),
            delete_on_complete: default_delete_on_complete(),
        }
    }
}

/// Text chunking and garbage filter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Target fragment length in tokens
    pub chunk_tokens: usize,
    /// Tokens shared between consecutive fragments cut from the same block
    pub overlap_tokens: usize,
    /// Fragments shorter than this (trimmed chars) are discarded
    pub min_chars: usize,
    /// Page-number artifacts are at most this many tokens
    #[serde(default = "default_max_page_number_tokens")]
    pub max_page_number_tokens: usize,
    /// Share of lines that must look like TOC entries to discard a fragment
    #[serde(default = "default_toc_line_ratio")]
    pub toc_line_ratio: f32,
    /// Share of separator/punctuation chars above which a fragment is discarded
    #[serde(default = "default_separator_ratio")]
    pub separator_ratio: f32,
}

fn default_max_page_number_tokens() -> usize { 8 }
fn default_toc_line_ratio() -> f32 { 0.5 }
fn default_separator_ratio() -> f32 { 0.6 }

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_tokens: 500,
            overlap_tokens: 50,
            min_chars: 50,
            max_page_number_tokens: default_max_page_number_tokens(),
            toc_line_ratio: default_toc_line_ratio(),
            separator_ratio: default_separator_ratio(),
        }
    }
}

/// Embedding indexer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingConfig {
    /// Concurrent embedding calls per document (default: CPU count, max 8)
    pub parallel_embeddings: Option<usize>,
    /// Timeout for a single embedding call
    #[serde(default = "default_embed_timeout_secs")]
    pub embed_timeout_secs: u64,
    /// Wait after a document's batch write before reporting it queryable
    #[serde(default)]
    pub settle_delay_ms: u64,
    /// Interval of the background reconciliation sweep (default: 1 hour)
    #[serde(default = "default_reconcile_interval_secs")]
    pub reconcile_interval_secs: u64,
}

fn default_embed_timeout_secs() -> u64 { 60 }
fn default_reconcile_interval_secs() -> u64 { 3600 }

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            parallel_embeddings: None,
            embed_timeout_secs: default_embed_timeout_secs(),
            settle_delay_ms: 0,
            reconcile_interval_secs: default_reconcile_interval_secs(),
        }
    }
}

impl IndexingConfig {
    pub fn concurrency(&self) -> usize {
        self.parallel_embeddings
            .unwrap_or_else(|| num_cpus::get().min(8))
            .max(1)
    }
}

/// Query-time retrieval configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Default number of fragments returned
    pub top_k: usize,
    /// Default similarity floor (inclusive)
    pub min_similarity: f32,
    /// Upper bound for caller-supplied top_k
    #[serde(default = "default_max_top_k")]
    pub max_top_k: usize,
}

fn default_max_top_k() -> usize { 50 }

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            min_similarity: 0.5,
            max_top_k: default_max_top_k(),
        }
    }
}

/// Embedding backend selection
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    /// Gemini API (API key)
    #[default]
    Gemini,
    /// Local Ollama server
    Ollama,
    /// Vertex AI (service account, `gcp` feature)
    Vertex,
}

/// Embedding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Which backend computes embeddings
    #[serde(default)]
    pub backend: EmbeddingBackend,
    /// Model name (same model at index and query time)
    pub model: String,
    /// Embedding dimensions
    pub dimensions: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackend::Gemini,
            model: "text-embedding-004".to_string(),
            dimensions: 768,
        }
    }
}

/// Gemini API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiConfig {
    /// API base URL
    pub base_url: String,
    /// API key (falls back to the `api_key_env` variable)
    #[serde(default)]
    pub api_key: Option<String>,
    /// Environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

fn default_api_key_env() -> String { "GOOGLE_AI_API_KEY".to_string() }

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            api_key: None,
            api_key_env: default_api_key_env(),
        }
    }
}

impl GeminiConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| std::env::var(&self.api_key_env).ok().filter(|k| !k.is_empty()))
    }
}

/// Ollama configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    /// Ollama base URL
    pub base_url: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            timeout_secs: 120,
        }
    }
}

/// Google Cloud Platform configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GcpConfig {
    /// Path to service account JSON key file
    pub service_account_key_path: PathBuf,
    /// GCP project ID
    pub project_id: String,
    /// GCP region (e.g., "us-central1")
    pub location: String,
    /// GCS bucket for originals and checkpoints
    pub gcs_bucket: String,
    /// Object prefix inside the bucket (default: "grounded-rag/")
    #[serde(default = "default_gcs_prefix")]
    pub gcs_prefix: String,
}

fn default_gcs_prefix() -> String {
    "grounded-rag/".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = RagConfig::default();
        config.validate().unwrap();
        assert_eq!(config.extraction.inline_limit_bytes(), 20 * 1024 * 1024);
        assert_eq!(config.checkpoint.retention_days, 7);
    }

    #[test]
    fn test_partial_toml() {
        let config = RagConfig::from_toml(
            r#"
            [retrieval]
            top_k = 8
            min_similarity = 0.3

            [chunking]
            chunk_tokens = 300
            overlap_tokens = 30
            min_chars = 40
            "#,
        )
        .unwrap();

        assert_eq!(config.retrieval.top_k, 8);
        assert_eq!(config.chunking.chunk_tokens, 300);
        assert_eq!(config.chunking.max_page_number_tokens, 8);
        assert_eq!(config.extraction.max_retries, 2);
    }

    #[test]
    fn test_rejects_overlap_not_smaller_than_chunk() {
        let mut config = RagConfig::default();
        config.chunking.overlap_tokens = config.chunking.chunk_tokens;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_retry_delay_doubles() {
        let config = ExtractionConfig::default();
        assert_eq!(config.retry_delay(0), Duration::from_secs(2));
        assert_eq!(config.retry_delay(1), Duration::from_secs(4));
    }
}
