//! Application state for the pipeline server

use std::sync::Arc;

use crate::config::{EmbeddingBackend, RagConfig};
use crate::error::{Error, Result};
use crate::processing::{Pipeline, PipelineProviders};
use crate::providers::{
    gemini::GeminiClient,
    local::{LocalBlobStore, LocalVectorStore, SqliteDocumentStore},
    ollama::OllamaEmbedder,
    BlobStore, EmbeddingProvider,
};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: RagConfig,
    pipeline: Arc<Pipeline>,
}

impl AppState {
    /// Build providers from configuration and load the analytical store
    pub async fn new(config: RagConfig) -> Result<Self> {
        let providers = build_providers(&config).await?;
        let pipeline = Arc::new(Pipeline::new(config.clone(), providers)?);

        let loaded = pipeline.rehydrate().await?;
        tracing::info!("Analytical store rehydrated with {} embeddings", loaded);

        Ok(Self::from_pipeline(config, pipeline))
    }

    /// Wrap an already assembled pipeline
    pub fn from_pipeline(config: RagConfig, pipeline: Arc<Pipeline>) -> Self {
        Self {
            inner: Arc::new(AppStateInner { config, pipeline }),
        }
    }

    pub fn config(&self) -> &RagConfig {
        &self.inner.config
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.inner.pipeline
    }
}

/// Select provider implementations for the configured backends
pub async fn build_providers(config: &RagConfig) -> Result<PipelineProviders> {
    std::fs::create_dir_all(&config.storage.data_dir).map_err(|e| {
        Error::Config(format!(
            "Cannot create data dir {}: {}",
            config.storage.data_dir.display(),
            e
        ))
    })?;

    let document_store = Arc::new(SqliteDocumentStore::open(config.storage.database_path())?);
    tracing::info!("Primary store: {}", config.storage.database_path().display());

    let vector_store = Arc::new(LocalVectorStore::with_dimensions(config.embeddings.dimensions));

    let gemini = Arc::new(GeminiClient::new(&config.gemini, &config.extraction, &config.embeddings)?);
    tracing::info!("Extraction model: {}", config.extraction.model);

    let embedder: Arc<dyn EmbeddingProvider> = match config.embeddings.backend {
        EmbeddingBackend::Gemini => gemini.clone(),
        EmbeddingBackend::Ollama => Arc::new(OllamaEmbedder::new(&config.ollama, &config.embeddings)?),
        EmbeddingBackend::Vertex => vertex_embedder(config)?,
    };
    tracing::info!(
        "Embeddings: {} ({}, {} dims)",
        embedder.name(),
        embedder.model(),
        embedder.dimensions()
    );

    let blobs = blob_store(config).await?;
    tracing::info!("Blob store: {}", blobs.name());

    Ok(PipelineProviders {
        extraction_model: gemini,
        embedder,
        document_store,
        vector_store,
        blobs,
    })
}

#[cfg(feature = "gcp")]
fn vertex_embedder(config: &RagConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    use crate::providers::gcp::{GcpAuth, VertexAiEmbedder};

    let gcp = config
        .gcp
        .as_ref()
        .ok_or_else(|| Error::Config("embeddings.backend = \"vertex\" requires a [gcp] section".into()))?;
    let auth = Arc::new(GcpAuth::from_service_account(
        &gcp.service_account_key_path,
        gcp.project_id.clone(),
    )?);
    Ok(Arc::new(VertexAiEmbedder::new(auth, gcp, &config.embeddings)))
}

#[cfg(not(feature = "gcp"))]
fn vertex_embedder(_config: &RagConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    Err(Error::Config(
        "Vertex AI embeddings require building with the `gcp` feature".into(),
    ))
}

#[cfg(feature = "gcp")]
async fn blob_store(config: &RagConfig) -> Result<Arc<dyn BlobStore>> {
    use crate::providers::gcp::{GcpAuth, GcsBlobStore};

    match &config.gcp {
        Some(gcp) => {
            let auth = Arc::new(GcpAuth::from_service_account(
                &gcp.service_account_key_path,
                gcp.project_id.clone(),
            )?);
            let store = GcsBlobStore::new(auth, gcp.gcs_bucket.clone(), gcp.gcs_prefix.clone()).await?;
            Ok(Arc::new(store))
        }
        None => Ok(Arc::new(LocalBlobStore::new(config.storage.blob_path())?)),
    }
}

#[cfg(not(feature = "gcp"))]
async fn blob_store(config: &RagConfig) -> Result<Arc<dyn BlobStore>> {
    if config.gcp.is_some() {
        tracing::warn!("[gcp] configured but the `gcp` feature is disabled; using local blobs");
    }
    Ok(Arc::new(LocalBlobStore::new(config.storage.blob_path())?))
}
