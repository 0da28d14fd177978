//! Primary document store trait (documents, fragments, embeddings, text)

use async_trait::async_trait;
use uuid::Uuid;
use crate::error::Result;
use crate::types::{EmbeddingRecord, SourceDocument, TextFragment};

/// Trait for the primary store, kept for provenance and debugging
///
/// Implementations:
/// - `SqliteDocumentStore`: local SQLite database
#[async_trait]
pub trait DocumentStoreProvider: Send + Sync {
    /// Insert or update a source document
    async fn put_document(&self, document: &SourceDocument) -> Result<()>;

    /// Get a source document
    async fn get_document(&self, id: &Uuid) -> Result<Option<SourceDocument>>;

    /// List all source documents
    async fn list_documents(&self) -> Result<Vec<SourceDocument>>;

    /// Documents an agent may retrieve from
    async fn documents_for_agent(&self, agent_id: &str) -> Result<Vec<SourceDocument>>;

    /// Store the combined extracted text of a document
    async fn put_extracted_text(&self, document_id: &Uuid, text: &str) -> Result<()>;

    /// Get the combined extracted text of a document
    async fn get_extracted_text(&self, document_id: &Uuid) -> Result<Option<String>>;

    /// Delete all fragments and embeddings of a document
    async fn delete_fragments(&self, document_id: &Uuid) -> Result<usize>;

    /// Insert fragments (kept and discarded)
    async fn insert_fragments(&self, fragments: &[TextFragment]) -> Result<()>;

    /// Fragments of a document ordered by index
    async fn list_fragments(&self, document_id: &Uuid) -> Result<Vec<TextFragment>>;

    /// Fragments by id (missing ids are skipped)
    async fn get_fragments(&self, ids: &[Uuid]) -> Result<Vec<TextFragment>>;

    /// Store the embedding of a kept fragment
    async fn put_embedding(&self, record: &EmbeddingRecord) -> Result<()>;

    /// Fragment ids with a stored embedding for a document
    async fn embedding_ids(&self, document_id: &Uuid) -> Result<Vec<Uuid>>;

    /// Every stored embedding (used to rebuild the analytical store)
    async fn list_embeddings(&self) -> Result<Vec<EmbeddingRecord>>;

    /// Check if the provider is healthy
    async fn health_check(&self) -> Result<bool>;

    /// Get provider name for logging
    fn name(&self) -> &str;
}
