//! Analytical vector store trait for similarity search over embeddings

use async_trait::async_trait;
use uuid::Uuid;
use crate::error::Result;
use crate::types::EmbeddingRecord;

/// Search hit from the analytical store
#[derive(Debug, Clone, PartialEq)]
pub struct VectorSearchHit {
    pub fragment_id: Uuid,
    pub document_id: Uuid,
    pub fragment_index: u32,
    /// Cosine similarity in [-1, 1]
    pub similarity: f32,
}

/// Trait for the analytical store queried at retrieval time
///
/// Implementations:
/// - `LocalVectorStore`: in-process brute-force cosine index
#[async_trait]
pub trait VectorStoreProvider: Send + Sync {
    /// Bulk insert rows keyed by fragment id (replaces existing ids)
    async fn insert_rows(&self, rows: &[EmbeddingRecord]) -> Result<()>;

    /// Rows of documents in `scope` with similarity >= `min_similarity`,
    /// best first, at most `top_k`
    async fn search(
        &self,
        query_embedding: &[f32],
        scope: &[Uuid],
        min_similarity: f32,
        top_k: usize,
    ) -> Result<Vec<VectorSearchHit>>;

    /// Delete all rows for a document
    async fn delete_by_document(&self, document_id: &Uuid) -> Result<usize>;

    /// Fragment ids stored for a document
    async fn fragment_ids(&self, document_id: &Uuid) -> Result<Vec<Uuid>>;

    /// Ids of every document with at least one row
    async fn document_ids(&self) -> Result<Vec<Uuid>>;

    /// Get total number of vectors stored
    async fn len(&self) -> Result<usize>;

    /// Check if store is empty
    async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// Check if the provider is healthy
    async fn health_check(&self) -> Result<bool>;

    /// Get provider name for logging
    fn name(&self) -> &str;
}
