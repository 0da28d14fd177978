//! Local provider implementations using the filesystem, SQLite and the in-process index
//!
//! The SQLite database and vector index are synchronous; these wrappers move
//! their calls onto the blocking pool.

use async_trait::async_trait;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::retrieval::VectorIndex;
use crate::storage::Database;
use crate::types::{EmbeddingRecord, SourceDocument, TextFragment};

use super::blob_store::BlobStore;
use super::document_store::DocumentStoreProvider;
use super::vector_store::{VectorSearchHit, VectorStoreProvider};

async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Internal(format!("Task join error: {}", e)))?
}

/// Local analytical store wrapping the in-process `VectorIndex`
pub struct LocalVectorStore {
    index: Arc<VectorIndex>,
}

impl LocalVectorStore {
    /// Create from existing index
    pub fn new(index: Arc<VectorIndex>) -> Self {
        Self { index }
    }

    pub fn with_dimensions(dimensions: usize) -> Self {
        Self::new(Arc::new(VectorIndex::new(dimensions)))
    }

    /// Get underlying index for direct access
    pub fn inner(&self) -> &Arc<VectorIndex> {
        &self.index
    }
}

#[async_trait]
impl VectorStoreProvider for LocalVectorStore {
    async fn insert_rows(&self, rows: &[EmbeddingRecord]) -> Result<()> {
        let index = self.index.clone();
        let rows = rows.to_vec();
        blocking(move || index.insert(&rows)).await
    }

    async fn search(
        &self,
        query_embedding: &[f32],
        scope: &[Uuid],
        min_similarity: f32,
        top_k: usize,
    ) -> Result<Vec<VectorSearchHit>> {
        let index = self.index.clone();
        let query = query_embedding.to_vec();
        let scope = scope.to_vec();
        blocking(move || index.search(&query, &scope, min_similarity, top_k)).await
    }

    async fn delete_by_document(&self, document_id: &Uuid) -> Result<usize> {
        Ok(self.index.delete_by_document(document_id))
    }

    async fn fragment_ids(&self, document_id: &Uuid) -> Result<Vec<Uuid>> {
        Ok(self.index.fragment_ids(document_id))
    }

    async fn document_ids(&self) -> Result<Vec<Uuid>> {
        Ok(self.index.document_ids())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.index.len())
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    fn name(&self) -> &str {
        "local-index"
    }
}

/// Primary store backed by SQLite
pub struct SqliteDocumentStore {
    db: Database,
}

impl SqliteDocumentStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(Database::new(path)?))
    }

    pub fn database(&self) -> &Database {
        &self.db
    }
}

#[async_trait]
impl DocumentStoreProvider for SqliteDocumentStore {
    async fn put_document(&self, document: &SourceDocument) -> Result<()> {
        let db = self.db.clone();
        let document = document.clone();
        blocking(move || db.upsert_document(&document)).await
    }

    async fn get_document(&self, id: &Uuid) -> Result<Option<SourceDocument>> {
        let db = self.db.clone();
        let id = *id;
        blocking(move || db.get_document(&id)).await
    }

    async fn list_documents(&self) -> Result<Vec<SourceDocument>> {
        let db = self.db.clone();
        blocking(move || db.list_documents()).await
    }

    async fn documents_for_agent(&self, agent_id: &str) -> Result<Vec<SourceDocument>> {
        let db = self.db.clone();
        let agent_id = agent_id.to_string();
        blocking(move || db.documents_for_agent(&agent_id)).await
    }

    async fn put_extracted_text(&self, document_id: &Uuid, text: &str) -> Result<()> {
        let db = self.db.clone();
        let id = *document_id;
        let text = text.to_string();
        blocking(move || db.put_extracted_text(&id, &text)).await
    }

    async fn get_extracted_text(&self, document_id: &Uuid) -> Result<Option<String>> {
        let db = self.db.clone();
        let id = *document_id;
        blocking(move || db.get_extracted_text(&id)).await
    }

    async fn delete_fragments(&self, document_id: &Uuid) -> Result<usize> {
        let db = self.db.clone();
        let id = *document_id;
        blocking(move || db.delete_fragments(&id)).await
    }

    async fn insert_fragments(&self, fragments: &[TextFragment]) -> Result<()> {
        let db = self.db.clone();
        let fragments = fragments.to_vec();
        blocking(move || db.insert_fragments(&fragments)).await
    }

    async fn list_fragments(&self, document_id: &Uuid) -> Result<Vec<TextFragment>> {
        let db = self.db.clone();
        let id = *document_id;
        blocking(move || db.list_fragments(&id)).await
    }

    async fn get_fragments(&self, ids: &[Uuid]) -> Result<Vec<TextFragment>> {
        let db = self.db.clone();
        let ids = ids.to_vec();
        blocking(move || db.get_fragments(&ids)).await
    }

    async fn put_embedding(&self, record: &EmbeddingRecord) -> Result<()> {
        let db = self.db.clone();
        let record = record.clone();
        blocking(move || db.put_embedding(&record)).await
    }

    async fn embedding_ids(&self, document_id: &Uuid) -> Result<Vec<Uuid>> {
        let db = self.db.clone();
        let id = *document_id;
        blocking(move || db.embedding_ids(&id)).await
    }

    async fn list_embeddings(&self) -> Result<Vec<EmbeddingRecord>> {
        let db = self.db.clone();
        blocking(move || db.list_embeddings()).await
    }

    async fn health_check(&self) -> Result<bool> {
        let db = self.db.clone();
        blocking(move || db.stats().map(|_| true)).await
    }

    fn name(&self) -> &str {
        "sqlite"
    }
}

/// Blob store on the local filesystem
///
/// Writes go to a temp file in the target directory and are renamed into
/// place, so readers never observe a partial blob.
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    /// Create a new local blob store rooted at `root`
    pub fn new(root: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Map a key to a path, refusing keys that escape the root
    fn path_for(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || key.split('/').any(|part| part.is_empty() || part == "." || part == "..") {
            return Err(Error::Checkpoint(format!("Invalid blob key: {:?}", key)));
        }
        Ok(key.split('/').fold(self.root.clone(), |path, part| path.join(part)))
    }

    fn key_for(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<&str> = relative.iter().filter_map(|p| p.to_str()).collect();
        Some(parts.join("/"))
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn put(&self, key: &str, data: Vec<u8>) -> Result<()> {
        let path = self.path_for(key)?;
        blocking(move || {
            let parent = path
                .parent()
                .ok_or_else(|| Error::Internal(format!("Blob path has no parent: {}", path.display())))?;
            std::fs::create_dir_all(parent)?;

            let mut temp = tempfile::NamedTempFile::new_in(parent)?;
            temp.write_all(&data)?;
            temp.as_file().sync_all()?;
            temp.persist(&path).map_err(|e| Error::Io(e.error))?;
            Ok(())
        })
        .await
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        // Walk from the deepest directory fully named by the prefix
        let dir_part = match prefix.rfind('/') {
            Some(pos) => &prefix[..pos],
            None => "",
        };
        let start = if dir_part.is_empty() {
            self.root.clone()
        } else {
            self.path_for(dir_part)?
        };

        let mut keys = Vec::new();
        let mut pending = vec![start];
        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };

            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                } else if let Some(key) = self.key_for(&path) {
                    // Skip in-flight temp files
                    if key.starts_with(prefix) && !key.rsplit('/').next().map_or(false, |n| n.starts_with(".tmp")) {
                        keys.push(key);
                    }
                }
            }
        }

        keys.sort();
        Ok(keys)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(self.root.exists())
    }

    fn name(&self) -> &str {
        "local-filesystem"
    }
}
