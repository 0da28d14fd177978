//! Embedding indexer with dual writes to the primary and analytical stores
//!
//! There is no transaction spanning both stores. Each kept fragment is
//! written to the primary store and then to the analytical store under the
//! same fragment id; a fragment that lands in only one of them is reported
//! by `reconcile`, and retrieval simply never returns it.

use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::chunking::{GarbageFilter, TextChunker};
use crate::config::{ChunkingConfig, IndexingConfig};
use crate::error::{Error, Result};
use crate::providers::{DocumentStoreProvider, EmbeddingProvider, VectorStoreProvider};
use crate::types::{DiscardReason, EmbeddingRecord, SourceDocument, TextFragment};

/// Outcome of indexing one document
#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexReport {
    pub document_id: Uuid,
    pub fragments_total: usize,
    pub kept: usize,
    pub discarded: usize,
    pub discard_reasons: BTreeMap<DiscardReason, usize>,
    /// Kept fragments present in both stores
    pub indexed: usize,
    /// Kept fragments that failed to embed or write
    pub failed: usize,
    /// Fragments of the previous generation removed first
    pub deleted_previous: usize,
    pub duration_ms: u64,
}

/// Fragments present in only one store
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileReport {
    pub documents_checked: usize,
    /// In the primary store, missing from the analytical store
    pub primary_only: Vec<Uuid>,
    /// In the analytical store, missing from the primary store
    pub analytical_only: Vec<Uuid>,
}

impl ReconcileReport {
    pub fn is_consistent(&self) -> bool {
        self.primary_only.is_empty() && self.analytical_only.is_empty()
    }
}

/// Chunks, filters, embeds and dual-writes documents
pub struct EmbeddingIndexer {
    embedder: Arc<dyn EmbeddingProvider>,
    document_store: Arc<dyn DocumentStoreProvider>,
    vector_store: Arc<dyn VectorStoreProvider>,
    chunker: TextChunker,
    filter: GarbageFilter,
    concurrency: usize,
    embed_timeout: Duration,
    settle_delay: Duration,
}

impl EmbeddingIndexer {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        document_store: Arc<dyn DocumentStoreProvider>,
        vector_store: Arc<dyn VectorStoreProvider>,
        chunking: &ChunkingConfig,
        indexing: &IndexingConfig,
    ) -> Self {
        Self {
            embedder,
            document_store,
            vector_store,
            chunker: TextChunker::new(chunking),
            filter: GarbageFilter::from_config(chunking),
            concurrency: indexing.concurrency(),
            embed_timeout: Duration::from_secs(indexing.embed_timeout_secs),
            settle_delay: Duration::from_millis(indexing.settle_delay_ms),
        }
    }

    /// Replace the fragments and embeddings of `document` with a new generation
    pub async fn index_document(&self, document: &SourceDocument, text: &str) -> Result<IndexReport> {
        let started = Instant::now();
        let document_id = document.id;

        // The old generation must be gone from both stores before writing
        let deleted_previous = self.document_store.delete_fragments(&document_id).await?;
        let deleted_rows = self.vector_store.delete_by_document(&document_id).await?;
        if deleted_previous > 0 || deleted_rows > 0 {
            tracing::info!(
                "Removed previous generation of {}: {} fragments, {} vectors",
                document_id,
                deleted_previous,
                deleted_rows
            );
        }

        let mut fragments = self.chunker.chunk(document_id, text);
        let stats = self.filter.apply(&mut fragments);
        self.document_store.insert_fragments(&fragments).await?;

        let scope = document.agent_ids.clone();
        let kept: Vec<TextFragment> = fragments.iter().filter(|f| f.is_kept()).cloned().collect();

        let results: Vec<(Uuid, Result<()>)> = stream::iter(kept)
            .map(|fragment| {
                let scope = scope.clone();
                async move { (fragment.id, self.index_fragment(&fragment, scope).await) }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut indexed = 0;
        let mut failed = 0;
        for (fragment_id, result) in results {
            match result {
                Ok(()) => indexed += 1,
                Err(e) => {
                    failed += 1;
                    tracing::warn!("Fragment {} of {} not indexed: {}", fragment_id, document_id, e);
                }
            }
        }

        if !self.settle_delay.is_zero() {
            tokio::time::sleep(self.settle_delay).await;
        }

        let report = IndexReport {
            document_id,
            fragments_total: fragments.len(),
            kept: stats.kept,
            discarded: stats.discarded,
            discard_reasons: stats.reasons,
            indexed,
            failed,
            deleted_previous,
            duration_ms: started.elapsed().as_millis() as u64,
        };

        tracing::info!(
            "Indexed {}: {} fragments, {} kept, {} discarded, {} indexed, {} failed",
            document_id,
            report.fragments_total,
            report.kept,
            report.discarded,
            report.indexed,
            report.failed
        );
        Ok(report)
    }

    async fn index_fragment(&self, fragment: &TextFragment, scope: BTreeSet<String>) -> Result<()> {
        let vector = tokio::time::timeout(self.embed_timeout, self.embedder.embed(&fragment.text))
            .await
            .map_err(|_| {
                Error::embedding(format!(
                    "embedding timed out after {}s",
                    self.embed_timeout.as_secs()
                ))
            })??;

        if vector.len() != self.embedder.dimensions() {
            return Err(Error::embedding(format!(
                "{} returned {} dimensions, expected {}",
                self.embedder.name(),
                vector.len(),
                self.embedder.dimensions()
            )));
        }

        let record = EmbeddingRecord::new(fragment, vector, scope);
        self.document_store.put_embedding(&record).await?;
        self.vector_store.insert_rows(std::slice::from_ref(&record)).await
    }

    /// Load every primary-store embedding into the analytical store
    pub async fn rehydrate(&self) -> Result<usize> {
        let records = self.document_store.list_embeddings().await?;
        let count = records.len();
        if count > 0 {
            self.vector_store.insert_rows(&records).await?;
        }
        tracing::info!("Loaded {} embeddings into {}", count, self.vector_store.name());
        Ok(count)
    }

    /// Compare fragment ids per document across both stores
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        let mut documents: BTreeSet<Uuid> = self
            .document_store
            .list_documents()
            .await?
            .into_iter()
            .map(|d| d.id)
            .collect();
        documents.extend(self.vector_store.document_ids().await?);

        let mut report = ReconcileReport {
            documents_checked: documents.len(),
            ..ReconcileReport::default()
        };

        for document_id in documents {
            let primary: BTreeSet<Uuid> = self
                .document_store
                .embedding_ids(&document_id)
                .await?
                .into_iter()
                .collect();
            let analytical: BTreeSet<Uuid> = self
                .vector_store
                .fragment_ids(&document_id)
                .await?
                .into_iter()
                .collect();

            report.primary_only.extend(primary.difference(&analytical));
            report.analytical_only.extend(analytical.difference(&primary));
        }

        if report.is_consistent() {
            tracing::debug!("Reconciled {} documents, stores agree", report.documents_checked);
        } else {
            tracing::warn!(
                "Store divergence: {} fragments only in primary, {} only in analytical",
                report.primary_only.len(),
                report.analytical_only.len()
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::local::{LocalVectorStore, SqliteDocumentStore};
    use crate::storage::Database;
    use crate::testing::HashEmbedder;

    const DIM: usize = 64;

    struct Fixture {
        indexer: EmbeddingIndexer,
        documents: Arc<SqliteDocumentStore>,
        vectors: Arc<LocalVectorStore>,
    }

    fn fixture(embedder: HashEmbedder) -> Fixture {
        let documents = Arc::new(SqliteDocumentStore::new(Database::in_memory().unwrap()));
        let vectors = Arc::new(LocalVectorStore::with_dimensions(DIM));
        let chunking = ChunkingConfig {
            chunk_tokens: 30,
            overlap_tokens: 5,
            ..ChunkingConfig::default()
        };
        let indexer = EmbeddingIndexer::new(
            Arc::new(embedder),
            documents.clone(),
            vectors.clone(),
            &chunking,
            &IndexingConfig::default(),
        );
        Fixture {
            indexer,
            documents,
            vectors,
        }
    }

    fn text() -> String {
        [
            "1. Pumps ............................. 2\n2. Seals ............................. 4",
            "Página 2 de 9",
            "Centrifugal pumps must be inspected weekly. Record the discharge pressure and compare it with the commissioning baseline.",
            "Mechanical seals are replaced whenever leakage exceeds the tolerance in the maintenance table or the shaft shows scoring.",
            "Lubrication intervals depend on bearing temperature; bearings running above 80 degrees need grease every 500 hours.",
        ]
        .join("\n\n")
    }

    async fn document(fixture: &Fixture) -> SourceDocument {
        let doc = SourceDocument::new("owner", vec!["maintenance".to_string()], "pumps.pdf", b"%PDF");
        fixture.documents.put_document(&doc).await.unwrap();
        doc
    }

    #[tokio::test]
    async fn test_index_writes_both_stores() {
        let fixture = fixture(HashEmbedder::new(DIM));
        let doc = document(&fixture).await;

        let report = fixture.indexer.index_document(&doc, &text()).await.unwrap();

        assert_eq!(report.discarded, 2);
        assert_eq!(report.discard_reasons.get(&DiscardReason::TableOfContents), Some(&1));
        assert_eq!(report.discard_reasons.get(&DiscardReason::PageNumber), Some(&1));
        assert!(report.kept > 0);
        assert_eq!(report.indexed, report.kept);
        assert_eq!(report.failed, 0);

        let stored = fixture.documents.list_fragments(&doc.id).await.unwrap();
        assert_eq!(stored.len(), report.fragments_total);
        assert_eq!(fixture.vectors.len().await.unwrap(), report.kept);
        assert!(fixture.indexer.reconcile().await.unwrap().is_consistent());
    }

    #[tokio::test]
    async fn test_reindex_replaces_previous_generation() {
        let fixture = fixture(HashEmbedder::new(DIM));
        let doc = document(&fixture).await;

        let first = fixture.indexer.index_document(&doc, &text()).await.unwrap();
        let first_fragments = fixture.documents.list_fragments(&doc.id).await.unwrap();
        let second = fixture.indexer.index_document(&doc, &text()).await.unwrap();
        let second_fragments = fixture.documents.list_fragments(&doc.id).await.unwrap();

        assert_eq!(second.deleted_previous, first.fragments_total);
        assert_eq!(first_fragments.len(), second_fragments.len());

        let shape = |fragments: &[TextFragment]| -> Vec<(String, usize, usize, bool)> {
            fragments
                .iter()
                .map(|f| (f.text.clone(), f.start_offset, f.end_offset, f.is_kept()))
                .collect()
        };
        assert_eq!(shape(&first_fragments), shape(&second_fragments));

        // No fragment of the first pass survives in either store
        let old_ids: BTreeSet<Uuid> = first_fragments.iter().map(|f| f.id).collect();
        let vector_ids = fixture.vectors.fragment_ids(&doc.id).await.unwrap();
        assert_eq!(vector_ids.len(), second.kept);
        assert!(vector_ids.iter().all(|id| !old_ids.contains(id)));
        assert!(second_fragments.iter().all(|f| !old_ids.contains(&f.id)));
    }

    #[tokio::test]
    async fn test_fragment_failure_is_isolated() {
        let fixture = fixture(HashEmbedder::new(DIM).failing_on("Lubrication"));
        let doc = document(&fixture).await;

        let report = fixture.indexer.index_document(&doc, &text()).await.unwrap();

        assert_eq!(report.failed, 1);
        assert_eq!(report.indexed, report.kept - 1);
        assert_eq!(fixture.vectors.len().await.unwrap(), report.indexed);
    }

    #[tokio::test]
    async fn test_reconcile_reports_divergence() {
        let fixture = fixture(HashEmbedder::new(DIM));
        let doc = document(&fixture).await;
        fixture.indexer.index_document(&doc, &text()).await.unwrap();

        let dropped = fixture.vectors.fragment_ids(&doc.id).await.unwrap()[0];
        fixture.vectors.delete_by_document(&doc.id).await.unwrap();

        let report = fixture.indexer.reconcile().await.unwrap();
        assert!(!report.is_consistent());
        assert!(report.primary_only.contains(&dropped));
        assert!(report.analytical_only.is_empty());

        // Rebuilding the analytical store from the primary store heals it
        fixture.indexer.rehydrate().await.unwrap();
        assert!(fixture.indexer.reconcile().await.unwrap().is_consistent());
    }
}
