//! Query-time retrieval over an agent's document scope

use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::providers::{DocumentStoreProvider, EmbeddingProvider, VectorStoreProvider};
use crate::types::{RetrievalResult, RetrievedFragment};

/// Embeds a query and ranks scoped fragments from the analytical store
pub struct RetrievalEngine {
    embedder: Arc<dyn EmbeddingProvider>,
    vector_store: Arc<dyn VectorStoreProvider>,
    document_store: Arc<dyn DocumentStoreProvider>,
    embed_timeout: Duration,
}

impl RetrievalEngine {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        vector_store: Arc<dyn VectorStoreProvider>,
        document_store: Arc<dyn DocumentStoreProvider>,
        embed_timeout: Duration,
    ) -> Self {
        Self {
            embedder,
            vector_store,
            document_store,
            embed_timeout,
        }
    }

    /// Ranked fragments for `query`; an empty result is a normal outcome
    pub async fn retrieve(
        &self,
        query: &str,
        scope: &[Uuid],
        top_k: usize,
        min_similarity: f32,
    ) -> Result<RetrievalResult> {
        if scope.is_empty() || top_k == 0 {
            return Ok(RetrievalResult::default());
        }

        let query_embedding = tokio::time::timeout(self.embed_timeout, self.embedder.embed(query))
            .await
            .map_err(|_| {
                Error::embedding(format!(
                    "Query embedding timed out after {}s",
                    self.embed_timeout.as_secs()
                ))
            })??;

        if query_embedding.len() != self.embedder.dimensions() {
            return Err(Error::embedding(format!(
                "{} returned {} dimensions, expected {}",
                self.embedder.name(),
                query_embedding.len(),
                self.embedder.dimensions()
            )));
        }

        let hits = self
            .vector_store
            .search(&query_embedding, scope, min_similarity, top_k)
            .await?;

        if hits.is_empty() {
            tracing::debug!("No fragments above {:.3} for query in {} documents", min_similarity, scope.len());
            return Ok(RetrievalResult::default());
        }

        let ids: Vec<Uuid> = hits.iter().map(|h| h.fragment_id).collect();
        let fragments = self.document_store.get_fragments(&ids).await?;

        let mut results = Vec::with_capacity(hits.len());
        for hit in hits {
            match fragments.iter().find(|f| f.id == hit.fragment_id) {
                Some(fragment) => results.push(RetrievedFragment {
                    fragment_id: fragment.id,
                    document_id: fragment.document_id,
                    index: fragment.index,
                    text: fragment.text.clone(),
                    start_offset: fragment.start_offset,
                    end_offset: fragment.end_offset,
                    similarity: hit.similarity,
                }),
                None => {
                    // Present in the analytical store only; reconciliation reports it
                    tracing::warn!(
                        "Fragment {} of document {} missing from primary store, skipped",
                        hit.fragment_id,
                        hit.document_id
                    );
                }
            }
        }

        Ok(RetrievalResult::new(results))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::local::{LocalVectorStore, SqliteDocumentStore};
    use crate::storage::Database;
    use crate::testing::HashEmbedder;
    use crate::types::{EmbeddingRecord, TextFragment};
    use std::collections::BTreeSet;

    const DIM: usize = 64;
    const QUERY: &str = "replace worn pump seals";

    struct Stores {
        engine: RetrievalEngine,
        embedder: Arc<HashEmbedder>,
        primary: Arc<SqliteDocumentStore>,
        analytical: Arc<LocalVectorStore>,
    }

    fn stores_with(embedder: HashEmbedder) -> Stores {
        let embedder = Arc::new(embedder);
        let primary = Arc::new(SqliteDocumentStore::new(Database::in_memory().unwrap()));
        let analytical = Arc::new(LocalVectorStore::with_dimensions(DIM));
        let engine = RetrievalEngine::new(
            embedder.clone(),
            analytical.clone(),
            primary.clone(),
            Duration::from_secs(5),
        );
        Stores {
            engine,
            embedder,
            primary,
            analytical,
        }
    }

    fn stores() -> Stores {
        stores_with(HashEmbedder::new(DIM))
    }

    fn fragment(document_id: Uuid, index: u32, text: &str) -> TextFragment {
        TextFragment::new(document_id, index, text.to_string(), 0, text.len(), 4)
    }

    impl Stores {
        fn record(&self, fragment: &TextFragment) -> EmbeddingRecord {
            EmbeddingRecord::new(fragment, self.embedder.vector(&fragment.text), BTreeSet::new())
        }

        async fn primary_only(&self, fragments: &[TextFragment]) {
            self.primary.insert_fragments(fragments).await.unwrap();
        }

        async fn analytical_only(&self, fragments: &[TextFragment]) {
            let rows: Vec<EmbeddingRecord> = fragments.iter().map(|f| self.record(f)).collect();
            self.analytical.insert_rows(&rows).await.unwrap();
        }

        async fn both(&self, fragments: &[TextFragment]) {
            self.primary_only(fragments).await;
            self.analytical_only(fragments).await;
        }
    }

    #[tokio::test]
    async fn test_returns_fragments_present_in_both_stores() {
        let s = stores();
        let doc = Uuid::new_v4();
        let seals = fragment(doc, 0, "Replace worn pump seals every spring");
        s.both(std::slice::from_ref(&seals)).await;

        let result = s.engine.retrieve(QUERY, &[doc], 5, 0.1).await.unwrap();
        assert_eq!(result.fragments.len(), 1);
        assert_eq!(result.fragments[0].fragment_id, seals.id);
        assert_eq!(result.fragments[0].text, seals.text);
    }

    #[tokio::test]
    async fn test_analytical_only_row_is_skipped() {
        let s = stores();
        let doc = Uuid::new_v4();
        let kept = fragment(doc, 0, "Replace worn pump seals every spring");
        let ghost = fragment(doc, 1, "Worn pump seals must be replaced");
        s.both(std::slice::from_ref(&kept)).await;
        s.analytical_only(std::slice::from_ref(&ghost)).await;

        let result = s.engine.retrieve(QUERY, &[doc], 5, 0.1).await.unwrap();
        let ids: Vec<Uuid> = result.fragments.iter().map(|f| f.fragment_id).collect();
        assert_eq!(ids, vec![kept.id]);
    }

    #[tokio::test]
    async fn test_deleted_primary_fragments_are_not_surfaced() {
        let s = stores();
        let doc = Uuid::new_v4();
        s.both(&[fragment(doc, 0, "Replace worn pump seals every spring")]).await;
        s.primary.delete_fragments(&doc).await.unwrap();

        let result = s.engine.retrieve(QUERY, &[doc], 5, 0.1).await.unwrap();
        assert!(result.fragments.is_empty());
    }

    #[tokio::test]
    async fn test_primary_only_fragment_is_never_returned() {
        let s = stores();
        let doc = Uuid::new_v4();
        let indexed = fragment(doc, 0, "Replace worn pump seals every spring");
        let unindexed = fragment(doc, 1, "Worn pump seals must be replaced");
        s.both(std::slice::from_ref(&indexed)).await;
        s.primary_only(std::slice::from_ref(&unindexed)).await;

        let result = s.engine.retrieve(QUERY, &[doc], 5, 0.0).await.unwrap();
        let ids: Vec<Uuid> = result.fragments.iter().map(|f| f.fragment_id).collect();
        assert_eq!(ids, vec![indexed.id]);
    }

    #[tokio::test]
    async fn test_empty_scope_or_zero_top_k_skips_embedding() {
        // Every embed call fails, so any Ok here never reached the embedder
        let s = stores_with(HashEmbedder::new(DIM).failing_on(""));
        let doc = Uuid::new_v4();

        assert!(s.engine.retrieve(QUERY, &[], 5, 0.0).await.unwrap().fragments.is_empty());
        assert!(s.engine.retrieve(QUERY, &[doc], 0, 0.0).await.unwrap().fragments.is_empty());
        assert!(s.engine.retrieve(QUERY, &[doc], 5, 0.0).await.is_err());
    }
}
