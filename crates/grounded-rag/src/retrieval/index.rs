//! In-process analytical index with brute-force cosine search

use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::providers::VectorSearchHit;
use crate::types::EmbeddingRecord;

use super::ranking::{cosine_similarity, rank};

#[derive(Debug, Clone)]
struct IndexedRow {
    document_id: Uuid,
    fragment_index: u32,
    vector: Vec<f32>,
}

/// Vector index keyed by fragment id
///
/// Rebuilt from the primary store at startup, so it holds no state of its
/// own that cannot be recovered.
pub struct VectorIndex {
    /// Embedding dimensions; rows of any other length are rejected
    dimensions: usize,
    rows: RwLock<HashMap<Uuid, IndexedRow>>,
    /// Mapping from document IDs to fragment IDs for efficient deletion
    document_fragments: RwLock<HashMap<Uuid, Vec<Uuid>>>,
}

impl VectorIndex {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            rows: RwLock::new(HashMap::new()),
            document_fragments: RwLock::new(HashMap::new()),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Insert rows, replacing rows with the same fragment id
    pub fn insert(&self, records: &[EmbeddingRecord]) -> Result<()> {
        if let Some(bad) = records.iter().find(|r| r.vector.len() != self.dimensions) {
            return Err(Error::vector_store(format!(
                "Fragment {} has {} dimensions, index expects {}",
                bad.fragment_id,
                bad.vector.len(),
                self.dimensions
            )));
        }

        let mut rows = self.rows.write();
        let mut by_document = self.document_fragments.write();

        for record in records {
            let previous = rows.insert(
                record.fragment_id,
                IndexedRow {
                    document_id: record.document_id,
                    fragment_index: record.fragment_index,
                    vector: record.vector.clone(),
                },
            );
            if previous.is_none() {
                by_document
                    .entry(record.document_id)
                    .or_default()
                    .push(record.fragment_id);
            }
        }

        Ok(())
    }

    /// Scoped, thresholded, ranked search
    pub fn search(
        &self,
        query: &[f32],
        scope: &[Uuid],
        min_similarity: f32,
        top_k: usize,
    ) -> Result<Vec<VectorSearchHit>> {
        if query.len() != self.dimensions {
            return Err(Error::vector_store(format!(
                "Query has {} dimensions, index expects {}",
                query.len(),
                self.dimensions
            )));
        }

        let scope: HashSet<&Uuid> = scope.iter().collect();
        let rows = self.rows.read();
        let by_document = self.document_fragments.read();

        let candidates: Vec<VectorSearchHit> = scope
            .iter()
            .filter_map(|doc_id| by_document.get(*doc_id))
            .flatten()
            .filter_map(|fragment_id| {
                rows.get(fragment_id).map(|row| VectorSearchHit {
                    fragment_id: *fragment_id,
                    document_id: row.document_id,
                    fragment_index: row.fragment_index,
                    similarity: cosine_similarity(query, &row.vector),
                })
            })
            .collect();

        Ok(rank(candidates, min_similarity, top_k))
    }

    pub fn delete_by_document(&self, document_id: &Uuid) -> usize {
        let mut rows = self.rows.write();
        let mut by_document = self.document_fragments.write();

        match by_document.remove(document_id) {
            Some(ids) => ids.iter().filter(|id| rows.remove(id).is_some()).count(),
            None => 0,
        }
    }

    pub fn fragment_ids(&self, document_id: &Uuid) -> Vec<Uuid> {
        self.document_fragments
            .read()
            .get(document_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn document_ids(&self) -> Vec<Uuid> {
        self.document_fragments.read().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
