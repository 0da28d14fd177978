//! Deterministic collaborators for pipeline tests

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::extraction::PagedDocument;
use crate::providers::local::LocalVectorStore;
use crate::providers::{
    BlobStore, EmbeddingProvider, ExtractionModel, ExtractionOutput, VectorSearchHit,
    VectorStoreProvider,
};
use crate::types::{EmbeddingRecord, PageRange};

/// Scripted behavior for one call
#[derive(Debug, Clone)]
pub enum Step {
    Fail { transient: bool },
    /// Never returns; the caller's timeout must fire
    Hang,
}

/// Extraction model whose payload is the page range label ("5-8")
///
/// Returns `text_for(label)` unless a scripted step is queued for the label.
pub struct ScriptedExtractionModel {
    script: Mutex<HashMap<String, VecDeque<Step>>>,
    calls: Mutex<Vec<String>>,
}

impl Default for ScriptedExtractionModel {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedExtractionModel {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn script(&self, label: &str, steps: Vec<Step>) {
        self.script
            .lock()
            .entry(label.to_string())
            .or_default()
            .extend(steps);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    /// Deterministic text for a page range label
    pub fn text_for(label: &str) -> String {
        let (start, end) = label
            .split_once('-')
            .and_then(|(s, e)| Some((s.parse::<u32>().ok()?, e.parse::<u32>().ok()?)))
            .unwrap_or((1, 1));
        (start..=end)
            .map(|page| {
                format!(
                    "Page {page} covers maintenance procedure {page}: inspect the pump housing, \
                     record the pressure reading and replace worn seals before restarting the unit."
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

#[async_trait]
impl ExtractionModel for ScriptedExtractionModel {
    async fn extract(
        &self,
        document: &[u8],
        _mime_type: &str,
        _prompt: &str,
        _max_output_tokens: u32,
    ) -> Result<ExtractionOutput> {
        let label = String::from_utf8_lossy(document).to_string();
        self.calls.lock().push(label.clone());

        let step = self.script.lock().get_mut(&label).and_then(|q| q.pop_front());
        match step {
            Some(Step::Fail { transient: true }) => Err(Error::transient("429 rate limited")),
            Some(Step::Fail { transient: false }) => Err(Error::permanent("malformed section")),
            Some(Step::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(Error::transient("unreachable"))
            }
            None => {
                let text = Self::text_for(&label);
                Ok(ExtractionOutput {
                    output_tokens: Some(text.len() as u64 / 4),
                    input_tokens: Some(1_000),
                    text,
                    truncated: false,
                })
            }
        }
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    fn model(&self) -> &str {
        "gemini-2.5-flash"
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Document whose page payloads are their range labels
pub struct FakePagedDocument {
    pages: u32,
    size_bytes: u64,
}

impl FakePagedDocument {
    pub fn new(pages: u32, size_bytes: u64) -> Self {
        Self { pages, size_bytes }
    }
}

impl PagedDocument for FakePagedDocument {
    fn page_count(&self) -> u32 {
        self.pages
    }

    fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    fn extract_pages(&self, range: PageRange) -> Result<Vec<u8>> {
        Ok(range.to_string().into_bytes())
    }
}

/// Hashed bag-of-words embedder: texts sharing words are similar
pub struct HashEmbedder {
    dimensions: usize,
    /// Texts containing this marker fail to embed
    poison: Option<String>,
}

impl HashEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            poison: None,
        }
    }

    pub fn failing_on(mut self, marker: &str) -> Self {
        self.poison = Some(marker.to_string());
        self
    }

    pub fn vector(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dimensions];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| w.len() > 2)
        {
            let hash = word
                .to_lowercase()
                .bytes()
                .fold(0xcbf2_9ce4_8422_2325u64, |h, b| (h ^ b as u64).wrapping_mul(0x100_0000_01b3));
            v[(hash % self.dimensions as u64) as usize] += 1.0;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            v.iter_mut().for_each(|x| *x /= norm);
        }
        v
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if let Some(marker) = &self.poison {
            if text.contains(marker.as_str()) {
                return Err(Error::embedding("scripted embedding failure"));
            }
        }
        Ok(self.vector(text))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    fn model(&self) -> &str {
        "hash-bow"
    }

    fn name(&self) -> &str {
        "hash"
    }
}

/// Blob store whose writes always fail
pub struct FailingBlobStore;

#[async_trait]
impl BlobStore for FailingBlobStore {
    async fn put(&self, key: &str, _data: Vec<u8>) -> Result<()> {
        Err(Error::storage(format!("write refused: {}", key)))
    }

    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }

    async fn list(&self, _prefix: &str) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    async fn delete(&self, _key: &str) -> Result<()> {
        Ok(())
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(false)
    }

    fn name(&self) -> &str {
        "failing"
    }
}

/// Local analytical store that refuses the next `n` document deletions
pub struct FlakyVectorStore {
    inner: LocalVectorStore,
    failing_deletes: AtomicUsize,
}

impl FlakyVectorStore {
    pub fn new(dimensions: usize) -> Self {
        Self {
            inner: LocalVectorStore::with_dimensions(dimensions),
            failing_deletes: AtomicUsize::new(0),
        }
    }

    pub fn fail_deletes(&self, n: usize) {
        self.failing_deletes.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl VectorStoreProvider for FlakyVectorStore {
    async fn insert_rows(&self, rows: &[EmbeddingRecord]) -> Result<()> {
        self.inner.insert_rows(rows).await
    }

    async fn search(
        &self,
        query_embedding: &[f32],
        scope: &[Uuid],
        min_similarity: f32,
        top_k: usize,
    ) -> Result<Vec<VectorSearchHit>> {
        self.inner.search(query_embedding, scope, min_similarity, top_k).await
    }

    async fn delete_by_document(&self, document_id: &Uuid) -> Result<usize> {
        let refused = self
            .failing_deletes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(Error::vector_store("analytical store unavailable"));
        }
        self.inner.delete_by_document(document_id).await
    }

    async fn fragment_ids(&self, document_id: &Uuid) -> Result<Vec<Uuid>> {
        self.inner.fragment_ids(document_id).await
    }

    async fn document_ids(&self) -> Result<Vec<Uuid>> {
        self.inner.document_ids().await
    }

    async fn len(&self) -> Result<usize> {
        self.inner.len().await
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    fn name(&self) -> &str {
        "flaky-local"
    }
}
