//! Document lifecycle: registration, extraction jobs, indexing and retrieval
//!
//! `Pipeline` wires the extraction worker, the embedding indexer and the
//! retrieval engine to the configured providers. Extraction runs as a
//! background task per document; everything else is request-scoped.

use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::config::RagConfig;
use crate::error::{Error, Result};
use crate::extraction::{
    CheckpointStore, ExtractionJob, ExtractionWorker, PagedDocument, PdfDocument, WholeDocument,
};
use crate::generation::ReferenceBinder;
use crate::indexing::{EmbeddingIndexer, IndexReport, ReconcileReport};
use crate::providers::{
    BlobStore, DocumentStoreProvider, EmbeddingProvider, ExtractionModel, VectorStoreProvider,
};
use crate::retrieval::RetrievalEngine;
use crate::types::{
    CheckpointInfo, DocumentStatus, RetrievalResult, RetrieveRequest, RetrieveResponse,
    SourceDocument,
};

use super::job_queue::{ExtractionStatus, JobQueue, JobState};

/// Builds the paged view of a document's original bytes
pub type DocumentOpener =
    Arc<dyn Fn(&SourceDocument, Vec<u8>) -> Result<Box<dyn PagedDocument>> + Send + Sync>;

/// PDFs are split by page; anything else is sent whole
pub fn open_document(document: &SourceDocument, bytes: Vec<u8>) -> Result<Box<dyn PagedDocument>> {
    if document.is_pdf() {
        Ok(Box::new(PdfDocument::load(bytes)?))
    } else {
        Ok(Box::new(WholeDocument::new(bytes)))
    }
}

/// External collaborators the pipeline runs against
#[derive(Clone)]
pub struct PipelineProviders {
    pub extraction_model: Arc<dyn ExtractionModel>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub document_store: Arc<dyn DocumentStoreProvider>,
    pub vector_store: Arc<dyn VectorStoreProvider>,
    pub blobs: Arc<dyn BlobStore>,
}

/// Provider health, one flag per collaborator
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub extraction_model: bool,
    pub embeddings: bool,
    pub document_store: bool,
    pub vector_store: bool,
    pub blob_store: bool,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.extraction_model
            && self.embeddings
            && self.document_store
            && self.vector_store
            && self.blob_store
    }
}

/// Orchestrates the extraction and indexing pipeline
pub struct Pipeline {
    config: RagConfig,
    providers: PipelineProviders,
    checkpoints: Arc<CheckpointStore>,
    worker: ExtractionWorker,
    indexer: EmbeddingIndexer,
    retrieval: RetrievalEngine,
    jobs: JobQueue,
    index_locks: DashMap<Uuid, Arc<tokio::sync::Mutex<()>>>,
    opener: DocumentOpener,
}

impl Pipeline {
    pub fn new(config: RagConfig, providers: PipelineProviders) -> Result<Self> {
        config.validate()?;
        if providers.embedder.dimensions() != config.embeddings.dimensions {
            return Err(Error::Config(format!(
                "{} produces {} dimensions but embeddings.dimensions is {}",
                providers.embedder.name(),
                providers.embedder.dimensions(),
                config.embeddings.dimensions
            )));
        }

        let checkpoints = Arc::new(CheckpointStore::new(
            providers.blobs.clone(),
            config.checkpoint.prefix.clone(),
        ));
        let worker = ExtractionWorker::new(
            providers.extraction_model.clone(),
            checkpoints.clone(),
            &config.extraction,
        );
        let indexer = EmbeddingIndexer::new(
            providers.embedder.clone(),
            providers.document_store.clone(),
            providers.vector_store.clone(),
            &config.chunking,
            &config.indexing,
        );
        let retrieval = RetrievalEngine::new(
            providers.embedder.clone(),
            providers.vector_store.clone(),
            providers.document_store.clone(),
            Duration::from_secs(config.indexing.embed_timeout_secs),
        );

        tracing::info!(
            "Pipeline ready: extraction={} ({}), embeddings={} ({}), primary={}, analytical={}, blobs={}",
            providers.extraction_model.name(),
            providers.extraction_model.model(),
            providers.embedder.name(),
            providers.embedder.model(),
            providers.document_store.name(),
            providers.vector_store.name(),
            providers.blobs.name()
        );

        Ok(Self {
            config,
            providers,
            checkpoints,
            worker,
            indexer,
            retrieval,
            jobs: JobQueue::new(),
            index_locks: DashMap::new(),
            opener: Arc::new(open_document),
        })
    }

    /// Replace how original bytes are turned into pages
    pub fn with_document_opener(mut self, opener: DocumentOpener) -> Self {
        self.opener = opener;
        self
    }

    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    pub fn jobs(&self) -> &JobQueue {
        &self.jobs
    }

    /// Store the original bytes and create a pending document
    pub async fn register_document(
        &self,
        owner_id: &str,
        agent_ids: Vec<String>,
        filename: &str,
        data: Vec<u8>,
    ) -> Result<SourceDocument> {
        if data.is_empty() {
            return Err(Error::InvalidRequest(format!("{} is empty", filename)));
        }

        let document = SourceDocument::new(owner_id, agent_ids, filename, &data);
        self.providers.blobs.put(&document.blob_key, data).await?;
        self.providers.document_store.put_document(&document).await?;

        tracing::info!(
            "Registered {} as {} ({} bytes, {}, agents {:?})",
            document.filename,
            document.id,
            document.size_bytes,
            document.mime_type,
            document.agent_ids
        );
        Ok(document)
    }

    /// Replace the agents allowed to retrieve from a document
    ///
    /// Retrieval resolves scope from documents at query time, so no
    /// re-index is needed.
    pub async fn assign_agents(&self, document_id: Uuid, agent_ids: Vec<String>) -> Result<SourceDocument> {
        let mut document = self.document(document_id).await?;
        document.agent_ids = agent_ids.into_iter().collect();
        document.updated_at = chrono::Utc::now();
        self.providers.document_store.put_document(&document).await?;
        Ok(document)
    }

    pub async fn document(&self, document_id: Uuid) -> Result<SourceDocument> {
        self.providers
            .document_store
            .get_document(&document_id)
            .await?
            .ok_or_else(|| Error::DocumentNotFound(document_id.to_string()))
    }

    pub async fn list_documents(&self) -> Result<Vec<SourceDocument>> {
        self.providers.document_store.list_documents().await
    }

    /// Start (or join) extraction of a document
    ///
    /// While a job is active for the document its id is returned again. A
    /// new job resumes from the latest resumable checkpoint, or only indexes
    /// when the combined text is already stored.
    pub async fn start_extraction(self: &Arc<Self>, document_id: Uuid) -> Result<Uuid> {
        let document = self.document(document_id).await?;

        let (job_id, created) = self.jobs.begin(document_id);
        if !created {
            tracing::debug!("Extraction of {} already running as job {}", document_id, job_id);
            return Ok(job_id);
        }

        tracing::info!("Starting extraction job {} for {}", job_id, document.filename);
        let pipeline = Arc::clone(self);
        let task = tokio::spawn(async move {
            pipeline.run_job(job_id, document).await;
        });
        self.jobs.attach(job_id, task.abort_handle());

        Ok(job_id)
    }

    pub fn extraction_status(&self, job_id: Uuid) -> Result<ExtractionStatus> {
        self.jobs
            .status(job_id)
            .ok_or_else(|| Error::JobNotFound(job_id.to_string()))
    }

    /// Abort a running job
    ///
    /// The next start resumes from the checkpoint, or goes straight to
    /// indexing when the combined text was already stored.
    pub async fn cancel_extraction(&self, job_id: Uuid) -> Result<ExtractionStatus> {
        let status = self.extraction_status(job_id)?;
        if !status.state.is_active() {
            return Ok(status);
        }

        let document = self.document(status.document_id).await?;
        let info = self.checkpoint_info(&document).await;
        let text_stored = self.has_extracted_text(&document.id).await;
        let resumable = text_stored || info.resumable;

        let status = self.jobs.cancel(job_id, resumable)?;
        if status.state != JobState::Cancelled {
            // Finished on its own while we were looking
            return Ok(status);
        }

        let reason = if text_stored {
            "indexing cancelled"
        } else {
            "extraction cancelled"
        };
        let mut document = document;
        self.fail_document(&mut document, reason.to_string(), resumable)
            .await;

        tracing::warn!(
            "Cancelled job {} for {} ({}) at {}/{} sections",
            job_id,
            document.id,
            reason,
            info.completed_sections,
            info.total_sections
        );
        Ok(status)
    }

    /// Delete fragments and embeddings, then chunk and embed again
    pub async fn reindex(&self, document_id: Uuid) -> Result<IndexReport> {
        let document = self.document(document_id).await?;
        let text = self
            .providers
            .document_store
            .get_extracted_text(&document_id)
            .await?
            .ok_or_else(|| Error::NotExtracted(document_id.to_string()))?;

        self.index_extracted(document, &text).await
    }

    /// Ranked, citation-bound fragments from the agent's documents
    ///
    /// Never fails on the search itself: a broken embedding call degrades
    /// to an ungrounded, empty response.
    pub async fn retrieve(&self, request: &RetrieveRequest) -> Result<RetrieveResponse> {
        let started = Instant::now();
        if request.query.trim().is_empty() {
            return Err(Error::InvalidRequest("query must not be empty".into()));
        }

        let top_k = request
            .top_k
            .unwrap_or(self.config.retrieval.top_k)
            .min(self.config.retrieval.max_top_k);
        let min_similarity = request
            .min_similarity
            .unwrap_or(self.config.retrieval.min_similarity);

        let documents = self
            .providers
            .document_store
            .documents_for_agent(&request.agent_id)
            .await?;
        let scope: Vec<Uuid> = documents.iter().map(|d| d.id).collect();
        let filenames: HashMap<Uuid, String> = documents
            .into_iter()
            .map(|d| (d.id, d.filename))
            .collect();

        let result = match self
            .retrieval
            .retrieve(&request.query, &scope, top_k, min_similarity)
            .await
        {
            Ok(result) => result,
            Err(e) => {
                tracing::error!("Retrieval for agent {} failed: {}", request.agent_id, e);
                RetrievalResult::default()
            }
        };

        let binder = ReferenceBinder::bind(&result, &filenames);
        let context = binder.build_context();
        let valid_citations = binder.valid_range();

        tracing::info!(
            "Retrieved {} fragment(s) for agent {} over {} document(s)",
            binder.len(),
            request.agent_id,
            scope.len()
        );

        Ok(RetrieveResponse {
            agent_id: request.agent_id.clone(),
            query: request.query.clone(),
            grounded: !binder.is_empty(),
            citations: binder.into_citations(),
            valid_citations,
            context,
            processing_time_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Compare the primary and analytical stores
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        self.indexer.reconcile().await
    }

    /// Remove checkpoints older than the retention window
    pub async fn sweep_checkpoints(&self) -> Result<usize> {
        self.checkpoints
            .sweep_expired(self.config.checkpoint.retention_days)
            .await
    }

    /// Rebuild the analytical store from the primary store
    pub async fn rehydrate(&self) -> Result<usize> {
        self.indexer.rehydrate().await
    }

    pub async fn checkpoint_info(&self, document: &SourceDocument) -> CheckpointInfo {
        match self
            .checkpoints
            .info(&document.owner_id, &document.document_key())
            .await
        {
            Ok(info) => info,
            Err(e) => {
                tracing::warn!("Could not read checkpoint info for {}: {}", document.id, e);
                CheckpointInfo::missing()
            }
        }
    }

    pub async fn health(&self) -> HealthReport {
        let p = &self.providers;
        HealthReport {
            extraction_model: p.extraction_model.health_check().await.unwrap_or(false),
            embeddings: p.embedder.health_check().await.unwrap_or(false),
            document_store: p.document_store.health_check().await.unwrap_or(false),
            vector_store: p.vector_store.health_check().await.unwrap_or(false),
            blob_store: p.blobs.health_check().await.unwrap_or(false),
        }
    }

    async fn has_extracted_text(&self, document_id: &Uuid) -> bool {
        match self.providers.document_store.get_extracted_text(document_id).await {
            Ok(text) => text.is_some(),
            Err(e) => {
                tracing::warn!("Could not read extracted text of {}: {}", document_id, e);
                false
            }
        }
    }

    async fn run_job(&self, job_id: Uuid, mut document: SourceDocument) {
        let stored = match self.providers.document_store.get_extracted_text(&document.id).await {
            Ok(stored) => stored,
            Err(e) => {
                tracing::warn!("Could not read extracted text of {}: {}", document.id, e);
                None
            }
        };

        let status = if stored.is_some() {
            DocumentStatus::Chunked
        } else {
            DocumentStatus::Extracting
        };
        document.set_status(status, None);
        if let Err(e) = self.providers.document_store.put_document(&document).await {
            tracing::warn!("Could not mark {} as {}: {}", document.id, status.as_str(), e);
        }

        let extracted = match stored {
            Some(text) => {
                tracing::info!("Text of {} already stored; job {} only indexes", document.id, job_id);
                Ok(text)
            }
            None => self.extract(job_id, &document).await,
        };

        let text = match extracted {
            Ok(text) => text,
            Err(e) => {
                let info = self.checkpoint_info(&document).await;
                tracing::error!(
                    "Extraction job {} for {} failed (resumable: {}): {}",
                    job_id,
                    document.id,
                    info.resumable,
                    e
                );
                self.fail_document(&mut document, format!("extraction failed: {}", e), info.resumable)
                    .await;
                self.jobs.finish(job_id, JobState::Failed, Some(e.to_string()), info.resumable);
                return;
            }
        };

        self.jobs.set_state(job_id, JobState::Indexing);
        match self.index_extracted(document.clone(), &text).await {
            Ok(report) => {
                tracing::info!(
                    "Job {} finished: {} kept, {} discarded, {} indexed, {} failed",
                    job_id,
                    report.kept,
                    report.discarded,
                    report.indexed,
                    report.failed
                );
                self.jobs.finish(job_id, JobState::Complete, None, false);
            }
            Err(e) => {
                // The text is stored, so a restart only repeats indexing
                tracing::error!("Indexing {} after extraction failed: {}", document.id, e);
                self.fail_document(&mut document, format!("indexing failed: {}", e), true)
                    .await;
                self.jobs.finish(job_id, JobState::Failed, Some(e.to_string()), true);
            }
        }
    }

    /// Run the worker and durably store the combined text
    async fn extract(&self, job_id: Uuid, document: &SourceDocument) -> Result<String> {
        let bytes = self
            .providers
            .blobs
            .get(&document.blob_key)
            .await?
            .ok_or_else(|| {
                Error::permanent(format!("original of {} missing at {}", document.id, document.blob_key))
            })?;
        let paged = (self.opener)(document, bytes)?;

        let job = ExtractionJob {
            document_id: document.id,
            owner_id: document.owner_id.clone(),
            document_key: document.document_key(),
            mime_type: document.mime_type.clone(),
        };

        let outcome = self
            .worker
            .run(&job, paged.as_ref(), |checkpoint| {
                self.jobs.record_progress(job_id, checkpoint)
            })
            .await?;

        self.providers
            .document_store
            .put_extracted_text(&document.id, &outcome.text)
            .await?;

        let mut chunked = document.clone();
        chunked.resumable = false;
        chunked.set_status(DocumentStatus::Chunked, None);
        self.providers.document_store.put_document(&chunked).await?;

        // The text is durable now; the checkpoint is disposable
        if self.config.checkpoint.delete_on_complete {
            match self.checkpoints.delete(&job.owner_id, &job.document_key).await {
                Ok(removed) => tracing::debug!("Removed {} checkpoint records for {}", removed, document.id),
                Err(e) => tracing::warn!("Could not remove checkpoints for {}: {}", document.id, e),
            }
        }

        Ok(outcome.text)
    }

    /// Index under the document's lock so generations never interleave
    async fn index_extracted(&self, mut document: SourceDocument, text: &str) -> Result<IndexReport> {
        let lock = self.index_locks.entry(document.id).or_default().clone();
        let _guard = lock.lock().await;

        let report = self.indexer.index_document(&document, text).await?;

        // Re-read so a concurrent agent assignment is not overwritten
        if let Some(current) = self.providers.document_store.get_document(&document.id).await? {
            document = current;
        }
        document.resumable = false;
        document.set_status(DocumentStatus::Indexed, None);
        self.providers.document_store.put_document(&document).await?;

        Ok(report)
    }

    async fn fail_document(&self, document: &mut SourceDocument, reason: String, resumable: bool) {
        if let Ok(Some(current)) = self.providers.document_store.get_document(&document.id).await {
            *document = current;
        }
        document.resumable = resumable;
        document.set_status(DocumentStatus::Failed, Some(reason));
        if let Err(e) = self.providers.document_store.put_document(document).await {
            tracing::warn!("Could not record failure of {}: {}", document.id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::worker::combine_sections;
    use crate::providers::local::{LocalBlobStore, LocalVectorStore, SqliteDocumentStore};
    use crate::storage::Database;
    use crate::testing::{FakePagedDocument, FlakyVectorStore, HashEmbedder, ScriptedExtractionModel, Step};
    use crate::types::{PageRange, SectionResult};
    use tempfile::TempDir;

    const DIM: usize = 64;
    const MB: u64 = 1024 * 1024;

    struct Harness {
        pipeline: Arc<Pipeline>,
        model: Arc<ScriptedExtractionModel>,
        _dir: TempDir,
    }

    fn harness() -> Harness {
        harness_with(|_| {}, Arc::new(LocalVectorStore::with_dimensions(DIM)))
    }

    fn harness_with(
        configure: impl FnOnce(&mut RagConfig),
        vector_store: Arc<dyn VectorStoreProvider>,
    ) -> Harness {
        let dir = TempDir::new().unwrap();
        let model = Arc::new(ScriptedExtractionModel::new());

        let mut config = RagConfig::default();
        config.embeddings.dimensions = DIM;
        config.extraction.retry_base_delay_ms = 5;
        configure(&mut config);

        let providers = PipelineProviders {
            extraction_model: model.clone(),
            embedder: Arc::new(HashEmbedder::new(DIM)),
            document_store: Arc::new(SqliteDocumentStore::new(Database::in_memory().unwrap())),
            vector_store,
            blobs: Arc::new(LocalBlobStore::new(dir.path().to_path_buf()).unwrap()),
        };

        // 12 pages at 30MB plan as 1-4, 5-8, 9-12
        let pipeline = Pipeline::new(config, providers)
            .unwrap()
            .with_document_opener(Arc::new(
                |_: &SourceDocument, _: Vec<u8>| -> Result<Box<dyn PagedDocument>> {
                    Ok(Box::new(FakePagedDocument::new(12, 30 * MB)))
                },
            ));

        Harness {
            pipeline: Arc::new(pipeline),
            model,
            _dir: dir,
        }
    }

    fn expected_text() -> String {
        let sections: Vec<SectionResult> = [(1, 4), (5, 8), (9, 12)]
            .iter()
            .enumerate()
            .map(|(index, &(start, end))| {
                let range = PageRange::new(start, end);
                SectionResult {
                    index,
                    page_range: range,
                    text: ScriptedExtractionModel::text_for(&range.to_string()),
                    token_count: 0,
                    cost: 0.0,
                    duration_ms: 0,
                    quality_score: 100,
                }
            })
            .collect();
        combine_sections(&sections)
    }

    async fn wait_for(pipeline: &Pipeline, job_id: Uuid) -> ExtractionStatus {
        for _ in 0..500 {
            let status = pipeline.extraction_status(job_id).unwrap();
            if !status.state.is_active() {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {} did not finish", job_id);
    }

    async fn register(pipeline: &Pipeline) -> SourceDocument {
        pipeline
            .register_document("user-1", vec!["maintenance".to_string()], "pump-manual.pdf", b"%PDF-1.7".to_vec())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_failed_job_resumes_and_indexes() {
        let h = harness();
        let document = register(&h.pipeline).await;
        h.model.script("5-8", vec![Step::Fail { transient: false }]);

        let job = h.pipeline.start_extraction(document.id).await.unwrap();
        let status = wait_for(&h.pipeline, job).await;
        assert_eq!(status.state, JobState::Failed);
        assert!(status.resumable);
        assert_eq!(status.completed_sections, 1);

        let failed = h.pipeline.document(document.id).await.unwrap();
        assert_eq!(failed.status, DocumentStatus::Failed);
        assert!(failed.resumable);
        assert!(failed.status_reason.unwrap().contains("malformed section"));

        h.model.clear_calls();
        let retry = h.pipeline.start_extraction(document.id).await.unwrap();
        assert_ne!(retry, job);
        let status = wait_for(&h.pipeline, retry).await;
        assert_eq!(status.state, JobState::Complete);
        assert_eq!(status.completed_sections, 3);
        assert_eq!(h.model.calls(), vec!["5-8", "9-12"]);

        let indexed = h.pipeline.document(document.id).await.unwrap();
        assert_eq!(indexed.status, DocumentStatus::Indexed);
        assert!(!indexed.resumable);

        let text = h
            .pipeline
            .providers
            .document_store
            .get_extracted_text(&document.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(text, expected_text());

        // Deleted once the text was stored
        let info = h.pipeline.checkpoint_info(&document).await;
        assert!(!info.exists);
    }

    #[tokio::test]
    async fn test_start_is_idempotent_and_cancellable() {
        let h = harness();
        let document = register(&h.pipeline).await;
        h.model.script("1-4", vec![Step::Hang]);

        let first = h.pipeline.start_extraction(document.id).await.unwrap();
        let second = h.pipeline.start_extraction(document.id).await.unwrap();
        assert_eq!(first, second);

        tokio::time::sleep(Duration::from_millis(50)).await;
        let status = h.pipeline.cancel_extraction(first).await.unwrap();
        assert_eq!(status.state, JobState::Cancelled);
        assert!(status.resumable);

        let cancelled = h.pipeline.document(document.id).await.unwrap();
        assert_eq!(cancelled.status, DocumentStatus::Failed);
        assert_eq!(h.pipeline.jobs().active_job(&document.id), None);
    }

    #[tokio::test]
    async fn test_cancel_after_completion_keeps_document_indexed() {
        let h = harness();
        let document = register(&h.pipeline).await;
        let job = h.pipeline.start_extraction(document.id).await.unwrap();
        assert_eq!(wait_for(&h.pipeline, job).await.state, JobState::Complete);

        let status = h.pipeline.cancel_extraction(job).await.unwrap();
        assert_eq!(status.state, JobState::Complete);
        let indexed = h.pipeline.document(document.id).await.unwrap();
        assert_eq!(indexed.status, DocumentStatus::Indexed);
        assert_eq!(indexed.status_reason, None);
    }

    #[tokio::test]
    async fn test_indexing_failure_restart_skips_extraction() {
        let flaky = Arc::new(FlakyVectorStore::new(DIM));
        let h = harness_with(|_| {}, flaky.clone());
        let document = register(&h.pipeline).await;
        flaky.fail_deletes(1);

        let job = h.pipeline.start_extraction(document.id).await.unwrap();
        let status = wait_for(&h.pipeline, job).await;
        assert_eq!(status.state, JobState::Failed);
        assert!(status.resumable);
        assert_eq!(h.model.calls(), vec!["1-4", "5-8", "9-12"]);

        let failed = h.pipeline.document(document.id).await.unwrap();
        assert_eq!(failed.status, DocumentStatus::Failed);
        assert!(failed.resumable);
        assert!(failed.status_reason.unwrap().starts_with("indexing failed"));

        h.model.clear_calls();
        let retry = h.pipeline.start_extraction(document.id).await.unwrap();
        assert_eq!(wait_for(&h.pipeline, retry).await.state, JobState::Complete);
        assert!(h.model.calls().is_empty());

        let indexed = h.pipeline.document(document.id).await.unwrap();
        assert_eq!(indexed.status, DocumentStatus::Indexed);
        assert!(h.pipeline.reconcile().await.unwrap().is_consistent());
    }

    #[tokio::test]
    async fn test_cancel_during_indexing_restart_skips_extraction() {
        let h = harness_with(
            |config| config.indexing.settle_delay_ms = 1_500,
            Arc::new(LocalVectorStore::with_dimensions(DIM)),
        );
        let document = register(&h.pipeline).await;

        let job = h.pipeline.start_extraction(document.id).await.unwrap();
        let mut indexing = false;
        for _ in 0..1_000 {
            if h.pipeline.extraction_status(job).unwrap().state == JobState::Indexing {
                indexing = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(indexing, "job never reached indexing");

        let status = h.pipeline.cancel_extraction(job).await.unwrap();
        assert_eq!(status.state, JobState::Cancelled);
        assert!(status.resumable);

        let cancelled = h.pipeline.document(document.id).await.unwrap();
        assert_eq!(cancelled.status, DocumentStatus::Failed);
        assert_eq!(cancelled.status_reason.as_deref(), Some("indexing cancelled"));
        assert!(cancelled.resumable);

        h.model.clear_calls();
        let retry = h.pipeline.start_extraction(document.id).await.unwrap();
        assert_eq!(wait_for(&h.pipeline, retry).await.state, JobState::Complete);
        assert!(h.model.calls().is_empty());

        let text = h
            .pipeline
            .providers
            .document_store
            .get_extracted_text(&document.id)
            .await
            .unwrap();
        assert_eq!(text, Some(expected_text()));
        assert_eq!(
            h.pipeline.document(document.id).await.unwrap().status,
            DocumentStatus::Indexed
        );
    }

    #[tokio::test]
    async fn test_retrieve_binds_citations_for_agent_scope() {
        let h = harness();
        let document = register(&h.pipeline).await;
        let job = h.pipeline.start_extraction(document.id).await.unwrap();
        assert_eq!(wait_for(&h.pipeline, job).await.state, JobState::Complete);

        let request = RetrieveRequest::new("maintenance", "inspect the pump housing and replace worn seals")
            .with_min_similarity(0.2)
            .with_top_k(3);
        let response = h.pipeline.retrieve(&request).await.unwrap();

        assert!(response.grounded);
        assert!(!response.citations.is_empty() && response.citations.len() <= 3);
        let n = response.citations.len();
        assert_eq!(response.valid_citations.map(|r| (r.min, r.max)), Some((1, n)));
        for (i, citation) in response.citations.iter().enumerate() {
            assert_eq!(citation.number, i + 1);
            assert_eq!(citation.filename.as_deref(), Some("pump-manual.pdf"));
        }
        assert!(response.context.starts_with("[1] (pump-manual.pdf"));

        let outsider = h
            .pipeline
            .retrieve(&RetrieveRequest::new("finance", "inspect the pump housing"))
            .await
            .unwrap();
        assert!(!outsider.grounded);
        assert!(outsider.citations.is_empty());
        assert_eq!(outsider.valid_citations, None);
    }

    #[tokio::test]
    async fn test_reindex_is_idempotent() {
        let h = harness();
        let document = register(&h.pipeline).await;

        let not_yet = h.pipeline.reindex(document.id).await;
        assert!(matches!(not_yet, Err(Error::NotExtracted(_))));

        let job = h.pipeline.start_extraction(document.id).await.unwrap();
        wait_for(&h.pipeline, job).await;

        let first = h.pipeline.reindex(document.id).await.unwrap();
        let before = h.pipeline.providers.document_store.list_fragments(&document.id).await.unwrap();
        let second = h.pipeline.reindex(document.id).await.unwrap();
        let after = h.pipeline.providers.document_store.list_fragments(&document.id).await.unwrap();

        assert_eq!(first.kept, second.kept);
        assert_eq!(second.deleted_previous, first.fragments_total);
        assert_eq!(before.len(), after.len());
        for (a, b) in before.iter().zip(&after) {
            assert_eq!((a.start_offset, a.end_offset, &a.text), (b.start_offset, b.end_offset, &b.text));
            assert_ne!(a.id, b.id);
        }
        assert!(h.pipeline.reconcile().await.unwrap().is_consistent());
    }

    #[tokio::test]
    async fn test_assign_agents_changes_scope() {
        let h = harness();
        let document = register(&h.pipeline).await;
        let job = h.pipeline.start_extraction(document.id).await.unwrap();
        wait_for(&h.pipeline, job).await;

        h.pipeline
            .assign_agents(document.id, vec!["operations".to_string()])
            .await
            .unwrap();

        let request = RetrieveRequest::new("operations", "replace worn seals on the pump").with_min_similarity(0.2);
        assert!(h.pipeline.retrieve(&request).await.unwrap().grounded);

        let request = RetrieveRequest::new("maintenance", "replace worn seals on the pump").with_min_similarity(0.2);
        assert!(!h.pipeline.retrieve(&request).await.unwrap().grounded);
    }

    #[tokio::test]
    async fn test_unknown_ids() {
        let h = harness();
        assert!(matches!(
            h.pipeline.start_extraction(Uuid::new_v4()).await,
            Err(Error::DocumentNotFound(_))
        ));
        assert!(matches!(
            h.pipeline.extraction_status(Uuid::new_v4()),
            Err(Error::JobNotFound(_))
        ));
    }
}
