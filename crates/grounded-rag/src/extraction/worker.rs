//! Section-by-section extraction with checkpointed resume
//!
//! Stages run `analyzing -> extracting -> combining -> complete`, or stop in
//! `failed` with the checkpoint left at the last completed section. Sections
//! are strictly sequential so the completed work is always a prefix of the
//! plan and a resume point is never ambiguous.

use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::config::ExtractionConfig;
use crate::error::{Error, Result};
use crate::providers::{ExtractionModel, ExtractionOutput};
use crate::types::{CheckpointStage, ExtractionCheckpoint, PageRange, SectionResult};

use super::checkpoint::CheckpointStore;
use super::splitter::{
    section_cost, PagedDocument, SectionSplitter, SplitPlan, EST_INPUT_TOKENS_PER_SECTION,
};
use super::validation;

/// Rough characters-per-token ratio when the model reports no usage
const CHARS_PER_TOKEN: u64 = 4;

/// Instructions sent with every section
pub fn section_prompt(range: PageRange, total_pages: u32, split: bool) -> String {
    let scope = if split {
        format!(
            "This file contains pages {} of a {}-page document.",
            range, total_pages
        )
    } else {
        "This file is the complete document.".to_string()
    };

    format!(
        "{scope}\n\n\
         Extract ALL text from this file, in reading order.\n\
         - Keep every heading and section title.\n\
         - Render tables as markdown tables.\n\
         - Keep lists, numbering and footnotes.\n\
         DO NOT summarize, paraphrase or skip content. \
         Return only the extracted text, with no commentary."
    )
}

/// Separator placed before every section after the first
pub fn section_marker(section_number: usize, range: PageRange) -> String {
    format!(
        "\n\n--- Section {}: Pages {}-{} ---\n\n",
        section_number, range.start, range.end
    )
}

/// Concatenate section texts in order with page-range markers
pub fn combine_sections(sections: &[SectionResult]) -> String {
    let mut combined = String::with_capacity(sections.iter().map(|s| s.text.len() + 48).sum());
    for (i, section) in sections.iter().enumerate() {
        if i > 0 {
            combined.push_str(&section_marker(i + 1, section.page_range));
        }
        combined.push_str(&section.text);
    }
    combined
}

/// Identity of the document being extracted
#[derive(Debug, Clone)]
pub struct ExtractionJob {
    pub document_id: Uuid,
    pub owner_id: String,
    pub document_key: String,
    pub mime_type: String,
}

/// Result of a completed run
#[derive(Debug, Clone)]
pub struct ExtractionOutcome {
    pub text: String,
    pub checkpoint: ExtractionCheckpoint,
    /// Sections taken from an earlier run's checkpoint
    pub resumed_sections: usize,
    /// Whether the final checkpoint write succeeded
    pub checkpoint_saved: bool,
}

/// Drives one document through the extraction state machine
pub struct ExtractionWorker {
    model: Arc<dyn ExtractionModel>,
    checkpoints: Arc<CheckpointStore>,
    splitter: SectionSplitter,
    config: ExtractionConfig,
    call_timeout: Duration,
}

impl ExtractionWorker {
    pub fn new(
        model: Arc<dyn ExtractionModel>,
        checkpoints: Arc<CheckpointStore>,
        config: &ExtractionConfig,
    ) -> Self {
        Self {
            model,
            checkpoints,
            splitter: SectionSplitter::new(config),
            call_timeout: config.call_timeout(),
            config: config.clone(),
        }
    }

    /// Override the per-call deadline
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn checkpoints(&self) -> &Arc<CheckpointStore> {
        &self.checkpoints
    }

    /// Extract a document, resuming from its latest checkpoint if possible
    ///
    /// `on_progress` sees the checkpoint after every transition. On error the
    /// checkpoint (when it could be written) records the failed section.
    pub async fn run<F>(
        &self,
        job: &ExtractionJob,
        document: &dyn PagedDocument,
        on_progress: F,
    ) -> Result<ExtractionOutcome>
    where
        F: Fn(&ExtractionCheckpoint) + Send + Sync,
    {
        let plan = self.splitter.plan(document)?;
        tracing::info!(
            "Extraction plan for {}: {} section(s) over {} pages, est. ${:.4} with {}",
            job.document_id,
            plan.sections.len(),
            plan.total_pages,
            plan.estimated_cost(self.model.model()),
            self.model.model()
        );

        let mut checkpoint = self.starting_checkpoint(job, document, &plan).await;
        let resumed_sections = checkpoint.completed_sections;

        if checkpoint.stage == CheckpointStage::Complete {
            tracing::info!(
                "Reusing completed checkpoint for {} ({} sections)",
                job.document_id,
                checkpoint.total_sections
            );
            on_progress(&checkpoint);
            return Ok(ExtractionOutcome {
                text: combine_sections(&checkpoint.sections),
                checkpoint,
                resumed_sections,
                checkpoint_saved: true,
            });
        }

        checkpoint.set_stage(CheckpointStage::Extracting);
        checkpoint.can_resume = true;
        self.persist(&checkpoint).await;
        on_progress(&checkpoint);

        for index in checkpoint.completed_sections..checkpoint.total_sections {
            let range = checkpoint.plan[index];
            match self.extract_section(job, document, &plan, index, range).await {
                Ok(section) => {
                    checkpoint.record_section(section);
                    self.persist(&checkpoint).await;
                    on_progress(&checkpoint);
                }
                Err(e) => {
                    tracing::error!(
                        "Section {}/{} (pages {}) of {} failed: {}",
                        index + 1,
                        checkpoint.total_sections,
                        range,
                        job.document_id,
                        e
                    );
                    checkpoint.record_failure(e.to_string(), index, e.is_transient());
                    self.persist(&checkpoint).await;
                    on_progress(&checkpoint);
                    return Err(e);
                }
            }
        }

        checkpoint.set_stage(CheckpointStage::Combining);
        self.persist(&checkpoint).await;
        on_progress(&checkpoint);
        let text = combine_sections(&checkpoint.sections);

        checkpoint.set_stage(CheckpointStage::Complete);
        let checkpoint_saved = self.persist(&checkpoint).await;
        on_progress(&checkpoint);

        tracing::info!(
            "Extracted {} ({} sections, {} resumed, {} chars, ${:.4}, {:.1}s)",
            job.document_id,
            checkpoint.total_sections,
            resumed_sections,
            text.len(),
            checkpoint.total_cost_so_far,
            checkpoint.total_time_so_far_ms as f64 / 1000.0
        );

        Ok(ExtractionOutcome {
            text,
            checkpoint,
            resumed_sections,
            checkpoint_saved,
        })
    }

    /// Resume from the latest checkpoint when it still matches the plan
    async fn starting_checkpoint(
        &self,
        job: &ExtractionJob,
        document: &dyn PagedDocument,
        plan: &SplitPlan,
    ) -> ExtractionCheckpoint {
        let existing = match self.checkpoints.load_latest(&job.owner_id, &job.document_key).await {
            Ok(existing) => existing,
            Err(e) => {
                tracing::warn!("Could not read checkpoints for {}: {}", job.document_id, e);
                None
            }
        };

        if let Some(checkpoint) = existing {
            let matches = checkpoint.plan_matches(&plan.sections, plan.total_pages, document.size_bytes());
            if matches && checkpoint.stage == CheckpointStage::Complete {
                return checkpoint;
            }
            if matches && checkpoint.is_resumable() {
                tracing::info!(
                    "Resuming {} at section {}/{} ({:.0}% done)",
                    job.document_id,
                    checkpoint.completed_sections + 1,
                    checkpoint.total_sections,
                    checkpoint.progress_percentage
                );
                return checkpoint;
            }
            tracing::warn!(
                "Checkpoint {} for {} no longer matches the document, restarting",
                checkpoint.checkpoint_id,
                job.document_id
            );
        }

        let mut checkpoint = ExtractionCheckpoint::new(
            job.document_id,
            job.owner_id.clone(),
            job.document_key.clone(),
            self.model.model(),
            document.size_bytes(),
        );
        self.persist(&checkpoint).await;
        checkpoint.begin_extracting(plan.sections.clone(), plan.total_pages);
        checkpoint
    }

    async fn extract_section(
        &self,
        job: &ExtractionJob,
        document: &dyn PagedDocument,
        plan: &SplitPlan,
        index: usize,
        range: PageRange,
    ) -> Result<SectionResult> {
        let started = Instant::now();
        let payload = document
            .extract_pages(range)
            .map_err(|e| Error::permanent(format!("Cannot build section {}: {}", range, e)))?;

        let payload_limit = self.config.inline_limit_bytes();
        if payload.len() as u64 > payload_limit {
            return Err(Error::permanent(format!(
                "Section {} is {} bytes, above the {} byte inline limit",
                range,
                payload.len(),
                payload_limit
            )));
        }

        let prompt = section_prompt(range, plan.total_pages, plan.split);
        let output = self.call_with_retry(&payload, &job.mime_type, &prompt, index).await?;

        if output.truncated {
            tracing::warn!(
                "Section {} of {} hit the {} token output ceiling; text may be incomplete",
                range,
                job.document_id,
                self.config.max_output_tokens
            );
        }

        let report = validation::assess(&output.text, range.page_count());
        if !report.passes(self.config.quality_pass_threshold) {
            tracing::warn!(
                "Low extraction quality for {} pages {}: score {} ({})",
                job.document_id,
                range,
                report.score,
                report.issues.join("; ")
            );
        }

        let output_tokens = output
            .output_tokens
            .unwrap_or(output.text.len() as u64 / CHARS_PER_TOKEN);
        let input_tokens = output.input_tokens.unwrap_or(EST_INPUT_TOKENS_PER_SECTION);

        Ok(SectionResult {
            index,
            page_range: range,
            token_count: output_tokens,
            cost: section_cost(self.model.model(), input_tokens, output_tokens),
            duration_ms: started.elapsed().as_millis() as u64,
            quality_score: report.score,
            text: output.text,
        })
    }

    /// One call plus up to `max_retries` retries on transient failures
    async fn call_with_retry(
        &self,
        payload: &[u8],
        mime_type: &str,
        prompt: &str,
        index: usize,
    ) -> Result<ExtractionOutput> {
        let mut attempt = 0;
        loop {
            let call = self
                .model
                .extract(payload, mime_type, prompt, self.config.max_output_tokens);

            let result = match tokio::time::timeout(self.call_timeout, call).await {
                Ok(result) => result,
                Err(_) => Err(Error::transient(format!(
                    "extraction call timed out after {:?}",
                    self.call_timeout
                ))),
            };

            match result {
                Ok(output) => return Ok(output),
                Err(e) if e.is_transient() && attempt < self.config.max_retries => {
                    let delay = self.config.retry_delay(attempt);
                    tracing::warn!(
                        "Section {} attempt {}/{} failed ({}), retrying in {:?}",
                        index + 1,
                        attempt + 1,
                        self.config.max_retries + 1,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Checkpoint writes are best effort
    async fn persist(&self, checkpoint: &ExtractionCheckpoint) -> bool {
        match self.checkpoints.save(checkpoint).await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(
                    "Checkpoint write failed for {} at {}/{} sections, a later failure will not resume from here: {}",
                    checkpoint.source_document_id,
                    checkpoint.completed_sections,
                    checkpoint.total_sections,
                    e
                );
                false
            }
        }
    }
}
