//! In-memory registry of extraction jobs and their progress
//!
//! Progress is mirrored from the worker's checkpoint transitions. The
//! checkpoint itself is the durable record; this registry only answers
//! status queries for jobs started by this process.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::task::AbortHandle;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::types::{CheckpointStage, ExtractionCheckpoint};

/// Lifecycle of one job
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Extracting,
    Indexing,
    Complete,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Extracting | Self::Indexing)
    }
}

/// Status of an extraction job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionStatus {
    pub job_id: Uuid,
    pub document_id: Uuid,
    pub state: JobState,
    /// Last checkpoint stage seen, `None` before the plan is known
    pub stage: Option<CheckpointStage>,
    pub progress_percent: f32,
    pub completed_sections: usize,
    pub total_sections: usize,
    pub error: Option<String>,
    /// Whether a new start would resume from a checkpoint
    pub resumable: bool,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ExtractionStatus {
    fn new(job_id: Uuid, document_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            job_id,
            document_id,
            state: JobState::Extracting,
            stage: None,
            progress_percent: 0.0,
            completed_sections: 0,
            total_sections: 0,
            error: None,
            resumable: false,
            started_at: now,
            updated_at: now,
            finished_at: None,
        }
    }
}

/// Jobs by id, with at most one active job per document
#[derive(Default)]
pub struct JobQueue {
    jobs: DashMap<Uuid, ExtractionStatus>,
    active: DashMap<Uuid, Uuid>,
    handles: DashMap<Uuid, AbortHandle>,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// The document's active job, or a newly registered one
    ///
    /// Returns `(job_id, created)`.
    pub fn begin(&self, document_id: Uuid) -> (Uuid, bool) {
        match self.active.entry(document_id) {
            Entry::Occupied(entry) => (*entry.get(), false),
            Entry::Vacant(entry) => {
                let job_id = Uuid::new_v4();
                self.jobs.insert(job_id, ExtractionStatus::new(job_id, document_id));
                entry.insert(job_id);
                (job_id, true)
            }
        }
    }

    /// Remember the task running `job_id` so it can be cancelled
    pub fn attach(&self, job_id: Uuid, handle: AbortHandle) {
        let active = self.jobs.get(&job_id).map_or(false, |s| s.state.is_active());
        if active {
            self.handles.insert(job_id, handle);
        }
    }

    /// Mirror a checkpoint transition
    pub fn record_progress(&self, job_id: Uuid, checkpoint: &ExtractionCheckpoint) {
        if let Some(mut status) = self.jobs.get_mut(&job_id) {
            status.stage = Some(checkpoint.stage);
            status.progress_percent = checkpoint.progress_percentage;
            status.completed_sections = checkpoint.completed_sections;
            status.total_sections = checkpoint.total_sections;
            status.resumable = checkpoint.is_resumable();
            status.updated_at = Utc::now();
        }
    }

    pub fn set_state(&self, job_id: Uuid, state: JobState) {
        if let Some(mut status) = self.jobs.get_mut(&job_id) {
            status.state = state;
            status.updated_at = Utc::now();
        }
    }

    /// Close a job; the document may start a new one afterwards
    pub fn finish(&self, job_id: Uuid, state: JobState, error: Option<String>, resumable: bool) {
        let document_id = match self.jobs.get_mut(&job_id) {
            Some(mut status) => {
                if !status.state.is_active() {
                    return;
                }
                let now = Utc::now();
                status.state = state;
                status.error = error;
                status.resumable = resumable;
                status.updated_at = now;
                status.finished_at = Some(now);
                status.document_id
            }
            None => return,
        };

        self.active.remove_if(&document_id, |_, active| *active == job_id);
        self.handles.remove(&job_id);
    }

    /// Abort a running job; the checkpoint stays at its last section
    pub fn cancel(&self, job_id: Uuid, resumable: bool) -> Result<ExtractionStatus> {
        if !self.jobs.contains_key(&job_id) {
            return Err(Error::JobNotFound(job_id.to_string()));
        }

        if let Some((_, handle)) = self.handles.remove(&job_id) {
            handle.abort();
        }
        self.finish(
            job_id,
            JobState::Cancelled,
            Some("cancelled by caller".to_string()),
            resumable,
        );
        self.status(job_id)
            .ok_or_else(|| Error::JobNotFound(job_id.to_string()))
    }

    pub fn status(&self, job_id: Uuid) -> Option<ExtractionStatus> {
        self.jobs.get(&job_id).map(|s| s.clone())
    }

    pub fn active_job(&self, document_id: &Uuid) -> Option<Uuid> {
        self.active.get(document_id).map(|j| *j)
    }

    /// All jobs, newest first
    pub fn list(&self) -> Vec<ExtractionStatus> {
        let mut jobs: Vec<ExtractionStatus> = self.jobs.iter().map(|s| s.clone()).collect();
        jobs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        jobs
    }
}
