//! Persisted extraction checkpoint

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Stage of the extraction state machine
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStage {
    Analyzing,
    Extracting,
    Combining,
    Complete,
    Failed,
}

/// Inclusive, 1-based page range
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PageRange {
    pub start: u32,
    pub end: u32,
}

impl PageRange {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    pub fn page_count(&self) -> u32 {
        self.end.saturating_sub(self.start) + 1
    }
}

impl fmt::Display for PageRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Output of one extracted section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SectionResult {
    pub index: usize,
    pub page_range: PageRange,
    pub text: String,
    pub token_count: u64,
    /// Estimated cost in USD
    pub cost: f64,
    pub duration_ms: u64,
    /// Heuristic extraction quality, 0-100
    pub quality_score: u8,
}

/// Last failure recorded on a checkpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointError {
    pub message: String,
    pub failed_section: usize,
    pub transient: bool,
    pub timestamp: DateTime<Utc>,
}

/// Durable progress record for one extraction job
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionCheckpoint {
    pub checkpoint_id: Uuid,
    pub source_document_id: Uuid,
    pub owner_id: String,
    pub document_key: String,
    pub stage: CheckpointStage,
    pub total_sections: usize,
    pub completed_sections: usize,
    /// Section results in section order; `len() == completed_sections`
    pub sections: Vec<SectionResult>,
    /// Page ranges of every planned section
    pub plan: Vec<PageRange>,
    pub total_pages: u32,
    pub size_bytes: u64,
    pub model: String,
    pub can_resume: bool,
    pub last_error: Option<CheckpointError>,
    pub progress_percentage: f32,
    pub total_cost_so_far: f64,
    pub total_time_so_far_ms: u64,
    pub resume_from_section: usize,
    pub start_time: DateTime<Utc>,
    pub last_update_time: DateTime<Utc>,
}

impl ExtractionCheckpoint {
    /// Fresh checkpoint in the `analyzing` stage
    pub fn new(
        source_document_id: Uuid,
        owner_id: impl Into<String>,
        document_key: impl Into<String>,
        model: impl Into<String>,
        size_bytes: u64,
    ) -> Self {
        let now = Utc::now();
        Self {
            checkpoint_id: Uuid::new_v4(),
            source_document_id,
            owner_id: owner_id.into(),
            document_key: document_key.into(),
            stage: CheckpointStage::Analyzing,
            total_sections: 0,
            completed_sections: 0,
            sections: Vec::new(),
            plan: Vec::new(),
            total_pages: 0,
            size_bytes,
            model: model.into(),
            can_resume: true,
            last_error: None,
            progress_percentage: 0.0,
            total_cost_so_far: 0.0,
            total_time_so_far_ms: 0,
            resume_from_section: 0,
            start_time: now,
            last_update_time: now,
        }
    }

    /// Install the split plan and enter `extracting`
    pub fn begin_extracting(&mut self, plan: Vec<PageRange>, total_pages: u32) {
        self.total_sections = plan.len();
        self.plan = plan;
        self.total_pages = total_pages;
        self.stage = CheckpointStage::Extracting;
        self.touch();
    }

    /// Append the next section in order
    pub fn record_section(&mut self, result: SectionResult) {
        debug_assert_eq!(result.index, self.sections.len());
        self.total_cost_so_far += result.cost;
        self.total_time_so_far_ms += result.duration_ms;
        self.sections.push(result);
        self.completed_sections = self.sections.len();
        self.resume_from_section = self.completed_sections;
        self.last_error = None;
        self.touch();
    }

    pub fn record_failure(&mut self, message: impl Into<String>, failed_section: usize, transient: bool) {
        self.stage = CheckpointStage::Failed;
        self.can_resume = true;
        self.last_error = Some(CheckpointError {
            message: message.into(),
            failed_section,
            transient,
            timestamp: Utc::now(),
        });
        self.resume_from_section = self.completed_sections;
        self.touch();
    }

    pub fn set_stage(&mut self, stage: CheckpointStage) {
        self.stage = stage;
        self.touch();
    }

    /// A checkpoint the worker must continue instead of restarting
    pub fn is_resumable(&self) -> bool {
        self.can_resume && self.stage != CheckpointStage::Complete
    }

    /// Whether the stored plan still describes the document
    pub fn plan_matches(&self, plan: &[PageRange], total_pages: u32, size_bytes: u64) -> bool {
        self.plan == plan && self.total_pages == total_pages && self.size_bytes == size_bytes
    }

    /// Resume summary; a resume skips the time and cost already spent
    pub fn info(&self) -> CheckpointInfo {
        CheckpointInfo {
            exists: true,
            resumable: self.is_resumable(),
            stage: Some(self.stage),
            progress: self.progress_percentage,
            completed_sections: self.completed_sections,
            total_sections: self.total_sections,
            time_saved_secs: self.total_time_so_far_ms as f64 / 1000.0,
            cost_saved: self.total_cost_so_far,
        }
    }

    fn touch(&mut self) {
        self.progress_percentage = if self.total_sections == 0 {
            0.0
        } else {
            self.completed_sections as f32 / self.total_sections as f32 * 100.0
        };
        self.last_update_time = Utc::now();
    }
}

/// What a resume would skip
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckpointInfo {
    pub exists: bool,
    pub resumable: bool,
    pub stage: Option<CheckpointStage>,
    pub progress: f32,
    pub completed_sections: usize,
    pub total_sections: usize,
    pub time_saved_secs: f64,
    pub cost_saved: f64,
}

impl CheckpointInfo {
    pub fn missing() -> Self {
        Self {
            exists: false,
            resumable: false,
            stage: None,
            progress: 0.0,
            completed_sections: 0,
            total_sections: 0,
            time_saved_secs: 0.0,
            cost_saved: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn section(index: usize, text: &str) -> SectionResult {
        SectionResult {
            index,
            page_range: PageRange::new(index as u32 * 10 + 1, index as u32 * 10 + 10),
            text: text.to_string(),
            token_count: 100,
            cost: 0.01,
            duration_ms: 1500,
            quality_score: 90,
        }
    }

    #[test]
    fn test_record_section_keeps_counts_in_sync() {
        let mut cp = ExtractionCheckpoint::new(Uuid::new_v4(), "u", "k", "m", 1000);
        cp.begin_extracting(
            vec![PageRange::new(1, 10), PageRange::new(11, 20), PageRange::new(21, 25)],
            25,
        );
        cp.record_section(section(0, "a"));
        cp.record_section(section(1, "b"));

        assert_eq!(cp.completed_sections, cp.sections.len());
        assert_eq!(cp.resume_from_section, 2);
        assert!((cp.progress_percentage - 66.666_67).abs() < 0.01);
        assert!(cp.is_resumable());

        let info = cp.info();
        assert_eq!(info.completed_sections, 2);
        assert!((info.time_saved_secs - 3.0).abs() < 1e-9);
        assert!((info.cost_saved - 0.02).abs() < 1e-9);
    }

    #[test]
    fn test_complete_is_not_resumable() {
        let mut cp = ExtractionCheckpoint::new(Uuid::new_v4(), "u", "k", "m", 10);
        cp.begin_extracting(vec![PageRange::new(1, 1)], 1);
        cp.record_section(section(0, "only"));
        cp.set_stage(CheckpointStage::Complete);
        assert!(!cp.is_resumable());
    }

    #[test]
    fn test_page_range_display() {
        assert_eq!(PageRange::new(1, 108).to_string(), "1-108");
        assert_eq!(PageRange::new(7, 7).page_count(), 1);
    }
}
