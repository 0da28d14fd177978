//! Resumable extraction of source documents into plain text

pub mod checkpoint;
pub mod splitter;
pub mod validation;
pub mod worker;

pub use checkpoint::CheckpointStore;
pub use splitter::{plan_sections, PagedDocument, PdfDocument, SectionSplitter, SplitPlan, WholeDocument};
pub use validation::QualityReport;
pub use worker::{ExtractionJob, ExtractionOutcome, ExtractionWorker};
