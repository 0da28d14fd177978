//! Background extraction jobs and the pipeline that runs them

mod job_queue;
mod pipeline;

pub use job_queue::{ExtractionStatus, JobQueue, JobState};
pub use pipeline::{
    open_document, DocumentOpener, HealthReport, Pipeline, PipelineProviders,
};
