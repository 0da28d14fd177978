//! grounded-rag: resumable document extraction and citation-bounded retrieval
//!
//! Large documents are split into page-range sections, extracted one section
//! at a time with a durable checkpoint after each, then chunked, filtered and
//! embedded into a primary and an analytical store. Retrieval is scoped to an
//! agent's documents and returns fragments with citation numbers bound so a
//! generator can only cite what was actually retrieved.

pub mod chunking;
pub mod config;
pub mod error;
pub mod extraction;
pub mod generation;
pub mod indexing;
pub mod processing;
pub mod providers;
pub mod retrieval;
pub mod server;
pub mod storage;
pub mod types;

#[cfg(test)]
mod testing;

pub use config::RagConfig;
pub use error::{Error, Result};
pub use generation::ReferenceBinder;
pub use processing::{ExtractionStatus, Pipeline, PipelineProviders};
pub use types::{
    Citation, ExtractionCheckpoint, RetrievalResult, RetrieveRequest, RetrieveResponse,
    SourceDocument, TextFragment,
};
