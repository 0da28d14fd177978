//! Core types for the extraction and retrieval pipeline

pub mod checkpoint;
pub mod document;
pub mod query;
pub mod response;

pub use checkpoint::{
    CheckpointError, CheckpointInfo, CheckpointStage, ExtractionCheckpoint, PageRange,
    SectionResult,
};
pub use document::{
    DiscardReason, DocumentStatus, EmbeddingRecord, QualityFlag, SourceDocument, TextFragment,
};
pub use query::RetrieveRequest;
pub use response::{Citation, CitationRange, RetrievalResult, RetrieveResponse, RetrievedFragment};
