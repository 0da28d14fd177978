//! Embedding and dual-write indexing of extracted text

pub mod indexer;

pub use indexer::{EmbeddingIndexer, IndexReport, ReconcileReport};
