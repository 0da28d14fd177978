//! Provider abstractions for extraction, embeddings and storage
//!
//! Trait-based seams so the pipeline runs against local backends
//! (SQLite, filesystem, Ollama) or hosted ones (Gemini, GCP).

pub mod blob_store;
pub mod document_store;
pub mod embedding;
pub mod extraction;
pub mod gemini;
pub mod local;
pub mod ollama;
pub mod vector_store;

#[cfg(feature = "gcp")]
pub mod gcp;

pub use blob_store::BlobStore;
pub use document_store::DocumentStoreProvider;
pub use embedding::EmbeddingProvider;
pub use extraction::{ExtractionModel, ExtractionOutput};
pub use vector_store::{VectorSearchHit, VectorStoreProvider};
