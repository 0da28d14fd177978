//! Google Cloud Platform provider implementations
//!
//! - Google Cloud Storage for originals and checkpoint records
//! - Vertex AI text embeddings

mod auth;
mod gcs_store;
mod vertex_embedder;

pub use auth::GcpAuth;
pub use gcs_store::GcsBlobStore;
pub use vertex_embedder::VertexAiEmbedder;
