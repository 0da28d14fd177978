//! Vector retrieval: analytical index, ranking and the query engine

mod engine;
mod index;
mod ranking;

pub use engine::RetrievalEngine;
pub use index::VectorIndex;
pub use ranking::{cosine_similarity, rank};
