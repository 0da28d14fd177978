//! Chunking of extracted text and garbage filtering

pub mod chunker;
pub mod filter;

pub use chunker::{count_tokens, TextChunker};
pub use filter::{FilterStats, GarbageFilter, GarbageRule};
