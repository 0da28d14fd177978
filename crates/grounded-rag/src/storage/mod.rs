//! Storage module for persistent data storage
//!
//! Provides SQLite-based persistence for documents, fragments and embeddings.

mod database;

pub use database::{Database, DatabaseStats};
