//! Object storage trait for originals and checkpoint records

use async_trait::async_trait;
use crate::error::Result;

/// Trait for keyed blob storage
///
/// Keys are `/`-separated paths such as
/// `extraction-checkpoints/{owner}/{document}/{timestamp}.json`.
///
/// Implementations:
/// - `LocalBlobStore`: Local filesystem
/// - `GcsBlobStore`: Google Cloud Storage (`gcp` feature)
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Write a blob, replacing any existing one
    async fn put(&self, key: &str, data: Vec<u8>) -> Result<()>;

    /// Read a blob
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Keys starting with `prefix`
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Delete a blob (missing keys are not an error)
    async fn delete(&self, key: &str) -> Result<()>;

    /// Check if the provider is healthy
    async fn health_check(&self) -> Result<bool>;

    /// Get provider name for logging
    fn name(&self) -> &str;
}
