//! Append-only checkpoint persistence on a blob store
//!
//! Every save writes a new record at
//! `{prefix}/{owner}/{document_key}/{micros}.json`; readers take the newest
//! record that parses. A writer that dies mid-save therefore never damages
//! the record a resume would use.

use chrono::{Duration as ChronoDuration, Utc};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::providers::BlobStore;
use crate::types::document::sanitize_key;
use crate::types::{CheckpointInfo, ExtractionCheckpoint};

/// Durable store of extraction checkpoints
pub struct CheckpointStore {
    blobs: Arc<dyn BlobStore>,
    prefix: String,
    /// Last timestamp handed out, so records of one process never collide
    last_stamp: AtomicI64,
}

impl CheckpointStore {
    pub fn new(blobs: Arc<dyn BlobStore>, prefix: impl Into<String>) -> Self {
        Self {
            blobs,
            prefix: prefix.into().trim_matches('/').to_string(),
            last_stamp: AtomicI64::new(0),
        }
    }

    fn job_prefix(&self, owner_id: &str, document_key: &str) -> String {
        format!(
            "{}/{}/{}/",
            self.prefix,
            sanitize_key(owner_id),
            sanitize_key(document_key)
        )
    }

    /// Strictly increasing microsecond timestamp
    fn next_stamp(&self) -> i64 {
        let now = Utc::now().timestamp_micros();
        let mut last = self.last_stamp.load(Ordering::Relaxed);
        loop {
            let next = now.max(last + 1);
            match self
                .last_stamp
                .compare_exchange_weak(last, next, Ordering::SeqCst, Ordering::Relaxed)
            {
                Ok(_) => return next,
                Err(current) => last = current,
            }
        }
    }

    /// Write a new record for the checkpoint's job
    pub async fn save(&self, checkpoint: &ExtractionCheckpoint) -> Result<String> {
        let key = format!(
            "{}{:020}.json",
            self.job_prefix(&checkpoint.owner_id, &checkpoint.document_key),
            self.next_stamp()
        );
        let data = serde_json::to_vec(checkpoint)?;

        self.blobs
            .put(&key, data)
            .await
            .map_err(|e| Error::Checkpoint(format!("Failed to write {}: {}", key, e)))?;

        tracing::debug!(
            "Checkpoint saved: {} ({}/{} sections, stage {:?})",
            key,
            checkpoint.completed_sections,
            checkpoint.total_sections,
            checkpoint.stage
        );
        Ok(key)
    }

    /// Newest readable checkpoint for a job
    pub async fn load_latest(
        &self,
        owner_id: &str,
        document_key: &str,
    ) -> Result<Option<ExtractionCheckpoint>> {
        let mut keys = self.records(&self.job_prefix(owner_id, document_key)).await?;
        keys.sort_by(|a, b| b.1.cmp(&a.1));

        for (key, _) in keys {
            let Some(data) = self.blobs.get(&key).await? else {
                continue;
            };
            match serde_json::from_slice::<ExtractionCheckpoint>(&data) {
                Ok(checkpoint) => return Ok(Some(checkpoint)),
                Err(e) => tracing::warn!("Skipping unreadable checkpoint {}: {}", key, e),
            }
        }

        Ok(None)
    }

    /// Remove every record of a job
    pub async fn delete(&self, owner_id: &str, document_key: &str) -> Result<usize> {
        let keys = self.records(&self.job_prefix(owner_id, document_key)).await?;
        for (key, _) in &keys {
            self.blobs.delete(key).await?;
        }
        Ok(keys.len())
    }

    /// Delete records older than `max_age_days`
    pub async fn sweep_expired(&self, max_age_days: i64) -> Result<usize> {
        let cutoff = (Utc::now() - ChronoDuration::days(max_age_days)).timestamp_micros();
        let mut removed = 0;

        for (key, stamp) in self.records(&format!("{}/", self.prefix)).await? {
            if stamp < cutoff {
                match self.blobs.delete(&key).await {
                    Ok(()) => removed += 1,
                    Err(e) => tracing::warn!("Failed to delete expired checkpoint {}: {}", key, e),
                }
            }
        }

        if removed > 0 {
            tracing::info!("Swept {} expired checkpoint records", removed);
        }
        Ok(removed)
    }

    /// What a resume of this job would skip
    pub async fn info(&self, owner_id: &str, document_key: &str) -> Result<CheckpointInfo> {
        Ok(self
            .load_latest(owner_id, document_key)
            .await?
            .map(|cp| cp.info())
            .unwrap_or_else(CheckpointInfo::missing))
    }

    /// Record keys under `prefix` with their timestamps
    async fn records(&self, prefix: &str) -> Result<Vec<(String, i64)>> {
        Ok(self
            .blobs
            .list(prefix)
            .await?
            .into_iter()
            .filter_map(|key| {
                let stamp = key
                    .rsplit('/')
                    .next()?
                    .strip_suffix(".json")?
                    .parse::<i64>()
                    .ok()?;
                Some((key, stamp))
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::local::LocalBlobStore;
    use crate::types::{CheckpointStage, PageRange};
    use uuid::Uuid;

    fn store(dir: &tempfile::TempDir) -> CheckpointStore {
        let blobs = LocalBlobStore::new(dir.path().to_path_buf()).unwrap();
        CheckpointStore::new(Arc::new(blobs), "extraction-checkpoints")
    }

    #[tokio::test]
    async fn test_load_latest_returns_newest_save() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = store(&dir);

        let mut cp = ExtractionCheckpoint::new(Uuid::new_v4(), "owner-1", "doc-a", "m", 100);
        store.save(&cp).await.unwrap();
        cp.begin_extracting(vec![PageRange::new(1, 4), PageRange::new(5, 8)], 8);
        store.save(&cp).await.unwrap();

        let loaded = store.load_latest("owner-1", "doc-a").await.unwrap().unwrap();
        assert_eq!(loaded.stage, CheckpointStage::Extracting);
        assert_eq!(loaded.total_sections, 2);

        assert!(store.load_latest("owner-1", "doc-b").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unreadable_newest_record_falls_back() {
        let dir = tempfile::TempDir::new().unwrap();
        let blobs = Arc::new(LocalBlobStore::new(dir.path().to_path_buf()).unwrap());
        let store = CheckpointStore::new(blobs.clone(), "cp");

        let cp = ExtractionCheckpoint::new(Uuid::new_v4(), "o", "d", "m", 1);
        store.save(&cp).await.unwrap();
        blobs
            .put("cp/o/d/99999999999999999999.json", b"{ truncated".to_vec())
            .await
            .unwrap();

        let loaded = store.load_latest("o", "d").await.unwrap().unwrap();
        assert_eq!(loaded.checkpoint_id, cp.checkpoint_id);
    }

    #[tokio::test]
    async fn test_delete_and_info() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = store(&dir);

        let cp = ExtractionCheckpoint::new(Uuid::new_v4(), "o", "d", "m", 1);
        store.save(&cp).await.unwrap();
        store.save(&cp).await.unwrap();

        assert!(store.info("o", "d").await.unwrap().exists);
        assert_eq!(store.delete("o", "d").await.unwrap(), 2);
        assert_eq!(store.info("o", "d").await.unwrap(), CheckpointInfo::missing());
    }

    #[tokio::test]
    async fn test_sweep_keeps_recent_records() {
        let dir = tempfile::TempDir::new().unwrap();
        let blobs = Arc::new(LocalBlobStore::new(dir.path().to_path_buf()).unwrap());
        let store = CheckpointStore::new(blobs.clone(), "cp");

        let cp = ExtractionCheckpoint::new(Uuid::new_v4(), "o", "d", "m", 1);
        store.save(&cp).await.unwrap();
        let old_stamp = (Utc::now() - ChronoDuration::days(30)).timestamp_micros();
        blobs
            .put(&format!("cp/o/d/{:020}.json", old_stamp), b"{}".to_vec())
            .await
            .unwrap();

        assert_eq!(store.sweep_expired(7).await.unwrap(), 1);
        assert!(store.load_latest("o", "d").await.unwrap().is_some());
    }
}
