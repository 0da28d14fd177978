//! Google Cloud Storage blob store
//!
//! Keys map to objects under a fixed prefix in one bucket, so checkpoints
//! and originals survive the loss of the local host.

use async_trait::async_trait;
use std::sync::Arc;

use google_cloud_storage::client::Client as GcsClient;
use google_cloud_storage::http::objects::delete::DeleteObjectRequest;
use google_cloud_storage::http::objects::download::Range;
use google_cloud_storage::http::objects::get::GetObjectRequest;
use google_cloud_storage::http::objects::list::ListObjectsRequest;
use google_cloud_storage::http::objects::upload::{Media, UploadObjectRequest, UploadType};

use super::auth::GcpAuth;
use crate::error::{Error, Result};
use crate::providers::blob_store::BlobStore;

/// Blob store backed by a GCS bucket
pub struct GcsBlobStore {
    auth: Arc<GcpAuth>,
    client: GcsClient,
    bucket: String,
    prefix: String,
}

impl GcsBlobStore {
    /// Create a new GCS blob store
    ///
    /// # Arguments
    /// * `auth` - GCP authentication, used for health checks
    /// * `bucket` - GCS bucket name
    /// * `prefix` - Object prefix (e.g., "grounded-rag/")
    pub async fn new(auth: Arc<GcpAuth>, bucket: String, prefix: String) -> Result<Self> {
        let config = google_cloud_storage::client::ClientConfig::default()
            .with_auth()
            .await
            .map_err(|e| Error::Config(format!("Failed to create GCS client: {}", e)))?;

        let prefix = if prefix.is_empty() || prefix.ends_with('/') {
            prefix
        } else {
            format!("{}/", prefix)
        };

        Ok(Self {
            auth,
            client: GcsClient::new(config),
            bucket,
            prefix,
        })
    }

    fn object_name(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key.trim_start_matches('/'))
    }
}

fn is_not_found(err: &google_cloud_storage::http::Error) -> bool {
    match err {
        google_cloud_storage::http::Error::Response(response) => response.code == 404,
        _ => false,
    }
}

#[async_trait]
impl BlobStore for GcsBlobStore {
    async fn put(&self, key: &str, data: Vec<u8>) -> Result<()> {
        let name = self.object_name(key);
        let mut media = Media::new(name.clone());
        media.content_type = mime_guess::from_path(key)
            .first_or_octet_stream()
            .to_string()
            .into();

        self.client
            .upload_object(
                &UploadObjectRequest {
                    bucket: self.bucket.clone(),
                    ..Default::default()
                },
                data,
                &UploadType::Simple(media),
            )
            .await
            .map_err(|e| Error::storage(format!("Failed to upload gs://{}/{}: {}", self.bucket, name, e)))?;

        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let name = self.object_name(key);
        let request = GetObjectRequest {
            bucket: self.bucket.clone(),
            object: name.clone(),
            ..Default::default()
        };

        match self.client.download_object(&request, &Range::default()).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(Error::storage(format!(
                "Failed to download gs://{}/{}: {}",
                self.bucket, name, e
            ))),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut page_token = None;

        loop {
            let request = ListObjectsRequest {
                bucket: self.bucket.clone(),
                prefix: Some(self.object_name(prefix)),
                page_token: page_token.take(),
                ..Default::default()
            };

            let page = self
                .client
                .list_objects(&request)
                .await
                .map_err(|e| Error::storage(format!("Failed to list GCS objects: {}", e)))?;

            keys.extend(
                page.items
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|item| item.name.strip_prefix(&self.prefix).map(str::to_string)),
            );

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        keys.sort();
        Ok(keys)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let name = self.object_name(key);
        let request = DeleteObjectRequest {
            bucket: self.bucket.clone(),
            object: name.clone(),
            ..Default::default()
        };

        match self.client.delete_object(&request).await {
            Ok(()) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(Error::storage(format!(
                "Failed to delete gs://{}/{}: {}",
                self.bucket, name, e
            ))),
        }
    }

    async fn health_check(&self) -> Result<bool> {
        self.auth.get_token().await?;

        let request = ListObjectsRequest {
            bucket: self.bucket.clone(),
            max_results: Some(1),
            ..Default::default()
        };

        self.client
            .list_objects(&request)
            .await
            .map(|_| true)
            .map_err(|e| Error::storage(format!("GCS health check failed: {}", e)))
    }

    fn name(&self) -> &str {
        "gcs"
    }
}
