//! Engram Cloud Storage - one adapter over the `object_store` crate
//! covering S3, GCS, Azure Blob and Cloudflare R2 (S3-compatible).
//!
//! Provider differences the engine cares about are the batch concurrency
//! cap (rate limits) and bulk-delete coalescing; everything else is the
//! uniform `ObjectStore` surface.

use async_trait::async_trait;
use bytes::Bytes;
use engram_storage::{Result, StorageAdapter, StorageError};
use futures::stream::{self, StreamExt, TryStreamExt};
use object_store::aws::AmazonS3Builder;
use object_store::azure::MicrosoftAzureBuilder;
use object_store::gcp::GoogleCloudStorageBuilder;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;
use std::sync::Arc;
use tracing::debug;

/// Which provider an [`ObjectStoreAdapter`] talks to. Determines the
/// declared batch parallelism cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloudProvider {
    S3,
    Gcs,
    Azure,
    R2,
}

impl CloudProvider {
    /// Batch fan-out cap matched to provider rate limits.
    pub fn concurrency_cap(&self) -> usize {
        match self {
            Self::S3 | Self::R2 => 150,
            Self::Gcs | Self::Azure => 100,
        }
    }

    fn adapter_name(&self) -> &'static str {
        match self {
            Self::S3 => "s3",
            Self::Gcs => "gcs",
            Self::Azure => "azure",
            Self::R2 => "r2",
        }
    }
}

pub struct ObjectStoreAdapter {
    store: Arc<dyn ObjectStore>,
    provider: CloudProvider,
}

impl ObjectStoreAdapter {
    /// Wrap an already-configured store. Useful for tests (an in-memory
    /// `object_store` implementation) and exotic deployments.
    pub fn new(store: Arc<dyn ObjectStore>, provider: CloudProvider) -> Self {
        Self { store, provider }
    }

    /// S3 bucket; credentials and region from the environment.
    pub fn s3(bucket: &str) -> Result<Self> {
        let store = AmazonS3Builder::from_env()
            .with_bucket_name(bucket)
            .build()
            .map_err(|e| StorageError::Permanent(format!("s3 config: {e}")))?;
        Ok(Self::new(Arc::new(store), CloudProvider::S3))
    }

    /// Cloudflare R2: S3-compatible endpoint per account.
    pub fn r2(account_id: &str, bucket: &str) -> Result<Self> {
        let store = AmazonS3Builder::from_env()
            .with_bucket_name(bucket)
            .with_endpoint(format!("https://{account_id}.r2.cloudflarestorage.com"))
            .with_region("auto")
            .build()
            .map_err(|e| StorageError::Permanent(format!("r2 config: {e}")))?;
        Ok(Self::new(Arc::new(store), CloudProvider::R2))
    }

    /// GCS bucket; service-account credentials from the environment.
    pub fn gcs(bucket: &str) -> Result<Self> {
        let store = GoogleCloudStorageBuilder::from_env()
            .with_bucket_name(bucket)
            .build()
            .map_err(|e| StorageError::Permanent(format!("gcs config: {e}")))?;
        Ok(Self::new(Arc::new(store), CloudProvider::Gcs))
    }

    /// Azure Blob container; account credentials from the environment.
    pub fn azure(container: &str) -> Result<Self> {
        let store = MicrosoftAzureBuilder::from_env()
            .with_container_name(container)
            .build()
            .map_err(|e| StorageError::Permanent(format!("azure config: {e}")))?;
        Ok(Self::new(Arc::new(store), CloudProvider::Azure))
    }

    fn object_path(&self, key: &str) -> Result<ObjectPath> {
        ObjectPath::parse(key)
            .map_err(|e| StorageError::Permanent(format!("invalid storage key {key:?}: {e}")))
    }
}

fn classify(context: &str, e: object_store::Error) -> StorageError {
    use object_store::Error;
    match e {
        Error::NotImplemented
        | Error::NotSupported { .. }
        | Error::PermissionDenied { .. }
        | Error::Unauthenticated { .. }
        | Error::InvalidPath { .. }
        | Error::UnknownConfigurationKey { .. } => {
            StorageError::Permanent(format!("{context}: {e}"))
        }
        // Timeouts, 5xx and connection faults surface as Generic; retried
        // by the transaction layer.
        other => StorageError::Transient(format!("{context}: {other}")),
    }
}

#[async_trait]
impl StorageAdapter for ObjectStoreAdapter {
    fn name(&self) -> &'static str {
        self.provider.adapter_name()
    }

    fn max_concurrency(&self) -> Option<usize> {
        Some(self.provider.concurrency_cap())
    }

    async fn read(&self, path: &str) -> Result<Option<Bytes>> {
        let location = self.object_path(path)?;
        match self.store.get(&location).await {
            Ok(result) => {
                let data = result.bytes().await.map_err(|e| classify("read body", e))?;
                Ok(Some(data))
            }
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(classify("read", e)),
        }
    }

    async fn write(&self, path: &str, data: Bytes) -> Result<()> {
        let location = self.object_path(path)?;
        self.store
            .put(&location, data.into())
            .await
            .map_err(|e| classify("write", e))?;
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let location = self.object_path(path)?;
        match self.store.delete(&location).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(classify("delete", e)),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let location = self.object_path(prefix.trim_end_matches('/'))?;
        let metas: Vec<_> = self
            .store
            .list(Some(&location))
            .try_collect()
            .await
            .map_err(|e| classify("list", e))?;
        Ok(metas.into_iter().map(|meta| meta.location.to_string()).collect())
    }

    /// Coalesce into the provider's bulk-delete call.
    async fn delete_batch(&self, paths: &[String]) -> Result<()> {
        let locations: Vec<_> = paths
            .iter()
            .map(|p| self.object_path(p))
            .collect::<Result<Vec<_>>>()?;
        debug!(count = locations.len(), provider = self.name(), "bulk delete");
        let results: Vec<_> = self
            .store
            .delete_stream(stream::iter(locations.into_iter().map(Ok::<_, object_store::Error>)).boxed())
            .collect()
            .await;
        for result in results {
            match result {
                Ok(_) | Err(object_store::Error::NotFound { .. }) => {}
                Err(e) => return Err(classify("bulk delete", e)),
            }
        }
        Ok(())
    }
}
