//! Engram Storage - Key-to-blob persistence abstraction.
//!
//! Every adapter presents the same path semantics; the sharded path scheme
//! in `engram-core` keeps key prefixes load-balanced, so adapters never
//! need to understand what a blob contains.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use thiserror::Error;

mod fs;
mod memory;
mod retry;

pub use fs::FsAdapter;
pub use memory::MemoryAdapter;
pub use retry::with_retries;

/// Storage fault classification. NotFound is deliberately *not* an error:
/// reads return `Ok(None)` so callers can distinguish absence from failure.
#[derive(Debug, Error)]
pub enum StorageError {
    /// I/O timeouts, 5xx responses, interrupted syscalls. Retried at the
    /// transaction layer with bounded exponential backoff.
    #[error("transient storage fault: {0}")]
    Transient(String),

    /// Permission denied, misconfigured buckets, unsupported operations.
    #[error("permanent storage fault: {0}")]
    Permanent(String),

    /// Disk full or provider quota exhausted. The caller may free space
    /// and retry.
    #[error("storage capacity exhausted: {0}")]
    Capacity(String),

    /// The operation's deadline elapsed or it was externally cancelled.
    #[error("storage operation cancelled: {0}")]
    Cancelled(String),
}

impl StorageError {
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Blob lifecycle tier for adapters that support tiering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageTier {
    Hot,
    Cool,
    Archive,
}

/// A lifecycle rule: blobs under `prefix` move to `tier` after `after_days`.
#[derive(Debug, Clone)]
pub struct LifecycleRule {
    pub prefix: String,
    pub tier: StorageTier,
    pub after_days: u32,
}

/// Core storage adapter trait
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Adapter name for logs and error messages.
    fn name(&self) -> &'static str;

    /// Declared parallelism cap for batch fan-out. `None` means unbounded
    /// (in-memory); cloud adapters declare their provider rate-limit caps.
    fn max_concurrency(&self) -> Option<usize>;

    async fn read(&self, path: &str) -> Result<Option<Bytes>>;

    async fn write(&self, path: &str, data: Bytes) -> Result<()>;

    /// Idempotent: deleting a missing path succeeds.
    async fn delete(&self, path: &str) -> Result<()>;

    /// All keys under `prefix`. Ordering is not guaranteed.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Batch read with bounded-parallel fan-out. Adapters with a native
    /// batch call override this; missing paths are absent from the map.
    async fn read_batch(&self, paths: &[String]) -> Result<HashMap<String, Bytes>> {
        let cap = self.max_concurrency().unwrap_or_else(|| paths.len().max(1));
        let results: Vec<Result<Option<(String, Bytes)>>> = stream::iter(paths.iter().cloned())
            .map(|path| async move {
                Ok(self.read(&path).await?.map(|data| (path, data)))
            })
            .buffer_unordered(cap.max(1))
            .collect()
            .await;
        let mut map = HashMap::with_capacity(paths.len());
        for result in results {
            if let Some((path, data)) = result? {
                map.insert(path, data);
            }
        }
        Ok(map)
    }

    /// Batch delete; implementations should coalesce into provider-native
    /// bulk calls where one exists.
    async fn delete_batch(&self, paths: &[String]) -> Result<()> {
        let cap = self.max_concurrency().unwrap_or_else(|| paths.len().max(1));
        let results: Vec<Result<()>> = stream::iter(paths.iter().cloned())
            .map(|path| async move { self.delete(&path).await })
            .buffer_unordered(cap.max(1))
            .collect()
            .await;
        results.into_iter().collect()
    }

    /// Provider lifecycle configuration. Only meaningful for cloud
    /// adapters; everything else reports the operation as unsupported.
    async fn set_lifecycle_policy(&self, _rules: &[LifecycleRule]) -> Result<()> {
        Err(StorageError::Permanent(format!(
            "lifecycle policies are not supported by the {} adapter",
            self.name()
        )))
    }

    /// Move a single blob to a different tier, where the provider can.
    async fn change_tier(&self, _path: &str, _tier: StorageTier) -> Result<()> {
        Err(StorageError::Permanent(format!(
            "storage tiers are not supported by the {} adapter",
            self.name()
        )))
    }
}

/// Classify a std::io error into the storage taxonomy.
pub(crate) fn classify_io(context: &str, e: std::io::Error) -> StorageError {
    use std::io::ErrorKind;
    match e.kind() {
        ErrorKind::PermissionDenied => StorageError::Permanent(format!("{context}: {e}")),
        ErrorKind::StorageFull | ErrorKind::QuotaExceeded => {
            StorageError::Capacity(format!("{context}: {e}"))
        }
        _ => StorageError::Transient(format!("{context}: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_faults_are_retriable() {
        assert!(StorageError::Transient("timeout".into()).is_retriable());
        assert!(!StorageError::Permanent("denied".into()).is_retriable());
        assert!(!StorageError::Capacity("full".into()).is_retriable());
        assert!(!StorageError::Cancelled("deadline".into()).is_retriable());
    }
}
