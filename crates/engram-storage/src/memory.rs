//! Memory-backed storage adapter for tests and ephemeral databases.

use crate::{Result, StorageAdapter};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use std::collections::HashMap;

/// In-memory adapter over a concurrent map. Provides the same path
/// semantics as every other adapter and unbounded batch concurrency.
#[derive(Debug, Default)]
pub struct MemoryAdapter {
    blobs: DashMap<String, Bytes>,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored blobs (for tests).
    pub fn blob_count(&self) -> usize {
        self.blobs.len()
    }

    /// Snapshot of a blob's bytes without going through the async trait
    /// (for byte-exact rollback assertions in tests).
    pub fn raw(&self, path: &str) -> Option<Bytes> {
        self.blobs.get(path).map(|entry| entry.value().clone())
    }
}

#[async_trait]
impl StorageAdapter for MemoryAdapter {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn max_concurrency(&self) -> Option<usize> {
        None
    }

    async fn read(&self, path: &str) -> Result<Option<Bytes>> {
        Ok(self.blobs.get(path).map(|entry| entry.value().clone()))
    }

    async fn write(&self, path: &str, data: Bytes) -> Result<()> {
        self.blobs.insert(path.to_string(), data);
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.blobs.remove(path);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .blobs
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| entry.key().clone())
            .collect())
    }

    async fn read_batch(&self, paths: &[String]) -> Result<HashMap<String, Bytes>> {
        let mut map = HashMap::with_capacity(paths.len());
        for path in paths {
            if let Some(entry) = self.blobs.get(path) {
                map.insert(path.clone(), entry.value().clone());
            }
        }
        Ok(map)
    }

    async fn delete_batch(&self, paths: &[String]) -> Result<()> {
        for path in paths {
            self.blobs.remove(path);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn read_after_write() {
        let adapter = MemoryAdapter::new();
        adapter.write("a/b", Bytes::from_static(b"hello")).await.unwrap();
        assert_eq!(adapter.read("a/b").await.unwrap(), Some(Bytes::from_static(b"hello")));
        assert_eq!(adapter.read("a/missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let adapter = MemoryAdapter::new();
        adapter.write("k", Bytes::from_static(b"v")).await.unwrap();
        adapter.delete("k").await.unwrap();
        adapter.delete("k").await.unwrap();
        assert_eq!(adapter.read("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn list_filters_by_prefix() {
        let adapter = MemoryAdapter::new();
        for key in ["x/1", "x/2", "y/1"] {
            adapter.write(key, Bytes::new()).await.unwrap();
        }
        let mut keys = adapter.list("x/").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["x/1", "x/2"]);
    }

    #[tokio::test]
    async fn batch_read_skips_missing_and_dedups() {
        let adapter = MemoryAdapter::new();
        adapter.write("a", Bytes::from_static(b"1")).await.unwrap();
        let paths = vec!["a".to_string(), "a".to_string(), "missing".to_string()];
        let map = adapter.read_batch(&paths).await.unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(map["a"], Bytes::from_static(b"1"));
    }
}
