//! Shared fixtures for the engine integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use engram_engine::{Database, Embedder, EngramConfig};
use engram_storage::{MemoryAdapter, Result as StorageResult, StorageAdapter, StorageError};
use parking_lot::Mutex;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Deterministic bag-of-words embedder: each token bumps one dimension,
/// the vector is L2-normalised. Shared tokens -> high cosine similarity.
pub struct HashEmbedder {
    pub dim: usize,
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, String> {
        let mut v = vec![0.0f32; self.dim];
        for token in text.split_whitespace() {
            let mut hasher = DefaultHasher::new();
            token.to_lowercase().hash(&mut hasher);
            v[(hasher.finish() as usize) % self.dim] += 1.0;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }
        Ok(v)
    }
}

/// Memory adapter with a write fault injector: writes to paths
/// containing the armed substring fail permanently (no retry noise in
/// assertions). Everything else passes through.
pub struct FlakyAdapter {
    inner: MemoryAdapter,
    fail_on: Mutex<Option<String>>,
    write_delay: Mutex<Option<std::time::Duration>>,
}

impl FlakyAdapter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryAdapter::new(),
            fail_on: Mutex::new(None),
            write_delay: Mutex::new(None),
        })
    }

    pub fn arm(&self, substring: &str) {
        *self.fail_on.lock() = Some(substring.to_string());
    }

    /// Make every write suspend for `delay` (deadline tests).
    pub fn slow_writes(&self, delay: std::time::Duration) {
        *self.write_delay.lock() = Some(delay);
    }

    pub fn disarm(&self) {
        *self.fail_on.lock() = None;
    }

    pub fn raw(&self, path: &str) -> Option<Bytes> {
        self.inner.raw(path)
    }

    /// All stored blobs, for byte-exact state comparisons.
    pub async fn dump(&self) -> HashMap<String, Bytes> {
        let keys = self.inner.list("").await.unwrap();
        let mut map = HashMap::new();
        for key in keys {
            if let Some(bytes) = self.inner.raw(&key) {
                map.insert(key, bytes);
            }
        }
        map
    }
}

#[async_trait]
impl StorageAdapter for FlakyAdapter {
    fn name(&self) -> &'static str {
        "flaky-memory"
    }

    fn max_concurrency(&self) -> Option<usize> {
        None
    }

    async fn read(&self, path: &str) -> StorageResult<Option<Bytes>> {
        self.inner.read(path).await
    }

    async fn write(&self, path: &str, data: Bytes) -> StorageResult<()> {
        let delay = *self.write_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(pattern) = self.fail_on.lock().as_deref() {
            if path.contains(pattern) {
                return Err(StorageError::Permanent(format!("injected fault at {path}")));
            }
        }
        self.inner.write(path, data).await
    }

    async fn delete(&self, path: &str) -> StorageResult<()> {
        self.inner.delete(path).await
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        self.inner.list(prefix).await
    }
}

/// Install the test log subscriber once; `RUST_LOG` filters output.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub async fn open_db(dim: usize) -> Database {
    init_tracing();
    Database::open(Arc::new(MemoryAdapter::new()), EngramConfig::default().with_dimension(dim))
        .await
        .unwrap()
}

pub async fn open_db_with_embedder(dim: usize) -> Database {
    let config = EngramConfig::default()
        .with_dimension(dim)
        .with_embedder(Arc::new(HashEmbedder { dim }));
    Database::open(Arc::new(MemoryAdapter::new()), config).await.unwrap()
}

/// A vector with every component equal, normalisable and dimension-true.
pub fn flat_vector(dim: usize, value: f32) -> Vec<f32> {
    vec![value; dim]
}
