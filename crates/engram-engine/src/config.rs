use crate::Embedder;
use engram_core::{DistanceMetric, DEFAULT_DIMENSION};
use engram_vector::HnswParams;
use std::sync::Arc;
use std::time::Duration;

/// Engine configuration. Construction is explicit: every database handle
/// owns its configuration and there is no process-global state.
#[derive(Clone)]
pub struct EngramConfig {
    /// Embedding dimensionality; fixed for the database's lifetime.
    pub dimension: usize,
    pub metric: DistanceMetric,
    pub hnsw: HnswParams,
    /// Chunk size for `add_many` and friends.
    pub batch_size: usize,
    /// Entity LRU cache capacity.
    pub cache_size: usize,
    /// Default deadline applied to public operations; `None` means no
    /// timeout. Per-call deadlines override.
    pub default_deadline: Option<Duration>,
    /// Persist a vector-index snapshot every N commits (0 = only on
    /// shutdown).
    pub snapshot_every_commits: u32,
    /// Optional text-to-vector hook; the engine never loads models
    /// itself.
    pub embedder: Option<Arc<dyn Embedder>>,
}

impl Default for EngramConfig {
    fn default() -> Self {
        Self {
            dimension: DEFAULT_DIMENSION,
            metric: DistanceMetric::default(),
            hnsw: HnswParams::default(),
            batch_size: 100,
            cache_size: 10_000,
            default_deadline: None,
            snapshot_every_commits: 16,
            embedder: None,
        }
    }
}

impl EngramConfig {
    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = dimension;
        self
    }

    pub fn with_metric(mut self, metric: DistanceMetric) -> Self {
        self.metric = metric;
        self
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn with_default_deadline(mut self, deadline: Duration) -> Self {
        self.default_deadline = Some(deadline);
        self
    }
}

impl std::fmt::Debug for EngramConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngramConfig")
            .field("dimension", &self.dimension)
            .field("metric", &self.metric)
            .field("hnsw", &self.hnsw)
            .field("batch_size", &self.batch_size)
            .field("cache_size", &self.cache_size)
            .field("default_deadline", &self.default_deadline)
            .field("snapshot_every_commits", &self.snapshot_every_commits)
            .field("embedder", &self.embedder.as_ref().map(|_| "<embedder>"))
            .finish()
    }
}
