//! Engram Vector - in-memory HNSW graph for approximate nearest-neighbor
//! search under cosine similarity or inner product.
//!
//! Node levels derive from a hash of the entity id, so rebuilding the
//! index from storage reproduces the same graph shape regardless of scan
//! order; search is deterministic for a fixed `ef` and insertion order.
//! Deletion is soft (search skips tombstoned nodes) and reconciled by a
//! full compaction once the deleted fraction passes a threshold.

mod hnsw;
mod snapshot;

pub use hnsw::{HnswIndex, HnswParams, SearchHit};
pub use snapshot::{SnapshotRejection, SNAPSHOT_VERSION};

pub(crate) fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

pub(crate) fn l2_norm(v: &[f32]) -> f32 {
    dot(v, v).sqrt()
}
