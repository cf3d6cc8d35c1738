//! Compact bincode snapshot of the HNSW graph, persisted on shutdown and
//! periodically on commit. A snapshot is bound to the branch tip it was
//! taken at; loading against a different tip reports staleness so the
//! caller rebuilds from the entity store instead.

use crate::hnsw::{HnswIndex, HnswParams, Node};
use engram_core::{DistanceMetric, EntityId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    /// Branch tip commit the snapshot was sealed at.
    tip: String,
    dim: usize,
    metric: DistanceMetric,
    params: HnswParams,
    entry: Option<u32>,
    max_level: usize,
    deleted_count: usize,
    nodes: Vec<Node>,
}

/// Why a snapshot could not be used.
#[derive(Debug, PartialEq, Eq)]
pub enum SnapshotRejection {
    Corrupt,
    VersionMismatch,
    StaleTip,
    ShapeMismatch,
}

impl HnswIndex {
    pub fn to_snapshot_bytes(&self, tip: &str) -> Vec<u8> {
        let snapshot = Snapshot {
            version: SNAPSHOT_VERSION,
            tip: tip.to_string(),
            dim: self.dim,
            metric: self.metric,
            params: self.params,
            entry: self.entry,
            max_level: self.max_level,
            deleted_count: self.deleted_count,
            nodes: self.nodes.clone(),
        };
        bincode::serialize(&snapshot).expect("snapshot types serialize infallibly")
    }

    /// Restore from a snapshot taken at `expected_tip` with the same
    /// index shape. Any mismatch means the caller must rebuild.
    pub fn from_snapshot_bytes(
        bytes: &[u8],
        expected_tip: &str,
        dim: usize,
        metric: DistanceMetric,
    ) -> Result<HnswIndex, SnapshotRejection> {
        let snapshot: Snapshot = bincode::deserialize(bytes).map_err(|e| {
            warn!(error = %e, "vector index snapshot did not deserialize");
            SnapshotRejection::Corrupt
        })?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(SnapshotRejection::VersionMismatch);
        }
        if snapshot.tip != expected_tip {
            debug!(
                snapshot_tip = %snapshot.tip,
                %expected_tip,
                "vector index snapshot is stale"
            );
            return Err(SnapshotRejection::StaleTip);
        }
        if snapshot.dim != dim || snapshot.metric != metric {
            return Err(SnapshotRejection::ShapeMismatch);
        }
        let mut by_id: HashMap<EntityId, u32> = HashMap::with_capacity(snapshot.nodes.len());
        for (i, node) in snapshot.nodes.iter().enumerate() {
            // Later nodes win, matching insert-replaces-id semantics.
            by_id.insert(node.id, i as u32);
        }
        let mut index = HnswIndex::new(dim, metric, snapshot.params);
        index.nodes = snapshot.nodes;
        index.by_id = by_id;
        index.entry = snapshot.entry;
        index.max_level = snapshot.max_level;
        index.deleted_count = snapshot.deleted_count;
        Ok(index)
    }
}
