//! Engram Store - serialization and branch-aware retrieval of entities
//! and relationships.
//!
//! Metadata lives in small self-describing JSON blobs; vectors live in
//! sibling binary blobs so metadata-only reads never pay the vector I/O.
//! Deletions are tombstone records written at the same logical path,
//! which is what lets a child branch shadow an entity its parent still
//! has. Writes are assembled here but persisted by the transaction
//! layer; reads resolve through the branch manager.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use engram_branch::{BranchError, BranchManager};
use engram_core::{
    decode_vector, encode_vector, entity_meta_path, entity_vector_path, verb_meta_path,
    CoreError, Entity, EntityId, Relationship, RelationshipId,
};
use engram_storage::StorageError;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, instrument};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("stored blob corrupt at {path}: {details}")]
    Integrity { path: String, details: String },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Branch(#[from] BranchError),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Tombstone marker blob. Written at the entity's (or relationship's)
/// metadata path; shadows any inherited record.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TombstoneRecord {
    tombstone: bool,
    deleted_at: DateTime<Utc>,
}

/// Everything the index layer needs to rebuild from a branch.
#[derive(Debug, Default)]
pub struct BranchScan {
    pub entities: Vec<Entity>,
    pub relationships: Vec<Relationship>,
}

pub struct EntityStore {
    branches: Arc<BranchManager>,
    dim: usize,
}

impl EntityStore {
    pub fn new(branches: Arc<BranchManager>, dim: usize) -> Self {
        Self { branches, dim }
    }

    pub fn branches(&self) -> &Arc<BranchManager> {
        &self.branches
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    // ---- codecs -------------------------------------------------------

    pub fn encode_entity(entity: &Entity) -> Result<Bytes> {
        let json = serde_json::to_vec_pretty(entity).map_err(|e| StoreError::Integrity {
            path: entity_meta_path(&entity.id),
            details: e.to_string(),
        })?;
        Ok(Bytes::from(json))
    }

    /// Decode an entity metadata blob. A tombstone decodes to `None`.
    pub fn decode_entity(path: &str, bytes: &[u8]) -> Result<Option<Entity>> {
        let value: serde_json::Value =
            serde_json::from_slice(bytes).map_err(|e| StoreError::Integrity {
                path: path.to_string(),
                details: e.to_string(),
            })?;
        if is_tombstone(&value) {
            return Ok(None);
        }
        serde_json::from_value(value).map(Some).map_err(|e| StoreError::Integrity {
            path: path.to_string(),
            details: e.to_string(),
        })
    }

    pub fn encode_relationship(rel: &Relationship) -> Result<Bytes> {
        let json = serde_json::to_vec_pretty(rel).map_err(|e| StoreError::Integrity {
            path: verb_meta_path(&rel.id),
            details: e.to_string(),
        })?;
        Ok(Bytes::from(json))
    }

    pub fn decode_relationship(path: &str, bytes: &[u8]) -> Result<Option<Relationship>> {
        let value: serde_json::Value =
            serde_json::from_slice(bytes).map_err(|e| StoreError::Integrity {
                path: path.to_string(),
                details: e.to_string(),
            })?;
        if is_tombstone(&value) {
            return Ok(None);
        }
        serde_json::from_value(value).map(Some).map_err(|e| StoreError::Integrity {
            path: path.to_string(),
            details: e.to_string(),
        })
    }

    pub fn tombstone_bytes() -> Bytes {
        let record = TombstoneRecord { tombstone: true, deleted_at: Utc::now() };
        Bytes::from(serde_json::to_vec_pretty(&record).expect("tombstones serialize infallibly"))
    }

    pub fn encode_vector_blob(&self, vector: &[f32]) -> std::result::Result<Bytes, CoreError> {
        encode_vector(vector)
    }

    // ---- reads --------------------------------------------------------

    #[instrument(skip(self), level = "debug")]
    pub async fn get_entity(&self, id: &EntityId, include_vector: bool) -> Result<Option<Entity>> {
        let meta_path = entity_meta_path(id);
        let Some(bytes) = self.branches.resolve_read(&meta_path).await? else {
            return Ok(None);
        };
        let Some(mut entity) = Self::decode_entity(&meta_path, &bytes)? else {
            return Ok(None);
        };
        if include_vector {
            entity.vector = self.get_vector(id).await?;
        }
        Ok(Some(entity))
    }

    pub async fn get_vector(&self, id: &EntityId) -> Result<Option<Vec<f32>>> {
        let path = entity_vector_path(id);
        let Some(bytes) = self.branches.resolve_read(&path).await? else {
            return Ok(None);
        };
        decode_vector(&bytes, Some(self.dim))
            .map(Some)
            .map_err(|e| StoreError::Integrity { path, details: e.to_string() })
    }

    pub async fn get_relationship(&self, id: &RelationshipId) -> Result<Option<Relationship>> {
        let path = verb_meta_path(id);
        let Some(bytes) = self.branches.resolve_read(&path).await? else {
            return Ok(None);
        };
        Self::decode_relationship(&path, &bytes)
    }

    /// Batched metadata fetch: O(1) path construction per id, one
    /// bounded-parallel fan-out per branch level. Missing and tombstoned
    /// ids are absent from the result; duplicates collapse.
    #[instrument(skip(self, ids), fields(count = ids.len()), level = "debug")]
    pub async fn get_entity_batch(
        &self,
        ids: &[EntityId],
        include_vectors: bool,
    ) -> Result<HashMap<EntityId, Entity>> {
        let mut meta_paths: Vec<String> = Vec::with_capacity(ids.len());
        let mut by_path: HashMap<String, EntityId> = HashMap::with_capacity(ids.len());
        for id in ids {
            let path = entity_meta_path(id);
            if by_path.insert(path.clone(), *id).is_none() {
                meta_paths.push(path);
            }
        }
        let blobs = self.branches.resolve_read_batch(&meta_paths).await?;
        let mut entities = HashMap::with_capacity(blobs.len());
        for (path, bytes) in &blobs {
            let id = by_path[path];
            if let Some(entity) = Self::decode_entity(path, bytes)? {
                entities.insert(id, entity);
            }
        }
        if include_vectors {
            let vector_paths: Vec<String> =
                entities.keys().map(entity_vector_path).collect();
            let vector_blobs = self.branches.resolve_read_batch(&vector_paths).await?;
            for entity in entities.values_mut() {
                let path = entity_vector_path(&entity.id);
                if let Some(bytes) = vector_blobs.get(&path) {
                    let vector = decode_vector(bytes, Some(self.dim)).map_err(|e| {
                        StoreError::Integrity { path, details: e.to_string() }
                    })?;
                    entity.vector = Some(vector);
                }
            }
        }
        Ok(entities)
    }

    // ---- rebuild scan -------------------------------------------------

    /// Stream the active branch's full visible state: its own blobs plus
    /// everything inherited through the fork-point history, tombstones
    /// applied. This is the startup path that derived indexes rebuild
    /// from.
    pub async fn scan_active_branch(&self) -> Result<BranchScan> {
        let branch = self.branches.active_branch();
        let storage = self.branches.storage();
        let own_prefix = engram_core::branch_key(&branch, "entities/");

        // Newest state first: the branch's own blobs shadow history.
        let mut blob_map: HashMap<String, Bytes> = HashMap::new();
        let own_keys = storage.list(&own_prefix).await?;
        let own_blobs = storage.read_batch(&own_keys).await?;
        for (physical, bytes) in own_blobs {
            let logical = physical
                .strip_prefix(&format!("branches/{branch}/"))
                .unwrap_or(&physical)
                .to_string();
            blob_map.insert(logical, bytes);
        }

        if let Some(tip) = self.branches.branch_ref(&branch).await?.tip {
            for record in self.branches.commit_chain(tip).await? {
                let wanted: Vec<String> = record
                    .manifest
                    .iter()
                    .filter(|p| p.starts_with("entities/") && !blob_map.contains_key(*p))
                    .cloned()
                    .collect();
                if wanted.is_empty() {
                    continue;
                }
                let object_paths: Vec<String> = wanted
                    .iter()
                    .map(|l| engram_core::commit_object_path(&record.id, l))
                    .collect();
                let found = storage.read_batch(&object_paths).await?;
                for logical in wanted {
                    let object = engram_core::commit_object_path(&record.id, &logical);
                    if let Some(bytes) = found.get(&object) {
                        blob_map.insert(logical, bytes.clone());
                    }
                }
            }
        }

        // Vector blobs dominate the rebuild payload; decode them in
        // parallel.
        let vector_blobs: Vec<(&String, &Bytes)> = blob_map
            .iter()
            .filter(|(logical, _)| logical.ends_with("/vector.bin"))
            .collect();
        let vectors: HashMap<String, Vec<f32>> = vector_blobs
            .into_par_iter()
            .map(|(path, bytes)| match decode_vector(bytes, Some(self.dim)) {
                Ok(vector) => Ok((path.clone(), vector)),
                Err(e) => Err(StoreError::Integrity {
                    path: path.clone(),
                    details: e.to_string(),
                }),
            })
            .collect::<Result<_>>()?;

        let mut scan = BranchScan::default();
        for (logical, bytes) in &blob_map {
            if !logical.ends_with("/metadata.json") {
                continue;
            }
            if logical.starts_with(engram_core::NOUNS_PREFIX) {
                if let Some(mut entity) = Self::decode_entity(logical, bytes)? {
                    entity.vector = vectors.get(&entity_vector_path(&entity.id)).cloned();
                    scan.entities.push(entity);
                }
            } else if logical.starts_with(engram_core::VERBS_PREFIX) {
                if let Some(rel) = Self::decode_relationship(logical, bytes)? {
                    scan.relationships.push(rel);
                }
            }
        }

        // Deterministic rebuild order regardless of listing order.
        scan.entities.sort_by(|a, b| {
            a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id))
        });
        scan.relationships
            .sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        debug!(
            branch,
            entities = scan.entities.len(),
            relationships = scan.relationships.len(),
            "scanned branch state"
        );
        Ok(scan)
    }
}

fn is_tombstone(value: &serde_json::Value) -> bool {
    value.get("tombstone").and_then(serde_json::Value::as_bool) == Some(true)
}
