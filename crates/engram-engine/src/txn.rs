//! Transactions: an ordered list of typed operations, each carrying the
//! pre-image its undo needs. Commit applies in order; the first failure
//! undoes everything already applied, in reverse, and surfaces the
//! error. Storage writes sit before index mutations in every transaction
//! the engine builds, so readers never observe an index entry whose
//! backing blob write did not succeed.

use crate::state::Indexes;
use crate::{EngramError, Result};
use bytes::Bytes;
use engram_core::{Entity, EntityId, Relationship, RelationshipId, VerbType};
use engram_storage::{with_retries, StorageAdapter};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, warn};

/// Cooperative cancellation: checked between operations, never mid-write.
/// A tripped deadline rolls the transaction back instead of abandoning
/// it half-applied.
pub(crate) type CancelFlag = Option<Arc<AtomicBool>>;

const STORAGE_ATTEMPTS: u32 = 3;

/// A typed transaction operation. Pre-images are captured at build time
/// by the coordinator, which holds the branch write lock throughout.
pub(crate) enum TxnOp {
    /// Write a blob at a branch-physical path. `prior` is the blob the
    /// path held before (None when the path is new).
    PutBlob { physical: String, bytes: Bytes, prior: Option<Bytes> },
    /// Insert or replace the metadata-index entry for an entity.
    IndexEntity { next: Box<Entity>, prior: Option<Box<Entity>> },
    /// Drop an entity from the metadata index.
    UnindexEntity { prior: Box<Entity> },
    /// Insert (or replace) a vector. `prior_vector` restores on undo.
    HnswInsert { id: EntityId, vector: Vec<f32>, prior_vector: Option<Vec<f32>> },
    /// Soft-delete a vector.
    HnswDelete { id: EntityId },
    GraphAdd { from: EntityId, to: EntityId, verb: VerbType },
    GraphRemove { from: EntityId, to: EntityId, verb: VerbType },
    RelationPut { rel: Box<Relationship> },
    RelationRemove { id: RelationshipId },
}

/// Inverse actions recorded as operations apply.
enum Undo {
    RestoreBlob { physical: String, prior: Option<Bytes> },
    ReindexEntity { prior: Box<Entity> },
    UnindexEntity { id: EntityId },
    HnswReinsert { id: EntityId, vector: Vec<f32> },
    HnswRemove { id: EntityId },
    HnswUndelete { id: EntityId },
    GraphRemove { from: EntityId, to: EntityId, verb: VerbType },
    GraphAdd { from: EntityId, to: EntityId, verb: VerbType },
    RelationRestore { rel: Box<Relationship> },
    RelationRemove { id: RelationshipId },
    Nothing,
}

#[derive(Default)]
pub(crate) struct Txn {
    ops: Vec<TxnOp>,
    /// Logical paths this transaction touches; merged into the session
    /// write set on success.
    logicals: Vec<String>,
}

impl Txn {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, op: TxnOp) {
        self.ops.push(op);
    }

    pub fn touch(&mut self, logical: String) {
        self.logicals.push(logical);
    }

    /// Apply all operations in order. On success, returns the logical
    /// write set. On any failure (or a tripped deadline between
    /// operations), already-applied operations are undone in reverse and
    /// the first error propagates; rollback is silent.
    pub async fn commit(
        self,
        storage: &Arc<dyn StorageAdapter>,
        indexes: &RwLock<Indexes>,
        cancel: CancelFlag,
    ) -> Result<Vec<String>> {
        let mut undos: Vec<Undo> = Vec::with_capacity(self.ops.len());
        for op in self.ops {
            if cancel.as_ref().is_some_and(|flag| flag.load(Ordering::Relaxed)) {
                warn!(applied = undos.len(), "deadline elapsed mid-transaction, rolling back");
                rollback(undos, storage, indexes).await;
                return Err(EngramError::Cancelled("deadline elapsed mid-transaction".into()));
            }
            match apply(op, storage, indexes).await {
                Ok(undo) => undos.push(undo),
                Err(e) => {
                    warn!(error = %e, applied = undos.len(), "transaction failed, rolling back");
                    rollback(undos, storage, indexes).await;
                    return Err(e);
                }
            }
        }
        Ok(self.logicals)
    }
}

async fn apply(
    op: TxnOp,
    storage: &Arc<dyn StorageAdapter>,
    indexes: &RwLock<Indexes>,
) -> Result<Undo> {
    match op {
        TxnOp::PutBlob { physical, bytes, prior } => {
            with_retries("put blob", STORAGE_ATTEMPTS, || storage.write(&physical, bytes.clone()))
                .await?;
            Ok(Undo::RestoreBlob { physical, prior })
        }
        TxnOp::IndexEntity { next, prior } => {
            let mut idx = indexes.write();
            idx.metadata.index_entity(&next);
            Ok(match prior {
                Some(prior) => Undo::ReindexEntity { prior },
                None => Undo::UnindexEntity { id: next.id },
            })
        }
        TxnOp::UnindexEntity { prior } => {
            let mut idx = indexes.write();
            idx.metadata.unindex_entity(&prior.id);
            Ok(Undo::ReindexEntity { prior })
        }
        TxnOp::HnswInsert { id, vector, prior_vector } => {
            let mut idx = indexes.write();
            idx.hnsw.insert(id, vector);
            Ok(match prior_vector {
                Some(vector) => Undo::HnswReinsert { id, vector },
                None => Undo::HnswRemove { id },
            })
        }
        TxnOp::HnswDelete { id } => {
            let mut idx = indexes.write();
            if idx.hnsw.delete(&id) {
                Ok(Undo::HnswUndelete { id })
            } else {
                Ok(Undo::Nothing)
            }
        }
        TxnOp::GraphAdd { from, to, verb } => {
            let mut idx = indexes.write();
            if idx.graph.add_edge(from, to, verb) {
                Ok(Undo::GraphRemove { from, to, verb })
            } else {
                Ok(Undo::Nothing)
            }
        }
        TxnOp::GraphRemove { from, to, verb } => {
            let mut idx = indexes.write();
            if idx.graph.remove_edge(from, to, verb) {
                Ok(Undo::GraphAdd { from, to, verb })
            } else {
                Ok(Undo::Nothing)
            }
        }
        TxnOp::RelationPut { rel } => {
            let mut idx = indexes.write();
            let id = rel.id;
            idx.relationships.insert(*rel);
            Ok(Undo::RelationRemove { id })
        }
        TxnOp::RelationRemove { id } => {
            let mut idx = indexes.write();
            Ok(match idx.relationships.remove(&id) {
                Some(rel) => Undo::RelationRestore { rel: Box::new(rel) },
                None => Undo::Nothing,
            })
        }
    }
}

/// Run undo actions in reverse order. Undo is best-effort: a failing
/// storage restore is logged and the remaining undos still run, so the
/// in-memory state never diverges further than it must.
async fn rollback(undos: Vec<Undo>, storage: &Arc<dyn StorageAdapter>, indexes: &RwLock<Indexes>) {
    for undo in undos.into_iter().rev() {
        match undo {
            Undo::RestoreBlob { physical, prior } => {
                let result = match prior {
                    Some(bytes) => {
                        with_retries("undo blob", STORAGE_ATTEMPTS, || {
                            storage.write(&physical, bytes.clone())
                        })
                        .await
                    }
                    None => {
                        with_retries("undo blob", STORAGE_ATTEMPTS, || storage.delete(&physical))
                            .await
                    }
                };
                if let Err(e) = result {
                    error!(path = physical, error = %e, "rollback could not restore blob");
                }
            }
            Undo::ReindexEntity { prior } => {
                indexes.write().metadata.index_entity(&prior);
            }
            Undo::UnindexEntity { id } => {
                indexes.write().metadata.unindex_entity(&id);
            }
            Undo::HnswReinsert { id, vector } => {
                indexes.write().hnsw.insert(id, vector);
            }
            Undo::HnswRemove { id } => {
                indexes.write().hnsw.delete(&id);
            }
            Undo::HnswUndelete { id } => {
                indexes.write().hnsw.undelete(&id);
            }
            Undo::GraphRemove { from, to, verb } => {
                indexes.write().graph.remove_edge(from, to, verb);
            }
            Undo::GraphAdd { from, to, verb } => {
                indexes.write().graph.add_edge(from, to, verb);
            }
            Undo::RelationRestore { rel } => {
                indexes.write().relationships.insert(*rel);
            }
            Undo::RelationRemove { id } => {
                indexes.write().relationships.remove(&id);
            }
            Undo::Nothing => {}
        }
    }
}
