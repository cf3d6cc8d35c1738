//! The public façade: an owned database handle that validates input,
//! opens transactions, orchestrates the stores and indexes, and keeps
//! the caches honest. One writer at a time per handle (a branch-level
//! async lock); readers run against committed in-memory state without
//! blocking each other.

use crate::cache::EntityCache;
use crate::config::EngramConfig;
use crate::find;
use crate::state::{Indexes, RelationQuery};
use crate::txn::{CancelFlag, Txn, TxnOp};
use crate::{EngramError, Result};
use bytes::Bytes;
use chrono::Utc;
use engram_branch::{AsOfHandle, BranchManager, BranchRef, CommitRecord, MergeReport, MergeStrategy};
use engram_core::{
    entity_meta_path, entity_vector_path, index_path, verb_meta_path, CommitId, Entity,
    EntityDraft, EntityId, MetadataBag, NounType, Relationship, RelationshipDraft, RelationshipId,
};
use engram_query::{FindParams, FindResult};
use engram_storage::StorageAdapter;
use engram_store::EntityStore;
use engram_vector::HnswIndex;
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Options for `update`.
#[derive(Debug, Clone, Default)]
pub struct UpdateRequest {
    pub data: Option<String>,
    pub vector: Option<Vec<f32>>,
    pub metadata: Option<MetadataBag>,
    /// Merge the metadata bag into the existing one (default) instead of
    /// replacing it.
    pub merge: bool,
}

impl UpdateRequest {
    pub fn new() -> Self {
        Self { merge: true, ..Default::default() }
    }

    pub fn metadata(mut self, metadata: MetadataBag) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn vector(mut self, vector: Vec<f32>) -> Self {
        self.vector = Some(vector);
        self
    }
}

/// Options for `relate`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RelateOptions {
    /// Also create the reverse edge with the same verb.
    pub bidirectional: bool,
    /// Skip endpoint existence validation (high-throughput ingestion).
    /// Traversals skip dangling edges at read time.
    pub unchecked: bool,
}

/// Parameters of `similar`: nearest neighbors of an existing entity.
#[derive(Debug, Clone)]
pub struct SimilarParams {
    pub to: EntityId,
    pub limit: Option<usize>,
    /// Minimum cosine similarity (or negated inner-product distance).
    pub threshold: Option<f32>,
    pub noun_types: Vec<NounType>,
    pub filter: Option<engram_core::Filter>,
}

impl SimilarParams {
    pub fn to(id: EntityId) -> Self {
        Self { to: id, limit: None, threshold: None, noun_types: Vec::new(), filter: None }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CommitOptions {
    pub message: String,
    pub author: Option<String>,
}

impl CommitOptions {
    pub fn message(message: impl Into<String>) -> Self {
        Self { message: message.into(), author: None }
    }
}

pub(crate) struct Inner {
    pub config: EngramConfig,
    pub storage: Arc<dyn StorageAdapter>,
    pub branches: Arc<BranchManager>,
    pub store: EntityStore,
    pub indexes: RwLock<Indexes>,
    pub cache: EntityCache,
    /// Single writer per branch.
    pub write_lock: tokio::sync::Mutex<()>,
    /// Logical paths written since the last commit on the active branch.
    pub write_set: parking_lot::Mutex<BTreeSet<String>>,
    pub commits_since_snapshot: AtomicU32,
}

/// An owned engine handle. Cloning shares the underlying instance;
/// `with_deadline` scopes a per-call deadline onto a clone.
#[derive(Clone)]
pub struct Database {
    inner: Arc<Inner>,
    op_deadline: Option<Duration>,
}

impl Database {
    /// Open a database over a storage adapter. Derived indexes load from
    /// the vector snapshot when it matches the branch tip, otherwise
    /// they rebuild by streaming the branch.
    pub async fn open(storage: Arc<dyn StorageAdapter>, config: EngramConfig) -> Result<Self> {
        let branches = Arc::new(BranchManager::open(Arc::clone(&storage)).await?);
        let store = EntityStore::new(Arc::clone(&branches), config.dimension);
        let indexes = RwLock::new(Indexes::empty(config.dimension, config.metric, config.hnsw));
        let cache = EntityCache::new(config.cache_size);
        let db = Self {
            inner: Arc::new(Inner {
                config,
                storage,
                branches,
                store,
                indexes,
                cache,
                write_lock: tokio::sync::Mutex::new(()),
                write_set: parking_lot::Mutex::new(BTreeSet::new()),
                commits_since_snapshot: AtomicU32::new(0),
            }),
            op_deadline: None,
        };
        db.rebuild_indexes().await?;
        info!(adapter = db.inner.storage.name(), "database open");
        Ok(db)
    }

    /// A handle whose operations run under `deadline`; on expiry the
    /// operation reports `Cancelled` and any partial transaction has
    /// been undone.
    pub fn with_deadline(&self, deadline: Duration) -> Self {
        Self { inner: Arc::clone(&self.inner), op_deadline: Some(deadline) }
    }

    /// Deterministic shutdown: persist the vector snapshot and drop.
    /// Blob writes are already durable; only derived state needs
    /// flushing.
    pub async fn shutdown(&self) -> Result<()> {
        let _guard = self.inner.write_lock.lock().await;
        self.persist_snapshot().await?;
        self.inner.cache.clear();
        info!("database shut down");
        Ok(())
    }

    pub(crate) fn inner(&self) -> &Inner {
        &self.inner
    }

    fn effective_deadline(&self) -> Option<Duration> {
        self.op_deadline.or(self.inner.config.default_deadline)
    }

    pub(crate) async fn run_op<T>(
        &self,
        what: &'static str,
        fut: impl std::future::Future<Output = Result<T>>,
    ) -> Result<T> {
        match self.effective_deadline() {
            Some(deadline) => tokio::time::timeout(deadline, fut)
                .await
                .map_err(|_| EngramError::Cancelled(format!("{what}: deadline elapsed")))?,
            None => fut.await,
        }
    }

    // ---- entity CRUD --------------------------------------------------

    /// Insert a new entity. Either a pre-computed vector or a data
    /// string (embedded through the configured hook) supplies the vector
    /// signal; a metadata-only entity is also legal and simply absent
    /// from the vector index.
    #[instrument(skip(self, draft), level = "debug")]
    pub async fn add(&self, noun: NounType, draft: EntityDraft) -> Result<EntityId> {
        self.add_inner(noun, draft).await
    }

    async fn add_inner(&self, noun: NounType, mut draft: EntityDraft) -> Result<EntityId> {
        let _guard = self.inner.write_lock.lock().await;
        let custom_id = draft.id.is_some();
        let id = draft.id.unwrap_or_default();
        if custom_id && self.entity_exists(&id).await? {
            return Err(EngramError::Conflict {
                message: format!("entity {id} already exists"),
                conflicting: vec![id.to_string()],
            });
        }
        let stripped = draft.strip_reserved_keys();
        if !stripped.is_empty() {
            warn!(keys = ?stripped, "dropped reserved metadata keys from add");
        }
        let vector = match draft.vector.take() {
            Some(v) => {
                self.validate_vector(&v)?;
                Some(v)
            }
            None => match (&draft.data, &self.inner.config.embedder) {
                (Some(text), Some(embedder)) => Some(self.embed(embedder, text).await?),
                _ => None,
            },
        };
        let now = Utc::now();
        let entity = Entity {
            id,
            noun,
            data: draft.data,
            metadata: draft.metadata,
            created_at: now,
            updated_at: now,
            service: draft.service,
            vector: vector.clone(),
        };

        let mut txn = Txn::new();
        self.enqueue_meta_put(&mut txn, &entity).await?;
        if let Some(v) = &vector {
            self.enqueue_vector_put(&mut txn, &id, v).await?;
        }
        txn.enqueue(TxnOp::IndexEntity { next: Box::new(entity.clone()), prior: None });
        if let Some(v) = vector {
            txn.enqueue(TxnOp::HnswInsert { id, vector: v, prior_vector: None });
        }
        self.commit_txn(txn).await?;
        self.inner.cache.buffer_write(&entity);
        Ok(id)
    }

    /// Fetch an entity. Missing ids resolve to `Ok(None)`, never an
    /// error.
    #[instrument(skip(self), level = "debug")]
    pub async fn get(&self, id: &EntityId, include_vector: bool) -> Result<Option<Entity>> {
        self.run_op("get", async {
            if !include_vector {
                if let Some(entity) = self.inner.cache.get(id) {
                    return Ok(Some(entity));
                }
            }
            let entity = self.inner.store.get_entity(id, include_vector).await?;
            if let Some(entity) = &entity {
                self.inner.cache.populate(entity);
            }
            Ok(entity)
        })
        .await
    }

    /// Batch fetch. Same entities as individual `get` calls; missing ids
    /// absent, duplicates collapsed.
    pub async fn batch_get(
        &self,
        ids: &[EntityId],
        include_vectors: bool,
    ) -> Result<HashMap<EntityId, Entity>> {
        self.run_op("batch_get", async {
            let mut result: HashMap<EntityId, Entity> = HashMap::with_capacity(ids.len());
            let mut misses: Vec<EntityId> = Vec::new();
            for id in ids {
                if result.contains_key(id) {
                    continue;
                }
                match (include_vectors, self.inner.cache.get(id)) {
                    (false, Some(entity)) => {
                        result.insert(*id, entity);
                    }
                    _ => misses.push(*id),
                }
            }
            if !misses.is_empty() {
                let fetched = self.inner.store.get_entity_batch(&misses, include_vectors).await?;
                for (id, entity) in fetched {
                    self.inner.cache.populate(&entity);
                    result.insert(id, entity);
                }
            }
            Ok(result)
        })
        .await
    }

    /// Mutate an entity in place (copy-on-write within the active
    /// branch; parents never change).
    #[instrument(skip(self, request), level = "debug")]
    pub async fn update(&self, id: &EntityId, request: UpdateRequest) -> Result<()> {
        self.update_inner(id, request).await
    }

    async fn update_inner(&self, id: &EntityId, request: UpdateRequest) -> Result<()> {
        let _guard = self.inner.write_lock.lock().await;
        let Some(current) = self.inner.store.get_entity(id, true).await? else {
            return Err(EngramError::NotFound(format!("entity {id}")));
        };

        let mut metadata = match (&request.metadata, request.merge) {
            (Some(incoming), true) => {
                let mut merged = current.metadata.clone();
                merged.extend(incoming.clone());
                merged
            }
            (Some(incoming), false) => incoming.clone(),
            (None, _) => current.metadata.clone(),
        };
        for key in engram_core::RESERVED_KEYS {
            metadata.remove(key);
        }

        let data = request.data.clone().or_else(|| current.data.clone());
        let vector = match request.vector {
            Some(v) => {
                self.validate_vector(&v)?;
                Some(v)
            }
            None => match (&request.data, &self.inner.config.embedder) {
                (Some(text), Some(embedder)) => Some(self.embed(embedder, text).await?),
                _ => current.vector.clone(),
            },
        };

        let next = Entity {
            id: *id,
            noun: current.noun,
            data,
            metadata,
            created_at: current.created_at,
            updated_at: Utc::now(),
            service: current.service.clone(),
            vector: vector.clone(),
        };

        let mut txn = Txn::new();
        self.enqueue_meta_put(&mut txn, &next).await?;
        let vector_changed = vector != current.vector;
        if vector_changed {
            if let Some(v) = &vector {
                self.enqueue_vector_put(&mut txn, id, v).await?;
            }
        }
        txn.enqueue(TxnOp::IndexEntity {
            next: Box::new(next.clone()),
            prior: Some(Box::new(current.clone())),
        });
        if vector_changed {
            if let Some(v) = vector {
                txn.enqueue(TxnOp::HnswInsert {
                    id: *id,
                    vector: v,
                    prior_vector: current.vector.clone(),
                });
            }
        }
        self.commit_txn(txn).await?;
        self.inner.cache.invalidate(id);
        self.inner.cache.buffer_write(&next);
        Ok(())
    }

    /// Delete from the active branch. Idempotent: deleting a missing id
    /// is a no-op. Relationships touching the entity are tombstoned with
    /// it.
    #[instrument(skip(self), level = "debug")]
    pub async fn delete(&self, id: &EntityId) -> Result<()> {
        self.delete_inner(id).await
    }

    async fn delete_inner(&self, id: &EntityId) -> Result<()> {
        let _guard = self.inner.write_lock.lock().await;
        let Some(current) = self.inner.store.get_entity(id, true).await? else {
            return Ok(());
        };
        let touching = self.inner.indexes.read().relationships.touching(id);

        let mut txn = Txn::new();
        self.enqueue_tombstone(&mut txn, entity_meta_path(id)).await?;
        for rel in &touching {
            self.enqueue_tombstone(&mut txn, verb_meta_path(&rel.id)).await?;
            txn.enqueue(TxnOp::GraphRemove { from: rel.from, to: rel.to, verb: rel.verb });
            txn.enqueue(TxnOp::RelationRemove { id: rel.id });
        }
        txn.enqueue(TxnOp::UnindexEntity { prior: Box::new(current.clone()) });
        if current.vector.is_some() {
            txn.enqueue(TxnOp::HnswDelete { id: *id });
        }
        self.commit_txn(txn).await?;
        self.inner.cache.invalidate(id);
        self.maybe_compact();
        Ok(())
    }

    // ---- relationships ------------------------------------------------

    /// Create a typed edge. Endpoint existence is validated in the
    /// active branch unless `unchecked` ingestion is requested.
    #[instrument(skip(self, draft, options), level = "debug")]
    pub async fn relate(
        &self,
        draft: RelationshipDraft,
        options: RelateOptions,
    ) -> Result<RelationshipId> {
        self.relate_inner(draft, options).await
    }

    async fn relate_inner(
        &self,
        draft: RelationshipDraft,
        options: RelateOptions,
    ) -> Result<RelationshipId> {
        let _guard = self.inner.write_lock.lock().await;
        let rel = Relationship {
            id: RelationshipId::new(),
            from: draft.from,
            to: draft.to,
            verb: draft.verb,
            weight: draft.weight,
            metadata: draft.metadata,
            created_at: Utc::now(),
        };
        rel.validate()?;
        if !options.unchecked {
            for endpoint in [&rel.from, &rel.to] {
                if !self.entity_exists(endpoint).await? {
                    return Err(EngramError::NotFound(format!("entity {endpoint}")));
                }
            }
        }

        let mut txn = Txn::new();
        self.enqueue_relationship_put(&mut txn, &rel).await?;
        txn.enqueue(TxnOp::GraphAdd { from: rel.from, to: rel.to, verb: rel.verb });
        txn.enqueue(TxnOp::RelationPut { rel: Box::new(rel.clone()) });
        if options.bidirectional {
            let reverse = Relationship {
                id: RelationshipId::new(),
                from: rel.to,
                to: rel.from,
                verb: rel.verb,
                weight: rel.weight,
                metadata: rel.metadata.clone(),
                created_at: rel.created_at,
            };
            self.enqueue_relationship_put(&mut txn, &reverse).await?;
            txn.enqueue(TxnOp::GraphAdd { from: reverse.from, to: reverse.to, verb: reverse.verb });
            txn.enqueue(TxnOp::RelationPut { rel: Box::new(reverse) });
        }
        self.commit_txn(txn).await?;
        Ok(rel.id)
    }

    /// Remove a relationship. Idempotent.
    pub async fn unrelate(&self, id: &RelationshipId) -> Result<()> {
        let _guard = self.inner.write_lock.lock().await;
        let existing = self.inner.indexes.read().relationships.get(id).cloned();
        let Some(rel) = existing else { return Ok(()) };
        let mut txn = Txn::new();
        self.enqueue_tombstone(&mut txn, verb_meta_path(id)).await?;
        txn.enqueue(TxnOp::GraphRemove { from: rel.from, to: rel.to, verb: rel.verb });
        txn.enqueue(TxnOp::RelationRemove { id: *id });
        self.commit_txn(txn).await?;
        Ok(())
    }

    /// Query relationships by endpoint and verb with paging.
    pub async fn get_relations(&self, query: &RelationQuery) -> Result<Vec<Relationship>> {
        self.run_op("get_relations", async {
            Ok(self.inner.indexes.read().relationships.query(query))
        })
        .await
    }

    /// Outgoing relationships for a batch of source ids, optionally
    /// narrowed to one verb. Ids with no matches are absent.
    pub async fn get_relations_by_source(
        &self,
        ids: &[EntityId],
        verb: Option<engram_core::VerbType>,
    ) -> Result<HashMap<EntityId, Vec<Relationship>>> {
        self.run_op("get_relations_by_source", async {
            Ok(self.inner.indexes.read().relationships.by_sources(ids, verb))
        })
        .await
    }

    // ---- search -------------------------------------------------------

    /// The unified query entry point; see the query crate for the
    /// parameter surface.
    pub async fn find(&self, params: FindParams) -> Result<Vec<FindResult>> {
        find::execute(self, params).await
    }

    /// Nearest neighbors of an existing entity, excluding itself.
    pub async fn similar(&self, params: SimilarParams) -> Result<Vec<FindResult>> {
        find::similar(self, params).await
    }

    // ---- branch operations --------------------------------------------

    /// O(1): new branch forked from the active branch at its current
    /// commit.
    pub async fn fork(&self, name: &str) -> Result<BranchRef> {
        let _guard = self.inner.write_lock.lock().await;
        Ok(self.inner.branches.fork(name).await?)
    }

    /// Switch branches; derived indexes rebuild (or reload a snapshot)
    /// for the target branch.
    pub async fn checkout(&self, name: &str) -> Result<BranchRef> {
        let _guard = self.inner.write_lock.lock().await;
        let branch = self.inner.branches.checkout(name).await?;
        let dropped = {
            let mut set = self.inner.write_set.lock();
            let n = set.len();
            set.clear();
            n
        };
        if dropped > 0 {
            // The blobs stay durable in the previous branch; they just
            // will not appear in a commit manifest until something
            // touches them again there.
            warn!(dropped, "checkout with uncommitted writes; they remain on the previous branch");
        }
        self.inner.cache.clear();
        self.rebuild_indexes().await?;
        Ok(branch)
    }

    /// Seal everything written since the last commit into an immutable
    /// commit and advance the branch tip.
    pub async fn commit(&self, options: CommitOptions) -> Result<CommitRecord> {
        let _guard = self.inner.write_lock.lock().await;
        let write_set: Vec<String> = {
            let mut set = self.inner.write_set.lock();
            let paths = set.iter().cloned().collect();
            set.clear();
            paths
        };
        let record = self
            .inner
            .branches
            .commit(&options.message, options.author.as_deref(), &write_set)
            .await?;
        self.inner.cache.flush_buffer();
        let commits = self.inner.commits_since_snapshot.fetch_add(1, Ordering::Relaxed) + 1;
        let every = self.inner.config.snapshot_every_commits;
        if every > 0 && commits >= every {
            self.inner.commits_since_snapshot.store(0, Ordering::Relaxed);
            self.persist_snapshot().await?;
        }
        Ok(record)
    }

    /// Merge committed changes of `src` into `dst`.
    pub async fn merge(
        &self,
        src: &str,
        dst: &str,
        strategy: MergeStrategy,
    ) -> Result<MergeReport> {
        let _guard = self.inner.write_lock.lock().await;
        let report = self.inner.branches.merge(src, dst, strategy).await?;
        if dst == self.inner.branches.active_branch() {
            self.inner.cache.clear();
            self.rebuild_indexes().await?;
        }
        Ok(report)
    }

    pub async fn list_branches(&self) -> Result<Vec<BranchRef>> {
        Ok(self.inner.branches.list_branches().await?)
    }

    pub fn current_branch(&self) -> String {
        self.inner.branches.active_branch()
    }

    /// Read-only view of the database at a historical commit.
    pub async fn as_of(&self, commit: CommitId) -> Result<AsOfView> {
        let handle = self.inner.branches.as_of(commit).await?;
        Ok(AsOfView { handle, dim: self.inner.config.dimension })
    }

    // ---- internals ----------------------------------------------------

    pub(crate) fn validate_vector(&self, vector: &[f32]) -> Result<()> {
        let dim = self.inner.config.dimension;
        if vector.len() != dim {
            return Err(EngramError::validation(
                "vector",
                format!("dimension {} does not match database dimension {dim}", vector.len()),
            ));
        }
        if let Some(i) = vector.iter().position(|x| !x.is_finite()) {
            return Err(EngramError::validation(
                "vector",
                format!("component {i} is {}; vectors must be finite", vector[i]),
            ));
        }
        Ok(())
    }

    pub(crate) async fn embed(
        &self,
        embedder: &Arc<dyn crate::Embedder>,
        text: &str,
    ) -> Result<Vec<f32>> {
        let vector = embedder.embed(text).await.map_err(EngramError::Embedding)?;
        self.validate_vector(&vector)?;
        Ok(vector)
    }

    async fn entity_exists(&self, id: &EntityId) -> Result<bool> {
        if self.inner.cache.get(id).is_some() {
            return Ok(true);
        }
        Ok(self.inner.store.get_entity(id, false).await?.is_some())
    }

    async fn enqueue_meta_put(&self, txn: &mut Txn, entity: &Entity) -> Result<()> {
        let logical = entity_meta_path(&entity.id);
        let bytes = EntityStore::encode_entity(entity)?;
        self.enqueue_put(txn, logical, bytes).await
    }

    async fn enqueue_vector_put(&self, txn: &mut Txn, id: &EntityId, vector: &[f32]) -> Result<()> {
        let logical = entity_vector_path(id);
        let bytes = self.inner.store.encode_vector_blob(vector)?;
        self.enqueue_put(txn, logical, bytes).await
    }

    async fn enqueue_relationship_put(&self, txn: &mut Txn, rel: &Relationship) -> Result<()> {
        let logical = verb_meta_path(&rel.id);
        let bytes = EntityStore::encode_relationship(rel)?;
        self.enqueue_put(txn, logical, bytes).await
    }

    async fn enqueue_tombstone(&self, txn: &mut Txn, logical: String) -> Result<()> {
        self.enqueue_put(txn, logical, EntityStore::tombstone_bytes()).await
    }

    async fn enqueue_put(&self, txn: &mut Txn, logical: String, bytes: Bytes) -> Result<()> {
        let physical = self.inner.branches.physical_key(&logical);
        // The pre-image is the active branch's own blob; an inherited
        // value stays untouched and undo simply removes the new copy.
        let prior = self.inner.storage.read(&physical).await?;
        txn.enqueue(TxnOp::PutBlob { physical, bytes, prior });
        txn.touch(logical);
        Ok(())
    }

    async fn commit_txn(&self, txn: Txn) -> Result<()> {
        let cancel = self.deadline_flag();
        let logicals = txn.commit(&self.inner.storage, &self.inner.indexes, cancel).await?;
        self.inner.write_set.lock().extend(logicals);
        Ok(())
    }

    /// Arm a cooperative deadline for a write transaction: a timer trips
    /// the flag, and the transaction checks it between operations so a
    /// cancelled write always runs its undo path instead of being
    /// abandoned mid-flight.
    fn deadline_flag(&self) -> CancelFlag {
        let deadline = self.effective_deadline()?;
        let flag = Arc::new(AtomicBool::new(false));
        let armed = Arc::clone(&flag);
        tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            armed.store(true, Ordering::Relaxed);
        });
        Some(flag)
    }

    fn maybe_compact(&self) {
        let needs = self.inner.indexes.read().hnsw.needs_compaction();
        if !needs {
            return;
        }
        let fresh = self.inner.indexes.read().hnsw.compact();
        self.inner.indexes.write().hnsw = fresh;
        debug!("swapped in compacted vector index");
    }

    async fn snapshot_tip(&self) -> Result<String> {
        let branch = self.inner.branches.active_branch();
        let tip = self.inner.branches.branch_ref(&branch).await?.tip;
        Ok(tip.map(|c| c.to_string()).unwrap_or_else(|| "none".to_string()))
    }

    async fn persist_snapshot(&self) -> Result<()> {
        let branch = self.inner.branches.active_branch();
        let tip = self.snapshot_tip().await?;
        let bytes = self.inner.indexes.read().hnsw.to_snapshot_bytes(&tip);
        let path = index_path("hnsw", &format!("{branch}.snapshot"));
        self.inner.storage.write(&path, Bytes::from(bytes)).await?;
        debug!(branch, "persisted vector index snapshot");
        Ok(())
    }

    async fn rebuild_indexes(&self) -> Result<()> {
        let config = &self.inner.config;
        let branch = self.inner.branches.active_branch();
        let scan = self.inner.store.scan_active_branch().await?;

        let mut fresh = Indexes::empty(config.dimension, config.metric, config.hnsw);
        for entity in &scan.entities {
            fresh.metadata.index_entity(entity);
        }
        for rel in &scan.relationships {
            fresh.graph.add_edge(rel.from, rel.to, rel.verb);
            fresh.relationships.insert(rel.clone());
        }

        let tip = self.snapshot_tip().await?;
        let snapshot_path = index_path("hnsw", &format!("{branch}.snapshot"));
        let snapshot = match self.inner.storage.read(&snapshot_path).await? {
            Some(bytes) => {
                HnswIndex::from_snapshot_bytes(&bytes, &tip, config.dimension, config.metric).ok()
            }
            None => None,
        };
        // The tip check misses uncommitted writes made after the snapshot
        // (crash before shutdown), so also require the snapshot to cover
        // exactly the vector-bearing entities the scan found.
        let snapshot = snapshot.filter(|hnsw| {
            let with_vectors: Vec<_> =
                scan.entities.iter().filter(|e| e.vector.is_some()).collect();
            hnsw.len() == with_vectors.len()
                && with_vectors.iter().all(|e| hnsw.contains(&e.id))
        });
        match snapshot {
            Some(hnsw) => {
                debug!(branch, "vector index loaded from snapshot");
                fresh.hnsw = hnsw;
            }
            None => {
                for entity in &scan.entities {
                    if let Some(vector) = &entity.vector {
                        fresh.hnsw.insert(entity.id, vector.clone());
                    }
                }
                debug!(branch, nodes = fresh.hnsw.len(), "vector index rebuilt from storage");
            }
        }
        *self.inner.indexes.write() = fresh;
        Ok(())
    }
}

/// Read-only historical view returned by `as_of`.
pub struct AsOfView {
    handle: AsOfHandle,
    dim: usize,
}

impl std::fmt::Debug for AsOfView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsOfView")
            .field("handle", &self.handle)
            .field("dim", &self.dim)
            .finish()
    }
}

impl AsOfView {
    pub fn commit(&self) -> CommitId {
        self.handle.commit()
    }

    /// Fetch an entity as it was at this commit. Missing ancestry (a
    /// pruned commit chain) resolves to `Ok(None)`.
    pub async fn get(&self, id: &EntityId, include_vector: bool) -> Result<Option<Entity>> {
        let meta_path = entity_meta_path(id);
        let Some(bytes) = self.handle.resolve_read(&meta_path).await? else {
            return Ok(None);
        };
        let Some(mut entity) = EntityStore::decode_entity(&meta_path, &bytes)? else {
            return Ok(None);
        };
        if include_vector {
            let vector_path = entity_vector_path(id);
            if let Some(blob) = self.handle.resolve_read(&vector_path).await? {
                entity.vector = Some(
                    engram_core::decode_vector(&blob, Some(self.dim))
                        .map_err(|e| EngramError::Integrity(e.to_string()))?,
                );
            }
        }
        Ok(Some(entity))
    }
}
