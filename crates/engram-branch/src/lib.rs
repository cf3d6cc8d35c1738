//! Engram Branch - copy-on-write branching over any storage adapter.
//!
//! A branch is a named line with a parent pointer and a current-commit
//! pointer. Writes always land under the active branch's paths; reads
//! that miss fall through to the history sealed at the branch's fork
//! point, so sibling branches never observe each other's work. Commits
//! seal the session write set into an immutable record and copy the
//! touched blobs aside, which is also what makes historical reads
//! (`as_of`) independent of later branch writes.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use engram_core::{branch_key, branch_ref_path, commit_object_path, commit_record_path, CommitId};
use engram_storage::{StorageAdapter, StorageError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

mod merge;

pub use merge::{MergeConflict, MergeReport, MergeStrategy};

/// The default branch. Always present, never deletable.
pub const MAIN_BRANCH: &str = "main";

#[derive(Debug, Error)]
pub enum BranchError {
    #[error("branch not found: {0}")]
    BranchNotFound(String),

    #[error("commit not found: {0}")]
    CommitNotFound(CommitId),

    #[error("branch conflict: {0}")]
    Conflict(String),

    #[error("merge produced {} conflict(s)", conflicts.len())]
    MergeConflicts { conflicts: Vec<MergeConflict> },

    #[error("branch metadata corrupt: {0}")]
    Integrity(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub type Result<T> = std::result::Result<T, BranchError>;

/// Branch ref record, stored at `_system/branches/<name>.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchRef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tip: Option<CommitId>,
    pub created_at: DateTime<Utc>,
}

/// Immutable commit record, stored at `_system/commits/<id>.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitRecord {
    pub id: CommitId,
    pub branch: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<CommitId>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    pub message: String,
    /// Logical paths modified since the previous commit on this branch.
    pub manifest: Vec<String>,
}

pub struct BranchManager {
    storage: Arc<dyn StorageAdapter>,
    active: parking_lot::RwLock<String>,
}

impl BranchManager {
    /// Open against a storage adapter, creating `main` on first use.
    pub async fn open(storage: Arc<dyn StorageAdapter>) -> Result<Self> {
        let manager = Self { storage, active: parking_lot::RwLock::new(MAIN_BRANCH.to_string()) };
        if manager.read_branch(MAIN_BRANCH).await?.is_none() {
            let main = BranchRef {
                name: MAIN_BRANCH.to_string(),
                parent: None,
                tip: None,
                created_at: Utc::now(),
            };
            manager.write_branch(&main).await?;
            info!("initialised main branch");
        }
        Ok(manager)
    }

    pub fn storage(&self) -> &Arc<dyn StorageAdapter> {
        &self.storage
    }

    pub fn active_branch(&self) -> String {
        self.active.read().clone()
    }

    /// Physical storage key for a logical key in the active branch.
    pub fn physical_key(&self, logical: &str) -> String {
        branch_key(&self.active_branch(), logical)
    }

    async fn read_branch(&self, name: &str) -> Result<Option<BranchRef>> {
        let Some(bytes) = self.storage.read(&branch_ref_path(name)).await? else {
            return Ok(None);
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| BranchError::Integrity(format!("branch ref {name}: {e}")))
    }

    async fn write_branch(&self, branch: &BranchRef) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(branch)
            .map_err(|e| BranchError::Integrity(format!("branch ref {}: {e}", branch.name)))?;
        self.storage.write(&branch_ref_path(&branch.name), Bytes::from(bytes)).await?;
        Ok(())
    }

    pub async fn branch_ref(&self, name: &str) -> Result<BranchRef> {
        self.read_branch(name)
            .await?
            .ok_or_else(|| BranchError::BranchNotFound(name.to_string()))
    }

    pub async fn list_branches(&self) -> Result<Vec<BranchRef>> {
        let keys = self.storage.list("_system/branches/").await?;
        let mut branches = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(bytes) = self.storage.read(&key).await? {
                let branch: BranchRef = serde_json::from_slice(&bytes)
                    .map_err(|e| BranchError::Integrity(format!("branch ref {key}: {e}")))?;
                branches.push(branch);
            }
        }
        branches.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(branches)
    }

    /// O(1) fork: a new branch whose parent is the active branch at its
    /// current commit. No data is copied.
    pub async fn fork(&self, name: &str) -> Result<BranchRef> {
        if self.read_branch(name).await?.is_some() {
            return Err(BranchError::Conflict(format!("branch {name} already exists")));
        }
        let parent = self.active_branch();
        let parent_ref = self.branch_ref(&parent).await?;
        let branch = BranchRef {
            name: name.to_string(),
            parent: Some(parent),
            tip: parent_ref.tip,
            created_at: Utc::now(),
        };
        self.write_branch(&branch).await?;
        debug!(branch = name, parent = ?branch.parent, "forked branch");
        Ok(branch)
    }

    /// Switch the active branch.
    pub async fn checkout(&self, name: &str) -> Result<BranchRef> {
        let branch = self.branch_ref(name).await?;
        *self.active.write() = name.to_string();
        Ok(branch)
    }

    /// Delete a branch ref. `main` and branches with children stay.
    pub async fn delete_branch(&self, name: &str) -> Result<()> {
        if name == MAIN_BRANCH {
            return Err(BranchError::Conflict("main cannot be deleted".to_string()));
        }
        if self.active_branch() == name {
            return Err(BranchError::Conflict(format!("{name} is the active branch")));
        }
        self.branch_ref(name).await?;
        for other in self.list_branches().await? {
            if other.parent.as_deref() == Some(name) {
                return Err(BranchError::Conflict(format!(
                    "branch {name} has child branch {}",
                    other.name
                )));
            }
        }
        self.storage.delete(&branch_ref_path(name)).await?;
        Ok(())
    }

    /// Branch names from `name` to the root, detecting parent cycles.
    pub async fn parent_chain(&self, name: &str) -> Result<Vec<String>> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut current = Some(name.to_string());
        while let Some(branch_name) = current {
            if !seen.insert(branch_name.clone()) {
                return Err(BranchError::Integrity(format!(
                    "cycle in branch parent chain at {branch_name}"
                )));
            }
            let branch = self.branch_ref(&branch_name).await?;
            chain.push(branch_name);
            current = branch.parent;
        }
        Ok(chain)
    }

    /// Branch-aware read: try the active branch's own paths first, then
    /// resolve through the history sealed at the fork point. Because a
    /// fork sets the child's tip to the parent's tip, the commit chain
    /// is precisely the parent state at fork time: parent mutations
    /// after the fork never leak in. Tombstone interpretation is the
    /// caller's concern; the first hit shadows everything below it.
    pub async fn resolve_read(&self, logical: &str) -> Result<Option<Bytes>> {
        self.resolve_read_in(&self.active_branch(), logical).await
    }

    pub async fn resolve_read_in(&self, branch: &str, logical: &str) -> Result<Option<Bytes>> {
        if let Some(bytes) = self.storage.read(&branch_key(branch, logical)).await? {
            return Ok(Some(bytes));
        }
        let branch_ref = self.branch_ref(branch).await?;
        // Only inherited (pre-fork) history remains to consult. The
        // branch's own commits would have been found above.
        match branch_ref.tip {
            Some(tip) => self.resolve_at_commit(tip, logical).await,
            None => Ok(None),
        }
    }

    /// Batched branch-aware read. Returns logical-path-keyed results.
    pub async fn resolve_read_batch(
        &self,
        logicals: &[String],
    ) -> Result<std::collections::HashMap<String, Bytes>> {
        let branch = self.active_branch();
        let mut resolved = std::collections::HashMap::with_capacity(logicals.len());
        let physical: Vec<String> = logicals.iter().map(|l| branch_key(&branch, l)).collect();
        let hits = self.storage.read_batch(&physical).await?;
        let mut missing: Vec<String> = Vec::new();
        for logical in logicals {
            match hits.get(&branch_key(&branch, logical)) {
                Some(bytes) => {
                    resolved.insert(logical.clone(), bytes.clone());
                }
                None => missing.push(logical.clone()),
            }
        }
        if missing.is_empty() {
            return Ok(resolved);
        }
        // Walk the sealed history once for everything still missing.
        let branch_ref = self.branch_ref(&branch).await?;
        if let Some(tip) = branch_ref.tip {
            for record in self.commit_chain(tip).await? {
                if missing.is_empty() {
                    break;
                }
                let (touched, rest): (Vec<String>, Vec<String>) = missing
                    .into_iter()
                    .partition(|l| record.manifest.iter().any(|p| p == l));
                missing = rest;
                let object_paths: Vec<String> =
                    touched.iter().map(|l| commit_object_path(&record.id, l)).collect();
                let found = self.storage.read_batch(&object_paths).await?;
                for logical in touched {
                    if let Some(bytes) = found.get(&commit_object_path(&record.id, &logical)) {
                        resolved.insert(logical, bytes.clone());
                    }
                }
            }
        }
        Ok(resolved)
    }

    /// Resolve a logical path against the history reachable from one
    /// commit: the first manifest containing the path wins. A pruned
    /// ancestor ends the walk as NotFound.
    async fn resolve_at_commit(&self, tip: CommitId, logical: &str) -> Result<Option<Bytes>> {
        let mut seen = HashSet::new();
        let mut current = Some(tip);
        while let Some(id) = current {
            if !seen.insert(id) {
                return Err(BranchError::Integrity(format!("cycle in commit chain at {id}")));
            }
            let Some(record) = self.read_commit(&id).await? else {
                return Ok(None);
            };
            if record.manifest.iter().any(|p| p == logical) {
                return Ok(self.storage.read(&commit_object_path(&id, logical)).await?);
            }
            current = record.parent;
        }
        Ok(None)
    }

    pub async fn read_commit(&self, id: &CommitId) -> Result<Option<CommitRecord>> {
        let Some(bytes) = self.storage.read(&commit_record_path(id)).await? else {
            return Ok(None);
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| BranchError::Integrity(format!("commit record {id}: {e}")))
    }

    /// Seal `write_set` (logical paths touched since the last commit)
    /// into an immutable commit on `branch` and advance its tip. Each
    /// touched blob is copied to the commit's object area so historical
    /// reads survive later branch writes.
    pub async fn commit_on(
        &self,
        branch: &str,
        message: &str,
        author: Option<&str>,
        write_set: &[String],
    ) -> Result<CommitRecord> {
        let mut branch_ref = self.branch_ref(branch).await?;
        let id = CommitId::new();
        let mut manifest: Vec<String> = write_set.to_vec();
        manifest.sort();
        manifest.dedup();

        for logical in &manifest {
            // The blob was just written under this branch; a miss here
            // means the write set lied about the path.
            if let Some(bytes) = self.resolve_read_in(branch, logical).await? {
                self.storage.write(&commit_object_path(&id, logical), bytes).await?;
            }
        }

        let record = CommitRecord {
            id,
            branch: branch.to_string(),
            parent: branch_ref.tip,
            timestamp: Utc::now(),
            author: author.map(str::to_string),
            message: message.to_string(),
            manifest,
        };
        let bytes = serde_json::to_vec_pretty(&record)
            .map_err(|e| BranchError::Integrity(format!("commit record: {e}")))?;
        self.storage.write(&commit_record_path(&id), Bytes::from(bytes)).await?;

        branch_ref.tip = Some(id);
        self.write_branch(&branch_ref).await?;
        info!(%id, branch, paths = record.manifest.len(), "sealed commit");
        Ok(record)
    }

    pub async fn commit(
        &self,
        message: &str,
        author: Option<&str>,
        write_set: &[String],
    ) -> Result<CommitRecord> {
        self.commit_on(&self.active_branch(), message, author, write_set).await
    }

    /// Commit ids from `tip` back to the root commit.
    pub async fn commit_chain(&self, tip: CommitId) -> Result<Vec<CommitRecord>> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut current = Some(tip);
        while let Some(id) = current {
            if !seen.insert(id) {
                return Err(BranchError::Integrity(format!("cycle in commit chain at {id}")));
            }
            let Some(record) = self.read_commit(&id).await? else {
                // Pruned ancestry: the chain simply ends here.
                break;
            };
            current = record.parent;
            chain.push(record);
        }
        Ok(chain)
    }

    /// Read-only handle resolving against the snapshot sealed by
    /// `commit`. Missing ancestry resolves to NotFound.
    pub async fn as_of(&self, commit: CommitId) -> Result<AsOfHandle> {
        if self.read_commit(&commit).await?.is_none() {
            return Err(BranchError::CommitNotFound(commit));
        }
        Ok(AsOfHandle { storage: Arc::clone(&self.storage), commit })
    }
}

/// Read-only view of the database as of one commit. Resolution walks the
/// commit ancestry for the first manifest containing the logical path and
/// reads the blob copy that commit sealed.
pub struct AsOfHandle {
    storage: Arc<dyn StorageAdapter>,
    commit: CommitId,
}

impl std::fmt::Debug for AsOfHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsOfHandle").field("commit", &self.commit).finish()
    }
}

impl AsOfHandle {
    pub fn commit(&self) -> CommitId {
        self.commit
    }

    pub async fn resolve_read(&self, logical: &str) -> Result<Option<Bytes>> {
        let mut seen = HashSet::new();
        let mut current = Some(self.commit);
        while let Some(id) = current {
            if !seen.insert(id) {
                return Err(BranchError::Integrity(format!("cycle in commit chain at {id}")));
            }
            let Some(bytes) = self.storage.read(&commit_record_path(&id)).await? else {
                // Pruned ancestor: history before this point is gone.
                return Ok(None);
            };
            let record: CommitRecord = serde_json::from_slice(&bytes)
                .map_err(|e| BranchError::Integrity(format!("commit record {id}: {e}")))?;
            if record.manifest.iter().any(|p| p == logical) {
                return Ok(self.storage.read(&commit_object_path(&id, logical)).await?);
            }
            current = record.parent;
        }
        Ok(None)
    }
}
