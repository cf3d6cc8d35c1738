//! Branch merging. Changes are tracked at commit-manifest granularity:
//! the set of logical paths touched in `src` since the common ancestor is
//! re-applied onto `dst`, with conflicts (paths touched on both sides)
//! resolved last-write-wins or surfaced for manual resolution.

use crate::{BranchError, BranchManager, CommitRecord, Result};
use chrono::{DateTime, Utc};
use engram_core::{branch_key, CommitId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MergeStrategy {
    /// The side whose last touch is newer wins, per path.
    #[default]
    LastWriteWins,
    /// Any conflicting path aborts the merge and is reported.
    Manual,
}

/// A path modified on both sides since the common ancestor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeConflict {
    pub path: String,
    pub src_commit: CommitId,
    pub src_timestamp: DateTime<Utc>,
    pub dst_commit: CommitId,
    pub dst_timestamp: DateTime<Utc>,
}

#[derive(Debug)]
pub struct MergeReport {
    /// Paths copied from src into dst.
    pub applied: Vec<String>,
    /// Conflicting paths where dst won under last-write-wins.
    pub kept: Vec<String>,
    /// The commit sealed on dst, if anything was applied.
    pub commit: Option<CommitRecord>,
}

/// Last touch per logical path in the commits from a tip down to (not
/// including) the common ancestor. Newest-first walk, first touch wins.
fn changes_since(
    chain: &[CommitRecord],
    ancestor: Option<CommitId>,
) -> HashMap<String, (CommitId, DateTime<Utc>)> {
    let mut changes = HashMap::new();
    for record in chain {
        if Some(record.id) == ancestor {
            break;
        }
        for path in &record.manifest {
            changes
                .entry(path.clone())
                .or_insert((record.id, record.timestamp));
        }
    }
    changes
}

impl BranchManager {
    /// Merge committed changes from `src` into `dst`.
    pub async fn merge(
        &self,
        src: &str,
        dst: &str,
        strategy: MergeStrategy,
    ) -> Result<MergeReport> {
        let src_ref = self.branch_ref(src).await?;
        let dst_ref = self.branch_ref(dst).await?;

        let src_chain = match src_ref.tip {
            Some(tip) => self.commit_chain(tip).await?,
            None => Vec::new(),
        };
        let dst_chain = match dst_ref.tip {
            Some(tip) => self.commit_chain(tip).await?,
            None => Vec::new(),
        };

        let dst_ids: std::collections::HashSet<CommitId> =
            dst_chain.iter().map(|c| c.id).collect();
        let ancestor = src_chain.iter().map(|c| c.id).find(|id| dst_ids.contains(id));

        let src_changes = changes_since(&src_chain, ancestor);
        let dst_changes = changes_since(&dst_chain, ancestor);

        let mut conflicts = Vec::new();
        let mut winners: Vec<String> = Vec::new();
        let mut kept: Vec<String> = Vec::new();
        for (path, (src_commit, src_ts)) in &src_changes {
            match dst_changes.get(path) {
                None => winners.push(path.clone()),
                Some((dst_commit, dst_ts)) => match strategy {
                    MergeStrategy::Manual => conflicts.push(MergeConflict {
                        path: path.clone(),
                        src_commit: *src_commit,
                        src_timestamp: *src_ts,
                        dst_commit: *dst_commit,
                        dst_timestamp: *dst_ts,
                    }),
                    MergeStrategy::LastWriteWins => {
                        if src_ts >= dst_ts {
                            winners.push(path.clone());
                        } else {
                            kept.push(path.clone());
                        }
                    }
                },
            }
        }

        if !conflicts.is_empty() {
            conflicts.sort_by(|a, b| a.path.cmp(&b.path));
            return Err(BranchError::MergeConflicts { conflicts });
        }

        winners.sort();
        kept.sort();
        for path in &winners {
            let Some(bytes) = self.resolve_read_in(src, path).await? else {
                debug!(path, src, "merge source path vanished, skipping");
                continue;
            };
            self.storage().write(&branch_key(dst, path), bytes).await?;
        }

        let commit = if winners.is_empty() {
            None
        } else {
            Some(
                self.commit_on(dst, &format!("merge {src} into {dst}"), None, &winners)
                    .await?,
            )
        };
        info!(src, dst, applied = winners.len(), kept = kept.len(), "merged branches");
        Ok(MergeReport { applied: winners, kept, commit })
    }
}
