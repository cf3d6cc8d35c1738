//! Canonical storage paths. The shard prefix is derivable from the id
//! alone, so reads never need a type-to-path lookup. Logical paths are
//! branch-relative; `branch_key` maps them to the physical key for a given
//! branch, and commit snapshots live under `_system/commits/`.

use crate::{CommitId, EntityId, RelationshipId};

pub const NOUNS_PREFIX: &str = "entities/nouns";
pub const VERBS_PREFIX: &str = "entities/verbs";
pub const SYSTEM_PREFIX: &str = "_system";
pub const BRANCHES_PREFIX: &str = "_system/branches";
pub const COMMITS_PREFIX: &str = "_system/commits";

/// `entities/nouns/<shard>/<id>/metadata.json`
pub fn entity_meta_path(id: &EntityId) -> String {
    format!("{NOUNS_PREFIX}/{}/{id}/metadata.json", id.shard())
}

/// `entities/nouns/<shard>/<id>/vector.bin`
pub fn entity_vector_path(id: &EntityId) -> String {
    format!("{NOUNS_PREFIX}/{}/{id}/vector.bin", id.shard())
}

/// `entities/verbs/<shard>/<id>/metadata.json`
pub fn verb_meta_path(id: &RelationshipId) -> String {
    format!("{VERBS_PREFIX}/{}/{id}/metadata.json", id.shard())
}

/// `_system/indexes/<index-name>/...`
pub fn index_path(index_name: &str, file: &str) -> String {
    format!("{SYSTEM_PREFIX}/indexes/{index_name}/{file}")
}

/// `_system/branches/<name>.json`
pub fn branch_ref_path(name: &str) -> String {
    format!("{BRANCHES_PREFIX}/{name}.json")
}

/// `_system/commits/<commit-id>.json`
pub fn commit_record_path(id: &CommitId) -> String {
    format!("{COMMITS_PREFIX}/{id}.json")
}

/// Historical copy of a logical key sealed by a commit:
/// `_system/commits/<commit-id>/objects/<logical>`.
pub fn commit_object_path(id: &CommitId, logical: &str) -> String {
    format!("{COMMITS_PREFIX}/{id}/objects/{logical}")
}

/// Physical key for a logical key in a branch:
/// `branches/<branch>/<logical>`.
pub fn branch_key(branch: &str, logical: &str) -> String {
    format!("branches/{branch}/{logical}")
}
