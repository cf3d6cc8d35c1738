//! Engram Core - Entity/relationship data model, canonical paths and the
//! structured filter grammar shared by every other crate in the workspace.

mod entity;
mod error;
mod filter;
mod id;
mod paths;
mod taxonomy;
mod value;
mod vector;

pub use entity::{Entity, EntityDraft, Relationship, RelationshipDraft, RESERVED_KEYS};
pub use error::{CoreError, Result};
pub use filter::{Filter, FieldOp, SortOrder};
pub use id::{CommitId, EntityId, RelationshipId};
pub use paths::{
    branch_key, branch_ref_path, commit_object_path, commit_record_path, entity_meta_path,
    entity_vector_path, index_path, verb_meta_path, BRANCHES_PREFIX, COMMITS_PREFIX,
    NOUNS_PREFIX, SYSTEM_PREFIX, VERBS_PREFIX,
};
pub use taxonomy::{NounType, VerbType};
pub use value::{MetadataBag, MetadataValue};
pub use vector::{decode_vector, encode_vector, vector_blob_len, DType, VECTOR_MAGIC};

/// Default embedding dimensionality when none is configured.
pub const DEFAULT_DIMENSION: usize = 384;

/// Distance metric used by the vector index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DistanceMetric {
    /// Cosine similarity over L2-normalised vectors.
    #[default]
    Cosine,
    /// Raw inner product.
    InnerProduct,
}
