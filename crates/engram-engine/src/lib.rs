//! Engram Engine - the public database surface.
//!
//! An `Engram` database unifies three retrieval paths over one entity
//! set: approximate nearest-neighbor search over embeddings, metadata
//! filtering, and typed graph traversal, fused by a single `find` call.
//! Underneath sit content-addressed sharded storage, an undo-based
//! transaction manager, and copy-on-write branching.
//!
//! ```no_run
//! use engram_engine::{Database, EngramConfig};
//! use engram_core::{EntityDraft, NounType};
//! use engram_storage::MemoryAdapter;
//! use std::sync::Arc;
//!
//! # async fn demo() -> engram_engine::Result<()> {
//! let db = Database::open(Arc::new(MemoryAdapter::new()), EngramConfig::default()).await?;
//! let id = db
//!     .add(NounType::Document, EntityDraft::with_vector(vec![0.1; 384]))
//!     .await?;
//! let entity = db.get(&id, false).await?;
//! assert!(entity.is_some());
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;

mod batch;
mod cache;
mod config;
mod database;
mod error;
mod find;
mod state;
mod txn;

pub use batch::{AddRequest, BatchFailure, BatchOptions, BatchReport};
pub use config::EngramConfig;
pub use database::{
    AsOfView, CommitOptions, Database, RelateOptions, SimilarParams, UpdateRequest,
};
pub use error::{EngramError, Result};
pub use state::RelationQuery;

// The types callers hold when talking to the engine.
pub use engram_branch::{BranchRef, CommitRecord, MergeReport, MergeStrategy};
pub use engram_core::{
    CommitId, DistanceMetric, Entity, EntityDraft, EntityId, Filter, MetadataBag, MetadataValue,
    NounType, Relationship, RelationshipDraft, RelationshipId, SortOrder, VerbType,
};
pub use engram_graph::Direction;
pub use engram_query::{FindParams, FindResult, GraphConstraint, OrderBy, ScoreExplain, SearchMode};

/// Text-to-vector hook. The engine never loads models; an application
/// supplies this (or pre-computed vectors) and the engine does the rest.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, String>;
}
