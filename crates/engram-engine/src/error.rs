use engram_branch::BranchError;
use engram_core::CoreError;
use engram_storage::StorageError;
use engram_store::StoreError;
use thiserror::Error;

/// Engine-level error taxonomy. Lower layers keep their own enums; this
/// is the shape callers of the public API see.
#[derive(Debug, Error)]
pub enum EngramError {
    /// Rejected at the API boundary before any state change. The message
    /// names the offending field and the accepted range.
    #[error("validation failed for `{field}`: {message}")]
    Validation { field: String, message: String },

    #[error("not found: {0}")]
    NotFound(String),

    /// Duplicate ids, busy branches, or merge conflicts under the manual
    /// strategy (which carries the conflicting paths).
    #[error("conflict: {message}")]
    Conflict { message: String, conflicting: Vec<String> },

    #[error("corrupted data: {0}")]
    Integrity(String),

    #[error("operation cancelled: {0}")]
    Cancelled(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("embedding failed: {0}")]
    Embedding(String),
}

impl EngramError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation { field: field.into(), message: message.into() }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict { message: message.into(), conflicting: Vec::new() }
    }
}

impl From<CoreError> for EngramError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::Validation { field, message } => Self::Validation { field, message },
            CoreError::Integrity { details } => Self::Integrity(details),
            CoreError::Serialization(msg) => Self::Integrity(msg),
        }
    }
}

impl From<StoreError> for EngramError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Integrity { path, details } => {
                Self::Integrity(format!("{path}: {details}"))
            }
            StoreError::Storage(inner) => Self::Storage(inner),
            StoreError::Branch(inner) => inner.into(),
        }
    }
}

impl From<BranchError> for EngramError {
    fn from(e: BranchError) -> Self {
        match e {
            BranchError::BranchNotFound(name) => Self::NotFound(format!("branch {name}")),
            BranchError::CommitNotFound(id) => Self::NotFound(format!("commit {id}")),
            BranchError::Conflict(message) => Self::Conflict { message, conflicting: Vec::new() },
            BranchError::MergeConflicts { conflicts } => Self::Conflict {
                message: format!("merge produced {} conflict(s)", conflicts.len()),
                conflicting: conflicts.into_iter().map(|c| c.path).collect(),
            },
            BranchError::Integrity(details) => Self::Integrity(details),
            BranchError::Storage(inner) => Self::Storage(inner),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngramError>;
