use thiserror::Error;

/// Core error types for Engram's data model layer
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("validation failed for `{field}`: {message}")]
    Validation { field: String, message: String },

    #[error("integrity check failed: {details}")]
    Integrity { details: String },

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl CoreError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation { field: field.into(), message: message.into() }
    }

    pub fn integrity(details: impl Into<String>) -> Self {
        Self::Integrity { details: details.into() }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
