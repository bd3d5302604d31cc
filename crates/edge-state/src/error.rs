//! Error types for edge-state

use thiserror::Error;

/// Errors from the build-result store
#[derive(Error, Debug)]
pub enum StorageError {
    /// Record not found
    #[error("repo build {id} not found")]
    NotFound { id: String },

    /// A record with this id already exists
    #[error("repo build {id} already exists")]
    Duplicate { id: String },

    /// Status change not allowed from the current status
    #[error("repo build {id} cannot move from {from} to {to}")]
    InvalidTransition { id: String, from: String, to: String },

    /// Backend failure
    #[error("storage backend failed: {0}")]
    Backend(String),

    /// Serialization error
    #[error("serialization failed: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}
