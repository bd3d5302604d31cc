//! Error types for edge-repo

use edge_content::ContentError;
use edge_state::StorageError;
use thiserror::Error;

/// Errors that can occur while building and publishing a repository
#[derive(Error, Debug)]
pub enum BuildError {
    /// The publish request is unusable
    #[error("invalid publish request: {0}")]
    InvalidRequest(String),

    /// Publishing configuration is inconsistent
    #[error("invalid build configuration: {0}")]
    InvalidConfig(String),

    /// A completed task did not report the resource the pipeline needs
    #[error("task {task} did not create a {kind}")]
    MissingResource { kind: &'static str, task: String },

    /// Content service failure
    #[error("content service: {0}")]
    Content(#[from] ContentError),

    /// Build-result store failure
    #[error("build store: {0}")]
    Storage(#[from] StorageError),
}

/// Result type for edge-repo operations
pub type Result<T> = std::result::Result<T, BuildError>;
