//! Edge-Content: client for the multi-tenant content service
//!
//! Everything the repository publisher needs from the content service:
//! typed CRUD, idempotent ensure of domains and guards, deduplicated
//! streaming artifact upload and backoff-based task waiting.
//!
//! ## Key Components
//!
//! - [`ContentApi`]: the operation seam, with [`HttpContentApi`] and
//!   [`fakes::MemoryContentApi`] implementations
//! - [`ensure()`]: find, create, or repair drift for one remote object
//!   (domains, guards and the staging file repository)
//! - [`upload_file`]: hash, dedup and stream a file as an artifact
//! - [`wait_for_task`]: poll an async task with exponential backoff

pub mod api;
pub mod auth;
pub mod backoff;
pub mod config;
pub mod domains;
pub mod ensure;
mod error;
pub mod fakes;
pub mod guards;
pub mod http;
pub mod model;
pub mod multipart;
pub mod repositories;
pub mod tasks;
pub mod upload;

pub use api::{ArtifactUpload, ContentApi, TaskHref, DEFAULT_DOMAIN};
pub use auth::Credentials;
pub use backoff::Backoff;
pub use config::ContentConfig;
pub use domains::{domain_name, ensure_domain, DomainSpec};
pub use ensure::{ensure, Ensurable, Ensured};
pub use error::{ContentError, MAX_ERROR_BODY};
pub use guards::{ensure_guard_chain, same_guard_set, GuardMode};
pub use http::HttpContentApi;
pub use repositories::{ensure_staging_repository, FileRepositorySpec};
pub use tasks::{wait_for_created, wait_for_task, wait_for_task_with};
pub use upload::{hash_file, upload_file};

/// Result type for edge-content operations
pub type Result<T> = std::result::Result<T, ContentError>;
