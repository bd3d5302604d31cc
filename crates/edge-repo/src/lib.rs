//! Edge-Repo: build and publish OSTree repositories for edge fleets
//!
//! Turns an OSTree commit tarball into a guarded distribution on the content
//! service, as a background job with a tracked build record.
//!
//! ## Key Components
//!
//! - [`RepoBuilder`]: the publish pipeline (domain, staging, upload, repo,
//!   guards, distribution, import)
//! - [`jobs`]: typed job payloads and the publish job handlers
//! - [`telemetry`] / [`obs`]: subscriber setup and lifecycle events

pub mod config;
mod error;
pub mod jobs;
pub mod naming;
pub mod obs;
pub mod pipeline;
pub mod telemetry;

pub use config::{BuildConfig, DistributionCredentials};
pub use error::{BuildError, Result};
pub use jobs::{
    enqueue_publish, register_publish_handlers, PublishFailureHandler, PublishHandler,
    RepoJobArgs, PUBLISH_REPO,
};
pub use obs::publish_span;
pub use pipeline::{PublishOutcome, PublishRequest, RepoBuilder};
pub use telemetry::{init_tracing, LogFormat};
