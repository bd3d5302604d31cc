//! Edge-State: tracked build results for repository publishing
//!
//! The persistence seam between the publish pipeline and whatever database
//! holds repository build status.
//!
//! ## Key Components
//!
//! - `RepoBuildRecord`: one build, `BUILDING -> SUCCESS | ERROR`
//! - `BuildResultStore`: async load/save trait
//! - `fakes::MemoryBuildResultStore`: in-memory implementation

mod error;
pub mod fakes;
pub mod storage_traits;

pub use error::StorageError;
pub use storage_traits::{
    BuildResultStore, RepoBuildId, RepoBuildRecord, RepoBuildStatus, StorageResult,
};
