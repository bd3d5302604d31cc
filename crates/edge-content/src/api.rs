//! Content service operations.
//!
//! [`ContentApi`] is the seam between orchestration code and the transport:
//! [`HttpContentApi`](crate::HttpContentApi) talks to a real service and
//! [`MemoryContentApi`](crate::fakes::MemoryContentApi) backs tests.
//! Operations that the service runs asynchronously return the href of the
//! task to wait on.

use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use edge_jobs::Context;
use tokio::io::AsyncRead;

use crate::model::{
    Artifact, CompositeGuard, Distribution, Domain, FileRepository, HeaderGuard, NewCompositeGuard,
    NewDistribution, NewDomain, NewFileContent, NewFileRepository, NewHeaderGuard,
    NewOstreeRepository, NewRbacGuard, OstreeImportAll, OstreeRepository, RbacGuard, Task,
};
use crate::Result;

/// Domain that owns the domain objects themselves.
pub const DEFAULT_DOMAIN: &str = "default";

/// Href of an asynchronous task.
pub type TaskHref = String;

/// A ready-to-send multipart artifact upload.
pub struct ArtifactUpload {
    /// Digest of the file payload, used by the service to verify the upload.
    pub sha256: String,
    pub content_type: String,
    /// Exact length of the encoded body, envelope included.
    pub content_length: u64,
    pub body: Pin<Box<dyn AsyncRead + Send + Sync>>,
}

impl fmt::Debug for ArtifactUpload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArtifactUpload")
            .field("sha256", &self.sha256)
            .field("content_type", &self.content_type)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Typed CRUD over the content service. `domain` scopes every call except
/// the domain operations, which live in [`DEFAULT_DOMAIN`].
#[async_trait]
pub trait ContentApi: Send + Sync {
    // Domains
    async fn list_domains(&self, ctx: &Context, name: &str) -> Result<Vec<Domain>>;
    async fn create_domain(&self, ctx: &Context, domain: &NewDomain) -> Result<Domain>;
    async fn delete_domain(&self, ctx: &Context, href: &str) -> Result<TaskHref>;

    // Tasks
    async fn get_task(&self, ctx: &Context, domain: &str, href: &str) -> Result<Task>;

    // Artifacts
    async fn find_artifacts(&self, ctx: &Context, domain: &str, sha256: &str)
        -> Result<Vec<Artifact>>;
    async fn upload_artifact(
        &self,
        ctx: &Context,
        domain: &str,
        upload: ArtifactUpload,
    ) -> Result<Artifact>;

    // File repositories and content
    async fn list_file_repositories(
        &self,
        ctx: &Context,
        domain: &str,
        name: &str,
    ) -> Result<Vec<FileRepository>>;
    async fn create_file_repository(
        &self,
        ctx: &Context,
        domain: &str,
        repo: &NewFileRepository,
    ) -> Result<FileRepository>;
    async fn delete_file_repository(
        &self,
        ctx: &Context,
        domain: &str,
        href: &str,
    ) -> Result<TaskHref>;
    async fn create_file_content(
        &self,
        ctx: &Context,
        domain: &str,
        content: &NewFileContent,
    ) -> Result<TaskHref>;
    async fn delete_repository_version(
        &self,
        ctx: &Context,
        domain: &str,
        href: &str,
    ) -> Result<TaskHref>;

    // OSTree repositories
    async fn list_ostree_repositories(
        &self,
        ctx: &Context,
        domain: &str,
        name: &str,
    ) -> Result<Vec<OstreeRepository>>;
    async fn create_ostree_repository(
        &self,
        ctx: &Context,
        domain: &str,
        repo: &NewOstreeRepository,
    ) -> Result<OstreeRepository>;
    async fn import_all(
        &self,
        ctx: &Context,
        domain: &str,
        repo_href: &str,
        import: &OstreeImportAll,
    ) -> Result<TaskHref>;

    // Content guards
    async fn list_header_guards(
        &self,
        ctx: &Context,
        domain: &str,
        name: &str,
    ) -> Result<Vec<HeaderGuard>>;
    async fn create_header_guard(
        &self,
        ctx: &Context,
        domain: &str,
        guard: &NewHeaderGuard,
    ) -> Result<HeaderGuard>;
    async fn list_rbac_guards(&self, ctx: &Context, domain: &str, name: &str)
        -> Result<Vec<RbacGuard>>;
    async fn create_rbac_guard(
        &self,
        ctx: &Context,
        domain: &str,
        guard: &NewRbacGuard,
    ) -> Result<RbacGuard>;
    async fn list_composite_guards(
        &self,
        ctx: &Context,
        domain: &str,
        name: &str,
    ) -> Result<Vec<CompositeGuard>>;
    async fn create_composite_guard(
        &self,
        ctx: &Context,
        domain: &str,
        guard: &NewCompositeGuard,
    ) -> Result<CompositeGuard>;
    async fn delete_guard(&self, ctx: &Context, domain: &str, href: &str) -> Result<()>;

    // Distributions
    async fn list_distributions(
        &self,
        ctx: &Context,
        domain: &str,
        name: &str,
    ) -> Result<Vec<Distribution>>;
    async fn create_distribution(
        &self,
        ctx: &Context,
        domain: &str,
        distribution: &NewDistribution,
    ) -> Result<TaskHref>;
    async fn get_distribution(&self, ctx: &Context, domain: &str, href: &str)
        -> Result<Distribution>;
    async fn delete_distribution(&self, ctx: &Context, domain: &str, href: &str)
        -> Result<TaskHref>;
}
