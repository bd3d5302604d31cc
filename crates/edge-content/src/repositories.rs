//! File repositories used to stage uploads.

use async_trait::async_trait;
use edge_jobs::Context;
use tracing::debug;

use crate::api::ContentApi;
use crate::ensure::{ensure, Ensurable, Ensured};
use crate::error::ContentError;
use crate::model::{FileRepository, NewFileRepository};
use crate::tasks::wait_for_task;
use crate::Result;

/// Staging repositories keep only their newest version.
pub const STAGING_RETAINED_VERSIONS: u32 = 1;

/// Desired configuration of a file repository.
#[derive(Debug, Clone, PartialEq)]
pub struct FileRepositorySpec {
    pub domain: String,
    pub name: String,
    pub retain_repo_versions: u32,
}

impl FileRepositorySpec {
    /// Scratch repository that holds one staged upload at a time.
    pub fn staging(domain: &str, name: &str) -> Self {
        FileRepositorySpec {
            domain: domain.to_string(),
            name: name.to_string(),
            retain_repo_versions: STAGING_RETAINED_VERSIONS,
        }
    }
}

#[async_trait]
impl Ensurable for FileRepositorySpec {
    type Resource = FileRepository;

    fn kind(&self) -> &'static str {
        "file repository"
    }

    fn key(&self) -> &str {
        &self.name
    }

    async fn list(&self, ctx: &Context, api: &dyn ContentApi) -> Result<Vec<FileRepository>> {
        Ok(api
            .list_file_repositories(ctx, &self.domain, &self.name)
            .await?
            .into_iter()
            .filter(|r| r.name == self.name)
            .collect())
    }

    async fn create(&self, ctx: &Context, api: &dyn ContentApi) -> Result<FileRepository> {
        let new = NewFileRepository {
            name: self.name.clone(),
            retain_repo_versions: self.retain_repo_versions,
        };
        match api.create_file_repository(ctx, &self.domain, &new).await {
            Ok(created) => Ok(created),
            Err(err) if err.is_already_exists() => {
                // Created concurrently by another publish.
                debug!(name = %self.name, "file repository appeared, re-reading");
                let mut found = self.list(ctx, api).await?;
                match found.len() {
                    1 => Ok(found.remove(0)),
                    0 => Err(ContentError::NotFound {
                        kind: "file repository",
                        key: self.name.clone(),
                    }),
                    count => Err(ContentError::Conflict {
                        kind: "file repository",
                        key: self.name.clone(),
                        count,
                    }),
                }
            }
            Err(err) => Err(err),
        }
    }

    async fn delete(
        &self,
        ctx: &Context,
        api: &dyn ContentApi,
        existing: &FileRepository,
    ) -> Result<()> {
        let task = api
            .delete_file_repository(ctx, &self.domain, &existing.pulp_href)
            .await?;
        wait_for_task(ctx, api, &self.domain, &task).await?;
        Ok(())
    }

    fn matches(&self, existing: &FileRepository) -> bool {
        existing.retain_repo_versions == Some(self.retain_repo_versions)
    }
}

/// Ensure the domain's staging repository exists and keeps one version.
pub async fn ensure_staging_repository(
    ctx: &Context,
    api: &dyn ContentApi,
    domain: &str,
    name: &str,
) -> Result<Ensured<FileRepository>> {
    ensure(ctx, api, &FileRepositorySpec::staging(domain, name)).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo(retain: Option<u32>) -> FileRepository {
        FileRepository {
            pulp_href: "/api/pulp/em1d/api/v3/repositories/file/file/1/".into(),
            name: "ostree-staging".into(),
            latest_version_href: None,
            retain_repo_versions: retain,
        }
    }

    #[test]
    fn staging_keeps_exactly_one_version() {
        let spec = FileRepositorySpec::staging("em1d", "ostree-staging");
        assert!(spec.matches(&repo(Some(1))));
        assert!(!spec.matches(&repo(Some(5))));
        // Unset means unlimited retention.
        assert!(!spec.matches(&repo(None)));
    }
}
