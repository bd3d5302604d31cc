//! Repository build orchestration.
//!
//! [`RepoBuilder::build`] publishes one OSTree commit tarball for an
//! organization's repository:
//!
//! 1. ensure the organization's domain
//! 2. ensure the shared staging file repository
//! 3. upload the tarball (deduplicated) and stage it as file content
//! 4. find or create the OSTree repository `{org}-{repo}`
//! 5. ensure the guard chain for the configured [`GuardMode`]
//! 6. find or create the distribution `{org}-{repo}` at `{org}/{repo}`
//! 7. import the artifact, resolve the URL, drop the staging version
//!
//! [`RepoBuilder::run`] wraps `build` with the tracked build record.
//!
//! [`GuardMode`]: edge_content::GuardMode

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use edge_content::model::{
    Artifact, Distribution, FileRepository, NewDistribution, NewFileContent, NewOstreeRepository,
    OstreeImportAll, OstreeRepository,
};
use edge_content::{
    ensure_domain, ensure_guard_chain, ensure_staging_repository, upload_file, wait_for_created,
    wait_for_task, ContentApi, ContentError,
};
use edge_jobs::Context;
use edge_state::{BuildResultStore, RepoBuildId, RepoBuildRecord};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn, Instrument};

use crate::config::BuildConfig;
use crate::error::{BuildError, Result};
use crate::naming::{distribution_base_path, repository_name, staged_tarball_path, with_basic_auth};
use crate::obs;

/// Budget for undoing a failed publish once its own context has expired.
pub const ROLLBACK_TIMEOUT: Duration = Duration::from_secs(120);

/// One repository publish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishRequest {
    /// Tracked record updated by [`RepoBuilder::run`].
    pub build_id: RepoBuildId,
    pub org_id: String,
    pub repo_id: String,
    /// OSTree commit tarball on local disk.
    pub tarball: PathBuf,
}

impl PublishRequest {
    pub fn new(build_id: RepoBuildId, org_id: &str, repo_id: &str, tarball: PathBuf) -> Self {
        Self {
            build_id,
            org_id: org_id.to_string(),
            repo_id: repo_id.to_string(),
            tarball,
        }
    }

    /// Request for an already tracked record.
    pub fn for_record(record: &RepoBuildRecord, tarball: PathBuf) -> Self {
        Self::new(record.id.clone(), &record.org_id, &record.repo_id, tarball)
    }

    fn validate(&self) -> Result<()> {
        for (field, value) in [("org_id", &self.org_id), ("repo_id", &self.repo_id)] {
            if value.trim().is_empty() {
                return Err(BuildError::InvalidRequest(format!("{field} is empty")));
            }
            if value.contains('/') {
                return Err(BuildError::InvalidRequest(format!(
                    "{field} must not contain '/': {value}"
                )));
            }
        }
        if self.tarball.as_os_str().is_empty() {
            return Err(BuildError::InvalidRequest("tarball path is empty".into()));
        }
        Ok(())
    }
}

/// Remote objects a successful publish ended up with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishOutcome {
    pub domain: String,
    pub artifact_href: String,
    pub repository_href: String,
    pub guard_href: String,
    pub distribution_href: String,
    /// Final URL, with credentials when configured.
    pub distribution_url: String,
    /// The distribution did not exist before this publish.
    pub distribution_created: bool,
}

/// Drives the content service through one publish.
pub struct RepoBuilder {
    api: Arc<dyn ContentApi>,
    store: Arc<dyn BuildResultStore>,
    config: BuildConfig,
}

impl RepoBuilder {
    pub fn new(
        api: Arc<dyn ContentApi>,
        store: Arc<dyn BuildResultStore>,
        config: BuildConfig,
    ) -> Result<Self> {
        config.validate().map_err(BuildError::InvalidConfig)?;
        Ok(Self { api, store, config })
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn BuildResultStore> {
        &self.store
    }

    /// Publish `req` and record the result on its build record.
    ///
    /// The record is saved as `BUILDING` before any remote call, then as
    /// `SUCCESS` with the distribution URL or `ERROR` with the error text.
    pub async fn run(&self, ctx: &Context, req: &PublishRequest) -> Result<PublishOutcome> {
        let span = obs::publish_span(req.build_id.as_str(), &req.org_id, &req.repo_id);
        self.run_tracked(ctx, req).instrument(span).await
    }

    async fn run_tracked(&self, ctx: &Context, req: &PublishRequest) -> Result<PublishOutcome> {
        let build_id = req.build_id.as_str();
        let mut record = self.store.load(&req.build_id).await?;
        record.mark_building()?;
        self.store.save(&record).await?;

        obs::emit_publish_started(build_id, &req.org_id, &req.repo_id);
        let started = Instant::now();

        match self.build(ctx, req).await {
            Ok(outcome) => {
                record.mark_success(&outcome.distribution_url)?;
                self.store.save(&record).await?;
                obs::emit_publish_finished(
                    build_id,
                    elapsed_ms(started),
                    &redacted_url(&outcome.distribution_url),
                );
                Ok(outcome)
            }
            Err(err) => {
                obs::emit_publish_failed(build_id, elapsed_ms(started), &err);
                record.mark_error(&err.to_string())?;
                if let Err(save_err) = self.store.save(&record).await {
                    error!(build_id, error = %save_err, "failed to record publish error");
                }
                Err(err)
            }
        }
    }

    /// Publish without touching the build record.
    #[instrument(skip_all, fields(org_id = %req.org_id, repo_id = %req.repo_id))]
    pub async fn build(&self, ctx: &Context, req: &PublishRequest) -> Result<PublishOutcome> {
        req.validate()?;
        let build_id = req.build_id.as_str();
        let api = self.api.as_ref();
        let mut steps = StepClock::new(build_id);

        let domain = ensure_domain(ctx, api, &req.org_id, &self.config.storage_class)
            .await?
            .into_inner()
            .name;
        steps.done("domain");

        let staging = self.ensure_staging_repository(ctx, &domain).await?;
        steps.done("staging_repository");

        let (artifact, staged_version) = self.stage_tarball(ctx, &domain, &staging, req).await?;
        steps.done("stage_tarball");

        let name = repository_name(&req.org_id, &req.repo_id);
        let repository = self.ensure_ostree_repository(ctx, &domain, &name).await?;
        steps.done("ostree_repository");

        let guard_href = ensure_guard_chain(
            ctx,
            api,
            &domain,
            &req.org_id,
            self.config.guard_mode,
            &self.config.turnpike_subject,
        )
        .await?;
        steps.done("guards");

        let (distribution, distribution_created) = self
            .ensure_distribution(ctx, &domain, req, &repository.pulp_href, &guard_href)
            .await?;
        steps.done("distribution");

        let published = self
            .import_and_cleanup(ctx, &domain, &name, &artifact, &repository, &staged_version)
            .await;
        if let Err(err) = published {
            if distribution_created && self.config.rollback_distribution {
                self.rollback_distribution(ctx, &domain, build_id, &distribution.pulp_href)
                    .await;
            }
            return Err(err);
        }
        steps.done("import");

        let distribution_url = self.final_url(&distribution);
        info!(
            domain = %domain,
            distribution = %distribution.pulp_href,
            created = distribution_created,
            "repository published"
        );

        Ok(PublishOutcome {
            domain,
            artifact_href: artifact.pulp_href,
            repository_href: repository.pulp_href,
            guard_href,
            distribution_href: distribution.pulp_href,
            distribution_url,
            distribution_created,
        })
    }

    /// Ensure the domain's staging file repository keeps a single version.
    ///
    /// A staging repository configured otherwise is recreated; it only ever
    /// holds uploads in transit.
    #[instrument(skip(self, ctx))]
    async fn ensure_staging_repository(
        &self,
        ctx: &Context,
        domain: &str,
    ) -> Result<FileRepository> {
        let ensured = ensure_staging_repository(
            ctx,
            self.api.as_ref(),
            domain,
            &self.config.staging_repo_name,
        )
        .await?;
        debug!(outcome = ensured.outcome(), "staging repository ready");
        Ok(ensured.into_inner())
    }

    /// Upload the tarball and add it to the staging repository.
    ///
    /// Returns the artifact and the staging repository version holding it.
    #[instrument(skip_all, fields(domain = %domain))]
    async fn stage_tarball(
        &self,
        ctx: &Context,
        domain: &str,
        staging: &FileRepository,
        req: &PublishRequest,
    ) -> Result<(Artifact, String)> {
        let api = self.api.as_ref();
        let artifact = upload_file(ctx, api, domain, &req.tarball).await?;

        let content = NewFileContent {
            repository: staging.pulp_href.clone(),
            artifact: artifact.pulp_href.clone(),
            relative_path: staged_tarball_path(
                &self.config.tarball_path_prefix,
                &req.org_id,
                &req.repo_id,
                &artifact.sha256,
            ),
        };
        let task = api.create_file_content(ctx, domain, &content).await?;
        let created = wait_for_task(ctx, api, domain, &task).await?;
        let version = created
            .into_iter()
            .find(|href| href.contains("/versions/"))
            .ok_or(BuildError::MissingResource {
                kind: "repository version",
                task,
            })?;

        debug!(artifact = %artifact.pulp_href, version = %version, "tarball staged");
        Ok((artifact, version))
    }

    #[instrument(skip(self, ctx))]
    async fn ensure_ostree_repository(
        &self,
        ctx: &Context,
        domain: &str,
        name: &str,
    ) -> Result<OstreeRepository> {
        let found = self.api.list_ostree_repositories(ctx, domain, name).await?;
        if let Some(existing) = at_most_one("ostree repository", name, found)? {
            return Ok(existing);
        }

        let new = NewOstreeRepository {
            name: name.to_string(),
        };
        match self.api.create_ostree_repository(ctx, domain, &new).await {
            Ok(created) => {
                info!(href = %created.pulp_href, "ostree repository created");
                Ok(created)
            }
            Err(err) if err.is_already_exists() => {
                let found = self.api.list_ostree_repositories(ctx, domain, name).await?;
                require_one("ostree repository", name, found)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Find or create the distribution; the flag is true when it was created.
    #[instrument(skip(self, ctx, req), fields(org_id = %req.org_id, repo_id = %req.repo_id))]
    async fn ensure_distribution(
        &self,
        ctx: &Context,
        domain: &str,
        req: &PublishRequest,
        repository_href: &str,
        guard_href: &str,
    ) -> Result<(Distribution, bool)> {
        let api = self.api.as_ref();
        let name = repository_name(&req.org_id, &req.repo_id);

        let found = api.list_distributions(ctx, domain, &name).await?;
        if let Some(existing) = at_most_one("distribution", &name, found)? {
            if existing.content_guard.as_deref() != Some(guard_href) {
                warn!(
                    href = %existing.pulp_href,
                    guard = ?existing.content_guard,
                    expected = %guard_href,
                    "distribution is gated by a different guard"
                );
            }
            return Ok((existing, false));
        }

        let new = NewDistribution {
            name: name.clone(),
            base_path: distribution_base_path(&req.org_id, &req.repo_id),
            content_guard: guard_href.to_string(),
            repository: repository_href.to_string(),
        };
        let task = match api.create_distribution(ctx, domain, &new).await {
            Ok(task) => task,
            Err(err) if err.is_already_exists() => {
                let found = api.list_distributions(ctx, domain, &name).await?;
                return Ok((require_one("distribution", &name, found)?, false));
            }
            Err(err) => return Err(err.into()),
        };
        let href = wait_for_created(ctx, api, domain, &task, "distribution").await?;
        let distribution = api.get_distribution(ctx, domain, &href).await?;
        info!(href = %distribution.pulp_href, base_url = %distribution.base_url, "distribution created");
        Ok((distribution, true))
    }

    /// Import the staged artifact and drop the staging version.
    async fn import_and_cleanup(
        &self,
        ctx: &Context,
        domain: &str,
        name: &str,
        artifact: &Artifact,
        repository: &OstreeRepository,
        staged_version: &str,
    ) -> Result<()> {
        let api = self.api.as_ref();
        let import = OstreeImportAll {
            artifact: artifact.pulp_href.clone(),
            repository_name: name.to_string(),
        };
        let task = api
            .import_all(ctx, domain, &repository.pulp_href, &import)
            .await?;
        wait_for_task(ctx, api, domain, &task).await?;
        debug!(repository = %repository.pulp_href, "commit imported");

        let task = api
            .delete_repository_version(ctx, domain, staged_version)
            .await?;
        wait_for_task(ctx, api, domain, &task).await?;
        debug!(version = %staged_version, "staging version deleted");
        Ok(())
    }

    /// Best-effort removal of a distribution this publish created.
    async fn rollback_distribution(&self, ctx: &Context, domain: &str, build_id: &str, href: &str) {
        let mut cleanup = Context::background().with_timeout(ROLLBACK_TIMEOUT);
        if let Some(id) = ctx.correlation_id() {
            cleanup = cleanup.with_correlation_id(id);
        }
        let api = self.api.as_ref();

        let result = match api.delete_distribution(&cleanup, domain, href).await {
            Ok(task) => wait_for_task(&cleanup, api, domain, &task).await.map(|_| ()),
            Err(err) => Err(err),
        };
        match result {
            Ok(()) => obs::emit_distribution_rolled_back(build_id, href),
            Err(err) => error!(build_id, href, error = %err, "distribution rollback failed"),
        }
    }

    fn final_url(&self, distribution: &Distribution) -> String {
        match &self.config.distribution_credentials {
            Some(creds) => with_basic_auth(&distribution.base_url, &creds.username, &creds.password),
            None => distribution.base_url.clone(),
        }
    }
}

/// `None` for no match, the match for one, a conflict for more.
fn at_most_one<T>(kind: &'static str, key: &str, mut found: Vec<T>) -> Result<Option<T>> {
    match found.len() {
        0 => Ok(None),
        1 => Ok(found.pop()),
        count => Err(ContentError::Conflict {
            kind,
            key: key.to_string(),
            count,
        }
        .into()),
    }
}

fn require_one<T>(kind: &'static str, key: &str, found: Vec<T>) -> Result<T> {
    at_most_one(kind, key, found)?.ok_or_else(|| {
        ContentError::NotFound {
            kind,
            key: key.to_string(),
        }
        .into()
    })
}

/// Strip `user:password@` from a URL before logging it.
fn redacted_url(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    let authority = &rest[..rest.find('/').unwrap_or(rest.len())];
    match authority.rfind('@') {
        Some(at) => format!("{scheme}://***@{}", &rest[at + 1..]),
        None => url.to_string(),
    }
}

fn elapsed_ms(since: Instant) -> u64 {
    u64::try_from(since.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Emits one step event per completed stage.
struct StepClock<'a> {
    build_id: &'a str,
    last: Instant,
}

impl<'a> StepClock<'a> {
    fn new(build_id: &'a str) -> Self {
        Self {
            build_id,
            last: Instant::now(),
        }
    }

    fn done(&mut self, step: &str) {
        obs::emit_step_completed(self.build_id, step, elapsed_ms(self.last));
        self.last = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_credentials() {
        assert_eq!(
            redacted_url("https://u:p@cdn.example.com/a/"),
            "https://***@cdn.example.com/a/"
        );
        assert_eq!(
            redacted_url("https://cdn.example.com/a/"),
            "https://cdn.example.com/a/"
        );
    }

    #[test]
    fn request_rejects_path_separators() {
        let req = PublishRequest::new(RepoBuildId::new(), "42", "a/b", PathBuf::from("x.tar"));
        assert!(matches!(req.validate(), Err(BuildError::InvalidRequest(_))));
    }

    #[test]
    fn duplicates_are_conflicts() {
        let err = at_most_one("distribution", "42-r", vec![1, 2]).unwrap_err();
        assert!(matches!(
            err,
            BuildError::Content(ContentError::Conflict { count: 2, .. })
        ));
        assert_eq!(at_most_one::<u8>("d", "k", vec![]).unwrap(), None);
    }
}
