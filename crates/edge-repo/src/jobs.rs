//! Background job payloads and handlers for repository publishing.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use async_trait::async_trait;
use edge_jobs::{
    Context, FailureHandler, Identity, Job, JobFailure, JobHandler, JobId, JobType, Worker,
};
use edge_state::{BuildResultStore, RepoBuildRecord, RepoBuildStatus};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::error::Result;
use crate::pipeline::{PublishRequest, RepoBuilder};

/// Job type of a repository publish.
pub const PUBLISH_REPO: &str = "publish_repo";

/// Payloads of every job this crate handles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RepoJobArgs {
    Publish(PublishRequest),
}

impl RepoJobArgs {
    /// Job type the payload is registered under.
    pub fn job_type(&self) -> JobType {
        match self {
            RepoJobArgs::Publish(_) => JobType::new(PUBLISH_REPO),
        }
    }

    pub fn into_job(self) -> Job<RepoJobArgs> {
        Job::new(self.job_type(), self)
    }
}

/// Runs [`RepoBuilder::run`] for publish jobs.
pub struct PublishHandler {
    builder: Arc<RepoBuilder>,
}

impl PublishHandler {
    pub fn new(builder: Arc<RepoBuilder>) -> Self {
        Self { builder }
    }
}

#[async_trait]
impl JobHandler<RepoJobArgs> for PublishHandler {
    async fn handle(&self, ctx: &Context, job: &Job<RepoJobArgs>) -> anyhow::Result<()> {
        let RepoJobArgs::Publish(req) = &job.args;
        let outcome = self
            .builder
            .run(ctx, req)
            .await
            .with_context(|| {
                format!(
                    "publishing {}-{} (build {})",
                    req.org_id, req.repo_id, req.build_id
                )
            })?;
        info!(
            job_id = %job.id,
            build_id = %req.build_id,
            distribution = %outcome.distribution_href,
            "publish job done"
        );
        Ok(())
    }
}

/// Marks the build record `ERROR` when a publish job panics, times out or is
/// cancelled.
///
/// Records that already reached a terminal state are left alone.
pub struct PublishFailureHandler {
    store: Arc<dyn BuildResultStore>,
}

impl PublishFailureHandler {
    pub fn new(store: Arc<dyn BuildResultStore>) -> Self {
        Self { store }
    }

    async fn mark_failed(&self, req: &PublishRequest, failure: &JobFailure) -> Result<bool> {
        let mut record = self.store.load(&req.build_id).await?;
        if record.status != RepoBuildStatus::Building {
            return Ok(false);
        }
        record.mark_error(&failure.to_string())?;
        self.store.save(&record).await?;
        Ok(true)
    }
}

#[async_trait]
impl FailureHandler<RepoJobArgs> for PublishFailureHandler {
    async fn on_failure(&self, _ctx: &Context, job: &Job<RepoJobArgs>, failure: &JobFailure) {
        let RepoJobArgs::Publish(req) = &job.args;
        match self.mark_failed(req, failure).await {
            Ok(true) => warn!(
                job_id = %job.id,
                build_id = %req.build_id,
                failure = %failure,
                "publish job failed, build marked ERROR"
            ),
            Ok(false) => info!(
                job_id = %job.id,
                build_id = %req.build_id,
                failure = %failure,
                "publish job failed after its build was already settled"
            ),
            Err(err) => error!(
                job_id = %job.id,
                build_id = %req.build_id,
                error = %err,
                "failed to mark build ERROR"
            ),
        }
    }
}

/// Register the publish handlers on `worker`.
pub fn register_publish_handlers(
    worker: &dyn Worker<RepoJobArgs>,
    builder: Arc<RepoBuilder>,
) -> edge_jobs::Result<()> {
    let failure = PublishFailureHandler::new(Arc::clone(builder.store()));
    worker.register_handlers(
        JobType::new(PUBLISH_REPO),
        Arc::new(PublishHandler::new(builder)),
        Arc::new(failure),
    )
}

/// Track a new build and queue its publish job.
///
/// The record is created `BUILDING` before the job is queued so callers can
/// poll it straight away.
pub async fn enqueue_publish(
    ctx: &Context,
    worker: &dyn Worker<RepoJobArgs>,
    store: &dyn BuildResultStore,
    org_id: &str,
    repo_id: &str,
    tarball: PathBuf,
    identity: Identity,
) -> anyhow::Result<(RepoBuildRecord, JobId)> {
    let record = RepoBuildRecord::new(org_id, repo_id);
    store
        .create(&record)
        .await
        .context("tracking new build")?;

    let mut job = RepoJobArgs::Publish(PublishRequest::for_record(&record, tarball))
        .into_job()
        .with_identity(identity);
    if let Some(id) = ctx.correlation_id() {
        job = job.with_correlation_id(id);
    }

    let job_id = worker.enqueue(ctx, job).await.context("queueing publish job")?;
    info!(job_id = %job_id, build_id = %record.id, org_id, repo_id, "publish queued");
    Ok((record, job_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use edge_state::RepoBuildId;

    #[test]
    fn args_carry_their_job_type() {
        let args = RepoJobArgs::Publish(PublishRequest::new(
            RepoBuildId::new(),
            "42",
            "fleet",
            PathBuf::from("/tmp/commit.tar"),
        ));
        let job = args.clone().into_job();
        assert_eq!(job.job_type.as_str(), PUBLISH_REPO);
        assert_eq!(job.args, args);
    }

    #[test]
    fn args_serialize_tagged() {
        let args = RepoJobArgs::Publish(PublishRequest::new(
            RepoBuildId("b1".into()),
            "42",
            "fleet",
            PathBuf::from("/tmp/commit.tar"),
        ));
        let json = serde_json::to_value(&args).unwrap();
        assert_eq!(json["kind"], "publish");
        assert_eq!(json["org_id"], "42");
    }
}
