//! Inline worker for development and tests.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::context::Context;
use crate::error::{JobError, Result};
use crate::handler::{FailureHandler, HandlerRegistry, JobHandler};
use crate::job::{Job, JobId, JobType};
use crate::worker::{Stats, Worker};

/// Runs each job synchronously inside `enqueue`.
///
/// The failure handler is registered but never invoked, and a panicking
/// handler unwinds into the caller of `enqueue`. `start` and `stop` do
/// nothing and stats are always zero.
pub struct DummyWorker<A> {
    registry: Arc<RwLock<HandlerRegistry<A>>>,
    timeout: Duration,
}

impl<A> Clone for DummyWorker<A> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            timeout: self.timeout,
        }
    }
}

impl<A> DummyWorker<A> {
    pub fn new(timeout: Duration) -> Self {
        Self {
            registry: Arc::new(RwLock::new(HandlerRegistry::new())),
            timeout,
        }
    }
}

#[async_trait]
impl<A> Worker<A> for DummyWorker<A>
where
    A: Clone + Send + Sync + 'static,
{
    fn register_handlers(
        &self,
        job_type: JobType,
        handler: Arc<dyn JobHandler<A>>,
        failure: Arc<dyn FailureHandler<A>>,
    ) -> Result<()> {
        self.registry
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .register(job_type, handler, failure)
    }

    async fn enqueue(&self, ctx: &Context, mut job: Job<A>) -> Result<JobId> {
        if let Some(err) = ctx.err() {
            return Err(JobError::Context(err));
        }
        let id = job.ensure_id();
        let handlers = self
            .registry
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&job.job_type)
            .cloned();

        let Some(handlers) = handlers else {
            warn!(job_id = %id, job_type = %job.job_type, "no handler registered, dropping job");
            return Ok(id);
        };

        let mut job_ctx = ctx.with_timeout(self.timeout);
        if !job.correlation_id.is_empty() {
            job_ctx = job_ctx.with_correlation_id(job.correlation_id.clone());
        }
        if let Err(err) = handlers.handler.handle(&job_ctx, &job).await {
            warn!(job_id = %id, error = %err, "job handler returned an error");
        }
        job_ctx.cancel();
        debug!(job_id = %id, "job processed inline");
        Ok(id)
    }

    fn start(&self, _ctx: &Context) -> Result<()> {
        Ok(())
    }

    async fn stop(&self) {}

    async fn stats(&self, _ctx: &Context) -> Result<Stats> {
        Ok(Stats::default())
    }
}
