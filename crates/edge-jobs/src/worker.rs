//! The worker interface shared by the pooled engine and the inline dummy.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::context::Context;
use crate::error::Result;
use crate::handler::{FailureHandler, JobHandler};
use crate::job::{Job, JobId, JobType};

/// Eventually-consistent snapshot of queue and worker occupancy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    /// Jobs sitting in the queue, not yet picked up by a worker.
    pub enqueued: i64,
    /// Jobs currently being handled.
    pub active: i64,
}

/// Configuration for [`MemoryWorker`](crate::MemoryWorker).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Number of concurrent workers; fixed for the lifetime of the engine.
    pub workers: usize,
    /// Capacity of the bounded job queue. `enqueue` blocks when it is full.
    pub queue_size: usize,
    /// Per-job timeout applied to every handler invocation.
    pub timeout: Duration,
    /// Stop the engine on Ctrl-C.
    pub handle_interrupt: bool,
    /// How often queue/active gauges are published to the metrics sink.
    pub stats_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            workers: 5,
            queue_size: 100,
            timeout: Duration::from_secs(30 * 60),
            handle_interrupt: true,
            stats_interval: Duration::from_secs(1),
        }
    }
}

impl WorkerConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_queue_size(mut self, queue_size: usize) -> Self {
        self.queue_size = queue_size;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_interrupt_handling(mut self, enabled: bool) -> Self {
        self.handle_interrupt = enabled;
        self
    }
}

/// Background job execution interface.
///
/// Handlers must be registered for every job type before [`Worker::start`].
#[async_trait]
pub trait Worker<A>: Send + Sync {
    /// Register the business and failure handler for `job_type`.
    fn register_handlers(
        &self,
        job_type: JobType,
        handler: Arc<dyn JobHandler<A>>,
        failure: Arc<dyn FailureHandler<A>>,
    ) -> Result<()>;

    /// Queue a job, assigning a random id when its id is blank.
    async fn enqueue(&self, ctx: &Context, job: Job<A>) -> Result<JobId>;

    /// Spawn the workers. Must be called from within a tokio runtime.
    fn start(&self, ctx: &Context) -> Result<()>;

    /// Stop dequeuing, cancel running jobs and wait for every worker to exit.
    /// Safe to call repeatedly and concurrently.
    async fn stop(&self);

    /// Current queue and worker occupancy.
    async fn stats(&self, ctx: &Context) -> Result<Stats>;
}
