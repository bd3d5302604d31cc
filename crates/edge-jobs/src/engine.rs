//! Pooled in-memory job engine.
//!
//! A fixed number of workers share one bounded queue. Each job runs under its
//! own [`Context`] derived from the worker context plus the configured
//! timeout. When a handler panics, times out or is cancelled, the failure
//! handler for its type is invoked exactly once; the worker then goes back to
//! the queue, so handler faults never shrink the pool.
//!
//! A handler still running at its deadline is dropped at its next await
//! point. Cancellation from [`Worker::stop`] only signals the context: the
//! handler is awaited so it can clean up, and stop waits for it.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::{mpsc, OnceCell};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::context::{Context, ContextError};
use crate::error::{JobError, Result};
use crate::handler::{panic_message, FailureHandler, HandlerRegistry, JobFailure, JobHandler};
use crate::job::{Job, JobId, JobType};
use crate::metrics::{MetricsSink, NoopMetrics, ProcessedResult};
use crate::worker::{Stats, Worker, WorkerConfig};

#[derive(Debug, Default)]
struct Counters {
    enqueued: AtomicI64,
    active: AtomicI64,
}

struct Inner<A> {
    config: WorkerConfig,
    tx: mpsc::Sender<Job<A>>,
    rx: tokio::sync::Mutex<mpsc::Receiver<Job<A>>>,
    registry: Mutex<HandlerRegistry<A>>,
    started: AtomicBool,
    stopping: AtomicBool,
    // Run context and per-worker contexts, cancelled on stop.
    cancels: Mutex<Vec<Context>>,
    tracker: TaskTracker,
    stop_once: OnceCell<()>,
    stopped: CancellationToken,
    counters: Counters,
    metrics: Arc<dyn MetricsSink>,
}

/// Worker pool backed by a bounded in-memory channel.
///
/// Jobs are held only in memory: delivery is at-most-once and queued jobs are
/// lost if the process exits.
pub struct MemoryWorker<A> {
    inner: Arc<Inner<A>>,
}

impl<A> Clone for MemoryWorker<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl<A> MemoryWorker<A>
where
    A: Clone + Send + Sync + 'static,
{
    pub fn new(config: WorkerConfig) -> Result<Self> {
        Self::with_metrics(config, Arc::new(NoopMetrics))
    }

    pub fn with_metrics(config: WorkerConfig, metrics: Arc<dyn MetricsSink>) -> Result<Self> {
        if config.workers == 0 || config.queue_size == 0 {
            return Err(JobError::InvalidConfig);
        }
        let (tx, rx) = mpsc::channel(config.queue_size);
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                tx,
                rx: tokio::sync::Mutex::new(rx),
                registry: Mutex::new(HandlerRegistry::new()),
                started: AtomicBool::new(false),
                stopping: AtomicBool::new(false),
                cancels: Mutex::new(Vec::new()),
                tracker: TaskTracker::new(),
                stop_once: OnceCell::new(),
                stopped: CancellationToken::new(),
                counters: Counters::default(),
                metrics,
            }),
        })
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.inner.config
    }

    /// Resolves once a stop (explicit or interrupt-driven) has completed.
    pub async fn wait_stopped(&self) {
        self.inner.stopped.cancelled().await;
    }
}

impl<A> Inner<A>
where
    A: Clone + Send + Sync + 'static,
{
    async fn next_job(&self) -> Option<Job<A>> {
        self.rx.lock().await.recv().await
    }

    async fn stop(&self) {
        self.stop_once.get_or_init(|| self.shutdown()).await;
    }

    async fn shutdown(&self) {
        self.stopping.store(true, Ordering::Release);
        let contexts = std::mem::take(&mut *lock(&self.cancels));
        info!(
            in_flight = self.counters.active.load(Ordering::Relaxed),
            "stopping worker"
        );
        for ctx in &contexts {
            ctx.cancel();
        }
        self.tracker.close();
        self.tracker.wait().await;
        // Fails enqueues still blocked on a full queue.
        self.rx.lock().await.close();
        self.publish_gauges();
        info!("worker stopped");
        self.stopped.cancel();
    }

    fn publish_gauges(&self) {
        self.metrics
            .set_queue_depth(self.counters.enqueued.load(Ordering::Relaxed));
        self.metrics
            .set_active(self.counters.active.load(Ordering::Relaxed));
    }
}

#[async_trait]
impl<A> Worker<A> for MemoryWorker<A>
where
    A: Clone + Send + Sync + 'static,
{
    fn register_handlers(
        &self,
        job_type: JobType,
        handler: Arc<dyn JobHandler<A>>,
        failure: Arc<dyn FailureHandler<A>>,
    ) -> Result<()> {
        let mut registry = lock(&self.inner.registry);
        if self.inner.started.load(Ordering::Acquire) {
            return Err(JobError::AlreadyStarted(job_type));
        }
        debug!(job_type = %job_type, "registering job handlers");
        registry.register(job_type, handler, failure)
    }

    async fn enqueue(&self, ctx: &Context, mut job: Job<A>) -> Result<JobId> {
        if self.inner.stopping.load(Ordering::Acquire) {
            return Err(JobError::Stopped);
        }
        let id = job.ensure_id();
        let job_type = job.job_type.clone();

        // Count before sending so a fast worker never drives the gauge negative.
        self.inner.counters.enqueued.fetch_add(1, Ordering::Relaxed);
        let sent = ctx.run(self.inner.tx.send(job)).await;
        match sent {
            Ok(Ok(())) => {}
            Ok(Err(_closed)) => {
                self.inner.counters.enqueued.fetch_sub(1, Ordering::Relaxed);
                return Err(JobError::Stopped);
            }
            Err(ctx_err) => {
                self.inner.counters.enqueued.fetch_sub(1, Ordering::Relaxed);
                return Err(ctx_err.into());
            }
        }

        self.inner.metrics.inc_enqueued(job_type.as_str());
        debug!(job_id = %id, job_type = %job_type, "job enqueued");
        Ok(id)
    }

    fn start(&self, ctx: &Context) -> Result<()> {
        if self.inner.stopping.load(Ordering::Acquire) {
            return Err(JobError::Stopped);
        }
        let registry = {
            let registry = lock(&self.inner.registry);
            if self.inner.started.swap(true, Ordering::AcqRel) {
                return Err(JobError::StartedTwice);
            }
            Arc::new(registry.clone())
        };

        let run_ctx = ctx.with_cancel();
        {
            let mut cancels = lock(&self.inner.cancels);
            cancels.push(run_ctx.clone());
            for worker_id in 0..self.inner.config.workers {
                let worker_ctx = run_ctx.with_cancel();
                cancels.push(worker_ctx.clone());
                self.inner.tracker.spawn(worker_loop(
                    worker_id,
                    Arc::clone(&self.inner),
                    Arc::clone(&registry),
                    worker_ctx,
                ));
            }
        }

        tokio::spawn(stats_loop(Arc::clone(&self.inner), run_ctx));

        if self.inner.config.handle_interrupt {
            tokio::spawn(interrupt_listener(Arc::clone(&self.inner)));
        }

        info!(
            workers = self.inner.config.workers,
            queue_size = self.inner.config.queue_size,
            timeout_ms = self.inner.config.timeout.as_millis() as u64,
            handlers = registry.len(),
            "worker started"
        );
        Ok(())
    }

    async fn stop(&self) {
        self.inner.stop().await;
    }

    async fn stats(&self, ctx: &Context) -> Result<Stats> {
        if let Some(err) = ctx.err() {
            return Err(err.into());
        }
        Ok(Stats {
            enqueued: self.inner.counters.enqueued.load(Ordering::Relaxed),
            active: self.inner.counters.active.load(Ordering::Relaxed),
        })
    }
}

async fn worker_loop<A>(
    worker_id: usize,
    inner: Arc<Inner<A>>,
    registry: Arc<HandlerRegistry<A>>,
    worker_ctx: Context,
) where
    A: Clone + Send + Sync + 'static,
{
    debug!(worker_id, "worker loop started");
    loop {
        let next = tokio::select! {
            biased;
            _ = worker_ctx.done() => None,
            job = inner.next_job() => job,
        };
        let Some(job) = next else {
            break;
        };

        inner.counters.enqueued.fetch_sub(1, Ordering::Relaxed);
        inner.counters.active.fetch_add(1, Ordering::Relaxed);

        let span = info_span!(
            "edge.job",
            job_id = %job.id,
            job_type = %job.job_type,
            worker_id = worker_id,
        );
        process_job(&inner, &registry, &worker_ctx, job)
            .instrument(span)
            .await;

        inner.counters.active.fetch_sub(1, Ordering::Relaxed);
    }
    debug!(worker_id, "worker loop exited");
}

/// Run one job to a terminal state. The only place handler panics are caught.
async fn process_job<A>(
    inner: &Inner<A>,
    registry: &HandlerRegistry<A>,
    worker_ctx: &Context,
    job: Job<A>,
) where
    A: Clone + Send + Sync + 'static,
{
    let job_type = job.job_type.as_str();
    let Some(handlers) = registry.get(&job.job_type) else {
        error!("no handler registered for job type, dropping job");
        inner
            .metrics
            .inc_processed(job_type, ProcessedResult::Unregistered);
        return;
    };

    let mut ctx = worker_ctx.with_timeout(inner.config.timeout);
    if !job.correlation_id.is_empty() {
        ctx = ctx.with_correlation_id(job.correlation_id.clone());
    }

    let started = Instant::now();
    debug!("job running");
    // Cancellation lets the handler wind down; the deadline does not wait.
    let result = {
        let handled = AssertUnwindSafe(handlers.handler.handle(&ctx, &job)).catch_unwind();
        tokio::pin!(handled);
        tokio::select! {
            biased;
            res = &mut handled => Some(res),
            _ = deadline_passed(&ctx) => None,
        }
    };

    let failure = match result {
        None => {
            ctx.cancel();
            warn!(
                timeout_ms = inner.config.timeout.as_millis() as u64,
                "job overran its deadline, abandoning handler"
            );
            Some(JobFailure::TimedOut)
        }
        Some(Err(payload)) => {
            ctx.cancel();
            Some(JobFailure::Panicked(panic_message(payload.as_ref())))
        }
        Some(Ok(res)) => match ctx.err() {
            Some(ContextError::DeadlineExceeded) => Some(JobFailure::TimedOut),
            Some(ContextError::Cancelled) => Some(JobFailure::Cancelled),
            None => {
                match res {
                    Ok(()) => {
                        info!(elapsed_ms = started.elapsed().as_millis() as u64, "job finished");
                        inner.metrics.inc_processed(job_type, ProcessedResult::Success);
                    }
                    Err(err) => {
                        warn!(error = %err, "job handler returned an error");
                        inner.metrics.inc_processed(job_type, ProcessedResult::Error);
                    }
                }
                None
            }
        },
    };

    if let Some(failure) = failure {
        let label = match &failure {
            JobFailure::Panicked(_) => ProcessedResult::Panic,
            JobFailure::TimedOut => ProcessedResult::Timeout,
            JobFailure::Cancelled => ProcessedResult::Cancelled,
        };
        warn!(failure = %failure, "job failed, invoking failure handler");
        inner.metrics.inc_processed(job_type, label);

        let handled = AssertUnwindSafe(handlers.failure.on_failure(&ctx, &job, &failure))
            .catch_unwind()
            .await;
        if let Err(payload) = handled {
            error!(
                panic = %panic_message(payload.as_ref()),
                "failure handler panicked"
            );
        }
    }

    inner
        .metrics
        .observe_job_duration(job_type, started.elapsed());
    ctx.cancel();
}

async fn deadline_passed(ctx: &Context) {
    match ctx.deadline() {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn stats_loop<A>(inner: Arc<Inner<A>>, run_ctx: Context)
where
    A: Clone + Send + Sync + 'static,
{
    let mut tick = tokio::time::interval(inner.config.stats_interval);
    loop {
        tokio::select! {
            _ = run_ctx.done() => break,
            _ = tick.tick() => inner.publish_gauges(),
        }
    }
}

async fn interrupt_listener<A>(inner: Arc<Inner<A>>)
where
    A: Clone + Send + Sync + 'static,
{
    tokio::select! {
        res = tokio::signal::ctrl_c() => match res {
            Ok(()) => {
                info!("interrupt received, stopping worker");
                inner.stop().await;
            }
            Err(err) => warn!(error = %err, "unable to listen for interrupt"),
        },
        _ = inner.stopped.cancelled() => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{failure_fn, handler_fn};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn config(workers: usize) -> WorkerConfig {
        WorkerConfig::default()
            .with_workers(workers)
            .with_queue_size(16)
            .with_timeout(Duration::from_secs(5))
            .with_interrupt_handling(false)
    }

    #[test]
    fn zero_workers_is_rejected() {
        assert!(matches!(
            MemoryWorker::<u32>::new(config(0)),
            Err(JobError::InvalidConfig)
        ));
    }

    #[tokio::test]
    async fn register_after_start_is_rejected() {
        let worker = MemoryWorker::<u32>::new(config(1)).unwrap();
        worker.start(&Context::background()).unwrap();
        let err = worker
            .register_handlers(
                JobType::new("late"),
                Arc::new(handler_fn(|_c: Context, _j: Job<u32>| async { Ok(()) })),
                Arc::new(failure_fn(|_c: Context, _j: Job<u32>, _f: JobFailure| async {})),
            )
            .unwrap_err();
        assert!(matches!(err, JobError::AlreadyStarted(_)));
        worker.stop().await;
    }

    #[tokio::test]
    async fn start_twice_is_rejected() {
        let worker = MemoryWorker::<u32>::new(config(1)).unwrap();
        worker.start(&Context::background()).unwrap();
        assert!(matches!(
            worker.start(&Context::background()),
            Err(JobError::StartedTwice)
        ));
        worker.stop().await;
    }

    #[tokio::test]
    async fn enqueue_after_stop_is_rejected() {
        let worker = MemoryWorker::<u32>::new(config(1)).unwrap();
        worker.start(&Context::background()).unwrap();
        worker.stop().await;
        let err = worker
            .enqueue(&Context::background(), Job::new("build", 1))
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::Stopped));
    }

    #[tokio::test]
    async fn enqueue_assigns_id_and_counts() {
        let worker = MemoryWorker::<u32>::new(config(1)).unwrap();
        let id = worker
            .enqueue(&Context::background(), Job::new("build", 1))
            .await
            .unwrap();
        assert!(!id.is_blank());
        let stats = worker.stats(&Context::background()).await.unwrap();
        assert_eq!(stats, Stats { enqueued: 1, active: 0 });
    }

    #[tokio::test(start_paused = true)]
    async fn enqueue_on_full_queue_honours_context() {
        let worker =
            MemoryWorker::<u32>::new(config(1).with_queue_size(1)).unwrap();
        worker
            .enqueue(&Context::background(), Job::new("build", 1))
            .await
            .unwrap();

        let ctx = Context::background().with_timeout(Duration::from_millis(20));
        let err = worker.enqueue(&ctx, Job::new("build", 2)).await.unwrap_err();
        assert!(matches!(
            err,
            JobError::Context(ContextError::DeadlineExceeded)
        ));
        let stats = worker.stats(&Context::background()).await.unwrap();
        assert_eq!(stats.enqueued, 1);
    }

    #[tokio::test]
    async fn stop_fails_enqueue_blocked_on_full_queue() {
        let worker = MemoryWorker::<u32>::new(config(1).with_queue_size(1)).unwrap();
        worker
            .enqueue(&Context::background(), Job::new("build", 1))
            .await
            .unwrap();

        let blocked = {
            let worker = worker.clone();
            tokio::spawn(async move {
                worker
                    .enqueue(&Context::background(), Job::new("build", 2))
                    .await
            })
        };
        tokio::task::yield_now().await;
        worker.stop().await;

        let err = blocked.await.unwrap().unwrap_err();
        assert!(matches!(err, JobError::Stopped));
    }

    #[tokio::test]
    async fn unregistered_job_type_is_dropped_and_worker_survives() {
        let worker = MemoryWorker::<u32>::new(config(1)).unwrap();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_in = Arc::clone(&seen);
        worker
            .register_handlers(
                JobType::new("known"),
                Arc::new(handler_fn(move |_c: Context, _j: Job<u32>| {
                    let seen = Arc::clone(&seen_in);
                    async move {
                        seen.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                })),
                Arc::new(failure_fn(|_c: Context, _j: Job<u32>, _f: JobFailure| async {})),
            )
            .unwrap();
        worker.start(&Context::background()).unwrap();

        let ctx = Context::background();
        worker.enqueue(&ctx, Job::new("unknown", 1)).await.unwrap();
        worker.enqueue(&ctx, Job::new("known", 2)).await.unwrap();

        for _ in 0..200 {
            if seen.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        worker.stop().await;
    }

    #[tokio::test]
    async fn stop_without_start_returns() {
        let worker = MemoryWorker::<u32>::new(config(2)).unwrap();
        worker.stop().await;
        worker.wait_stopped().await;
    }
}
