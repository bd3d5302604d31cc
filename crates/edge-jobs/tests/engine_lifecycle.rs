//! Integration tests for the pooled job engine
//!
//! Each job must end in exactly one of {business handler finished, failure
//! handler invoked}; stop must drain in-flight work before returning.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use edge_jobs::{
    failure_fn, handler_fn, AtomicMetrics, Context, Job, JobFailure, JobType, MemoryWorker,
    ProcessedResult, Worker, WorkerConfig,
};
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq)]
enum Outcome {
    Handled(u32),
    Failed(u32, JobFailure, bool),
}

#[derive(Debug, Clone)]
enum Step {
    Succeed,
    Fail,
    Panic,
    Hang,
    /// Ignore cancellation, finish after the given delay and report `Handled`.
    Busy(Duration),
}

fn config(workers: usize, timeout: Duration) -> WorkerConfig {
    WorkerConfig::default()
        .with_workers(workers)
        .with_queue_size(32)
        .with_timeout(timeout)
        .with_interrupt_handling(false)
}

/// Register a "build" handler that reports every outcome on a channel.
fn scripted_worker(
    workers: usize,
    timeout: Duration,
) -> (
    MemoryWorker<(u32, Step)>,
    mpsc::UnboundedReceiver<Outcome>,
    Arc<AtomicMetrics>,
) {
    let metrics = Arc::new(AtomicMetrics::new());
    let worker =
        MemoryWorker::with_metrics(config(workers, timeout), metrics.clone()).unwrap();
    let (tx, rx) = mpsc::unbounded_channel();
    let done_tx = tx.clone();

    worker
        .register_handlers(
            JobType::new("build"),
            Arc::new(handler_fn(move |ctx: Context, job: Job<(u32, Step)>| {
                let tx = done_tx.clone();
                async move {
                    let (n, step) = job.args;
                    match step {
                        Step::Succeed => {}
                        Step::Fail => anyhow::bail!("job {n} rejected"),
                        Step::Panic => panic!("job {n} exploded"),
                        Step::Hang => {
                            ctx.done().await;
                            return Ok(());
                        }
                        Step::Busy(d) => tokio::time::sleep(d).await,
                    }
                    let _ = tx.send(Outcome::Handled(n));
                    Ok(())
                }
            })),
            Arc::new(failure_fn(
                move |ctx: Context, job: Job<(u32, Step)>, failure: JobFailure| {
                    let tx = tx.clone();
                    async move {
                        let _ = tx.send(Outcome::Failed(job.args.0, failure, ctx.err().is_some()));
                    }
                },
            )),
        )
        .unwrap();

    (worker, rx, metrics)
}

#[tokio::test(start_paused = true)]
async fn test_each_job_reaches_exactly_one_handler() {
    let (worker, mut rx, metrics) = scripted_worker(3, Duration::from_millis(200));
    let ctx = Context::background();

    worker.enqueue(&ctx, Job::new("build", (1, Step::Succeed))).await.unwrap();
    worker.enqueue(&ctx, Job::new("build", (2, Step::Fail))).await.unwrap();
    worker.enqueue(&ctx, Job::new("build", (3, Step::Panic))).await.unwrap();
    worker.enqueue(&ctx, Job::new("build", (4, Step::Hang))).await.unwrap();
    worker.start(&ctx).unwrap();

    let mut outcomes = Vec::new();
    // Job 2 returns an error and reports nothing.
    for _ in 0..3 {
        outcomes.push(rx.recv().await.unwrap());
    }
    worker.stop().await;
    while let Ok(extra) = rx.try_recv() {
        outcomes.push(extra);
    }

    assert_eq!(outcomes.len(), 3, "unexpected outcomes: {outcomes:?}");
    assert!(outcomes.contains(&Outcome::Handled(1)));
    assert!(outcomes.contains(&Outcome::Failed(
        3,
        JobFailure::Panicked("job 3 exploded".to_string()),
        true
    )));
    assert!(outcomes.contains(&Outcome::Failed(4, JobFailure::TimedOut, true)));

    assert_eq!(metrics.processed(ProcessedResult::Success), 1);
    assert_eq!(metrics.processed(ProcessedResult::Error), 1);
    assert_eq!(metrics.processed(ProcessedResult::Panic), 1);
    assert_eq!(metrics.processed(ProcessedResult::Timeout), 1);
    assert_eq!(metrics.enqueued(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_panic_does_not_shrink_the_pool() {
    let (worker, mut rx, _metrics) = scripted_worker(1, Duration::from_secs(5));
    let ctx = Context::background();
    worker.start(&ctx).unwrap();

    worker.enqueue(&ctx, Job::new("build", (1, Step::Panic))).await.unwrap();
    let first = rx.recv().await.unwrap();
    match first {
        Outcome::Failed(1, JobFailure::Panicked(_), ctx_done) => assert!(ctx_done),
        other => panic!("expected panic failure, got {other:?}"),
    }

    worker.enqueue(&ctx, Job::new("build", (2, Step::Succeed))).await.unwrap();
    assert_eq!(rx.recv().await.unwrap(), Outcome::Handled(2));

    let stats = worker.stats(&ctx).await.unwrap();
    assert_eq!(stats.enqueued, 0);
    worker.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_stop_waits_for_in_flight_job() {
    let (worker, mut rx, metrics) = scripted_worker(2, Duration::from_secs(60));
    let ctx = Context::background();
    worker
        .enqueue(&ctx, Job::new("build", (7, Step::Busy(Duration::from_millis(300)))))
        .await
        .unwrap();
    worker.start(&ctx).unwrap();

    // Let the job get picked up.
    for _ in 0..100 {
        if worker.stats(&ctx).await.unwrap().active == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    assert_eq!(worker.stats(&ctx).await.unwrap().active, 1);

    let returned = Arc::new(AtomicUsize::new(0));
    let mut callers = Vec::new();
    for _ in 0..3 {
        let worker = worker.clone();
        let returned = returned.clone();
        callers.push(tokio::spawn(async move {
            worker.stop().await;
            returned.fetch_add(1, Ordering::SeqCst);
            worker.stats(&Context::background()).await.unwrap().active
        }));
    }
    for caller in callers {
        assert_eq!(caller.await.unwrap(), 0, "stop returned with a job in flight");
    }
    assert_eq!(returned.load(Ordering::SeqCst), 3);

    // The busy handler ran to completion, then saw its context cancelled.
    assert_eq!(rx.recv().await.unwrap(), Outcome::Handled(7));
    assert_eq!(
        rx.recv().await.unwrap(),
        Outcome::Failed(7, JobFailure::Cancelled, true)
    );
    assert!(rx.try_recv().is_err());
    assert_eq!(metrics.processed(ProcessedResult::Cancelled), 1);
}

#[tokio::test(start_paused = true)]
async fn test_deadline_abandons_handler_that_ignores_its_context() {
    let (worker, mut rx, metrics) = scripted_worker(1, Duration::from_millis(100));
    let ctx = Context::background();
    worker.start(&ctx).unwrap();

    let began = tokio::time::Instant::now();
    worker
        .enqueue(&ctx, Job::new("build", (5, Step::Busy(Duration::from_secs(10)))))
        .await
        .unwrap();

    assert_eq!(
        rx.recv().await.unwrap(),
        Outcome::Failed(5, JobFailure::TimedOut, true)
    );
    assert!(
        began.elapsed() < Duration::from_secs(1),
        "failure handler ran after {:?}",
        began.elapsed()
    );

    // The single worker is free again.
    worker
        .enqueue(&ctx, Job::new("build", (6, Step::Succeed)))
        .await
        .unwrap();
    assert_eq!(rx.recv().await.unwrap(), Outcome::Handled(6));

    worker.stop().await;
    assert!(rx.try_recv().is_err(), "abandoned handler reported late");
    assert_eq!(metrics.processed(ProcessedResult::Timeout), 1);
    assert_eq!(metrics.processed(ProcessedResult::Success), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stop_mid_run_returns_after_handler_completes() {
    let worker = MemoryWorker::<u32>::new(config(2, Duration::from_secs(60))).unwrap();
    let finished = Arc::new(AtomicUsize::new(0));
    let finished_in = finished.clone();
    let started = Arc::new(tokio::sync::Notify::new());
    let started_in = started.clone();

    worker
        .register_handlers(
            JobType::new("build"),
            Arc::new(handler_fn(move |ctx: Context, _job: Job<u32>| {
                let finished = finished_in.clone();
                let started = started_in.clone();
                async move {
                    started.notify_one();
                    ctx.done().await;
                    // Cleanup after cancellation still counts as in-flight work.
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    finished.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })),
            Arc::new(failure_fn(|_c: Context, _j: Job<u32>, _f: JobFailure| async {})),
        )
        .unwrap();

    let ctx = Context::background();
    worker.enqueue(&ctx, Job::new("build", 1)).await.unwrap();
    worker.start(&ctx).unwrap();
    started.notified().await;

    worker.stop().await;
    assert_eq!(finished.load(Ordering::SeqCst), 1);
    worker.wait_stopped().await;
}

#[tokio::test]
async fn test_parent_context_cancellation_stops_workers() {
    let (worker, mut rx, _metrics) = scripted_worker(1, Duration::from_secs(60));
    let parent = Context::background();
    worker.start(&parent).unwrap();
    worker
        .enqueue(&parent, Job::new("build", (9, Step::Hang)))
        .await
        .unwrap();

    while worker.stats(&parent).await.unwrap().active == 0 {
        tokio::task::yield_now().await;
    }
    parent.cancel();
    assert_eq!(
        rx.recv().await.unwrap(),
        Outcome::Failed(9, JobFailure::Cancelled, true)
    );
    worker.stop().await;
}
