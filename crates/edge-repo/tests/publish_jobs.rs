//! Publish jobs running on the job engines.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use edge_content::fakes::MemoryContentApi;
use edge_jobs::{
    AtomicMetrics, Context, DummyWorker, FailureHandler, Identity, JobFailure, JobError,
    MemoryWorker, ProcessedResult, Worker, WorkerConfig,
};
use edge_repo::{
    enqueue_publish, register_publish_handlers, BuildConfig, PublishFailureHandler,
    PublishRequest, RepoBuilder, RepoJobArgs,
};
use edge_state::fakes::MemoryBuildResultStore;
use edge_state::{BuildResultStore, RepoBuildId, RepoBuildRecord, RepoBuildStatus};
use tempfile::NamedTempFile;

fn commit_tarball() -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(b"ostree commit").unwrap();
    file.flush().unwrap();
    file
}

fn builder(api: Arc<MemoryContentApi>, store: Arc<MemoryBuildResultStore>) -> Arc<RepoBuilder> {
    Arc::new(RepoBuilder::new(api, store, BuildConfig::default()).unwrap())
}

fn engine_config(timeout: Duration) -> WorkerConfig {
    WorkerConfig::default()
        .with_workers(2)
        .with_queue_size(8)
        .with_timeout(timeout)
        .with_interrupt_handling(false)
}

/// Poll until the build leaves `BUILDING`.
async fn settled(store: &MemoryBuildResultStore, id: &RepoBuildId) -> RepoBuildRecord {
    for _ in 0..500 {
        let record = store.load(id).await.unwrap();
        if record.status.is_terminal() {
            return record;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("build {id} never settled");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_publish_job_runs_on_memory_worker() {
    let api = Arc::new(MemoryContentApi::new());
    let store = Arc::new(MemoryBuildResultStore::new());
    let metrics = Arc::new(AtomicMetrics::new());
    let worker = MemoryWorker::<RepoJobArgs>::with_metrics(
        engine_config(Duration::from_secs(30)),
        metrics.clone(),
    )
    .unwrap();
    register_publish_handlers(&worker, builder(api.clone(), store.clone())).unwrap();
    let ctx = Context::background().with_correlation_id("corr-1");
    worker.start(&ctx).unwrap();

    let tarball = commit_tarball();
    let (record, _job_id) = enqueue_publish(
        &ctx,
        &worker,
        store.as_ref(),
        "42",
        "fleet",
        tarball.path().to_path_buf(),
        Identity::new("eyJpZGVudGl0eSI6e319"),
    )
    .await
    .unwrap();
    assert_eq!(record.status, RepoBuildStatus::Building);

    let done = settled(&store, &record.id).await;
    worker.stop().await;

    assert_eq!(done.status, RepoBuildStatus::Success);
    assert!(done.distribution_url.unwrap().ends_with("/em42d/42/fleet/"));
    assert_eq!(metrics.enqueued(), 1);
    assert_eq!(metrics.processed(ProcessedResult::Success), 1);
}

#[tokio::test]
async fn test_publish_job_runs_inline_on_dummy_worker() {
    let api = Arc::new(MemoryContentApi::new());
    let store = Arc::new(MemoryBuildResultStore::new());
    let worker = DummyWorker::<RepoJobArgs>::new(Duration::from_secs(30));
    register_publish_handlers(&worker, builder(api.clone(), store.clone())).unwrap();

    let tarball = commit_tarball();
    let (record, _) = enqueue_publish(
        &Context::background(),
        &worker,
        store.as_ref(),
        "42",
        "fleet",
        tarball.path().to_path_buf(),
        Identity::default(),
    )
    .await
    .unwrap();

    let loaded = store.load(&record.id).await.unwrap();
    assert_eq!(loaded.status, RepoBuildStatus::Success);
    assert_eq!(api.distributions("em42d").len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_timed_out_publish_ends_in_error() {
    // Tasks never complete within the job timeout.
    let api = Arc::new(MemoryContentApi::new().with_polls_until_complete(10_000));
    let store = Arc::new(MemoryBuildResultStore::new());
    let metrics = Arc::new(AtomicMetrics::new());
    let worker = MemoryWorker::<RepoJobArgs>::with_metrics(
        engine_config(Duration::from_millis(200)),
        metrics.clone(),
    )
    .unwrap();
    register_publish_handlers(&worker, builder(api, store.clone())).unwrap();
    let ctx = Context::background();
    worker.start(&ctx).unwrap();

    let tarball = commit_tarball();
    let (record, _) = enqueue_publish(
        &ctx,
        &worker,
        store.as_ref(),
        "42",
        "fleet",
        tarball.path().to_path_buf(),
        Identity::default(),
    )
    .await
    .unwrap();

    let done = settled(&store, &record.id).await;
    worker.stop().await;

    assert_eq!(done.status, RepoBuildStatus::Error);
    // Recorded by the publish itself or, if it was abandoned, by the failure handler.
    let error = done.error.unwrap();
    assert!(
        error.contains("deadline exceeded") || error == "job timed out",
        "unexpected error: {error}"
    );
    assert_eq!(metrics.processed(ProcessedResult::Timeout), 1);
}

#[tokio::test]
async fn test_failure_handler_marks_building_record_error() {
    let store = Arc::new(MemoryBuildResultStore::new());
    let record = RepoBuildRecord::new("42", "fleet");
    store.create(&record).await.unwrap();
    let handler = PublishFailureHandler::new(store.clone());
    let job = RepoJobArgs::Publish(PublishRequest::for_record(&record, "/tmp/c.tar".into()))
        .into_job();

    handler
        .on_failure(
            &Context::background(),
            &job,
            &JobFailure::Panicked("boom".into()),
        )
        .await;

    let loaded = store.load(&record.id).await.unwrap();
    assert_eq!(loaded.status, RepoBuildStatus::Error);
    assert_eq!(loaded.error.as_deref(), Some("handler panicked: boom"));
}

#[tokio::test]
async fn test_failure_handler_leaves_settled_record() {
    let store = Arc::new(MemoryBuildResultStore::new());
    let mut record = RepoBuildRecord::new("42", "fleet");
    store.create(&record).await.unwrap();
    record.mark_success("https://cdn.example.com/42/fleet/").unwrap();
    store.save(&record).await.unwrap();
    let handler = PublishFailureHandler::new(store.clone());
    let job = RepoJobArgs::Publish(PublishRequest::for_record(&record, "/tmp/c.tar".into()))
        .into_job();

    handler
        .on_failure(&Context::background(), &job, &JobFailure::TimedOut)
        .await;

    let loaded = store.load(&record.id).await.unwrap();
    assert_eq!(loaded.status, RepoBuildStatus::Success);
    assert_eq!(store.saved_statuses(), vec![RepoBuildStatus::Success]);
}

#[test]
fn test_publish_handlers_register_once() {
    let api = Arc::new(MemoryContentApi::new());
    let store = Arc::new(MemoryBuildResultStore::new());
    let worker = DummyWorker::<RepoJobArgs>::new(Duration::from_secs(1));
    let builder = builder(api, store);

    register_publish_handlers(&worker, builder.clone()).unwrap();
    let err = register_publish_handlers(&worker, builder).unwrap_err();
    assert!(matches!(err, JobError::DuplicateHandler(_)));
}
