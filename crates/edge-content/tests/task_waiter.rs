//! Backoff polling of asynchronous tasks against the in-memory service.

use std::time::Duration;

use edge_content::fakes::MemoryContentApi;
use edge_content::{wait_for_task, wait_for_task_with, Backoff, ContentApi, ContentError};
use edge_jobs::{Context, ContextError};
use tokio::time::Instant;

fn total_delay(polls: usize) -> Duration {
    Backoff::new().take(polls).sum()
}

async fn start_task(api: &MemoryContentApi, ctx: &Context) -> String {
    api.delete_repository_version(ctx, "em1d", "/api/pulp/em1d/api/v3/repositories/file/file/1/versions/1/")
        .await
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_completes_on_nth_read_after_backoff_delays() {
    for polls in [1u32, 3, 8, 10] {
        let api = MemoryContentApi::new().with_polls_until_complete(polls);
        let ctx = Context::background();
        let task = start_task(&api, &ctx).await;

        let started = Instant::now();
        let created = wait_for_task(&ctx, &api, "em1d", &task).await.unwrap();
        let elapsed = started.elapsed();

        assert!(created.is_empty());
        assert_eq!(api.task_reads(&task), polls);
        let expected = total_delay(polls as usize);
        assert!(
            elapsed >= expected && elapsed < expected + Duration::from_millis(20),
            "{polls} polls took {elapsed:?}, expected {expected:?}"
        );
    }
}

#[test]
fn test_delay_sequence_sums() {
    assert_eq!(total_delay(8), Duration::from_millis(4080));
    assert_eq!(total_delay(10), Duration::from_millis(8176));
}

#[tokio::test(start_paused = true)]
async fn test_failed_task_surfaces_description() {
    let api = MemoryContentApi::new();
    api.fail_tasks("delete_repository_version");
    let ctx = Context::background();
    let task = start_task(&api, &ctx).await;

    let err = wait_for_task(&ctx, &api, "em1d", &task).await.unwrap_err();
    match err {
        ContentError::TaskFailed { href, state, description } => {
            assert_eq!(href, task);
            assert_eq!(state, "failed");
            assert_eq!(description, "injected task failure");
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_deadline_aborts_polling() {
    let api = MemoryContentApi::new().with_polls_until_complete(u32::MAX);
    let ctx = Context::background();
    let task = start_task(&api, &ctx).await;

    let bounded = ctx.with_timeout(Duration::from_secs(5));
    let err = wait_for_task(&bounded, &api, "em1d", &task).await.unwrap_err();
    assert!(matches!(err, ContentError::Context(ContextError::DeadlineExceeded)));
    // 16+32+...+2048 = 4080 ms, then one more 2048 ms sleep fits before 5 s.
    assert_eq!(api.task_reads(&task), 8);
}

#[tokio::test]
async fn test_cancelled_context_reads_nothing() {
    let api = MemoryContentApi::new();
    let ctx = Context::background();
    let task = start_task(&api, &ctx).await;
    ctx.cancel();

    let err = wait_for_task(&ctx, &api, "em1d", &task).await.unwrap_err();
    assert!(matches!(err, ContentError::Context(ContextError::Cancelled)));
    assert_eq!(api.task_reads(&task), 0);
}

#[tokio::test(start_paused = true)]
async fn test_read_errors_are_not_retried() {
    let api = MemoryContentApi::new().with_polls_until_complete(5);
    let ctx = Context::background();
    let task = start_task(&api, &ctx).await;
    api.fail_calls("get_task");

    let err = wait_for_task_with(&ctx, &api, "em1d", &task, Backoff::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ContentError::Status { status: 500, .. }));
    assert_eq!(api.calls("get_task"), 1);
}
