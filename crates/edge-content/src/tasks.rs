//! Waiting for asynchronous tasks.

use edge_jobs::Context;
use tracing::debug;

use crate::api::ContentApi;
use crate::backoff::Backoff;
use crate::error::ContentError;
use crate::model::TaskState;
use crate::Result;

/// Poll `href` until it reaches a terminal state and return the hrefs it
/// created.
///
/// Sleeps before every read, doubling from 16 ms up to 2048 ms. The wait is
/// bounded only by `ctx`.
pub async fn wait_for_task(
    ctx: &Context,
    api: &dyn ContentApi,
    domain: &str,
    href: &str,
) -> Result<Vec<String>> {
    wait_for_task_with(ctx, api, domain, href, Backoff::new()).await
}

/// [`wait_for_task`] with a caller-supplied backoff.
pub async fn wait_for_task_with(
    ctx: &Context,
    api: &dyn ContentApi,
    domain: &str,
    href: &str,
    mut backoff: Backoff,
) -> Result<Vec<String>> {
    let mut polls = 0u32;
    loop {
        if let Some(err) = ctx.err() {
            return Err(err.into());
        }
        ctx.sleep(backoff.next_delay()).await?;

        let task = api.get_task(ctx, domain, href).await?;
        polls += 1;
        debug!(href, polls, state = %task.state, "polled task");

        match task.state {
            TaskState::Completed => return Ok(task.created_resources),
            TaskState::Failed | TaskState::Canceled | TaskState::Skipped => {
                let description = task
                    .error
                    .map(|e| e.description)
                    .filter(|d| !d.is_empty())
                    .unwrap_or_else(|| "no error description".to_string());
                return Err(ContentError::TaskFailed {
                    href: href.to_string(),
                    state: task.state.to_string(),
                    description,
                });
            }
            TaskState::Waiting | TaskState::Running | TaskState::Canceling => {}
        }
    }
}

/// Wait for a task that must create exactly one resource of interest and
/// return the first created href.
pub async fn wait_for_created(
    ctx: &Context,
    api: &dyn ContentApi,
    domain: &str,
    href: &str,
    kind: &'static str,
) -> Result<String> {
    wait_for_task(ctx, api, domain, href)
        .await?
        .into_iter()
        .next()
        .ok_or(ContentError::NotFound {
            kind,
            key: format!("created by task {href}"),
        })
}
