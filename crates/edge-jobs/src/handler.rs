//! Handler traits and the per-type handler registry.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::context::Context;
use crate::error::{JobError, Result};
use crate::job::{Job, JobType};

/// Business logic for one job type.
///
/// An `Err` return is logged and counted but does not trigger the failure
/// handler; the handler owns its own domain error reporting.
#[async_trait]
pub trait JobHandler<A>: Send + Sync {
    async fn handle(&self, ctx: &Context, job: &Job<A>) -> anyhow::Result<()>;
}

/// Why the failure handler was invoked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobFailure {
    /// The business handler panicked; carries the panic message.
    Panicked(String),
    /// The per-job timeout expired.
    TimedOut,
    /// The worker was stopped while the job was running.
    Cancelled,
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobFailure::Panicked(msg) => write!(f, "handler panicked: {msg}"),
            JobFailure::TimedOut => f.write_str("job timed out"),
            JobFailure::Cancelled => f.write_str("job cancelled"),
        }
    }
}

/// Invoked exactly once when a job panics, times out or is cancelled.
///
/// `ctx` is the job's own context, already expired or cancelled.
///
/// The outcome is judged by the job context once the handler returns. A
/// handler that finishes its work and returns `Ok` after the worker was
/// stopped, or after its deadline passed, is still reported as
/// [`JobFailure::Cancelled`] or [`JobFailure::TimedOut`]. Implementations
/// must therefore tolerate a failure call for a job whose work completed,
/// for example by leaving already settled records untouched.
#[async_trait]
pub trait FailureHandler<A>: Send + Sync {
    async fn on_failure(&self, ctx: &Context, job: &Job<A>, failure: &JobFailure);
}

/// Adapter turning an async closure over owned values into a [`JobHandler`].
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<A, F, Fut> JobHandler<A> for FnHandler<F>
where
    A: Clone + Send + Sync + 'static,
    F: Fn(Context, Job<A>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, ctx: &Context, job: &Job<A>) -> anyhow::Result<()> {
        (self.0)(ctx.clone(), job.clone()).await
    }
}

/// Adapter turning an async closure over owned values into a [`FailureHandler`].
pub struct FnFailureHandler<F>(pub F);

#[async_trait]
impl<A, F, Fut> FailureHandler<A> for FnFailureHandler<F>
where
    A: Clone + Send + Sync + 'static,
    F: Fn(Context, Job<A>, JobFailure) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn on_failure(&self, ctx: &Context, job: &Job<A>, failure: &JobFailure) {
        (self.0)(ctx.clone(), job.clone(), failure.clone()).await
    }
}

/// Wrap an async closure as a [`JobHandler`].
pub fn handler_fn<A, F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Context, Job<A>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    FnHandler(f)
}

/// Wrap an async closure as a [`FailureHandler`].
pub fn failure_fn<A, F, Fut>(f: F) -> FnFailureHandler<F>
where
    F: Fn(Context, Job<A>, JobFailure) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    FnFailureHandler(f)
}

/// Business and failure handler registered for one job type.
pub struct Handlers<A> {
    pub handler: Arc<dyn JobHandler<A>>,
    pub failure: Arc<dyn FailureHandler<A>>,
}

impl<A> Clone for Handlers<A> {
    fn clone(&self) -> Self {
        Self {
            handler: Arc::clone(&self.handler),
            failure: Arc::clone(&self.failure),
        }
    }
}

/// Registry of handlers (job type -> handlers).
///
/// Built during initialization, read-only once the worker starts.
pub struct HandlerRegistry<A> {
    handlers: HashMap<JobType, Handlers<A>>,
}

impl<A> Default for HandlerRegistry<A> {
    fn default() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }
}

impl<A> Clone for HandlerRegistry<A> {
    fn clone(&self) -> Self {
        Self {
            handlers: self.handlers.clone(),
        }
    }
}

impl<A> HandlerRegistry<A> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register both handlers for `job_type`. A second registration is an error.
    pub fn register(
        &mut self,
        job_type: JobType,
        handler: Arc<dyn JobHandler<A>>,
        failure: Arc<dyn FailureHandler<A>>,
    ) -> Result<()> {
        if self.handlers.contains_key(&job_type) {
            return Err(JobError::DuplicateHandler(job_type));
        }
        self.handlers.insert(job_type, Handlers { handler, failure });
        Ok(())
    }

    pub fn get(&self, job_type: &JobType) -> Option<&Handlers<A>> {
        self.handlers.get(job_type)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Render a panic payload as text.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok_handler() -> Arc<dyn JobHandler<u32>> {
        Arc::new(handler_fn(|_ctx: Context, _job: Job<u32>| async { Ok(()) }))
    }

    fn noop_failure() -> Arc<dyn FailureHandler<u32>> {
        Arc::new(failure_fn(
            |_ctx: Context, _job: Job<u32>, _failure: JobFailure| async {},
        ))
    }

    #[test]
    fn register_and_lookup() {
        let mut reg = HandlerRegistry::new();
        reg.register(JobType::new("build"), ok_handler(), noop_failure())
            .unwrap();
        assert_eq!(reg.len(), 1);
        assert!(reg.get(&JobType::new("build")).is_some());
        assert!(reg.get(&JobType::new("missing")).is_none());
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut reg = HandlerRegistry::new();
        reg.register(JobType::new("build"), ok_handler(), noop_failure())
            .unwrap();
        let err = reg
            .register(JobType::new("build"), ok_handler(), noop_failure())
            .unwrap_err();
        assert!(matches!(err, JobError::DuplicateHandler(t) if t.as_str() == "build"));
    }

    #[tokio::test]
    async fn fn_handler_receives_owned_copies() {
        let handler = handler_fn(|_ctx: Context, job: Job<u32>| async move {
            anyhow::ensure!(job.args == 7, "unexpected args");
            Ok(())
        });
        let job = Job::new("build", 7u32);
        handler.handle(&Context::background(), &job).await.unwrap();
    }

    #[test]
    fn panic_message_handles_both_string_kinds() {
        let a: Box<dyn std::any::Any + Send> = Box::new("static");
        let b: Box<dyn std::any::Any + Send> = Box::new(String::from("owned"));
        let c: Box<dyn std::any::Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(a.as_ref()), "static");
        assert_eq!(panic_message(b.as_ref()), "owned");
        assert_eq!(panic_message(c.as_ref()), "non-string panic payload");
    }
}
