//! Edge-Jobs: background job execution for repository publishing
//!
//! A bounded in-memory queue drained by a fixed pool of workers. Each job
//! runs with a timeout and a cancellation [`Context`]; panics, timeouts and
//! cancellations are routed to a per-type failure handler so a worker always
//! survives the job it was running.
//!
//! ## Key Components
//!
//! - [`MemoryWorker`]: pooled engine with graceful, idempotent stop
//! - [`DummyWorker`]: runs jobs inline inside `enqueue`
//! - [`Context`]: cancellation, deadline and correlation id propagation
//! - [`MetricsSink`]: queue/active gauges and per-result counters

pub mod context;
mod dummy;
mod engine;
mod error;
pub mod handler;
mod job;
pub mod metrics;
mod worker;

pub use context::{Context, ContextError};
pub use dummy::DummyWorker;
pub use engine::MemoryWorker;
pub use error::{JobError, Result};
pub use handler::{
    failure_fn, handler_fn, FailureHandler, FnFailureHandler, FnHandler, HandlerRegistry,
    JobFailure, JobHandler,
};
pub use job::{Identity, Job, JobId, JobType};
pub use metrics::{AtomicMetrics, MetricsSink, NoopMetrics, ProcessedResult};
pub use worker::{Stats, Worker, WorkerConfig};
