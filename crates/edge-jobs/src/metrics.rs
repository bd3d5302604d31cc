//! Metrics sink for the job engine and the content client.
//!
//! [`MetricsSink`] is the seam towards whatever metrics backend the host
//! process uses. [`AtomicMetrics`] keeps lock-free counters, gauges and
//! fixed-bucket histograms in process; call [`AtomicMetrics::flush`] to emit
//! the current values as a single `tracing::info!` event.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

/// How a dequeued job ended, as a metric label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessedResult {
    Success,
    Error,
    Panic,
    Timeout,
    Cancelled,
    Unregistered,
}

impl ProcessedResult {
    pub const ALL: [ProcessedResult; 6] = [
        ProcessedResult::Success,
        ProcessedResult::Error,
        ProcessedResult::Panic,
        ProcessedResult::Timeout,
        ProcessedResult::Cancelled,
        ProcessedResult::Unregistered,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessedResult::Success => "success",
            ProcessedResult::Error => "error",
            ProcessedResult::Panic => "panic",
            ProcessedResult::Timeout => "timeout",
            ProcessedResult::Cancelled => "cancelled",
            ProcessedResult::Unregistered => "unregistered",
        }
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

impl std::fmt::Display for ProcessedResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Destination for engine and client metrics.
pub trait MetricsSink: Send + Sync {
    fn inc_enqueued(&self, job_type: &str);
    fn inc_processed(&self, job_type: &str, result: ProcessedResult);
    fn set_queue_depth(&self, depth: i64);
    fn set_active(&self, active: i64);
    fn observe_job_duration(&self, job_type: &str, elapsed: Duration);
    fn observe_client_call(&self, method: &str, status: u16, elapsed: Duration);
}

/// Sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn inc_enqueued(&self, _job_type: &str) {}
    fn inc_processed(&self, _job_type: &str, _result: ProcessedResult) {}
    fn set_queue_depth(&self, _depth: i64) {}
    fn set_active(&self, _active: i64) {}
    fn observe_job_duration(&self, _job_type: &str, _elapsed: Duration) {}
    fn observe_client_call(&self, _method: &str, _status: u16, _elapsed: Duration) {}
}

/// Upper bounds (milliseconds) of the histogram buckets; the last bucket is unbounded.
pub const DURATION_BUCKETS_MS: [u64; 8] = [10, 50, 100, 500, 1_000, 5_000, 30_000, 120_000];

/// Fixed-bucket duration histogram.
#[derive(Debug)]
pub struct Histogram {
    buckets: [AtomicU64; DURATION_BUCKETS_MS.len() + 1],
    count: AtomicU64,
    sum_ms: AtomicU64,
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

impl Histogram {
    pub const fn new() -> Self {
        Self {
            buckets: [
                AtomicU64::new(0),
                AtomicU64::new(0),
                AtomicU64::new(0),
                AtomicU64::new(0),
                AtomicU64::new(0),
                AtomicU64::new(0),
                AtomicU64::new(0),
                AtomicU64::new(0),
                AtomicU64::new(0),
            ],
            count: AtomicU64::new(0),
            sum_ms: AtomicU64::new(0),
        }
    }

    pub fn observe(&self, elapsed: Duration) {
        let ms = elapsed.as_millis() as u64;
        let idx = DURATION_BUCKETS_MS
            .iter()
            .position(|upper| ms <= *upper)
            .unwrap_or(DURATION_BUCKETS_MS.len());
        self.buckets[idx].fetch_add(1, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum_ms.fetch_add(ms, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn sum_ms(&self) -> u64 {
        self.sum_ms.load(Ordering::Relaxed)
    }

    /// Per-bucket (non-cumulative) counts.
    pub fn bucket_counts(&self) -> Vec<u64> {
        self.buckets
            .iter()
            .map(|b| b.load(Ordering::Relaxed))
            .collect()
    }
}

/// Lock-free atomic metrics with no allocation on the hot path.
#[derive(Debug, Default)]
pub struct AtomicMetrics {
    enqueued: AtomicU64,
    processed: [AtomicU64; 6],
    queue_depth: AtomicI64,
    active: AtomicI64,
    job_duration: Histogram,
    client_calls: Histogram,
    client_errors: AtomicU64,
}

impl AtomicMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueued(&self) -> u64 {
        self.enqueued.load(Ordering::Relaxed)
    }

    pub fn processed(&self, result: ProcessedResult) -> u64 {
        self.processed[result.index()].load(Ordering::Relaxed)
    }

    pub fn queue_depth(&self) -> i64 {
        self.queue_depth.load(Ordering::Relaxed)
    }

    pub fn active(&self) -> i64 {
        self.active.load(Ordering::Relaxed)
    }

    pub fn job_duration(&self) -> &Histogram {
        &self.job_duration
    }

    pub fn client_calls(&self) -> &Histogram {
        &self.client_calls
    }

    /// Client calls that ended with a non-2xx status (or no status at all).
    pub fn client_errors(&self) -> u64 {
        self.client_errors.load(Ordering::Relaxed)
    }

    /// Emit all current values as a single `info!` event.
    ///
    /// Call this at natural boundaries (engine stats tick, shutdown)
    /// rather than on every increment.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            enqueued = self.enqueued(),
            processed_success = self.processed(ProcessedResult::Success),
            processed_error = self.processed(ProcessedResult::Error),
            processed_panic = self.processed(ProcessedResult::Panic),
            processed_timeout = self.processed(ProcessedResult::Timeout),
            processed_cancelled = self.processed(ProcessedResult::Cancelled),
            processed_unregistered = self.processed(ProcessedResult::Unregistered),
            queue_depth = self.queue_depth(),
            active = self.active(),
            job_count = self.job_duration.count(),
            job_sum_ms = self.job_duration.sum_ms(),
            client_call_count = self.client_calls.count(),
            client_call_sum_ms = self.client_calls.sum_ms(),
            client_errors = self.client_errors(),
        );
    }
}

impl MetricsSink for AtomicMetrics {
    fn inc_enqueued(&self, job_type: &str) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "jobs_enqueued", job_type = %job_type, "counter incremented");
    }

    fn inc_processed(&self, job_type: &str, result: ProcessedResult) {
        self.processed[result.index()].fetch_add(1, Ordering::Relaxed);
        tracing::trace!(
            metric = "jobs_processed",
            job_type = %job_type,
            result = %result,
            "counter incremented"
        );
    }

    fn set_queue_depth(&self, depth: i64) {
        self.queue_depth.store(depth, Ordering::Relaxed);
    }

    fn set_active(&self, active: i64) {
        self.active.store(active, Ordering::Relaxed);
    }

    fn observe_job_duration(&self, _job_type: &str, elapsed: Duration) {
        self.job_duration.observe(elapsed);
    }

    fn observe_client_call(&self, method: &str, status: u16, elapsed: Duration) {
        self.client_calls.observe(elapsed);
        if !(200..300).contains(&status) {
            self.client_errors.fetch_add(1, Ordering::Relaxed);
        }
        tracing::trace!(
            metric = "client_call",
            method = %method,
            status = status,
            elapsed_ms = elapsed.as_millis() as u64,
        );
    }
}
