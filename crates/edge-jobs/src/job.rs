//! Job envelope.
//!
//! A [`Job`] owns its arguments outright (`A: Clone + Send + Sync + 'static`),
//! so a worker never aliases memory held by the enqueuing caller.

use std::fmt;

/// Unique job identifier. Blank ids are replaced on enqueue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct JobId(String);

impl JobId {
    /// Generate a new random id.
    pub fn random() -> Self {
        JobId(uuid::Uuid::new_v4().to_string())
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        JobId(s.to_string())
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Name of a job type; handlers are registered per type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobType(String);

impl JobType {
    pub fn new(name: impl Into<String>) -> Self {
        JobType(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for JobType {
    fn from(s: &str) -> Self {
        JobType::new(s)
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque identity blob of the principal that requested the job.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Identity(String);

impl Identity {
    pub fn new(blob: impl Into<String>) -> Self {
        Identity(blob.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identity(<{} bytes>)", self.0.len())
    }
}

/// Unit of background work.
#[derive(Debug, Clone)]
pub struct Job<A> {
    pub id: JobId,
    pub job_type: JobType,
    pub identity: Identity,
    pub correlation_id: String,
    pub args: A,
}

impl<A> Job<A> {
    /// New job with a blank id; the engine assigns one on enqueue.
    pub fn new(job_type: impl Into<JobType>, args: A) -> Self {
        Self {
            id: JobId::default(),
            job_type: job_type.into(),
            identity: Identity::default(),
            correlation_id: String::new(),
            args,
        }
    }

    pub fn with_id(mut self, id: impl Into<JobId>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_identity(mut self, identity: Identity) -> Self {
        self.identity = identity;
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }

    /// Replace a blank id with a random one. Returns the effective id.
    pub(crate) fn ensure_id(&mut self) -> JobId {
        if self.id.is_blank() {
            self.id = JobId::random();
        }
        self.id.clone()
    }
}

impl From<String> for JobType {
    fn from(s: String) -> Self {
        JobType(s)
    }
}
