//! Error types for edge-content

use edge_jobs::ContextError;
use thiserror::Error;

/// Response bodies are truncated to this many bytes inside errors.
pub const MAX_ERROR_BODY: usize = 512;

/// Errors that can occur while talking to the content service
#[derive(Error, Debug)]
pub enum ContentError {
    /// Caller supplied an unusable value
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A resource that must exist does not
    #[error("{kind} not found: {key}")]
    NotFound { kind: &'static str, key: String },

    /// Missing or unusable configuration
    #[error("content service is not configured: {0}")]
    NotConfigured(String),

    /// Transport failure (connect, TLS, timeout, decode)
    #[error("HTTP error: {0}")]
    Http(String),

    /// Non-2xx response
    #[error("unexpected status {status} (correlation id {correlation_id:?}): {body}")]
    Status {
        status: u16,
        correlation_id: Option<String>,
        body: String,
    },

    /// The service reports the resource already exists
    #[error("{0} already exists")]
    AlreadyExists(String),

    /// Streaming upload failed part-way
    #[error("upload failed after {written} of {expected} bytes: {message}")]
    Upload {
        written: u64,
        expected: u64,
        message: String,
    },

    /// A logical key resolved to more than one remote object
    #[error("consistency violation: {count} {kind} objects match {key}")]
    Conflict {
        kind: &'static str,
        key: String,
        count: usize,
    },

    /// A list endpoint returned more matches than requested
    #[error("list returned {count} results, more than the limit of {limit}")]
    TooManyResults { count: u64, limit: u64 },

    /// An async task reached `failed` or `canceled`
    #[error("task {href} {state}: {description}")]
    TaskFailed {
        href: String,
        state: String,
        description: String,
    },

    /// Token endpoint failure
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Cancelled or past deadline
    #[error(transparent)]
    Context(#[from] ContextError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ContentError {
    /// Build a status error, truncating the body.
    pub fn status(status: u16, correlation_id: Option<String>, body: &str) -> Self {
        ContentError::Status {
            status,
            correlation_id,
            body: truncate_body(body),
        }
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, ContentError::AlreadyExists(_))
    }
}

impl From<reqwest::Error> for ContentError {
    fn from(err: reqwest::Error) -> Self {
        ContentError::Http(err.to_string())
    }
}

fn truncate_body(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY {
        return body.to_string();
    }
    let mut end = MAX_ERROR_BODY;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_body_is_truncated() {
        let long = "x".repeat(2000);
        match ContentError::status(500, None, &long) {
            ContentError::Status { body, .. } => {
                assert_eq!(body.len(), MAX_ERROR_BODY + 3);
                assert!(body.ends_with("..."));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let long = "é".repeat(400);
        let truncated = truncate_body(&long);
        assert!(truncated.len() <= MAX_ERROR_BODY + 3);
    }

    #[test]
    fn upload_error_reports_progress() {
        let err = ContentError::Upload {
            written: 10,
            expected: 20,
            message: "broken pipe".into(),
        };
        assert!(err.to_string().contains("10 of 20"));
    }
}
