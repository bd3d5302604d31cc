//! Structured lifecycle events for repository publishing.
//!
//! Every publish runs inside a [`publish_span`]; the `emit_*` functions log
//! one `info!` event per lifecycle step with an `event` field that log
//! pipelines can key on.

use tracing::{info, warn};

/// Span tagging all events of one publish.
pub fn publish_span(build_id: &str, org_id: &str, repo_id: &str) -> tracing::Span {
    tracing::info_span!("edge.publish", build_id = %build_id, org_id = %org_id, repo_id = %repo_id)
}

pub fn emit_publish_started(build_id: &str, org_id: &str, repo_id: &str) {
    info!(event = "publish.started", build_id = %build_id, org_id = %org_id, repo_id = %repo_id);
}

/// One pipeline step finished.
pub fn emit_step_completed(build_id: &str, step: &str, duration_ms: u64) {
    info!(
        event = "publish.step",
        build_id = %build_id,
        step = step,
        duration_ms = duration_ms,
    );
}

pub fn emit_publish_finished(build_id: &str, duration_ms: u64, distribution_url: &str) {
    info!(
        event = "publish.finished",
        build_id = %build_id,
        duration_ms = duration_ms,
        distribution_url = %distribution_url,
    );
}

pub fn emit_publish_failed(build_id: &str, duration_ms: u64, error: &dyn std::fmt::Display) {
    warn!(
        event = "publish.failed",
        build_id = %build_id,
        duration_ms = duration_ms,
        error = %error,
    );
}

/// A distribution created by a failed publish was removed again.
pub fn emit_distribution_rolled_back(build_id: &str, href: &str) {
    warn!(event = "publish.rollback", build_id = %build_id, href = %href);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_span_enter() {
        let _span = publish_span("build-1", "42", "repo-1").entered();
        emit_step_completed("build-1", "domain", 3);
    }
}
