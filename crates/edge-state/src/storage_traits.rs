//! Build-result storage trait
//!
//! `BuildResultStore` persists one `RepoBuildRecord` per repository build:
//! the tracked entity a publish job moves through
//! `BUILDING -> SUCCESS | ERROR`. The trait is backend-agnostic; an in-memory
//! implementation lives in the `fakes` module.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Unique identifier of a tracked build.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoBuildId(pub String);

impl RepoBuildId {
    pub fn new() -> Self {
        RepoBuildId(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RepoBuildId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RepoBuildId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RepoBuildStatus {
    Building,
    Success,
    Error,
}

impl RepoBuildStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RepoBuildStatus::Building => "BUILDING",
            RepoBuildStatus::Success => "SUCCESS",
            RepoBuildStatus::Error => "ERROR",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, RepoBuildStatus::Building)
    }

    /// Terminal states only follow `BUILDING`; any state may restart a build.
    pub fn can_move_to(self, next: RepoBuildStatus) -> bool {
        match next {
            RepoBuildStatus::Building => true,
            RepoBuildStatus::Success | RepoBuildStatus::Error => self == RepoBuildStatus::Building,
        }
    }
}

impl std::fmt::Display for RepoBuildStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracked result of building and publishing one repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepoBuildRecord {
    pub id: RepoBuildId,
    pub org_id: String,
    pub repo_id: String,
    /// Final distribution URL, set on success.
    pub distribution_url: Option<String>,
    pub status: RepoBuildStatus,
    /// Error text, set on failure.
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RepoBuildRecord {
    pub fn new(org_id: &str, repo_id: &str) -> Self {
        let now = Utc::now();
        RepoBuildRecord {
            id: RepoBuildId::new(),
            org_id: org_id.to_string(),
            repo_id: repo_id.to_string(),
            distribution_url: None,
            status: RepoBuildStatus::Building,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn transition(&mut self, next: RepoBuildStatus) -> StorageResult<()> {
        if !self.status.can_move_to(next) {
            return Err(StorageError::InvalidTransition {
                id: self.id.0.clone(),
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Start (or restart) a build; clears any previous error.
    pub fn mark_building(&mut self) -> StorageResult<()> {
        self.transition(RepoBuildStatus::Building)?;
        self.error = None;
        Ok(())
    }

    pub fn mark_success(&mut self, distribution_url: &str) -> StorageResult<()> {
        self.transition(RepoBuildStatus::Success)?;
        self.distribution_url = Some(distribution_url.to_string());
        self.error = None;
        Ok(())
    }

    pub fn mark_error(&mut self, error: &str) -> StorageResult<()> {
        self.transition(RepoBuildStatus::Error)?;
        self.error = Some(error.to_string());
        Ok(())
    }
}

/// Persistence for tracked repository builds.
///
/// Guarantees:
/// - `load` after `save` returns the saved record.
/// - `create` rejects an id that is already stored.
#[async_trait]
pub trait BuildResultStore: Send + Sync {
    /// Insert a new record.
    async fn create(&self, record: &RepoBuildRecord) -> StorageResult<()>;

    /// Fetch a record by id. Returns `StorageError::NotFound` if absent.
    async fn load(&self, id: &RepoBuildId) -> StorageResult<RepoBuildRecord>;

    /// Overwrite an existing record.
    async fn save(&self, record: &RepoBuildRecord) -> StorageResult<()>;

    /// Records of one organization, newest first.
    async fn list_for_org(&self, org_id: &str) -> StorageResult<Vec<RepoBuildRecord>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_record_is_building() {
        let record = RepoBuildRecord::new("1", "r1");
        assert_eq!(record.status, RepoBuildStatus::Building);
        assert!(record.distribution_url.is_none());
    }

    #[test]
    fn success_requires_building() {
        let mut record = RepoBuildRecord::new("1", "r1");
        record.mark_success("https://x/").unwrap();
        let err = record.mark_error("late failure").unwrap_err();
        assert!(matches!(err, StorageError::InvalidTransition { .. }));
        assert_eq!(record.status, RepoBuildStatus::Success);
    }

    #[test]
    fn rebuild_clears_error() {
        let mut record = RepoBuildRecord::new("1", "r1");
        record.mark_error("boom").unwrap();
        record.mark_building().unwrap();
        assert_eq!(record.status, RepoBuildStatus::Building);
        assert!(record.error.is_none());
    }

    #[test]
    fn status_serializes_uppercase() {
        let json = serde_json::to_string(&RepoBuildStatus::Success).unwrap();
        assert_eq!(json, "\"SUCCESS\"");
    }
}
