//! Wire types for the content service API.
//!
//! Every object is addressed by its `pulp_href`, an absolute path on the
//! service host. Request types are separate from the response types they
//! create.

use serde::{Deserialize, Serialize};

/// Paged list envelope. Lists are always requested with a `limit`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListResponse<T> {
    pub count: u64,
    #[serde(default = "Vec::new")]
    pub results: Vec<T>,
}

/// Body of a 202 response to an asynchronous mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResponse {
    pub task: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Waiting,
    Running,
    Canceling,
    Completed,
    Failed,
    #[serde(alias = "cancelled")]
    Canceled,
    Skipped,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Canceled | TaskState::Skipped
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Waiting => "waiting",
            TaskState::Running => "running",
            TaskState::Canceling => "canceling",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
            TaskState::Canceled => "canceled",
            TaskState::Skipped => "skipped",
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error payload attached to a failed task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskErrorDetail {
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traceback: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub pulp_href: String,
    pub state: TaskState,
    #[serde(default)]
    pub created_resources: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskErrorDetail>,
}

/// Tenant namespace. One per organization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Domain {
    pub pulp_href: String,
    pub name: String,
    #[serde(default)]
    pub storage_class: String,
    #[serde(default)]
    pub redirect_to_object_storage: bool,
    #[serde(default)]
    pub hide_guarded_distributions: bool,
}

impl Domain {
    /// The domain UUID: last non-empty segment of its href.
    pub fn uuid(&self) -> Option<&str> {
        self.pulp_href.rsplit('/').find(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDomain {
    pub name: String,
    pub storage_class: String,
    pub storage_settings: serde_json::Value,
    pub redirect_to_object_storage: bool,
    pub hide_guarded_distributions: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub pulp_href: String,
    pub sha256: String,
    #[serde(default)]
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRepository {
    pub pulp_href: String,
    pub name: String,
    #[serde(default)]
    pub latest_version_href: Option<String>,
    #[serde(default)]
    pub retain_repo_versions: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewFileRepository {
    pub name: String,
    pub retain_repo_versions: u32,
}

/// Adds an artifact to a file repository as a content unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewFileContent {
    pub repository: String,
    pub artifact: String,
    pub relative_path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OstreeRepository {
    pub pulp_href: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOstreeRepository {
    pub name: String,
}

/// Import every commit of an uploaded OSTree tarball.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OstreeImportAll {
    pub artifact: String,
    pub repository_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeaderGuard {
    pub pulp_href: String,
    pub name: String,
    pub header_name: String,
    pub header_value: String,
    #[serde(default)]
    pub jq_filter: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewHeaderGuard {
    pub name: String,
    pub header_name: String,
    pub header_value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jq_filter: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RbacGuard {
    pub pulp_href: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRbacGuard {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeGuard {
    pub pulp_href: String,
    pub name: String,
    #[serde(default)]
    pub guards: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCompositeGuard {
    pub name: String,
    pub guards: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Distribution {
    pub pulp_href: String,
    pub name: String,
    pub base_path: String,
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub content_guard: Option<String>,
    #[serde(default)]
    pub repository: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDistribution {
    pub name: String,
    pub base_path: String,
    pub content_guard: String,
    pub repository: String,
}
