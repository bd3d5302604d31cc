//! Publishing configuration.

use std::fmt;

use edge_content::config::DEFAULT_STORAGE_CLASS;
use edge_content::GuardMode;

/// Name of the per-domain file repository that stages uploaded tarballs.
pub const DEFAULT_STAGING_REPO: &str = "ostree-staging";

/// Relative path prefix of staged tarballs inside the staging repository.
pub const DEFAULT_TARBALL_PREFIX: &str = "commits";

/// Credentials embedded in published distribution URLs.
#[derive(Clone, PartialEq, Eq)]
pub struct DistributionCredentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for DistributionCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DistributionCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// How repositories are published.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    pub guard_mode: GuardMode,
    /// Storage class of newly provisioned domains.
    pub storage_class: String,
    pub staging_repo_name: String,
    pub tarball_path_prefix: String,
    /// When set, the published URL carries `user:password@`.
    pub distribution_credentials: Option<DistributionCredentials>,
    /// Delete a distribution created by this publish when a later step fails.
    pub rollback_distribution: bool,
    /// x509 subject allowed through the turnpike guard.
    pub turnpike_subject: String,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            guard_mode: GuardMode::default(),
            storage_class: DEFAULT_STORAGE_CLASS.to_string(),
            staging_repo_name: DEFAULT_STAGING_REPO.to_string(),
            tarball_path_prefix: DEFAULT_TARBALL_PREFIX.to_string(),
            distribution_credentials: None,
            rollback_distribution: false,
            turnpike_subject: String::new(),
        }
    }
}

impl BuildConfig {
    pub fn with_guard_mode(mut self, mode: GuardMode) -> Self {
        self.guard_mode = mode;
        self
    }

    pub fn with_storage_class(mut self, storage_class: &str) -> Self {
        self.storage_class = storage_class.to_string();
        self
    }

    pub fn with_turnpike_subject(mut self, subject: &str) -> Self {
        self.turnpike_subject = subject.to_string();
        self
    }

    pub fn with_distribution_credentials(mut self, username: &str, password: &str) -> Self {
        self.distribution_credentials = Some(DistributionCredentials {
            username: username.to_string(),
            password: password.to_string(),
        });
        self
    }

    pub fn with_rollback_distribution(mut self, enabled: bool) -> Self {
        self.rollback_distribution = enabled;
        self
    }

    pub fn with_staging_repo_name(mut self, name: &str) -> Self {
        self.staging_repo_name = name.to_string();
        self
    }

    /// Check invariants that would otherwise fail halfway through a publish.
    pub fn validate(&self) -> Result<(), String> {
        if self.staging_repo_name.trim().is_empty() {
            return Err("staging repository name must not be empty".into());
        }
        if self.storage_class.trim().is_empty() {
            return Err("storage class must not be empty".into());
        }
        if self.guard_mode == GuardMode::Turnpike && self.turnpike_subject.trim().is_empty() {
            return Err("turnpike guard mode requires a subject".into());
        }
        Ok(())
    }
}
