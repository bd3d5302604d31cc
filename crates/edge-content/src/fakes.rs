//! In-memory content service for tests.
//!
//! `MemoryContentApi` keeps every object in a mutex-guarded map, completes
//! tasks after a configurable number of polls and counts calls per operation
//! so tests can assert idempotency.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use edge_jobs::Context;
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;

use crate::api::{ArtifactUpload, ContentApi, TaskHref, DEFAULT_DOMAIN};
use crate::error::ContentError;
use crate::model::{
    Artifact, CompositeGuard, Distribution, Domain, FileRepository, HeaderGuard, NewCompositeGuard,
    NewDistribution, NewDomain, NewFileContent, NewFileRepository, NewHeaderGuard,
    NewOstreeRepository, NewRbacGuard, OstreeImportAll, OstreeRepository, RbacGuard, Task,
    TaskErrorDetail, TaskState,
};
use crate::Result;

pub const FAKE_BASE_URL: &str = "https://content.example.com";

#[derive(Debug)]
struct FakeTask {
    created: Vec<String>,
    reads: u32,
    fail: bool,
}

#[derive(Debug, Default)]
struct State {
    next_id: u64,
    domains: Vec<Domain>,
    artifacts: Vec<(String, Artifact)>,
    file_repos: Vec<(String, FileRepository)>,
    file_contents: Vec<(String, NewFileContent)>,
    versions: HashSet<String>,
    ostree_repos: Vec<(String, OstreeRepository)>,
    imports: Vec<(String, OstreeImportAll)>,
    header_guards: Vec<(String, HeaderGuard)>,
    rbac_guards: Vec<(String, RbacGuard)>,
    composite_guards: Vec<(String, CompositeGuard)>,
    distributions: Vec<(String, Distribution)>,
    tasks: HashMap<String, FakeTask>,
    calls: HashMap<&'static str, usize>,
    failing_calls: HashSet<&'static str>,
    failing_tasks: HashSet<&'static str>,
    race_next_upload: bool,
}

impl State {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn href(&mut self, domain: &str, path: &str) -> String {
        let id = self.next_id();
        format!("/api/pulp/{domain}/api/v3/{path}{id:08}/")
    }

    /// Register a task; its side effects are applied by the caller only when
    /// the task is not set to fail.
    fn task(&mut self, domain: &str, op: &'static str, created: Vec<String>) -> (TaskHref, bool) {
        let href = self.href(domain, "tasks/");
        let fail = self.failing_tasks.contains(op);
        self.tasks.insert(
            href.clone(),
            FakeTask {
                created: if fail { Vec::new() } else { created },
                reads: 0,
                fail,
            },
        );
        (href, fail)
    }
}

fn by_name<T: Clone>(
    items: &[(String, T)],
    domain: &str,
    name: &str,
    name_of: impl Fn(&T) -> &str,
) -> Vec<T> {
    items
        .iter()
        .filter(|(d, item)| d == domain && name_of(item) == name)
        .map(|(_, item)| item.clone())
        .collect()
}

fn live(ctx: &Context) -> Result<()> {
    match ctx.err() {
        Some(err) => Err(err.into()),
        None => Ok(()),
    }
}

fn already_exists(kind: &str, name: &str) -> ContentError {
    ContentError::AlreadyExists(format!("{kind} {name}"))
}

/// In-memory [`ContentApi`].
#[derive(Debug)]
pub struct MemoryContentApi {
    state: Mutex<State>,
    polls_until_complete: AtomicU32,
}

impl Default for MemoryContentApi {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryContentApi {
    /// Tasks complete on their first read.
    pub fn new() -> Self {
        MemoryContentApi {
            state: Mutex::new(State::default()),
            polls_until_complete: AtomicU32::new(1),
        }
    }

    /// Tasks complete on their `polls`-th read.
    pub fn with_polls_until_complete(self, polls: u32) -> Self {
        self.polls_until_complete
            .store(polls.max(1), Ordering::Relaxed);
        self
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Count the call and apply any injected failure.
    fn record(&self, op: &'static str) -> Result<MutexGuard<'_, State>> {
        let mut state = self.lock();
        *state.calls.entry(op).or_default() += 1;
        if state.failing_calls.contains(op) {
            return Err(ContentError::status(500, None, &format!("injected failure in {op}")));
        }
        Ok(state)
    }

    /// Number of calls made to `op` (trait method name).
    pub fn calls(&self, op: &str) -> usize {
        self.lock().calls.get(op).copied().unwrap_or(0)
    }

    /// Make every call to `op` fail with HTTP 500.
    pub fn fail_calls(&self, op: &'static str) {
        self.lock().failing_calls.insert(op);
    }

    /// Make tasks started by `op` end in `failed`.
    pub fn fail_tasks(&self, op: &'static str) {
        self.lock().failing_tasks.insert(op);
    }

    /// Have the next upload lose to a concurrent upload of the same content:
    /// the artifact is stored, but the call reports that it already exists.
    pub fn race_next_upload(&self) {
        self.lock().race_next_upload = true;
    }

    pub fn seed_domain(&self, domain: Domain) {
        self.lock().domains.push(domain);
    }

    pub fn seed_header_guard(&self, domain: &str, guard: HeaderGuard) {
        self.lock().header_guards.push((domain.to_string(), guard));
    }

    pub fn seed_file_repository(&self, domain: &str, repo: FileRepository) {
        self.lock().file_repos.push((domain.to_string(), repo));
    }

    pub fn file_repositories(&self, domain: &str) -> Vec<FileRepository> {
        self.lock()
            .file_repos
            .iter()
            .filter(|(d, _)| d == domain)
            .map(|(_, r)| r.clone())
            .collect()
    }

    pub fn seed_composite_guard(&self, domain: &str, guard: CompositeGuard) {
        self.lock()
            .composite_guards
            .push((domain.to_string(), guard));
    }

    pub fn domains(&self) -> Vec<Domain> {
        self.lock().domains.clone()
    }

    pub fn artifacts(&self, domain: &str) -> Vec<Artifact> {
        self.lock()
            .artifacts
            .iter()
            .filter(|(d, _)| d == domain)
            .map(|(_, a)| a.clone())
            .collect()
    }

    pub fn distributions(&self, domain: &str) -> Vec<Distribution> {
        self.lock()
            .distributions
            .iter()
            .filter(|(d, _)| d == domain)
            .map(|(_, a)| a.clone())
            .collect()
    }

    pub fn composite_guards(&self, domain: &str) -> Vec<CompositeGuard> {
        self.lock()
            .composite_guards
            .iter()
            .filter(|(d, _)| d == domain)
            .map(|(_, g)| g.clone())
            .collect()
    }

    /// Repository versions created and not yet deleted.
    pub fn live_versions(&self) -> Vec<String> {
        let mut versions: Vec<String> = self.lock().versions.iter().cloned().collect();
        versions.sort();
        versions
    }

    pub fn imports(&self, domain: &str) -> Vec<OstreeImportAll> {
        self.lock()
            .imports
            .iter()
            .filter(|(d, _)| d == domain)
            .map(|(_, i)| i.clone())
            .collect()
    }

    pub fn task_reads(&self, href: &str) -> u32 {
        self.lock().tasks.get(href).map(|t| t.reads).unwrap_or(0)
    }
}

/// Split a single-part multipart body into its payload.
fn multipart_payload(body: &[u8]) -> Option<&[u8]> {
    let start = body.windows(4).position(|w| w == b"\r\n\r\n")? + 4;
    let end = body
        .windows(4)
        .rposition(|w| w == b"\r\n--")
        .filter(|&end| end >= start)?;
    Some(&body[start..end])
}

#[async_trait]
impl ContentApi for MemoryContentApi {
    async fn list_domains(&self, ctx: &Context, name: &str) -> Result<Vec<Domain>> {
        live(ctx)?;
        let state = self.record("list_domains")?;
        Ok(state.domains.iter().filter(|d| d.name == name).cloned().collect())
    }

    async fn create_domain(&self, ctx: &Context, domain: &NewDomain) -> Result<Domain> {
        live(ctx)?;
        let mut state = self.record("create_domain")?;
        if state.domains.iter().any(|d| d.name == domain.name) {
            return Err(already_exists("domain", &domain.name));
        }
        let created = Domain {
            pulp_href: state.href(DEFAULT_DOMAIN, "domains/"),
            name: domain.name.clone(),
            storage_class: domain.storage_class.clone(),
            redirect_to_object_storage: domain.redirect_to_object_storage,
            hide_guarded_distributions: domain.hide_guarded_distributions,
        };
        state.domains.push(created.clone());
        Ok(created)
    }

    async fn delete_domain(&self, ctx: &Context, href: &str) -> Result<TaskHref> {
        live(ctx)?;
        let mut state = self.record("delete_domain")?;
        let (task, fail) = state.task(DEFAULT_DOMAIN, "delete_domain", Vec::new());
        if !fail {
            state.domains.retain(|d| d.pulp_href != href);
        }
        Ok(task)
    }

    async fn get_task(&self, ctx: &Context, _domain: &str, href: &str) -> Result<Task> {
        live(ctx)?;
        let polls = self.polls_until_complete.load(Ordering::Relaxed);
        let mut state = self.record("get_task")?;
        let task = state.tasks.get_mut(href).ok_or_else(|| ContentError::NotFound {
            kind: "task",
            key: href.to_string(),
        })?;
        task.reads += 1;
        let (task_state, error) = if task.reads < polls {
            (TaskState::Running, None)
        } else if task.fail {
            (
                TaskState::Failed,
                Some(TaskErrorDetail {
                    description: "injected task failure".into(),
                    traceback: None,
                }),
            )
        } else {
            (TaskState::Completed, None)
        };
        Ok(Task {
            pulp_href: href.to_string(),
            state: task_state,
            created_resources: if task_state == TaskState::Completed {
                task.created.clone()
            } else {
                Vec::new()
            },
            error,
        })
    }

    async fn find_artifacts(
        &self,
        ctx: &Context,
        domain: &str,
        sha256: &str,
    ) -> Result<Vec<Artifact>> {
        live(ctx)?;
        let state = self.record("find_artifacts")?;
        Ok(state
            .artifacts
            .iter()
            .filter(|(d, a)| d == domain && a.sha256 == sha256)
            .map(|(_, a)| a.clone())
            .collect())
    }

    async fn upload_artifact(
        &self,
        ctx: &Context,
        domain: &str,
        mut upload: ArtifactUpload,
    ) -> Result<Artifact> {
        self.record("upload_artifact")?;
        let mut body = Vec::new();
        ctx.run(upload.body.read_to_end(&mut body)).await??;

        if body.len() as u64 != upload.content_length {
            return Err(ContentError::status(
                400,
                None,
                &format!(
                    "content length {} does not match body of {} bytes",
                    upload.content_length,
                    body.len()
                ),
            ));
        }
        let payload = multipart_payload(&body)
            .ok_or_else(|| ContentError::status(400, None, "malformed multipart body"))?;
        let digest = hex::encode(Sha256::digest(payload));
        if digest != upload.sha256 {
            return Err(ContentError::status(400, None, "sha256 checksum mismatch"));
        }

        let mut state = self.lock();
        if state
            .artifacts
            .iter()
            .any(|(d, a)| d == domain && a.sha256 == digest)
        {
            return Err(already_exists("artifact", &digest));
        }
        let artifact = Artifact {
            pulp_href: state.href(domain, "artifacts/"),
            sha256: digest.clone(),
            size: payload.len() as u64,
        };
        state.artifacts.push((domain.to_string(), artifact.clone()));
        if std::mem::take(&mut state.race_next_upload) {
            return Err(already_exists("artifact", &digest));
        }
        Ok(artifact)
    }

    async fn list_file_repositories(
        &self,
        ctx: &Context,
        domain: &str,
        name: &str,
    ) -> Result<Vec<FileRepository>> {
        live(ctx)?;
        let state = self.record("list_file_repositories")?;
        Ok(by_name(&state.file_repos, domain, name, |r| r.name.as_str()))
    }

    async fn create_file_repository(
        &self,
        ctx: &Context,
        domain: &str,
        repo: &NewFileRepository,
    ) -> Result<FileRepository> {
        live(ctx)?;
        let mut state = self.record("create_file_repository")?;
        if !by_name(&state.file_repos, domain, &repo.name, |r| r.name.as_str()).is_empty() {
            return Err(already_exists("file repository", &repo.name));
        }
        let created = FileRepository {
            pulp_href: state.href(domain, "repositories/file/file/"),
            name: repo.name.clone(),
            latest_version_href: None,
            retain_repo_versions: Some(repo.retain_repo_versions),
        };
        state.file_repos.push((domain.to_string(), created.clone()));
        Ok(created)
    }

    async fn delete_file_repository(
        &self,
        ctx: &Context,
        domain: &str,
        href: &str,
    ) -> Result<TaskHref> {
        live(ctx)?;
        let mut state = self.record("delete_file_repository")?;
        let (task, fail) = state.task(domain, "delete_file_repository", Vec::new());
        if !fail {
            state.file_repos.retain(|(_, r)| r.pulp_href != href);
        }
        Ok(task)
    }

    async fn create_file_content(
        &self,
        ctx: &Context,
        domain: &str,
        content: &NewFileContent,
    ) -> Result<TaskHref> {
        live(ctx)?;
        let mut state = self.record("create_file_content")?;
        let content_href = state.href(domain, "content/file/files/");
        let version = state.next_id();
        let version_href = format!("{}versions/{version}/", content.repository);
        let (task, fail) = state.task(
            domain,
            "create_file_content",
            vec![version_href.clone(), content_href],
        );
        if !fail {
            state.versions.insert(version_href.clone());
            state.file_contents.push((domain.to_string(), content.clone()));
            let repo = content.repository.clone();
            if let Some((_, r)) = state.file_repos.iter_mut().find(|(_, r)| r.pulp_href == repo) {
                r.latest_version_href = Some(version_href);
            }
        }
        Ok(task)
    }

    async fn delete_repository_version(
        &self,
        ctx: &Context,
        domain: &str,
        href: &str,
    ) -> Result<TaskHref> {
        live(ctx)?;
        let mut state = self.record("delete_repository_version")?;
        let (task, fail) = state.task(domain, "delete_repository_version", Vec::new());
        if !fail {
            state.versions.remove(href);
        }
        Ok(task)
    }

    async fn list_ostree_repositories(
        &self,
        ctx: &Context,
        domain: &str,
        name: &str,
    ) -> Result<Vec<OstreeRepository>> {
        live(ctx)?;
        let state = self.record("list_ostree_repositories")?;
        Ok(by_name(&state.ostree_repos, domain, name, |r| r.name.as_str()))
    }

    async fn create_ostree_repository(
        &self,
        ctx: &Context,
        domain: &str,
        repo: &NewOstreeRepository,
    ) -> Result<OstreeRepository> {
        live(ctx)?;
        let mut state = self.record("create_ostree_repository")?;
        if !by_name(&state.ostree_repos, domain, &repo.name, |r| r.name.as_str()).is_empty() {
            return Err(already_exists("ostree repository", &repo.name));
        }
        let created = OstreeRepository {
            pulp_href: state.href(domain, "repositories/ostree/ostree/"),
            name: repo.name.clone(),
        };
        state.ostree_repos.push((domain.to_string(), created.clone()));
        Ok(created)
    }

    async fn import_all(
        &self,
        ctx: &Context,
        domain: &str,
        repo_href: &str,
        import: &OstreeImportAll,
    ) -> Result<TaskHref> {
        live(ctx)?;
        let mut state = self.record("import_all")?;
        let version = state.next_id();
        let version_href = format!("{repo_href}versions/{version}/");
        let (task, fail) = state.task(domain, "import_all", vec![version_href]);
        if !fail {
            state.imports.push((domain.to_string(), import.clone()));
        }
        Ok(task)
    }

    async fn list_header_guards(
        &self,
        ctx: &Context,
        domain: &str,
        name: &str,
    ) -> Result<Vec<HeaderGuard>> {
        live(ctx)?;
        let state = self.record("list_header_guards")?;
        Ok(by_name(&state.header_guards, domain, name, |g| g.name.as_str()))
    }

    async fn create_header_guard(
        &self,
        ctx: &Context,
        domain: &str,
        guard: &NewHeaderGuard,
    ) -> Result<HeaderGuard> {
        live(ctx)?;
        let mut state = self.record("create_header_guard")?;
        if !by_name(&state.header_guards, domain, &guard.name, |g| g.name.as_str()).is_empty() {
            return Err(already_exists("header guard", &guard.name));
        }
        let created = HeaderGuard {
            pulp_href: state.href(domain, "contentguards/core/header/"),
            name: guard.name.clone(),
            header_name: guard.header_name.clone(),
            header_value: guard.header_value.clone(),
            jq_filter: guard.jq_filter.clone(),
        };
        state.header_guards.push((domain.to_string(), created.clone()));
        Ok(created)
    }

    async fn list_rbac_guards(
        &self,
        ctx: &Context,
        domain: &str,
        name: &str,
    ) -> Result<Vec<RbacGuard>> {
        live(ctx)?;
        let state = self.record("list_rbac_guards")?;
        Ok(by_name(&state.rbac_guards, domain, name, |g| g.name.as_str()))
    }

    async fn create_rbac_guard(
        &self,
        ctx: &Context,
        domain: &str,
        guard: &NewRbacGuard,
    ) -> Result<RbacGuard> {
        live(ctx)?;
        let mut state = self.record("create_rbac_guard")?;
        if !by_name(&state.rbac_guards, domain, &guard.name, |g| g.name.as_str()).is_empty() {
            return Err(already_exists("rbac guard", &guard.name));
        }
        let created = RbacGuard {
            pulp_href: state.href(domain, "contentguards/core/rbac/"),
            name: guard.name.clone(),
            description: guard.description.clone(),
        };
        state.rbac_guards.push((domain.to_string(), created.clone()));
        Ok(created)
    }

    async fn list_composite_guards(
        &self,
        ctx: &Context,
        domain: &str,
        name: &str,
    ) -> Result<Vec<CompositeGuard>> {
        live(ctx)?;
        let state = self.record("list_composite_guards")?;
        Ok(by_name(&state.composite_guards, domain, name, |g| g.name.as_str()))
    }

    async fn create_composite_guard(
        &self,
        ctx: &Context,
        domain: &str,
        guard: &NewCompositeGuard,
    ) -> Result<CompositeGuard> {
        live(ctx)?;
        let mut state = self.record("create_composite_guard")?;
        if !by_name(&state.composite_guards, domain, &guard.name, |g| g.name.as_str()).is_empty() {
            return Err(already_exists("composite guard", &guard.name));
        }
        let created = CompositeGuard {
            pulp_href: state.href(domain, "contentguards/core/composite/"),
            name: guard.name.clone(),
            guards: guard.guards.clone(),
        };
        state.composite_guards.push((domain.to_string(), created.clone()));
        Ok(created)
    }

    async fn delete_guard(&self, ctx: &Context, _domain: &str, href: &str) -> Result<()> {
        live(ctx)?;
        let mut state = self.record("delete_guard")?;
        state.header_guards.retain(|(_, g)| g.pulp_href != href);
        state.rbac_guards.retain(|(_, g)| g.pulp_href != href);
        state.composite_guards.retain(|(_, g)| g.pulp_href != href);
        Ok(())
    }

    async fn list_distributions(
        &self,
        ctx: &Context,
        domain: &str,
        name: &str,
    ) -> Result<Vec<Distribution>> {
        live(ctx)?;
        let state = self.record("list_distributions")?;
        Ok(by_name(&state.distributions, domain, name, |d| d.name.as_str()))
    }

    async fn create_distribution(
        &self,
        ctx: &Context,
        domain: &str,
        distribution: &NewDistribution,
    ) -> Result<TaskHref> {
        live(ctx)?;
        let mut state = self.record("create_distribution")?;
        if !by_name(&state.distributions, domain, &distribution.name, |d| d.name.as_str())
            .is_empty()
        {
            return Err(already_exists("distribution", &distribution.name));
        }
        let href = state.href(domain, "distributions/ostree/ostree/");
        let (task, fail) = state.task(domain, "create_distribution", vec![href.clone()]);
        if !fail {
            let created = Distribution {
                pulp_href: href,
                name: distribution.name.clone(),
                base_path: distribution.base_path.clone(),
                base_url: format!(
                    "{FAKE_BASE_URL}/api/pulp-content/{domain}/{}/",
                    distribution.base_path
                ),
                content_guard: Some(distribution.content_guard.clone()),
                repository: Some(distribution.repository.clone()),
            };
            state.distributions.push((domain.to_string(), created));
        }
        Ok(task)
    }

    async fn get_distribution(
        &self,
        ctx: &Context,
        _domain: &str,
        href: &str,
    ) -> Result<Distribution> {
        live(ctx)?;
        let state = self.record("get_distribution")?;
        state
            .distributions
            .iter()
            .find(|(_, d)| d.pulp_href == href)
            .map(|(_, d)| d.clone())
            .ok_or_else(|| ContentError::NotFound {
                kind: "distribution",
                key: href.to_string(),
            })
    }

    async fn delete_distribution(
        &self,
        ctx: &Context,
        domain: &str,
        href: &str,
    ) -> Result<TaskHref> {
        live(ctx)?;
        let mut state = self.record("delete_distribution")?;
        let (task, fail) = state.task(domain, "delete_distribution", Vec::new());
        if !fail {
            state.distributions.retain(|(_, d)| d.pulp_href != href);
        }
        Ok(task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_is_extracted_from_envelope() {
        let env = crate::multipart::Envelope::with_boundary("b", "file", "f");
        let mut body = env.head();
        body.extend_from_slice(b"data\r\n--inside");
        body.extend_from_slice(&env.tail());
        assert_eq!(multipart_payload(&body), Some(&b"data\r\n--inside"[..]));
    }

    #[tokio::test]
    async fn tasks_complete_after_configured_polls() {
        let api = MemoryContentApi::new().with_polls_until_complete(3);
        let ctx = Context::background();
        let task = api
            .delete_repository_version(&ctx, "em1d", "/v/1/")
            .await
            .unwrap();
        assert_eq!(api.get_task(&ctx, "em1d", &task).await.unwrap().state, TaskState::Running);
        assert_eq!(api.get_task(&ctx, "em1d", &task).await.unwrap().state, TaskState::Running);
        assert_eq!(api.get_task(&ctx, "em1d", &task).await.unwrap().state, TaskState::Completed);
        assert_eq!(api.task_reads(&task), 3);
    }

    #[tokio::test]
    async fn injected_call_failure_is_counted() {
        let api = MemoryContentApi::new();
        api.fail_calls("list_domains");
        let err = api.list_domains(&Context::background(), "em1d").await.unwrap_err();
        assert!(matches!(err, ContentError::Status { status: 500, .. }));
        assert_eq!(api.calls("list_domains"), 1);
    }
}
