//! reqwest-backed [`ContentApi`].

use std::sync::Arc;

use async_trait::async_trait;
use edge_jobs::{Context, MetricsSink, NoopMetrics};
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

use crate::api::{ArtifactUpload, ContentApi, TaskHref, DEFAULT_DOMAIN};
use crate::auth::Authorizer;
use crate::config::ContentConfig;
use crate::error::ContentError;
use crate::model::{
    Artifact, CompositeGuard, Distribution, Domain, FileRepository, HeaderGuard, ListResponse,
    NewCompositeGuard, NewDistribution, NewDomain, NewFileContent, NewFileRepository,
    NewHeaderGuard, NewOstreeRepository, NewRbacGuard, OstreeImportAll, OstreeRepository,
    RbacGuard, Task, TaskResponse,
};
use crate::upload::CHUNK_SIZE;
use crate::Result;

pub const CORRELATION_HEADER: &str = "X-Correlation-ID";
const RESPONSE_CORRELATION_HEADER: &str = "correlation-id";

/// Client for a Pulp-style content service.
pub struct HttpContentApi {
    config: ContentConfig,
    http: reqwest::Client,
    auth: Authorizer,
    metrics: Arc<dyn MetricsSink>,
}

impl HttpContentApi {
    pub fn new(config: ContentConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("edge-content/", env!("CARGO_PKG_VERSION")))
            .timeout(config.request_timeout)
            .build()?;
        let auth = Authorizer::from_credentials(&http, &config.credentials);
        Ok(HttpContentApi {
            config,
            http,
            auth,
            metrics: Arc::new(NoopMetrics),
        })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(ContentConfig::from_env()?)
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn config(&self) -> &ContentConfig {
        &self.config
    }

    fn url(&self, domain: &str, path: &str) -> String {
        format!("{}{}", self.config.api_root(domain), path)
    }

    /// Authorize, tag and send a request; map non-2xx to typed errors.
    async fn send(&self, ctx: &Context, request: RequestBuilder) -> Result<Response> {
        let mut request = self.auth.apply(ctx, request).await?;
        if let Some(id) = ctx.correlation_id() {
            request = request.header(CORRELATION_HEADER, id);
        }
        let request = request.build()?;
        let method = request.method().clone();
        let url = request.url().clone();

        let started = Instant::now();
        let sent = ctx.run(self.http.execute(request)).await?;
        let response = match sent {
            Ok(response) => response,
            Err(err) => {
                self.metrics
                    .observe_client_call(method.as_str(), 0, started.elapsed());
                warn!(method = %method, url = %url, error = %err, "content request failed");
                return Err(err.into());
            }
        };

        let status = response.status();
        self.metrics
            .observe_client_call(method.as_str(), status.as_u16(), started.elapsed());
        debug!(method = %method, url = %url, status = status.as_u16(), "content request");
        if status.is_success() {
            return Ok(response);
        }

        let correlation_id = response
            .headers()
            .get(RESPONSE_CORRELATION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .or_else(|| ctx.correlation_id().map(str::to_string));
        let body = response.text().await.unwrap_or_default();
        Err(classify_failure(status, correlation_id, &body, url.path()))
    }

    async fn get_json<T: DeserializeOwned>(&self, ctx: &Context, url: String) -> Result<T> {
        let response = self.send(ctx, self.http.get(url)).await?;
        Ok(ctx.run(response.json::<T>()).await??)
    }

    async fn post_json<B, T>(&self, ctx: &Context, url: String, body: &B) -> Result<T>
    where
        B: Serialize + Sync + ?Sized,
        T: DeserializeOwned,
    {
        let response = self.send(ctx, self.http.post(url).json(body)).await?;
        Ok(ctx.run(response.json::<T>()).await??)
    }

    async fn post_task<B>(&self, ctx: &Context, url: String, body: &B) -> Result<TaskHref>
    where
        B: Serialize + Sync + ?Sized,
    {
        let accepted: TaskResponse = self.post_json(ctx, url, body).await?;
        Ok(accepted.task)
    }

    async fn delete_task(&self, ctx: &Context, url: String) -> Result<TaskHref> {
        let response = self.send(ctx, self.http.request(Method::DELETE, url)).await?;
        let accepted: TaskResponse = ctx.run(response.json()).await??;
        Ok(accepted.task)
    }

    /// List with `limit`; more matches than the limit is an error, never a
    /// silently truncated page.
    async fn list<T: DeserializeOwned>(
        &self,
        ctx: &Context,
        url: String,
        query: &[(&str, &str)],
    ) -> Result<Vec<T>> {
        let limit = self.config.list_limit;
        let request = self
            .http
            .get(url)
            .query(query)
            .query(&[("limit", limit.to_string())]);
        let response = self.send(ctx, request).await?;
        let page: ListResponse<T> = ctx.run(response.json()).await??;
        complete_page(page, limit)
    }
}

/// Results of a page that holds every match.
pub(crate) fn complete_page<T>(page: ListResponse<T>, limit: u64) -> Result<Vec<T>> {
    if page.count > limit {
        return Err(ContentError::TooManyResults {
            count: page.count,
            limit,
        });
    }
    Ok(page.results)
}

pub(crate) fn classify_failure(
    status: StatusCode,
    correlation_id: Option<String>,
    body: &str,
    what: &str,
) -> ContentError {
    let exists = status == StatusCode::CONFLICT
        || (status == StatusCode::BAD_REQUEST && body.to_lowercase().contains("already exists"));
    if exists {
        ContentError::AlreadyExists(what.to_string())
    } else {
        ContentError::status(status.as_u16(), correlation_id, body)
    }
}

#[async_trait]
impl ContentApi for HttpContentApi {
    async fn list_domains(&self, ctx: &Context, name: &str) -> Result<Vec<Domain>> {
        self.list(ctx, self.url(DEFAULT_DOMAIN, "domains/"), &[("name", name)])
            .await
    }

    async fn create_domain(&self, ctx: &Context, domain: &NewDomain) -> Result<Domain> {
        self.post_json(ctx, self.url(DEFAULT_DOMAIN, "domains/"), domain)
            .await
    }

    async fn delete_domain(&self, ctx: &Context, href: &str) -> Result<TaskHref> {
        self.delete_task(ctx, self.config.href_url(href)).await
    }

    async fn get_task(&self, ctx: &Context, _domain: &str, href: &str) -> Result<Task> {
        self.get_json(ctx, self.config.href_url(href)).await
    }

    async fn find_artifacts(
        &self,
        ctx: &Context,
        domain: &str,
        sha256: &str,
    ) -> Result<Vec<Artifact>> {
        self.list(ctx, self.url(domain, "artifacts/"), &[("sha256", sha256)])
            .await
    }

    async fn upload_artifact(
        &self,
        ctx: &Context,
        domain: &str,
        upload: ArtifactUpload,
    ) -> Result<Artifact> {
        let stream = ReaderStream::with_capacity(upload.body, CHUNK_SIZE);
        let request = self
            .http
            .post(self.url(domain, "artifacts/"))
            .header(CONTENT_TYPE, upload.content_type)
            .header(CONTENT_LENGTH, upload.content_length)
            .body(reqwest::Body::wrap_stream(stream));
        let response = self.send(ctx, request).await?;
        Ok(ctx.run(response.json::<Artifact>()).await??)
    }

    async fn list_file_repositories(
        &self,
        ctx: &Context,
        domain: &str,
        name: &str,
    ) -> Result<Vec<FileRepository>> {
        self.list(ctx, self.url(domain, "repositories/file/file/"), &[("name", name)])
            .await
    }

    async fn create_file_repository(
        &self,
        ctx: &Context,
        domain: &str,
        repo: &NewFileRepository,
    ) -> Result<FileRepository> {
        self.post_json(ctx, self.url(domain, "repositories/file/file/"), repo)
            .await
    }

    async fn delete_file_repository(
        &self,
        ctx: &Context,
        _domain: &str,
        href: &str,
    ) -> Result<TaskHref> {
        self.delete_task(ctx, self.config.href_url(href)).await
    }

    async fn create_file_content(
        &self,
        ctx: &Context,
        domain: &str,
        content: &NewFileContent,
    ) -> Result<TaskHref> {
        self.post_task(ctx, self.url(domain, "content/file/files/"), content)
            .await
    }

    async fn delete_repository_version(
        &self,
        ctx: &Context,
        _domain: &str,
        href: &str,
    ) -> Result<TaskHref> {
        self.delete_task(ctx, self.config.href_url(href)).await
    }

    async fn list_ostree_repositories(
        &self,
        ctx: &Context,
        domain: &str,
        name: &str,
    ) -> Result<Vec<OstreeRepository>> {
        self.list(
            ctx,
            self.url(domain, "repositories/ostree/ostree/"),
            &[("name", name)],
        )
        .await
    }

    async fn create_ostree_repository(
        &self,
        ctx: &Context,
        domain: &str,
        repo: &NewOstreeRepository,
    ) -> Result<OstreeRepository> {
        self.post_json(ctx, self.url(domain, "repositories/ostree/ostree/"), repo)
            .await
    }

    async fn import_all(
        &self,
        ctx: &Context,
        _domain: &str,
        repo_href: &str,
        import: &OstreeImportAll,
    ) -> Result<TaskHref> {
        let url = format!(
            "{}/import_all/",
            self.config.href_url(repo_href).trim_end_matches('/')
        );
        self.post_task(ctx, url, import).await
    }

    async fn list_header_guards(
        &self,
        ctx: &Context,
        domain: &str,
        name: &str,
    ) -> Result<Vec<HeaderGuard>> {
        self.list(ctx, self.url(domain, "contentguards/core/header/"), &[("name", name)])
            .await
    }

    async fn create_header_guard(
        &self,
        ctx: &Context,
        domain: &str,
        guard: &NewHeaderGuard,
    ) -> Result<HeaderGuard> {
        self.post_json(ctx, self.url(domain, "contentguards/core/header/"), guard)
            .await
    }

    async fn list_rbac_guards(
        &self,
        ctx: &Context,
        domain: &str,
        name: &str,
    ) -> Result<Vec<RbacGuard>> {
        self.list(ctx, self.url(domain, "contentguards/core/rbac/"), &[("name", name)])
            .await
    }

    async fn create_rbac_guard(
        &self,
        ctx: &Context,
        domain: &str,
        guard: &NewRbacGuard,
    ) -> Result<RbacGuard> {
        self.post_json(ctx, self.url(domain, "contentguards/core/rbac/"), guard)
            .await
    }

    async fn list_composite_guards(
        &self,
        ctx: &Context,
        domain: &str,
        name: &str,
    ) -> Result<Vec<CompositeGuard>> {
        self.list(
            ctx,
            self.url(domain, "contentguards/core/composite/"),
            &[("name", name)],
        )
        .await
    }

    async fn create_composite_guard(
        &self,
        ctx: &Context,
        domain: &str,
        guard: &NewCompositeGuard,
    ) -> Result<CompositeGuard> {
        self.post_json(ctx, self.url(domain, "contentguards/core/composite/"), guard)
            .await
    }

    async fn delete_guard(&self, ctx: &Context, _domain: &str, href: &str) -> Result<()> {
        self.send(ctx, self.http.delete(self.config.href_url(href)))
            .await?;
        Ok(())
    }

    async fn list_distributions(
        &self,
        ctx: &Context,
        domain: &str,
        name: &str,
    ) -> Result<Vec<Distribution>> {
        self.list(
            ctx,
            self.url(domain, "distributions/ostree/ostree/"),
            &[("name", name)],
        )
        .await
    }

    async fn create_distribution(
        &self,
        ctx: &Context,
        domain: &str,
        distribution: &NewDistribution,
    ) -> Result<TaskHref> {
        self.post_task(ctx, self.url(domain, "distributions/ostree/ostree/"), distribution)
            .await
    }

    async fn get_distribution(
        &self,
        ctx: &Context,
        _domain: &str,
        href: &str,
    ) -> Result<Distribution> {
        self.get_json(ctx, self.config.href_url(href)).await
    }

    async fn delete_distribution(
        &self,
        ctx: &Context,
        _domain: &str,
        href: &str,
    ) -> Result<TaskHref> {
        self.delete_task(ctx, self.config.href_url(href)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_maps_to_already_exists() {
        let err = classify_failure(StatusCode::CONFLICT, None, "{}", "/artifacts/");
        assert!(err.is_already_exists());
    }

    #[test]
    fn bad_request_mentioning_existing_object_maps_to_already_exists() {
        let body = r#"{"non_field_errors":["Artifact with sha256 checksum of 'ab' Already Exists."]}"#;
        let err = classify_failure(StatusCode::BAD_REQUEST, None, body, "/artifacts/");
        assert!(err.is_already_exists());
    }

    #[test]
    fn other_failures_keep_status_and_correlation_id() {
        let err = classify_failure(
            StatusCode::BAD_GATEWAY,
            Some("corr-1".into()),
            "upstream down",
            "/tasks/",
        );
        match err {
            ContentError::Status {
                status,
                correlation_id,
                body,
            } => {
                assert_eq!(status, 502);
                assert_eq!(correlation_id.as_deref(), Some("corr-1"));
                assert_eq!(body, "upstream down");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn page_with_more_matches_than_the_limit_is_rejected() {
        let page: ListResponse<Artifact> = serde_json::from_value(serde_json::json!({
            "count": 3,
            "results": [
                {"pulp_href": "/a/1/", "sha256": "aa", "size": 1},
                {"pulp_href": "/a/2/", "sha256": "bb", "size": 1},
            ],
        }))
        .unwrap();
        let err = complete_page(page, 2).unwrap_err();
        assert!(matches!(
            err,
            ContentError::TooManyResults { count: 3, limit: 2 }
        ));
    }

    #[test]
    fn page_within_the_limit_returns_results() {
        let page: ListResponse<Artifact> = serde_json::from_value(serde_json::json!({
            "count": 2,
            "results": [
                {"pulp_href": "/a/1/", "sha256": "aa", "size": 1},
                {"pulp_href": "/a/2/", "sha256": "bb", "size": 1},
            ],
        }))
        .unwrap();
        let results = complete_page(page, 2).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[1].sha256, "bb");
    }

    #[test]
    fn domain_scoped_urls() {
        let api = HttpContentApi::new(ContentConfig::new("https://content.example.com")).unwrap();
        assert_eq!(
            api.url("em7d", "artifacts/"),
            "https://content.example.com/api/pulp/em7d/api/v3/artifacts/"
        );
    }

    #[tokio::test]
    async fn cancelled_context_short_circuits_requests() {
        let api = HttpContentApi::new(ContentConfig::new("http://127.0.0.1:9")).unwrap();
        let ctx = Context::background();
        ctx.cancel();
        let err = api.list_domains(&ctx, "em1d").await.unwrap_err();
        assert!(matches!(err, ContentError::Context(_)));
    }
}
