//! Content service configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::auth::Credentials;
use crate::error::ContentError;
use crate::Result;

pub const DEFAULT_LIST_LIMIT: u64 = 100;
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_STORAGE_CLASS: &str = "storages.backends.s3boto3.S3Boto3Storage";

/// Connection settings for the content service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentConfig {
    /// Service root, e.g. `https://content.example.com`
    pub base_url: String,
    pub credentials: Credentials,
    /// Storage backend class for newly created domains
    pub storage_class: String,
    /// `limit` sent with every list request
    pub list_limit: u64,
    pub request_timeout: Duration,
}

impl ContentConfig {
    pub fn new(base_url: &str) -> Self {
        ContentConfig {
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials: Credentials::None,
            storage_class: DEFAULT_STORAGE_CLASS.to_string(),
            list_limit: DEFAULT_LIST_LIMIT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Read configuration from `CONTENT_*` environment variables.
    ///
    /// Client credentials take precedence over basic auth when both are set.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let base_url = get("CONTENT_URL")
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| ContentError::NotConfigured("CONTENT_URL is not set".into()))?;
        let mut config = ContentConfig::new(&base_url);

        let client = (
            get("CONTENT_TOKEN_URL"),
            get("CONTENT_CLIENT_ID"),
            get("CONTENT_CLIENT_SECRET"),
        );
        if let (Some(token_url), Some(client_id), Some(client_secret)) = client {
            config = config.with_client_credentials(&token_url, &client_id, &client_secret);
        } else if let Some(username) = get("CONTENT_USERNAME") {
            let password = get("CONTENT_PASSWORD").unwrap_or_default();
            config = config.with_basic_auth(&username, &password);
        }

        if let Some(class) = get("CONTENT_STORAGE_CLASS") {
            config.storage_class = class;
        }
        if let Some(limit) = get("CONTENT_LIST_LIMIT") {
            let limit = limit.parse().map_err(|_| {
                ContentError::NotConfigured(format!("CONTENT_LIST_LIMIT is not a number: {limit}"))
            })?;
            config = config.with_list_limit(limit);
        }
        if let Some(secs) = get("CONTENT_REQUEST_TIMEOUT_SECS") {
            let secs: u64 = secs.parse().map_err(|_| {
                ContentError::NotConfigured(format!(
                    "CONTENT_REQUEST_TIMEOUT_SECS is not a number: {secs}"
                ))
            })?;
            config.request_timeout = Duration::from_secs(secs);
        }
        Ok(config)
    }

    pub fn with_basic_auth(mut self, username: &str, password: &str) -> Self {
        self.credentials = Credentials::Basic {
            username: username.to_string(),
            password: password.to_string(),
        };
        self
    }

    pub fn with_client_credentials(
        mut self,
        token_url: &str,
        client_id: &str,
        client_secret: &str,
    ) -> Self {
        self.credentials = Credentials::ClientCredentials {
            token_url: token_url.to_string(),
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
        };
        self
    }

    pub fn with_storage_class(mut self, storage_class: &str) -> Self {
        self.storage_class = storage_class.to_string();
        self
    }

    pub fn with_list_limit(mut self, limit: u64) -> Self {
        self.list_limit = limit.max(1);
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// API root for a domain: `{base_url}/api/pulp/{domain}/api/v3/`
    pub fn api_root(&self, domain: &str) -> String {
        format!("{}/api/pulp/{}/api/v3/", self.base_url, domain)
    }

    /// Absolute URL for an href returned by the service.
    pub fn href_url(&self, href: &str) -> String {
        if href.starts_with("http://") || href.starts_with("https://") {
            href.to_string()
        } else {
            format!("{}/{}", self.base_url, href.trim_start_matches('/'))
        }
    }
}
