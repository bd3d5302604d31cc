//! Request authentication: basic auth or cached OAuth2 client-credentials tokens.

use std::fmt;
use std::time::Duration;

use edge_jobs::Context;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::error::ContentError;
use crate::Result;

/// Tokens are refreshed when they expire within this window.
pub const REFRESH_MARGIN: Duration = Duration::from_secs(30);

#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Credentials {
    #[default]
    None,
    Basic {
        username: String,
        password: String,
    },
    ClientCredentials {
        token_url: String,
        client_id: String,
        client_secret: String,
    },
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::None => f.write_str("None"),
            Credentials::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .finish_non_exhaustive(),
            Credentials::ClientCredentials {
                token_url,
                client_id,
                ..
            } => f
                .debug_struct("ClientCredentials")
                .field("token_url", token_url)
                .field("client_id", client_id)
                .finish_non_exhaustive(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: Instant,
}

/// Lazily fetched bearer token shared by all requests of one client.
pub struct TokenCache {
    http: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    current: Mutex<Option<CachedToken>>,
}

impl TokenCache {
    pub fn new(
        http: reqwest::Client,
        token_url: &str,
        client_id: &str,
        client_secret: &str,
    ) -> Self {
        TokenCache {
            http,
            token_url: token_url.to_string(),
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            current: Mutex::new(None),
        }
    }

    /// Current token, fetching a new one if absent or about to expire.
    pub async fn token(&self, ctx: &Context) -> Result<String> {
        let mut current = self.current.lock().await;
        if let Some(token) = current.as_ref() {
            if Instant::now() + REFRESH_MARGIN < token.expires_at {
                return Ok(token.value.clone());
            }
        }
        let fresh = self.fetch(ctx).await?;
        let value = fresh.value.clone();
        *current = Some(fresh);
        Ok(value)
    }

    async fn fetch(&self, ctx: &Context) -> Result<CachedToken> {
        debug!(token_url = %self.token_url, "fetching access token");
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];
        let request = self.http.post(&self.token_url).form(&form).send();
        let response = ctx.run(request).await??;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ContentError::Auth(format!(
                "token endpoint returned {}: {}",
                status.as_u16(),
                text.chars().take(200).collect::<String>()
            )));
        }
        let token: TokenResponse = ctx.run(response.json()).await??;
        let lifetime = Duration::from_secs(token.expires_in.unwrap_or(300));
        Ok(CachedToken {
            value: token.access_token,
            expires_at: Instant::now() + lifetime,
        })
    }
}

/// Applies configured credentials to outgoing requests.
pub enum Authorizer {
    None,
    Basic { username: String, password: String },
    Bearer(TokenCache),
}

impl Authorizer {
    pub fn from_credentials(http: &reqwest::Client, credentials: &Credentials) -> Self {
        match credentials {
            Credentials::None => Authorizer::None,
            Credentials::Basic { username, password } => Authorizer::Basic {
                username: username.clone(),
                password: password.clone(),
            },
            Credentials::ClientCredentials {
                token_url,
                client_id,
                client_secret,
            } => Authorizer::Bearer(TokenCache::new(
                http.clone(),
                token_url,
                client_id,
                client_secret,
            )),
        }
    }

    pub async fn apply(
        &self,
        ctx: &Context,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::RequestBuilder> {
        Ok(match self {
            Authorizer::None => request,
            Authorizer::Basic { username, password } => {
                request.basic_auth(username, Some(password))
            }
            Authorizer::Bearer(cache) => request.bearer_auth(cache.token(ctx).await?),
        })
    }
}
