//! OAuth 2.0 `refresh_token` grant over HTTP
//!
//! Twitter, TikTok, Google (YouTube) and Reddit all implement the same grant
//! with small differences: where the client credentials go (HTTP Basic or
//! form body), what the client id parameter is called, and whether a custom
//! User-Agent is required.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::USER_AGENT;
use serde::Deserialize;
use tracing::debug;

use crate::config::{Config, RefreshClientConfig};
use crate::error::PublishError;
use crate::tokens::{TokenGrant, TokenRefresher};
use crate::types::{PlatformConnection, PlatformName};

const TWITTER_TOKEN_URL: &str = "https://api.twitter.com/2/oauth2/token";
const TIKTOK_TOKEN_URL: &str = "https://open.tiktokapis.com/v2/oauth/token/";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const REDDIT_TOKEN_URL: &str = "https://www.reddit.com/api/v1/access_token";

const DEFAULT_USER_AGENT: &str = concat!("crosspost/", env!("CARGO_PKG_VERSION"));

/// Where client credentials travel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientAuth {
    /// `Authorization: Basic base64(id:secret)`
    Basic,
    /// Client id and secret as form fields
    Body,
}

/// How one platform expects the refresh request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshEndpoint {
    pub platform: PlatformName,
    pub token_url: String,
    pub client_auth: ClientAuth,
    /// TikTok calls it `client_key`
    pub client_id_param: &'static str,
}

impl RefreshEndpoint {
    /// Default endpoint for a platform that supports refresh
    pub fn for_platform(platform: PlatformName) -> Option<Self> {
        let (token_url, client_auth, client_id_param) = match platform {
            PlatformName::Twitter => (TWITTER_TOKEN_URL, ClientAuth::Basic, "client_id"),
            PlatformName::TikTok => (TIKTOK_TOKEN_URL, ClientAuth::Body, "client_key"),
            PlatformName::YouTube => (GOOGLE_TOKEN_URL, ClientAuth::Body, "client_id"),
            PlatformName::Reddit => (REDDIT_TOKEN_URL, ClientAuth::Basic, "client_id"),
            _ => return None,
        };
        Some(Self {
            platform,
            token_url: token_url.to_string(),
            client_auth,
            client_id_param,
        })
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    error: Option<String>,
    error_description: Option<String>,
}

impl TokenResponse {
    fn into_grant(self, platform: PlatformName, now: DateTime<Utc>) -> Result<TokenGrant, PublishError> {
        let access_token = match self.access_token {
            Some(token) if !token.is_empty() => token,
            _ => {
                let reason = match (self.error, self.error_description) {
                    (Some(error), Some(description)) => format!("{}: {}", error, description),
                    (Some(error), None) => error,
                    (None, Some(description)) => description,
                    (None, None) => "response carried no access_token".to_string(),
                };
                return Err(PublishError::TokenRefreshFailed(format!(
                    "{} token refresh failed: {}",
                    platform, reason
                )));
            }
        };

        Ok(TokenGrant {
            access_token,
            refresh_token: self.refresh_token.filter(|t| !t.is_empty()),
            // an expiry chrono cannot represent is dropped
            expires_at: self
                .expires_in
                .filter(|secs| *secs > 0)
                .and_then(chrono::Duration::try_seconds)
                .and_then(|lifetime| now.checked_add_signed(lifetime)),
        })
    }
}

/// Parse a token endpoint response body
pub fn parse_token_response(
    platform: PlatformName,
    body: &str,
    now: DateTime<Utc>,
) -> Result<TokenGrant, PublishError> {
    let response: TokenResponse = serde_json::from_str(body).map_err(|e| {
        PublishError::TokenRefreshFailed(format!(
            "{} token refresh returned an unreadable response: {}",
            platform, e
        ))
    })?;
    response.into_grant(platform, now)
}

/// HTTP refresher for one platform
pub struct OAuth2Refresher {
    client: reqwest::Client,
    endpoint: RefreshEndpoint,
    client_id: String,
    client_secret: Option<String>,
    user_agent: String,
}

impl OAuth2Refresher {
    pub fn new(endpoint: RefreshEndpoint, client: &RefreshClientConfig) -> Self {
        let mut endpoint = endpoint;
        if let Some(token_url) = &client.token_url {
            endpoint.token_url = token_url.clone();
        }
        Self {
            client: reqwest::Client::new(),
            endpoint,
            client_id: client.client_id.clone(),
            client_secret: client.client_secret.clone(),
            user_agent: client
                .user_agent
                .clone()
                .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
        }
    }

    /// Refresher for `platform` using its default endpoint
    ///
    /// Returns `None` for platforms without refresh support.
    pub fn for_platform(platform: PlatformName, client: &RefreshClientConfig) -> Option<Self> {
        RefreshEndpoint::for_platform(platform).map(|endpoint| Self::new(endpoint, client))
    }

    /// One refresher per platform that has `[refresh.<platform>]` configured
    pub fn from_config(config: &Config) -> Vec<Self> {
        PlatformName::ALL
            .into_iter()
            .filter_map(|platform| {
                config
                    .refresh_client(platform)
                    .and_then(|client| Self::for_platform(platform, client))
            })
            .collect()
    }

    pub fn endpoint(&self) -> &RefreshEndpoint {
        &self.endpoint
    }

    /// Form fields of the refresh request
    pub fn form_fields(&self, refresh_token: &str) -> Vec<(&'static str, String)> {
        let mut fields = vec![
            ("grant_type", "refresh_token".to_string()),
            ("refresh_token", refresh_token.to_string()),
        ];
        match self.endpoint.client_auth {
            ClientAuth::Body => {
                fields.push((self.endpoint.client_id_param, self.client_id.clone()));
                if let Some(secret) = &self.client_secret {
                    fields.push(("client_secret", secret.clone()));
                }
            }
            // public clients without a secret identify themselves in the body
            ClientAuth::Basic if self.client_secret.is_none() => {
                fields.push((self.endpoint.client_id_param, self.client_id.clone()));
            }
            ClientAuth::Basic => {}
        }
        fields
    }
}

#[async_trait]
impl TokenRefresher for OAuth2Refresher {
    fn platform(&self) -> PlatformName {
        self.endpoint.platform
    }

    async fn refresh(
        &self,
        _connection: &PlatformConnection,
        refresh_token: &str,
    ) -> Result<TokenGrant, PublishError> {
        let platform = self.endpoint.platform;
        debug!("Refreshing {} token via {}", platform, self.endpoint.token_url);

        let mut request = self
            .client
            .post(&self.endpoint.token_url)
            .header(USER_AGENT, &self.user_agent)
            .form(&self.form_fields(refresh_token));

        if self.endpoint.client_auth == ClientAuth::Basic {
            if let Some(secret) = &self.client_secret {
                request = request.basic_auth(&self.client_id, Some(secret));
            }
        }

        let response = request.send().await.map_err(|e| {
            PublishError::TokenRefreshFailed(format!("{} token refresh request failed: {}", platform, e))
        })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            PublishError::TokenRefreshFailed(format!("{} token refresh response unreadable: {}", platform, e))
        })?;

        if !status.is_success() {
            return Err(PublishError::TokenRefreshFailed(format!(
                "{} token refresh failed ({}): {}",
                platform, status, body
            )));
        }

        parse_token_response(platform, &body, Utc::now())
    }
}
