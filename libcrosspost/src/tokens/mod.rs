//! Token lifecycle management
//!
//! Before a connection is used, [`TokenManager::ensure_valid`] checks whether
//! its access token has expired and, if so, exchanges the stored refresh token
//! for a new one through the platform's [`TokenRefresher`]. A refreshed token
//! is written back through the [`ConnectionStore`] as one update scoped to the
//! connection id.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::PublishError;
use crate::store::ConnectionStore;
use crate::types::{PlatformConnection, PlatformName};

pub mod mock;
pub mod oauth2;

/// Platforms whose tokens can be refreshed without the user reconnecting
pub const REFRESHABLE_PLATFORMS: [PlatformName; 4] = [
    PlatformName::Twitter,
    PlatformName::TikTok,
    PlatformName::YouTube,
    PlatformName::Reddit,
];

/// Default timeout for a single refresh call
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(120);

/// Fresh credentials returned by a refresher
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: String,
    /// Present when the platform rotates refresh tokens
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl TokenGrant {
    /// Overwrite the token fields of `connection`
    pub fn apply_to(&self, connection: &mut PlatformConnection) {
        connection.access_token = self.access_token.clone();
        if let Some(refresh_token) = &self.refresh_token {
            connection.refresh_token = Some(refresh_token.clone());
        }
        if let Some(expires_at) = self.expires_at {
            connection.token_expires_at = Some(expires_at);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    /// No expiry tracked, or expiry still ahead
    Valid,
    Expired,
}

/// Classify a connection's access token at `now`
///
/// A token expiring within `leeway` of `now` already counts as expired.
pub fn token_state(
    connection: &PlatformConnection,
    now: DateTime<Utc>,
    leeway: chrono::Duration,
) -> TokenState {
    match connection.token_expires_at {
        Some(expires_at) if expires_at <= now + leeway => TokenState::Expired,
        _ => TokenState::Valid,
    }
}

/// Platform-specific refresh token exchange
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    fn platform(&self) -> PlatformName;

    /// Exchange `refresh_token` for a new access token
    ///
    /// # Errors
    ///
    /// Returns `PublishError::TokenRefreshFailed` with the upstream message.
    async fn refresh(
        &self,
        connection: &PlatformConnection,
        refresh_token: &str,
    ) -> Result<TokenGrant, PublishError>;
}

/// Keeps connection credentials usable
#[derive(Clone)]
pub struct TokenManager {
    refreshers: HashMap<PlatformName, Arc<dyn TokenRefresher>>,
    store: Arc<dyn ConnectionStore>,
    call_timeout: Duration,
    leeway: chrono::Duration,
}

impl TokenManager {
    pub fn new(store: Arc<dyn ConnectionStore>) -> Self {
        Self {
            refreshers: HashMap::new(),
            store,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            leeway: chrono::Duration::zero(),
        }
    }

    /// Register a refresher under its own platform, replacing any previous one
    pub fn register(&mut self, refresher: Arc<dyn TokenRefresher>) -> &mut Self {
        self.refreshers.insert(refresher.platform(), refresher);
        self
    }

    pub fn with_refresher(mut self, refresher: Arc<dyn TokenRefresher>) -> Self {
        self.register(refresher);
        self
    }

    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    pub fn with_leeway(mut self, leeway: chrono::Duration) -> Self {
        self.leeway = leeway;
        self
    }

    pub fn supports_refresh(&self, platform: PlatformName) -> bool {
        REFRESHABLE_PLATFORMS.contains(&platform) && self.refreshers.contains_key(&platform)
    }

    pub fn store(&self) -> &Arc<dyn ConnectionStore> {
        &self.store
    }

    /// Make sure `connection` holds a usable access token
    ///
    /// Valid tokens are left alone. Expired tokens are refreshed, persisted
    /// and written into `connection`. On any failure `connection` is left
    /// untouched.
    ///
    /// # Errors
    ///
    /// - `TokenExpiredNoRefresh` when no refresh token is stored
    /// - `RefreshUnsupported` when the platform has no refresher or is not
    ///   in [`REFRESHABLE_PLATFORMS`]
    /// - `TokenRefreshFailed` with the refresher's message
    /// - `Timeout` when the refresh call exceeds the call timeout
    pub async fn ensure_valid(&self, connection: &mut PlatformConnection) -> Result<(), PublishError> {
        if token_state(connection, Utc::now(), self.leeway) == TokenState::Valid {
            return Ok(());
        }

        let platform = connection.platform;
        debug!("Access token for {} connection {} expired", platform, connection.id);

        let refresh_token = connection
            .refresh_token
            .clone()
            .ok_or_else(|| PublishError::TokenExpiredNoRefresh(platform.to_string()))?;

        let refresher = self
            .refreshers
            .get(&platform)
            .filter(|_| REFRESHABLE_PLATFORMS.contains(&platform))
            .ok_or_else(|| PublishError::RefreshUnsupported(platform.to_string()))?;

        let grant = timeout(self.call_timeout, refresher.refresh(connection, &refresh_token))
            .await
            .map_err(|_| PublishError::Timeout {
                platform: platform.to_string(),
                seconds: self.call_timeout.as_secs(),
            })??;

        // the new token is usable even if saving it fails
        if let Err(e) = self.store.update_tokens(&connection.id, &grant).await {
            warn!(
                "Failed to persist refreshed {} token for connection {}: {}",
                platform, connection.id, e
            );
        }

        grant.apply_to(connection);
        info!("Refreshed {} access token for connection {}", platform, connection.id);
        Ok(())
    }
}
