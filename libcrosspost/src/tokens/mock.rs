//! Mock token refresher for testing

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::time::sleep;

use crate::error::PublishError;
use crate::tokens::{TokenGrant, TokenRefresher};
use crate::types::{PlatformConnection, PlatformName};

/// Refresher that hands out numbered tokens (`refreshed-1`, `refreshed-2`, …)
/// or fails with a fixed message
pub struct MockRefresher {
    platform: PlatformName,
    error: Option<String>,
    delay: Duration,
    calls: AtomicUsize,
}

impl MockRefresher {
    pub fn success(platform: PlatformName) -> Self {
        Self {
            platform,
            error: None,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failure(platform: PlatformName, error: &str) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Self::success(platform)
        }
    }

    pub fn with_delay(platform: PlatformName, delay: Duration) -> Self {
        Self {
            delay,
            ..Self::success(platform)
        }
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenRefresher for MockRefresher {
    fn platform(&self) -> PlatformName {
        self.platform
    }

    async fn refresh(
        &self,
        _connection: &PlatformConnection,
        _refresh_token: &str,
    ) -> Result<TokenGrant, PublishError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;

        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }

        if let Some(error) = &self.error {
            return Err(PublishError::TokenRefreshFailed(error.clone()));
        }

        Ok(TokenGrant {
            access_token: format!("refreshed-{}", call),
            refresh_token: Some(format!("refresh-{}", call)),
            expires_at: Some(Utc::now() + chrono::Duration::hours(1)),
        })
    }
}
