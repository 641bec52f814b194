//! Mock publisher for testing
//!
//! A configurable [`Publisher`] that can simulate successes, failures,
//! delays and panics while counting calls. It is used by integration tests to
//! exercise the orchestrator without platform credentials or network access.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;

use crate::error::PublishError;
use crate::publishers::{PublishScope, Publisher};
use crate::types::{PlatformConnection, PlatformName, Post, PublishOutcome};

/// Configuration for mock publisher behavior
#[derive(Debug, Clone)]
pub struct MockConfig {
    pub platform: PlatformName,

    /// Error returned from `publish`, if any
    pub publish_error: Option<String>,

    /// Error returned from `delete`, if any
    pub delete_error: Option<String>,

    /// Delay before completing operations (simulates network latency)
    pub delay: Duration,

    /// Panic inside `publish` instead of returning
    pub panics: bool,
}

impl MockConfig {
    pub fn new(platform: PlatformName) -> Self {
        Self {
            platform,
            publish_error: None,
            delete_error: None,
            delay: Duration::ZERO,
            panics: false,
        }
    }
}

/// One recorded `publish` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishCall {
    pub post_id: String,
    pub caption: String,
    pub access_token: String,
    pub scope: PublishScope,
}

/// Mock publisher for testing
pub struct MockPublisher {
    config: MockConfig,
    publish_calls: AtomicUsize,
    delete_calls: AtomicUsize,
    published: Mutex<Vec<PublishCall>>,
    deleted: Mutex<Vec<(String, Option<String>)>>,
}

impl MockPublisher {
    pub fn new(config: MockConfig) -> Self {
        Self {
            config,
            publish_calls: AtomicUsize::new(0),
            delete_calls: AtomicUsize::new(0),
            published: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
        }
    }

    /// A publisher that always succeeds
    pub fn success(platform: PlatformName) -> Self {
        Self::new(MockConfig::new(platform))
    }

    /// A publisher whose `publish` always fails with `error`
    pub fn failure(platform: PlatformName, error: &str) -> Self {
        Self::new(MockConfig {
            publish_error: Some(error.to_string()),
            ..MockConfig::new(platform)
        })
    }

    /// A publisher that waits `delay` before every operation
    pub fn with_delay(platform: PlatformName, delay: Duration) -> Self {
        Self::new(MockConfig {
            delay,
            ..MockConfig::new(platform)
        })
    }

    /// A publisher that panics inside `publish`
    pub fn panicking(platform: PlatformName) -> Self {
        Self::new(MockConfig {
            panics: true,
            ..MockConfig::new(platform)
        })
    }

    /// Convenience for handing the same mock to a registry and a test
    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn publish_call_count(&self) -> usize {
        self.publish_calls.load(Ordering::SeqCst)
    }

    pub fn delete_call_count(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    pub fn published(&self) -> Vec<PublishCall> {
        self.published
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// `(external_id, aux_token)` pairs passed to `delete`
    pub fn deleted(&self) -> Vec<(String, Option<String>)> {
        self.deleted
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn external_id(&self, suffix: Option<&str>) -> String {
        let id = uuid::Uuid::new_v4().simple().to_string();
        match suffix {
            Some(sub) => format!("{}:{}:mock-{}", self.config.platform, sub, id),
            None => format!("{}:mock-{}", self.config.platform, id),
        }
    }
}

#[async_trait]
impl Publisher for MockPublisher {
    fn platform(&self) -> PlatformName {
        self.config.platform
    }

    async fn publish(
        &self,
        connection: &PlatformConnection,
        post: &Post,
        scope: &PublishScope,
    ) -> Result<Vec<PublishOutcome>, PublishError> {
        self.publish_calls.fetch_add(1, Ordering::SeqCst);

        if !self.config.delay.is_zero() {
            sleep(self.config.delay).await;
        }

        if self.config.panics {
            panic!("mock {} publisher panicked", self.config.platform);
        }

        if let Some(error) = &self.config.publish_error {
            return Err(PublishError::Publisher(error.clone()));
        }

        self.published
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(PublishCall {
                post_id: post.id.clone(),
                caption: post.caption.clone(),
                access_token: connection.access_token.clone(),
                scope: scope.clone(),
            });

        let sub_accounts = scope.sub_accounts(connection);
        if sub_accounts.is_empty() && matches!(scope, PublishScope::Only(_)) {
            return Ok(Vec::new());
        }
        if sub_accounts.is_empty() {
            let id = self.external_id(None);
            return Ok(vec![
                PublishOutcome::new(&id).with_url(format!("https://mock.invalid/{}", id))
            ]);
        }

        Ok(sub_accounts
            .into_iter()
            .map(|sub| {
                let id = self.external_id(Some(&sub.id));
                PublishOutcome {
                    external_url: Some(format!("https://mock.invalid/{}", id)),
                    external_id: id,
                    sub_target: Some(sub.id.clone()),
                    aux_token: sub.access_token.clone(),
                }
            })
            .collect())
    }

    async fn delete(
        &self,
        _connection: &PlatformConnection,
        external_id: &str,
        aux_token: Option<&str>,
    ) -> Result<bool, PublishError> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);

        if !self.config.delay.is_zero() {
            sleep(self.config.delay).await;
        }

        if let Some(error) = &self.config.delete_error {
            return Err(PublishError::Publisher(error.clone()));
        }

        self.deleted
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((external_id.to_string(), aux_token.map(str::to_string)));
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SubAccount;

    fn post() -> Post {
        Post::new("user-1", "Hello", vec!["Twitter".to_string()])
    }

    #[tokio::test]
    async fn test_mock_success_single_outcome() {
        let publisher = MockPublisher::success(PlatformName::Twitter);
        let connection = PlatformConnection::new("user-1", PlatformName::Twitter, "tok");

        let outcomes = publisher
            .publish(&connection, &post(), &PublishScope::Selected)
            .await
            .unwrap();

        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].external_id.starts_with("Twitter:mock-"));
        assert_eq!(publisher.publish_call_count(), 1);
        assert_eq!(publisher.published()[0].access_token, "tok");
    }

    #[tokio::test]
    async fn test_mock_fans_out_per_sub_account() {
        let publisher = MockPublisher::success(PlatformName::Facebook);
        let connection = PlatformConnection::new("user-1", PlatformName::Facebook, "tok")
            .with_sub_account(SubAccount {
                id: "A".to_string(),
                name: None,
                access_token: Some("page-a".to_string()),
            })
            .with_sub_account(SubAccount {
                id: "B".to_string(),
                name: None,
                access_token: None,
            });

        let outcomes = publisher
            .publish(&connection, &post(), &PublishScope::Selected)
            .await
            .unwrap();

        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].sub_target.as_deref(), Some("A"));
        assert_eq!(outcomes[0].aux_token.as_deref(), Some("page-a"));
        assert_eq!(outcomes[1].sub_target.as_deref(), Some("B"));
        assert_ne!(outcomes[0].external_id, outcomes[1].external_id);
    }

    #[tokio::test]
    async fn test_mock_only_scope_without_matches_publishes_nothing() {
        let publisher = MockPublisher::success(PlatformName::Facebook);
        let connection = PlatformConnection::new("user-1", PlatformName::Facebook, "tok");

        let outcomes = publisher
            .publish(&connection, &post(), &PublishScope::Only(vec!["GHOST".to_string()]))
            .await
            .unwrap();

        assert!(outcomes.is_empty());
    }

    #[tokio::test]
    async fn test_mock_failure() {
        let publisher = MockPublisher::failure(PlatformName::Reddit, "rate limited");
        let connection = PlatformConnection::new("user-1", PlatformName::Reddit, "tok");

        let err = publisher
            .publish(&connection, &post(), &PublishScope::Selected)
            .await
            .unwrap_err();

        assert_eq!(err, PublishError::Publisher("rate limited".to_string()));
        assert_eq!(publisher.publish_call_count(), 1);
        assert!(publisher.published().is_empty());
    }

    #[tokio::test]
    async fn test_mock_with_delay() {
        let publisher = MockPublisher::with_delay(PlatformName::LinkedIn, Duration::from_millis(50));
        let connection = PlatformConnection::new("user-1", PlatformName::LinkedIn, "tok");

        let start = std::time::Instant::now();
        publisher
            .publish(&connection, &post(), &PublishScope::Selected)
            .await
            .unwrap();
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_mock_delete_records_aux_token() {
        let publisher = MockPublisher::success(PlatformName::Facebook);
        let connection = PlatformConnection::new("user-1", PlatformName::Facebook, "tok");

        let deleted = publisher
            .delete(&connection, "post-1", Some("page-token"))
            .await
            .unwrap();

        assert!(deleted);
        assert_eq!(publisher.delete_call_count(), 1);
        assert_eq!(
            publisher.deleted(),
            vec![("post-1".to_string(), Some("page-token".to_string()))]
        );
    }
}
