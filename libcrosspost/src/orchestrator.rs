//! Multi-platform publish orchestration
//!
//! [`PublishOrchestrator::publish_all`] fans a post out to every target it
//! names. Each resolved target runs as its own tokio task:
//!
//! 1. look up the user's connection (none: "not connected")
//! 2. look up the publisher (none: "not supported")
//! 3. make sure the access token is usable, refreshing if needed
//! 4. publish with an explicit sub-target scope, under a timeout; sub-target
//!    ids the connection does not hold fail on their own
//!
//! Whatever goes wrong inside a task, including a panic, becomes a failed
//! [`PublishResult`] for that target only. Results come back in resolution
//! order regardless of which task finishes first.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::task::JoinError;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::PublishError;
use crate::publishers::{PublishScope, Publisher, PublisherRegistry};
use crate::service::events::{Event, EventBus};
use crate::targets::{resolve_targets, ResolvedTarget, SUB_TARGET_SEPARATOR};
use crate::tokens::{TokenManager, DEFAULT_CALL_TIMEOUT};
use crate::types::{PlatformConnection, PlatformName, Post, PublishOutcome, PublishResult};

pub const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_secs(180);

/// Outcome of deleting one published result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteResult {
    pub platform: String,
    pub external_id: String,
    pub sub_target: Option<String>,
    pub deleted: bool,
    pub error: Option<String>,
}

impl DeleteResult {
    fn from_attempt(result: &PublishResult, external_id: &str, attempt: Result<bool, PublishError>) -> Self {
        let (deleted, error) = match attempt {
            Ok(deleted) => (deleted, None),
            Err(e) => (false, Some(e.to_string())),
        };
        Self {
            platform: result.platform.clone(),
            external_id: external_id.to_string(),
            sub_target: result.sub_target.clone(),
            deleted,
            error,
        }
    }
}

/// Fans posts out to publishers
#[derive(Clone)]
pub struct PublishOrchestrator {
    registry: Arc<PublisherRegistry>,
    tokens: Arc<TokenManager>,
    publish_timeout: Duration,
    call_timeout: Duration,
    events: EventBus,
}

impl PublishOrchestrator {
    pub fn new(registry: PublisherRegistry, tokens: TokenManager) -> Self {
        Self {
            registry: Arc::new(registry),
            tokens: Arc::new(tokens),
            publish_timeout: DEFAULT_PUBLISH_TIMEOUT,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            events: EventBus::default(),
        }
    }

    pub fn with_publish_timeout(mut self, publish_timeout: Duration) -> Self {
        self.publish_timeout = publish_timeout;
        self
    }

    /// Timeout for delete calls
    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn registry(&self) -> &PublisherRegistry {
        &self.registry
    }

    pub fn tokens(&self) -> &TokenManager {
        &self.tokens
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Publish `post` to every target it names
    ///
    /// Never fails as a whole: per-target problems are reported in the
    /// returned list, which holds at least one entry per distinct base
    /// platform.
    pub async fn publish_all(&self, user_id: &str, post: &Post) -> Vec<PublishResult> {
        self.dispatch(user_id, post, &post.targets, false).await
    }

    /// Publish `post` to the given identifiers only
    pub async fn publish_targets<S: AsRef<str>>(
        &self,
        user_id: &str,
        post: &Post,
        targets: &[S],
    ) -> Vec<PublishResult> {
        self.dispatch(user_id, post, targets, false).await
    }

    pub(crate) async fn dispatch<S: AsRef<str>>(
        &self,
        user_id: &str,
        post: &Post,
        targets: &[S],
        retry: bool,
    ) -> Vec<PublishResult> {
        let resolved = resolve_targets(targets);
        let platforms: Vec<String> = resolved.iter().map(|t| t.base.clone()).collect();
        info!(
            "Publishing post {} to {} target(s): {}",
            post.id,
            resolved.len(),
            platforms.join(", ")
        );
        self.events.emit(Event::PublishStarted {
            post_id: post.id.clone(),
            platforms,
            retry,
        });

        let post = Arc::new(post.clone());
        let handles: Vec<_> = resolved
            .iter()
            .cloned()
            .map(|target| {
                let this = self.clone();
                let user_id = user_id.to_string();
                let post = Arc::clone(&post);
                tokio::spawn(async move { this.publish_target(&user_id, &post, target).await })
            })
            .collect();

        let joined = join_all(handles).await;

        let mut results = Vec::with_capacity(joined.len());
        for (target, outcome) in resolved.iter().zip(joined) {
            match outcome {
                Ok(target_results) => results.extend(target_results),
                Err(e) => {
                    let failure = PublishResult::failure(&target.base, task_failure(&target.base, &e));
                    warn!("Publishing to {} aborted: {}", target.base, e);
                    self.emit_target(&post.id, &failure);
                    results.push(failure);
                }
            }
        }

        let succeeded = results.iter().filter(|r| r.success).count();
        info!(
            "Post {} finished: {} succeeded, {} failed",
            post.id,
            succeeded,
            results.len() - succeeded
        );
        self.events.emit(Event::PublishCompleted {
            post_id: post.id.clone(),
            results: results.clone(),
        });

        results
    }

    async fn publish_target(&self, user_id: &str, post: &Post, target: ResolvedTarget) -> Vec<PublishResult> {
        let base = target.base.clone();
        debug!("Publishing post {} to {}", post.id, base);

        let results = match self.prepare(user_id, &base).await {
            Ok((connection, publisher)) => {
                self.publish_prepared(post, &target, &connection, publisher.as_ref())
                    .await
            }
            Err(e) => {
                warn!("Failed to publish post {} to {}: {}", post.id, base, e);
                vec![PublishResult::failure(&base, e.to_string())]
            }
        };

        for result in &results {
            self.emit_target(&post.id, result);
        }
        results
    }

    /// Publish to the requested sub-targets the connection actually holds
    ///
    /// Each sub-target id the connection does not know gets its own failure
    /// and is never handed to the publisher.
    async fn publish_prepared(
        &self,
        post: &Post,
        target: &ResolvedTarget,
        connection: &PlatformConnection,
        publisher: &dyn Publisher,
    ) -> Vec<PublishResult> {
        let base = target.base.as_str();
        let (known, unknown): (Vec<String>, Vec<String>) = target
            .sub_targets
            .iter()
            .cloned()
            .partition(|id| connection.sub_account(id).is_some());

        let mut results = Vec::with_capacity(target.sub_targets.len().max(1));
        if !target.has_sub_targets() || !known.is_empty() {
            match self.try_publish(post, base, connection, publisher, &known).await {
                Ok(outcomes) => {
                    info!("Published post {} to {} ({} result(s))", post.id, base, outcomes.len());
                    results.extend(
                        outcomes
                            .into_iter()
                            .map(|outcome| PublishResult::from_outcome(base, outcome)),
                    );
                }
                Err(e) => {
                    warn!("Failed to publish post {} to {}: {}", post.id, base, e);
                    if known.is_empty() {
                        results.push(PublishResult::failure(base, e.to_string()));
                    } else {
                        results.extend(
                            known
                                .iter()
                                .map(|id| PublishResult::failure(base, e.to_string()).with_sub_target(id)),
                        );
                    }
                }
            }
        }

        for id in unknown {
            let error = PublishError::NotConnected(format!("{}{}{}", base, SUB_TARGET_SEPARATOR, id));
            warn!("Skipping post {} for {}: {}", post.id, base, error);
            results.push(PublishResult::failure(base, error.to_string()).with_sub_target(id));
        }
        results
    }

    async fn try_publish(
        &self,
        post: &Post,
        base: &str,
        connection: &PlatformConnection,
        publisher: &dyn Publisher,
        sub_targets: &[String],
    ) -> Result<Vec<PublishOutcome>, PublishError> {
        let scope = PublishScope::from_sub_targets(sub_targets);
        let outcomes = timeout(self.publish_timeout, publisher.publish(connection, post, &scope))
            .await
            .map_err(|_| PublishError::Timeout {
                platform: base.to_string(),
                seconds: self.publish_timeout.as_secs(),
            })??;

        if outcomes.is_empty() {
            return Err(PublishError::Publisher(format!(
                "{} publisher returned no results",
                base
            )));
        }
        Ok(outcomes)
    }

    /// Steps shared by publish and delete: connection, publisher, token
    async fn prepare(
        &self,
        user_id: &str,
        base: &str,
    ) -> Result<(PlatformConnection, Arc<dyn Publisher>), PublishError> {
        // an unknown name can never have a connection
        let platform: PlatformName = base
            .parse()
            .map_err(|_| PublishError::NotConnected(base.to_string()))?;

        let mut connection = self
            .tokens
            .store()
            .find(user_id, platform)
            .await
            .map_err(|e| PublishError::ConnectionLookup {
                platform: base.to_string(),
                message: e.to_string(),
            })?
            .ok_or_else(|| PublishError::NotConnected(base.to_string()))?;

        let publisher = self
            .registry
            .get(platform)
            .ok_or_else(|| PublishError::UnsupportedPlatform(base.to_string()))?;

        self.tokens.ensure_valid(&mut connection).await?;
        Ok((connection, publisher))
    }

    fn emit_target(&self, post_id: &str, result: &PublishResult) {
        self.events.emit(Event::TargetCompleted {
            post_id: post_id.to_string(),
            result: result.clone(),
        });
    }

    /// Delete every successfully published result of `post`
    ///
    /// Failed results and results without an external id are skipped. Each
    /// deletion is isolated like a publish target.
    pub async fn unpublish(&self, user_id: &str, post: &Post) -> Vec<DeleteResult> {
        let published: Vec<PublishResult> = post
            .results
            .iter()
            .filter(|r| r.success && r.external_id.is_some())
            .cloned()
            .collect();
        info!("Unpublishing post {} from {} result(s)", post.id, published.len());

        let handles: Vec<_> = published
            .iter()
            .cloned()
            .map(|result| {
                let this = self.clone();
                let user_id = user_id.to_string();
                tokio::spawn(async move { this.delete_one(&user_id, result).await })
            })
            .collect();

        let joined = join_all(handles).await;

        published
            .iter()
            .zip(joined)
            .map(|(result, outcome)| {
                let external_id = result.external_id.clone().unwrap_or_default();
                outcome.unwrap_or_else(|e| {
                    warn!("Deleting {} from {} aborted: {}", external_id, result.platform, e);
                    DeleteResult::from_attempt(
                        result,
                        &external_id,
                        Err(PublishError::Publisher(task_failure(&result.platform, &e))),
                    )
                })
            })
            .collect()
    }

    async fn delete_one(&self, user_id: &str, result: PublishResult) -> DeleteResult {
        let external_id = result.external_id.clone().unwrap_or_default();
        let attempt = self.try_delete(user_id, &result, &external_id).await;

        match &attempt {
            Ok(true) => info!("Deleted {} from {}", external_id, result.platform),
            Ok(false) => warn!("{} did not confirm deletion of {}", result.platform, external_id),
            Err(e) => warn!("Failed to delete {} from {}: {}", external_id, result.platform, e),
        }

        DeleteResult::from_attempt(&result, &external_id, attempt)
    }

    async fn try_delete(
        &self,
        user_id: &str,
        result: &PublishResult,
        external_id: &str,
    ) -> Result<bool, PublishError> {
        let (connection, publisher) = self.prepare(user_id, &result.platform).await?;
        timeout(
            self.call_timeout,
            publisher.delete(&connection, external_id, result.aux_token.as_deref()),
        )
        .await
        .map_err(|_| PublishError::Timeout {
            platform: result.platform.clone(),
            seconds: self.call_timeout.as_secs(),
        })?
    }
}

fn task_failure(platform: &str, error: &JoinError) -> String {
    if error.is_panic() {
        format!("{} publisher crashed", platform)
    } else {
        format!("{} publish task was cancelled", platform)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publishers::mock::{MockConfig, MockPublisher};
    use crate::store::MemoryConnectionStore;
    use crate::tokens::mock::MockRefresher;
    use crate::types::SubAccount;
    use chrono::Utc;

    async fn setup(
        connected: &[PlatformName],
        publishers: Vec<Arc<MockPublisher>>,
    ) -> (PublishOrchestrator, Arc<MemoryConnectionStore>) {
        let store = Arc::new(MemoryConnectionStore::new());
        for platform in connected {
            store
                .insert(PlatformConnection::new("user-1", *platform, "token"))
                .await;
        }
        let mut registry = PublisherRegistry::new();
        for publisher in publishers {
            registry.register(publisher);
        }
        let orchestrator = PublishOrchestrator::new(registry, TokenManager::new(store.clone()));
        (orchestrator, store)
    }

    fn post(targets: &[&str]) -> Post {
        Post::new("user-1", "Hello", targets.iter().map(|t| t.to_string()).collect())
    }

    #[tokio::test]
    async fn test_results_follow_resolution_order() {
        let slow = MockPublisher::with_delay(PlatformName::Twitter, Duration::from_millis(50)).shared();
        let fast = MockPublisher::success(PlatformName::Reddit).shared();
        let (orchestrator, _) = setup(
            &[PlatformName::Twitter, PlatformName::Reddit],
            vec![slow, fast],
        )
        .await;

        let results = orchestrator
            .publish_all("user-1", &post(&["Twitter", "Reddit"]))
            .await;

        let platforms: Vec<&str> = results.iter().map(|r| r.platform.as_str()).collect();
        assert_eq!(platforms, vec!["Twitter", "Reddit"]);
        assert!(results.iter().all(|r| r.success));
    }

    #[tokio::test]
    async fn test_unknown_platform_is_not_connected() {
        let (orchestrator, _) = setup(&[], vec![]).await;
        let results = orchestrator.publish_all("user-1", &post(&["Myspace"])).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].error.as_deref(), Some("Myspace not connected"));
    }

    #[tokio::test]
    async fn test_connected_without_publisher_is_not_supported() {
        let (orchestrator, _) = setup(&[PlatformName::Instagram], vec![]).await;
        let results = orchestrator.publish_all("user-1", &post(&["Instagram"])).await;
        assert!(!results[0].success);
        assert_eq!(results[0].error.as_deref(), Some("Instagram not supported"));
    }

    #[tokio::test]
    async fn test_expired_token_is_refreshed_before_publish() {
        let store = Arc::new(MemoryConnectionStore::new());
        let connection = PlatformConnection::new("user-1", PlatformName::TikTok, "stale")
            .with_refresh_token("r1")
            .with_expiry(Utc::now() - chrono::Duration::minutes(1));
        let connection_id = connection.id.clone();
        store.insert(connection).await;

        let publisher = MockPublisher::success(PlatformName::TikTok).shared();
        let mut registry = PublisherRegistry::new();
        registry.register(publisher.clone());
        let tokens = TokenManager::new(store.clone())
            .with_refresher(MockRefresher::success(PlatformName::TikTok).shared());
        let orchestrator = PublishOrchestrator::new(registry, tokens);

        let results = orchestrator.publish_all("user-1", &post(&["TikTok"])).await;

        assert!(results[0].success);
        assert_eq!(publisher.published()[0].access_token, "refreshed-1");
        assert_eq!(store.get(&connection_id).await.unwrap().access_token, "refreshed-1");
    }

    #[tokio::test]
    async fn test_publish_timeout_becomes_failure() {
        let hanging = MockPublisher::with_delay(PlatformName::YouTube, Duration::from_secs(5)).shared();
        let ok = MockPublisher::success(PlatformName::Reddit).shared();
        let (orchestrator, _) = setup(
            &[PlatformName::YouTube, PlatformName::Reddit],
            vec![hanging, ok],
        )
        .await;
        let orchestrator = orchestrator.with_publish_timeout(Duration::from_millis(20));

        let results = orchestrator
            .publish_all("user-1", &post(&["YouTube", "Reddit"]))
            .await;

        assert!(!results[0].success);
        assert!(results[0].error.as_deref().unwrap().contains("timed out"));
        assert!(results[1].success);
    }

    #[tokio::test]
    async fn test_panicking_publisher_is_isolated() {
        let crashing = MockPublisher::panicking(PlatformName::LinkedIn).shared();
        let ok = MockPublisher::success(PlatformName::Twitter).shared();
        let (orchestrator, _) = setup(
            &[PlatformName::LinkedIn, PlatformName::Twitter],
            vec![crashing, ok],
        )
        .await;

        let results = orchestrator
            .publish_all("user-1", &post(&["LinkedIn", "Twitter"]))
            .await;

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].error.as_deref(), Some("LinkedIn publisher crashed"));
        assert!(results[1].success);
    }

    #[tokio::test]
    async fn test_empty_publisher_output_is_failure() {
        struct Silent;

        #[async_trait::async_trait]
        impl Publisher for Silent {
            fn platform(&self) -> PlatformName {
                PlatformName::Reddit
            }

            async fn publish(
                &self,
                _connection: &PlatformConnection,
                _post: &Post,
                _scope: &PublishScope,
            ) -> Result<Vec<PublishOutcome>, PublishError> {
                Ok(vec![])
            }

            async fn delete(
                &self,
                _connection: &PlatformConnection,
                _external_id: &str,
                _aux_token: Option<&str>,
            ) -> Result<bool, PublishError> {
                Ok(true)
            }
        }

        let store = Arc::new(MemoryConnectionStore::new());
        store
            .insert(PlatformConnection::new("user-1", PlatformName::Reddit, "t"))
            .await;
        let mut registry = PublisherRegistry::new();
        registry.register(Arc::new(Silent));
        let orchestrator = PublishOrchestrator::new(registry, TokenManager::new(store));

        let results = orchestrator.publish_all("user-1", &post(&["Reddit"])).await;
        assert_eq!(results.len(), 1);
        assert!(!results[0].success);
    }

    #[tokio::test]
    async fn test_events_emitted_per_target() {
        let (orchestrator, _) = setup(
            &[PlatformName::Twitter],
            vec![MockPublisher::success(PlatformName::Twitter).shared()],
        )
        .await;
        let mut receiver = orchestrator.events().subscribe();

        let post = post(&["Twitter", "Reddit"]);
        orchestrator.publish_all("user-1", &post).await;

        assert!(matches!(
            receiver.recv().await.unwrap(),
            Event::PublishStarted { retry: false, .. }
        ));
        let mut completed_targets = 0;
        loop {
            match receiver.recv().await.unwrap() {
                Event::TargetCompleted { post_id, .. } => {
                    assert_eq!(post_id, post.id);
                    completed_targets += 1;
                }
                Event::PublishCompleted { results, .. } => {
                    assert_eq!(results.len(), 2);
                    break;
                }
                other => panic!("Unexpected event: {:?}", other),
            }
        }
        assert_eq!(completed_targets, 2);
    }

    #[tokio::test]
    async fn test_unpublish_passes_aux_token_and_skips_failures() {
        let publisher = MockPublisher::success(PlatformName::Facebook).shared();
        let store = Arc::new(MemoryConnectionStore::new());
        store
            .insert(
                PlatformConnection::new("user-1", PlatformName::Facebook, "user-token").with_sub_account(
                    SubAccount {
                        id: "PAGE_A".to_string(),
                        name: None,
                        access_token: Some("page-token-a".to_string()),
                    },
                ),
            )
            .await;
        let mut registry = PublisherRegistry::new();
        registry.register(publisher.clone());
        let orchestrator = PublishOrchestrator::new(registry, TokenManager::new(store));

        let mut post = post(&["Facebook:PAGE_A", "Twitter"]);
        let results = orchestrator.publish_all("user-1", &post).await;
        post.apply_publish(results, Utc::now());

        let deleted = orchestrator.unpublish("user-1", &post).await;

        assert_eq!(deleted.len(), 1);
        assert!(deleted[0].deleted);
        assert_eq!(deleted[0].sub_target.as_deref(), Some("PAGE_A"));
        assert_eq!(
            publisher.deleted()[0].1.as_deref(),
            Some("page-token-a")
        );
    }

    #[tokio::test]
    async fn test_unpublish_failure_is_reported() {
        let mut config = MockConfig::new(PlatformName::Twitter);
        config.delete_error = Some("already gone".to_string());
        let publisher = Arc::new(MockPublisher::new(config));
        let (orchestrator, _) = setup(&[PlatformName::Twitter], vec![publisher]).await;

        let mut post = post(&["Twitter"]);
        let results = orchestrator.publish_all("user-1", &post).await;
        post.apply_publish(results, Utc::now());

        let deleted = orchestrator.unpublish("user-1", &post).await;
        assert!(!deleted[0].deleted);
        assert_eq!(deleted[0].error.as_deref(), Some("already gone"));
    }
}
