//! Service layer for Crosspost
//!
//! `CrosspostService` is the single entry point a host application talks to.
//! It wires configuration, the publisher registry, token management, the
//! OAuth state store and notifications together, and keeps a [`Post`]'s
//! status and results consistent with what the orchestrator reports.
//!
//! - [`PublishOrchestrator`]: fan-out publishing with per-target isolation
//! - [`RetryCoordinator`]: retries scoped to selected platforms
//! - [`AuthorizationFlow`](authorization::AuthorizationFlow): OAuth handshake state
//! - [`EventBus`]: progress events
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use libcrosspost::publishers::mock::MockPublisher;
//! use libcrosspost::service::CrosspostService;
//! use libcrosspost::store::MemoryConnectionStore;
//! use libcrosspost::types::{PlatformName, Post};
//! use libcrosspost::Config;
//!
//! # async fn example() -> libcrosspost::Result<()> {
//! let service = CrosspostService::builder(Config::default())
//!     .connection_store(Arc::new(MemoryConnectionStore::new()))
//!     .publisher(Arc::new(MockPublisher::success(PlatformName::Twitter)))
//!     .build()
//!     .await?;
//!
//! let mut post = Post::new("user-1", "Hello everyone", vec!["Twitter".to_string()]);
//! let results = service.publish(&mut post).await?;
//! println!("{} result(s), status {:?}", results.len(), post.status);
//! # Ok(())
//! # }
//! ```

pub mod authorization;
pub mod events;
pub mod notify;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use self::authorization::{AuthorizationFlow, AuthorizationRequest, AuthorizationState};
use self::events::{Event, EventBus, EventReceiver};
use self::notify::{LogDispatcher, NotificationDispatcher};
use crate::config::{Config, StateBackendKind};
use crate::error::{ConfigError, CrosspostError, Result};
use crate::oauth_state::memory::MemoryStateBackend;
use crate::oauth_state::sqlite::SqliteStateBackend;
use crate::oauth_state::{OAuthStateStore, StateBackend};
use crate::orchestrator::{DeleteResult, PublishOrchestrator};
use crate::publishers::{Publisher, PublisherRegistry};
use crate::retry::RetryCoordinator;
use crate::scheduling::parse_schedule_at;
use crate::store::ConnectionStore;
use crate::targets::resolve_targets;
use crate::tokens::oauth2::OAuth2Refresher;
use crate::tokens::{TokenManager, TokenRefresher};
use crate::types::{PlatformName, Post, PublishResult};

/// Main service facade
pub struct CrosspostService {
    orchestrator: PublishOrchestrator,
    retry: RetryCoordinator,
    authorization: AuthorizationFlow,
    notifier: Arc<dyn NotificationDispatcher>,
    event_bus: EventBus,
    sweeper: JoinHandle<()>,
}

impl CrosspostService {
    pub fn builder(config: Config) -> CrosspostServiceBuilder {
        CrosspostServiceBuilder::new(config)
    }

    /// Builder seeded from the configuration file at the default location
    pub fn builder_from_default_config() -> Result<CrosspostServiceBuilder> {
        Ok(Self::builder(Config::load()?))
    }

    pub fn orchestrator(&self) -> &PublishOrchestrator {
        &self.orchestrator
    }

    pub fn authorization(&self) -> &AuthorizationFlow {
        &self.authorization
    }

    /// Receive progress events from every publish and retry
    pub fn subscribe(&self) -> EventReceiver {
        self.event_bus.subscribe()
    }

    /// Publish a draft or scheduled post to all of its targets
    ///
    /// Replaces the post's results and marks it published when at least one
    /// target succeeded. Per-target failures are in the returned results,
    /// not in the error.
    ///
    /// # Errors
    ///
    /// `InvalidInput` when the post is already published or names no targets.
    pub async fn publish(&self, post: &mut Post) -> Result<Vec<PublishResult>> {
        if post.is_published() {
            return Err(self.reject(post, "Post is already published; retry failed platforms instead"));
        }
        if resolve_targets(&post.targets).is_empty() {
            return Err(self.reject(post, "Post has no targets"));
        }

        let user_id = post.user_id.clone();
        let results = self.orchestrator.publish_all(&user_id, post).await;
        post.apply_publish(results.clone(), Utc::now());

        self.notify(&user_id, post, &results).await;
        Ok(results)
    }

    /// Republish to `targets` and merge the outcome into the post
    ///
    /// Only the results of the retried platforms are replaced.
    pub async fn retry<S: AsRef<str>>(&self, post: &mut Post, targets: &[S]) -> Result<Vec<PublishResult>> {
        let user_id = post.user_id.clone();
        let results = self.retry.retry(&user_id, post, targets).await;
        if results.is_empty() {
            return Ok(results);
        }
        post.merge_retry(results.clone(), Utc::now());

        self.notify(&user_id, post, &results).await;
        Ok(results)
    }

    /// Retry every target whose latest result failed
    pub async fn retry_failed(&self, post: &mut Post) -> Result<Vec<PublishResult>> {
        let failed = post.failed_targets();
        self.retry(post, &failed).await
    }

    /// Delete the post from every platform it was published to
    pub async fn unpublish(&self, post: &Post) -> Vec<DeleteResult> {
        self.orchestrator.unpublish(&post.user_id, post).await
    }

    /// Parse `when` and schedule the post for it
    pub fn schedule(&self, post: &mut Post, when: &str) -> Result<DateTime<Utc>> {
        let now = Utc::now();
        let at = parse_schedule_at(when, now)?;
        post.schedule(at, now)?;
        info!("Scheduled post {} for {}", post.id, at.to_rfc3339());
        Ok(at)
    }

    pub async fn begin_authorization(
        &self,
        user_id: &str,
        platform: PlatformName,
        redirect_uri: Option<String>,
    ) -> Result<AuthorizationRequest> {
        self.authorization.begin(user_id, platform, redirect_uri).await
    }

    pub async fn peek_authorization(&self, state: &str) -> Result<Option<AuthorizationState>> {
        self.authorization.peek(state).await
    }

    pub async fn complete_authorization(&self, state: &str) -> Result<AuthorizationState> {
        self.authorization.complete(state).await
    }

    pub async fn cancel_authorization(&self, state: &str) -> Result<bool> {
        self.authorization.cancel(state).await
    }

    fn reject(&self, post: &Post, reason: &str) -> CrosspostError {
        warn!("Rejected publish of post {}: {}", post.id, reason);
        self.event_bus.emit(Event::PublishFailed {
            post_id: post.id.clone(),
            error: reason.to_string(),
        });
        CrosspostError::InvalidInput(reason.to_string())
    }

    async fn notify(&self, user_id: &str, post: &Post, results: &[PublishResult]) {
        if let Err(e) = self.notifier.dispatch(user_id, post, results).await {
            warn!("Failed to dispatch notification for post {}: {}", post.id, e);
        }
    }
}

impl Drop for CrosspostService {
    fn drop(&mut self) {
        self.sweeper.abort();
    }
}

/// Assembles a [`CrosspostService`]
///
/// Only the connection store is mandatory. Refreshers configured under
/// `[refresh.*]` are registered automatically; explicitly added ones replace
/// them per platform.
pub struct CrosspostServiceBuilder {
    config: Config,
    registry: PublisherRegistry,
    store: Option<Arc<dyn ConnectionStore>>,
    refreshers: Vec<Arc<dyn TokenRefresher>>,
    state_backend: Option<Arc<dyn StateBackend>>,
    notifier: Option<Arc<dyn NotificationDispatcher>>,
    event_bus: Option<EventBus>,
}

impl CrosspostServiceBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            registry: PublisherRegistry::new(),
            store: None,
            refreshers: Vec::new(),
            state_backend: None,
            notifier: None,
            event_bus: None,
        }
    }

    pub fn publisher(mut self, publisher: Arc<dyn Publisher>) -> Self {
        self.registry.register(publisher);
        self
    }

    pub fn registry(mut self, registry: PublisherRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn connection_store(mut self, store: Arc<dyn ConnectionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn refresher(mut self, refresher: Arc<dyn TokenRefresher>) -> Self {
        self.refreshers.push(refresher);
        self
    }

    /// Override the backend chosen by `[oauth_state] backend`
    pub fn state_backend(mut self, backend: Arc<dyn StateBackend>) -> Self {
        self.state_backend = Some(backend);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn NotificationDispatcher>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Must run inside a tokio runtime; it starts the state sweeper
    ///
    /// # Errors
    ///
    /// Returns an error if no connection store was given or the SQLite state
    /// database cannot be opened.
    pub async fn build(self) -> Result<CrosspostService> {
        let config = self.config;
        config.validate()?;

        let store = self
            .store
            .ok_or_else(|| ConfigError::MissingField("connection store".to_string()))?;

        let mut tokens = TokenManager::new(store)
            .with_call_timeout(config.publishing.call_timeout())
            .with_leeway(config.tokens.leeway());
        for refresher in OAuth2Refresher::from_config(&config) {
            tokens.register(Arc::new(refresher));
        }
        for refresher in self.refreshers {
            tokens.register(refresher);
        }

        let backend: Arc<dyn StateBackend> = match self.state_backend {
            Some(backend) => backend,
            None => match config.oauth_state.backend {
                StateBackendKind::Memory => MemoryStateBackend::shared(),
                StateBackendKind::Sqlite => {
                    let path = config.oauth_state.expand_sqlite_path();
                    Arc::new(SqliteStateBackend::open(&path).await?)
                }
            },
        };
        let states = OAuthStateStore::new(backend).with_default_ttl(config.oauth_state.ttl());
        let sweeper = states.spawn_sweeper(config.oauth_state.sweep_interval());

        let event_bus = self.event_bus.unwrap_or_default();
        let orchestrator = PublishOrchestrator::new(self.registry, tokens)
            .with_publish_timeout(config.publishing.publish_timeout())
            .with_call_timeout(config.publishing.call_timeout())
            .with_events(event_bus.clone());

        info!(
            "Crosspost service ready with {} publisher(s)",
            orchestrator.registry().len()
        );

        Ok(CrosspostService {
            retry: RetryCoordinator::new(orchestrator.clone()),
            orchestrator,
            authorization: AuthorizationFlow::new(states),
            notifier: self.notifier.unwrap_or_else(|| Arc::new(LogDispatcher)),
            event_bus,
            sweeper,
        })
    }
}
