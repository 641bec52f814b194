//! Crosspost - publish one post to many social platforms
//!
//! This library is the engine behind cross-posting: it resolves a post's
//! target identifiers, fans the post out to platform publishers concurrently,
//! keeps OAuth tokens fresh, and reports a result per platform so failures
//! can be retried one platform at a time. It also holds the short-lived state
//! of OAuth authorization handshakes.

pub mod config;
pub mod error;
pub mod logging;
pub mod oauth_state;
pub mod orchestrator;
pub mod publishers;
pub mod retry;
pub mod scheduling;
pub mod service;
pub mod store;
pub mod targets;
pub mod tokens;
pub mod types;

// Re-export commonly used types
pub use config::Config;
pub use error::{CrosspostError, PublishError, Result};
pub use oauth_state::{OAuthStateStore, PkcePair};
pub use orchestrator::{DeleteResult, PublishOrchestrator};
pub use publishers::{PublishScope, Publisher, PublisherRegistry};
pub use retry::RetryCoordinator;
pub use service::CrosspostService;
pub use store::ConnectionStore;
pub use tokens::{TokenManager, TokenRefresher};
pub use types::{PlatformConnection, PlatformName, Post, PostStatus, PublishOutcome, PublishResult};
