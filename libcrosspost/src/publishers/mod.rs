//! Publisher abstraction and registry
//!
//! Every platform implements [`Publisher`] once. The orchestrator only ever
//! talks to the trait through a [`PublisherRegistry`], so adding a platform
//! means registering one more implementation.
//!
//! # Examples
//!
//! ```no_run
//! use std::sync::Arc;
//! use libcrosspost::publishers::{mock::MockPublisher, PublisherRegistry};
//! use libcrosspost::types::PlatformName;
//!
//! let mut registry = PublisherRegistry::new();
//! registry.register(Arc::new(MockPublisher::success(PlatformName::Twitter)));
//! assert!(registry.get(PlatformName::Twitter).is_some());
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::PublishError;
use crate::types::{PlatformConnection, PlatformName, Post, PublishOutcome, SubAccount};

// Mock publisher is available for all builds to support integration tests
pub mod mock;

/// Which sub-accounts of a connection a publish call may act on
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PublishScope {
    /// Whatever the connection has selected
    #[default]
    Selected,
    /// Exactly these sub-account ids, regardless of the stored selection
    Only(Vec<String>),
}

impl PublishScope {
    pub fn from_sub_targets(sub_targets: &[String]) -> Self {
        if sub_targets.is_empty() {
            Self::Selected
        } else {
            Self::Only(sub_targets.to_vec())
        }
    }

    /// Sub-accounts of `connection` covered by this scope
    ///
    /// Ids the connection does not know are dropped.
    pub fn sub_accounts<'a>(&self, connection: &'a PlatformConnection) -> Vec<&'a SubAccount> {
        match self {
            Self::Selected => connection.selected(),
            Self::Only(ids) => ids
                .iter()
                .filter_map(|id| connection.sub_account(id))
                .collect(),
        }
    }
}

/// Uniform capability implemented once per platform
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Platform this publisher talks to
    fn platform(&self) -> PlatformName;

    /// Publish `post` through `connection`
    ///
    /// Returns one outcome per thing published. Platforms that fan out to
    /// several sub-accounts (e.g. Facebook pages) return one outcome per
    /// sub-account in `scope`, each tagged with its `sub_target`.
    ///
    /// # Errors
    ///
    /// Returns `PublishError::Publisher` carrying a human-readable message
    /// when the platform rejects the post or cannot be reached.
    async fn publish(
        &self,
        connection: &PlatformConnection,
        post: &Post,
        scope: &PublishScope,
    ) -> Result<Vec<PublishOutcome>, PublishError>;

    /// Delete a previously published post
    ///
    /// `aux_token` is the pass-through credential stored with the result,
    /// e.g. a page-scoped token. Returns whether the platform reported the
    /// post as deleted.
    async fn delete(
        &self,
        connection: &PlatformConnection,
        external_id: &str,
        aux_token: Option<&str>,
    ) -> Result<bool, PublishError>;
}

/// Name-keyed set of publishers
#[derive(Clone, Default)]
pub struct PublisherRegistry {
    publishers: HashMap<PlatformName, Arc<dyn Publisher>>,
}

impl PublisherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a publisher under its own platform name, replacing any previous one
    pub fn register(&mut self, publisher: Arc<dyn Publisher>) -> &mut Self {
        self.publishers.insert(publisher.platform(), publisher);
        self
    }

    pub fn get(&self, platform: PlatformName) -> Option<Arc<dyn Publisher>> {
        self.publishers.get(&platform).cloned()
    }

    /// Look up by a free-form base name; unknown names yield `None`
    pub fn get_by_name(&self, name: &str) -> Option<Arc<dyn Publisher>> {
        name.parse::<PlatformName>().ok().and_then(|p| self.get(p))
    }

    pub fn platforms(&self) -> Vec<PlatformName> {
        PlatformName::ALL
            .into_iter()
            .filter(|p| self.publishers.contains_key(p))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.publishers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.publishers.is_empty()
    }
}
