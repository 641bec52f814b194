//! Connection persistence boundary
//!
//! Connections are owned by an external store. The core only needs to look
//! one up per (user, platform) and to write refreshed tokens back as a single
//! update scoped to the connection id.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{Result, StoreError};
use crate::tokens::TokenGrant;
use crate::types::{PlatformConnection, PlatformName};

#[async_trait]
pub trait ConnectionStore: Send + Sync {
    /// The connection `user_id` holds for `platform`, if any
    async fn find(&self, user_id: &str, platform: PlatformName) -> Result<Option<PlatformConnection>>;

    /// Atomically overwrite the token fields of one connection
    ///
    /// `refresh_token` and `expires_at` are only replaced when the grant
    /// carries them.
    async fn update_tokens(&self, connection_id: &str, grant: &TokenGrant) -> Result<()>;
}

/// In-process connection store
#[derive(Clone, Default)]
pub struct MemoryConnectionStore {
    connections: Arc<RwLock<HashMap<String, PlatformConnection>>>,
}

impl MemoryConnectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a connection, replacing any the user already holds for that platform
    pub async fn insert(&self, connection: PlatformConnection) {
        let mut connections = self.connections.write().await;
        connections.retain(|_, existing| {
            !(existing.user_id == connection.user_id && existing.platform == connection.platform)
        });
        connections.insert(connection.id.clone(), connection);
    }

    pub async fn get(&self, connection_id: &str) -> Option<PlatformConnection> {
        self.connections.read().await.get(connection_id).cloned()
    }

    /// Disconnect; returns whether anything was removed
    pub async fn remove(&self, connection_id: &str) -> bool {
        self.connections.write().await.remove(connection_id).is_some()
    }

    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }
}

#[async_trait]
impl ConnectionStore for MemoryConnectionStore {
    async fn find(&self, user_id: &str, platform: PlatformName) -> Result<Option<PlatformConnection>> {
        Ok(self
            .connections
            .read()
            .await
            .values()
            .find(|c| c.user_id == user_id && c.platform == platform)
            .cloned())
    }

    async fn update_tokens(&self, connection_id: &str, grant: &TokenGrant) -> Result<()> {
        let mut connections = self.connections.write().await;
        let connection = connections
            .get_mut(connection_id)
            .ok_or_else(|| StoreError::NotFound(format!("connection {}", connection_id)))?;
        grant.apply_to(connection);
        Ok(())
    }
}
