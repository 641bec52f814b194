//! Short-lived OAuth authorization state
//!
//! An authorization flow stores a payload (user id, PKCE verifier, redirect
//! target, ...) under a random opaque id, sends the id to the provider as the
//! `state` parameter, and consumes it exactly once when the callback arrives.
//!
//! Records live in an injected [`StateBackend`]. Expired records are never
//! returned: `consume` drops them, `peek` deletes them on sight, and a
//! background sweeper purges the rest.
//!
//! # Examples
//!
//! ```no_run
//! use libcrosspost::oauth_state::{memory::MemoryStateBackend, OAuthStateStore, PkcePair};
//!
//! # async fn example() -> libcrosspost::Result<()> {
//! let store = OAuthStateStore::new(MemoryStateBackend::shared());
//! let pkce = PkcePair::generate();
//! let state = store.create(&("user-1", pkce.verifier.clone())).await?;
//!
//! // ... provider redirects back with ?state=...
//! let payload: Option<(String, String)> = store.consume(&state).await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{PublishError, Result, StoreError};

pub mod memory;
pub mod sqlite;

/// Default lifetime of an authorization state
pub const DEFAULT_STATE_TTL_SECS: i64 = 600;

const STATE_ID_BYTES: usize = 32;

/// A stored payload and its absolute expiry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
    pub payload: serde_json::Value,
    pub expires_at: DateTime<Utc>,
}

impl StateRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Storage for state records
///
/// `take` must be an atomic find-and-delete: two concurrent calls for the
/// same id return the record to at most one of them.
#[async_trait]
pub trait StateBackend: Send + Sync {
    async fn put(&self, id: &str, record: StateRecord) -> Result<()>;

    async fn get(&self, id: &str) -> Result<Option<StateRecord>>;

    async fn take(&self, id: &str) -> Result<Option<StateRecord>>;

    /// Returns whether a record was removed
    async fn delete(&self, id: &str) -> Result<bool>;

    /// Remove every record expired at `now`, returning how many went
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize>;
}

/// Random URL-safe identifier with 256 bits of entropy
pub fn generate_state_id() -> String {
    let mut bytes = [0u8; STATE_ID_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// PKCE verifier and its S256 challenge (RFC 7636)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PkcePair {
    pub verifier: String,
    pub challenge: String,
}

impl PkcePair {
    pub const METHOD: &'static str = "S256";

    pub fn generate() -> Self {
        let verifier = generate_state_id();
        let challenge = Self::challenge_for(&verifier);
        Self { verifier, challenge }
    }

    pub fn challenge_for(verifier: &str) -> String {
        URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
    }
}

/// Creates, peeks and consumes authorization state
#[derive(Clone)]
pub struct OAuthStateStore {
    backend: Arc<dyn StateBackend>,
    default_ttl: chrono::Duration,
}

impl OAuthStateStore {
    pub fn new(backend: Arc<dyn StateBackend>) -> Self {
        Self {
            backend,
            default_ttl: chrono::Duration::seconds(DEFAULT_STATE_TTL_SECS),
        }
    }

    pub fn with_default_ttl(mut self, ttl: chrono::Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn default_ttl(&self) -> chrono::Duration {
        self.default_ttl
    }

    pub fn backend(&self) -> &Arc<dyn StateBackend> {
        &self.backend
    }

    /// Store `payload` for the default lifetime and return its id
    pub async fn create<T: Serialize + ?Sized>(&self, payload: &T) -> Result<String> {
        self.create_with_ttl(payload, self.default_ttl).await
    }

    /// Store `payload` for `ttl` and return its id
    ///
    /// A non-positive `ttl` produces a record that is already expired.
    pub async fn create_with_ttl<T: Serialize + ?Sized>(
        &self,
        payload: &T,
        ttl: chrono::Duration,
    ) -> Result<String> {
        let record = StateRecord {
            payload: serde_json::to_value(payload).map_err(StoreError::Serialization)?,
            expires_at: Utc::now() + ttl,
        };
        let id = generate_state_id();
        self.backend.put(&id, record).await?;
        debug!("Created OAuth state expiring in {}s", ttl.num_seconds());
        Ok(id)
    }

    /// Take the payload stored under `id`, at most once
    ///
    /// Missing and expired ids both yield `None`.
    pub async fn consume<T: DeserializeOwned>(&self, id: &str) -> Result<Option<T>> {
        match self.backend.take(id).await? {
            Some(record) if !record.is_expired(Utc::now()) => decode(record).map(Some),
            Some(_) => {
                debug!("Discarded expired OAuth state on consume");
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// Like [`consume`](Self::consume), but a missing or expired id is an error
    pub async fn consume_required<T: DeserializeOwned>(&self, id: &str) -> Result<T> {
        self.consume(id)
            .await?
            .ok_or_else(|| PublishError::StateExpiredOrMissing.into())
    }

    /// Read the payload without consuming it
    ///
    /// An expired record found here is deleted.
    pub async fn peek<T: DeserializeOwned>(&self, id: &str) -> Result<Option<T>> {
        match self.backend.get(id).await? {
            Some(record) if record.is_expired(Utc::now()) => {
                self.backend.delete(id).await?;
                debug!("Deleted expired OAuth state on peek");
                Ok(None)
            }
            Some(record) => decode(record).map(Some),
            None => Ok(None),
        }
    }

    /// Drop a pending state; returns whether one existed
    pub async fn cancel(&self, id: &str) -> Result<bool> {
        self.backend.delete(id).await
    }

    pub async fn purge_expired(&self) -> Result<usize> {
        self.backend.purge_expired(Utc::now()).await
    }

    /// Purge expired records every `interval` until the handle is aborted
    pub fn spawn_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let backend = Arc::clone(&self.backend);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match backend.purge_expired(Utc::now()).await {
                    Ok(0) => {}
                    Ok(purged) => debug!("Purged {} expired OAuth state(s)", purged),
                    Err(e) => warn!("Failed to purge expired OAuth state: {}", e),
                }
            }
        })
    }
}

fn decode<T: DeserializeOwned>(record: StateRecord) -> Result<T> {
    Ok(serde_json::from_value(record.payload).map_err(StoreError::Serialization)?)
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryStateBackend;
    use super::*;
    use crate::error::CrosspostError;
    use serde_json::json;

    fn store() -> OAuthStateStore {
        OAuthStateStore::new(MemoryStateBackend::shared())
    }

    #[test]
    fn test_state_ids_are_url_safe_and_unique() {
        let a = generate_state_id();
        let b = generate_state_id();
        assert_ne!(a, b);
        assert_eq!(a.len(), 43);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_pkce_rfc7636_vector() {
        assert_eq!(
            PkcePair::challenge_for("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk"),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn test_pkce_generate() {
        let pair = PkcePair::generate();
        assert_eq!(pair.challenge, PkcePair::challenge_for(&pair.verifier));
        assert!(pair.verifier.len() >= 43);
    }

    #[tokio::test]
    async fn test_consume_once() {
        let store = store();
        let id = store.create(&json!({"user_id": "u1"})).await.unwrap();

        let first: Option<serde_json::Value> = store.consume(&id).await.unwrap();
        let second: Option<serde_json::Value> = store.consume(&id).await.unwrap();

        assert_eq!(first, Some(json!({"user_id": "u1"})));
        assert_eq!(second, None);
    }

    #[tokio::test]
    async fn test_peek_is_repeatable() {
        let store = store();
        let id = store.create(&"payload").await.unwrap();

        for _ in 0..3 {
            let peeked: Option<String> = store.peek(&id).await.unwrap();
            assert_eq!(peeked.as_deref(), Some("payload"));
        }
        let consumed: Option<String> = store.consume(&id).await.unwrap();
        assert_eq!(consumed.as_deref(), Some("payload"));
    }

    #[tokio::test]
    async fn test_already_expired_state_is_absent() {
        let store = store();
        let id = store
            .create_with_ttl(&"late", chrono::Duration::milliseconds(-1))
            .await
            .unwrap();

        let peeked: Option<String> = store.peek(&id).await.unwrap();
        assert!(peeked.is_none());
        // peek removed it
        assert!(store.backend().get(&id).await.unwrap().is_none());

        let id = store
            .create_with_ttl(&"late", chrono::Duration::milliseconds(-1))
            .await
            .unwrap();
        let consumed: Option<String> = store.consume(&id).await.unwrap();
        assert!(consumed.is_none());
    }

    #[tokio::test]
    async fn test_unknown_id_is_not_an_error() {
        let store = store();
        let peeked: Option<String> = store.peek("nope").await.unwrap();
        let consumed: Option<String> = store.consume("nope").await.unwrap();
        assert!(peeked.is_none());
        assert!(consumed.is_none());
    }

    #[tokio::test]
    async fn test_consume_required_maps_missing_to_error() {
        let store = store();
        let result: Result<String> = store.consume_required("nope").await;
        assert!(matches!(
            result,
            Err(CrosspostError::Publish(PublishError::StateExpiredOrMissing))
        ));
    }

    #[tokio::test]
    async fn test_cancel() {
        let store = store();
        let id = store.create(&1u32).await.unwrap();
        assert!(store.cancel(&id).await.unwrap());
        assert!(!store.cancel(&id).await.unwrap());
        let consumed: Option<u32> = store.consume(&id).await.unwrap();
        assert!(consumed.is_none());
    }

    #[tokio::test]
    async fn test_payload_type_mismatch_is_an_error() {
        let store = store();
        let id = store.create(&json!({"a": 1})).await.unwrap();
        let result: Result<Option<u64>> = store.peek(&id).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_sweeper_purges_expired_records() {
        let backend = MemoryStateBackend::shared();
        let store = OAuthStateStore::new(backend.clone());
        store
            .create_with_ttl(&"gone", chrono::Duration::milliseconds(-1))
            .await
            .unwrap();
        let kept = store.create(&"kept").await.unwrap();

        let sweeper = store.spawn_sweeper(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(50)).await;
        sweeper.abort();

        assert_eq!(backend.len().await, 1);
        assert!(backend.get(&kept).await.unwrap().is_some());
    }
}
