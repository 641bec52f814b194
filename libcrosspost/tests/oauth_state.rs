//! OAuth state store properties, checked against both backends

use std::sync::Arc;

use anyhow::Result;
use chrono::Duration;
use libcrosspost::oauth_state::memory::MemoryStateBackend;
use libcrosspost::oauth_state::sqlite::SqliteStateBackend;
use libcrosspost::oauth_state::StateBackend;
use libcrosspost::OAuthStateStore;
use serde::{Deserialize, Serialize};
use tempfile::TempDir;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Handshake {
    user_id: String,
    verifier: String,
}

fn handshake() -> Handshake {
    Handshake {
        user_id: "user-1".to_string(),
        verifier: "v".repeat(43),
    }
}

async fn backends(temp_dir: &TempDir) -> Result<Vec<(&'static str, Arc<dyn StateBackend>)>> {
    Ok(vec![
        ("memory", MemoryStateBackend::shared() as Arc<dyn StateBackend>),
        (
            "sqlite",
            Arc::new(SqliteStateBackend::open(&temp_dir.path().join("state.db")).await?),
        ),
    ])
}

#[tokio::test]
async fn test_consume_delivers_exactly_once() -> Result<()> {
    let temp_dir = TempDir::new()?;
    for (name, backend) in backends(&temp_dir).await? {
        let store = OAuthStateStore::new(backend);
        let id = store.create(&handshake()).await?;

        let first: Option<Handshake> = store.consume(&id).await?;
        let second: Option<Handshake> = store.consume(&id).await?;

        assert_eq!(first, Some(handshake()), "{}", name);
        assert_eq!(second, None, "{}", name);
    }
    Ok(())
}

#[tokio::test]
async fn test_peek_before_consume_is_stable() -> Result<()> {
    let temp_dir = TempDir::new()?;
    for (name, backend) in backends(&temp_dir).await? {
        let store = OAuthStateStore::new(backend);
        let id = store.create(&handshake()).await?;

        for _ in 0..3 {
            let peeked: Option<Handshake> = store.peek(&id).await?;
            assert_eq!(peeked, Some(handshake()), "{}", name);
        }
        let consumed: Option<Handshake> = store.consume(&id).await?;
        assert_eq!(consumed, Some(handshake()), "{}", name);
        let after: Option<Handshake> = store.peek(&id).await?;
        assert_eq!(after, None, "{}", name);
    }
    Ok(())
}

#[tokio::test]
async fn test_negative_ttl_is_never_returned() -> Result<()> {
    let temp_dir = TempDir::new()?;
    for (name, backend) in backends(&temp_dir).await? {
        let store = OAuthStateStore::new(backend);

        let id = store
            .create_with_ttl(&handshake(), Duration::milliseconds(-1))
            .await?;
        let peeked: Option<Handshake> = store.peek(&id).await?;
        assert_eq!(peeked, None, "{}", name);

        let id = store
            .create_with_ttl(&handshake(), Duration::milliseconds(-1))
            .await?;
        let consumed: Option<Handshake> = store.consume(&id).await?;
        assert_eq!(consumed, None, "{}", name);
    }
    Ok(())
}

#[tokio::test]
async fn test_ids_are_unique() -> Result<()> {
    let store = OAuthStateStore::new(MemoryStateBackend::shared());
    let mut ids = std::collections::HashSet::new();
    for _ in 0..200 {
        assert!(ids.insert(store.create(&handshake()).await?));
    }
    Ok(())
}

#[tokio::test]
async fn test_purge_leaves_live_states() -> Result<()> {
    let temp_dir = TempDir::new()?;
    for (name, backend) in backends(&temp_dir).await? {
        let store = OAuthStateStore::new(backend);
        let live = store.create(&handshake()).await?;
        store
            .create_with_ttl(&handshake(), Duration::seconds(-5))
            .await?;

        assert_eq!(store.purge_expired().await?, 1, "{}", name);
        let peeked: Option<Handshake> = store.peek(&live).await?;
        assert!(peeked.is_some(), "{}", name);
    }
    Ok(())
}
