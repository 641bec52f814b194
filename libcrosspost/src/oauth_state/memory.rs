//! In-process state backend

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::{StateBackend, StateRecord};
use crate::error::Result;

/// Records held in a mutex-guarded map
///
/// Suitable for a single process. Pair it with
/// [`OAuthStateStore::spawn_sweeper`](super::OAuthStateStore::spawn_sweeper)
/// so abandoned flows do not accumulate.
#[derive(Default)]
pub struct MemoryStateBackend {
    records: Mutex<HashMap<String, StateRecord>>,
}

impl MemoryStateBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }
}

#[async_trait]
impl StateBackend for MemoryStateBackend {
    async fn put(&self, id: &str, record: StateRecord) -> Result<()> {
        self.records.lock().await.insert(id.to_string(), record);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<StateRecord>> {
        Ok(self.records.lock().await.get(id).cloned())
    }

    async fn take(&self, id: &str) -> Result<Option<StateRecord>> {
        Ok(self.records.lock().await.remove(id))
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.records.lock().await.remove(id).is_some())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut records = self.records.lock().await;
        let before = records.len();
        records.retain(|_, record| !record.is_expired(now));
        Ok(before - records.len())
    }
}
