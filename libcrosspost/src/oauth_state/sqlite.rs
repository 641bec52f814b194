//! SQLite state backend
//!
//! Lets several processes share pending authorizations. Consumption relies on
//! `DELETE ... RETURNING`, so the find-and-delete is a single statement.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;

use super::{StateBackend, StateRecord};
use crate::error::{Result, StoreError};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS oauth_states (
    id TEXT PRIMARY KEY,
    payload TEXT NOT NULL,
    expires_at INTEGER NOT NULL
)
"#;

const EXPIRY_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_oauth_states_expires_at ON oauth_states(expires_at)";

#[derive(Clone)]
pub struct SqliteStateBackend {
    pool: SqlitePool,
}

impl SqliteStateBackend {
    /// Open (creating if needed) the database at `path`
    pub async fn open(path: &Path) -> Result<Self> {
        let expanded_path = shellexpand::tilde(&path.to_string_lossy()).to_string();
        let path = Path::new(&expanded_path);

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(StoreError::IoError)?;
            }
        }

        // forward slashes work on every platform; mode=rwc creates the file
        let db_url = format!("sqlite://{}?mode=rwc", expanded_path.replace('\\', "/"));
        let pool = SqlitePool::connect(&db_url)
            .await
            .map_err(StoreError::SqlxError)?;

        Self::from_pool(pool).await
    }

    /// Private in-memory database, mostly for tests
    pub async fn in_memory() -> Result<Self> {
        // every connection to :memory: is its own database, so keep exactly one alive
        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(StoreError::SqlxError)?;

        Self::from_pool(pool).await
    }

    /// Use an existing pool, creating the table if missing
    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::query(SCHEMA)
            .execute(&pool)
            .await
            .map_err(StoreError::SqlxError)?;
        sqlx::query(EXPIRY_INDEX)
            .execute(&pool)
            .await
            .map_err(StoreError::SqlxError)?;

        Ok(Self { pool })
    }

    pub async fn count(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM oauth_states")
            .fetch_one(&self.pool)
            .await
            .map_err(StoreError::SqlxError)?;
        Ok(row.try_get("n").map_err(StoreError::SqlxError)?)
    }
}

fn record_from_row(row: &SqliteRow) -> Result<StateRecord> {
    let payload: String = row.try_get("payload").map_err(StoreError::SqlxError)?;
    let expires_at: i64 = row.try_get("expires_at").map_err(StoreError::SqlxError)?;

    Ok(StateRecord {
        payload: serde_json::from_str(&payload).map_err(StoreError::Serialization)?,
        expires_at: DateTime::<Utc>::from_timestamp_millis(expires_at).ok_or_else(|| {
            StoreError::Corrupt(format!("oauth state expiry out of range: {}", expires_at))
        })?,
    })
}

#[async_trait]
impl StateBackend for SqliteStateBackend {
    async fn put(&self, id: &str, record: StateRecord) -> Result<()> {
        let payload = serde_json::to_string(&record.payload).map_err(StoreError::Serialization)?;

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO oauth_states (id, payload, expires_at)
            VALUES (?, ?, ?)
            "#,
        )
        .bind(id)
        .bind(payload)
        .bind(record.expires_at.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(StoreError::SqlxError)?;

        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<StateRecord>> {
        let row = sqlx::query("SELECT payload, expires_at FROM oauth_states WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::SqlxError)?;

        row.as_ref().map(record_from_row).transpose()
    }

    async fn take(&self, id: &str) -> Result<Option<StateRecord>> {
        let row = sqlx::query("DELETE FROM oauth_states WHERE id = ? RETURNING payload, expires_at")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::SqlxError)?;

        row.as_ref().map(record_from_row).transpose()
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM oauth_states WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(StoreError::SqlxError)?;

        Ok(result.rows_affected() > 0)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let result = sqlx::query("DELETE FROM oauth_states WHERE expires_at <= ?")
            .bind(now.timestamp_millis())
            .execute(&self.pool)
            .await
            .map_err(StoreError::SqlxError)?;

        Ok(result.rows_affected() as usize)
    }
}
