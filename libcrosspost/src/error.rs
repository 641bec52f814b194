//! Error types for Crosspost

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CrosspostError>;

#[derive(Error, Debug)]
pub enum CrosspostError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Publish error: {0}")]
    Publish(#[from] PublishError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value: {0}")]
    Invalid(String),
}

/// Failures of the state store and connection store backends
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database operation failed: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("Failed to encode payload: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

/// Per-target failures
///
/// These never escape the orchestrator; each one is turned into the error
/// message of a failed [`PublishResult`](crate::types::PublishResult).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    #[error("{0} not connected")]
    NotConnected(String),

    #[error("{0} not supported")]
    UnsupportedPlatform(String),

    #[error("{0} token expired, no refresh token; reconnect required")]
    TokenExpiredNoRefresh(String),

    #[error("{0} token expired and cannot be refreshed, please reconnect")]
    RefreshUnsupported(String),

    /// Upstream refresh failure, message passed through unchanged
    #[error("{0}")]
    TokenRefreshFailed(String),

    /// Upstream publisher failure, message passed through unchanged
    #[error("{0}")]
    Publisher(String),

    #[error("{platform} connection lookup failed: {message}")]
    ConnectionLookup { platform: String, message: String },

    #[error("{platform} timed out after {seconds}s")]
    Timeout { platform: String, seconds: u64 },

    #[error("Authorization session expired, please retry the authorization")]
    StateExpiredOrMissing,
}

impl PublishError {
    /// Whether reconnecting the account is the only way forward
    pub fn requires_reconnect(&self) -> bool {
        matches!(
            self,
            PublishError::NotConnected(_)
                | PublishError::TokenExpiredNoRefresh(_)
                | PublishError::RefreshUnsupported(_)
        )
    }
}
