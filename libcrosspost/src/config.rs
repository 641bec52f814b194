//! Configuration management for Crosspost
//!
//! Every section has defaults, so an empty file (or no file at all, via
//! [`Config::default`]) is a working single-instance setup.
//!
//! ```toml
//! [publishing]
//! publish_timeout_secs = 180
//! call_timeout_secs = 120
//!
//! [oauth_state]
//! ttl_secs = 600
//! sweep_interval_secs = 60
//! backend = "sqlite"
//! sqlite_path = "~/.local/share/crosspost/oauth_state.db"
//!
//! [tokens]
//! refresh_leeway_secs = 30
//!
//! [refresh.reddit]
//! client_id = "abc"
//! client_secret = "shh"
//! user_agent = "crosspost/0.1 by u/someone"
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};
use crate::types::PlatformName;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub publishing: PublishingConfig,
    #[serde(default)]
    pub oauth_state: OAuthStateConfig,
    #[serde(default)]
    pub tokens: TokensConfig,
    /// OAuth client credentials keyed by lowercase platform name
    #[serde(default)]
    pub refresh: HashMap<String, RefreshClientConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishingConfig {
    /// Upper bound for one publish call (also used by retries)
    pub publish_timeout_secs: u64,
    /// Upper bound for ordinary platform calls (token refresh, delete)
    pub call_timeout_secs: u64,
}

impl Default for PublishingConfig {
    fn default() -> Self {
        Self {
            publish_timeout_secs: 180,
            call_timeout_secs: 120,
        }
    }
}

impl PublishingConfig {
    pub fn publish_timeout(&self) -> Duration {
        Duration::from_secs(self.publish_timeout_secs)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateBackendKind {
    #[default]
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OAuthStateConfig {
    pub ttl_secs: u64,
    pub sweep_interval_secs: u64,
    pub backend: StateBackendKind,
    pub sqlite_path: String,
}

impl Default for OAuthStateConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 600,
            sweep_interval_secs: 60,
            backend: StateBackendKind::Memory,
            sqlite_path: "~/.local/share/crosspost/oauth_state.db".to_string(),
        }
    }
}

impl OAuthStateConfig {
    pub fn ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.ttl_secs as i64)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// SQLite path with `~` expanded
    pub fn expand_sqlite_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.sqlite_path).to_string())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TokensConfig {
    /// Treat tokens expiring within this many seconds as expired
    pub refresh_leeway_secs: u64,
}

impl TokensConfig {
    pub fn leeway(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.refresh_leeway_secs as i64)
    }
}

/// OAuth client used to refresh tokens for one platform
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshClientConfig {
    pub client_id: String,
    pub client_secret: Option<String>,
    /// Override the platform's default token endpoint
    pub token_url: Option<String>,
    /// Sent as User-Agent; Reddit rejects generic agents
    pub user_agent: Option<String>,
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).map_err(ConfigError::ParseError)?;
        config.validate()?;
        Ok(config)
    }

    /// Check values serde cannot
    pub fn validate(&self) -> Result<()> {
        if self.publishing.publish_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "publishing.publish_timeout_secs must be greater than 0".to_string(),
            )
            .into());
        }
        if self.publishing.call_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "publishing.call_timeout_secs must be greater than 0".to_string(),
            )
            .into());
        }
        if self.oauth_state.ttl_secs == 0 {
            return Err(ConfigError::Invalid("oauth_state.ttl_secs must be greater than 0".to_string()).into());
        }
        if self.oauth_state.sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "oauth_state.sweep_interval_secs must be greater than 0".to_string(),
            )
            .into());
        }

        for (key, client) in &self.refresh {
            if key.parse::<PlatformName>().is_err() {
                return Err(ConfigError::Invalid(format!("refresh.{}: unknown platform", key)).into());
            }
            if client.client_id.trim().is_empty() {
                return Err(ConfigError::MissingField(format!("refresh.{}.client_id", key)).into());
            }
        }

        Ok(())
    }

    /// Refresh client configured for `platform`, if any
    pub fn refresh_client(&self, platform: PlatformName) -> Option<&RefreshClientConfig> {
        self.refresh
            .iter()
            .find(|(key, _)| key.parse::<PlatformName>().ok() == Some(platform))
            .map(|(_, client)| client)
    }
}

/// Resolve the configuration file path following XDG Base Directory conventions
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("CROSSPOST_CONFIG") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("crosspost").join("config.toml"))
}
