//! Core types for Crosspost

use std::collections::HashSet;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CrosspostError, Result};

/// Supported platforms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlatformName {
    Twitter,
    Facebook,
    Instagram,
    TikTok,
    LinkedIn,
    YouTube,
    Reddit,
}

impl PlatformName {
    pub const ALL: [PlatformName; 7] = [
        PlatformName::Twitter,
        PlatformName::Facebook,
        PlatformName::Instagram,
        PlatformName::TikTok,
        PlatformName::LinkedIn,
        PlatformName::YouTube,
        PlatformName::Reddit,
    ];

    /// Canonical name as used in target identifiers and results
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Twitter => "Twitter",
            Self::Facebook => "Facebook",
            Self::Instagram => "Instagram",
            Self::TikTok => "TikTok",
            Self::LinkedIn => "LinkedIn",
            Self::YouTube => "YouTube",
            Self::Reddit => "Reddit",
        }
    }
}

impl FromStr for PlatformName {
    type Err = CrosspostError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "twitter" | "x" => Ok(Self::Twitter),
            "facebook" => Ok(Self::Facebook),
            "instagram" => Ok(Self::Instagram),
            "tiktok" => Ok(Self::TikTok),
            "linkedin" => Ok(Self::LinkedIn),
            "youtube" => Ok(Self::YouTube),
            "reddit" => Ok(Self::Reddit),
            _ => Err(CrosspostError::InvalidInput(format!(
                "Unknown platform: '{}'",
                s
            ))),
        }
    }
}

impl std::fmt::Display for PlatformName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A selectable destination inside one connection (e.g. a Facebook page)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubAccount {
    pub id: String,
    pub name: Option<String>,
    /// Token scoped to this sub-account, when the platform issues one
    pub access_token: Option<String>,
}

/// One user's authorization to one platform
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConnection {
    pub id: String,
    pub user_id: String,
    pub platform: PlatformName,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub token_expires_at: Option<DateTime<Utc>>,
    pub account_id: Option<String>,
    pub display_name: Option<String>,
    #[serde(default)]
    pub sub_accounts: Vec<SubAccount>,
    /// Ids of the sub-accounts published to when the post names none
    #[serde(default)]
    pub selected_sub_accounts: Vec<String>,
}

impl PlatformConnection {
    pub fn new(user_id: impl Into<String>, platform: PlatformName, access_token: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            platform,
            access_token: access_token.into(),
            refresh_token: None,
            token_expires_at: None,
            account_id: None,
            display_name: None,
            sub_accounts: Vec::new(),
            selected_sub_accounts: Vec::new(),
        }
    }

    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.token_expires_at = Some(expires_at);
        self
    }

    /// Add a sub-account and mark it selected
    pub fn with_sub_account(mut self, sub_account: SubAccount) -> Self {
        self.selected_sub_accounts.push(sub_account.id.clone());
        self.sub_accounts.push(sub_account);
        self
    }

    pub fn sub_account(&self, id: &str) -> Option<&SubAccount> {
        self.sub_accounts.iter().find(|s| s.id == id)
    }

    /// Sub-accounts currently selected, in selection order
    pub fn selected(&self) -> Vec<&SubAccount> {
        self.selected_sub_accounts
            .iter()
            .filter_map(|id| self.sub_account(id))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PostStatus {
    Draft,
    Scheduled,
    Published,
}

/// What a publisher reports for one thing it published
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishOutcome {
    pub external_id: String,
    pub external_url: Option<String>,
    /// Sub-account the outcome belongs to, for fan-out platforms
    pub sub_target: Option<String>,
    /// Extra credential needed to delete the post later (e.g. a page token)
    pub aux_token: Option<String>,
}

impl PublishOutcome {
    pub fn new(external_id: impl Into<String>) -> Self {
        Self {
            external_id: external_id.into(),
            ..Default::default()
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.external_url = Some(url.into());
        self
    }
}

/// Outcome of publishing to one resolved target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishResult {
    /// Base platform name, never carries the sub-target suffix
    pub platform: String,
    pub success: bool,
    pub external_id: Option<String>,
    pub external_url: Option<String>,
    pub error: Option<String>,
    pub sub_target: Option<String>,
    pub aux_token: Option<String>,
}

impl PublishResult {
    pub fn failure(platform: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            platform: platform.into(),
            success: false,
            external_id: None,
            external_url: None,
            error: Some(error.into()),
            sub_target: None,
            aux_token: None,
        }
    }

    /// Tag the result with the sub-target it belongs to
    pub fn with_sub_target(mut self, sub_target: impl Into<String>) -> Self {
        self.sub_target = Some(sub_target.into());
        self
    }

    pub fn from_outcome(platform: impl Into<String>, outcome: PublishOutcome) -> Self {
        Self {
            platform: platform.into(),
            success: true,
            external_id: Some(outcome.external_id),
            external_url: outcome.external_url,
            error: None,
            sub_target: outcome.sub_target,
            aux_token: outcome.aux_token,
        }
    }
}

/// Content distributed to one or more platforms
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub user_id: String,
    pub caption: String,
    pub media_urls: Vec<String>,
    /// `Name` or `Name:subId`
    pub targets: Vec<String>,
    pub status: PostStatus,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub results: Vec<PublishResult>,
}

impl Post {
    pub fn new(user_id: impl Into<String>, caption: impl Into<String>, targets: Vec<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            caption: caption.into(),
            media_urls: Vec::new(),
            targets,
            status: PostStatus::Draft,
            scheduled_at: None,
            published_at: None,
            results: Vec::new(),
        }
    }

    pub fn with_media(mut self, media_urls: Vec<String>) -> Self {
        self.media_urls = media_urls;
        self
    }

    pub fn is_published(&self) -> bool {
        self.status == PostStatus::Published
    }

    /// Replace caption and media; published posts are immutable
    pub fn update_content(&mut self, caption: String, media_urls: Vec<String>) -> Result<()> {
        if self.is_published() {
            return Err(CrosspostError::InvalidInput(
                "Published posts cannot be edited".to_string(),
            ));
        }
        self.caption = caption;
        self.media_urls = media_urls;
        Ok(())
    }

    /// Schedule the post for a future instant
    pub fn schedule(&mut self, at: DateTime<Utc>, now: DateTime<Utc>) -> Result<()> {
        if self.is_published() {
            return Err(CrosspostError::InvalidInput(
                "Published posts cannot be rescheduled".to_string(),
            ));
        }
        crate::scheduling::validate_future(at, now)?;
        self.scheduled_at = Some(at);
        self.status = PostStatus::Scheduled;
        Ok(())
    }

    /// Store the results of a full publish, replacing any previous ones
    pub fn apply_publish(&mut self, results: Vec<PublishResult>, now: DateTime<Utc>) {
        self.results = results;
        self.refresh_status(now);
    }

    /// Merge the results of a retry
    ///
    /// Entries for the retried base platforms are replaced, everything else
    /// is kept as-is and in place. When a retry only named some sub-targets
    /// of a platform, successful entries for its other sub-targets are kept
    /// so they can still be unpublished.
    pub fn merge_retry(&mut self, results: Vec<PublishResult>, now: DateTime<Utc>) {
        let retried: HashSet<String> = results.iter().map(|r| r.platform.clone()).collect();
        let whole_platform: HashSet<String> = results
            .iter()
            .filter(|r| r.sub_target.is_none())
            .map(|r| r.platform.clone())
            .collect();
        let covered: HashSet<(String, String)> = results
            .iter()
            .filter_map(|r| r.sub_target.clone().map(|sub| (r.platform.clone(), sub)))
            .collect();
        let untouched = |existing: &PublishResult| match &existing.sub_target {
            Some(sub) if existing.success => {
                !whole_platform.contains(&existing.platform)
                    && !covered.contains(&(existing.platform.clone(), sub.clone()))
            }
            _ => false,
        };

        let mut merged = Vec::with_capacity(self.results.len() + results.len());
        let mut inserted: HashSet<String> = HashSet::new();

        for existing in self.results.drain(..) {
            if !retried.contains(&existing.platform) || untouched(&existing) {
                merged.push(existing);
                continue;
            }
            // first stale entry for a retried platform marks where its new results go
            if inserted.insert(existing.platform.clone()) {
                merged.extend(
                    results
                        .iter()
                        .filter(|r| r.platform == existing.platform)
                        .cloned(),
                );
            }
        }

        merged.extend(
            results
                .into_iter()
                .filter(|r| !inserted.contains(&r.platform)),
        );

        self.results = merged;
        self.refresh_status(now);
    }

    /// Identifiers to retry: `Base:sub` for a failed sub-target, else the base
    pub fn failed_targets(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.results
            .iter()
            .filter(|r| !r.success)
            .map(|r| match &r.sub_target {
                Some(sub) => format!("{}{}{}", r.platform, crate::targets::SUB_TARGET_SEPARATOR, sub),
                None => r.platform.clone(),
            })
            .filter(|target| seen.insert(target.clone()))
            .collect()
    }

    fn refresh_status(&mut self, now: DateTime<Utc>) {
        if self.results.iter().any(|r| r.success) {
            if self.status != PostStatus::Published {
                self.published_at = Some(now);
            }
            self.status = PostStatus::Published;
        } else if self.status != PostStatus::Published {
            self.status = PostStatus::Draft;
        }
    }

    /// Base platform names whose latest result failed
    pub fn failed_platforms(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.results
            .iter()
            .filter(|r| !r.success)
            .filter(|r| seen.insert(r.platform.clone()))
            .map(|r| r.platform.clone())
            .collect()
    }
}
