//! Post-publish notifications
//!
//! After a publish or retry the service hands the result set to a
//! [`NotificationDispatcher`]. Delivery (push, email, ...) is up to the host;
//! [`PublishSummary`] gives every dispatcher the same classification.

use std::collections::HashSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::Result;
use crate::types::{Post, PublishResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    AllSucceeded,
    Partial,
    /// Also used for an empty result set
    AllFailed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishSummary {
    pub post_id: String,
    pub status: DeliveryStatus,
    /// Base platforms with at least one success, first-seen order
    pub succeeded: Vec<String>,
    /// Base platforms with at least one failure, first-seen order
    pub failed: Vec<String>,
}

impl PublishSummary {
    pub fn from_results(post_id: &str, results: &[PublishResult]) -> Self {
        let succeeded = unique_platforms(results.iter().filter(|r| r.success));
        let failed = unique_platforms(results.iter().filter(|r| !r.success));

        let status = match (succeeded.is_empty(), failed.is_empty()) {
            (false, true) => DeliveryStatus::AllSucceeded,
            (false, false) => DeliveryStatus::Partial,
            (true, _) => DeliveryStatus::AllFailed,
        };

        Self {
            post_id: post_id.to_string(),
            status,
            succeeded,
            failed,
        }
    }

    /// One-line text suitable for a push notification
    pub fn message(&self) -> String {
        match self.status {
            DeliveryStatus::AllSucceeded => {
                format!("Your post was published to {}", self.succeeded.join(", "))
            }
            DeliveryStatus::Partial => format!(
                "Your post was published to {} but failed on {}",
                self.succeeded.join(", "),
                self.failed.join(", ")
            ),
            DeliveryStatus::AllFailed if self.failed.is_empty() => {
                "Your post was not published anywhere".to_string()
            }
            DeliveryStatus::AllFailed => {
                format!("Your post could not be published to {}", self.failed.join(", "))
            }
        }
    }
}

fn unique_platforms<'a>(results: impl Iterator<Item = &'a PublishResult>) -> Vec<String> {
    let mut seen = HashSet::new();
    results
        .map(|r| r.platform.clone())
        .filter(|platform| seen.insert(platform.clone()))
        .collect()
}

/// Receives the outcome of every publish and retry
///
/// Called best-effort: an error is logged and never affects the results.
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn dispatch(&self, user_id: &str, post: &Post, results: &[PublishResult]) -> Result<()>;
}

/// Writes the summary to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogDispatcher;

#[async_trait]
impl NotificationDispatcher for LogDispatcher {
    async fn dispatch(&self, user_id: &str, post: &Post, results: &[PublishResult]) -> Result<()> {
        let summary = PublishSummary::from_results(&post.id, results);
        match summary.status {
            DeliveryStatus::AllSucceeded => info!("[{}] {}", user_id, summary.message()),
            _ => warn!("[{}] {}", user_id, summary.message()),
        }
        Ok(())
    }
}
