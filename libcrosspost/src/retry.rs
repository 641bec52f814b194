//! Scoped retries
//!
//! A retry republishes a post to a caller-chosen subset of its targets. A
//! bare platform name expands to the sub-targets the post originally named
//! for it, so retrying `"Facebook"` hits the same pages as the first run.
//! The caller merges the returned results with [`Post::merge_retry`].

use tracing::debug;

use crate::orchestrator::PublishOrchestrator;
use crate::targets::expand_with_stored;
use crate::types::{Post, PublishResult};

#[derive(Clone)]
pub struct RetryCoordinator {
    orchestrator: PublishOrchestrator,
}

impl RetryCoordinator {
    pub fn new(orchestrator: PublishOrchestrator) -> Self {
        Self { orchestrator }
    }

    /// Republish `post` to `targets` only
    pub async fn retry<S: AsRef<str>>(
        &self,
        user_id: &str,
        post: &Post,
        targets: &[S],
    ) -> Vec<PublishResult> {
        let expanded = expand_with_stored(targets, &post.targets);
        if expanded.is_empty() {
            debug!("Nothing to retry for post {}", post.id);
            return Vec::new();
        }
        debug!("Retrying post {} on {}", post.id, expanded.join(", "));
        self.orchestrator.dispatch(user_id, post, &expanded, true).await
    }

    /// Republish to every target whose latest result failed
    ///
    /// A failed page is retried on its own; pages that succeeded are left alone.
    pub async fn retry_failed(&self, user_id: &str, post: &Post) -> Vec<PublishResult> {
        self.retry(user_id, post, &post.failed_targets()).await
    }
}
