//! Integration tests for scoped retries

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use libcrosspost::publishers::mock::MockPublisher;
use libcrosspost::store::MemoryConnectionStore;
use libcrosspost::types::SubAccount;
use libcrosspost::{
    PlatformConnection, PlatformName, Post, PostStatus, PublishOrchestrator, PublishOutcome,
    PublishResult, PublishScope, PublisherRegistry, RetryCoordinator, TokenManager,
};

const USER: &str = "user-1";

async fn store_with(platforms: &[PlatformName]) -> Arc<MemoryConnectionStore> {
    let store = Arc::new(MemoryConnectionStore::new());
    for platform in platforms {
        let mut connection = PlatformConnection::new(USER, *platform, "token");
        if *platform == PlatformName::Facebook {
            for id in ["PAGE_A", "PAGE_B"] {
                connection = connection.with_sub_account(SubAccount {
                    id: id.to_string(),
                    name: None,
                    access_token: Some(format!("token-{}", id)),
                });
            }
        }
        store.insert(connection).await;
    }
    store
}

fn orchestrator(store: Arc<MemoryConnectionStore>, publishers: Vec<Arc<MockPublisher>>) -> PublishOrchestrator {
    let mut registry = PublisherRegistry::new();
    for publisher in publishers {
        registry.register(publisher);
    }
    PublishOrchestrator::new(registry, TokenManager::new(store))
}

#[tokio::test]
async fn test_retry_leaves_succeeded_platform_untouched() -> Result<()> {
    let store = store_with(&[PlatformName::Twitter, PlatformName::LinkedIn]).await;
    let linkedin = MockPublisher::success(PlatformName::LinkedIn).shared();

    // first run: Twitter is down
    let first = orchestrator(
        store.clone(),
        vec![
            MockPublisher::failure(PlatformName::Twitter, "rate limited").shared(),
            linkedin.clone(),
        ],
    );
    let mut post = Post::new(USER, "Hello", vec!["Twitter".to_string(), "LinkedIn".to_string()]);
    let results = first.publish_all(USER, &post).await;
    post.apply_publish(results, Utc::now());
    let linkedin_before = post.results[1].clone();
    let published_at = post.published_at;
    assert!(linkedin_before.success);

    // second run: Twitter is back
    let twitter = MockPublisher::success(PlatformName::Twitter).shared();
    let retry = RetryCoordinator::new(orchestrator(store, vec![twitter.clone(), linkedin.clone()]));
    let retried = retry.retry(USER, &post, &["Twitter"]).await;
    post.merge_retry(retried, Utc::now());

    assert_eq!(post.results.len(), 2);
    assert_eq!(post.results[0].platform, "Twitter");
    assert!(post.results[0].success);
    assert_eq!(post.results[1], linkedin_before);
    assert_eq!(linkedin.publish_call_count(), 1);
    assert_eq!(post.status, PostStatus::Published);
    assert_eq!(post.published_at, published_at);
    Ok(())
}

#[tokio::test]
async fn test_retry_of_bare_name_reaches_every_stored_page() -> Result<()> {
    let store = store_with(&[PlatformName::Facebook, PlatformName::Reddit]).await;
    let mut post = Post::new(
        USER,
        "Hello",
        vec![
            "Facebook:PAGE_A".to_string(),
            "Facebook:PAGE_B".to_string(),
            "Reddit".to_string(),
        ],
    );
    post.apply_publish(
        vec![
            PublishResult::failure("Facebook", "page A failed"),
            PublishResult::failure("Facebook", "page B failed"),
            PublishResult::failure("Reddit", "down"),
        ],
        Utc::now(),
    );
    assert_eq!(post.status, PostStatus::Draft);

    let facebook = MockPublisher::success(PlatformName::Facebook).shared();
    let reddit = MockPublisher::success(PlatformName::Reddit).shared();
    let retry = RetryCoordinator::new(orchestrator(store, vec![facebook.clone(), reddit.clone()]));

    let retried = retry.retry(USER, &post, &["Facebook"]).await;
    assert_eq!(retried.len(), 2);
    post.merge_retry(retried, Utc::now());

    let summary: Vec<(&str, bool)> = post
        .results
        .iter()
        .map(|r| (r.platform.as_str(), r.success))
        .collect();
    assert_eq!(
        summary,
        vec![("Facebook", true), ("Facebook", true), ("Reddit", false)]
    );
    assert_eq!(reddit.publish_call_count(), 0);
    assert_eq!(post.status, PostStatus::Published);
    Ok(())
}

#[tokio::test]
async fn test_failed_retry_keeps_published_status() -> Result<()> {
    let store = store_with(&[PlatformName::Twitter, PlatformName::YouTube]).await;
    let mut post = Post::new(USER, "Hello", vec!["Twitter".to_string(), "YouTube".to_string()]);

    let first = orchestrator(
        store.clone(),
        vec![
            MockPublisher::success(PlatformName::Twitter).shared(),
            MockPublisher::failure(PlatformName::YouTube, "quota exceeded").shared(),
        ],
    );
    let results = first.publish_all(USER, &post).await;
    post.apply_publish(results, Utc::now());

    let retry = RetryCoordinator::new(orchestrator(
        store,
        vec![MockPublisher::failure(PlatformName::YouTube, "quota exceeded again").shared()],
    ));
    let retried = retry.retry_failed(USER, &post).await;
    post.merge_retry(retried, Utc::now());

    assert_eq!(post.status, PostStatus::Published);
    assert_eq!(post.results[1].error.as_deref(), Some("quota exceeded again"));
    Ok(())
}

#[tokio::test]
async fn test_retry_failed_page_keeps_published_page() -> Result<()> {
    let store = store_with(&[PlatformName::Facebook]).await;
    let mut post = Post::new(
        USER,
        "Hello",
        vec!["Facebook:PAGE_A".to_string(), "Facebook:PAGE_B".to_string()],
    );
    let page_a = PublishResult::from_outcome(
        "Facebook",
        PublishOutcome {
            external_id: "fb-a".to_string(),
            external_url: None,
            sub_target: Some("PAGE_A".to_string()),
            aux_token: Some("token-PAGE_A".to_string()),
        },
    );
    post.apply_publish(
        vec![
            page_a.clone(),
            PublishResult::failure("Facebook", "page B failed").with_sub_target("PAGE_B"),
        ],
        Utc::now(),
    );

    let facebook = MockPublisher::success(PlatformName::Facebook).shared();
    let retry = RetryCoordinator::new(orchestrator(store, vec![facebook.clone()]));
    let retried = retry.retry_failed(USER, &post).await;
    post.merge_retry(retried, Utc::now());

    assert_eq!(
        facebook.published()[0].scope,
        PublishScope::Only(vec!["PAGE_B".to_string()])
    );
    assert_eq!(post.results.len(), 2);
    assert_eq!(post.results[0], page_a);
    assert_eq!(post.results[1].sub_target.as_deref(), Some("PAGE_B"));
    assert!(post.results[1].success);
    Ok(())
}
