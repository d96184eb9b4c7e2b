//! Integration tests for tweetshelf.
//!
//! These tests drive the public API end to end against a mock X API:
//! - Paged sync into storage with categorization
//! - Token refresh on an expired access token
//! - Scheduler passes, statistics and maintenance

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tweetshelf::auth::{OAuthRefresher, TokenRefresher};
use tweetshelf::config::SyncConfig;
use tweetshelf::provider::XApiProvider;
use tweetshelf::stats::{ShelfStats, SyncStats};
use tweetshelf::storage::TweetQuery;
use tweetshelf::{
    CategorizationService, ShelfError, Storage, SyncPipeline, SyncScheduler, SyncStatus,
};
use wiremock::matchers::{body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const BOOKMARKS_PATH: &str = "/2/users/1001/bookmarks";

fn first_page() -> serde_json::Value {
    json!({
        "data": [
            {
                "id": "9001",
                "text": "Breaking news: the election results were announced #news",
                "author_id": "77",
                "created_at": "2024-05-01T10:00:00.000Z",
                "public_metrics": { "like_count": 12, "retweet_count": 3, "reply_count": 1 }
            },
            {
                "id": "9002",
                "text": "A python coding session for developers #programming",
                "author_id": "78",
                "attachments": { "media_keys": ["m1"] }
            }
        ],
        "includes": {
            "users": [
                { "id": "77", "username": "wire", "name": "Wire Desk" },
                { "id": "78", "username": "ferris", "name": "Ferris" }
            ],
            "media": [{ "media_key": "m1", "url": "https://pbs.twimg.com/media/m1.jpg" }]
        },
        "meta": { "result_count": 2, "next_token": "page-2" }
    })
}

fn second_page() -> serde_json::Value {
    json!({
        "data": [
            { "id": "9003", "text": "Motivation quote: believe in your dream", "author_id": "77" }
        ],
        "includes": { "users": [{ "id": "77", "username": "wire" }] },
        "meta": { "result_count": 1 }
    })
}

async fn mount_bookmarks(server: &MockServer, token: &str) {
    Mock::given(method("GET"))
        .and(path(BOOKMARKS_PATH))
        .and(header("authorization", format!("Bearer {token}").as_str()))
        .and(query_param("pagination_token", "page-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(second_page()))
        .with_priority(1)
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(BOOKMARKS_PATH))
        .and(header("authorization", format!("Bearer {token}").as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(first_page()))
        .mount(server)
        .await;
}

struct Harness {
    _dir: TempDir,
    pipeline: Arc<SyncPipeline>,
    user_id: i64,
}

fn harness(
    server: &MockServer,
    access: &str,
    refresher: Option<Arc<dyn TokenRefresher>>,
) -> Harness {
    tweetshelf::logging::init_test_logging();
    let dir = TempDir::new().unwrap();
    let mut storage = Storage::open(dir.path().join("shelf.db")).unwrap();
    let (user, created) = storage
        .bootstrap_user("1001", "alice", Some("Alice"), Some(access), Some("refresh-1"))
        .unwrap();
    assert!(created);

    let categorizer = Arc::new(CategorizationService::keyword_only(storage.into_shared()));
    let provider = Arc::new(XApiProvider::new(server.uri(), Duration::from_secs(5)).unwrap());
    let pipeline = Arc::new(SyncPipeline::new(
        categorizer,
        provider,
        refresher,
        SyncConfig::default().without_delays(),
    ));
    Harness {
        _dir: dir,
        pipeline,
        user_id: user.id,
    }
}

#[tokio::test]
async fn sync_pages_through_bookmarks_and_categorizes() {
    let server = MockServer::start().await;
    mount_bookmarks(&server, "access-1").await;
    let h = harness(&server, "access-1", None);

    let summary = h.pipeline.sync_user(h.user_id).await.unwrap();
    assert_eq!(summary.total_tweets, 3);
    assert_eq!(summary.new_tweets, 3);

    let storage = h.pipeline.storage().lock();
    let news = storage.get_tweet_by_external_id("9001").unwrap().unwrap();
    assert_eq!(news.author_username.as_deref(), Some("wire"));
    assert_eq!(news.like_count, 12);
    assert_eq!(news.hashtags(), vec!["#news"]);
    assert_eq!(news.category.as_deref(), Some("News"));

    let tech = storage.get_tweet_by_external_id("9002").unwrap().unwrap();
    assert_eq!(tech.media_urls(), vec!["https://pbs.twimg.com/media/m1.jpg"]);
    assert_eq!(tech.category.as_deref(), Some("Technology"));

    let (tweets, total) = storage
        .list_tweets(
            h.user_id,
            &TweetQuery {
                category: Some("Technology".to_string()),
                ..TweetQuery::default()
            },
        )
        .unwrap();
    assert_eq!(total, 1);
    assert_eq!(tweets[0].tweet_id, "9002");

    let user = storage.get_user(h.user_id).unwrap().unwrap();
    assert!(user.last_sync.is_some());
    let logs = storage
        .recent_sync_logs(h.user_id, chrono::Utc::now() - chrono::Duration::days(1), 10)
        .unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].status, SyncStatus::Success);
    assert_eq!(logs[0].tweets_found, 3);
    assert_eq!(logs[0].tweets_new, 3);
}

#[tokio::test]
async fn second_sync_finds_nothing_new() {
    let server = MockServer::start().await;
    mount_bookmarks(&server, "access-1").await;
    let h = harness(&server, "access-1", None);

    h.pipeline.sync_user(h.user_id).await.unwrap();
    let again = h.pipeline.sync_user(h.user_id).await.unwrap();
    assert_eq!(again.total_tweets, 3);
    assert_eq!(again.new_tweets, 0);

    let stats = SyncStats::compute(&h.pipeline.storage().lock(), h.user_id, 30).unwrap();
    assert_eq!(stats.total_runs, 2);
    assert_eq!(stats.success_rate, 100);
    assert_eq!(stats.tweets_found, 6);
    assert_eq!(stats.tweets_new, 3);
}

#[tokio::test]
async fn expired_token_is_refreshed_and_persisted() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(BOOKMARKS_PATH))
        .and(header("authorization", "Bearer stale"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({ "title": "Unauthorized" })),
        )
        .mount(&server)
        .await;
    mount_bookmarks(&server, "fresh").await;
    Mock::given(method("POST"))
        .and(path("/2/oauth2/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=refresh-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "fresh",
            "refresh_token": "refresh-2",
            "token_type": "bearer"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let refresher = OAuthRefresher::new(
        format!("{}/2/oauth2/token", server.uri()),
        "client-1",
        None,
        Duration::from_secs(5),
    )
    .unwrap();
    let h = harness(&server, "stale", Some(Arc::new(refresher)));

    let summary = h.pipeline.sync_user(h.user_id).await.unwrap();
    assert_eq!(summary.new_tweets, 3);

    let user = h.pipeline.storage().lock().get_user(h.user_id).unwrap().unwrap();
    assert_eq!(user.access_token.as_deref(), Some("fresh"));
    assert_eq!(user.refresh_token.as_deref(), Some("refresh-2"));
}

#[tokio::test]
async fn rejected_refresh_is_an_auth_error_and_logged() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(BOOKMARKS_PATH))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/2/oauth2/token"))
        .respond_with(ResponseTemplate::new(400))
        .mount(&server)
        .await;

    let refresher = OAuthRefresher::new(
        format!("{}/2/oauth2/token", server.uri()),
        "client-1",
        Some("secret".to_string()),
        Duration::from_secs(5),
    )
    .unwrap();
    let h = harness(&server, "stale", Some(Arc::new(refresher)));

    let err = h.pipeline.sync_user(h.user_id).await.unwrap_err();
    assert!(matches!(err, ShelfError::Auth { .. }), "got {err:?}");

    let storage = h.pipeline.storage().lock();
    let logs = storage
        .recent_sync_logs(h.user_id, chrono::Utc::now() - chrono::Duration::days(1), 10)
        .unwrap();
    assert_eq!(logs[0].status, SyncStatus::Error);
    assert!(logs[0].error.is_some());
    assert_eq!(storage.count_tweets(h.user_id).unwrap(), 0);
}

#[tokio::test]
async fn permanent_provider_error_fails_without_retry() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(BOOKMARKS_PATH))
        .respond_with(
            ResponseTemplate::new(403).set_body_json(json!({ "detail": "client forbidden" })),
        )
        .expect(1)
        .mount(&server)
        .await;
    let h = harness(&server, "access-1", None);

    let err = h.pipeline.sync_user(h.user_id).await.unwrap_err();
    let provider = err.as_provider().expect("provider error");
    assert!(provider.message.contains("client forbidden"));
    assert!(!err.is_rate_limited());
}

#[tokio::test]
async fn scheduler_pass_and_shelf_stats() {
    let server = MockServer::start().await;
    mount_bookmarks(&server, "access-1").await;
    let h = harness(&server, "access-1", None);
    {
        let mut storage = h.pipeline.storage().lock();
        // Registered but logged out: not eligible.
        storage
            .bootstrap_user("2002", "bob", None, None, None)
            .unwrap();
    }

    let scheduler = SyncScheduler::new(h.pipeline.clone());
    let summary = scheduler.sync_all_users().await.unwrap();
    assert_eq!(summary.total, 1);
    assert_eq!(summary.succeeded, 1);

    let report = scheduler.maintenance().unwrap();
    assert_eq!(report.recounted_users, 2);
    assert_eq!(report.inactive_users, 1);

    let storage = h.pipeline.storage().lock();
    let stats = ShelfStats::compute(&storage, h.user_id, 7).unwrap();
    assert_eq!(stats.total_tweets, 3);
    assert_eq!(stats.tweets_this_week, 3);
    assert!(stats.last_sync.is_some());
    let counted: i64 = stats.categories.iter().map(|c| c.count).sum();
    assert!(counted >= 3);
    assert!(stats.most_popular().is_some());
}

#[tokio::test]
async fn recategorize_after_custom_keywords() {
    let server = MockServer::start().await;
    mount_bookmarks(&server, "access-1").await;
    let h = harness(&server, "access-1", None);
    h.pipeline.sync_user(h.user_id).await.unwrap();

    let categorizer = h.pipeline.categorizer();
    categorizer
        .keywords()
        .add_keywords("Inspiration", &["election", "results", "announced"]);
    let tweet_id = h
        .pipeline
        .storage()
        .lock()
        .get_tweet_by_external_id("9001")
        .unwrap()
        .unwrap()
        .id;

    let report = categorizer.recategorize_one(tweet_id, h.user_id).await.unwrap();
    assert_eq!(report.old_primary.as_deref(), Some("News"));
    assert_eq!(report.category_count, categorizer.get_categories(tweet_id).unwrap().len());
}
