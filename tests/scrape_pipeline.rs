//! End-to-end scrape pipeline tests against a mock site.

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use common::{rss, TestHarness};
use feedwatch::feed::{FeedItemRepository, FeedRepository, ScrapeMethod, SubscriptionRepository};
use feedwatch::fetch::ROBOTS_BLOCKED_MESSAGE;
use feedwatch::{
    FeedService, FeedStatus, FeedwatchError, JobLogRepository, JobStatus, JobType, LockBackend,
    LockCoordinator, Result, ScrapeOutcome,
};

async fn robots_allow_all(server: &mut mockito::ServerGuard) -> mockito::Mock {
    server
        .mock("GET", "/robots.txt")
        .with_status(404)
        .create_async()
        .await
}

async fn subscribe(harness: &TestHarness, user_id: i64, url: &str) -> i64 {
    FeedService::new(&harness.db)
        .subscribe(user_id, url, true)
        .await
        .unwrap()
        .feed
        .id
}

#[tokio::test]
async fn test_scraping_twice_inserts_once() {
    let mut server = mockito::Server::new_async().await;
    let _robots = robots_allow_all(&mut server).await;
    let body = rss(
        "Example",
        &[
            ("Alpha", "https://example.com/alpha"),
            ("Beta", "https://example.com/beta"),
        ],
    );
    let _feed = server
        .mock("GET", "/feed")
        .with_status(200)
        .with_body(&body)
        .expect(2)
        .create_async()
        .await;

    let harness = TestHarness::new().await;
    let feed_id = subscribe(&harness, 1, &server.url()).await;
    FeedRepository::new(harness.db.pool())
        .set_rss_url(feed_id, &format!("{}/feed", server.url()))
        .await
        .unwrap();

    let first = harness.orchestrator.scrape_feed(feed_id).await.unwrap();
    assert_eq!(
        first,
        ScrapeOutcome::Completed {
            new_items: 2,
            method: ScrapeMethod::Rss
        }
    );
    let second = harness.orchestrator.scrape_feed(feed_id).await.unwrap();
    assert_eq!(
        second,
        ScrapeOutcome::Completed {
            new_items: 0,
            method: ScrapeMethod::Rss
        }
    );

    let items = FeedItemRepository::new(harness.db.pool());
    assert_eq!(items.count_by_feed(feed_id).await.unwrap(), 2);

    // Only the first scrape produced notifications.
    let received = harness.sink.wait_for(2).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(harness.sink.received().len(), 2);
    assert!(received.iter().all(|(user, _)| *user == 1));
    let bodies: Vec<&str> = received.iter().map(|(_, n)| n.body.as_str()).collect();
    assert!(bodies.contains(&"Alpha"));
    assert!(bodies.contains(&"Beta"));
}

#[tokio::test]
async fn test_changed_title_updates_existing_item() {
    let mut server = mockito::Server::new_async().await;
    let _robots = robots_allow_all(&mut server).await;
    let original = server
        .mock("GET", "/feed")
        .with_status(200)
        .with_body(rss("Example", &[("Old headline", "https://example.com/story")]))
        .create_async()
        .await;

    let harness = TestHarness::new().await;
    let feed_id = subscribe(&harness, 1, &server.url()).await;
    FeedRepository::new(harness.db.pool())
        .set_rss_url(feed_id, &format!("{}/feed", server.url()))
        .await
        .unwrap();
    harness.orchestrator.scrape_feed(feed_id).await.unwrap();

    original.remove_async().await;
    let _updated = server
        .mock("GET", "/feed")
        .with_status(200)
        .with_body(rss("Example", &[("New headline", "https://example.com/story")]))
        .create_async()
        .await;

    let outcome = harness.orchestrator.scrape_feed(feed_id).await.unwrap();
    assert_eq!(
        outcome,
        ScrapeOutcome::Completed {
            new_items: 0,
            method: ScrapeMethod::Rss
        }
    );

    let repo = FeedItemRepository::new(harness.db.pool());
    assert_eq!(repo.count_by_feed(feed_id).await.unwrap(), 1);
    let items = repo.list_by_feed(feed_id, 10).await.unwrap();
    assert_eq!(items[0].title, "New headline");
    assert_eq!(
        items[0].content_hash,
        feedwatch::fingerprint("https://example.com/story", "New headline")
    );
}

#[tokio::test]
async fn test_discovery_falls_back_to_conventional_path() {
    let mut server = mockito::Server::new_async().await;
    let _robots = robots_allow_all(&mut server).await;
    let _home = server
        .mock("GET", "/")
        .with_status(200)
        .with_header("content-type", "text/html; charset=utf-8")
        .with_body("<html><head><title>Plain site</title></head><body>Hello</body></html>")
        .create_async()
        .await;
    let _feed = server
        .mock("GET", "/feed")
        .with_status(200)
        .with_header("content-type", "application/rss+xml")
        .with_body(rss("Plain", &[("Only post", "https://example.com/only")]))
        .create_async()
        .await;

    let harness = TestHarness::new().await;
    let feed_id = subscribe(&harness, 1, &server.url()).await;

    let outcome = harness.orchestrator.scrape_feed(feed_id).await.unwrap();
    assert_eq!(
        outcome,
        ScrapeOutcome::Completed {
            new_items: 1,
            method: ScrapeMethod::Rss
        }
    );

    let feed = FeedRepository::new(harness.db.pool())
        .require(feed_id)
        .await
        .unwrap();
    assert_eq!(feed.rss_url, Some(format!("{}/feed", server.url())));
    assert_eq!(feed.status, FeedStatus::Active);

    let jobs = JobLogRepository::new(harness.db.pool())
        .list_by_target(JobType::DiscoverFeed, feed_id)
        .await
        .unwrap();
    assert_eq!(jobs[0].status, JobStatus::Completed);
}

#[tokio::test]
async fn test_robots_disallow_blocks_feed() {
    let mut server = mockito::Server::new_async().await;
    let _robots = server
        .mock("GET", "/robots.txt")
        .with_status(200)
        .with_body("User-agent: *\nDisallow: /\n")
        .create_async()
        .await;
    let home = server.mock("GET", "/").expect(0).create_async().await;

    let harness = TestHarness::new().await;
    let feed_id = subscribe(&harness, 1, &server.url()).await;

    let outcome = harness.orchestrator.scrape_feed(feed_id).await.unwrap();
    assert_eq!(
        outcome,
        ScrapeOutcome::Blocked(ROBOTS_BLOCKED_MESSAGE.to_string())
    );
    home.assert_async().await;

    let feeds = FeedRepository::new(harness.db.pool());
    let feed = feeds.require(feed_id).await.unwrap();
    assert_eq!(feed.status, FeedStatus::Blocked);
    assert_eq!(feed.error_message.as_deref(), Some(ROBOTS_BLOCKED_MESSAGE));

    let jobs = JobLogRepository::new(harness.db.pool())
        .list_by_target(JobType::DiscoverFeed, feed_id)
        .await
        .unwrap();
    assert_eq!(jobs[0].status, JobStatus::Failed);
    assert_eq!(jobs[0].last_error.as_deref(), Some(ROBOTS_BLOCKED_MESSAGE));

    // Blocked feeds are not due for routine scraping.
    assert!(harness
        .orchestrator
        .get_feeds_to_scrape(10)
        .await
        .unwrap()
        .is_empty());

    // Only an operator reset brings it back.
    let reset = FeedService::new(&harness.db).reset_feed(feed_id).await.unwrap();
    assert_eq!(reset.status, FeedStatus::Pending);
    assert!(reset.error_message.is_none());
}

#[tokio::test]
async fn test_html_fallback_with_backfill_and_notifications() {
    let mut server = mockito::Server::new_async().await;
    let _robots = robots_allow_all(&mut server).await;

    let mut listing = String::from("<html><head><title>Newsroom</title></head><body>");
    for i in 1..=3 {
        listing.push_str(&format!(
            r#"<article><h2><a href="/posts/{i}">Story {i}</a></h2></article>"#
        ));
    }
    listing.push_str("</body></html>");
    let _home = server
        .mock("GET", "/")
        .with_status(200)
        .with_header("content-type", "text/html")
        .with_body(listing)
        .create_async()
        .await;

    let mut pages = Vec::new();
    for i in 1..=2 {
        pages.push(
            server
                .mock("GET", format!("/posts/{i}").as_str())
                .with_status(200)
                .with_header("content-type", "text/html")
                .with_body(format!(
                    r#"<html><head><meta name="description" content="Summary of story {i}"></head></html>"#
                ))
                .create_async()
                .await,
        );
    }
    // Story 3's page is missing; the item is kept without an excerpt.

    let harness = TestHarness::new().await;
    let feed_id = subscribe(&harness, 1, &server.url()).await;
    SubscriptionRepository::new(harness.db.pool())
        .subscribe(2, feed_id, false)
        .await
        .unwrap();

    let outcome = harness.orchestrator.scrape_feed(feed_id).await.unwrap();
    assert_eq!(
        outcome,
        ScrapeOutcome::Completed {
            new_items: 3,
            method: ScrapeMethod::HtmlScraping
        }
    );

    let feed = FeedRepository::new(harness.db.pool())
        .require(feed_id)
        .await
        .unwrap();
    assert!(feed.rss_url.is_none());
    assert_eq!(feed.title.as_deref(), Some("Newsroom"));

    let items = FeedItemRepository::new(harness.db.pool())
        .list_by_feed(feed_id, 10)
        .await
        .unwrap();
    assert_eq!(items.len(), 3);
    let story = |n: usize| {
        items
            .iter()
            .find(|i| i.url == format!("{}/posts/{n}", server.url()))
            .unwrap()
    };
    assert_eq!(story(1).excerpt.as_deref(), Some("Summary of story 1"));
    assert_eq!(story(2).excerpt.as_deref(), Some("Summary of story 2"));
    assert!(story(3).excerpt.is_none());

    // User 2 opted out of notifications.
    let received = harness.sink.wait_for(3).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(harness.sink.received().len(), 3);
    assert!(received.iter().all(|(user, _)| *user == 1));

    let jobs = JobLogRepository::new(harness.db.pool())
        .list_by_target(JobType::DiscoverFeed, feed_id)
        .await
        .unwrap();
    let result = jobs[0].result.as_ref().unwrap();
    assert_eq!(result["method"], "html_scraping");
    assert_eq!(result["new_items"], 3);
}

#[tokio::test]
async fn test_broken_feed_falls_back_to_html() {
    let mut server = mockito::Server::new_async().await;
    let _robots = robots_allow_all(&mut server).await;
    let _feed = server
        .mock("GET", "/feed")
        .with_status(200)
        .with_body("<rss><channel><item><title>unterminated")
        .create_async()
        .await;
    let mut listing = String::from("<html><body>");
    for i in 1..=3 {
        listing.push_str(&format!(
            r#"<div class="post"><h3><a href="/p/{i}">Post {i}</a></h3>
               <p>A summary that is long enough to keep for post {i}.</p></div>"#
        ));
    }
    listing.push_str("</body></html>");
    let _home = server
        .mock("GET", "/")
        .with_status(200)
        .with_body(listing)
        .create_async()
        .await;

    let harness = TestHarness::new().await;
    let feed_id = subscribe(&harness, 1, &server.url()).await;
    FeedRepository::new(harness.db.pool())
        .set_rss_url(feed_id, &format!("{}/feed", server.url()))
        .await
        .unwrap();

    let outcome = harness.orchestrator.scrape_feed(feed_id).await.unwrap();
    assert_eq!(
        outcome,
        ScrapeOutcome::Completed {
            new_items: 3,
            method: ScrapeMethod::HtmlScraping
        }
    );
}

struct UnavailableBackend;

#[async_trait]
impl LockBackend for UnavailableBackend {
    async fn acquire(&self, _key: &str, _ttl: Duration) -> Result<bool> {
        Err(FeedwatchError::Database("lock service unreachable".to_string()))
    }

    async fn release(&self, _key: &str) -> Result<()> {
        Err(FeedwatchError::Database("lock service unreachable".to_string()))
    }
}

#[tokio::test]
async fn test_unavailable_lock_backend_fails_open() {
    let mut server = mockito::Server::new_async().await;
    let _robots = robots_allow_all(&mut server).await;
    let _feed = server
        .mock("GET", "/feed")
        .with_status(200)
        .with_body(rss("Example", &[("Alpha", "https://example.com/alpha")]))
        .create_async()
        .await;

    let harness = TestHarness::new().await;
    let orchestrator = harness
        .orchestrator
        .clone()
        .with_locks(LockCoordinator::new(Arc::new(UnavailableBackend)));
    let feed_id = subscribe(&harness, 1, &server.url()).await;
    FeedRepository::new(harness.db.pool())
        .set_rss_url(feed_id, &format!("{}/feed", server.url()))
        .await
        .unwrap();

    let outcome = orchestrator.scrape_feed(feed_id).await.unwrap();
    assert_eq!(
        outcome,
        ScrapeOutcome::Completed {
            new_items: 1,
            method: ScrapeMethod::Rss
        }
    );
}

#[tokio::test]
async fn test_subscription_spellings_share_one_feed() {
    let harness = TestHarness::new().await;
    let a = subscribe(&harness, 1, "http://Example.com/News/").await;
    let b = subscribe(&harness, 2, "http://example.com/News").await;
    assert_eq!(a, b);

    let feed = FeedRepository::new(harness.db.pool())
        .require(a)
        .await
        .unwrap();
    assert_eq!(feed.url, "http://example.com/News");
    assert_eq!(feed.status, FeedStatus::Pending);
}
