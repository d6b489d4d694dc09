//! YouTube polling through the scheduler, with the daily quota gate.

mod common;

use chrono::Utc;
use mockito::Matcher;

use common::TestHarness;
use feedwatch::config::SchedulerConfig;
use feedwatch::datetime::quota_day;
use feedwatch::scrape::VideoSource;
use feedwatch::youtube::{ChannelRepository, QuotaRepository, VideoRepository};
use feedwatch::{ChannelCheckOutcome, ChannelChecker, ScrapeQueue, Scheduler};

const CHANNEL: &str = "UCbbbbbbbbbbbbbbbbbbbbbb";

const ATOM: &str = r#"<?xml version="1.0"?>
    <feed xmlns="http://www.w3.org/2005/Atom">
      <title>Workshop</title>
      <entry>
        <id>yt:video:abcdefghijk</id>
        <title>Building a bench</title>
        <link rel="alternate" href="https://www.youtube.com/watch?v=abcdefghijk"/>
        <updated>2024-05-01T12:00:00+00:00</updated>
      </entry>
    </feed>"#;

const PLAYLIST: &str = r#"{"items": [
    {"snippet": {"title": "Fresh upload", "description": "",
                 "publishedAt": "2024-05-02T08:00:00Z",
                 "resourceId": {"videoId": "zyxwvutsrqp"}}}
]}"#;

fn today() -> String {
    quota_day(&Utc::now(), "America/Los_Angeles")
}

fn scheduler(harness: &TestHarness, checker: ChannelChecker) -> Scheduler {
    let queue = ScrapeQueue::spawn(harness.orchestrator.clone());
    Scheduler::new(
        harness.orchestrator.clone(),
        queue,
        SchedulerConfig::default(),
    )
    .with_youtube(checker, 0.9)
}

#[tokio::test]
async fn test_cycle_skipped_when_quota_nearly_spent() {
    let mut server = mockito::Server::new_async().await;
    let playlist = server
        .mock("GET", "/playlistItems")
        .match_query(Matcher::Any)
        .expect(0)
        .create_async()
        .await;
    let feed = server
        .mock("GET", "/feeds/videos.xml")
        .match_query(Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    let harness = TestHarness::new().await;
    let client = harness.youtube_client(&server.url(), Some("test-key"));
    let checker = ChannelChecker::new(harness.db.clone(), client, harness.notifier.clone());
    let channels = ChannelRepository::new(harness.db.pool());
    let channel = channels.get_or_create(CHANNEL, None, None).await.unwrap();
    channels.subscribe(1, channel.id, true).await.unwrap();

    QuotaRepository::new(harness.db.pool())
        .record("youtube", &today(), "search", 9500)
        .await
        .unwrap();

    let scheduler = scheduler(&harness, checker.clone());
    assert_eq!(scheduler.run_youtube_cycle().await.unwrap(), 0);

    playlist.assert_async().await;
    feed.assert_async().await;
    assert_eq!(checker.get_channels_to_check(10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_cycle_reads_feed_without_api_key() {
    let mut server = mockito::Server::new_async().await;
    let _feed = server
        .mock("GET", "/feeds/videos.xml")
        .match_query(Matcher::UrlEncoded("channel_id".into(), CHANNEL.into()))
        .with_status(200)
        .with_body(ATOM)
        .create_async()
        .await;

    let harness = TestHarness::new().await;
    let client = harness.youtube_client(&server.url(), None);
    let checker = ChannelChecker::new(harness.db.clone(), client, harness.notifier.clone());
    let channel = checker.subscribe(7, CHANNEL, true).await.unwrap();

    let scheduler = scheduler(&harness, checker.clone());
    assert_eq!(scheduler.run_youtube_cycle().await.unwrap(), 1);

    let received = harness.sink.wait_for(1).await;
    assert_eq!(received[0].0, 7);
    assert_eq!(received[0].1.body, "Building a bench");
    assert_eq!(received[0].1.data["video_id"], "abcdefghijk");

    let videos = VideoRepository::new(harness.db.pool());
    assert_eq!(videos.count_by_channel(channel.id).await.unwrap(), 1);

    // Checked just now, so not due again.
    assert!(checker.get_channels_to_check(10).await.unwrap().is_empty());

    // No API calls were charged.
    let usage = checker.get_quota_usage().await.unwrap();
    assert_eq!(usage.used, 0);
}

#[tokio::test]
async fn test_api_upload_listing_is_charged() {
    let mut server = mockito::Server::new_async().await;
    let _playlist = server
        .mock("GET", "/playlistItems")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("playlistId".into(), "UUbbbbbbbbbbbbbbbbbbbbbb".into()),
            Matcher::UrlEncoded("key".into(), "test-key".into()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(PLAYLIST)
        .create_async()
        .await;

    let harness = TestHarness::new().await;
    let client = harness.youtube_client(&server.url(), Some("test-key"));
    let checker = ChannelChecker::new(harness.db.clone(), client, harness.notifier.clone());
    let channel = ChannelRepository::new(harness.db.pool())
        .get_or_create(CHANNEL, Some("Workshop"), None)
        .await
        .unwrap();

    let outcome = checker.check_channel(channel.id).await.unwrap();
    assert_eq!(
        outcome,
        ChannelCheckOutcome::Checked {
            new_videos: 1,
            source: VideoSource::Api
        }
    );

    let used = QuotaRepository::new(harness.db.pool())
        .used_on("youtube", &today())
        .await
        .unwrap();
    assert_eq!(used, 1);
}

#[tokio::test]
async fn test_api_failure_falls_back_to_feed() {
    let mut server = mockito::Server::new_async().await;
    let _playlist = server
        .mock("GET", "/playlistItems")
        .match_query(Matcher::Any)
        .with_status(403)
        .with_body(r#"{"error": {"code": 403, "message": "quotaExceeded"}}"#)
        .create_async()
        .await;
    let _feed = server
        .mock("GET", "/feeds/videos.xml")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(ATOM)
        .create_async()
        .await;

    let harness = TestHarness::new().await;
    let client = harness.youtube_client(&server.url(), Some("test-key"));
    let checker = ChannelChecker::new(harness.db.clone(), client, harness.notifier.clone());
    let channel = ChannelRepository::new(harness.db.pool())
        .get_or_create(CHANNEL, None, None)
        .await
        .unwrap();

    let outcome = checker.check_channel(channel.id).await.unwrap();
    assert_eq!(
        outcome,
        ChannelCheckOutcome::Checked {
            new_videos: 1,
            source: VideoSource::Feed
        }
    );

    // The failed call still consumed its unit.
    assert_eq!(checker.get_quota_usage().await.unwrap().used, 1);
}

#[tokio::test]
async fn test_subscribe_by_handle_scrapes_channel_page() {
    let mut server = mockito::Server::new_async().await;
    let _page = server
        .mock("GET", "/@workshop")
        .with_status(200)
        .with_header("content-type", "text/html")
        .with_body(format!(
            r#"<html><head><meta property="og:title" content="Workshop">
               <link rel="canonical" href="https://www.youtube.com/channel/{CHANNEL}"></head></html>"#
        ))
        .create_async()
        .await;

    let harness = TestHarness::new().await;
    let client = harness.youtube_client(&server.url(), None);
    let checker = ChannelChecker::new(harness.db.clone(), client, harness.notifier.clone());

    let channel = checker.subscribe(3, "@workshop", false).await.unwrap();
    assert_eq!(channel.channel_id, CHANNEL);
    assert_eq!(channel.title.as_deref(), Some("Workshop"));
    assert_eq!(channel.handle.as_deref(), Some("@workshop"));
}
