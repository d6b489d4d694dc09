//! Test helpers for pipeline integration tests.
//!
//! Provides an in-memory pipeline harness and a notification sink that
//! records deliveries.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::timeout;

use feedwatch::config::{FetchConfig, YouTubeConfig};
use feedwatch::notify::DeliveryReport;
use feedwatch::{
    Database, HttpFetcher, Notification, NotificationDispatcher, NotificationSink, Result,
    ScrapeOrchestrator, YouTubeClient,
};

/// Default timeout for waiting on background work.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Sink that keeps every notification it receives.
#[derive(Default)]
pub struct RecordingSink {
    received: Mutex<Vec<(i64, Notification)>>,
}

impl RecordingSink {
    pub fn received(&self) -> Vec<(i64, Notification)> {
        self.received.lock().unwrap().clone()
    }

    /// Wait until at least `count` notifications arrived.
    pub async fn wait_for(&self, count: usize) -> Vec<(i64, Notification)> {
        timeout(DEFAULT_TIMEOUT, async {
            loop {
                let received = self.received();
                if received.len() >= count {
                    return received;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("notifications did not arrive in time")
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn notify(&self, user_id: i64, notification: &Notification) -> Result<DeliveryReport> {
        self.received
            .lock()
            .unwrap()
            .push((user_id, notification.clone()));
        Ok(DeliveryReport { sent: 1, failed: 0 })
    }
}

/// Fetch settings able to reach a local mock server.
pub fn test_fetch_config() -> FetchConfig {
    FetchConfig {
        allow_private_hosts: true,
        requests_per_second: 100,
        respect_robots_tag: false,
        ..Default::default()
    }
}

pub fn test_fetcher() -> HttpFetcher {
    HttpFetcher::new(&test_fetch_config()).expect("fetcher builds")
}

/// In-memory database, orchestrator and recording sink.
pub struct TestHarness {
    pub db: Database,
    pub sink: Arc<RecordingSink>,
    pub notifier: NotificationDispatcher,
    pub orchestrator: ScrapeOrchestrator,
}

impl TestHarness {
    pub async fn new() -> Self {
        let db = Database::open_in_memory().await.expect("in-memory database");
        let sink = Arc::new(RecordingSink::default());
        let notifier = NotificationDispatcher::spawn(sink.clone());
        let orchestrator = ScrapeOrchestrator::new(db.clone(), test_fetcher(), notifier.clone());
        Self {
            db,
            sink,
            notifier,
            orchestrator,
        }
    }

    /// A YouTube client pointed at a mock server.
    pub fn youtube_client(&self, server_url: &str, api_key: Option<&str>) -> YouTubeClient {
        YouTubeClient::new(
            test_fetcher(),
            self.db.clone(),
            YouTubeConfig {
                api_key: api_key.map(str::to_string),
                api_base_url: server_url.to_string(),
                web_base_url: server_url.to_string(),
                ..Default::default()
            },
        )
    }
}

/// RSS 2.0 document with `(title, link)` items.
pub fn rss(title: &str, items: &[(&str, &str)]) -> String {
    let mut xml = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><rss version="2.0"><channel><title>{title}</title>"#
    );
    for (item_title, link) in items {
        xml.push_str(&format!(
            "<item><title>{item_title}</title><link>{link}</link><description>About {item_title}</description></item>"
        ));
    }
    xml.push_str("</channel></rss>");
    xml
}
