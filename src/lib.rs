//! feedwatch - feed acquisition pipeline
//!
//! Discovers machine-readable feeds for websites, scrapes them (falling back
//! to heuristic article extraction when a site has none), deduplicates items
//! by normalized URL and content fingerprint, and polls YouTube channels
//! within a daily API quota.

pub mod config;
pub mod datetime;
pub mod db;
pub mod discovery;
pub mod error;
pub mod feed;
pub mod fetch;
pub mod jobs;
pub mod lock;
pub mod logging;
pub mod notify;
pub mod pipeline;
pub mod scrape;
pub mod youtube;

pub use config::Config;
pub use db::Database;
pub use error::{FeedwatchError, Result};
pub use feed::{
    fingerprint, normalize_url, CustomFeed, Feed, FeedItem, FeedKind, FeedRef, FeedService,
    FeedSource, FeedStatus,
};
pub use fetch::{HttpFetcher, PageRenderer, PolitenessGate};
pub use jobs::{JobLog, JobLogRepository, JobStatus, JobType};
pub use lock::{LockBackend, LockCoordinator};
pub use notify::{Notification, NotificationDispatcher, NotificationSink};
pub use pipeline::Pipeline;
pub use scrape::{
    ChannelCheckOutcome, ChannelChecker, ScrapeOrchestrator, ScrapeOutcome, ScrapeQueue,
    Scheduler,
};
pub use youtube::{QuotaUsage, YouTubeClient};
