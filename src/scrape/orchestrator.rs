//! Scrape orchestration for a single feed.
//!
//! One attempt runs under the feed's lock:
//!
//! 1. Without a known feed endpoint: politeness check, render the site,
//!    discover the endpoint.
//! 2. With an endpoint: parse the feed. Fetch or parse failures and empty
//!    feeds fall through to step 3.
//! 3. Heuristic article extraction from the site page, with a best-effort
//!    excerpt backfill per article.
//! 4. Dedup and store each candidate, notify subscribers of new items.
//!
//! Feed status and the job log are updated from the outcome.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::{debug, info, warn};

use crate::db::Database;
use crate::discovery::{extract_articles, FeedDiscoverer};
use crate::feed::{
    fingerprint, normalize_url, Feed, FeedItem, FeedItemRepository, FeedRepository, NewFeedItem,
    ParsedItem, ScrapeMethod, SubscriptionRepository,
};
use crate::fetch::{HttpFetcher, HttpPageRenderer, PageRenderer, PolitenessDecision, PolitenessGate, RenderedPage};
use crate::jobs::{JobLogRepository, JobType};
use crate::lock::{feed_lock_key, LockCoordinator};
use crate::notify::{Notification, NotificationDispatcher};
use crate::{FeedwatchError, Result};

/// Default per-feed lock TTL.
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(300);

/// Default staleness after which an active feed is scraped again.
pub const DEFAULT_FEED_STALENESS_SECS: i64 = 600;

/// Result of one scrape attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScrapeOutcome {
    /// Another worker holds the feed's lock.
    Skipped,
    Completed {
        new_items: usize,
        method: ScrapeMethod,
    },
    /// Refused by the politeness gate; the feed is now blocked.
    Blocked(String),
    /// The attempt failed; the feed is now in error.
    Failed(String),
}

/// Successful end of the scraping steps, before bookkeeping.
enum Attempt {
    Blocked(String),
    Scraped {
        new_items: usize,
        method: ScrapeMethod,
    },
}

/// Drives discovery, scraping and dedup for feeds.
#[derive(Clone)]
pub struct ScrapeOrchestrator {
    db: Database,
    fetcher: HttpFetcher,
    gate: Arc<PolitenessGate>,
    renderer: Arc<dyn PageRenderer>,
    discoverer: Arc<FeedDiscoverer>,
    locks: LockCoordinator,
    notifier: NotificationDispatcher,
    lock_ttl: Duration,
    feed_staleness_secs: i64,
}

impl ScrapeOrchestrator {
    /// Create an orchestrator with a static-HTML renderer and no lock
    /// coordination.
    pub fn new(db: Database, fetcher: HttpFetcher, notifier: NotificationDispatcher) -> Self {
        Self {
            gate: Arc::new(PolitenessGate::new(fetcher.clone())),
            renderer: Arc::new(HttpPageRenderer::new(fetcher.clone())),
            discoverer: Arc::new(FeedDiscoverer::new(fetcher.clone(), HashMap::new())),
            db,
            fetcher,
            locks: LockCoordinator::disabled(),
            notifier,
            lock_ttl: DEFAULT_LOCK_TTL,
            feed_staleness_secs: DEFAULT_FEED_STALENESS_SECS,
        }
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn PageRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn with_locks(mut self, locks: LockCoordinator) -> Self {
        self.locks = locks;
        self
    }

    /// Extra feed paths to probe, keyed by hostname.
    pub fn with_site_overrides(mut self, overrides: HashMap<String, Vec<String>>) -> Self {
        self.discoverer = Arc::new(FeedDiscoverer::new(self.fetcher.clone(), overrides));
        self
    }

    pub fn with_lock_ttl(mut self, ttl: Duration) -> Self {
        self.lock_ttl = ttl;
        self
    }

    pub fn with_feed_staleness(mut self, secs: i64) -> Self {
        self.feed_staleness_secs = secs;
        self
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Active or pending feeds due for a scrape, least recently scraped first.
    pub async fn get_feeds_to_scrape(&self, limit: i64) -> Result<Vec<Feed>> {
        FeedRepository::new(self.db.pool())
            .list_to_scrape(self.feed_staleness_secs, limit)
            .await
    }

    /// Scrape a feed now, under a fresh job log.
    pub async fn scrape_feed(&self, feed_id: i64) -> Result<ScrapeOutcome> {
        let feed = FeedRepository::new(self.db.pool()).require(feed_id).await?;
        let job_type = if feed.rss_url.is_some() {
            JobType::ScrapeFeed
        } else {
            JobType::DiscoverFeed
        };
        let job = JobLogRepository::new(self.db.pool())
            .create(job_type, feed_id)
            .await?;
        self.run_job(job.id, feed_id).await
    }

    /// Run a pending job against its feed.
    pub async fn run_job(&self, job_id: i64, feed_id: i64) -> Result<ScrapeOutcome> {
        let key = feed_lock_key(feed_id);
        if !self.locks.acquire(&key, self.lock_ttl).await {
            info!("Feed {} is being scraped elsewhere, skipping", feed_id);
            if let Err(e) = JobLogRepository::new(self.db.pool()).cancel(job_id).await {
                warn!("Failed to cancel job {}: {}", job_id, e);
            }
            return Ok(ScrapeOutcome::Skipped);
        }

        let outcome = self.run_locked(job_id, feed_id).await;
        self.locks.release(&key).await;
        outcome
    }

    async fn run_locked(&self, job_id: i64, feed_id: i64) -> Result<ScrapeOutcome> {
        let jobs = JobLogRepository::new(self.db.pool());
        let feeds = FeedRepository::new(self.db.pool());
        jobs.mark_running(job_id).await?;

        let feed = match feeds.require(feed_id).await {
            Ok(feed) => feed,
            Err(e) => {
                jobs.fail(job_id, &e.to_string()).await?;
                return Err(e);
            }
        };

        match self.scrape(&feed).await {
            Ok(Attempt::Blocked(message)) => {
                info!("Feed {} blocked: {}", feed.id, message);
                feeds.mark_blocked(feed.id, &message).await?;
                jobs.fail(job_id, &message).await?;
                Ok(ScrapeOutcome::Blocked(message))
            }
            Ok(Attempt::Scraped { new_items, method }) => {
                feeds.mark_active(feed.id).await?;
                jobs.complete(
                    job_id,
                    &json!({ "new_items": new_items, "method": method.as_str() }),
                )
                .await?;
                if new_items > 0 {
                    info!("Feed {} scraped via {}: {} new item(s)", feed.id, method, new_items);
                } else {
                    debug!("Feed {} scraped via {}: no new items", feed.id, method);
                }
                Ok(ScrapeOutcome::Completed { new_items, method })
            }
            Err(e) => {
                let message = e.to_string();
                warn!("Scrape of feed {} failed: {}", feed.id, message);
                feeds.mark_error(feed.id, &message).await?;
                jobs.fail(job_id, &message).await?;
                Ok(ScrapeOutcome::Failed(message))
            }
        }
    }

    async fn scrape(&self, feed: &Feed) -> Result<Attempt> {
        let mut gate_checked = false;
        let mut site_page: Option<RenderedPage> = None;

        let rss_url = match &feed.rss_url {
            Some(url) => Some(url.clone()),
            None => {
                if let PolitenessDecision::Blocked(message) = self.gate.check(&feed.url).await {
                    return Ok(Attempt::Blocked(message));
                }
                gate_checked = true;

                site_page = self.render(&feed.url).await;
                let discovered = self
                    .discoverer
                    .discover(&feed.url, site_page.as_ref().map(|p| p.html.as_str()))
                    .await;
                if let Some(url) = &discovered {
                    FeedRepository::new(self.db.pool())
                        .set_rss_url(feed.id, url)
                        .await?;
                }
                discovered
            }
        };

        if let Some(rss_url) = rss_url {
            self.gate.wait_turn(&rss_url).await;
            match self.fetcher.get_feed(&rss_url).await {
                Ok(Some(parsed)) if !parsed.items.is_empty() => {
                    if let Some(title) = parsed.title.as_deref().filter(|t| !t.trim().is_empty()) {
                        FeedRepository::new(self.db.pool())
                            .set_title_if_missing(feed.id, title.trim())
                            .await?;
                    }
                    let new_items = self.store_items(feed, parsed.items).await;
                    return Ok(Attempt::Scraped {
                        new_items,
                        method: ScrapeMethod::Rss,
                    });
                }
                Ok(_) => info!("Feed {} has no usable items, trying HTML", rss_url),
                Err(e) => warn!("Feed {} failed ({}), trying HTML", rss_url, e),
            }
        }

        // The endpoint may have been known from an earlier run; the site
        // itself has not been checked in this attempt yet.
        if !gate_checked {
            if let PolitenessDecision::Blocked(message) = self.gate.check(&feed.url).await {
                return Ok(Attempt::Blocked(message));
            }
        }

        let page = match site_page {
            Some(page) => page,
            None => self
                .render(&feed.url)
                .await
                .ok_or_else(|| FeedwatchError::Http(format!("could not render {}", feed.url)))?,
        };

        let articles = extract_articles(&page.html, &page.url);
        if articles.is_empty() {
            return Err(FeedwatchError::Parse(format!(
                "no feed or articles found at {}",
                feed.url
            )));
        }
        if let Some(title) = page.title.as_deref() {
            FeedRepository::new(self.db.pool())
                .set_title_if_missing(feed.id, title)
                .await?;
        }

        let mut items = Vec::with_capacity(articles.len());
        for article in articles {
            let mut item = ParsedItem::from(article);
            if item.excerpt.is_none() {
                self.backfill(&mut item).await;
            }
            items.push(item);
        }

        let new_items = self.store_items(feed, items).await;
        Ok(Attempt::Scraped {
            new_items,
            method: ScrapeMethod::HtmlScraping,
        })
    }

    /// Render a page, treating failures as "no page".
    async fn render(&self, url: &str) -> Option<RenderedPage> {
        self.gate.wait_turn(url).await;
        match self.renderer.render(url).await {
            Ok(page) => page,
            Err(e) => {
                debug!("Render of {} failed: {}", url, e);
                None
            }
        }
    }

    /// Fill missing metadata of an extracted article from its own page.
    async fn backfill(&self, item: &mut ParsedItem) {
        let Some(page) = self.render(&item.url).await else {
            debug!("No excerpt backfill for {}", item.url);
            return;
        };
        item.excerpt = page.description;
        if item.thumbnail_url.is_none() {
            item.thumbnail_url = page.thumbnail_url;
        }
        if item.author.is_none() {
            item.author = page.author;
        }
        if item.published_at.is_none() {
            item.published_at = page.published_at;
        }
        if item.canonical_url.is_none() {
            item.canonical_url = page.canonical_url;
        }
    }

    /// Store candidates and notify subscribers of the new ones.
    ///
    /// Failures are per item; the count covers newly inserted items only.
    async fn store_items(&self, feed: &Feed, items: Vec<ParsedItem>) -> usize {
        let mut new_items = Vec::new();
        for item in &items {
            match self.store_item(feed.id, item).await {
                Ok(Some(stored)) => new_items.push(stored),
                Ok(None) => {}
                Err(e) => warn!("Failed to store item {} of feed {}: {}", item.url, feed.id, e),
            }
        }

        if !new_items.is_empty() {
            self.notify_new_items(feed, &new_items).await;
        }
        new_items.len()
    }

    /// Dedup one candidate against the feed's items.
    ///
    /// Returns the item when it was inserted.
    async fn store_item(&self, feed_id: i64, item: &ParsedItem) -> Result<Option<FeedItem>> {
        let repo = FeedItemRepository::new(self.db.pool());
        let url = normalize_url(&item.url);
        let hash = fingerprint(&url, &item.title);
        let candidate = NewFeedItem::from_parsed(feed_id, url.clone(), hash.clone(), item);

        match repo.find_existing(feed_id, &url, &hash).await? {
            Some(existing) if existing.content_hash != hash => {
                debug!("Updating item {} of feed {}", existing.id, feed_id);
                repo.update_content(existing.id, &candidate).await?;
                Ok(None)
            }
            Some(_) => Ok(None),
            None => {
                let inserted = repo.insert(&candidate).await?;
                if inserted.is_none() {
                    debug!("Item {} of feed {} stored concurrently", url, feed_id);
                }
                Ok(inserted)
            }
        }
    }

    async fn notify_new_items(&self, feed: &Feed, items: &[FeedItem]) {
        let users = match SubscriptionRepository::new(self.db.pool())
            .list_notifiable(feed.id)
            .await
        {
            Ok(users) => users,
            Err(e) => {
                warn!("Failed to list subscribers of feed {}: {}", feed.id, e);
                return;
            }
        };
        if users.is_empty() {
            return;
        }

        for item in items {
            let notification = Notification::new(feed.display_name(), item.title.clone())
                .with_data(json!({
                    "feed_id": feed.id,
                    "item_id": item.id,
                    "url": item.url,
                }));
            self.notifier.dispatch_all(&users, &notification);
        }
    }
}
