//! Feed service for feedwatch.
//!
//! Subscription-layer entry points. URL normalization happens here, so every
//! spelling of a site resolves to a single feed row.

use tracing::info;

use super::normalize::{normalize_url, site_domain};
use super::repository::{FeedRepository, SubscriptionRepository};
use super::types::{Feed, FeedStatus};
use crate::db::Database;
use crate::{FeedwatchError, Result};

/// Outcome of a subscription request.
#[derive(Debug, Clone)]
pub struct Subscribed {
    pub feed: Feed,
    /// True when the feed row was created by this call and still needs discovery.
    pub created: bool,
}

/// Service for feed subscription and administration.
pub struct FeedService<'a> {
    db: &'a Database,
}

impl<'a> FeedService<'a> {
    /// Create a new FeedService with the given database reference.
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Subscribe a user to the site at `url`.
    ///
    /// # Errors
    ///
    /// Returns `Validation` if the URL is not an absolute http(s) URL.
    pub async fn subscribe(&self, user_id: i64, url: &str, notify: bool) -> Result<Subscribed> {
        let normalized = normalize_url(url);
        let domain = site_domain(&normalized)
            .filter(|_| normalized.starts_with("http://") || normalized.starts_with("https://"))
            .ok_or_else(|| FeedwatchError::Validation(format!("invalid feed URL: {url}")))?;

        let (feed, created) = FeedRepository::new(self.db.pool())
            .get_or_create(&normalized, &domain)
            .await?;
        SubscriptionRepository::new(self.db.pool())
            .subscribe(user_id, feed.id, notify)
            .await?;

        if created {
            info!("Created feed {} for {}", feed.id, feed.url);
        }
        Ok(Subscribed { feed, created })
    }

    /// Operator reset: return an errored or blocked feed to `pending`.
    ///
    /// The resolved endpoint is cleared so the next scrape rediscovers it.
    pub async fn reset_feed(&self, feed_id: i64) -> Result<Feed> {
        let repo = FeedRepository::new(self.db.pool());
        let feed = repo.require(feed_id).await?;

        if !matches!(feed.status, FeedStatus::Error | FeedStatus::Blocked) {
            return Err(FeedwatchError::Validation(format!(
                "feed {} is {}, only error or blocked feeds can be reset",
                feed_id, feed.status
            )));
        }

        repo.reset_to_pending(feed_id).await?;
        info!("Feed {} reset to pending (was {})", feed_id, feed.status);
        repo.require(feed_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribe_normalizes_to_one_feed() {
        let db = Database::open_in_memory().await.unwrap();
        let service = FeedService::new(&db);

        let first = service
            .subscribe(1, "http://Example.com/News/", true)
            .await
            .unwrap();
        assert!(first.created);
        assert_eq!(first.feed.url, "http://example.com/News");
        assert_eq!(first.feed.site_domain, "example.com");
        assert_eq!(first.feed.status, FeedStatus::Pending);

        let second = service
            .subscribe(2, "http://example.com/News", true)
            .await
            .unwrap();
        assert!(!second.created);
        assert_eq!(first.feed.id, second.feed.id);
    }

    #[tokio::test]
    async fn test_subscribe_path_case_is_distinct() {
        let db = Database::open_in_memory().await.unwrap();
        let service = FeedService::new(&db);

        let upper = service
            .subscribe(1, "http://Example.com/News", true)
            .await
            .unwrap();
        let lower = service
            .subscribe(1, "http://example.com/news/", true)
            .await
            .unwrap();
        assert_ne!(upper.feed.id, lower.feed.id);
    }

    #[tokio::test]
    async fn test_subscribe_rejects_non_http() {
        let db = Database::open_in_memory().await.unwrap();
        let service = FeedService::new(&db);

        assert!(matches!(
            service.subscribe(1, "not a url", true).await,
            Err(FeedwatchError::Validation(_))
        ));
        assert!(matches!(
            service.subscribe(1, "ftp://example.com/feed", true).await,
            Err(FeedwatchError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_reset_feed() {
        let db = Database::open_in_memory().await.unwrap();
        let service = FeedService::new(&db);
        let feed = service
            .subscribe(1, "https://example.com", true)
            .await
            .unwrap()
            .feed;

        // Pending feeds are not resettable.
        assert!(service.reset_feed(feed.id).await.is_err());

        let repo = FeedRepository::new(db.pool());
        repo.set_rss_url(feed.id, "https://example.com/feed")
            .await
            .unwrap();
        repo.mark_blocked(feed.id, "Blocked by robots.txt").await.unwrap();

        let reset = service.reset_feed(feed.id).await.unwrap();
        assert_eq!(reset.status, FeedStatus::Pending);
        assert!(reset.error_message.is_none());
        assert!(reset.rss_url.is_none());
    }

    #[tokio::test]
    async fn test_reset_missing_feed() {
        let db = Database::open_in_memory().await.unwrap();
        let service = FeedService::new(&db);
        assert!(matches!(
            service.reset_feed(999).await,
            Err(FeedwatchError::NotFound(_))
        ));
    }
}
