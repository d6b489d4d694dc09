//! Feed repositories for feedwatch.

use chrono::Utc;

use super::types::{Feed, FeedItem, FeedStatus, NewFeedItem};
use crate::datetime::{now_sql, parse_datetime, sql_seconds_ago, to_sql};
use crate::db::DbPool;
use crate::error::is_unique_violation;
use crate::{FeedwatchError, Result};

const FEED_COLUMNS: &str = "id, url, site_domain, title, rss_url, status, error_message, \
                            last_scrape_at, created_at, updated_at";

const ITEM_COLUMNS: &str = "id, feed_id, url, canonical_url, title, excerpt, thumbnail_url, \
                            author, published_at, fetched_at, content_hash";

/// Row type for feeds.
#[derive(Debug, Clone, sqlx::FromRow)]
struct FeedRow {
    id: i64,
    url: String,
    site_domain: String,
    title: Option<String>,
    rss_url: Option<String>,
    status: String,
    error_message: Option<String>,
    last_scrape_at: Option<String>,
    created_at: String,
    updated_at: String,
}

impl From<FeedRow> for Feed {
    fn from(row: FeedRow) -> Self {
        Feed {
            id: row.id,
            url: row.url,
            site_domain: row.site_domain,
            title: row.title,
            rss_url: row.rss_url,
            status: row.status.parse().unwrap_or(FeedStatus::Pending),
            error_message: row.error_message,
            last_scrape_at: row.last_scrape_at.and_then(|s| parse_datetime(&s)),
            created_at: parse_datetime(&row.created_at).unwrap_or_else(Utc::now),
            updated_at: parse_datetime(&row.updated_at).unwrap_or_else(Utc::now),
        }
    }
}

/// Row type for feed items.
#[derive(Debug, Clone, sqlx::FromRow)]
struct FeedItemRow {
    id: i64,
    feed_id: i64,
    url: String,
    canonical_url: Option<String>,
    title: String,
    excerpt: Option<String>,
    thumbnail_url: Option<String>,
    author: Option<String>,
    published_at: Option<String>,
    fetched_at: String,
    content_hash: String,
}

impl From<FeedItemRow> for FeedItem {
    fn from(row: FeedItemRow) -> Self {
        FeedItem {
            id: row.id,
            feed_id: row.feed_id,
            url: row.url,
            canonical_url: row.canonical_url,
            title: row.title,
            excerpt: row.excerpt,
            thumbnail_url: row.thumbnail_url,
            author: row.author,
            published_at: row.published_at.and_then(|s| parse_datetime(&s)),
            fetched_at: parse_datetime(&row.fetched_at).unwrap_or_else(Utc::now),
            content_hash: row.content_hash,
        }
    }
}

/// Repository for feed operations.
pub struct FeedRepository<'a> {
    pool: &'a DbPool,
}

impl<'a> FeedRepository<'a> {
    /// Create a new repository instance.
    pub fn new(pool: &'a DbPool) -> Self {
        Self { pool }
    }

    /// Create a pending feed. `url` must already be normalized.
    pub async fn create(&self, url: &str, site_domain: &str) -> Result<Feed> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO feeds (url, site_domain) VALUES ($1, $2) RETURNING id",
        )
        .bind(url)
        .bind(site_domain)
        .fetch_one(self.pool)
        .await?;

        self.require(id).await
    }

    /// Get a feed by normalized URL, creating it if absent.
    ///
    /// Returns the feed and whether it was newly created.
    pub async fn get_or_create(&self, url: &str, site_domain: &str) -> Result<(Feed, bool)> {
        let inserted = sqlx::query(
            "INSERT INTO feeds (url, site_domain) VALUES ($1, $2) ON CONFLICT(url) DO NOTHING",
        )
        .bind(url)
        .bind(site_domain)
        .execute(self.pool)
        .await?
        .rows_affected()
            > 0;

        let feed = self
            .get_by_url(url)
            .await?
            .ok_or_else(|| FeedwatchError::NotFound(format!("feed {url}")))?;
        Ok((feed, inserted))
    }

    /// Get a feed by ID.
    pub async fn get_by_id(&self, id: i64) -> Result<Option<Feed>> {
        let row = sqlx::query_as::<_, FeedRow>(&format!(
            "SELECT {FEED_COLUMNS} FROM feeds WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(self.pool)
        .await?;

        Ok(row.map(Feed::from))
    }

    /// Get a feed by ID or fail with `NotFound`.
    pub async fn require(&self, id: i64) -> Result<Feed> {
        self.get_by_id(id)
            .await?
            .ok_or_else(|| FeedwatchError::NotFound(format!("feed {id}")))
    }

    /// Get a feed by normalized URL.
    pub async fn get_by_url(&self, url: &str) -> Result<Option<Feed>> {
        let row = sqlx::query_as::<_, FeedRow>(&format!(
            "SELECT {FEED_COLUMNS} FROM feeds WHERE url = $1"
        ))
        .bind(url)
        .fetch_optional(self.pool)
        .await?;

        Ok(row.map(Feed::from))
    }

    /// Record the resolved feed endpoint and mark the feed active.
    pub async fn set_rss_url(&self, id: i64, rss_url: &str) -> Result<()> {
        sqlx::query(
            "UPDATE feeds SET rss_url = $1, status = 'active', updated_at = $2 WHERE id = $3",
        )
        .bind(rss_url)
        .bind(now_sql())
        .bind(id)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// Set the title if none is known yet.
    pub async fn set_title_if_missing(&self, id: i64, title: &str) -> Result<()> {
        sqlx::query(
            "UPDATE feeds SET title = $1, updated_at = $2 WHERE id = $3 AND title IS NULL",
        )
        .bind(title)
        .bind(now_sql())
        .bind(id)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// Successful scrape: active, error cleared, scrape time stamped.
    pub async fn mark_active(&self, id: i64) -> Result<()> {
        self.set_status(id, FeedStatus::Active, None).await
    }

    /// Failed scrape.
    pub async fn mark_error(&self, id: i64, message: &str) -> Result<()> {
        self.set_status(id, FeedStatus::Error, Some(message)).await
    }

    /// Refused by robots policy.
    pub async fn mark_blocked(&self, id: i64, message: &str) -> Result<()> {
        self.set_status(id, FeedStatus::Blocked, Some(message))
            .await
    }

    async fn set_status(&self, id: i64, status: FeedStatus, message: Option<&str>) -> Result<()> {
        let now = now_sql();
        sqlx::query(
            "UPDATE feeds SET status = $1, error_message = $2, last_scrape_at = $3, updated_at = $3
             WHERE id = $4",
        )
        .bind(status.as_str())
        .bind(message)
        .bind(&now)
        .bind(id)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// Return a feed to `pending`, clearing the error and the resolved
    /// endpoint so discovery runs again.
    pub async fn reset_to_pending(&self, id: i64) -> Result<()> {
        sqlx::query(
            "UPDATE feeds SET status = 'pending', error_message = NULL, rss_url = NULL,
                    updated_at = $1
             WHERE id = $2",
        )
        .bind(now_sql())
        .bind(id)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// Active or pending feeds never scraped or scraped more than
    /// `staleness_secs` ago, oldest first.
    pub async fn list_to_scrape(&self, staleness_secs: i64, limit: i64) -> Result<Vec<Feed>> {
        let rows = sqlx::query_as::<_, FeedRow>(&format!(
            "SELECT {FEED_COLUMNS} FROM feeds
             WHERE status IN ('active', 'pending')
               AND (last_scrape_at IS NULL OR last_scrape_at < $1)
             ORDER BY last_scrape_at IS NOT NULL, last_scrape_at ASC, id ASC
             LIMIT $2"
        ))
        .bind(sql_seconds_ago(staleness_secs))
        .bind(limit)
        .fetch_all(self.pool)
        .await?;

        Ok(rows.into_iter().map(Feed::from).collect())
    }

    /// Errored feeds whose last attempt is older than `staleness_secs`.
    ///
    /// Blocked feeds are never returned.
    pub async fn list_retryable(&self, staleness_secs: i64, limit: i64) -> Result<Vec<Feed>> {
        let rows = sqlx::query_as::<_, FeedRow>(&format!(
            "SELECT {FEED_COLUMNS} FROM feeds
             WHERE status = 'error'
               AND (last_scrape_at IS NULL OR last_scrape_at < $1)
             ORDER BY last_scrape_at ASC, id ASC
             LIMIT $2"
        ))
        .bind(sql_seconds_ago(staleness_secs))
        .bind(limit)
        .fetch_all(self.pool)
        .await?;

        Ok(rows.into_iter().map(Feed::from).collect())
    }

    /// Overwrite the last scrape time (tests and admin backfills).
    pub async fn set_last_scrape_at(&self, id: i64, at: chrono::DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE feeds SET last_scrape_at = $1 WHERE id = $2")
            .bind(to_sql(&at))
            .bind(id)
            .execute(self.pool)
            .await?;
        Ok(())
    }
}

/// Repository for feed item operations.
pub struct FeedItemRepository<'a> {
    pool: &'a DbPool,
}

impl<'a> FeedItemRepository<'a> {
    /// Create a new repository instance.
    pub fn new(pool: &'a DbPool) -> Self {
        Self { pool }
    }

    /// Find an item of the feed matching either the URL or the content hash.
    ///
    /// A URL match wins over a hash match.
    pub async fn find_existing(
        &self,
        feed_id: i64,
        url: &str,
        content_hash: &str,
    ) -> Result<Option<FeedItem>> {
        let row = sqlx::query_as::<_, FeedItemRow>(&format!(
            "SELECT {ITEM_COLUMNS} FROM feed_items
             WHERE feed_id = $1 AND (url = $2 OR content_hash = $3)
             ORDER BY url = $2 DESC
             LIMIT 1"
        ))
        .bind(feed_id)
        .bind(url)
        .bind(content_hash)
        .fetch_optional(self.pool)
        .await?;

        Ok(row.map(FeedItem::from))
    }

    /// Insert an item.
    ///
    /// Returns `None` when a unique constraint fires, meaning a concurrent
    /// scraper stored the same item first.
    pub async fn insert(&self, item: &NewFeedItem) -> Result<Option<FeedItem>> {
        let result = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO feed_items (feed_id, url, canonical_url, title, excerpt, thumbnail_url,
                                    author, published_at, fetched_at, content_hash)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING id
            "#,
        )
        .bind(item.feed_id)
        .bind(&item.url)
        .bind(&item.canonical_url)
        .bind(&item.title)
        .bind(&item.excerpt)
        .bind(&item.thumbnail_url)
        .bind(&item.author)
        .bind(item.published_at.as_ref().map(to_sql))
        .bind(now_sql())
        .bind(&item.content_hash)
        .fetch_one(self.pool)
        .await;

        match result {
            Ok(id) => self.get_by_id(id).await,
            Err(e) if is_unique_violation(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Replace the mutable content of an existing item.
    pub async fn update_content(&self, id: i64, item: &NewFeedItem) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE feed_items
            SET title = $1, excerpt = $2, thumbnail_url = $3, canonical_url = $4,
                author = COALESCE($5, author), published_at = COALESCE($6, published_at),
                content_hash = $7
            WHERE id = $8
            "#,
        )
        .bind(&item.title)
        .bind(&item.excerpt)
        .bind(&item.thumbnail_url)
        .bind(&item.canonical_url)
        .bind(&item.author)
        .bind(item.published_at.as_ref().map(to_sql))
        .bind(&item.content_hash)
        .bind(id)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// Get an item by ID.
    pub async fn get_by_id(&self, id: i64) -> Result<Option<FeedItem>> {
        let row = sqlx::query_as::<_, FeedItemRow>(&format!(
            "SELECT {ITEM_COLUMNS} FROM feed_items WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(self.pool)
        .await?;

        Ok(row.map(FeedItem::from))
    }

    /// Count items of a feed.
    pub async fn count_by_feed(&self, feed_id: i64) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM feed_items WHERE feed_id = $1")
            .bind(feed_id)
            .fetch_one(self.pool)
            .await?;
        Ok(count)
    }

    /// List items of the given feeds, newest first.
    pub async fn list_by_feeds(&self, feed_ids: &[i64], limit: i64) -> Result<Vec<FeedItem>> {
        if feed_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder = sqlx::QueryBuilder::new(format!(
            "SELECT {ITEM_COLUMNS} FROM feed_items WHERE feed_id IN ("
        ));
        let mut separated = builder.separated(", ");
        for id in feed_ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(") ORDER BY COALESCE(published_at, fetched_at) DESC, id DESC LIMIT ");
        builder.push_bind(limit);

        let rows = builder
            .build_query_as::<FeedItemRow>()
            .fetch_all(self.pool)
            .await?;
        Ok(rows.into_iter().map(FeedItem::from).collect())
    }

    /// List items of one feed, newest first.
    pub async fn list_by_feed(&self, feed_id: i64, limit: i64) -> Result<Vec<FeedItem>> {
        self.list_by_feeds(&[feed_id], limit).await
    }
}

/// Repository for user subscriptions to feeds.
pub struct SubscriptionRepository<'a> {
    pool: &'a DbPool,
}

impl<'a> SubscriptionRepository<'a> {
    /// Create a new repository instance.
    pub fn new(pool: &'a DbPool) -> Self {
        Self { pool }
    }

    /// Subscribe a user to a feed, re-enabling an existing subscription.
    pub async fn subscribe(&self, user_id: i64, feed_id: i64, notify: bool) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO subscriptions (user_id, feed_id, enabled, notify)
            VALUES ($1, $2, 1, $3)
            ON CONFLICT(user_id, feed_id) DO UPDATE SET enabled = 1, notify = excluded.notify
            "#,
        )
        .bind(user_id)
        .bind(feed_id)
        .bind(notify)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// Disable a subscription without deleting it.
    pub async fn disable(&self, user_id: i64, feed_id: i64) -> Result<()> {
        sqlx::query("UPDATE subscriptions SET enabled = 0 WHERE user_id = $1 AND feed_id = $2")
            .bind(user_id)
            .bind(feed_id)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    /// Users with an enabled subscription whose preference allows notifications.
    pub async fn list_notifiable(&self, feed_id: i64) -> Result<Vec<i64>> {
        let ids: Vec<i64> = sqlx::query_scalar(
            "SELECT user_id FROM subscriptions
             WHERE feed_id = $1 AND enabled = 1 AND notify = 1
             ORDER BY user_id",
        )
        .bind(feed_id)
        .fetch_all(self.pool)
        .await?;
        Ok(ids)
    }

    /// Count subscriptions of a feed (enabled or not).
    pub async fn count_by_feed(&self, feed_id: i64) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM subscriptions WHERE feed_id = $1")
            .bind(feed_id)
            .fetch_one(self.pool)
            .await?;
        Ok(count)
    }
}
