//! Custom feeds: user-defined aggregates over native feeds.
//!
//! A custom feed has no scraper of its own. Its items are the items of its
//! member feeds, optionally filtered by keywords. [`FeedSource`] gives native
//! and custom feeds one shape for callers that only need items and status.

use std::fmt;
use std::str::FromStr;

use chrono::Utc;

use super::repository::{FeedItemRepository, FeedRepository};
use super::types::{Feed, FeedItem, FeedStatus};
use crate::datetime::parse_datetime;
use crate::db::DbPool;
use crate::{FeedwatchError, Result};

/// Discriminates native from custom feed identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeedKind {
    Native,
    Custom,
}

impl FeedKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedKind::Native => "native",
            FeedKind::Custom => "custom",
        }
    }
}

/// Typed reference to either kind of feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FeedRef {
    pub kind: FeedKind,
    pub id: i64,
}

impl FeedRef {
    pub fn native(id: i64) -> Self {
        Self {
            kind: FeedKind::Native,
            id,
        }
    }

    pub fn custom(id: i64) -> Self {
        Self {
            kind: FeedKind::Custom,
            id,
        }
    }
}

impl fmt::Display for FeedRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.id)
    }
}

impl FromStr for FeedRef {
    type Err = FeedwatchError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || FeedwatchError::Validation(format!("invalid feed reference: {s}"));
        let (kind, id) = s.split_once(':').ok_or_else(invalid)?;
        let id: i64 = id.parse().map_err(|_| invalid())?;
        match kind {
            "native" => Ok(FeedRef::native(id)),
            "custom" => Ok(FeedRef::custom(id)),
            _ => Err(invalid()),
        }
    }
}

/// A user-defined aggregate feed.
#[derive(Debug, Clone)]
pub struct CustomFeed {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    /// Lowercased keywords; an item matches if its title or excerpt contains any.
    pub keywords: Vec<String>,
    /// Member native feed IDs.
    pub source_feed_ids: Vec<i64>,
    pub created_at: chrono::DateTime<Utc>,
}

impl CustomFeed {
    /// Whether an item passes the keyword filter.
    pub fn matches(&self, item: &FeedItem) -> bool {
        if self.keywords.is_empty() {
            return true;
        }
        let title = item.title.to_lowercase();
        let excerpt = item.excerpt.as_deref().unwrap_or_default().to_lowercase();
        self.keywords
            .iter()
            .any(|k| title.contains(k.as_str()) || excerpt.contains(k.as_str()))
    }
}

fn parse_keywords(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|k| k.trim().to_lowercase())
        .filter(|k| !k.is_empty())
        .collect()
}

#[derive(Debug, sqlx::FromRow)]
struct CustomFeedRow {
    id: i64,
    user_id: i64,
    name: String,
    keywords: String,
    created_at: String,
}

/// Repository for custom feeds.
pub struct CustomFeedRepository<'a> {
    pool: &'a DbPool,
}

impl<'a> CustomFeedRepository<'a> {
    pub fn new(pool: &'a DbPool) -> Self {
        Self { pool }
    }

    /// Create a custom feed over the given native feeds.
    pub async fn create(
        &self,
        user_id: i64,
        name: &str,
        keywords: &[&str],
        source_feed_ids: &[i64],
    ) -> Result<CustomFeed> {
        let name = name.trim();
        if name.is_empty() {
            return Err(FeedwatchError::Validation(
                "custom feed name must not be empty".to_string(),
            ));
        }

        let mut tx = self.pool.begin().await?;
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO custom_feeds (user_id, name, keywords) VALUES ($1, $2, $3) RETURNING id",
        )
        .bind(user_id)
        .bind(name)
        .bind(keywords.join(","))
        .fetch_one(&mut *tx)
        .await?;

        for feed_id in source_feed_ids {
            sqlx::query(
                "INSERT OR IGNORE INTO custom_feed_sources (custom_feed_id, feed_id) VALUES ($1, $2)",
            )
            .bind(id)
            .bind(feed_id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        self.get_by_id(id)
            .await?
            .ok_or_else(|| FeedwatchError::NotFound(format!("custom feed {id}")))
    }

    /// Get a custom feed with its member feed IDs.
    pub async fn get_by_id(&self, id: i64) -> Result<Option<CustomFeed>> {
        let row = sqlx::query_as::<_, CustomFeedRow>(
            "SELECT id, user_id, name, keywords, created_at FROM custom_feeds WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let source_feed_ids: Vec<i64> = sqlx::query_scalar(
            "SELECT feed_id FROM custom_feed_sources WHERE custom_feed_id = $1 ORDER BY feed_id",
        )
        .bind(id)
        .fetch_all(self.pool)
        .await?;

        Ok(Some(CustomFeed {
            id: row.id,
            user_id: row.user_id,
            name: row.name,
            keywords: parse_keywords(&row.keywords),
            source_feed_ids,
            created_at: parse_datetime(&row.created_at).unwrap_or_else(Utc::now),
        }))
    }
}

/// A native feed or a custom aggregate, resolved from a [`FeedRef`].
#[derive(Debug, Clone)]
pub enum FeedSource {
    Native(Feed),
    Custom(CustomFeed),
}

impl FeedSource {
    /// Load the source a reference points to.
    pub async fn load(pool: &DbPool, feed_ref: FeedRef) -> Result<Self> {
        match feed_ref.kind {
            FeedKind::Native => FeedRepository::new(pool)
                .require(feed_ref.id)
                .await
                .map(FeedSource::Native),
            FeedKind::Custom => CustomFeedRepository::new(pool)
                .get_by_id(feed_ref.id)
                .await?
                .map(FeedSource::Custom)
                .ok_or_else(|| FeedwatchError::NotFound(format!("custom feed {}", feed_ref.id))),
        }
    }

    pub fn feed_ref(&self) -> FeedRef {
        match self {
            FeedSource::Native(feed) => FeedRef::native(feed.id),
            FeedSource::Custom(custom) => FeedRef::custom(custom.id),
        }
    }

    pub fn display_name(&self) -> &str {
        match self {
            FeedSource::Native(feed) => feed.display_name(),
            FeedSource::Custom(custom) => &custom.name,
        }
    }

    /// Newest items, at most `limit`.
    pub async fn items(&self, pool: &DbPool, limit: i64) -> Result<Vec<FeedItem>> {
        let items = FeedItemRepository::new(pool);
        match self {
            FeedSource::Native(feed) => items.list_by_feed(feed.id, limit).await,
            FeedSource::Custom(custom) => {
                // Over-fetch so the keyword filter still fills the page.
                let candidates = items
                    .list_by_feeds(&custom.source_feed_ids, limit.saturating_mul(4))
                    .await?;
                Ok(candidates
                    .into_iter()
                    .filter(|item| custom.matches(item))
                    .take(usize::try_from(limit).unwrap_or(0))
                    .collect())
            }
        }
    }

    /// Status of the source.
    ///
    /// A custom feed is as healthy as its healthiest member: active if any
    /// member is active, otherwise the status of its first member, or pending
    /// when it has none.
    pub async fn status(&self, pool: &DbPool) -> Result<FeedStatus> {
        match self {
            FeedSource::Native(feed) => Ok(feed.status),
            FeedSource::Custom(custom) => {
                let repo = FeedRepository::new(pool);
                let mut first = None;
                for id in &custom.source_feed_ids {
                    if let Some(feed) = repo.get_by_id(*id).await? {
                        if feed.status == FeedStatus::Active {
                            return Ok(FeedStatus::Active);
                        }
                        first.get_or_insert(feed.status);
                    }
                }
                Ok(first.unwrap_or(FeedStatus::Pending))
            }
        }
    }
}
