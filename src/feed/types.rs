//! Feed types for feedwatch.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};

use crate::FeedwatchError;

/// Maximum length of a stored excerpt, ellipsis included.
pub const MAX_EXCERPT_LENGTH: usize = 500;

/// Lifecycle status of a feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeedStatus {
    /// Created, not yet (successfully) scraped.
    Pending,
    /// Last scrape succeeded.
    Active,
    /// Last scrape failed; eligible for the retry sweep.
    Error,
    /// Refused by robots policy; only an operator reset clears it.
    Blocked,
}

impl FeedStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedStatus::Pending => "pending",
            FeedStatus::Active => "active",
            FeedStatus::Error => "error",
            FeedStatus::Blocked => "blocked",
        }
    }
}

impl fmt::Display for FeedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeedStatus {
    type Err = FeedwatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(FeedStatus::Pending),
            "active" => Ok(FeedStatus::Active),
            "error" => Ok(FeedStatus::Error),
            "blocked" => Ok(FeedStatus::Blocked),
            other => Err(FeedwatchError::Validation(format!(
                "unknown feed status: {other}"
            ))),
        }
    }
}

/// A subscribable source.
#[derive(Debug, Clone)]
pub struct Feed {
    /// Feed ID.
    pub id: i64,
    /// Normalized site URL (unique).
    pub url: String,
    /// Host of `url`.
    pub site_domain: String,
    /// Title, once known.
    pub title: Option<String>,
    /// Resolved RSS/Atom endpoint, once discovered.
    pub rss_url: Option<String>,
    /// Current status.
    pub status: FeedStatus,
    /// Human-readable reason for `Error`/`Blocked`.
    pub error_message: Option<String>,
    /// When the last scrape attempt finished.
    pub last_scrape_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Feed {
    /// Display name: title when known, otherwise the domain.
    pub fn display_name(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.site_domain)
    }
}

/// One stored piece of content belonging to a feed.
#[derive(Debug, Clone)]
pub struct FeedItem {
    pub id: i64,
    pub feed_id: i64,
    /// Normalized item URL.
    pub url: String,
    pub canonical_url: Option<String>,
    pub title: String,
    pub excerpt: Option<String>,
    pub thumbnail_url: Option<String>,
    pub author: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    /// First-seen time.
    pub fetched_at: DateTime<Utc>,
    /// Fingerprint of (url, title).
    pub content_hash: String,
}

/// Feed item for insertion.
#[derive(Debug, Clone)]
pub struct NewFeedItem {
    pub feed_id: i64,
    pub url: String,
    pub canonical_url: Option<String>,
    pub title: String,
    pub excerpt: Option<String>,
    pub thumbnail_url: Option<String>,
    pub author: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub content_hash: String,
}

impl NewFeedItem {
    /// Build an insertable item from a scraped candidate.
    ///
    /// `url` must already be normalized and `content_hash` computed from it.
    pub fn from_parsed(
        feed_id: i64,
        url: impl Into<String>,
        content_hash: impl Into<String>,
        item: &ParsedItem,
    ) -> Self {
        Self {
            feed_id,
            url: url.into(),
            canonical_url: item.canonical_url.clone(),
            title: item.title.clone(),
            excerpt: item.excerpt.as_deref().map(truncate_excerpt),
            thumbnail_url: item.thumbnail_url.clone(),
            author: item.author.clone(),
            published_at: item.published_at,
            content_hash: content_hash.into(),
        }
    }
}

/// Feed metadata and items parsed from an external source.
#[derive(Debug, Clone)]
pub struct ParsedFeed {
    pub title: Option<String>,
    pub description: Option<String>,
    /// The feed's own `<link>`, resolved.
    pub link: Option<String>,
    pub items: Vec<ParsedItem>,
}

/// A candidate item from either a feed document or heuristic extraction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedItem {
    /// Absolute item URL (not yet normalized).
    pub url: String,
    pub canonical_url: Option<String>,
    pub title: String,
    pub excerpt: Option<String>,
    pub thumbnail_url: Option<String>,
    pub author: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

/// How a scrape obtained its items.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrapeMethod {
    Rss,
    HtmlScraping,
}

impl ScrapeMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScrapeMethod::Rss => "rss",
            ScrapeMethod::HtmlScraping => "html_scraping",
        }
    }
}

impl fmt::Display for ScrapeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Truncate text to [`MAX_EXCERPT_LENGTH`] characters, marking the cut with an ellipsis.
pub fn truncate_excerpt(text: &str) -> String {
    if text.chars().count() <= MAX_EXCERPT_LENGTH {
        return text.to_string();
    }
    let mut truncated: String = text.chars().take(MAX_EXCERPT_LENGTH - 3).collect();
    truncated.truncate(truncated.trim_end().len());
    truncated.push_str("...");
    truncated
}
