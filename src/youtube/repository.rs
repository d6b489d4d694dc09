//! YouTube repositories for feedwatch.

use chrono::Utc;

use super::types::{YouTubeChannel, YouTubeVideo};
use crate::datetime::{now_sql, parse_datetime, sql_seconds_ago, to_sql};
use crate::db::DbPool;
use crate::error::is_unique_violation;
use crate::{FeedwatchError, Result};

const CHANNEL_COLUMNS: &str = "id, channel_id, title, handle, last_checked_at, \
                               websub_lease_expires_at, websub_secret, created_at";

#[derive(Debug, sqlx::FromRow)]
struct ChannelRow {
    id: i64,
    channel_id: String,
    title: Option<String>,
    handle: Option<String>,
    last_checked_at: Option<String>,
    websub_lease_expires_at: Option<String>,
    websub_secret: Option<String>,
    created_at: String,
}

impl From<ChannelRow> for YouTubeChannel {
    fn from(row: ChannelRow) -> Self {
        YouTubeChannel {
            id: row.id,
            channel_id: row.channel_id,
            title: row.title,
            handle: row.handle,
            last_checked_at: row.last_checked_at.and_then(|s| parse_datetime(&s)),
            websub_lease_expires_at: row
                .websub_lease_expires_at
                .and_then(|s| parse_datetime(&s)),
            websub_secret: row.websub_secret,
            created_at: parse_datetime(&row.created_at).unwrap_or_else(Utc::now),
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct VideoRow {
    id: i64,
    channel_id: i64,
    video_id: String,
    title: String,
    description: Option<String>,
    thumbnail_url: Option<String>,
    published_at: Option<String>,
    fetched_at: String,
}

impl From<VideoRow> for YouTubeVideo {
    fn from(row: VideoRow) -> Self {
        YouTubeVideo {
            id: row.id,
            channel_id: row.channel_id,
            video_id: row.video_id,
            title: row.title,
            description: row.description,
            thumbnail_url: row.thumbnail_url,
            published_at: row.published_at.and_then(|s| parse_datetime(&s)),
            fetched_at: parse_datetime(&row.fetched_at).unwrap_or_else(Utc::now),
        }
    }
}

/// Video for insertion.
#[derive(Debug, Clone)]
pub struct NewYouTubeVideo {
    pub channel_id: i64,
    pub video_id: String,
    pub title: String,
    pub description: Option<String>,
    pub thumbnail_url: Option<String>,
    pub published_at: Option<chrono::DateTime<Utc>>,
}

impl NewYouTubeVideo {
    pub fn new(channel_id: i64, video_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            channel_id,
            video_id: video_id.into(),
            title: title.into(),
            description: None,
            thumbnail_url: None,
            published_at: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_thumbnail_url(mut self, url: impl Into<String>) -> Self {
        self.thumbnail_url = Some(url.into());
        self
    }

    pub fn with_published_at(mut self, at: chrono::DateTime<Utc>) -> Self {
        self.published_at = Some(at);
        self
    }
}

/// Repository for tracked channels.
pub struct ChannelRepository<'a> {
    pool: &'a DbPool,
}

impl<'a> ChannelRepository<'a> {
    pub fn new(pool: &'a DbPool) -> Self {
        Self { pool }
    }

    /// Get a channel by external ID, creating it if absent.
    ///
    /// A known title or handle fills in missing values on an existing row.
    pub async fn get_or_create(
        &self,
        channel_id: &str,
        title: Option<&str>,
        handle: Option<&str>,
    ) -> Result<YouTubeChannel> {
        sqlx::query(
            r#"
            INSERT INTO youtube_channels (channel_id, title, handle) VALUES ($1, $2, $3)
            ON CONFLICT(channel_id) DO UPDATE SET
                title = COALESCE(youtube_channels.title, excluded.title),
                handle = COALESCE(youtube_channels.handle, excluded.handle)
            "#,
        )
        .bind(channel_id)
        .bind(title)
        .bind(handle)
        .execute(self.pool)
        .await?;

        self.get_by_channel_id(channel_id)
            .await?
            .ok_or_else(|| FeedwatchError::NotFound(format!("channel {channel_id}")))
    }

    pub async fn get_by_id(&self, id: i64) -> Result<Option<YouTubeChannel>> {
        let row = sqlx::query_as::<_, ChannelRow>(&format!(
            "SELECT {CHANNEL_COLUMNS} FROM youtube_channels WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(self.pool)
        .await?;
        Ok(row.map(YouTubeChannel::from))
    }

    pub async fn get_by_channel_id(&self, channel_id: &str) -> Result<Option<YouTubeChannel>> {
        let row = sqlx::query_as::<_, ChannelRow>(&format!(
            "SELECT {CHANNEL_COLUMNS} FROM youtube_channels WHERE channel_id = $1"
        ))
        .bind(channel_id)
        .fetch_optional(self.pool)
        .await?;
        Ok(row.map(YouTubeChannel::from))
    }

    /// Channels with at least one enabled subscription, never checked or
    /// checked more than `staleness_secs` ago, oldest first.
    pub async fn list_to_check(&self, staleness_secs: i64, limit: i64) -> Result<Vec<YouTubeChannel>> {
        let rows = sqlx::query_as::<_, ChannelRow>(&format!(
            "SELECT {CHANNEL_COLUMNS} FROM youtube_channels c
             WHERE (c.last_checked_at IS NULL OR c.last_checked_at < $1)
               AND EXISTS (SELECT 1 FROM youtube_subscriptions s
                           WHERE s.channel_id = c.id AND s.enabled = 1)
             ORDER BY c.last_checked_at IS NOT NULL, c.last_checked_at ASC, c.id ASC
             LIMIT $2"
        ))
        .bind(sql_seconds_ago(staleness_secs))
        .bind(limit)
        .fetch_all(self.pool)
        .await?;
        Ok(rows.into_iter().map(YouTubeChannel::from).collect())
    }

    pub async fn mark_checked(&self, id: i64) -> Result<()> {
        sqlx::query("UPDATE youtube_channels SET last_checked_at = $1 WHERE id = $2")
            .bind(now_sql())
            .bind(id)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    /// Subscribe a user to a channel, re-enabling an existing subscription.
    pub async fn subscribe(&self, user_id: i64, channel_id: i64, notify: bool) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO youtube_subscriptions (user_id, channel_id, enabled, notify)
            VALUES ($1, $2, 1, $3)
            ON CONFLICT(user_id, channel_id) DO UPDATE SET enabled = 1, notify = excluded.notify
            "#,
        )
        .bind(user_id)
        .bind(channel_id)
        .bind(notify)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// Users with an enabled, notifying subscription to the channel.
    pub async fn list_notifiable(&self, channel_id: i64) -> Result<Vec<i64>> {
        let ids: Vec<i64> = sqlx::query_scalar(
            "SELECT user_id FROM youtube_subscriptions
             WHERE channel_id = $1 AND enabled = 1 AND notify = 1
             ORDER BY user_id",
        )
        .bind(channel_id)
        .fetch_all(self.pool)
        .await?;
        Ok(ids)
    }
}

/// Repository for stored videos.
pub struct VideoRepository<'a> {
    pool: &'a DbPool,
}

impl<'a> VideoRepository<'a> {
    pub fn new(pool: &'a DbPool) -> Self {
        Self { pool }
    }

    /// Insert a video unless its ID is already stored.
    ///
    /// Returns the stored video when it was new.
    pub async fn insert_or_ignore(&self, video: &NewYouTubeVideo) -> Result<Option<YouTubeVideo>> {
        let result = sqlx::query_as::<_, VideoRow>(
            r#"
            INSERT INTO youtube_videos (channel_id, video_id, title, description, thumbnail_url,
                                        published_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, channel_id, video_id, title, description, thumbnail_url, published_at,
                      fetched_at
            "#,
        )
        .bind(video.channel_id)
        .bind(&video.video_id)
        .bind(&video.title)
        .bind(&video.description)
        .bind(&video.thumbnail_url)
        .bind(video.published_at.as_ref().map(to_sql))
        .fetch_one(self.pool)
        .await;

        match result {
            Ok(row) => Ok(Some(row.into())),
            Err(e) if is_unique_violation(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn count_by_channel(&self, channel_id: i64) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM youtube_videos WHERE channel_id = $1")
                .bind(channel_id)
                .fetch_one(self.pool)
                .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;

    const CHANNEL: &str = "UCaaaaaaaaaaaaaaaaaaaaaa";

    #[tokio::test]
    async fn test_get_or_create_channel() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = ChannelRepository::new(db.pool());

        let created = repo.get_or_create(CHANNEL, None, Some("chan")).await.unwrap();
        assert!(created.title.is_none());

        let again = repo
            .get_or_create(CHANNEL, Some("Chan"), Some("other"))
            .await
            .unwrap();
        assert_eq!(again.id, created.id);
        assert_eq!(again.title.as_deref(), Some("Chan"));
        assert_eq!(again.handle.as_deref(), Some("chan"));
        assert_eq!(
            again.uploads_playlist_id().as_deref(),
            Some("UUaaaaaaaaaaaaaaaaaaaaaa")
        );
    }

    #[tokio::test]
    async fn test_list_to_check_requires_subscription() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = ChannelRepository::new(db.pool());

        let subscribed = repo.get_or_create(CHANNEL, None, None).await.unwrap();
        let _orphan = repo
            .get_or_create("UCbbbbbbbbbbbbbbbbbbbbbb", None, None)
            .await
            .unwrap();
        repo.subscribe(1, subscribed.id, true).await.unwrap();

        let due = repo.list_to_check(1800, 10).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, subscribed.id);

        repo.mark_checked(subscribed.id).await.unwrap();
        assert!(repo.list_to_check(1800, 10).await.unwrap().is_empty());
        assert_eq!(repo.list_notifiable(subscribed.id).await.unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn test_insert_video_once() {
        let db = Database::open_in_memory().await.unwrap();
        let channel = ChannelRepository::new(db.pool())
            .get_or_create(CHANNEL, None, None)
            .await
            .unwrap();
        let repo = VideoRepository::new(db.pool());

        let video = NewYouTubeVideo::new(channel.id, "dQw4w9WgXcQ", "Song")
            .with_description("desc")
            .with_published_at(Utc::now());
        let stored = repo.insert_or_ignore(&video).await.unwrap().unwrap();
        assert_eq!(stored.video_id, "dQw4w9WgXcQ");
        assert!(stored.published_at.is_some());

        assert!(repo.insert_or_ignore(&video).await.unwrap().is_none());
        assert_eq!(repo.count_by_channel(channel.id).await.unwrap(), 1);
    }
}
