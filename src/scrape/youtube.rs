//! YouTube channel checks.

use std::time::Duration;

use serde_json::json;
use tracing::{debug, info, warn};

use super::orchestrator::DEFAULT_LOCK_TTL;
use crate::db::Database;
use crate::jobs::{JobLogRepository, JobType};
use crate::lock::{channel_lock_key, LockCoordinator};
use crate::notify::{Notification, NotificationDispatcher};
use crate::youtube::types::PLAYLIST_ITEMS_COST;
use crate::youtube::{
    is_channel_id, ChannelInfo, ChannelRepository, NewYouTubeVideo, QuotaUsage, VideoInfo,
    VideoRepository, YouTubeChannel, YouTubeClient,
};
use crate::{FeedwatchError, Result};

/// Uploads fetched per check.
const RECENT_VIDEOS: u32 = 15;

/// Default staleness after which a channel is checked again.
pub const DEFAULT_CHANNEL_STALENESS_SECS: i64 = 1800;

/// Where a check read the uploads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoSource {
    /// Data API uploads playlist (metered).
    Api,
    /// Public channel feed (free).
    Feed,
}

impl VideoSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoSource::Api => "api",
            VideoSource::Feed => "feed",
        }
    }
}

/// Result of one channel check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelCheckOutcome {
    /// Another worker holds the channel's lock.
    Skipped,
    Checked {
        new_videos: usize,
        source: VideoSource,
    },
    Failed(String),
}

/// Polls tracked channels for new uploads.
#[derive(Clone)]
pub struct ChannelChecker {
    db: Database,
    client: YouTubeClient,
    locks: LockCoordinator,
    notifier: NotificationDispatcher,
    lock_ttl: Duration,
    staleness_secs: i64,
}

impl ChannelChecker {
    pub fn new(db: Database, client: YouTubeClient, notifier: NotificationDispatcher) -> Self {
        Self {
            db,
            client,
            locks: LockCoordinator::disabled(),
            notifier,
            lock_ttl: DEFAULT_LOCK_TTL,
            staleness_secs: DEFAULT_CHANNEL_STALENESS_SECS,
        }
    }

    pub fn with_locks(mut self, locks: LockCoordinator) -> Self {
        self.locks = locks;
        self
    }

    pub fn with_lock_ttl(mut self, ttl: Duration) -> Self {
        self.lock_ttl = ttl;
        self
    }

    pub fn with_staleness(mut self, secs: i64) -> Self {
        self.staleness_secs = secs;
        self
    }

    pub fn client(&self) -> &YouTubeClient {
        &self.client
    }

    pub async fn get_quota_usage(&self) -> Result<QuotaUsage> {
        self.client.get_quota_usage().await
    }

    /// Subscribed channels due for a check, least recently checked first.
    pub async fn get_channels_to_check(&self, limit: i64) -> Result<Vec<YouTubeChannel>> {
        ChannelRepository::new(self.db.pool())
            .list_to_check(self.staleness_secs, limit)
            .await
    }

    /// Resolve user input (channel ID, `@handle` or channel URL).
    pub async fn resolve_channel(&self, input: &str) -> Result<Option<ChannelInfo>> {
        let input = input.trim();
        if is_channel_id(input) {
            if self.client.has_api_key() {
                return self.client.get_channel_by_id(input).await;
            }
            return Ok(Some(ChannelInfo {
                channel_id: input.to_string(),
                title: None,
                description: None,
                handle: None,
                thumbnail_url: None,
                uploads_playlist_id: crate::youtube::types::uploads_playlist_id(input),
            }));
        }
        self.client.get_channel_by_handle(input).await
    }

    /// Subscribe a user to a channel, tracking it if new.
    pub async fn subscribe(&self, user_id: i64, input: &str, notify: bool) -> Result<YouTubeChannel> {
        let info = self
            .resolve_channel(input)
            .await?
            .ok_or_else(|| FeedwatchError::NotFound(format!("YouTube channel {input}")))?;

        let repo = ChannelRepository::new(self.db.pool());
        let channel = repo
            .get_or_create(&info.channel_id, info.title.as_deref(), info.handle.as_deref())
            .await?;
        repo.subscribe(user_id, channel.id, notify).await?;
        info!("User {} subscribed to channel {}", user_id, channel.channel_id);
        Ok(channel)
    }

    /// Check one tracked channel for new uploads.
    pub async fn check_channel(&self, channel_db_id: i64) -> Result<ChannelCheckOutcome> {
        let key = channel_lock_key(channel_db_id);
        if !self.locks.acquire(&key, self.lock_ttl).await {
            debug!("Channel {} is being checked elsewhere", channel_db_id);
            return Ok(ChannelCheckOutcome::Skipped);
        }
        let outcome = self.check_locked(channel_db_id).await;
        self.locks.release(&key).await;
        outcome
    }

    async fn check_locked(&self, channel_db_id: i64) -> Result<ChannelCheckOutcome> {
        let channels = ChannelRepository::new(self.db.pool());
        let channel = channels
            .get_by_id(channel_db_id)
            .await?
            .ok_or_else(|| FeedwatchError::NotFound(format!("channel {channel_db_id}")))?;

        let jobs = JobLogRepository::new(self.db.pool());
        let job = jobs.create(JobType::CheckYoutube, channel.id).await?;
        jobs.mark_running(job.id).await?;

        let result = self.fetch_and_store(&channel).await;
        channels.mark_checked(channel.id).await?;

        match result {
            Ok((new_videos, source)) => {
                jobs.complete(
                    job.id,
                    &json!({ "new_videos": new_videos, "source": source.as_str() }),
                )
                .await?;
                if new_videos > 0 {
                    info!(
                        "Channel {}: {} new video(s) via {}",
                        channel.channel_id,
                        new_videos,
                        source.as_str()
                    );
                }
                Ok(ChannelCheckOutcome::Checked { new_videos, source })
            }
            Err(e) => {
                let message = e.to_string();
                warn!("Check of channel {} failed: {}", channel.channel_id, message);
                jobs.fail(job.id, &message).await?;
                Ok(ChannelCheckOutcome::Failed(message))
            }
        }
    }

    async fn fetch_and_store(&self, channel: &YouTubeChannel) -> Result<(usize, VideoSource)> {
        let (videos, source) = self.recent_videos(channel).await?;

        let repo = VideoRepository::new(self.db.pool());
        let mut new_videos = Vec::new();
        for video in videos {
            let mut record = NewYouTubeVideo::new(channel.id, &video.video_id, &video.title);
            if let Some(description) = video.description {
                record = record.with_description(description);
            }
            if let Some(thumbnail) = video.thumbnail_url {
                record = record.with_thumbnail_url(thumbnail);
            }
            if let Some(published_at) = video.published_at {
                record = record.with_published_at(published_at);
            }
            match repo.insert_or_ignore(&record).await {
                Ok(Some(stored)) => new_videos.push(stored),
                Ok(None) => {}
                Err(e) => warn!("Failed to store video {}: {}", record.video_id, e),
            }
        }

        if !new_videos.is_empty() {
            let users = ChannelRepository::new(self.db.pool())
                .list_notifiable(channel.id)
                .await
                .unwrap_or_else(|e| {
                    warn!("Failed to list subscribers of channel {}: {}", channel.id, e);
                    Vec::new()
                });
            let name = channel.title.as_deref().unwrap_or(&channel.channel_id);
            for video in &new_videos {
                let notification = Notification::new(name, video.title.clone()).with_data(json!({
                    "channel_id": channel.channel_id,
                    "video_id": video.video_id,
                    "url": format!("https://www.youtube.com/watch?v={}", video.video_id),
                }));
                self.notifier.dispatch_all(&users, &notification);
            }
        }

        Ok((new_videos.len(), source))
    }

    /// Latest uploads, through the API while budget remains, else the feed.
    async fn recent_videos(&self, channel: &YouTubeChannel) -> Result<(Vec<VideoInfo>, VideoSource)> {
        if self.client.has_api_key() {
            let usage = self.client.get_quota_usage().await?;
            if usage.remaining() >= PLAYLIST_ITEMS_COST {
                match self
                    .client
                    .get_recent_videos(&channel.channel_id, RECENT_VIDEOS)
                    .await
                {
                    Ok(videos) => return Ok((videos, VideoSource::Api)),
                    Err(e) => warn!(
                        "API uploads for {} failed, using feed: {}",
                        channel.channel_id, e
                    ),
                }
            } else {
                debug!("Quota exhausted, reading feed of {}", channel.channel_id);
            }
        }

        let videos = self.client.get_feed_videos(&channel.channel_id).await?;
        Ok((videos, VideoSource::Feed))
    }
}
