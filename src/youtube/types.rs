//! YouTube types for feedwatch.

use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Quota service key for the YouTube Data API.
pub const YOUTUBE_SERVICE: &str = "youtube";

/// Unit costs of the endpoints used.
pub const SEARCH_COST: i64 = 100;
pub const CHANNELS_COST: i64 = 1;
pub const PLAYLIST_ITEMS_COST: i64 = 1;
pub const VIDEOS_COST: i64 = 1;

/// A tracked channel.
#[derive(Debug, Clone)]
pub struct YouTubeChannel {
    pub id: i64,
    /// External `UC...` channel ID.
    pub channel_id: String,
    pub title: Option<String>,
    pub handle: Option<String>,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub websub_lease_expires_at: Option<DateTime<Utc>>,
    pub websub_secret: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl YouTubeChannel {
    /// Uploads playlist ID (`UU` + the channel ID without its `UC` prefix).
    pub fn uploads_playlist_id(&self) -> Option<String> {
        uploads_playlist_id(&self.channel_id)
    }
}

/// Uploads playlist ID for a `UC...` channel ID.
pub fn uploads_playlist_id(channel_id: &str) -> Option<String> {
    channel_id.strip_prefix("UC").map(|rest| format!("UU{rest}"))
}

/// A stored video.
#[derive(Debug, Clone)]
pub struct YouTubeVideo {
    pub id: i64,
    pub channel_id: i64,
    pub video_id: String,
    pub title: String,
    pub description: Option<String>,
    pub thumbnail_url: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub fetched_at: DateTime<Utc>,
}

/// Channel details, from the API or scraped.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelInfo {
    pub channel_id: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub handle: Option<String>,
    pub thumbnail_url: Option<String>,
    pub uploads_playlist_id: Option<String>,
}

/// Video details.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoInfo {
    pub video_id: String,
    pub title: String,
    pub description: Option<String>,
    pub thumbnail_url: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub duration: Option<String>,
}

/// Daily quota consumption.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuotaUsage {
    pub used: i64,
    pub limit: i64,
}

impl QuotaUsage {
    /// Used share of the limit; a zero limit counts as exhausted.
    pub fn fraction(&self) -> f64 {
        if self.limit <= 0 {
            return 1.0;
        }
        self.used as f64 / self.limit as f64
    }

    pub fn remaining(&self) -> i64 {
        (self.limit - self.used).max(0)
    }
}

// API payloads. Only the fields read are declared.

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Thumbnail {
    pub url: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Thumbnails {
    pub default: Option<Thumbnail>,
    pub medium: Option<Thumbnail>,
    pub high: Option<Thumbnail>,
}

impl Thumbnails {
    /// Largest available thumbnail.
    pub fn best(&self) -> Option<String> {
        self.high
            .as_ref()
            .or(self.medium.as_ref())
            .or(self.default.as_ref())
            .map(|t| t.url.clone())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelResource {
    pub id: String,
    #[serde(default)]
    pub snippet: ChannelSnippet,
    pub content_details: Option<ChannelContentDetails>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelSnippet {
    pub title: Option<String>,
    pub description: Option<String>,
    pub custom_url: Option<String>,
    #[serde(default)]
    pub thumbnails: Thumbnails,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelContentDetails {
    pub related_playlists: RelatedPlaylists,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelatedPlaylists {
    pub uploads: Option<String>,
}

impl From<ChannelResource> for ChannelInfo {
    fn from(resource: ChannelResource) -> Self {
        ChannelInfo {
            uploads_playlist_id: resource
                .content_details
                .and_then(|d| d.related_playlists.uploads)
                .or_else(|| uploads_playlist_id(&resource.id)),
            channel_id: resource.id,
            title: resource.snippet.title,
            description: resource.snippet.description,
            handle: resource.snippet.custom_url,
            thumbnail_url: resource.snippet.thumbnails.best(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub id: SearchResultId,
    #[serde(default)]
    pub snippet: ChannelSnippet,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResultId {
    pub channel_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistItem {
    pub snippet: PlaylistItemSnippet,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistItemSnippet {
    pub title: String,
    pub description: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub thumbnails: Thumbnails,
    pub resource_id: ResourceId,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceId {
    pub video_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoResource {
    pub id: String,
    pub snippet: VideoSnippet,
    pub content_details: Option<VideoContentDetails>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoSnippet {
    pub title: String,
    pub description: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub thumbnails: Thumbnails,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VideoContentDetails {
    pub duration: Option<String>,
}

impl From<VideoResource> for VideoInfo {
    fn from(resource: VideoResource) -> Self {
        VideoInfo {
            video_id: resource.id,
            title: resource.snippet.title,
            description: resource.snippet.description,
            thumbnail_url: resource.snippet.thumbnails.best(),
            published_at: resource.snippet.published_at,
            duration: resource.content_details.and_then(|d| d.duration),
        }
    }
}
