//! Quota-aware YouTube client.
//!
//! Every Data API call is charged to the daily ledger before the request is
//! sent, so a [`YouTubeClient::get_quota_usage`] issued afterwards always
//! sees it. Handle resolution and the public channel feed cost no units and
//! are preferred where they can answer.

use chrono::Utc;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use super::handle::{extract_channel_id, extract_channel_title, normalize_handle};
use super::quota::QuotaRepository;
use super::types::{
    uploads_playlist_id, ChannelInfo, ChannelResource, ListResponse, PlaylistItem, QuotaUsage,
    SearchResult, VideoInfo, VideoResource, CHANNELS_COST, PLAYLIST_ITEMS_COST, SEARCH_COST,
    VIDEOS_COST, YOUTUBE_SERVICE,
};
use crate::config::YouTubeConfig;
use crate::datetime::quota_day;
use crate::db::Database;
use crate::feed::parser::{youtube_thumbnail, youtube_video_id};
use crate::fetch::HttpFetcher;
use crate::{FeedwatchError, Result};

/// Largest page the API returns.
const MAX_RESULTS: u32 = 50;

/// Client for the YouTube Data API and public YouTube pages.
#[derive(Clone)]
pub struct YouTubeClient {
    fetcher: HttpFetcher,
    db: Database,
    config: YouTubeConfig,
}

impl YouTubeClient {
    pub fn new(fetcher: HttpFetcher, db: Database, config: YouTubeConfig) -> Self {
        Self {
            fetcher,
            db,
            config,
        }
    }

    /// Whether metered API calls are possible at all.
    pub fn has_api_key(&self) -> bool {
        self.config
            .api_key
            .as_deref()
            .is_some_and(|k| !k.trim().is_empty())
    }

    fn api_key(&self) -> Result<&str> {
        self.config
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| FeedwatchError::YouTube("API key not configured".to_string()))
    }

    fn today(&self) -> String {
        quota_day(&Utc::now(), &self.config.quota_timezone)
    }

    /// Units used today against the configured daily limit.
    pub async fn get_quota_usage(&self) -> Result<QuotaUsage> {
        let used = QuotaRepository::new(self.db.pool())
            .used_on(YOUTUBE_SERVICE, &self.today())
            .await?;
        Ok(QuotaUsage {
            used,
            limit: self.config.daily_quota,
        })
    }

    /// Charge the ledger, then call an API endpoint.
    async fn call<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        units: i64,
        params: &[(&str, &str)],
    ) -> Result<T> {
        let key = self.api_key()?;
        QuotaRepository::new(self.db.pool())
            .record(YOUTUBE_SERVICE, &self.today(), endpoint, units)
            .await?;

        let url = format!(
            "{}/{}",
            self.config.api_base_url.trim_end_matches('/'),
            endpoint
        );
        let mut query = params.to_vec();
        query.push(("key", key));

        self.fetcher
            .get_json(&url, &query)
            .await
            .map_err(|e| FeedwatchError::YouTube(format!("{}: {}", endpoint, e)))
    }

    /// Find a channel by free-text query (100 units).
    pub async fn search_channel(&self, query: &str) -> Result<Option<ChannelInfo>> {
        let response: ListResponse<SearchResult> = self
            .call(
                "search",
                SEARCH_COST,
                &[
                    ("part", "snippet"),
                    ("type", "channel"),
                    ("maxResults", "1"),
                    ("q", query),
                ],
            )
            .await?;

        Ok(response.items.into_iter().find_map(|result| {
            let channel_id = result.id.channel_id?;
            Some(ChannelInfo {
                uploads_playlist_id: uploads_playlist_id(&channel_id),
                channel_id,
                title: result.snippet.title,
                description: result.snippet.description,
                handle: result.snippet.custom_url,
                thumbnail_url: result.snippet.thumbnails.best(),
            })
        }))
    }

    /// Channel details by `UC...` ID (1 unit).
    pub async fn get_channel_by_id(&self, channel_id: &str) -> Result<Option<ChannelInfo>> {
        let response: ListResponse<ChannelResource> = self
            .call(
                "channels",
                CHANNELS_COST,
                &[("part", "snippet,contentDetails"), ("id", channel_id)],
            )
            .await?;
        Ok(response.items.into_iter().next().map(ChannelInfo::from))
    }

    /// Resolve a handle to a channel.
    ///
    /// The channel page is scraped first (0 units); the `forHandle` API
    /// lookup (1 unit) runs only if scraping finds no channel ID.
    pub async fn get_channel_by_handle(&self, handle: &str) -> Result<Option<ChannelInfo>> {
        let handle = normalize_handle(handle)
            .ok_or_else(|| FeedwatchError::Validation(format!("invalid handle: {handle}")))?;

        let page_url = format!(
            "{}/@{}",
            self.config.web_base_url.trim_end_matches('/'),
            urlencoding::encode(&handle)
        );
        match self
            .fetcher
            .get_text(&page_url, self.fetcher.config().page_timeout())
            .await
        {
            Ok(html) => {
                if let Some(channel_id) = extract_channel_id(&html) {
                    debug!("Resolved @{} to {} by scraping", handle, channel_id);
                    return Ok(Some(ChannelInfo {
                        uploads_playlist_id: uploads_playlist_id(&channel_id),
                        channel_id,
                        title: extract_channel_title(&html),
                        description: None,
                        handle: Some(format!("@{handle}")),
                        thumbnail_url: None,
                    }));
                }
                debug!("No channel ID on page for @{}", handle);
            }
            Err(e) => debug!("Channel page for @{} unavailable: {}", handle, e),
        }

        if !self.has_api_key() {
            return Ok(None);
        }

        info!("Resolving @{} through the API", handle);
        let for_handle = format!("@{handle}");
        let response: ListResponse<ChannelResource> = self
            .call(
                "channels",
                CHANNELS_COST,
                &[("part", "snippet,contentDetails"), ("forHandle", &for_handle)],
            )
            .await?;
        Ok(response.items.into_iter().next().map(ChannelInfo::from))
    }

    /// Latest uploads of a channel through its uploads playlist (1 unit).
    pub async fn get_recent_videos(&self, channel_id: &str, max: u32) -> Result<Vec<VideoInfo>> {
        let playlist = uploads_playlist_id(channel_id).ok_or_else(|| {
            FeedwatchError::Validation(format!("not a channel ID: {channel_id}"))
        })?;
        let max = max.clamp(1, MAX_RESULTS).to_string();

        let response: ListResponse<PlaylistItem> = self
            .call(
                "playlistItems",
                PLAYLIST_ITEMS_COST,
                &[
                    ("part", "snippet"),
                    ("playlistId", &playlist),
                    ("maxResults", &max),
                ],
            )
            .await?;

        Ok(response
            .items
            .into_iter()
            .filter_map(|item| {
                let snippet = item.snippet;
                let video_id = snippet.resource_id.video_id?;
                Some(VideoInfo {
                    thumbnail_url: snippet
                        .thumbnails
                        .best()
                        .or_else(|| Some(youtube_thumbnail(&video_id))),
                    video_id,
                    title: snippet.title,
                    description: snippet.description.filter(|d| !d.is_empty()),
                    published_at: snippet.published_at,
                    duration: None,
                })
            })
            .collect())
    }

    /// Details for up to 50 videos in one call (1 unit).
    pub async fn get_video_details(&self, video_ids: &[&str]) -> Result<Vec<VideoInfo>> {
        if video_ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids = video_ids
            .iter()
            .take(MAX_RESULTS as usize)
            .copied()
            .collect::<Vec<_>>()
            .join(",");

        let response: ListResponse<VideoResource> = self
            .call(
                "videos",
                VIDEOS_COST,
                &[("part", "snippet,contentDetails"), ("id", &ids)],
            )
            .await?;
        Ok(response.items.into_iter().map(VideoInfo::from).collect())
    }

    /// URL of a channel's public Atom feed.
    pub fn channel_feed_url(&self, channel_id: &str) -> String {
        format!(
            "{}/feeds/videos.xml?channel_id={}",
            self.config.web_base_url.trim_end_matches('/'),
            urlencoding::encode(channel_id)
        )
    }

    /// Latest uploads from the public channel feed (0 units).
    pub async fn get_feed_videos(&self, channel_id: &str) -> Result<Vec<VideoInfo>> {
        let feed = self
            .fetcher
            .get_feed(&self.channel_feed_url(channel_id))
            .await?;

        Ok(feed
            .map(|f| f.items)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|item| {
                let video_id = youtube_video_id(&item.url)?;
                Some(VideoInfo {
                    thumbnail_url: item
                        .thumbnail_url
                        .or_else(|| Some(youtube_thumbnail(&video_id))),
                    video_id,
                    title: item.title,
                    description: item.excerpt,
                    published_at: item.published_at,
                    duration: None,
                })
            })
            .collect())
    }
}

impl std::fmt::Debug for YouTubeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("YouTubeClient")
            .field("api_base_url", &self.config.api_base_url)
            .field("has_api_key", &self.has_api_key())
            .finish()
    }
}
