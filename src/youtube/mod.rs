//! YouTube channel tracking.
//!
//! Channels are resolved from handles or IDs, polled for new uploads and
//! their videos stored once per video ID. Data API consumption is metered
//! against a daily quota.

pub mod client;
pub mod handle;
pub mod quota;
pub mod repository;
pub mod types;

pub use client::YouTubeClient;
pub use handle::{extract_channel_id, is_channel_id, normalize_handle};
pub use quota::QuotaRepository;
pub use repository::{ChannelRepository, NewYouTubeVideo, VideoRepository};
pub use types::{ChannelInfo, QuotaUsage, VideoInfo, YouTubeChannel, YouTubeVideo};
