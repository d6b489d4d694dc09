//! Feed module for feedwatch.
//!
//! Data model, URL normalization, fingerprints, feed parsing and persistence
//! for native feeds, plus custom aggregate feeds.

pub mod custom;
pub mod fingerprint;
pub mod normalize;
pub mod parser;
pub mod repository;
pub mod sanitize;
pub mod service;
pub mod types;

pub use custom::{CustomFeed, CustomFeedRepository, FeedKind, FeedRef, FeedSource};
pub use fingerprint::{fingerprint, FINGERPRINT_LEN};
pub use normalize::{normalize_url, origin, resolve_url, site_domain};
pub use parser::{parse_feed, strip_html};
pub use repository::{FeedItemRepository, FeedRepository, SubscriptionRepository};
pub use sanitize::sanitize_xml;
pub use service::{FeedService, Subscribed};
pub use types::{
    Feed, FeedItem, FeedStatus, NewFeedItem, ParsedFeed, ParsedItem, ScrapeMethod,
    MAX_EXCERPT_LENGTH,
};
