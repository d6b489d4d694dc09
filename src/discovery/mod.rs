//! Finding content on sites: feed endpoint discovery and heuristic article
//! extraction for sites without a feed.

pub mod extractor;
pub mod rss;

pub use extractor::{
    choose_container_selector, extract_articles, ExtractedArticle, CONTAINER_SELECTORS,
    MAX_ARTICLES, MIN_CONTAINER_MATCHES,
};
pub use rss::{find_feed_links, FeedDiscoverer, CONVENTIONAL_FEED_PATHS};
