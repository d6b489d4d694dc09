//! Feed endpoint discovery for a bare site URL.
//!
//! Two phases, in order: `<link>` tags in the page HTML, then a fixed list of
//! conventional paths probed one by one until one parses with items.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use tracing::{debug, info};

use crate::feed::normalize::{origin, resolve_url, site_domain};
use crate::fetch::HttpFetcher;

/// Conventional feed locations, probed in this order.
pub const CONVENTIONAL_FEED_PATHS: &[&str] = &[
    "/feed",
    "/rss",
    "/rss.xml",
    "/feed.xml",
    "/atom.xml",
    "/feeds/posts/default",
    "/blog/feed",
];

fn link_tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<link\b[^>]*>").expect("link tag regex is valid"))
}

fn feed_type_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)\btype\s*=\s*["']?\s*application/(?:rss|atom)\+xml"#)
            .expect("feed type regex is valid")
    })
}

fn href_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)\bhref\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#)
            .expect("href regex is valid")
    })
}

/// Feed URLs advertised by `<link type="application/rss+xml|atom+xml">` tags,
/// in document order, resolved against `base_url`.
pub fn find_feed_links(html: &str, base_url: &str) -> Vec<String> {
    let mut links = Vec::new();
    for tag in link_tag_regex().find_iter(html).map(|m| m.as_str()) {
        if !feed_type_regex().is_match(tag) {
            continue;
        }
        let Some(caps) = href_regex().captures(tag) else {
            continue;
        };
        let Some(href) = caps.get(1).or_else(|| caps.get(2)).or_else(|| caps.get(3)) else {
            continue;
        };
        let href = href.as_str().replace("&amp;", "&");
        if let Some(url) = resolve_url(Some(base_url), &href) {
            if !links.contains(&url) {
                links.push(url);
            }
        }
    }
    links
}

/// Locates the machine-readable feed of a site.
pub struct FeedDiscoverer {
    fetcher: HttpFetcher,
    site_overrides: HashMap<String, Vec<String>>,
}

impl FeedDiscoverer {
    pub fn new(fetcher: HttpFetcher, site_overrides: HashMap<String, Vec<String>>) -> Self {
        let site_overrides = site_overrides
            .into_iter()
            .map(|(host, paths)| (host.to_lowercase(), paths))
            .collect();
        Self {
            fetcher,
            site_overrides,
        }
    }

    /// Paths to probe for `site_url`: host overrides first, then the generic list.
    pub fn candidate_paths(&self, site_url: &str) -> Vec<String> {
        let mut paths: Vec<String> = Vec::new();
        if let Some(host) = site_domain(site_url) {
            let bare = host.strip_prefix("www.").unwrap_or(&host).to_string();
            for key in [host.as_str(), bare.as_str()] {
                if let Some(extra) = self.site_overrides.get(key) {
                    paths.extend(extra.iter().cloned());
                }
            }
        }
        paths.extend(CONVENTIONAL_FEED_PATHS.iter().map(|p| p.to_string()));

        let mut unique = Vec::with_capacity(paths.len());
        for path in paths {
            if !unique.contains(&path) {
                unique.push(path);
            }
        }
        unique
    }

    /// Find the feed URL of a site.
    ///
    /// `rendered_html` is the site page when the caller already has it; link
    /// tags found there are taken as authoritative without probing.
    pub async fn discover(&self, site_url: &str, rendered_html: Option<&str>) -> Option<String> {
        if let Some(html) = rendered_html {
            if let Some(url) = find_feed_links(html, site_url).into_iter().next() {
                info!("Discovered feed {} via <link> on {}", url, site_url);
                return Some(url);
            }
        }

        let base = origin(site_url)?;
        for path in self.candidate_paths(site_url) {
            let Some(candidate) = resolve_url(Some(&base), &path) else {
                continue;
            };
            match self.fetcher.get_feed(&candidate).await {
                Ok(Some(feed)) if !feed.items.is_empty() => {
                    info!("Discovered feed {} by probing {}", candidate, site_url);
                    return Some(candidate);
                }
                Ok(_) => debug!("Probe {}: no items", candidate),
                Err(e) => debug!("Probe {}: {}", candidate, e),
            }
        }

        debug!("No feed found for {}", site_url);
        None
    }
}
