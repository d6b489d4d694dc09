//! Page rendering.
//!
//! The pipeline only needs "give me the HTML of this page and its metadata".
//! [`PageRenderer`] is that seam; [`HttpPageRenderer`] fills it with a plain
//! GET and static HTML parsing. A headless-browser implementation can be
//! swapped in for script-heavy sites.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scraper::{Html, Selector};
use tracing::debug;

use super::http::HttpFetcher;
use super::politeness::{agent_token, robots_tag_blocks};
use crate::datetime::parse_loose;
use crate::feed::normalize::resolve_url;
use crate::Result;

/// A rendered page and the metadata found in it.
#[derive(Debug, Clone, Default)]
pub struct RenderedPage {
    /// URL after redirects.
    pub url: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub thumbnail_url: Option<String>,
    pub author: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub canonical_url: Option<String>,
    pub html: String,
}

/// Renders pages for discovery, extraction and excerpt backfill.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    /// Render a page. `Ok(None)` means the page could not be rendered.
    async fn render(&self, url: &str) -> Result<Option<RenderedPage>>;

    /// Candidate article URLs linked from a page, same host only.
    async fn extract_links(&self, url: &str) -> Result<Vec<String>>;

    /// Whether a HEAD of `url` carries an `X-Robots-Tag` refusing us.
    async fn robots_tag_blocked(&self, url: &str) -> Result<bool>;
}

/// Renderer that fetches static HTML.
pub struct HttpPageRenderer {
    fetcher: HttpFetcher,
}

impl HttpPageRenderer {
    pub fn new(fetcher: HttpFetcher) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl PageRenderer for HttpPageRenderer {
    async fn render(&self, url: &str) -> Result<Option<RenderedPage>> {
        let response = self
            .fetcher
            .get(url, self.fetcher.config().page_timeout())
            .await?;
        if !response.status.is_success() {
            debug!("Render of {} returned {}", url, response.status);
            return Ok(None);
        }
        if let Some(content_type) = &response.content_type {
            if !content_type.contains("html") {
                debug!("Render of {} skipped: {}", url, content_type);
                return Ok(None);
            }
        }
        Ok(Some(extract_metadata(&response.final_url, &response.text())))
    }

    async fn extract_links(&self, url: &str) -> Result<Vec<String>> {
        let response = self
            .fetcher
            .get_success(url, self.fetcher.config().page_timeout())
            .await?;
        Ok(extract_links(&response.final_url, &response.text()))
    }

    async fn robots_tag_blocked(&self, url: &str) -> Result<bool> {
        let (_, headers) = self
            .fetcher
            .head(url, self.fetcher.config().robots_timeout())
            .await?;
        Ok(robots_tag_blocks(
            &headers,
            &agent_token(self.fetcher.user_agent()),
        ))
    }
}

fn select_first_attr(document: &Html, selector: &str, attr: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    document
        .select(&selector)
        .filter_map(|e| e.value().attr(attr))
        .map(str::trim)
        .find(|v| !v.is_empty())
        .map(str::to_string)
}

/// Get meta content by name or property.
fn meta_content(document: &Html, name: &str) -> Option<String> {
    select_first_attr(document, &format!("meta[name='{}']", name), "content")
        .or_else(|| select_first_attr(document, &format!("meta[property='{}']", name), "content"))
}

/// Extract page metadata from static HTML.
pub fn extract_metadata(url: &str, html: &str) -> RenderedPage {
    let document = Html::parse_document(html);
    let resolve = |href: String| resolve_url(Some(url), &href);

    let title = meta_content(&document, "og:title")
        .or_else(|| meta_content(&document, "twitter:title"))
        .or_else(|| {
            let selector = Selector::parse("title").ok()?;
            document
                .select(&selector)
                .next()
                .map(|e| e.text().collect::<String>().trim().to_string())
                .filter(|t| !t.is_empty())
        });

    let description = meta_content(&document, "og:description")
        .or_else(|| meta_content(&document, "description"))
        .or_else(|| meta_content(&document, "twitter:description"));

    let thumbnail_url = meta_content(&document, "og:image")
        .or_else(|| meta_content(&document, "twitter:image"))
        .and_then(resolve);

    let author = meta_content(&document, "author")
        .or_else(|| meta_content(&document, "article:author"))
        .or_else(|| {
            let selector = Selector::parse("[rel='author'], [itemprop='author']").ok()?;
            document
                .select(&selector)
                .next()
                .map(|e| e.text().collect::<String>().trim().to_string())
                .filter(|a| !a.is_empty())
        });

    let published_at = meta_content(&document, "article:published_time")
        .or_else(|| select_first_attr(&document, "time[datetime]", "datetime"))
        .and_then(|s| parse_loose(&s));

    let canonical_url = select_first_attr(&document, "link[rel='canonical']", "href")
        .or_else(|| meta_content(&document, "og:url"))
        .and_then(resolve);

    RenderedPage {
        url: url.to_string(),
        title,
        description,
        thumbnail_url,
        author,
        published_at,
        canonical_url,
        html: html.to_string(),
    }
}

/// Same-host links from a page, in document order, without duplicates.
pub fn extract_links(page_url: &str, html: &str) -> Vec<String> {
    let Ok(page) = url::Url::parse(page_url) else {
        return Vec::new();
    };
    let Ok(selector) = Selector::parse("a[href]") else {
        return Vec::new();
    };
    let document = Html::parse_document(html);

    let mut seen = HashSet::new();
    let mut links = Vec::new();
    for href in document.select(&selector).filter_map(|e| e.value().attr("href")) {
        let Some(resolved) = resolve_url(Some(page_url), href) else {
            continue;
        };
        let Ok(mut parsed) = url::Url::parse(&resolved) else {
            continue;
        };
        parsed.set_fragment(None);
        if parsed.host_str() != page.host_str() || parsed.path() == "/" {
            continue;
        }
        let link = parsed.to_string();
        if link != page.as_str() && seen.insert(link.clone()) {
            links.push(link);
        }
    }
    links
}
