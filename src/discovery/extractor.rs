//! Heuristic article extraction from rendered HTML.
//!
//! For sites without a feed: find the repeated DOM pattern that lists
//! articles and turn each occurrence into a pseudo-feed item.

use chrono::{DateTime, Utc};
use scraper::{ElementRef, Html, Selector};

use crate::datetime::parse_loose;
use crate::feed::normalize::resolve_url;
use crate::feed::parser::strip_html;
use crate::feed::types::ParsedItem;

/// Article container selectors, most specific first.
pub const CONTAINER_SELECTORS: &[&str] = &[
    "article",
    "[role=\"article\"]",
    ".post",
    ".news-item",
    ".entry",
    ".blog-post",
    ".story",
    "[class*=\"article\"]",
    "[class*=\"post\"]",
    "[class*=\"news\"]",
];

/// Matches needed before a container selector is trusted.
pub const MIN_CONTAINER_MATCHES: usize = 3;

/// Cap on articles taken from one page.
pub const MAX_ARTICLES: usize = 20;

/// Minimum subtitle length in characters.
const MIN_SUBTITLE_LEN: usize = 20;

const TITLE_SELECTORS: &[&str] = &[
    "h1 a",
    "h2 a",
    "h3 a",
    "h4 a",
    ".title a",
    ".headline a",
    "a.title",
    "a.headline",
    "h1",
    "h2",
    "h3",
    "h4",
    ".title",
    ".headline",
];

const SUBTITLE_SELECTORS: &[&str] = &["p", ".excerpt", ".summary", ".description", ".subtitle"];

/// (selector, attribute) pairs for the published date; `None` reads text.
const DATE_SELECTORS: &[(&str, Option<&str>)] = &[
    ("time[datetime]", Some("datetime")),
    (".date", None),
    (".published", None),
    ("[datetime]", Some("datetime")),
    ("[data-date]", Some("data-date")),
];

/// An article found on a listing page.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedArticle {
    pub title: String,
    pub link: String,
    pub subtitle: Option<String>,
    pub image_url: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

impl From<ExtractedArticle> for ParsedItem {
    fn from(article: ExtractedArticle) -> Self {
        ParsedItem {
            url: article.link,
            canonical_url: None,
            title: article.title,
            excerpt: article.subtitle,
            thumbnail_url: article.image_url,
            author: None,
            published_at: article.published_at,
        }
    }
}

fn element_text(element: &ElementRef<'_>) -> String {
    element
        .text()
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// The first container selector matching at least [`MIN_CONTAINER_MATCHES`] elements.
pub fn choose_container_selector(document: &Html) -> Option<&'static str> {
    CONTAINER_SELECTORS.iter().copied().find(|s| {
        Selector::parse(s)
            .map(|selector| document.select(&selector).count() >= MIN_CONTAINER_MATCHES)
            .unwrap_or(false)
    })
}

fn anchor_href<'a>(element: &ElementRef<'a>) -> Option<&'a str> {
    if element.value().name() == "a" {
        return element.value().attr("href");
    }
    // Title inside a link, e.g. <a><h2>...</h2></a>
    element
        .ancestors()
        .filter_map(ElementRef::wrap)
        .find(|e| e.value().name() == "a")
        .and_then(|a| a.value().attr("href"))
        .or_else(|| {
            let selector = Selector::parse("a[href]").ok()?;
            element
                .select(&selector)
                .next()
                .and_then(|a| a.value().attr("href"))
        })
}

fn extract_title(container: &ElementRef<'_>) -> Option<(String, Option<String>)> {
    for s in TITLE_SELECTORS {
        let Ok(selector) = Selector::parse(s) else {
            continue;
        };
        for element in container.select(&selector) {
            let text = element_text(&element);
            if text.is_empty() {
                continue;
            }
            return Some((text, anchor_href(&element).map(str::to_string)));
        }
    }
    None
}

fn extract_subtitle(container: &ElementRef<'_>, title: &str) -> Option<String> {
    SUBTITLE_SELECTORS
        .iter()
        .filter_map(|s| Selector::parse(s).ok())
        .flat_map(|selector| {
            container
                .select(&selector)
                .map(|e| strip_html(&e.inner_html()))
                .collect::<Vec<_>>()
        })
        .find(|text| text.chars().count() > MIN_SUBTITLE_LEN && text != title)
}

fn extract_image<'a>(container: &ElementRef<'a>) -> Option<&'a str> {
    let selector = Selector::parse("img").ok()?;
    let img = container.select(&selector).next()?;
    ["src", "data-src"]
        .iter()
        .filter_map(|attr| img.value().attr(attr))
        .map(str::trim)
        .find(|v| !v.is_empty() && !v.starts_with("data:"))
}

fn extract_date(container: &ElementRef<'_>) -> Option<DateTime<Utc>> {
    DATE_SELECTORS.iter().find_map(|(s, attr)| {
        let selector = Selector::parse(s).ok()?;
        let element = container.select(&selector).next()?;
        let raw = match attr {
            Some(attr) => element.value().attr(attr)?.to_string(),
            None => element_text(&element),
        };
        parse_loose(&raw)
    })
}

fn extract_article(container: &ElementRef<'_>, base_url: &str) -> Option<ExtractedArticle> {
    let (title, title_link) = extract_title(container)?;
    let href = match title_link {
        Some(href) => href,
        None => {
            let selector = Selector::parse("a[href]").ok()?;
            container
                .select(&selector)
                .next()?
                .value()
                .attr("href")?
                .to_string()
        }
    };
    let link = resolve_url(Some(base_url), &href)?;

    Some(ExtractedArticle {
        subtitle: extract_subtitle(container, &title),
        image_url: extract_image(container).and_then(|src| resolve_url(Some(base_url), src)),
        published_at: extract_date(container),
        title,
        link,
    })
}

/// Extract up to [`MAX_ARTICLES`] articles from a listing page.
///
/// Articles lacking a title or a resolvable link are skipped, as are repeats
/// of a link already taken.
pub fn extract_articles(html: &str, base_url: &str) -> Vec<ExtractedArticle> {
    let document = Html::parse_document(html);
    let Some(container) = choose_container_selector(&document) else {
        return Vec::new();
    };
    let Ok(selector) = Selector::parse(container) else {
        return Vec::new();
    };

    let mut articles: Vec<ExtractedArticle> = Vec::new();
    for element in document.select(&selector) {
        if articles.len() >= MAX_ARTICLES {
            break;
        }
        if let Some(article) = extract_article(&element, base_url) {
            if !articles.iter().any(|a| a.link == article.link) {
                articles.push(article);
            }
        }
    }
    articles
}
