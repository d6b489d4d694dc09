//! RSS/Atom parsing into [`ParsedFeed`].
//!
//! Input is run through [`sanitize_xml`] first, then handed to `feed-rs`.
//! Items with neither a link nor a guid are dropped; a document that yields
//! no items at all parses to `None`.

use std::collections::HashSet;
use std::sync::OnceLock;

use feed_rs::model::{Entry, Link, MediaContent};
use feed_rs::parser;
use regex::Regex;

use crate::error::{FeedwatchError, Result};
use crate::feed::normalize::{origin, resolve_url};
use crate::feed::sanitize::sanitize_xml;
use crate::feed::types::{truncate_excerpt, ParsedFeed, ParsedItem};

fn img_src_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)<img\b[^>]*?\bsrc\s*=\s*["']([^"']+)["']"#).expect("img regex is valid")
    })
}

fn enclosure_url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)<enclosure\b[^>]*?\burl\s*=\s*["']([^"']+)["']"#)
            .expect("enclosure regex is valid")
    })
}

fn youtube_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?:youtube\.com/(?:watch\?(?:[^#]*&)?v=|shorts/|embed/|live/)|youtu\.be/)([A-Za-z0-9_-]{11})",
        )
        .expect("youtube regex is valid")
    })
}

/// Extract an 11-character YouTube video id from a watch/short/embed URL.
pub fn youtube_video_id(url: &str) -> Option<String> {
    youtube_id_regex()
        .captures(url)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Thumbnail URL YouTube serves for a video id.
pub fn youtube_thumbnail(video_id: &str) -> String {
    format!("https://i.ytimg.com/vi/{video_id}/hqdefault.jpg")
}

/// Parse feed bytes.
///
/// `feed_url` is where the document was fetched from; its origin is the
/// fallback base for relative links when the feed declares no `<link>`.
///
/// Returns `Ok(None)` when the document parses but contains no valid items.
pub fn parse_feed(bytes: &[u8], feed_url: Option<&str>) -> Result<Option<ParsedFeed>> {
    let text = String::from_utf8_lossy(bytes);
    let sanitized = sanitize_xml(&text);

    // No synthesized ids: an empty entry id means the source had no guid.
    let feed = parser::Builder::new()
        .id_generator(|_links, _title, _uri| String::new())
        .build()
        .parse(sanitized.as_bytes())
        .map_err(|e| FeedwatchError::Parse(format!("failed to parse feed: {}", e)))?;

    // feed-rs folds RSS enclosures into media content; remember which URLs
    // came from enclosures so they rank after media:content.
    let enclosures: HashSet<String> = enclosure_url_regex()
        .captures_iter(&sanitized)
        .filter_map(|caps| caps.get(1))
        .filter_map(|m| url::Url::parse(&decode_entities(m.as_str())).ok())
        .map(String::from)
        .collect();

    let fallback_base = feed_url.and_then(origin);
    let link = pick_link(&feed.links)
        .and_then(|href| resolve_url(fallback_base.as_deref().or(feed_url), href));
    let base = link.clone().or(fallback_base);

    let title = feed
        .title
        .map(|t| strip_html(&t.content))
        .filter(|t| !t.is_empty());
    let description = feed
        .description
        .map(|d| strip_html(&d.content))
        .filter(|d| !d.is_empty());

    let items: Vec<ParsedItem> = feed
        .entries
        .iter()
        .filter_map(|entry| parse_entry(entry, base.as_deref(), &enclosures))
        .collect();

    if items.is_empty() {
        return Ok(None);
    }

    Ok(Some(ParsedFeed {
        title,
        description,
        link,
        items,
    }))
}

/// Prefer the alternate (HTML) link over `self`/`hub` relations.
fn pick_link(links: &[Link]) -> Option<&str> {
    links
        .iter()
        .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
        .or_else(|| links.first())
        .map(|l| l.href.as_str())
}

fn parse_entry(entry: &Entry, base: Option<&str>, enclosures: &HashSet<String>) -> Option<ParsedItem> {
    // Without a link the guid is the item's identity, kept verbatim when
    // it is not an absolute http(s) URL.
    let url = pick_link(&entry.links)
        .and_then(|href| resolve_url(base, href))
        .or_else(|| {
            let guid = entry.id.trim();
            if guid.is_empty() {
                return None;
            }
            let absolute = url::Url::parse(guid)
                .ok()
                .filter(|u| matches!(u.scheme(), "http" | "https"))
                .map(String::from);
            Some(absolute.unwrap_or_else(|| guid.to_string()))
        })?;

    let title = entry
        .title
        .as_ref()
        .map(|t| strip_html(&t.content))
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "Untitled".to_string());

    let body_html = entry.content.as_ref().and_then(|c| c.body.clone());
    let summary_html = entry.summary.as_ref().map(|s| s.content.clone());

    let excerpt = body_html
        .iter()
        .chain(summary_html.iter())
        .map(|html| strip_html(html))
        .find(|text| !text.is_empty())
        .map(|text| truncate_excerpt(&text));

    let thumbnail_url = resolve_thumbnail(entry, &url, enclosures, &[body_html, summary_html])
        .and_then(|thumb| resolve_url(base, &thumb));

    let author = entry
        .authors
        .first()
        .map(|a| a.name.trim().to_string())
        .filter(|a| !a.is_empty());

    Some(ParsedItem {
        url,
        canonical_url: None,
        title,
        excerpt,
        thumbnail_url,
        author,
        published_at: entry.published.or(entry.updated),
    })
}

/// Thumbnail resolution order: media thumbnails (including those inside
/// media groups), image or untyped media content, a YouTube-derived image,
/// image enclosures, then the first `<img>` in the entry HTML.
fn resolve_thumbnail(
    entry: &Entry,
    url: &str,
    enclosures: &HashSet<String>,
    html: &[Option<String>],
) -> Option<String> {
    let media_thumbnail = entry
        .media
        .iter()
        .flat_map(|m| m.thumbnails.iter())
        .map(|t| t.image.uri.clone())
        .find(|uri| !uri.is_empty());
    if media_thumbnail.is_some() {
        return media_thumbnail;
    }

    let (from_enclosures, media_contents): (Vec<&MediaContent>, Vec<&MediaContent>) = entry
        .media
        .iter()
        .flat_map(|m| m.content.iter())
        .filter(|c| c.url.is_some())
        .partition(|c| {
            c.url
                .as_ref()
                .is_some_and(|u| enclosures.contains(u.as_str()))
        });

    let media_content = media_contents
        .iter()
        .find(|c| c.content_type.as_ref().map_or(true, |ct| is_image_type(ct)))
        .and_then(|c| c.url.as_ref())
        .map(|u| u.to_string());
    if media_content.is_some() {
        return media_content;
    }

    if let Some(video_id) = youtube_video_id(url) {
        return Some(youtube_thumbnail(&video_id));
    }

    let image_enclosure = from_enclosures
        .iter()
        .find(|c| c.content_type.as_ref().is_some_and(|ct| is_image_type(ct)))
        .and_then(|c| c.url.as_ref())
        .map(|u| u.to_string());
    if image_enclosure.is_some() {
        return image_enclosure;
    }

    html.iter()
        .flatten()
        .find_map(|h| img_src_regex().captures(h))
        .and_then(|caps| caps.get(1))
        .map(|m| decode_entities(m.as_str()))
}

fn is_image_type(content_type: &impl std::fmt::Display) -> bool {
    content_type.to_string().starts_with("image/")
}

/// Strip HTML tags, decode common entities and collapse whitespace.
pub fn strip_html(html: &str) -> String {
    let mut result = String::with_capacity(html.len());
    let mut in_tag = false;

    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' if in_tag => {
                in_tag = false;
                result.push(' ');
            }
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }

    decode_entities(&result)
        .split_whitespace()
        .collect::<Vec<&str>>()
        .join(" ")
}

/// Decode the XML built-ins, numeric references and the HTML entity table.
fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }

    let mut result = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(pos) = rest.find('&') {
        result.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        let decoded = after.find(';').filter(|&end| end <= 10).and_then(|end| {
            let name = &after[..end];
            decode_entity(name).map(|c| (c, end))
        });
        match decoded {
            Some((c, end)) => {
                result.push(c);
                rest = &after[end + 1..];
            }
            None => {
                result.push('&');
                rest = after;
            }
        }
    }
    result.push_str(rest);
    result
}

fn decode_entity(name: &str) -> Option<char> {
    let code = match name {
        "amp" => Some('&' as u32),
        "lt" => Some('<' as u32),
        "gt" => Some('>' as u32),
        "quot" => Some('"' as u32),
        "apos" => Some('\'' as u32),
        "nbsp" => Some(' ' as u32),
        _ if name.starts_with("#x") || name.starts_with("#X") => {
            u32::from_str_radix(&name[2..], 16).ok()
        }
        _ if name.starts_with('#') => name[1..].parse().ok(),
        _ => crate::feed::sanitize::named_entity(name),
    };
    code.and_then(char::from_u32)
}
