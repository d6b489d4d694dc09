//! Channel ID resolution from a channel page, without API units.

use std::sync::OnceLock;

use regex::Regex;
use scraper::{Html, Selector};

fn channel_path_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"/channel/(UC[A-Za-z0-9_-]{22})").expect("channel path regex is valid")
    })
}

fn channel_param_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"[?&]channel_id=(UC[A-Za-z0-9_-]{22})").expect("channel param regex is valid")
    })
}

fn channel_json_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#""(?:channelId|externalId)"\s*:\s*"(UC[A-Za-z0-9_-]{22})""#)
            .expect("channel JSON regex is valid")
    })
}

/// Whether `s` looks like a `UC...` channel ID.
pub fn is_channel_id(s: &str) -> bool {
    s.len() == 24
        && s.starts_with("UC")
        && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Reduce user input to a bare handle: `@name`, `name` or a channel URL.
pub fn normalize_handle(input: &str) -> Option<String> {
    let input = input.trim();
    let handle = match input.find("/@") {
        Some(pos) => &input[pos + 2..],
        None => input.trim_start_matches('@'),
    };
    let handle = handle
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default()
        .trim();
    if handle.is_empty()
        || !handle
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.'))
    {
        return None;
    }
    Some(handle.to_string())
}

fn first_attr(document: &Html, selector: &str, attr: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    document
        .select(&selector)
        .find_map(|e| e.value().attr(attr))
        .map(str::to_string)
}

/// Channel ID from a channel page.
///
/// Sources in priority order: canonical link, RSS alternate link, `og:url`,
/// embedded metadata JSON.
pub fn extract_channel_id(html: &str) -> Option<String> {
    let document = Html::parse_document(html);

    let from_path = |url: Option<String>| {
        url.and_then(|u| channel_path_regex().captures(&u).map(|c| c[1].to_string()))
    };

    from_path(first_attr(&document, "link[rel='canonical']", "href"))
        .or_else(|| {
            first_attr(&document, "link[type='application/rss+xml']", "href")
                .and_then(|u| channel_param_regex().captures(&u).map(|c| c[1].to_string()))
        })
        .or_else(|| from_path(first_attr(&document, "meta[property='og:url']", "content")))
        .or_else(|| {
            channel_json_regex()
                .captures(html)
                .map(|c| c[1].to_string())
        })
}

/// Channel title from a channel page (`og:title`, then `<title>`).
pub fn extract_channel_title(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    first_attr(&document, "meta[property='og:title']", "content")
        .or_else(|| {
            let selector = Selector::parse("title").ok()?;
            document
                .select(&selector)
                .next()
                .map(|e| e.text().collect::<String>())
        })
        .map(|t| t.trim().trim_end_matches(" - YouTube").trim().to_string())
        .filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: &str = "UCaaaaaaaaaaaaaaaaaaaaaa";
    const B: &str = "UCbbbbbbbbbbbbbbbbbbbbbb";
    const C: &str = "UCcccccccccccccccccccccc";
    const D: &str = "UCdddddddddddddddddddddd";

    #[test]
    fn test_is_channel_id() {
        assert!(is_channel_id(A));
        assert!(!is_channel_id("UCshort"));
        assert!(!is_channel_id("@handle"));
    }

    #[test]
    fn test_normalize_handle() {
        assert_eq!(normalize_handle("@Chan").as_deref(), Some("Chan"));
        assert_eq!(normalize_handle("chan.name").as_deref(), Some("chan.name"));
        assert_eq!(
            normalize_handle("https://www.youtube.com/@Chan/videos").as_deref(),
            Some("Chan")
        );
        assert!(normalize_handle("@").is_none());
        assert!(normalize_handle("has space").is_none());
    }

    #[test]
    fn test_priority_canonical_first() {
        let html = format!(
            r#"<html><head>
            <meta property="og:url" content="https://www.youtube.com/channel/{C}">
            <link rel="alternate" type="application/rss+xml" href="https://www.youtube.com/feeds/videos.xml?channel_id={B}">
            <link rel="canonical" href="https://www.youtube.com/channel/{A}">
            </head><body><script>var x = {{"channelId":"{D}"}};</script></body></html>"#
        );
        assert_eq!(extract_channel_id(&html).as_deref(), Some(A));
    }

    #[test]
    fn test_priority_rss_before_og_url() {
        let html = format!(
            r#"<html><head>
            <meta property="og:url" content="https://www.youtube.com/channel/{C}">
            <link rel="alternate" type="application/rss+xml" href="https://www.youtube.com/feeds/videos.xml?channel_id={B}">
            </head></html>"#
        );
        assert_eq!(extract_channel_id(&html).as_deref(), Some(B));
    }

    #[test]
    fn test_og_url_then_json() {
        let html = format!(
            r#"<html><head><meta property="og:url" content="https://www.youtube.com/channel/{C}"></head></html>"#
        );
        assert_eq!(extract_channel_id(&html).as_deref(), Some(C));

        let html = format!(r#"<script>{{"externalId": "{D}", "title": "x"}}</script>"#);
        assert_eq!(extract_channel_id(&html).as_deref(), Some(D));

        assert!(extract_channel_id("<html></html>").is_none());
    }

    #[test]
    fn test_extract_channel_title() {
        let html = r#"<head><title>My Channel - YouTube</title></head>"#;
        assert_eq!(extract_channel_title(html).as_deref(), Some("My Channel"));
        let html = r#"<head><meta property="og:title" content="OG Name"></head>"#;
        assert_eq!(extract_channel_title(html).as_deref(), Some("OG Name"));
    }
}
