//! Politeness gate for scraping.
//!
//! Fetches and caches robots.txt per origin, answers allow/deny and
//! crawl-delay queries, and optionally honours `X-Robots-Tag` response
//! headers. A robots.txt that cannot be fetched allows everything.

use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;
use reqwest::header::HeaderMap;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::http::HttpFetcher;
use crate::feed::normalize::origin;

/// Message stored on feeds refused by robots.txt.
pub const ROBOTS_BLOCKED_MESSAGE: &str = "Blocked by robots.txt";

/// Message stored on feeds refused by an `X-Robots-Tag` header.
pub const ROBOTS_TAG_BLOCKED_MESSAGE: &str = "Blocked by X-Robots-Tag header";

/// Upper bound on an honoured crawl-delay.
const MAX_CRAWL_DELAY: Duration = Duration::from_secs(30);

/// How long an allow-all entry from a failed fetch is cached.
const FAILED_FETCH_TTL: Duration = Duration::from_secs(60 * 60);

/// Outcome of a politeness check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolitenessDecision {
    Allowed,
    Blocked(String),
}

impl PolitenessDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, PolitenessDecision::Allowed)
    }
}

/// Parsed robots.txt rules for one user agent.
#[derive(Debug, Clone)]
pub struct RobotsRules {
    disallow: Vec<String>,
    allow: Vec<String>,
    crawl_delay: Option<Duration>,
    fetched_at: Instant,
    ttl: Duration,
}

impl RobotsRules {
    /// Parse robots.txt content for the given agent token.
    ///
    /// A group naming the agent replaces the `*` group entirely.
    pub fn parse(content: &str, agent: &str, ttl: Duration) -> Self {
        let agent = agent.to_lowercase();
        let mut disallow = Vec::new();
        let mut allow = Vec::new();
        let mut crawl_delay = None;

        let mut applies = false;
        let mut found_specific = false;
        let mut in_agent_lines = false;

        for line in content.lines() {
            let line = line.split('#').next().unwrap_or_default().trim();
            if line.is_empty() {
                continue;
            }
            let Some((directive, value)) = line.split_once(':') else {
                continue;
            };
            let directive = directive.trim().to_lowercase();
            let value = value.trim();

            if directive == "user-agent" {
                let named = value.to_lowercase();
                let matches_specific = !agent.is_empty() && named != "*" && agent.contains(&named);
                // Consecutive user-agent lines form one group.
                let group_applies = if named == "*" {
                    !found_specific
                } else {
                    matches_specific
                };
                if matches_specific && !found_specific {
                    found_specific = true;
                    disallow.clear();
                    allow.clear();
                    crawl_delay = None;
                }
                applies = if in_agent_lines {
                    applies || group_applies
                } else {
                    group_applies
                };
                in_agent_lines = true;
                continue;
            }
            in_agent_lines = false;

            if !applies {
                continue;
            }
            match directive.as_str() {
                "disallow" if !value.is_empty() => disallow.push(value.to_string()),
                "allow" if !value.is_empty() => allow.push(value.to_string()),
                "crawl-delay" => {
                    if let Ok(secs) = value.parse::<f64>() {
                        if secs.is_finite() && secs >= 0.0 {
                            crawl_delay = Some(Duration::from_secs_f64(secs).min(MAX_CRAWL_DELAY));
                        }
                    }
                }
                _ => {}
            }
        }

        Self {
            disallow,
            allow,
            crawl_delay,
            fetched_at: Instant::now(),
            ttl,
        }
    }

    /// Rules that allow everything.
    pub fn allow_all(ttl: Duration) -> Self {
        Self {
            disallow: Vec::new(),
            allow: Vec::new(),
            crawl_delay: None,
            fetched_at: Instant::now(),
            ttl,
        }
    }

    /// Whether `path` (with query) may be fetched. Longest match wins; a tie allows.
    pub fn is_allowed(&self, path: &str) -> bool {
        let longest = |patterns: &[String]| {
            patterns
                .iter()
                .filter(|p| path_matches(path, p))
                .map(String::len)
                .max()
                .unwrap_or(0)
        };
        longest(&self.allow) >= longest(&self.disallow)
    }

    pub fn crawl_delay(&self) -> Option<Duration> {
        self.crawl_delay
    }

    fn is_fresh(&self) -> bool {
        self.fetched_at.elapsed() < self.ttl
    }
}

/// Match a robots.txt path pattern supporting `*` and a trailing `$`.
fn path_matches(path: &str, pattern: &str) -> bool {
    if pattern.is_empty() {
        return false;
    }
    let (pattern, anchored) = match pattern.strip_suffix('$') {
        Some(p) => (p, true),
        None => (pattern, false),
    };

    if !pattern.contains('*') {
        return if anchored {
            path == pattern
        } else {
            path.starts_with(pattern)
        };
    }

    let mut pos = 0;
    for (i, part) in pattern.split('*').enumerate() {
        if part.is_empty() {
            continue;
        }
        match path[pos..].find(part) {
            Some(found) if i == 0 && found != 0 => return false,
            Some(found) => pos += found + part.len(),
            None => return false,
        }
    }
    !anchored || pos == path.len() || pattern.ends_with('*')
}

/// Whether an `X-Robots-Tag` header set forbids indexing for `agent`.
///
/// Directives may be prefixed with a bot name (`otherbot: noindex`); those
/// only apply when the name matches `agent`.
pub fn robots_tag_blocks(headers: &HeaderMap, agent: &str) -> bool {
    let agent = agent.to_lowercase();
    headers
        .get_all("x-robots-tag")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|value| {
            let value = value.to_lowercase();
            let directives = match value.split_once(':') {
                Some((bot, rest)) if !is_robots_directive(bot.trim()) => {
                    if bot.trim() != agent {
                        return false;
                    }
                    rest.to_string()
                }
                _ => value,
            };
            directives
                .split(',')
                .map(str::trim)
                .any(|d| d == "noindex" || d == "none")
        })
}

fn is_robots_directive(token: &str) -> bool {
    matches!(
        token,
        "all"
            | "noindex"
            | "nofollow"
            | "none"
            | "noarchive"
            | "nosnippet"
            | "notranslate"
            | "noimageindex"
            | "unavailable_after"
            | "max-snippet"
            | "max-image-preview"
            | "max-video-preview"
    )
}

/// Product token of a user agent (`feedwatch/0.1 (...)` -> `feedwatch`).
pub fn agent_token(user_agent: &str) -> String {
    user_agent
        .split(['/', ' '])
        .next()
        .unwrap_or_default()
        .to_lowercase()
}

/// Robots.txt cache and per-origin pacing.
///
/// Both per-origin maps are bounded; the least recently used origin is
/// evicted first.
pub struct PolitenessGate {
    fetcher: HttpFetcher,
    agent: String,
    ttl: Duration,
    respect_robots_tag: bool,
    robots: Mutex<LruCache<String, RobotsRules>>,
    last_fetch: Mutex<LruCache<String, Instant>>,
}

impl PolitenessGate {
    pub fn new(fetcher: HttpFetcher) -> Self {
        let config = fetcher.config();
        let agent = agent_token(&config.user_agent);
        let ttl = Duration::from_secs(config.robots_cache_ttl_secs);
        let respect_robots_tag = config.respect_robots_tag;
        let capacity = NonZeroUsize::new(config.robots_cache_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            fetcher,
            agent,
            ttl,
            respect_robots_tag,
            robots: Mutex::new(LruCache::new(capacity)),
            last_fetch: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Rules for the origin of `url`, fetched on a cache miss.
    async fn rules_for(&self, origin: &str) -> RobotsRules {
        if let Some(rules) = self.robots.lock().await.get(origin) {
            if rules.is_fresh() {
                return rules.clone();
            }
        }

        let robots_url = format!("{}/robots.txt", origin);
        let timeout = self.fetcher.config().robots_timeout();
        let rules = match self.fetcher.get(&robots_url, timeout).await {
            Ok(response) if response.status.is_success() => {
                RobotsRules::parse(&response.text(), &self.agent, self.ttl)
            }
            Ok(response) => {
                debug!("robots.txt for {} returned {}, allowing all", origin, response.status);
                RobotsRules::allow_all(self.ttl)
            }
            Err(e) => {
                debug!("robots.txt for {} unavailable ({}), allowing all", origin, e);
                RobotsRules::allow_all(FAILED_FETCH_TTL.min(self.ttl))
            }
        };

        self.robots.lock().await.put(origin.to_string(), rules.clone());
        rules
    }

    /// Whether robots.txt allows fetching `url`.
    pub async fn is_allowed(&self, url: &str) -> bool {
        let Ok(parsed) = url::Url::parse(url) else {
            return true;
        };
        let Some(origin) = origin(url) else {
            return true;
        };
        let mut path = parsed.path().to_string();
        if let Some(query) = parsed.query() {
            path.push('?');
            path.push_str(query);
        }
        self.rules_for(&origin).await.is_allowed(&path)
    }

    /// Crawl-delay declared for the origin of `url`.
    pub async fn crawl_delay(&self, url: &str) -> Option<Duration> {
        let origin = origin(url)?;
        self.rules_for(&origin).await.crawl_delay()
    }

    /// Full check before scraping a site: robots.txt, then `X-Robots-Tag`.
    pub async fn check(&self, url: &str) -> PolitenessDecision {
        if !self.is_allowed(url).await {
            info!("{} disallowed by robots.txt", url);
            return PolitenessDecision::Blocked(ROBOTS_BLOCKED_MESSAGE.to_string());
        }

        if self.respect_robots_tag {
            let timeout = self.fetcher.config().robots_timeout();
            match self.fetcher.head(url, timeout).await {
                Ok((_, headers)) if robots_tag_blocks(&headers, &self.agent) => {
                    info!("{} refused by X-Robots-Tag", url);
                    return PolitenessDecision::Blocked(ROBOTS_TAG_BLOCKED_MESSAGE.to_string());
                }
                Ok(_) => {}
                Err(e) => debug!("HEAD {} failed ({}), ignoring X-Robots-Tag", url, e),
            }
        }

        PolitenessDecision::Allowed
    }

    /// Number of origins with cached robots.txt rules.
    pub async fn cached_origins(&self) -> usize {
        self.robots.lock().await.len()
    }

    /// Sleep until the origin's crawl-delay has passed since the previous
    /// request to it, then record this request.
    pub async fn wait_turn(&self, url: &str) {
        let Some(origin) = origin(url) else {
            return;
        };
        let delay = self.crawl_delay(url).await.unwrap_or(Duration::ZERO);

        let wait = {
            let mut last = self.last_fetch.lock().await;
            let now = Instant::now();
            let wait = last
                .get(&origin)
                .map(|prev| delay.saturating_sub(now.duration_since(*prev)))
                .unwrap_or(Duration::ZERO);
            last.put(origin.clone(), now + wait);
            wait
        };

        if !wait.is_zero() {
            debug!("Waiting {:?} for crawl-delay of {}", wait, origin);
            tokio::time::sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FetchConfig;
    use reqwest::header::HeaderValue;

    const TTL: Duration = Duration::from_secs(3600);

    fn gate() -> PolitenessGate {
        let config = FetchConfig {
            allow_private_hosts: true,
            requests_per_second: 100,
            ..Default::default()
        };
        PolitenessGate::new(HttpFetcher::new(&config).unwrap())
    }

    #[test]
    fn test_agent_token() {
        assert_eq!(agent_token("feedwatch/0.1 (+https://x)"), "feedwatch");
        assert_eq!(agent_token("Mozilla/5.0"), "mozilla");
    }

    #[test]
    fn test_robots_specific_group_wins() {
        let content = "\
User-agent: *
Disallow: /private/
Crawl-delay: 2

User-agent: feedwatch
Disallow: /admin/
Crawl-delay: 1
";
        let rules = RobotsRules::parse(content, "feedwatch", TTL);
        assert!(rules.is_allowed("/public/page.html"));
        assert!(!rules.is_allowed("/admin/settings"));
        assert!(rules.is_allowed("/private/test"));
        assert_eq!(rules.crawl_delay(), Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_robots_wildcard_group() {
        let content = "\
User-agent: otherbot
Disallow: /

User-agent: *
Disallow: /private/
Disallow: /*.pdf$
Allow: /private/readme.txt
";
        let rules = RobotsRules::parse(content, "feedwatch", TTL);
        assert!(rules.is_allowed("/public/page.html"));
        assert!(!rules.is_allowed("/private/secret"));
        assert!(rules.is_allowed("/private/readme.txt"));
        assert!(!rules.is_allowed("/docs/manual.pdf"));
        assert!(rules.is_allowed("/docs/manual.pdf?download=1"));
    }

    #[test]
    fn test_robots_grouped_agents() {
        let content = "\
User-agent: feedwatch
User-agent: otherbot
Disallow: /
";
        let rules = RobotsRules::parse(content, "feedwatch", TTL);
        assert!(!rules.is_allowed("/anything"));
    }

    #[test]
    fn test_robots_empty_disallow_allows() {
        let rules = RobotsRules::parse("User-agent: *\nDisallow:\n", "feedwatch", TTL);
        assert!(rules.is_allowed("/"));
    }

    #[test]
    fn test_path_matches() {
        assert!(path_matches("/admin/test", "/admin/"));
        assert!(!path_matches("/public/test", "/admin/"));
        assert!(path_matches("/images/cat.jpg", "/images/*.jpg"));
        assert!(path_matches("/page.html", "/page.html$"));
        assert!(!path_matches("/page.html?query", "/page.html$"));
        assert!(path_matches("/anything", "/*"));
    }

    #[test]
    fn test_robots_tag_blocks() {
        let mut headers = HeaderMap::new();
        assert!(!robots_tag_blocks(&headers, "feedwatch"));

        headers.insert("x-robots-tag", HeaderValue::from_static("noarchive, NoIndex"));
        assert!(robots_tag_blocks(&headers, "feedwatch"));

        headers.insert("x-robots-tag", HeaderValue::from_static("otherbot: none"));
        assert!(!robots_tag_blocks(&headers, "feedwatch"));

        headers.insert("x-robots-tag", HeaderValue::from_static("feedwatch: none"));
        assert!(robots_tag_blocks(&headers, "feedwatch"));

        headers.insert(
            "x-robots-tag",
            HeaderValue::from_static("unavailable_after: 25 Jun 2030 15:00:00 PST"),
        );
        assert!(!robots_tag_blocks(&headers, "feedwatch"));
    }

    #[tokio::test]
    async fn test_gate_disallow() {
        let mut server = mockito::Server::new_async().await;
        let robots = server
            .mock("GET", "/robots.txt")
            .with_status(200)
            .with_body("User-agent: *\nDisallow: /\n")
            .expect(1)
            .create_async()
            .await;

        let gate = gate();
        let url = format!("{}/news", server.url());
        assert!(!gate.is_allowed(&url).await);
        assert_eq!(
            gate.check(&url).await,
            PolitenessDecision::Blocked(ROBOTS_BLOCKED_MESSAGE.to_string())
        );
        // Second lookup hits the cache.
        robots.assert_async().await;
    }

    #[tokio::test]
    async fn test_robots_cache_evicts_least_recent_origin() {
        let mut first = mockito::Server::new_async().await;
        let mut second = mockito::Server::new_async().await;
        let first_robots = first
            .mock("GET", "/robots.txt")
            .with_status(200)
            .with_body("User-agent: *\nDisallow: /private/\n")
            .expect(2)
            .create_async()
            .await;
        let _second_robots = second
            .mock("GET", "/robots.txt")
            .with_status(200)
            .with_body("User-agent: *\nDisallow:\n")
            .create_async()
            .await;

        let config = FetchConfig {
            allow_private_hosts: true,
            requests_per_second: 100,
            robots_cache_capacity: 1,
            ..Default::default()
        };
        let gate = PolitenessGate::new(HttpFetcher::new(&config).unwrap());

        let url = format!("{}/private/x", first.url());
        assert!(!gate.is_allowed(&url).await);
        assert!(!gate.is_allowed(&url).await);
        assert!(gate.is_allowed(&format!("{}/page", second.url())).await);
        assert_eq!(gate.cached_origins().await, 1);

        // First origin was evicted, so its robots.txt is fetched again.
        assert!(!gate.is_allowed(&url).await);
        first_robots.assert_async().await;
    }

    #[tokio::test]
    async fn test_gate_missing_robots_allows() {
        let mut server = mockito::Server::new_async().await;
        let _robots = server
            .mock("GET", "/robots.txt")
            .with_status(404)
            .create_async()
            .await;
        let _head = server
            .mock("HEAD", "/news")
            .with_status(200)
            .create_async()
            .await;

        let gate = gate();
        assert!(gate.check(&format!("{}/news", server.url())).await.is_allowed());
    }

    #[tokio::test]
    async fn test_gate_unreachable_robots_allows() {
        let gate = gate();
        // Nothing listens on port 1.
        assert!(gate.is_allowed("http://127.0.0.1:1/news").await);
    }

    #[tokio::test]
    async fn test_gate_robots_tag() {
        let mut server = mockito::Server::new_async().await;
        let _robots = server
            .mock("GET", "/robots.txt")
            .with_status(200)
            .with_body("User-agent: *\nAllow: /\n")
            .create_async()
            .await;
        let _head = server
            .mock("HEAD", "/")
            .with_status(200)
            .with_header("x-robots-tag", "noindex, nofollow")
            .create_async()
            .await;

        let gate = gate();
        assert_eq!(
            gate.check(&format!("{}/", server.url())).await,
            PolitenessDecision::Blocked(ROBOTS_TAG_BLOCKED_MESSAGE.to_string())
        );
    }

    #[tokio::test]
    async fn test_wait_turn_honours_crawl_delay() {
        let mut server = mockito::Server::new_async().await;
        let _robots = server
            .mock("GET", "/robots.txt")
            .with_status(200)
            .with_body("User-agent: *\nCrawl-delay: 0.2\n")
            .create_async()
            .await;

        let gate = gate();
        let url = format!("{}/a", server.url());
        let start = Instant::now();
        gate.wait_turn(&url).await;
        gate.wait_turn(&url).await;
        assert!(start.elapsed() >= Duration::from_millis(180));
    }
}
