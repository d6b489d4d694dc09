//! Outbound HTTP with security measures.
//!
//! Every request made by the pipeline goes through [`HttpFetcher`]: URLs are
//! checked against SSRF rules, bodies are capped, each call carries its own
//! timeout, and a process-wide rate limiter spaces requests out.

use std::net::IpAddr;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use reqwest::header::{HeaderMap, CONTENT_TYPE};
use reqwest::redirect::Policy;
use reqwest::{Client, StatusCode};
use tracing::debug;

use crate::config::FetchConfig;
use crate::feed::parser::parse_feed;
use crate::feed::types::ParsedFeed;
use crate::{FeedwatchError, Result};

/// Global outbound limiter.
type OutboundLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// A completed response with its body read.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: StatusCode,
    /// URL after redirects.
    pub final_url: String,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl FetchResponse {
    /// Body decoded as UTF-8, invalid sequences replaced.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// HTTP fetcher shared by every component of the pipeline.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
    limiter: Arc<OutboundLimiter>,
    config: Arc<FetchConfig>,
}

impl HttpFetcher {
    /// Create a new fetcher.
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .redirect(redirect_policy(config.max_redirects, config.allow_private_hosts))
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(|e| FeedwatchError::Http(format!("failed to create HTTP client: {}", e)))?;

        let rps = NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN);
        let limiter = Arc::new(RateLimiter::direct(Quota::per_second(rps)));

        Ok(Self {
            client,
            limiter,
            config: Arc::new(config.clone()),
        })
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// User agent sent with every request.
    pub fn user_agent(&self) -> &str {
        &self.config.user_agent
    }

    fn check_url(&self, url: &str) -> Result<()> {
        if self.config.allow_private_hosts {
            validate_scheme(url).map(|_| ())
        } else {
            validate_url(url)
        }
    }

    /// GET a URL and read the body whatever the status.
    pub async fn get(&self, url: &str, timeout: Duration) -> Result<FetchResponse> {
        self.check_url(url)?;
        self.limiter.until_ready().await;

        debug!("GET {}", url);
        let mut response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| FeedwatchError::Http(format!("failed to fetch {}: {}", url, e)))?;

        let max = self.config.max_body_bytes;
        if let Some(content_length) = response.content_length() {
            if content_length > max {
                return Err(FeedwatchError::Http(format!(
                    "response too large: {} bytes (max {} bytes)",
                    content_length, max
                )));
            }
        }

        let status = response.status();
        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| FeedwatchError::Http(format!("failed to read response: {}", e)))?
        {
            if (body.len() + chunk.len()) as u64 > max {
                return Err(FeedwatchError::Http(format!(
                    "response too large: more than {} bytes",
                    max
                )));
            }
            body.extend_from_slice(&chunk);
        }

        Ok(FetchResponse {
            status,
            final_url,
            content_type,
            body,
        })
    }

    /// GET a URL, failing on any non-success status.
    pub async fn get_success(&self, url: &str, timeout: Duration) -> Result<FetchResponse> {
        let response = self.get(url, timeout).await?;
        if !response.status.is_success() {
            return Err(FeedwatchError::Http(format!("HTTP error: {}", response.status)));
        }
        Ok(response)
    }

    /// GET a page as text.
    pub async fn get_text(&self, url: &str, timeout: Duration) -> Result<String> {
        Ok(self.get_success(url, timeout).await?.text())
    }

    /// Fetch and parse a feed document.
    ///
    /// `Ok(None)` means the document parsed but held no usable items.
    pub async fn get_feed(&self, url: &str) -> Result<Option<ParsedFeed>> {
        let response = self.get_success(url, self.config.feed_timeout()).await?;
        parse_feed(&response.body, Some(&response.final_url))
    }

    /// HEAD a URL and return its response headers.
    pub async fn head(&self, url: &str, timeout: Duration) -> Result<(StatusCode, HeaderMap)> {
        self.check_url(url)?;
        self.limiter.until_ready().await;

        debug!("HEAD {}", url);
        let response = self
            .client
            .head(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| FeedwatchError::Http(format!("failed to fetch {}: {}", url, e)))?;

        Ok((response.status(), response.headers().clone()))
    }

    /// GET a JSON API endpoint with query parameters.
    pub async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<T> {
        self.check_url(url)?;
        self.limiter.until_ready().await;

        debug!("GET {} (api)", url);
        let response = self
            .client
            .get(url)
            .query(query)
            .timeout(self.config.api_timeout())
            .send()
            .await
            .map_err(|e| FeedwatchError::Http(format!("failed to fetch {}: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FeedwatchError::Http(format!(
                "HTTP error: {} {}",
                status,
                body.chars().take(200).collect::<String>()
            )));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| FeedwatchError::Parse(format!("invalid JSON from {}: {}", url, e)))
    }
}

impl std::fmt::Debug for HttpFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpFetcher")
            .field("user_agent", &self.config.user_agent)
            .field("allow_private_hosts", &self.config.allow_private_hosts)
            .finish()
    }
}

/// Follow at most `max_redirects` hops, applying the URL checks to each.
fn redirect_policy(max_redirects: usize, allow_private_hosts: bool) -> Policy {
    Policy::custom(move |attempt| {
        if attempt.previous().len() > max_redirects {
            return attempt.error(format!("too many redirects (max {})", max_redirects));
        }

        let target = attempt.url().to_string();
        let check = if allow_private_hosts {
            validate_scheme(&target).map(|_| ())
        } else {
            validate_url(&target)
        };
        match check {
            Ok(()) => attempt.follow(),
            Err(e) => attempt.error(format!("redirect to {} refused: {}", target, e)),
        }
    })
}

fn validate_scheme(url: &str) -> Result<url::Url> {
    let parsed =
        url::Url::parse(url).map_err(|e| FeedwatchError::Validation(format!("invalid URL: {}", e)))?;

    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        scheme => Err(FeedwatchError::Validation(format!(
            "unsupported URL scheme: {}",
            scheme
        ))),
    }
}

/// Validate a URL for SSRF protection.
///
/// The URL must use http or https, and its host must not be a private,
/// loopback or reserved address or hostname.
pub fn validate_url(url: &str) -> Result<()> {
    let parsed = validate_scheme(url)?;

    let host = parsed
        .host()
        .ok_or_else(|| FeedwatchError::Validation("URL has no host".to_string()))?;

    match host {
        url::Host::Domain(domain) => {
            if is_forbidden_hostname(domain) {
                return Err(FeedwatchError::Validation(format!(
                    "forbidden host: {}",
                    domain
                )));
            }
        }
        url::Host::Ipv4(ipv4) => check_ip(IpAddr::V4(ipv4))?,
        url::Host::Ipv6(ipv6) => check_ip(IpAddr::V6(ipv6))?,
    }

    Ok(())
}

fn check_ip(ip: IpAddr) -> Result<()> {
    if is_private_ip(&ip) {
        return Err(FeedwatchError::Validation(format!(
            "private IP address not allowed: {}",
            ip
        )));
    }
    Ok(())
}

fn is_forbidden_hostname(host: &str) -> bool {
    const FORBIDDEN_SUFFIXES: &[&str] = &[
        ".local",
        ".localhost",
        ".internal",
        ".intranet",
        ".corp",
        ".home",
        ".lan",
    ];

    let host = host.to_lowercase();
    host == "localhost" || FORBIDDEN_SUFFIXES.iter().any(|s| host.ends_with(s))
}

fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(ipv4) => {
            let octets = ipv4.octets();
            ipv4.is_loopback()
                || ipv4.is_private()
                || ipv4.is_link_local()
                || ipv4.is_broadcast()
                || ipv4.is_unspecified()
                // Documentation ranges
                || (octets[0] == 192 && octets[1] == 0 && octets[2] == 2)
                || (octets[0] == 198 && octets[1] == 51 && octets[2] == 100)
                || (octets[0] == 203 && octets[1] == 0 && octets[2] == 113)
                // Carrier-grade NAT: 100.64.0.0/10
                || (octets[0] == 100 && (64..=127).contains(&octets[1]))
        }
        IpAddr::V6(ipv6) => {
            let segments = ipv6.segments();
            if let Some(mapped) = ipv6.to_ipv4_mapped() {
                return is_private_ip(&IpAddr::V4(mapped));
            }
            ipv6.is_loopback()
                || ipv6.is_unspecified()
                // Unique local: fc00::/7
                || (segments[0] & 0xfe00) == 0xfc00
                // Link-local: fe80::/10
                || (segments[0] & 0xffc0) == 0xfe80
        }
    }
}
