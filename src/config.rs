//! Configuration module for feedwatch.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::{FeedwatchError, Result};

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    "data/feedwatch.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Path to the log file.
    #[serde(default = "default_log_file")]
    pub file: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> String {
    "logs/feedwatch.log".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: default_log_file(),
        }
    }
}

/// Outbound HTTP configuration shared by every fetch.
#[derive(Debug, Clone, Deserialize)]
pub struct FetchConfig {
    /// User agent sent with every request and matched against robots.txt groups.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Connection timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Timeout for feed XML downloads.
    #[serde(default = "default_feed_timeout")]
    pub feed_timeout_secs: u64,
    /// Timeout for page renders.
    #[serde(default = "default_page_timeout")]
    pub page_timeout_secs: u64,
    /// Timeout for robots.txt and HEAD checks.
    #[serde(default = "default_robots_timeout")]
    pub robots_timeout_secs: u64,
    /// Timeout for external API calls.
    #[serde(default = "default_api_timeout")]
    pub api_timeout_secs: u64,
    /// Maximum response body size in bytes.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: u64,
    /// Maximum number of redirects.
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
    /// Global outbound request budget.
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,
    /// Allow loopback/private hosts (disables the SSRF guard).
    #[serde(default)]
    pub allow_private_hosts: bool,
    /// How long a fetched robots.txt stays cached.
    #[serde(default = "default_robots_cache_ttl")]
    pub robots_cache_ttl_secs: u64,
    /// Origins kept in the robots.txt and crawl-delay caches.
    #[serde(default = "default_robots_cache_capacity")]
    pub robots_cache_capacity: usize,
    /// Treat `X-Robots-Tag: noindex`/`none` as a block.
    #[serde(default = "default_respect_robots_tag")]
    pub respect_robots_tag: bool,
}

fn default_user_agent() -> String {
    "feedwatch/0.1 (+https://github.com/feedwatch/feedwatch)".to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_feed_timeout() -> u64 {
    30
}

fn default_page_timeout() -> u64 {
    20
}

fn default_robots_timeout() -> u64 {
    5
}

fn default_api_timeout() -> u64 {
    15
}

fn default_max_body_bytes() -> u64 {
    5 * 1024 * 1024 // 5MB
}

fn default_max_redirects() -> usize {
    5
}

fn default_requests_per_second() -> u32 {
    5
}

fn default_robots_cache_ttl() -> u64 {
    86400 // 24 hours
}

fn default_robots_cache_capacity() -> usize {
    1024
}

fn default_respect_robots_tag() -> bool {
    true
}

impl FetchConfig {
    pub fn feed_timeout(&self) -> Duration {
        Duration::from_secs(self.feed_timeout_secs)
    }

    pub fn page_timeout(&self) -> Duration {
        Duration::from_secs(self.page_timeout_secs)
    }

    pub fn robots_timeout(&self) -> Duration {
        Duration::from_secs(self.robots_timeout_secs)
    }

    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.api_timeout_secs)
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            connect_timeout_secs: default_connect_timeout(),
            feed_timeout_secs: default_feed_timeout(),
            page_timeout_secs: default_page_timeout(),
            robots_timeout_secs: default_robots_timeout(),
            api_timeout_secs: default_api_timeout(),
            max_body_bytes: default_max_body_bytes(),
            max_redirects: default_max_redirects(),
            requests_per_second: default_requests_per_second(),
            allow_private_hosts: false,
            robots_cache_ttl_secs: default_robots_cache_ttl(),
            robots_cache_capacity: default_robots_cache_capacity(),
            respect_robots_tag: default_respect_robots_tag(),
        }
    }
}

/// Feed discovery configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DiscoveryConfig {
    /// Extra feed paths keyed by hostname, probed before the generic list.
    #[serde(default)]
    pub site_overrides: HashMap<String, Vec<String>>,
}

/// Scheduler configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Routine feed scrape interval.
    #[serde(default = "default_feed_interval")]
    pub feed_interval_secs: u64,
    /// Feeds scraped per cycle.
    #[serde(default = "default_feed_batch_size")]
    pub feed_batch_size: i64,
    /// A feed is due once its last scrape is older than this.
    #[serde(default = "default_feed_staleness")]
    pub feed_staleness_secs: i64,
    /// Pause between consecutive feeds within a batch.
    #[serde(default = "default_inter_feed_delay")]
    pub inter_feed_delay_ms: u64,
    /// Retry sweep interval.
    #[serde(default = "default_retry_interval")]
    pub retry_interval_secs: u64,
    /// Errored feeds reset per sweep.
    #[serde(default = "default_retry_batch_size")]
    pub retry_batch_size: i64,
    /// An errored feed is retried once its last scrape is older than this.
    #[serde(default = "default_retry_staleness")]
    pub retry_staleness_secs: i64,
    /// YouTube polling interval.
    #[serde(default = "default_youtube_interval")]
    pub youtube_interval_secs: u64,
    /// Channels checked per cycle.
    #[serde(default = "default_youtube_batch_size")]
    pub youtube_batch_size: i64,
    /// A channel is due once its last check is older than this.
    #[serde(default = "default_youtube_staleness")]
    pub youtube_staleness_secs: i64,
    /// Job log cleanup interval.
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,
    /// Finished job logs older than this are deleted.
    #[serde(default = "default_job_retention_days")]
    pub job_retention_days: i64,
    /// Per-feed lock TTL.
    #[serde(default = "default_lock_ttl")]
    pub lock_ttl_secs: u64,
}

fn default_feed_interval() -> u64 {
    600 // 10 minutes
}

fn default_feed_batch_size() -> i64 {
    10
}

fn default_feed_staleness() -> i64 {
    600
}

fn default_inter_feed_delay() -> u64 {
    2000
}

fn default_retry_interval() -> u64 {
    900
}

fn default_retry_batch_size() -> i64 {
    5
}

fn default_retry_staleness() -> i64 {
    3600 // 1 hour
}

fn default_youtube_interval() -> u64 {
    300 // 5 minutes
}

fn default_youtube_batch_size() -> i64 {
    10
}

fn default_youtube_staleness() -> i64 {
    1800
}

fn default_cleanup_interval() -> u64 {
    86400
}

fn default_job_retention_days() -> i64 {
    7
}

fn default_lock_ttl() -> u64 {
    300
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            feed_interval_secs: default_feed_interval(),
            feed_batch_size: default_feed_batch_size(),
            feed_staleness_secs: default_feed_staleness(),
            inter_feed_delay_ms: default_inter_feed_delay(),
            retry_interval_secs: default_retry_interval(),
            retry_batch_size: default_retry_batch_size(),
            retry_staleness_secs: default_retry_staleness(),
            youtube_interval_secs: default_youtube_interval(),
            youtube_batch_size: default_youtube_batch_size(),
            youtube_staleness_secs: default_youtube_staleness(),
            cleanup_interval_secs: default_cleanup_interval(),
            job_retention_days: default_job_retention_days(),
            lock_ttl_secs: default_lock_ttl(),
        }
    }
}

/// YouTube Data API configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct YouTubeConfig {
    /// API key. Without one only zero-cost lookups are used.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Daily quota in units.
    #[serde(default = "default_daily_quota")]
    pub daily_quota: i64,
    /// Timezone whose midnight resets the quota.
    #[serde(default = "default_quota_timezone")]
    pub quota_timezone: String,
    /// Fraction of the quota above which polling cycles are skipped.
    #[serde(default = "default_skip_threshold")]
    pub skip_threshold: f64,
    /// Data API base URL.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// Public site base URL (handle pages, channel feeds).
    #[serde(default = "default_web_base_url")]
    pub web_base_url: String,
}

fn default_daily_quota() -> i64 {
    10000
}

fn default_quota_timezone() -> String {
    "America/Los_Angeles".to_string()
}

fn default_skip_threshold() -> f64 {
    0.9
}

fn default_api_base_url() -> String {
    "https://www.googleapis.com/youtube/v3".to_string()
}

fn default_web_base_url() -> String {
    "https://www.youtube.com".to_string()
}

impl Default for YouTubeConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            daily_quota: default_daily_quota(),
            quota_timezone: default_quota_timezone(),
            skip_threshold: default_skip_threshold(),
            api_base_url: default_api_base_url(),
            web_base_url: default_web_base_url(),
        }
    }
}

/// Lock backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LockBackendKind {
    /// Lock rows in the shared database.
    #[default]
    Database,
    /// Process-local locks.
    Memory,
    /// No coordination.
    None,
}

/// Lock configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LockConfig {
    #[serde(default)]
    pub backend: LockBackendKind,
}

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
    /// HTTP fetch configuration.
    #[serde(default)]
    pub fetch: FetchConfig,
    /// Feed discovery configuration.
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    /// Scheduler configuration.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// YouTube configuration.
    #[serde(default)]
    pub youtube: YouTubeConfig,
    /// Lock configuration.
    #[serde(default)]
    pub lock: LockConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(FeedwatchError::Io)?;
        Self::parse(&content)
    }

    /// Load configuration from a TOML file and apply environment variable overrides.
    pub fn load_with_env<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| FeedwatchError::Config(format!("config parse error: {e}")))
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Supported environment variables:
    /// - `FEEDWATCH_YOUTUBE_API_KEY`: YouTube Data API key
    pub fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var("FEEDWATCH_YOUTUBE_API_KEY") {
            if !key.is_empty() {
                self.youtube.api_key = Some(key);
            }
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self
            .youtube
            .quota_timezone
            .parse::<chrono_tz::Tz>()
            .is_err()
        {
            return Err(FeedwatchError::Config(format!(
                "unknown quota timezone: {}",
                self.youtube.quota_timezone
            )));
        }
        if !(0.0..=1.0).contains(&self.youtube.skip_threshold) {
            return Err(FeedwatchError::Config(
                "youtube.skip_threshold must be between 0 and 1".to_string(),
            ));
        }
        if self.fetch.requests_per_second == 0 {
            return Err(FeedwatchError::Config(
                "fetch.requests_per_second must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.database.path, "data/feedwatch.db");
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.file, "logs/feedwatch.log");

        assert_eq!(config.fetch.feed_timeout_secs, 30);
        assert_eq!(config.fetch.robots_timeout_secs, 5);
        assert!(!config.fetch.allow_private_hosts);

        assert_eq!(config.scheduler.feed_batch_size, 10);
        assert_eq!(config.scheduler.feed_staleness_secs, 600);
        assert_eq!(config.scheduler.retry_batch_size, 5);
        assert_eq!(config.scheduler.retry_staleness_secs, 3600);
        assert_eq!(config.scheduler.lock_ttl_secs, 300);

        assert_eq!(config.youtube.daily_quota, 10000);
        assert_eq!(config.youtube.skip_threshold, 0.9);
        assert!(config.youtube.api_key.is_none());

        assert_eq!(config.lock.backend, LockBackendKind::Database);
    }

    #[test]
    fn test_parse_empty_equals_default() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.database.path, Config::default().database.path);
        assert_eq!(config.scheduler.feed_interval_secs, 600);
    }

    #[test]
    fn test_parse_partial_config() {
        let toml = r#"
[database]
path = "/tmp/feeds.db"

[scheduler]
feed_batch_size = 3

[youtube]
api_key = "abc"
daily_quota = 500

[lock]
backend = "memory"

[discovery.site_overrides]
"example.com" = ["/news/rss"]
"#;
        let config = Config::parse(toml).unwrap();
        assert_eq!(config.database.path, "/tmp/feeds.db");
        assert_eq!(config.scheduler.feed_batch_size, 3);
        assert_eq!(config.scheduler.retry_batch_size, 5);
        assert_eq!(config.youtube.api_key.as_deref(), Some("abc"));
        assert_eq!(config.youtube.daily_quota, 500);
        assert_eq!(config.lock.backend, LockBackendKind::Memory);
        assert_eq!(
            config.discovery.site_overrides.get("example.com"),
            Some(&vec!["/news/rss".to_string()])
        );
    }

    #[test]
    fn test_parse_invalid_toml() {
        let result = Config::parse("this is [not toml");
        assert!(matches!(result, Err(FeedwatchError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_bad_timezone() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.youtube.quota_timezone = "Mars/Olympus".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_threshold() {
        let mut config = Config::default();
        config.youtube.skip_threshold = 1.5;
        assert!(config.validate().is_err());
    }
}
