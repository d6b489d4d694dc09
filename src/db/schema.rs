//! Database schema and migrations for feedwatch.
//!
//! Each entry is applied once, in order, and recorded in `schema_version`.

/// Database migrations.
pub const MIGRATIONS: &[&str] = &[
    // v1: Feeds and their items
    r#"
CREATE TABLE feeds (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    url             TEXT NOT NULL UNIQUE,           -- normalized
    site_domain     TEXT NOT NULL,
    title           TEXT,
    rss_url         TEXT,                           -- resolved feed endpoint
    status          TEXT NOT NULL DEFAULT 'pending', -- 'pending', 'active', 'error', 'blocked'
    error_message   TEXT,
    last_scrape_at  TEXT,
    created_at      TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at      TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX idx_feeds_status_last_scrape ON feeds(status, last_scrape_at);

CREATE TABLE feed_items (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    feed_id         INTEGER NOT NULL REFERENCES feeds(id) ON DELETE CASCADE,
    url             TEXT NOT NULL,                  -- normalized
    canonical_url   TEXT,
    title           TEXT NOT NULL,
    excerpt         TEXT,
    thumbnail_url   TEXT,
    author          TEXT,
    published_at    TEXT,
    fetched_at      TEXT NOT NULL DEFAULT (datetime('now')),
    content_hash    TEXT NOT NULL,
    UNIQUE(feed_id, url),
    UNIQUE(feed_id, content_hash)
);

CREATE INDEX idx_feed_items_feed_published ON feed_items(feed_id, published_at);
"#,
    // v2: Subscriptions and custom feeds
    r#"
CREATE TABLE subscriptions (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id         INTEGER NOT NULL,
    feed_id         INTEGER NOT NULL REFERENCES feeds(id) ON DELETE CASCADE,
    enabled         INTEGER NOT NULL DEFAULT 1,
    notify          INTEGER NOT NULL DEFAULT 1,
    created_at      TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE(user_id, feed_id)
);

CREATE INDEX idx_subscriptions_feed ON subscriptions(feed_id);

CREATE TABLE custom_feeds (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id         INTEGER NOT NULL,
    name            TEXT NOT NULL,
    keywords        TEXT NOT NULL DEFAULT '',       -- comma separated, empty = no filter
    created_at      TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE custom_feed_sources (
    custom_feed_id  INTEGER NOT NULL REFERENCES custom_feeds(id) ON DELETE CASCADE,
    feed_id         INTEGER NOT NULL REFERENCES feeds(id) ON DELETE CASCADE,
    PRIMARY KEY (custom_feed_id, feed_id)
);
"#,
    // v3: YouTube channels, videos and subscriptions
    r#"
CREATE TABLE youtube_channels (
    id                      INTEGER PRIMARY KEY AUTOINCREMENT,
    channel_id              TEXT NOT NULL UNIQUE,
    title                   TEXT,
    handle                  TEXT,
    last_checked_at         TEXT,
    websub_lease_expires_at TEXT,
    websub_secret           TEXT,
    created_at              TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE youtube_videos (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    channel_id      INTEGER NOT NULL REFERENCES youtube_channels(id) ON DELETE CASCADE,
    video_id        TEXT NOT NULL UNIQUE,
    title           TEXT NOT NULL,
    description     TEXT,
    thumbnail_url   TEXT,
    published_at    TEXT,
    fetched_at      TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE youtube_subscriptions (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id         INTEGER NOT NULL,
    channel_id      INTEGER NOT NULL REFERENCES youtube_channels(id) ON DELETE CASCADE,
    enabled         INTEGER NOT NULL DEFAULT 1,
    notify          INTEGER NOT NULL DEFAULT 1,
    created_at      TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE(user_id, channel_id)
);
"#,
    // v4: Job logs (weak reference to the target, no foreign key)
    r#"
CREATE TABLE job_logs (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    job_type        TEXT NOT NULL,                  -- 'scrape_feed', 'discover_feed', 'check_youtube'
    target_id       INTEGER NOT NULL,
    status          TEXT NOT NULL DEFAULT 'pending', -- 'pending', 'running', 'completed', 'failed', 'cancelled'
    attempts        INTEGER NOT NULL DEFAULT 0,
    last_error      TEXT,
    result          TEXT,                           -- JSON payload
    started_at      TEXT,
    completed_at    TEXT,
    created_at      TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX idx_job_logs_status_created ON job_logs(status, created_at);
CREATE INDEX idx_job_logs_target ON job_logs(job_type, target_id);
"#,
    // v5: Quota ledger and scrape locks
    r#"
CREATE TABLE quota_usage (
    service         TEXT NOT NULL,
    day             TEXT NOT NULL,                  -- YYYY-MM-DD in the quota timezone
    endpoint        TEXT NOT NULL,
    units           INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (service, day, endpoint)
);

CREATE TABLE scrape_locks (
    key             TEXT PRIMARY KEY,
    owner           TEXT NOT NULL,
    expires_at      TEXT NOT NULL
);
"#,
];
