//! Job log types for feedwatch.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};

use crate::FeedwatchError;

/// Kind of asynchronous work a job log tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobType {
    /// Scrape a feed whose endpoint is known.
    ScrapeFeed,
    /// Discover the endpoint of a feed, then scrape it.
    DiscoverFeed,
    /// Poll a YouTube channel for uploads.
    CheckYoutube,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::ScrapeFeed => "scrape_feed",
            JobType::DiscoverFeed => "discover_feed",
            JobType::CheckYoutube => "check_youtube",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = FeedwatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scrape_feed" => Ok(JobType::ScrapeFeed),
            "discover_feed" => Ok(JobType::DiscoverFeed),
            "check_youtube" => Ok(JobType::CheckYoutube),
            other => Err(FeedwatchError::Validation(format!(
                "unknown job type: {other}"
            ))),
        }
    }
}

/// Lifecycle status of a job.
///
/// ```text
/// pending -> running -> completed
///    |          |----> failed -> pending
///    |          `----> cancelled
///    `---------------> cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// No further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Cancelled)
    }

    /// Finished, successfully or not. Finished jobs are subject to cleanup.
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Cancelled)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
                | (Failed, Pending)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = FeedwatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(FeedwatchError::Validation(format!(
                "unknown job status: {other}"
            ))),
        }
    }
}

/// Audit record of one asynchronous attempt.
///
/// `target_id` is a weak reference: the target may be deleted while its
/// logs remain.
#[derive(Debug, Clone)]
pub struct JobLog {
    pub id: i64,
    pub job_type: JobType,
    pub target_id: i64,
    pub status: JobStatus,
    pub attempts: i64,
    pub last_error: Option<String>,
    /// Summary payload written on completion.
    pub result: Option<serde_json::Value>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}
