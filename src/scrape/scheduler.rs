//! Recurring scheduler lines.
//!
//! Four independent lines run on their own intervals: routine feed scraping,
//! the retry sweep for errored feeds, YouTube polling and job log cleanup.
//! Each line carries an in-process guard so a slow cycle is never entered
//! twice; cross-process exclusion is the lock coordinator's job.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::orchestrator::{ScrapeOrchestrator, ScrapeOutcome};
use super::queue::ScrapeQueue;
use super::youtube::{ChannelCheckOutcome, ChannelChecker};
use crate::config::SchedulerConfig;
use crate::feed::FeedRepository;
use crate::jobs::JobLogRepository;
use crate::Result;

/// Re-entry guard for one scheduler line.
#[derive(Debug, Default)]
pub struct LineGuard {
    running: AtomicBool,
}

impl LineGuard {
    /// Enter the line, or `None` if a cycle is already in flight.
    pub fn try_enter(&self) -> Option<LineTicket<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| LineTicket { guard: self })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// Held for the duration of a cycle; leaving the cycle frees the line.
#[derive(Debug)]
pub struct LineTicket<'a> {
    guard: &'a LineGuard,
}

impl Drop for LineTicket<'_> {
    fn drop(&mut self) {
        self.guard.running.store(false, Ordering::Release);
    }
}

#[derive(Debug, Default)]
struct Lines {
    feeds: LineGuard,
    retry: LineGuard,
    youtube: LineGuard,
    cleanup: LineGuard,
}

/// Drives the recurring work.
#[derive(Clone)]
pub struct Scheduler {
    orchestrator: ScrapeOrchestrator,
    queue: ScrapeQueue,
    checker: Option<ChannelChecker>,
    config: SchedulerConfig,
    skip_threshold: f64,
    lines: Arc<Lines>,
}

impl Scheduler {
    pub fn new(orchestrator: ScrapeOrchestrator, queue: ScrapeQueue, config: SchedulerConfig) -> Self {
        Self {
            orchestrator,
            queue,
            checker: None,
            config,
            skip_threshold: 0.9,
            lines: Arc::new(Lines::default()),
        }
    }

    /// Enable YouTube polling, skipping cycles once the used share of the
    /// daily quota exceeds `skip_threshold`.
    pub fn with_youtube(mut self, checker: ChannelChecker, skip_threshold: f64) -> Self {
        self.checker = Some(checker);
        self.skip_threshold = skip_threshold;
        self
    }

    /// Spawn every line. Must be called within a tokio runtime.
    pub fn start(&self) -> Vec<JoinHandle<()>> {
        info!(
            "Scheduler started (feeds every {}s, retry every {}s, youtube every {}s)",
            self.config.feed_interval_secs,
            self.config.retry_interval_secs,
            self.config.youtube_interval_secs
        );

        let mut handles = vec![
            self.spawn_line("feeds", self.config.feed_interval_secs, |s| async move {
                s.run_feed_cycle().await.map(|_| ())
            }),
            self.spawn_line("retry", self.config.retry_interval_secs, |s| async move {
                s.run_retry_sweep().await.map(|_| ())
            }),
            self.spawn_line("cleanup", self.config.cleanup_interval_secs, |s| async move {
                s.run_cleanup().await.map(|_| ())
            }),
        ];
        if self.checker.is_some() {
            handles.push(
                self.spawn_line("youtube", self.config.youtube_interval_secs, |s| async move {
                    s.run_youtube_cycle().await.map(|_| ())
                }),
            );
        }
        handles
    }

    /// Tick forever, running each cycle as its own task so a slow cycle
    /// meets the guard rather than delaying the timer.
    fn spawn_line<F, Fut>(&self, name: &'static str, every_secs: u64, cycle: F) -> JoinHandle<()>
    where
        F: Fn(Scheduler) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        let scheduler = self.clone();
        tokio::spawn(async move {
            let mut timer = interval(Duration::from_secs(every_secs.max(1)));
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                timer.tick().await;
                let run = cycle(scheduler.clone());
                tokio::spawn(async move {
                    if let Err(e) = run.await {
                        error!("Scheduler line {} failed: {}", name, e);
                    }
                });
            }
        })
    }

    /// Scrape due feeds, one at a time. Returns the number attempted.
    pub async fn run_feed_cycle(&self) -> Result<usize> {
        let Some(_ticket) = self.lines.feeds.try_enter() else {
            debug!("Feed cycle still running, skipping tick");
            return Ok(0);
        };

        let feeds = self
            .orchestrator
            .get_feeds_to_scrape(self.config.feed_batch_size)
            .await?;
        if feeds.is_empty() {
            debug!("No feeds due");
            return Ok(0);
        }
        info!("Scraping {} due feed(s)", feeds.len());

        let delay = Duration::from_millis(self.config.inter_feed_delay_ms);
        for (i, feed) in feeds.iter().enumerate() {
            if i > 0 && !delay.is_zero() {
                sleep(delay).await;
            }
            match self.orchestrator.scrape_feed(feed.id).await {
                Ok(ScrapeOutcome::Failed(message)) => {
                    debug!("Feed {} failed: {}", feed.id, message)
                }
                Ok(_) => {}
                Err(e) => error!("Scrape of feed {} aborted: {}", feed.id, e),
            }
        }
        Ok(feeds.len())
    }

    /// Reset errored feeds whose last attempt is old enough and queue their
    /// rediscovery. Blocked feeds are never picked up.
    pub async fn run_retry_sweep(&self) -> Result<usize> {
        let Some(_ticket) = self.lines.retry.try_enter() else {
            debug!("Retry sweep still running, skipping tick");
            return Ok(0);
        };

        let db = self.orchestrator.database();
        let repo = FeedRepository::new(db.pool());
        let feeds = repo
            .list_retryable(self.config.retry_staleness_secs, self.config.retry_batch_size)
            .await?;

        let mut requeued = 0;
        for feed in &feeds {
            repo.reset_to_pending(feed.id).await?;
            match self.queue.queue_feed_discovery(feed.id).await {
                Ok(_) => requeued += 1,
                Err(e) => warn!("Failed to requeue feed {}: {}", feed.id, e),
            }
        }
        if requeued > 0 {
            info!("Retry sweep requeued {} feed(s)", requeued);
        }
        Ok(requeued)
    }

    /// Check due channels, unless the quota is nearly spent. Returns the
    /// number of channels checked.
    pub async fn run_youtube_cycle(&self) -> Result<usize> {
        let Some(checker) = &self.checker else {
            return Ok(0);
        };
        let Some(_ticket) = self.lines.youtube.try_enter() else {
            debug!("YouTube cycle still running, skipping tick");
            return Ok(0);
        };

        let usage = checker.get_quota_usage().await?;
        if usage.fraction() > self.skip_threshold {
            info!(
                "Skipping YouTube cycle: {} of {} quota units used",
                usage.used, usage.limit
            );
            return Ok(0);
        }

        let channels = checker
            .get_channels_to_check(self.config.youtube_batch_size)
            .await?;
        let mut checked = 0;
        for channel in &channels {
            match checker.check_channel(channel.id).await {
                Ok(ChannelCheckOutcome::Skipped) => {}
                Ok(_) => checked += 1,
                Err(e) => error!("Check of channel {} aborted: {}", channel.id, e),
            }
        }
        Ok(checked)
    }

    /// Delete finished job logs past retention.
    pub async fn run_cleanup(&self) -> Result<u64> {
        let Some(_ticket) = self.lines.cleanup.try_enter() else {
            return Ok(0);
        };

        let deleted = JobLogRepository::new(self.orchestrator.database().pool())
            .delete_older_than(self.config.job_retention_days)
            .await?;
        if deleted > 0 {
            info!("Deleted {} old job log(s)", deleted);
        }
        Ok(deleted)
    }
}
