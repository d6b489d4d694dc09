//! Background scrape queue.
//!
//! Requests are recorded as pending job logs, then handed to a single worker
//! task that runs them one at a time through the orchestrator.

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::orchestrator::{ScrapeOrchestrator, ScrapeOutcome};
use crate::db::Database;
use crate::feed::{Feed, FeedService, Subscribed};
use crate::jobs::{JobLog, JobLogRepository, JobType};
use crate::Result;

#[derive(Debug, Clone, Copy)]
struct QueuedJob {
    job_id: i64,
    feed_id: i64,
}

/// Handle for queueing feed work.
#[derive(Clone)]
pub struct ScrapeQueue {
    db: Database,
    tx: mpsc::UnboundedSender<QueuedJob>,
}

impl ScrapeQueue {
    /// Start the worker. Must be called within a tokio runtime.
    pub fn spawn(orchestrator: ScrapeOrchestrator) -> Self {
        let db = orchestrator.database().clone();
        let (tx, mut rx) = mpsc::unbounded_channel::<QueuedJob>();

        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                match orchestrator.run_job(job.job_id, job.feed_id).await {
                    Ok(ScrapeOutcome::Failed(message)) => {
                        debug!("Job {} for feed {} failed: {}", job.job_id, job.feed_id, message)
                    }
                    Ok(outcome) => debug!("Job {} finished: {:?}", job.job_id, outcome),
                    Err(e) => error!("Job {} for feed {} aborted: {}", job.job_id, job.feed_id, e),
                }
            }
            debug!("Scrape queue worker stopped");
        });

        Self { db, tx }
    }

    /// Queue discovery (and the first scrape) of a feed.
    pub async fn queue_feed_discovery(&self, feed_id: i64) -> Result<JobLog> {
        self.enqueue(JobType::DiscoverFeed, feed_id).await
    }

    /// Queue a scrape of a feed whose endpoint is already known.
    pub async fn queue_feed_scrape(&self, feed_id: i64) -> Result<JobLog> {
        self.enqueue(JobType::ScrapeFeed, feed_id).await
    }

    async fn enqueue(&self, job_type: JobType, feed_id: i64) -> Result<JobLog> {
        let jobs = JobLogRepository::new(self.db.pool());
        let job = jobs.create(job_type, feed_id).await?;

        if self
            .tx
            .send(QueuedJob {
                job_id: job.id,
                feed_id,
            })
            .is_err()
        {
            warn!("Scrape worker gone, cancelling job {}", job.id);
            return jobs.cancel(job.id).await;
        }

        debug!("Queued {} job {} for feed {}", job_type, job.id, feed_id);
        Ok(job)
    }

    /// Subscribe a user to a site and queue discovery when the feed is new.
    pub async fn subscribe(&self, user_id: i64, url: &str, notify: bool) -> Result<Subscribed> {
        let subscribed = FeedService::new(&self.db)
            .subscribe(user_id, url, notify)
            .await?;
        if subscribed.created {
            self.queue_feed_discovery(subscribed.feed.id).await?;
        }
        Ok(subscribed)
    }

    /// Operator reset of an errored or blocked feed, followed by rediscovery.
    pub async fn reset_feed(&self, feed_id: i64) -> Result<Feed> {
        let feed = FeedService::new(&self.db).reset_feed(feed_id).await?;
        info!("Requeueing discovery for feed {}", feed_id);
        self.queue_feed_discovery(feed_id).await?;
        Ok(feed)
    }
}

impl std::fmt::Debug for ScrapeQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScrapeQueue")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FetchConfig;
    use crate::feed::{FeedItemRepository, FeedRepository, FeedStatus};
    use crate::fetch::HttpFetcher;
    use crate::jobs::JobStatus;
    use crate::notify::{LogNotificationSink, NotificationDispatcher};
    use std::sync::Arc;
    use std::time::Duration;

    async fn wait_finished(db: &Database, job_id: i64) -> JobLog {
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let job = JobLogRepository::new(db.pool())
                    .get(job_id)
                    .await
                    .unwrap()
                    .unwrap();
                if job.status.is_finished() {
                    return job;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_subscribe_queues_discovery() {
        let mut server = mockito::Server::new_async().await;
        let _robots = server
            .mock("GET", "/robots.txt")
            .with_status(404)
            .create_async()
            .await;
        let _home = server
            .mock("GET", "/")
            .with_status(200)
            .with_header("content-type", "text/html")
            .with_body(
                r#"<html><head><link rel="alternate" type="application/rss+xml" href="/rss.xml"></head></html>"#,
            )
            .create_async()
            .await;
        let _rss = server
            .mock("GET", "/rss.xml")
            .with_status(200)
            .with_body(
                r#"<?xml version="1.0"?><rss version="2.0"><channel><title>Site</title>
                <item><title>Hello</title><link>https://example.com/hello</link></item>
                </channel></rss>"#,
            )
            .create_async()
            .await;

        let db = Database::open_in_memory().await.unwrap();
        let fetcher = HttpFetcher::new(&FetchConfig {
            allow_private_hosts: true,
            requests_per_second: 100,
            respect_robots_tag: false,
            ..Default::default()
        })
        .unwrap();
        let notifier = NotificationDispatcher::spawn(Arc::new(LogNotificationSink));
        let queue = ScrapeQueue::spawn(ScrapeOrchestrator::new(db.clone(), fetcher, notifier));

        let subscribed = queue.subscribe(1, &server.url(), true).await.unwrap();
        assert!(subscribed.created);

        let jobs = JobLogRepository::new(db.pool())
            .list_by_target(JobType::DiscoverFeed, subscribed.feed.id)
            .await
            .unwrap();
        assert_eq!(jobs.len(), 1);

        let job = wait_finished(&db, jobs[0].id).await;
        assert_eq!(job.status, JobStatus::Completed);

        let feed = FeedRepository::new(db.pool())
            .require(subscribed.feed.id)
            .await
            .unwrap();
        assert_eq!(feed.status, FeedStatus::Active);
        assert_eq!(feed.rss_url, Some(format!("{}/rss.xml", server.url())));
        assert_eq!(
            FeedItemRepository::new(db.pool())
                .count_by_feed(feed.id)
                .await
                .unwrap(),
            1
        );

        // A second subscriber does not trigger another discovery.
        let again = queue.subscribe(2, &server.url(), true).await.unwrap();
        assert!(!again.created);
        let jobs = JobLogRepository::new(db.pool())
            .list_by_target(JobType::DiscoverFeed, feed.id)
            .await
            .unwrap();
        assert_eq!(jobs.len(), 1);
    }
}
