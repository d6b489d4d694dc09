//! Wiring of the pipeline components from a [`Config`].

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::info;

use crate::config::Config;
use crate::db::Database;
use crate::fetch::HttpFetcher;
use crate::lock::LockCoordinator;
use crate::notify::{NotificationDispatcher, NotificationSink};
use crate::scrape::{ChannelChecker, ScrapeOrchestrator, ScrapeQueue, Scheduler};
use crate::youtube::YouTubeClient;
use crate::Result;

/// Every long-lived component, connected.
#[derive(Clone)]
pub struct Pipeline {
    pub db: Database,
    pub orchestrator: ScrapeOrchestrator,
    pub queue: ScrapeQueue,
    pub checker: ChannelChecker,
    pub scheduler: Scheduler,
}

impl Pipeline {
    /// Build the pipeline over an open database.
    ///
    /// Spawns the notification and queue workers, so it must be called
    /// within a tokio runtime.
    pub fn build(config: &Config, db: Database, sink: Arc<dyn NotificationSink>) -> Result<Self> {
        config.validate()?;

        let fetcher = HttpFetcher::new(&config.fetch)?;
        let notifier = NotificationDispatcher::spawn(sink);
        let locks = LockCoordinator::from_config(config.lock.backend, &db);
        let lock_ttl = Duration::from_secs(config.scheduler.lock_ttl_secs);

        let orchestrator = ScrapeOrchestrator::new(db.clone(), fetcher.clone(), notifier.clone())
            .with_locks(locks.clone())
            .with_lock_ttl(lock_ttl)
            .with_site_overrides(config.discovery.site_overrides.clone())
            .with_feed_staleness(config.scheduler.feed_staleness_secs);
        let queue = ScrapeQueue::spawn(orchestrator.clone());

        let client = YouTubeClient::new(fetcher, db.clone(), config.youtube.clone());
        let checker = ChannelChecker::new(db.clone(), client, notifier)
            .with_locks(locks)
            .with_lock_ttl(lock_ttl)
            .with_staleness(config.scheduler.youtube_staleness_secs);

        let scheduler = Scheduler::new(orchestrator.clone(), queue.clone(), config.scheduler.clone())
            .with_youtube(checker.clone(), config.youtube.skip_threshold);

        info!(
            "Pipeline ready (lock backend: {:?}, YouTube API: {})",
            config.lock.backend,
            if checker.client().has_api_key() {
                "enabled"
            } else {
                "feeds only"
            }
        );

        Ok(Self {
            db,
            orchestrator,
            queue,
            checker,
            scheduler,
        })
    }

    /// Start the scheduler lines.
    pub fn start(&self) -> Vec<JoinHandle<()>> {
        self.scheduler.start()
    }
}
