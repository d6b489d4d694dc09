//! The acquisition pipeline: per-feed scrape orchestration, the background
//! queue, YouTube channel checks and the recurring scheduler.

pub mod orchestrator;
pub mod queue;
pub mod scheduler;
pub mod youtube;

pub use orchestrator::{ScrapeOrchestrator, ScrapeOutcome, DEFAULT_LOCK_TTL};
pub use queue::ScrapeQueue;
pub use scheduler::{LineGuard, Scheduler};
pub use youtube::{ChannelCheckOutcome, ChannelChecker, VideoSource};
