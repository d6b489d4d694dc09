//! Job logs: audit records for asynchronous scrape, discovery and channel
//! check attempts.

pub mod repository;
pub mod types;

pub use repository::JobLogRepository;
pub use types::{JobLog, JobStatus, JobType};
