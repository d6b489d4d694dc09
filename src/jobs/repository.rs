//! Job log repository for feedwatch.

use chrono::Utc;

use super::types::{JobLog, JobStatus, JobType};
use crate::datetime::{now_sql, parse_datetime, sql_seconds_ago};
use crate::db::DbPool;
use crate::{FeedwatchError, Result};

const JOB_COLUMNS: &str = "id, job_type, target_id, status, attempts, last_error, result, \
                           started_at, completed_at, created_at";

#[derive(Debug, sqlx::FromRow)]
struct JobLogRow {
    id: i64,
    job_type: String,
    target_id: i64,
    status: String,
    attempts: i64,
    last_error: Option<String>,
    result: Option<String>,
    started_at: Option<String>,
    completed_at: Option<String>,
    created_at: String,
}

impl TryFrom<JobLogRow> for JobLog {
    type Error = FeedwatchError;

    fn try_from(row: JobLogRow) -> Result<Self> {
        Ok(JobLog {
            id: row.id,
            job_type: row.job_type.parse()?,
            target_id: row.target_id,
            status: row.status.parse()?,
            attempts: row.attempts,
            last_error: row.last_error,
            result: row.result.and_then(|r| serde_json::from_str(&r).ok()),
            started_at: row.started_at.and_then(|s| parse_datetime(&s)),
            completed_at: row.completed_at.and_then(|s| parse_datetime(&s)),
            created_at: parse_datetime(&row.created_at).unwrap_or_else(Utc::now),
        })
    }
}

/// Repository for job logs.
///
/// Status updates only apply from a state allowed by
/// [`JobStatus::can_transition_to`]; anything else is a validation error.
pub struct JobLogRepository<'a> {
    pool: &'a DbPool,
}

impl<'a> JobLogRepository<'a> {
    pub fn new(pool: &'a DbPool) -> Self {
        Self { pool }
    }

    /// Create a pending job.
    pub async fn create(&self, job_type: JobType, target_id: i64) -> Result<JobLog> {
        let row = sqlx::query_as::<_, JobLogRow>(&format!(
            "INSERT INTO job_logs (job_type, target_id, status, created_at)
             VALUES ($1, $2, 'pending', $3)
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(job_type.as_str())
        .bind(target_id)
        .bind(now_sql())
        .fetch_one(self.pool)
        .await?;
        row.try_into()
    }

    pub async fn get(&self, id: i64) -> Result<Option<JobLog>> {
        let row = sqlx::query_as::<_, JobLogRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM job_logs WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(self.pool)
        .await?;
        row.map(JobLog::try_from).transpose()
    }

    /// Jobs for one target, newest first.
    pub async fn list_by_target(&self, job_type: JobType, target_id: i64) -> Result<Vec<JobLog>> {
        let rows = sqlx::query_as::<_, JobLogRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM job_logs
             WHERE job_type = $1 AND target_id = $2
             ORDER BY id DESC"
        ))
        .bind(job_type.as_str())
        .bind(target_id)
        .fetch_all(self.pool)
        .await?;
        rows.into_iter().map(JobLog::try_from).collect()
    }

    /// pending -> running. Counts an attempt.
    pub async fn mark_running(&self, id: i64) -> Result<JobLog> {
        let result = sqlx::query(
            "UPDATE job_logs
             SET status = 'running', attempts = attempts + 1, started_at = $1, last_error = NULL
             WHERE id = $2 AND status = 'pending'",
        )
        .bind(now_sql())
        .bind(id)
        .execute(self.pool)
        .await?;
        self.after_transition(id, result.rows_affected(), JobStatus::Running)
            .await
    }

    /// running -> completed, storing the result payload.
    pub async fn complete(&self, id: i64, payload: &serde_json::Value) -> Result<JobLog> {
        let result = sqlx::query(
            "UPDATE job_logs SET status = 'completed', result = $1, completed_at = $2
             WHERE id = $3 AND status = 'running'",
        )
        .bind(payload.to_string())
        .bind(now_sql())
        .bind(id)
        .execute(self.pool)
        .await?;
        self.after_transition(id, result.rows_affected(), JobStatus::Completed)
            .await
    }

    /// running -> failed.
    pub async fn fail(&self, id: i64, error: &str) -> Result<JobLog> {
        let result = sqlx::query(
            "UPDATE job_logs SET status = 'failed', last_error = $1, completed_at = $2
             WHERE id = $3 AND status = 'running'",
        )
        .bind(error)
        .bind(now_sql())
        .bind(id)
        .execute(self.pool)
        .await?;
        self.after_transition(id, result.rows_affected(), JobStatus::Failed)
            .await
    }

    /// pending|running -> cancelled.
    pub async fn cancel(&self, id: i64) -> Result<JobLog> {
        let result = sqlx::query(
            "UPDATE job_logs SET status = 'cancelled', completed_at = $1
             WHERE id = $2 AND status IN ('pending', 'running')",
        )
        .bind(now_sql())
        .bind(id)
        .execute(self.pool)
        .await?;
        self.after_transition(id, result.rows_affected(), JobStatus::Cancelled)
            .await
    }

    /// failed -> pending, for a retry.
    pub async fn reset_to_pending(&self, id: i64) -> Result<JobLog> {
        let result = sqlx::query(
            "UPDATE job_logs SET status = 'pending', completed_at = NULL
             WHERE id = $1 AND status = 'failed'",
        )
        .bind(id)
        .execute(self.pool)
        .await?;
        self.after_transition(id, result.rows_affected(), JobStatus::Pending)
            .await
    }

    /// Delete finished jobs created more than `days` days ago.
    pub async fn delete_older_than(&self, days: i64) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM job_logs
             WHERE status IN ('completed', 'failed', 'cancelled') AND created_at < $1",
        )
        .bind(sql_seconds_ago(days * 86400))
        .execute(self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn after_transition(&self, id: i64, rows: u64, to: JobStatus) -> Result<JobLog> {
        let job = self
            .get(id)
            .await?
            .ok_or_else(|| FeedwatchError::NotFound(format!("job {id}")))?;
        if rows == 0 {
            return Err(FeedwatchError::Validation(format!(
                "job {} cannot move from {} to {}",
                id, job.status, to
            )));
        }
        Ok(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;
    use serde_json::json;

    #[tokio::test]
    async fn test_success_lifecycle() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = JobLogRepository::new(db.pool());

        let job = repo.create(JobType::ScrapeFeed, 42).await.unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempts, 0);
        assert_eq!(job.target_id, 42);

        let job = repo.mark_running(job.id).await.unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.attempts, 1);
        assert!(job.started_at.is_some());

        let job = repo
            .complete(job.id, &json!({"new_items": 3, "method": "rss"}))
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.result.unwrap()["new_items"], 3);
        assert!(job.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_failure_and_retry() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = JobLogRepository::new(db.pool());

        let job = repo.create(JobType::DiscoverFeed, 1).await.unwrap();
        repo.mark_running(job.id).await.unwrap();
        let failed = repo.fail(job.id, "fetch error: timeout").await.unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.last_error.as_deref(), Some("fetch error: timeout"));

        let pending = repo.reset_to_pending(job.id).await.unwrap();
        assert_eq!(pending.status, JobStatus::Pending);

        let running = repo.mark_running(job.id).await.unwrap();
        assert_eq!(running.attempts, 2);
        assert!(running.last_error.is_none());
    }

    #[tokio::test]
    async fn test_invalid_transitions_rejected() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = JobLogRepository::new(db.pool());

        let job = repo.create(JobType::ScrapeFeed, 1).await.unwrap();
        assert!(matches!(
            repo.complete(job.id, &json!({})).await,
            Err(FeedwatchError::Validation(_))
        ));
        assert!(matches!(
            repo.reset_to_pending(job.id).await,
            Err(FeedwatchError::Validation(_))
        ));

        repo.cancel(job.id).await.unwrap();
        assert!(matches!(
            repo.mark_running(job.id).await,
            Err(FeedwatchError::Validation(_))
        ));
        assert!(matches!(
            repo.mark_running(999).await,
            Err(FeedwatchError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_older_than_keeps_unfinished() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = JobLogRepository::new(db.pool());

        let old_done = repo.create(JobType::ScrapeFeed, 1).await.unwrap();
        repo.mark_running(old_done.id).await.unwrap();
        repo.complete(old_done.id, &json!({})).await.unwrap();
        let old_pending = repo.create(JobType::ScrapeFeed, 2).await.unwrap();
        let recent_done = repo.create(JobType::ScrapeFeed, 3).await.unwrap();
        repo.cancel(recent_done.id).await.unwrap();

        sqlx::query("UPDATE job_logs SET created_at = '2000-01-01 00:00:00' WHERE id IN ($1, $2)")
            .bind(old_done.id)
            .bind(old_pending.id)
            .execute(db.pool())
            .await
            .unwrap();

        assert_eq!(repo.delete_older_than(7).await.unwrap(), 1);
        assert!(repo.get(old_done.id).await.unwrap().is_none());
        assert!(repo.get(old_pending.id).await.unwrap().is_some());
        assert!(repo.get(recent_done.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_list_by_target() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = JobLogRepository::new(db.pool());

        let first = repo.create(JobType::ScrapeFeed, 5).await.unwrap();
        let second = repo.create(JobType::ScrapeFeed, 5).await.unwrap();
        repo.create(JobType::DiscoverFeed, 5).await.unwrap();

        let jobs = repo.list_by_target(JobType::ScrapeFeed, 5).await.unwrap();
        let ids: Vec<i64> = jobs.iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![second.id, first.id]);
    }
}
