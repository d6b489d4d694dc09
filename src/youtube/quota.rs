//! Daily API quota ledger.

use crate::db::DbPool;
use crate::Result;

/// Repository for per-day, per-endpoint unit consumption.
pub struct QuotaRepository<'a> {
    pool: &'a DbPool,
}

impl<'a> QuotaRepository<'a> {
    /// Create a new repository instance.
    pub fn new(pool: &'a DbPool) -> Self {
        Self { pool }
    }

    /// Add `units` to the counter for (service, day, endpoint).
    pub async fn record(&self, service: &str, day: &str, endpoint: &str, units: i64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO quota_usage (service, day, endpoint, units)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT(service, day, endpoint) DO UPDATE SET units = units + excluded.units
            "#,
        )
        .bind(service)
        .bind(day)
        .bind(endpoint)
        .bind(units)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// Total units used by a service on a day.
    pub async fn used_on(&self, service: &str, day: &str) -> Result<i64> {
        let used: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(units), 0) FROM quota_usage WHERE service = $1 AND day = $2",
        )
        .bind(service)
        .bind(day)
        .fetch_one(self.pool)
        .await?;
        Ok(used)
    }

    /// Units used on a day, per endpoint.
    pub async fn breakdown(&self, service: &str, day: &str) -> Result<Vec<(String, i64)>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT endpoint, units FROM quota_usage
             WHERE service = $1 AND day = $2
             ORDER BY units DESC, endpoint",
        )
        .bind(service)
        .bind(day)
        .fetch_all(self.pool)
        .await?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;

    #[tokio::test]
    async fn test_record_accumulates() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = QuotaRepository::new(db.pool());

        repo.record("youtube", "2024-03-05", "search", 100).await.unwrap();
        repo.record("youtube", "2024-03-05", "channels", 1).await.unwrap();
        repo.record("youtube", "2024-03-05", "search", 100).await.unwrap();
        repo.record("youtube", "2024-03-06", "search", 100).await.unwrap();

        assert_eq!(repo.used_on("youtube", "2024-03-05").await.unwrap(), 201);
        assert_eq!(repo.used_on("youtube", "2024-03-06").await.unwrap(), 100);
        assert_eq!(repo.used_on("youtube", "2024-03-07").await.unwrap(), 0);
        assert_eq!(repo.used_on("other", "2024-03-05").await.unwrap(), 0);

        let breakdown = repo.breakdown("youtube", "2024-03-05").await.unwrap();
        assert_eq!(
            breakdown,
            vec![("search".to_string(), 200), ("channels".to_string(), 1)]
        );
    }
}
