//! Per-target scrape locks.
//!
//! The coordinator is fail-open: an unconfigured or failing backend lets the
//! caller proceed, so a single instance keeps working without coordination.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::LockBackendKind;
use crate::datetime::{now_sql, to_sql};
use crate::db::{Database, DbPool};
use crate::Result;

/// Lock key for a feed scrape.
pub fn feed_lock_key(feed_id: i64) -> String {
    format!("feed:{feed_id}")
}

/// Lock key for a channel check.
pub fn channel_lock_key(channel_id: i64) -> String {
    format!("youtube:{channel_id}")
}

/// Storage for expiring locks.
#[async_trait]
pub trait LockBackend: Send + Sync {
    /// Take the lock unless someone else holds an unexpired one.
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Drop the lock if this backend holds it.
    async fn release(&self, key: &str) -> Result<()>;
}

/// Locks as rows in the shared database.
///
/// Each backend instance has its own owner token, so one process cannot
/// release another's lock.
pub struct SqlLockBackend {
    pool: DbPool,
    owner: String,
}

impl SqlLockBackend {
    pub fn new(db: &Database) -> Self {
        Self {
            pool: db.pool().clone(),
            owner: uuid::Uuid::new_v4().to_string(),
        }
    }
}

#[async_trait]
impl LockBackend for SqlLockBackend {
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<bool> {
        sqlx::query("DELETE FROM scrape_locks WHERE key = $1 AND expires_at <= $2")
            .bind(key)
            .bind(now_sql())
            .execute(&self.pool)
            .await?;

        let expires_at = chrono::Utc::now()
            + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::seconds(300));
        let result = sqlx::query(
            "INSERT INTO scrape_locks (key, owner, expires_at) VALUES ($1, $2, $3)
             ON CONFLICT(key) DO NOTHING",
        )
        .bind(key)
        .bind(&self.owner)
        .bind(to_sql(&expires_at))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn release(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM scrape_locks WHERE key = $1 AND owner = $2")
            .bind(key)
            .bind(&self.owner)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// Process-local locks.
#[derive(Default)]
pub struct InMemoryLockBackend {
    held: Mutex<HashMap<String, Instant>>,
}

impl InMemoryLockBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LockBackend for InMemoryLockBackend {
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut held = self.held.lock().await;
        let now = Instant::now();
        if held.get(key).is_some_and(|expires| *expires > now) {
            return Ok(false);
        }
        held.insert(key.to_string(), now + ttl);
        Ok(true)
    }

    async fn release(&self, key: &str) -> Result<()> {
        self.held.lock().await.remove(key);
        Ok(())
    }
}

/// Fail-open front for a lock backend.
#[derive(Clone, Default)]
pub struct LockCoordinator {
    backend: Option<Arc<dyn LockBackend>>,
}

impl LockCoordinator {
    pub fn new(backend: Arc<dyn LockBackend>) -> Self {
        Self {
            backend: Some(backend),
        }
    }

    /// A coordinator that grants every lock.
    pub fn disabled() -> Self {
        Self { backend: None }
    }

    pub fn from_config(kind: LockBackendKind, db: &Database) -> Self {
        match kind {
            LockBackendKind::Database => Self::new(Arc::new(SqlLockBackend::new(db))),
            LockBackendKind::Memory => Self::new(Arc::new(InMemoryLockBackend::new())),
            LockBackendKind::None => Self::disabled(),
        }
    }

    /// Try to take `key`. Backend failures grant the lock.
    pub async fn acquire(&self, key: &str, ttl: Duration) -> bool {
        let Some(backend) = &self.backend else {
            return true;
        };
        match backend.acquire(key, ttl).await {
            Ok(acquired) => {
                if !acquired {
                    debug!("Lock {} held elsewhere", key);
                }
                acquired
            }
            Err(e) => {
                warn!("Lock backend unavailable for {}, proceeding: {}", key, e);
                true
            }
        }
    }

    /// Release `key`. Safe without a prior acquire.
    pub async fn release(&self, key: &str) {
        if let Some(backend) = &self.backend {
            if let Err(e) = backend.release(key).await {
                warn!("Failed to release lock {}: {}", key, e);
            }
        }
    }
}

impl std::fmt::Debug for LockCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockCoordinator")
            .field("enabled", &self.backend.is_some())
            .finish()
    }
}
