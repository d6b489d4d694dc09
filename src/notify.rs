//! Notification delivery.
//!
//! The pipeline hands notifications to a [`NotificationDispatcher`], which
//! queues them for a detached worker. Delivery results never flow back to
//! the caller; failures end in the log.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::Result;

/// A message for one user.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
    /// Structured payload for the client (item ID, URL, ...).
    pub data: serde_json::Value,
}

impl Notification {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            data: serde_json::Value::Null,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }
}

/// Outcome of one delivery across a user's devices.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub sent: usize,
    pub failed: usize,
}

/// Destination for notifications (push service, mailer, ...).
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, user_id: i64, notification: &Notification) -> Result<DeliveryReport>;
}

/// Sink that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotificationSink;

#[async_trait]
impl NotificationSink for LogNotificationSink {
    async fn notify(&self, user_id: i64, notification: &Notification) -> Result<DeliveryReport> {
        info!(
            user_id,
            title = %notification.title,
            "Notification: {}",
            notification.body
        );
        Ok(DeliveryReport { sent: 1, failed: 0 })
    }
}

/// Queue in front of a sink, drained by a background task.
#[derive(Clone)]
pub struct NotificationDispatcher {
    tx: mpsc::UnboundedSender<(i64, Notification)>,
}

impl NotificationDispatcher {
    /// Start the delivery worker. Must be called within a tokio runtime.
    pub fn spawn(sink: Arc<dyn NotificationSink>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<(i64, Notification)>();

        tokio::spawn(async move {
            while let Some((user_id, notification)) = rx.recv().await {
                match sink.notify(user_id, &notification).await {
                    Ok(report) if report.failed > 0 => warn!(
                        "Notification to user {} partially failed ({} sent, {} failed)",
                        user_id, report.sent, report.failed
                    ),
                    Ok(_) => debug!("Notified user {}", user_id),
                    Err(e) => warn!("Failed to notify user {}: {}", user_id, e),
                }
            }
            debug!("Notification worker stopped");
        });

        Self { tx }
    }

    /// Queue a notification. Never blocks and never fails.
    pub fn dispatch(&self, user_id: i64, notification: Notification) {
        if self.tx.send((user_id, notification)).is_err() {
            warn!("Notification worker gone, dropping message for user {}", user_id);
        }
    }

    /// Queue the same notification for several users.
    pub fn dispatch_all(&self, user_ids: &[i64], notification: &Notification) {
        for &user_id in user_ids {
            self.dispatch(user_id, notification.clone());
        }
    }
}

impl std::fmt::Debug for NotificationDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationDispatcher")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}
