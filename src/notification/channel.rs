use super::types::{PublishOutcome, QueryTaskNotification};
use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

/// Fleet-wide broadcast of task notifications.
///
/// Delivery is at-least-once to every live subscriber except the publisher itself.
#[async_trait]
pub trait TaskNotificationChannel: Send + Sync {
    /// Identity this binding publishes under and filters out of its own feed.
    fn origin_id(&self) -> &str;

    async fn publish(&self, notification: QueryTaskNotification) -> PublishOutcome;

    fn subscribe(&self) -> NotificationSubscription;
}

pub struct NotificationSubscription {
    origin_id: String,
    receiver: broadcast::Receiver<QueryTaskNotification>,
}

impl NotificationSubscription {
    pub(crate) fn new(
        origin_id: &str,
        receiver: broadcast::Receiver<QueryTaskNotification>,
    ) -> Self {
        Self {
            origin_id: origin_id.to_string(),
            receiver,
        }
    }

    /// Next notification published by someone else. `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<QueryTaskNotification> {
        loop {
            match self.receiver.recv().await {
                Ok(notification) if notification.origin_id == self.origin_id => continue,
                Ok(notification) => return Some(notification),
                Err(RecvError::Lagged(skipped)) => {
                    // The monitor re-publishes anything that was dropped here.
                    tracing::warn!(
                        "Subscriber {} lagged, skipped {} notifications",
                        self.origin_id,
                        skipped
                    );
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}
