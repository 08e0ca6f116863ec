use super::channel::{NotificationSubscription, TaskNotificationChannel};
use super::types::{PublishOutcome, QueryTaskNotification};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast;

/// In-process broadcast medium. Every executor in the process binds to the same hub
/// under its own origin id.
pub struct NotificationHub {
    sender: broadcast::Sender<QueryTaskNotification>,
}

impl NotificationHub {
    pub fn new(capacity: usize) -> Arc<Self> {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Arc::new(Self { sender })
    }

    pub fn bind(self: &Arc<Self>, origin_id: &str) -> Arc<LocalNotificationBus> {
        Arc::new(LocalNotificationBus {
            origin_id: origin_id.to_string(),
            hub: self.clone(),
        })
    }

    /// Delivers a notification that arrived from outside the process.
    /// Returns the number of subscribers reached.
    pub fn inject(&self, notification: QueryTaskNotification) -> usize {
        self.sender.send(notification).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

pub struct LocalNotificationBus {
    origin_id: String,
    hub: Arc<NotificationHub>,
}

impl LocalNotificationBus {
    pub fn hub(&self) -> &Arc<NotificationHub> {
        &self.hub
    }
}

#[async_trait]
impl TaskNotificationChannel for LocalNotificationBus {
    fn origin_id(&self) -> &str {
        &self.origin_id
    }

    async fn publish(&self, notification: QueryTaskNotification) -> PublishOutcome {
        match self.hub.sender.send(notification) {
            Ok(receivers) => {
                tracing::trace!("{} published to {} subscribers", self.origin_id, receivers);
                PublishOutcome::Ack
            }
            Err(_) => PublishOutcome::Nack("no subscribers".to_string()),
        }
    }

    fn subscribe(&self) -> NotificationSubscription {
        NotificationSubscription::new(&self.origin_id, self.hub.sender.subscribe())
    }
}
