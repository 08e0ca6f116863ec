use crate::clock::Clock;
use crate::config::MonitorConfig;
use crate::error::Result;
use crate::notification::channel::TaskNotificationChannel;
use crate::notification::types::{PublishOutcome, QueryTaskNotification};
use crate::query::types::QueryRequest;
use crate::storage::store::QueryTaskStore;
use crate::storage::types::{QueryTask, TaskState};

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Periodically republishes tasks nobody seems to be working on.
///
/// A task is considered lost when it has sat `Queued` for longer than the grace
/// period, or is `Running` under a lease that has run out.
pub struct FindWorkMonitor {
    store: Arc<QueryTaskStore>,
    channel: Arc<dyn TaskNotificationChannel>,
    clock: Arc<dyn Clock>,
    config: MonitorConfig,
    shutdown: CancellationToken,
}

impl FindWorkMonitor {
    pub fn new(
        store: Arc<QueryTaskStore>,
        channel: Arc<dyn TaskNotificationChannel>,
        clock: Arc<dyn Clock>,
        config: MonitorConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            channel,
            clock,
            config,
            shutdown: CancellationToken::new(),
        })
    }

    fn is_lost(&self, task: &QueryTask, now_ms: u64) -> bool {
        match task.state {
            TaskState::Queued => task.created_at.saturating_add(self.config.grace_period_ms) <= now_ms,
            TaskState::Running => task.lease_expired(now_ms),
            _ => false,
        }
    }

    /// One pass over the store. Returns how many tasks were republished.
    pub async fn tick(&self) -> Result<usize> {
        let now = self.clock.now_ms();

        let mut lost = Vec::new();
        for task in self.store.scan_tasks()? {
            let task = task?;
            if self.is_lost(&task, now) {
                lost.push(task);
            }
        }

        let mut republished = 0;
        for task in lost {
            tracing::debug!(
                "Republishing {:?} {} task {} for {}",
                task.state,
                task.method,
                task.task_id,
                task.query_id
            );
            let notification = QueryTaskNotification::new(
                self.channel.origin_id(),
                task.task_id.clone(),
                QueryRequest::for_method(task.method, task.query_id.clone()),
            );
            match self.channel.publish(notification).await {
                PublishOutcome::Ack => republished += 1,
                PublishOutcome::Nack(reason) => {
                    tracing::warn!("Could not republish task {}: {}", task.task_id, reason);
                }
            }
        }

        if republished > 0 {
            tracing::info!("Find-work monitor republished {} tasks", republished);
        }
        Ok(republished)
    }

    /// Spawns the polling loop. Does nothing when the monitor is disabled.
    pub fn start(self: Arc<Self>) {
        if !self.config.enabled {
            tracing::info!("Find-work monitor disabled");
            return;
        }

        let period = Duration::from_millis(self.config.period_ms.max(1));
        tracing::info!("Find-work monitor polling every {:?}", period);

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // First tick completes immediately.
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = self.shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        if let Err(e) = self.tick().await {
                            tracing::warn!("Find-work monitor pass failed: {}", e);
                        }
                    }
                }
            }
        });
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }
}
