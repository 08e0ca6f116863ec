//! Cross-process binding of the notification channel.
//!
//! Publishes go to the local hub (for executors sharing this process) and are POSTed
//! to every peer's `/internal/notify`, where the peer injects them into its own hub.

use super::channel::{NotificationSubscription, TaskNotificationChannel};
use super::local::LocalNotificationBus;
use super::types::{PublishOutcome, QueryTaskNotification};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

pub const NOTIFY_PATH: &str = "/internal/notify";

const DELIVERY_ATTEMPTS: usize = 3;
const DELIVERY_TIMEOUT: Duration = Duration::from_millis(1500);

pub struct HttpNotificationBus {
    local: Arc<LocalNotificationBus>,
    peers: Vec<String>,
    http_client: reqwest::Client,
}

impl HttpNotificationBus {
    pub fn new(local: Arc<LocalNotificationBus>, peers: Vec<String>) -> Arc<Self> {
        let peers = peers
            .into_iter()
            .map(|peer| normalize_peer(&peer))
            .collect();
        Arc::new(Self {
            local,
            peers,
            http_client: reqwest::Client::new(),
        })
    }

    pub fn peers(&self) -> &[String] {
        &self.peers
    }

    async fn deliver(
        http_client: reqwest::Client,
        url: String,
        notification: QueryTaskNotification,
    ) -> Result<()> {
        let mut delay_ms = 150u64;

        for attempt in 0..DELIVERY_ATTEMPTS {
            let response = http_client
                .post(url.clone())
                .json(&notification)
                .timeout(DELIVERY_TIMEOUT)
                .send()
                .await;

            let failure = match response {
                Ok(resp) if resp.status().is_success() => return Ok(()),
                Ok(resp) => anyhow::anyhow!("peer answered {}", resp.status()),
                Err(e) => anyhow::anyhow!(e),
            };

            if attempt + 1 == DELIVERY_ATTEMPTS {
                return Err(failure);
            }
            tracing::debug!("Notify {} failed (attempt {}): {}", url, attempt + 1, failure);
            let jitter = rand::random::<u64>() % 50;
            tokio::time::sleep(Duration::from_millis(delay_ms + jitter)).await;
            delay_ms = (delay_ms * 2).min(1200);
        }

        Err(anyhow::anyhow!("Retry attempts exhausted"))
    }
}

fn normalize_peer(peer: &str) -> String {
    let trimmed = peer.trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    }
}

#[async_trait]
impl TaskNotificationChannel for HttpNotificationBus {
    fn origin_id(&self) -> &str {
        self.local.origin_id()
    }

    async fn publish(&self, notification: QueryTaskNotification) -> PublishOutcome {
        let local = self.local.publish(notification.clone()).await;

        let mut handles = Vec::with_capacity(self.peers.len());
        for peer in &self.peers {
            let url = format!("{}{}", peer, NOTIFY_PATH);
            handles.push((
                peer.clone(),
                tokio::spawn(Self::deliver(
                    self.http_client.clone(),
                    url,
                    notification.clone(),
                )),
            ));
        }

        let mut failed = Vec::new();
        for (peer, handle) in handles {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!("Could not notify peer {}: {}", peer, e);
                    failed.push(peer);
                }
                Err(e) => {
                    tracing::warn!("Notify task for {} aborted: {}", peer, e);
                    failed.push(peer);
                }
            }
        }

        if !failed.is_empty() {
            return PublishOutcome::Nack(format!("unreachable peers: {}", failed.join(", ")));
        }
        if self.peers.is_empty() {
            return local;
        }
        PublishOutcome::Ack
    }

    fn subscribe(&self) -> NotificationSubscription {
        self.local.subscribe()
    }
}
