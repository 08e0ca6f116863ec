//! Notification Module Tests
//!
//! ## Test Scopes
//! - **Local hub**: fan-out, self-origin suppression, lag handling.
//! - **HTTP bus**: delivery to a live peer and `Nack` for an unreachable one.

#[cfg(test)]
mod tests {
    use crate::notification::channel::TaskNotificationChannel;
    use crate::notification::http::{HttpNotificationBus, NOTIFY_PATH};
    use crate::notification::local::NotificationHub;
    use crate::notification::types::{PublishOutcome, QueryTaskNotification};
    use crate::query::types::{QueryId, QueryRequest, TaskId};
    use axum::extract::State;
    use axum::routing::post;
    use axum::{Json, Router};
    use std::sync::Arc;
    use std::time::Duration;

    fn notification(origin: &str) -> QueryTaskNotification {
        QueryTaskNotification::new(origin, TaskId::new(), QueryRequest::next(QueryId::new()))
    }

    // ============================================================
    // LOCAL HUB
    // ============================================================

    #[tokio::test]
    async fn test_every_other_executor_receives() {
        let hub = NotificationHub::new(16);
        let a = hub.bind("executor-a");
        let b = hub.bind("executor-b");
        let c = hub.bind("executor-c");
        let mut sub_b = b.subscribe();
        let mut sub_c = c.subscribe();

        let sent = notification("executor-a");
        assert_eq!(a.publish(sent.clone()).await, PublishOutcome::Ack);

        assert_eq!(sub_b.recv().await, Some(sent.clone()));
        assert_eq!(sub_c.recv().await, Some(sent));
    }

    #[tokio::test]
    async fn test_self_origin_is_suppressed() {
        let hub = NotificationHub::new(16);
        let a = hub.bind("executor-a");
        let b = hub.bind("executor-b");
        let mut own = a.subscribe();

        a.publish(notification("executor-a")).await;
        let from_b = notification("executor-b");
        b.publish(from_b.clone()).await;

        // The first thing `a` sees is b's notification, never its own
        let received = tokio::time::timeout(Duration::from_secs(1), own.recv())
            .await
            .unwrap();
        assert_eq!(received, Some(from_b));
    }

    #[tokio::test]
    async fn test_lagged_subscriber_skips_ahead() {
        let hub = NotificationHub::new(2);
        let publisher = hub.bind("front-door");
        let mut slow = hub.bind("executor-slow").subscribe();

        let mut sent = Vec::new();
        for _ in 0..5 {
            let n = notification("front-door");
            sent.push(n.clone());
            publisher.publish(n).await;
        }

        // Oldest entries were overwritten; the subscriber resumes at the oldest retained
        assert_eq!(slow.recv().await, Some(sent[3].clone()));
        assert_eq!(slow.recv().await, Some(sent[4].clone()));
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_nacked() {
        let hub = NotificationHub::new(4);
        let lonely = hub.bind("alone");
        assert!(!lonely.publish(notification("alone")).await.is_ack());
    }

    // ============================================================
    // HTTP BUS
    // ============================================================

    async fn spawn_peer(hub: Arc<NotificationHub>) -> String {
        async fn inject(
            State(hub): State<Arc<NotificationHub>>,
            Json(notification): Json<QueryTaskNotification>,
        ) -> Json<usize> {
            Json(hub.inject(notification))
        }

        let app = Router::new().route(NOTIFY_PATH, post(inject)).with_state(hub);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr.to_string()
    }

    #[tokio::test]
    async fn test_http_bus_delivers_to_peer() {
        let remote_hub = NotificationHub::new(16);
        let mut remote = remote_hub.bind("executor-remote").subscribe();
        let peer_addr = spawn_peer(remote_hub.clone()).await;

        let local_hub = NotificationHub::new(16);
        let bus = HttpNotificationBus::new(local_hub.bind("executor-local"), vec![peer_addr]);

        let sent = notification("executor-local");
        assert_eq!(bus.publish(sent.clone()).await, PublishOutcome::Ack);

        let received = tokio::time::timeout(Duration::from_secs(2), remote.recv())
            .await
            .unwrap();
        assert_eq!(received, Some(sent));
    }

    #[tokio::test]
    async fn test_http_bus_nacks_unreachable_peer() {
        // Bind then drop to get a port nobody listens on
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead = listener.local_addr().unwrap().to_string();
        drop(listener);

        let hub = NotificationHub::new(16);
        let _keepalive = hub.bind("other").subscribe();
        let bus = HttpNotificationBus::new(hub.bind("executor-local"), vec![dead.clone()]);

        match bus.publish(notification("executor-local")).await {
            PublishOutcome::Nack(reason) => assert!(reason.contains(&dead)),
            PublishOutcome::Ack => panic!("unreachable peer must not be acked"),
        }
    }
}
