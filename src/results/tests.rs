//! Results Module Tests
//!
//! ## Test Scopes
//! - **Channel**: FIFO order, bounded capacity, close semantics.
//! - **Claim check**: oversized pages travel by reference and come back intact.
//! - **Listener**: every page then exactly one close.

#[cfg(test)]
mod tests {
    use crate::config::ResultsConfig;
    use crate::error::ExecutorError;
    use crate::query::types::QueryId;
    use crate::results::channel::{ResultsChannel, ResultsManager};
    use crate::results::claim_check::{
        ClaimCheckCallback, ClaimCheckStore, DirClaimCheckStore, MemoryClaimCheckStore,
    };
    use crate::results::listener::{OnResult, ResultsListener};
    use crate::results::types::{ResultEntry, ResultPage};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    const WAIT: Duration = Duration::from_millis(200);

    fn page(query_id: &QueryId, number: u64, value_size: usize) -> ResultPage {
        ResultPage {
            query_id: query_id.clone(),
            page_number: number,
            entries: vec![ResultEntry {
                key: format!("row-{}", number),
                value: vec![7u8; value_size],
            }],
        }
    }

    // ============================================================
    // CHANNEL
    // ============================================================

    #[tokio::test]
    async fn test_pages_arrive_in_publish_order() {
        let query_id = QueryId::new();
        let channel = ResultsChannel::new(query_id.clone(), 8, 1024, MemoryClaimCheckStore::new());

        for n in 1..=3 {
            assert!(channel.publish(&page(&query_id, n, 4), WAIT).await.unwrap());
        }
        assert!(channel.has_results());

        for n in 1..=3 {
            let received = channel.receive(WAIT).await.unwrap().unwrap();
            assert_eq!(received.page_number, n);
        }
        assert!(!channel.has_results());
        assert_eq!(channel.receive(Duration::from_millis(20)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_publish_times_out_when_full() {
        let query_id = QueryId::new();
        let channel = ResultsChannel::new(query_id.clone(), 1, 1024, MemoryClaimCheckStore::new());

        assert!(channel.publish(&page(&query_id, 1, 4), WAIT).await.unwrap());
        let blocked = channel
            .publish(&page(&query_id, 2, 4), Duration::from_millis(30))
            .await
            .unwrap();
        assert!(!blocked);

        // Room again after a receive
        channel.receive(WAIT).await.unwrap();
        assert!(channel.publish(&page(&query_id, 2, 4), WAIT).await.unwrap());
    }

    #[tokio::test]
    async fn test_close_rejects_publish_but_drains() {
        let query_id = QueryId::new();
        let channel = ResultsChannel::new(query_id.clone(), 4, 1024, MemoryClaimCheckStore::new());
        channel.publish(&page(&query_id, 1, 4), WAIT).await.unwrap();

        channel.close();
        assert!(!channel.publish(&page(&query_id, 2, 4), WAIT).await.unwrap());
        assert_eq!(channel.receive(WAIT).await.unwrap().unwrap().page_number, 1);
        assert_eq!(channel.receive(WAIT).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_close_wakes_blocked_receiver() {
        let channel = ResultsChannel::new(QueryId::new(), 4, 1024, MemoryClaimCheckStore::new());
        let reader = channel.clone();
        let handle = tokio::spawn(async move { reader.receive(Duration::from_secs(10)).await });

        tokio::time::sleep(Duration::from_millis(30)).await;
        channel.close();

        let result = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("receiver should wake on close")
            .unwrap();
        assert_eq!(result, Ok(None));
    }

    // ============================================================
    // CLAIM CHECK
    // ============================================================

    #[tokio::test]
    async fn test_oversized_page_round_trips_by_reference() {
        let query_id = QueryId::new();
        let store = MemoryClaimCheckStore::new();
        let channel = ResultsChannel::new(query_id.clone(), 4, 256, store.clone());

        let small = page(&query_id, 1, 16);
        let large = page(&query_id, 2, 4096);
        channel.publish(&small, WAIT).await.unwrap();
        channel.publish(&large, WAIT).await.unwrap();

        // Only the large page was parked
        assert_eq!(store.len(), 1);

        assert_eq!(channel.receive(WAIT).await.unwrap(), Some(small));
        assert_eq!(channel.receive(WAIT).await.unwrap(), Some(large));
        assert!(store.is_empty(), "redeemed claim checks are discarded");
    }

    #[tokio::test]
    async fn test_dir_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirClaimCheckStore::open(dir.path().join("claims")).await.unwrap();
        let query_id = QueryId::new();
        let expected = page(&query_id, 9, 10_000);

        let reference = store
            .put(bincode::serialize(&expected).unwrap())
            .await
            .unwrap();
        let callback = ClaimCheckCallback::new(store.clone(), &reference);

        let fetched: ResultPage = callback.get_payload().await.unwrap();
        assert_eq!(fetched, expected);
        assert!(store.get(&reference).await.is_err());
    }

    #[tokio::test]
    async fn test_missing_claim_check_fails_after_retry() {
        let store = MemoryClaimCheckStore::new();
        let callback = ClaimCheckCallback::new(store, "gone");

        let result = callback.get_payload::<ResultPage>().await;
        match result {
            Err(ExecutorError::ClaimCheckFetchFailed { reference, .. }) => {
                assert_eq!(reference, "gone")
            }
            other => panic!("expected CLAIM_CHECK_FETCH_FAILED, got {:?}", other),
        }
    }

    // ============================================================
    // LISTENER / MANAGER
    // ============================================================

    #[derive(Default)]
    struct Recorder {
        pages: Mutex<Vec<u64>>,
        errors: AtomicUsize,
        closes: AtomicUsize,
    }

    impl ResultsListener for Recorder {
        fn on_result(&self, page: ResultPage) {
            self.pages.lock().unwrap().push(page.page_number);
        }
        fn on_error(&self, _error: ExecutorError) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
        fn on_close(&self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_listener_sees_pages_then_close() {
        let query_id = QueryId::new();
        let channel = ResultsChannel::new(query_id.clone(), 8, 1024, MemoryClaimCheckStore::new());
        for n in 1..=4 {
            channel.publish(&page(&query_id, n, 4), WAIT).await.unwrap();
        }
        channel.close();

        let recorder = Recorder::default();
        channel.listen(&recorder, Duration::from_millis(20)).await;

        assert_eq!(*recorder.pages.lock().unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(recorder.errors.load(Ordering::SeqCst), 0);
        assert_eq!(recorder.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_on_result_adapter() {
        let query_id = QueryId::new();
        let channel = ResultsChannel::new(query_id.clone(), 8, 1024, MemoryClaimCheckStore::new());
        channel.publish(&page(&query_id, 1, 4), WAIT).await.unwrap();
        channel.close();

        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let adapter = OnResult(move |_page: ResultPage| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        channel.listen(&adapter, Duration::from_millis(20)).await;

        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_manager_reuses_and_discards_channels() {
        let store = MemoryClaimCheckStore::new();
        let config = ResultsConfig {
            inline_threshold_bytes: 64,
            ..ResultsConfig::default()
        };
        let manager = ResultsManager::new(&config, store.clone());
        let query_id = QueryId::new();

        let channel = manager.create(&query_id);
        assert!(Arc::ptr_eq(&channel, &manager.create(&query_id)));

        channel.publish(&page(&query_id, 1, 1024), WAIT).await.unwrap();
        assert_eq!(store.len(), 1);

        assert!(manager.remove(&query_id).await);
        assert!(manager.get(&query_id).is_none());
        assert!(channel.is_closed());
        assert!(store.is_empty(), "undelivered claim checks are released");
    }
}
