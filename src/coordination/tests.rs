//! Coordination Module Tests
//!
//! ## Test Scopes
//! - **Locks**: single holder, bounded waits, interruption, scoped release.
//! - **Leases**: expiry hands the lock to the next claimant, never earlier.
//! - **Semaphores**: permit bounds, release and draining.
//! - **Shared Directory**: two file coordinators on one directory exclude each other.

#[cfg(test)]
mod tests {
    use crate::clock::{Clock, ManualClock, SystemClock};
    use crate::config::LockConfig;
    use crate::coordination::lock::LockProvider;
    use crate::coordination::file::FileCoordinator;
    use crate::coordination::service::{CoordinationService, InMemoryCoordinator};
    use crate::error::ExecutorError;
    use crate::query::types::QueryId;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn provider_with(clock: Arc<dyn Clock>, wait_ms: u64, lease_ms: u64) -> Arc<LockProvider> {
        let coordinator = InMemoryCoordinator::new(clock);
        LockProvider::new(
            coordinator,
            &LockConfig {
                lock_wait_time_ms: wait_ms,
                lock_lease_time_ms: lease_ms,
            },
        )
    }

    // ============================================================
    // LOCKS
    // ============================================================

    #[test]
    fn test_single_holder() {
        let provider = provider_with(Arc::new(SystemClock), 100, 30_000);
        let first = provider.lock("q-1");
        let second = provider.lock("q-1");

        assert!(first.try_lock());
        assert!(!second.try_lock(), "second claimant must not get a held lock");
        assert!(first.is_held());
        assert!(!second.is_held());

        first.unlock();
        assert!(second.try_lock());
    }

    #[test]
    fn test_query_scoped_names() {
        let provider = provider_with(Arc::new(SystemClock), 100, 30_000);
        let query_id = QueryId("abc".to_string());

        assert_eq!(provider.query_lock(&query_id).name(), "abc");
        assert_eq!(provider.resource_lock(&query_id, "submit").name(), "abc:submit");

        // Different resources of one query do not contend.
        assert!(provider.query_lock(&query_id).try_lock());
        assert!(provider.resource_lock(&query_id, "submit").try_lock());
    }

    #[tokio::test]
    async fn test_try_lock_for_times_out_on_contention() {
        let provider = provider_with(Arc::new(SystemClock), 100, 30_000);
        let holder = provider.lock("busy");
        assert!(holder.try_lock());

        let waiter = provider.lock("busy");
        let acquired = waiter
            .try_lock_for(Duration::from_millis(60), &CancellationToken::new())
            .await
            .unwrap();

        assert!(!acquired);
    }

    #[tokio::test]
    async fn test_waiter_acquires_after_release() {
        let provider = provider_with(Arc::new(SystemClock), 100, 30_000);
        let holder = provider.lock("handoff");
        assert!(holder.try_lock());

        let waiter = provider.lock("handoff");
        let handle = tokio::spawn(async move {
            waiter
                .try_lock_for(Duration::from_secs(2), &CancellationToken::new())
                .await
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        holder.unlock();

        assert_eq!(handle.await.unwrap(), Ok(true));
    }

    #[tokio::test]
    async fn test_unbounded_lock_is_interruptible() {
        let provider = provider_with(Arc::new(SystemClock), 100, 30_000);
        let holder = provider.lock("stuck");
        assert!(holder.try_lock());

        let interrupt = CancellationToken::new();
        let waiter = provider.lock("stuck");
        let token = interrupt.clone();
        let handle = tokio::spawn(async move { waiter.lock(&token).await });

        tokio::time::sleep(Duration::from_millis(30)).await;
        interrupt.cancel();

        assert_eq!(handle.await.unwrap(), Err(ExecutorError::Interrupted));
    }

    #[tokio::test]
    async fn test_guard_releases_on_drop_and_times_out_when_held() {
        let provider = provider_with(Arc::new(SystemClock), 50, 30_000);
        let interrupt = CancellationToken::new();

        {
            let _guard = provider.lock("scoped").acquire(&interrupt).await.unwrap();
            let contender = provider.lock("scoped").acquire(&interrupt).await;
            assert!(matches!(contender, Err(ExecutorError::LockTimeout(name)) if name == "scoped"));
        }

        assert!(provider.lock("scoped").try_lock(), "guard drop must release the lock");
    }

    // ============================================================
    // LEASES
    // ============================================================

    #[test]
    fn test_lease_expiry_recovery() {
        let clock = ManualClock::new(1_000);
        let provider = provider_with(clock.clone(), 100, 30_000);

        // ARRANGE: a holder takes the lock, then "crashes" (never renews or unlocks)
        let crashed = provider.lock("q-lease");
        assert!(crashed.try_lock());

        let claimant = provider.lock("q-lease");

        // ASSERT: not before the lease elapses
        clock.advance(Duration::from_millis(29_999));
        assert!(!claimant.try_lock());

        // ASSERT: once leaseTime has elapsed the second claimant gets it
        clock.advance(Duration::from_millis(1));
        assert!(claimant.try_lock());
        assert!(claimant.is_held());
        assert!(!crashed.renew(), "the crashed holder's lease is gone");
    }

    #[test]
    fn test_renewal_keeps_lease_alive() {
        let clock = ManualClock::new(0);
        let provider = provider_with(clock.clone(), 100, 10_000);
        let holder = provider.lock("renewed");
        let claimant = provider.lock("renewed");
        assert!(holder.try_lock());

        for _ in 0..5 {
            clock.advance(Duration::from_millis(5_000));
            assert!(holder.renew());
            assert!(!claimant.try_lock());
        }
    }

    // ============================================================
    // SEMAPHORES
    // ============================================================

    #[tokio::test]
    async fn test_semaphore_bounds_and_release() {
        let provider = provider_with(Arc::new(SystemClock), 100, 30_000);
        let semaphore = provider.semaphore("executor:WAREHOUSE", 2);

        assert!(semaphore.try_acquire(1));
        assert!(semaphore.try_acquire(1));
        assert!(!semaphore.try_acquire(1));
        assert_eq!(semaphore.available(), 0);

        let timed = semaphore
            .try_acquire_for(1, Duration::from_millis(40), &CancellationToken::new())
            .await
            .unwrap();
        assert!(!timed);

        semaphore.release(1);
        assert_eq!(semaphore.available(), 1);
    }

    #[tokio::test]
    async fn test_semaphore_drain_and_guard() {
        let provider = provider_with(Arc::new(SystemClock), 100, 30_000);
        let semaphore = provider.semaphore("drain", 5);
        let interrupt = CancellationToken::new();

        let guard = semaphore
            .acquire_permit(Duration::from_millis(10), &interrupt)
            .await
            .unwrap()
            .expect("permit available");

        assert_eq!(semaphore.drain_permits(), 4);
        assert_eq!(semaphore.available(), 0);

        drop(guard);
        assert_eq!(semaphore.available(), 1);
    }

    // ============================================================
    // SHARED DIRECTORY
    // ============================================================

    #[test]
    fn test_file_coordinators_share_one_lease_table() {
        let dir = tempfile::tempdir().unwrap();
        let clock = ManualClock::new(1_000);
        // Two handles on one directory stand in for two executor processes
        let first = FileCoordinator::open(dir.path(), clock.clone()).unwrap();
        let second = FileCoordinator::open(dir.path(), clock.clone()).unwrap();
        let lease = Duration::from_millis(500);

        assert!(first.try_acquire("q-1", "exec-a", lease));
        assert!(!second.try_acquire("q-1", "exec-b", lease));
        assert_eq!(second.lease("q-1").unwrap().holder, "exec-a");

        // Only the holder may renew or release
        assert!(!second.renew("q-1", "exec-b", lease));
        assert!(!second.release("q-1", "exec-b"));
        assert!(first.renew("q-1", "exec-a", lease));

        assert!(first.release("q-1", "exec-a"));
        assert!(second.lease("q-1").is_none());
        assert!(second.try_acquire("q-1", "exec-b", lease));
    }

    #[test]
    fn test_file_lease_expires_for_other_process() {
        let dir = tempfile::tempdir().unwrap();
        let clock = ManualClock::new(1_000);
        let first = FileCoordinator::open(dir.path(), clock.clone()).unwrap();
        let second = FileCoordinator::open(dir.path(), clock.clone()).unwrap();
        let lease = Duration::from_millis(500);

        // ARRANGE: exec-a takes the lock and never comes back
        assert!(first.try_acquire("q-1", "exec-a", lease));

        // ASSERT: not before the lease elapses
        clock.advance(Duration::from_millis(499));
        assert!(!second.try_acquire("q-1", "exec-b", lease));

        // ASSERT: afterwards the other process gets it and exec-a cannot renew
        clock.advance(Duration::from_millis(1));
        assert!(second.try_acquire("q-1", "exec-b", lease));
        assert!(!first.renew("q-1", "exec-a", lease));
    }

    #[test]
    fn test_file_permits_are_counted_across_coordinators() {
        let dir = tempfile::tempdir().unwrap();
        let first = FileCoordinator::open(dir.path(), Arc::new(SystemClock)).unwrap();
        let second = FileCoordinator::open(dir.path(), Arc::new(SystemClock)).unwrap();

        assert!(first.try_acquire_permits("executor:WAREHOUSE", 3, 2));
        assert!(!second.try_acquire_permits("executor:WAREHOUSE", 3, 2));
        assert_eq!(second.available_permits("executor:WAREHOUSE", 3), 1);
        assert_eq!(second.drain_permits("executor:WAREHOUSE", 3), 1);

        first.release_permits("executor:WAREHOUSE", 2);
        assert_eq!(second.available_permits("executor:WAREHOUSE", 3), 2);
    }

    #[tokio::test]
    async fn test_lock_provider_over_shared_directory() {
        let dir = tempfile::tempdir().unwrap();
        let config = LockConfig {
            lock_wait_time_ms: 100,
            lock_lease_time_ms: 30_000,
        };
        let first = LockProvider::new(
            FileCoordinator::open(dir.path(), Arc::new(SystemClock)).unwrap(),
            &config,
        );
        let second = LockProvider::new(
            FileCoordinator::open(dir.path(), Arc::new(SystemClock)).unwrap(),
            &config,
        );
        let query_id = QueryId("q-shared".to_string());

        let guard = first
            .query_lock(&query_id)
            .acquire(&CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(
            second.query_lock(&query_id).acquire(&CancellationToken::new()).await,
            Err(ExecutorError::LockTimeout(_))
        ));

        drop(guard);
        assert!(
            second
                .query_lock(&query_id)
                .acquire(&CancellationToken::new())
                .await
                .is_ok()
        );
    }
}
