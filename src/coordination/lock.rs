//! Leased Distributed Locks
//!
//! A `DistributedLock` is a handle with its own claimant identity. Two handles for the
//! same name contend with each other even inside one process, which is what keeps two
//! workers of one executor from running the same query concurrently.
//!
//! Lease renewal is the holder's job: a lease left unrenewed past `lease_time` is void
//! and the lock may be granted to the next claimant.

use super::service::CoordinationService;
use super::types::{LeaseRecord, query_lock_name};
use crate::config::LockConfig;
use crate::error::{ExecutorError, Result};
use crate::query::types::QueryId;

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Upper bound between two acquisition attempts while waiting.
const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Hands out locks and semaphores with the configured wait and lease times.
pub struct LockProvider {
    service: Arc<dyn CoordinationService>,
    wait_time: Duration,
    lease_time: Duration,
}

impl LockProvider {
    pub fn new(service: Arc<dyn CoordinationService>, config: &LockConfig) -> Arc<Self> {
        Arc::new(Self {
            service,
            wait_time: config.wait_time(),
            lease_time: config.lease_time(),
        })
    }

    pub fn lock(&self, name: &str) -> DistributedLock {
        DistributedLock {
            service: self.service.clone(),
            name: name.to_string(),
            holder: uuid::Uuid::new_v4().to_string(),
            wait_time: self.wait_time,
            lease_time: self.lease_time,
        }
    }

    /// The exclusive lock guarding a query's tasks and status: `"<queryId>"`.
    pub fn query_lock(&self, query_id: &QueryId) -> DistributedLock {
        self.lock(&query_lock_name(&query_id.0, None))
    }

    /// A lock on one resource of a query: `"<queryId>:<resource>"`.
    pub fn resource_lock(&self, query_id: &QueryId, resource: &str) -> DistributedLock {
        self.lock(&query_lock_name(&query_id.0, Some(resource)))
    }

    pub fn semaphore(&self, name: &str, capacity: usize) -> super::semaphore::DistributedSemaphore {
        super::semaphore::DistributedSemaphore::new(self.service.clone(), name, capacity)
    }

    pub fn wait_time(&self) -> Duration {
        self.wait_time
    }

    pub fn lease_time(&self) -> Duration {
        self.lease_time
    }

    /// The live lease on `name`, if any.
    pub fn lease(&self, name: &str) -> Option<LeaseRecord> {
        self.service.lease(name)
    }
}

#[derive(Clone)]
pub struct DistributedLock {
    service: Arc<dyn CoordinationService>,
    name: String,
    holder: String,
    wait_time: Duration,
    lease_time: Duration,
}

impl DistributedLock {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn holder(&self) -> &str {
        &self.holder
    }

    pub fn lease_time(&self) -> Duration {
        self.lease_time
    }

    pub fn with_lease_time(mut self, lease_time: Duration) -> Self {
        self.lease_time = lease_time;
        self
    }

    pub fn with_wait_time(mut self, wait_time: Duration) -> Self {
        self.wait_time = wait_time;
        self
    }

    /// Non-blocking attempt. `false` on contention.
    pub fn try_lock(&self) -> bool {
        let acquired = self
            .service
            .try_acquire(&self.name, &self.holder, self.lease_time);
        if acquired {
            tracing::trace!("Acquired lock {} as {}", self.name, self.holder);
        }
        acquired
    }

    /// Waits up to `wait` for the lock.
    ///
    /// # Returns
    /// * `Ok(true)` once acquired, `Ok(false)` if `wait` elapsed first.
    /// * `Err(Interrupted)` if `interrupt` fires while waiting.
    pub async fn try_lock_for(&self, wait: Duration, interrupt: &CancellationToken) -> Result<bool> {
        let deadline = Instant::now() + wait;
        let changes = self.service.changes();

        loop {
            if interrupt.is_cancelled() {
                return Err(ExecutorError::Interrupted);
            }
            if self.try_lock() {
                return Ok(true);
            }
            let now = Instant::now();
            if now >= deadline {
                tracing::debug!("Gave up on lock {} after {:?}", self.name, wait);
                return Ok(false);
            }
            let pause = POLL_INTERVAL.min(deadline - now);

            tokio::select! {
                _ = changes.notified() => {}
                _ = tokio::time::sleep(pause) => {}
                _ = interrupt.cancelled() => return Err(ExecutorError::Interrupted),
            }
        }
    }

    /// Waits without bound. Interruption is cancellation, reported as `Interrupted`.
    pub async fn lock(&self, interrupt: &CancellationToken) -> Result<()> {
        let changes = self.service.changes();
        loop {
            if interrupt.is_cancelled() {
                return Err(ExecutorError::Interrupted);
            }
            if self.try_lock() {
                return Ok(());
            }
            tokio::select! {
                _ = changes.notified() => {}
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
                _ = interrupt.cancelled() => return Err(ExecutorError::Interrupted),
            }
        }
    }

    /// Waits up to the configured wait time and returns a guard that unlocks on drop.
    pub async fn acquire(self, interrupt: &CancellationToken) -> Result<LockGuard> {
        if self.try_lock_for(self.wait_time, interrupt).await? {
            Ok(LockGuard {
                lock: self,
                released: false,
            })
        } else {
            Err(ExecutorError::LockTimeout(self.name.clone()))
        }
    }

    /// Extends the lease by another `lease_time`. `false` if the lease was lost.
    pub fn renew(&self) -> bool {
        self.service
            .renew(&self.name, &self.holder, self.lease_time)
    }

    pub fn unlock(&self) {
        if self.service.release(&self.name, &self.holder) {
            tracing::trace!("Released lock {} held by {}", self.name, self.holder);
        }
    }

    pub fn is_held(&self) -> bool {
        self.service
            .lease(&self.name)
            .map(|lease| lease.holder == self.holder)
            .unwrap_or(false)
    }
}

/// Scoped ownership of a lock; released on every exit path.
pub struct LockGuard {
    lock: DistributedLock,
    released: bool,
}

impl LockGuard {
    pub fn lock(&self) -> &DistributedLock {
        &self.lock
    }

    pub fn renew(&self) -> bool {
        self.lock.renew()
    }

    pub fn release(mut self) {
        self.lock.unlock();
        self.released = true;
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if !self.released {
            self.lock.unlock();
        }
    }
}
