use super::service::CoordinationService;
use crate::error::{ExecutorError, Result};

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Named counting permits shared through the coordination service.
#[derive(Clone)]
pub struct DistributedSemaphore {
    service: Arc<dyn CoordinationService>,
    name: String,
    capacity: usize,
}

impl DistributedSemaphore {
    pub(crate) fn new(service: Arc<dyn CoordinationService>, name: &str, capacity: usize) -> Self {
        Self {
            service,
            name: name.to_string(),
            capacity,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn try_acquire(&self, permits: usize) -> bool {
        self.service
            .try_acquire_permits(&self.name, self.capacity, permits)
    }

    /// Waits up to `wait` for `permits` to become free.
    pub async fn try_acquire_for(
        &self,
        permits: usize,
        wait: Duration,
        interrupt: &CancellationToken,
    ) -> Result<bool> {
        if permits > self.capacity {
            return Ok(false);
        }
        let deadline = Instant::now() + wait;
        let changes = self.service.changes();

        loop {
            if interrupt.is_cancelled() {
                return Err(ExecutorError::Interrupted);
            }
            if self.try_acquire(permits) {
                return Ok(true);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            tokio::select! {
                _ = changes.notified() => {}
                _ = tokio::time::sleep(POLL_INTERVAL.min(deadline - now)) => {}
                _ = interrupt.cancelled() => return Err(ExecutorError::Interrupted),
            }
        }
    }

    /// Like `try_acquire_for` with a single permit, returning a guard that gives it back.
    pub async fn acquire_permit(
        &self,
        wait: Duration,
        interrupt: &CancellationToken,
    ) -> Result<Option<SemaphorePermitGuard>> {
        if self.try_acquire_for(1, wait, interrupt).await? {
            Ok(Some(SemaphorePermitGuard {
                semaphore: self.clone(),
            }))
        } else {
            Ok(None)
        }
    }

    pub fn release(&self, permits: usize) {
        self.service.release_permits(&self.name, permits);
    }

    /// Takes every free permit, returning the number taken.
    pub fn drain_permits(&self) -> usize {
        let drained = self.service.drain_permits(&self.name, self.capacity);
        tracing::debug!("Drained {} permits from semaphore {}", drained, self.name);
        drained
    }

    pub fn available(&self) -> usize {
        self.service.available_permits(&self.name, self.capacity)
    }
}

pub struct SemaphorePermitGuard {
    semaphore: DistributedSemaphore,
}

impl Drop for SemaphorePermitGuard {
    fn drop(&mut self) {
        self.semaphore.release(1);
    }
}
