//! Coordination Service
//!
//! The lease table and permit counters the distributed locks and semaphores are built
//! on. `InMemoryCoordinator` keeps them in process; a deployment spanning hosts plugs a
//! networked implementation in behind the same trait.

use super::types::LeaseRecord;
use crate::clock::Clock;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

pub trait CoordinationService: Send + Sync {
    /// Grants the lock to `holder` if it is free, already held by `holder`, or its
    /// lease has expired.
    fn try_acquire(&self, name: &str, holder: &str, lease: Duration) -> bool;

    /// Extends a live lease. Fails once the lease has expired or moved to another holder.
    fn renew(&self, name: &str, holder: &str, lease: Duration) -> bool;

    /// Releases the lock if `holder` owns it.
    fn release(&self, name: &str, holder: &str) -> bool;

    /// Current live lease on `name`, if any.
    fn lease(&self, name: &str) -> Option<LeaseRecord>;

    fn try_acquire_permits(&self, name: &str, capacity: usize, permits: usize) -> bool;

    fn release_permits(&self, name: &str, permits: usize);

    /// Takes every currently free permit and returns how many were taken.
    fn drain_permits(&self, name: &str, capacity: usize) -> usize;

    fn available_permits(&self, name: &str, capacity: usize) -> usize;

    /// Signalled whenever a lock or permit is released, so waiters can retry early.
    fn changes(&self) -> Arc<Notify>;
}

pub struct InMemoryCoordinator {
    leases: DashMap<String, LeaseRecord>,
    /// Name -> permits in use.
    permits: DashMap<String, usize>,
    clock: Arc<dyn Clock>,
    changes: Arc<Notify>,
}

impl InMemoryCoordinator {
    pub fn new(clock: Arc<dyn Clock>) -> Arc<Self> {
        Arc::new(Self {
            leases: DashMap::new(),
            permits: DashMap::new(),
            clock,
            changes: Arc::new(Notify::new()),
        })
    }

    pub fn lease_count(&self) -> usize {
        let now = self.clock.now_ms();
        self.leases
            .iter()
            .filter(|entry| !entry.value().is_expired(now))
            .count()
    }
}

impl CoordinationService for InMemoryCoordinator {
    fn try_acquire(&self, name: &str, holder: &str, lease: Duration) -> bool {
        let now = self.clock.now_ms();
        let expires_at = now + lease.as_millis() as u64;

        match self.leases.entry(name.to_string()) {
            Entry::Occupied(mut occupied) => {
                let record = occupied.get_mut();
                if record.holder == holder {
                    record.expires_at = expires_at;
                    return true;
                }
                if !record.is_expired(now) {
                    return false;
                }
                tracing::warn!(
                    "Lease on {} held by {} expired at {}, reassigning to {}",
                    name,
                    record.holder,
                    record.expires_at,
                    holder
                );
                *record = LeaseRecord {
                    holder: holder.to_string(),
                    acquired_at: now,
                    expires_at,
                };
                true
            }
            Entry::Vacant(vacant) => {
                vacant.insert(LeaseRecord {
                    holder: holder.to_string(),
                    acquired_at: now,
                    expires_at,
                });
                true
            }
        }
    }

    fn renew(&self, name: &str, holder: &str, lease: Duration) -> bool {
        let now = self.clock.now_ms();
        match self.leases.get_mut(name) {
            Some(mut record) if record.holder == holder && !record.is_expired(now) => {
                record.expires_at = now + lease.as_millis() as u64;
                true
            }
            _ => false,
        }
    }

    fn release(&self, name: &str, holder: &str) -> bool {
        let removed = self
            .leases
            .remove_if(name, |_, record| record.holder == holder)
            .is_some();
        if removed {
            self.changes.notify_waiters();
        }
        removed
    }

    fn lease(&self, name: &str) -> Option<LeaseRecord> {
        let now = self.clock.now_ms();
        self.leases
            .get(name)
            .filter(|record| !record.is_expired(now))
            .map(|record| record.value().clone())
    }

    fn try_acquire_permits(&self, name: &str, capacity: usize, permits: usize) -> bool {
        let mut in_use = self.permits.entry(name.to_string()).or_insert(0);
        if *in_use + permits > capacity {
            return false;
        }
        *in_use += permits;
        true
    }

    fn release_permits(&self, name: &str, permits: usize) {
        if let Some(mut in_use) = self.permits.get_mut(name) {
            *in_use = in_use.saturating_sub(permits);
        }
        self.changes.notify_waiters();
    }

    fn drain_permits(&self, name: &str, capacity: usize) -> usize {
        let mut in_use = self.permits.entry(name.to_string()).or_insert(0);
        let drained = capacity.saturating_sub(*in_use);
        *in_use += drained;
        drained
    }

    fn available_permits(&self, name: &str, capacity: usize) -> usize {
        let in_use = self.permits.get(name).map(|v| *v).unwrap_or(0);
        capacity.saturating_sub(in_use)
    }

    fn changes(&self) -> Arc<Notify> {
        self.changes.clone()
    }
}
