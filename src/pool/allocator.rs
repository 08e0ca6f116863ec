//! Priority-Tiered Connection Allocator
//!
//! Every configured pool name owns four independently sized tiers (ADMIN, HIGH, NORMAL,
//! LOW), each backed by its own bounded semaphore. A request draws only from the tier it
//! names: there is no borrowing or preemption across tiers, so ADMIN capacity stays
//! available no matter how busy LOW is.

use super::types::*;
use crate::config::PoolsConfig;
use crate::error::{ExecutorError, Result};

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

struct Tier {
    size: usize,
    permits: Arc<Semaphore>,
}

pub struct ConnectionPoolAllocator {
    /// Ordered by `ConnectionPool`, which gives the deterministic listing order.
    tiers: BTreeMap<ConnectionPool, Tier>,
    default_pool: String,
}

impl ConnectionPoolAllocator {
    /// Builds the tiers from static configuration. The default pool must be configured.
    pub fn new(config: &PoolsConfig) -> Result<Arc<Self>> {
        let mut sizes = Vec::new();
        for pool in &config.pools {
            sizes.push((pool.name.clone(), Priority::Admin, pool.admin));
            sizes.push((pool.name.clone(), Priority::High, pool.high));
            sizes.push((pool.name.clone(), Priority::Normal, pool.normal));
            sizes.push((pool.name.clone(), Priority::Low, pool.low));
        }
        Self::from_tiers(&config.default_pool, sizes)
    }

    pub fn from_tiers(
        default_pool: &str,
        sizes: Vec<(String, Priority, usize)>,
    ) -> Result<Arc<Self>> {
        let mut tiers = BTreeMap::new();
        for (name, priority, size) in sizes {
            tiers.insert(
                ConnectionPool::new(&name, priority),
                Tier {
                    size,
                    permits: Arc::new(Semaphore::new(size)),
                },
            );
        }

        if !tiers.keys().any(|pool| pool.pool_name == default_pool) {
            return Err(ExecutorError::PoolUnknown(default_pool.to_string()));
        }

        tracing::info!(
            "Connection pools initialised: {} tiers, default pool {}",
            tiers.len(),
            default_pool
        );

        Ok(Arc::new(Self {
            tiers,
            default_pool: default_pool.to_string(),
        }))
    }

    pub fn default_pool(&self) -> &str {
        &self.default_pool
    }

    pub fn has_pool(&self, pool_name: &str) -> bool {
        self.tiers.keys().any(|pool| pool.pool_name == pool_name)
    }

    /// Takes a connection from `pool_name`/`priority`, waiting at most `timeout`.
    ///
    /// # Returns
    /// * `PoolUnknown` if no such pool is configured.
    /// * `PoolExhausted` if no permit frees up before the timeout.
    pub async fn allocate(
        &self,
        pool_name: Option<&str>,
        priority: Priority,
        timeout: Duration,
    ) -> Result<Connection> {
        let name = pool_name.unwrap_or(&self.default_pool);
        let key = ConnectionPool::new(name, priority);
        let tier = self
            .tiers
            .get(&key)
            .ok_or_else(|| ExecutorError::PoolUnknown(name.to_string()))?;

        if let Ok(permit) = tier.permits.clone().try_acquire_owned() {
            tracing::debug!("Allocated connection from {} without waiting", key);
            return Ok(Connection::new(key, permit));
        }

        tracing::debug!("Waiting up to {:?} for a connection from {}", timeout, key);

        match tokio::time::timeout(timeout, tier.permits.clone().acquire_owned()).await {
            Ok(Ok(permit)) => Ok(Connection::new(key, permit)),
            Ok(Err(_)) => Err(ExecutorError::Internal(format!("pool {} closed", key))),
            Err(_) => {
                tracing::warn!("Connection pool {} exhausted after {:?}", key, timeout);
                Err(ExecutorError::PoolExhausted {
                    pool: name.to_string(),
                    priority: priority.to_string(),
                })
            }
        }
    }

    /// Returns a connection to its tier.
    pub fn release(&self, connection: Connection) {
        tracing::debug!(
            "Released connection {} to {} after {:?}",
            connection.id(),
            connection.pool(),
            connection.held_for()
        );
        drop(connection);
    }

    /// Lists every tier in pool order with its current usage.
    pub fn pools(&self) -> Vec<ConnectionPoolStats> {
        self.tiers
            .iter()
            .map(|(pool, tier)| {
                let available = tier.permits.available_permits();
                ConnectionPoolStats {
                    pool_name: pool.pool_name.clone(),
                    priority: pool.priority,
                    size: tier.size,
                    in_use: tier.size.saturating_sub(available),
                    available,
                }
            })
            .collect()
    }
}
