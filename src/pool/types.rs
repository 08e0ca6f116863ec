use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::time::Instant;
use tokio::sync::OwnedSemaphorePermit;

/// Priority tier of a connection pool, ADMIN > HIGH > NORMAL > LOW.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Admin,
    High,
    #[default]
    Normal,
    Low,
}

impl Priority {
    pub const ALL: [Priority; 4] = [Priority::Admin, Priority::High, Priority::Normal, Priority::Low];

    fn rank(&self) -> u8 {
        match self {
            Priority::Admin => 3,
            Priority::High => 2,
            Priority::Normal => 1,
            Priority::Low => 0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Admin => "ADMIN",
            Priority::High => "HIGH",
            Priority::Normal => "NORMAL",
            Priority::Low => "LOW",
        }
    }
}

impl PartialOrd for Priority {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Priority {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One tier of a named pool.
///
/// Ordered by pool name ascending, then priority descending within a name, so listings
/// show `INGEST/ADMIN` before `INGEST/LOW` before `WAREHOUSE/ADMIN`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ConnectionPool {
    pub pool_name: String,
    pub priority: Priority,
}

impl ConnectionPool {
    pub fn new(pool_name: &str, priority: Priority) -> Self {
        Self {
            pool_name: pool_name.to_string(),
            priority,
        }
    }
}

impl PartialOrd for ConnectionPool {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ConnectionPool {
    fn cmp(&self, other: &Self) -> Ordering {
        self.pool_name
            .cmp(&other.pool_name)
            .then_with(|| other.priority.cmp(&self.priority))
    }
}

impl fmt::Display for ConnectionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.pool_name, self.priority)
    }
}

/// Snapshot of a tier's usage, as reported by the pool listing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionPoolStats {
    pub pool_name: String,
    pub priority: Priority,
    pub size: usize,
    pub in_use: usize,
    pub available: usize,
}

/// A backend connection handed out by the allocator.
///
/// Holds one permit of its tier; the permit returns to the tier when the connection is
/// released or dropped.
#[derive(Debug)]
pub struct Connection {
    id: String,
    pool: ConnectionPool,
    acquired_at: Instant,
    _permit: OwnedSemaphorePermit,
}

impl Connection {
    pub(crate) fn new(pool: ConnectionPool, permit: OwnedSemaphorePermit) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            pool,
            acquired_at: Instant::now(),
            _permit: permit,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    pub fn held_for(&self) -> std::time::Duration {
        self.acquired_at.elapsed()
    }
}
