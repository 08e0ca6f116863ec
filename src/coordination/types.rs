use serde::{Deserialize, Serialize};

/// A granted lease on a named lock.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LeaseRecord {
    /// Identity of the claimant currently holding the lock.
    pub holder: String,
    /// Timestamp (ms) when the lease was first granted to this holder.
    pub acquired_at: u64,
    /// Timestamp (ms) after which the lease is void unless renewed.
    /// Once `now >= expires_at` any other claimant may take the lock.
    pub expires_at: u64,
}

impl LeaseRecord {
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at
    }
}

/// Naming scheme for query-scoped locks: `"<queryId>"` or `"<queryId>:<resource>"`.
pub fn query_lock_name(query_id: &str, resource: Option<&str>) -> String {
    match resource {
        Some(resource) => format!("{}:{}", query_id, resource),
        None => query_id.to_string(),
    }
}
