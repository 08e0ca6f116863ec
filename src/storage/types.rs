use crate::query::types::{Method, QueryDefinition, QueryId, QueryPlan, TaskId};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a single task.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    /// Accepted but not yet claimed by any executor.
    Queued,
    /// Claimed by the executor named in `QueryTask::owner`, under a lease.
    Running,
    Complete,
    Failed,
}

/// Durable unit of work: one lifecycle-method invocation against one query.
///
/// Mutated only by the executor holding the query's lock.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryTask {
    pub task_id: TaskId,
    pub query_id: QueryId,
    pub method: Method,
    pub state: TaskState,
    /// Executor currently running the task (while Running).
    pub owner: Option<String>,
    /// Timestamp (ms) when the running executor's lease lapses.
    /// A Running task past this point is considered abandoned.
    pub lease_expires: Option<u64>,
    pub created_at: u64,
    pub updated_at: u64,
    pub error: Option<String>,
}

impl QueryTask {
    pub fn queued(query_id: QueryId, method: Method, now_ms: u64) -> Self {
        Self {
            task_id: TaskId::new(),
            query_id,
            method,
            state: TaskState::Queued,
            owner: None,
            lease_expires: None,
            created_at: now_ms,
            updated_at: now_ms,
            error: None,
        }
    }

    /// Queued, or Running under a lease that has lapsed.
    pub fn is_claimable(&self, now_ms: u64) -> bool {
        match self.state {
            TaskState::Queued => true,
            TaskState::Running => self.lease_expired(now_ms),
            _ => false,
        }
    }

    pub fn lease_expired(&self, now_ms: u64) -> bool {
        self.lease_expires.map(|lease| now_ms >= lease).unwrap_or(true)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, TaskState::Complete | TaskState::Failed)
    }
}

/// Lifecycle state of a query as a whole.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueryState {
    Queued,
    Running,
    /// A CANCEL arrived while a NEXT was in flight; the NEXT is unwinding.
    Cancelling,
    Cancelled,
    Complete,
    Failed,
    /// Tombstone left by CLOSE until expiry cleanup.
    Closed,
}

impl QueryState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            QueryState::Cancelled | QueryState::Complete | QueryState::Failed | QueryState::Closed
        )
    }
}

/// Durable per-query record, keyed by query id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryStatus {
    pub query_id: QueryId,
    pub definition: QueryDefinition,
    pub state: QueryState,
    pub plan: Option<QueryPlan>,
    /// Opaque resume token from the last scan batch consumed.
    pub checkpoint: Option<String>,
    pub pages_published: u64,
    pub results_published: u64,
    pub error: Option<String>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl QueryStatus {
    pub fn new(query_id: QueryId, definition: QueryDefinition, now_ms: u64) -> Self {
        Self {
            query_id,
            definition,
            state: QueryState::Queued,
            plan: None,
            checkpoint: None,
            pages_published: 0,
            results_published: 0,
            error: None,
            created_at: now_ms,
            updated_at: now_ms,
        }
    }

    pub fn transition(&mut self, state: QueryState, now_ms: u64) {
        tracing::debug!("Query {} {:?} -> {:?}", self.query_id, self.state, state);
        self.state = state;
        self.updated_at = now_ms;
    }
}
