use super::types::{QueryStatus, QueryTask};
use crate::error::Result;
use crate::query::types::{QueryId, TaskId};

/// The durable layer beneath the task store cache.
///
/// Implementations give single-record atomicity only; callers serialise mutations of
/// one query through the query lock.
pub trait TaskBackend: Send + Sync {
    fn put_task(&self, task: &QueryTask) -> Result<()>;

    fn get_task(&self, task_id: &TaskId) -> Result<Option<QueryTask>>;

    /// Returns whether a record was removed.
    fn delete_task(&self, task_id: &TaskId) -> Result<bool>;

    /// Secondary index: ids of every task belonging to `query_id`, oldest first.
    fn task_ids_for_query(&self, query_id: &QueryId) -> Result<Vec<TaskId>>;

    fn all_task_ids(&self) -> Result<Vec<TaskId>>;

    fn put_query(&self, status: &QueryStatus) -> Result<()>;

    fn get_query(&self, query_id: &QueryId) -> Result<Option<QueryStatus>>;

    fn delete_query(&self, query_id: &QueryId) -> Result<bool>;

    fn all_query_ids(&self) -> Result<Vec<QueryId>>;

    /// Makes buffered writes durable. A no-op for backends that never buffer.
    fn flush(&self) -> Result<()>;
}
