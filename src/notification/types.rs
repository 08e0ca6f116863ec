use crate::query::types::{QueryRequest, TaskId};
use serde::{Deserialize, Serialize};

/// Tells executors that a task is waiting. Carries no state beyond ids; consumers
/// re-read the task before acting.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueryTaskNotification {
    /// Executor (or front door) that published the notification.
    pub origin_id: String,
    pub task_id: TaskId,
    pub request: QueryRequest,
}

impl QueryTaskNotification {
    pub fn new(origin_id: &str, task_id: TaskId, request: QueryRequest) -> Self {
        Self {
            origin_id: origin_id.to_string(),
            task_id,
            request,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    Ack,
    Nack(String),
}

impl PublishOutcome {
    pub fn is_ack(&self) -> bool {
        matches!(self, PublishOutcome::Ack)
    }
}
