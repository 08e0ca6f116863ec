//! Network Protocol Definitions
//!
//! Request and response bodies of the executor's HTTP API, plus the route constants.

use crate::pool::types::ConnectionPoolStats;
use crate::query::types::{Method, Prediction, QueryId, QueryPlan, TaskId};
use crate::results::types::ResultPage;
use crate::storage::types::{QueryStatus, QueryTask};
use serde::{Deserialize, Serialize};

pub const ENDPOINT_CREATE: &str = "/query/create";
pub const ENDPOINT_METHOD: &str = "/query/:id/:method";
pub const ENDPOINT_STATUS: &str = "/query/:id";
pub const ENDPOINT_RESULTS: &str = "/query/:id/results";
pub const ENDPOINT_TASK: &str = "/task/:id";
pub const ENDPOINT_POOLS: &str = "/pools";
pub const ENDPOINT_LOGICS: &str = "/logics";

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateQueryResponse {
    pub query_id: QueryId,
    pub task_id: TaskId,
}

/// Response to any per-query method. Only the fields the method produces are set.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct MethodResponse {
    pub query_id: Option<QueryId>,
    pub method: Option<Method>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<QueryPlan>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub predictions: Option<Vec<Prediction>>,
    /// The method was a no-op: the query was already in that state.
    #[serde(default)]
    pub already_terminal: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QueryStatusResponse {
    pub status: QueryStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TaskStatusResponse {
    pub task: QueryTask,
}

#[derive(Debug, Deserialize)]
pub struct ResultsParams {
    #[serde(default = "default_results_timeout")]
    pub timeout_ms: u64,
}

fn default_results_timeout() -> u64 {
    1_000
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ResultsResponse {
    pub query_id: QueryId,
    pub page: Option<ResultPage>,
    /// No more pages will arrive.
    pub finished: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PoolsResponse {
    pub default_pool: String,
    pub pools: Vec<ConnectionPoolStats>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}
