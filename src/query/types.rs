use crate::pool::types::Priority;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Identifier of a query across the whole fleet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryId(pub String);

impl QueryId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for QueryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for QueryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of one lifecycle-method invocation against a query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Method {
    Create,
    Plan,
    Predict,
    Next,
    Cancel,
    Close,
}

impl Method {
    /// PLAN and PREDICT never touch shared state and run without the query lock.
    pub fn is_read_only(&self) -> bool {
        matches!(self, Method::Plan | Method::Predict)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Create => "CREATE",
            Method::Plan => "PLAN",
            Method::Predict => "PREDICT",
            Method::Next => "NEXT",
            Method::Cancel => "CANCEL",
            Method::Close => "CLOSE",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "CREATE" => Some(Method::Create),
            "PLAN" => Some(Method::Plan),
            "PREDICT" => Some(Method::Predict),
            "NEXT" => Some(Method::Next),
            "CANCEL" => Some(Method::Cancel),
            "CLOSE" => Some(Method::Close),
            _ => None,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable request to run one lifecycle method against a query.
///
/// Only constructible through the named factories, one per method.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct QueryRequest {
    method: Method,
    query_id: QueryId,
}

impl QueryRequest {
    pub fn create(query_id: QueryId) -> Self {
        Self::with(Method::Create, query_id)
    }

    pub fn plan(query_id: QueryId) -> Self {
        Self::with(Method::Plan, query_id)
    }

    pub fn predict(query_id: QueryId) -> Self {
        Self::with(Method::Predict, query_id)
    }

    pub fn next(query_id: QueryId) -> Self {
        Self::with(Method::Next, query_id)
    }

    pub fn cancel(query_id: QueryId) -> Self {
        Self::with(Method::Cancel, query_id)
    }

    pub fn close(query_id: QueryId) -> Self {
        Self::with(Method::Close, query_id)
    }

    /// Dispatches to the named factory for `method`.
    pub fn for_method(method: Method, query_id: QueryId) -> Self {
        match method {
            Method::Create => Self::create(query_id),
            Method::Plan => Self::plan(query_id),
            Method::Predict => Self::predict(query_id),
            Method::Next => Self::next(query_id),
            Method::Cancel => Self::cancel(query_id),
            Method::Close => Self::close(query_id),
        }
    }

    fn with(method: Method, query_id: QueryId) -> Self {
        Self { method, query_id }
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn query_id(&self) -> &QueryId {
        &self.query_id
    }
}

impl fmt::Display for QueryRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.query_id)
    }
}

fn default_page_size() -> usize {
    100
}

/// What a client submits to create a query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryDefinition {
    /// Client-chosen id; one is allocated when absent.
    #[serde(default)]
    pub query_id: Option<QueryId>,
    /// Name of the query logic whose planner handles this query.
    pub logic_name: String,
    pub query: String,
    #[serde(default)]
    pub authorizations: Vec<String>,
    /// Connection pool to draw from; the configured default pool when absent.
    #[serde(default)]
    pub pool_name: Option<String>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

impl QueryDefinition {
    pub fn new(logic_name: &str, query: &str) -> Self {
        Self {
            query_id: None,
            logic_name: logic_name.to_string(),
            query: query.to_string(),
            authorizations: Vec::new(),
            pool_name: None,
            priority: Priority::default(),
            page_size: default_page_size(),
        }
    }
}

/// Scan ranges and iterator settings produced by the planner.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct QueryPlan {
    pub ranges: Vec<ScanRange>,
    pub iterator_settings: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScanRange {
    pub start: String,
    pub end: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Prediction {
    pub name: String,
    pub value: f64,
}
