use crate::coordination::semaphore::SemaphorePermitGuard;
use crate::executor::collaborators::ScanContext;
use crate::pool::types::Connection;
use crate::query::types::{Method, QueryId, TaskId};
use serde::{Deserialize, Serialize};

/// What running one task amounted to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskOutcome {
    /// Another executor got there first, or the task is no longer claimable.
    Skipped,
    Planned,
    /// A NEXT published a page.
    Page { page_number: u64, entries: usize },
    /// The scan ran dry; the query is Complete.
    Exhausted { pages: u64 },
    /// A NEXT noticed a CANCEL and unwound.
    Interrupted,
    Cancelled,
    Closed,
    /// CANCEL or CLOSE against a query that had already reached that state.
    AlreadyTerminal,
}

/// A task the executor has been told about, via the bus or locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub task_id: TaskId,
    pub query_id: QueryId,
    pub method: Method,
}

/// An open scan held by this executor between NEXT calls on one query.
pub(crate) struct ScanSession {
    pub connection: Connection,
    pub _permit: SemaphorePermitGuard,
    pub scan: Box<dyn ScanContext>,
    /// Checkpoint the scan is positioned at. A session whose checkpoint differs from the
    /// stored one is stale (another executor advanced the query) and is reopened.
    pub checkpoint: Option<String>,
}

impl ScanSession {
    pub async fn close(mut self) -> Connection {
        self.scan.close().await;
        self.connection
    }
}
