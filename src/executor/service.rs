//! Client-facing entry point of the executor.
//!
//! Validates a request against the stored query state, records the task, announces it
//! on the notification bus and hands it to the local workers. PLAN and PREDICT never
//! become tasks; they are answered inline.

use super::executor::QueryExecutor;
use super::types::WorkItem;
use crate::coordination::lock::LockGuard;
use crate::error::{ExecutorError, Result};
use crate::notification::types::{PublishOutcome, QueryTaskNotification};
use crate::query::types::{
    Method, Prediction, QueryDefinition, QueryId, QueryPlan, QueryRequest, TaskId,
};
use crate::results::types::ResultPage;
use crate::storage::types::{QueryState, QueryStatus, QueryTask};

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub struct QueryService {
    executor: Arc<QueryExecutor>,
}

impl QueryService {
    pub fn new(executor: Arc<QueryExecutor>) -> Arc<Self> {
        Arc::new(Self { executor })
    }

    pub fn executor(&self) -> &Arc<QueryExecutor> {
        &self.executor
    }

    /// Registers a new query and queues its CREATE task.
    ///
    /// # Returns
    /// * `UnknownQueryLogic` / `PoolUnknown` when the definition names something that
    ///   is not configured.
    /// * `InvalidRequest` when the query id is already taken or the page size is zero.
    /// * `LockTimeout` when the query id is contended past the lock wait time.
    pub async fn create(&self, mut definition: QueryDefinition) -> Result<(QueryId, TaskId)> {
        if !self.executor.logics().has_logic(&definition.logic_name) {
            return Err(ExecutorError::UnknownQueryLogic(definition.logic_name));
        }
        if let Some(pool) = &definition.pool_name
            && !self.executor.pools().has_pool(pool)
        {
            return Err(ExecutorError::PoolUnknown(pool.clone()));
        }
        if definition.page_size == 0 {
            return Err(ExecutorError::InvalidRequest(
                "page_size must be at least 1".to_string(),
            ));
        }

        let query_id = definition.query_id.clone().unwrap_or_default();
        definition.query_id = Some(query_id.clone());

        let task = {
            let _guard = self.query_lock(&query_id).await?;
            let store = self.executor.store();
            if store.load_query(&query_id)?.is_some() {
                return Err(ExecutorError::InvalidRequest(format!(
                    "query {} already exists",
                    query_id
                )));
            }

            let now = self.executor.clock().now_ms();
            store.put_query(&QueryStatus::new(query_id.clone(), definition, now))?;
            let task = QueryTask::queued(query_id.clone(), Method::Create, now);
            store.put_task(&task)?;
            task
        };
        tracing::info!("Query {} created", query_id);

        self.announce(&task).await;
        self.dispatch(&task);
        Ok((query_id, task.task_id))
    }

    /// Queues NEXT, CANCEL or CLOSE for an existing query.
    ///
    /// `Ok(None)` means the query already reached the state the method asks for and
    /// nothing was queued. The task is written under the query lock, so a submit that
    /// races a CLOSE either lands before CLOSE sweeps the query's tasks or is refused
    /// with `QueryClosed`.
    pub async fn submit(&self, query_id: &QueryId, method: Method) -> Result<Option<TaskId>> {
        if matches!(method, Method::Create | Method::Plan | Method::Predict) {
            return Err(ExecutorError::InvalidRequest(format!(
                "{} is not submitted as a task",
                method
            )));
        }

        let status = self.status(query_id).await?;
        if !accepts(&status, method)? {
            return Ok(None);
        }

        if method == Method::Cancel {
            self.executor.interrupt(query_id);
        }
        if matches!(method, Method::Cancel | Method::Close) {
            // Our own announcement never reaches this node's dispatcher.
            self.executor.release_session(query_id).await;
        }

        let task = QueryTask::queued(query_id.clone(), method, self.executor.clock().now_ms());
        if method == Method::Cancel {
            // A peer running NEXT holds the query lock; interrupt it before waiting.
            self.announce(&task).await;
        }

        {
            let _guard = self.query_lock(query_id).await?;
            let store = self.executor.store();
            let status = store
                .load_query(query_id)?
                .ok_or_else(|| ExecutorError::UnknownQuery(query_id.to_string()))?;
            if !accepts(&status, method)? {
                return Ok(None);
            }
            store.put_task(&task)?;
        }

        if method != Method::Cancel {
            self.announce(&task).await;
        }
        self.dispatch(&task);
        Ok(Some(task.task_id))
    }

    async fn query_lock(&self, query_id: &QueryId) -> Result<LockGuard> {
        self.executor
            .locks()
            .query_lock(query_id)
            .acquire(&CancellationToken::new())
            .await
    }

    async fn announce(&self, task: &QueryTask) {
        let executor = &self.executor;
        let notification = QueryTaskNotification::new(
            executor.id(),
            task.task_id.clone(),
            QueryRequest::for_method(task.method, task.query_id.clone()),
        );
        match executor.channel().publish(notification).await {
            PublishOutcome::Ack => {
                tracing::debug!(
                    "Announced {} task {} for {}",
                    task.method,
                    task.task_id,
                    task.query_id
                );
            }
            PublishOutcome::Nack(reason) => {
                tracing::warn!(
                    "{} task {} for {} not acknowledged ({}); left for the find-work monitor",
                    task.method,
                    task.task_id,
                    task.query_id,
                    reason
                );
            }
        }
    }

    fn dispatch(&self, task: &QueryTask) {
        self.executor.enqueue(WorkItem {
            task_id: task.task_id.clone(),
            query_id: task.query_id.clone(),
            method: task.method,
        });
    }

    pub async fn plan(&self, query_id: &QueryId) -> Result<QueryPlan> {
        self.executor.plan(query_id).await
    }

    pub async fn predict(&self, query_id: &QueryId) -> Result<Vec<Prediction>> {
        self.executor.predict(query_id).await
    }

    pub async fn status(&self, query_id: &QueryId) -> Result<QueryStatus> {
        self.executor
            .store()
            .get_query(query_id)?
            .ok_or_else(|| ExecutorError::UnknownQuery(query_id.to_string()))
    }

    pub fn task(&self, task_id: &TaskId) -> Result<Option<QueryTask>> {
        self.executor.store().load_task(task_id)
    }

    /// Waits up to `timeout` for the next page of `query_id`.
    ///
    /// Returns the page (if any) and whether the stream has ended.
    pub async fn next_page(
        &self,
        query_id: &QueryId,
        timeout: Duration,
    ) -> Result<(Option<ResultPage>, bool)> {
        let Some(channel) = self.executor.results().get(query_id) else {
            let status = self.status(query_id).await?;
            return match status.state {
                QueryState::Closed => Err(ExecutorError::QueryClosed(query_id.to_string())),
                state => Ok((None, state.is_terminal())),
            };
        };

        let page = channel.receive(timeout).await?;
        let finished = page.is_none() && channel.is_closed() && !channel.has_results();
        Ok((page, finished))
    }
}

/// Whether `method` may still be queued for a query in `status`'s state. `Ok(false)`
/// when the query is already where the method would take it.
fn accepts(status: &QueryStatus, method: Method) -> Result<bool> {
    let closed = || ExecutorError::QueryClosed(status.query_id.to_string());
    match (status.state, method) {
        (QueryState::Closed, Method::Cancel | Method::Close) => Ok(false),
        (QueryState::Closed, _) => Err(closed()),
        (state, Method::Cancel) if state.is_terminal() => Ok(false),
        (state, Method::Next) if state.is_terminal() || state == QueryState::Cancelling => {
            Err(closed())
        }
        _ => Ok(true),
    }
}
