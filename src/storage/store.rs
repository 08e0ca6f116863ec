use super::backend::TaskBackend;
use super::types::{QueryState, QueryStatus, QueryTask};
use crate::clock::Clock;
use crate::error::{ExecutorError, Result};
use crate::query::types::{QueryId, TaskId};

use dashmap::DashMap;
use std::sync::Arc;

/// Read-through cache over a [`TaskBackend`].
///
/// Writes go to the backend first and then to the cache. `get_*` serve from the
/// cache; `load_*` always consult the backend and are what lock holders use before
/// mutating, since another executor may have changed the record since it was cached.
/// Any backend read failure evicts the whole cache before the error propagates.
pub struct QueryTaskStore {
    backend: Arc<dyn TaskBackend>,
    tasks: DashMap<TaskId, QueryTask>,
    queries: DashMap<QueryId, QueryStatus>,
    clock: Arc<dyn Clock>,
}

impl QueryTaskStore {
    pub fn new(backend: Arc<dyn TaskBackend>, clock: Arc<dyn Clock>) -> Arc<Self> {
        Arc::new(Self {
            backend,
            tasks: DashMap::new(),
            queries: DashMap::new(),
            clock,
        })
    }

    pub fn backend(&self) -> &Arc<dyn TaskBackend> {
        &self.backend
    }

    pub fn cached_records(&self) -> usize {
        self.tasks.len() + self.queries.len()
    }

    // ---------------------------------------------------------------
    // Tasks
    // ---------------------------------------------------------------

    pub fn put_task(&self, task: &QueryTask) -> Result<()> {
        if let Err(e) = self.backend.put_task(task) {
            self.tasks.remove(&task.task_id);
            return Err(e);
        }
        self.tasks.insert(task.task_id.clone(), task.clone());
        Ok(())
    }

    pub fn get_task(&self, task_id: &TaskId) -> Result<Option<QueryTask>> {
        if let Some(task) = self.tasks.get(task_id) {
            return Ok(Some(task.clone()));
        }
        self.load_task(task_id)
    }

    pub fn load_task(&self, task_id: &TaskId) -> Result<Option<QueryTask>> {
        match self.backend.get_task(task_id) {
            Ok(Some(task)) => {
                self.tasks.insert(task_id.clone(), task.clone());
                Ok(Some(task))
            }
            Ok(None) => {
                self.tasks.remove(task_id);
                Ok(None)
            }
            Err(e) => Err(self.evict(e)),
        }
    }

    pub fn delete_task(&self, task_id: &TaskId) -> Result<bool> {
        self.tasks.remove(task_id);
        self.backend.delete_task(task_id)
    }

    /// Lazily walks every task of `query_id`, oldest first.
    pub fn find_tasks(&self, query_id: &QueryId) -> Result<TaskCursor<'_>> {
        let ids = self.list_ids(Scope::Query(query_id.clone()))?;
        Ok(TaskCursor {
            store: self,
            scope: Scope::Query(query_id.clone()),
            ids,
            position: 0,
        })
    }

    /// Lazily walks every task in the store, always reading through to the backend.
    pub fn scan_tasks(&self) -> Result<TaskCursor<'_>> {
        let ids = self.list_ids(Scope::All)?;
        Ok(TaskCursor {
            store: self,
            scope: Scope::All,
            ids,
            position: 0,
        })
    }

    fn list_ids(&self, scope: Scope) -> Result<Vec<TaskId>> {
        let listed = match &scope {
            Scope::Query(query_id) => self.backend.task_ids_for_query(query_id),
            Scope::All => self.backend.all_task_ids(),
        };
        listed.map_err(|e| self.evict(e))
    }

    // ---------------------------------------------------------------
    // Query status
    // ---------------------------------------------------------------

    pub fn put_query(&self, status: &QueryStatus) -> Result<()> {
        if let Err(e) = self.backend.put_query(status) {
            self.queries.remove(&status.query_id);
            return Err(e);
        }
        self.queries
            .insert(status.query_id.clone(), status.clone());
        Ok(())
    }

    pub fn get_query(&self, query_id: &QueryId) -> Result<Option<QueryStatus>> {
        if let Some(status) = self.queries.get(query_id) {
            return Ok(Some(status.clone()));
        }
        self.load_query(query_id)
    }

    pub fn load_query(&self, query_id: &QueryId) -> Result<Option<QueryStatus>> {
        match self.backend.get_query(query_id) {
            Ok(Some(status)) => {
                self.queries.insert(query_id.clone(), status.clone());
                Ok(Some(status))
            }
            Ok(None) => {
                self.queries.remove(query_id);
                Ok(None)
            }
            Err(e) => Err(self.evict(e)),
        }
    }

    pub fn delete_query(&self, query_id: &QueryId) -> Result<bool> {
        self.queries.remove(query_id);
        self.backend.delete_query(query_id)
    }

    // ---------------------------------------------------------------
    // Maintenance
    // ---------------------------------------------------------------

    pub fn flush(&self) -> Result<()> {
        self.backend.flush()
    }

    /// Removes terminal tasks and Closed query tombstones whose last update is at
    /// least `older_than_ms` old. Returns the number of records removed.
    ///
    /// Terminal records are never mutated again, so this runs without the query lock.
    pub fn expire(&self, older_than_ms: u64) -> Result<usize> {
        let now = self.clock.now_ms();
        let is_old = |updated_at: u64| updated_at.saturating_add(older_than_ms) <= now;
        let mut removed = 0;

        let mut stale = Vec::new();
        for task in self.scan_tasks()? {
            let task = task?;
            if task.is_terminal() && is_old(task.updated_at) {
                stale.push(task.task_id);
            }
        }
        for task_id in stale {
            if self.delete_task(&task_id)? {
                removed += 1;
            }
        }

        let query_ids = self
            .backend
            .all_query_ids()
            .map_err(|e| self.evict(e))?;
        for query_id in query_ids {
            let Some(status) = self.load_query(&query_id)? else {
                continue;
            };
            if status.state == QueryState::Closed && is_old(status.updated_at) {
                let leftover: Vec<TaskId> = self.list_ids(Scope::Query(query_id.clone()))?;
                for task_id in leftover {
                    if self.delete_task(&task_id)? {
                        removed += 1;
                    }
                }
                if self.delete_query(&query_id)? {
                    removed += 1;
                }
            }
        }

        if removed > 0 {
            tracing::info!("Expired {} task store records", removed);
        }
        Ok(removed)
    }

    fn evict(&self, cause: ExecutorError) -> ExecutorError {
        tracing::warn!(
            "Task store read failed, evicting {} cached records: {}",
            self.cached_records(),
            cause
        );
        self.tasks.clear();
        self.queries.clear();
        match cause {
            ExecutorError::StoreReadFailed(_) => cause,
            other => ExecutorError::StoreReadFailed(other.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
enum Scope {
    Query(QueryId),
    All,
}

/// Finite cursor over a snapshot of task ids.
///
/// Records are fetched one at a time as the cursor advances; ids deleted after the
/// snapshot are skipped. [`TaskCursor::restart`] takes a fresh snapshot.
pub struct TaskCursor<'a> {
    store: &'a QueryTaskStore,
    scope: Scope,
    ids: Vec<TaskId>,
    position: usize,
}

impl TaskCursor<'_> {
    pub fn restart(&mut self) -> Result<()> {
        self.ids = self.store.list_ids(self.scope.clone())?;
        self.position = 0;
        Ok(())
    }

    pub fn remaining(&self) -> usize {
        self.ids.len().saturating_sub(self.position)
    }
}

impl Iterator for TaskCursor<'_> {
    type Item = Result<QueryTask>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.position < self.ids.len() {
            let task_id = &self.ids[self.position];
            self.position += 1;

            let fetched = match self.scope {
                Scope::Query(_) => self.store.get_task(task_id),
                Scope::All => self.store.load_task(task_id),
            };
            match fetched {
                Ok(Some(task)) => return Some(Ok(task)),
                Ok(None) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
        None
    }
}
