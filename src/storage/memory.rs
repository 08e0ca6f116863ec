//! In-memory task backend.
//!
//! Structure: `Partition ID -> Task ID -> QueryTask`, with a `QueryId -> [TaskId]`
//! secondary index kept in insertion order. Used by single-node deployments and tests;
//! nothing survives a restart.

use super::backend::TaskBackend;
use super::partitioner::Partitioner;
use super::types::{QueryStatus, QueryTask};
use crate::error::Result;
use crate::query::types::{QueryId, TaskId};

use dashmap::DashMap;

pub struct MemoryTaskBackend {
    local_tasks: DashMap<u32, DashMap<TaskId, QueryTask>>,
    by_query: DashMap<QueryId, Vec<TaskId>>,
    queries: DashMap<QueryId, QueryStatus>,
    partitioner: Partitioner,
}

impl MemoryTaskBackend {
    pub fn new() -> Self {
        Self {
            local_tasks: DashMap::new(),
            by_query: DashMap::new(),
            queries: DashMap::new(),
            partitioner: Partitioner::default(),
        }
    }

    pub fn local_partition_count(&self) -> usize {
        self.local_tasks.len()
    }

    pub fn local_task_count(&self) -> usize {
        self.local_tasks
            .iter()
            .map(|entry| entry.value().len())
            .sum()
    }
}

impl Default for MemoryTaskBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskBackend for MemoryTaskBackend {
    fn put_task(&self, task: &QueryTask) -> Result<()> {
        let partition = self.partitioner.get_partition(&task.task_id.0);
        let partition_map = self
            .local_tasks
            .entry(partition)
            .or_insert_with(DashMap::new);

        let is_new = partition_map
            .insert(task.task_id.clone(), task.clone())
            .is_none();

        if is_new {
            self.by_query
                .entry(task.query_id.clone())
                .or_default()
                .push(task.task_id.clone());
        }

        tracing::trace!("Stored task {} in partition {}", task.task_id, partition);
        Ok(())
    }

    fn get_task(&self, task_id: &TaskId) -> Result<Option<QueryTask>> {
        let partition = self.partitioner.get_partition(&task_id.0);

        if let Some(partition_map) = self.local_tasks.get(&partition)
            && let Some(task) = partition_map.get(task_id)
        {
            return Ok(Some(task.clone()));
        }

        Ok(None)
    }

    fn delete_task(&self, task_id: &TaskId) -> Result<bool> {
        let partition = self.partitioner.get_partition(&task_id.0);

        let removed = self
            .local_tasks
            .get(&partition)
            .and_then(|partition_map| partition_map.remove(task_id))
            .map(|(_, task)| task);

        match removed {
            Some(task) => {
                let now_empty = match self.by_query.get_mut(&task.query_id) {
                    Some(mut ids) => {
                        ids.retain(|id| id != task_id);
                        ids.is_empty()
                    }
                    None => false,
                };
                if now_empty {
                    self.by_query.remove_if(&task.query_id, |_, ids| ids.is_empty());
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn task_ids_for_query(&self, query_id: &QueryId) -> Result<Vec<TaskId>> {
        Ok(self
            .by_query
            .get(query_id)
            .map(|ids| ids.clone())
            .unwrap_or_default())
    }

    fn all_task_ids(&self) -> Result<Vec<TaskId>> {
        let mut ids = Vec::new();
        for partition in self.local_tasks.iter() {
            for entry in partition.value().iter() {
                ids.push(entry.key().clone());
            }
        }
        Ok(ids)
    }

    fn put_query(&self, status: &QueryStatus) -> Result<()> {
        self.queries.insert(status.query_id.clone(), status.clone());
        Ok(())
    }

    fn get_query(&self, query_id: &QueryId) -> Result<Option<QueryStatus>> {
        Ok(self.queries.get(query_id).map(|status| status.clone()))
    }

    fn delete_query(&self, query_id: &QueryId) -> Result<bool> {
        Ok(self.queries.remove(query_id).is_some())
    }

    fn all_query_ids(&self) -> Result<Vec<QueryId>> {
        Ok(self
            .queries
            .iter()
            .map(|entry| entry.key().clone())
            .collect())
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }
}
