//! Storage Module Tests
//!
//! ## Test Scopes
//! - **Partitioner**: deterministic hashing within range.
//! - **Memory backend**: task/query records and the query index.
//! - **File backend**: persistence across reopen with and without synch storage, and
//!   two backends sharing one directory.
//! - **Task store**: cursors, cache eviction on read failure, expiry.

#[cfg(test)]
mod tests {
    use crate::clock::{ManualClock, SystemClock};
    use crate::error::{ExecutorError, Result};
    use crate::query::types::{Method, QueryDefinition, QueryId, TaskId};
    use crate::storage::backend::TaskBackend;
    use crate::storage::file::FileTaskBackend;
    use crate::storage::memory::MemoryTaskBackend;
    use crate::storage::partitioner::Partitioner;
    use crate::storage::store::QueryTaskStore;
    use crate::storage::types::{QueryState, QueryStatus, QueryTask, TaskState};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    fn status(query_id: &QueryId, now: u64) -> QueryStatus {
        QueryStatus::new(
            query_id.clone(),
            QueryDefinition::new("EventQuery", "FIELD == 'value'"),
            now,
        )
    }

    /// Delegates to memory but can be told to fail every read.
    struct FlakyBackend {
        inner: MemoryTaskBackend,
        failing: AtomicBool,
    }

    impl FlakyBackend {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                inner: MemoryTaskBackend::new(),
                failing: AtomicBool::new(false),
            })
        }

        fn check(&self) -> Result<()> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(ExecutorError::StoreReadFailed("disk on fire".to_string()));
            }
            Ok(())
        }
    }

    impl TaskBackend for FlakyBackend {
        fn put_task(&self, task: &QueryTask) -> Result<()> {
            self.inner.put_task(task)
        }
        fn get_task(&self, task_id: &TaskId) -> Result<Option<QueryTask>> {
            self.check()?;
            self.inner.get_task(task_id)
        }
        fn delete_task(&self, task_id: &TaskId) -> Result<bool> {
            self.inner.delete_task(task_id)
        }
        fn task_ids_for_query(&self, query_id: &QueryId) -> Result<Vec<TaskId>> {
            self.check()?;
            self.inner.task_ids_for_query(query_id)
        }
        fn all_task_ids(&self) -> Result<Vec<TaskId>> {
            self.check()?;
            self.inner.all_task_ids()
        }
        fn put_query(&self, status: &QueryStatus) -> Result<()> {
            self.inner.put_query(status)
        }
        fn get_query(&self, query_id: &QueryId) -> Result<Option<QueryStatus>> {
            self.check()?;
            self.inner.get_query(query_id)
        }
        fn delete_query(&self, query_id: &QueryId) -> Result<bool> {
            self.inner.delete_query(query_id)
        }
        fn all_query_ids(&self) -> Result<Vec<QueryId>> {
            self.check()?;
            self.inner.all_query_ids()
        }
        fn flush(&self) -> Result<()> {
            Ok(())
        }
    }

    // ============================================================
    // PARTITIONER
    // ============================================================

    #[test]
    fn test_partition_is_deterministic_and_in_range() {
        let partitioner = Partitioner::new(16);
        assert_eq!(
            partitioner.get_partition("task_100"),
            partitioner.get_partition("task_100")
        );
        for i in 0..1000 {
            assert!(partitioner.get_partition(&format!("key_{}", i)) < 16);
        }
        assert_eq!(Partitioner::new(0).num_partitions, 1);
    }

    // ============================================================
    // MEMORY BACKEND
    // ============================================================

    #[test]
    fn test_memory_backend_indexes_tasks_by_query() {
        let backend = MemoryTaskBackend::new();
        let q1 = QueryId::new();
        let q2 = QueryId::new();

        let create = QueryTask::queued(q1.clone(), Method::Create, 1);
        let next = QueryTask::queued(q1.clone(), Method::Next, 2);
        let other = QueryTask::queued(q2.clone(), Method::Create, 3);
        for task in [&create, &next, &other] {
            backend.put_task(task).unwrap();
        }

        assert_eq!(
            backend.task_ids_for_query(&q1).unwrap(),
            vec![create.task_id.clone(), next.task_id.clone()]
        );
        assert_eq!(backend.local_task_count(), 3);

        // Overwriting does not duplicate the index entry
        let mut running = next.clone();
        running.state = TaskState::Running;
        backend.put_task(&running).unwrap();
        assert_eq!(backend.task_ids_for_query(&q1).unwrap().len(), 2);
        assert_eq!(
            backend.get_task(&next.task_id).unwrap().unwrap().state,
            TaskState::Running
        );

        assert!(backend.delete_task(&create.task_id).unwrap());
        assert!(!backend.delete_task(&create.task_id).unwrap());
        assert_eq!(backend.task_ids_for_query(&q1).unwrap(), vec![next.task_id]);
    }

    // ============================================================
    // FILE BACKEND
    // ============================================================

    #[test]
    fn test_file_backend_synch_storage_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let query_id = QueryId::new();
        let task = QueryTask::queued(query_id.clone(), Method::Create, 10);

        {
            let backend = FileTaskBackend::open(dir.path(), true).unwrap();
            backend.put_task(&task).unwrap();
            backend.put_query(&status(&query_id, 10)).unwrap();
            assert_eq!(backend.pending_writes(), 0);
        }

        let reopened = FileTaskBackend::open(dir.path(), true).unwrap();
        assert_eq!(reopened.get_task(&task.task_id).unwrap(), Some(task.clone()));
        assert_eq!(
            reopened.task_ids_for_query(&query_id).unwrap(),
            vec![task.task_id]
        );
        assert_eq!(reopened.all_query_ids().unwrap(), vec![query_id]);
    }

    #[test]
    fn test_file_backend_buffers_until_flush() {
        let dir = tempfile::tempdir().unwrap();
        let query_id = QueryId::new();
        let task = QueryTask::queued(query_id.clone(), Method::Next, 10);

        let backend = FileTaskBackend::open(dir.path(), false).unwrap();
        backend.put_task(&task).unwrap();

        // Visible to the writer, not yet on disk
        assert_eq!(backend.get_task(&task.task_id).unwrap(), Some(task.clone()));
        assert_eq!(backend.pending_writes(), 1);
        let on_disk = FileTaskBackend::open(dir.path(), false).unwrap();
        assert_eq!(on_disk.get_task(&task.task_id).unwrap(), None);

        backend.flush().unwrap();
        assert_eq!(backend.pending_writes(), 0);
        let on_disk = FileTaskBackend::open(dir.path(), false).unwrap();
        assert_eq!(on_disk.get_task(&task.task_id).unwrap(), Some(task.clone()));

        // Buffered deletes hide the record before the flush removes the file
        assert!(backend.delete_task(&task.task_id).unwrap());
        assert_eq!(backend.get_task(&task.task_id).unwrap(), None);
        backend.flush().unwrap();
        let on_disk = FileTaskBackend::open(dir.path(), false).unwrap();
        assert!(on_disk.all_task_ids().unwrap().is_empty());
    }

    #[test]
    fn test_file_backends_sharing_a_directory_see_each_other() {
        let dir = tempfile::tempdir().unwrap();
        // Two executor processes pointed at one store directory
        let writer = FileTaskBackend::open(dir.path(), true).unwrap();
        let reader = FileTaskBackend::open(dir.path(), true).unwrap();
        let query_id = QueryId::new();
        let first = QueryTask::queued(query_id.clone(), Method::Create, 10);
        let second = QueryTask::queued(query_id.clone(), Method::Next, 20);

        writer.put_query(&status(&query_id, 10)).unwrap();
        writer.put_task(&second).unwrap();
        writer.put_task(&first).unwrap();

        assert_eq!(
            reader.task_ids_for_query(&query_id).unwrap(),
            vec![first.task_id.clone(), second.task_id.clone()]
        );
        assert_eq!(reader.all_task_ids().unwrap().len(), 2);
        assert_eq!(reader.all_query_ids().unwrap(), vec![query_id.clone()]);

        // Deletions elsewhere drop out of the index on the next read
        writer.delete_task(&first.task_id).unwrap();
        writer.delete_query(&query_id).unwrap();
        assert_eq!(
            reader.task_ids_for_query(&query_id).unwrap(),
            vec![second.task_id.clone()]
        );
        assert!(reader.all_query_ids().unwrap().is_empty());

        // The reader's own buffered write stays indexed though it is not on disk yet
        let buffered = FileTaskBackend::open(dir.path(), false).unwrap();
        let third = QueryTask::queued(query_id.clone(), Method::Close, 30);
        buffered.put_task(&third).unwrap();
        assert_eq!(
            buffered.task_ids_for_query(&query_id).unwrap(),
            vec![second.task_id, third.task_id]
        );
    }

    #[test]
    fn test_file_backend_reports_corrupt_record() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileTaskBackend::open(dir.path(), true).unwrap();
        let task_id = TaskId::new();
        std::fs::write(
            dir.path().join("tasks").join(format!("{}.json", task_id)),
            b"{not json",
        )
        .unwrap();

        assert!(matches!(
            backend.get_task(&task_id),
            Err(ExecutorError::StoreReadFailed(_))
        ));
    }

    // ============================================================
    // TASK STORE
    // ============================================================

    #[test]
    fn test_cursor_is_lazy_finite_and_restartable() {
        let store = QueryTaskStore::new(Arc::new(MemoryTaskBackend::new()), Arc::new(SystemClock));
        let query_id = QueryId::new();
        let first = QueryTask::queued(query_id.clone(), Method::Create, 1);
        let second = QueryTask::queued(query_id.clone(), Method::Next, 2);
        store.put_task(&first).unwrap();
        store.put_task(&second).unwrap();

        let mut cursor = store.find_tasks(&query_id).unwrap();
        assert_eq!(cursor.remaining(), 2);
        assert_eq!(cursor.next().unwrap().unwrap().task_id, first.task_id);

        // Deleted after the snapshot: skipped rather than surfaced
        store.delete_task(&second.task_id).unwrap();
        assert!(cursor.next().is_none());
        assert!(cursor.next().is_none());

        let third = QueryTask::queued(query_id.clone(), Method::Next, 3);
        store.put_task(&third).unwrap();
        cursor.restart().unwrap();
        let ids: Vec<TaskId> = cursor.map(|task| task.unwrap().task_id).collect();
        assert_eq!(ids, vec![first.task_id, third.task_id]);
    }

    #[test]
    fn test_read_failure_evicts_whole_cache() {
        let backend = FlakyBackend::new();
        let store = QueryTaskStore::new(backend.clone(), Arc::new(SystemClock));
        let query_id = QueryId::new();
        let task = QueryTask::queued(query_id.clone(), Method::Create, 1);
        store.put_task(&task).unwrap();
        store.put_query(&status(&query_id, 1)).unwrap();
        assert_eq!(store.cached_records(), 2);

        // Cached reads still succeed while the backend is down
        backend.failing.store(true, Ordering::SeqCst);
        assert!(store.get_task(&task.task_id).unwrap().is_some());

        let result = store.load_task(&task.task_id);
        assert!(matches!(result, Err(ExecutorError::StoreReadFailed(_))));
        assert_eq!(store.cached_records(), 0, "cache must be empty after a failed read");

        // With the cache gone every read goes to the backend and fails
        assert!(store.get_query(&query_id).is_err());

        backend.failing.store(false, Ordering::SeqCst);
        assert_eq!(store.get_task(&task.task_id).unwrap(), Some(task));
    }

    #[test]
    fn test_expire_removes_old_terminal_records_and_tombstones() {
        let clock = ManualClock::new(1_000);
        let store = QueryTaskStore::new(Arc::new(MemoryTaskBackend::new()), clock.clone());

        let live = QueryId::new();
        let closed = QueryId::new();

        let mut done = QueryTask::queued(live.clone(), Method::Create, 1_000);
        done.state = TaskState::Complete;
        let pending = QueryTask::queued(live.clone(), Method::Next, 1_000);
        store.put_task(&done).unwrap();
        store.put_task(&pending).unwrap();
        store.put_query(&status(&live, 1_000)).unwrap();

        let mut tombstone = status(&closed, 1_000);
        tombstone.transition(QueryState::Closed, 1_000);
        store.put_query(&tombstone).unwrap();

        // Too young
        assert_eq!(store.expire(5_000).unwrap(), 0);

        clock.advance(Duration::from_millis(5_000));
        assert_eq!(store.expire(5_000).unwrap(), 2);

        assert!(store.get_task(&done.task_id).unwrap().is_none());
        assert!(store.get_task(&pending.task_id).unwrap().is_some());
        assert!(store.get_query(&live).unwrap().is_some());
        assert!(store.get_query(&closed).unwrap().is_none());
    }
}
