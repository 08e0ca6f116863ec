//! File-backed task store.
//!
//! Layout: `<dir>/tasks/<task_id>.json` and `<dir>/queries/<query_id>.json`, one
//! record per file. The query index is built from disk on open and brought up to date
//! with the directory listing before every index read, so records another process
//! writes into or removes from a shared directory are picked up.
//!
//! With `synch_storage` each write lands (and is fsynced) before the call returns.
//! Without it, writes sit in `pending` until [`TaskBackend::flush`]; reads always
//! consult `pending` first so callers see their own writes.

use super::backend::TaskBackend;
use super::types::{QueryStatus, QueryTask};
use crate::error::{ExecutorError, Result};
use crate::query::types::{QueryId, TaskId};

use dashmap::{DashMap, DashSet};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const TASKS_DIR: &str = "tasks";
const QUERIES_DIR: &str = "queries";

#[derive(Debug, Clone, PartialEq)]
enum PendingWrite {
    Put(Vec<u8>),
    Delete,
}

pub struct FileTaskBackend {
    root: PathBuf,
    synch_storage: bool,
    pending: DashMap<PathBuf, PendingWrite>,
    by_query: DashMap<QueryId, Vec<TaskId>>,
    task_owner: DashMap<TaskId, QueryId>,
    query_ids: DashSet<QueryId>,
    flush_lock: Mutex<()>,
}

impl FileTaskBackend {
    pub fn open(root: impl AsRef<Path>, synch_storage: bool) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        for sub in [TASKS_DIR, QUERIES_DIR] {
            fs::create_dir_all(root.join(sub)).map_err(|e| write_error(&root.join(sub), e))?;
        }

        let backend = Self {
            root,
            synch_storage,
            pending: DashMap::new(),
            by_query: DashMap::new(),
            task_owner: DashMap::new(),
            query_ids: DashSet::new(),
            flush_lock: Mutex::new(()),
        };
        backend.refresh_index()?;
        tracing::info!(
            "Opened task store at {} ({} tasks, {} queries)",
            backend.root.display(),
            backend.task_owner.len(),
            backend.query_ids.len()
        );
        Ok(backend)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn pending_writes(&self) -> usize {
        self.pending.len()
    }

    /// Indexes records that appeared on disk and forgets ones that vanished. Local
    /// buffered writes win over what the directory shows.
    fn refresh_index(&self) -> Result<()> {
        let mut on_disk = HashSet::new();
        let mut fresh: Vec<QueryTask> = Vec::new();
        for path in list_records(&self.root.join(TASKS_DIR))? {
            let Some(task_id) = record_stem(&path).map(TaskId) else {
                continue;
            };
            if self.is_pending_delete(&path) {
                continue;
            }
            if !self.task_owner.contains_key(&task_id) {
                match read_record::<QueryTask>(&path) {
                    Ok(Some(task)) => fresh.push(task),
                    // Removed between listing and reading.
                    Ok(None) => continue,
                    Err(e) => tracing::warn!("Skipping unreadable task record: {}", e),
                }
            }
            on_disk.insert(task_id);
        }
        fresh.sort_by_key(|task| task.created_at);
        for task in &fresh {
            self.index_task(task);
        }

        let vanished: Vec<TaskId> = self
            .task_owner
            .iter()
            .map(|entry| entry.key().clone())
            .filter(|task_id| {
                !on_disk.contains(task_id) && !self.is_pending_put(&self.task_path(task_id))
            })
            .collect();
        for task_id in &vanished {
            self.unindex_task(task_id);
        }

        let mut queries_on_disk = HashSet::new();
        for path in list_records(&self.root.join(QUERIES_DIR))? {
            if self.is_pending_delete(&path) {
                continue;
            }
            if let Some(query_id) = record_stem(&path).map(QueryId) {
                self.query_ids.insert(query_id.clone());
                queries_on_disk.insert(query_id);
            }
        }
        self.query_ids.retain(|query_id| {
            queries_on_disk.contains(query_id) || self.is_pending_put(&self.query_path(query_id))
        });

        if !fresh.is_empty() || !vanished.is_empty() {
            tracing::debug!(
                "Task index of {} picked up {} tasks and dropped {}",
                self.root.display(),
                fresh.len(),
                vanished.len()
            );
        }
        Ok(())
    }

    fn is_pending_put(&self, path: &Path) -> bool {
        matches!(self.pending.get(path).as_deref(), Some(PendingWrite::Put(_)))
    }

    fn is_pending_delete(&self, path: &Path) -> bool {
        matches!(self.pending.get(path).as_deref(), Some(PendingWrite::Delete))
    }

    fn index_task(&self, task: &QueryTask) {
        if self
            .task_owner
            .insert(task.task_id.clone(), task.query_id.clone())
            .is_none()
        {
            self.by_query
                .entry(task.query_id.clone())
                .or_default()
                .push(task.task_id.clone());
        }
    }

    fn unindex_task(&self, task_id: &TaskId) {
        if let Some((_, query_id)) = self.task_owner.remove(task_id) {
            if let Some(mut ids) = self.by_query.get_mut(&query_id) {
                ids.retain(|id| id != task_id);
            }
            self.by_query.remove_if(&query_id, |_, ids| ids.is_empty());
        }
    }

    fn task_path(&self, task_id: &TaskId) -> PathBuf {
        self.root.join(TASKS_DIR).join(format!("{}.json", task_id))
    }

    fn query_path(&self, query_id: &QueryId) -> PathBuf {
        self.root.join(QUERIES_DIR).join(format!("{}.json", query_id))
    }

    fn store<T: Serialize>(&self, path: PathBuf, record: &T) -> Result<()> {
        let bytes = serde_json::to_vec(record)
            .map_err(|e| ExecutorError::StoreWriteFailed(e.to_string()))?;
        if self.synch_storage {
            self.pending.remove(&path);
            write_record(&path, &bytes, true)
        } else {
            self.pending.insert(path, PendingWrite::Put(bytes));
            Ok(())
        }
    }

    fn load<T: DeserializeOwned>(&self, path: &Path) -> Result<Option<T>> {
        let buffered = self.pending.get(path).map(|entry| entry.value().clone());
        match buffered {
            Some(PendingWrite::Put(bytes)) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| ExecutorError::StoreReadFailed(format!("{}: {}", path.display(), e))),
            Some(PendingWrite::Delete) => Ok(None),
            None => read_record(path),
        }
    }

    fn remove(&self, path: PathBuf) -> Result<bool> {
        let existed = self.load::<serde_json::Value>(&path)?.is_some();
        if self.synch_storage {
            self.pending.remove(&path);
            remove_record(&path)?;
        } else {
            self.pending.insert(path, PendingWrite::Delete);
        }
        Ok(existed)
    }
}

impl TaskBackend for FileTaskBackend {
    fn put_task(&self, task: &QueryTask) -> Result<()> {
        self.store(self.task_path(&task.task_id), task)?;
        self.index_task(task);
        Ok(())
    }

    fn get_task(&self, task_id: &TaskId) -> Result<Option<QueryTask>> {
        self.load(&self.task_path(task_id))
    }

    fn delete_task(&self, task_id: &TaskId) -> Result<bool> {
        let removed = self.remove(self.task_path(task_id))?;
        self.unindex_task(task_id);
        Ok(removed)
    }

    fn task_ids_for_query(&self, query_id: &QueryId) -> Result<Vec<TaskId>> {
        self.refresh_index()?;
        Ok(self
            .by_query
            .get(query_id)
            .map(|ids| ids.clone())
            .unwrap_or_default())
    }

    fn all_task_ids(&self) -> Result<Vec<TaskId>> {
        self.refresh_index()?;
        Ok(self
            .task_owner
            .iter()
            .map(|entry| entry.key().clone())
            .collect())
    }

    fn put_query(&self, status: &QueryStatus) -> Result<()> {
        self.store(self.query_path(&status.query_id), status)?;
        self.query_ids.insert(status.query_id.clone());
        Ok(())
    }

    fn get_query(&self, query_id: &QueryId) -> Result<Option<QueryStatus>> {
        self.load(&self.query_path(query_id))
    }

    fn delete_query(&self, query_id: &QueryId) -> Result<bool> {
        let removed = self.remove(self.query_path(query_id))?;
        self.query_ids.remove(query_id);
        Ok(removed)
    }

    fn all_query_ids(&self) -> Result<Vec<QueryId>> {
        self.refresh_index()?;
        Ok(self.query_ids.iter().map(|id| id.key().clone()).collect())
    }

    fn flush(&self) -> Result<()> {
        let _flushing = self
            .flush_lock
            .lock()
            .map_err(|_| ExecutorError::Internal("task store flush lock poisoned".to_string()))?;

        let snapshot: Vec<(PathBuf, PendingWrite)> = self
            .pending
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        if snapshot.is_empty() {
            return Ok(());
        }

        for (path, write) in &snapshot {
            match write {
                PendingWrite::Put(bytes) => write_record(path, bytes, true)?,
                PendingWrite::Delete => remove_record(path)?,
            }
            // A newer write to the same record stays queued for the next flush.
            self.pending.remove_if(path, |_, current| current == write);
        }

        tracing::debug!("Flushed {} buffered task store writes", snapshot.len());
        Ok(())
    }
}

fn write_error(path: &Path, e: std::io::Error) -> ExecutorError {
    ExecutorError::StoreWriteFailed(format!("{}: {}", path.display(), e))
}

fn write_record(path: &Path, bytes: &[u8], sync: bool) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    let mut file = fs::File::create(&tmp).map_err(|e| write_error(&tmp, e))?;
    file.write_all(bytes).map_err(|e| write_error(&tmp, e))?;
    if sync {
        file.sync_all().map_err(|e| write_error(&tmp, e))?;
    }
    fs::rename(&tmp, path).map_err(|e| write_error(path, e))
}

fn remove_record(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(write_error(path, e)),
    }
}

fn read_record<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(ExecutorError::StoreReadFailed(format!("{}: {}", path.display(), e)));
        }
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| ExecutorError::StoreReadFailed(format!("{}: {}", path.display(), e)))
}

fn record_stem(path: &Path) -> Option<String> {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .map(str::to_string)
}

fn list_records(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir)
        .map_err(|e| ExecutorError::StoreReadFailed(format!("{}: {}", dir.display(), e)))?;
    let mut paths = Vec::new();
    for entry in entries {
        let entry =
            entry.map_err(|e| ExecutorError::StoreReadFailed(format!("{}: {}", dir.display(), e)))?;
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) == Some("json") {
            paths.push(path);
        }
    }
    Ok(paths)
}
