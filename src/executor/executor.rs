//! Query Executor
//!
//! Runs lifecycle tasks against queries. Work arrives as notifications (from the bus or
//! queued locally by the front door); a pool of workers claims each task under the
//! query's lock and drives the query's state machine.
//!
//! ## Responsibilities
//! - **Claiming**: lock, re-read, mark `Running` under a lease. Losing the race is a no-op.
//! - **Lease Management**: a sidecar renews the lock and the task lease every third of
//!   the lease time while the method runs.
//! - **Interruption**: a CANCEL fires the query's interrupt token; an in-flight NEXT sees
//!   it between scan steps, releases its scan and connection, and returns.
//! - **Finalizing**: success completes the task, acquisition failures put it back in
//!   the queue, anything else fails it.

use super::collaborators::ScanBackend;
use super::registry::QueryLogicRegistry;
use super::types::{ScanSession, TaskOutcome, WorkItem};
use crate::clock::Clock;
use crate::config::WorkerConfig;
use crate::coordination::lock::{DistributedLock, LockProvider};
use crate::error::{ExecutorError, Result};
use crate::notification::channel::TaskNotificationChannel;
use crate::notification::types::QueryTaskNotification;
use crate::pool::allocator::ConnectionPoolAllocator;
use crate::query::types::{Method, Prediction, QueryDefinition, QueryId, QueryPlan, TaskId};
use crate::results::channel::ResultsManager;
use crate::results::types::ResultPage;
use crate::storage::store::QueryTaskStore;
use crate::storage::types::{QueryState, QueryStatus, QueryTask, TaskState};

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

/// Everything an executor talks to.
pub struct ExecutorContext {
    pub store: Arc<QueryTaskStore>,
    pub locks: Arc<LockProvider>,
    pub pools: Arc<ConnectionPoolAllocator>,
    pub channel: Arc<dyn TaskNotificationChannel>,
    pub logics: Arc<QueryLogicRegistry>,
    pub scans: Arc<dyn ScanBackend>,
    pub results: Arc<ResultsManager>,
    pub clock: Arc<dyn Clock>,
    pub config: WorkerConfig,
}

/// How a claimed task's query state decides what happens next.
enum Admission {
    Run,
    Done(TaskOutcome),
    Reject(ExecutorError),
}

pub struct QueryExecutor {
    id: String,
    store: Arc<QueryTaskStore>,
    locks: Arc<LockProvider>,
    pools: Arc<ConnectionPoolAllocator>,
    channel: Arc<dyn TaskNotificationChannel>,
    logics: Arc<QueryLogicRegistry>,
    scans: Arc<dyn ScanBackend>,
    results: Arc<ResultsManager>,
    clock: Arc<dyn Clock>,
    config: WorkerConfig,
    /// Open scans kept between NEXT calls. A running NEXT takes its session out.
    sessions: DashMap<QueryId, ScanSession>,
    interrupts: DashMap<QueryId, CancellationToken>,
    work_tx: mpsc::UnboundedSender<WorkItem>,
    work_rx: Mutex<mpsc::UnboundedReceiver<WorkItem>>,
    shutdown: CancellationToken,
}

impl QueryExecutor {
    pub fn new(id: &str, context: ExecutorContext) -> Arc<Self> {
        let (work_tx, work_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            id: id.to_string(),
            store: context.store,
            locks: context.locks,
            pools: context.pools,
            channel: context.channel,
            logics: context.logics,
            scans: context.scans,
            results: context.results,
            clock: context.clock,
            config: context.config,
            sessions: DashMap::new(),
            interrupts: DashMap::new(),
            work_tx,
            work_rx: Mutex::new(work_rx),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn store(&self) -> &Arc<QueryTaskStore> {
        &self.store
    }

    pub fn locks(&self) -> &Arc<LockProvider> {
        &self.locks
    }

    pub fn pools(&self) -> &Arc<ConnectionPoolAllocator> {
        &self.pools
    }

    pub fn channel(&self) -> &Arc<dyn TaskNotificationChannel> {
        &self.channel
    }

    pub fn logics(&self) -> &Arc<QueryLogicRegistry> {
        &self.logics
    }

    pub fn results(&self) -> &Arc<ResultsManager> {
        &self.results
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn open_sessions(&self) -> usize {
        self.sessions.len()
    }

    // ---------------------------------------------------------------
    // Dispatch
    // ---------------------------------------------------------------

    /// Subscribes to the bus and spawns the dispatcher and workers, then returns.
    pub async fn start(self: Arc<Self>) {
        let worker_count = self.config.worker_count.max(1);
        tracing::info!("Starting executor {} with {} workers", self.id, worker_count);

        let mut subscription = self.channel.subscribe();
        let dispatcher = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = dispatcher.shutdown.cancelled() => break,
                    received = subscription.recv() => match received {
                        Some(notification) => dispatcher.on_notification(notification),
                        None => {
                            tracing::warn!("Notification channel closed, {} stops dispatching", dispatcher.id);
                            break;
                        }
                    },
                }
            }
        });

        for worker_id in 0..worker_count {
            let executor = self.clone();
            tokio::spawn(async move {
                executor.worker_loop(worker_id).await;
            });
        }

        let reaper = self.clone();
        let period = Duration::from_millis(self.config.session_reap_interval_ms.max(10));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = reaper.shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        let released = reaper.reap_sessions().await;
                        if released > 0 {
                            tracing::debug!("Executor {} released {} idle scan sessions", reaper.id, released);
                        }
                    }
                }
            }
        });
    }

    pub fn shutdown(&self) {
        tracing::info!("Executor {} shutting down", self.id);
        self.shutdown.cancel();
    }

    /// Routes a bus notification to the workers. A CANCEL also interrupts any NEXT this
    /// executor is running for the query, and CANCEL/CLOSE drop an idle scan session.
    pub fn on_notification(&self, notification: QueryTaskNotification) {
        let method = notification.request.method();
        let query_id = notification.request.query_id().clone();

        if method == Method::Cancel {
            self.interrupt(&query_id);
        }
        if matches!(method, Method::Cancel | Method::Close)
            && let Some((_, session)) = self.sessions.remove(&query_id)
        {
            let pools = self.pools.clone();
            tokio::spawn(async move {
                pools.release(session.close().await);
            });
        }

        self.enqueue(WorkItem {
            task_id: notification.task_id,
            query_id,
            method,
        });
    }

    /// Hands a task straight to this executor's workers.
    pub fn enqueue(&self, item: WorkItem) {
        if self.work_tx.send(item).is_err() {
            tracing::warn!("Executor {} work queue is closed", self.id);
        }
    }

    /// Fires the interrupt of any NEXT running here for `query_id`.
    pub fn interrupt(&self, query_id: &QueryId) -> bool {
        match self.interrupts.remove(query_id) {
            Some((_, token)) => {
                tracing::debug!("Interrupting in-flight work on {}", query_id);
                token.cancel();
                true
            }
            None => false,
        }
    }

    fn interrupt_token(&self, query_id: &QueryId) -> CancellationToken {
        self.interrupts
            .entry(query_id.clone())
            .or_insert_with(|| self.shutdown.child_token())
            .clone()
    }

    async fn worker_loop(&self, worker_id: usize) {
        tracing::debug!("Worker {} of {} started", worker_id, self.id);

        loop {
            let item = {
                let mut queue = self.work_rx.lock().await;
                tokio::select! {
                    _ = self.shutdown.cancelled() => None,
                    item = queue.recv() => item,
                }
            };
            let Some(item) = item else {
                break;
            };

            match self.run_task(&item.task_id).await {
                Ok(TaskOutcome::Skipped) => {
                    tracing::trace!("Worker {} skipped task {}", worker_id, item.task_id);
                    // The task may be gone because the query finished elsewhere.
                    if let Err(e) = self.release_session_if_stale(&item.query_id).await {
                        tracing::debug!("Could not check session of {}: {}", item.query_id, e);
                    }
                }
                Ok(outcome) => {
                    tracing::debug!(
                        "Worker {} ran {} on {}: {:?}",
                        worker_id,
                        item.method,
                        item.query_id,
                        outcome
                    );
                }
                Err(ExecutorError::Interrupted) => {
                    tracing::debug!("Task {} interrupted before it started", item.task_id);
                }
                Err(e) if e.is_retryable() => {
                    tracing::info!("Task {} left queued: {}", item.task_id, e);
                }
                Err(e) => {
                    tracing::warn!("{} on {} failed: {}", item.method, item.query_id, e);
                }
            }
        }

        tracing::debug!("Worker {} of {} stopped", worker_id, self.id);
    }

    // ---------------------------------------------------------------
    // Task execution
    // ---------------------------------------------------------------

    /// Claims and runs one task. Safe to call for a task that is already running,
    /// finished or gone: those come back as `Skipped`.
    pub async fn run_task(&self, task_id: &TaskId) -> Result<TaskOutcome> {
        let Some(task) = self.store.load_task(task_id)? else {
            return Ok(TaskOutcome::Skipped);
        };
        if !task.is_claimable(self.clock.now_ms()) {
            self.release_session_if_stale(&task.query_id).await?;
            return Ok(TaskOutcome::Skipped);
        }

        let query_id = task.query_id.clone();
        let method = task.method;
        // NEXT waits under the query interrupt so a CANCEL can pre-empt it.
        let interrupt = match method {
            Method::Next => self.interrupt_token(&query_id),
            _ => self.shutdown.child_token(),
        };
        let guard = self.locks.query_lock(&query_id).acquire(&interrupt).await?;

        // Re-read under the lock; someone may have claimed or finished it meanwhile.
        let Some(mut task) = self.store.load_task(task_id)? else {
            return Ok(TaskOutcome::Skipped);
        };
        let now = self.clock.now_ms();
        if !task.is_claimable(now) {
            return Ok(TaskOutcome::Skipped);
        }
        if task.state == TaskState::Running {
            tracing::info!(
                "Reclaiming task {} abandoned by {}",
                task.task_id,
                task.owner.as_deref().unwrap_or("?")
            );
        }

        let Some(mut status) = self.store.load_query(&query_id)? else {
            let error = ExecutorError::UnknownQuery(query_id.to_string());
            self.fail_task(&mut task, &error)?;
            return Err(error);
        };

        match self.admit(method, &status) {
            Admission::Run => {}
            Admission::Done(outcome) => {
                self.drop_session(&query_id).await;
                self.finish_without_running(&mut task)?;
                return Ok(outcome);
            }
            Admission::Reject(error) => {
                if status.state.is_terminal() {
                    self.drop_session(&query_id).await;
                }
                self.fail_task(&mut task, &error)?;
                return Err(error);
            }
        }

        let lease_ms = self.locks.lease_time().as_millis() as u64;
        task.state = TaskState::Running;
        task.owner = Some(self.id.clone());
        task.lease_expires = Some(now + lease_ms);
        task.updated_at = now;
        self.store.put_task(&task)?;
        tracing::debug!("Executor {} claimed {} on {}", self.id, method, query_id);

        let running = Arc::new(Mutex::new(Some(task)));
        let lease_lost = CancellationToken::new();
        let renewal = self.spawn_lease_renewal(guard.lock().clone(), running.clone(), lease_lost.clone());

        let result = match method {
            Method::Create => self.execute_create(&mut status).await,
            Method::Next => self.execute_next(&mut status, &interrupt, &lease_lost).await,
            Method::Cancel => self.execute_cancel(&mut status).await,
            Method::Close => self.execute_close(&mut status).await,
            Method::Plan | Method::Predict => Err(ExecutorError::InvalidRequest(format!(
                "{} is answered directly and never queued",
                method
            ))),
        };

        renewal.abort();
        let Some(mut task) = running.lock().await.take() else {
            return result;
        };

        if !guard.lock().is_held() {
            tracing::warn!(
                "Lost lock {} while running {}; leaving task {} to the next claimant",
                guard.lock().name(),
                method,
                task.task_id
            );
            return result;
        }

        let now = self.clock.now_ms();
        task.updated_at = now;
        task.lease_expires = None;
        match &result {
            // CLOSE removed every task of the query; a renewal may have rewritten this one.
            Ok(_) if method == Method::Close => {
                self.store.delete_task(&task.task_id)?;
            }
            Ok(_) => {
                task.state = TaskState::Complete;
                self.store.put_task(&task)?;
            }
            Err(e) if e.is_retryable() || *e == ExecutorError::Interrupted => {
                task.state = TaskState::Queued;
                task.owner = None;
                self.store.put_task(&task)?;
            }
            Err(e) => {
                task.state = TaskState::Failed;
                task.error = Some(e.to_string());
                self.store.put_task(&task)?;
            }
        }

        drop(guard);
        result
    }

    /// Decides from the query state whether `method` may run. Terminal queries take no
    /// more work, except CANCEL/CLOSE which become no-ops and CLOSE after a non-Closed
    /// terminal state which still needs to tear the query down.
    fn admit(&self, method: Method, status: &QueryStatus) -> Admission {
        let closed = || ExecutorError::QueryClosed(status.query_id.to_string());
        match (status.state, method) {
            (QueryState::Closed, Method::Cancel | Method::Close) => {
                Admission::Done(TaskOutcome::AlreadyTerminal)
            }
            (QueryState::Closed, _) => Admission::Reject(closed()),
            (state, Method::Cancel) if state.is_terminal() => {
                Admission::Done(TaskOutcome::AlreadyTerminal)
            }
            (_, Method::Close) => Admission::Run,
            (state, _) if state.is_terminal() => Admission::Reject(closed()),
            (QueryState::Cancelling, Method::Next) => Admission::Reject(closed()),
            _ => Admission::Run,
        }
    }

    fn spawn_lease_renewal(
        &self,
        lock: DistributedLock,
        running: Arc<Mutex<Option<QueryTask>>>,
        lease_lost: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let store = self.store.clone();
        let clock = self.clock.clone();
        let lease = lock.lease_time();
        let period = (lease / 3).max(Duration::from_millis(10));

        tokio::spawn(async move {
            loop {
                tokio::time::sleep(period).await;

                if !lock.renew() {
                    tracing::warn!("Lease on {} lost, stopping in-flight work", lock.name());
                    lease_lost.cancel();
                    break;
                }

                let mut slot = running.lock().await;
                let Some(task) = slot.as_mut() else {
                    break;
                };
                task.lease_expires = Some(clock.now_ms() + lease.as_millis() as u64);
                match store.put_task(task) {
                    Ok(()) => tracing::trace!("Renewed lease for task {}", task.task_id),
                    Err(e) => tracing::warn!("Could not renew lease of task {}: {}", task.task_id, e),
                }
            }
        })
    }

    // ---------------------------------------------------------------
    // Lifecycle methods
    // ---------------------------------------------------------------

    async fn execute_create(&self, status: &mut QueryStatus) -> Result<TaskOutcome> {
        self.ensure_planned(status).await?;
        Ok(TaskOutcome::Planned)
    }

    async fn execute_next(
        &self,
        status: &mut QueryStatus,
        interrupt: &CancellationToken,
        lease_lost: &CancellationToken,
    ) -> Result<TaskOutcome> {
        self.ensure_planned(status).await?;

        let mut session = match self.checkout_session(status, interrupt).await {
            Ok(session) => session,
            Err(e @ ExecutorError::CollaboratorFailed(_)) => {
                self.fail_query(status, &e).await?;
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        let page_size = status.definition.page_size.max(1);
        let mut entries = Vec::new();
        let mut checkpoint = session.checkpoint.clone();
        let mut exhausted = false;

        loop {
            if interrupt.is_cancelled() {
                return self.unwind_cancelled(status, session).await;
            }
            if lease_lost.is_cancelled() {
                self.pools.release(session.close().await);
                return Err(ExecutorError::Interrupted);
            }

            match session.scan.next_batch().await {
                Ok(Some(batch)) => {
                    checkpoint = Some(batch.checkpoint);
                    entries.extend(batch.entries);
                    if entries.len() >= page_size {
                        break;
                    }
                }
                Ok(None) => {
                    exhausted = true;
                    break;
                }
                Err(e) => {
                    self.pools.release(session.close().await);
                    let error = ExecutorError::collaborator(e);
                    self.fail_query(status, &error).await?;
                    return Err(error);
                }
            }
        }

        let channel = self.results.create(&status.query_id);
        let entry_count = entries.len();
        if entry_count > 0 {
            let page = ResultPage {
                query_id: status.query_id.clone(),
                page_number: status.pages_published + 1,
                entries,
            };
            let published = channel.publish(&page, self.results.publish_timeout()).await;
            if !matches!(published, Ok(true)) {
                // The scan has moved past entries nobody received; reopen from the
                // stored checkpoint next time.
                self.pools.release(session.close().await);
                return Err(published.err().unwrap_or_else(|| {
                    ExecutorError::Internal(format!(
                        "results channel for {} did not accept page {}",
                        status.query_id, page.page_number
                    ))
                }));
            }
            status.pages_published = page.page_number;
            status.results_published += entry_count as u64;
        }

        status.checkpoint = checkpoint.clone();
        session.checkpoint = checkpoint;
        let now = self.clock.now_ms();

        let mut idle = None;
        let outcome = if exhausted {
            self.pools.release(session.close().await);
            channel.close();
            self.interrupts.remove(&status.query_id);
            status.transition(QueryState::Complete, now);
            tracing::info!(
                "Query {} complete after {} pages ({} results)",
                status.query_id,
                status.pages_published,
                status.results_published
            );
            TaskOutcome::Exhausted {
                pages: status.pages_published,
            }
        } else {
            idle = Some(session);
            TaskOutcome::Page {
                page_number: status.pages_published,
                entries: entry_count,
            }
        };

        status.updated_at = now;
        if let Err(e) = self.store.put_query(status) {
            if let Some(session) = idle {
                self.pools.release(session.close().await);
            }
            return Err(e);
        }
        if let Some(session) = idle {
            self.sessions.insert(status.query_id.clone(), session);
        }
        Ok(outcome)
    }

    async fn unwind_cancelled(
        &self,
        status: &mut QueryStatus,
        session: ScanSession,
    ) -> Result<TaskOutcome> {
        self.pools.release(session.close().await);
        status.transition(QueryState::Cancelling, self.clock.now_ms());
        self.store.put_query(status)?;
        tracing::info!("NEXT on {} interrupted by CANCEL", status.query_id);
        Ok(TaskOutcome::Interrupted)
    }

    async fn execute_cancel(&self, status: &mut QueryStatus) -> Result<TaskOutcome> {
        self.drop_session(&status.query_id).await;
        if let Some(channel) = self.results.get(&status.query_id) {
            channel.close();
        }
        self.interrupts.remove(&status.query_id);

        status.transition(QueryState::Cancelled, self.clock.now_ms());
        self.store.put_query(status)?;
        tracing::info!("Query {} cancelled", status.query_id);
        Ok(TaskOutcome::Cancelled)
    }

    async fn execute_close(&self, status: &mut QueryStatus) -> Result<TaskOutcome> {
        self.drop_session(&status.query_id).await;
        self.results.remove(&status.query_id).await;
        self.interrupts.remove(&status.query_id);

        status.transition(QueryState::Closed, self.clock.now_ms());
        self.store.put_query(status)?;

        let mut removed = 0;
        for task in self.store.find_tasks(&status.query_id)? {
            if self.store.delete_task(&task?.task_id)? {
                removed += 1;
            }
        }
        tracing::info!("Query {} closed, {} tasks removed", status.query_id, removed);
        Ok(TaskOutcome::Closed)
    }

    async fn ensure_planned(&self, status: &mut QueryStatus) -> Result<()> {
        if status.state != QueryState::Queued {
            return Ok(());
        }

        let plan = match self.plan_definition(&status.definition).await {
            Ok(plan) => plan,
            Err(e) => {
                self.fail_query(status, &e).await?;
                return Err(e);
            }
        };

        status.plan = Some(plan);
        status.transition(QueryState::Running, self.clock.now_ms());
        self.store.put_query(status)?;
        self.results.create(&status.query_id);
        tracing::info!("Query {} planned and running", status.query_id);
        Ok(())
    }

    async fn checkout_session(
        &self,
        status: &QueryStatus,
        interrupt: &CancellationToken,
    ) -> Result<ScanSession> {
        if let Some((_, session)) = self.sessions.remove(&status.query_id) {
            if session.checkpoint == status.checkpoint {
                return Ok(session);
            }
            tracing::debug!("Scan session for {} is stale, reopening", status.query_id);
            self.pools.release(session.close().await);
        }

        let definition = &status.definition;
        let timeout = Duration::from_millis(self.config.allocation_timeout_ms);
        let connection = self
            .pools
            .allocate(definition.pool_name.as_deref(), definition.priority, timeout)
            .await?;

        let semaphore = self.locks.semaphore(
            &format!("executor:{}", connection.pool().pool_name),
            self.config.max_concurrent_tasks,
        );
        let permit = semaphore
            .acquire_permit(timeout, interrupt)
            .await?
            .ok_or_else(|| ExecutorError::PoolExhausted {
                pool: semaphore.name().to_string(),
                priority: definition.priority.to_string(),
            })?;

        let plan = status.plan.clone().unwrap_or_default();
        let scan = self
            .scans
            .open(&connection, &plan, status.checkpoint.as_deref())
            .await
            .map_err(ExecutorError::collaborator)?;

        tracing::debug!("Opened scan for {} on {}", status.query_id, connection.pool());
        Ok(ScanSession {
            connection,
            _permit: permit,
            scan,
            checkpoint: status.checkpoint.clone(),
        })
    }

    async fn drop_session(&self, query_id: &QueryId) {
        if let Some((_, session)) = self.sessions.remove(query_id) {
            self.pools.release(session.close().await);
        }
    }

    /// Closes the idle scan session kept for `query_id`, returning its connection and
    /// permit. Returns whether there was one.
    pub async fn release_session(&self, query_id: &QueryId) -> bool {
        match self.sessions.remove(query_id) {
            Some((_, session)) => {
                tracing::debug!("Releasing scan session of {} on {}", query_id, self.id);
                self.pools.release(session.close().await);
                true
            }
            None => false,
        }
    }

    /// Releases the idle session of `query_id` if the query is gone, terminal, or was
    /// advanced past the session's checkpoint by another executor.
    pub async fn release_session_if_stale(&self, query_id: &QueryId) -> Result<bool> {
        if !self.sessions.contains_key(query_id) {
            return Ok(false);
        }
        let status = self.store.load_query(query_id)?;
        let removed = self.sessions.remove_if(query_id, |_, session| match &status {
            None => true,
            Some(status) => {
                status.state.is_terminal()
                    || status.state == QueryState::Cancelling
                    || session.checkpoint != status.checkpoint
            }
        });
        match removed {
            Some((_, session)) => {
                tracing::debug!("Scan session of {} on {} is stale, releasing", query_id, self.id);
                self.pools.release(session.close().await);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// One sweep over the idle sessions. Returns how many were released.
    pub async fn reap_sessions(&self) -> usize {
        let query_ids: Vec<QueryId> = self.sessions.iter().map(|entry| entry.key().clone()).collect();
        let mut released = 0;
        for query_id in query_ids {
            match self.release_session_if_stale(&query_id).await {
                Ok(true) => released += 1,
                Ok(false) => {}
                Err(e) => tracing::warn!("Could not check scan session of {}: {}", query_id, e),
            }
        }
        released
    }

    async fn fail_query(&self, status: &mut QueryStatus, error: &ExecutorError) -> Result<()> {
        self.drop_session(&status.query_id).await;
        if let Some(channel) = self.results.get(&status.query_id) {
            channel.close();
        }
        status.error = Some(error.to_string());
        status.transition(QueryState::Failed, self.clock.now_ms());
        tracing::error!("Query {} failed: {}", status.query_id, error);
        self.store.put_query(status)
    }

    fn fail_task(&self, task: &mut QueryTask, error: &ExecutorError) -> Result<()> {
        task.state = TaskState::Failed;
        task.error = Some(error.to_string());
        task.lease_expires = None;
        task.updated_at = self.clock.now_ms();
        self.store.put_task(task)
    }

    fn finish_without_running(&self, task: &mut QueryTask) -> Result<()> {
        if task.method == Method::Close {
            self.store.delete_task(&task.task_id)?;
            return Ok(());
        }
        task.state = TaskState::Complete;
        task.lease_expires = None;
        task.updated_at = self.clock.now_ms();
        self.store.put_task(task)
    }

    // ---------------------------------------------------------------
    // Read-only methods
    // ---------------------------------------------------------------

    /// The stored plan, or a fresh one from the planner if CREATE has not run yet.
    pub async fn plan(&self, query_id: &QueryId) -> Result<QueryPlan> {
        let status = self.readable_status(query_id)?;
        match status.plan {
            Some(plan) => Ok(plan),
            None => self.plan_definition(&status.definition).await,
        }
    }

    pub async fn predict(&self, query_id: &QueryId) -> Result<Vec<Prediction>> {
        let status = self.readable_status(query_id)?;
        let definition = &status.definition;
        let planner = self.logics.planner(&definition.logic_name)?;
        planner
            .predict(&definition.query, &definition.authorizations)
            .await
            .map_err(ExecutorError::collaborator)
    }

    fn readable_status(&self, query_id: &QueryId) -> Result<QueryStatus> {
        let status = self
            .store
            .get_query(query_id)?
            .ok_or_else(|| ExecutorError::UnknownQuery(query_id.to_string()))?;
        if status.state.is_terminal() {
            return Err(ExecutorError::QueryClosed(query_id.to_string()));
        }
        Ok(status)
    }

    async fn plan_definition(&self, definition: &QueryDefinition) -> Result<QueryPlan> {
        let planner = self.logics.planner(&definition.logic_name)?;
        planner
            .plan(&definition.query, &definition.authorizations)
            .await
            .map_err(ExecutorError::collaborator)
    }
}
