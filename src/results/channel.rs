use super::claim_check::{ClaimCheckCallback, ClaimCheckStore};
use super::listener::ResultsListener;
use super::types::{ClaimCheckRef, ResultEnvelope, ResultPage};
use crate::config::ResultsConfig;
use crate::error::{ExecutorError, Result};
use crate::query::types::QueryId;

use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::{Mutex, Notify, mpsc};

/// Bounded, ordered delivery of one query's result pages.
///
/// Pages larger than the inline threshold travel as claim checks.
pub struct ResultsChannel {
    query_id: QueryId,
    sender: mpsc::Sender<ResultEnvelope>,
    receiver: Mutex<mpsc::Receiver<ResultEnvelope>>,
    claim_checks: Arc<dyn ClaimCheckStore>,
    inline_threshold: usize,
    pending: AtomicUsize,
    closed: AtomicBool,
    closed_signal: Notify,
}

impl ResultsChannel {
    pub fn new(
        query_id: QueryId,
        capacity: usize,
        inline_threshold: usize,
        claim_checks: Arc<dyn ClaimCheckStore>,
    ) -> Arc<Self> {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        Arc::new(Self {
            query_id,
            sender,
            receiver: Mutex::new(receiver),
            claim_checks,
            inline_threshold,
            pending: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            closed_signal: Notify::new(),
        })
    }

    pub fn query_id(&self) -> &QueryId {
        &self.query_id
    }

    /// Queues a page. `Ok(false)` when the channel is closed or stayed full for `timeout`.
    pub async fn publish(&self, page: &ResultPage, timeout: Duration) -> Result<bool> {
        if self.is_closed() {
            return Ok(false);
        }

        let envelope = self.encode(page).await?;
        let claim_check = match &envelope {
            ResultEnvelope::ClaimCheck(reference) => Some(reference.reference.clone()),
            ResultEnvelope::Inline(_) => None,
        };

        self.pending.fetch_add(1, Ordering::SeqCst);
        match self.sender.send_timeout(envelope, timeout).await {
            Ok(()) => {
                tracing::debug!(
                    "Published page {} of {} ({} entries)",
                    page.page_number,
                    self.query_id,
                    page.len()
                );
                Ok(true)
            }
            Err(SendTimeoutError::Timeout(_)) | Err(SendTimeoutError::Closed(_)) => {
                self.pending.fetch_sub(1, Ordering::SeqCst);
                if let Some(reference) = claim_check
                    && let Err(e) = self.claim_checks.remove(&reference).await
                {
                    tracing::warn!("Could not discard undelivered claim check {}: {}", reference, e);
                }
                tracing::warn!("Results channel for {} full, page {} not published", self.query_id, page.page_number);
                Ok(false)
            }
        }
    }

    /// Next page in publish order, or `None` when nothing arrives within `timeout`
    /// or the channel is closed and drained.
    pub async fn receive(&self, timeout: Duration) -> Result<Option<ResultPage>> {
        let envelope = {
            let mut receiver = self.receiver.lock().await;

            let closed = self.closed_signal.notified();
            tokio::pin!(closed);
            closed.as_mut().enable();

            if self.is_closed() {
                receiver.try_recv().ok()
            } else {
                tokio::select! {
                    received = tokio::time::timeout(timeout, receiver.recv()) => received.ok().flatten(),
                    _ = &mut closed => receiver.try_recv().ok(),
                }
            }
        };

        match envelope {
            Some(envelope) => {
                self.pending.fetch_sub(1, Ordering::SeqCst);
                self.decode(envelope).await.map(Some)
            }
            None => Ok(None),
        }
    }

    pub fn has_results(&self) -> bool {
        self.pending.load(Ordering::SeqCst) > 0
    }

    /// Stops accepting pages. Already queued pages can still be received.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            tracing::debug!("Results channel for {} closed", self.query_id);
        }
        self.closed_signal.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Delivers every page to `listener` until the channel is closed and drained.
    pub async fn listen(&self, listener: &dyn ResultsListener, poll: Duration) {
        loop {
            match self.receive(poll).await {
                Ok(Some(page)) => listener.on_result(page),
                Ok(None) => {
                    if self.is_closed() && !self.has_results() {
                        listener.on_close();
                        return;
                    }
                }
                Err(e) => listener.on_error(e),
            }
        }
    }

    /// Closes the channel and drops whatever is still queued, releasing claim checks.
    pub async fn discard(&self) -> usize {
        self.close();
        let mut receiver = self.receiver.lock().await;
        let mut dropped = 0;
        while let Ok(envelope) = receiver.try_recv() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            if let ResultEnvelope::ClaimCheck(reference) = envelope
                && let Err(e) = self.claim_checks.remove(&reference.reference).await
            {
                tracing::warn!("Could not discard claim check {}: {}", reference.reference, e);
            }
            dropped += 1;
        }
        dropped
    }

    async fn encode(&self, page: &ResultPage) -> Result<ResultEnvelope> {
        let bytes = bincode::serialize(page)
            .map_err(|e| ExecutorError::Internal(format!("encoding result page: {}", e)))?;

        if bytes.len() <= self.inline_threshold {
            return Ok(ResultEnvelope::Inline(bytes));
        }

        let size = bytes.len();
        let reference = self
            .claim_checks
            .put(bytes)
            .await
            .map_err(ExecutorError::collaborator)?;
        tracing::debug!(
            "Page {} of {} is {} bytes, sent as claim check {}",
            page.page_number,
            self.query_id,
            size,
            reference
        );
        Ok(ResultEnvelope::ClaimCheck(ClaimCheckRef { reference, size }))
    }

    async fn decode(&self, envelope: ResultEnvelope) -> Result<ResultPage> {
        match envelope {
            ResultEnvelope::Inline(bytes) => bincode::deserialize(&bytes)
                .map_err(|e| ExecutorError::Internal(format!("decoding result page: {}", e))),
            ResultEnvelope::ClaimCheck(reference) => {
                ClaimCheckCallback::new(self.claim_checks.clone(), &reference.reference)
                    .get_payload()
                    .await
            }
        }
    }
}

/// Registry of per-query results channels.
pub struct ResultsManager {
    channels: DashMap<QueryId, Arc<ResultsChannel>>,
    claim_checks: Arc<dyn ClaimCheckStore>,
    capacity: usize,
    inline_threshold: usize,
    publish_timeout: Duration,
}

impl ResultsManager {
    pub fn new(config: &ResultsConfig, claim_checks: Arc<dyn ClaimCheckStore>) -> Arc<Self> {
        Arc::new(Self {
            channels: DashMap::new(),
            claim_checks,
            capacity: config.queue_capacity,
            inline_threshold: config.inline_threshold_bytes,
            publish_timeout: Duration::from_millis(config.publish_timeout_ms),
        })
    }

    pub fn publish_timeout(&self) -> Duration {
        self.publish_timeout
    }

    /// The channel for `query_id`, created on first use.
    pub fn create(&self, query_id: &QueryId) -> Arc<ResultsChannel> {
        self.channels
            .entry(query_id.clone())
            .or_insert_with(|| {
                ResultsChannel::new(
                    query_id.clone(),
                    self.capacity,
                    self.inline_threshold,
                    self.claim_checks.clone(),
                )
            })
            .clone()
    }

    pub fn get(&self, query_id: &QueryId) -> Option<Arc<ResultsChannel>> {
        self.channels.get(query_id).map(|channel| channel.clone())
    }

    /// Drops the channel along with anything still queued on it.
    pub async fn remove(&self, query_id: &QueryId) -> bool {
        match self.channels.remove(query_id) {
            Some((_, channel)) => {
                let dropped = channel.discard().await;
                if dropped > 0 {
                    tracing::info!("Discarded {} undelivered pages of {}", dropped, query_id);
                }
                true
            }
            None => false,
        }
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}
