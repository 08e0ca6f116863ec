//! Claim-check storage for oversized result pages.
//!
//! The producer parks the encoded page in a `ClaimCheckStore` and sends only the
//! reference; the consumer redeems it through a `ClaimCheckCallback`.

use crate::error::{ExecutorError, Result};
use anyhow::Context;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use std::path::PathBuf;
use std::sync::Arc;

#[async_trait]
pub trait ClaimCheckStore: Send + Sync {
    /// Stores `payload` and returns the reference to redeem it with.
    async fn put(&self, payload: Vec<u8>) -> anyhow::Result<String>;

    async fn get(&self, reference: &str) -> anyhow::Result<Vec<u8>>;

    async fn remove(&self, reference: &str) -> anyhow::Result<()>;
}

#[derive(Default)]
pub struct MemoryClaimCheckStore {
    payloads: DashMap<String, Vec<u8>>,
}

impl MemoryClaimCheckStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn len(&self) -> usize {
        self.payloads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payloads.is_empty()
    }
}

#[async_trait]
impl ClaimCheckStore for MemoryClaimCheckStore {
    async fn put(&self, payload: Vec<u8>) -> anyhow::Result<String> {
        let reference = uuid::Uuid::new_v4().to_string();
        self.payloads.insert(reference.clone(), payload);
        Ok(reference)
    }

    async fn get(&self, reference: &str) -> anyhow::Result<Vec<u8>> {
        self.payloads
            .get(reference)
            .map(|payload| payload.clone())
            .ok_or_else(|| anyhow::anyhow!("no payload stored under {}", reference))
    }

    async fn remove(&self, reference: &str) -> anyhow::Result<()> {
        self.payloads.remove(reference);
        Ok(())
    }
}

/// One file per payload under `dir`, shareable between processes on the same volume.
pub struct DirClaimCheckStore {
    dir: PathBuf,
}

impl DirClaimCheckStore {
    pub async fn open(dir: impl Into<PathBuf>) -> anyhow::Result<Arc<Self>> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("creating claim check dir {}", dir.display()))?;
        Ok(Arc::new(Self { dir }))
    }

    fn path_for(&self, reference: &str) -> anyhow::Result<PathBuf> {
        if reference.is_empty() || reference.contains(['/', '\\', '.']) {
            anyhow::bail!("malformed claim check reference {:?}", reference);
        }
        Ok(self.dir.join(format!("{}.bin", reference)))
    }
}

#[async_trait]
impl ClaimCheckStore for DirClaimCheckStore {
    async fn put(&self, payload: Vec<u8>) -> anyhow::Result<String> {
        let reference = uuid::Uuid::new_v4().simple().to_string();
        let path = self.path_for(&reference)?;
        tokio::fs::write(&path, payload)
            .await
            .with_context(|| format!("writing {}", path.display()))?;
        Ok(reference)
    }

    async fn get(&self, reference: &str) -> anyhow::Result<Vec<u8>> {
        let path = self.path_for(reference)?;
        tokio::fs::read(&path)
            .await
            .with_context(|| format!("reading {}", path.display()))
    }

    async fn remove(&self, reference: &str) -> anyhow::Result<()> {
        let path = self.path_for(reference)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(anyhow::anyhow!(e)),
        }
    }
}

const FETCH_ATTEMPTS: usize = 2;

/// Redeems a claim-check reference for the decoded payload.
pub struct ClaimCheckCallback {
    store: Arc<dyn ClaimCheckStore>,
    reference: String,
}

impl ClaimCheckCallback {
    pub fn new(store: Arc<dyn ClaimCheckStore>, reference: &str) -> Self {
        Self {
            store,
            reference: reference.to_string(),
        }
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }

    /// Fetches and decodes the payload, retrying once before giving up.
    /// The stored copy is discarded after a successful fetch.
    pub async fn get_payload<T: DeserializeOwned>(&self) -> Result<T> {
        let mut last_error = String::new();

        for attempt in 0..FETCH_ATTEMPTS {
            match self.fetch::<T>().await {
                Ok(payload) => {
                    if let Err(e) = self.store.remove(&self.reference).await {
                        tracing::warn!("Could not discard claim check {}: {}", self.reference, e);
                    }
                    return Ok(payload);
                }
                Err(e) => {
                    tracing::debug!(
                        "Claim check {} fetch attempt {} failed: {:#}",
                        self.reference,
                        attempt + 1,
                        e
                    );
                    last_error = format!("{:#}", e);
                }
            }
        }

        Err(ExecutorError::ClaimCheckFetchFailed {
            reference: self.reference.clone(),
            reason: last_error,
        })
    }

    async fn fetch<T: DeserializeOwned>(&self) -> anyhow::Result<T> {
        let bytes = self.store.get(&self.reference).await?;
        bincode::deserialize(&bytes).context("decoding claim check payload")
    }
}
