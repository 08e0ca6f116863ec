use super::types::{IvaratorCacheDir, IvaratorCacheDirConfig, StorageStats, local_path};
use crate::error::{ExecutorError, Result};
use rand::seq::SliceRandom;
use std::sync::Arc;

/// Measures free space behind a cache directory URI.
pub trait FreeSpaceSource: Send + Sync {
    fn stats(&self, uri: &str) -> anyhow::Result<StorageStats>;
}

/// `statvfs(2)` on the local path of the URI.
#[derive(Debug, Default, Clone, Copy)]
pub struct StatvfsSource;

impl FreeSpaceSource for StatvfsSource {
    fn stats(&self, uri: &str) -> anyhow::Result<StorageStats> {
        let path = local_path(uri)
            .ok_or_else(|| anyhow::anyhow!("{} is not on a local filesystem", uri))?;
        let vfs = nix::sys::statvfs::statvfs(&path)?;
        let fragment = vfs.fragment_size() as u64;
        Ok(StorageStats {
            total_bytes: (vfs.blocks() as u64).saturating_mul(fragment),
            available_bytes: (vfs.blocks_available() as u64).saturating_mul(fragment),
        })
    }
}

/// Picks the first cache directory, in priority order, that currently has room.
///
/// Directories sharing a priority are tried in a fresh random order on every call so
/// queries spread over them. Nothing is cached between calls: a directory that fills
/// up mid-query is skipped on the next `select` and the following entry is used instead.
pub struct IvaratorCacheDirSelector {
    dirs: Vec<IvaratorCacheDirConfig>,
    space: Arc<dyn FreeSpaceSource>,
}

impl IvaratorCacheDirSelector {
    pub fn new(mut dirs: Vec<IvaratorCacheDirConfig>, space: Arc<dyn FreeSpaceSource>) -> Self {
        dirs.sort_by_key(|dir| dir.priority);
        Self { dirs, space }
    }

    pub fn with_statvfs(dirs: Vec<IvaratorCacheDirConfig>) -> Self {
        Self::new(dirs, Arc::new(StatvfsSource))
    }

    pub fn configs(&self) -> &[IvaratorCacheDirConfig] {
        &self.dirs
    }

    /// Priority order, shuffled within each group of equal priority.
    pub fn shuffled(&self) -> Vec<&IvaratorCacheDirConfig> {
        let mut rng = rand::thread_rng();
        let mut ordered = Vec::with_capacity(self.dirs.len());
        for group in self.dirs.chunk_by(|a, b| a.priority == b.priority) {
            let mut group: Vec<&IvaratorCacheDirConfig> = group.iter().collect();
            group.shuffle(&mut rng);
            ordered.extend(group);
        }
        ordered
    }

    pub fn select(&self) -> Result<IvaratorCacheDir> {
        self.shuffled()
            .into_iter()
            .find(|dir| self.is_eligible(dir))
            .and_then(|dir| {
                dir.base_path_uri.as_ref().map(|uri| IvaratorCacheDir {
                    config: dir.clone(),
                    path_uri: uri.clone(),
                })
            })
            .ok_or(ExecutorError::NoEligibleDirectory)
    }

    /// Every currently eligible directory, in the order `select` would try them.
    pub fn eligible(&self) -> Vec<IvaratorCacheDir> {
        self.shuffled()
            .into_iter()
            .filter(|dir| self.is_eligible(dir))
            .filter_map(|dir| {
                dir.base_path_uri.as_ref().map(|uri| IvaratorCacheDir {
                    config: dir.clone(),
                    path_uri: uri.clone(),
                })
            })
            .collect()
    }

    pub fn is_eligible(&self, dir: &IvaratorCacheDirConfig) -> bool {
        if !dir.is_valid() {
            return false;
        }
        if !dir.has_thresholds() {
            return true;
        }

        let Some(uri) = dir.base_path_uri.as_deref() else {
            return false;
        };
        match self.space.stats(uri) {
            Ok(stats) => {
                let eligible = stats.available_mib() >= dir.min_available_storage_mib
                    && stats.available_percent() >= dir.min_available_storage_percent;
                if !eligible {
                    tracing::debug!(
                        "Cache dir {} below threshold ({} MiB, {:.1}% free)",
                        uri,
                        stats.available_mib(),
                        stats.available_percent()
                    );
                }
                eligible
            }
            Err(e) => {
                tracing::warn!("Could not measure cache dir {}: {:#}", uri, e);
                false
            }
        }
    }
}

pub fn to_json(dirs: &[IvaratorCacheDirConfig]) -> Result<String> {
    serde_json::to_string(dirs).map_err(|e| ExecutorError::Internal(e.to_string()))
}

pub fn from_json(text: &str) -> Result<Vec<IvaratorCacheDirConfig>> {
    serde_json::from_str(text)
        .map_err(|e| ExecutorError::InvalidRequest(format!("ivarator cache dirs: {}", e)))
}
