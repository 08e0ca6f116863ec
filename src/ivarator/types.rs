use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Priority given to entries that do not name one; such entries are tried last.
pub const DEFAULT_PRIORITY: i32 = i32::MAX;
pub const DEFAULT_MIN_AVAILABLE_STORAGE_MIB: u64 = 0;
pub const DEFAULT_MIN_AVAILABLE_STORAGE_PERCENT: f64 = 0.0;

fn default_priority() -> i32 {
    DEFAULT_PRIORITY
}

fn default_min_mib() -> u64 {
    DEFAULT_MIN_AVAILABLE_STORAGE_MIB
}

fn default_min_percent() -> f64 {
    DEFAULT_MIN_AVAILABLE_STORAGE_PERCENT
}

/// One candidate location for spilling an ivarator's intermediate results.
///
/// Lower `priority` is tried first. Both storage thresholds must hold for the entry
/// to be eligible. Lower-case aliases accept keys from sources that fold case.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IvaratorCacheDirConfig {
    #[serde(
        rename = "basePathURI",
        alias = "basepathuri",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub base_path_uri: Option<String>,

    #[serde(default = "default_priority")]
    pub priority: i32,

    #[serde(
        rename = "minAvailableStorageMiB",
        alias = "minavailablestoragemib",
        default = "default_min_mib"
    )]
    pub min_available_storage_mib: u64,

    #[serde(
        rename = "minAvailableStoragePercent",
        alias = "minavailablestoragepercent",
        default = "default_min_percent"
    )]
    pub min_available_storage_percent: f64,
}

impl Default for IvaratorCacheDirConfig {
    fn default() -> Self {
        Self {
            base_path_uri: None,
            priority: DEFAULT_PRIORITY,
            min_available_storage_mib: DEFAULT_MIN_AVAILABLE_STORAGE_MIB,
            min_available_storage_percent: DEFAULT_MIN_AVAILABLE_STORAGE_PERCENT,
        }
    }
}

impl IvaratorCacheDirConfig {
    pub fn new(base_path_uri: &str) -> Self {
        Self {
            base_path_uri: Some(base_path_uri.to_string()),
            ..Self::default()
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_min_available_storage_mib(mut self, mib: u64) -> Self {
        self.min_available_storage_mib = mib;
        self
    }

    pub fn with_min_available_storage_percent(mut self, percent: f64) -> Self {
        self.min_available_storage_percent = percent;
        self
    }

    /// Has a usable location and sane thresholds. Says nothing about free space.
    pub fn is_valid(&self) -> bool {
        let has_path = self
            .base_path_uri
            .as_deref()
            .is_some_and(|uri| !uri.trim().is_empty());
        let percent_ok = (0.0..=100.0).contains(&self.min_available_storage_percent);
        has_path && percent_ok
    }

    pub fn has_thresholds(&self) -> bool {
        self.min_available_storage_mib > 0 || self.min_available_storage_percent > 0.0
    }
}

/// The directory `select` settled on.
#[derive(Debug, Clone, PartialEq)]
pub struct IvaratorCacheDir {
    pub config: IvaratorCacheDirConfig,
    pub path_uri: String,
}

/// Free space as reported by the filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageStats {
    pub total_bytes: u64,
    pub available_bytes: u64,
}

impl StorageStats {
    pub fn available_mib(&self) -> u64 {
        self.available_bytes / (1024 * 1024)
    }

    pub fn available_percent(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        self.available_bytes as f64 * 100.0 / self.total_bytes as f64
    }
}

/// Local filesystem path of a `file:` URI or bare path. `None` for other schemes.
pub fn local_path(uri: &str) -> Option<PathBuf> {
    if let Some(rest) = uri.strip_prefix("file://") {
        return Some(PathBuf::from(rest));
    }
    if let Some(rest) = uri.strip_prefix("file:") {
        return Some(PathBuf::from(rest));
    }
    if uri.contains("://") {
        return None;
    }
    Some(PathBuf::from(uri))
}
