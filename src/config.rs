//! Executor configuration.
//!
//! Built once at startup and shared read-only with every component. Sources, in order
//! of precedence (later wins):
//! 1. Defaults compiled into the binary
//! 2. An optional TOML file (`--config`)
//! 3. Environment variables prefixed with `QEXEC`, nested with `__`
//!    (e.g. `QEXEC_LOCK__LOCK_WAIT_TIME_MS=2000`)
//! 4. Command-line flags

use crate::ivarator::types::IvaratorCacheDirConfig;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_CONFIG: &str = r#"
[node]
bind = "127.0.0.1:8080"
peers = []

[lock]
lock_wait_time_ms = 5000
lock_lease_time_ms = 30000

[pools]
default_pool = "WAREHOUSE"

[[pools.pools]]
name = "WAREHOUSE"
admin = 4
high = 8
normal = 16
low = 4

[coordination]
backend = "memory"

[storage]
backend = "memory"
synch_storage = false
flush_interval_ms = 1000
expire_after_ms = 86400000

[monitor]
enabled = true
period_ms = 30000
grace_period_ms = 60000

[executor]
worker_count = 4
max_concurrent_tasks = 16
allocation_timeout_ms = 5000
session_reap_interval_ms = 5000

[results]
inline_threshold_bytes = 65536
queue_capacity = 64
publish_timeout_ms = 30000

[ivarator]
cache_dirs = []
"#;

/// Command-line arguments
#[derive(Debug, Parser)]
#[clap(version, about)]
pub struct Args {
    /// Configuration file path
    #[clap(short, long, env = "QEXEC_CONFIG")]
    pub config: Option<PathBuf>,

    /// HTTP bind address, e.g. 127.0.0.1:8080
    #[clap(long)]
    pub bind: Option<String>,

    /// Base URL of a peer executor; repeatable
    #[clap(long = "peer")]
    pub peers: Vec<String>,

    /// Stable identity of this executor (generated when absent)
    #[clap(long)]
    pub node_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    pub node: NodeConfig,
    pub lock: LockConfig,
    pub pools: PoolsConfig,
    #[serde(default)]
    pub coordination: CoordinationConfig,
    pub storage: StorageConfig,
    pub monitor: MonitorConfig,
    pub executor: WorkerConfig,
    pub results: ResultsConfig,
    #[serde(default)]
    pub ivarator: IvaratorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Identity used as `origin_id` on the notification bus and as task owner.
    #[serde(default)]
    pub id: Option<String>,
    pub bind: String,
    /// Base URLs of the other executors the notification bus fans out to.
    #[serde(default)]
    pub peers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    #[serde(default = "default_lock_wait")]
    pub lock_wait_time_ms: u64,
    #[serde(default = "default_lock_lease")]
    pub lock_lease_time_ms: u64,
}

fn default_lock_wait() -> u64 {
    5000
}

fn default_lock_lease() -> u64 {
    30000
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            lock_wait_time_ms: default_lock_wait(),
            lock_lease_time_ms: default_lock_lease(),
        }
    }
}

impl LockConfig {
    pub fn wait_time(&self) -> Duration {
        Duration::from_millis(self.lock_wait_time_ms)
    }

    pub fn lease_time(&self) -> Duration {
        Duration::from_millis(self.lock_lease_time_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolsConfig {
    pub default_pool: String,
    #[serde(default)]
    pub pools: Vec<PoolConfig>,
}

/// Tier sizes of one named pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    pub name: String,
    #[serde(default)]
    pub admin: usize,
    #[serde(default)]
    pub high: usize,
    #[serde(default)]
    pub normal: usize,
    #[serde(default)]
    pub low: usize,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CoordinationBackendKind {
    #[default]
    Memory,
    File,
}

/// Where locks and semaphores live. Executors in separate processes must share a
/// `file` coordinator directory to exclude each other.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoordinationConfig {
    #[serde(default)]
    pub backend: CoordinationBackendKind,
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackendKind {
    Memory,
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub backend: StorageBackendKind,
    /// Root directory of the file backend.
    #[serde(default)]
    pub directory: Option<PathBuf>,
    /// Flush and fsync every write before acknowledging it.
    #[serde(default)]
    pub synch_storage: bool,
    #[serde(default = "default_flush_interval")]
    pub flush_interval_ms: u64,
    /// Age after which terminal tasks and closed queries are cleaned up.
    #[serde(default = "default_expire_after")]
    pub expire_after_ms: u64,
}

fn default_flush_interval() -> u64 {
    1000
}

fn default_expire_after() -> u64 {
    24 * 60 * 60 * 1000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub period_ms: u64,
    pub grace_period_ms: u64,
}

fn default_true() -> bool {
    true
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            period_ms: 30_000,
            grace_period_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Tasks this executor runs concurrently.
    pub worker_count: usize,
    /// Fleet-wide cap on concurrently running NEXT tasks per connection pool.
    pub max_concurrent_tasks: usize,
    pub allocation_timeout_ms: u64,
    /// How often idle scan sessions are checked against the stored query state.
    #[serde(default = "default_reap_interval")]
    pub session_reap_interval_ms: u64,
}

fn default_reap_interval() -> u64 {
    5000
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            max_concurrent_tasks: 16,
            allocation_timeout_ms: 5000,
            session_reap_interval_ms: default_reap_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultsConfig {
    /// Pages whose serialized size exceeds this travel by claim check.
    pub inline_threshold_bytes: usize,
    pub queue_capacity: usize,
    pub publish_timeout_ms: u64,
    /// Directory holding claim-check payloads; kept in memory when absent.
    #[serde(default)]
    pub claim_check_dir: Option<PathBuf>,
}

impl Default for ResultsConfig {
    fn default() -> Self {
        Self {
            inline_threshold_bytes: 64 * 1024,
            queue_capacity: 64,
            publish_timeout_ms: 30_000,
            claim_check_dir: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IvaratorConfig {
    #[serde(default)]
    pub cache_dirs: Vec<IvaratorCacheDirConfig>,
}

impl ExecutorConfig {
    /// Load configuration from all sources
    pub fn load(args: &Args) -> anyhow::Result<Self> {
        let mut builder = config::Config::builder()
            .add_source(config::File::from_str(DEFAULT_CONFIG, config::FileFormat::Toml));

        if let Some(path) = &args.config {
            builder = builder.add_source(config::File::from(path.as_path()));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("QEXEC")
                .prefix_separator("_")
                .separator("__"),
        );

        let mut config: ExecutorConfig = builder.build()?.try_deserialize()?;

        if let Some(bind) = &args.bind {
            config.node.bind = bind.clone();
        }
        if !args.peers.is_empty() {
            config.node.peers = args.peers.clone();
        }
        if let Some(node_id) = &args.node_id {
            config.node.id = Some(node_id.clone());
        }

        config.validate()?;
        Ok(config)
    }

    /// Rejects combinations that cannot work. Peers only see each other's tasks and
    /// locks through a shared file store written synchronously and a shared file
    /// coordinator.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.storage.backend == StorageBackendKind::File && self.storage.directory.is_none() {
            anyhow::bail!("storage.directory is required for the file backend");
        }
        if self.coordination.backend == CoordinationBackendKind::File
            && self.coordination.directory.is_none()
        {
            anyhow::bail!("coordination.directory is required for the file coordinator");
        }
        if self.node.peers.is_empty() {
            return Ok(());
        }
        if self.storage.backend != StorageBackendKind::File {
            anyhow::bail!("node.peers requires storage.backend = \"file\" on a shared directory");
        }
        if !self.storage.synch_storage {
            anyhow::bail!("node.peers requires storage.synch_storage so peers see every write");
        }
        if self.coordination.backend != CoordinationBackendKind::File {
            anyhow::bail!("node.peers requires coordination.backend = \"file\" on a shared directory");
        }
        Ok(())
    }

    /// The compiled-in defaults, without file, environment or flags.
    pub fn defaults() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::from_str(DEFAULT_CONFIG, config::FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shared(mut config: ExecutorConfig) -> ExecutorConfig {
        config.storage.backend = StorageBackendKind::File;
        config.storage.directory = Some(PathBuf::from("/srv/qexec/store"));
        config.storage.synch_storage = true;
        config.coordination.backend = CoordinationBackendKind::File;
        config.coordination.directory = Some(PathBuf::from("/srv/qexec/locks"));
        config
    }

    #[test]
    fn test_defaults_are_standalone_and_valid() {
        let config = ExecutorConfig::defaults().unwrap();

        assert!(config.node.peers.is_empty());
        assert_eq!(config.coordination.backend, CoordinationBackendKind::Memory);
        assert_eq!(config.executor.session_reap_interval_ms, 5000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_peers_require_shared_store_and_coordinator() {
        let mut config = ExecutorConfig::defaults().unwrap();
        config.node.peers = vec!["http://10.0.0.2:8080".to_string()];

        // In-memory everything: peers could never see our tasks.
        assert!(config.validate().is_err());

        let mut buffered = shared(config.clone());
        buffered.storage.synch_storage = false;
        assert!(buffered.validate().is_err());

        let mut local_locks = shared(config.clone());
        local_locks.coordination.backend = CoordinationBackendKind::Memory;
        assert!(local_locks.validate().is_err());

        assert!(shared(config).validate().is_ok());
    }

    #[test]
    fn test_file_backends_need_a_directory() {
        let mut config = ExecutorConfig::defaults().unwrap();
        config.coordination.backend = CoordinationBackendKind::File;
        assert!(config.validate().is_err());

        config.coordination.directory = Some(PathBuf::from("/tmp/qexec-locks"));
        config.storage.backend = StorageBackendKind::File;
        assert!(config.validate().is_err());
    }
}
