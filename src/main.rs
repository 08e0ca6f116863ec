use clap::Parser;
use query_executor::clock::system_clock;
use query_executor::config::{
    Args, CoordinationBackendKind, ExecutorConfig, StorageBackendKind,
};
use query_executor::coordination::file::FileCoordinator;
use query_executor::coordination::lock::LockProvider;
use query_executor::coordination::service::{CoordinationService, InMemoryCoordinator};
use query_executor::executor::collaborators::{MemoryScanBackend, RangePlanner};
use query_executor::executor::executor::{ExecutorContext, QueryExecutor};
use query_executor::executor::handlers::router;
use query_executor::executor::registry::QueryLogicRegistry;
use query_executor::executor::service::QueryService;
use query_executor::ivarator::selector::IvaratorCacheDirSelector;
use query_executor::monitor::find_work::FindWorkMonitor;
use query_executor::notification::channel::TaskNotificationChannel;
use query_executor::notification::http::HttpNotificationBus;
use query_executor::notification::local::NotificationHub;
use query_executor::pool::allocator::ConnectionPoolAllocator;
use query_executor::results::channel::ResultsManager;
use query_executor::results::claim_check::{
    ClaimCheckStore, DirClaimCheckStore, MemoryClaimCheckStore,
};
use query_executor::storage::backend::TaskBackend;
use query_executor::storage::file::FileTaskBackend;
use query_executor::storage::memory::MemoryTaskBackend;
use query_executor::storage::store::QueryTaskStore;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const NOTIFICATION_CAPACITY: usize = 1024;
const EXPIRE_INTERVAL: Duration = Duration::from_secs(60);
const DEMO_ROWS: usize = 1000;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ExecutorConfig::load(&args)?;
    let node_id = config
        .node
        .id
        .clone()
        .unwrap_or_else(|| format!("executor-{}", uuid::Uuid::new_v4()));

    tracing::info!("Starting executor {} on {}", node_id, config.node.bind);
    if config.node.peers.is_empty() {
        tracing::info!("No peers configured, running standalone");
    } else {
        tracing::info!("Peers: {:?}", config.node.peers);
    }

    let clock = system_clock();

    // 1. Task store:
    let backend: Arc<dyn TaskBackend> = match config.storage.backend {
        StorageBackendKind::Memory => Arc::new(MemoryTaskBackend::new()),
        StorageBackendKind::File => {
            let directory = config.storage.directory.clone().ok_or_else(|| {
                anyhow::anyhow!("storage.directory is required for the file backend")
            })?;
            Arc::new(FileTaskBackend::open(directory, config.storage.synch_storage)?)
        }
    };
    let store = QueryTaskStore::new(backend, clock.clone());

    // 2. Locks and connection pools:
    let coordinator: Arc<dyn CoordinationService> = match config.coordination.backend {
        CoordinationBackendKind::Memory => InMemoryCoordinator::new(clock.clone()),
        CoordinationBackendKind::File => {
            let directory = config.coordination.directory.clone().ok_or_else(|| {
                anyhow::anyhow!("coordination.directory is required for the file coordinator")
            })?;
            FileCoordinator::open(directory, clock.clone())?
        }
    };
    let locks = LockProvider::new(coordinator, &config.lock);
    let pools = ConnectionPoolAllocator::new(&config.pools)?;

    // 3. Notification bus:
    let hub = NotificationHub::new(NOTIFICATION_CAPACITY);
    let bind = |origin: &str| -> Arc<dyn TaskNotificationChannel> {
        if config.node.peers.is_empty() {
            hub.bind(origin)
        } else {
            HttpNotificationBus::new(hub.bind(origin), config.node.peers.clone())
        }
    };
    let channel = bind(&node_id);
    let monitor_channel = bind(&format!("{}:monitor", node_id));

    // 4. Results:
    let claim_checks: Arc<dyn ClaimCheckStore> = match &config.results.claim_check_dir {
        Some(dir) => DirClaimCheckStore::open(dir.clone()).await?,
        None => MemoryClaimCheckStore::new(),
    };
    let results = ResultsManager::new(&config.results, claim_checks);

    // 5. Query logic (in-memory range table):
    let table = MemoryScanBackend::new(256);
    for i in 0..DEMO_ROWS {
        table.insert(&format!("row-{:06}", i), i.to_string().into_bytes());
    }
    let logics = QueryLogicRegistry::new();
    logics.register("RangeQuery", Arc::new(RangePlanner::with_table(table.clone())));

    // 6. Ivarator cache directories:
    if !config.ivarator.cache_dirs.is_empty() {
        let selector = IvaratorCacheDirSelector::with_statvfs(config.ivarator.cache_dirs.clone());
        match selector.select() {
            Ok(dir) => tracing::info!("Ivarator cache directory: {}", dir.path_uri),
            Err(e) => tracing::warn!("Ivarator cache directories unusable: {}", e),
        }
    }

    // 7. Executor and monitor:
    let executor = QueryExecutor::new(
        &node_id,
        ExecutorContext {
            store: store.clone(),
            locks,
            pools,
            channel,
            logics,
            scans: table,
            results,
            clock: clock.clone(),
            config: config.executor.clone(),
        },
    );
    executor.clone().start().await;

    let monitor = FindWorkMonitor::new(store.clone(), monitor_channel, clock, config.monitor.clone());
    monitor.clone().start();

    // 8. Store maintenance:
    let flush_store = store.clone();
    let flush_interval = Duration::from_millis(config.storage.flush_interval_ms.max(1));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(flush_interval);
        loop {
            interval.tick().await;
            if let Err(e) = flush_store.flush() {
                tracing::warn!("Task store flush failed: {}", e);
            }
        }
    });

    let expire_store = store.clone();
    let expire_after = config.storage.expire_after_ms;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(EXPIRE_INTERVAL);
        loop {
            interval.tick().await;
            if let Err(e) = expire_store.expire(expire_after) {
                tracing::warn!("Task store expiry failed: {}", e);
            }
        }
    });

    // 9. HTTP router:
    let app = router(QueryService::new(executor.clone()), hub);
    let listener = tokio::net::TcpListener::bind(&config.node.bind).await?;
    tracing::info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    executor.shutdown();
    monitor.shutdown();
    store.flush()?;
    tracing::info!("Executor {} stopped", node_id);

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Could not listen for shutdown signal: {}", e);
    }
}
