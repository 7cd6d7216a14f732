use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use pageshot_engine::{
    CaptureConfig, CaptureExecutor, CaptureScheduler, CdpDriver, HttpWebhookNotifier,
    LaunchConfig, PagePool, PoolConfig, RedbHistoryStore, RedbScheduleStore, SchedulerConfig,
};
use pageshot_storage::Storage;
use tokio::sync::watch;
use tracing::info;

use crate::cli::RunArgs;

/// Run the scheduler in the foreground until Ctrl-C.
pub async fn run(storage: Arc<Storage>, args: RunArgs) -> Result<()> {
    let driver = Arc::new(CdpDriver::new(LaunchConfig {
        executable: args.browser,
        no_sandbox: args.no_sandbox,
        ..Default::default()
    }));
    let pool = PagePool::new(
        driver,
        PoolConfig {
            max_size: args.max_pages.max(1),
            idle_timeout: Duration::from_secs(args.idle_timeout_secs),
            ..Default::default()
        },
    );
    let executor = Arc::new(CaptureExecutor::new(pool.clone(), CaptureConfig::default()));

    let store = Arc::new(RedbScheduleStore::new(storage.clone()));
    let history = Arc::new(RedbHistoryStore::new(storage));
    let notifier = Arc::new(HttpWebhookNotifier::new());
    let scheduler = CaptureScheduler::new(
        executor,
        store,
        history,
        notifier,
        SchedulerConfig {
            tick_interval: Duration::from_secs(args.tick_secs.max(1)),
            ..Default::default()
        },
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    scheduler.run(shutdown_rx).await;
    pool.shutdown().await;
    info!("scheduler stopped");
    Ok(())
}
