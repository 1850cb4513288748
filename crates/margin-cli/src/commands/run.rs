use std::sync::Arc;
use std::time::Duration;

use margin_core::adapters::{NetworkAdapter, ProbeNetwork};
use margin_core::sync::{StaticToken, SyncScheduler};
use margin_core::{QueueSnapshot, SyncIndicator, SyncQueue};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::commands::common::{open_queue, CliContext};
use crate::error::CliError;

/// Sync in the foreground until Ctrl-C
pub async fn run_foreground(context: &CliContext) -> Result<(), CliError> {
    let (api_base_url, token) = context.delivery_credentials()?;
    let probe_url = context
        .config
        .effective_probe_url()
        .ok_or(CliError::ApiNotConfigured)?;

    let queue = open_queue(context).await?;
    let network: Arc<dyn NetworkAdapter> = Arc::new(ProbeNetwork::spawn(
        &probe_url,
        context.config.probe_interval(),
        context.config.request_timeout(),
    )?);
    let interval = context.config.flush_interval();

    let indicator_task = spawn_indicator_log(queue.subscribe());
    let refresh_task = spawn_storage_refresh(Arc::clone(&queue), interval);
    let scheduler = SyncScheduler::spawn(
        Arc::clone(&queue),
        network,
        Arc::new(StaticToken::new(Some(token.to_string()))),
        interval,
    );

    println!(
        "Syncing {} to {api_base_url} every {}s. Press Ctrl-C to stop.",
        context.queue_path.display(),
        interval.as_secs()
    );
    tokio::signal::ctrl_c().await?;

    refresh_task.abort();
    scheduler.shutdown().await;
    indicator_task.abort();

    println!("Stopped with {} actions pending", queue.pending_count());
    Ok(())
}

/// Pick up actions queued by other `margin` invocations
fn spawn_storage_refresh(queue: Arc<SyncQueue>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; the queue was just loaded
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Some(count) = queue.refresh_from_storage().await {
                tracing::debug!("Refreshed queue from storage: {count} actions");
            }
        }
    })
}

fn spawn_indicator_log(mut snapshots: watch::Receiver<QueueSnapshot>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut last = SyncIndicator::from_snapshot(&snapshots.borrow_and_update());
        tracing::info!("{}", last.label());
        while snapshots.changed().await.is_ok() {
            let indicator = SyncIndicator::from_snapshot(&snapshots.borrow_and_update());
            if indicator != last {
                tracing::info!("{}", indicator.label());
                last = indicator;
            }
        }
    })
}
