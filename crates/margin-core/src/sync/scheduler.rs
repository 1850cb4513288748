//! Timer and connectivity driven flush task.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::SyncQueue;
use crate::adapters::NetworkAdapter;
use crate::util::normalize_text_option;

/// Periodic flush interval used when none is configured
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(30);

/// Supplies the bearer token for each flush.
///
/// Session management lives outside the queue; returning `None` skips the flush.
#[async_trait]
pub trait AuthTokenSource: Send + Sync {
    async fn auth_token(&self) -> Option<String>;
}

/// Fixed token, e.g. from `MARGIN_AUTH_TOKEN`
#[derive(Clone, Default, PartialEq, Eq)]
pub struct StaticToken(Option<String>);

impl StaticToken {
    #[must_use]
    pub fn new(token: Option<String>) -> Self {
        Self(normalize_text_option(token))
    }

    #[must_use]
    pub const fn is_present(&self) -> bool {
        self.0.is_some()
    }
}

impl std::fmt::Debug for StaticToken {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let token = if self.0.is_some() { "[REDACTED]" } else { "None" };
        formatter.debug_tuple("StaticToken").field(&token).finish()
    }
}

#[async_trait]
impl AuthTokenSource for StaticToken {
    async fn auth_token(&self) -> Option<String> {
        self.0.clone()
    }
}

/// Background task that flushes the queue every interval and whenever
/// connectivity returns.
pub struct SyncScheduler;

impl SyncScheduler {
    /// Start the task on the current tokio runtime
    pub fn spawn(
        queue: Arc<SyncQueue>,
        network: Arc<dyn NetworkAdapter>,
        tokens: Arc<dyn AuthTokenSource>,
        interval: Duration,
    ) -> SchedulerHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let (transition_tx, mut transitions) = mpsc::unbounded_channel();

        queue.set_online(network.is_online());
        let subscription = network.on_online_change(Box::new(move |online| {
            let _ = transition_tx.send(online);
        }));

        let task = tokio::spawn(async move {
            // Dropped with the task, detaching the connectivity callback
            let _subscription = subscription;
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        flush_if_ready(&queue, network.as_ref(), tokens.as_ref(), "interval").await;
                    }
                    Some(online) = transitions.recv() => {
                        queue.set_online(online);
                        if online {
                            flush_if_ready(&queue, network.as_ref(), tokens.as_ref(), "reconnect").await;
                        }
                    }
                }
            }
            tracing::debug!("Sync scheduler stopped");
        });

        tracing::info!("Sync scheduler started: interval={}s", interval.as_secs());
        SchedulerHandle {
            shutdown: shutdown_tx,
            task,
        }
    }
}

async fn flush_if_ready(
    queue: &SyncQueue,
    network: &dyn NetworkAdapter,
    tokens: &dyn AuthTokenSource,
    trigger: &str,
) {
    if !network.is_online() {
        tracing::debug!("Skipping {trigger} flush: offline");
        return;
    }
    if queue.pending_count() == 0 {
        return;
    }
    let Some(token) = tokens.auth_token().await else {
        tracing::debug!("Skipping {trigger} flush: no auth token");
        return;
    };

    let report = queue.flush_queue(&token).await;
    if let Some(error) = report.error {
        tracing::warn!("Scheduled flush stopped early: {error}");
    }
}

/// Handle to a running [`SyncScheduler`].
///
/// Dropping the handle also stops the task.
pub struct SchedulerHandle {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stop the task, letting an in-flight flush finish first
    pub async fn shutdown(self) {
        let Self { shutdown, task } = self;
        let _ = shutdown.send(());
        if let Err(error) = task.await {
            tracing::warn!("Sync scheduler task ended abnormally: {error}");
        }
    }
}
