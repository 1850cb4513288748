//! Durable offline action queue and its flush loop.
//!
//! The queue is the only component that decides what happens to an action.
//! Adapters store, report and deliver; the entity store only merges.

mod scheduler;

use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tokio::sync::watch;

pub use scheduler::{
    AuthTokenSource, SchedulerHandle, StaticToken, SyncScheduler, DEFAULT_FLUSH_INTERVAL,
};

use crate::adapters::{ApiAdapter, ApiOutcome, PersistenceAdapter};
use crate::error::Result;
use crate::models::{ActionId, ActionStatus, ActionType, EntityType, SyncAction};
use crate::state::{QueueSnapshot, QueueStatus, SyncIndicator};
use crate::store::AnnotationStore;
use crate::util::now_millis;

/// Summary of one flush pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Another pass was already running; nothing was attempted
    pub already_running: bool,
    pub delivered: usize,
    /// Actions superseded by the server's version
    pub conflicts: usize,
    /// Action that failed and stopped the pass
    pub failed: Option<ActionId>,
    pub error: Option<String>,
}

impl FlushReport {
    #[must_use]
    pub fn already_running() -> Self {
        Self {
            already_running: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn attempted(&self) -> usize {
        self.delivered + self.conflicts + if self.failed.is_some() { 1 } else { 0 }
    }

    #[must_use]
    pub const fn is_clean(&self) -> bool {
        !self.already_running && self.failed.is_none()
    }
}

struct QueueState {
    actions: Vec<SyncAction>,
    status: QueueStatus,
    is_online: bool,
    last_timestamp: i64,
    /// Actions whose latest in-memory state failed to reach storage
    unpersisted: HashSet<ActionId>,
}

/// Delivery order: client timestamp, then id
fn delivery_order(left: &SyncAction, right: &SyncAction) -> Ordering {
    left.timestamp
        .cmp(&right.timestamp)
        .then_with(|| left.id.cmp(&right.id))
}

impl QueueState {
    fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            status: self.status,
            pending: self.actions.len(),
            failed: self.actions.iter().filter(|action| action.is_failed()).count(),
            is_online: self.is_online,
        }
    }

    /// Strictly increasing client timestamp
    fn next_timestamp(&mut self) -> i64 {
        let timestamp = now_millis().max(self.last_timestamp + 1);
        self.last_timestamp = timestamp;
        timestamp
    }

    /// Earliest action not yet in flight
    fn next_deliverable(&mut self) -> Option<&mut SyncAction> {
        self.actions
            .iter_mut()
            .filter(|action| action.status != ActionStatus::Syncing)
            .min_by(|left, right| delivery_order(left, right))
    }

    /// Ignored when the action already left the queue
    fn mark_unpersisted(&mut self, id: ActionId) {
        if self.actions.iter().any(|action| action.id == id) {
            self.unpersisted.insert(id);
        }
    }

    fn take(&mut self, id: &ActionId) -> Option<SyncAction> {
        self.unpersisted.remove(id);
        let index = self.actions.iter().position(|action| action.id == *id)?;
        Some(self.actions.remove(index))
    }

    fn has_actions_for(&self, entity_id: &str) -> bool {
        self.actions
            .iter()
            .any(|action| action.entity_id == entity_id)
    }
}

/// Client-resident queue of annotation mutations awaiting delivery.
///
/// Construct once at startup and share as `Arc<SyncQueue>`.
pub struct SyncQueue {
    persistence: Arc<dyn PersistenceAdapter>,
    api: Arc<dyn ApiAdapter>,
    annotations: Arc<AnnotationStore>,
    state: Mutex<QueueState>,
    snapshots: watch::Sender<QueueSnapshot>,
}

impl SyncQueue {
    #[must_use]
    pub fn new(
        persistence: Arc<dyn PersistenceAdapter>,
        api: Arc<dyn ApiAdapter>,
        annotations: Arc<AnnotationStore>,
    ) -> Self {
        let (snapshots, _) = watch::channel(QueueSnapshot::default());
        Self {
            persistence,
            api,
            annotations,
            state: Mutex::new(QueueState {
                actions: Vec::new(),
                status: QueueStatus::Idle,
                is_online: true,
                last_timestamp: 0,
                unpersisted: HashSet::new(),
            }),
            snapshots,
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publish while still holding the state lock so observers see changes in order
    fn publish(&self, state: &QueueState) {
        self.snapshots.send_replace(state.snapshot());
    }

    /// Entity store this queue merges server results into
    pub fn annotations(&self) -> &Arc<AnnotationStore> {
        &self.annotations
    }

    /// Queue a local mutation and write it through to storage.
    ///
    /// A storage failure is logged; the action stays queued in memory.
    pub async fn enqueue_action(
        &self,
        entity_type: EntityType,
        entity_id: impl Into<String>,
        action_type: ActionType,
        payload: Option<Value>,
    ) -> ActionId {
        let action = {
            let mut state = self.lock();
            let timestamp = state.next_timestamp();
            let action = SyncAction::new(entity_type, entity_id, action_type, payload, timestamp);
            state.actions.push(action.clone());
            self.publish(&state);
            action
        };

        tracing::debug!(
            "Queued {} {} {} as {}",
            action.action_type,
            action.entity_type,
            action.entity_id,
            action.id
        );
        if let Err(error) = self.persistence.save_pending_action(&action).await {
            tracing::warn!("Failed to persist queued action {}: {error}", action.id);
            self.lock().mark_unpersisted(action.id);
        }
        action.id
    }

    /// Replace the in-memory queue with the persisted one.
    ///
    /// Actions that never reached storage are kept and written again.
    /// Returns the number of actions loaded, or `None` when storage could not
    /// be read (the queue is left unchanged).
    pub async fn load_persisted_queue(&self) -> Option<usize> {
        let actions = self.read_persisted().await?;
        let (count, retained) = {
            let mut state = self.lock();
            if state.status == QueueStatus::Syncing {
                tracing::warn!("Reloading sync queue while a flush is running");
            }
            let retained = self.install(&mut state, actions);
            (state.actions.len(), retained)
        };
        self.persist_retained(retained).await;
        tracing::info!("Loaded {count} persisted sync actions");
        Some(count)
    }

    /// Reload from storage unless a flush is running.
    ///
    /// Lets a long-running host pick up actions queued by other processes
    /// sharing the same queue file. Holds the flush guard while reading, so
    /// no pass can start against a half-replaced queue.
    pub async fn refresh_from_storage(&self) -> Option<usize> {
        let previous = {
            let mut state = self.lock();
            if state.status == QueueStatus::Syncing {
                return None;
            }
            std::mem::replace(&mut state.status, QueueStatus::Syncing)
        };

        let actions = self.read_persisted().await;
        let (count, retained) = {
            let mut state = self.lock();
            state.status = previous;
            let Some(actions) = actions else {
                self.publish(&state);
                return None;
            };
            let retained = self.install(&mut state, actions);
            (state.actions.len(), retained)
        };
        self.persist_retained(retained).await;
        Some(count)
    }

    async fn read_persisted(&self) -> Option<Vec<SyncAction>> {
        let mut actions = match self.persistence.load_pending_actions().await {
            Ok(actions) => actions,
            Err(error) => {
                tracing::warn!("Failed to load persisted sync queue: {error}");
                return None;
            }
        };

        for action in &mut actions {
            // Delivery was interrupted; the outcome is unknown so try again
            if action.status == ActionStatus::Syncing {
                action.status = ActionStatus::Pending;
            }
        }
        actions.sort_by(delivery_order);
        Some(actions)
    }

    /// Swap in the persisted set, keeping in-memory actions storage missed.
    ///
    /// Returns the kept actions so the caller can write them again.
    fn install(&self, state: &mut QueueState, mut actions: Vec<SyncAction>) -> Vec<SyncAction> {
        let retained: Vec<SyncAction> = state
            .actions
            .iter()
            .filter(|action| state.unpersisted.contains(&action.id))
            .cloned()
            .collect();
        if !retained.is_empty() {
            actions.retain(|action| !state.unpersisted.contains(&action.id));
            actions.extend(retained.iter().cloned());
            actions.sort_by(delivery_order);
        }

        if let Some(newest) = actions.iter().map(|action| action.timestamp).max() {
            state.last_timestamp = state.last_timestamp.max(newest);
        }
        state.actions = actions;
        self.publish(state);
        retained
    }

    async fn persist_retained(&self, retained: Vec<SyncAction>) {
        for action in retained {
            match self.persistence.save_pending_action(&action).await {
                Ok(()) => {
                    self.lock().unpersisted.remove(&action.id);
                }
                Err(error) => {
                    tracing::warn!("Still unable to persist action {}: {error}", action.id);
                }
            }
        }
    }

    /// Deliver queued actions in timestamp order.
    ///
    /// Only one pass runs at a time; a concurrent call returns immediately.
    /// The pass stops at the first transient failure so later actions for the
    /// same entity never overtake it.
    pub async fn flush_queue(&self, auth_token: &str) -> FlushReport {
        {
            let mut state = self.lock();
            if state.status == QueueStatus::Syncing {
                tracing::debug!("Flush already running");
                return FlushReport::already_running();
            }
            state.status = QueueStatus::Syncing;
            self.publish(&state);
        }

        let mut report = FlushReport::default();
        loop {
            let action = {
                let mut state = self.lock();
                let Some(action) = state.next_deliverable() else {
                    break;
                };
                action.status = ActionStatus::Syncing;
                let action = action.clone();
                self.publish(&state);
                action
            };

            if let Err(error) = self
                .persistence
                .update_action_status(&action.id, ActionStatus::Syncing, None)
                .await
            {
                tracing::warn!("Failed to mark action {} as syncing: {error}", action.id);
            }

            tracing::debug!(
                "Delivering {} {} {}",
                action.action_type,
                action.entity_type,
                action.entity_id
            );
            let outcome = self.api.execute_action(&action, auth_token).await.into_outcome();

            match outcome {
                ApiOutcome::Delivered(server_entity) => {
                    if action.action_type != ActionType::Delete {
                        self.merge_server_entity(&action, server_entity);
                    }
                    self.finish_action(&action).await;
                    report.delivered += 1;
                }
                ApiOutcome::Conflict(server_entity) => {
                    tracing::info!(
                        "Server rejected {} of {} as stale; adopting server version",
                        action.action_type,
                        action.entity_id
                    );
                    if server_entity.is_none() {
                        tracing::warn!(
                            "Conflict response for {} carried no entity",
                            action.entity_id
                        );
                    }
                    self.merge_server_entity(&action, server_entity);
                    self.finish_action(&action).await;
                    report.conflicts += 1;
                }
                ApiOutcome::Failed(message) => {
                    tracing::warn!(
                        "Delivery of {} {} failed: {message}",
                        action.action_type,
                        action.entity_id
                    );
                    if !self.fail_action(&action.id, &message).await {
                        continue;
                    }
                    report.failed = Some(action.id);
                    report.error = Some(message);
                    break;
                }
            }
        }

        {
            let mut state = self.lock();
            state.status = if report.failed.is_some() {
                QueueStatus::Error
            } else {
                QueueStatus::Idle
            };
            self.publish(&state);
        }

        tracing::info!(
            "Flush finished: {} delivered, {} conflicts, {}",
            report.delivered,
            report.conflicts,
            if report.failed.is_some() { "stopped on failure" } else { "queue drained" }
        );
        report
    }

    fn merge_server_entity(&self, action: &SyncAction, server_entity: Option<Value>) {
        let Some(entity) = server_entity else {
            return;
        };
        match action.entity_type {
            EntityType::Annotation => match self.annotations.merge_remote_value(entity) {
                Ok(outcome) => {
                    tracing::debug!("Merged server copy of {}: {outcome:?}", action.entity_id);
                }
                Err(error) => {
                    tracing::warn!(
                        "Ignoring unreadable server entity for {}: {error}",
                        action.entity_id
                    );
                }
            },
        }
    }

    /// Drop a delivered or superseded action from memory and storage
    async fn finish_action(&self, action: &SyncAction) {
        {
            let mut state = self.lock();
            state.take(&action.id);
            if !state.has_actions_for(&action.entity_id) {
                self.annotations.settle(&action.entity_id);
            }
            self.publish(&state);
        }
        if let Err(error) = self.persistence.remove_action(&action.id).await {
            tracing::warn!("Failed to remove delivered action {}: {error}", action.id);
        }
    }

    /// Record a failed attempt; returns false when the action was cleared in flight
    async fn fail_action(&self, id: &ActionId, message: &str) -> bool {
        let failed = {
            let mut state = self.lock();
            let failed = state
                .actions
                .iter_mut()
                .find(|action| action.id == *id)
                .map(|action| {
                    action.record_failure(message);
                    action.clone()
                });
            self.publish(&state);
            failed
        };

        let Some(failed) = failed else {
            return false;
        };
        match self.persistence.save_pending_action(&failed).await {
            Ok(()) => {
                self.lock().unpersisted.remove(id);
            }
            Err(error) => {
                tracing::warn!("Failed to persist failure of action {id}: {error}");
                self.lock().mark_unpersisted(*id);
            }
        }
        true
    }

    /// Explicitly drop one action, typically a failed one.
    ///
    /// Returns whether the action was queued.
    pub async fn discard_action(&self, id: &ActionId) -> Result<bool> {
        let removed = {
            let mut state = self.lock();
            let removed = state.take(id);
            if let Some(action) = &removed {
                if !state.has_actions_for(&action.entity_id) {
                    self.annotations.settle(&action.entity_id);
                }
                if state.status == QueueStatus::Error
                    && !state.actions.iter().any(SyncAction::is_failed)
                {
                    state.status = QueueStatus::Idle;
                }
            }
            self.publish(&state);
            removed.is_some()
        };

        self.persistence.remove_action(id).await?;
        if removed {
            tracing::info!("Discarded sync action {id}");
        }
        Ok(removed)
    }

    /// Explicitly drop every queued action, in memory and in storage
    pub async fn clear_all(&self) -> Result<()> {
        {
            let mut state = self.lock();
            for action in state.actions.drain(..) {
                self.annotations.settle(&action.entity_id);
            }
            state.unpersisted.clear();
            if state.status == QueueStatus::Error {
                state.status = QueueStatus::Idle;
            }
            self.publish(&state);
        }
        self.persistence.clear_all().await?;
        tracing::info!("Cleared sync queue");
        Ok(())
    }

    /// Snapshot of queued actions in enqueue order
    #[must_use]
    pub fn pending_actions(&self) -> Vec<SyncAction> {
        self.lock().actions.clone()
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.lock().actions.len()
    }

    #[must_use]
    pub fn status(&self) -> QueueStatus {
        self.lock().status
    }

    #[must_use]
    pub fn is_online(&self) -> bool {
        self.lock().is_online
    }

    pub fn set_online(&self, online: bool) {
        let mut state = self.lock();
        if state.is_online != online {
            state.is_online = online;
            self.publish(&state);
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> QueueSnapshot {
        self.lock().snapshot()
    }

    /// Observe queue snapshots as they change
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<QueueSnapshot> {
        self.snapshots.subscribe()
    }

    #[must_use]
    pub fn indicator(&self) -> SyncIndicator {
        SyncIndicator::from_snapshot(&self.snapshot())
    }
}
