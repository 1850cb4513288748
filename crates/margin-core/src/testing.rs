//! In-memory adapter doubles shared by the unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::adapters::{ApiAdapter, ApiResult, PersistenceAdapter};
use crate::error::{Error, Result};
use crate::models::{ActionId, ActionStatus, SyncAction};
use crate::store::AnnotationStore;
use crate::sync::SyncQueue;

/// Persistence double that keeps actions in a vector
#[derive(Default)]
pub struct MemoryActionStore {
    actions: Mutex<Vec<SyncAction>>,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
}

impl MemoryActionStore {
    pub fn with_actions(actions: Vec<SyncAction>) -> Self {
        Self {
            actions: Mutex::new(actions),
            ..Self::default()
        }
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn stored(&self) -> Vec<SyncAction> {
        self.actions.lock().unwrap().clone()
    }

    fn check_write(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Database("disk full".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl PersistenceAdapter for MemoryActionStore {
    async fn load_pending_actions(&self) -> Result<Vec<SyncAction>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Error::Database("corrupt queue".to_string()));
        }
        let mut actions = self.stored();
        actions.sort_by_key(|action| action.timestamp);
        Ok(actions)
    }

    async fn save_pending_action(&self, action: &SyncAction) -> Result<()> {
        self.check_write()?;
        let mut actions = self.actions.lock().unwrap();
        match actions.iter_mut().find(|stored| stored.id == action.id) {
            Some(stored) => *stored = action.clone(),
            None => actions.push(action.clone()),
        }
        Ok(())
    }

    async fn update_action_status(
        &self,
        id: &ActionId,
        status: ActionStatus,
        error: Option<&str>,
    ) -> Result<()> {
        self.check_write()?;
        let mut actions = self.actions.lock().unwrap();
        let stored = actions
            .iter_mut()
            .find(|stored| stored.id == *id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        stored.status = status;
        stored.error = error.map(str::to_string);
        Ok(())
    }

    async fn remove_action(&self, id: &ActionId) -> Result<()> {
        self.check_write()?;
        self.actions.lock().unwrap().retain(|stored| stored.id != *id);
        Ok(())
    }

    async fn clear_all(&self) -> Result<()> {
        self.check_write()?;
        self.actions.lock().unwrap().clear();
        Ok(())
    }
}

/// Holds the first API call until released
#[derive(Default)]
pub struct Gate {
    entered: Notify,
    release: Notify,
}

impl Gate {
    /// Wait until a call is parked at the gate
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    pub fn release(&self) {
        self.release.notify_one();
    }
}

/// API double returning scripted results in order, then successes
#[derive(Default)]
pub struct ScriptedApi {
    responses: Mutex<VecDeque<ApiResult>>,
    calls: Mutex<Vec<SyncAction>>,
    gate: Mutex<Option<Arc<Gate>>>,
}

impl ScriptedApi {
    pub fn new(responses: impl IntoIterator<Item = ApiResult>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().collect()),
            ..Self::default()
        }
    }

    /// Park the next call until the returned gate is released
    pub fn gated(self) -> (Self, Arc<Gate>) {
        let gate = Arc::new(Gate::default());
        *self.gate.lock().unwrap() = Some(Arc::clone(&gate));
        (self, gate)
    }

    pub fn calls(&self) -> Vec<SyncAction> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl ApiAdapter for ScriptedApi {
    async fn execute_action(&self, action: &SyncAction, _auth_token: &str) -> ApiResult {
        self.calls.lock().unwrap().push(action.clone());

        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }

        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| ApiResult::delivered(Some(200), None))
    }
}

/// Queue wired to fresh doubles
pub struct Harness {
    pub queue: Arc<SyncQueue>,
    pub persistence: Arc<MemoryActionStore>,
    pub api: Arc<ScriptedApi>,
    pub annotations: Arc<AnnotationStore>,
}

impl Harness {
    pub fn new(api: ScriptedApi) -> Self {
        Self::with_persistence(api, MemoryActionStore::default())
    }

    pub fn with_persistence(api: ScriptedApi, persistence: MemoryActionStore) -> Self {
        let persistence = Arc::new(persistence);
        let api = Arc::new(api);
        let annotations = Arc::new(AnnotationStore::new());
        let queue = Arc::new(SyncQueue::new(
            Arc::clone(&persistence) as Arc<dyn PersistenceAdapter>,
            Arc::clone(&api) as Arc<dyn ApiAdapter>,
            Arc::clone(&annotations),
        ));
        Self {
            queue,
            persistence,
            api,
            annotations,
        }
    }
}
