//! Durable storage contract for queued actions, plus a JSON-document backend.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::models::{ActionId, ActionStatus, SyncAction};

/// Crash-durable storage of pending sync actions.
///
/// Implementations hold no business logic. Every write must be durable once
/// the returned future resolves.
#[async_trait]
pub trait PersistenceAdapter: Send + Sync {
    /// Load every stored action in ascending timestamp order
    async fn load_pending_actions(&self) -> Result<Vec<SyncAction>>;

    /// Insert or replace an action
    async fn save_pending_action(&self, action: &SyncAction) -> Result<()>;

    /// Update the status and last error of a stored action
    async fn update_action_status(
        &self,
        id: &ActionId,
        status: ActionStatus,
        error: Option<&str>,
    ) -> Result<()>;

    /// Remove an action; removing an unknown id is not an error
    async fn remove_action(&self, id: &ActionId) -> Result<()>;

    /// Remove every stored action
    async fn clear_all(&self) -> Result<()>;
}

const QUEUE_FILE_VERSION: u32 = 1;

#[derive(Debug, Default, Serialize, Deserialize)]
struct QueueDocument {
    version: u32,
    actions: Vec<SyncAction>,
}

/// Queue persisted as a single JSON document.
///
/// Suited to hosts that only offer key/value style storage. Several processes
/// may share one document, so every call reads it fresh and each mutation
/// rewrites it through a temp file and an atomic rename.
pub struct JsonFileActionStore {
    path: PathBuf,
    /// Serializes read-modify-write cycles within this process
    io: Mutex<()>,
}

impl JsonFileActionStore {
    /// Open the store at `path`, validating any existing document
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let actions = read_document(&path)?;
        tracing::debug!(
            "Opened JSON queue store at {} ({} actions)",
            path.display(),
            actions.len()
        );
        Ok(Self {
            path,
            io: Mutex::new(()),
        })
    }

    /// Path of the backing document
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_document(&self, actions: Vec<SyncAction>) -> Result<()> {
        let document = QueueDocument {
            version: QUEUE_FILE_VERSION,
            actions,
        };
        let serialized = serde_json::to_vec_pretty(&document)?;

        let tmp_path = self
            .path
            .with_extension(format!("{}.tmp", std::process::id()));
        {
            use std::io::Write;

            let mut file = std::fs::File::create(&tmp_path)?;
            file.write_all(&serialized)?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

/// Read the document at `path`; a missing file is an empty queue
fn read_document(path: &Path) -> Result<Vec<SyncAction>> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(error) => return Err(error.into()),
    };
    let document: QueueDocument = serde_json::from_str(&raw)?;
    if document.version != QUEUE_FILE_VERSION {
        return Err(Error::Database(format!(
            "unsupported queue file version {} at {}",
            document.version,
            path.display()
        )));
    }
    Ok(document.actions)
}

#[async_trait]
impl PersistenceAdapter for JsonFileActionStore {
    async fn load_pending_actions(&self) -> Result<Vec<SyncAction>> {
        let _io = self.io.lock().await;
        let mut actions = read_document(&self.path)?;
        actions.sort_by_key(|action| action.timestamp);
        Ok(actions)
    }

    async fn save_pending_action(&self, action: &SyncAction) -> Result<()> {
        let _io = self.io.lock().await;
        let mut actions = read_document(&self.path)?;
        if let Some(existing) = actions.iter_mut().find(|stored| stored.id == action.id) {
            *existing = action.clone();
        } else {
            actions.push(action.clone());
        }
        self.write_document(actions)
    }

    async fn update_action_status(
        &self,
        id: &ActionId,
        status: ActionStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let _io = self.io.lock().await;
        let mut actions = read_document(&self.path)?;
        let Some(existing) = actions.iter_mut().find(|stored| stored.id == *id) else {
            return Err(Error::NotFound(id.to_string()));
        };
        existing.status = status;
        existing.error = error.map(str::to_string);
        self.write_document(actions)
    }

    async fn remove_action(&self, id: &ActionId) -> Result<()> {
        let _io = self.io.lock().await;
        let mut actions = read_document(&self.path)?;
        let before = actions.len();
        actions.retain(|stored| stored.id != *id);
        if actions.len() == before {
            return Ok(());
        }
        self.write_document(actions)
    }

    async fn clear_all(&self) -> Result<()> {
        let _io = self.io.lock().await;
        self.write_document(Vec::new())
    }
}
