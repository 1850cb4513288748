//! Optimistic annotation editing on top of the sync queue.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::models::{ActionId, ActionType, Annotation, AnnotationId, AnnotationPatch, EntityType};
use crate::store::{AnnotationStore, MergeOutcome};
use crate::sync::SyncQueue;
use crate::util::now_millis;

/// Entry point for UI mutations: update the store first, then queue the
/// matching action for delivery.
#[derive(Clone)]
pub struct SyncClient {
    annotations: Arc<AnnotationStore>,
    queue: Arc<SyncQueue>,
}

impl SyncClient {
    #[must_use]
    pub fn new(queue: Arc<SyncQueue>) -> Self {
        Self {
            annotations: Arc::clone(queue.annotations()),
            queue,
        }
    }

    pub const fn annotations(&self) -> &Arc<AnnotationStore> {
        &self.annotations
    }

    pub const fn queue(&self) -> &Arc<SyncQueue> {
        &self.queue
    }

    pub async fn create_annotation(&self, annotation: Annotation) -> Result<ActionId> {
        let id = annotation.id.to_string();
        let payload = serde_json::to_value(&annotation)?;

        match self.annotations.apply_local(annotation) {
            MergeOutcome::Tombstoned => {
                return Err(Error::InvalidInput(format!(
                    "annotation {id} has a queued delete"
                )));
            }
            MergeOutcome::KeptLocal => {
                return Err(Error::InvalidInput(format!(
                    "annotation {id} already exists with a newer version"
                )));
            }
            _ => {}
        }

        Ok(self
            .queue
            .enqueue_action(EntityType::Annotation, id, ActionType::Create, Some(payload))
            .await)
    }

    /// Apply `patch` locally and queue it.
    ///
    /// The patch is stamped with a marker newer than the cached copy.
    pub async fn update_annotation(
        &self,
        id: &AnnotationId,
        mut patch: AnnotationPatch,
    ) -> Result<ActionId> {
        if patch.is_empty() {
            return Err(Error::InvalidInput("update changes nothing".to_string()));
        }
        let key = id.to_string();
        let mut annotation = self
            .annotations
            .get(&key)
            .ok_or_else(|| Error::NotFound(format!("annotation {key}")))?;

        patch.updated_at = Some(now_millis().max(annotation.updated_at + 1));
        annotation.apply_patch(&patch)?;
        if !self.annotations.apply_local(annotation).accepted() {
            return Err(Error::NotFound(format!("annotation {key}")));
        }

        let payload = serde_json::to_value(&patch)?;
        Ok(self
            .queue
            .enqueue_action(EntityType::Annotation, key, ActionType::Update, Some(payload))
            .await)
    }

    pub async fn delete_annotation(&self, id: &AnnotationId) -> Result<ActionId> {
        let key = id.to_string();
        self.annotations
            .remove_local(&key)
            .ok_or_else(|| Error::NotFound(format!("annotation {key}")))?;

        Ok(self
            .queue
            .enqueue_action(EntityType::Annotation, key, ActionType::Delete, None)
            .await)
    }

    #[must_use]
    pub fn annotation(&self, id: &AnnotationId) -> Option<Annotation> {
        self.annotations.get(&id.to_string())
    }
}
