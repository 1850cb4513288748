//! Applying realtime push events to the local entity store.
//!
//! The transport is external; it hands decoded events to
//! [`spawn_realtime_listener`] through a channel.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::store::{AnnotationStore, MergeOutcome};

/// Kind of row change pushed by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RealtimeEventType {
    Insert,
    Update,
    Delete,
}

/// One authoritative change pushed by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeEvent {
    pub event_type: RealtimeEventType,
    /// Full entity for insert/update; at least `id` for delete
    pub record: Value,
}

impl RealtimeEvent {
    /// Apply the event: deletes always win, inserts and updates go through
    /// the last-writer-wins merge.
    pub fn apply(self, store: &AnnotationStore) -> Result<MergeOutcome> {
        match self.event_type {
            RealtimeEventType::Delete => {
                let id = self
                    .record
                    .get("id")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        Error::InvalidInput("delete event record has no string id".to_string())
                    })?;
                store.remove(id);
                Ok(MergeOutcome::Removed)
            }
            RealtimeEventType::Insert | RealtimeEventType::Update => {
                store.merge_remote_value(self.record)
            }
        }
    }
}

/// Drain `events` into `store` until the sender side closes.
///
/// Resolves to the number of events applied; unreadable events are logged
/// and skipped.
pub fn spawn_realtime_listener(
    store: Arc<AnnotationStore>,
    mut events: mpsc::Receiver<RealtimeEvent>,
) -> JoinHandle<usize> {
    tokio::spawn(async move {
        let mut applied = 0;
        while let Some(event) = events.recv().await {
            let event_type = event.event_type;
            match event.apply(&store) {
                Ok(outcome) => {
                    tracing::debug!("Applied realtime {event_type:?}: {outcome:?}");
                    applied += 1;
                }
                Err(error) => {
                    tracing::warn!("Skipping realtime {event_type:?} event: {error}");
                }
            }
        }
        tracing::debug!("Realtime listener closed after {applied} events");
        applied
    })
}
