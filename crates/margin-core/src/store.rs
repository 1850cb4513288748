//! Client-side entity cache with last-writer-wins merging.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;
use crate::models::{Annotation, ConflictRecord, EntityType};

/// Resolved conflicts kept for inspection
const MAX_CONFLICTS: usize = 100;

/// Local deletes shielded from server echoes while their action is queued
const MAX_PENDING_DELETES: usize = 1_000;

/// Entity that can be cached locally and reconciled with the server.
pub trait SyncEntity: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    const ENTITY_TYPE: EntityType;

    /// Stable identifier, as used in action `entity_id` and REST paths
    fn entity_id(&self) -> String;

    /// Last-writer-wins marker
    fn updated_at(&self) -> i64;

    /// Display order for [`EntityStore::list`]
    fn display_cmp(&self, other: &Self) -> Ordering {
        self.entity_id().cmp(&other.entity_id())
    }
}

impl SyncEntity for Annotation {
    const ENTITY_TYPE: EntityType = EntityType::Annotation;

    fn entity_id(&self) -> String {
        self.id.to_string()
    }

    fn updated_at(&self) -> i64 {
        self.updated_at
    }

    fn display_cmp(&self, other: &Self) -> Ordering {
        self.document_id
            .cmp(&other.document_id)
            .then(self.page_number.cmp(&other.page_number))
            .then(self.created_at.cmp(&other.created_at))
    }
}

/// Result of offering an entity version to the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// No local copy existed
    Inserted,
    /// The incoming version was newer or equal and replaced the local copy
    Replaced,
    /// The local copy was newer; the incoming version was discarded
    KeptLocal,
    /// A local delete of the entity is still queued; the incoming version was discarded
    Tombstoned,
    /// A delete was applied
    Removed,
}

impl MergeOutcome {
    #[must_use]
    pub const fn accepted(self) -> bool {
        matches!(self, Self::Inserted | Self::Replaced)
    }
}

/// Ids of queued local deletes, oldest first, bounded by [`MAX_PENDING_DELETES`]
#[derive(Default)]
struct PendingDeletes {
    ids: HashSet<String>,
    order: VecDeque<String>,
}

impl PendingDeletes {
    fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    fn hold(&mut self, id: &str) {
        if !self.ids.insert(id.to_string()) {
            return;
        }
        self.order.push_back(id.to_string());
        while self.order.len() > MAX_PENDING_DELETES {
            if let Some(evicted) = self.order.pop_front() {
                self.ids.remove(&evicted);
            }
        }
    }

    fn release(&mut self, id: &str) {
        if self.ids.remove(id) {
            self.order.retain(|held| held != id);
        }
    }

    fn len(&self) -> usize {
        self.ids.len()
    }
}

struct StoreState<E> {
    entities: HashMap<String, E>,
    pending_deletes: PendingDeletes,
    dirty: BTreeSet<String>,
    conflicts: VecDeque<ConflictRecord>,
}

impl<E> Default for StoreState<E> {
    fn default() -> Self {
        Self {
            entities: HashMap::new(),
            pending_deletes: PendingDeletes::default(),
            dirty: BTreeSet::new(),
            conflicts: VecDeque::new(),
        }
    }
}

impl<E: SyncEntity> StoreState<E> {
    /// Every write path funnels through here so the marker check cannot be skipped
    fn offer(&mut self, incoming: E) -> MergeOutcome {
        let id = incoming.entity_id();
        if self.pending_deletes.contains(&id) {
            tracing::debug!(
                "Ignoring {} {id}: a local delete is still queued",
                E::ENTITY_TYPE
            );
            return MergeOutcome::Tombstoned;
        }

        let Some(local) = self.entities.get(&id) else {
            self.entities.insert(id, incoming);
            return MergeOutcome::Inserted;
        };

        let local_marker = local.updated_at();
        let incoming_marker = incoming.updated_at();
        if incoming_marker >= local_marker {
            self.entities.insert(id, incoming);
            return MergeOutcome::Replaced;
        }

        tracing::warn!(
            "Kept local {} {id}: local marker {local_marker} is newer than incoming {incoming_marker}",
            E::ENTITY_TYPE
        );
        if self.conflicts.len() == MAX_CONFLICTS {
            self.conflicts.pop_front();
        }
        self.conflicts
            .push_back(ConflictRecord::lww(id, local_marker, incoming_marker));
        MergeOutcome::KeptLocal
    }
}

/// Cached view of one entity type.
///
/// Writes from the sync queue, the realtime channel and local edits may race;
/// each one is checked against the stored marker, and deletions always win.
/// An id that is not cached is always accepted, except while a local delete
/// of it waits in the queue.
pub struct EntityStore<E> {
    state: Mutex<StoreState<E>>,
}

/// Store of annotations
pub type AnnotationStore = EntityStore<Annotation>;

impl<E> Default for EntityStore<E> {
    fn default() -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
        }
    }
}

impl<E: SyncEntity> EntityStore<E> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StoreState<E>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Merge an authoritative (server or realtime) version
    pub fn merge_remote(&self, incoming: E) -> MergeOutcome {
        self.lock().offer(incoming)
    }

    /// Merge an authoritative version given as raw JSON
    pub fn merge_remote_value(&self, value: serde_json::Value) -> Result<MergeOutcome> {
        let incoming: E = serde_json::from_value(value)?;
        Ok(self.merge_remote(incoming))
    }

    /// Apply an optimistic local create or update and mark it dirty.
    ///
    /// A stale local write does not clobber a newer authoritative version.
    pub fn apply_local(&self, entity: E) -> MergeOutcome {
        let id = entity.entity_id();
        let mut state = self.lock();
        let outcome = state.offer(entity);
        if outcome.accepted() {
            state.dirty.insert(id);
        }
        outcome
    }

    /// Remove an entity unconditionally; returns the removed copy
    pub fn remove(&self, id: &str) -> Option<E> {
        self.lock().entities.remove(id)
    }

    /// Remove an entity because of a local delete, marking it dirty.
    ///
    /// Server versions of the entity are ignored until [`Self::settle`]
    /// reports the delete as delivered or dropped.
    pub fn remove_local(&self, id: &str) -> Option<E> {
        let mut state = self.lock();
        state.pending_deletes.hold(id);
        state.dirty.insert(id.to_string());
        state.entities.remove(id)
    }

    /// The queue holds no more actions for `id`: clear its dirty flag and
    /// any pending-delete shield
    pub fn settle(&self, id: &str) {
        let mut state = self.lock();
        state.dirty.remove(id);
        state.pending_deletes.release(id);
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<E> {
        self.lock().entities.get(id).cloned()
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.lock().entities.contains_key(id)
    }

    /// Whether a local delete of `id` is still waiting for delivery
    #[must_use]
    pub fn is_delete_pending(&self, id: &str) -> bool {
        self.lock().pending_deletes.contains(id)
    }

    #[must_use]
    pub fn pending_delete_count(&self) -> usize {
        self.lock().pending_deletes.len()
    }

    /// Every cached entity in display order
    #[must_use]
    pub fn list(&self) -> Vec<E> {
        let mut entities: Vec<E> = self.lock().entities.values().cloned().collect();
        entities.sort_by(E::display_cmp);
        entities
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().entities.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().entities.is_empty()
    }

    /// Ids with local edits not yet confirmed by the server
    #[must_use]
    pub fn dirty_ids(&self) -> Vec<String> {
        self.lock().dirty.iter().cloned().collect()
    }

    #[must_use]
    pub fn is_dirty(&self, id: &str) -> bool {
        self.lock().dirty.contains(id)
    }

    /// Return and clear the dirty set
    pub fn take_dirty(&self) -> Vec<String> {
        std::mem::take(&mut self.lock().dirty).into_iter().collect()
    }

    pub fn mark_clean(&self, id: &str) {
        self.lock().dirty.remove(id);
    }

    /// Recently resolved conflicts, oldest first
    #[must_use]
    pub fn conflicts(&self) -> Vec<ConflictRecord> {
        self.lock().conflicts.iter().cloned().collect()
    }
}

impl EntityStore<Annotation> {
    /// Annotations of one document, by page then creation time
    #[must_use]
    pub fn list_for_document(&self, document_id: &str) -> Vec<Annotation> {
        let mut annotations: Vec<Annotation> = self
            .lock()
            .entities
            .values()
            .filter(|annotation| annotation.document_id == document_id)
            .cloned()
            .collect();
        annotations.sort_by(Annotation::display_cmp);
        annotations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AnnotationId, Rect};
    use pretty_assertions::assert_eq;

    fn annotation_at(id: AnnotationId, updated_at: i64, content: &str) -> Annotation {
        let mut annotation =
            Annotation::highlight("doc-1", 1, vec![Rect::new(0.0, 0.0, 1.0, 1.0)])
                .with_content(content);
        annotation.id = id;
        annotation.created_at = 1;
        annotation.updated_at = updated_at;
        annotation
    }

    #[test]
    fn merge_inserts_when_absent() {
        let store = AnnotationStore::new();
        let incoming = annotation_at(AnnotationId::new(), 10, "server");

        assert_eq!(store.merge_remote(incoming.clone()), MergeOutcome::Inserted);
        assert_eq!(store.get(&incoming.entity_id()), Some(incoming));
    }

    #[test]
    fn merge_keeps_newer_local_copy() {
        let store = AnnotationStore::new();
        let id = AnnotationId::new();
        store.merge_remote(annotation_at(id, 200, "local"));

        let outcome = store.merge_remote(annotation_at(id, 100, "stale"));

        assert_eq!(outcome, MergeOutcome::KeptLocal);
        assert_eq!(
            store.get(&id.to_string()).unwrap().content.as_deref(),
            Some("local")
        );
        let conflicts = store.conflicts();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].local_updated_at, 200);
        assert_eq!(conflicts[0].incoming_updated_at, 100);
        assert_eq!(conflicts[0].strategy, "lww");
    }

    #[test]
    fn merge_adopts_newer_or_equal_incoming() {
        let store = AnnotationStore::new();
        let id = AnnotationId::new();
        store.merge_remote(annotation_at(id, 100, "local"));

        assert_eq!(
            store.merge_remote(annotation_at(id, 100, "tie")),
            MergeOutcome::Replaced
        );
        assert_eq!(
            store.merge_remote(annotation_at(id, 300, "newer")),
            MergeOutcome::Replaced
        );
        assert_eq!(
            store.get(&id.to_string()).unwrap().content.as_deref(),
            Some("newer")
        );
    }

    #[test]
    fn deletion_dominates_any_marker() {
        let store = AnnotationStore::new();
        let id = AnnotationId::new();
        store.merge_remote(annotation_at(id, 500, "local"));

        assert!(store.remove(&id.to_string()).is_some());
        assert!(store.get(&id.to_string()).is_none());
        assert!(store.remove(&id.to_string()).is_none());
    }

    #[test]
    fn insert_after_remote_delete_is_accepted() {
        let store = AnnotationStore::new();
        let id = AnnotationId::new();
        store.merge_remote(annotation_at(id, 500, "first"));
        store.remove(&id.to_string());

        assert_eq!(
            store.merge_remote(annotation_at(id, 1, "recreated")),
            MergeOutcome::Inserted
        );
        assert!(!store.is_delete_pending(&id.to_string()));
        assert_eq!(store.pending_delete_count(), 0);
    }

    #[test]
    fn queued_local_delete_shields_until_settled() {
        let store = AnnotationStore::new();
        let id = AnnotationId::new();
        store.merge_remote(annotation_at(id, 500, "local"));
        store.remove_local(&id.to_string());

        assert_eq!(
            store.merge_remote(annotation_at(id, 9_999, "server echo")),
            MergeOutcome::Tombstoned
        );
        assert!(store.get(&id.to_string()).is_none());
        assert!(store.is_delete_pending(&id.to_string()));

        store.settle(&id.to_string());
        assert!(!store.is_delete_pending(&id.to_string()));
        assert!(!store.is_dirty(&id.to_string()));
        assert_eq!(
            store.merge_remote(annotation_at(id, 1, "recreated")),
            MergeOutcome::Inserted
        );
    }

    #[test]
    fn pending_deletes_are_bounded() {
        let store = AnnotationStore::new();
        let ids: Vec<String> = (0..MAX_PENDING_DELETES + 10)
            .map(|_| AnnotationId::new().to_string())
            .collect();
        for id in &ids {
            store.remove_local(id);
        }

        assert_eq!(store.pending_delete_count(), MAX_PENDING_DELETES);
        assert!(!store.is_delete_pending(&ids[0]));
        assert!(store.is_delete_pending(&ids[ids.len() - 1]));

        for _ in 0..10_000 {
            store.remove(&AnnotationId::new().to_string());
        }
        assert_eq!(store.pending_delete_count(), MAX_PENDING_DELETES);
    }

    #[test]
    fn apply_local_marks_dirty_and_respects_markers() {
        let store = AnnotationStore::new();
        let id = AnnotationId::new();

        assert_eq!(
            store.apply_local(annotation_at(id, 100, "draft")),
            MergeOutcome::Inserted
        );
        assert!(store.is_dirty(&id.to_string()));

        store.merge_remote(annotation_at(id, 300, "server"));
        assert_eq!(
            store.apply_local(annotation_at(id, 200, "stale draft")),
            MergeOutcome::KeptLocal
        );
        assert_eq!(
            store.get(&id.to_string()).unwrap().content.as_deref(),
            Some("server")
        );
    }

    #[test]
    fn take_dirty_clears_the_set() {
        let store = AnnotationStore::new();
        let first = AnnotationId::new();
        let second = AnnotationId::new();
        store.apply_local(annotation_at(first, 1, "a"));
        store.remove_local(&second.to_string());

        let mut expected = vec![first.to_string(), second.to_string()];
        expected.sort();
        assert_eq!(store.take_dirty(), expected);
        assert!(store.dirty_ids().is_empty());

        store.apply_local(annotation_at(first, 2, "b"));
        store.mark_clean(&first.to_string());
        assert!(!store.is_dirty(&first.to_string()));
    }

    #[test]
    fn merge_remote_value_decodes_wire_json() {
        let store = AnnotationStore::new();
        let id = AnnotationId::new();
        let value = serde_json::json!({
            "id": id.to_string(),
            "documentId": "doc-1",
            "pageNumber": 4,
            "type": "explanation",
            "rects": [],
            "content": "A derivative measures change.",
            "createdAt": 1,
            "updatedAt": 2
        });

        assert_eq!(
            store.merge_remote_value(value).unwrap(),
            MergeOutcome::Inserted
        );
        assert_eq!(store.get(&id.to_string()).unwrap().page_number, 4);
        assert!(store
            .merge_remote_value(serde_json::json!({ "id": "nope" }))
            .is_err());
    }

    #[test]
    fn list_orders_by_document_page_and_creation() {
        let store = AnnotationStore::new();
        let mut late = Annotation::highlight("doc-1", 2, vec![]);
        late.created_at = 5;
        let mut early = Annotation::highlight("doc-1", 2, vec![]);
        early.created_at = 1;
        let first_page = Annotation::highlight("doc-1", 1, vec![]);
        let other_doc = Annotation::highlight("doc-2", 1, vec![]);
        for annotation in [&late, &other_doc, &early, &first_page] {
            store.merge_remote(annotation.clone());
        }

        let ids: Vec<AnnotationId> = store
            .list_for_document("doc-1")
            .into_iter()
            .map(|annotation| annotation.id)
            .collect();
        assert_eq!(ids, vec![first_page.id, early.id, late.id]);
        assert_eq!(store.len(), 4);
        assert_eq!(store.list().last().map(|a| a.id), Some(other_doc.id));
    }

    #[test]
    fn conflict_log_is_capped() {
        let store = AnnotationStore::new();
        let id = AnnotationId::new();
        store.merge_remote(annotation_at(id, i64::MAX, "pinned"));
        let total = i64::try_from(MAX_CONFLICTS).unwrap() + 5;
        for marker in 0..total {
            store.merge_remote(annotation_at(id, marker, "stale"));
        }

        let conflicts = store.conflicts();
        assert_eq!(conflicts.len(), MAX_CONFLICTS);
        assert_eq!(conflicts[0].incoming_updated_at, 5);
    }
}
