//! Data models for Margin

mod annotation;
mod sync_action;
mod sync_conflict;

pub use annotation::{
    Annotation, AnnotationId, AnnotationKind, AnnotationPatch, Point, Rect, Stroke,
};
pub use sync_action::{ActionId, ActionStatus, ActionType, EntityType, SyncAction};
pub use sync_conflict::{ConflictRecord, LWW_STRATEGY};
