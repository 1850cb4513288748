//! margin-core - Offline sync queue for Margin annotations
//!
//! This crate contains the annotation models, the durable action queue, the
//! last-writer-wins entity store and the platform adapters shared by every
//! Margin client (web shell, desktop, mobile, CLI).

pub mod adapters;
pub mod client;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod realtime;
pub mod state;
pub mod store;
pub mod sync;
pub mod util;

#[cfg(test)]
mod testing;

pub use client::SyncClient;
pub use config::{ClientConfig, StorageBackend};
pub use error::{Error, Result};
pub use models::{Annotation, AnnotationId, AnnotationKind, AnnotationPatch, SyncAction};
pub use state::{QueueSnapshot, QueueStatus, SyncIndicator};
pub use store::{AnnotationStore, EntityStore, MergeOutcome, SyncEntity};
pub use sync::{FlushReport, SyncQueue};
