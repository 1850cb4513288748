//! Sync conflict model

use serde::{Deserialize, Serialize};

/// Strategy name recorded for last-writer-wins resolutions
pub const LWW_STRATEGY: &str = "lww";

/// Incoming entity rejected because the local copy was newer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictRecord {
    /// Entity involved in the conflict
    pub entity_id: String,
    /// Local marker that was kept
    pub local_updated_at: i64,
    /// Incoming marker that was rejected
    pub incoming_updated_at: i64,
    /// Resolution timestamp (Unix ms)
    pub resolved_at: i64,
    /// Resolution strategy name
    pub strategy: String,
}

impl ConflictRecord {
    #[must_use]
    pub fn lww(entity_id: impl Into<String>, local_updated_at: i64, incoming_updated_at: i64) -> Self {
        Self {
            entity_id: entity_id.into(),
            local_updated_at,
            incoming_updated_at,
            resolved_at: chrono::Utc::now().timestamp_millis(),
            strategy: LWW_STRATEGY.to_string(),
        }
    }
}
