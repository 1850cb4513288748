//! Shared cross-platform sync state types.

use serde::Serialize;

/// Lifecycle of the sync queue
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    #[default]
    Idle,
    Syncing,
    Error,
}

impl QueueStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Syncing => "syncing",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of the queue, published to observers
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSnapshot {
    pub status: QueueStatus,
    /// Actions not yet delivered, failed ones included
    pub pending: usize,
    pub failed: usize,
    pub is_online: bool,
}

impl Default for QueueSnapshot {
    fn default() -> Self {
        Self {
            status: QueueStatus::Idle,
            pending: 0,
            failed: 0,
            is_online: true,
        }
    }
}

/// Unified sync indicator used by desktop and mobile clients.
///
/// Never carries raw error text.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum SyncIndicator {
    Offline { pending: usize },
    Syncing,
    Error,
    Saved,
}

impl SyncIndicator {
    #[must_use]
    pub const fn from_snapshot(snapshot: &QueueSnapshot) -> Self {
        if !snapshot.is_online {
            return Self::Offline {
                pending: snapshot.pending,
            };
        }
        match snapshot.status {
            QueueStatus::Error => Self::Error,
            QueueStatus::Syncing => Self::Syncing,
            QueueStatus::Idle if snapshot.pending > 0 => Self::Syncing,
            QueueStatus::Idle => Self::Saved,
        }
    }

    /// Short label for status bars
    #[must_use]
    pub fn label(&self) -> String {
        match self {
            Self::Offline { pending: 0 } => "Offline".to_string(),
            Self::Offline { pending: 1 } => "Offline (1 change pending)".to_string(),
            Self::Offline { pending } => format!("Offline ({pending} changes pending)"),
            Self::Syncing => "Syncing...".to_string(),
            Self::Error => "Sync error".to_string(),
            Self::Saved => "Saved".to_string(),
        }
    }
}
