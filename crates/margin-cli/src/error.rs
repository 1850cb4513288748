use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] margin_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Invalid annotation ID: {0}")]
    InvalidAnnotationId(String),
    #[error("Invalid action ID: {0}")]
    InvalidActionId(String),
    #[error("Queued action not found: {0}")]
    ActionNotFound(String),
    #[error("Invalid annotation geometry: {0}")]
    InvalidGeometry(String),
    #[error("Update changes nothing; pass at least one of --page, --content, --color, --rect, --stroke")]
    EmptyUpdate,
    #[error("Failed to read the sync queue at {}", .0.display())]
    QueueUnreadable(PathBuf),
    #[error("API is not configured. Set api_base_url in the config file or MARGIN_API_BASE_URL.")]
    ApiNotConfigured,
    #[error("No auth token. Pass --token or set MARGIN_AUTH_TOKEN.")]
    MissingAuthToken,
    #[error("Flush stopped: {error} ({remaining} actions still queued)")]
    FlushStopped { error: String, remaining: usize },
}
