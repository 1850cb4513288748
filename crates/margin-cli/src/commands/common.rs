use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use margin_core::adapters::{
    ApiAdapter, DisconnectedApi, HttpApiAdapter, JsonFileActionStore, PersistenceAdapter,
};
use margin_core::db::LibSqlActionStore;
use margin_core::models::{Point, Rect, Stroke, SyncAction};
use margin_core::util::normalize_text_option;
use margin_core::{AnnotationStore, ClientConfig, StorageBackend, SyncQueue};

use crate::error::CliError;

const CONFIG_FILE_NAME: &str = "config.json";
const DEFAULT_STROKE_WIDTH: f64 = 2.0;

pub const ENV_CONFIG_PATH: &str = "MARGIN_CONFIG";
pub const ENV_AUTH_TOKEN: &str = "MARGIN_AUTH_TOKEN";

/// Everything a command needs, resolved once from flags, env and config file
#[derive(Clone)]
pub struct CliContext {
    pub config: ClientConfig,
    pub queue_path: PathBuf,
    pub token: Option<String>,
}

impl std::fmt::Debug for CliContext {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("CliContext")
            .field("config", &self.config)
            .field("queue_path", &self.queue_path)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl CliContext {
    pub fn resolve(
        config_path: Option<PathBuf>,
        queue_path: Option<PathBuf>,
        token: Option<String>,
    ) -> Result<Self, CliError> {
        let config_path = resolve_config_path(config_path)?;
        let config = ClientConfig::load_from_path(&config_path)?.with_env_overrides()?;
        let queue_path = resolve_queue_path(queue_path, &config)?;
        let token = normalize_text_option(token.or_else(|| env::var(ENV_AUTH_TOKEN).ok()));
        Ok(Self {
            config,
            queue_path,
            token,
        })
    }

    /// API URL and token, both required for delivery
    pub fn delivery_credentials(&self) -> Result<(&str, &str), CliError> {
        let api = self
            .config
            .api_base_url
            .as_deref()
            .ok_or(CliError::ApiNotConfigured)?;
        let token = self.token.as_deref().ok_or(CliError::MissingAuthToken)?;
        Ok((api, token))
    }
}

pub fn resolve_config_path(cli_config_path: Option<PathBuf>) -> Result<PathBuf, CliError> {
    if let Some(path) = cli_config_path.or_else(|| env::var_os(ENV_CONFIG_PATH).map(PathBuf::from))
    {
        return Ok(path);
    }
    dirs::config_dir()
        .map(|dir| dir.join("margin").join(CONFIG_FILE_NAME))
        .ok_or_else(|| CliError::Config("failed to resolve the config directory".to_string()))
}

/// Flag first, then config (including `MARGIN_QUEUE_PATH`), then the data dir
pub fn resolve_queue_path(
    cli_queue_path: Option<PathBuf>,
    config: &ClientConfig,
) -> Result<PathBuf, CliError> {
    if let Some(path) = cli_queue_path.or_else(|| config.queue_path.clone()) {
        return Ok(path);
    }
    dirs::data_dir()
        .map(|dir| dir.join("margin").join(config.storage.file_name()))
        .ok_or_else(|| CliError::Config("failed to resolve the data directory".to_string()))
}

pub async fn open_persistence(
    context: &CliContext,
) -> Result<Arc<dyn PersistenceAdapter>, CliError> {
    let persistence: Arc<dyn PersistenceAdapter> = match context.config.storage {
        StorageBackend::Libsql => Arc::new(LibSqlActionStore::open(&context.queue_path).await?),
        StorageBackend::Json => Arc::new(JsonFileActionStore::open(&context.queue_path)?),
    };
    Ok(persistence)
}

pub fn build_api(config: &ClientConfig) -> Result<Arc<dyn ApiAdapter>, CliError> {
    let Some(base_url) = config.api_base_url.as_deref() else {
        return Ok(Arc::new(DisconnectedApi));
    };
    Ok(Arc::new(HttpApiAdapter::new(
        base_url,
        config.request_timeout(),
    )?))
}

/// Open the configured queue and load its persisted actions
pub async fn open_queue(context: &CliContext) -> Result<Arc<SyncQueue>, CliError> {
    let queue = Arc::new(SyncQueue::new(
        open_persistence(context).await?,
        build_api(&context.config)?,
        Arc::new(AnnotationStore::new()),
    ));
    queue
        .load_persisted_queue()
        .await
        .ok_or_else(|| CliError::QueueUnreadable(context.queue_path.clone()))?;
    Ok(queue)
}

/// Parse `x,y,width,height`
pub fn parse_rect(raw: &str) -> Result<Rect, String> {
    let values = parse_numbers(raw, ',')?;
    let [x, y, width, height] = values[..] else {
        return Err(format!(
            "expected 4 comma-separated numbers (x,y,width,height), got '{raw}'"
        ));
    };
    if width < 0.0 || height < 0.0 {
        return Err(format!("rectangle size must not be negative: '{raw}'"));
    }
    Ok(Rect::new(x, y, width, height))
}

/// Parse `x,y;x,y;...[@width]`
pub fn parse_stroke(raw: &str) -> Result<Stroke, String> {
    let (points_raw, width) = match raw.rsplit_once('@') {
        Some((points, width)) => (
            points,
            width
                .trim()
                .parse::<f64>()
                .map_err(|_| format!("invalid stroke width in '{raw}'"))?,
        ),
        None => (raw, DEFAULT_STROKE_WIDTH),
    };

    let points = points_raw
        .split(';')
        .filter(|point| !point.trim().is_empty())
        .map(|point| match parse_numbers(point, ',')?[..] {
            [x, y] => Ok(Point { x, y }),
            _ => Err(format!("expected x,y point, got '{}'", point.trim())),
        })
        .collect::<Result<Vec<_>, _>>()?;

    if points.is_empty() {
        return Err("a stroke needs at least one point".to_string());
    }
    Ok(Stroke { points, width })
}

fn parse_numbers(raw: &str, separator: char) -> Result<Vec<f64>, String> {
    raw.split(separator)
        .map(|value| {
            value
                .trim()
                .parse::<f64>()
                .map_err(|_| format!("'{}' is not a number", value.trim()))
        })
        .collect()
}

pub fn format_action_lines(actions: &[SyncAction]) -> Vec<String> {
    actions
        .iter()
        .map(|action| {
            let mut line = format!(
                "{}  {}  {:<6}  {} {}  {}",
                action.id,
                format_sync_timestamp(action.timestamp),
                action.action_type,
                action.entity_type,
                action.entity_id,
                action.status
            );
            if action.retry_count > 0 {
                line.push_str(&format!("  retries={}", action.retry_count));
            }
            if let Some(error) = &action.error {
                line.push_str(&format!("  error={error}"));
            }
            line
        })
        .collect()
}

pub fn format_sync_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}
