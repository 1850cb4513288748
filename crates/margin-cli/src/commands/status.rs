use std::path::PathBuf;

use margin_core::adapters::check_reachable;
use margin_core::{QueueSnapshot, SyncIndicator};
use serde::Serialize;

use crate::commands::common::{open_queue, CliContext};
use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub indicator: SyncIndicator,
    pub label: String,
    pub queue: QueueSnapshot,
    pub api_base_url: Option<String>,
    pub storage: &'static str,
    pub queue_path: PathBuf,
    pub token_configured: bool,
}

impl StatusReport {
    pub fn new(snapshot: QueueSnapshot, context: &CliContext) -> Self {
        let indicator = SyncIndicator::from_snapshot(&snapshot);
        Self {
            indicator,
            label: indicator.label(),
            queue: snapshot,
            api_base_url: context.config.api_base_url.clone(),
            storage: context.config.storage.as_str(),
            queue_path: context.queue_path.clone(),
            token_configured: context.token.is_some(),
        }
    }

    pub fn lines(&self) -> Vec<String> {
        vec![
            format!("Sync:    {}", self.label),
            format!(
                "Queue:   {} pending, {} failed ({})",
                self.queue.pending, self.queue.failed, self.queue.status
            ),
            format!(
                "API:     {}",
                self.api_base_url.as_deref().unwrap_or("not configured")
            ),
            format!(
                "Storage: {} at {}",
                self.storage,
                self.queue_path.display()
            ),
            format!(
                "Token:   {}",
                if self.token_configured { "set" } else { "missing" }
            ),
        ]
    }
}

pub async fn run_status(as_json: bool, context: &CliContext) -> Result<(), CliError> {
    let queue = open_queue(context).await?;
    let online = match context.config.effective_probe_url() {
        Some(url) => check_reachable(&url, context.config.request_timeout()).await?,
        None => false,
    };
    queue.set_online(online);

    let report = StatusReport::new(queue.snapshot(), context);
    if as_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for line in report.lines() {
            println!("{line}");
        }
    }
    Ok(())
}
