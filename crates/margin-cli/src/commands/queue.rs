use margin_core::models::ActionId;

use crate::commands::common::{format_action_lines, open_queue, CliContext};
use crate::error::CliError;

pub async fn run_queue_list(as_json: bool, context: &CliContext) -> Result<(), CliError> {
    let queue = open_queue(context).await?;
    let actions = queue.pending_actions();

    if as_json {
        println!("{}", serde_json::to_string_pretty(&actions)?);
        return Ok(());
    }

    if actions.is_empty() {
        println!("Queue is empty.");
        return Ok(());
    }

    for line in format_action_lines(&actions) {
        println!("{line}");
    }
    Ok(())
}

pub async fn run_queue_flush(context: &CliContext) -> Result<(), CliError> {
    let (api_base_url, token) = context.delivery_credentials()?;
    let queue = open_queue(context).await?;
    if queue.pending_count() == 0 {
        println!("Nothing to sync");
        return Ok(());
    }

    let report = queue.flush_queue(token).await;
    if let Some(error) = report.error {
        return Err(CliError::FlushStopped {
            error,
            remaining: queue.pending_count(),
        });
    }

    println!(
        "Synced {} actions to {api_base_url} ({} superseded by the server)",
        report.delivered, report.conflicts
    );
    Ok(())
}

pub async fn run_queue_clear(context: &CliContext) -> Result<(), CliError> {
    let queue = open_queue(context).await?;
    let count = queue.pending_count();
    queue.clear_all().await?;
    println!("Cleared {count} queued actions");
    Ok(())
}

pub async fn run_queue_discard(raw_id: &str, context: &CliContext) -> Result<(), CliError> {
    let id = parse_action_id(raw_id)?;
    let queue = open_queue(context).await?;
    if !queue.discard_action(&id).await? {
        return Err(CliError::ActionNotFound(id.to_string()));
    }
    println!("{id}");
    Ok(())
}

pub fn parse_action_id(raw: &str) -> Result<ActionId, CliError> {
    let trimmed = raw.trim();
    trimmed
        .parse()
        .map_err(|_| CliError::InvalidActionId(trimmed.to_string()))
}
