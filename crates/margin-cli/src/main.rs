//! Margin CLI - Queue PDF annotation edits offline and sync them later
//!
//! Every command works against the local queue file; only `queue flush`
//! and `run` talk to the annotation API.

mod cli;
mod commands;
mod error;


use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{AnnotateCommands, Cli, Commands, QueueCommands};
use crate::commands::annotate::{run_create, run_delete, run_update};
use crate::commands::common::CliContext;
use crate::commands::completions::run_completions;
use crate::commands::queue::{run_queue_clear, run_queue_discard, run_queue_flush, run_queue_list};
use crate::commands::run::run_foreground;
use crate::commands::status::run_status;
use crate::error::CliError;

const DEFAULT_LOG_FILTER: &str = "margin=info,margin_core=info";

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Commands::Completions { shell, output } = &cli.command {
        return run_completions(*shell, output.as_deref());
    }

    let context = CliContext::resolve(cli.config, cli.queue_path, cli.token)?;
    tracing::debug!("Resolved CLI context: {context:?}");

    match cli.command {
        Commands::Annotate { command } => match command {
            AnnotateCommands::Create(args) => run_create(&args, &context).await?,
            AnnotateCommands::Update(args) => run_update(&args, &context).await?,
            AnnotateCommands::Delete { id } => run_delete(&id, &context).await?,
        },
        Commands::Queue { command } => match command {
            QueueCommands::List { json } => run_queue_list(json, &context).await?,
            QueueCommands::Flush => run_queue_flush(&context).await?,
            QueueCommands::Clear => run_queue_clear(&context).await?,
            QueueCommands::Discard { id } => run_queue_discard(&id, &context).await?,
        },
        Commands::Status { json } => run_status(json, &context).await?,
        Commands::Run => run_foreground(&context).await?,
        Commands::Completions { .. } => {}
    }

    Ok(())
}
