use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use margin_core::models::{Rect, Stroke};

use crate::commands::common::{parse_rect, parse_stroke};

#[derive(Parser)]
#[command(name = "margin")]
#[command(about = "Queue PDF annotation edits offline and sync them when connected")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to the client config file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Override the queue file location
    #[arg(long, global = true, value_name = "PATH")]
    pub queue_path: Option<PathBuf>,

    /// Bearer token for the annotation API (defaults to MARGIN_AUTH_TOKEN)
    #[arg(long, global = true, value_name = "TOKEN")]
    pub token: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Make an annotation edit and queue it for sync
    Annotate {
        #[command(subcommand)]
        command: AnnotateCommands,
    },
    /// Inspect or drain the sync queue
    Queue {
        #[command(subcommand)]
        command: QueueCommands,
    },
    /// Show queue status and configuration
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Keep syncing in the foreground until interrupted
    Run,
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
pub enum AnnotateCommands {
    /// Create a new annotation
    Create(CreateArgs),
    /// Update fields of an existing annotation
    Update(UpdateArgs),
    /// Delete an annotation
    Delete {
        /// Annotation ID
        id: String,
    },
}

#[derive(Args)]
pub struct CreateArgs {
    /// Document the annotation belongs to
    #[arg(long, value_name = "ID")]
    pub document: String,
    /// 1-based page number
    #[arg(long, default_value = "1", value_parser = clap::value_parser!(u32).range(1..))]
    pub page: u32,
    /// Annotation kind
    #[arg(long, value_enum, default_value_t = AnnotationKindArg::Highlight)]
    pub kind: AnnotationKindArg,
    /// Rectangle as x,y,width,height (repeatable)
    #[arg(long = "rect", value_name = "X,Y,W,H", value_parser = parse_rect)]
    pub rects: Vec<Rect>,
    /// Stroke as x,y;x,y;... (repeatable, drawings only)
    #[arg(long = "stroke", value_name = "POINTS", value_parser = parse_stroke)]
    pub strokes: Vec<Stroke>,
    /// Comment body or explanation text
    #[arg(long)]
    pub content: Option<String>,
    /// Display color, e.g. #ffd54f
    #[arg(long)]
    pub color: Option<String>,
    /// Print the queued annotation as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args)]
pub struct UpdateArgs {
    /// Annotation ID
    pub id: String,
    /// New 1-based page number
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    pub page: Option<u32>,
    /// New comment body or explanation text
    #[arg(long)]
    pub content: Option<String>,
    /// New display color
    #[arg(long)]
    pub color: Option<String>,
    /// Replacement rectangles (highlights and explanations)
    #[arg(long = "rect", value_name = "X,Y,W,H", value_parser = parse_rect)]
    pub rects: Vec<Rect>,
    /// Replacement strokes (drawings)
    #[arg(long = "stroke", value_name = "POINTS", value_parser = parse_stroke)]
    pub strokes: Vec<Stroke>,
}

#[derive(Subcommand)]
pub enum QueueCommands {
    /// List queued actions, oldest first
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Deliver queued actions once
    Flush,
    /// Drop every queued action without delivering it
    Clear,
    /// Drop one queued action, typically a failed one
    Discard {
        /// Action ID
        id: String,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum AnnotationKindArg {
    Highlight,
    Drawing,
    Explanation,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}
