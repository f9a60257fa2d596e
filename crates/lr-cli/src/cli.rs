//! Command-line argument definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::commands::listeners::ListenersArgs;

/// Station listener reports.
///
/// Lists who was tuned in to a station, live or over a past time range,
/// as JSON or a CSV download.
#[derive(Debug, Parser)]
#[command(name = "lr", version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Import stations, mounts, remotes and listener rows as JSONL from stdin.
    Import,

    /// Report a station's listeners.
    Listeners(ListenersArgs),

    /// Show database status.
    Status,
}
