//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - status: current phase, budgets, and queue counts
//! - plan: dry-run the next admitted batch
//! - watch: run the queue in the foreground
//! - enqueue: validate and enqueue a task file

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Taskbridge - a durable filesystem task queue with budget-aware admission
#[derive(Parser, Debug)]
#[command(name = "taskbridge")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Main subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show current phase, remaining budgets, and queue counts
    Status,

    /// Dry-run: rank the backlog and print the batch that would be admitted
    Plan,

    /// Watch the queue directory and execute tasks until interrupted
    Watch,

    /// Validate a task file and place it on the queue
    Enqueue {
        /// Path to a task file (.json or markdown with front matter)
        file: PathBuf,
    },
}
