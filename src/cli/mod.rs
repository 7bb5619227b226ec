//! CLI module for taskbridge - command-line interface and subcommands.
//!
//! Provides the main entry point with subcommands for queue status,
//! session planning, the foreground watcher, and task enqueueing.

pub mod commands;

pub use commands::Cli;
