//! Error types for taskbridge
//!
//! Centralized error handling using thiserror.
//!
//! A lost claim race is deliberately *not* represented here: claiming returns
//! `Option` and `None` means another worker renamed the file first.

use std::path::PathBuf;
use thiserror::Error;

/// All error types that can occur in taskbridge
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Task file not found in any queue directory
    #[error("Task not found: {0}")]
    TaskNotFound(String),

    /// Task file failed schema validation
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A terminal state transition could not be completed.
    /// Fatal for that task's progress; never swallowed.
    #[error("Transition failed for {path}: {source}")]
    Transition {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Task exceeded its TTL before or during processing
    #[error("Task expired: {0}")]
    Expired(String),

    /// The external executor reported quota exhaustion
    #[error("External quota exhausted: {0}")]
    QuotaExhausted(String),

    /// Executor invocation failure
    #[error("Executor error: {0}")]
    Executor(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML configuration error
    #[error("Config error: {0}")]
    Yaml(String),
}

/// Result type alias for taskbridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;
