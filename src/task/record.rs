//! Task and Response records.
//!
//! Identity is immutable once assigned. A task is append-only except for its
//! delegation chain, which is capped at [`MAX_DELEGATION_HOPS`] to prevent
//! forwarding loops between agents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum delegation hops before a task is rejected outright.
pub const MAX_DELEGATION_HOPS: usize = 3;

/// Default token estimate when a producer does not supply one.
pub const DEFAULT_ESTIMATED_TOKENS: u64 = 50_000;

/// Default time-to-live for a task file.
pub const DEFAULT_TTL_SECONDS: u64 = 300;

/// Execution mode requested by the producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskMode {
    Autonomous,
    PlanFirst,
    ReadOnly,
}

impl Default for TaskMode {
    fn default() -> Self {
        Self::Autonomous
    }
}

/// A unit of work, serialized one-object-per-file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Opaque, globally unique, immutable identity
    pub id: String,

    /// Human-readable name; defaults to the file stem
    pub name: String,

    /// 1-10, lower runs sooner. Named levels normalize at parse time.
    pub priority: u8,

    #[serde(default = "default_estimated_tokens")]
    pub estimated_tokens: u64,

    /// Duration string, e.g. "45s", "30m", "2h"
    #[serde(default = "default_timeout")]
    pub timeout: String,

    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default)]
    pub depends_on: Vec<String>,

    #[serde(default)]
    pub deadline: Option<DateTime<Utc>>,

    #[serde(default)]
    pub mode: TaskMode,

    #[serde(default = "default_ttl")]
    pub ttl_seconds: u64,

    #[serde(default)]
    pub delegation_chain: Vec<String>,

    #[serde(default = "default_true")]
    pub response_required: bool,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    /// Routing hints, opaque to the queue, passed through to the executor
    #[serde(default = "default_model_hint")]
    pub model_hint: String,

    #[serde(default)]
    pub target: Option<String>,

    /// Project attribution, attached by the backlog loader
    #[serde(default)]
    pub project: String,

    #[serde(default)]
    pub project_boost: i64,

    /// Free-text body after front matter; opaque to the queue
    #[serde(default)]
    pub body: String,
}

impl Task {
    /// Build a task with defaults for everything but identity.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            priority: 5,
            estimated_tokens: DEFAULT_ESTIMATED_TOKENS,
            timeout: default_timeout(),
            tags: Vec::new(),
            depends_on: Vec::new(),
            deadline: None,
            mode: TaskMode::default(),
            ttl_seconds: DEFAULT_TTL_SECONDS,
            delegation_chain: Vec::new(),
            response_required: true,
            created_at: Utc::now(),
            model_hint: default_model_hint(),
            target: None,
            project: String::new(),
            project_boost: 0,
            body: String::new(),
        }
    }

    /// Whether the task's age exceeds its TTL at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(self.created_at);
        age.num_seconds() > self.ttl_seconds as i64
    }

    /// Time left before the TTL deadline at `now`; zero once expired.
    pub fn remaining_ttl(&self, now: DateTime<Utc>) -> std::time::Duration {
        let deadline = self.created_at + chrono::Duration::seconds(self.ttl_seconds as i64);
        (deadline - now).to_std().unwrap_or(std::time::Duration::ZERO)
    }

    /// The cost-model category: task-name prefix before the first dash.
    pub fn category(&self) -> &str {
        self.name.split('-').next().unwrap_or(&self.name)
    }

    /// File name this task serializes under.
    pub fn file_name(&self) -> String {
        format!("{}.json", self.id)
    }
}

/// Normalize a named priority level to its ordinal.
pub fn priority_from_name(name: &str) -> Option<u8> {
    match name {
        "critical" => Some(1),
        "high" => Some(3),
        "medium" => Some(5),
        "low" => Some(7),
        _ => None,
    }
}

fn default_estimated_tokens() -> u64 {
    DEFAULT_ESTIMATED_TOKENS
}

fn default_ttl() -> u64 {
    DEFAULT_TTL_SECONDS
}

fn default_timeout() -> String {
    "30m".to_string()
}

fn default_model_hint() -> String {
    "sonnet".to_string()
}

fn default_true() -> bool {
    true
}

/// Terminal status carried by a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Error,
    Timeout,
    Rejected,
}

/// Structured error attached to a failed response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseError {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Correlates 1:1 with a task by identity. Written once, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub task_id: String,
    pub status: ResponseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
    pub completed_at: DateTime<Utc>,
    #[serde(default)]
    pub processing_ms: Option<u64>,
}

impl Response {
    pub fn success(task_id: &str, result: Option<serde_json::Value>) -> Self {
        Self {
            task_id: task_id.to_string(),
            status: ResponseStatus::Success,
            result,
            error: None,
            completed_at: Utc::now(),
            processing_ms: None,
        }
    }

    pub fn failure(task_id: &str, status: ResponseStatus, code: &str, message: &str) -> Self {
        Self {
            task_id: task_id.to_string(),
            status,
            result: None,
            error: Some(ResponseError {
                code: code.to_string(),
                message: message.to_string(),
                details: None,
            }),
            completed_at: Utc::now(),
            processing_ms: None,
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}.json", self.task_id)
    }
}
