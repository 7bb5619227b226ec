//! Strict task file parsing.
//!
//! Two producer formats share one schema: JSON (one object per file, the
//! queue's native format) and Markdown with YAML front matter (the
//! human-authored backlog format). Fields with an enumerated valid set are
//! rejected on mismatch, never coerced to a default.

use crate::error::{BridgeError, Result};
use crate::task::record::{priority_from_name, Task, TaskMode, MAX_DELEGATION_HOPS};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::fs;
use std::path::Path;

const VALID_MODEL_HINTS: &[&str] = &["haiku", "sonnet", "opus"];

/// Raw front-matter fields before validation.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FrontMatter {
    id: Option<String>,
    name: Option<String>,
    priority: Option<PriorityField>,
    estimated_tokens: Option<u64>,
    timeout: Option<String>,
    tags: Option<Vec<String>>,
    depends_on: Option<Vec<String>>,
    deadline: Option<String>,
    mode: Option<String>,
    ttl_seconds: Option<u64>,
    delegation_chain: Option<Vec<String>>,
    response_required: Option<bool>,
    model_hint: Option<String>,
    target: Option<String>,
}

/// Priority appears either as an ordinal or a named level.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PriorityField {
    Ordinal(u8),
    Named(String),
}

/// Parse a task file, dispatching on extension.
pub fn parse_task_file(path: &Path) -> Result<Task> {
    let content = fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            BridgeError::TaskNotFound(path.display().to_string())
        } else {
            BridgeError::Io(e)
        }
    })?;
    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => parse_task_json(&content),
        Some("md") => {
            let stem = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("unnamed");
            parse_task_markdown(&content, stem)
        }
        other => Err(BridgeError::Validation(format!(
            "unsupported task file extension: {other:?}"
        ))),
    }
}

/// Parse the queue's native JSON format.
pub fn parse_task_json(content: &str) -> Result<Task> {
    let task: Task = serde_json::from_str(content)
        .map_err(|e| BridgeError::Validation(format!("malformed task JSON: {e}")))?;
    validate(task)
}

/// Parse a Markdown task with YAML front matter. The file stem supplies the
/// default name and identity.
pub fn parse_task_markdown(content: &str, stem: &str) -> Result<Task> {
    let (front, body) = split_front_matter(content)?;

    let meta: FrontMatter = serde_yaml::from_str(front)
        .map_err(|e| BridgeError::Validation(format!("malformed front matter: {e}")))?;

    let name = meta.name.unwrap_or_else(|| stem.to_string());
    let id = meta.id.unwrap_or_else(|| name.clone());
    let mut task = Task::new(id, name);
    task.body = body.to_string();

    if let Some(priority) = meta.priority {
        task.priority = match priority {
            PriorityField::Ordinal(n) => n,
            PriorityField::Named(s) => priority_from_name(&s)
                .ok_or_else(|| BridgeError::Validation(format!("unknown priority level: {s:?}")))?,
        };
    }
    if let Some(tokens) = meta.estimated_tokens {
        task.estimated_tokens = tokens;
    }
    if let Some(timeout) = meta.timeout {
        task.timeout = timeout;
    }
    if let Some(tags) = meta.tags {
        task.tags = tags;
    }
    if let Some(deps) = meta.depends_on {
        task.depends_on = deps;
    }
    if let Some(deadline) = meta.deadline {
        task.deadline = Some(parse_deadline(&deadline)?);
    }
    if let Some(mode) = meta.mode {
        task.mode = parse_mode(&mode)?;
    }
    if let Some(ttl) = meta.ttl_seconds {
        task.ttl_seconds = ttl;
    }
    if let Some(chain) = meta.delegation_chain {
        task.delegation_chain = chain;
    }
    if let Some(required) = meta.response_required {
        task.response_required = required;
    }
    if let Some(hint) = meta.model_hint {
        task.model_hint = hint;
    }
    task.target = meta.target;

    validate(task)
}

/// Invariants shared by both formats.
fn validate(task: Task) -> Result<Task> {
    if task.id.trim().is_empty() {
        return Err(BridgeError::Validation("empty task id".to_string()));
    }
    if !(1..=10).contains(&task.priority) {
        return Err(BridgeError::Validation(format!(
            "priority {} out of range 1-10",
            task.priority
        )));
    }
    if task.delegation_chain.len() > MAX_DELEGATION_HOPS {
        return Err(BridgeError::Validation(format!(
            "delegation chain exceeds {} hops",
            MAX_DELEGATION_HOPS
        )));
    }
    if !VALID_MODEL_HINTS.contains(&task.model_hint.as_str()) {
        return Err(BridgeError::Validation(format!(
            "unknown model_hint: {:?} (valid: {})",
            task.model_hint,
            VALID_MODEL_HINTS.join(", ")
        )));
    }
    // Reject malformed timeout strings at parse time, not at execution
    crate::task::timeout::parse_timeout(&task.timeout)?;
    Ok(task)
}

fn parse_mode(s: &str) -> Result<TaskMode> {
    match s {
        "autonomous" => Ok(TaskMode::Autonomous),
        "plan-first" => Ok(TaskMode::PlanFirst),
        "read-only" => Ok(TaskMode::ReadOnly),
        other => Err(BridgeError::Validation(format!(
            "unknown mode: {other:?} (valid: autonomous, plan-first, read-only)"
        ))),
    }
}

fn parse_deadline(s: &str) -> Result<DateTime<Utc>> {
    // Full RFC 3339 first, then a bare date at midnight UTC
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(date) = chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        let dt = date
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| BridgeError::Validation(format!("invalid deadline: {s:?}")))?;
        return Ok(DateTime::from_naive_utc_and_offset(dt, Utc));
    }
    Err(BridgeError::Validation(format!("invalid deadline: {s:?}")))
}

/// Split `---\n<yaml>\n---\n<body>`; a missing or unterminated block rejects.
fn split_front_matter(content: &str) -> Result<(&str, &str)> {
    let rest = content
        .strip_prefix("---\n")
        .or_else(|| content.strip_prefix("---\r\n"))
        .ok_or_else(|| BridgeError::Validation("missing front matter".to_string()))?;

    let end = rest
        .find("\n---")
        .ok_or_else(|| BridgeError::Validation("unterminated front matter".to_string()))?;

    let front = &rest[..end];
    let after = &rest[end + 4..];
    let body = after.trim_start_matches(['-']).trim_start_matches(['\r', '\n']);
    Ok((front, body.trim_end()))
}
