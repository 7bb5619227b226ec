//! Task execution via an external CLI.
//!
//! The executor owns nothing about queue state; it takes a parsed task,
//! shells out, and reports what happened. Timeouts are enforced here by
//! polling the child rather than trusting the subprocess to exit.

use crate::config::ExecutorConfig;
use crate::error::{BridgeError, Result};
use crate::task::{parse_timeout, Task, TaskMode};
use chrono::Utc;
use log::{debug, info, warn};
use std::io::Read;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

/// Substrings in executor output that mean the external quota is gone and
/// further admission this session is pointless.
const QUOTA_MARKERS: &[&str] = &[
    "usage limit reached",
    "rate limit exceeded",
    "quota exhausted",
];

const KILL_POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub output: String,
    pub duration: Duration,
    pub quota_exhausted: bool,
    pub timed_out: bool,
}

pub trait TaskExecutor: Send + Sync {
    fn execute(&self, task: &Task) -> Result<ExecutionOutcome>;
}

/// Prefix the task body with a mode banner the downstream CLI understands.
pub fn build_prompt(task: &Task) -> String {
    match task.mode {
        TaskMode::ReadOnly => {
            format!("[READ-ONLY MODE - Do not modify any files]\n\n{}", task.body)
        }
        TaskMode::PlanFirst => {
            format!("[PLAN-FIRST MODE - Create a plan before executing]\n\n{}", task.body)
        }
        TaskMode::Autonomous => task.body.clone(),
    }
}

/// Shells out to the configured CLI, one subprocess per task.
pub struct CommandExecutor {
    config: ExecutorConfig,
    dry_run: bool,
}

impl CommandExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self {
            config,
            dry_run: false,
        }
    }

    /// Report what would run without spawning anything.
    pub fn dry_run(config: ExecutorConfig) -> Self {
        Self {
            config,
            dry_run: true,
        }
    }

    fn spawn(&self, task: &Task, prompt: &str) -> Result<std::process::Child> {
        let mut cmd = Command::new(&self.config.command);
        cmd.arg("-p").arg(prompt);

        if task.mode == TaskMode::ReadOnly {
            cmd.arg("--allowedTools").arg(&self.config.read_only_tools);
        }

        if let Some(workdir) = &self.config.workdir {
            cmd.current_dir(workdir);
        }

        cmd.stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(Stdio::null());

        cmd.spawn()
            .map_err(|e| BridgeError::Executor(format!("failed to spawn {}: {e}", self.config.command)))
    }
}

impl TaskExecutor for CommandExecutor {
    fn execute(&self, task: &Task) -> Result<ExecutionOutcome> {
        let started = Instant::now();
        // The kill deadline is the tighter of the task's own timeout and
        // whatever TTL is left; a run may never outlive the task file
        let timeout = parse_timeout(&task.timeout)?.min(task.remaining_ttl(Utc::now()));
        let prompt = build_prompt(task);

        if self.dry_run {
            let preview: String = prompt.chars().take(200).collect();
            return Ok(ExecutionOutcome {
                success: true,
                exit_code: Some(0),
                output: format!("[DRY RUN] would execute {}: {preview}", task.name),
                duration: started.elapsed(),
                quota_exhausted: false,
                timed_out: false,
            });
        }

        info!("Executing task {} (timeout {:?})", task.name, timeout);
        let mut child = self.spawn(task, &prompt)?;

        // Drain pipes concurrently so a chatty subprocess never blocks on a
        // full pipe buffer while we poll for exit
        let stdout_reader = child.stdout.take().map(|mut pipe| {
            std::thread::spawn(move || {
                let mut buf = String::new();
                let _ = pipe.read_to_string(&mut buf);
                buf
            })
        });
        let stderr_reader = child.stderr.take().map(|mut pipe| {
            std::thread::spawn(move || {
                let mut buf = String::new();
                let _ = pipe.read_to_string(&mut buf);
                buf
            })
        });

        // Poll until exit or deadline; a stuck subprocess gets killed
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break Some(status),
                Ok(None) => {
                    if started.elapsed() >= timeout {
                        warn!("Task {} exceeded {:?}, killing subprocess", task.name, timeout);
                        let _ = child.kill();
                        let _ = child.wait();
                        break None;
                    }
                    std::thread::sleep(KILL_POLL_INTERVAL);
                }
                Err(e) => {
                    return Err(BridgeError::Executor(format!(
                        "waiting on {}: {e}",
                        task.name
                    )));
                }
            }
        };

        let mut output = stdout_reader
            .and_then(|h| h.join().ok())
            .unwrap_or_default();
        let errs = stderr_reader
            .and_then(|h| h.join().ok())
            .unwrap_or_default();
        if !errs.is_empty() {
            output.push('\n');
            output.push_str(&errs);
        }

        let quota_exhausted = detect_quota_exhaustion(&output);
        if quota_exhausted {
            warn!("Quota exhaustion detected in output of {}", task.name);
        }

        let timed_out = status.is_none();
        let exit_code = status.and_then(|s| s.code());
        let success = status.map(|s| s.success()).unwrap_or(false) && !quota_exhausted;
        debug!(
            "Task {} finished: success={success} exit={exit_code:?} in {:?}",
            task.name,
            started.elapsed()
        );

        Ok(ExecutionOutcome {
            success,
            exit_code,
            output,
            duration: started.elapsed(),
            quota_exhausted,
            timed_out,
        })
    }
}

pub fn detect_quota_exhaustion(output: &str) -> bool {
    let lower = output.to_lowercase();
    QUOTA_MARKERS.iter().any(|marker| lower.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task_with_mode(mode: TaskMode) -> Task {
        let mut task = Task::new("t-1", "review-code");
        task.mode = mode;
        task.body = "Review the diff".to_string();
        task
    }

    #[test]
    fn test_build_prompt_read_only_banner() {
        let prompt = build_prompt(&task_with_mode(TaskMode::ReadOnly));
        assert!(prompt.starts_with("[READ-ONLY MODE"));
        assert!(prompt.ends_with("Review the diff"));
    }

    #[test]
    fn test_build_prompt_plan_first_banner() {
        let prompt = build_prompt(&task_with_mode(TaskMode::PlanFirst));
        assert!(prompt.starts_with("[PLAN-FIRST MODE"));
    }

    #[test]
    fn test_build_prompt_autonomous_is_bare() {
        assert_eq!(build_prompt(&task_with_mode(TaskMode::Autonomous)), "Review the diff");
    }

    #[test]
    fn test_detect_quota_markers() {
        assert!(detect_quota_exhaustion("Claude AI usage limit reached|1756400000"));
        assert!(detect_quota_exhaustion("error: Rate Limit Exceeded"));
        assert!(!detect_quota_exhaustion("completed 5 files"));
    }

    #[test]
    fn test_dry_run_spawns_nothing() {
        let executor = CommandExecutor::dry_run(ExecutorConfig {
            command: "/definitely/not/a/real/binary".to_string(),
            ..ExecutorConfig::default()
        });
        let outcome = executor.execute(&task_with_mode(TaskMode::Autonomous)).unwrap();
        assert!(outcome.success);
        assert!(outcome.output.contains("[DRY RUN]"));
    }

    #[test]
    fn test_missing_binary_is_executor_error() {
        let executor = CommandExecutor::new(ExecutorConfig {
            command: "/definitely/not/a/real/binary".to_string(),
            ..ExecutorConfig::default()
        });
        let task = task_with_mode(TaskMode::Autonomous);
        assert!(executor.execute(&task).is_err());
    }

    #[test]
    fn test_successful_command_captures_output() {
        let mut task = task_with_mode(TaskMode::Autonomous);
        task.timeout = "10s".to_string();
        let executor = CommandExecutor::new(ExecutorConfig {
            command: "echo".to_string(),
            ..ExecutorConfig::default()
        });
        let outcome = executor.execute(&task).unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.exit_code, Some(0));
        assert!(!outcome.timed_out);
    }

    #[cfg(unix)]
    #[test]
    fn test_timeout_kills_subprocess() {
        use std::os::unix::fs::PermissionsExt;

        let temp = tempfile::TempDir::new().unwrap();
        let script = temp.path().join("slow.sh");
        std::fs::write(&script, "#!/bin/sh\nsleep 30\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let mut task = task_with_mode(TaskMode::Autonomous);
        task.timeout = "1s".to_string();
        let executor = CommandExecutor::new(ExecutorConfig {
            command: script.to_string_lossy().to_string(),
            ..ExecutorConfig::default()
        });

        let outcome = executor.execute(&task).unwrap();
        assert!(!outcome.success);
        assert!(outcome.timed_out);
        assert!(outcome.exit_code.is_none());
        assert!(outcome.duration < Duration::from_secs(10));
    }

    #[cfg(unix)]
    #[test]
    fn test_remaining_ttl_caps_the_kill_deadline() {
        use std::os::unix::fs::PermissionsExt;

        let temp = tempfile::TempDir::new().unwrap();
        let script = temp.path().join("slow.sh");
        std::fs::write(&script, "#!/bin/sh\nsleep 30\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        // Generous timeout, but only about a second of TTL left
        let mut task = task_with_mode(TaskMode::Autonomous);
        task.timeout = "30m".to_string();
        task.ttl_seconds = 300;
        task.created_at = Utc::now() - chrono::Duration::seconds(299);
        let executor = CommandExecutor::new(ExecutorConfig {
            command: script.to_string_lossy().to_string(),
            ..ExecutorConfig::default()
        });

        let outcome = executor.execute(&task).unwrap();
        assert!(!outcome.success);
        assert!(outcome.timed_out);
        assert!(outcome.duration < Duration::from_secs(10));
    }
}
