//! Directory-backed queue store with atomic move-based transitions.
//!
//! Writes use a temp-file-then-rename pattern so a reader never observes a
//! partially written file; the `.tmp` suffix keeps temp files invisible to
//! the `.json` scans used everywhere else.

use crate::error::{BridgeError, Result};
use crate::task::{Response, Task};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Terminal states a claimed task can transition into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminal {
    Completed,
    Failed,
    DeadLetter,
    Archive,
}

impl Terminal {
    fn dir_name(self) -> &'static str {
        match self {
            Terminal::Completed => "completed",
            Terminal::Failed => "failed",
            Terminal::DeadLetter => "dead-letter",
            Terminal::Archive => "archive",
        }
    }
}

const SUBDIRS: &[&str] = &[
    "queue",
    "processing",
    "responses",
    "completed",
    "failed",
    "dead-letter",
    "archive",
    "logs",
    "context",
];

/// Durable queue store rooted at a configured directory.
#[derive(Debug, Clone)]
pub struct QueueStore {
    root: PathBuf,
}

impl QueueStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create the full directory layout. Idempotent.
    pub fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.root)?;
        for subdir in SUBDIRS {
            fs::create_dir_all(self.root.join(subdir))?;
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn queue_dir(&self) -> PathBuf {
        self.root.join("queue")
    }

    pub fn processing_dir(&self) -> PathBuf {
        self.root.join("processing")
    }

    pub fn responses_dir(&self) -> PathBuf {
        self.root.join("responses")
    }

    pub fn dead_letter_dir(&self) -> PathBuf {
        self.root.join("dead-letter")
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.root.join("archive")
    }

    pub fn context_dir(&self) -> PathBuf {
        self.root.join("context")
    }

    pub fn state_dir(&self) -> PathBuf {
        self.root.join("state")
    }

    /// Serialize a task into `queue/` atomically. A task already past its
    /// TTL is rejected rather than queued dead on arrival.
    pub fn enqueue(&self, task: &Task) -> Result<PathBuf> {
        if task.is_expired(Utc::now()) {
            return Err(BridgeError::Expired(task.id.clone()));
        }
        let dest = self.queue_dir().join(task.file_name());
        write_json_atomic(&dest, task)?;
        info!("Enqueued task {} -> {}", task.id, dest.display());
        Ok(dest)
    }

    /// Attempt to move a queued file into `processing/`.
    ///
    /// `Ok(None)` means the source vanished first: a concurrent claimer won
    /// the race. That is an expected outcome, not an error.
    pub fn claim(&self, task_file: &Path) -> Result<Option<PathBuf>> {
        let name = file_name_of(task_file)?;
        let dest = self.processing_dir().join(name);

        match fs::rename(task_file, &dest) {
            Ok(()) => {
                debug!("Claimed {}", name);
                Ok(Some(dest))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("Lost claim race for {}", name);
                Ok(None)
            }
            Err(e) => Err(BridgeError::Transition {
                path: task_file.to_path_buf(),
                source: e,
            }),
        }
    }

    /// Move a claimed file into a terminal directory.
    ///
    /// Idempotent: if the source is already gone and the destination exists,
    /// a crashed-and-retried transition already succeeded and this reports
    /// success. A destination that cannot be created propagates as
    /// [`BridgeError::Transition`].
    pub fn transition(&self, claimed: &Path, terminal: Terminal) -> Result<PathBuf> {
        let name = file_name_of(claimed)?;
        let dest = self.root.join(terminal.dir_name()).join(name);

        match fs::rename(claimed, &dest) {
            Ok(()) => {
                debug!("Transitioned {} -> {}", name, terminal.dir_name());
                Ok(dest)
            }
            Err(e) if e.kind() == ErrorKind::NotFound && dest.exists() => {
                debug!("Transition of {} already applied", name);
                Ok(dest)
            }
            Err(e) => Err(BridgeError::Transition {
                path: claimed.to_path_buf(),
                source: e,
            }),
        }
    }

    /// Route a failed or crashed task to the dead-letter directory.
    pub fn dead_letter(&self, claimed: &Path) -> Result<PathBuf> {
        self.transition(claimed, Terminal::DeadLetter)
    }

    /// Route an expired task to the dead-letter directory.
    pub fn expire(&self, claimed: &Path) -> Result<PathBuf> {
        warn!("Expiring {}", claimed.display());
        self.transition(claimed, Terminal::DeadLetter)
    }

    /// Retain a copy of a finished task for the retention window.
    pub fn archive(&self, claimed: &Path) -> Result<PathBuf> {
        self.transition(claimed, Terminal::Archive)
    }

    /// Write a response atomically into `responses/`. Never overwrites: a
    /// response is written at most once per task.
    pub fn write_response(&self, response: &Response) -> Result<PathBuf> {
        let dest = self.responses_dir().join(response.file_name());
        if dest.exists() {
            debug!("Response for {} already written", response.task_id);
            return Ok(dest);
        }
        write_json_atomic(&dest, response)?;
        info!("Response written for task {}", response.task_id);
        Ok(dest)
    }

    /// List `.json` task files in `queue/`, sorted by name for determinism.
    pub fn list_queue(&self) -> Vec<PathBuf> {
        list_json(&self.queue_dir())
    }

    /// Count `.json` files in a subdirectory; missing directories count 0 so
    /// status reporting works on a fresh root.
    pub fn count(&self, subdir: &str) -> usize {
        list_json(&self.root.join(subdir)).len()
    }

    /// Delete archived files older than the retention window.
    pub fn purge_archive(&self, retention_days: u32, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = now - chrono::Duration::days(retention_days as i64);
        let mut purged = 0;

        for path in list_json(&self.archive_dir()) {
            let modified = fs::metadata(&path).and_then(|m| m.modified());
            let Ok(modified) = modified else { continue };
            let modified: DateTime<Utc> = modified.into();

            if modified < cutoff {
                match fs::remove_file(&path) {
                    Ok(()) => purged += 1,
                    Err(e) => warn!("Failed to purge {}: {}", path.display(), e),
                }
            }
        }

        if purged > 0 {
            info!("Purged {} archived task files", purged);
        }
        Ok(purged)
    }
}

/// Temp-file-then-rename JSON write inside the destination directory, so the
/// rename stays on one filesystem.
pub fn write_json_atomic<T: serde::Serialize>(dest: &Path, value: &T) -> Result<PathBuf> {
    let dir = dest
        .parent()
        .ok_or_else(|| BridgeError::Validation(format!("no parent dir for {}", dest.display())))?;
    let name = file_name_of(dest)?;
    let tmp = dir.join(format!(".{name}.tmp"));

    let json = serde_json::to_string_pretty(value)?;
    fs::write(&tmp, json)?;
    fs::rename(&tmp, dest).map_err(|e| BridgeError::Transition {
        path: dest.to_path_buf(),
        source: e,
    })?;
    Ok(dest.to_path_buf())
}

fn file_name_of(path: &Path) -> Result<&str> {
    path.file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| BridgeError::Validation(format!("bad file name: {}", path.display())))
}

/// `.json` files in a directory, sorted; empty if the directory is missing.
pub fn list_json(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };

    let mut files: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("json"))
        .collect();
    files.sort();
    files
}
