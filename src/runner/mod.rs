//! Queue runner: wires detection, claiming, execution and bookkeeping.
//!
//! One file flows detect -> claim -> parse -> TTL check -> execute ->
//! terminal transition -> response -> archive -> budget record. Any error
//! after a successful claim routes the claimed file to dead-letter so the
//! file itself is never lost.

use crate::budget::BudgetTracker;
use crate::config::Config;
use crate::error::{BridgeError, Result};
use crate::executor::{ExecutionOutcome, TaskExecutor};
use crate::queue::{ConcurrencyController, QueueStore, Terminal};
use crate::task::{parse_task_file, Response, ResponseStatus, Task};
use crate::watcher::{HybridWatcher, SeenSet, Shutdown};
use chrono::Utc;
use log::{debug, error, info, warn};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub struct QueueRunner {
    store: QueueStore,
    controller: Arc<ConcurrencyController>,
    executor: Arc<dyn TaskExecutor>,
    tracker: Arc<BudgetTracker>,
    tokens_per_percent: u64,
    seen: SeenSet,
    quota_halted: Arc<AtomicBool>,
}

impl QueueRunner {
    pub fn new(config: &Config, executor: Arc<dyn TaskExecutor>) -> Result<Self> {
        let store = QueueStore::new(&config.store.root);
        store.ensure_directories()?;

        let controller = Arc::new(ConcurrencyController::new(
            store.clone(),
            config.concurrency.max_concurrent,
        ));
        let tracker = Arc::new(BudgetTracker::new(
            store.state_dir(),
            config.budget.clone(),
        ));

        Ok(Self {
            store,
            controller,
            executor,
            tracker,
            tokens_per_percent: config.budget.tokens_per_percent,
            seen: SeenSet::new(),
            quota_halted: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn store(&self) -> &QueueStore {
        &self.store
    }

    pub fn quota_halted(&self) -> bool {
        self.quota_halted.load(Ordering::SeqCst)
    }

    /// Run until `shutdown` is signalled: watch the queue directory and feed
    /// detected files to a worker pool sized to the concurrency ceiling.
    pub fn run(mut self, config: &Config, shutdown: Arc<Shutdown>) -> Result<()> {
        let (tx, rx) = mpsc::channel::<PathBuf>();
        let rx = Arc::new(Mutex::new(rx));

        let sender = tx.clone();
        let mut watcher = HybridWatcher::new(
            self.store.queue_dir(),
            config.watcher.clone(),
            move |path| {
                if sender.send(path).is_err() {
                    debug!("Worker pool gone, dropping detection event");
                }
            },
        );
        // Workers share the watcher's dedup set so lost races can be
        // re-detected by the poll loop
        self.seen = watcher.seen();

        let runner = Arc::new(self.split_shared());
        let mut workers = Vec::new();
        for n in 0..runner.controller.ceiling() {
            let runner = Arc::clone(&runner);
            let rx = Arc::clone(&rx);
            let handle = std::thread::Builder::new()
                .name(format!("worker-{n}"))
                .spawn(move || worker_loop(runner, rx))?;
            workers.push(handle);
        }

        watcher.start()?;
        self.tracker.start_session(Utc::now().date_naive())?;

        info!("Queue runner started (ceiling {})", runner.controller.ceiling());
        while !shutdown.wait(Duration::from_millis(200)) {}

        info!("Shutting down queue runner");
        watcher.stop();
        // The watcher owns a sender clone; drop it with tx so the workers
        // see the channel close and drain out
        drop(watcher);
        drop(tx);
        for handle in workers {
            let _ = handle.join();
        }
        Ok(())
    }

    fn split_shared(&self) -> SharedRunner {
        SharedRunner {
            store: self.store.clone(),
            controller: Arc::clone(&self.controller),
            executor: Arc::clone(&self.executor),
            tracker: Arc::clone(&self.tracker),
            tokens_per_percent: self.tokens_per_percent,
            seen: self.seen.clone(),
            quota_halted: Arc::clone(&self.quota_halted),
        }
    }
}

/// The per-worker view of the runner.
pub struct SharedRunner {
    store: QueueStore,
    controller: Arc<ConcurrencyController>,
    executor: Arc<dyn TaskExecutor>,
    tracker: Arc<BudgetTracker>,
    tokens_per_percent: u64,
    seen: SeenSet,
    quota_halted: Arc<AtomicBool>,
}

fn worker_loop(runner: Arc<SharedRunner>, rx: Arc<Mutex<Receiver<PathBuf>>>) {
    loop {
        let path = {
            let guard = match rx.lock() {
                Ok(g) => g,
                Err(_) => return,
            };
            match guard.recv() {
                Ok(p) => p,
                Err(_) => return,
            }
        };
        if let Err(e) = runner.process_detected(&path) {
            warn!("Skipping {}: {}", path.display(), e);
        }
    }
}

impl SharedRunner {
    /// Full pipeline for one detected queue file.
    pub fn process_detected(&self, path: &Path) -> Result<()> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();

        if self.quota_halted.load(Ordering::SeqCst) {
            self.seen.forget(&name);
            return Err(BridgeError::QuotaExhausted(format!(
                "admission halted for this session, {name} stays queued"
            )));
        }

        let claimed = match self.controller.claim(path) {
            Ok(Some(claimed)) => claimed,
            Ok(None) => {
                // Raced out or at the ceiling; allow re-detection later
                self.seen.forget(&name);
                return Ok(());
            }
            Err(e) => {
                self.seen.forget(&name);
                return Err(e);
            }
        };

        if let Err(e) = self.process_claimed(&claimed) {
            error!("Processing {} failed: {}, routing to dead-letter", name, e);
            self.store.dead_letter(&claimed)?;
        }
        Ok(())
    }

    /// Parse, TTL-check, execute, and settle one claimed file.
    pub fn process_claimed(&self, claimed: &Path) -> Result<()> {
        let task = match parse_task_file(claimed) {
            Ok(task) => task,
            Err(e) => {
                warn!("Rejecting malformed task {}: {}", claimed.display(), e);
                let stem = claimed
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or("unknown");
                let response = Response::failure(
                    stem,
                    ResponseStatus::Rejected,
                    "validation_failure",
                    &e.to_string(),
                );
                self.store.write_response(&response)?;
                self.store.dead_letter(claimed)?;
                return Ok(());
            }
        };

        if task.is_expired(Utc::now()) {
            warn!("Task {} expired before execution", task.id);
            return self.expire_claimed(&task, claimed);
        }

        let outcome = self.executor.execute(&task)?;
        self.settle(&task, claimed, &outcome)
    }

    /// Dead-letter an expired task with its single `timeout` response.
    fn expire_claimed(&self, task: &Task, claimed: &Path) -> Result<()> {
        if task.response_required {
            let response = Response::failure(
                &task.id,
                ResponseStatus::Timeout,
                "ttl_expired",
                &format!("task exceeded its {}s time-to-live", task.ttl_seconds),
            );
            self.store.write_response(&response)?;
        }
        self.store.expire(claimed)?;
        Ok(())
    }

    fn settle(&self, task: &Task, claimed: &Path, outcome: &ExecutionOutcome) -> Result<()> {
        if outcome.quota_exhausted {
            warn!("External quota exhausted, halting further admission");
            self.quota_halted.store(true, Ordering::SeqCst);
        }

        // TTL applies to the whole lifecycle; a run that outlived it is
        // expired no matter how it exited
        if task.is_expired(Utc::now()) {
            warn!("Task {} outlived its TTL during processing", task.id);
            return self.expire_claimed(task, claimed);
        }

        if outcome.success {
            let completed = self.store.transition(claimed, Terminal::Completed)?;
            if task.response_required {
                let mut response = Response::success(
                    &task.id,
                    Some(serde_json::json!({ "output": outcome.output })),
                );
                response.processing_ms = Some(outcome.duration.as_millis() as u64);
                self.store.write_response(&response)?;
            }
            self.store.archive(&completed)?;

            let tokens = self.tracker.estimated_cost(&task.name, task.estimated_tokens);
            let percent = tokens as f64 / self.tokens_per_percent as f64;
            self.tracker
                .record_usage(Utc::now().date_naive(), &task.name, tokens, percent)?;
            self.tracker.update_session(&task.name, percent)?;
            info!("Task {} completed in {:?}", task.id, outcome.duration);
        } else {
            self.store.transition(claimed, Terminal::Failed)?;
            if task.response_required {
                let (status, code) = if outcome.timed_out {
                    (ResponseStatus::Timeout, "execution_timeout")
                } else if outcome.quota_exhausted {
                    (ResponseStatus::Error, "quota_exhausted")
                } else {
                    (ResponseStatus::Error, "execution_failed")
                };
                let message = match outcome.exit_code {
                    Some(code) => format!("executor exited with status {code}"),
                    None => "executor was killed".to_string(),
                };
                let mut response = Response::failure(&task.id, status, code, &message);
                response.processing_ms = Some(outcome.duration.as_millis() as u64);
                self.store.write_response(&response)?;
            }
            info!("Task {} failed (exit {:?})", task.id, outcome.exit_code);
        }

        Ok(())
    }
}
