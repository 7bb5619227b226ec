//! Hybrid change detection for the queue directory.
//!
//! A push-based filesystem watch (via `notify`) is the preferred mechanism,
//! but the polling thread always runs: it is a correctness backstop, not
//! merely a fallback. Duplicate detections across the two paths are
//! deduplicated by a shared seen-set keyed on file name.
//!
//! Degradation is an explicit state machine rather than informal timing:
//!
//! - `Watching`: push watch installed and believed healthy
//! - `Degraded`: push watch installed but stalled (no events while files sit
//!   in the queue); polling carries the load until the next push event
//! - `PollingOnly`: push watch unavailable or disabled
//!
//! A stalled watch is never restarted; the poll loop is already running at
//! its own cadence and picks up the backlog.

pub mod shutdown;

pub use shutdown::Shutdown;

use crate::config::WatcherConfig;
use crate::error::Result;
use crate::queue::store::list_json;
use log::{debug, error, info, warn};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Detection state of the push watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    Watching,
    Degraded,
    PollingOnly,
}

impl WatchState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => WatchState::Watching,
            1 => WatchState::Degraded,
            _ => WatchState::PollingOnly,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            WatchState::Watching => 0,
            WatchState::Degraded => 1,
            WatchState::PollingOnly => 2,
        }
    }
}

/// File names already dispatched, shared by the push and poll paths.
///
/// The runner forgets a name when its claim attempt loses or is refused at
/// the ceiling, so the file can be re-detected by a later poll pass.
#[derive(Debug, Clone, Default)]
pub struct SeenSet(Arc<Mutex<HashSet<String>>>);

impl SeenSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the name was not seen before.
    pub fn insert(&self, name: &str) -> bool {
        self.0
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(name.to_string())
    }

    pub fn forget(&self, name: &str) {
        self.0
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(name);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .contains(name)
    }
}

type TaskCallback = Arc<dyn Fn(PathBuf) + Send + Sync>;

pub struct HybridWatcher {
    queue_dir: PathBuf,
    config: WatcherConfig,
    on_task: TaskCallback,
    seen: SeenSet,
    state: Arc<AtomicU8>,
    last_push_event: Arc<Mutex<Instant>>,
    shutdown: Arc<Shutdown>,
    push_watcher: Option<RecommendedWatcher>,
    threads: Vec<JoinHandle<()>>,
}

impl HybridWatcher {
    pub fn new(
        queue_dir: impl Into<PathBuf>,
        config: WatcherConfig,
        on_task: impl Fn(PathBuf) + Send + Sync + 'static,
    ) -> Self {
        Self {
            queue_dir: queue_dir.into(),
            config,
            on_task: Arc::new(on_task),
            seen: SeenSet::new(),
            state: Arc::new(AtomicU8::new(WatchState::PollingOnly.as_u8())),
            last_push_event: Arc::new(Mutex::new(Instant::now())),
            shutdown: Arc::new(Shutdown::new()),
            push_watcher: None,
            threads: Vec::new(),
        }
    }

    pub fn state(&self) -> WatchState {
        WatchState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Handle to the dedup set, for the claim path.
    pub fn seen(&self) -> SeenSet {
        self.seen.clone()
    }

    /// Install the push watch (if enabled and available) and spawn the poll
    /// and health threads. A failed push start degrades to polling-only
    /// rather than failing the watcher.
    pub fn start(&mut self) -> Result<()> {
        info!("Starting hybrid watcher on {}", self.queue_dir.display());

        if self.config.push_enabled {
            match self.start_push_watch() {
                Ok(watcher) => {
                    self.push_watcher = Some(watcher);
                    self.state
                        .store(WatchState::Watching.as_u8(), Ordering::SeqCst);
                    info!("Push watch active");
                }
                Err(e) => {
                    warn!("Push watch unavailable ({e}), polling only");
                }
            }
        }

        self.spawn_poll_thread()?;

        if self.push_watcher.is_some() {
            self.spawn_health_thread()?;
        }

        Ok(())
    }

    fn start_push_watch(&self) -> notify::Result<RecommendedWatcher> {
        let on_task = Arc::clone(&self.on_task);
        let seen = self.seen.clone();
        let state = Arc::clone(&self.state);
        let last_event = Arc::clone(&self.last_push_event);

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let event = match res {
                Ok(event) => event,
                Err(e) => {
                    error!("Push watch error: {e}");
                    return;
                }
            };

            if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                return;
            }

            // Any delivered event proves the watch is alive
            *last_event.lock().unwrap_or_else(|p| p.into_inner()) = Instant::now();
            if state.load(Ordering::SeqCst) == WatchState::Degraded.as_u8() {
                info!("Push watch recovered, leaving degraded state");
                state.store(WatchState::Watching.as_u8(), Ordering::SeqCst);
            }

            for path in event.paths {
                dispatch(&path, &seen, &on_task, "push");
            }
        })?;

        watcher.watch(&self.queue_dir, RecursiveMode::NonRecursive)?;
        Ok(watcher)
    }

    fn spawn_poll_thread(&mut self) -> Result<()> {
        let queue_dir = self.queue_dir.clone();
        let seen = self.seen.clone();
        let on_task = Arc::clone(&self.on_task);
        let state = Arc::clone(&self.state);
        let shutdown = Arc::clone(&self.shutdown);
        let primary = Duration::from_millis(self.config.poll_interval_ms);
        let fallback = Duration::from_millis(self.config.fallback_poll_ms);

        let handle = std::thread::Builder::new()
            .name("tb-poll".to_string())
            .spawn(move || {
                debug!("Poll thread started");
                loop {
                    // Slow cadence only while the push watch is healthy
                    let interval = if state.load(Ordering::SeqCst) == WatchState::Watching.as_u8() {
                        fallback
                    } else {
                        primary
                    };

                    if shutdown.wait(interval) {
                        break;
                    }

                    for path in list_json(&queue_dir) {
                        dispatch(&path, &seen, &on_task, "poll");
                    }
                }
                debug!("Poll thread exiting");
            })?;

        self.threads.push(handle);
        Ok(())
    }

    fn spawn_health_thread(&mut self) -> Result<()> {
        let queue_dir = self.queue_dir.clone();
        let state = Arc::clone(&self.state);
        let last_event = Arc::clone(&self.last_push_event);
        let shutdown = Arc::clone(&self.shutdown);
        let interval = Duration::from_secs(self.config.health_check_interval_secs);
        let stall = Duration::from_secs(self.config.stall_threshold_secs);

        let handle = std::thread::Builder::new()
            .name("tb-health".to_string())
            .spawn(move || {
                debug!("Health thread started");
                while !shutdown.wait(interval) {
                    check_push_health(&queue_dir, &state, &last_event, stall);
                }
                debug!("Health thread exiting");
            })?;

        self.threads.push(handle);
        Ok(())
    }

    /// Signal all loops, drop the push watch, then join the threads. Safe to
    /// call if `start` never ran or already stopped.
    pub fn stop(&mut self) {
        info!("Stopping hybrid watcher");
        self.shutdown.signal();

        // Dropping the notify watcher stops its event delivery
        self.push_watcher = None;

        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                warn!("Watcher thread panicked during shutdown");
            }
        }
    }

    #[cfg(test)]
    fn backdate_last_push_event(&self, by: Duration) {
        let mut last = self.last_push_event.lock().unwrap();
        *last = Instant::now() - by;
    }

    #[cfg(test)]
    fn run_health_check_once(&self) {
        check_push_health(
            &self.queue_dir,
            &self.state,
            &self.last_push_event,
            Duration::from_secs(self.config.stall_threshold_secs),
        );
    }
}

impl Drop for HybridWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn dispatch(path: &Path, seen: &SeenSet, on_task: &TaskCallback, source: &str) {
    if path.extension().and_then(|e| e.to_str()) != Some("json") {
        return;
    }
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return;
    };
    // Temp files from atomic writes have a .tmp suffix and never match, but a
    // push event can arrive before the rename target exists
    if !path.exists() {
        return;
    }
    if seen.insert(name) {
        debug!("Detected {name} via {source}");
        on_task(path.to_path_buf());
    }
}

/// One health check pass: a push watch that has delivered nothing for the
/// stall threshold while files sit in the queue is presumed stalled. The
/// watch is not restarted; polling compensates at its faster cadence.
fn check_push_health(
    queue_dir: &Path,
    state: &AtomicU8,
    last_event: &Mutex<Instant>,
    stall: Duration,
) {
    if state.load(Ordering::SeqCst) != WatchState::Watching.as_u8() {
        return;
    }

    let since = last_event
        .lock()
        .unwrap_or_else(|p| p.into_inner())
        .elapsed();
    if since <= stall {
        return;
    }

    let pending = list_json(queue_dir).len();
    if pending > 0 {
        warn!(
            "Push watch presumed stalled: no events for {}s with {pending} files pending; \
             polling will handle them",
            since.as_secs()
        );
        state.store(WatchState::Degraded.as_u8(), Ordering::SeqCst);
    }
}
