//! Cooperative shutdown signal shared by the watcher threads.

use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// A one-shot flag that sleeping loops can wait on. `wait` doubles as the
/// loop's sleep: it returns early (and true) the moment `signal` is called,
/// so no thread ever sleeps through a shutdown.
#[derive(Debug, Default)]
pub struct Shutdown {
    flag: Mutex<bool>,
    cvar: Condvar,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signal(&self) {
        let mut flag = self.flag.lock().unwrap_or_else(|p| p.into_inner());
        *flag = true;
        self.cvar.notify_all();
    }

    pub fn is_signalled(&self) -> bool {
        *self.flag.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Sleep up to `timeout`. Returns true if shutdown was signalled.
    pub fn wait(&self, timeout: Duration) -> bool {
        let flag = self.flag.lock().unwrap_or_else(|p| p.into_inner());
        let (flag, _timeout_result) = self
            .cvar
            .wait_timeout_while(flag, timeout, |signalled| !*signalled)
            .unwrap_or_else(|p| p.into_inner());
        *flag
    }
}
