//! Taskbridge - a durable filesystem task queue with budget-aware admission
//!
//! Tasks are one-JSON-object-per-file; every state change is an atomic
//! rename between directories, so a crash at any point leaves the queue
//! recoverable by inspection. A hybrid push/poll watcher feeds detected
//! files through claim, execution, and terminal transitions, while the
//! scheduler gates admission on time-of-day phase and a weekly token budget.

pub mod budget;
pub mod config;
pub mod error;
pub mod executor;
pub mod queue;
pub mod runner;
pub mod scheduler;
pub mod task;
pub mod watcher;

pub use error::{BridgeError, Result};
