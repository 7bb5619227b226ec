//! Durable filesystem queue.
//!
//! The queue is a directory-based state machine: `queue -> processing ->
//! {completed|failed|dead-letter|archive}`. Every transition is a single
//! atomic rename, so mutual exclusion needs no broker, no database and no
//! counter to keep in sync -- the directories are the ground truth.

pub mod backlog;
pub mod concurrency;
pub mod store;

pub use backlog::{Backlog, BacklogSummary};
pub use concurrency::ConcurrencyController;
pub use store::{QueueStore, Terminal};
