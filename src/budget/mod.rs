//! Token budget ledger and live capacity signal.
//!
//! Three nested windows: the week (anchored to its ISO Monday, persisted),
//! the day (one allocation per calendar date), and the session (an ephemeral
//! overlay snapshotting today's allocation). Budget checks are advisory
//! gates for admission, never transactional locks on the queue.

pub mod capacity;
pub mod tracker;

pub use capacity::{Capacity, CapacityProbe};
pub use tracker::{BudgetTracker, DailyAllocation, SessionBudget, WeekSummary, WeeklyBudget};
