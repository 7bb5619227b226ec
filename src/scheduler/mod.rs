//! Admission control: phases, scoring, and session planning.

pub mod phase;
pub mod planner;
pub mod scorer;

pub use phase::{Phase, Schedule};
pub use planner::{Planner, Route, SessionPlan};
pub use scorer::Scorer;
