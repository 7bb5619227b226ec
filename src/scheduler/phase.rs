//! Time-of-day phase model.
//!
//! Four named windows govern whether autonomous work may run. The reserved
//! window wraps past midnight; the briefing window is one hour starting at
//! the configured briefing time.

use crate::config::{parse_hhmm, ScheduleConfig};
use crate::error::Result;
use chrono::{NaiveTime, Timelike};
use std::fmt;

const MINUTES_PER_DAY: u16 = 24 * 60;
const BRIEFING_MINUTES: u16 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Autonomous,
    Briefing,
    Buffer,
    Reserved,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Autonomous => "autonomous",
            Phase::Briefing => "briefing",
            Phase::Buffer => "buffer",
            Phase::Reserved => "reserved",
        };
        write!(f, "{s}")
    }
}

/// Window boundaries resolved to minutes since midnight.
#[derive(Debug, Clone)]
pub struct Schedule {
    autonomous_start: u16,
    autonomous_end: u16,
    briefing_start: u16,
    reserved_start: u16,
    reserved_end: u16,
    budget_autonomous: f64,
    budget_briefing: f64,
    budget_buffer: f64,
}

impl Schedule {
    pub fn new(config: &ScheduleConfig) -> Result<Self> {
        Ok(Self {
            autonomous_start: parse_hhmm(&config.autonomous_start)?,
            autonomous_end: parse_hhmm(&config.autonomous_end)?,
            briefing_start: parse_hhmm(&config.briefing_time)?,
            reserved_start: parse_hhmm(&config.reserved_start)?,
            reserved_end: parse_hhmm(&config.reserved_end)?,
            budget_autonomous: config.budget_autonomous,
            budget_briefing: config.budget_briefing,
            budget_buffer: config.budget_buffer,
        })
    }

    /// Phase active at `time`. Checked in order: autonomous, briefing,
    /// reserved (wrapping midnight), then buffer as the remainder.
    pub fn current_phase(&self, time: NaiveTime) -> Phase {
        let minute = (time.hour() * 60 + time.minute()) as u16;

        if self.autonomous_start <= minute && minute < self.autonomous_end {
            return Phase::Autonomous;
        }

        let briefing_end = (self.briefing_start + BRIEFING_MINUTES) % MINUTES_PER_DAY;
        if in_window(minute, self.briefing_start, briefing_end) {
            return Phase::Briefing;
        }

        if in_window(minute, self.reserved_start, self.reserved_end) {
            return Phase::Reserved;
        }

        Phase::Buffer
    }

    /// Whether autonomous work is permitted, with a human-readable reason.
    pub fn should_run(&self, phase: Phase) -> (bool, &'static str) {
        match phase {
            Phase::Autonomous => (true, "autonomous window active"),
            Phase::Buffer => (true, "buffer window, light tasks only"),
            Phase::Briefing => (false, "briefing window, review results instead"),
            Phase::Reserved => (false, "reserved for the user, no autonomous tasks"),
        }
    }

    /// Fraction of the daily allocation this phase may spend.
    pub fn phase_fraction(&self, phase: Phase) -> f64 {
        match phase {
            Phase::Autonomous => self.budget_autonomous,
            Phase::Briefing => self.budget_briefing,
            Phase::Buffer | Phase::Reserved => self.budget_buffer,
        }
    }
}

/// Half-open window membership; `start > end` means the window wraps
/// midnight.
fn in_window(minute: u16, start: u16, end: u16) -> bool {
    if start <= end {
        start <= minute && minute < end
    } else {
        minute >= start || minute < end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schedule() -> Schedule {
        Schedule::new(&ScheduleConfig::default()).unwrap()
    }

    fn at(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn test_autonomous_window() {
        let s = schedule();
        assert_eq!(s.current_phase(at(8, 0)), Phase::Autonomous);
        assert_eq!(s.current_phase(at(11, 30)), Phase::Autonomous);
        assert_eq!(s.current_phase(at(13, 59)), Phase::Autonomous);
    }

    #[test]
    fn test_briefing_is_one_hour() {
        let s = schedule();
        assert_eq!(s.current_phase(at(14, 0)), Phase::Briefing);
        assert_eq!(s.current_phase(at(14, 59)), Phase::Briefing);
        assert_eq!(s.current_phase(at(15, 0)), Phase::Buffer);
    }

    #[test]
    fn test_buffer_between_briefing_and_reserved() {
        let s = schedule();
        assert_eq!(s.current_phase(at(15, 1)), Phase::Buffer);
        assert_eq!(s.current_phase(at(19, 59)), Phase::Buffer);
    }

    #[test]
    fn test_reserved_wraps_midnight() {
        let s = schedule();
        assert_eq!(s.current_phase(at(20, 0)), Phase::Reserved);
        assert_eq!(s.current_phase(at(23, 59)), Phase::Reserved);
        assert_eq!(s.current_phase(at(0, 0)), Phase::Reserved);
        assert_eq!(s.current_phase(at(7, 59)), Phase::Reserved);
    }

    #[test]
    fn test_should_run_policy() {
        let s = schedule();
        assert!(s.should_run(Phase::Autonomous).0);
        assert!(s.should_run(Phase::Buffer).0);
        assert!(!s.should_run(Phase::Briefing).0);
        assert!(!s.should_run(Phase::Reserved).0);
    }

    #[test]
    fn test_phase_fractions() {
        let s = schedule();
        assert_eq!(s.phase_fraction(Phase::Autonomous), 0.80);
        assert_eq!(s.phase_fraction(Phase::Briefing), 0.08);
        assert_eq!(s.phase_fraction(Phase::Buffer), 0.12);
    }

    #[test]
    fn test_rejects_unparseable_window() {
        let mut config = ScheduleConfig::default();
        config.reserved_start = "late".to_string();
        assert!(Schedule::new(&config).is_err());
    }
}
