//! Session and week planning plus confidence routing.
//!
//! Admission is a single greedy pass over the ranked backlog: tasks are
//! admitted in rank order while their cumulative estimated cost fits under
//! the session ceiling. This is first-fit, not an optimal knapsack; a
//! high-ranked task too large for the remaining window is skipped and its
//! slot falls through to whatever fits next.

use crate::budget::{BudgetTracker, Capacity};
use crate::config::{BudgetConfig, ProjectConfig, ScheduleConfig};
use crate::error::Result;
use crate::scheduler::phase::{Phase, Schedule};
use crate::scheduler::scorer::Scorer;
use crate::task::Task;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use log::debug;
use std::collections::{BTreeMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Proceed,
    Review,
    Question,
    Skip,
}

/// Outcome of a session planning pass.
#[derive(Debug, Clone)]
pub struct SessionPlan {
    pub phase: Phase,
    pub available_tokens: u64,
    pub planned_tokens: u64,
    pub admitted: Vec<(Task, f64)>,
}

pub struct Planner<'a> {
    schedule: Schedule,
    scorer: Scorer,
    tracker: &'a BudgetTracker,
    tokens_per_percent: u64,
    confidence_auto_proceed: u8,
    confidence_review_threshold: u8,
    confidence_question_threshold: u8,
}

impl<'a> Planner<'a> {
    pub fn new(
        schedule_config: &ScheduleConfig,
        budget_config: &BudgetConfig,
        projects: &[ProjectConfig],
        tracker: &'a BudgetTracker,
    ) -> Result<Self> {
        Ok(Self {
            schedule: Schedule::new(schedule_config)?,
            scorer: Scorer::new(schedule_config, budget_config, projects),
            tracker,
            tokens_per_percent: budget_config.tokens_per_percent,
            confidence_auto_proceed: schedule_config.confidence_auto_proceed,
            confidence_review_threshold: schedule_config.confidence_review_threshold,
            confidence_question_threshold: schedule_config.confidence_question_threshold,
        })
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    pub fn scorer(&self) -> &Scorer {
        &self.scorer
    }

    /// Plan one session: ceiling = min(remaining daily budget scaled by the
    /// phase fraction, live capacity) in tokens, then greedy admission in
    /// rank order. Blocked tasks (unmet dependencies) are never admitted.
    pub fn plan_session(
        &self,
        tasks: &[Task],
        capacity: Option<&Capacity>,
        phase: Phase,
        pending: &HashSet<String>,
        today: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<SessionPlan> {
        let daily_remaining = self.tracker.remaining_today(today)?;
        let phase_percent = daily_remaining * self.schedule.phase_fraction(phase);

        let mut available_percent = phase_percent;
        if let Some(capacity) = capacity {
            available_percent = available_percent.min(capacity.available_percent());
        }
        let available_tokens =
            (available_percent.max(0.0) * self.tokens_per_percent as f64) as u64;

        let ranked = self.scorer.rank(tasks, capacity, pending, now);

        let mut admitted = Vec::new();
        let mut planned_tokens = 0u64;
        for (task, score) in ranked {
            let blocked = task
                .depends_on
                .iter()
                .any(|dep| pending.contains(dep) && *dep != task.name);
            if blocked {
                debug!("Skipping blocked task {}", task.name);
                continue;
            }

            let cost = self.tracker.estimated_cost(&task.name, task.estimated_tokens);
            if planned_tokens + cost <= available_tokens {
                planned_tokens += cost;
                admitted.push((task, score));
            }
        }

        Ok(SessionPlan {
            phase,
            available_tokens,
            planned_tokens,
            admitted,
        })
    }

    /// Distribute the ranked backlog across this week's planned daily
    /// allocations, first-fit per day.
    pub fn plan_week(
        &self,
        tasks: &[Task],
        pending: &HashSet<String>,
        today: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<BTreeMap<NaiveDate, Vec<String>>> {
        let weekly = self.tracker.load_or_create_week(today)?;
        let mut queue = self.scorer.rank(tasks, None, pending, now);

        let mut plan = BTreeMap::new();
        for offset in 0..7 {
            let day = today + Duration::days(offset);
            let Some(alloc) = weekly.daily_allocations.get(&day) else {
                continue;
            };
            let day_budget =
                (alloc.planned_percent * self.tokens_per_percent as f64) as u64;

            let mut day_tasks = Vec::new();
            let mut day_tokens = 0u64;
            let mut remaining = Vec::new();
            for (task, score) in queue {
                let cost = self.tracker.estimated_cost(&task.name, task.estimated_tokens);
                if day_tokens + cost <= day_budget {
                    day_tokens += cost;
                    day_tasks.push(task.name);
                } else {
                    remaining.push((task, score));
                }
            }
            plan.insert(day, day_tasks);
            queue = remaining;
        }

        Ok(plan)
    }

    /// Three ordered thresholds map a confidence estimate to an action.
    pub fn route_by_confidence(&self, confidence: u8) -> Route {
        if confidence >= self.confidence_auto_proceed {
            Route::Proceed
        } else if confidence >= self.confidence_review_threshold {
            Route::Review
        } else if confidence >= self.confidence_question_threshold {
            Route::Question
        } else {
            Route::Skip
        }
    }

    /// Advisory budget gate across session, day and week windows.
    pub fn check_budget(&self, task: &Task, today: NaiveDate) -> Result<(bool, String)> {
        let estimated_percent =
            self.tracker.estimated_cost(&task.name, task.estimated_tokens) as f64
                / self.tokens_per_percent as f64;

        if !self.tracker.check_session_budget(estimated_percent) {
            return Ok((false, "exceeds session budget".to_string()));
        }

        let remaining_today = self.tracker.remaining_today(today)?;
        if estimated_percent > remaining_today {
            return Ok((
                false,
                format!("exceeds daily budget ({remaining_today:.1}% remaining)"),
            ));
        }

        let remaining_week = self.tracker.remaining_week(today)?;
        if estimated_percent > remaining_week {
            return Ok((
                false,
                format!("exceeds weekly budget ({remaining_week:.1}% remaining)"),
            ));
        }

        Ok((true, "within budget".to_string()))
    }
}
