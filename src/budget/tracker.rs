//! Weekly/daily/session budget ledger with learned cost models.
//!
//! State files live under `state/` in the store root:
//! - `weekly-budget.json`: week allocation + actuals by day
//! - `session-budget.json`: current session tracking
//! - `cost-models.json`: learned token estimates per task category
//!
//! Remaining values are always derived from the ledger, never stored, so
//! they cannot drift; they clamp at zero when actuals overshoot the plan.

use crate::config::BudgetConfig;
use crate::error::Result;
use crate::queue::store::write_json_atomic;
use crate::task::Task;
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc, Weekday};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

const WEEKLY_BUDGET_FILE: &str = "weekly-budget.json";
const SESSION_BUDGET_FILE: &str = "session-budget.json";
const COST_MODELS_FILE: &str = "cost-models.json";

/// Mon-Thu 15% each, Fri-Sun 10% each; 10% reserve stays unplanned.
const DEFAULT_DAILY_ALLOCATION: [f64; 7] = [15.0, 15.0, 15.0, 15.0, 10.0, 10.0, 10.0];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DailyAllocation {
    pub planned_percent: f64,
    pub actual_percent: f64,
    pub tasks_planned: Vec<String>,
    pub tasks_completed: Vec<CompletedEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletedEntry {
    pub name: String,
    pub tokens: u64,
    pub percent: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeeklyBudget {
    /// Monday anchoring the ISO week
    pub week_start: NaiveDate,
    pub weekly_limit_percent: f64,
    /// Carved out for user-directed work, never planned
    pub reserve_percent: f64,
    pub user_directed_used: f64,
    pub daily_allocations: BTreeMap<NaiveDate, DailyAllocation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionBudget {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub daily_allocation: f64,
    pub used_percent: f64,
    pub tasks_executed: Vec<SessionEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEntry {
    pub name: String,
    pub percent: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CostModel {
    pub avg_tokens: u64,
    pub samples: u64,
}

#[derive(Debug, Clone)]
pub struct WeekSummary {
    pub week_start: NaiveDate,
    pub total_planned: f64,
    pub total_used: f64,
    pub user_directed_used: f64,
    pub reserve: f64,
    pub remaining_week: f64,
    pub remaining_today: f64,
    pub days_remaining: usize,
}

/// Monday of the week containing `d`.
pub fn week_start(d: NaiveDate) -> NaiveDate {
    d - Duration::days(d.weekday().num_days_from_monday() as i64)
}

pub struct BudgetTracker {
    state_dir: PathBuf,
    config: BudgetConfig,
}

impl BudgetTracker {
    pub fn new(state_dir: impl Into<PathBuf>, config: BudgetConfig) -> Self {
        Self {
            state_dir: state_dir.into(),
            config,
        }
    }

    fn weekly_path(&self) -> PathBuf {
        self.state_dir.join(WEEKLY_BUDGET_FILE)
    }

    fn session_path(&self) -> PathBuf {
        self.state_dir.join(SESSION_BUDGET_FILE)
    }

    fn models_path(&self) -> PathBuf {
        self.state_dir.join(COST_MODELS_FILE)
    }

    /// Load the ledger for the week containing `today`, or synthesize a
    /// fresh one. A ledger anchored to a prior week is superseded, never
    /// merged; an unreadable ledger is likewise replaced.
    pub fn load_or_create_week(&self, today: NaiveDate) -> Result<WeeklyBudget> {
        let monday = week_start(today);

        if let Ok(content) = fs::read_to_string(self.weekly_path()) {
            match serde_json::from_str::<WeeklyBudget>(&content) {
                Ok(budget) if budget.week_start == monday => return Ok(budget),
                Ok(stale) => {
                    info!(
                        "Weekly ledger for {} is stale, starting week of {}",
                        stale.week_start, monday
                    );
                }
                Err(e) => warn!("Unreadable weekly ledger ({e}), starting fresh"),
            }
        }

        let budget = self.fresh_week(monday);
        self.save_weekly(&budget)?;
        Ok(budget)
    }

    fn fresh_week(&self, monday: NaiveDate) -> WeeklyBudget {
        let mut daily_allocations = BTreeMap::new();

        for offset in 0..7 {
            let day = monday + Duration::days(offset);
            let planned = self
                .config
                .daily_allocations
                .get(weekday_name(day.weekday()))
                .copied()
                .unwrap_or(DEFAULT_DAILY_ALLOCATION[offset as usize]);

            daily_allocations.insert(
                day,
                DailyAllocation {
                    planned_percent: planned,
                    ..DailyAllocation::default()
                },
            );
        }

        WeeklyBudget {
            week_start: monday,
            weekly_limit_percent: self.config.weekly_limit_percent,
            reserve_percent: self.config.reserve_percent,
            user_directed_used: 0.0,
            daily_allocations,
        }
    }

    pub fn save_weekly(&self, budget: &WeeklyBudget) -> Result<()> {
        fs::create_dir_all(&self.state_dir)?;
        write_json_atomic(&self.weekly_path(), budget)?;
        Ok(())
    }

    pub fn today_allocation(&self, today: NaiveDate) -> Result<f64> {
        let budget = self.load_or_create_week(today)?;
        Ok(budget
            .daily_allocations
            .get(&today)
            .map(|a| a.planned_percent)
            .unwrap_or(0.0))
    }

    /// Remaining allocation for today, clamped at zero.
    pub fn remaining_today(&self, today: NaiveDate) -> Result<f64> {
        let budget = self.load_or_create_week(today)?;
        Ok(budget
            .daily_allocations
            .get(&today)
            .map(|a| (a.planned_percent - a.actual_percent).max(0.0))
            .unwrap_or(0.0))
    }

    /// Remaining allocation for the week after actuals, user-directed usage
    /// and the reserve, clamped at zero.
    pub fn remaining_week(&self, today: NaiveDate) -> Result<f64> {
        let budget = self.load_or_create_week(today)?;
        Ok(derive_remaining_week(&budget))
    }

    /// Record a finished task: bump today's actuals, append the completion
    /// entry, then fold the observed cost into the category's model.
    pub fn record_usage(
        &self,
        today: NaiveDate,
        task_name: &str,
        tokens_used: u64,
        percent_used: f64,
    ) -> Result<()> {
        let mut budget = self.load_or_create_week(today)?;

        if let Some(alloc) = budget.daily_allocations.get_mut(&today) {
            alloc.actual_percent += percent_used;
            alloc.tasks_completed.push(CompletedEntry {
                name: task_name.to_string(),
                tokens: tokens_used,
                percent: percent_used,
                timestamp: Utc::now(),
            });
        }

        self.save_weekly(&budget)?;
        self.update_cost_model(task_name, tokens_used)?;
        Ok(())
    }

    /// Usage from non-scheduled, user-directed work.
    pub fn record_user_directed(&self, today: NaiveDate, percent_used: f64) -> Result<()> {
        let mut budget = self.load_or_create_week(today)?;
        budget.user_directed_used += percent_used;
        self.save_weekly(&budget)
    }

    /// Redistribute the remaining weekly allocation evenly across strictly
    /// future days. Past days and today keep their actuals untouched; there
    /// is no per-day floor.
    pub fn rebalance_week(&self, today: NaiveDate, remaining_tasks: &[Task]) -> Result<()> {
        let mut budget = self.load_or_create_week(today)?;

        let future_days: Vec<NaiveDate> = budget
            .daily_allocations
            .keys()
            .copied()
            .filter(|d| *d > today)
            .collect();

        if future_days.is_empty() {
            return Ok(());
        }

        let backlog_tokens: u64 = remaining_tasks.iter().map(|t| t.estimated_tokens).sum();
        let per_day = derive_remaining_week(&budget) / future_days.len() as f64;
        debug!(
            "Rebalancing {} future days at {per_day:.1}% each ({backlog_tokens} tokens backlogged)",
            future_days.len()
        );

        for day in future_days {
            if let Some(alloc) = budget.daily_allocations.get_mut(&day) {
                alloc.planned_percent = per_day;
            }
        }

        self.save_weekly(&budget)
    }

    // Cost models

    /// EMA update (0.7 old / 0.3 new) for the task's category.
    pub fn update_cost_model(&self, task_name: &str, tokens_used: u64) -> Result<()> {
        let mut models = self.load_cost_models();
        let category = category_of(task_name);

        let entry = models.entry(category.to_string()).or_default();
        if entry.samples == 0 {
            entry.avg_tokens = tokens_used;
        } else {
            entry.avg_tokens =
                (0.7 * entry.avg_tokens as f64 + 0.3 * tokens_used as f64) as u64;
        }
        entry.samples += 1;

        fs::create_dir_all(&self.state_dir)?;
        write_json_atomic(&self.models_path(), &models)?;
        Ok(())
    }

    pub fn load_cost_models(&self) -> BTreeMap<String, CostModel> {
        fs::read_to_string(self.models_path())
            .ok()
            .and_then(|content| serde_json::from_str(&content).ok())
            .unwrap_or_default()
    }

    /// Learned estimate for a task's category, or the supplied default.
    pub fn estimated_cost(&self, task_name: &str, default: u64) -> u64 {
        self.load_cost_models()
            .get(category_of(task_name))
            .map(|m| m.avg_tokens)
            .unwrap_or(default)
    }

    // Session overlay

    /// Snapshot today's planned allocation into a new session.
    pub fn start_session(&self, today: NaiveDate) -> Result<SessionBudget> {
        let session = SessionBudget {
            session_id: Utc::now().format("session-%Y%m%d-%H%M%S").to_string(),
            started_at: Utc::now(),
            daily_allocation: self.today_allocation(today)?,
            used_percent: 0.0,
            tasks_executed: Vec::new(),
        };
        fs::create_dir_all(&self.state_dir)?;
        write_json_atomic(&self.session_path(), &session)?;
        Ok(session)
    }

    pub fn load_session(&self) -> Option<SessionBudget> {
        fs::read_to_string(self.session_path())
            .ok()
            .and_then(|content| serde_json::from_str(&content).ok())
    }

    pub fn update_session(&self, task_name: &str, percent_used: f64) -> Result<()> {
        let Some(mut session) = self.load_session() else {
            return Ok(());
        };
        session.used_percent += percent_used;
        session.tasks_executed.push(SessionEntry {
            name: task_name.to_string(),
            percent: percent_used,
            timestamp: Utc::now(),
        });
        write_json_atomic(&self.session_path(), &session)?;
        Ok(())
    }

    /// Advisory: does the estimate fit the session's remaining allocation?
    /// With no session tracked, everything fits.
    pub fn check_session_budget(&self, estimated_percent: f64) -> bool {
        match self.load_session() {
            None => true,
            Some(session) => {
                estimated_percent <= session.daily_allocation - session.used_percent
            }
        }
    }

    pub fn week_summary(&self, today: NaiveDate) -> Result<WeekSummary> {
        let budget = self.load_or_create_week(today)?;

        let total_planned = budget
            .daily_allocations
            .values()
            .map(|a| a.planned_percent)
            .sum();
        let total_used = budget
            .daily_allocations
            .values()
            .map(|a| a.actual_percent)
            .sum();
        let days_remaining = budget
            .daily_allocations
            .keys()
            .filter(|d| **d >= today)
            .count();

        Ok(WeekSummary {
            week_start: budget.week_start,
            total_planned,
            total_used,
            user_directed_used: budget.user_directed_used,
            reserve: budget.reserve_percent,
            remaining_week: derive_remaining_week(&budget),
            remaining_today: budget
                .daily_allocations
                .get(&today)
                .map(|a| (a.planned_percent - a.actual_percent).max(0.0))
                .unwrap_or(0.0),
            days_remaining,
        })
    }
}

fn derive_remaining_week(budget: &WeeklyBudget) -> f64 {
    let total_used: f64 = budget
        .daily_allocations
        .values()
        .map(|a| a.actual_percent)
        .sum();
    let available = budget.weekly_limit_percent - budget.reserve_percent;
    (available - total_used - budget.user_directed_used).max(0.0)
}

fn category_of(task_name: &str) -> &str {
    task_name.split('-').next().unwrap_or(task_name)
}

fn weekday_name(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "monday",
        Weekday::Tue => "tuesday",
        Weekday::Wed => "wednesday",
        Weekday::Thu => "thursday",
        Weekday::Fri => "friday",
        Weekday::Sat => "saturday",
        Weekday::Sun => "sunday",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn tracker() -> (BudgetTracker, TempDir) {
        let temp = TempDir::new().unwrap();
        let tracker = BudgetTracker::new(temp.path(), BudgetConfig::default());
        (tracker, temp)
    }

    fn a_wednesday() -> NaiveDate {
        // 2026-08-26 is a Wednesday
        NaiveDate::from_ymd_opt(2026, 8, 26).unwrap()
    }

    #[test]
    fn test_week_start_is_monday() {
        let monday = NaiveDate::from_ymd_opt(2026, 8, 24).unwrap();
        assert_eq!(week_start(a_wednesday()), monday);
        assert_eq!(week_start(monday), monday);
        // Sunday still anchors to the preceding Monday
        let sunday = NaiveDate::from_ymd_opt(2026, 8, 30).unwrap();
        assert_eq!(week_start(sunday), monday);
    }

    #[test]
    fn test_fresh_week_default_allocations() {
        let (tracker, _temp) = tracker();
        let budget = tracker.load_or_create_week(a_wednesday()).unwrap();

        assert_eq!(budget.daily_allocations.len(), 7);
        let monday = week_start(a_wednesday());
        assert_eq!(
            budget.daily_allocations[&monday].planned_percent,
            15.0
        );
        let friday = monday + Duration::days(4);
        assert_eq!(budget.daily_allocations[&friday].planned_percent, 10.0);
    }

    #[test]
    fn test_config_overrides_daily_allocation() {
        let temp = TempDir::new().unwrap();
        let mut config = BudgetConfig::default();
        config.daily_allocations.insert("wednesday".to_string(), 25.0);
        let tracker = BudgetTracker::new(temp.path(), config);

        let budget = tracker.load_or_create_week(a_wednesday()).unwrap();
        assert_eq!(
            budget.daily_allocations[&a_wednesday()].planned_percent,
            25.0
        );
    }

    #[test]
    fn test_stale_week_superseded() {
        let (tracker, _temp) = tracker();
        let last_week = a_wednesday() - Duration::days(7);
        let old = tracker.load_or_create_week(last_week).unwrap();
        assert_eq!(old.week_start, week_start(last_week));

        let fresh = tracker.load_or_create_week(a_wednesday()).unwrap();
        assert_eq!(fresh.week_start, week_start(a_wednesday()));
        assert_eq!(fresh.user_directed_used, 0.0);
    }

    #[test]
    fn test_corrupt_ledger_replaced() {
        let (tracker, temp) = tracker();
        fs::create_dir_all(temp.path()).unwrap();
        fs::write(temp.path().join(WEEKLY_BUDGET_FILE), "{broken").unwrap();

        let budget = tracker.load_or_create_week(a_wednesday()).unwrap();
        assert_eq!(budget.week_start, week_start(a_wednesday()));
    }

    #[test]
    fn test_record_usage_updates_day_and_model() {
        let (tracker, _temp) = tracker();
        let today = a_wednesday();

        tracker.record_usage(today, "brain-triage", 40_000, 8.0).unwrap();

        let budget = tracker.load_or_create_week(today).unwrap();
        let alloc = &budget.daily_allocations[&today];
        assert_eq!(alloc.actual_percent, 8.0);
        assert_eq!(alloc.tasks_completed.len(), 1);
        assert_eq!(alloc.tasks_completed[0].name, "brain-triage");

        assert_eq!(tracker.estimated_cost("brain-anything", 1), 40_000);
    }

    #[test]
    fn test_remaining_today_clamps_at_zero() {
        let (tracker, _temp) = tracker();
        let today = a_wednesday();

        // Overshoot the 15% plan
        tracker.record_usage(today, "big-one", 200_000, 40.0).unwrap();
        assert_eq!(tracker.remaining_today(today).unwrap(), 0.0);
    }

    #[test]
    fn test_remaining_week_never_negative() {
        let (tracker, _temp) = tracker();
        let today = a_wednesday();

        tracker.record_usage(today, "t", 1, 80.0).unwrap();
        tracker.record_user_directed(today, 50.0).unwrap();
        assert_eq!(tracker.remaining_week(today).unwrap(), 0.0);
    }

    #[test]
    fn test_remaining_week_accounts_for_reserve() {
        let (tracker, _temp) = tracker();
        // 100 limit - 10 reserve, nothing used yet
        assert_eq!(tracker.remaining_week(a_wednesday()).unwrap(), 90.0);
    }

    #[test]
    fn test_rebalance_touches_only_future_days() {
        let (tracker, _temp) = tracker();
        let today = a_wednesday();

        tracker.record_usage(today, "t", 1, 5.0).unwrap();
        tracker.rebalance_week(today, &[]).unwrap();

        let budget = tracker.load_or_create_week(today).unwrap();
        // Today keeps its original plan and actuals
        let today_alloc = &budget.daily_allocations[&today];
        assert_eq!(today_alloc.planned_percent, 15.0);
        assert_eq!(today_alloc.actual_percent, 5.0);

        // Thu-Sun (4 future days) split the remaining 85% evenly
        let thursday = today + Duration::days(1);
        let expected = 85.0 / 4.0;
        assert!((budget.daily_allocations[&thursday].planned_percent - expected).abs() < 1e-9);

        // Monday (past) untouched
        let monday = week_start(today);
        assert_eq!(budget.daily_allocations[&monday].planned_percent, 15.0);
    }

    #[test]
    fn test_rebalance_on_sunday_is_noop() {
        let (tracker, _temp) = tracker();
        let sunday = NaiveDate::from_ymd_opt(2026, 8, 30).unwrap();
        tracker.rebalance_week(sunday, &[]).unwrap();
        let budget = tracker.load_or_create_week(sunday).unwrap();
        assert_eq!(budget.daily_allocations[&sunday].planned_percent, 10.0);
    }

    #[test]
    fn test_cost_model_ema() {
        let (tracker, _temp) = tracker();
        tracker.update_cost_model("brain-a", 10_000).unwrap();
        tracker.update_cost_model("brain-b", 20_000).unwrap();

        // 0.7 * 10000 + 0.3 * 20000 = 13000
        assert_eq!(tracker.estimated_cost("brain-x", 0), 13_000);
        let models = tracker.load_cost_models();
        assert_eq!(models["brain"].samples, 2);
    }

    #[test]
    fn test_estimated_cost_default_for_unknown_category() {
        let (tracker, _temp) = tracker();
        assert_eq!(tracker.estimated_cost("mystery-task", 42_000), 42_000);
    }

    #[test]
    fn test_session_lifecycle() {
        let (tracker, _temp) = tracker();
        let today = a_wednesday();

        let session = tracker.start_session(today).unwrap();
        assert_eq!(session.daily_allocation, 15.0);
        assert_eq!(session.used_percent, 0.0);

        tracker.update_session("brain-triage", 6.0).unwrap();
        let session = tracker.load_session().unwrap();
        assert_eq!(session.used_percent, 6.0);
        assert_eq!(session.tasks_executed.len(), 1);

        assert!(tracker.check_session_budget(9.0));
        assert!(!tracker.check_session_budget(9.1));
    }

    #[test]
    fn test_no_session_allows_everything() {
        let (tracker, _temp) = tracker();
        assert!(tracker.check_session_budget(1000.0));
    }

    #[test]
    fn test_week_summary() {
        let (tracker, _temp) = tracker();
        let today = a_wednesday();
        tracker.record_usage(today, "t", 1, 5.0).unwrap();

        let summary = tracker.week_summary(today).unwrap();
        assert_eq!(summary.week_start, week_start(today));
        assert_eq!(summary.total_planned, 90.0); // 4*15 + 3*10
        assert_eq!(summary.total_used, 5.0);
        assert_eq!(summary.remaining_today, 10.0);
        assert_eq!(summary.remaining_week, 85.0);
        assert_eq!(summary.days_remaining, 5); // Wed..Sun
    }

    #[test]
    fn test_ledger_persists_across_trackers() {
        let temp = TempDir::new().unwrap();
        let today = a_wednesday();
        {
            let tracker = BudgetTracker::new(temp.path(), BudgetConfig::default());
            tracker.record_usage(today, "t", 100, 3.0).unwrap();
        }
        let tracker = BudgetTracker::new(temp.path(), BudgetConfig::default());
        let budget = tracker.load_or_create_week(today).unwrap();
        assert_eq!(budget.daily_allocations[&today].actual_percent, 3.0);
    }
}
