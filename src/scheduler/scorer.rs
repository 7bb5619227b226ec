//! Five-factor priority scorer. Higher score runs sooner.

use crate::budget::Capacity;
use crate::config::{BudgetConfig, ProjectConfig, ScheduleConfig};
use crate::task::Task;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

const URGENCY_OVERDUE: f64 = 100.0;
const URGENCY_UNDER_4H: f64 = 90.0;
const URGENCY_UNDER_24H: f64 = 70.0;
const URGENCY_UNDER_7D: f64 = 50.0;
const URGENCY_DISTANT: f64 = 20.0;
const URGENCY_NO_DEADLINE: f64 = 30.0;

/// Tasks whose cost exceeds available capacity are pushed to the back of
/// the ranking rather than dropped.
const COST_DEFER: f64 = -100.0;
const COST_UNKNOWN_CAPACITY: f64 = 50.0;

const UNMET_DEPENDENCY_PENALTY: f64 = 10.0;

pub struct Scorer {
    weight_user_priority: f64,
    weight_urgency: f64,
    weight_cost_efficiency: f64,
    weight_project_boost: f64,
    weight_dependency_penalty: f64,
    tokens_per_percent: u64,
    boosts: HashMap<String, i64>,
}

impl Scorer {
    pub fn new(
        schedule: &ScheduleConfig,
        budget: &BudgetConfig,
        projects: &[ProjectConfig],
    ) -> Self {
        let boosts = projects
            .iter()
            .map(|p| (p.effective_name(), p.boost))
            .collect();

        Self {
            weight_user_priority: schedule.weight_user_priority,
            weight_urgency: schedule.weight_urgency,
            weight_cost_efficiency: schedule.weight_cost_efficiency,
            weight_project_boost: schedule.weight_project_boost,
            weight_dependency_penalty: schedule.weight_dependency_penalty,
            tokens_per_percent: budget.tokens_per_percent,
            boosts,
        }
    }

    /// Score one task. `pending` is the set of not-yet-completed task names
    /// used for dependency resolution; a dependency absent from it counts as
    /// externally satisfied.
    pub fn score(
        &self,
        task: &Task,
        capacity: Option<&Capacity>,
        pending: &HashSet<String>,
        now: DateTime<Utc>,
    ) -> f64 {
        let mut score = 0.0;

        // 1. User priority, inverted so priority 1 contributes the most
        let priority_term = f64::from(11 - task.priority.min(10)) * 10.0;
        score += priority_term * (self.weight_user_priority / 100.0);

        // 2. Deadline proximity
        score += urgency_term(task.deadline, now) * (self.weight_urgency / 100.0);

        // 3. Cost efficiency against live capacity
        score += self.cost_term(task.estimated_tokens, capacity)
            * (self.weight_cost_efficiency / 100.0);

        // 4. Project boost
        let boost = if task.project_boost != 0 {
            task.project_boost
        } else {
            self.boosts.get(&task.project).copied().unwrap_or(0)
        };
        score += boost as f64 * (self.weight_project_boost / 100.0);

        // 5. Unmet dependencies
        let unmet = task
            .depends_on
            .iter()
            .filter(|dep| pending.contains(*dep) && **dep != task.name)
            .count();
        score -= unmet as f64 * UNMET_DEPENDENCY_PENALTY
            * (self.weight_dependency_penalty / 100.0);

        score
    }

    /// Unweighted cost-efficiency term. A task that cannot fit in the
    /// available capacity gets the defer value no matter its other factors;
    /// tasks that fit are rewarded for packing the window tightly.
    pub fn cost_term(&self, estimated_tokens: u64, capacity: Option<&Capacity>) -> f64 {
        let Some(capacity) = capacity else {
            return COST_UNKNOWN_CAPACITY;
        };

        let available_tokens =
            capacity.available_percent() * self.tokens_per_percent as f64;
        if estimated_tokens as f64 > available_tokens {
            return COST_DEFER;
        }

        let ratio = if available_tokens > 0.0 {
            estimated_tokens as f64 / available_tokens
        } else {
            1.0
        };
        if ratio > 0.9 {
            80.0
        } else if ratio >= 0.5 {
            50.0
        } else {
            20.0
        }
    }

    /// Rank descending by score. The sort is stable so equal scores keep
    /// their insertion order and runs are deterministic.
    pub fn rank(
        &self,
        tasks: &[Task],
        capacity: Option<&Capacity>,
        pending: &HashSet<String>,
        now: DateTime<Utc>,
    ) -> Vec<(Task, f64)> {
        let mut scored: Vec<(Task, f64)> = tasks
            .iter()
            .map(|t| (t.clone(), self.score(t, capacity, pending, now)))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
        scored
    }
}

fn urgency_term(deadline: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f64 {
    let Some(deadline) = deadline else {
        return URGENCY_NO_DEADLINE;
    };

    let remaining = deadline - now;
    if remaining <= chrono::Duration::zero() {
        URGENCY_OVERDUE
    } else if remaining < chrono::Duration::hours(4) {
        URGENCY_UNDER_4H
    } else if remaining < chrono::Duration::hours(24) {
        URGENCY_UNDER_24H
    } else if remaining < chrono::Duration::days(7) {
        URGENCY_UNDER_7D
    } else {
        URGENCY_DISTANT
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn scorer() -> Scorer {
        Scorer::new(
            &ScheduleConfig::default(),
            &BudgetConfig::default(),
            &[],
        )
    }

    fn task(name: &str, priority: u8) -> Task {
        let mut t = Task::new(format!("id-{name}"), name);
        t.priority = priority;
        t
    }

    fn full_capacity() -> Capacity {
        // 100% available; at 5000 tokens per percent that is 500k tokens
        Capacity::unconstrained()
    }

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    #[test]
    fn test_urgency_tiers_are_monotonic() {
        let n = now();
        let tiers = [
            urgency_term(Some(n - Duration::hours(1)), n),
            urgency_term(Some(n + Duration::hours(2)), n),
            urgency_term(Some(n + Duration::hours(12)), n),
            urgency_term(Some(n + Duration::days(3)), n),
            urgency_term(Some(n + Duration::days(30)), n),
        ];
        for pair in tiers.windows(2) {
            assert!(pair[0] > pair[1], "urgency tiers must strictly decrease");
        }
    }

    #[test]
    fn test_no_deadline_is_specific_neutral_tier() {
        let n = now();
        let neutral = urgency_term(None, n);
        assert!(neutral > URGENCY_DISTANT);
        assert!(neutral < URGENCY_UNDER_7D);
    }

    #[test]
    fn test_overdue_outranks_any_non_overdue_at_equal_priority() {
        let s = scorer();
        let n = now();
        let pending = HashSet::new();

        let mut overdue = task("overdue", 5);
        overdue.deadline = Some(n - Duration::minutes(1));
        let mut soon = task("soon", 5);
        soon.deadline = Some(n + Duration::minutes(5));

        let cap = full_capacity();
        assert!(
            s.score(&overdue, Some(&cap), &pending, n)
                > s.score(&soon, Some(&cap), &pending, n)
        );
    }

    #[test]
    fn test_scenario_high_priority_near_deadline_ranks_first() {
        let s = scorer();
        let n = now();
        let pending = HashSet::new();

        let mut high = task("review-code", 3);
        high.estimated_tokens = 30_000;
        high.deadline = Some(n + Duration::hours(2));

        let mut medium = task("write-docs", 5);
        medium.estimated_tokens = 120_000;
        medium.deadline = Some(n + Duration::hours(6));

        let cap = full_capacity();
        let ranked = s.rank(&[medium, high], Some(&cap), &pending, n);
        assert_eq!(ranked[0].0.name, "review-code");
    }

    #[test]
    fn test_over_capacity_gets_defer_penalty_regardless_of_priority() {
        let s = scorer();
        // 500k tokens available, 800k estimated
        let cap = full_capacity();
        assert_eq!(s.cost_term(800_000, Some(&cap)), COST_DEFER);

        let n = now();
        let pending = HashSet::new();
        let mut urgent = task("huge-urgent", 1);
        urgent.estimated_tokens = 800_000;
        let mut relaxed = task("huge-relaxed", 9);
        relaxed.estimated_tokens = 800_000;

        // Both carry the full defer term; priority still separates them
        let urgent_score = s.score(&urgent, Some(&cap), &pending, n);
        let relaxed_score = s.score(&relaxed, Some(&cap), &pending, n);
        let baseline = s.score(&task("huge-urgent", 1), Some(&cap), &pending, n);
        assert_eq!(urgent_score, baseline);
        assert!(urgent_score > relaxed_score);

        // And the defer term drags either below a small task of equal priority
        let mut small = task("small", 9);
        small.estimated_tokens = 10_000;
        assert!(s.score(&small, Some(&cap), &pending, n) > relaxed_score);
    }

    #[test]
    fn test_three_unmet_dependencies_rank_strictly_last() {
        let s = scorer();
        let n = now();

        let free_a = task("free-a", 5);
        let free_b = task("free-b", 5);
        let mut blocked = task("blocked", 5);
        blocked.depends_on =
            vec!["dep-1".to_string(), "dep-2".to_string(), "dep-3".to_string()];

        let pending: HashSet<String> =
            ["dep-1", "dep-2", "dep-3"].iter().map(|s| s.to_string()).collect();

        let cap = full_capacity();
        let ranked = s.rank(&[blocked, free_a, free_b], Some(&cap), &pending, n);
        assert_eq!(ranked[2].0.name, "blocked");
        assert!(ranked[2].1 < ranked[0].1);
        assert!(ranked[2].1 < ranked[1].1);
    }

    #[test]
    fn test_absent_dependency_counts_as_satisfied() {
        let s = scorer();
        let n = now();
        let pending = HashSet::new();

        let mut external = task("external-dep", 5);
        external.depends_on = vec!["finished-elsewhere".to_string()];
        let plain = task("plain", 5);

        let cap = full_capacity();
        assert_eq!(
            s.score(&external, Some(&cap), &pending, n),
            s.score(&plain, Some(&cap), &pending, n)
        );
    }

    #[test]
    fn test_unknown_capacity_is_neutral() {
        let s = scorer();
        assert_eq!(s.cost_term(800_000, None), COST_UNKNOWN_CAPACITY);
    }

    #[test]
    fn test_tight_packing_rewarded_over_waste() {
        let s = scorer();
        let cap = full_capacity();
        // 500k available: 480k packs tightly, 300k is moderate, 50k is loose
        assert_eq!(s.cost_term(480_000, Some(&cap)), 80.0);
        assert_eq!(s.cost_term(300_000, Some(&cap)), 50.0);
        assert_eq!(s.cost_term(50_000, Some(&cap)), 20.0);
    }

    #[test]
    fn test_project_boost_from_table() {
        let projects = vec![ProjectConfig {
            path: "/tmp/brain".into(),
            name: "brain".to_string(),
            boost: 50,
        }];
        let s = Scorer::new(&ScheduleConfig::default(), &BudgetConfig::default(), &projects);

        let n = now();
        let pending = HashSet::new();
        let mut boosted = task("boosted", 5);
        boosted.project = "brain".to_string();
        let plain = task("plain", 5);

        let diff = s.score(&boosted, None, &pending, n) - s.score(&plain, None, &pending, n);
        // 50 boost at weight 20 contributes 10 points
        assert_eq!(diff, 10.0);
    }

    #[test]
    fn test_equal_scores_keep_insertion_order() {
        let s = scorer();
        let n = now();
        let pending = HashSet::new();

        let first = task("first", 5);
        let second = task("second", 5);
        let ranked = s.rank(&[first, second], None, &pending, n);
        assert_eq!(ranked[0].0.name, "first");
        assert_eq!(ranked[1].0.name, "second");
    }
}
