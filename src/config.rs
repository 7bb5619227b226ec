//! Configuration for taskbridge.
//!
//! Everything is a typed struct passed explicitly to component constructors;
//! there are no process-wide path globals. Values with an enumerated or
//! parseable valid set are checked in [`Config::validate`] and fail loudly.

use crate::error::{BridgeError, Result as BridgeResult};
use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: Option<String>,
    pub store: StoreConfig,
    pub watcher: WatcherConfig,
    pub concurrency: ConcurrencyConfig,
    pub schedule: ScheduleConfig,
    pub budget: BudgetConfig,
    pub executor: ExecutorConfig,
    pub projects: Vec<ProjectConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Root directory holding queue/, processing/, responses/, etc.
    pub root: PathBuf,
    /// Days to retain archived task files before purge
    pub archive_retention_days: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".taskbridge"),
            archive_retention_days: 7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    /// Whether to attempt a push-based filesystem watch
    pub push_enabled: bool,
    /// Poll interval when polling is the primary detection path
    pub poll_interval_ms: u64,
    /// Poll interval while the push watch is believed healthy
    pub fallback_poll_ms: u64,
    /// Seconds between push-watch health checks
    pub health_check_interval_secs: u64,
    /// Seconds without a push event (with files pending) before the watch
    /// is presumed stalled
    pub stall_threshold_secs: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            push_enabled: true,
            poll_interval_ms: 500,
            fallback_poll_ms: 2000,
            health_check_interval_secs: 10,
            stall_threshold_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    /// Ceiling on simultaneously claimed tasks; also the worker pool size
    pub max_concurrent: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self { max_concurrent: 5 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Time-of-day windows, "HH:MM" 24h format
    pub autonomous_start: String,
    pub autonomous_end: String,
    pub briefing_time: String,
    pub reserved_start: String,
    pub reserved_end: String,

    /// Budget allocation per phase, fraction of the daily allocation
    pub budget_autonomous: f64,
    pub budget_briefing: f64,
    pub budget_buffer: f64,

    /// Priority weights (percent scale, 100 = full weight)
    pub weight_user_priority: f64,
    pub weight_urgency: f64,
    pub weight_cost_efficiency: f64,
    pub weight_project_boost: f64,
    pub weight_dependency_penalty: f64,

    /// Confidence thresholds, ordered proceed > review > question
    pub confidence_auto_proceed: u8,
    pub confidence_review_threshold: u8,
    pub confidence_question_threshold: u8,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            autonomous_start: "08:00".to_string(),
            autonomous_end: "14:00".to_string(),
            briefing_time: "14:00".to_string(),
            reserved_start: "20:00".to_string(),
            reserved_end: "08:00".to_string(),
            budget_autonomous: 0.80,
            budget_briefing: 0.08,
            budget_buffer: 0.12,
            weight_user_priority: 100.0,
            weight_urgency: 50.0,
            weight_cost_efficiency: 30.0,
            weight_project_boost: 20.0,
            weight_dependency_penalty: 10.0,
            confidence_auto_proceed: 90,
            confidence_review_threshold: 70,
            confidence_question_threshold: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    pub weekly_limit_percent: f64,
    /// Carved out for user-directed work, never planned
    pub reserve_percent: f64,
    /// Optional per-weekday overrides, keyed "monday".."sunday"
    pub daily_allocations: HashMap<String, f64>,
    /// Conversion used by the planner: tokens per budget percent
    pub tokens_per_percent: u64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            weekly_limit_percent: 100.0,
            reserve_percent: 10.0,
            daily_allocations: HashMap::new(),
            tokens_per_percent: 5000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// External CLI invoked per task
    pub command: String,
    /// Working directory for the subprocess; defaults to the store root
    pub workdir: Option<PathBuf>,
    /// Tools allowed in read-only mode
    pub read_only_tools: String,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            command: "claude".to_string(),
            workdir: None,
            read_only_tools: "Read,Glob,Grep,WebSearch,WebFetch".to_string(),
        }
    }
}

/// A producer project contributing tasks to the backlog.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    pub path: PathBuf,
    pub name: String,
    pub boost: i64,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::new(),
            name: String::new(),
            boost: 0,
        }
    }
}

impl ProjectConfig {
    /// Derive a project name from its path when none is configured.
    pub fn effective_name(&self) -> String {
        if !self.name.is_empty() {
            return self.name.clone();
        }
        self.path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("default")
            .to_string()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: Some("info".to_string()),
            store: StoreConfig::default(),
            watcher: WatcherConfig::default(),
            concurrency: ConcurrencyConfig::default(),
            schedule: ScheduleConfig::default(),
            budget: BudgetConfig::default(),
            executor: ExecutorConfig::default(),
            projects: Vec::new(),
        }
    }
}

const VALID_WEEKDAYS: &[&str] = &[
    "monday",
    "tuesday",
    "wednesday",
    "thursday",
    "friday",
    "saturday",
    "sunday",
];

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path)
                .context(format!("Failed to load config from {}", path.display()));
        }

        // Try primary location: ~/.config/<project>/<project>.yml
        if let Some(config_dir) = dirs::config_dir() {
            let project_name = env!("CARGO_PKG_NAME");
            let primary_config = config_dir
                .join(project_name)
                .join(format!("{}.yml", project_name));
            if primary_config.exists() {
                return Self::load_from_file(&primary_config)
                    .context(format!("Failed to load config from {}", primary_config.display()));
            }
        }

        // Try fallback location: ./<project>.yml
        let project_name = env!("CARGO_PKG_NAME");
        let fallback_config = PathBuf::from(format!("{}.yml", project_name));
        if fallback_config.exists() {
            return Self::load_from_file(&fallback_config)
                .context(format!("Failed to load config from {}", fallback_config.display()));
        }

        // No config file found, use defaults
        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self =
            serde_yaml::from_str(&content).context("Failed to parse config file")?;

        config.validate().context("Invalid configuration")?;

        log::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Check parseable and enumerated values; a bad config refuses to load
    /// rather than degrading to a default.
    pub fn validate(&self) -> BridgeResult<()> {
        for time in [
            &self.schedule.autonomous_start,
            &self.schedule.autonomous_end,
            &self.schedule.briefing_time,
            &self.schedule.reserved_start,
            &self.schedule.reserved_end,
        ] {
            parse_hhmm(time)?;
        }

        for fraction in [
            self.schedule.budget_autonomous,
            self.schedule.budget_briefing,
            self.schedule.budget_buffer,
        ] {
            if !(0.0..=1.0).contains(&fraction) {
                return Err(BridgeError::Yaml(format!(
                    "phase budget fraction {fraction} outside 0.0-1.0"
                )));
            }
        }

        if self.budget.reserve_percent >= self.budget.weekly_limit_percent {
            return Err(BridgeError::Yaml(format!(
                "reserve {}% swallows the weekly limit {}%",
                self.budget.reserve_percent, self.budget.weekly_limit_percent
            )));
        }

        for day in self.budget.daily_allocations.keys() {
            if !VALID_WEEKDAYS.contains(&day.as_str()) {
                return Err(BridgeError::Yaml(format!("unknown weekday: {day:?}")));
            }
        }

        if self.concurrency.max_concurrent == 0 {
            return Err(BridgeError::Yaml("max_concurrent must be at least 1".to_string()));
        }

        let s = &self.schedule;
        if !(s.confidence_question_threshold <= s.confidence_review_threshold
            && s.confidence_review_threshold <= s.confidence_auto_proceed)
        {
            return Err(BridgeError::Yaml(
                "confidence thresholds must be ordered question <= review <= proceed".to_string(),
            ));
        }

        Ok(())
    }
}

/// Parse "HH:MM" into minutes since midnight.
pub fn parse_hhmm(s: &str) -> BridgeResult<u16> {
    let (h, m) = s
        .split_once(':')
        .ok_or_else(|| BridgeError::Yaml(format!("invalid time {s:?}, expected HH:MM")))?;
    let hours: u16 = h
        .parse()
        .map_err(|_| BridgeError::Yaml(format!("invalid time {s:?}")))?;
    let minutes: u16 = m
        .parse()
        .map_err(|_| BridgeError::Yaml(format!("invalid time {s:?}")))?;
    if hours > 23 || minutes > 59 {
        return Err(BridgeError::Yaml(format!("invalid time {s:?}")));
    }
    Ok(hours * 60 + minutes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn test_parse_hhmm() {
        assert_eq!(parse_hhmm("08:00").unwrap(), 480);
        assert_eq!(parse_hhmm("23:59").unwrap(), 1439);
        assert_eq!(parse_hhmm("00:00").unwrap(), 0);
    }

    #[test]
    fn test_parse_hhmm_rejects_garbage() {
        assert!(parse_hhmm("8am").is_err());
        assert!(parse_hhmm("24:00").is_err());
        assert!(parse_hhmm("12:60").is_err());
        assert!(parse_hhmm("").is_err());
    }

    #[test]
    fn test_validate_rejects_bad_window_time() {
        let mut config = Config::default();
        config.schedule.autonomous_start = "sunrise".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_fraction() {
        let mut config = Config::default();
        config.schedule.budget_autonomous = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_reserve_over_limit() {
        let mut config = Config::default();
        config.budget.reserve_percent = 100.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unknown_weekday() {
        let mut config = Config::default();
        config.budget.daily_allocations.insert("funday".to_string(), 15.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let mut config = Config::default();
        config.concurrency.max_concurrent = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unordered_confidence() {
        let mut config = Config::default();
        config.schedule.confidence_question_threshold = 95;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_yaml_round_trip() {
        let config = Config::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let back: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back.concurrency.max_concurrent, 5);
        assert_eq!(back.watcher.poll_interval_ms, 500);
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let yaml = "concurrency:\n  max_concurrent: 2\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.concurrency.max_concurrent, 2);
        assert_eq!(config.watcher.poll_interval_ms, 500);
        assert_eq!(config.schedule.autonomous_start, "08:00");
    }

    #[test]
    fn test_project_effective_name() {
        let project = ProjectConfig {
            path: PathBuf::from("/home/u/brain/tasks"),
            name: String::new(),
            boost: 5,
        };
        assert_eq!(project.effective_name(), "tasks");

        let named = ProjectConfig {
            path: PathBuf::from("/x"),
            name: "brain".to_string(),
            boost: 0,
        };
        assert_eq!(named.effective_name(), "brain");
    }
}
