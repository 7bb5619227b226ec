//! Multi-project backlog with dependency resolution.
//!
//! Producers keep human-authored task files under `<project>/pending/`;
//! finished ones move to `<project>/completed/`. The backlog loads both
//! sides so the scorer can tell an unmet dependency (still pending) from a
//! satisfied one.
//!
//! A dependency name found nowhere is treated as externally satisfied --
//! calendar events and other systems are a documented producer convention --
//! but logged at debug level so typos stay observable.

use crate::config::ProjectConfig;
use crate::error::Result;
use crate::task::{parse_task_file, Task};
use log::{debug, warn};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;

#[derive(Debug, Default)]
pub struct Backlog {
    tasks: Vec<Task>,
    completed_names: HashSet<String>,
}

#[derive(Debug, Clone)]
pub struct BacklogSummary {
    pub total: usize,
    pub runnable: usize,
    pub blocked: usize,
    pub completed: usize,
    pub total_tokens: u64,
    pub runnable_tokens: u64,
    pub by_project: BTreeMap<String, usize>,
}

impl Backlog {
    /// Load pending tasks and completed names from every configured project.
    /// Files that fail validation are skipped with a warning, never coerced.
    pub fn load(projects: &[ProjectConfig]) -> Result<Self> {
        let mut backlog = Self::default();

        for project in projects {
            let name = project.effective_name();

            for path in markdown_files(&project.path.join("completed")) {
                match parse_task_file(&path) {
                    Ok(task) => {
                        backlog.completed_names.insert(task.name);
                    }
                    Err(e) => debug!("Skipping completed file {}: {}", path.display(), e),
                }
            }

            for path in markdown_files(&project.path.join("pending")) {
                match parse_task_file(&path) {
                    Ok(mut task) => {
                        task.project = name.clone();
                        task.project_boost = project.boost;
                        backlog.tasks.push(task);
                    }
                    Err(e) => warn!("Rejecting task file {}: {}", path.display(), e),
                }
            }
        }

        Ok(backlog)
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn completed_names(&self) -> &HashSet<String> {
        &self.completed_names
    }

    /// Names of all still-pending tasks; a dependency on any of these is
    /// unmet.
    pub fn pending_names(&self) -> HashSet<String> {
        self.tasks.iter().map(|t| t.name.clone()).collect()
    }

    /// Whether every dependency of `task` is satisfied.
    pub fn dependencies_met(&self, task: &Task) -> bool {
        self.unmet_dependencies(task).is_empty()
    }

    /// Dependencies still present in the pending set.
    pub fn unmet_dependencies(&self, task: &Task) -> Vec<String> {
        let pending = self.pending_names();
        let mut unmet = Vec::new();

        for dep in &task.depends_on {
            if pending.contains(dep) && dep != &task.name {
                unmet.push(dep.clone());
            } else if !self.completed_names.contains(dep) {
                debug!(
                    "Task {}: dependency {:?} not found anywhere, assuming external",
                    task.name, dep
                );
            }
        }

        unmet
    }

    pub fn runnable(&self) -> Vec<&Task> {
        self.tasks
            .iter()
            .filter(|t| self.dependencies_met(t))
            .collect()
    }

    pub fn blocked(&self) -> Vec<&Task> {
        self.tasks
            .iter()
            .filter(|t| !self.dependencies_met(t))
            .collect()
    }

    pub fn summary(&self) -> BacklogSummary {
        let runnable = self.runnable();
        let mut by_project = BTreeMap::new();
        for task in &self.tasks {
            *by_project.entry(task.project.clone()).or_insert(0) += 1;
        }

        BacklogSummary {
            total: self.tasks.len(),
            runnable: runnable.len(),
            blocked: self.tasks.len() - runnable.len(),
            completed: self.completed_names.len(),
            total_tokens: self.tasks.iter().map(|t| t.estimated_tokens).sum(),
            runnable_tokens: runnable.iter().map(|t| t.estimated_tokens).sum(),
            by_project,
        }
    }

    #[cfg(test)]
    pub fn from_tasks(tasks: Vec<Task>, completed: &[&str]) -> Self {
        Self {
            tasks,
            completed_names: completed.iter().map(|s| s.to_string()).collect(),
        }
    }
}

fn markdown_files(dir: &Path) -> Vec<std::path::PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<_> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("md"))
        .collect();
    files.sort();
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn write_task(dir: &Path, name: &str, front: &str) {
        fs::create_dir_all(dir).unwrap();
        let content = format!("---\n{front}---\nbody\n");
        fs::write(dir.join(format!("{name}.md")), content).unwrap();
    }

    fn project(temp: &TempDir, boost: i64) -> ProjectConfig {
        ProjectConfig {
            path: temp.path().to_path_buf(),
            name: "brain".to_string(),
            boost,
        }
    }

    #[test]
    fn test_load_pending_and_completed() {
        let temp = TempDir::new().unwrap();
        write_task(&temp.path().join("pending"), "brain-triage", "priority: 3\n");
        write_task(&temp.path().join("completed"), "brain-setup", "priority: 5\n");

        let backlog = Backlog::load(&[project(&temp, 5)]).unwrap();
        assert_eq!(backlog.tasks().len(), 1);
        assert_eq!(backlog.tasks()[0].project, "brain");
        assert_eq!(backlog.tasks()[0].project_boost, 5);
        assert!(backlog.completed_names().contains("brain-setup"));
    }

    #[test]
    fn test_load_skips_invalid_files() {
        let temp = TempDir::new().unwrap();
        write_task(&temp.path().join("pending"), "good", "priority: 3\n");
        write_task(&temp.path().join("pending"), "bad", "priority: nonsense\n");

        let backlog = Backlog::load(&[project(&temp, 0)]).unwrap();
        assert_eq!(backlog.tasks().len(), 1);
        assert_eq!(backlog.tasks()[0].name, "good");
    }

    #[test]
    fn test_load_missing_dirs_is_empty() {
        let projects = [ProjectConfig {
            path: PathBuf::from("/nonexistent"),
            name: "ghost".to_string(),
            boost: 0,
        }];
        let backlog = Backlog::load(&projects).unwrap();
        assert!(backlog.tasks().is_empty());
    }

    #[test]
    fn test_dependency_on_pending_blocks() {
        let mut dependent = Task::new("b", "b");
        dependent.depends_on = vec!["a".to_string()];
        let backlog = Backlog::from_tasks(vec![Task::new("a", "a"), dependent], &[]);

        assert_eq!(backlog.runnable().len(), 1);
        assert_eq!(backlog.blocked().len(), 1);
        assert_eq!(backlog.blocked()[0].name, "b");
    }

    #[test]
    fn test_dependency_on_completed_is_met() {
        let mut task = Task::new("b", "b");
        task.depends_on = vec!["a".to_string()];
        let backlog = Backlog::from_tasks(vec![task], &["a"]);
        assert_eq!(backlog.blocked().len(), 0);
    }

    #[test]
    fn test_unknown_dependency_assumed_external() {
        let mut task = Task::new("b", "b");
        task.depends_on = vec!["calendar:standup".to_string()];
        let backlog = Backlog::from_tasks(vec![task], &[]);
        assert_eq!(backlog.runnable().len(), 1);
    }

    #[test]
    fn test_unmet_dependencies_counted() {
        let mut task = Task::new("d", "d");
        task.depends_on = vec!["a".into(), "b".into(), "c".into()];
        let backlog = Backlog::from_tasks(
            vec![Task::new("a", "a"), Task::new("b", "b"), Task::new("c", "c"), task],
            &[],
        );
        let dependent = backlog.tasks().iter().find(|t| t.name == "d").unwrap();
        assert_eq!(backlog.unmet_dependencies(dependent).len(), 3);
    }

    #[test]
    fn test_summary() {
        let mut blocked = Task::new("b", "b");
        blocked.depends_on = vec!["a".to_string()];
        blocked.estimated_tokens = 10_000;
        let mut free = Task::new("a", "a");
        free.estimated_tokens = 20_000;
        free.project = "brain".to_string();

        let backlog = Backlog::from_tasks(vec![free, blocked], &["old"]);
        let summary = backlog.summary();
        assert_eq!(summary.total, 2);
        assert_eq!(summary.runnable, 1);
        assert_eq!(summary.blocked, 1);
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.total_tokens, 30_000);
        assert_eq!(summary.runnable_tokens, 20_000);
    }
}
