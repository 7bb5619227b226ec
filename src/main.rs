use chrono::{Local, Utc};
use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

mod cli;

use cli::Cli;
use cli::commands::Commands;
use taskbridge::budget::{BudgetTracker, CapacityProbe};
use taskbridge::config::Config;
use taskbridge::executor::CommandExecutor;
use taskbridge::queue::{Backlog, QueueStore};
use taskbridge::runner::QueueRunner;
use taskbridge::scheduler::{Planner, Schedule};
use taskbridge::task::parse_task_file;
use taskbridge::watcher::Shutdown;

fn setup_logging(default_level: &str) -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("taskbridge")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("taskbridge.log");

    // Setup env_logger with file output
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

fn run_application(cli: &Cli, config: &Config) -> Result<()> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    match &cli.command {
        None | Some(Commands::Status) => handle_status_command(config),
        Some(Commands::Plan) => handle_plan_command(config),
        Some(Commands::Watch) => handle_watch_command(config),
        Some(Commands::Enqueue { file }) => handle_enqueue_command(file, config),
    }
}

fn handle_status_command(config: &Config) -> Result<()> {
    let store = QueueStore::new(&config.store.root);
    store
        .ensure_directories()
        .context("State root is unreachable")?;

    let schedule = Schedule::new(&config.schedule)?;
    let now = Local::now();
    let phase = schedule.current_phase(now.time());
    let (can_run, reason) = schedule.should_run(phase);

    println!("{} {}", "Current phase:".green(), phase);
    if can_run {
        println!("{} yes ({})", "Can run tasks:".green(), reason);
    } else {
        println!("{} no ({})", "Can run tasks:".yellow(), reason);
    }

    let tracker = BudgetTracker::new(store.state_dir(), config.budget.clone());
    let summary = tracker.week_summary(now.date_naive())?;
    println!();
    println!("{} {}", "Week of:".green(), summary.week_start);
    println!(
        "  planned {:.1}%  used {:.1}%  user-directed {:.1}%  reserve {:.1}%",
        summary.total_planned, summary.total_used, summary.user_directed_used, summary.reserve
    );
    println!(
        "  remaining: {:.1}% this week, {:.1}% today ({} days left)",
        summary.remaining_week, summary.remaining_today, summary.days_remaining
    );

    println!();
    println!("{}", "Queue:".green());
    for subdir in ["queue", "processing", "responses", "completed", "failed", "dead-letter", "archive"] {
        println!("  {:<12} {}", subdir, store.count(subdir));
    }

    Ok(())
}

fn handle_plan_command(config: &Config) -> Result<()> {
    let store = QueueStore::new(&config.store.root);
    store
        .ensure_directories()
        .context("State root is unreachable")?;

    let backlog = Backlog::load(&config.projects)?;
    let summary = backlog.summary();
    println!(
        "{} {} pending, {} runnable, {} blocked",
        "Backlog:".green(),
        summary.total,
        summary.runnable,
        summary.blocked
    );

    let capacity = CapacityProbe::from_home().check();
    match &capacity {
        Some(cap) => println!(
            "{} {:.1}% available",
            "Capacity:".green(),
            cap.available_percent()
        ),
        None => println!("{}", "Capacity: unavailable, planning from budget alone".yellow()),
    }

    let tracker = BudgetTracker::new(store.state_dir(), config.budget.clone());
    let planner = Planner::new(&config.schedule, &config.budget, &config.projects, &tracker)?;

    let now = Local::now();
    let phase = planner.schedule().current_phase(now.time());
    let (can_run, reason) = planner.schedule().should_run(phase);
    if !can_run {
        println!("{} {} ({})", "On hold:".yellow(), phase, reason);
    }

    let pending = backlog.pending_names();
    let plan = planner.plan_session(
        backlog.tasks(),
        capacity.as_ref(),
        phase,
        &pending,
        now.date_naive(),
        Utc::now(),
    )?;

    println!();
    if plan.admitted.is_empty() {
        println!("{}", "Nothing to admit this session".cyan());
    } else {
        println!(
            "{} {} tasks, {} of {} tokens",
            "Would admit:".green(),
            plan.admitted.len(),
            plan.planned_tokens,
            plan.available_tokens
        );
        for (task, score) in &plan.admitted {
            println!(
                "  {:>7.1}  {} ({} tokens)",
                score,
                task.name,
                tracker.estimated_cost(&task.name, task.estimated_tokens)
            );
        }
    }

    Ok(())
}

fn handle_watch_command(config: &Config) -> Result<()> {
    let executor = Arc::new(CommandExecutor::new(config.executor.clone()));
    let runner = QueueRunner::new(config, executor)?;

    runner
        .store()
        .purge_archive(config.store.archive_retention_days, Utc::now())?;

    println!(
        "{} {}",
        "Watching".cyan(),
        runner.store().queue_dir().display()
    );
    // Runs until the process is interrupted; every queue mutation is an
    // atomic rename, so an interrupt mid-task leaves recoverable state
    runner.run(config, Arc::new(Shutdown::new()))?;
    Ok(())
}

fn handle_enqueue_command(file: &Path, config: &Config) -> Result<()> {
    let task = parse_task_file(file)
        .with_context(|| format!("Invalid task file {}", file.display()))?;

    let store = QueueStore::new(&config.store.root);
    store
        .ensure_directories()
        .context("State root is unreachable")?;
    let dest = store.enqueue(&task)?;

    println!("{} {} -> {}", "Enqueued:".green(), task.id, dest.display());
    Ok(())
}

fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    let default_level = if cli.is_verbose() {
        "debug"
    } else {
        config.log_level.as_deref().unwrap_or("info")
    };
    setup_logging(default_level).context("Failed to setup logging")?;

    info!("Starting with config from: {:?}", cli.config);

    // Run the main application logic
    run_application(&cli, &config).context("Application failed")?;

    Ok(())
}
