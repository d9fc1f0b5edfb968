use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand};
use cortex_core::config::Config;
use cortex_core::models::ClassifiedTask;
use cortex_core::runner::{logs, ApiClient, Runner, RunnerSettings, StateManager};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Task runner for the Cortex Core orchestration service.
#[derive(Parser)]
#[command(name = "cortex-runner", version, about)]
struct Cli {
    /// Verbose (debug) logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct StartFlags {
    /// Maximum concurrently running agent processes per project.
    #[arg(long)]
    max_parallel: Option<usize>,

    /// Poll interval in seconds.
    #[arg(long)]
    poll_interval: Option<u64>,

    /// Agent CLI binary.
    #[arg(long)]
    agent: Option<String>,

    /// Model flag passed to the agent CLI.
    #[arg(long)]
    model: Option<String>,

    /// Fallback working directory for tasks that name none.
    #[arg(long)]
    workdir: Option<PathBuf>,

    /// Skip tasks whose id or title contains this pattern (repeatable).
    #[arg(long = "exclude")]
    exclude: Vec<String>,

    /// Pass the agent CLI its dry-run flag.
    #[arg(long)]
    dry_run: bool,

    /// Do not resume tasks left in_progress by a dead runner.
    #[arg(long)]
    no_resume: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the scheduler loop for a project (or "all").
    Start {
        #[arg(default_value = "all")]
        project: String,
        #[command(flatten)]
        flags: StartFlags,
    },
    /// Signal a running runner to stop.
    Stop {
        #[arg(default_value = "all")]
        project: String,
    },
    /// Show runner state files, sweeping dead ones.
    Status {
        project: Option<String>,
    },
    /// Claim and execute a single ready task, then exit.
    RunOne {
        project: String,
        #[command(flatten)]
        flags: StartFlags,
    },
    /// Print the full classified task report for a project.
    List {
        project: String,
    },
    /// Print the ready projection.
    Ready {
        project: String,
    },
    /// Print the waiting projection.
    Waiting {
        project: String,
    },
    /// Print the blocked projection.
    Blocked {
        project: String,
    },
    /// Tail the runner's ndjson log file.
    Logs {
        /// Only records at this level (info|warn|error).
        #[arg(long)]
        level: Option<String>,
        /// Number of records to show.
        #[arg(long, default_value_t = 50)]
        lines: usize,
        /// Log file override.
        #[arg(long)]
        file: Option<PathBuf>,
    },
}

fn apply_flags(mut settings: RunnerSettings, flags: &StartFlags) -> RunnerSettings {
    if let Some(max_parallel) = flags.max_parallel {
        settings.max_parallel = max_parallel.max(1);
    }
    if let Some(poll_interval) = flags.poll_interval {
        settings.poll_interval = Duration::from_secs(poll_interval.max(1));
    }
    if let Some(agent) = &flags.agent {
        settings.agent_binary = agent.clone();
    }
    if let Some(model) = &flags.model {
        settings.agent_model = Some(model.clone());
    }
    settings.default_workdir = flags.workdir.clone();
    settings.exclude = flags.exclude.clone();
    settings.dry_run = flags.dry_run;
    settings.resume = !flags.no_resume;
    settings
}

fn client_for(config: &Config) -> Result<ApiClient> {
    Ok(ApiClient::new(
        &config.runner.api_base_url,
        Duration::from_secs(config.runner.api_timeout_secs),
    )?)
}

fn print_tasks(heading: &str, tasks: &[ClassifiedTask]) {
    println!("{heading} ({}):", tasks.len());
    for task in tasks {
        let priority = task
            .task
            .priority
            .map(|p| p.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {}  [{}] {:<18} {}",
            task.task.id, priority, task.classification, task.task.title
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()),
        )
        .init();

    let config = Config::load()?;

    match cli.command {
        Commands::Start { project, flags } => {
            let settings = apply_flags(RunnerSettings::from_config(&config.runner), &flags);
            let runner = Runner::new(config.runner.clone(), settings);
            runner.start(&project).await?;
        }
        Commands::Stop { project } => {
            let manager = StateManager::new(config.runner.state_dir.clone());
            let targets: Vec<String> = if project == "all" {
                manager
                    .find_all_runner_states()
                    .into_iter()
                    .map(|(p, _)| p)
                    .collect()
            } else {
                vec![project]
            };
            if targets.is_empty() {
                println!("No runner state found.");
                return Ok(());
            }
            for target in targets {
                match manager.load_pid(&target) {
                    Some(pid) if cortex_core::runner::state::pid_alive(pid) => {
                        stop_pid(pid)?;
                        println!("Sent stop signal to runner for '{target}' (pid {pid}).");
                    }
                    Some(_) => {
                        println!("Runner for '{target}' is not alive; sweeping state.");
                        manager.cleanup_stale_states();
                    }
                    None => println!("No pid file for '{target}'."),
                }
            }
        }
        Commands::Status { project } => {
            let manager = StateManager::new(config.runner.state_dir.clone());
            let swept = manager.cleanup_stale_states();
            for project_name in swept {
                println!("Swept stale state for '{project_name}'.");
            }
            let states = manager.find_all_runner_states();
            let states: Vec<_> = match &project {
                Some(wanted) => states.into_iter().filter(|(p, _)| p == wanted).collect(),
                None => states,
            };
            if states.is_empty() {
                println!("No active runners.");
                return Ok(());
            }
            for (project_name, state) in states {
                println!(
                    "{project_name}: {:?}, {} running, {} completed, {} failed, {:.0}s runtime",
                    state.status,
                    state.running_tasks.len(),
                    state.stats.completed,
                    state.stats.failed,
                    state.stats.total_runtime,
                );
                for task in &state.running_tasks {
                    println!("  {} (pid {}) {}", task.id, task.pid, task.title);
                }
            }
        }
        Commands::RunOne { project, flags } => {
            let settings = apply_flags(RunnerSettings::from_config(&config.runner), &flags);
            let runner = Runner::new(config.runner.clone(), settings);
            if runner.run_one(&project).await? {
                println!("Task executed.");
            } else {
                println!("No ready task could be claimed.");
            }
        }
        Commands::List { project } => {
            let report = client_for(&config)?.project_report(&project).await?;
            print_tasks(&format!("Tasks in '{project}'"), &report.tasks);
            if !report.cycles.is_empty() {
                println!("Cycles: {:?}", report.cycles);
            }
        }
        Commands::Ready { project } => {
            let tasks = client_for(&config)?.ready_tasks(&project).await?;
            print_tasks(&format!("Ready in '{project}'"), &tasks);
        }
        Commands::Waiting { project } => {
            let report = client_for(&config)?.project_report(&project).await?;
            let waiting: Vec<ClassifiedTask> = report
                .tasks
                .into_iter()
                .filter(|t| {
                    matches!(
                        t.classification,
                        cortex_core::models::Classification::Waiting
                            | cortex_core::models::Classification::WaitingOnParent
                    )
                })
                .collect();
            print_tasks(&format!("Waiting in '{project}'"), &waiting);
        }
        Commands::Blocked { project } => {
            let report = client_for(&config)?.project_report(&project).await?;
            let blocked: Vec<ClassifiedTask> = report
                .tasks
                .into_iter()
                .filter(|t| {
                    matches!(
                        t.classification,
                        cortex_core::models::Classification::Blocked
                            | cortex_core::models::Classification::BlockedByParent
                    )
                })
                .collect();
            print_tasks(&format!("Blocked in '{project}'"), &blocked);
        }
        Commands::Logs { level, lines, file } => {
            let path = file
                .or_else(|| config.runner.log_file.clone())
                .ok_or_else(|| anyhow!("no log file configured; set CORTEX_LOG_FILE"))?;
            let records = logs::tail_log(&path, lines, level.as_deref())?;
            for record in records {
                println!(
                    "{} [{}] {} {}",
                    record.timestamp.to_rfc3339(),
                    record.level,
                    record.message,
                    record.context
                );
            }
        }
    }
    Ok(())
}

#[cfg(unix)]
fn stop_pid(pid: u32) -> Result<()> {
    if pid == 0 || pid > i32::MAX as u32 {
        return Err(anyhow!("pid {pid} out of range"));
    }
    let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if rc != 0 {
        return Err(anyhow!("failed to signal pid {pid}"));
    }
    Ok(())
}

#[cfg(not(unix))]
fn stop_pid(_pid: u32) -> Result<()> {
    Err(anyhow!("stop is only supported on unix"))
}
