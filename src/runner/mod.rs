//! The task runner: a separate process that polls the API, claims ready
//! tasks, and drives external agent processes under a parallelism cap.

pub mod client;
pub mod command;
pub mod logs;
pub mod scheduler;
pub mod state;
pub mod supervisor;

pub use client::ApiClient;
pub use scheduler::Scheduler;
pub use state::StateManager;

use crate::config::RunnerConfig;
use crate::constants::CHILD_TERM_GRACE_SECS;
use crate::{CortexError, Result};
use logs::{FileSink, LogSink, MemorySink, MultiSink, RunnerLogger};
use std::sync::Arc;
use std::time::Duration;
use supervisor::{AgentLauncher, ProcessLauncher};
use tokio::sync::watch;
use tracing::{error, info};

/// Per-invocation runner knobs, resolved from config plus CLI flags.
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub runner_id: String,
    pub max_parallel: usize,
    pub poll_interval: Duration,
    pub resume: bool,
    pub dry_run: bool,
    pub agent_binary: String,
    pub agent_model: Option<String>,
    pub term_grace: Duration,
    /// Substring patterns; matching task ids or titles are never started.
    pub exclude: Vec<String>,
    /// Fallback working directory for tasks that name none.
    pub default_workdir: Option<std::path::PathBuf>,
}

impl RunnerSettings {
    pub fn from_config(config: &RunnerConfig) -> Self {
        Self {
            runner_id: format!("runner-{}", uuid::Uuid::new_v4()),
            max_parallel: config.max_parallel,
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            resume: true,
            dry_run: false,
            agent_binary: config.agent_binary.clone(),
            agent_model: config.agent_model.clone(),
            term_grace: Duration::from_secs(CHILD_TERM_GRACE_SECS),
            exclude: Vec::new(),
            default_workdir: None,
        }
    }

    /// Whether a task is excluded by id or title pattern.
    pub fn is_excluded(&self, task_id: &str, title: &str) -> bool {
        self.exclude
            .iter()
            .any(|pattern| task_id.contains(pattern.as_str()) || title.contains(pattern.as_str()))
    }
}

/// Top-level runner: one scheduler per project, shared API client and
/// state dir, one shutdown signal.
pub struct Runner {
    config: RunnerConfig,
    settings: RunnerSettings,
}

impl Runner {
    pub fn new(config: RunnerConfig, settings: RunnerSettings) -> Self {
        Self { config, settings }
    }

    fn build_logger(&self) -> Result<RunnerLogger> {
        let mut sinks: Vec<Arc<dyn LogSink>> = vec![Arc::new(MemorySink::new())];
        if let Some(path) = &self.config.log_file {
            sinks.push(Arc::new(FileSink::open(path)?));
        }
        Ok(RunnerLogger::new(Arc::new(MultiSink::new(sinks))))
    }

    /// Resolves the project selector: a concrete project, or "all".
    async fn resolve_projects(&self, client: &ApiClient, selector: &str) -> Result<Vec<String>> {
        if selector != "all" {
            return Ok(vec![selector.to_string()]);
        }
        let projects = client.projects().await?;
        if projects.is_empty() {
            return Err(CortexError::Runner {
                message: "no projects with a task/ directory found".to_string(),
            });
        }
        Ok(projects)
    }

    /// Runs schedulers for the selected projects until a shutdown signal.
    pub async fn start(&self, project_selector: &str) -> Result<()> {
        let client = Arc::new(ApiClient::new(
            &self.config.api_base_url,
            Duration::from_secs(self.config.api_timeout_secs),
        )?);
        let projects = self.resolve_projects(&client, project_selector).await?;
        let logger = self.build_logger()?;
        let state_manager = StateManager::new(self.config.state_dir.clone());
        let launcher: Arc<dyn ProcessLauncher> = Arc::new(AgentLauncher);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(async move {
            wait_for_signal().await;
            info!("Shutdown requested; stopping schedulers");
            let _ = shutdown_tx.send(true);
        });

        info!(
            "Starting runner {} for projects: {:?}",
            self.settings.runner_id, projects
        );
        let mut handles = Vec::new();
        for project in projects {
            let scheduler = Scheduler::new(
                project.clone(),
                self.settings.clone(),
                client.clone(),
                launcher.clone(),
                state_manager.clone(),
                logger.clone(),
                shutdown_rx.clone(),
            );
            handles.push(tokio::spawn(async move {
                if let Err(e) = scheduler.run().await {
                    error!("Scheduler for '{}' failed: {}", project, e);
                    return Err(e);
                }
                Ok(())
            }));
        }

        let mut failed = false;
        for handle in handles {
            match handle.await {
                Ok(Ok(())) => {}
                _ => failed = true,
            }
        }
        if failed {
            return Err(CortexError::Runner {
                message: "one or more schedulers failed".to_string(),
            });
        }
        Ok(())
    }

    /// Claims and runs a single ready task, then exits.
    pub async fn run_one(&self, project: &str) -> Result<bool> {
        let client = Arc::new(ApiClient::new(
            &self.config.api_base_url,
            Duration::from_secs(self.config.api_timeout_secs),
        )?);
        let logger = self.build_logger()?;
        let state_manager = StateManager::new(self.config.state_dir.clone());
        let launcher: Arc<dyn ProcessLauncher> = Arc::new(AgentLauncher);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let scheduler = Scheduler::new(
            project.to_string(),
            self.settings.clone(),
            client,
            launcher,
            state_manager,
            logger,
            shutdown_rx,
        );
        scheduler.run_one().await
    }
}

async fn wait_for_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
