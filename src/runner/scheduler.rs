//! The scheduler loop: poll, claim, spawn, supervise, reconcile.
//!
//! Cooperative and single-threaded per project. The loop suspends at the
//! health check, the ready fetch, and the sleep; children run as parallel
//! OS processes whose exits arrive on the supervisor's channel.

use super::client::ApiClient;
use super::command::build_prompt;
use super::logs::RunnerLogger;
use super::state::{RunnerPhase, RunnerState, RunningTask, StateManager};
use super::supervisor::{ExitEvent, LaunchSpec, ProcessLauncher, Supervisor};
use super::RunnerSettings;
use crate::constants::HEALTH_CACHE_SECS;
use crate::models::{ClassifiedTask, EntryStatus};
use crate::{CortexError, Result};
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;

pub struct Scheduler {
    project: String,
    settings: RunnerSettings,
    client: Arc<ApiClient>,
    supervisor: Supervisor,
    exit_rx: mpsc::UnboundedReceiver<ExitEvent>,
    state_manager: StateManager,
    state: RunnerState,
    logger: RunnerLogger,
    shutdown: watch::Receiver<bool>,
    last_health: Option<(Instant, bool)>,
}

impl Scheduler {
    pub fn new(
        project: String,
        settings: RunnerSettings,
        client: Arc<ApiClient>,
        launcher: Arc<dyn ProcessLauncher>,
        state_manager: StateManager,
        logger: RunnerLogger,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let (supervisor, exit_rx) = Supervisor::with_grace(launcher, settings.term_grace);
        // Stats survive restarts; everything else starts fresh.
        let mut state = RunnerState::fresh();
        if let Some(previous) = state_manager.load_state(&project) {
            state.stats = previous.stats;
        }
        Self {
            project,
            settings,
            client,
            supervisor,
            exit_rx,
            state_manager,
            state,
            logger,
            shutdown,
            last_health: None,
        }
    }

    /// Crash recovery, then the polling loop, then graceful shutdown.
    pub async fn run(mut self) -> Result<()> {
        self.recover_from_crash().await?;
        self.state_manager
            .save_pid(&self.project, std::process::id())?;
        self.logger.info(
            &format!("Runner started for project '{}'", self.project),
            json!({ "project": self.project, "runnerId": self.settings.runner_id }),
        );

        let mut ticker = tokio::time::interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately; absolute pacing starts
        // after it.
        ticker.tick().await;
        let mut first_iteration = true;

        loop {
            if *self.shutdown.borrow() {
                break;
            }
            // A shutdown signal arriving mid-fetch cancels the in-flight
            // request rather than waiting the poll out.
            let mut shutdown = self.shutdown.clone();
            let tick_result = tokio::select! {
                result = self.tick(first_iteration) => Some(result),
                _ = shutdown.changed() => None,
            };
            let Some(tick_result) = tick_result else {
                break;
            };
            match tick_result {
                Ok(()) => first_iteration = false,
                Err(e) if e.is_retryable() => {
                    self.logger.warn(
                        &format!("Transient API failure; retrying next poll: {e}"),
                        json!({ "project": self.project }),
                    );
                }
                Err(e) => {
                    // A 4xx from our own API is a bug, not weather.
                    self.logger.error(
                        &format!("Runner halting: {e}"),
                        json!({ "project": self.project }),
                    );
                    self.finish(RunnerPhase::Stopped)?;
                    return Err(e);
                }
            }

            let early_exit = tokio::select! {
                _ = ticker.tick() => None,
                _ = self.shutdown.changed() => None,
                event = self.exit_rx.recv() => event,
            };
            if let Some(event) = early_exit {
                self.handle_exit(event).await?;
            }
        }

        self.graceful_shutdown().await
    }

    /// Claims and runs at most one ready task to completion.
    pub async fn run_one(mut self) -> Result<bool> {
        if !self.health_ok().await? {
            return Err(CortexError::Runner {
                message: "API is not healthy".to_string(),
            });
        }
        let ready = self.client.ready_tasks(&self.project).await?;
        let mut started = false;
        for task in ready {
            if self.try_start(task, false).await? {
                started = true;
                break;
            }
        }
        if !started {
            return Ok(false);
        }
        if let Some(event) = self.exit_rx.recv().await {
            self.handle_exit(event).await?;
        }
        Ok(true)
    }

    async fn tick(&mut self, first_iteration: bool) -> Result<()> {
        self.drain_exits().await?;

        if !self.health_ok().await? {
            self.logger.warn(
                "API unhealthy; skipping poll",
                json!({ "project": self.project }),
            );
            return Ok(());
        }

        if first_iteration && self.settings.resume {
            self.resume_in_progress().await?;
        }

        self.set_phase(RunnerPhase::Polling)?;
        let ready = self.client.ready_tasks(&self.project).await?;
        self.set_phase(RunnerPhase::Processing)?;

        let mut queue = ready.into_iter();
        while self.state.running_tasks.len() < self.settings.max_parallel {
            let Some(task) = queue.next() else { break };
            if self.is_running(&task.task.id) {
                continue;
            }
            if self.settings.is_excluded(&task.task.id, &task.task.title) {
                continue;
            }
            self.try_start(task, false).await?;
        }

        self.persist()?;
        Ok(())
    }

    fn is_running(&self, task_id: &str) -> bool {
        self.state.running_tasks.iter().any(|r| r.id == task_id)
    }

    /// Claim, transition, resolve workdir, spawn. Per-task failures skip
    /// the task; only systemic API errors propagate.
    async fn try_start(&mut self, task: ClassifiedTask, is_resume: bool) -> Result<bool> {
        let task_id = task.task.id.clone();

        match self
            .client
            .claim(&self.project, &task_id, &self.settings.runner_id)
            .await
        {
            Ok(_) => {}
            Err(CortexError::ClaimConflict { claimed_by, .. }) => {
                self.logger.info(
                    &format!("Task {task_id} already claimed by {claimed_by}; skipping"),
                    json!({ "task": task_id }),
                );
                return Ok(false);
            }
            Err(e) => return Err(e),
        }

        if !is_resume {
            if let Err(e) = self
                .client
                .set_status(&task_id, EntryStatus::InProgress, None)
                .await
            {
                self.logger.warn(
                    &format!("Status transition failed for {task_id}; releasing: {e}"),
                    json!({ "task": task_id }),
                );
                let _ = self.client.release(&self.project, &task_id).await;
                return Ok(false);
            }
        }

        // Workdir must exist when the task names one; the configured
        // fallback only applies to tasks that name none.
        let requires_workdir = task.task.workdir.is_some() || task.task.worktree.is_some();
        let workdir = match task.resolved_workdir.clone() {
            Some(dir) => Some(dir),
            None if requires_workdir => None,
            None => self.settings.default_workdir.clone(),
        };
        if requires_workdir && workdir.is_none() {
            self.logger.warn(
                &format!("Task {task_id} has an unresolvable workdir; releasing"),
                json!({ "task": task_id, "workdir": task.task.workdir, "worktree": task.task.worktree }),
            );
            let _ = self.client.release(&self.project, &task_id).await;
            if !is_resume {
                let _ = self
                    .client
                    .set_status(&task_id, EntryStatus::Pending, None)
                    .await;
            }
            return Ok(false);
        }

        let detail = match self.client.task_detail(&task_id).await {
            Ok(detail) => detail,
            Err(e) => {
                self.logger.warn(
                    &format!("Could not fetch task body for {task_id}; releasing: {e}"),
                    json!({ "task": task_id }),
                );
                let _ = self.client.release(&self.project, &task_id).await;
                return Ok(false);
            }
        };
        let prompt = build_prompt(
            &detail.title,
            &detail.content,
            task.task.user_original_request.as_deref(),
        );

        let spec = LaunchSpec {
            task_id: task_id.clone(),
            binary: self.settings.agent_binary.clone(),
            model: self.settings.agent_model.clone(),
            dry_run: self.settings.dry_run,
            workdir: workdir.clone(),
            prompt,
            env: vec![
                ("CORTEX_TASK_ID".to_string(), task_id.clone()),
                ("CORTEX_PROJECT".to_string(), self.project.clone()),
            ],
        };
        let pid = match self.supervisor.spawn(spec).await {
            Ok(pid) => pid,
            Err(e) => {
                self.logger.error(
                    &format!("Spawn failed for {task_id}: {e}"),
                    json!({ "task": task_id }),
                );
                let _ = self.client.release(&self.project, &task_id).await;
                let _ = self
                    .client
                    .set_status(&task_id, EntryStatus::Pending, None)
                    .await;
                return Ok(false);
            }
        };

        self.state.running_tasks.push(RunningTask {
            id: task_id.clone(),
            path: task.task.path.clone(),
            title: task.task.title.clone(),
            priority: task.task.priority,
            pid,
            started_at: Utc::now(),
            is_resume,
            workdir: workdir.map(|p| p.to_string_lossy().to_string()),
        });
        self.persist()?;
        self.logger.info(
            &format!("Started task {task_id} (pid {pid}, resume: {is_resume})"),
            json!({ "task": task_id, "pid": pid, "isResume": is_resume }),
        );
        Ok(true)
    }

    /// Non-blocking reap of any finished children.
    async fn drain_exits(&mut self) -> Result<()> {
        while let Ok(event) = self.exit_rx.try_recv() {
            self.handle_exit(event).await?;
        }
        Ok(())
    }

    async fn handle_exit(&mut self, event: ExitEvent) -> Result<()> {
        self.state.running_tasks.retain(|r| r.id != event.task_id);
        self.state.stats.total_runtime += event.runtime_secs;

        let result = if event.outcome.success() {
            self.state.stats.completed += 1;
            self.client
                .set_status(&event.task_id, EntryStatus::Completed, None)
                .await
        } else {
            self.state.stats.failed += 1;
            self.client
                .set_status(
                    &event.task_id,
                    EntryStatus::Blocked,
                    Some(&format!("agent process failed ({})", event.outcome.describe())),
                )
                .await
        };
        if let Err(e) = result {
            if !e.is_retryable() {
                return Err(e);
            }
            self.logger.warn(
                &format!("Status write for {} failed: {e}", event.task_id),
                json!({ "task": event.task_id }),
            );
        }

        let _ = self.client.release(&self.project, &event.task_id).await;
        self.persist()?;
        self.logger.info(
            &format!(
                "Task {} finished with {} after {:.1}s",
                event.task_id,
                event.outcome.describe(),
                event.runtime_secs
            ),
            json!({ "task": event.task_id, "success": event.outcome.success() }),
        );
        Ok(())
    }

    /// Health probe, cached for ten seconds. Network failures read as
    /// unhealthy rather than halting the loop.
    async fn health_ok(&mut self) -> Result<bool> {
        if let Some((at, ok)) = self.last_health {
            if at.elapsed() < Duration::from_secs(HEALTH_CACHE_SECS) {
                return Ok(ok);
            }
        }
        let ok = match self.client.health().await {
            Ok(health) => health.is_usable(),
            Err(e) if e.is_retryable() => {
                self.logger
                    .warn(&format!("Health check failed: {e}"), json!({}));
                false
            }
            Err(e) => return Err(e),
        };
        self.last_health = Some((Instant::now(), ok));
        Ok(ok)
    }

    /// First-iteration resume: re-claim tasks the server still shows
    /// in-progress. Foreign fresh claims are left alone.
    async fn resume_in_progress(&mut self) -> Result<()> {
        let in_progress = self.client.in_progress_tasks(&self.project).await?;
        for task in in_progress {
            if self.is_running(&task.task.id) {
                continue;
            }
            if self.state.running_tasks.len() >= self.settings.max_parallel {
                break;
            }
            let resumed = self.try_start(task, true).await?;
            if resumed {
                self.logger.info("Resumed in-progress task", json!({}));
            }
        }
        Ok(())
    }

    /// Startup reconciliation: a dead prior runner leaves orphaned
    /// in-progress tasks behind.
    async fn recover_from_crash(&mut self) -> Result<()> {
        let prior_pid = match self.state_manager.load_pid(&self.project) {
            Some(pid) => pid,
            None => return Ok(()),
        };
        if super::state::pid_alive(prior_pid) && prior_pid != std::process::id() {
            return Err(CortexError::Runner {
                message: format!(
                    "runner already active for project '{}' (pid {prior_pid})",
                    self.project
                ),
            });
        }
        self.state_manager.clear_pid(&self.project);

        let orphans = self.state_manager.load_running(&self.project);
        if orphans.is_empty() {
            return Ok(());
        }
        self.logger.warn(
            &format!(
                "Prior runner (pid {prior_pid}) died with {} task(s) in flight",
                orphans.len()
            ),
            json!({ "project": self.project, "orphans": orphans.len() }),
        );

        for orphan in orphans {
            // When resume is on, the first-iteration resume pass re-claims
            // these; reverting here would race it.
            if self.settings.resume {
                continue;
            }
            match self.client.task_detail(&orphan.id).await {
                Ok(detail) if detail.status == EntryStatus::InProgress => {
                    if let Ok(Some(claim)) =
                        self.client.claim_status(&self.project, &orphan.id).await
                    {
                        if claim.runner_id != self.settings.runner_id && !claim.is_stale {
                            continue;
                        }
                    }
                    let _ = self
                        .client
                        .set_status(&orphan.id, EntryStatus::Pending, None)
                        .await;
                    let _ = self.client.release(&self.project, &orphan.id).await;
                    self.logger.info(
                        &format!("Reverted orphaned task {} to pending", orphan.id),
                        json!({ "task": orphan.id }),
                    );
                }
                Ok(_) => {}
                Err(e) => self.logger.warn(
                    &format!("Reconciliation fetch failed for {}: {e}", orphan.id),
                    json!({ "task": orphan.id }),
                ),
            }
        }
        self.state_manager.save_running(&self.project, &[])?;
        Ok(())
    }

    /// Operator-induced stop: children get TERM/grace/KILL, their tasks go
    /// back to pending, claims are released.
    async fn graceful_shutdown(&mut self) -> Result<()> {
        self.set_phase(RunnerPhase::Stopping)?;
        let running = self.state.running_tasks.clone();
        self.supervisor.cancel_all().await;

        let deadline = self.settings.term_grace + Duration::from_secs(2);
        while !self.state.running_tasks.is_empty() {
            let next = tokio::time::timeout(deadline, self.exit_rx.recv()).await;
            match next {
                Ok(Some(event)) => {
                    self.state.running_tasks.retain(|r| r.id != event.task_id);
                }
                _ => break,
            }
        }

        for task in running {
            let _ = self
                .client
                .set_status(&task.id, EntryStatus::Pending, None)
                .await;
            let _ = self.client.release(&self.project, &task.id).await;
        }

        self.finish(RunnerPhase::Stopped)?;
        self.logger.info(
            &format!("Runner stopped for project '{}'", self.project),
            json!({ "project": self.project }),
        );
        Ok(())
    }

    fn set_phase(&mut self, phase: RunnerPhase) -> Result<()> {
        self.state.status = phase;
        self.persist()
    }

    fn persist(&mut self) -> Result<()> {
        self.state.updated_at = Utc::now();
        self.state_manager.save_state(&self.project, &self.state)?;
        self.state_manager
            .save_running(&self.project, &self.state.running_tasks)?;
        Ok(())
    }

    fn finish(&mut self, phase: RunnerPhase) -> Result<()> {
        self.state.status = phase;
        self.state.running_tasks.clear();
        self.persist()?;
        self.state_manager.save_running(&self.project, &[])?;
        self.state_manager.clear_pid(&self.project);
        Ok(())
    }
}
