//! Process supervisor: spawns and tracks child agent processes.
//!
//! Spawning goes through the `ProcessLauncher` capability so tests inject
//! a fake launcher. Exits are delivered on a channel the scheduler drains
//! each tick; nothing here ever blocks the loop.

use super::command::AgentCommandBuilder;
use crate::constants::CHILD_TERM_GRACE_SECS;
use crate::{CortexError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, Mutex, Notify};
use tracing::{debug, info, warn};

/// Everything needed to start one agent process.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub task_id: String,
    pub binary: String,
    pub model: Option<String>,
    pub dry_run: bool,
    pub workdir: Option<PathBuf>,
    pub prompt: String,
    pub env: Vec<(String, String)>,
}

/// How a child ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitOutcome {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl ExitOutcome {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    pub fn describe(&self) -> String {
        match (self.code, self.signal) {
            (Some(code), _) => format!("exit code {code}"),
            (None, Some(signal)) => format!("signal {signal}"),
            (None, None) => "unknown exit".to_string(),
        }
    }
}

/// Posted to the scheduler when a child exits.
#[derive(Debug)]
pub struct ExitEvent {
    pub task_id: String,
    pub pid: u32,
    pub outcome: ExitOutcome,
    pub runtime_secs: f64,
}

/// A running child the supervisor can wait on or signal.
#[async_trait]
pub trait ChildHandle: Send {
    fn pid(&self) -> u32;
    /// Resolves when the child exits. Must be cancel-safe.
    async fn wait(&mut self) -> ExitOutcome;
    /// Polite stop (SIGTERM).
    fn terminate(&self);
    /// Forced stop (SIGKILL).
    async fn kill(&mut self);
}

/// Capability for starting agent processes.
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    async fn launch(&self, spec: &LaunchSpec) -> Result<Box<dyn ChildHandle>>;
}

/// Real launcher over the agent CLI.
pub struct AgentLauncher;

struct AgentChild {
    child: tokio::process::Child,
    pid: u32,
}

#[async_trait]
impl ChildHandle for AgentChild {
    fn pid(&self) -> u32 {
        self.pid
    }

    async fn wait(&mut self) -> ExitOutcome {
        match self.child.wait().await {
            Ok(status) => {
                #[cfg(unix)]
                let signal = {
                    use std::os::unix::process::ExitStatusExt;
                    status.signal()
                };
                #[cfg(not(unix))]
                let signal = None;
                ExitOutcome {
                    code: status.code(),
                    signal,
                }
            }
            Err(e) => {
                warn!("wait() on pid {} failed: {}", self.pid, e);
                ExitOutcome {
                    code: None,
                    signal: None,
                }
            }
        }
    }

    #[cfg(unix)]
    fn terminate(&self) {
        if self.pid > 0 && self.pid <= i32::MAX as u32 {
            unsafe {
                libc::kill(self.pid as libc::pid_t, libc::SIGTERM);
            }
        }
    }

    #[cfg(not(unix))]
    fn terminate(&self) {}

    async fn kill(&mut self) {
        if let Err(e) = self.child.start_kill() {
            debug!("kill on pid {} failed (already gone?): {}", self.pid, e);
        }
    }
}

#[async_trait]
impl ProcessLauncher for AgentLauncher {
    async fn launch(&self, spec: &LaunchSpec) -> Result<Box<dyn ChildHandle>> {
        let mut builder = AgentCommandBuilder::new(&spec.binary).with_dry_run(spec.dry_run);
        if let Some(model) = &spec.model {
            builder = builder.with_model(model);
        }
        if let Some(workdir) = &spec.workdir {
            builder = builder.with_workdir(workdir);
        }
        for (key, value) in &spec.env {
            builder = builder.with_env(key, value);
        }
        builder
            .validate()
            .map_err(|message| CortexError::Runner { message })?;

        let mut child = builder.build().spawn()?;
        let pid = child.id().unwrap_or(0);

        // Prompt goes in on stdin; dropping the handle closes the pipe.
        if let Some(mut stdin) = child.stdin.take() {
            let prompt = spec.prompt.clone();
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(prompt.as_bytes()).await {
                    debug!("stdin write to agent failed: {}", e);
                }
            });
        }

        info!("Spawned agent pid {} for task {}", pid, spec.task_id);
        Ok(Box::new(AgentChild { child, pid }))
    }
}

struct ChildControl {
    pid: u32,
    cancel: Arc<Notify>,
}

/// Tracks children and delivers their exits without blocking.
#[derive(Clone)]
pub struct Supervisor {
    launcher: Arc<dyn ProcessLauncher>,
    children: Arc<Mutex<HashMap<String, ChildControl>>>,
    exit_tx: mpsc::UnboundedSender<ExitEvent>,
    grace: Duration,
}

impl Supervisor {
    pub fn new(launcher: Arc<dyn ProcessLauncher>) -> (Self, mpsc::UnboundedReceiver<ExitEvent>) {
        Self::with_grace(launcher, Duration::from_secs(CHILD_TERM_GRACE_SECS))
    }

    pub fn with_grace(
        launcher: Arc<dyn ProcessLauncher>,
        grace: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<ExitEvent>) {
        let (exit_tx, exit_rx) = mpsc::unbounded_channel();
        (
            Self {
                launcher,
                children: Arc::new(Mutex::new(HashMap::new())),
                exit_tx,
                grace,
            },
            exit_rx,
        )
    }

    /// Launches a child and returns its pid. The exit event arrives on the
    /// supervisor's channel later.
    pub async fn spawn(&self, spec: LaunchSpec) -> Result<u32> {
        let mut child = self.launcher.launch(&spec).await?;
        let pid = child.pid();
        let cancel = Arc::new(Notify::new());
        {
            let mut children = self.children.lock().await;
            children.insert(
                spec.task_id.clone(),
                ChildControl {
                    pid,
                    cancel: cancel.clone(),
                },
            );
        }

        let children = self.children.clone();
        let exit_tx = self.exit_tx.clone();
        let grace = self.grace;
        let task_id = spec.task_id.clone();
        tokio::spawn(async move {
            let started = Instant::now();
            let outcome = tokio::select! {
                outcome = child.wait() => outcome,
                _ = cancel.notified() => {
                    debug!("Cancelling task {} (pid {})", task_id, pid);
                    child.terminate();
                    match tokio::time::timeout(grace, child.wait()).await {
                        Ok(outcome) => outcome,
                        Err(_) => {
                            warn!("Task {} ignored SIGTERM; killing pid {}", task_id, pid);
                            child.kill().await;
                            child.wait().await
                        }
                    }
                }
            };
            children.lock().await.remove(&task_id);
            let _ = exit_tx.send(ExitEvent {
                task_id,
                pid,
                outcome,
                runtime_secs: started.elapsed().as_secs_f64(),
            });
        });

        Ok(pid)
    }

    /// Requests cancellation (TERM, grace, KILL). Returns whether the task
    /// was running.
    pub async fn cancel(&self, task_id: &str) -> bool {
        let children = self.children.lock().await;
        match children.get(task_id) {
            Some(control) => {
                control.cancel.notify_one();
                true
            }
            None => false,
        }
    }

    pub async fn cancel_all(&self) {
        let children = self.children.lock().await;
        for control in children.values() {
            control.cancel.notify_one();
        }
    }

    pub async fn running_count(&self) -> usize {
        self.children.lock().await.len()
    }

    pub async fn running_task_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.children.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn pid_of(&self, task_id: &str) -> Option<u32> {
        self.children.lock().await.get(task_id).map(|c| c.pid)
    }
}

/// Test doubles shared with the scheduler tests.
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    pub struct FakeLauncher {
        controls: Mutex<HashMap<String, mpsc::UnboundedSender<ExitOutcome>>>,
        pub launched: Mutex<Vec<LaunchSpec>>,
        next_pid: AtomicU32,
        pub fail_next: AtomicBool,
    }

    impl FakeLauncher {
        pub fn new() -> Arc<Self> {
            Arc::new(Self {
                controls: Mutex::new(HashMap::new()),
                launched: Mutex::new(Vec::new()),
                next_pid: AtomicU32::new(1000),
                fail_next: AtomicBool::new(false),
            })
        }

        /// Makes the child for `task_id` exit with `code`.
        pub async fn complete(&self, task_id: &str, code: i32) -> bool {
            let controls = self.controls.lock().await;
            match controls.get(task_id) {
                Some(tx) => tx
                    .send(ExitOutcome {
                        code: Some(code),
                        signal: None,
                    })
                    .is_ok(),
                None => false,
            }
        }

        pub async fn launch_count(&self) -> usize {
            self.launched.lock().await.len()
        }
    }

    struct FakeChild {
        pid: u32,
        rx: mpsc::UnboundedReceiver<ExitOutcome>,
        tx: mpsc::UnboundedSender<ExitOutcome>,
        terminated: Arc<AtomicBool>,
        obeys_term: bool,
    }

    #[async_trait]
    impl ChildHandle for FakeChild {
        fn pid(&self) -> u32 {
            self.pid
        }

        async fn wait(&mut self) -> ExitOutcome {
            match self.rx.recv().await {
                Some(outcome) => outcome,
                None => ExitOutcome {
                    code: None,
                    signal: None,
                },
            }
        }

        fn terminate(&self) {
            self.terminated.store(true, Ordering::SeqCst);
            if self.obeys_term {
                let _ = self.tx.send(ExitOutcome {
                    code: None,
                    signal: Some(libc_sigterm()),
                });
            }
        }

        async fn kill(&mut self) {
            let _ = self.tx.send(ExitOutcome {
                code: None,
                signal: Some(9),
            });
        }
    }

    fn libc_sigterm() -> i32 {
        15
    }

    #[async_trait]
    impl ProcessLauncher for FakeLauncher {
        async fn launch(&self, spec: &LaunchSpec) -> Result<Box<dyn ChildHandle>> {
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(CortexError::Runner {
                    message: "scripted launch failure".to_string(),
                });
            }
            let (tx, rx) = mpsc::unbounded_channel();
            self.controls
                .lock()
                .await
                .insert(spec.task_id.clone(), tx.clone());
            self.launched.lock().await.push(spec.clone());
            let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeChild {
                pid,
                rx,
                tx,
                terminated: Arc::new(AtomicBool::new(false)),
                obeys_term: true,
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::FakeLauncher;
    use super::*;

    fn spec(task_id: &str) -> LaunchSpec {
        LaunchSpec {
            task_id: task_id.to_string(),
            binary: "agent".to_string(),
            model: None,
            dry_run: false,
            workdir: None,
            prompt: "do the thing".to_string(),
            env: Vec::new(),
        }
    }

    #[tokio::test]
    async fn exit_events_arrive_on_the_channel() {
        let launcher = FakeLauncher::new();
        let (supervisor, mut exit_rx) = Supervisor::new(launcher.clone());

        supervisor.spawn(spec("aaaa1111")).await.unwrap();
        assert_eq!(supervisor.running_count().await, 1);

        assert!(launcher.complete("aaaa1111", 0).await);
        let event = exit_rx.recv().await.unwrap();
        assert_eq!(event.task_id, "aaaa1111");
        assert!(event.outcome.success());
        assert_eq!(supervisor.running_count().await, 0);
    }

    #[tokio::test]
    async fn nonzero_exit_is_failure() {
        let launcher = FakeLauncher::new();
        let (supervisor, mut exit_rx) = Supervisor::new(launcher.clone());
        supervisor.spawn(spec("bbbb2222")).await.unwrap();
        launcher.complete("bbbb2222", 3).await;
        let event = exit_rx.recv().await.unwrap();
        assert!(!event.outcome.success());
        assert_eq!(event.outcome.describe(), "exit code 3");
    }

    #[tokio::test]
    async fn cancel_terminates_child() {
        let launcher = FakeLauncher::new();
        let (supervisor, mut exit_rx) =
            Supervisor::with_grace(launcher.clone(), Duration::from_millis(50));
        supervisor.spawn(spec("cccc3333")).await.unwrap();

        assert!(supervisor.cancel("cccc3333").await);
        let event = exit_rx.recv().await.unwrap();
        assert_eq!(event.outcome.signal, Some(15));
        assert!(!supervisor.cancel("cccc3333").await);
    }

    #[tokio::test]
    async fn spawn_failure_surfaces() {
        let launcher = FakeLauncher::new();
        launcher
            .fail_next
            .store(true, std::sync::atomic::Ordering::SeqCst);
        let (supervisor, _exit_rx) = Supervisor::new(launcher.clone());
        assert!(supervisor.spawn(spec("dddd4444")).await.is_err());
        assert_eq!(supervisor.running_count().await, 0);
    }
}
