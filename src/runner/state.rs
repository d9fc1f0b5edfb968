//! Durable runner state: three files per project under the state dir.
//!
//! `runner-<p>.json` holds the full state, `runner-<p>.pid` just the pid,
//! and `running-<p>.json` a snapshot of currently-running tasks so crash
//! recovery survives a torn full-state write. All writes are
//! write-then-rename atomic; reads tolerate truncated or corrupt files by
//! reporting absence.

use crate::models::Priority;
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerPhase {
    Idle,
    Polling,
    Processing,
    Paused,
    Stopping,
    Stopped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunningTask {
    pub id: String,
    pub path: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    pub is_resume: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workdir: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunnerStats {
    pub completed: u64,
    pub failed: u64,
    /// Cumulative child runtime in seconds.
    pub total_runtime: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunnerState {
    pub status: RunnerPhase,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub running_tasks: Vec<RunningTask>,
    #[serde(default)]
    pub stats: RunnerStats,
}

impl RunnerState {
    pub fn fresh() -> Self {
        let now = Utc::now();
        Self {
            status: RunnerPhase::Idle,
            started_at: now,
            updated_at: now,
            running_tasks: Vec::new(),
            stats: RunnerStats::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StateManager {
    state_dir: PathBuf,
}

impl StateManager {
    pub fn new(state_dir: PathBuf) -> Self {
        Self { state_dir }
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    pub fn state_path(&self, project: &str) -> PathBuf {
        self.state_dir.join(format!("runner-{project}.json"))
    }

    pub fn pid_path(&self, project: &str) -> PathBuf {
        self.state_dir.join(format!("runner-{project}.pid"))
    }

    pub fn running_path(&self, project: &str) -> PathBuf {
        self.state_dir.join(format!("running-{project}.json"))
    }

    pub fn save_state(&self, project: &str, state: &RunnerState) -> Result<()> {
        write_atomic(&self.state_path(project), &serde_json::to_vec_pretty(state)?)
    }

    pub fn load_state(&self, project: &str) -> Option<RunnerState> {
        read_json(&self.state_path(project))
    }

    pub fn save_running(&self, project: &str, tasks: &[RunningTask]) -> Result<()> {
        write_atomic(
            &self.running_path(project),
            &serde_json::to_vec_pretty(&tasks)?,
        )
    }

    pub fn load_running(&self, project: &str) -> Vec<RunningTask> {
        read_json(&self.running_path(project)).unwrap_or_default()
    }

    pub fn save_pid(&self, project: &str, pid: u32) -> Result<()> {
        write_atomic(&self.pid_path(project), pid.to_string().as_bytes())
    }

    pub fn load_pid(&self, project: &str) -> Option<u32> {
        let text = fs::read_to_string(self.pid_path(project)).ok()?;
        text.trim().parse().ok()
    }

    pub fn clear_pid(&self, project: &str) {
        let _ = fs::remove_file(self.pid_path(project));
    }

    pub fn remove_all(&self, project: &str) {
        let _ = fs::remove_file(self.state_path(project));
        let _ = fs::remove_file(self.running_path(project));
        self.clear_pid(project);
    }

    /// Every `runner-<p>.json` in the dir, keyed by project.
    pub fn find_all_runner_states(&self) -> Vec<(String, RunnerState)> {
        let mut states = Vec::new();
        let entries = match fs::read_dir(&self.state_dir) {
            Ok(entries) => entries,
            Err(_) => return states,
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let project = match name
                .strip_prefix("runner-")
                .and_then(|rest| rest.strip_suffix(".json"))
            {
                Some(project) => project.to_string(),
                None => continue,
            };
            if let Some(state) = read_json::<RunnerState>(&entry.path()) {
                states.push((project, state));
            }
        }
        states.sort_by(|a, b| a.0.cmp(&b.0));
        states
    }

    /// Removes state files whose recorded PID is no longer live. Returns
    /// the projects that were swept.
    pub fn cleanup_stale_states(&self) -> Vec<String> {
        let mut cleaned = Vec::new();
        for (project, _) in self.find_all_runner_states() {
            match self.load_pid(&project) {
                Some(pid) if pid_alive(pid) => {}
                _ => {
                    info!("Sweeping stale runner state for project '{}'", project);
                    self.remove_all(&project);
                    cleaned.push(project);
                }
            }
        }
        cleaned
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let text = fs::read_to_string(path).ok()?;
    match serde_json::from_str(&text) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Treating corrupt state file {:?} as absent: {}", path, e);
            None
        }
    }
}

/// Whether a process with this pid is alive.
#[cfg(unix)]
pub fn pid_alive(pid: u32) -> bool {
    if pid == 0 || pid > i32::MAX as u32 {
        return false;
    }
    // Signal 0 probes for existence without delivering anything. EPERM
    // means the process exists but belongs to someone else.
    let rc = unsafe { libc::kill(pid as libc::pid_t, 0) };
    let alive = rc == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM);
    debug!("pid {} alive: {}", pid, alive);
    alive
}

#[cfg(not(unix))]
pub fn pid_alive(_pid: u32) -> bool {
    false
}
