use crate::constants::{API_TIMEOUT_SECS, DEFAULT_MAX_PARALLEL, DEFAULT_POLL_INTERVAL_SECS};
use crate::{CortexError, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

#[cfg(test)]
mod tests;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub notebook: NotebookConfig,
    pub metadata: MetadataConfig,
    pub api: ApiConfig,
    pub runner: RunnerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotebookConfig {
    /// Root of the on-disk notebook (`global/` and `projects/` live here).
    pub root: PathBuf,
    /// Explicit path to the rich notebook CLI. When unset the adapter
    /// probes standard locations and degrades to the direct backend.
    pub rich_backend_bin: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataConfig {
    /// SQLite database file for per-entry metadata.
    pub db_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Base URL of the cortex API the runner polls.
    pub api_base_url: String,
    /// Directory for runner state files (`runner-<p>.json` etc).
    pub state_dir: PathBuf,
    /// Agent CLI binary spawned per task.
    pub agent_binary: String,
    /// Model flag passed through to the agent CLI.
    pub agent_model: Option<String>,
    pub max_parallel: usize,
    pub poll_interval_secs: u64,
    pub api_timeout_secs: u64,
    /// Optional ndjson log file; console logging is always on.
    pub log_file: Option<PathBuf>,
}

fn home_dir() -> Result<PathBuf> {
    env::var("HOME").map(PathBuf::from).map_err(|_| {
        CortexError::ConfigurationError("HOME environment variable is not set".to_string())
    })
}

fn parsed_var<T: std::str::FromStr>(name: &str, default: T) -> Result<T> {
    match env::var(name) {
        Err(_) => Ok(default),
        Ok(raw) => raw.parse().map_err(|_| {
            CortexError::ConfigurationError(format!("{name} has an invalid value: {raw}"))
        }),
    }
}

impl Config {
    /// Loads configuration from the environment, with `.env` support.
    ///
    /// Every knob has a workable default except those derived from `$HOME`;
    /// malformed values fail loudly rather than falling back.
    pub fn load() -> Result<Self> {
        match dotenvy::dotenv() {
            Ok(path) => tracing::debug!("Loaded .env file from: {:?}", path),
            Err(_) => tracing::debug!("No .env file found"),
        }

        let home = home_dir()?;

        let root = env::var("CORTEX_NOTEBOOK_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| home.join(".cortex").join("notebook"));

        let notebook = NotebookConfig {
            root: root.clone(),
            rich_backend_bin: env::var("CORTEX_NOTEBOOK_BIN").ok(),
        };

        let metadata = MetadataConfig {
            db_path: env::var("CORTEX_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| root.join(".cortex-meta.db")),
        };

        let allowed_origins = env::var("CORTEX_ALLOWED_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:3000,http://127.0.0.1:3000".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let api = ApiConfig {
            host: env::var("CORTEX_API_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: parsed_var("CORTEX_API_PORT", 4200u16)?,
            allowed_origins,
        };

        let max_parallel: usize = parsed_var("CORTEX_MAX_PARALLEL", DEFAULT_MAX_PARALLEL)?;
        if max_parallel == 0 {
            return Err(CortexError::ConfigurationError(
                "CORTEX_MAX_PARALLEL must be at least 1".to_string(),
            ));
        }

        let poll_interval_secs = parsed_var("CORTEX_POLL_INTERVAL_SECS", DEFAULT_POLL_INTERVAL_SECS)?;
        if poll_interval_secs == 0 {
            return Err(CortexError::ConfigurationError(
                "CORTEX_POLL_INTERVAL_SECS must be at least 1".to_string(),
            ));
        }

        let runner = RunnerConfig {
            api_base_url: env::var("CORTEX_API_URL")
                .unwrap_or_else(|_| format!("http://{}:{}", api.host, api.port)),
            state_dir: env::var("CORTEX_STATE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| home.join(".cortex").join("runner")),
            agent_binary: env::var("CORTEX_AGENT_BIN").unwrap_or_else(|_| "claude".to_string()),
            agent_model: env::var("CORTEX_AGENT_MODEL").ok(),
            max_parallel,
            poll_interval_secs,
            api_timeout_secs: parsed_var("CORTEX_API_TIMEOUT_SECS", API_TIMEOUT_SECS)?,
            log_file: env::var("CORTEX_LOG_FILE").map(PathBuf::from).ok(),
        };

        Ok(Config {
            notebook,
            metadata,
            api,
            runner,
        })
    }
}
