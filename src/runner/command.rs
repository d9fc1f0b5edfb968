//! Agent command construction.
//!
//! Fluent builder over the external agent CLI invocation: binary, model,
//! dry-run, working directory, environment, and the prompt delivered on
//! stdin.
//!
//! # Example
//! ```
//! use cortex_core::runner::command::AgentCommandBuilder;
//! let command = AgentCommandBuilder::new("claude")
//!     .with_model("sonnet")
//!     .with_workdir("/tmp/repo")
//!     .with_env("CORTEX_TASK_ID", "a1b2c3d4")
//!     .build();
//! ```

use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;

#[derive(Debug, Clone)]
pub struct AgentCommandBuilder {
    binary: String,
    model: Option<String>,
    dry_run: bool,
    workdir: Option<PathBuf>,
    environment_vars: Vec<(String, String)>,
}

impl AgentCommandBuilder {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            model: None,
            dry_run: false,
            workdir: None,
            environment_vars: Vec::new(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_workdir(mut self, path: impl Into<PathBuf>) -> Self {
        self.workdir = Some(path.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment_vars.push((key.into(), value.into()));
        self
    }

    /// The argv this builder produces, for logging and tests.
    pub fn args(&self) -> Vec<String> {
        let mut args = vec!["--print".to_string()];
        if let Some(model) = &self.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }
        if self.dry_run {
            args.push("--dry-run".to_string());
        }
        args
    }

    /// Builds the process command: prompt on stdin, output captured,
    /// parent environment propagated.
    pub fn build(self) -> Command {
        let mut command = Command::new(&self.binary);
        command.args(self.args());
        if let Some(workdir) = &self.workdir {
            command.current_dir(workdir);
        }
        for (key, value) in &self.environment_vars {
            command.env(key, value);
        }
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(false);
        command
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.binary.is_empty() {
            return Err("agent binary cannot be empty".to_string());
        }
        if matches!(&self.model, Some(model) if model.is_empty()) {
            return Err("model cannot be empty when set".to_string());
        }
        Ok(())
    }
}

/// Assembles the stdin prompt an agent receives for a task: title, the
/// original user request when recorded, and the task body.
pub fn build_prompt(title: &str, body: &str, user_original_request: Option<&str>) -> String {
    let mut prompt = format!("# Task: {title}\n\n");
    if let Some(request) = user_original_request {
        if !request.trim().is_empty() {
            prompt.push_str("## Original Request\n\n");
            prompt.push_str(request.trim());
            prompt.push_str("\n\n");
        }
    }
    prompt.push_str(body.trim());
    prompt.push('\n');
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_reflect_configuration() {
        let builder = AgentCommandBuilder::new("claude")
            .with_model("sonnet")
            .with_dry_run(true);
        assert_eq!(builder.args(), vec!["--print", "--model", "sonnet", "--dry-run"]);

        let plain = AgentCommandBuilder::new("claude");
        assert_eq!(plain.args(), vec!["--print"]);
    }

    #[test]
    fn validation_rejects_empty_binary() {
        assert!(AgentCommandBuilder::new("").validate().is_err());
        assert!(AgentCommandBuilder::new("claude").validate().is_ok());
        assert!(AgentCommandBuilder::new("claude")
            .with_model("")
            .validate()
            .is_err());
    }

    #[test]
    fn prompt_includes_original_request_when_present() {
        let prompt = build_prompt("Fix parser", "Steps.\n", Some("please fix the parser"));
        assert!(prompt.starts_with("# Task: Fix parser"));
        assert!(prompt.contains("## Original Request"));
        assert!(prompt.contains("please fix the parser"));
        assert!(prompt.ends_with("Steps.\n"));

        let bare = build_prompt("Fix parser", "Steps.\n", None);
        assert!(!bare.contains("Original Request"));
    }
}
