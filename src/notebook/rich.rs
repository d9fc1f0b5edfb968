//! Rich backend: the direct backend plus an external notebook CLI for
//! full-text search.

use super::{DirectBackend, ListFilters, NoteRecord, NotebookBackend, SearchHit};
use crate::{CortexError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info};

/// Candidate locations probed when no explicit binary is configured.
const CANDIDATE_BINARIES: &[&str] = &["zk", "/usr/local/bin/zk", "/usr/bin/zk"];

#[derive(Debug, Clone)]
pub struct RichBackend {
    direct: DirectBackend,
    binary: String,
}

/// Wire shape of one CLI search result.
#[derive(Debug, Deserialize)]
struct CliHit {
    path: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    snippet: String,
}

impl RichBackend {
    /// Probes for the notebook CLI; `None` means the caller should fall
    /// back to the direct backend.
    pub async fn discover(direct: DirectBackend, override_bin: Option<&str>) -> Option<Self> {
        let candidates: Vec<String> = match override_bin {
            Some(bin) => vec![bin.to_string()],
            None => CANDIDATE_BINARIES.iter().map(|s| s.to_string()).collect(),
        };
        for candidate in candidates {
            match Command::new(&candidate).arg("--version").output().await {
                Ok(output) if output.status.success() => {
                    info!("Found notebook CLI at: {}", candidate);
                    return Some(Self {
                        direct,
                        binary: candidate,
                    });
                }
                Ok(_) => debug!("Binary at {} exists but --version failed", candidate),
                Err(_) => debug!("No binary found at {}", candidate),
            }
        }
        None
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }
}

#[async_trait]
impl NotebookBackend for RichBackend {
    fn name(&self) -> &'static str {
        "rich"
    }

    fn supports_search(&self) -> bool {
        true
    }

    async fn list(&self, filters: &ListFilters) -> Result<Vec<NoteRecord>> {
        // File-backed operations keep the direct contract; the CLI indexes
        // the same tree.
        self.direct.list(filters).await
    }

    async fn get(&self, reference: &str) -> Result<Option<NoteRecord>> {
        self.direct.get(reference).await
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let output = Command::new(&self.binary)
            .args([
                "list",
                "--format",
                "json",
                "--match",
                query,
                "--limit",
                &limit.to_string(),
            ])
            .current_dir(self.direct.root())
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CortexError::BackendUnavailable(format!(
                "notebook CLI search failed: {}",
                stderr.trim()
            )));
        }

        let hits: Vec<CliHit> = serde_json::from_slice(&output.stdout)?;
        Ok(hits
            .into_iter()
            .map(|h| SearchHit {
                title: if h.title.is_empty() {
                    h.path.clone()
                } else {
                    h.title
                },
                path: h.path,
                snippet: h.snippet,
            })
            .collect())
    }
}
