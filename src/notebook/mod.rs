//! Notebook adapter: a read-mostly view over the markdown entry store.
//!
//! Two backends share one contract. The direct backend walks the files
//! itself; the rich backend layers an external notebook CLI on top for
//! full-text search. When the CLI is absent, search degrades to a typed
//! `BackendUnavailable` while every file-backed operation keeps working.

pub mod direct;
pub mod frontmatter;
pub mod rich;

pub use direct::DirectBackend;
pub use rich::RichBackend;

use crate::config::NotebookConfig;
use crate::models::{EntryType, Frontmatter};
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// One row returned by the adapter: parsed frontmatter plus content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoteRecord {
    /// Path relative to the notebook root.
    pub path: String,
    pub id: String,
    pub title: String,
    pub tags: Vec<String>,
    pub metadata: Frontmatter,
    /// First paragraph of the body, for list views.
    pub lead: String,
    pub body: String,
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
}

/// A full-text hit from the rich backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub path: String,
    pub title: String,
    pub snippet: String,
}

/// Filters for `list`. All present filters must match.
#[derive(Debug, Clone, Default)]
pub struct ListFilters {
    pub entry_type: Option<EntryType>,
    pub tag: Option<String>,
    /// Entries whose body links to this ref.
    pub link_to: Option<String>,
    /// Entries linked from this ref's body.
    pub linked_by: Option<String>,
    /// Entries related to this ref (shared tags or links either way).
    pub related: Option<String>,
    /// Entries with no links in either direction.
    pub orphan: bool,
    pub project_id: Option<String>,
    pub limit: Option<usize>,
}

/// Backend contract shared by the direct and rich implementations.
///
/// Results are deterministic and file-backed; `search` is the only
/// operation allowed to require the external indexer.
#[async_trait]
pub trait NotebookBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether full-text `search` is serviceable.
    fn supports_search(&self) -> bool;

    async fn list(&self, filters: &ListFilters) -> Result<Vec<NoteRecord>>;

    /// Resolve a ref that may be an id or a (possibly extension-less)
    /// relative path.
    async fn get(&self, reference: &str) -> Result<Option<NoteRecord>>;

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>>;
}

/// Facade the services hold: one backend selected at startup.
#[derive(Clone)]
pub struct NotebookAdapter {
    backend: Arc<dyn NotebookBackend>,
    root: PathBuf,
}

impl NotebookAdapter {
    /// Builds the adapter, preferring the rich backend when its CLI can be
    /// discovered.
    pub async fn new(config: &NotebookConfig) -> Self {
        let direct = DirectBackend::new(config.root.clone());
        let backend: Arc<dyn NotebookBackend> =
            match RichBackend::discover(direct.clone(), config.rich_backend_bin.as_deref()).await {
                Some(rich) => {
                    tracing::info!("Notebook rich backend available: {}", rich.binary());
                    Arc::new(rich)
                }
                None => {
                    tracing::warn!(
                        "Notebook CLI not found; full-text search degrades to unsupported"
                    );
                    Arc::new(direct)
                }
            };
        Self {
            backend,
            root: config.root.clone(),
        }
    }

    /// Test/embedding constructor over an explicit backend.
    pub fn with_backend(backend: Arc<dyn NotebookBackend>, root: PathBuf) -> Self {
        Self { backend, root }
    }

    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    pub fn supports_search(&self) -> bool {
        self.backend.supports_search()
    }

    pub async fn list(&self, filters: &ListFilters) -> Result<Vec<NoteRecord>> {
        self.backend.list(filters).await
    }

    pub async fn get(&self, reference: &str) -> Result<Option<NoteRecord>> {
        self.backend.get(reference).await
    }

    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        self.backend.search(query, limit).await
    }
}

/// Extracts link targets from a markdown body: `](target.md)` relative
/// links and `[[id]]` wiki refs.
pub(crate) fn extract_link_targets(body: &str) -> Vec<String> {
    let mut targets = Vec::new();
    let bytes = body.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b']' && i + 1 < bytes.len() && bytes[i + 1] == b'(' {
            if let Some(end) = body[i + 2..].find(')') {
                let target = &body[i + 2..i + 2 + end];
                if target.ends_with(".md") && !target.contains("://") {
                    targets.push(target.trim_start_matches("./").to_string());
                }
                i += 2 + end;
                continue;
            }
        }
        if bytes[i] == b'[' && i + 1 < bytes.len() && bytes[i + 1] == b'[' {
            if let Some(end) = body[i + 2..].find("]]") {
                let target = body[i + 2..i + 2 + end].trim();
                if !target.is_empty() {
                    targets.push(target.to_string());
                }
                i += 2 + end + 2;
                continue;
            }
        }
        i += 1;
    }
    targets
}
