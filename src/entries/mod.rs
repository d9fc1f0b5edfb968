//! Entry service: CRUD over entries, sections, search, and context
//! injection.
//!
//! Sole writer of entry files. Writes to the same path are serialized
//! through a per-path lock; cross-path writes proceed in parallel. Every
//! write goes file-first, meta-second, so a failed metadata write leaves a
//! consistent file that the next access reconciles.

pub mod sections;

pub use sections::{extract_section, parse_sections, ExtractedSection, Section};

use crate::constants::{MAX_MATCH_SUGGESTIONS, SEARCH_SNIPPET_LENGTH};
use crate::error::MatchSuggestion;
use crate::metadata::{MetadataStore, MetaStats};
use crate::models::{
    generate_entry_id, slugify, Entry, EntryStatus, EntryType, Frontmatter, Priority,
};
use crate::notebook::{frontmatter, ListFilters, NoteRecord, NotebookAdapter};
use crate::validation::{sanitize_free_text, ParamValidator};
use crate::{CortexError, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Fields accepted when creating an entry.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateEntry {
    pub entry_type: Option<EntryType>,
    pub title: String,
    #[serde(default)]
    pub content: String,
    pub project_id: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub priority: Option<Priority>,
    pub status: Option<EntryStatus>,
    pub parent_id: Option<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    pub feature_id: Option<String>,
    pub feature_priority: Option<Priority>,
    #[serde(default)]
    pub feature_depends_on: Vec<String>,
    pub workdir: Option<String>,
    pub worktree: Option<String>,
    pub git_remote: Option<String>,
    pub git_branch: Option<String>,
    pub user_original_request: Option<String>,
    #[serde(default)]
    pub related_entries: Vec<String>,
}

/// Field-level update. At least one field must be present.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateEntry {
    pub status: Option<EntryStatus>,
    pub title: Option<String>,
    /// Full body replacement; suppresses the status footer.
    pub content: Option<String>,
    pub append: Option<String>,
    pub note: Option<String>,
    pub depends_on: Option<Vec<String>>,
    pub feature_id: Option<String>,
    pub feature_priority: Option<Priority>,
    pub feature_depends_on: Option<Vec<String>>,
}

impl UpdateEntry {
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.title.is_none()
            && self.content.is_none()
            && self.append.is_none()
            && self.note.is_none()
            && self.depends_on.is_none()
            && self.feature_id.is_none()
            && self.feature_priority.is_none()
            && self.feature_depends_on.is_none()
    }
}

/// Slim row for list views.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntrySummary {
    pub id: String,
    pub path: String,
    pub title: String,
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    pub status: EntryStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    pub lead: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified: Option<DateTime<Utc>>,
}

impl EntrySummary {
    fn from_record(record: &NoteRecord) -> Self {
        Self {
            id: record.id.clone(),
            path: record.path.clone(),
            title: record.title.clone(),
            entry_type: record.metadata.entry_type,
            status: record.metadata.status,
            priority: record.metadata.priority,
            tags: record.tags.clone(),
            lead: record.lead.clone(),
            created: record.created,
            modified: record.modified,
        }
    }
}

/// Listing query for `GET /entries`.
#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    pub entry_type: Option<EntryType>,
    pub status: Option<EntryStatus>,
    pub parent_id: Option<String>,
    pub project_id: Option<String>,
    pub global: Option<bool>,
    pub filename: Option<String>,
    pub sort_by: SortBy,
    pub limit: usize,
    pub offset: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortBy {
    #[default]
    Created,
    Modified,
    Priority,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: String,
    pub path: String,
    pub title: String,
    pub snippet: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub entry_type: Option<EntryType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<EntryStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InjectResult {
    pub block: String,
    pub hits: Vec<SearchResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkInfo {
    pub id: String,
    pub path: String,
    pub title: String,
    pub link: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryStats {
    pub total_entries: usize,
    pub by_type: BTreeMap<String, usize>,
    pub by_status: BTreeMap<String, usize>,
    pub metadata: MetaStats,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaleEntry {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_activity: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct EntryService {
    notebook: NotebookAdapter,
    metadata: MetadataStore,
    validator: ParamValidator,
    write_locks: Arc<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>>,
}

impl EntryService {
    pub fn new(notebook: NotebookAdapter, metadata: MetadataStore) -> Result<Self> {
        Ok(Self {
            notebook,
            metadata,
            validator: ParamValidator::new()?,
            write_locks: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub fn notebook(&self) -> &NotebookAdapter {
        &self.notebook
    }

    pub fn metadata(&self) -> &MetadataStore {
        &self.metadata
    }

    async fn path_lock(&self, path: &Path) -> Arc<Mutex<()>> {
        let mut locks = self.write_locks.lock().await;
        locks
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Resolves a ref (id, path, or exact title) without recording access.
    pub async fn resolve(&self, reference: &str) -> Result<NoteRecord> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(CortexError::invalid("ref", "must not be empty"));
        }
        if self.validator.looks_like_entry_id(reference) || reference.contains('/') {
            return self
                .notebook
                .get(reference)
                .await?
                .ok_or_else(|| CortexError::NotFound(format!("entry '{reference}'")));
        }

        // Title resolution: exact match, ambiguous is a typed error.
        let records = self.notebook.list(&ListFilters::default()).await?;
        let mut candidates: Vec<&NoteRecord> =
            records.iter().filter(|r| r.title == reference).collect();
        match candidates.len() {
            0 => Err(CortexError::NotFound(format!("entry '{reference}'"))),
            1 => Ok(candidates.remove(0).clone()),
            _ => {
                candidates.sort_by(|a, b| a.path.cmp(&b.path));
                Err(CortexError::AmbiguousMatch {
                    reference: reference.to_string(),
                    suggestions: candidates
                        .iter()
                        .take(MAX_MATCH_SUGGESTIONS)
                        .map(|r| MatchSuggestion {
                            id: r.id.clone(),
                            title: r.title.clone(),
                            path: r.path.clone(),
                        })
                        .collect(),
                })
            }
        }
    }

    /// Resolves a ref and records the access.
    pub async fn recall(&self, reference: &str) -> Result<Entry> {
        let record = self.resolve(reference).await?;
        self.metadata.record_access(&record.id).await?;
        Ok(record_to_entry(&record))
    }

    /// Creates an entry under `global/<type>/` or
    /// `projects/<p>/<type>/`, initializing its metadata row.
    pub async fn create(&self, request: CreateEntry) -> Result<Entry> {
        let entry_type = request
            .entry_type
            .ok_or_else(|| CortexError::invalid("type", "is required"))?;
        if request.title.trim().is_empty() {
            return Err(CortexError::invalid("title", "must not be empty"));
        }
        if let Some(parent_id) = &request.parent_id {
            self.validator.check_entry_id(parent_id)?;
        }
        if let Some(project_id) = &request.project_id {
            self.validator.check_project_id(project_id)?;
        }

        let id = self.fresh_id().await?;
        let mut fm = Frontmatter::new(id.clone(), request.title.clone(), entry_type);
        fm.status = request.status.unwrap_or_else(|| entry_type.default_status());
        fm.priority = request.priority;
        fm.tags = request.tags.clone();
        fm.project_id = request.project_id.clone();
        fm.depends_on = request.depends_on.clone();
        fm.parent_id = request.parent_id.clone();
        fm.feature_id = request.feature_id.clone();
        fm.feature_priority = request.feature_priority;
        fm.feature_depends_on = request.feature_depends_on.clone();
        fm.workdir = request.workdir.clone();
        fm.worktree = request.worktree.clone();
        fm.git_remote = request.git_remote.clone();
        fm.git_branch = request.git_branch.clone();
        fm.user_original_request = request.user_original_request.clone();
        frontmatter::sanitize(&mut fm);

        let rel_dir = match &request.project_id {
            Some(project) => format!("projects/{project}/{}", entry_type.dir_name()),
            None => format!("global/{}", entry_type.dir_name()),
        };
        let file_name = format!("{id}-{}.md", slugify(&fm.title));
        let rel_path = format!("{rel_dir}/{file_name}");
        let abs_path = self.notebook.root().join(&rel_path);

        let mut body = sanitize_free_text(&request.content);
        if !body.is_empty() && !body.ends_with('\n') {
            body.push('\n');
        }
        if !request.related_entries.is_empty() {
            body.push_str(&self.related_appendix(&request.related_entries).await);
        }

        let lock = self.path_lock(&abs_path).await;
        let _guard = lock.lock().await;
        if let Some(parent) = abs_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&abs_path, frontmatter::compose(&fm, &body))?;
        info!("Created entry {} at {}", id, rel_path);

        // Meta-second: a failure here surfaces, but the file stays and the
        // row is reconciled on next access.
        self.metadata
            .init_entry(&id, request.project_id.as_deref())
            .await?;

        Ok(Entry {
            id,
            path: rel_path,
            frontmatter: fm,
            body,
        })
    }

    /// Resolution failures never fail a create; unresolved refs are
    /// commented out so human review is cheap.
    async fn related_appendix(&self, refs: &[String]) -> String {
        let mut appendix = String::from("\n## Related Brain Entries\n\n");
        for reference in refs {
            match self.resolve(reference).await {
                Ok(record) => {
                    appendix.push_str(&format!("- [{}]({})\n", record.title, record.path));
                }
                Err(_) => {
                    debug!("Related ref '{}' did not resolve", reference);
                    appendix.push_str(&format!("<!-- unresolved: {reference} -->\n"));
                }
            }
        }
        appendix
    }

    async fn fresh_id(&self) -> Result<String> {
        for _ in 0..8 {
            let id = generate_entry_id();
            if self.notebook.get(&id).await?.is_none() {
                return Ok(id);
            }
        }
        Err(CortexError::Internal(anyhow::anyhow!(
            "could not allocate an unused entry id"
        )))
    }

    /// Field-level update. Only the named fields change; everything else
    /// in the frontmatter block is preserved byte-equivalent.
    pub async fn update(&self, reference: &str, update: UpdateEntry) -> Result<Entry> {
        if update.is_empty() {
            return Err(CortexError::invalid("body", "at least one field is required"));
        }
        let record = self.resolve(reference).await?;
        let abs_path = self.notebook.root().join(&record.path);

        let lock = self.path_lock(&abs_path).await;
        let _guard = lock.lock().await;

        let text = std::fs::read_to_string(&abs_path)?;
        let (mut fm_lines, mut body) = split_document(&text)?;
        let old_status = record.metadata.status;

        if let Some(title) = &update.title {
            let title = crate::validation::sanitize_title(title);
            if title.is_empty() {
                return Err(CortexError::invalid("title", "must not be empty"));
            }
            replace_scalar(&mut fm_lines, "title", &frontmatter::scalar_line("title", &title));
        }
        if let Some(status) = update.status {
            replace_scalar(
                &mut fm_lines,
                "status",
                &frontmatter::scalar_line("status", status.as_str()),
            );
        }
        if let Some(depends_on) = &update.depends_on {
            let cleaned: Vec<String> = depends_on
                .iter()
                .map(|d| sanitize_free_text(d).trim().to_string())
                .filter(|d| !d.is_empty())
                .collect();
            replace_block(
                &mut fm_lines,
                "depends_on",
                &frontmatter::list_block("depends_on", &cleaned),
            );
        }
        if let Some(feature_id) = &update.feature_id {
            replace_scalar(
                &mut fm_lines,
                "feature_id",
                &frontmatter::scalar_line("feature_id", feature_id),
            );
        }
        if let Some(feature_priority) = update.feature_priority {
            replace_scalar(
                &mut fm_lines,
                "feature_priority",
                &frontmatter::scalar_line("feature_priority", &feature_priority.to_string()),
            );
        }
        if let Some(feature_depends_on) = &update.feature_depends_on {
            replace_block(
                &mut fm_lines,
                "feature_depends_on",
                &frontmatter::list_block("feature_depends_on", feature_depends_on),
            );
        }

        let replaced_content = update.content.is_some();
        if let Some(content) = &update.content {
            body = sanitize_free_text(content);
            if !body.is_empty() && !body.ends_with('\n') {
                body.push('\n');
            }
        }
        if let Some(append) = &update.append {
            if !body.is_empty() && !body.ends_with('\n') {
                body.push('\n');
            }
            body.push_str(&sanitize_free_text(append));
            if !body.ends_with('\n') {
                body.push('\n');
            }
        }

        // Status change or note appends a dated footer unless the caller
        // replaced the whole body.
        let status_changed = update.status.map(|s| s != old_status).unwrap_or(false);
        if !replaced_content && (status_changed || update.note.is_some()) {
            let shown_status = update.status.unwrap_or(old_status);
            let date = Utc::now().format("%Y-%m-%d");
            let footer = match &update.note {
                Some(note) => format!(
                    "*Status changed to {} on {}: {}*",
                    shown_status,
                    date,
                    sanitize_free_text(note).trim()
                ),
                None => format!("*Status changed to {shown_status} on {date}*"),
            };
            if !body.is_empty() && !body.ends_with('\n') {
                body.push('\n');
            }
            body.push('\n');
            body.push_str(&footer);
            body.push('\n');
        }

        let mut new_text = String::from("---\n");
        for line in &fm_lines {
            new_text.push_str(line);
            new_text.push('\n');
        }
        new_text.push_str("---\n");
        new_text.push_str(&body);
        std::fs::write(&abs_path, &new_text)?;
        debug!("Updated entry {} ({})", record.id, record.path);

        let (fm, body) = frontmatter::parse(&new_text)?;
        Ok(Entry {
            id: record.id,
            path: record.path,
            frontmatter: fm,
            body,
        })
    }

    /// Deletes an entry file and its metadata row. Requires confirmation.
    pub async fn delete(&self, reference: &str, confirm: bool) -> Result<Entry> {
        if !confirm {
            return Err(CortexError::invalid("confirm", "must be true to delete"));
        }
        let record = self.resolve(reference).await?;
        let abs_path = self.notebook.root().join(&record.path);

        let lock = self.path_lock(&abs_path).await;
        let _guard = lock.lock().await;
        std::fs::remove_file(&abs_path)?;
        self.metadata.remove(&record.id).await?;
        info!("Deleted entry {} ({})", record.id, record.path);
        Ok(record_to_entry(&record))
    }

    /// Bumps `last_verified` for an entry.
    pub async fn verify(&self, reference: &str) -> Result<DateTime<Utc>> {
        let record = self.resolve(reference).await?;
        self.metadata.mark_verified(&record.id).await?;
        Ok(Utc::now())
    }

    /// Resolves a ref to a canonical markdown link.
    pub async fn generate_link(&self, reference: &str) -> Result<LinkInfo> {
        let record = self.resolve(reference).await?;
        Ok(LinkInfo {
            link: format!("[{}]({})", record.title, record.path),
            id: record.id,
            path: record.path,
            title: record.title,
        })
    }

    /// Paginated listing. Returns the page and the pre-pagination total.
    pub async fn list(&self, query: &ListQuery) -> Result<(Vec<EntrySummary>, usize)> {
        let filters = ListFilters {
            entry_type: query.entry_type,
            project_id: query.project_id.clone(),
            ..Default::default()
        };
        let records = self.notebook.list(&filters).await?;
        let mut rows: Vec<EntrySummary> = records
            .iter()
            .filter(|r| match query.status {
                Some(status) => r.metadata.status == status,
                None => true,
            })
            .filter(|r| match &query.parent_id {
                Some(parent) => r.metadata.parent_id.as_deref() == Some(parent.as_str()),
                None => true,
            })
            .filter(|r| match query.global {
                Some(true) => r.path.starts_with("global/"),
                Some(false) => r.path.starts_with("projects/"),
                None => true,
            })
            .filter(|r| match &query.filename {
                Some(name) => Path::new(&r.path)
                    .file_name()
                    .map(|f| f.to_string_lossy() == name.as_str())
                    .unwrap_or(false),
                None => true,
            })
            .map(EntrySummary::from_record)
            .collect();

        match query.sort_by {
            SortBy::Created => rows.sort_by(|a, b| b.created.cmp(&a.created)),
            SortBy::Modified => rows.sort_by(|a, b| b.modified.cmp(&a.modified)),
            SortBy::Priority => rows.sort_by(|a, b| {
                Priority::rank_or_default(a.priority).cmp(&Priority::rank_or_default(b.priority))
            }),
        }

        let total = rows.len();
        let page = rows
            .into_iter()
            .skip(query.offset)
            .take(query.limit)
            .collect();
        Ok((page, total))
    }

    /// Entries linking to this ref.
    pub async fn backlinks(&self, reference: &str, limit: usize) -> Result<Vec<EntrySummary>> {
        let record = self.resolve(reference).await?;
        let records = self
            .notebook
            .list(&ListFilters {
                link_to: Some(record.id),
                limit: Some(limit),
                ..Default::default()
            })
            .await?;
        Ok(records.iter().map(EntrySummary::from_record).collect())
    }

    /// Entries this ref links to.
    pub async fn outlinks(&self, reference: &str, limit: usize) -> Result<Vec<EntrySummary>> {
        let record = self.resolve(reference).await?;
        let records = self
            .notebook
            .list(&ListFilters {
                linked_by: Some(record.id),
                limit: Some(limit),
                ..Default::default()
            })
            .await?;
        Ok(records.iter().map(EntrySummary::from_record).collect())
    }

    /// Entries related by links or shared tags.
    pub async fn related(&self, reference: &str, limit: usize) -> Result<Vec<EntrySummary>> {
        let record = self.resolve(reference).await?;
        let records = self
            .notebook
            .list(&ListFilters {
                related: Some(record.id),
                limit: Some(limit),
                ..Default::default()
            })
            .await?;
        Ok(records.iter().map(EntrySummary::from_record).collect())
    }

    /// Full-text search with a 150-char snippet per hit.
    pub async fn search(
        &self,
        query: &str,
        entry_type: Option<EntryType>,
        status: Option<EntryStatus>,
        limit: usize,
        global_only: bool,
    ) -> Result<Vec<SearchResult>> {
        let hits = self.notebook.search(query, limit).await?;
        let mut results = Vec::new();
        for hit in hits {
            let record = self.notebook.get(&hit.path).await?;
            let (hit_type, hit_status, lead) = match &record {
                Some(r) => (
                    Some(r.metadata.entry_type),
                    Some(r.metadata.status),
                    r.lead.clone(),
                ),
                None => (None, None, String::new()),
            };
            if let Some(wanted) = entry_type {
                if hit_type != Some(wanted) {
                    continue;
                }
            }
            if let Some(wanted) = status {
                if hit_status != Some(wanted) {
                    continue;
                }
            }
            if global_only && !hit.path.starts_with("global/") {
                continue;
            }
            let raw_snippet = if hit.snippet.is_empty() {
                lead
            } else {
                hit.snippet.clone()
            };
            results.push(SearchResult {
                id: record.as_ref().map(|r| r.id.clone()).unwrap_or_default(),
                path: hit.path,
                title: hit.title,
                snippet: raw_snippet.chars().take(SEARCH_SNIPPET_LENGTH).collect(),
                entry_type: hit_type,
                status: hit_status,
            });
            if results.len() >= limit {
                break;
            }
        }
        Ok(results)
    }

    /// Context injection. Succeeds even without the rich backend: the
    /// block then carries an explanatory line instead of sections.
    pub async fn inject(&self, query: &str, limit: usize) -> Result<InjectResult> {
        let hits = match self.search(query, None, None, limit, false).await {
            Ok(hits) => hits,
            Err(CortexError::BackendUnavailable(reason)) => {
                warn!("Inject degraded: {}", reason);
                return Ok(InjectResult {
                    block: "## Relevant Brain Context\n\n\
                            _Full-text search is unavailable; no context was injected._\n"
                        .to_string(),
                    hits: Vec::new(),
                });
            }
            Err(e) => return Err(e),
        };

        let mut block = String::from("## Relevant Brain Context\n");
        if hits.is_empty() {
            block.push_str("\n_No matching entries._\n");
        }
        for hit in &hits {
            block.push_str(&format!("\n### {} ({})\n\n{}\n", hit.title, hit.id, hit.snippet));
        }
        Ok(InjectResult { block, hits })
    }

    /// Type/status counts plus metadata aggregates.
    pub async fn stats(&self) -> Result<EntryStats> {
        let records = self.notebook.list(&ListFilters::default()).await?;
        let mut by_type: BTreeMap<String, usize> = BTreeMap::new();
        let mut by_status: BTreeMap<String, usize> = BTreeMap::new();
        for record in &records {
            *by_type
                .entry(record.metadata.entry_type.to_string())
                .or_default() += 1;
            *by_status
                .entry(record.metadata.status.to_string())
                .or_default() += 1;
        }
        Ok(EntryStats {
            total_entries: records.len(),
            by_type,
            by_status,
            metadata: self.metadata.stats(5).await?,
        })
    }

    /// Entries with no links in either direction.
    pub async fn list_orphans(&self, limit: usize) -> Result<Vec<EntrySummary>> {
        let records = self
            .notebook
            .list(&ListFilters {
                orphan: true,
                limit: Some(limit),
                ..Default::default()
            })
            .await?;
        Ok(records.iter().map(EntrySummary::from_record).collect())
    }

    /// Entries neither accessed nor verified within `days`.
    pub async fn list_stale(&self, days: u32, limit: usize) -> Result<Vec<StaleEntry>> {
        let cutoff = Utc::now() - Duration::days(days as i64);
        let metas = self.metadata.stale(cutoff, limit).await?;
        let mut out = Vec::new();
        for meta in metas {
            let record = self.notebook.get(&meta.id).await?;
            out.push(StaleEntry {
                id: meta.id,
                path: record.as_ref().map(|r| r.path.clone()),
                title: record.as_ref().map(|r| r.title.clone()),
                last_activity: meta
                    .accessed_at
                    .into_iter()
                    .chain(meta.last_verified)
                    .chain(Some(meta.created_at))
                    .max(),
            });
        }
        Ok(out)
    }

    /// Projects that have a `task/` directory.
    pub async fn list_task_projects(&self) -> Result<Vec<String>> {
        let projects_dir = self
            .notebook
            .root()
            .join(crate::constants::PROJECTS_DIR_NAME);
        let mut projects = Vec::new();
        if !projects_dir.is_dir() {
            return Ok(projects);
        }
        for entry in std::fs::read_dir(&projects_dir)?.flatten() {
            let path = entry.path();
            if path.is_dir() && path.join(crate::constants::TASK_DIR_NAME).is_dir() {
                if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                    projects.push(name.to_string());
                }
            }
        }
        projects.sort();
        Ok(projects)
    }

    /// All tasks of a project, as the dependency engine consumes them.
    pub async fn project_tasks(&self, project_id: &str) -> Result<Vec<crate::models::Task>> {
        self.validator.check_project_id(project_id)?;
        let records = self
            .notebook
            .list(&ListFilters {
                entry_type: Some(EntryType::Task),
                project_id: Some(project_id.to_string()),
                ..Default::default()
            })
            .await?;
        Ok(records
            .iter()
            .filter_map(|r| crate::models::Task::from_entry(&record_to_entry(r)))
            .collect())
    }

    /// Lists h2/h3 sections of an entry.
    pub async fn sections(&self, reference: &str) -> Result<Vec<Section>> {
        let record = self.resolve(reference).await?;
        Ok(parse_sections(&record.body))
    }

    /// Extracts one section by title.
    pub async fn section(
        &self,
        reference: &str,
        title: &str,
        include_subsections: bool,
    ) -> Result<ExtractedSection> {
        let record = self.resolve(reference).await?;
        extract_section(&record.body, title, include_subsections)
            .ok_or_else(|| CortexError::NotFound(format!("section '{title}'")))
    }
}

fn record_to_entry(record: &NoteRecord) -> Entry {
    Entry {
        id: record.id.clone(),
        path: record.path.clone(),
        frontmatter: record.metadata.clone(),
        body: record.body.clone(),
    }
}

/// Splits a document into raw frontmatter lines and body, preserving the
/// frontmatter bytes exactly.
fn split_document(text: &str) -> Result<(Vec<String>, String)> {
    let rest = text
        .strip_prefix("---\n")
        .ok_or_else(|| CortexError::invalid("frontmatter", "document does not start with '---'"))?;
    let mut fm_lines = Vec::new();
    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end_matches('\n') == "---" {
            let body = rest[offset + line.len()..].to_string();
            return Ok((fm_lines, body));
        }
        fm_lines.push(line.trim_end_matches('\n').to_string());
        offset += line.len();
    }
    Err(CortexError::invalid(
        "frontmatter",
        "closing '---' delimiter not found",
    ))
}

fn field_start(line: &str, key: &str) -> bool {
    line.starts_with(key) && line[key.len()..].starts_with(':')
}

/// Replaces (or appends) a single scalar field line in place.
fn replace_scalar(fm_lines: &mut Vec<String>, key: &str, rendered: &str) {
    let rendered = rendered.trim_end_matches('\n').to_string();
    if let Some(idx) = fm_lines.iter().position(|l| field_start(l, key)) {
        // A scalar may be replacing an old block form; drop continuations.
        let mut end = idx + 1;
        while end < fm_lines.len() && is_continuation(&fm_lines[end]) {
            end += 1;
        }
        fm_lines.splice(idx..end, [rendered]);
    } else {
        fm_lines.push(rendered);
    }
}

/// Replaces (or appends) a list field and its continuation lines.
fn replace_block(fm_lines: &mut Vec<String>, key: &str, rendered: &str) {
    let rendered_lines: Vec<String> = rendered
        .trim_end_matches('\n')
        .lines()
        .map(str::to_string)
        .collect();
    if let Some(idx) = fm_lines.iter().position(|l| field_start(l, key)) {
        let mut end = idx + 1;
        while end < fm_lines.len() && is_continuation(&fm_lines[end]) {
            end += 1;
        }
        fm_lines.splice(idx..end, rendered_lines);
    } else {
        fm_lines.extend(rendered_lines);
    }
}

fn is_continuation(line: &str) -> bool {
    line.starts_with("  ") || line.starts_with("\t")
}

#[cfg(test)]
mod tests;
