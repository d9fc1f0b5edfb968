//! Direct-file backend: walks the notebook tree itself, no external index.

use super::{extract_link_targets, frontmatter, ListFilters, NoteRecord, NotebookBackend, SearchHit};
use crate::{CortexError, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

const LEAD_MAX_CHARS: usize = 200;

#[derive(Debug, Clone)]
pub struct DirectBackend {
    root: PathBuf,
}

impl DirectBackend {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Reads every parseable entry under the root. Files that fail to
    /// parse are skipped with a debug log, never fatal.
    pub fn scan_all(&self) -> Result<Vec<NoteRecord>> {
        let mut records = Vec::new();
        if !self.root.exists() {
            return Ok(records);
        }
        let mut stack = vec![self.root.clone()];
        while let Some(dir) = stack.pop() {
            let entries = match fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) => {
                    debug!("Skipping unreadable directory {:?}: {}", dir, e);
                    continue;
                }
            };
            for entry in entries.flatten() {
                let path = entry.path();
                let name = entry.file_name();
                let name = name.to_string_lossy();
                if name.starts_with('.') {
                    continue;
                }
                if path.is_dir() {
                    stack.push(path);
                } else if name.ends_with(".md") {
                    match self.record_from_file(&path) {
                        Ok(record) => records.push(record),
                        Err(e) => debug!("Skipping unparseable entry {:?}: {}", path, e),
                    }
                }
            }
        }
        records.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(records)
    }

    fn record_from_file(&self, abs_path: &Path) -> Result<NoteRecord> {
        let text = fs::read_to_string(abs_path)?;
        let (metadata, body) = frontmatter::parse(&text)?;
        let rel_path = abs_path
            .strip_prefix(&self.root)
            .unwrap_or(abs_path)
            .to_string_lossy()
            .to_string();

        // The id is derived from the file name; frontmatter is the
        // fallback for hand-written files.
        let stem_id = abs_path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| s.split('-').next())
            .filter(|s| s.len() == crate::constants::ENTRY_ID_LENGTH)
            .map(str::to_string);
        let id = stem_id.unwrap_or_else(|| metadata.id.clone());

        Ok(NoteRecord {
            path: rel_path,
            id,
            title: metadata.title.clone(),
            tags: metadata.tags.clone(),
            lead: lead_of(&body),
            created: metadata.created,
            modified: metadata.modified,
            metadata,
            body,
        })
    }

    fn resolve_ref<'a>(
        &self,
        records: &'a [NoteRecord],
        reference: &str,
    ) -> Option<&'a NoteRecord> {
        let normalized = reference.trim_start_matches("./");
        let with_md = if normalized.ends_with(".md") {
            normalized.to_string()
        } else {
            format!("{normalized}.md")
        };
        records.iter().find(|r| {
            r.id == reference || r.path == normalized || r.path == with_md || r.path.ends_with(&with_md)
        })
    }
}

fn lead_of(body: &str) -> String {
    let paragraph = body
        .split("\n\n")
        .map(str::trim)
        .find(|p| !p.is_empty() && !p.starts_with('#'))
        .unwrap_or("");
    paragraph.chars().take(LEAD_MAX_CHARS).collect()
}

#[async_trait]
impl NotebookBackend for DirectBackend {
    fn name(&self) -> &'static str {
        "direct"
    }

    fn supports_search(&self) -> bool {
        false
    }

    async fn list(&self, filters: &ListFilters) -> Result<Vec<NoteRecord>> {
        let records = self.scan_all()?;

        // Link-graph filters need the whole set before filtering.
        let outlinks: Vec<(usize, Vec<String>)> = records
            .iter()
            .enumerate()
            .map(|(i, r)| (i, extract_link_targets(&r.body)))
            .collect();
        let resolve_indices = |targets: &[String]| -> HashSet<usize> {
            targets
                .iter()
                .filter_map(|t| {
                    self.resolve_ref(&records, t)
                        .and_then(|rec| records.iter().position(|r| r.path == rec.path))
                })
                .collect()
        };
        let out_sets: Vec<HashSet<usize>> = outlinks
            .iter()
            .map(|(_, targets)| resolve_indices(targets))
            .collect();
        let mut in_sets: Vec<HashSet<usize>> = vec![HashSet::new(); records.len()];
        for (src, targets) in out_sets.iter().enumerate() {
            for &dst in targets {
                in_sets[dst].insert(src);
            }
        }

        let anchor = |reference: &Option<String>| -> Option<usize> {
            reference.as_ref().and_then(|r| {
                self.resolve_ref(&records, r)
                    .and_then(|rec| records.iter().position(|x| x.path == rec.path))
            })
        };
        let link_to_anchor = anchor(&filters.link_to);
        let linked_by_anchor = anchor(&filters.linked_by);
        let related_anchor = anchor(&filters.related);
        if filters.link_to.is_some() && link_to_anchor.is_none() {
            return Ok(Vec::new());
        }
        if filters.linked_by.is_some() && linked_by_anchor.is_none() {
            return Ok(Vec::new());
        }
        if filters.related.is_some() && related_anchor.is_none() {
            return Ok(Vec::new());
        }

        let mut selected = Vec::new();
        for (i, record) in records.iter().enumerate() {
            if let Some(entry_type) = filters.entry_type {
                if record.metadata.entry_type != entry_type {
                    continue;
                }
            }
            if let Some(tag) = &filters.tag {
                if !record.tags.iter().any(|t| t == tag) {
                    continue;
                }
            }
            if let Some(project_id) = &filters.project_id {
                let in_project = record.metadata.project_id.as_deref() == Some(project_id)
                    || record.path.starts_with(&format!("projects/{project_id}/"));
                if !in_project {
                    continue;
                }
            }
            if let Some(target) = link_to_anchor {
                if i == target || !out_sets[i].contains(&target) {
                    continue;
                }
            }
            if let Some(source) = linked_by_anchor {
                if i == source || !out_sets[source].contains(&i) {
                    continue;
                }
            }
            if let Some(center) = related_anchor {
                if i == center {
                    continue;
                }
                let linked = out_sets[i].contains(&center)
                    || out_sets[center].contains(&i);
                let shares_tag = record
                    .tags
                    .iter()
                    .any(|t| records[center].tags.contains(t));
                if !linked && !shares_tag {
                    continue;
                }
            }
            if filters.orphan && (!out_sets[i].is_empty() || !in_sets[i].is_empty()) {
                continue;
            }
            selected.push(record.clone());
            if let Some(limit) = filters.limit {
                if selected.len() >= limit {
                    break;
                }
            }
        }
        Ok(selected)
    }

    async fn get(&self, reference: &str) -> Result<Option<NoteRecord>> {
        // Path refs resolve without a scan; id refs need one.
        if reference.contains('/') {
            let normalized = reference.trim_start_matches('/').trim_start_matches("./");
            let candidate = if normalized.ends_with(".md") {
                self.root.join(normalized)
            } else {
                self.root.join(format!("{normalized}.md"))
            };
            if candidate.is_file() {
                return self.record_from_file(&candidate).map(Some);
            }
            return Ok(None);
        }
        let records = self.scan_all()?;
        Ok(records.into_iter().find(|r| r.id == reference))
    }

    async fn search(&self, _query: &str, _limit: usize) -> Result<Vec<SearchHit>> {
        Err(CortexError::BackendUnavailable(
            "full-text search requires the notebook CLI".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EntryStatus, EntryType, Frontmatter};
    use tempfile::TempDir;

    fn write_entry(
        root: &Path,
        rel: &str,
        id: &str,
        title: &str,
        entry_type: EntryType,
        tags: &[&str],
        body: &str,
    ) {
        let mut fm = Frontmatter::new(id.to_string(), title.to_string(), entry_type);
        fm.status = entry_type.default_status();
        fm.tags = tags.iter().map(|t| t.to_string()).collect();
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, frontmatter::compose(&fm, body)).unwrap();
    }

    fn fixture() -> (TempDir, DirectBackend) {
        let dir = TempDir::new().unwrap();
        let root = dir.path().to_path_buf();
        write_entry(
            &root,
            "global/plan/aaaa1111-roadmap.md",
            "aaaa1111",
            "Roadmap",
            EntryType::Plan,
            &["core"],
            "Links to [[bbbb2222]].\n",
        );
        write_entry(
            &root,
            "global/idea/bbbb2222-caching.md",
            "bbbb2222",
            "Caching",
            EntryType::Idea,
            &["core", "perf"],
            "A caching idea.\n",
        );
        write_entry(
            &root,
            "projects/demo/task/cccc3333-wire-up.md",
            "cccc3333",
            "Wire up",
            EntryType::Task,
            &[],
            "No links.\n",
        );
        (dir, DirectBackend::new(root))
    }

    #[tokio::test]
    async fn scan_finds_all_entries() {
        let (_dir, backend) = fixture();
        let records = backend.scan_all().unwrap();
        assert_eq!(records.len(), 3);
        let task = records.iter().find(|r| r.id == "cccc3333").unwrap();
        assert_eq!(task.metadata.status, EntryStatus::Draft);
        assert_eq!(task.path, "projects/demo/task/cccc3333-wire-up.md");
    }

    #[tokio::test]
    async fn get_by_id_and_path() {
        let (_dir, backend) = fixture();
        let by_id = backend.get("aaaa1111").await.unwrap().unwrap();
        assert_eq!(by_id.title, "Roadmap");
        let by_path = backend
            .get("global/idea/bbbb2222-caching")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_path.id, "bbbb2222");
        assert!(backend.get("zzzz9999").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_filters_by_type_and_tag() {
        let (_dir, backend) = fixture();
        let tasks = backend
            .list(&ListFilters {
                entry_type: Some(EntryType::Task),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(tasks.len(), 1);

        let perf = backend
            .list(&ListFilters {
                tag: Some("perf".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(perf.len(), 1);
        assert_eq!(perf[0].id, "bbbb2222");
    }

    #[tokio::test]
    async fn link_graph_filters() {
        let (_dir, backend) = fixture();
        let linking_to_idea = backend
            .list(&ListFilters {
                link_to: Some("bbbb2222".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(linking_to_idea.len(), 1);
        assert_eq!(linking_to_idea[0].id, "aaaa1111");

        let linked_by_plan = backend
            .list(&ListFilters {
                linked_by: Some("aaaa1111".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(linked_by_plan.len(), 1);
        assert_eq!(linked_by_plan[0].id, "bbbb2222");

        let orphans = backend
            .list(&ListFilters {
                orphan: true,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].id, "cccc3333");
    }

    #[tokio::test]
    async fn related_by_shared_tag() {
        let (_dir, backend) = fixture();
        let related = backend
            .list(&ListFilters {
                related: Some("aaaa1111".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(related.len(), 1);
        assert_eq!(related[0].id, "bbbb2222");
    }

    #[tokio::test]
    async fn search_is_unsupported() {
        let (_dir, backend) = fixture();
        let err = backend.search("anything", 10).await.unwrap_err();
        assert!(matches!(err, CortexError::BackendUnavailable(_)));
    }
}
